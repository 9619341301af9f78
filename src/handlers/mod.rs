pub mod chat;
pub mod materializer;
pub mod pipeline;

pub use chat::ChatAssistant;
pub use materializer::DishMaterializer;
pub use pipeline::MenuPipeline;

/// Users always get the generic message; the underlying detail is appended
/// only outside production mode.
pub(crate) fn user_message(
    generic: &str,
    detail: &dyn std::fmt::Display,
    expose_errors: bool,
) -> String {
    if expose_errors {
        format!("{} ({})", generic, detail)
    } else {
        generic.to_string()
    }
}
