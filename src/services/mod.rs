pub mod catalog;
pub mod openrouter; // OpenRouter model gateway
pub mod translator;
pub mod vision;

pub use catalog::{CatalogStore, PostgresCatalog};
pub use openrouter::{ModelGateway, OpenRouterClient};
pub use translator::MenuTranslator;
pub use vision::{ImageSource, MenuVisionAnalyzer};
