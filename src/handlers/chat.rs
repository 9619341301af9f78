use std::sync::Arc;

use crate::handlers::user_message;
use crate::models::{RestaurantRef, ServiceResponse};
use crate::services::catalog::CatalogStore;
use crate::services::openrouter::{CallOptions, ChatMessage, ModelError, ModelGateway};

/// Hard cap on calls per question stage: one initial call plus two retries.
pub const MAX_MODEL_CALLS: u32 = 3;
const RELEVANCE_TOKEN_BUDGET: u32 = 8;
const ANSWER_TOKEN_BUDGET: u32 = 700;

pub const OFF_TOPIC_REPLY: &str = "Sorry, I can only help with food, dining and \
    restaurant questions. Ask me about dishes, menus or places to eat!";
const UNAVAILABLE_REPLY: &str =
    "The assistant is temporarily unavailable. Please try again in a moment.";

/// Terminal states of one question's journey through the assistant.
#[derive(Debug)]
pub enum ChatOutcome {
    Answer(String),
    OffTopic,
    Unavailable(ModelError),
}

pub struct ChatAssistant {
    model: Arc<dyn ModelGateway>,
    catalog: Arc<dyn CatalogStore>,
    expose_errors: bool,
}

impl ChatAssistant {
    pub fn new(
        model: Arc<dyn ModelGateway>,
        catalog: Arc<dyn CatalogStore>,
        expose_errors: bool,
    ) -> Self {
        Self {
            model,
            catalog,
            expose_errors,
        }
    }

    pub async fn chat(&self, question: &str, language: &str) -> ServiceResponse<String> {
        match self.answer_question(question, language).await {
            ChatOutcome::Answer(text) => ServiceResponse::ok(text),
            ChatOutcome::OffTopic => ServiceResponse::ok(OFF_TOPIC_REPLY.to_string()),
            ChatOutcome::Unavailable(err) => {
                ServiceResponse::failure(user_message(UNAVAILABLE_REPLY, &err, self.expose_errors))
            }
        }
    }

    /// Relevance gate first; only relevant questions reach answer generation.
    pub async fn answer_question(&self, question: &str, language: &str) -> ChatOutcome {
        log::info!("💬 Incoming question: '{}'", question);

        match self.is_relevant(question).await {
            Ok(true) => {}
            Ok(false) => {
                log::info!("🙅 Question judged off-topic, no answer generated");
                return ChatOutcome::OffTopic;
            }
            Err(err) => {
                log::error!("❌ Relevance check failed: {}", err);
                return ChatOutcome::Unavailable(err);
            }
        }

        match self.generate_answer(question, language).await {
            Ok(answer) => {
                let restaurants = match self.catalog.list_restaurants().await {
                    Ok(list) => list,
                    Err(err) => {
                        log::warn!("⚠️ Could not load restaurants for linking: {}", err);
                        Vec::new()
                    }
                };
                ChatOutcome::Answer(link_restaurant_names(&answer, &restaurants))
            }
            Err(err) => {
                log::error!("❌ Answer generation failed: {}", err);
                ChatOutcome::Unavailable(err)
            }
        }
    }

    /// Anything but a clean `y` counts as not relevant.
    pub async fn is_relevant(&self, question: &str) -> Result<bool, ModelError> {
        let messages = vec![
            ChatMessage::system(
                "You decide whether a question is about food, dining, cooking, \
                 restaurants or places to eat. Reply with exactly one letter: \
                 Y if it is, N if it is not.",
            ),
            ChatMessage::user(question),
        ];
        let reply = self.send_to_model(&messages, RELEVANCE_TOKEN_BUDGET).await?;
        Ok(reply.trim().to_lowercase() == "y")
    }

    async fn generate_answer(&self, question: &str, language: &str) -> Result<String, ModelError> {
        let messages = vec![
            ChatMessage::system(format!(
                "You are a friendly dining assistant for a restaurant discovery \
                 app. Only discuss food, dining and restaurants. Answer in \
                 {language}. Whenever you mention a restaurant by name, wrap \
                 the name in double quotes, like \"Golden Dragon\"."
            )),
            ChatMessage::user(question),
        ];
        self.send_to_model(&messages, ANSWER_TOKEN_BUDGET).await
    }

    /// Call-scoped bounded retry. Quota and credential failures are surfaced
    /// immediately; everything else gets up to MAX_MODEL_CALLS total calls.
    async fn send_to_model(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<String, ModelError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self
                .model
                .complete(messages, CallOptions::text(max_tokens))
                .await
            {
                Ok(reply) => return Ok(reply.into_text()),
                Err(err) if err.is_non_retryable() => {
                    log::warn!("🚫 Model call failed, not retrying: {}", err);
                    return Err(err);
                }
                Err(err) if attempt >= MAX_MODEL_CALLS => {
                    log::warn!("⚠️ Model call failed after {} attempts: {}", attempt, err);
                    return Err(err);
                }
                Err(err) => {
                    log::warn!("⚠️ Model call attempt {} failed, retrying: {}", attempt, err);
                }
            }
        }
    }
}

/// Two passes in fixed order: exact quoted-name matches first, then fuzzier
/// token matches over whatever quoted spans remain. The exact pass consumes
/// the quotes, so the partial pass can never corrupt its output.
pub fn link_restaurant_names(answer: &str, restaurants: &[RestaurantRef]) -> String {
    let mut text = answer.to_string();
    for restaurant in restaurants {
        let quoted = format!("\"{}\"", restaurant.name);
        if text.contains(&quoted) {
            text = text.replace(&quoted, &link(&restaurant.name, restaurant.id));
        }
    }
    link_partial_matches(&text, restaurants)
}

fn link(label: &str, id: i64) -> String {
    format!("[{}](/restaurants/{})", label, id)
}

/// First token of the restaurant name, if it is long enough to be meaningful.
fn leading_token(name: &str) -> Option<&str> {
    name.split(|c: char| c.is_whitespace() || c == ',' || c == '&')
        .find(|token| !token.is_empty())
        .filter(|token| token.chars().count() > 2)
}

fn link_partial_matches(text: &str, restaurants: &[RestaurantRef]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('"') {
        let Some(close_offset) = rest[open + 1..].find('"') else {
            break;
        };
        let close = open + 1 + close_offset;
        let inner = &rest[open + 1..close];
        let inner_lower = inner.to_lowercase();
        out.push_str(&rest[..open]);

        let matched = restaurants.iter().find(|restaurant| {
            leading_token(&restaurant.name)
                .is_some_and(|token| inner_lower.contains(&token.to_lowercase()))
        });
        match matched {
            Some(restaurant) => out.push_str(&link(inner, restaurant.id)),
            None => out.push_str(&rest[open..=close]),
        }
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::services::catalog::testing::MemoryCatalog;
    use crate::services::openrouter::testing::{Scripted, ScriptedGateway};

    fn assistant(gateway: Arc<ScriptedGateway>) -> ChatAssistant {
        ChatAssistant::new(gateway, Arc::new(MemoryCatalog::new()), false)
    }

    fn restaurants() -> Vec<RestaurantRef> {
        vec![
            RestaurantRef {
                id: 1,
                name: "Golden Dragon".to_string(),
            },
            RestaurantRef {
                id: 2,
                name: "Café Aroma & Co".to_string(),
            },
            RestaurantRef {
                id: 3,
                name: "Le Bistro".to_string(),
            },
        ]
    }

    #[tokio::test]
    async fn relevance_gate_accepts_only_a_clean_y() {
        for (reply, expected) in [
            ("Y", true),
            ("y\n", true),
            ("N", false),
            ("Maybe", false),
            ("Yes, definitely", false),
        ] {
            let gateway = Arc::new(ScriptedGateway::new(vec![Scripted::Content(reply)]));
            let relevant = assistant(gateway).is_relevant("Best restaurants in Auckland").await;
            assert_eq!(relevant.unwrap(), expected, "reply {:?}", reply);
        }
    }

    #[tokio::test]
    async fn off_topic_questions_get_the_fixed_reply_and_one_call() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Scripted::Content("N")]));
        let assistant = assistant(gateway.clone());

        let response = assistant.chat("How do I change a tire?", "English").await;
        assert!(response.success);
        assert_eq!(response.data.as_deref(), Some(OFF_TOPIC_REPLY));
        assert_eq!(gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn transient_failures_retry_up_to_three_calls_total() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Scripted::Transient,
            Scripted::Transient,
            Scripted::Transient,
        ]));
        let assistant = assistant(gateway.clone());

        let result = assistant.is_relevant("Any good ramen nearby?").await;
        assert!(result.is_err());
        assert_eq!(gateway.call_count(), 3);
    }

    #[tokio::test]
    async fn a_retry_can_recover_a_transient_failure() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Scripted::Transient,
            Scripted::Content("Y"),
        ]));
        let assistant = assistant(gateway.clone());

        assert!(assistant.is_relevant("Any good ramen nearby?").await.unwrap());
        assert_eq!(gateway.call_count(), 2);
    }

    #[tokio::test]
    async fn quota_exhaustion_short_circuits_after_one_call() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Scripted::Quota]));
        let assistant = assistant(gateway.clone());

        let result = assistant.is_relevant("Any good ramen nearby?").await;
        assert!(result.is_err());
        assert_eq!(gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn failures_return_a_generic_message_in_production_mode() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Scripted::Quota]));
        let assistant = ChatAssistant::new(gateway, Arc::new(MemoryCatalog::new()), false);

        let response = assistant.chat("Any good ramen nearby?", "English").await;
        assert!(!response.success);
        let error = response.error.unwrap();
        assert_eq!(error, UNAVAILABLE_REPLY);
    }

    #[tokio::test]
    async fn failures_carry_detail_outside_production_mode() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Scripted::Quota]));
        let assistant = ChatAssistant::new(gateway, Arc::new(MemoryCatalog::new()), true);

        let response = assistant.chat("Any good ramen nearby?", "English").await;
        let error = response.error.unwrap();
        assert!(error.contains("insufficient_quota"));
    }

    #[tokio::test]
    async fn relevant_questions_get_a_linked_answer() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Scripted::Content("Y"),
            Scripted::Content("Try \"Golden Dragon\" for dumplings."),
        ]));
        let catalog = Arc::new(MemoryCatalog::with_restaurants(restaurants()));
        let assistant = ChatAssistant::new(gateway.clone(), catalog, false);

        let response = assistant.chat("Where should I eat tonight?", "English").await;
        assert_eq!(
            response.data.as_deref(),
            Some("Try [Golden Dragon](/restaurants/1) for dumplings.")
        );
        assert_eq!(gateway.call_count(), 2);
    }

    #[test]
    fn exact_pass_links_quoted_names() {
        let linked = link_restaurant_names(
            "Both \"Golden Dragon\" and \"Le Bistro\" are great.",
            &restaurants(),
        );
        assert_eq!(
            linked,
            "Both [Golden Dragon](/restaurants/1) and [Le Bistro](/restaurants/3) are great."
        );
    }

    #[test]
    fn partial_pass_links_spans_containing_the_leading_token() {
        let linked = link_restaurant_names(
            "The \"golden dragon downtown branch\" is open late.",
            &restaurants(),
        );
        assert_eq!(
            linked,
            "The [golden dragon downtown branch](/restaurants/1) is open late."
        );
    }

    #[test]
    fn short_leading_tokens_never_partial_match() {
        // "Le Bistro" leads with a two-letter token, so the fuzzy pass skips it.
        let linked = link_restaurant_names("I loved \"Le Jardin\" last week.", &restaurants());
        assert_eq!(linked, "I loved \"Le Jardin\" last week.");
    }

    #[test]
    fn ampersand_names_split_on_the_separator() {
        // Leading token of "Café Aroma & Co" is "Café".
        let linked = link_restaurant_names("Grab a flat white at \"café aroma\".", &restaurants());
        assert_eq!(
            linked,
            "Grab a flat white at [café aroma](/restaurants/2)."
        );
    }

    #[test]
    fn exact_matches_are_not_corrupted_by_the_partial_pass() {
        let linked = link_restaurant_names(
            "\"Golden Dragon\" beats \"Golden Dragon Express\" for me.",
            &restaurants(),
        );
        assert_eq!(
            linked,
            "[Golden Dragon](/restaurants/1) beats [Golden Dragon Express](/restaurants/1) for me."
        );
    }

    #[test]
    fn unquoted_names_are_left_alone() {
        let linked = link_restaurant_names("Golden Dragon is fine too.", &restaurants());
        assert_eq!(linked, "Golden Dragon is fine too.");
    }
}
