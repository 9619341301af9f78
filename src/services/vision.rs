use std::fs;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine};
use serde_json::json;
use thiserror::Error;

use crate::models::MenuAnalysisResult;
use crate::services::openrouter::{
    CallOptions, ChatMessage, ModelError, ModelGateway, ModelReply, ToolSpec,
};

const MENU_TOOL_NAME: &str = "record_menu_analysis";
const ANALYSIS_TOKEN_BUDGET: u32 = 3000;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Model(#[from] ModelError),
    /// The vision reply was missing or unparsable. Not retried: re-issuing a
    /// vision call blindly is too costly.
    #[error("menu analysis reply was not usable: {0}")]
    Format(String),
    #[error("could not read menu image: {0}")]
    Image(#[from] std::io::Error),
}

/// Where the menu photo lives: an object-storage URL, or a local file that
/// gets inlined as a base64 data URL.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Url(String),
    LocalFile(String),
}

impl ImageSource {
    fn resolve(&self) -> Result<String, AnalysisError> {
        match self {
            ImageSource::Url(url) => Ok(url.clone()),
            ImageSource::LocalFile(path) => {
                let bytes = fs::read(path)?;
                log::debug!("📊 Image file size: {} bytes", bytes.len());

                let mime_type = if path.ends_with(".png") {
                    "image/png"
                } else if path.ends_with(".webp") {
                    "image/webp"
                } else {
                    "image/jpeg"
                };

                let encoded = general_purpose::STANDARD.encode(&bytes);
                Ok(format!("data:{};base64,{}", mime_type, encoded))
            }
        }
    }
}

pub struct MenuVisionAnalyzer {
    model: Arc<dyn ModelGateway>,
}

impl MenuVisionAnalyzer {
    pub fn new(model: Arc<dyn ModelGateway>) -> Self {
        Self { model }
    }

    /// One vision call, then strict parsing into a typed analysis. Accepts
    /// the forced function-call arguments or a plain JSON message body.
    pub async fn analyze(
        &self,
        image: &ImageSource,
        language: &str,
    ) -> Result<MenuAnalysisResult, AnalysisError> {
        let image_url = image.resolve()?;

        let messages = vec![
            ChatMessage::system(system_prompt(language)),
            ChatMessage::user_with_image(
                "Read this menu photo and record every category and dish on it.",
                image_url,
            ),
        ];
        let options = CallOptions::text(ANALYSIS_TOKEN_BUDGET)
            .with_temperature(0.1)
            .with_tool(menu_tool());

        let reply = self.model.complete(&messages, options).await?;
        let payload = match reply {
            ModelReply::ToolArguments(args) => args,
            ModelReply::Content(text) => text,
        };

        let analysis = parse_analysis(&payload)?;
        log::info!(
            "✅ Menu analysis parsed: {} categories, {} dishes",
            analysis.categories.len(),
            analysis
                .categories
                .iter()
                .map(|category| category.items.len())
                .sum::<usize>()
        );
        Ok(analysis)
    }
}

fn system_prompt(language: &str) -> String {
    format!(
        "You are a restaurant menu analyst. Extract every category and every \
         dish you can read from the photographed menu. Write all extracted \
         content (names, descriptions, attributes, allergens) in {language}, \
         but keep the JSON field names exactly as the schema defines them. \
         Copy each price exactly as printed, including the currency symbol; \
         never convert or reformat a price. Use lowercase tokens such as \
         vegetarian, vegan, gluten-free and spicy in the attributes list.",
    )
}

fn menu_tool() -> ToolSpec {
    ToolSpec::function(
        MENU_TOOL_NAME,
        "Record the structured analysis of a photographed restaurant menu.",
        menu_schema(),
    )
}

fn menu_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "restaurant_name": {"type": "string"},
            "menu_type": {"type": "string"},
            "categories": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "items": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "name": {"type": "string"},
                                    "description": {"type": "string"},
                                    "price": {
                                        "type": "string",
                                        "description": "Exactly as printed, currency symbol included"
                                    },
                                    "attributes": {"type": "array", "items": {"type": "string"}},
                                    "allergens": {"type": "array", "items": {"type": "string"}},
                                    "flavor_profile": {"type": "string"},
                                    "texture": {"type": "string"}
                                },
                                "required": ["name", "description", "price"]
                            }
                        }
                    },
                    "required": ["name", "items"]
                }
            }
        },
        "required": ["categories"]
    })
}

/// Models in JSON mode like to wrap the payload in a fenced code block.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(without_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let without_tag = without_open
        .strip_prefix("json")
        .unwrap_or(without_open)
        .trim_start();
    without_tag.strip_suffix("```").unwrap_or(without_tag).trim()
}

fn parse_analysis(payload: &str) -> Result<MenuAnalysisResult, AnalysisError> {
    let body = strip_code_fence(payload);
    let analysis: MenuAnalysisResult =
        serde_json::from_str(body).map_err(|err| AnalysisError::Format(err.to_string()))?;
    if analysis.categories.is_empty() {
        return Err(AnalysisError::Format(
            "no categories detected in the menu image".to_string(),
        ));
    }
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::services::openrouter::testing::{Scripted, ScriptedGateway};

    const TOOL_PAYLOAD: &str = r#"{
        "restaurant_name": "Golden Dragon",
        "menu_type": "dinner",
        "categories": [
            {
                "name": "Appetizers",
                "items": [
                    {
                        "name": "Spring Rolls",
                        "description": "Crispy vegetable rolls",
                        "price": "$12.99",
                        "attributes": ["vegetarian"],
                        "allergens": ["gluten"]
                    },
                    {
                        "name": "Beef Noodle Soup",
                        "description": "Braised beef with noodles",
                        "price": "NT$150",
                        "attributes": ["spicy"],
                        "allergens": []
                    }
                ]
            }
        ]
    }"#;

    #[tokio::test]
    async fn prices_are_preserved_verbatim() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Scripted::Tool(TOOL_PAYLOAD)]));
        let analyzer = MenuVisionAnalyzer::new(gateway.clone());

        let analysis = analyzer
            .analyze(&ImageSource::Url("https://cdn.example/menu.jpg".into()), "繁體中文")
            .await
            .unwrap();

        let items = &analysis.categories[0].items;
        assert_eq!(items[0].price, "$12.99");
        assert_eq!(items[1].price, "NT$150");
        assert_eq!(gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn plain_json_body_with_code_fence_is_accepted() {
        let fenced = "```json\n{\"categories\": [{\"name\": \"Mains\", \"items\": \
                      [{\"name\": \"Pad Thai\", \"description\": \"Stir-fried noodles\", \
                      \"price\": \"฿120\"}]}]}\n```";
        let gateway = Arc::new(ScriptedGateway::new(vec![Scripted::Content(fenced)]));
        let analyzer = MenuVisionAnalyzer::new(gateway);

        let analysis = analyzer
            .analyze(&ImageSource::Url("https://cdn.example/menu.jpg".into()), "English")
            .await
            .unwrap();

        assert_eq!(analysis.categories[0].name, "Mains");
        assert_eq!(analysis.categories[0].items[0].price, "฿120");
    }

    #[tokio::test]
    async fn unparsable_reply_is_a_format_error() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Scripted::Content(
            "I could not read the menu, sorry!",
        )]));
        let analyzer = MenuVisionAnalyzer::new(gateway.clone());

        let err = analyzer
            .analyze(&ImageSource::Url("https://cdn.example/menu.jpg".into()), "English")
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::Format(_)));
        // Format failures are never retried at this layer.
        assert_eq!(gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn missing_required_item_fields_fail_parsing() {
        let payload = r#"{"categories": [{"name": "Mains", "items": [{"name": "Mystery"}]}]}"#;
        let gateway = Arc::new(ScriptedGateway::new(vec![Scripted::Tool(payload)]));
        let analyzer = MenuVisionAnalyzer::new(gateway);

        let err = analyzer
            .analyze(&ImageSource::Url("https://cdn.example/menu.jpg".into()), "English")
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Format(_)));
    }

    #[tokio::test]
    async fn empty_category_list_is_a_format_error() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Scripted::Tool(
            r#"{"categories": []}"#,
        )]));
        let analyzer = MenuVisionAnalyzer::new(gateway);

        let err = analyzer
            .analyze(&ImageSource::Url("https://cdn.example/menu.jpg".into()), "English")
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Format(_)));
    }

    #[test]
    fn code_fence_stripping_keeps_plain_json_untouched() {
        assert_eq!(strip_code_fence("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }
}
