use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const ERROR_BODY_LIMIT: usize = 300;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ContentPart {
    Text {
        #[serde(rename = "type")]
        content_type: String,
        text: String,
    },
    ImageUrl {
        #[serde(rename = "type")]
        content_type: String,
        image_url: ImageData,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageData {
    pub url: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user_with_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    content_type: "text".to_string(),
                    text: text.into(),
                },
                ContentPart::ImageUrl {
                    content_type: "image_url".to_string(),
                    image_url: ImageData { url: image_url.into() },
                },
            ]),
        }
    }

    /// Plain text of the message, if it carries any.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(text) => Some(text),
            MessageContent::Parts(parts) => parts.iter().find_map(|part| match part {
                ContentPart::Text { text, .. } => Some(text.as_str()),
                ContentPart::ImageUrl { .. } => None,
            }),
        }
    }
}

/// Declared function the model may be forced to call.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolSpec {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionSpec {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// Per-call knobs. One invocation equals one outbound request.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub tool: Option<ToolSpec>,
    pub json_mode: bool,
}

impl CallOptions {
    pub fn text(max_tokens: u32) -> Self {
        Self {
            max_tokens,
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_tool(mut self, tool: ToolSpec) -> Self {
        self.tool = Some(tool);
        self
    }

    pub fn with_json_mode(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// What the model answered with: free text or function-call arguments.
#[derive(Debug, Clone)]
pub enum ModelReply {
    Content(String),
    /// Serialized arguments of the invoked function, raw JSON text.
    ToolArguments(String),
}

impl ModelReply {
    pub fn into_text(self) -> String {
        match self {
            ModelReply::Content(text) => text,
            ModelReply::ToolArguments(args) => args,
        }
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model service unreachable: {0}")]
    Transport(String),
    #[error("model service error ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("model reply could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("model reply carried no usable content")]
    EmptyReply,
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        ModelError::Transport(err.to_string())
    }
}

impl ModelError {
    /// Quota exhaustion and credential failures do not improve on retry.
    pub fn is_non_retryable(&self) -> bool {
        match self {
            ModelError::Api { status, code, .. } => {
                matches!(status, 401 | 402 | 403)
                    || code.contains("insufficient_quota")
                    || code.contains("invalid_api_key")
                    || code.contains("authentication")
            }
            _ => false,
        }
    }

    fn from_error_body(status: u16, body: &str) -> Self {
        let (code, message) = match serde_json::from_str::<ApiErrorBody>(body) {
            Ok(parsed) => {
                let code = parsed
                    .error
                    .code
                    .map(|code| match code {
                        serde_json::Value::String(text) => text,
                        other => other.to_string(),
                    })
                    .or(parsed.error.kind)
                    .unwrap_or_else(|| status.to_string());
                (code, parsed.error.message)
            }
            Err(_) => {
                let message: String = body.trim().chars().take(ERROR_BODY_LIMIT).collect();
                (status.to_string(), message)
            }
        };
        ModelError::Api {
            status,
            code,
            message,
        }
    }
}

/// One round trip to the vision-and-language model service. No retry, no
/// validation; classification of failures is the caller's job.
#[async_trait::async_trait]
pub trait ModelGateway: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: CallOptions,
    ) -> Result<ModelReply, ModelError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

pub struct OpenRouterClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenRouterClient {
    pub fn new(api_key: String, model: String) -> Result<Self, ModelError> {
        Self::with_timeout(api_key, model, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key,
            model,
            client,
        })
    }
}

#[async_trait::async_trait]
impl ModelGateway for OpenRouterClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: CallOptions,
    ) -> Result<ModelReply, ModelError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            tool_choice: options.tool.as_ref().map(|tool| {
                json!({"type": "function", "function": {"name": tool.function.name}})
            }),
            tools: options.tool.map(|tool| vec![tool]),
            response_format: options.json_mode.then(|| json!({"type": "json_object"})),
        };

        log::debug!("🤖 Sending request to OpenRouter with model: {}", self.model);

        let response = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", "https://github.com/restaurant-menu-ai")
            .header("X-Title", "Restaurant Menu AI")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        log::debug!("📥 OpenRouter response status: {}", status);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("❌ OpenRouter API error ({}): {}", status, body);
            return Err(ModelError::from_error_body(status.as_u16(), &body));
        }

        let body = response.text().await?;
        let completion: ChatCompletion = serde_json::from_str(&body)?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or(ModelError::EmptyReply)?;

        if let Some(call) = choice.message.tool_calls.into_iter().flatten().next() {
            return Ok(ModelReply::ToolArguments(call.function.arguments));
        }

        match choice.message.content {
            Some(text) if !text.trim().is_empty() => Ok(ModelReply::Content(text)),
            _ => Err(ModelError::EmptyReply),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_errors_are_non_retryable() {
        let err = ModelError::Api {
            status: 429,
            code: "insufficient_quota".to_string(),
            message: "out of credits".to_string(),
        };
        assert!(err.is_non_retryable());
    }

    #[test]
    fn auth_failures_are_non_retryable() {
        for status in [401, 402, 403] {
            let err = ModelError::Api {
                status,
                code: status.to_string(),
                message: "denied".to_string(),
            };
            assert!(err.is_non_retryable(), "status {} should not retry", status);
        }
        let err = ModelError::Api {
            status: 400,
            code: "invalid_api_key".to_string(),
            message: "bad key".to_string(),
        };
        assert!(err.is_non_retryable());
    }

    #[test]
    fn transient_errors_are_retryable() {
        let err = ModelError::Api {
            status: 500,
            code: "server_error".to_string(),
            message: "hiccup".to_string(),
        };
        assert!(!err.is_non_retryable());
        assert!(!ModelError::Transport("timeout".to_string()).is_non_retryable());
    }

    #[test]
    fn error_body_code_is_preserved_verbatim() {
        let body = r#"{"error": {"message": "no credits", "code": "insufficient_quota"}}"#;
        match ModelError::from_error_body(402, body) {
            ModelError::Api { status, code, message } => {
                assert_eq!(status, 402);
                assert_eq!(code, "insufficient_quota");
                assert_eq!(message, "no credits");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn numeric_error_codes_are_stringified() {
        let body = r#"{"error": {"message": "rate limited", "code": 429}}"#;
        match ModelError::from_error_body(429, body) {
            ModelError::Api { code, .. } => assert_eq!(code, "429"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn unparsable_error_body_falls_back_to_status() {
        match ModelError::from_error_body(502, "<html>bad gateway</html>") {
            ModelError::Api { code, .. } => assert_eq!(code, "502"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
