//! OpenAI-compatible chat client with image input.
//!
//! Works against any server exposing `{base_url}/chat/completions` that
//! accepts `image_url` content parts (OpenAI, the Gemini and Anthropic
//! compatibility endpoints, vLLM, llama.cpp with a vision model, ...).

use crate::driver::Screenshot;
use crate::result::VisionaryError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

/// Chat message role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt
    System,
    /// User message
    User,
    /// Assistant response
    Assistant,
}

/// Image reference inside a content part.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageUrl {
    /// `https://` or `data:` URL
    pub url: String,
}

/// One part of a multimodal message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text
    Text {
        /// The text
        text: String,
    },
    /// Image
    ImageUrl {
        /// Where the image lives
        image_url: ImageUrl,
    },
}

impl ContentPart {
    /// Text part
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Screenshot inlined as a PNG data URL
    pub fn screenshot(screenshot: &Screenshot) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:image/png;base64,{}", screenshot.to_base64()),
            },
        }
    }
}

/// Message content: a string, or parts when images are attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text
    Text(String),
    /// Text and image parts
    Parts(Vec<ContentPart>),
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message author.
    pub role: Role,
    /// The content of the message.
    pub content: MessageContent,
}

impl ChatMessage {
    /// System message
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    /// User message with a screenshot after the text
    pub fn user_with_screenshot(text: impl Into<String>, screenshot: &Screenshot) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::text(text),
                ContentPart::screenshot(screenshot),
            ]),
        }
    }
}

/// Requested output format.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResponseFormat {
    /// `json_object` asks for a single JSON object
    #[serde(rename = "type")]
    pub kind: String,
}

impl ResponseFormat {
    /// JSON mode
    pub fn json_object() -> Self {
        Self {
            kind: "json_object".to_string(),
        }
    }
}

/// Parameters for a chat completion request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model identifier (may be ignored by some backends).
    pub model: String,
    /// The messages for the chat completion.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature (0.0 = deterministic).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Output format constraint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

/// Token usage statistics.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens generated.
    pub completion_tokens: u32,
    /// Total tokens (prompt + completion).
    pub total_tokens: u32,
}

/// Message as returned by the server; content may be null.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplyMessage {
    /// Usually `assistant`
    pub role: Role,
    /// Generated text
    #[serde(default)]
    pub content: Option<String>,
}

/// A single completion choice.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatResponseChoice {
    /// Index of this choice.
    #[serde(default)]
    pub index: u32,
    /// The generated message.
    pub message: ReplyMessage,
    /// Why generation stopped.
    pub finish_reason: Option<String>,
}

/// Response from a chat completion endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatResponse {
    /// Model used.
    #[serde(default)]
    pub model: String,
    /// Generated choices.
    pub choices: Vec<ChatResponseChoice>,
    /// Token usage statistics.
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// Text of the first choice
    pub fn first_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .filter(|t| !t.trim().is_empty())
    }
}

/// Errors from the LLM client.
#[derive(Debug, thiserror::Error)]
pub enum LlmClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Server returned an error status.
    #[error("API error {status}: {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// The reply had no usable text.
    #[error("empty reply from {model}")]
    EmptyReply {
        /// Model that answered
        model: String,
    },
}

impl From<LlmClientError> for VisionaryError {
    fn from(e: LlmClientError) -> Self {
        Self::generator(e.to_string())
    }
}

/// OpenAI-compatible HTTP client.
#[derive(Debug, Clone)]
pub struct LlmClient {
    base_url: String,
    client: reqwest::Client,
    model: String,
    api_key: Option<String>,
}

impl LlmClient {
    /// Create a new client pointing at the given base URL.
    ///
    /// # Arguments
    /// * `base_url` - API root including the version (e.g. `https://api.openai.com/v1`)
    /// * `model` - Model name to include in requests
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self::with_client(base_url, model, client)
    }

    /// Create a client with a custom reqwest client (for custom timeouts, etc.).
    pub fn with_client(
        base_url: impl Into<String>,
        model: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            model: model.into(),
            api_key: None,
        }
    }

    /// Client with a request timeout
    pub fn with_timeout(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, model, client))
    }

    /// Send `Authorization: Bearer <key>`
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Completions endpoint
    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Send a request and return the first choice's text.
    pub async fn complete(&self, request: &ChatRequest) -> Result<String, LlmClientError> {
        let response = self.send(request).await?;
        response
            .first_text()
            .map(str::to_string)
            .ok_or_else(|| LlmClientError::EmptyReply {
                model: self.model.clone(),
            })
    }

    /// Send a raw `ChatRequest`; an empty model falls back to the client's.
    pub async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, LlmClientError> {
        let start = Instant::now();

        let actual_request;
        let req = if request.model.is_empty() {
            actual_request = ChatRequest {
                model: self.model.clone(),
                ..request.clone()
            };
            &actual_request
        } else {
            request
        };

        let mut builder = self.client.post(self.endpoint()).json(req);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmClientError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let response: ChatResponse = resp.json().await?;
        debug!(
            model = %req.model,
            ms = start.elapsed().as_millis() as u64,
            tokens = response.usage.as_ref().map_or(0, |u| u.total_tokens),
            "chat completion"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_strips_trailing_slash() {
        let client = LlmClient::new("https://api.example.com/v1/", "vision");
        assert_eq!(client.base_url(), "https://api.example.com/v1");
        assert_eq!(client.endpoint(), "https://api.example.com/v1/chat/completions");
        assert_eq!(client.model(), "vision");
    }

    #[test]
    fn test_multimodal_message_serialization() {
        let shot = Screenshot::new(vec![0x89, 0x50], 1, 1);
        let msg = ChatMessage::user_with_screenshot("look", &shot);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][0]["text"], "look");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(
            json["content"][1]["image_url"]["url"],
            "data:image/png;base64,iVA="
        );
    }

    #[test]
    fn test_system_message_is_plain_string() {
        let json = serde_json::to_value(ChatMessage::system("be terse")).unwrap();
        assert_eq!(json["content"], "be terse");
    }

    #[test]
    fn test_request_omits_none_fields() {
        let req = ChatRequest {
            model: "m".to_string(),
            messages: vec![],
            temperature: None,
            max_tokens: None,
            response_format: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("temperature"));
        assert!(!json.contains("max_tokens"));
        assert!(!json.contains("response_format"));
    }

    #[test]
    fn test_json_mode_serialization() {
        let req = ChatRequest {
            model: "m".to_string(),
            messages: vec![],
            temperature: Some(0.1),
            max_tokens: Some(4096),
            response_format: Some(ResponseFormat::json_object()),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["max_tokens"], 4096);
    }

    #[test]
    fn test_response_first_text() {
        let json = r#"{
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "{\"found\": true}"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.first_text(), Some("{\"found\": true}"));
    }

    #[test]
    fn test_null_content_is_no_text() {
        let json = r#"{"choices":[{"message":{"role":"assistant","content":null},"finish_reason":"length"}]}"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        assert!(resp.first_text().is_none());
    }

    #[test]
    fn test_error_maps_to_generator_error() {
        let err: VisionaryError = LlmClientError::EmptyReply {
            model: "m".to_string(),
        }
        .into();
        assert!(matches!(err, VisionaryError::Generator { .. }));
    }
}
