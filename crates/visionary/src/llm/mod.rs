//! LLM collaborators: asset generation and visual element lookup.
//!
//! - **Client**: OpenAI-compatible chat completions with screenshot input
//! - **ChatAssetGenerator**: user story + screenshot to a validated assets document
//! - **VisionLocator**: finds a described element on a screenshot for the fix ladder

pub mod client;

pub use client::{
    ChatMessage, ChatRequest, ChatResponse, ContentPart, LlmClient, LlmClientError,
    MessageContent, ResponseFormat, Role,
};

use crate::config::LlmConfig;
use crate::driver::Screenshot;
use crate::generator::{
    build_assets_prompt, extract_json_object, parse_assets_reply, AssetGenerator,
    ASSETS_SYSTEM_PROMPT,
};
use crate::result::{VisionaryError, VisionaryResult};
use crate::schema::TestAssets;
use crate::suggest::{VisualLocator, VisualMatch};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Build a client from configuration, reading the API key from the environment
pub fn client_from_config(config: &LlmConfig) -> VisionaryResult<LlmClient> {
    let client = LlmClient::with_timeout(
        config.base_url()?,
        config.model()?,
        Duration::from_secs(config.timeout_secs),
    )?;
    debug!(provider = ?config.provider, endpoint = %client.endpoint(), "llm client");
    Ok(match config.api_key() {
        Some(key) => client.with_api_key(key),
        None => client,
    })
}

/// Sampling settings shared by the collaborators
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    /// Temperature
    pub temperature: f32,
    /// Completion budget
    pub max_tokens: u32,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 4096,
        }
    }
}

impl From<&LlmConfig> for Sampling {
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

fn json_request(sampling: Sampling, system: &str, user: String, shot: &Screenshot) -> ChatRequest {
    ChatRequest {
        model: String::new(),
        messages: vec![
            ChatMessage::system(system),
            ChatMessage::user_with_screenshot(user, shot),
        ],
        temperature: Some(sampling.temperature),
        max_tokens: Some(sampling.max_tokens),
        response_format: Some(ResponseFormat::json_object()),
    }
}

// =============================================================================
// ASSET GENERATION
// =============================================================================

/// Asks a vision model for the assets document
#[derive(Debug, Clone)]
pub struct ChatAssetGenerator {
    client: LlmClient,
    sampling: Sampling,
}

impl ChatAssetGenerator {
    /// Generator over `client`
    #[must_use]
    pub fn new(client: LlmClient) -> Self {
        Self {
            client,
            sampling: Sampling::default(),
        }
    }

    /// Override sampling
    #[must_use]
    pub const fn with_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = sampling;
        self
    }

    /// Request the generator sends
    pub fn request(&self, user_story: &str, screenshot: &Screenshot) -> ChatRequest {
        json_request(
            self.sampling,
            ASSETS_SYSTEM_PROMPT,
            build_assets_prompt(user_story),
            screenshot,
        )
    }
}

#[async_trait]
impl AssetGenerator for ChatAssetGenerator {
    #[instrument(skip(self, user_story, screenshot), fields(model = %self.client.model()))]
    async fn generate(
        &self,
        user_story: &str,
        screenshot: &Screenshot,
    ) -> VisionaryResult<TestAssets> {
        let reply = self.client.complete(&self.request(user_story, screenshot)).await?;
        let assets = parse_assets_reply(&reply)?;
        info!(
            page = %assets.page_object.class_name,
            elements = assets.elements().count(),
            steps = assets.test_steps.len(),
            "assets generated"
        );
        Ok(assets)
    }
}

// =============================================================================
// VISUAL LOOKUP
// =============================================================================

/// System instructions for visual element lookup
pub const VISUAL_SYSTEM_PROMPT: &str = "\
You locate UI elements on screenshots of web pages. Answer with one JSON \
object: {\"found\": bool, \"confidence\": number between 0 and 1, \
\"suggestedSelectors\": [CSS selectors, most specific first]}. Prefer \
data-testid attributes, then ids, then stable attributes. Report found=false \
when the element is not visible.";

/// Build the user message for a lookup
#[must_use]
pub fn build_visual_prompt(description: &str, page_url: &str) -> String {
    format!("Find the element \"{description}\" on this screenshot of {page_url}.")
}

/// Parse a lookup reply
pub fn parse_visual_reply(reply: &str) -> VisionaryResult<VisualMatch> {
    let json = extract_json_object(reply)
        .ok_or_else(|| VisionaryError::generator("visual reply contains no JSON object"))?;
    let mut found: VisualMatch = serde_json::from_str(json)?;
    found.confidence = found.confidence.clamp(0.0, 1.0);
    found.suggested_selectors.retain(|s| !s.trim().is_empty());
    Ok(found)
}

/// Vision model behind [`VisualLocator`]
#[derive(Debug, Clone)]
pub struct VisionLocator {
    client: LlmClient,
    sampling: Sampling,
}

impl VisionLocator {
    /// Locator over `client`
    #[must_use]
    pub fn new(client: LlmClient) -> Self {
        Self {
            client,
            sampling: Sampling {
                temperature: 0.0,
                max_tokens: 512,
            },
        }
    }
}

#[async_trait]
impl VisualLocator for VisionLocator {
    #[instrument(skip(self, screenshot))]
    async fn locate(
        &self,
        page_url: &str,
        screenshot: &Screenshot,
        description: &str,
    ) -> VisionaryResult<VisualMatch> {
        let request = json_request(
            self.sampling,
            VISUAL_SYSTEM_PROMPT,
            build_visual_prompt(description, page_url),
            screenshot,
        );
        let reply = self.client.complete(&request).await?;
        parse_visual_reply(&reply)
    }
}
