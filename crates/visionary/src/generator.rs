//! Asset generation: user story + screenshot in, typed assets document out.
//!
//! The generator itself is a collaborator behind [`AssetGenerator`]. The LLM
//! backed implementation lives in `crate::llm` (feature `llm`); a file based
//! one replays a stored document. Both go through [`parse_assets_reply`] so a
//! malformed answer is rejected before anything consumes it.

use crate::driver::Screenshot;
use crate::result::{VisionaryError, VisionaryResult};
use crate::schema::TestAssets;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Produces a test-assets document for a page
#[async_trait]
pub trait AssetGenerator: Send + Sync {
    /// Generate assets for `user_story` against the page in `screenshot`
    async fn generate(&self, user_story: &str, screenshot: &Screenshot)
        -> VisionaryResult<TestAssets>;
}

/// System instructions for a model asked to produce an assets document
pub const ASSETS_SYSTEM_PROMPT: &str = "\
You are a QA engineer who writes end-to-end tests for web pages. \
You look at a screenshot of the page and a user story, and you answer with a \
single JSON object and nothing else.

The object has this shape:
{
  \"pageObject\": {
    \"className\": \"LoginPage\",
    \"locators\": [
      {
        \"name\": \"emailInput\",
        \"elementType\": \"input\",
        \"actions\": [\"fill\"],
        \"selectors\": [
          { \"type\": \"getByLabel\", \"value\": \"Email\" },
          { \"type\": \"getByPlaceholder\", \"value\": \"you@example.com\" },
          { \"type\": \"locator\", \"value\": \"input[name=email]\" }
        ]
      },
      {
        \"name\": \"errorMessage\",
        \"elementType\": \"alert\",
        \"actions\": [],
        \"selectors\": [
          { \"type\": \"getByText\", \"value\": \"No match\" },
          { \"type\": \"locator\", \"value\": \".alert-danger\" }
        ],
        \"waitBefore\": \"visible\"
      }
    ]
  },
  \"additionalPageObjects\": [],
  \"testSteps\": [
    {
      \"action\": \"fillEmailInput\",
      \"params\": [\"user@example.com\"],
      \"element\": \"emailInput\",
      \"waitFor\": { \"element\": \"emailInput\", \"state\": \"visible\" }
    },
    {
      \"action\": \"getErrorMessageText\",
      \"params\": [],
      \"element\": \"errorMessage\",
      \"waitFor\": { \"element\": \"errorMessage\", \"state\": \"visible\" },
      \"assert\": { \"type\": \"text\", \"expected\": \"Warning: No match\" }
    },
    {
      \"action\": \"getErrorMessageText\",
      \"params\": [[\"Warning: No match\", \"Warning: Too many attempts\"]],
      \"element\": \"errorMessage\",
      \"assert\": { \"type\": \"oneOf\", \"expectedOptions\": [\"Warning: No match\", \"Warning: Too many attempts\"] }
    }
  ]
}

Rules:
- selector types are getByRole, getByLabel, getByPlaceholder, getByText or locator;
- getByRole selectors may carry an \"options\" object holding the accessible \"name\";
- give every element at least two selectors, the most stable one first;
- elementType is one of input, button, text, alert, select, checkbox, link;
- every test step names the element it acts on in \"element\" when it has one;
- \"waitFor\" names an element and the state to reach first: visible, hidden, attached or enabled;
- \"assert\" has a \"type\" of text, visible or oneOf, with the value in \"expected\";
- a oneOf assertion lists the accepted values in \"expectedOptions\" and passes them as one nested array param;
- add additionalPageObjects only for pages the story navigates to.";

/// User message for a story
#[must_use]
pub fn build_assets_prompt(user_story: &str) -> String {
    format!(
        "User story:\n{}\n\nDescribe the page objects and the test steps that verify this story.",
        user_story.trim()
    )
}

/// Slice from the first `{` to the last `}`, tolerating prose around the object
#[must_use]
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Turn a raw generator reply into validated assets
pub fn parse_assets_reply(reply: &str) -> VisionaryResult<TestAssets> {
    let json = extract_json_object(reply)
        .ok_or_else(|| VisionaryError::generator("reply contains no JSON object"))?;
    TestAssets::from_json(json)
}

/// Replays an assets document from disk
#[derive(Debug, Clone)]
pub struct FileAssetGenerator {
    path: PathBuf,
}

impl FileAssetGenerator {
    /// Generator that always answers with the document at `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Source document
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AssetGenerator for FileAssetGenerator {
    #[instrument(skip(self, _screenshot), fields(path = %self.path.display()))]
    async fn generate(
        &self,
        _user_story: &str,
        _screenshot: &Screenshot,
    ) -> VisionaryResult<TestAssets> {
        let reply = tokio::fs::read_to_string(&self.path).await?;
        debug!(bytes = reply.len(), "replaying stored assets");
        parse_assets_reply(&reply)
    }
}
