//! Fix suggestions for a classified failure.
//!
//! The engine walks a short escalation ladder and stops at the first rung
//! that yields something:
//!
//! 1. a known alternative selector (reorder the element's candidates),
//! 2. a selector discovered visually on a fresh screenshot,
//! 3. wait fixes for timing failures, then a blind retry.
//!
//! The result is never empty and the retry fix, when present, is always last.

use crate::classifier::{FailureAnalysis, FailureType};
use crate::driver::Screenshot;
use crate::result::VisionaryResult;
use crate::schema::{describe_element, TestAssets};
use crate::selector::SelectorDescriptor;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Confidence of rotating to a known alternative selector
pub const REORDER_CONFIDENCE: f64 = 0.95;
/// Confidence of a visually discovered selector
pub const VISUAL_CONFIDENCE: f64 = 0.9;
/// Minimum visual-match confidence for a selector to be proposed
pub const VISUAL_MATCH_THRESHOLD: f64 = 0.8;
/// Confidence of scrolling an off-viewport element into view
pub const SCROLL_CONFIDENCE: f64 = 0.95;
/// Confidence of extending the wait
pub const EXTEND_TIMEOUT_CONFIDENCE: f64 = 0.8;
/// Confidence of a blind retry
pub const RETRY_CONFIDENCE: f64 = 0.3;

// =============================================================================
// FIXES
// =============================================================================

/// What a fix touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixKind {
    /// Candidate selectors
    Selector,
    /// Waiting behaviour
    Wait,
    /// Assertions
    Assertion,
    /// Nothing, just run again
    Retry,
}

/// Machine-applicable part of a fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum FixDirective {
    /// Rotate the failing selector to the back of the element's list
    #[serde(rename_all = "camelCase")]
    Reorder {
        /// Element name
        element: String,
        /// Key of the failing selector; the first candidate when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failing_selector: Option<String>,
    },
    /// Put a new selector at the front of the element's list
    InjectSelector {
        /// Element name
        element: String,
        /// Selector to inject
        selector: SelectorDescriptor,
    },
    /// Scroll the element into view before acting
    ScrollIntoView {
        /// Element name, when known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        element: Option<String>,
    },
    /// Wait longer before acting
    ExtendTimeout {
        /// Element name, when known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        element: Option<String>,
    },
}

/// One proposed remediation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedFix {
    /// Fix kind
    #[serde(rename = "type")]
    pub kind: FixKind,
    /// Human-readable description
    pub description: String,
    /// Structured change, when the fix can be applied automatically
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directive: Option<FixDirective>,
    /// Confidence in [0, 1]
    pub confidence: f64,
}

impl SuggestedFix {
    /// Generic retry fallback
    #[must_use]
    pub fn retry() -> Self {
        Self {
            kind: FixKind::Retry,
            description: "Retry the test to rule out an intermittent failure".to_string(),
            directive: None,
            confidence: RETRY_CONFIDENCE,
        }
    }

    /// Whether the fix changes selector data
    #[must_use]
    pub fn is_selector_fix(&self) -> bool {
        self.kind == FixKind::Selector && self.directive.is_some()
    }
}

// =============================================================================
// ELEMENT IDENTITY
// =============================================================================

fn verb_prefix() -> Option<&'static Regex> {
    static VERB: OnceLock<Option<Regex>> = OnceLock::new();
    VERB.get_or_init(|| {
        Regex::new(r"(?i)^(?:click|fill|waitFor|assert|check|select|clear|get|is)(\w+)").ok()
    })
    .as_ref()
}

/// Recover an element name from a page-object method name.
///
/// `clickLoginButton` becomes `loginButton`. Only used when a step carries
/// no explicit element; names that themselves start with a verb word
/// (`selectAllCheckbox`) come out wrong.
#[must_use]
pub fn strip_action_verb(step: &str) -> Option<String> {
    let rest = verb_prefix()?.captures(step)?.get(1)?.as_str();
    let mut chars = rest.chars();
    let first = chars.next()?;
    Some(first.to_lowercase().chain(chars).collect())
}

/// Element a step acts on: explicit index first, then the verb-strip shim
#[must_use]
pub fn element_for_step(step_elements: &HashMap<String, String>, step: &str) -> Option<String> {
    step_elements
        .get(step)
        .cloned()
        .or_else(|| strip_action_verb(step))
}

// =============================================================================
// VISUAL LOOKUP
// =============================================================================

/// Answer of a visual element lookup
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualMatch {
    /// Whether the element was seen
    pub found: bool,
    /// Confidence in [0, 1]
    #[serde(default)]
    pub confidence: f64,
    /// Selectors the locator proposes, best first
    #[serde(default)]
    pub suggested_selectors: Vec<String>,
}

/// Vision-capable element lookup on a screenshot
#[async_trait]
pub trait VisualLocator: Send + Sync {
    /// Look for the described element on a screenshot of `page_url`
    async fn locate(
        &self,
        page_url: &str,
        screenshot: &Screenshot,
        description: &str,
    ) -> VisionaryResult<VisualMatch>;
}

/// Caches another locator's answers per page URL and description
#[derive(Debug)]
pub struct CachedVisualLocator<L> {
    inner: L,
    cache: Mutex<HashMap<String, VisualMatch>>,
}

impl<L: VisualLocator> CachedVisualLocator<L> {
    /// Wrap a locator
    #[must_use]
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Cached entries
    pub async fn cached_entries(&self) -> usize {
        self.cache.lock().await.len()
    }
}

#[async_trait]
impl<L: VisualLocator> VisualLocator for CachedVisualLocator<L> {
    async fn locate(
        &self,
        page_url: &str,
        screenshot: &Screenshot,
        description: &str,
    ) -> VisionaryResult<VisualMatch> {
        let key = format!("{page_url}-{description}");
        if let Some(hit) = self.cache.lock().await.get(&key) {
            debug!(%key, "visual cache hit");
            return Ok(hit.clone());
        }
        let found = self.inner.locate(page_url, screenshot, description).await?;
        if found.found {
            let _ = self.cache.lock().await.insert(key, found.clone());
        }
        Ok(found)
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Everything the ladder looks at
#[derive(Debug, Clone, Default)]
pub struct FailureContext {
    /// Classified failure type
    pub failure_type: FailureType,
    /// Error message
    pub error_message: String,
    /// Failed page-object method
    pub failed_step: String,
    /// Element already attributed by the classifier
    pub failed_element: Option<String>,
    /// Error mentioned the viewport
    pub viewport_issue: bool,
    /// Element name to its current candidates
    pub known_elements: HashMap<String, Vec<SelectorDescriptor>>,
    /// Step method name to explicit element name
    pub step_elements: HashMap<String, String>,
    /// Page under test
    pub page_url: String,
    /// Fresh screenshot for the visual rung
    pub screenshot: Option<Screenshot>,
}

impl FailureContext {
    /// Build a context from an analysis and the assets that were run
    #[must_use]
    pub fn from_analysis(analysis: &FailureAnalysis, assets: &TestAssets, page_url: &str) -> Self {
        Self {
            failure_type: analysis.failure_type,
            error_message: analysis.error_message.clone(),
            failed_step: analysis.failed_step.clone(),
            failed_element: analysis.failed_element.clone(),
            viewport_issue: analysis.viewport_issue,
            known_elements: assets
                .elements()
                .map(|e| (e.name.clone(), e.selectors.clone()))
                .collect(),
            step_elements: assets
                .test_steps
                .iter()
                .filter_map(|s| Some((s.action.clone(), s.target_element()?.to_string())))
                .collect(),
            page_url: page_url.to_string(),
            screenshot: None,
        }
    }

    /// Attach a screenshot for visual lookup
    #[must_use]
    pub fn with_screenshot(mut self, screenshot: Screenshot) -> Self {
        self.screenshot = Some(screenshot);
        self
    }

    /// Element the failure is about, if it can be named
    #[must_use]
    pub fn element_name(&self) -> Option<String> {
        self.failed_element
            .clone()
            .or_else(|| element_for_step(&self.step_elements, &self.failed_step))
    }
}

/// Produces ranked fixes for failures
#[derive(Default)]
pub struct FixSuggestionEngine {
    visual: Option<Box<dyn VisualLocator>>,
}

impl std::fmt::Debug for FixSuggestionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixSuggestionEngine")
            .field("visual", &self.visual.is_some())
            .finish()
    }
}

impl FixSuggestionEngine {
    /// Engine without visual lookup
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable the visual rung
    #[must_use]
    pub fn with_visual(mut self, locator: Box<dyn VisualLocator>) -> Self {
        self.visual = Some(locator);
        self
    }

    /// Ranked fixes, highest confidence first; never empty
    pub async fn suggest(&self, ctx: &FailureContext) -> Vec<SuggestedFix> {
        let element = ctx.element_name();

        if ctx.failure_type == FailureType::Selector {
            if let Some(fix) = element.as_deref().and_then(|name| reorder_fix(ctx, name)) {
                info!(element = ?element, "proposing known alternative selector");
                return vec![fix];
            }
        }

        if let Some(name) = element.as_deref() {
            if let Some(fix) = self.visual_fix(ctx, name).await {
                info!(element = name, "proposing visually discovered selector");
                return vec![fix];
            }
        }

        let mut fixes = Vec::new();
        if ctx.failure_type == FailureType::Timing {
            fixes.push(wait_fix(ctx.viewport_issue, element));
        }
        fixes.push(SuggestedFix::retry());
        fixes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        fixes
    }

    async fn visual_fix(&self, ctx: &FailureContext, name: &str) -> Option<SuggestedFix> {
        let locator = self.visual.as_ref()?;
        if !ctx.known_elements.contains_key(name) {
            return None;
        }
        let Some(screenshot) = &ctx.screenshot else {
            debug!("no screenshot, skipping visual lookup");
            return None;
        };
        let description = describe_element(name);
        let found = match locator.locate(&ctx.page_url, screenshot, &description).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, element = name, "visual lookup failed");
                return None;
            }
        };
        if !found.found || found.confidence <= VISUAL_MATCH_THRESHOLD {
            debug!(confidence = found.confidence, "visual match too weak");
            return None;
        }
        let selector = SelectorDescriptor::css(found.suggested_selectors.first()?.clone());
        Some(SuggestedFix {
            kind: FixKind::Selector,
            description: format!("Use AI-suggested selector {selector} for '{name}'"),
            directive: Some(FixDirective::InjectSelector {
                element: name.to_string(),
                selector,
            }),
            confidence: VISUAL_CONFIDENCE,
        })
    }
}

fn reorder_fix(ctx: &FailureContext, name: &str) -> Option<SuggestedFix> {
    let candidates = ctx.known_elements.get(name)?;
    if candidates.len() < 2 {
        return None;
    }
    Some(SuggestedFix {
        kind: FixKind::Selector,
        description: format!("Try the next selector in the list for '{name}'"),
        directive: Some(FixDirective::Reorder {
            element: name.to_string(),
            failing_selector: candidates.first().map(SelectorDescriptor::key),
        }),
        confidence: REORDER_CONFIDENCE,
    })
}

fn wait_fix(viewport_issue: bool, element: Option<String>) -> SuggestedFix {
    if viewport_issue {
        SuggestedFix {
            kind: FixKind::Wait,
            description: "Element was outside the viewport; scroll it into view before acting"
                .to_string(),
            directive: Some(FixDirective::ScrollIntoView { element }),
            confidence: SCROLL_CONFIDENCE,
        }
    } else {
        SuggestedFix {
            kind: FixKind::Wait,
            description: "Increase the timeout or add an explicit wait for the page to settle"
                .to_string(),
            directive: Some(FixDirective::ExtendTimeout { element }),
            confidence: EXTEND_TIMEOUT_CONFIDENCE,
        }
    }
}
