//! BrowserDriver - abstract browser capability consumed by the core.
//!
//! The resolver and the orchestrator only need a handful of primitives:
//! navigation, screenshots and counting the elements a selector matches.
//! [`crate::browser::ChromiumDriver`] implements them over CDP when the
//! `browser` feature is enabled; [`MockDriver`] scripts them for tests.

use crate::result::VisionaryResult;
use crate::selector::SelectorDescriptor;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

/// Screenshot data with metadata
#[derive(Debug, Clone)]
pub struct Screenshot {
    /// Raw PNG data
    pub data: Vec<u8>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Timestamp when screenshot was taken
    pub timestamp: SystemTime,
}

impl Screenshot {
    /// Create a new screenshot
    #[must_use]
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: SystemTime::now(),
        }
    }

    /// Get the size in bytes
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Check if screenshot is valid (has data)
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.data.is_empty() && self.width > 0 && self.height > 0
    }

    /// PNG data as standard base64, as LLM providers expect it
    #[must_use]
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }
}

/// Browser primitives used by the resolver and the orchestrator
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Navigate to URL
    async fn navigate(&mut self, url: &str) -> VisionaryResult<()>;

    /// Take a screenshot of the viewport or the full page
    async fn screenshot(&self, full_page: bool) -> VisionaryResult<Screenshot>;

    /// Number of elements the selector currently matches
    async fn count_matches(&self, selector: &SelectorDescriptor) -> VisionaryResult<usize>;

    /// Get current URL
    async fn current_url(&self) -> VisionaryResult<String>;

    /// Close the browser
    async fn close(&mut self) -> VisionaryResult<()>;
}

/// How the mock answers `count_matches` for one selector key
#[derive(Debug, Clone)]
pub enum MatchPlan {
    /// Always this many matches
    Count(usize),
    /// Zero matches for the first `polls` queries, then `count`
    AfterPolls {
        /// Queries answered with zero
        polls: usize,
        /// Matches afterwards
        count: usize,
    },
    /// Every query fails with this message
    Error(String),
}

/// Mock driver for unit testing
#[derive(Debug, Default)]
pub struct MockDriver {
    /// Current URL
    pub current_url: String,
    /// Answers per selector key; unknown keys match nothing
    pub plans: HashMap<String, MatchPlan>,
    /// Screenshot data
    pub screenshot_data: Option<Screenshot>,
    polls: Mutex<HashMap<String, usize>>,
    call_history: Mutex<Vec<String>>,
}

impl MockDriver {
    /// Create new mock driver
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the answer for a selector
    #[must_use]
    pub fn with_plan(mut self, selector: &SelectorDescriptor, plan: MatchPlan) -> Self {
        let _ = self.plans.insert(selector.key(), plan);
        self
    }

    /// Set mock screenshot
    pub fn set_screenshot(&mut self, screenshot: Screenshot) {
        self.screenshot_data = Some(screenshot);
    }

    /// Get call history
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.call_history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Check if method was called
    #[must_use]
    pub fn was_called(&self, method: &str) -> bool {
        self.history().iter().any(|c| c.starts_with(method))
    }

    /// How many times a selector was queried
    #[must_use]
    pub fn poll_count(&self, selector: &SelectorDescriptor) -> usize {
        self.polls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&selector.key())
            .copied()
            .unwrap_or(0)
    }

    fn record(&self, call: String) {
        self.call_history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    async fn navigate(&mut self, url: &str) -> VisionaryResult<()> {
        self.record(format!("navigate:{url}"));
        self.current_url = url.to_string();
        Ok(())
    }

    async fn screenshot(&self, full_page: bool) -> VisionaryResult<Screenshot> {
        self.record(format!("screenshot:{full_page}"));
        Ok(self
            .screenshot_data
            .clone()
            .unwrap_or_else(|| Screenshot::new(vec![0x89, 0x50, 0x4E, 0x47], 1280, 720)))
    }

    async fn count_matches(&self, selector: &SelectorDescriptor) -> VisionaryResult<usize> {
        let key = selector.key();
        self.record(format!("count_matches:{key}"));
        let seen = {
            let mut polls = self.polls.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = polls.entry(key.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        match self.plans.get(&key) {
            None => Ok(0),
            Some(MatchPlan::Count(n)) => Ok(*n),
            Some(MatchPlan::AfterPolls { polls, count }) => {
                Ok(if seen > *polls { *count } else { 0 })
            }
            Some(MatchPlan::Error(message)) => Err(crate::VisionaryError::driver(message.clone())),
        }
    }

    async fn current_url(&self) -> VisionaryResult<String> {
        Ok(self.current_url.clone())
    }

    async fn close(&mut self) -> VisionaryResult<()> {
        self.record("close".to_string());
        Ok(())
    }
}
