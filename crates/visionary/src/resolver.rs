//! Element resolution over an ordered list of selector candidates.
//!
//! Candidates are tried strictly in order, each polled until its own timeout.
//! The first candidate that matches at least one element wins. When nothing
//! matches, the first candidate gets one extended wait before the resolver
//! gives up with [`VisionaryError::ElementNotFound`] carrying every attempt.

use crate::driver::BrowserDriver;
use crate::result::{VisionaryError, VisionaryResult};
use crate::selector::SelectorDescriptor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Default per-candidate timeout in milliseconds
pub const DEFAULT_CANDIDATE_TIMEOUT_MS: u64 = 3_000;

/// Default extended wait on the first candidate in milliseconds
pub const DEFAULT_EXTENDED_TIMEOUT_MS: u64 = 10_000;

/// Default polling interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Warning logged when a selector matches more than one element.
///
/// The classifier looks for this text in run output.
#[must_use]
pub fn ambiguity_marker(count: usize, description: &str) -> String {
    format!("Selector matched {count} elements for {description}")
}

// =============================================================================
// RESOLVER CONFIG
// =============================================================================

/// Timeouts and side channels for the resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ResolverConfig {
    /// Per-candidate timeout in milliseconds
    pub candidate_timeout_ms: u64,
    /// Extended wait on the first candidate in milliseconds
    pub extended_timeout_ms: u64,
    /// Polling interval in milliseconds
    pub poll_interval_ms: u64,
    /// Directory for attempt-log artifacts; `None` disables them
    pub debug_dir: Option<PathBuf>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            candidate_timeout_ms: DEFAULT_CANDIDATE_TIMEOUT_MS,
            extended_timeout_ms: DEFAULT_EXTENDED_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            debug_dir: None,
        }
    }
}

impl ResolverConfig {
    /// Create config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set per-candidate timeout
    #[must_use]
    pub const fn with_candidate_timeout(mut self, ms: u64) -> Self {
        self.candidate_timeout_ms = ms;
        self
    }

    /// Set extended timeout
    #[must_use]
    pub const fn with_extended_timeout(mut self, ms: u64) -> Self {
        self.extended_timeout_ms = ms;
        self
    }

    /// Set polling interval
    #[must_use]
    pub const fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Write attempt logs into this directory on failure
    #[must_use]
    pub fn with_debug_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_dir = Some(dir.into());
        self
    }

    /// Per-candidate timeout as Duration
    #[must_use]
    pub const fn candidate_timeout(&self) -> Duration {
        Duration::from_millis(self.candidate_timeout_ms)
    }

    /// Extended timeout as Duration
    #[must_use]
    pub const fn extended_timeout(&self) -> Duration {
        Duration::from_millis(self.extended_timeout_ms)
    }

    /// Poll interval as Duration
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Check `candidate < extended < test_timeout` and a non-zero poll interval
    pub fn validate(&self, test_timeout_ms: u64) -> VisionaryResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(VisionaryError::config("poll interval must be non-zero"));
        }
        if self.candidate_timeout_ms >= self.extended_timeout_ms {
            return Err(VisionaryError::config(format!(
                "candidate timeout ({}ms) must be shorter than the extended timeout ({}ms)",
                self.candidate_timeout_ms, self.extended_timeout_ms
            )));
        }
        if self.extended_timeout_ms >= test_timeout_ms {
            return Err(VisionaryError::config(format!(
                "extended timeout ({}ms) must be shorter than the test timeout ({test_timeout_ms}ms)",
                self.extended_timeout_ms
            )));
        }
        Ok(())
    }
}

// =============================================================================
// ATTEMPT LOG
// =============================================================================

/// Which wait produced an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptPhase {
    /// Regular per-candidate wait
    Candidate,
    /// Final extended wait on the first candidate
    Extended,
}

/// Outcome of waiting on one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateAttempt {
    /// Canonical key of the candidate
    pub selector: String,
    /// Whether the driver reported an error
    pub errored: bool,
    /// Last driver error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Last observed match count, when the driver answered at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    /// Wait phase
    pub phase: AttemptPhase,
}

/// All attempts made for one element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptLog {
    /// Element description
    pub description: String,
    /// Attempts in order
    pub attempts: Vec<CandidateAttempt>,
}

impl AttemptLog {
    /// Write the log as `<dir>/<description>-attempts.json`
    pub fn write_debug_artifact(&self, dir: &Path) -> VisionaryResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}-attempts.json", file_stem(&self.description)));
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }
}

fn file_stem(description: &str) -> String {
    let stem: String = description
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if stem.is_empty() {
        "element".to_string()
    } else {
        stem
    }
}

// =============================================================================
// RESOLVER
// =============================================================================

/// A successful resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedElement {
    /// The winning candidate
    pub selector: SelectorDescriptor,
    /// Its index in the candidate list
    pub position: usize,
    /// How many elements it matched
    pub match_count: usize,
    /// More than one element matched; the first is used
    pub ambiguous: bool,
}

/// First-match resolver over a browser driver
#[derive(Debug)]
pub struct ElementResolver<'a, D: BrowserDriver + ?Sized> {
    driver: &'a D,
    config: ResolverConfig,
}

impl<'a, D: BrowserDriver + ?Sized> ElementResolver<'a, D> {
    /// Create a resolver borrowing the driver
    #[must_use]
    pub fn new(driver: &'a D, config: ResolverConfig) -> Self {
        Self { driver, config }
    }

    /// Resolver configuration
    #[must_use]
    pub const fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve the first candidate that matches anything
    #[instrument(skip(self, candidates), fields(candidates = candidates.len()))]
    pub async fn resolve(
        &self,
        candidates: &[SelectorDescriptor],
        description: &str,
    ) -> VisionaryResult<ResolvedElement> {
        let mut attempts = Vec::with_capacity(candidates.len() + 1);

        for (position, candidate) in candidates.iter().enumerate() {
            match self
                .wait_for(candidate, self.config.candidate_timeout(), AttemptPhase::Candidate)
                .await
            {
                Ok(count) => return Ok(self.resolved(candidate, position, count, description)),
                Err(attempt) => {
                    debug!(selector = %attempt.selector, "candidate did not resolve");
                    attempts.push(attempt);
                }
            }
        }

        if let Some(first) = candidates.first() {
            debug!(selector = %first.key(), "extended wait on first candidate");
            match self
                .wait_for(first, self.config.extended_timeout(), AttemptPhase::Extended)
                .await
            {
                Ok(count) => return Ok(self.resolved(first, 0, count, description)),
                Err(attempt) => attempts.push(attempt),
            }
        }

        let log = AttemptLog {
            description: description.to_string(),
            attempts,
        };
        if let Some(dir) = &self.config.debug_dir {
            match log.write_debug_artifact(dir) {
                Ok(path) => debug!(path = %path.display(), "attempt log written"),
                Err(e) => warn!(error = %e, "could not write attempt log"),
            }
        }
        warn!(description, tried = candidates.len(), "element not found");

        Err(VisionaryError::ElementNotFound {
            description: log.description,
            tried: candidates.len(),
            attempts: log.attempts,
        })
    }

    fn resolved(
        &self,
        candidate: &SelectorDescriptor,
        position: usize,
        count: usize,
        description: &str,
    ) -> ResolvedElement {
        let ambiguous = count > 1;
        if ambiguous {
            warn!(selector = %candidate.key(), "{}", ambiguity_marker(count, description));
        }
        ResolvedElement {
            selector: candidate.clone(),
            position,
            match_count: count,
            ambiguous,
        }
    }

    /// Poll one candidate until it matches or `timeout` elapses
    async fn wait_for(
        &self,
        candidate: &SelectorDescriptor,
        timeout: Duration,
        phase: AttemptPhase,
    ) -> Result<usize, CandidateAttempt> {
        let deadline = Instant::now() + timeout;
        let mut attempt = CandidateAttempt {
            selector: candidate.key(),
            errored: false,
            error: None,
            count: None,
            phase,
        };

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, self.driver.count_matches(candidate)).await {
                Ok(Ok(count)) if count > 0 => return Ok(count),
                Ok(Ok(count)) => attempt.count = Some(count),
                Ok(Err(e)) => {
                    attempt.errored = true;
                    attempt.error = Some(e.to_string());
                }
                Err(_) => break,
            }
            if Instant::now() + self.config.poll_interval() >= deadline {
                break;
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
        Err(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MatchPlan, MockDriver};

    fn fast_config() -> ResolverConfig {
        ResolverConfig::new()
            .with_candidate_timeout(30)
            .with_extended_timeout(200)
            .with_poll_interval(5)
    }

    mod config_tests {
        use super::*;

        #[test]
        fn test_defaults() {
            let cfg = ResolverConfig::default();
            assert_eq!(cfg.candidate_timeout(), Duration::from_secs(3));
            assert_eq!(cfg.extended_timeout(), Duration::from_secs(10));
            assert_eq!(cfg.poll_interval(), Duration::from_millis(100));
        }

        #[test]
        fn test_validate_ordering() {
            assert!(ResolverConfig::default().validate(30_000).is_ok());
            assert!(ResolverConfig::default().validate(10_000).is_err());
            assert!(ResolverConfig::default()
                .with_candidate_timeout(10_000)
                .validate(30_000)
                .is_err());
            assert!(ResolverConfig::default()
                .with_poll_interval(0)
                .validate(30_000)
                .is_err());
        }
    }

    mod resolve_tests {
        use super::*;

        #[tokio::test]
        async fn test_first_matching_candidate_wins() {
            let missing = SelectorDescriptor::css("#gone");
            let second = SelectorDescriptor::role("button").with_name("Login");
            let third = SelectorDescriptor::css("#submit");
            let driver = MockDriver::new()
                .with_plan(&second, MatchPlan::Count(1))
                .with_plan(&third, MatchPlan::Count(1));
            let resolver = ElementResolver::new(&driver, fast_config());

            let resolved = resolver
                .resolve(&[missing, second.clone(), third.clone()], "login Button")
                .await
                .unwrap();

            assert_eq!(resolved.selector, second);
            assert_eq!(resolved.position, 1);
            assert!(!resolved.ambiguous);
            assert_eq!(driver.poll_count(&third), 0);
        }

        #[tokio::test]
        async fn test_matching_first_candidate_never_queries_the_rest() {
            let first = SelectorDescriptor::label("E-Mail Address");
            let second = SelectorDescriptor::css("#input-email");
            let driver = MockDriver::new()
                .with_plan(&first, MatchPlan::Count(1))
                .with_plan(&second, MatchPlan::Count(1));
            let resolver = ElementResolver::new(&driver, fast_config());

            let resolved = resolver
                .resolve(&[first.clone(), second.clone()], "email Input")
                .await
                .unwrap();

            assert_eq!(resolved.selector, first);
            assert_eq!(resolved.position, 0);
            assert_eq!(driver.poll_count(&first), 1);
            assert_eq!(driver.poll_count(&second), 0);
            assert_eq!(driver.history(), vec![format!("count_matches:{}", first.key())]);
        }

        #[tokio::test]
        async fn test_ambiguous_match_uses_first_element() {
            let sel = SelectorDescriptor::text("Submit");
            let driver = MockDriver::new().with_plan(&sel, MatchPlan::Count(3));
            let resolver = ElementResolver::new(&driver, fast_config());

            let resolved = resolver.resolve(&[sel], "submit Button").await.unwrap();
            assert!(resolved.ambiguous);
            assert_eq!(resolved.match_count, 3);
        }

        #[tokio::test]
        async fn test_driver_error_moves_to_next_candidate() {
            let broken = SelectorDescriptor::css("#broken");
            let good = SelectorDescriptor::label("Email");
            let driver = MockDriver::new()
                .with_plan(&broken, MatchPlan::Error("detached frame".into()))
                .with_plan(&good, MatchPlan::Count(1));
            let resolver = ElementResolver::new(&driver, fast_config());

            let resolved = resolver.resolve(&[broken, good.clone()], "email").await.unwrap();
            assert_eq!(resolved.selector, good);
        }

        #[tokio::test]
        async fn test_extended_wait_on_first_candidate() {
            let first = SelectorDescriptor::css("#slow");
            let second = SelectorDescriptor::css("#never");
            let driver = MockDriver::new()
                .with_plan(&first, MatchPlan::AfterPolls { polls: 12, count: 1 });
            let resolver = ElementResolver::new(&driver, fast_config());

            let resolved = resolver.resolve(&[first.clone(), second], "slow").await.unwrap();
            assert_eq!(resolved.selector, first);
            assert_eq!(resolved.position, 0);
        }

        #[tokio::test]
        async fn test_not_found_carries_attempt_log() {
            let a = SelectorDescriptor::css("#a");
            let b = SelectorDescriptor::css("#b");
            let driver =
                MockDriver::new().with_plan(&b, MatchPlan::Error("no such frame".into()));
            let resolver = ElementResolver::new(&driver, fast_config());

            let err = resolver.resolve(&[a, b], "thing").await.unwrap_err();
            let VisionaryError::ElementNotFound {
                tried, attempts, ..
            } = &err
            else {
                panic!("unexpected error: {err}");
            };
            assert_eq!(*tried, 2);
            assert_eq!(attempts.len(), 3);
            assert_eq!(attempts[0].phase, AttemptPhase::Candidate);
            assert_eq!(attempts[0].count, Some(0));
            assert!(!attempts[0].errored);
            assert!(attempts[1].errored);
            assert_eq!(attempts[1].selector, "css:#b");
            assert_eq!(attempts[2].phase, AttemptPhase::Extended);
            assert_eq!(attempts[2].selector, "css:#a");
        }

        #[tokio::test]
        async fn test_empty_candidates_fail_without_waiting() {
            let driver = MockDriver::new();
            let resolver = ElementResolver::new(&driver, fast_config());
            let err = resolver.resolve(&[], "nothing").await.unwrap_err();
            assert_eq!(err.attempts().map(<[_]>::len), Some(0));
            assert!(!driver.was_called("count_matches"));
        }

        #[tokio::test]
        async fn test_debug_artifact_written_on_failure() {
            let dir = tempfile::tempdir().unwrap();
            let driver = MockDriver::new();
            let resolver =
                ElementResolver::new(&driver, fast_config().with_debug_dir(dir.path()));

            let _ = resolver
                .resolve(&[SelectorDescriptor::css("#x")], "login Button")
                .await;

            let path = dir.path().join("login-Button-attempts.json");
            let log: AttemptLog =
                serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
            assert_eq!(log.description, "login Button");
            assert_eq!(log.attempts.len(), 2);
        }
    }

    #[test]
    fn test_ambiguity_marker_text() {
        assert_eq!(
            ambiguity_marker(2, "login Button"),
            "Selector matched 2 elements for login Button"
        );
    }
}
