//! End-to-end run: generate, enhance, execute, and heal on failure.
//!
//! ```text
//! navigate + screenshot ──► AssetGenerator ──► enhance ──► write assets
//!                                                            │
//!        ┌───────────────────────────────────────────────────┘
//!        ▼
//!   ArtifactGenerator ──► TestExecutor ──► pass ──► learn_from_success
//!        ▲                     │
//!        │                  fail
//!        │                     ▼
//!   apply fix ◄── suggest ◄── classify ──► learn_from_failure
//! ```
//!
//! Retries are bounded by `max_retries`; the final analysis lands in the
//! [`RunReport`].

use crate::classifier::{FailureAnalysis, FailureClassifier};
use crate::driver::{BrowserDriver, Screenshot};
use crate::executor::{ArtifactGenerator, GeneratedArtifacts, TestExecutor};
use crate::generator::AssetGenerator;
use crate::learning::KnowledgeUpdater;
use crate::repair::{apply_fix, save_assets, DEFAULT_APPLY_THRESHOLD};
use crate::result::{VisionaryError, VisionaryResult};
use crate::schema::TestAssets;
use crate::suggest::{FailureContext, FixSuggestionEngine, SuggestedFix};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Default number of healing retries after the first run
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// Default navigation timeout (ms)
pub const DEFAULT_NAVIGATION_TIMEOUT_MS: u64 = 30_000;

// =============================================================================
// TEST CASE
// =============================================================================

/// A user story as one string or as lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserStory {
    /// Single text
    Text(String),
    /// One entry per line
    Lines(Vec<String>),
}

impl UserStory {
    /// Story as a single text, lines joined by newlines
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Lines(lines) => lines.join("\n"),
        }
    }
}

/// One test case file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    /// Case name, also used for the assets file name
    pub name: String,
    /// Page under test
    pub url: String,
    /// What the test must verify
    pub user_story: UserStory,
}

impl TestCase {
    /// Load a case from JSON
    pub fn load(path: &Path) -> VisionaryResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let case: Self = serde_json::from_str(&json)?;
        if case.url.trim().is_empty() {
            return Err(VisionaryError::config(format!(
                "{}: test case without url",
                path.display()
            )));
        }
        Ok(case)
    }

    /// File-name friendly form of the case name
    #[must_use]
    pub fn slug(&self) -> String {
        let slug: String = self
            .name
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        let slug = slug.trim_matches('-').to_string();
        if slug.is_empty() {
            "test-case".to_string()
        } else {
            slug
        }
    }
}

// =============================================================================
// REPORT
// =============================================================================

/// One execution of the generated spec
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAttempt {
    /// 1-based attempt number
    pub attempt: u32,
    /// Test passed
    pub success: bool,
    /// Wall time of the test command
    pub duration_ms: u64,
    /// Analysis of a failed attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<FailureAnalysis>,
    /// Fix applied before the next attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_fix: Option<SuggestedFix>,
}

/// Outcome of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Run identifier
    pub run_id: Uuid,
    /// Case name
    pub test_name: String,
    /// Page under test
    pub url: String,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// Final attempt passed
    pub success: bool,
    /// Every attempt in order
    pub attempts: Vec<RunAttempt>,
    /// Assets document as last written
    pub assets_path: PathBuf,
    /// Artifacts of the last attempt
    pub artifacts: GeneratedArtifacts,
}

impl RunReport {
    /// Analysis of the last failed attempt, if the run failed
    #[must_use]
    pub fn final_analysis(&self) -> Option<&FailureAnalysis> {
        if self.success {
            return None;
        }
        self.attempts.last().and_then(|a| a.analysis.as_ref())
    }
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

/// Drives one test case through generation, execution and healing
pub struct Orchestrator {
    driver: Box<dyn BrowserDriver>,
    generator: Box<dyn AssetGenerator>,
    artifacts: Box<dyn ArtifactGenerator>,
    executor: Box<dyn TestExecutor>,
    updater: KnowledgeUpdater,
    classifier: FailureClassifier,
    engine: FixSuggestionEngine,
    max_retries: u32,
    apply_threshold: f64,
    navigation_timeout: Duration,
    assets_dir: PathBuf,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("max_retries", &self.max_retries)
            .field("apply_threshold", &self.apply_threshold)
            .field("navigation_timeout", &self.navigation_timeout)
            .field("assets_dir", &self.assets_dir)
            .finish()
    }
}

impl Orchestrator {
    /// Wire the collaborators with default healing settings
    #[must_use]
    pub fn new(
        driver: Box<dyn BrowserDriver>,
        generator: Box<dyn AssetGenerator>,
        artifacts: Box<dyn ArtifactGenerator>,
        executor: Box<dyn TestExecutor>,
        updater: KnowledgeUpdater,
    ) -> Self {
        Self {
            driver,
            generator,
            artifacts,
            executor,
            updater,
            classifier: FailureClassifier::new(),
            engine: FixSuggestionEngine::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            apply_threshold: DEFAULT_APPLY_THRESHOLD,
            navigation_timeout: Duration::from_millis(DEFAULT_NAVIGATION_TIMEOUT_MS),
            assets_dir: PathBuf::from("."),
        }
    }

    /// Suggestion engine to use (e.g. with a visual locator)
    #[must_use]
    pub fn with_engine(mut self, engine: FixSuggestionEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Healing retries after the first run
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Minimum confidence for applying a fix
    #[must_use]
    pub const fn with_apply_threshold(mut self, threshold: f64) -> Self {
        self.apply_threshold = threshold;
        self
    }

    /// Navigation timeout
    #[must_use]
    pub const fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    /// Directory the assets document is written to
    #[must_use]
    pub fn with_assets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.assets_dir = dir.into();
        self
    }

    /// Knowledge updater
    #[must_use]
    pub const fn updater(&self) -> &KnowledgeUpdater {
        &self.updater
    }

    /// Path the case's assets document is written to
    #[must_use]
    pub fn assets_path(&self, case: &TestCase) -> PathBuf {
        self.assets_dir.join(format!("{}.ai-assets.json", case.slug()))
    }

    /// Run a case to completion; a failing test is `Ok` with `success: false`
    #[instrument(skip(self, case), fields(case = %case.name, url = %case.url))]
    pub async fn run(&mut self, case: &TestCase) -> VisionaryResult<RunReport> {
        let started_at = Utc::now();
        let screenshot = self.capture(&case.url).await?;

        info!("generating assets");
        let generated = self
            .generator
            .generate(&case.user_story.text(), &screenshot)
            .await?;
        let mut assets = self.updater.enhance(&generated, &case.url);

        let assets_path = self.assets_path(case);
        if let Some(parent) = assets_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        save_assets(&assets, &assets_path)?;
        info!(path = %assets_path.display(), "assets written");

        let mut attempts = Vec::new();
        let mut attempt = 1;
        loop {
            let artifacts = self.artifacts.generate(&assets_path, &assets).await?;
            let outcome = self.executor.execute(&artifacts.spec_path).await?;

            if outcome.success {
                self.updater
                    .learn_from_success(&case.name, &assets, &case.url, outcome.duration);
                attempts.push(RunAttempt {
                    attempt,
                    success: true,
                    duration_ms: outcome.duration.as_millis() as u64,
                    analysis: None,
                    applied_fix: None,
                });
                info!(attempt, "test passed");
                return Ok(self.report(case, started_at, true, attempts, assets_path, artifacts));
            }

            let analysis = self.analyze(case, &assets, &outcome.output).await;
            self.updater.learn_from_failure(
                &case.name,
                &analysis,
                &assets,
                &case.url,
                outcome.duration,
            );

            let retries_left = attempt <= self.max_retries;
            let applied_fix = if retries_left {
                self.heal(&mut assets, &analysis, &assets_path)?
            } else {
                None
            };
            attempts.push(RunAttempt {
                attempt,
                success: false,
                duration_ms: outcome.duration.as_millis() as u64,
                analysis: Some(analysis),
                applied_fix,
            });

            if !retries_left {
                warn!(attempts = attempt, "retries exhausted");
                return Ok(self.report(case, started_at, false, attempts, assets_path, artifacts));
            }
            attempt += 1;
        }
    }

    /// Close the browser
    pub async fn shutdown(mut self) -> VisionaryResult<()> {
        self.driver.close().await
    }

    async fn capture(&mut self, url: &str) -> VisionaryResult<Screenshot> {
        let ms = self.navigation_timeout.as_millis() as u64;
        tokio::time::timeout(self.navigation_timeout, self.driver.navigate(url))
            .await
            .map_err(|_| VisionaryError::Navigation {
                url: url.to_string(),
                message: format!("timed out after {ms}ms"),
            })??;
        self.driver.screenshot(true).await
    }

    async fn analyze(&mut self, case: &TestCase, assets: &TestAssets, output: &str) -> FailureAnalysis {
        let mut analysis = self.classifier.classify(&case.name, output);
        analysis.attribute(assets);
        info!(
            failure_type = %analysis.failure_type,
            step = %analysis.failed_step,
            "test failed"
        );

        let mut ctx = FailureContext::from_analysis(&analysis, assets, &case.url);
        match self.capture(&case.url).await {
            Ok(shot) => ctx = ctx.with_screenshot(shot),
            Err(e) => warn!(error = %e, "no fresh screenshot for visual lookup"),
        }
        analysis.suggested_fixes = self.engine.suggest(&ctx).await;
        analysis
    }

    fn heal(
        &self,
        assets: &mut TestAssets,
        analysis: &FailureAnalysis,
        assets_path: &Path,
    ) -> VisionaryResult<Option<SuggestedFix>> {
        let fix = crate::repair::applicable_fix(analysis, self.apply_threshold).cloned();
        if apply_fix(assets, analysis, self.apply_threshold) {
            save_assets(assets, assets_path)?;
            info!(path = %assets_path.display(), "patched assets written");
            Ok(fix)
        } else {
            info!("no applicable fix, retrying unchanged");
            Ok(None)
        }
    }

    fn report(
        &self,
        case: &TestCase,
        started_at: DateTime<Utc>,
        success: bool,
        attempts: Vec<RunAttempt>,
        assets_path: PathBuf,
        artifacts: GeneratedArtifacts,
    ) -> RunReport {
        RunReport {
            run_id: Uuid::new_v4(),
            test_name: case.name.clone(),
            url: case.url.clone(),
            started_at,
            success,
            attempts,
            assets_path,
            artifacts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockDriver;
    use crate::executor::ExecutionOutcome;
    use crate::schema::fixtures::login_assets;
    use crate::store::{MemoryBackend, SelectorCandidateStore};
    use crate::suggest::FixKind;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct FixedGenerator(TestAssets);

    #[async_trait]
    impl AssetGenerator for FixedGenerator {
        async fn generate(&self, _story: &str, _shot: &Screenshot) -> VisionaryResult<TestAssets> {
            Ok(self.0.clone())
        }
    }

    /// Records the button candidates each generation saw
    #[derive(Clone, Default)]
    struct RecordingArtifacts {
        seen: Arc<Mutex<Vec<Vec<String>>>>,
    }

    #[async_trait]
    impl ArtifactGenerator for RecordingArtifacts {
        async fn generate(
            &self,
            _path: &Path,
            assets: &TestAssets,
        ) -> VisionaryResult<GeneratedArtifacts> {
            let keys = assets
                .element("loginButton")
                .map(|e| e.selectors.iter().map(|s| s.key()).collect())
                .unwrap_or_default();
            self.seen.lock().unwrap().push(keys);
            Ok(GeneratedArtifacts {
                spec_path: PathBuf::from("tests/generated/login-page.spec.ts"),
                page_object_path: PathBuf::from("pages/generated/LoginPage.ts"),
            })
        }
    }

    struct ScriptedExecutor {
        outcomes: Mutex<VecDeque<(bool, String)>>,
    }

    impl ScriptedExecutor {
        fn new(outcomes: Vec<(bool, String)>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
            }
        }
    }

    #[async_trait]
    impl TestExecutor for ScriptedExecutor {
        async fn execute(&self, _spec: &Path) -> VisionaryResult<ExecutionOutcome> {
            let (success, output) = self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or((true, String::new()));
            Ok(ExecutionOutcome {
                success,
                output,
                exit_code: Some(i32::from(!success)),
                duration: Duration::from_millis(10),
            })
        }
    }

    fn locator_failure() -> String {
        serde_json::json!({
            "suites": [{
                "specs": [{
                    "tests": [{
                        "results": [{
                            "error": {
                                "message": "Error: locator resolved to 0 elements for getByRole('button', { name: 'Login' })",
                                "stack": "Error: locator.click\n    at LoginPage.clickLoginButton (/p/pages/generated/LoginPage.ts:30:5)"
                            }
                        }]
                    }]
                }]
            }]
        })
        .to_string()
    }

    fn unknown_failure() -> String {
        "something odd happened".to_string()
    }

    fn case() -> TestCase {
        TestCase {
            name: "Login flow".into(),
            url: "https://app.test/login".into(),
            user_story: UserStory::Lines(vec!["As a user".into(), "I log in".into()]),
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        seen: Arc<Mutex<Vec<Vec<String>>>>,
        backend: MemoryBackend,
        _tmp: tempfile::TempDir,
    }

    fn harness(outcomes: Vec<(bool, String)>) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let mut driver = MockDriver::new();
        driver.set_screenshot(Screenshot::new(vec![1, 2, 3], 10, 10));
        let artifacts = RecordingArtifacts::default();
        let seen = artifacts.seen.clone();
        let backend = MemoryBackend::new();
        let store = SelectorCandidateStore::load(Box::new(backend.clone()));
        let orchestrator = Orchestrator::new(
            Box::new(driver),
            Box::new(FixedGenerator(login_assets())),
            Box::new(artifacts),
            Box::new(ScriptedExecutor::new(outcomes)),
            KnowledgeUpdater::new(store),
        )
        .with_assets_dir(tmp.path());
        Harness {
            orchestrator,
            seen,
            backend,
            _tmp: tmp,
        }
    }

    mod cases {
        use super::*;

        #[test]
        fn test_story_forms() {
            let single: TestCase =
                serde_json::from_str(r#"{"name":"a","url":"u","userStory":"one"}"#).unwrap();
            assert_eq!(single.user_story.text(), "one");
            let lines: TestCase =
                serde_json::from_str(r#"{"name":"a","url":"u","userStory":["one","two"]}"#)
                    .unwrap();
            assert_eq!(lines.user_story.text(), "one\ntwo");
        }

        #[test]
        fn test_slug() {
            assert_eq!(case().slug(), "login-flow");
            let mut odd = case();
            odd.name = "  ".into();
            assert_eq!(odd.slug(), "test-case");
        }

        #[test]
        fn test_load_rejects_missing_url() {
            let tmp = tempfile::tempdir().unwrap();
            let path = tmp.path().join("case.json");
            std::fs::write(&path, r#"{"name":"a","url":" ","userStory":"s"}"#).unwrap();
            assert!(matches!(
                TestCase::load(&path),
                Err(VisionaryError::Config { .. })
            ));
        }
    }

    mod runs {
        use super::*;

        #[tokio::test]
        async fn test_passes_first_time() {
            let mut h = harness(vec![(true, String::new())]);
            let report = h.orchestrator.run(&case()).await.unwrap();

            assert!(report.success);
            assert_eq!(report.attempts.len(), 1);
            assert!(report.final_analysis().is_none());
            assert!(report.assets_path.ends_with("login-flow.ai-assets.json"));
            assert!(report.assets_path.exists());

            let record = h
                .orchestrator
                .updater()
                .store()
                .get("https://app.test/login", "loginButton")
                .unwrap();
            assert_eq!(record.working_selectors.len(), 1);
            assert_eq!(h.backend.snapshot().history.len(), 1);
        }

        #[tokio::test]
        async fn test_selector_failure_heals_by_reordering() {
            let mut h = harness(vec![(false, locator_failure()), (true, String::new())]);
            let report = h.orchestrator.run(&case()).await.unwrap();

            assert!(report.success);
            assert_eq!(report.attempts.len(), 2);
            let first = &report.attempts[0];
            let analysis = first.analysis.as_ref().unwrap();
            assert_eq!(analysis.failed_step, "clickLoginButton");
            assert_eq!(analysis.failed_element.as_deref(), Some("loginButton"));
            assert_eq!(first.applied_fix.as_ref().unwrap().kind, FixKind::Selector);

            let seen = h.seen.lock().unwrap().clone();
            assert_eq!(seen[0][0], r#"role:button{"name":"Login"}"#);
            assert_eq!(seen[1][0], "css:#submit");

            let on_disk = TestAssets::load(&report.assets_path).unwrap();
            assert_eq!(
                on_disk.element("loginButton").unwrap().selectors[0].key(),
                "css:#submit"
            );

            let record = h
                .orchestrator
                .updater()
                .store()
                .get("https://app.test/login", "loginButton")
                .unwrap();
            assert_eq!(record.failed_selectors, vec![r#"role:button{"name":"Login"}"#]);
            assert_eq!(record.working_selectors, vec!["css:#submit"]);
        }

        #[tokio::test]
        async fn test_exhausted_retries_report_final_analysis() {
            let mut h = harness(vec![
                (false, unknown_failure()),
                (false, unknown_failure()),
            ]);
            let report = h.orchestrator.run(&case()).await.unwrap();

            assert!(!report.success);
            assert_eq!(report.attempts.len(), 2);
            let analysis = report.final_analysis().unwrap();
            assert_eq!(analysis.test_name, "Login flow");
            assert!(analysis.suggested_fixes.iter().any(|f| f.kind == FixKind::Retry));
            assert!(report.attempts.iter().all(|a| a.applied_fix.is_none()));
            assert_eq!(h.backend.snapshot().history.len(), 2);
        }

        #[tokio::test]
        async fn test_zero_retries_runs_once() {
            let mut h = harness(vec![(false, locator_failure())]);
            h.orchestrator = h.orchestrator.with_max_retries(0);
            let report = h.orchestrator.run(&case()).await.unwrap();
            assert!(!report.success);
            assert_eq!(report.attempts.len(), 1);
            assert_eq!(h.seen.lock().unwrap().len(), 1);
        }
    }
}
