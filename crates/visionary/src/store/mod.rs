//! SelectorCandidateStore - learned selector history per page element.
//!
//! A record remembers which selector keys worked and which failed for one
//! `(pageUrl, elementName)` pair. Successes move a key to the front of the
//! working list and forgive an earlier failure; failures are appended and
//! never remove a working key.
//!
//! Saving is a read-merge-write through the [`KnowledgeBackend`]: each
//! success and failure observed since the last save is replayed, in order,
//! onto the stored record under the backend's lock, so two writers touching
//! the same element both keep their observations. New history entries are
//! appended. The [`RetentionPolicy`] is applied on every save.

pub mod backend;

pub use backend::{
    JsonFileBackend, KnowledgeBackend, KnowledgeSnapshot, LockOptions, MemoryBackend,
};

use crate::classifier::FailureAnalysis;
use crate::result::VisionaryResult;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

/// Success rate of a record without any observations
pub const OPTIMISTIC_RATE: f64 = 100.0;

/// Key of the record for an element on a page
#[must_use]
pub fn record_key(page_url: &str, element_name: &str) -> String {
    format!("{page_url}-{element_name}")
}

// =============================================================================
// RECORDS
// =============================================================================

/// What the knowledge base knows about one element on one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnedElementRecord {
    /// Page URL
    pub url: String,
    /// Element name
    #[serde(default)]
    pub element_description: String,
    /// Keys that worked, most recent success first
    #[serde(default)]
    pub working_selectors: Vec<String>,
    /// Keys that failed, in the order they first failed
    #[serde(default)]
    pub failed_selectors: Vec<String>,
    /// Last mutation
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    /// Last recorded success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    /// Percent of known keys that work
    #[serde(default = "optimistic_rate")]
    pub success_rate: f64,
}

const fn optimistic_rate() -> f64 {
    OPTIMISTIC_RATE
}

impl LearnedElementRecord {
    /// Fresh record with the optimistic rate
    #[must_use]
    pub fn new(url: impl Into<String>, element_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            element_description: element_name.into(),
            working_selectors: Vec::new(),
            failed_selectors: Vec::new(),
            last_updated: Utc::now(),
            last_success: None,
            success_rate: OPTIMISTIC_RATE,
        }
    }

    /// `working / (working + failed) * 100`, or 100 with no observations
    #[must_use]
    pub fn computed_rate(&self) -> f64 {
        let working = self.working_selectors.len();
        let total = working + self.failed_selectors.len();
        if total == 0 {
            OPTIMISTIC_RATE
        } else {
            working as f64 / total as f64 * 100.0
        }
    }

    fn refresh_rate(&mut self) {
        self.success_rate = self.computed_rate();
    }

    fn mark_success(&mut self, key: &str, at: DateTime<Utc>) {
        self.working_selectors.retain(|k| k != key);
        self.working_selectors.insert(0, key.to_string());
        self.failed_selectors.retain(|k| k != key);
        self.last_updated = self.last_updated.max(at);
        self.last_success = self.last_success.max(Some(at));
        self.refresh_rate();
    }

    fn mark_failure(&mut self, key: &str, at: DateTime<Utc>) {
        if !self.failed_selectors.iter().any(|k| k == key) {
            self.failed_selectors.push(key.to_string());
        }
        self.last_updated = self.last_updated.max(at);
        self.refresh_rate();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
}

/// One unsaved observation, replayed onto the stored record on save
#[derive(Debug, Clone)]
struct Observation {
    page_url: String,
    element_name: String,
    key: String,
    outcome: Outcome,
    at: DateTime<Utc>,
}

impl Observation {
    fn apply(&self, records: &mut BTreeMap<String, LearnedElementRecord>) {
        let record = records
            .entry(record_key(&self.page_url, &self.element_name))
            .or_insert_with(|| LearnedElementRecord::new(&self.page_url, &self.element_name));
        match self.outcome {
            Outcome::Success => record.mark_success(&self.key, self.at),
            Outcome::Failure => record.mark_failure(&self.key, self.at),
        }
    }
}

/// Where a run executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Browser name
    pub browser: String,
    /// Viewport as `WIDTHxHEIGHT`
    pub viewport: String,
    /// Page URL
    pub url: String,
}

impl Environment {
    /// Environment of the current process for `url`
    #[must_use]
    pub fn capture(url: &str, viewport: &str) -> Self {
        Self {
            browser: std::env::var("BROWSER").unwrap_or_else(|_| "chromium".to_string()),
            viewport: viewport.to_string(),
            url: url.to_string(),
        }
    }
}

/// One test execution in the history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// Test name
    pub test_name: String,
    /// When it ran
    pub timestamp: DateTime<Utc>,
    /// Whether it passed
    pub success: bool,
    /// Duration in milliseconds
    #[serde(default, alias = "duration")]
    pub duration_ms: u64,
    /// Analysis of the failure, for failed runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_analysis: Option<FailureAnalysis>,
    /// Execution environment
    pub environment: Environment,
}

// =============================================================================
// RETENTION
// =============================================================================

/// Bounds on knowledge-base growth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RetentionPolicy {
    /// Records not updated for this many days are dropped
    pub max_record_age_days: u32,
    /// Longest working or failed list kept per record
    pub max_selectors_per_list: usize,
    /// Most recent history entries kept
    pub max_history: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_record_age_days: 90,
            max_selectors_per_list: 10,
            max_history: 500,
        }
    }
}

/// What a prune removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    /// Records dropped for age
    pub records_removed: usize,
    /// Selector keys trimmed from lists
    pub selectors_trimmed: usize,
    /// History entries dropped
    pub history_removed: usize,
}

impl RetentionPolicy {
    /// Apply the policy to a snapshot
    pub fn apply(&self, snapshot: &mut KnowledgeSnapshot, now: DateTime<Utc>) -> PruneStats {
        let mut stats = PruneStats::default();
        let cutoff = now - ChronoDuration::days(i64::from(self.max_record_age_days));

        let before = snapshot.records.len();
        snapshot.records.retain(|_, r| r.last_updated >= cutoff);
        stats.records_removed = before - snapshot.records.len();

        let max = self.max_selectors_per_list;
        for record in snapshot.records.values_mut() {
            let over_working = record.working_selectors.len().saturating_sub(max);
            let over_failed = record.failed_selectors.len().saturating_sub(max);
            if over_working + over_failed > 0 {
                record.working_selectors.truncate(max);
                let _ = record.failed_selectors.drain(..over_failed);
                record.refresh_rate();
                stats.selectors_trimmed += over_working + over_failed;
            }
        }

        let over_history = snapshot.history.len().saturating_sub(self.max_history);
        let _ = snapshot.history.drain(..over_history);
        stats.history_removed = over_history;

        stats
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Learned records and execution history over an injected backend
#[derive(Debug)]
pub struct SelectorCandidateStore {
    backend: Box<dyn KnowledgeBackend>,
    records: BTreeMap<String, LearnedElementRecord>,
    history: Vec<ExecutionRecord>,
    pending: Vec<Observation>,
    pending_history: Vec<ExecutionRecord>,
    retention: RetentionPolicy,
}

impl SelectorCandidateStore {
    /// Load from the backend; unreadable data yields an empty store
    #[instrument(skip(backend), fields(location = %backend.location()))]
    pub fn load(backend: Box<dyn KnowledgeBackend>) -> Self {
        let snapshot = match backend.load() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "could not load knowledge base, starting empty");
                KnowledgeSnapshot::default()
            }
        };
        let mut records = snapshot.records;
        for record in records.values_mut() {
            record.refresh_rate();
        }
        info!(
            records = records.len(),
            history = snapshot.history.len(),
            "knowledge base loaded"
        );
        Self {
            backend,
            records,
            history: snapshot.history,
            pending: Vec::new(),
            pending_history: Vec::new(),
            retention: RetentionPolicy::default(),
        }
    }

    /// Empty store over a fresh [`MemoryBackend`]
    #[must_use]
    pub fn in_memory() -> Self {
        Self::load(Box::new(MemoryBackend::new()))
    }

    /// Override the retention policy applied on save
    #[must_use]
    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Retention policy in effect
    #[must_use]
    pub const fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Record for an element on a page
    #[must_use]
    pub fn get(&self, page_url: &str, element_name: &str) -> Option<&LearnedElementRecord> {
        self.records.get(&record_key(page_url, element_name))
    }

    /// All records by key
    #[must_use]
    pub fn records(&self) -> &BTreeMap<String, LearnedElementRecord> {
        &self.records
    }

    /// Execution history, oldest first
    #[must_use]
    pub fn history(&self) -> &[ExecutionRecord] {
        &self.history
    }

    /// Whether there are changes not yet saved
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty() || !self.pending_history.is_empty()
    }

    /// Note that `key` located the element
    pub fn record_success(&mut self, page_url: &str, element_name: &str, key: &str) {
        self.observe(page_url, element_name, key, Outcome::Success);
    }

    /// Note that `key` failed to locate the element
    pub fn record_failure(&mut self, page_url: &str, element_name: &str, key: &str) {
        self.observe(page_url, element_name, key, Outcome::Failure);
    }

    /// Append an execution to the history
    pub fn record_execution(&mut self, record: ExecutionRecord) {
        self.history.push(record.clone());
        self.pending_history.push(record);
    }

    fn observe(&mut self, page_url: &str, element_name: &str, key: &str, outcome: Outcome) {
        let observation = Observation {
            page_url: page_url.to_string(),
            element_name: element_name.to_string(),
            key: key.to_string(),
            outcome,
            at: Utc::now(),
        };
        observation.apply(&mut self.records);
        self.pending.push(observation);
    }

    /// Merge local changes into the stored knowledge and persist it
    #[instrument(skip(self), fields(location = %self.backend.location()))]
    pub fn save(&mut self) -> VisionaryResult<()> {
        let stats = self.commit(self.retention)?;
        if stats != PruneStats::default() {
            info!(?stats, "retention applied");
        }
        Ok(())
    }

    /// Save under a new retention policy and report what it removed
    pub fn prune(&mut self, policy: RetentionPolicy) -> VisionaryResult<PruneStats> {
        self.retention = policy;
        self.commit(policy)
    }

    fn commit(&mut self, policy: RetentionPolicy) -> VisionaryResult<PruneStats> {
        let observations = &self.pending;
        let pending_history = &self.pending_history;
        let mut stats = PruneStats::default();

        let merged = self.backend.update(&mut |mut stored| {
            for observation in observations {
                observation.apply(&mut stored.records);
            }
            stored.history.extend(pending_history.iter().cloned());
            stats = policy.apply(&mut stored, Utc::now());
            stored
        })?;

        self.records = merged.records;
        self.history = merged.history;
        self.pending.clear();
        self.pending_history.clear();
        Ok(stats)
    }

    /// Persist a derived report next to the knowledge
    pub fn write_report(&self, report: &Value) -> VisionaryResult<()> {
        self.backend.write_report(report)
    }

    /// Backend location, for log lines
    #[must_use]
    pub fn location(&self) -> String {
        self.backend.location()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const URL: &str = "https://x/login";

    mod record_tests {
        use super::*;

        #[test]
        fn test_success_twice_keeps_single_front_entry() {
            let mut store = SelectorCandidateStore::in_memory();
            store.record_success(URL, "loginButton", "css:#other");
            store.record_success(URL, "loginButton", "css:#submit");
            store.record_success(URL, "loginButton", "css:#submit");

            let record = store.get(URL, "loginButton").unwrap();
            assert_eq!(record.working_selectors, vec!["css:#submit", "css:#other"]);
            assert!(record.last_success.is_some());
        }

        #[test]
        fn test_success_forgives_failure() {
            let mut store = SelectorCandidateStore::in_memory();
            store.record_success(URL, "loginButton", "css:#a");
            store.record_failure(URL, "loginButton", "css:#s");
            store.record_success(URL, "loginButton", "css:#s");

            let record = store.get(URL, "loginButton").unwrap();
            assert!(record.failed_selectors.is_empty());
            assert_eq!(record.working_selectors[0], "css:#s");
            assert_eq!(record.success_rate, 100.0);
        }

        #[test]
        fn test_failures_on_empty_store() {
            let mut store = SelectorCandidateStore::in_memory();
            store.record_failure(URL, "loginButton", "css:#submit");
            store.record_failure(URL, "loginButton", "role:button");
            store.record_failure(URL, "loginButton", "css:#submit");

            let record = store.get(URL, "loginButton").unwrap();
            assert_eq!(record.failed_selectors, vec!["css:#submit", "role:button"]);
            assert_eq!(record.success_rate, 0.0);
        }

        #[test]
        fn test_failure_keeps_working_key() {
            let mut store = SelectorCandidateStore::in_memory();
            store.record_success(URL, "loginButton", "css:#s");
            store.record_failure(URL, "loginButton", "css:#s");

            let record = store.get(URL, "loginButton").unwrap();
            assert_eq!(record.working_selectors, vec!["css:#s"]);
            assert_eq!(record.failed_selectors, vec!["css:#s"]);
            assert_eq!(record.success_rate, 50.0);
        }

        #[test]
        fn test_optimistic_rate_for_empty_record() {
            let record = LearnedElementRecord::new(URL, "x");
            assert_eq!(record.computed_rate(), OPTIMISTIC_RATE);
        }

        #[test]
        fn test_legacy_record_fields_default() {
            let record: LearnedElementRecord = serde_json::from_str(
                r#"{"url":"https://x","workingSelectors":["getByRole:button"],"lastUpdated":"2024-05-01T10:00:00Z","successRate":0}"#,
            )
            .unwrap();
            assert!(record.failed_selectors.is_empty());
            assert!(record.last_success.is_none());
            assert_eq!(record.computed_rate(), 100.0);
        }
    }

    mod persistence_tests {
        use super::*;
        use std::fs;

        fn file_store(dir: &TempDir) -> SelectorCandidateStore {
            SelectorCandidateStore::load(Box::new(JsonFileBackend::new(dir.path())))
        }

        #[test]
        fn test_save_and_reload() {
            let tmp = TempDir::new().unwrap();
            let mut store = file_store(&tmp);
            store.record_success(URL, "loginButton", "css:#submit");
            store.record_execution(ExecutionRecord {
                test_name: "login".into(),
                timestamp: Utc::now(),
                success: true,
                duration_ms: 1200,
                failure_analysis: None,
                environment: Environment::capture(URL, "1280x720"),
            });
            store.save().unwrap();
            assert!(!store.is_dirty());

            let reloaded = file_store(&tmp);
            assert_eq!(
                reloaded.get(URL, "loginButton").unwrap().working_selectors,
                vec!["css:#submit"]
            );
            assert_eq!(reloaded.history().len(), 1);
        }

        #[test]
        fn test_corrupt_file_loads_empty() {
            let tmp = TempDir::new().unwrap();
            fs::write(tmp.path().join(backend::SELECTORS_FILE), "][").unwrap();
            let mut store = file_store(&tmp);
            assert!(store.records().is_empty());

            store.record_failure(URL, "loginButton", "css:#x");
            store.save().unwrap();
            assert_eq!(file_store(&tmp).records().len(), 1);
        }

        #[test]
        fn test_corrupt_records_file_keeps_history() {
            let tmp = TempDir::new().unwrap();
            let mut store = file_store(&tmp);
            for i in 0..3 {
                store.record_execution(ExecutionRecord {
                    test_name: format!("run-{i}"),
                    timestamp: Utc::now(),
                    success: true,
                    duration_ms: 0,
                    failure_analysis: None,
                    environment: Environment::capture(URL, "1280x720"),
                });
            }
            store.record_success(URL, "loginButton", "css:#submit");
            store.save().unwrap();
            fs::write(tmp.path().join(backend::SELECTORS_FILE), "][").unwrap();

            let mut reloaded = file_store(&tmp);
            assert!(reloaded.records().is_empty());
            assert_eq!(reloaded.history().len(), 3);

            reloaded.record_execution(ExecutionRecord {
                test_name: "run-3".into(),
                timestamp: Utc::now(),
                success: false,
                duration_ms: 0,
                failure_analysis: None,
                environment: Environment::capture(URL, "1280x720"),
            });
            reloaded.save().unwrap();
            assert_eq!(file_store(&tmp).history().len(), 4);
        }

        #[test]
        fn test_rate_recomputed_on_load() {
            let tmp = TempDir::new().unwrap();
            fs::write(
                tmp.path().join(backend::SELECTORS_FILE),
                r#"{"https://x/login-loginButton":{"url":"https://x/login","elementDescription":"loginButton","workingSelectors":["css:#a"],"failedSelectors":["css:#b","css:#c","css:#d"],"lastUpdated":"2099-01-01T00:00:00Z","successRate":99}}"#,
            )
            .unwrap();
            let store = file_store(&tmp);
            assert_eq!(store.get(URL, "loginButton").unwrap().success_rate, 25.0);
        }

        #[test]
        fn test_save_merges_other_writer() {
            let backend = MemoryBackend::new();
            let mut first = SelectorCandidateStore::load(Box::new(backend.clone()));
            let mut second = SelectorCandidateStore::load(Box::new(backend.clone()));

            first.record_success(URL, "emailInput", "label:Email");
            first.save().unwrap();
            second.record_failure(URL, "loginButton", "css:#submit");
            second.save().unwrap();

            let stored = backend.snapshot();
            assert_eq!(stored.records.len(), 2);
            assert_eq!(second.records().len(), 2);
        }

        #[test]
        fn test_untouched_records_keep_stored_version() {
            let backend = MemoryBackend::new();
            let mut seed = SelectorCandidateStore::load(Box::new(backend.clone()));
            seed.record_success(URL, "loginButton", "css:#a");
            seed.save().unwrap();

            let mut stale = SelectorCandidateStore::load(Box::new(backend.clone()));
            let mut fresh = SelectorCandidateStore::load(Box::new(backend.clone()));
            fresh.record_success(URL, "loginButton", "css:#b");
            fresh.save().unwrap();
            stale.record_success(URL, "emailInput", "label:Email");
            stale.save().unwrap();

            let stored = backend.snapshot();
            let login = &stored.records[&record_key(URL, "loginButton")];
            assert_eq!(login.working_selectors, vec!["css:#b", "css:#a"]);
        }
    }

    mod concurrent_writer_tests {
        use super::*;

        fn file_store(dir: &TempDir) -> SelectorCandidateStore {
            SelectorCandidateStore::load(Box::new(JsonFileBackend::new(dir.path())))
        }

        #[test]
        fn test_same_record_keeps_both_writers_successes() {
            let tmp = TempDir::new().unwrap();
            let mut a = file_store(&tmp);
            let mut b = file_store(&tmp);

            a.record_success(URL, "loginButton", "css:#a");
            b.record_success(URL, "loginButton", "css:#b");
            a.save().unwrap();
            b.save().unwrap();

            let stored = file_store(&tmp);
            let record = stored.get(URL, "loginButton").unwrap();
            assert_eq!(record.working_selectors, vec!["css:#b", "css:#a"]);
            assert_eq!(b.get(URL, "loginButton").unwrap().working_selectors.len(), 2);
        }

        #[test]
        fn test_failure_from_one_writer_survives_success_from_other() {
            let backend = MemoryBackend::new();
            let mut a = SelectorCandidateStore::load(Box::new(backend.clone()));
            let mut b = SelectorCandidateStore::load(Box::new(backend.clone()));

            a.record_failure(URL, "loginButton", "role:button");
            b.record_success(URL, "loginButton", "css:#submit");
            a.save().unwrap();
            b.save().unwrap();

            let stored = backend.snapshot();
            let record = &stored.records[&record_key(URL, "loginButton")];
            assert_eq!(record.working_selectors, vec!["css:#submit"]);
            assert_eq!(record.failed_selectors, vec!["role:button"]);
            assert_eq!(record.success_rate, 50.0);
        }

        #[test]
        fn test_later_success_forgives_other_writers_failure() {
            let backend = MemoryBackend::new();
            let mut a = SelectorCandidateStore::load(Box::new(backend.clone()));
            let mut b = SelectorCandidateStore::load(Box::new(backend.clone()));

            a.record_failure(URL, "loginButton", "css:#submit");
            a.save().unwrap();
            b.record_success(URL, "loginButton", "css:#submit");
            b.save().unwrap();

            let record = &backend.snapshot().records[&record_key(URL, "loginButton")];
            assert!(record.failed_selectors.is_empty());
            assert_eq!(record.success_rate, 100.0);
        }
    }

    mod retention_tests {
        use super::*;

        #[test]
        fn test_old_records_dropped() {
            let mut snapshot = KnowledgeSnapshot::default();
            let mut old = LearnedElementRecord::new(URL, "old");
            old.last_updated = Utc::now() - ChronoDuration::days(120);
            let _ = snapshot.records.insert("old".into(), old);
            let _ = snapshot
                .records
                .insert("new".into(), LearnedElementRecord::new(URL, "new"));

            let stats = RetentionPolicy::default().apply(&mut snapshot, Utc::now());
            assert_eq!(stats.records_removed, 1);
            assert!(snapshot.records.contains_key("new"));
        }

        #[test]
        fn test_lists_and_history_bounded() {
            let mut store = SelectorCandidateStore::in_memory().with_retention(RetentionPolicy {
                max_record_age_days: 90,
                max_selectors_per_list: 2,
                max_history: 3,
            });
            for i in 0..4 {
                store.record_success(URL, "loginButton", &format!("css:#w{i}"));
                store.record_failure(URL, "loginButton", &format!("css:#f{i}"));
                store.record_execution(ExecutionRecord {
                    test_name: format!("run-{i}"),
                    timestamp: Utc::now(),
                    success: false,
                    duration_ms: 0,
                    failure_analysis: None,
                    environment: Environment::capture(URL, "1280x720"),
                });
            }
            store.save().unwrap();

            let record = store.get(URL, "loginButton").unwrap();
            assert_eq!(record.working_selectors, vec!["css:#w3", "css:#w2"]);
            assert_eq!(record.failed_selectors, vec!["css:#f2", "css:#f3"]);
            assert_eq!(record.success_rate, 50.0);
            let names: Vec<_> = store.history().iter().map(|h| h.test_name.as_str()).collect();
            assert_eq!(names, vec!["run-1", "run-2", "run-3"]);
        }

        #[test]
        fn test_prune_reports_stats() {
            let mut store = SelectorCandidateStore::in_memory();
            for i in 0..5 {
                store.record_execution(ExecutionRecord {
                    test_name: format!("run-{i}"),
                    timestamp: Utc::now(),
                    success: true,
                    duration_ms: 0,
                    failure_analysis: None,
                    environment: Environment::capture(URL, "1280x720"),
                });
            }
            let stats = store
                .prune(RetentionPolicy {
                    max_history: 2,
                    ..RetentionPolicy::default()
                })
                .unwrap();
            assert_eq!(stats.history_removed, 3);
            assert_eq!(store.history().len(), 2);
        }
    }
}
