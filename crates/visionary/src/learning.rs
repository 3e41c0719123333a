//! KnowledgeUpdater - feeds run outcomes into the store and the store back
//! into the next run's assets.

use crate::classifier::FailureAnalysis;
use crate::schema::{LearningMetadata, PageElementSpec, TestAssets};
use crate::selector::SelectorDescriptor;
use crate::store::{Environment, ExecutionRecord, LearnedElementRecord, SelectorCandidateStore};
use crate::suggest::strip_action_verb;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Default cap on candidates per element after enhancement
pub const DEFAULT_MAX_CANDIDATES: usize = 5;

/// Elements above this rate are reported as reliable
pub const RELIABLE_RATE: f64 = 90.0;
/// Elements below this rate are reported as problematic
pub const PROBLEMATIC_RATE: f64 = 50.0;

const MAX_RELIABLE_LISTED: usize = 10;
const LOW_OVERALL_RATE: f64 = 80.0;
const MANY_PROBLEMATIC: usize = 5;

/// Element flagged by the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblematicElement {
    /// Element name
    pub name: String,
    /// Success rate (percent)
    pub success_rate: f64,
    /// Page URL
    pub url: String,
}

/// Summary written to `learning-report.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningReport {
    /// Report identifier
    pub report_id: uuid::Uuid,
    /// When the report was built
    pub generated_at: DateTime<Utc>,
    /// Executions in the history
    pub total_tests: usize,
    /// Percent of executions that passed
    pub success_rate: f64,
    /// Records above the reliable threshold, best first
    pub most_reliable_selectors: Vec<LearnedElementRecord>,
    /// Records below the problematic threshold
    pub problematic_elements: Vec<ProblematicElement>,
    /// Human-readable advice
    pub recommendations: Vec<String>,
}

/// Applies learned knowledge to assets and records outcomes
#[derive(Debug)]
pub struct KnowledgeUpdater {
    store: SelectorCandidateStore,
    max_candidates: usize,
    viewport: String,
}

impl KnowledgeUpdater {
    /// Updater over a loaded store
    #[must_use]
    pub fn new(store: SelectorCandidateStore) -> Self {
        Self {
            store,
            max_candidates: DEFAULT_MAX_CANDIDATES,
            viewport: "1280x720".to_string(),
        }
    }

    /// Cap on candidates per element
    #[must_use]
    pub fn with_max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = max.max(1);
        self
    }

    /// Viewport recorded in the history
    #[must_use]
    pub fn with_viewport(mut self, viewport: impl Into<String>) -> Self {
        self.viewport = viewport.into();
        self
    }

    /// Underlying store
    #[must_use]
    pub const fn store(&self) -> &SelectorCandidateStore {
        &self.store
    }

    /// Mutable access to the store
    pub fn store_mut(&mut self) -> &mut SelectorCandidateStore {
        &mut self.store
    }

    /// Reorder, filter and cap every element's candidates using its record
    #[must_use]
    pub fn enhance(&self, assets: &TestAssets, page_url: &str) -> TestAssets {
        let mut enhanced = assets.clone();
        let mut touched = 0usize;
        for page in enhanced.pages_mut() {
            for element in &mut page.locators {
                if let Some(record) = self.store.get(page_url, &element.name) {
                    enhance_element(element, record, self.max_candidates);
                    touched += 1;
                }
            }
        }
        debug!(touched, page_url, "assets enhanced");
        enhanced
    }

    /// Record every element's first candidate as working
    #[instrument(skip(self, assets))]
    pub fn learn_from_success(
        &mut self,
        test_name: &str,
        assets: &TestAssets,
        page_url: &str,
        duration: Duration,
    ) {
        for element in assets.elements() {
            if let Some(first) = element.selectors.first() {
                self.store
                    .record_success(page_url, &element.name, &first.key());
            }
        }
        self.store.record_execution(ExecutionRecord {
            test_name: test_name.to_string(),
            timestamp: Utc::now(),
            success: true,
            duration_ms: duration.as_millis() as u64,
            failure_analysis: None,
            environment: Environment::capture(page_url, &self.viewport),
        });
        self.persist();
    }

    /// Record the failed element's first candidate as failing
    #[instrument(skip(self, analysis, assets), fields(step = %analysis.failed_step))]
    pub fn learn_from_failure(
        &mut self,
        test_name: &str,
        analysis: &FailureAnalysis,
        assets: &TestAssets,
        page_url: &str,
        duration: Duration,
    ) {
        let element = analysis
            .failed_element
            .clone()
            .or_else(|| strip_action_verb(&analysis.failed_step))
            .and_then(|name| assets.element(&name));

        match element.and_then(|e| Some((e, e.selectors.first()?))) {
            Some((element, first)) => {
                self.store
                    .record_failure(page_url, &element.name, &first.key());
                info!(element = %element.name, selector = %first, "failure recorded");
            }
            None => debug!("failure not attributable to an element"),
        }

        self.store.record_execution(ExecutionRecord {
            test_name: test_name.to_string(),
            timestamp: Utc::now(),
            success: false,
            duration_ms: duration.as_millis() as u64,
            failure_analysis: Some(analysis.clone()),
            environment: Environment::capture(page_url, &self.viewport),
        });
        self.persist();
    }

    /// Save the store and the report; errors are logged, not returned
    pub fn persist(&mut self) {
        if let Err(e) = self.store.save() {
            warn!(error = %e, location = %self.store.location(), "could not save knowledge base");
            return;
        }
        let report = self.learning_report();
        let written = serde_json::to_value(&report)
            .map_err(crate::VisionaryError::from)
            .and_then(|value| self.store.write_report(&value));
        if let Err(e) = written {
            warn!(error = %e, "could not write learning report");
        }
    }

    /// Aggregate view of the knowledge base
    #[must_use]
    pub fn learning_report(&self) -> LearningReport {
        let history = self.store.history();
        let passed = history.iter().filter(|h| h.success).count();
        let success_rate = if history.is_empty() {
            0.0
        } else {
            passed as f64 / history.len() as f64 * 100.0
        };

        let mut reliable: Vec<LearnedElementRecord> = self
            .store
            .records()
            .values()
            .filter(|r| r.success_rate > RELIABLE_RATE)
            .cloned()
            .collect();
        reliable.sort_by(|a, b| b.success_rate.total_cmp(&a.success_rate));
        reliable.truncate(MAX_RELIABLE_LISTED);

        let problematic = self.problematic_elements(None);

        let mut recommendations = Vec::new();
        if !history.is_empty() && success_rate < LOW_OVERALL_RATE {
            recommendations.push(
                "Overall success rate is low; review the stability of the selectors".to_string(),
            );
        }
        if problematic.len() > MANY_PROBLEMATIC {
            recommendations.push(
                "Many elements fail often; add data-testid attributes to critical elements"
                    .to_string(),
            );
        }

        LearningReport {
            report_id: uuid::Uuid::new_v4(),
            generated_at: Utc::now(),
            total_tests: history.len(),
            success_rate,
            most_reliable_selectors: reliable,
            problematic_elements: problematic,
            recommendations,
        }
    }

    /// Advice for pages whose URL contains `url_fragment`
    #[must_use]
    pub fn suggest_improvements(&self, url_fragment: &str) -> Vec<String> {
        let failures: Vec<&ExecutionRecord> = self
            .store
            .history()
            .iter()
            .filter(|h| !h.success && h.environment.url.contains(url_fragment))
            .collect();
        if failures.is_empty() {
            return Vec::new();
        }

        let mut suggestions = Vec::new();
        if has_hour_cluster(&failures) {
            suggestions.push(
                "Failures cluster at certain hours (UTC); consider longer timeouts or checking server load"
                    .to_string(),
            );
        }
        for element in self.problematic_elements(Some(url_fragment)) {
            suggestions.push(format!(
                "Element \"{}\" has a low success rate ({:.0}%); prefer more specific selectors or data-testid",
                element.name, element.success_rate
            ));
        }
        suggestions
    }

    fn problematic_elements(&self, url_fragment: Option<&str>) -> Vec<ProblematicElement> {
        self.store
            .records()
            .values()
            .filter(|r| r.success_rate < PROBLEMATIC_RATE)
            .filter(|r| url_fragment.map_or(true, |f| r.url.contains(f)))
            .map(|r| ProblematicElement {
                name: r.element_description.clone(),
                success_rate: r.success_rate,
                url: r.url.clone(),
            })
            .collect()
    }
}

fn enhance_element(element: &mut PageElementSpec, record: &LearnedElementRecord, max: usize) {
    let failed: HashSet<&str> = record.failed_selectors.iter().map(String::as_str).collect();
    let learned = record.working_selectors.iter().filter_map(|key| {
        let parsed = SelectorDescriptor::from_key(key);
        if parsed.is_none() {
            warn!(key = %key, element = %element.name, "skipping unparseable learned selector");
        }
        parsed
    });
    let authoritative = element
        .selectors
        .iter()
        .filter(|s| !failed.contains(s.key().as_str()))
        .cloned();

    let mut seen = HashSet::new();
    element.selectors = learned
        .chain(authoritative)
        .filter(|s| seen.insert(s.key()))
        .take(max)
        .collect();
    element.metadata = Some(LearningMetadata {
        confidence: record.success_rate,
        last_success: record.last_success,
        enhanced: true,
    });
}

fn has_hour_cluster(failures: &[&ExecutionRecord]) -> bool {
    let mut by_hour: BTreeMap<u32, usize> = BTreeMap::new();
    for failure in failures {
        *by_hour.entry(failure.timestamp.hour()).or_default() += 1;
    }
    let mean = failures.len() as f64 / by_hour.len().max(1) as f64;
    by_hour.values().any(|&n| n as f64 > mean * 2.0)
}
