//! Failure classification of raw test-run output.
//!
//! [`FailureClassifier::classify`] is total: structured JSON reports, bare
//! error text and garbage all yield a [`FailureAnalysis`].

use crate::schema::TestAssets;
use crate::suggest::{strip_action_verb, SuggestedFix};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Sentinel for a step that could not be extracted
pub const UNKNOWN_STEP: &str = "Unknown step";

/// Broad failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureType {
    /// No candidate located the element, or locating was ambiguous
    Selector,
    /// A wait expired or the element was not actionable in time
    Timing,
    /// An assertion failed
    Validation,
    /// Page navigation failed
    Navigation,
    /// Nothing recognisable
    #[default]
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Selector => "selector",
            Self::Timing => "timing",
            Self::Validation => "validation",
            Self::Navigation => "navigation",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Result of analysing one failed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureAnalysis {
    /// Test name
    pub test_name: String,
    /// Category
    pub failure_type: FailureType,
    /// Page-object method that failed, or [`UNKNOWN_STEP`]
    pub failed_step: String,
    /// Element the failed step acts on, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_element: Option<String>,
    /// Error message
    pub error_message: String,
    /// Error text mentions the element being outside the viewport
    #[serde(default)]
    pub viewport_issue: bool,
    /// Fix proposals, highest confidence first
    #[serde(default)]
    pub suggested_fixes: Vec<SuggestedFix>,
}

impl FailureAnalysis {
    /// Whether a step was extracted
    #[must_use]
    pub fn has_step(&self) -> bool {
        self.failed_step != UNKNOWN_STEP
    }

    /// Fill `failed_element` from the assets document.
    ///
    /// The step's `element`, else its `waitFor` target, wins; otherwise the method name minus its
    /// action verb is used if the document has such an element.
    pub fn attribute(&mut self, assets: &TestAssets) {
        if self.failed_element.is_some() || !self.has_step() {
            return;
        }
        self.failed_element = assets
            .element_for_step(&self.failed_step)
            .map(str::to_string)
            .or_else(|| {
                strip_action_verb(&self.failed_step).filter(|name| assets.element(name).is_some())
            });
    }

    /// Highest-confidence fix
    #[must_use]
    pub fn best_fix(&self) -> Option<&SuggestedFix> {
        self.suggested_fixes.first()
    }
}

struct Patterns {
    page_frame: Regex,
    awaited_call: Regex,
    any_frame: Regex,
    ambiguity: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                page_frame: Regex::new(r"at \w+Page\.(\w+)").ok()?,
                awaited_call: Regex::new(r"await \w+\.(\w+)\(").ok()?,
                any_frame: Regex::new(r"at \w+\.(\w+)\s").ok()?,
                ambiguity: Regex::new(
                    r"Selector (?:matched \d+ elements for|encontró \d+ elementos para) ",
                )
                .ok()?,
            })
        })
        .as_ref()
}

/// Classifier over raw run output
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureClassifier;

impl FailureClassifier {
    /// Create a classifier
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Classify raw output from the test executor
    pub fn classify(&self, test_name: &str, raw: &str) -> FailureAnalysis {
        let (message, stack) = match serde_json::from_str::<Value>(raw) {
            Ok(report) => match first_result_error(&report) {
                Some(found) => found,
                None => {
                    warn!("report carried no test error, classifying raw output");
                    (raw.to_string(), raw.to_string())
                }
            },
            Err(_) => {
                debug!("output is not a JSON report, classifying raw text");
                (raw.to_string(), raw.to_string())
            }
        };

        let mut failure_type = categorize(&message);
        if is_ambiguous(raw) {
            failure_type = FailureType::Selector;
        }

        FailureAnalysis {
            test_name: test_name.to_string(),
            failure_type,
            failed_step: extract_failed_step(&stack, raw),
            failed_element: None,
            viewport_issue: message.to_lowercase().contains("outside of the viewport"),
            error_message: message,
            suggested_fixes: Vec::new(),
        }
    }
}

/// Category of an error message; first matching rule wins
#[must_use]
pub fn categorize(message: &str) -> FailureType {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["outside of the viewport", "timeout", "waiting for"]) {
        FailureType::Timing
    } else if has(&["locator", "selector", "element not found"]) {
        FailureType::Selector
    } else if has(&["expect", "assertion"]) {
        FailureType::Validation
    } else if has(&["navigation", "goto"]) {
        FailureType::Navigation
    } else {
        FailureType::Unknown
    }
}

fn is_ambiguous(raw: &str) -> bool {
    patterns().is_some_and(|p| p.ambiguity.is_match(raw))
}

fn extract_failed_step(stack: &str, raw: &str) -> String {
    let Some(p) = patterns() else {
        return UNKNOWN_STEP.to_string();
    };
    let capture = |re: &Regex, text: &str| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    };

    capture(&p.page_frame, stack)
        .or_else(|| capture(&p.awaited_call, stack))
        .or_else(|| capture(&p.awaited_call, raw))
        .or_else(|| capture(&p.any_frame, stack))
        .unwrap_or_else(|| UNKNOWN_STEP.to_string())
}

/// First `results[*].error` of the report, depth-first through nested suites
fn first_result_error(report: &Value) -> Option<(String, String)> {
    walk_suites(report.get("suites")?)
}

fn walk_suites(suites: &Value) -> Option<(String, String)> {
    for suite in suites.as_array()? {
        if let Some(found) = suite.get("suites").and_then(walk_suites) {
            return Some(found);
        }
        for spec in array(suite, "specs") {
            for test in array(spec, "tests") {
                for result in array(test, "results") {
                    let Some(message) = result.pointer("/error/message").and_then(Value::as_str)
                    else {
                        continue;
                    };
                    let stack = result
                        .pointer("/error/stack")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    return Some((message.to_string(), stack.to_string()));
                }
            }
        }
    }
    None
}

fn array<'v>(value: &'v Value, field: &str) -> impl Iterator<Item = &'v Value> {
    value
        .get(field)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ambiguity_marker;
    use crate::schema::fixtures::login_assets;
    use proptest::prelude::*;

    fn report(message: &str, stack: &str) -> String {
        serde_json::json!({
            "suites": [{
                "title": "login.spec.ts",
                "suites": [{
                    "title": "Login",
                    "specs": [{
                        "title": "logs in",
                        "tests": [{ "results": [
                            { "status": "failed", "error": { "message": message, "stack": stack } }
                        ]}]
                    }]
                }]
            }]
        })
        .to_string()
    }

    mod categorize_tests {
        use super::*;

        #[test]
        fn test_rules_in_order() {
            assert_eq!(categorize("Timeout 30000ms exceeded"), FailureType::Timing);
            assert_eq!(categorize("waiting for locator('#a')"), FailureType::Timing);
            assert_eq!(categorize("Locator resolved to hidden"), FailureType::Selector);
            assert_eq!(categorize("element not found"), FailureType::Selector);
            assert_eq!(categorize("expect(received).toBe(expected)"), FailureType::Validation);
            assert_eq!(categorize("page.goto: net::ERR_NAME"), FailureType::Navigation);
            assert_eq!(categorize("kaboom"), FailureType::Unknown);
        }

        #[test]
        fn test_viewport_is_timing_even_with_locator() {
            let msg = "locator.click: element is outside of the viewport";
            assert_eq!(categorize(msg), FailureType::Timing);
        }

        #[test]
        fn test_case_insensitive() {
            assert_eq!(categorize("TIMEOUT"), FailureType::Timing);
        }
    }

    mod classify_tests {
        use super::*;

        #[test]
        fn test_structured_report_timing() {
            let raw = report(
                "Timeout 30000ms exceeded while waiting for element",
                "Error: Timeout\n    at LoginPage.clickSubmit (/app/pages/LoginPage.ts:45:21)\n    at /app/tests/login.spec.ts:12:5",
            );
            let analysis = FailureClassifier::new().classify("login.spec.ts", &raw);
            assert_eq!(analysis.failure_type, FailureType::Timing);
            assert_eq!(analysis.failed_step, "clickSubmit");
            assert!(analysis.error_message.starts_with("Timeout 30000ms"));
            assert!(analysis.suggested_fixes.is_empty());
        }

        #[test]
        fn test_page_frame_preferred_over_earlier_frame() {
            let raw = "Error: locator not found\n    at Locator.click (lib/locator.js:1:1)\n    at LoginPage.clickLoginButton (pages/LoginPage.ts:3:3)\n";
            let analysis = FailureClassifier::new().classify("t", raw);
            assert_eq!(analysis.failed_step, "clickLoginButton");
            assert_eq!(analysis.failure_type, FailureType::Selector);
        }

        #[test]
        fn test_bare_page_frame_is_not_a_page_object() {
            let raw = "TimeoutError: waiting for selector\n    at Page.waitForSelector (node_modules/playwright-core/lib/client/page.js:1:1)\n    at LoginPage.clickSubmit (pages/LoginPage.ts:9:3)\n";
            let analysis = FailureClassifier::new().classify("t", raw);
            assert_eq!(analysis.failed_step, "clickSubmit");
        }

        #[test]
        fn test_awaited_call_fallback() {
            let raw = "Error: expect failed\n  > 12 | await loginPage.fillEmailInput('x');";
            let analysis = FailureClassifier::new().classify("t", raw);
            assert_eq!(analysis.failed_step, "fillEmailInput");
            assert_eq!(analysis.failure_type, FailureType::Validation);
        }

        #[test]
        fn test_any_frame_fallback() {
            let raw = "Error: goto failed\n    at Helper.openHome (helper.ts:1:1)";
            assert_eq!(FailureClassifier::new().classify("t", raw).failed_step, "openHome");
        }

        #[test]
        fn test_unknown_step_sentinel() {
            let analysis = FailureClassifier::new().classify("t", "it broke");
            assert_eq!(analysis.failed_step, UNKNOWN_STEP);
            assert!(!analysis.has_step());
            assert_eq!(analysis.failure_type, FailureType::Unknown);
        }

        #[test]
        fn test_json_without_error_uses_raw() {
            let raw = r#"{"suites":[],"stats":{"expected":1}}"#;
            let analysis = FailureClassifier::new().classify("t", raw);
            assert_eq!(analysis.error_message, raw);
        }

        #[test]
        fn test_ambiguity_marker_forces_selector() {
            let raw = format!(
                "{}\nTimeout 5000ms exceeded",
                ambiguity_marker(3, "submit Button")
            );
            let analysis = FailureClassifier::new().classify("t", &raw);
            assert_eq!(analysis.failure_type, FailureType::Selector);
        }

        #[test]
        fn test_legacy_ambiguity_marker_forces_selector() {
            let raw = "Selector encontró 2 elementos para login Button\nexpect(received)";
            let analysis = FailureClassifier::new().classify("t", raw);
            assert_eq!(analysis.failure_type, FailureType::Selector);
        }

        #[test]
        fn test_viewport_flag() {
            let raw = "locator.click: Element is outside of the viewport";
            let analysis = FailureClassifier::new().classify("t", raw);
            assert!(analysis.viewport_issue);
            assert_eq!(analysis.failure_type, FailureType::Timing);
        }
    }

    mod attribute_tests {
        use super::*;

        #[test]
        fn test_explicit_step_element() {
            let mut analysis = FailureClassifier::new().classify(
                "t",
                "Timeout\n    at LoginPage.fillEmailInput (LoginPage.ts:1:1)",
            );
            analysis.attribute(&login_assets());
            assert_eq!(analysis.failed_element.as_deref(), Some("emailInput"));
        }

        #[test]
        fn test_verb_strip_shim() {
            let mut analysis = FailureClassifier::new().classify(
                "t",
                "locator failed\n    at LoginPage.clickLoginButton (LoginPage.ts:1:1)",
            );
            analysis.attribute(&login_assets());
            assert_eq!(analysis.failed_element.as_deref(), Some("loginButton"));
        }

        #[test]
        fn test_wait_for_target_names_element() {
            let mut assets = login_assets();
            assets.test_steps.push(
                crate::schema::TestStep::new("submitLogin").with_wait_for("loginButton", "enabled"),
            );
            let mut analysis = FailureClassifier::new().classify(
                "t",
                "Timeout\n    at LoginPage.submitLogin (LoginPage.ts:1:1)",
            );
            analysis.attribute(&assets);
            assert_eq!(analysis.failed_element.as_deref(), Some("loginButton"));
        }

        #[test]
        fn test_unknown_element_left_empty() {
            let mut analysis = FailureClassifier::new().classify(
                "t",
                "locator failed\n    at LoginPage.clickForgotLink (LoginPage.ts:1:1)",
            );
            analysis.attribute(&login_assets());
            assert!(analysis.failed_element.is_none());
        }
    }

    proptest! {
        #[test]
        fn prop_classify_is_total(raw in ".*") {
            let analysis = FailureClassifier::new().classify("prop", &raw);
            prop_assert!(!analysis.failed_step.is_empty());
            prop_assert!(analysis.suggested_fixes.is_empty());
        }

        #[test]
        fn prop_classify_total_on_json_shapes(msg in "[a-zA-Z ]{0,40}", depth in 0usize..4) {
            let mut value = serde_json::json!({ "error": { "message": msg } });
            for _ in 0..depth {
                value = serde_json::json!({ "suites": [value] });
            }
            let _ = FailureClassifier::new().classify("prop", &value.to_string());
        }
    }
}
