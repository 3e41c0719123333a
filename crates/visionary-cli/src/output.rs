//! Output formatting and progress reporting

use console::{style, Style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt::Write as _;
use std::time::Duration;
use visionary::classifier::FailureAnalysis;
use visionary::learning::LearningReport;
use visionary::orchestrator::RunReport;
use visionary::store::PruneStats;

/// Status reporter writing to stderr
#[derive(Debug)]
pub struct ProgressReporter {
    term: Term,
    spinner: Option<ProgressBar>,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl ProgressReporter {
    /// Create a new progress reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            spinner: None,
            use_color,
            quiet,
        }
    }

    /// Start a spinner for a long-running step
    pub fn start_spinner(&mut self, message: &str) {
        if self.quiet || !self.term.is_term() {
            return;
        }

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(120));
        self.spinner = Some(pb);
    }

    /// Stop the spinner
    pub fn finish(&mut self) {
        if let Some(pb) = self.spinner.take() {
            pb.finish_and_clear();
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if self.quiet {
            return;
        }
        let prefix = if self.use_color {
            style("✓").green().bold().to_string()
        } else {
            "PASS".to_string()
        };
        let _ = self.term.write_line(&format!("{prefix} {message}"));
    }

    /// Print a failure message
    pub fn failure(&self, message: &str) {
        // Failures print even in quiet mode
        let prefix = if self.use_color {
            style("✗").red().bold().to_string()
        } else {
            "FAIL".to_string()
        };
        let _ = self.term.write_line(&format!("{prefix} {message}"));
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.quiet {
            return;
        }
        let prefix = if self.use_color {
            style("⚠").yellow().bold().to_string()
        } else {
            "WARN".to_string()
        };
        let _ = self.term.write_line(&format!("{prefix} {message}"));
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.quiet {
            return;
        }
        let prefix = if self.use_color {
            style("ℹ").blue().bold().to_string()
        } else {
            "INFO".to_string()
        };
        let _ = self.term.write_line(&format!("{prefix} {message}"));
    }
}

// =============================================================================
// RENDERERS
// =============================================================================

fn heading(title: &str, use_color: bool) -> String {
    if use_color {
        style(title).bold().underlined().to_string()
    } else {
        format!("=== {title} ===")
    }
}

fn verdict(success: bool, use_color: bool) -> String {
    match (success, use_color) {
        (true, true) => Style::new().green().bold().apply_to("PASSED").to_string(),
        (false, true) => Style::new().red().bold().apply_to("FAILED").to_string(),
        (true, false) => "PASSED".to_string(),
        (false, false) => "FAILED".to_string(),
    }
}

/// Human-readable failure analysis
#[must_use]
pub fn render_failure_analysis(analysis: &FailureAnalysis, use_color: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", heading("Failure analysis", use_color));
    let _ = writeln!(out, "test:     {}", analysis.test_name);
    let _ = writeln!(out, "type:     {}", analysis.failure_type);
    let _ = writeln!(out, "step:     {}", analysis.failed_step);
    if let Some(element) = &analysis.failed_element {
        let _ = writeln!(out, "element:  {element}");
    }
    if analysis.viewport_issue {
        let _ = writeln!(out, "viewport: element outside the viewport");
    }
    let _ = writeln!(out, "error:    {}", analysis.error_message);

    if analysis.suggested_fixes.is_empty() {
        let _ = writeln!(out, "no fixes suggested");
    } else {
        let _ = writeln!(out, "suggested fixes:");
        for (i, fix) in analysis.suggested_fixes.iter().enumerate() {
            let auto = if fix.directive.is_some() { " [auto]" } else { "" };
            let _ = writeln!(
                out,
                "  {}. ({:.0}%) {}{auto}",
                i + 1,
                fix.confidence * 100.0,
                fix.description
            );
        }
    }
    out
}

/// Human-readable run report
#[must_use]
pub fn render_run_report(report: &RunReport, use_color: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", heading(&format!("Run {}", report.test_name), use_color));
    let _ = writeln!(out, "url:    {}", report.url);
    let _ = writeln!(out, "assets: {}", report.assets_path.display());
    let _ = writeln!(out, "spec:   {}", report.artifacts.spec_path.display());
    for attempt in &report.attempts {
        let status = if attempt.success { "passed" } else { "failed" };
        let _ = write!(
            out,
            "attempt {}: {status} in {}ms",
            attempt.attempt, attempt.duration_ms
        );
        if let Some(analysis) = &attempt.analysis {
            let _ = write!(out, " ({} at {})", analysis.failure_type, analysis.failed_step);
        }
        let _ = writeln!(out);
        if let Some(fix) = &attempt.applied_fix {
            let _ = writeln!(out, "  applied: {}", fix.description);
        }
    }
    let _ = writeln!(
        out,
        "{} after {} attempt(s)",
        verdict(report.success, use_color),
        report.attempts.len()
    );
    if let Some(analysis) = report.final_analysis() {
        let _ = writeln!(out);
        out.push_str(&render_failure_analysis(analysis, use_color));
    }
    out
}

/// Human-readable learning report with optional improvement hints
#[must_use]
pub fn render_learning_report(report: &LearningReport, hints: &[String], use_color: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", heading("Learning report", use_color));
    let _ = writeln!(out, "executions:   {}", report.total_tests);
    let _ = writeln!(out, "success rate: {:.1}%", report.success_rate);

    if !report.most_reliable_selectors.is_empty() {
        let _ = writeln!(out, "most reliable:");
        for record in &report.most_reliable_selectors {
            let best = record
                .working_selectors
                .first()
                .map_or("-", String::as_str);
            let _ = writeln!(
                out,
                "  {} ({:.1}%) {best}",
                record.element_description, record.success_rate
            );
        }
    }
    if !report.problematic_elements.is_empty() {
        let _ = writeln!(out, "problematic:");
        for element in &report.problematic_elements {
            let _ = writeln!(
                out,
                "  {} ({:.1}%) on {}",
                element.name, element.success_rate, element.url
            );
        }
    }
    if !report.recommendations.is_empty() {
        let _ = writeln!(out, "recommendations:");
        for rec in &report.recommendations {
            let _ = writeln!(out, "  - {rec}");
        }
    }
    if !hints.is_empty() {
        let _ = writeln!(out, "improvements:");
        for hint in hints {
            let _ = writeln!(out, "  - {hint}");
        }
    }
    out
}

/// One-line prune summary
#[must_use]
pub fn render_prune_stats(stats: &PruneStats) -> String {
    format!(
        "removed {} record(s), trimmed {} selector(s), dropped {} history entr{}",
        stats.records_removed,
        stats.selectors_trimmed,
        stats.history_removed,
        if stats.history_removed == 1 { "y" } else { "ies" }
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use visionary::classifier::FailureType;
    use visionary::suggest::{FixKind, SuggestedFix};

    fn locator_failure() -> FailureAnalysis {
        FailureAnalysis {
            test_name: "login".to_string(),
            failure_type: FailureType::Selector,
            failed_step: "clickLoginButton".to_string(),
            failed_element: Some("loginButton".to_string()),
            error_message: "locator resolved to 0 elements".to_string(),
            viewport_issue: false,
            suggested_fixes: vec![
                SuggestedFix {
                    kind: FixKind::Selector,
                    description: "Move the failing selector to the back".to_string(),
                    directive: None,
                    confidence: 0.95,
                },
                SuggestedFix::retry(),
            ],
        }
    }

    mod progress_reporter_tests {
        use super::*;

        #[test]
        fn test_new_reporter() {
            let reporter = ProgressReporter::new(true, false);
            assert!(reporter.use_color);
            assert!(!reporter.quiet);
        }

        #[test]
        fn test_quiet_spinner_is_not_started() {
            let mut reporter = ProgressReporter::new(false, true);
            reporter.start_spinner("working");
            assert!(reporter.spinner.is_none());
            reporter.finish();
        }

        #[test]
        fn test_messages_do_not_panic() {
            let reporter = ProgressReporter::new(false, false);
            reporter.success("ok");
            reporter.failure("bad");
            reporter.warning("careful");
            reporter.info("note");
        }
    }

    mod render_tests {
        use super::*;

        #[test]
        fn test_failure_analysis_lists_fixes_in_order() {
            let text = render_failure_analysis(&locator_failure(), false);
            assert!(text.starts_with("=== Failure analysis ==="));
            assert!(text.contains("type:     selector"));
            assert!(text.contains("element:  loginButton"));
            let first = text.find("1. (95%)").unwrap();
            let second = text.find("2. (30%)").unwrap();
            assert!(first < second);
        }

        #[test]
        fn test_failure_analysis_without_fixes() {
            let mut analysis = locator_failure();
            analysis.suggested_fixes.clear();
            analysis.failed_element = None;
            let text = render_failure_analysis(&analysis, false);
            assert!(text.contains("no fixes suggested"));
            assert!(!text.contains("element:"));
        }

        #[test]
        fn test_prune_stats_pluralisation() {
            let one = PruneStats {
                records_removed: 2,
                selectors_trimmed: 0,
                history_removed: 1,
            };
            assert!(render_prune_stats(&one).ends_with("1 history entry"));
            assert!(render_prune_stats(&PruneStats::default()).ends_with("0 history entries"));
        }

        #[test]
        fn test_verdict_without_color() {
            assert_eq!(verdict(true, false), "PASSED");
            assert_eq!(verdict(false, false), "FAILED");
        }
    }
}
