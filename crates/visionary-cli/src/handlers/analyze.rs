//! `visionary analyze`

use super::{print_json, Context};
use crate::commands::{AnalyzeArgs, ReportFormat};
use crate::error::{CliError, CliResult};
use crate::output::render_failure_analysis;
use std::time::Duration;
use visionary::classifier::FailureClassifier;
use visionary::repair::{apply_fix, save_assets};
use visionary::schema::TestAssets;
use visionary::suggest::{FailureContext, FixSuggestionEngine};

/// Classify recorded test output, rank fixes, and optionally learn and patch
pub async fn analyze(ctx: &Context, args: &AnalyzeArgs) -> CliResult<()> {
    if args.learn && args.url.is_none() {
        return Err(CliError::invalid_argument("--learn requires --url"));
    }

    let raw = std::fs::read_to_string(&args.output)?;
    let mut assets = TestAssets::load(&args.assets)?;

    let mut analysis = FailureClassifier::new().classify(&args.test_name, &raw);
    analysis.attribute(&assets);
    let page_url = args.url.as_deref().unwrap_or_default();
    let context = FailureContext::from_analysis(&analysis, &assets, page_url);
    analysis.suggested_fixes = FixSuggestionEngine::new().suggest(&context).await;

    if let Some(url) = &args.url {
        if args.learn {
            let mut updater = ctx.open_updater();
            updater.learn_from_failure(&args.test_name, &analysis, &assets, url, Duration::ZERO);
            ctx.reporter.info(&format!(
                "failure recorded in {}",
                updater.store().location()
            ));
        }
    }

    match args.format {
        ReportFormat::Json => print_json(&analysis)?,
        ReportFormat::Text => print!("{}", render_failure_analysis(&analysis, ctx.use_color())),
    }

    if args.apply {
        let threshold = ctx.config.healing.apply_threshold;
        if apply_fix(&mut assets, &analysis, threshold) {
            save_assets(&assets, &args.assets)?;
            ctx.reporter
                .success(&format!("patched {}", args.assets.display()));
        } else {
            ctx.reporter.warning(&format!(
                "no fix at or above {threshold:.2} confidence could be applied"
            ));
        }
    }
    Ok(())
}
