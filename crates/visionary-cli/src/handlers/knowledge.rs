//! Knowledge-base commands: `enhance`, `report`, `prune`, `config`

use super::{print_json, Context};
use crate::commands::{ConfigArgs, EnhanceArgs, PruneArgs, ReportArgs, ReportFormat};
use crate::error::CliResult;
use crate::output::{render_learning_report, render_prune_stats};
use serde_json::json;
use visionary::repair::save_assets;
use visionary::schema::TestAssets;

/// Reorder an assets document's candidates from what the store learned
pub fn enhance(ctx: &Context, args: &EnhanceArgs) -> CliResult<()> {
    let assets = TestAssets::load(&args.assets)?;
    let updater = ctx.open_updater();
    let enhanced = updater.enhance(&assets, &args.url);

    let target = args.output.as_deref().unwrap_or(&args.assets);
    save_assets(&enhanced, target)?;

    let learned = enhanced
        .elements()
        .filter(|e| e.metadata.is_some())
        .count();
    ctx.reporter.success(&format!(
        "{} written, {learned} of {} element(s) had knowledge",
        target.display(),
        enhanced.elements().count()
    ));
    Ok(())
}

/// Print the learning report, plus hints for one URL when asked
pub fn report(ctx: &Context, args: &ReportArgs) -> CliResult<()> {
    let updater = ctx.open_updater();
    let report = updater.learning_report();
    let hints = args
        .url
        .as_deref()
        .map(|url| updater.suggest_improvements(url))
        .unwrap_or_default();

    match args.format {
        ReportFormat::Json => print_json(&json!({
            "report": report,
            "improvements": hints,
        })),
        ReportFormat::Text => {
            print!("{}", render_learning_report(&report, &hints, ctx.use_color()));
            Ok(())
        }
    }
}

/// Apply the configured retention policy, with command-line overrides
pub fn prune(ctx: &Context, args: &PruneArgs) -> CliResult<()> {
    let mut policy = ctx.config.knowledge.retention;
    if let Some(days) = args.max_age_days {
        policy.max_record_age_days = days;
    }
    if let Some(max) = args.max_history {
        policy.max_history = max;
    }

    let mut store = ctx.open_store();
    let stats = store.prune(policy)?;
    ctx.reporter
        .success(&format!("{}: {}", store.location(), render_prune_stats(&stats)));
    Ok(())
}

/// Print or just validate the effective configuration
pub fn show_config(ctx: &Context, args: &ConfigArgs) -> CliResult<()> {
    if args.check {
        ctx.reporter.success("configuration is valid");
        return Ok(());
    }
    print!("{}", ctx.config.to_yaml()?);
    Ok(())
}
