//! `visionary run`

use super::{launch_driver, print_json, Context};
use crate::commands::{ReportFormat, RunArgs};
use crate::error::{CliError, CliResult};
use crate::output::render_run_report;
use std::path::Path;
use std::time::Duration;
use tracing::warn;
use visionary::config::VisionaryConfig;
use visionary::executor::{CommandArtifactGenerator, CommandExecutor};
use visionary::generator::{AssetGenerator, FileAssetGenerator};
use visionary::orchestrator::{Orchestrator, TestCase};
use visionary::suggest::FixSuggestionEngine;

/// Generate, execute and heal one test case
pub async fn run(ctx: &mut Context, args: &RunArgs) -> CliResult<()> {
    let case = TestCase::load(&args.case)?;

    let mut config = ctx.config.clone();
    if let Some(retries) = args.max_retries {
        config.healing.max_retries = retries;
    }
    if args.headed {
        config.browser.headless = false;
    }

    let generator = asset_generator(&config, args.assets.as_deref())?;
    let engine = suggestion_engine(&config, args.no_visual)?;
    let (artifacts, executor) = commands(&config)?;

    ctx.reporter.start_spinner(&format!("launching browser for {}", case.name));
    let driver = match launch_driver(&config.browser).await {
        Ok(driver) => driver,
        Err(e) => {
            ctx.reporter.finish();
            return Err(e);
        }
    };

    let mut orchestrator = Orchestrator::new(
        driver,
        generator,
        Box::new(artifacts),
        Box::new(executor),
        ctx.open_updater(),
    )
    .with_engine(engine)
    .with_max_retries(config.healing.max_retries)
    .with_apply_threshold(config.healing.apply_threshold)
    .with_navigation_timeout(config.browser.navigation_timeout())
    .with_assets_dir(config.healing.assets_dir.clone());

    ctx.reporter.finish();
    ctx.reporter.start_spinner(&format!("running {}", case.name));
    let outcome = orchestrator.run(&case).await;
    ctx.reporter.finish();

    if let Err(e) = orchestrator.shutdown().await {
        warn!(error = %e, "browser did not close cleanly");
    }
    let report = outcome?;

    match args.format {
        ReportFormat::Json => print_json(&report)?,
        ReportFormat::Text => print!("{}", render_run_report(&report, ctx.use_color())),
    }

    if report.success {
        ctx.reporter
            .success(&format!("{} passed after {} attempt(s)", case.name, report.attempts.len()));
        Ok(())
    } else {
        Err(CliError::TestFailed {
            name: case.name,
            attempts: report.attempts.len(),
        })
    }
}

fn asset_generator(
    config: &VisionaryConfig,
    assets: Option<&Path>,
) -> CliResult<Box<dyn AssetGenerator>> {
    if let Some(path) = assets {
        return Ok(Box::new(FileAssetGenerator::new(path)));
    }
    model_generator(config)
}

#[cfg(feature = "llm")]
fn model_generator(config: &VisionaryConfig) -> CliResult<Box<dyn AssetGenerator>> {
    use visionary::llm::{client_from_config, ChatAssetGenerator, Sampling};

    if config.llm.api_key().is_none() {
        warn!(env = %config.llm.api_key_env(), "no API key set, requests are unauthenticated");
    }
    let client = client_from_config(&config.llm)?;
    Ok(Box::new(
        ChatAssetGenerator::new(client).with_sampling(Sampling::from(&config.llm)),
    ))
}

#[cfg(not(feature = "llm"))]
fn model_generator(_config: &VisionaryConfig) -> CliResult<Box<dyn AssetGenerator>> {
    Err(CliError::FeatureDisabled { feature: "llm" })
}

#[cfg(feature = "llm")]
fn suggestion_engine(config: &VisionaryConfig, no_visual: bool) -> CliResult<FixSuggestionEngine> {
    use visionary::llm::{client_from_config, VisionLocator};
    use visionary::suggest::CachedVisualLocator;

    if no_visual {
        return Ok(FixSuggestionEngine::new());
    }
    let locator = CachedVisualLocator::new(VisionLocator::new(client_from_config(&config.llm)?));
    Ok(FixSuggestionEngine::new().with_visual(Box::new(locator)))
}

#[cfg(not(feature = "llm"))]
#[allow(clippy::unnecessary_wraps)]
fn suggestion_engine(_config: &VisionaryConfig, _no_visual: bool) -> CliResult<FixSuggestionEngine> {
    Ok(FixSuggestionEngine::new())
}

fn commands(config: &VisionaryConfig) -> CliResult<(CommandArtifactGenerator, CommandExecutor)> {
    let commands = &config.commands;
    let timeout = Duration::from_millis(config.healing.test_timeout_ms);

    let mut artifacts = CommandArtifactGenerator::new(commands.generate.as_slice())?
        .with_spec_dir(commands.spec_dir.clone())
        .with_page_dir(commands.page_dir.clone())
        .with_timeout(timeout);
    let mut executor = CommandExecutor::new(&commands.test)?.with_timeout(timeout);
    if let Some(dir) = &commands.workdir {
        artifacts = artifacts.with_workdir(dir.clone());
        executor = executor.with_workdir(dir.clone());
    }
    Ok((artifacts, executor))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_file_generator_is_used_with_assets() {
        let config = VisionaryConfig::default();
        assert!(asset_generator(&config, Some(Path::new("login.ai-assets.json"))).is_ok());
    }

    #[test]
    fn test_commands_from_default_config() {
        let config = VisionaryConfig::default();
        let (artifacts, _executor) = commands(&config).unwrap();
        let assets = visionary::TestAssets::from_json(
            r#"{"pageObject":{"className":"LoginPage","locators":[]},"testSteps":[]}"#,
        )
        .unwrap();
        let paths = artifacts.artifacts_for(&assets);
        assert!(paths.spec_path.ends_with("login-page.spec.ts"));
        assert!(paths.page_object_path.ends_with("LoginPage.ts"));
    }

    #[test]
    fn test_empty_test_command_is_rejected() {
        let mut config = VisionaryConfig::default();
        config.commands.test = "   ".to_string();
        assert!(commands(&config).is_err());
    }
}
