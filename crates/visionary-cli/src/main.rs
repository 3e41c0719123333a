//! Visionary CLI: self-healing end-to-end tests from user stories
//!
//! ## Usage
//!
//! ```bash
//! visionary run cases/login.json            # generate, run and heal
//! visionary analyze out.json --assets a.json # classify a recorded failure
//! visionary check a.json --url https://...   # resolve elements on a live page
//! visionary report --url /login              # learning report
//! ```

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use visionary::VisionaryConfig;
use visionary_cli::handlers::{self, Context};
use visionary_cli::{
    Cli, CliConfig, CliError, CliResult, ColorChoice, Commands, ProgressReporter, Verbosity,
};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let config = build_config(&cli);
    init_logging(config.verbosity);

    let mut ctx = Context {
        config: VisionaryConfig::load(config.config_path.as_deref())?,
        reporter: ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet()),
    };

    match cli.command {
        Commands::Run(args) => block_on(handlers::run(&mut ctx, &args)),
        Commands::Analyze(args) => block_on(handlers::analyze(&ctx, &args)),
        Commands::Check(args) => block_on(handlers::check(&mut ctx, &args)),
        Commands::Enhance(args) => handlers::enhance(&ctx, &args),
        Commands::Report(args) => handlers::report(&ctx, &args),
        Commands::Prune(args) => handlers::prune(&ctx, &args),
        Commands::Config(args) => handlers::show_config(&ctx, &args),
    }
}

fn build_config(cli: &Cli) -> CliConfig {
    CliConfig::new()
        .with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
        .with_color(ColorChoice::from(cli.color.clone()))
        .with_config_path(cli.config.clone())
}

fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn block_on<F>(future: F) -> CliResult<()>
where
    F: std::future::Future<Output = CliResult<()>>,
{
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::config(format!("Failed to create runtime: {e}")))?;
    rt.block_on(future)
}
