//! CLI command definitions using clap

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Visionary: generate, run and heal AI-authored end-to-end tests
#[derive(Parser, Debug)]
#[command(name = "visionary")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Configuration file (default: ./visionary.yaml when present)
    #[arg(long, global = true, env = "VISIONARY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate, run and heal the test for a test case
    Run(RunArgs),

    /// Classify a failed run's output and suggest fixes
    Analyze(AnalyzeArgs),

    /// Reorder an assets document's selectors from the knowledge base
    Enhance(EnhanceArgs),

    /// Resolve every element of an assets document against a live page
    Check(CheckArgs),

    /// Show the learning report
    Report(ReportArgs),

    /// Apply the retention policy to the knowledge base
    Prune(PruneArgs),

    /// Show the effective configuration
    Config(ConfigArgs),
}

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Test case file (`{ name, url, userStory }`)
    pub case: PathBuf,

    /// Use this assets document instead of asking the model
    #[arg(long)]
    pub assets: Option<PathBuf>,

    /// Healing retries after the first failure
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Skip visual lookup in the fix ladder
    #[arg(long)]
    pub no_visual: bool,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: ReportFormat,
}

/// Arguments for the analyze command
#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Raw test output (JSON reporter output or plain text)
    pub output: PathBuf,

    /// Assets document the failing test was generated from
    #[arg(long)]
    pub assets: PathBuf,

    /// Test name recorded in the analysis
    #[arg(long, default_value = "unnamed")]
    pub test_name: String,

    /// Page URL, required with --learn
    #[arg(long)]
    pub url: Option<String>,

    /// Record the failure in the knowledge base
    #[arg(long)]
    pub learn: bool,

    /// Patch the assets document with the best applicable fix
    #[arg(long)]
    pub apply: bool,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: ReportFormat,
}

/// Arguments for the enhance command
#[derive(Args, Debug)]
pub struct EnhanceArgs {
    /// Assets document to enhance
    pub assets: PathBuf,

    /// Page URL the knowledge is keyed on
    #[arg(long)]
    pub url: String,

    /// Output file (default: overwrite the input)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the check command
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Assets document to check
    pub assets: PathBuf,

    /// Page URL to open
    #[arg(long)]
    pub url: String,

    /// Record resolutions in the knowledge base
    #[arg(long)]
    pub learn: bool,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,
}

/// Arguments for the report command
#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Also list improvement hints for URLs containing this text
    #[arg(long)]
    pub url: Option<String>,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: ReportFormat,
}

/// Arguments for the prune command
#[derive(Args, Debug)]
pub struct PruneArgs {
    /// Drop records older than this many days
    #[arg(long)]
    pub max_age_days: Option<u32>,

    /// Keep at most this many history entries
    #[arg(long)]
    pub max_history: Option<usize>,
}

/// Arguments for the config command
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Only validate, print nothing
    #[arg(long)]
    pub check: bool,
}

/// Report output format
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReportFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON
    Json,
}

/// Color argument
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}
