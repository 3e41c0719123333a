//! Visionary CLI Library
//!
//! Command-line interface over the visionary crate: run a test case through
//! generation and healing, analyze recorded failures, and maintain the
//! knowledge base.

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::format_push_string)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod config;
mod error;
pub mod handlers;
mod output;

pub use commands::{
    AnalyzeArgs, CheckArgs, Cli, ColorArg, Commands, ConfigArgs, EnhanceArgs, PruneArgs,
    ReportArgs, ReportFormat, RunArgs,
};
pub use config::{CliConfig, ColorChoice, Verbosity};
pub use error::{CliError, CliResult};
pub use output::{
    render_failure_analysis, render_learning_report, render_prune_stats, render_run_report,
    ProgressReporter,
};
