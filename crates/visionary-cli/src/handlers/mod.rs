//! Command handlers

mod analyze;
mod check;
mod knowledge;
mod run;

pub use analyze::analyze;
pub use check::check;
pub use knowledge::{enhance, prune, report, show_config};
pub use run::run;

use crate::error::CliResult;
use crate::output::ProgressReporter;
use serde::Serialize;
use visionary::config::{BrowserConfig, VisionaryConfig};
use visionary::driver::BrowserDriver;
use visionary::learning::KnowledgeUpdater;
use visionary::store::{JsonFileBackend, SelectorCandidateStore};

/// State shared by every handler
#[derive(Debug)]
pub struct Context {
    /// Effective library configuration
    pub config: VisionaryConfig,
    /// Status output
    pub reporter: ProgressReporter,
}

impl Context {
    /// Whether rendered reports use color
    #[must_use]
    pub const fn use_color(&self) -> bool {
        self.reporter.use_color
    }

    /// Store over the configured knowledge directory
    #[must_use]
    pub fn open_store(&self) -> SelectorCandidateStore {
        let knowledge = &self.config.knowledge;
        let backend =
            JsonFileBackend::new(knowledge.dir.clone()).with_lock_options(knowledge.lock_options());
        SelectorCandidateStore::load(Box::new(backend)).with_retention(knowledge.retention)
    }

    /// Updater over [`Self::open_store`]
    #[must_use]
    pub fn open_updater(&self) -> KnowledgeUpdater {
        KnowledgeUpdater::new(self.open_store())
            .with_max_candidates(self.config.healing.max_candidates)
            .with_viewport(self.config.browser.viewport())
    }
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(feature = "browser")]
async fn launch_driver(config: &BrowserConfig) -> CliResult<Box<dyn BrowserDriver>> {
    Ok(Box::new(visionary::ChromiumDriver::launch(config).await?))
}

#[cfg(not(feature = "browser"))]
#[allow(clippy::unused_async)]
async fn launch_driver(_config: &BrowserConfig) -> CliResult<Box<dyn BrowserDriver>> {
    Err(crate::error::CliError::FeatureDisabled { feature: "browser" })
}
