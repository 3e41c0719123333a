//! Visionary: self-healing end-to-end tests generated from user stories
//!
//! A vision model turns a screenshot and a user story into page objects with
//! several candidate selectors per element. Visionary keeps those candidates
//! alive: it learns which selectors work per page, reorders candidates before
//! each run, classifies failures, and patches the assets before retrying.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      VISIONARY Architecture                       │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐   ┌──────────┐ │
//! │  │ Asset      │   │ Knowledge  │   │ Test       │   │ Failure  │ │
//! │  │ Generator  │──►│ Updater    │──►│ Executor   │──►│Classifier│ │
//! │  │ (LLM)      │   │ (enhance)  │   │ (command)  │   │          │ │
//! │  └────────────┘   └─────▲──────┘   └────────────┘   └────┬─────┘ │
//! │                         │                                ▼       │
//! │                   ┌─────┴──────┐                  ┌──────────┐   │
//! │                   │ Selector   │◄─────────────────│ Fix      │   │
//! │                   │ Store      │   learn          │ Engine   │   │
//! │                   └────────────┘                  └──────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

/// Chromium over CDP (feature `browser`)
#[cfg(feature = "browser")]
pub mod browser;
pub mod classifier;
pub mod config;
pub mod driver;
pub mod executor;
pub mod generator;
pub mod learning;
/// OpenAI-compatible collaborators (feature `llm`)
#[cfg(feature = "llm")]
pub mod llm;
pub mod orchestrator;
pub mod repair;
pub mod resolver;
mod result;
pub mod schema;
pub mod selector;
pub mod store;
pub mod suggest;

#[cfg(feature = "browser")]
pub use browser::ChromiumDriver;
pub use classifier::{FailureAnalysis, FailureClassifier, FailureType};
pub use config::VisionaryConfig;
pub use driver::{BrowserDriver, MockDriver, Screenshot};
pub use executor::{
    ArtifactGenerator, CommandArtifactGenerator, CommandExecutor, ExecutionOutcome,
    GeneratedArtifacts, TestExecutor,
};
pub use generator::{AssetGenerator, FileAssetGenerator};
pub use learning::{KnowledgeUpdater, LearningReport};
pub use orchestrator::{Orchestrator, RunReport, TestCase, UserStory};
pub use resolver::{ElementResolver, ResolvedElement, ResolverConfig};
pub use result::{VisionaryError, VisionaryResult};
pub use schema::{PageElementSpec, TestAssets, TestStep};
pub use selector::{SelectorDescriptor, SelectorKind};
pub use store::{
    JsonFileBackend, KnowledgeBackend, LearnedElementRecord, MemoryBackend, RetentionPolicy,
    SelectorCandidateStore,
};
pub use suggest::{FixSuggestionEngine, SuggestedFix, VisualLocator};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::classifier::*;
    pub use super::driver::*;
    pub use super::executor::*;
    pub use super::generator::*;
    pub use super::learning::*;
    pub use super::orchestrator::*;
    pub use super::resolver::*;
    pub use super::result::*;
    pub use super::schema::*;
    pub use super::selector::*;
    pub use super::store::*;
    pub use super::suggest::*;
}
