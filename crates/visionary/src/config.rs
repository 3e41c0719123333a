//! Runtime configuration: `visionary.yaml` plus `VISIONARY_*` overrides.
//!
//! Every section has defaults, so an empty file (or none at all) is a valid
//! configuration. Timeouts are cross-checked on load.

use crate::executor::{
    DEFAULT_PAGE_DIR, DEFAULT_POM_COMMAND, DEFAULT_SPEC_COMMAND, DEFAULT_SPEC_DIR,
    DEFAULT_TEST_COMMAND, DEFAULT_TEST_TIMEOUT_MS,
};
use crate::learning::DEFAULT_MAX_CANDIDATES;
use crate::orchestrator::{DEFAULT_MAX_RETRIES, DEFAULT_NAVIGATION_TIMEOUT_MS};
use crate::repair::DEFAULT_APPLY_THRESHOLD;
use crate::resolver::ResolverConfig;
use crate::result::{VisionaryError, VisionaryResult};
use crate::store::{LockOptions, RetentionPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// File looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "visionary.yaml";

/// Knowledge base location and upkeep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct KnowledgeConfig {
    /// Directory holding `selectors.json` and `history.json`
    pub dir: PathBuf,
    /// Pruning applied on every save
    pub retention: RetentionPolicy,
    /// Lock acquisition attempts
    pub lock_attempts: u32,
    /// Age (s) after which a lock file is taken over
    pub lock_stale_after_secs: u64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        let lock = LockOptions::default();
        Self {
            dir: PathBuf::from("knowledge"),
            retention: RetentionPolicy::default(),
            lock_attempts: lock.max_attempts,
            lock_stale_after_secs: lock.stale_after.as_secs(),
        }
    }
}

impl KnowledgeConfig {
    /// Lock options for the file backend
    #[must_use]
    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            max_attempts: self.lock_attempts,
            stale_after: Duration::from_secs(self.lock_stale_after_secs),
            ..LockOptions::default()
        }
    }
}

/// Retry loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct HealingConfig {
    /// Retries after the first failed run
    pub max_retries: u32,
    /// Minimum confidence for applying a fix
    pub apply_threshold: f64,
    /// Candidates kept per element by enhancement
    pub max_candidates: usize,
    /// Whole-test timeout (ms)
    pub test_timeout_ms: u64,
    /// Where `<case>.ai-assets.json` is written
    pub assets_dir: PathBuf,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            apply_threshold: DEFAULT_APPLY_THRESHOLD,
            max_candidates: DEFAULT_MAX_CANDIDATES,
            test_timeout_ms: DEFAULT_TEST_TIMEOUT_MS,
            assets_dir: PathBuf::from("."),
        }
    }
}

/// Model vendor; each one is reached through its OpenAI-compatible endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// OpenAI
    #[default]
    OpenAi,
    /// Google Gemini
    Gemini,
    /// Anthropic Claude
    Anthropic,
    /// Any other server; `base_url` and `model` are required
    Custom,
}

impl LlmProvider {
    /// Endpoint used when `base_url` is unset
    #[must_use]
    pub const fn default_base_url(self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("https://api.openai.com/v1"),
            Self::Gemini => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
            Self::Anthropic => Some("https://api.anthropic.com/v1"),
            Self::Custom => None,
        }
    }

    /// Model used when `model` is unset
    #[must_use]
    pub const fn default_model(self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("gpt-4o"),
            Self::Gemini => Some("gemini-2.5-pro"),
            Self::Anthropic => Some("claude-3-haiku-20240307"),
            Self::Custom => None,
        }
    }

    /// Key variable used when `api_key_env` is unset
    #[must_use]
    pub const fn default_api_key_env(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Gemini => "GOOGLE_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Custom => "VISIONARY_LLM_API_KEY",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "gemini" | "google" => Ok(Self::Gemini),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

/// Vision model provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct LlmConfig {
    /// Vendor, which supplies the defaults below
    pub provider: LlmProvider,
    /// API base URL (without `/chat/completions`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Vision-capable model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Environment variable holding the API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Sampling temperature
    pub temperature: f32,
    /// Completion budget
    pub max_tokens: u32,
    /// Request timeout (s)
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            base_url: None,
            model: None,
            api_key_env: None,
            temperature: 0.1,
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    /// Defaults for `provider`
    #[must_use]
    pub fn for_provider(provider: LlmProvider) -> Self {
        Self {
            provider,
            ..Self::default()
        }
    }

    /// Effective base URL
    pub fn base_url(&self) -> VisionaryResult<&str> {
        self.base_url
            .as_deref()
            .or_else(|| self.provider.default_base_url())
            .ok_or_else(|| VisionaryError::config("llm.base_url is required for a custom provider"))
    }

    /// Effective model
    pub fn model(&self) -> VisionaryResult<&str> {
        self.model
            .as_deref()
            .or_else(|| self.provider.default_model())
            .ok_or_else(|| VisionaryError::config("llm.model is required for a custom provider"))
    }

    /// Effective API key variable
    #[must_use]
    pub fn api_key_env(&self) -> &str {
        self.api_key_env
            .as_deref()
            .unwrap_or_else(|| self.provider.default_api_key_env())
    }

    /// API key from the configured environment variable
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        std::env::var(self.api_key_env())
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    fn validate(&self) -> VisionaryResult<()> {
        self.base_url()?;
        self.model()?;
        Ok(())
    }
}

/// Browser launch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct BrowserConfig {
    /// Run without a window
    pub headless: bool,
    /// Viewport width
    pub viewport_width: u32,
    /// Viewport height
    pub viewport_height: u32,
    /// Navigation timeout (ms)
    pub navigation_timeout_ms: u64,
    /// Chromium binary; auto-detected when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chrome_path: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            navigation_timeout_ms: DEFAULT_NAVIGATION_TIMEOUT_MS,
            chrome_path: None,
        }
    }
}

impl BrowserConfig {
    /// `WIDTHxHEIGHT`, as recorded in history environments
    #[must_use]
    pub fn viewport(&self) -> String {
        format!("{}x{}", self.viewport_width, self.viewport_height)
    }

    /// Navigation timeout
    #[must_use]
    pub const fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }
}

/// External codegen and test commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CommandsConfig {
    /// Generation commands, run in order, with `{assets}`
    pub generate: Vec<String>,
    /// Test command with `{spec}`
    pub test: String,
    /// Working directory for all commands
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
    /// Directory generated specs land in
    pub spec_dir: PathBuf,
    /// Directory generated page objects land in
    pub page_dir: PathBuf,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            generate: vec![DEFAULT_POM_COMMAND.to_string(), DEFAULT_SPEC_COMMAND.to_string()],
            test: DEFAULT_TEST_COMMAND.to_string(),
            workdir: None,
            spec_dir: PathBuf::from(DEFAULT_SPEC_DIR),
            page_dir: PathBuf::from(DEFAULT_PAGE_DIR),
        }
    }
}

/// Whole configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionaryConfig {
    /// Candidate resolution timing
    pub resolver: ResolverConfig,
    /// Knowledge base
    pub knowledge: KnowledgeConfig,
    /// Retry loop
    pub healing: HealingConfig,
    /// LLM provider
    pub llm: LlmConfig,
    /// Browser
    pub browser: BrowserConfig,
    /// External commands
    pub commands: CommandsConfig,
}

impl VisionaryConfig {
    /// Defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse YAML without validating
    pub fn from_yaml(yaml: &str) -> VisionaryResult<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    /// Load `path`, or `visionary.yaml` when present, apply the process
    /// environment and validate
    pub fn load(path: Option<&Path>) -> VisionaryResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_yaml(&std::fs::read_to_string(path)?)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_yaml(&std::fs::read_to_string(DEFAULT_CONFIG_FILE)?)?
            }
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        debug!(?config, "configuration loaded");
        Ok(config)
    }

    /// Apply `VISIONARY_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> VisionaryResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("VISIONARY_KNOWLEDGE_DIR") {
            self.knowledge.dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("VISIONARY_ASSETS_DIR") {
            self.healing.assets_dir = PathBuf::from(dir);
        }
        parse_into(&lookup, "VISIONARY_LLM_PROVIDER", &mut self.llm.provider)?;
        if let Some(url) = lookup("VISIONARY_LLM_BASE_URL") {
            self.llm.base_url = Some(url);
        }
        if let Some(model) = lookup("VISIONARY_LLM_MODEL") {
            self.llm.model = Some(model);
        }
        if let Some(command) = lookup("VISIONARY_TEST_COMMAND") {
            self.commands.test = command;
        }
        parse_into(&lookup, "VISIONARY_MAX_RETRIES", &mut self.healing.max_retries)?;
        parse_into(&lookup, "VISIONARY_APPLY_THRESHOLD", &mut self.healing.apply_threshold)?;
        parse_into(&lookup, "VISIONARY_TEST_TIMEOUT_MS", &mut self.healing.test_timeout_ms)?;
        parse_into(&lookup, "VISIONARY_HEADLESS", &mut self.browser.headless)?;
        parse_into(
            &lookup,
            "VISIONARY_CANDIDATE_TIMEOUT_MS",
            &mut self.resolver.candidate_timeout_ms,
        )?;
        parse_into(
            &lookup,
            "VISIONARY_EXTENDED_TIMEOUT_MS",
            &mut self.resolver.extended_timeout_ms,
        )?;
        Ok(())
    }

    /// Cross-field checks
    pub fn validate(&self) -> VisionaryResult<()> {
        self.resolver.validate(self.healing.test_timeout_ms)?;
        if !(0.0..=1.0).contains(&self.healing.apply_threshold) {
            return Err(VisionaryError::config(format!(
                "healing.apply_threshold must be within 0..=1, got {}",
                self.healing.apply_threshold
            )));
        }
        if self.healing.max_candidates == 0 {
            return Err(VisionaryError::config("healing.max_candidates must be at least 1"));
        }
        self.llm.validate()?;
        if self.browser.viewport_width == 0 || self.browser.viewport_height == 0 {
            return Err(VisionaryError::config("browser viewport must be non-empty"));
        }
        if self.commands.test.trim().is_empty() {
            return Err(VisionaryError::config("commands.test is empty"));
        }
        if self.commands.generate.iter().any(|c| c.trim().is_empty()) {
            return Err(VisionaryError::config("commands.generate has an empty entry"));
        }
        Ok(())
    }

    /// Serialize as YAML
    pub fn to_yaml(&self) -> VisionaryResult<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    /// Set the knowledge directory
    #[must_use]
    pub fn with_knowledge_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.knowledge.dir = dir.into();
        self
    }

    /// Set the retry count
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.healing.max_retries = retries;
        self
    }

    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.browser.headless = headless;
        self
    }

    /// Set the resolver timing
    #[must_use]
    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }
}

fn parse_into<T, F>(lookup: &F, name: &str, target: &mut T) -> VisionaryResult<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| VisionaryError::config(format!("{name}={raw}: {e}")))?;
    }
    Ok(())
}
