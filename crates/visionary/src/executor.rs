//! Code generation and test execution collaborators.
//!
//! Both are opaque to the healing loop: the artifact generator turns an
//! assets file into a runnable spec, the executor runs it and reports a
//! success flag plus the raw output the classifier reads. The command backed
//! implementations spawn processes directly (no shell) from whitespace
//! separated templates with `{assets}` / `{spec}` placeholders.

use crate::result::{VisionaryError, VisionaryResult};
use crate::schema::TestAssets;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Default page-object generation command
pub const DEFAULT_POM_COMMAND: &str = "npm run generate:pom -- {assets}";

/// Default spec generation command
pub const DEFAULT_SPEC_COMMAND: &str = "npm run generate:spec -- {assets}";

/// Default test command; the JSON reporter feeds the classifier
pub const DEFAULT_TEST_COMMAND: &str = "npx playwright test {spec} --reporter=json";

/// Default directory generated specs land in
pub const DEFAULT_SPEC_DIR: &str = "tests/generated";

/// Default directory generated page objects land in
pub const DEFAULT_PAGE_DIR: &str = "pages/generated";

/// Default test timeout (ms)
pub const DEFAULT_TEST_TIMEOUT_MS: u64 = 120_000;

/// Files produced by code generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedArtifacts {
    /// Runnable spec file
    pub spec_path: PathBuf,
    /// Main page object source
    pub page_object_path: PathBuf,
}

/// Turns an assets file into runnable artifacts
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    /// Generate artifacts for the document stored at `assets_path`
    async fn generate(
        &self,
        assets_path: &Path,
        assets: &TestAssets,
    ) -> VisionaryResult<GeneratedArtifacts>;
}

/// Result of one test run
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Test passed
    pub success: bool,
    /// Combined stdout and stderr
    pub output: String,
    /// Process exit code, if it exited normally
    pub exit_code: Option<i32>,
    /// Wall time
    pub duration: Duration,
}

/// Runs a generated spec
#[async_trait]
pub trait TestExecutor: Send + Sync {
    /// Run `spec` and capture its outcome; a failing test is `Ok`
    async fn execute(&self, spec: &Path) -> VisionaryResult<ExecutionOutcome>;
}

/// `LoginPage` becomes `login-page`
#[must_use]
pub fn kebab_case(class_name: &str) -> String {
    let mut out = String::with_capacity(class_name.len() + 4);
    for (i, ch) in class_name.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('-');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

// =============================================================================
// COMMAND TEMPLATES
// =============================================================================

/// A program plus arguments with `{name}` placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    program: String,
    args: Vec<String>,
}

impl CommandTemplate {
    /// Split a template on whitespace
    pub fn parse(template: &str) -> VisionaryResult<Self> {
        let mut parts = template.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| VisionaryError::config("empty command template"))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Program to spawn
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments with every `{name}` replaced by its value
    #[must_use]
    pub fn render(&self, vars: &[(&str, &str)]) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (name, value)| {
                    acc.replace(&format!("{{{name}}}"), value)
                })
            })
            .collect()
    }

    /// Spawn the rendered command and wait for it, bounded by `timeout`
    #[instrument(skip(self, vars), fields(program = %self.program))]
    pub async fn run(
        &self,
        vars: &[(&str, &str)],
        workdir: Option<&Path>,
        timeout: Duration,
    ) -> VisionaryResult<ExecutionOutcome> {
        let args = self.render(vars);
        debug!(?args, "spawning");

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = workdir {
            cmd.current_dir(dir);
        }

        let start = Instant::now();
        let child = cmd.spawn().map_err(|e| {
            VisionaryError::execution(format!("failed to spawn {}: {e}", self.program))
        })?;
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| VisionaryError::Timeout {
                ms: timeout.as_millis() as u64,
            })??;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }

        Ok(ExecutionOutcome {
            success: output.status.success(),
            output: text,
            exit_code: output.status.code(),
            duration: start.elapsed(),
        })
    }
}

// =============================================================================
// COMMAND COLLABORATORS
// =============================================================================

/// Runs the page-object and spec generators as external commands
#[derive(Debug, Clone)]
pub struct CommandArtifactGenerator {
    commands: Vec<CommandTemplate>,
    spec_dir: PathBuf,
    page_dir: PathBuf,
    workdir: Option<PathBuf>,
    timeout: Duration,
}

impl CommandArtifactGenerator {
    /// Generator running `commands` in order
    pub fn new<S: AsRef<str>>(commands: &[S]) -> VisionaryResult<Self> {
        let commands = commands
            .iter()
            .map(|c| CommandTemplate::parse(c.as_ref()))
            .collect::<VisionaryResult<Vec<_>>>()?;
        Ok(Self {
            commands,
            spec_dir: PathBuf::from(DEFAULT_SPEC_DIR),
            page_dir: PathBuf::from(DEFAULT_PAGE_DIR),
            workdir: None,
            timeout: Duration::from_millis(DEFAULT_TEST_TIMEOUT_MS),
        })
    }

    /// The npm script pair
    pub fn npm_scripts() -> VisionaryResult<Self> {
        Self::new(&[DEFAULT_POM_COMMAND, DEFAULT_SPEC_COMMAND])
    }

    /// Where specs are written, relative to the working directory
    #[must_use]
    pub fn with_spec_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spec_dir = dir.into();
        self
    }

    /// Where page objects are written, relative to the working directory
    #[must_use]
    pub fn with_page_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.page_dir = dir.into();
        self
    }

    /// Working directory for the commands
    #[must_use]
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Per-command timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Paths the generators produce for `assets`
    #[must_use]
    pub fn artifacts_for(&self, assets: &TestAssets) -> GeneratedArtifacts {
        let class = &assets.page_object.class_name;
        GeneratedArtifacts {
            spec_path: self.spec_dir.join(format!("{}.spec.ts", kebab_case(class))),
            page_object_path: self.page_dir.join(format!("{class}.ts")),
        }
    }
}

#[async_trait]
impl ArtifactGenerator for CommandArtifactGenerator {
    async fn generate(
        &self,
        assets_path: &Path,
        assets: &TestAssets,
    ) -> VisionaryResult<GeneratedArtifacts> {
        let assets_arg = assets_path.display().to_string();
        for command in &self.commands {
            let outcome = command
                .run(
                    &[("assets", assets_arg.as_str())],
                    self.workdir.as_deref(),
                    self.timeout,
                )
                .await?;
            if !outcome.success {
                return Err(VisionaryError::execution(format!(
                    "{} exited with {:?}: {}",
                    command.program(),
                    outcome.exit_code,
                    outcome.output.trim()
                )));
            }
        }
        let artifacts = self.artifacts_for(assets);
        info!(spec = %artifacts.spec_path.display(), "artifacts generated");
        Ok(artifacts)
    }
}

/// Runs the test command and hands its output to the classifier
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: CommandTemplate,
    workdir: Option<PathBuf>,
    timeout: Duration,
}

impl CommandExecutor {
    /// Executor for a `{spec}` template
    pub fn new(template: &str) -> VisionaryResult<Self> {
        Ok(Self {
            command: CommandTemplate::parse(template)?,
            workdir: None,
            timeout: Duration::from_millis(DEFAULT_TEST_TIMEOUT_MS),
        })
    }

    /// `npx playwright test` with the JSON reporter
    pub fn playwright() -> VisionaryResult<Self> {
        Self::new(DEFAULT_TEST_COMMAND)
    }

    /// Working directory for the test command
    #[must_use]
    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Whole-test timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl TestExecutor for CommandExecutor {
    async fn execute(&self, spec: &Path) -> VisionaryResult<ExecutionOutcome> {
        let spec_arg = spec.display().to_string();
        let outcome = self
            .command
            .run(
                &[("spec", spec_arg.as_str())],
                self.workdir.as_deref(),
                self.timeout,
            )
            .await?;
        if outcome.success {
            info!(spec = %spec_arg, ms = outcome.duration.as_millis() as u64, "test passed");
        } else {
            warn!(spec = %spec_arg, code = ?outcome.exit_code, "test failed");
        }
        Ok(outcome)
    }
}
