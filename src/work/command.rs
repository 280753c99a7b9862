//! External-program executor.
//!
//! Runs a configured program once per unit. Arguments are templates; the
//! placeholders `{prompt}`, `{detail}`, `{height}`, `{width}`, `{index}`,
//! `{count}` and `{output}` are substituted before each run. `{output}` is
//! the next sequentially numbered file in the output directory, and the
//! program is expected to write its artifact there.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;
use tracing::{debug, info};

use super::output::next_sequential_path;
use super::retry::RetryPolicy;
use super::{JobExecutor, WorkRequest, WorkSummary};
use crate::error::WorkError;

/// Maximum stderr kept in error messages (4KB).
const MAX_STDERR_SIZE: usize = 4 * 1024;

/// Runs an external program per work unit.
#[derive(Debug)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
    output_dir: PathBuf,
    output_ext: String,
    /// Per-unit timeout; `None` waits indefinitely.
    timeout: Option<Duration>,
    retry: RetryPolicy,
    /// Environment variable name and secret value passed to the child.
    secret_env: Option<(String, SecretString)>,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            output_dir: PathBuf::from("images"),
            output_ext: "png".to_string(),
            timeout: None,
            retry: RetryPolicy::default(),
            secret_env: None,
        }
    }

    pub fn with_output(mut self, dir: PathBuf, ext: impl Into<String>) -> Self {
        self.output_dir = dir;
        self.output_ext = ext.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_secret_env(mut self, name: impl Into<String>, secret: SecretString) -> Self {
        self.secret_env = Some((name.into(), secret));
        self
    }

    /// Run the program once for unit `index`.
    async fn run_unit(
        &self,
        request: &WorkRequest,
        index: u32,
        output: &Path,
    ) -> Result<(), WorkError> {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| render(arg, request, index, output))
            .collect();

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some((name, secret)) = &self.secret_env {
            command.env(name, secret.expose_secret());
        }

        let result = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, command.output())
                .await
                .map_err(|_| WorkError::Timeout { timeout })?,
            None => command.output().await,
        };
        let finished = result.map_err(|e| WorkError::Spawn {
            program: self.program.clone(),
            reason: e.to_string(),
        })?;

        if !finished.stdout.is_empty() {
            debug!(
                program = %self.program,
                stdout = %String::from_utf8_lossy(&finished.stdout).trim_end(),
                "Unit output"
            );
        }

        if !finished.status.success() {
            return Err(WorkError::NonZeroExit {
                program: self.program.clone(),
                status: finished.status.to_string(),
                stderr: truncate(&String::from_utf8_lossy(&finished.stderr)),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl JobExecutor for CommandExecutor {
    fn name(&self) -> &str {
        &self.program
    }

    async fn execute(&self, request: &WorkRequest) -> Result<WorkSummary, WorkError> {
        let mut summary = WorkSummary::default();

        for index in 1..=request.count {
            info!("Generating unit {} of {}...", index, request.count);
            let label = format!("{}#{index}", self.program);

            let unit = async {
                let output = next_sequential_path(&self.output_dir, &self.output_ext)
                    .await
                    .map_err(|source| WorkError::Output {
                        dir: self.output_dir.clone(),
                        source,
                    })?;
                self.retry
                    .run(&label, || self.run_unit(request, index, &output))
                    .await?;
                Ok::<_, WorkError>(output)
            }
            .await;

            match unit {
                Ok(path) => {
                    info!(path = %path.display(), "Saved artifact");
                    summary.units_completed += 1;
                    summary.artifacts.push(path);
                }
                Err(e) if request.count > 1 => {
                    return Err(WorkError::Partial {
                        units_completed: summary.units_completed,
                        count: request.count,
                        source: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(summary)
    }
}

fn render(template: &str, request: &WorkRequest, index: u32, output: &Path) -> String {
    template
        .replace("{prompt}", &request.prompt)
        .replace("{detail}", &request.detail)
        .replace("{height}", &request.height.to_string())
        .replace("{width}", &request.width.to_string())
        .replace("{index}", &index.to_string())
        .replace("{count}", &request.count.to_string())
        .replace("{output}", &output.to_string_lossy())
}

fn truncate(s: &str) -> String {
    let s = s.trim_end();
    if s.len() <= MAX_STDERR_SIZE {
        return s.to_string();
    }
    let mut end = MAX_STDERR_SIZE;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}
