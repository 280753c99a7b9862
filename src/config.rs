//! Configuration types.
//!
//! Everything is read from `LINEQUEUE_*` environment variables once at
//! startup and passed into the components that need it.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tracing::warn;

use crate::error::{self, ConfigError};
use crate::queue::lexer;
use crate::work::retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};
use crate::work::{CommandExecutor, JobExecutor, LogExecutor, RetryPolicy};

/// Queue file name used when none is configured.
pub const DEFAULT_QUEUE_FILE: &str = "linequeue-requirements.txt";

/// Fixed beginning of every prompt.
pub const DEFAULT_PROMPT_PREFIX: &str = "The image is a C64 pixel style illustration of ";

/// Default delay between scans.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Queue runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Path of the queue file.
    pub queue_file: PathBuf,
    /// Delay between scans, both when idle and after a pass.
    pub poll_interval: Duration,
    /// Requeue lines left ` [-]` by an interrupted run before the first scan.
    pub reset_stale_on_start: bool,
    /// Prepended to each line's detail to form the prompt.
    pub prompt_prefix: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            queue_file: default_queue_file(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            reset_stale_on_start: false,
            prompt_prefix: DEFAULT_PROMPT_PREFIX.to_string(),
        }
    }
}

impl RunnerConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            queue_file: var("LINEQUEUE_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.queue_file),
            poll_interval: parse_var::<u64>(&var, "LINEQUEUE_POLL_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            reset_stale_on_start: parse_bool(&var, "LINEQUEUE_RESET_STALE")?
                .unwrap_or(defaults.reset_stale_on_start),
            prompt_prefix: var("LINEQUEUE_PROMPT_PREFIX").unwrap_or(defaults.prompt_prefix),
        })
    }
}

/// Work executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Program followed by its argument template. `None` selects the
    /// dry-run executor.
    pub command: Option<Vec<String>>,
    pub output_dir: PathBuf,
    pub output_ext: String,
    pub unit_timeout: Option<Duration>,
    pub retry: RetryPolicy,
    /// Environment variable name and value handed to the program.
    pub secret_env: Option<(String, SecretString)>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: None,
            output_dir: PathBuf::from("images"),
            output_ext: "png".to_string(),
            unit_timeout: None,
            retry: RetryPolicy::default(),
            secret_env: None,
        }
    }
}

impl ExecutorConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let command = match var("LINEQUEUE_COMMAND") {
            Some(template) => {
                let words = lexer::split(&template)?;
                if words.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        key: "LINEQUEUE_COMMAND".to_string(),
                        message: "command is empty".to_string(),
                    });
                }
                Some(words)
            }
            None => None,
        };

        let max_attempts = parse_var::<u32>(&var, "LINEQUEUE_MAX_RETRIES")?
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "LINEQUEUE_MAX_RETRIES".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        let base_delay = match parse_var::<f64>(&var, "LINEQUEUE_RETRY_DELAY_BASE")? {
            Some(secs) => Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::InvalidValue {
                key: "LINEQUEUE_RETRY_DELAY_BASE".to_string(),
                message: e.to_string(),
            })?,
            None => DEFAULT_BASE_DELAY,
        };

        let secret_env = var("LINEQUEUE_TOKEN").map(|token| {
            let name = var("LINEQUEUE_TOKEN_ENV").unwrap_or_else(|| "HF_TOKEN".to_string());
            (name, SecretString::from(token))
        });

        Ok(Self {
            command,
            output_dir: var("LINEQUEUE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            output_ext: var("LINEQUEUE_OUTPUT_EXT").unwrap_or(defaults.output_ext),
            unit_timeout: parse_var::<u64>(&var, "LINEQUEUE_UNIT_TIMEOUT_SECS")?
                .map(Duration::from_secs),
            retry: RetryPolicy {
                max_attempts,
                base_delay,
            },
            secret_env,
        })
    }

    /// True when no command is configured and jobs are only logged.
    pub fn is_dry_run(&self) -> bool {
        self.command.as_ref().is_none_or(|c| c.is_empty())
    }

    /// Build the executor this configuration describes.
    pub fn build(&self) -> Arc<dyn JobExecutor> {
        let Some((program, args)) = self.command.as_deref().and_then(|c| c.split_first()) else {
            warn!(
                "LINEQUEUE_COMMAND is not set: running in dry-run mode, \
                 pending lines will be marked done without producing anything"
            );
            return Arc::new(LogExecutor::new());
        };

        let mut executor = CommandExecutor::new(program.clone(), args.to_vec())
            .with_output(self.output_dir.clone(), self.output_ext.clone())
            .with_timeout(self.unit_timeout)
            .with_retry(self.retry);
        if let Some((name, secret)) = &self.secret_env {
            executor = executor.with_secret_env(name.clone(), secret.clone());
        }
        Arc::new(executor)
    }
}

/// Load runner and executor configuration from the process environment.
pub fn load_from_env() -> error::Result<(RunnerConfig, ExecutorConfig)> {
    Ok((RunnerConfig::from_env()?, ExecutorConfig::from_env()?))
}

/// The default queue file sits next to the executable, or in the current
/// directory when that cannot be determined.
fn default_queue_file() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_QUEUE_FILE)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_QUEUE_FILE))
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            })
        })
        .transpose()
}

fn parse_bool(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<bool>, ConfigError> {
    var(key)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?} is not a boolean"),
            }),
        })
        .transpose()
}
