//! Units of work executed for each job line.
//!
//! The runner hands every parsed job to a [`JobExecutor`]. An executor
//! produces `count` independent artifacts; the queue never inspects them,
//! only whether the call returned `Ok` or `Err`.

pub mod command;
pub mod output;
pub mod retry;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::WorkError;
use crate::queue::ParsedJob;

pub use command::CommandExecutor;
pub use retry::RetryPolicy;

/// Everything an executor needs to run one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRequest {
    pub count: u32,
    pub height: u32,
    pub width: u32,
    /// Detail text from the queue line.
    pub detail: String,
    /// Configured prompt prefix followed by the detail.
    pub prompt: String,
}

impl WorkRequest {
    /// Build a request from a parsed line.
    pub fn from_job(job: &ParsedJob, prompt_prefix: &str) -> Self {
        Self {
            count: job.count,
            height: job.height,
            width: job.width,
            detail: job.detail.clone(),
            prompt: format!("{prompt_prefix}{}", job.detail),
        }
    }
}

/// Result of a completed job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSummary {
    pub units_completed: u32,
    /// Artifact paths, when the executor writes files.
    pub artifacts: Vec<PathBuf>,
}

/// Performs the work described by one job line.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Run all `request.count` units. Must not return `Ok` unless every unit
    /// finished.
    async fn execute(&self, request: &WorkRequest) -> Result<WorkSummary, WorkError>;
}

/// Dry-run executor: logs each unit and produces nothing.
#[derive(Debug, Default)]
pub struct LogExecutor;

impl LogExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobExecutor for LogExecutor {
    fn name(&self) -> &str {
        "log"
    }

    async fn execute(&self, request: &WorkRequest) -> Result<WorkSummary, WorkError> {
        for index in 1..=request.count {
            info!(
                unit = index,
                count = request.count,
                width = request.width,
                height = request.height,
                prompt = %request.prompt,
                "Dry run: would generate unit"
            );
        }
        Ok(WorkSummary {
            units_completed: request.count,
            artifacts: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::parse;

    #[test]
    fn request_prepends_prompt_prefix() {
        let job = parse(r#"2 512 768 "a red bicycle""#).unwrap();
        let req = WorkRequest::from_job(&job, "The image is a C64 pixel style illustration of ");
        assert_eq!(req.count, 2);
        assert_eq!(req.height, 512);
        assert_eq!(req.width, 768);
        assert_eq!(req.detail, "a red bicycle");
        assert_eq!(
            req.prompt,
            "The image is a C64 pixel style illustration of a red bicycle"
        );
    }

    #[tokio::test]
    async fn log_executor_completes_every_unit() {
        let job = parse("3 64 64 sprite").unwrap();
        let summary = LogExecutor::new()
            .execute(&WorkRequest::from_job(&job, ""))
            .await
            .unwrap();
        assert_eq!(summary.units_completed, 3);
        assert!(summary.artifacts.is_empty());
    }
}
