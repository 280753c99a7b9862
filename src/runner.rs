//! Queue runner: the poll loop that drives job lines through their states.
//!
//! ```text
//!            ┌──────────── poll interval ────────────┐
//!            ▼                                       │
//!        Scanning ──pending──▶ Executing ──pass done─┤
//!            │                                       │
//!            └──────empty────▶ IdleWait ─────────────┘
//!
//!   any state ──shutdown──▶ Stopped
//! ```
//!
//! Jobs run strictly one at a time, in file order. A line is marked ` [-]`
//! before its work starts and ` [x]` (or ` [!]` if the executor fails)
//! afterwards. Lines that do not parse are marked ` [x]` without running so
//! they are not picked up again. A line that was closed or removed by hand
//! between the scan and its turn is skipped. When a shutdown arrives mid-job the line
//! keeps its ` [-]` marker and no further writes happen.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::error::{Error, QueueError};
use crate::queue::{self, LineStatus, MarkOutcome, PendingLine};
use crate::shutdown::stopped;
use crate::work::{JobExecutor, WorkRequest};

/// Runner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    /// Nothing pending; sleeping until the next scan.
    IdleWait,
    /// Reading the queue file.
    Scanning,
    /// Working through the lines found by the last scan.
    Executing,
    /// Shut down; no further file writes.
    Stopped,
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::IdleWait => "idle_wait",
            Self::Scanning => "scanning",
            Self::Executing => "executing",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// How one job line ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Work finished; line marked ` [x]`.
    Done { units_completed: u32 },
    /// Work failed; line marked ` [!]`.
    Failed { units_completed: u32, error: String },
    /// Line did not parse; marked ` [x]` without running.
    Invalid { reason: String },
    /// Line was closed or removed after the scan; nothing ran.
    Skipped { reason: String },
    /// Shutdown arrived mid-job; line left ` [-]`.
    Interrupted,
}

/// Record of one line handled during a pass.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub line_number: usize,
    pub line: String,
    pub outcome: JobOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Result of one scan-and-execute pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    pub records: Vec<JobRecord>,
    /// Shutdown was requested during the pass.
    pub interrupted: bool,
}

impl PassReport {
    /// True when the scan found nothing to do.
    pub fn is_idle(&self) -> bool {
        self.records.is_empty() && !self.interrupted
    }

    fn count(&self, pred: impl Fn(&JobOutcome) -> bool) -> usize {
        self.records.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Counters across the runner's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunnerStats {
    pub passes: u64,
    pub jobs_done: u64,
    pub jobs_failed: u64,
    pub invalid_lines: u64,
    pub jobs_skipped: u64,
    /// How many times the "no jobs" notice was shown.
    pub idle_notices: u64,
}

/// Polls the queue file and runs its jobs.
pub struct QueueRunner {
    run_id: Uuid,
    config: RunnerConfig,
    executor: Arc<dyn JobExecutor>,
    shutdown: watch::Receiver<bool>,
    state: RunnerState,
    idle_notice_shown: bool,
    stats: RunnerStats,
}

impl QueueRunner {
    /// Create a runner. Without [`with_shutdown`](Self::with_shutdown) it
    /// never stops on its own.
    pub fn new(config: RunnerConfig, executor: Arc<dyn JobExecutor>) -> Self {
        let (_tx, shutdown) = watch::channel(false);
        Self {
            run_id: Uuid::new_v4(),
            config,
            executor,
            shutdown,
            state: RunnerState::IdleWait,
            idle_notice_shown: false,
            stats: RunnerStats::default(),
        }
    }

    /// Stop when `shutdown` flips to `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn stats(&self) -> RunnerStats {
        self.stats
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn queue_file(&self) -> &Path {
        &self.config.queue_file
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn set_state(&mut self, state: RunnerState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Runner state change");
            self.state = state;
        }
    }

    /// Run until shutdown. Returns `Ok` on a clean stop; queue file I/O
    /// errors are fatal.
    pub async fn run(&mut self) -> Result<(), Error> {
        info!(
            run_id = %self.run_id,
            queue_file = %self.queue_file().display(),
            executor = self.executor.name(),
            "Queue runner started"
        );

        if self.config.reset_stale_on_start {
            let reset = queue::reset_processing(self.queue_file()).await?;
            if reset > 0 {
                warn!(count = reset, "Requeued lines left processing by a previous run");
            }
        }

        let mut shutdown = self.shutdown.clone();
        while !self.shutdown_requested() {
            let report = self.tick().await?;
            if report.interrupted {
                break;
            }
            if !report.is_idle() {
                if let Ok(json) = serde_json::to_string(&report) {
                    debug!(report = %json, "Pass report");
                }
                info!(
                    "All current jobs processed. Waiting {}s before next scan...",
                    self.config.poll_interval.as_secs()
                );
            }

            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        self.set_state(RunnerState::Stopped);
        info!(run_id = %self.run_id, stats = ?self.stats, "Queue runner stopped");
        Ok(())
    }

    /// One scan: run everything pending, or enter `IdleWait` if nothing is.
    /// Does not sleep.
    pub async fn tick(&mut self) -> Result<PassReport, Error> {
        let report = self.run_pass().await?;
        if report.interrupted {
            self.set_state(RunnerState::Stopped);
            return Ok(report);
        }

        if report.is_idle() {
            self.set_state(RunnerState::IdleWait);
            if !self.idle_notice_shown {
                info!(
                    "No unprocessed jobs found. Will poll every {}s until a new job is added...",
                    self.config.poll_interval.as_secs()
                );
                self.idle_notice_shown = true;
                self.stats.idle_notices += 1;
            }
        } else {
            self.idle_notice_shown = false;
        }
        Ok(report)
    }

    /// Scan the queue file and execute every pending line in order.
    pub async fn run_pass(&mut self) -> Result<PassReport, Error> {
        self.set_state(RunnerState::Scanning);
        self.stats.passes += 1;

        let pending = queue::read_pending(self.queue_file()).await?;
        let mut report = PassReport::default();
        if pending.is_empty() {
            return Ok(report);
        }

        debug!(count = pending.len(), "Found pending job lines");
        self.set_state(RunnerState::Executing);

        for line in &pending {
            if self.shutdown_requested() {
                report.interrupted = true;
                break;
            }
            let record = self.execute_line(line).await?;
            let interrupted = record.outcome == JobOutcome::Interrupted;
            report.records.push(record);
            if interrupted {
                report.interrupted = true;
                break;
            }
        }

        self.stats.jobs_done += report.count(|o| matches!(o, JobOutcome::Done { .. })) as u64;
        self.stats.jobs_failed += report.count(|o| matches!(o, JobOutcome::Failed { .. })) as u64;
        self.stats.invalid_lines += report.count(|o| matches!(o, JobOutcome::Invalid { .. })) as u64;
        self.stats.jobs_skipped += report.count(|o| matches!(o, JobOutcome::Skipped { .. })) as u64;
        Ok(report)
    }

    async fn execute_line(&mut self, line: &PendingLine) -> Result<JobRecord, Error> {
        let started_at = Utc::now();
        let record = |outcome| JobRecord {
            line_number: line.line_number,
            line: line.text.clone(),
            outcome,
            started_at,
            finished_at: Utc::now(),
        };

        let job = match queue::parse(&line.text) {
            Ok(job) => job,
            Err(e) => {
                warn!(
                    line = line.line_number,
                    text = %line.text,
                    error = %e,
                    "Invalid job line, marking done without running it"
                );
                self.mark(line, LineStatus::Done).await?;
                return Ok(record(JobOutcome::Invalid {
                    reason: e.to_string(),
                }));
            }
        };

        if let Some(reason) = self.claim(line).await? {
            info!(line = line.line_number, text = %line.text, %reason, "Skipping job line");
            return Ok(record(JobOutcome::Skipped { reason }));
        }

        let request = WorkRequest::from_job(&job, &self.config.prompt_prefix);
        info!(
            "Processing: {} unit(s) | {}x{} | {}",
            request.count, request.width, request.height, request.detail
        );

        let executor = Arc::clone(&self.executor);
        let mut shutdown = self.shutdown.clone();
        let result = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => {
                warn!(
                    line = line.line_number,
                    "Shutdown during job; line stays processing and must be requeued by hand"
                );
                return Ok(record(JobOutcome::Interrupted));
            }
            result = executor.execute(&request) => result,
        };

        let outcome = match result {
            Ok(summary) => {
                info!(
                    "Completed: generated {} unit(s) for '{}'",
                    summary.units_completed, request.detail
                );
                self.mark(line, LineStatus::Done).await?;
                JobOutcome::Done {
                    units_completed: summary.units_completed,
                }
            }
            Err(e) => {
                error!(
                    line = line.line_number,
                    executor = executor.name(),
                    units_completed = e.units_completed(),
                    error = %e,
                    "Job failed, marking failed"
                );
                self.mark(line, LineStatus::Failed).await?;
                JobOutcome::Failed {
                    units_completed: e.units_completed(),
                    error: e.to_string(),
                }
            }
        };
        Ok(record(outcome))
    }

    /// Mark a line ` [-]` before running it. Returns why the line could not
    /// be claimed, if it could not.
    async fn claim(&self, line: &PendingLine) -> Result<Option<String>, Error> {
        let outcome = queue::mark_at(
            self.queue_file(),
            Some(line.line_number),
            &line.text,
            LineStatus::Processing,
        )
        .await;
        match outcome {
            Ok(MarkOutcome::Updated { .. }) => Ok(None),
            Ok(MarkOutcome::Unchanged { .. }) => Ok(Some("line is already processing".into())),
            Ok(MarkOutcome::NotFound | MarkOutcome::MissingFile) => {
                Ok(Some("line was removed from the queue file".into()))
            }
            Err(QueueError::InvalidTransition { from, .. }) => {
                Ok(Some(format!("line was marked {from} by hand")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Mark a line, tolerating hand edits made while the job ran.
    async fn mark(&self, line: &PendingLine, status: LineStatus) -> Result<(), Error> {
        match queue::mark_at(self.queue_file(), Some(line.line_number), &line.text, status).await {
            Ok(MarkOutcome::Updated { .. } | MarkOutcome::Unchanged { .. }) => Ok(()),
            Ok(MarkOutcome::NotFound | MarkOutcome::MissingFile) => {
                warn!(
                    line = line.line_number,
                    target = %status,
                    "Job line disappeared from the queue file"
                );
                Ok(())
            }
            Err(QueueError::InvalidTransition { from, to, .. }) => {
                warn!(
                    line = line.line_number,
                    %from,
                    %to,
                    "Line was re-marked by hand, leaving it as is"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::error::WorkError;
    use crate::work::WorkSummary;

    /// Records every request; fails on details listed in `fail_on`. The
    /// first call overwrites the queue file with `edit`, if set, to mimic a
    /// hand edit made while a job runs.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_on: Vec<String>,
        edit: Mutex<Option<(PathBuf, String)>>,
    }

    impl Recorder {
        fn editing(path: &Path, content: &str) -> Self {
            Self {
                edit: Mutex::new(Some((path.to_path_buf(), content.to_string()))),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl JobExecutor for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn execute(&self, request: &WorkRequest) -> Result<WorkSummary, WorkError> {
            self.calls.lock().unwrap().push(request.detail.clone());
            let edit = self.edit.lock().unwrap().take();
            if let Some((path, content)) = edit {
                std::fs::write(path, content).unwrap();
            }
            if self.fail_on.contains(&request.detail) {
                return Err(WorkError::Other("generation failed".into()));
            }
            Ok(WorkSummary {
                units_completed: request.count,
                artifacts: Vec::new(),
            })
        }
    }

    fn setup(content: &str, executor: Arc<dyn JobExecutor>) -> (TempDir, PathBuf, QueueRunner) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.txt");
        std::fs::write(&path, content).unwrap();
        let config = RunnerConfig {
            queue_file: path.clone(),
            poll_interval: Duration::from_millis(10),
            ..RunnerConfig::default()
        };
        (dir, path, QueueRunner::new(config, executor))
    }

    #[tokio::test]
    async fn runs_lines_in_file_order_and_marks_done() {
        let recorder = Arc::new(Recorder::default());
        let (_dir, path, mut runner) = setup(
            "# jobs\n1 64 64 A\n1 64 64 B [x]\n1 64 64 B\n2 64 64 \"C c\"\n",
            recorder.clone(),
        );

        let report = runner.run_pass().await.unwrap();
        assert_eq!(report.records.len(), 3);
        assert_eq!(*recorder.calls.lock().unwrap(), vec!["A", "B", "C c"]);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "# jobs\n1 64 64 A [x]\n1 64 64 B [x]\n1 64 64 B [x]\n2 64 64 \"C c\" [x]\n"
        );
        assert_eq!(runner.state(), RunnerState::Executing);
        assert_eq!(runner.stats().jobs_done, 3);
    }

    #[tokio::test]
    async fn invalid_lines_are_marked_done_without_work() {
        let recorder = Arc::new(Recorder::default());
        let (_dir, path, mut runner) = setup("oops\nx 1 1 cat\n", recorder.clone());

        let report = runner.run_pass().await.unwrap();
        assert!(recorder.calls.lock().unwrap().is_empty());
        assert!(matches!(report.records[0].outcome, JobOutcome::Invalid { .. }));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "oops [x]\nx 1 1 cat [x]\n"
        );
        assert_eq!(runner.stats().invalid_lines, 2);
    }

    #[tokio::test]
    async fn failed_work_is_marked_failed_and_the_pass_continues() {
        let recorder = Arc::new(Recorder {
            fail_on: vec!["bad".into()],
            ..Default::default()
        });
        let (_dir, path, mut runner) = setup("1 8 8 bad\n1 8 8 good\n", recorder.clone());

        let report = runner.run_pass().await.unwrap();
        assert!(matches!(report.records[0].outcome, JobOutcome::Failed { .. }));
        assert!(matches!(
            report.records[1].outcome,
            JobOutcome::Done { units_completed: 1 }
        ));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "1 8 8 bad [!]\n1 8 8 good [x]\n"
        );

        // Failed lines are not retried on later passes
        assert!(runner.run_pass().await.unwrap().is_idle());
        assert_eq!(recorder.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn idle_notice_is_shown_once_per_idle_stretch() {
        let (_dir, path, mut runner) = setup("", Arc::new(Recorder::default()));

        assert!(runner.tick().await.unwrap().is_idle());
        assert_eq!(runner.state(), RunnerState::IdleWait);
        runner.tick().await.unwrap();
        assert_eq!(runner.stats().idle_notices, 1);

        std::fs::write(&path, "1 1 1 job\n").unwrap();
        runner.tick().await.unwrap();
        runner.tick().await.unwrap();
        assert_eq!(runner.stats().idle_notices, 2);
    }

    #[tokio::test]
    async fn missing_queue_file_is_idle() {
        let dir = TempDir::new().unwrap();
        let config = RunnerConfig {
            queue_file: dir.path().join("nope.txt"),
            ..RunnerConfig::default()
        };
        let mut runner = QueueRunner::new(config, Arc::new(Recorder::default()));
        assert!(runner.tick().await.unwrap().is_idle());
        assert!(!dir.path().join("nope.txt").exists());
    }

    #[tokio::test]
    async fn duplicate_lines_are_each_run_once() {
        let recorder = Arc::new(Recorder::default());
        let (_dir, path, mut runner) = setup("1 1 1 same\n1 1 1 same\n", recorder.clone());

        runner.run_pass().await.unwrap();
        assert_eq!(recorder.calls.lock().unwrap().len(), 2);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "1 1 1 same [x]\n1 1 1 same [x]\n"
        );
    }

    #[tokio::test]
    async fn run_returns_after_shutdown() {
        let (tx, rx) = watch::channel(false);
        let (_dir, path, runner) = setup("1 1 1 a\n", Arc::new(Recorder::default()));
        let mut runner = runner.with_shutdown(rx);

        let handle = tokio::spawn(async move {
            runner.run().await.unwrap();
            runner
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let runner = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(runner.state(), RunnerState::Stopped);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1 1 1 a [x]\n");
    }

    #[tokio::test]
    async fn reset_stale_requeues_processing_lines() {
        let recorder = Arc::new(Recorder::default());
        let (tx, rx) = watch::channel(false);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.txt");
        std::fs::write(&path, "1 1 1 orphan [-]\n").unwrap();
        let config = RunnerConfig {
            queue_file: path.clone(),
            poll_interval: Duration::from_millis(10),
            reset_stale_on_start: true,
            ..RunnerConfig::default()
        };
        let mut runner = QueueRunner::new(config, recorder.clone()).with_shutdown(rx);

        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(*recorder.calls.lock().unwrap(), vec!["orphan"]);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1 1 1 orphan [x]\n");
    }

    fn queue_in(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("queue.txt");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn runner_for(path: &Path, executor: Arc<dyn JobExecutor>) -> QueueRunner {
        let config = RunnerConfig {
            queue_file: path.to_path_buf(),
            poll_interval: Duration::from_millis(10),
            ..RunnerConfig::default()
        };
        QueueRunner::new(config, executor)
    }

    #[tokio::test]
    async fn line_closed_by_hand_after_scan_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = queue_in(&dir, "1 1 1 one\n1 1 1 two\n");
        let recorder = Arc::new(Recorder::editing(&path, "1 1 1 one [-]\n1 1 1 two [x]\n"));
        let mut runner = runner_for(&path, recorder.clone());

        let report = runner.run_pass().await.unwrap();
        assert_eq!(*recorder.calls.lock().unwrap(), vec!["one"]);
        assert!(matches!(report.records[1].outcome, JobOutcome::Skipped { .. }));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "1 1 1 one [x]\n1 1 1 two [x]\n"
        );
        assert_eq!(runner.stats().jobs_skipped, 1);
    }

    #[tokio::test]
    async fn line_removed_after_scan_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = queue_in(&dir, "1 1 1 one\n1 1 1 two\n");
        let recorder = Arc::new(Recorder::editing(&path, "1 1 1 one [-]\n"));
        let mut runner = runner_for(&path, recorder.clone());

        let report = runner.run_pass().await.unwrap();
        assert_eq!(*recorder.calls.lock().unwrap(), vec!["one"]);
        assert!(matches!(report.records[1].outcome, JobOutcome::Skipped { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1 1 1 one [x]\n");
    }

    #[tokio::test]
    async fn finished_duplicate_shifted_onto_hint_does_not_stall_job() {
        let dir = TempDir::new().unwrap();
        let path = queue_in(&dir, "1 1 1 a [x]\n1 1 1 a\n");
        let recorder = Arc::new(Recorder::editing(
            &path,
            "# note\n1 1 1 a [x]\n1 1 1 a [-]\n",
        ));
        let mut runner = runner_for(&path, recorder.clone());

        let report = runner.run_pass().await.unwrap();
        assert_eq!(
            report.records[0].outcome,
            JobOutcome::Done { units_completed: 1 }
        );
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "# note\n1 1 1 a [x]\n1 1 1 a [x]\n"
        );
        assert!(runner.run_pass().await.unwrap().is_idle());
        assert_eq!(recorder.calls.lock().unwrap().len(), 1);
    }
}
