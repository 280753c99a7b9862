//! Queue reader: returns the lines still waiting for work.

use std::io::ErrorKind;
use std::path::Path;

use tokio::fs;
use tracing::debug;

use super::status::split_status;
use crate::error::QueueError;

/// A line eligible for work, as seen during one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLine {
    /// 1-based line number at scan time. Only a hint: the file may be
    /// edited between the scan and the rewrite.
    pub line_number: usize,
    /// Line content without its terminator.
    pub text: String,
}

/// Whether a raw line (terminator already stripped) is pending.
pub fn is_pending(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty()
        && !trimmed.starts_with('#')
        && split_status(trimmed).1.is_pending()
}

/// Read the queue file and return pending lines in file order.
///
/// A missing file is an empty queue.
pub async fn read_pending(path: &Path) -> Result<Vec<PendingLine>, QueueError> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "Queue file does not exist yet");
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(QueueError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    Ok(content
        .lines()
        .enumerate()
        .filter(|(_, line)| is_pending(line))
        .map(|(i, line)| PendingLine {
            line_number: i + 1,
            text: line.to_string(),
        })
        .collect())
}
