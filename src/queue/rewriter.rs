//! Status rewriter: advances a line's marker by rewriting the queue file.
//!
//! The whole file is read, one line is replaced, and the result is written
//! to a sibling temp file that is then renamed over the original, so a crash
//! mid-write leaves either the old or the new file but never a truncated one.
//! Lines are located by text. Among duplicates, a line whose current marker
//! can lead to the new one is preferred, and the scan-time line number breaks
//! ties, so a finished copy shifted onto that number is never mistaken for
//! the line being worked on.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use super::status::{LineStatus, split_status, with_status};
use crate::error::QueueError;

/// What a rewrite did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// The line was found and its marker changed. Carries the 1-based line.
    Updated { line_number: usize },
    /// The line already carried the requested marker; nothing was written.
    Unchanged { line_number: usize },
    /// No line matched; the file was left untouched.
    NotFound,
    /// The queue file does not exist.
    MissingFile,
}

/// Mark the first line matching `original` (with or without a marker).
pub async fn mark(
    path: &Path,
    original: &str,
    status: LineStatus,
) -> Result<MarkOutcome, QueueError> {
    mark_at(path, None, original, status).await
}

/// Mark a line, preferring the line at `line_hint` (1-based) when it still
/// matches `original`.
pub async fn mark_at(
    path: &Path,
    line_hint: Option<usize>,
    original: &str,
    status: LineStatus,
) -> Result<MarkOutcome, QueueError> {
    let Some(content) = read_queue(path).await? else {
        return Ok(MarkOutcome::MissingFile);
    };

    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let matches: Vec<(usize, LineStatus)> = lines
        .iter()
        .enumerate()
        .filter_map(|(i, l)| current_status(l, original).map(|s| (i, s)))
        .collect();

    let Some(&(index, current)) = pick_line(&matches, line_hint, status) else {
        warn!(
            path = %path.display(),
            line = %original,
            target = %status,
            "Line not found in queue file, status not recorded"
        );
        return Ok(MarkOutcome::NotFound);
    };

    let line_number = index + 1;
    if current == status {
        return Ok(MarkOutcome::Unchanged { line_number });
    }
    if !current.can_transition_to(status) {
        return Err(QueueError::InvalidTransition {
            line: original.to_string(),
            from: current.to_string(),
            to: status.to_string(),
        });
    }

    let mut rewritten = String::with_capacity(content.len() + status.suffix().len());
    for (i, line) in lines.iter().enumerate() {
        if i == index {
            rewritten.push_str(&with_status(original, status));
            rewritten.push_str(terminator(line));
        } else {
            rewritten.push_str(line);
        }
    }
    write_atomic(path, &rewritten).await?;

    debug!(line = line_number, from = %current, to = %status, "Marked queue line");
    Ok(MarkOutcome::Updated { line_number })
}

/// Strip the processing marker from every line that carries it.
///
/// Used on startup to requeue jobs orphaned by an interrupted run. Returns
/// the number of lines reset.
pub async fn reset_processing(path: &Path) -> Result<usize, QueueError> {
    let Some(content) = read_queue(path).await? else {
        return Ok(0);
    };

    let mut reset = 0;
    let rewritten: String = content
        .split_inclusive('\n')
        .map(|line| {
            let body = strip_terminator(line);
            let trimmed = body.trim_start();
            if trimmed.starts_with('#') {
                return line.to_string();
            }
            match split_status(body) {
                (stripped, LineStatus::Processing) => {
                    reset += 1;
                    format!("{stripped}{}", terminator(line))
                }
                _ => line.to_string(),
            }
        })
        .collect();

    if reset > 0 {
        write_atomic(path, &rewritten).await?;
    }
    Ok(reset)
}

/// Choose which of the matching lines to rewrite.
///
/// Lines in the status that normally precedes `status` come first, then any
/// line that can legally move to `status`, then lines already at `status`;
/// within each group the hinted line beats the others. When nothing fits,
/// the first match is returned so the caller reports the illegal transition.
fn pick_line(
    matches: &[(usize, LineStatus)],
    line_hint: Option<usize>,
    status: LineStatus,
) -> Option<&(usize, LineStatus)> {
    let hint = line_hint.and_then(|n| n.checked_sub(1));
    let prefer_hint = |accept: &dyn Fn(LineStatus) -> bool| {
        matches
            .iter()
            .find(|(i, s)| Some(*i) == hint && accept(*s))
            .or_else(|| matches.iter().find(|(_, s)| accept(*s)))
    };

    prefer_hint(&|s: LineStatus| s == status.predecessor())
        .or_else(|| prefer_hint(&|s: LineStatus| s != status && s.can_transition_to(status)))
        .or_else(|| prefer_hint(&|s: LineStatus| s == status))
        .or_else(|| matches.first())
}

/// Status of `line` if it is `original` with or without a marker.
fn current_status(line: &str, original: &str) -> Option<LineStatus> {
    let body = strip_terminator(line);
    [
        LineStatus::Unprocessed,
        LineStatus::Processing,
        LineStatus::Done,
        LineStatus::Failed,
    ]
    .into_iter()
    .find(|s| body.strip_prefix(original) == Some(s.suffix()))
}

fn strip_terminator(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

fn terminator(line: &str) -> &str {
    &line[strip_terminator(line).len()..]
}

async fn read_queue(path: &Path) -> Result<Option<String>, QueueError> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(QueueError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "queue".to_string());
    let suffix: u32 = rand::random();
    path.with_file_name(format!(".{name}.{suffix:08x}.tmp"))
}

async fn write_atomic(path: &Path, content: &str) -> Result<(), QueueError> {
    let tmp = temp_path(path);
    let result = async {
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, path).await
    }
    .await;

    if let Err(source) = result {
        let _ = fs::remove_file(&tmp).await;
        return Err(QueueError::Write {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}
