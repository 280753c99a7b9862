//! Line status markers and their transitions.

use serde::{Deserialize, Serialize};

/// Suffix appended to a line that is being worked on.
pub const PROCESSING_SUFFIX: &str = " [-]";
/// Suffix appended to a line whose work is finished.
pub const DONE_SUFFIX: &str = " [x]";
/// Suffix appended to a line whose work raised an error.
pub const FAILED_SUFFIX: &str = " [!]";

/// Status of a job line, encoded as a trailing marker in the queue file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStatus {
    /// No marker; eligible for pickup.
    Unprocessed,
    /// ` [-]`
    Processing,
    /// ` [x]`
    Done,
    /// ` [!]`
    Failed,
}

impl LineStatus {
    /// The textual marker for this status (empty for `Unprocessed`).
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Unprocessed => "",
            Self::Processing => PROCESSING_SUFFIX,
            Self::Done => DONE_SUFFIX,
            Self::Failed => FAILED_SUFFIX,
        }
    }

    /// Check if this status allows transitioning to another status.
    ///
    /// Re-applying the current status is always allowed so that marking is
    /// idempotent.
    pub fn can_transition_to(&self, target: LineStatus) -> bool {
        use LineStatus::*;

        *self == target
            || matches!(
                (self, target),
                (Unprocessed, Processing) | (Unprocessed, Done) |
                (Processing, Done) | (Processing, Failed) |
                // Stale recovery
                (Processing, Unprocessed)
            )
    }

    /// The status a line normally holds right before moving to this one.
    pub fn predecessor(&self) -> LineStatus {
        match self {
            Self::Processing => Self::Unprocessed,
            Self::Done | Self::Failed | Self::Unprocessed => Self::Processing,
        }
    }

    /// Whether a line with this status is picked up by the reader.
    pub fn is_pending(&self) -> bool {
        *self == Self::Unprocessed
    }
}

impl std::fmt::Display for LineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unprocessed => "unprocessed",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Split a line into its body and status.
///
/// Only the right-trimmed line is inspected, and at most one marker is
/// stripped.
pub fn split_status(line: &str) -> (&str, LineStatus) {
    let trimmed = line.trim_end();
    for status in [LineStatus::Processing, LineStatus::Done, LineStatus::Failed] {
        if let Some(body) = trimmed.strip_suffix(status.suffix()) {
            return (body, status);
        }
    }
    (line, LineStatus::Unprocessed)
}

/// Append the marker for `status` to `body`.
pub fn with_status(body: &str, status: LineStatus) -> String {
    format!("{body}{}", status.suffix())
}
