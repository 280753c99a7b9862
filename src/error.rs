//! Error types for linequeue.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for the queue runner.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse command template: {0}")]
    Command(#[from] LexError),
}

/// Errors reading or rewriting the queue file.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Failed to read queue file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write queue file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Illegal status transition for line {line:?}: {from} -> {to}")]
    InvalidTransition {
        line: String,
        from: String,
        to: String,
    },
}

/// Tokenizer errors for shell-like quoting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LexError {
    #[error("Unterminated {quote} quote starting at byte {offset}")]
    UnterminatedQuote { quote: char, offset: usize },

    #[error("Trailing backslash with nothing to escape")]
    TrailingEscape,
}

/// A queue line that cannot be turned into a job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("Expected at least 4 fields, found {found}")]
    TooFewFields { found: usize },

    #[error("Field {field} is not an integer: {value:?}")]
    NotAnInteger { field: &'static str, value: String },

    #[error("Field {field} must be positive")]
    NotPositive { field: &'static str },
}

/// Unit-of-work execution errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} exited with {status}: {stderr}")]
    NonZeroExit {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Unit timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Failed to allocate output path in {dir}: {source}")]
    Output {
        dir: PathBuf,
        source: std::io::Error,
    },

    #[error("Job stopped after {units_completed} of {count} unit(s): {source}")]
    Partial {
        units_completed: u32,
        count: u32,
        #[source]
        source: Box<WorkError>,
    },

    #[error("{0}")]
    Other(String),
}

impl WorkError {
    /// Number of units that finished before the failure.
    pub fn units_completed(&self) -> u32 {
        match self {
            Self::Partial {
                units_completed, ..
            } => *units_completed,
            _ => 0,
        }
    }
}

/// Result type alias for linequeue.
pub type Result<T> = std::result::Result<T, Error>;
