//! File-backed job queue.
//!
//! Core components:
//! - `status` — line markers (` [-]`, ` [x]`, ` [!]`) and transitions
//! - `reader` — pending-line scan
//! - `lexer` — shell-like word splitting
//! - `parser` — `<count> <height> <width> <detail>` job lines
//! - `rewriter` — in-place status updates via temp file + rename

pub mod lexer;
pub mod parser;
pub mod reader;
pub mod rewriter;
pub mod status;

pub use parser::{ParsedJob, parse};
pub use reader::{PendingLine, read_pending};
pub use rewriter::{MarkOutcome, mark, mark_at, reset_processing};
pub use status::LineStatus;
