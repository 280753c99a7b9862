//! linequeue — a plain text file as a polled job queue.

pub mod config;
pub mod error;
pub mod queue;
pub mod runner;
pub mod shutdown;
pub mod work;
