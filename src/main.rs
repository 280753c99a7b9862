use std::path::PathBuf;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use linequeue::config;
use linequeue::runner::QueueRunner;
use linequeue::shutdown::install_shutdown_handler;

/// Console logging, plus a daily rolling file when `LINEQUEUE_LOG_DIR` is set.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match std::env::var("LINEQUEUE_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "linequeue.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing();

    let (mut config, executor_config) = config::load_from_env().context("invalid configuration")?;
    // The only positional argument is the queue file
    if let Some(path) = std::env::args_os().nth(1) {
        config.queue_file = PathBuf::from(path);
    }
    let executor = executor_config.build();

    eprintln!("📋 linequeue v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Queue file: {}", config.queue_file.display());
    eprintln!("   Executor: {}", executor.name());
    if executor_config.is_dry_run() {
        eprintln!("   ⚠️  Dry run: LINEQUEUE_COMMAND is unset, jobs are logged and marked done");
    }
    eprintln!(
        "   Output: {}/<n>.{}",
        executor_config.output_dir.display(),
        executor_config.output_ext
    );
    eprintln!("   Poll interval: {}s", config.poll_interval.as_secs());
    eprintln!("   Press Ctrl+C to stop\n");

    let shutdown = install_shutdown_handler();
    let mut runner = QueueRunner::new(config, executor).with_shutdown(shutdown);
    runner.run().await.context("queue runner failed")?;

    eprintln!("\nStopped by user. Exiting...");
    Ok(())
}
