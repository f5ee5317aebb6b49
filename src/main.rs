use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use transcript_sync::config::SyncConfig;
use transcript_sync::store::{Database, LibSqlBackend};
use transcript_sync::sync::{Schedule, SyncRunner, run_until_shutdown, spawn_sync_loop};
use transcript_sync::upstream::{HttpUpstream, RetryingUpstream, UpstreamApi};

/// What the process does after startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// One transcript sync, then exit.
    Once,
    /// Transcript sync on a schedule until Ctrl-C.
    Loop,
    /// One raw log sync, then exit.
    Logs,
}

impl Mode {
    fn from_args() -> anyhow::Result<Self> {
        match std::env::args().nth(1).as_deref() {
            None | Some("once") => Ok(Mode::Once),
            Some("loop") => Ok(Mode::Loop),
            Some("logs") => Ok(Mode::Logs),
            Some(other) => anyhow::bail!("unknown mode {other:?}, expected once, loop, or logs"),
        }
    }
}

/// Install the tracing subscriber. The returned guard must outlive logging.
fn init_tracing(config: &SyncConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "transcript-sync.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    }
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested, abandoning the current run");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mode = Mode::from_args()?;
    let config = SyncConfig::from_env().context("failed to load configuration")?;
    let _log_guard = init_tracing(&config);

    eprintln!("Transcript Sync v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Upstream: {}", config.base_url);
    eprintln!("   Mode: {:?}", mode);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Upstream ─────────────────────────────────────────────────────────
    let http = HttpUpstream::new(&config.base_url, config.api_key, config.request_timeout)?;
    let api: Arc<dyn UpstreamApi> = Arc::new(RetryingUpstream::new(http, config.retry.clone()));

    let runner = Arc::new(SyncRunner::new(
        Arc::clone(&api),
        Arc::clone(&db),
        config.sync.clone(),
    ));

    match mode {
        Mode::Once => {
            if let Some(result) = run_until_shutdown(runner.run_once(), shutdown_signal()).await {
                result?;
            }
        }
        Mode::Logs => {
            if let Some(result) = run_until_shutdown(runner.run_logs(), shutdown_signal()).await {
                result?;
            }
        }
        Mode::Loop => {
            let schedule = Schedule::from_parts(config.poll_interval, config.cron.as_deref())?;
            let (handle, stop) = spawn_sync_loop(Arc::clone(&runner), schedule);

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            tracing::info!("Shutdown requested, waiting for the current run to finish");
            stop.store(true, std::sync::atomic::Ordering::Relaxed);
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Sync loop task failed");
            }
        }
    }

    drop(runner);
    drop(api);
    drop(db);
    tracing::info!("Upstream client and database closed");
    Ok(())
}
