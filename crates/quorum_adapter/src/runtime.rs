#![forbid(unsafe_code)]

use tokio::task::JoinError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use quorum_os::{ConsolidationLock, LockError};
use quorum_storage::LockRepo;

/// `RUST_LOG` wins; otherwise `-v` raises the default `info` to debug, `-vv` to trace.
pub fn init_tracing(verbosity: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(level)
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Resolves on SIGINT or SIGTERM. A handler that cannot be installed leaves the
/// process to run until killed.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigint, mut sigterm) =
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
                (Err(err), _) | (_, Err(err)) => {
                    warn!(error = %err, "unable to install signal handlers");
                    return std::future::pending::<()>().await;
                }
            };
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "unable to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}

/// Best-effort release on the way out; failures are logged, never raised.
pub fn release_on_exit<S: LockRepo + Send + 'static>(lock: &mut ConsolidationLock<S>) {
    match lock.release() {
        Ok(true) => info!(lock = %lock.name(), "released lock"),
        Ok(false) => warn!(lock = %lock.name(), "lock was not held at exit"),
        Err(err) => error!(lock = %lock.name(), error = %err, "unable to release lock"),
    }
}

/// Turns the heartbeat task's exit into the fatal error it stands for.
pub fn heartbeat_failure(exit: Result<LockError, JoinError>) -> anyhow::Error {
    match exit {
        Ok(lost) => anyhow::Error::new(lost).context("lock lease lost"),
        Err(join) => anyhow::anyhow!("lock heartbeat task failed: {join}"),
    }
}
