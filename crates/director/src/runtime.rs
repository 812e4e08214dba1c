//! Runtime glue — logging init, a supervised task spawner, and the shutdown
//! signal the long-running workers select against. Matches the teacher's
//! `runtime::boot::init_logging` and the overall init→run→unload shape of
//! its boot sequence, minus the gRPC/TLS serving step this crate doesn't
//! ship.

use std::future::Future;

use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the `tracing-subscriber` registry (env-filter + fmt layer).
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "director=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Spawn `task` under a supervisor that logs an uncaught error instead of
/// letting it vanish with the task, and treats cancellation as expected
/// rather than a failure worth logging.
pub fn spawn<F>(name: &'static str, task: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), crate::error::DirectorError>> + Send + 'static,
{
    tokio::spawn(async move {
        match task.await {
            Ok(()) => tracing::debug!(worker = name, "worker exited"),
            Err(crate::error::DirectorError::Cancelled) => {
                tracing::debug!(worker = name, "worker cancelled")
            }
            Err(e) => tracing::error!(worker = name, error = %e, "worker failed"),
        }
    })
}

/// Waits for Ctrl+C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
