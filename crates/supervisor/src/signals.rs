//! Unix signal handling: SIGTERM/SIGINT drive graceful shutdown,
//! SIGHUP re-scans the config directory.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Reload,
}

/// Wait for the next relevant signal.
#[cfg(unix)]
pub async fn wait_for_signal() -> Signal {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("installing SIGINT handler");
    let mut sighup = signal(SignalKind::hangup()).expect("installing SIGHUP handler");

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM");
            Signal::Shutdown
        }
        _ = sigint.recv() => {
            tracing::info!("received SIGINT");
            Signal::Shutdown
        }
        _ = sighup.recv() => {
            tracing::info!("received SIGHUP");
            Signal::Reload
        }
    }
}

#[cfg(not(unix))]
pub async fn wait_for_signal() -> Signal {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("received ctrl-c");
    Signal::Shutdown
}
