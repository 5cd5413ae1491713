//! Process-wide cancellation
//!
//! A single `watch` channel carries the stop flag. Every long-running loop
//! holds a receiver and checks it at loop-top and while sleeping.

use log::{error, info};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Fresh stop flag, initially unset
pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolve once the stop flag is set or every sender is gone
pub async fn wait(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Resolve on SIGINT, SIGTERM or SIGQUIT
pub async fn signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = unix_signal(tokio::signal::unix::SignalKind::terminate(), "SIGTERM");
    #[cfg(unix)]
    let quit = unix_signal(tokio::signal::unix::SignalKind::quit(), "SIGQUIT");

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    #[cfg(not(unix))]
    let quit = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
        _ = quit => info!("Received SIGQUIT"),
    }
}

#[cfg(unix)]
async fn unix_signal(kind: tokio::signal::unix::SignalKind, name: &str) {
    match tokio::signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!("Failed to install {} handler: {}", name, e);
            std::future::pending::<()>().await;
        }
    }
}

/// Set the stop flag when the process is asked to terminate
pub fn listen(tx: watch::Sender<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        signal().await;
        let _ = tx.send(true);
    })
}
