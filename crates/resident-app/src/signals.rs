//! OS signal handling
//!
//! SIGINT and SIGTERM always request a clean shutdown. SIGUSR1 and SIGUSR2
//! map to hot reload and hot restart, and are only registered when the run
//! can honor them.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use resident_core::prelude::*;

use crate::message::RunnerMessage;

/// Spawn a task forwarding signals to the runner until the receiver is gone.
pub fn spawn_signal_handler(
    tx: mpsc::Sender<RunnerMessage>,
    reload_signals: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = forward_signals(tx, reload_signals).await {
            error!("Signal handler error: {}", e);
        }
    })
}

#[cfg(unix)]
async fn forward_signals(tx: mpsc::Sender<RunnerMessage>, reload_signals: bool) -> Result<()> {
    use tokio::signal::unix::{signal, Signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| Error::terminal(format!("Failed to create SIGINT handler: {}", e)))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| Error::terminal(format!("Failed to create SIGTERM handler: {}", e)))?;

    let (mut sigusr1, mut sigusr2) = if reload_signals {
        let usr1 = signal(SignalKind::user_defined1())
            .map_err(|e| Error::terminal(format!("Failed to create SIGUSR1 handler: {}", e)))?;
        let usr2 = signal(SignalKind::user_defined2())
            .map_err(|e| Error::terminal(format!("Failed to create SIGUSR2 handler: {}", e)))?;
        (Some(usr1), Some(usr2))
    } else {
        (None, None)
    };

    async fn recv_optional(signal: &mut Option<Signal>) -> Option<()> {
        match signal {
            Some(signal) => signal.recv().await,
            None => std::future::pending().await,
        }
    }

    loop {
        let message = tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
                RunnerMessage::Terminate
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                RunnerMessage::Terminate
            }
            _ = recv_optional(&mut sigusr1) => {
                info!("Received SIGUSR1");
                RunnerMessage::ReloadSignal
            }
            _ = recv_optional(&mut sigusr2) => {
                info!("Received SIGUSR2");
                RunnerMessage::RestartSignal
            }
        };

        if tx.send(message).await.is_err() {
            return Ok(());
        }
    }
}

#[cfg(windows)]
async fn forward_signals(tx: mpsc::Sender<RunnerMessage>, _reload_signals: bool) -> Result<()> {
    loop {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| Error::terminal(format!("Failed to listen for Ctrl+C: {}", e)))?;
        info!("Received Ctrl+C");
        if tx.send(RunnerMessage::Terminate).await.is_err() {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::time::Duration;

    #[tokio::test]
    #[serial]
    async fn test_signal_handler_spawn() {
        let (tx, mut rx) = mpsc::channel::<RunnerMessage>(1);

        let handle = spawn_signal_handler(tx, false);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(rx.try_recv().is_err());
        handle.abort();
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_sigusr1_requests_reload() {
        let (tx, mut rx) = mpsc::channel::<RunnerMessage>(4);
        let handle = spawn_signal_handler(tx, true);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = std::process::Command::new("kill")
            .args(["-USR1", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(message, Some(RunnerMessage::ReloadSignal));
        handle.abort();
    }
}
