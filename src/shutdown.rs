//! Cooperative cancellation for the collection loop.
//!
//! A [`Shutdown`] is the trigger side and may be cloned into whatever should
//! be able to stop the run (Ctrl+C trap, tests). [`ShutdownHandle`]s observe it.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::{select, signal::ctrl_c};
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct Shutdown {
    trigger: Arc<watch::Sender<bool>>,
}

#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (trigger, _) = watch::channel(false);
        Self {
            trigger: Arc::new(trigger),
        }
    }

    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            rx: self.trigger.subscribe(),
        }
    }

    pub fn trigger(&self) {
        self.trigger.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.trigger.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been triggered, immediately if it already
    /// was. Never resolves if every [`Shutdown`] was dropped untriggered.
    pub async fn wait_for_shutdown(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Triggers `shutdown` on Ctrl+C.
pub fn trap_ctrl_c(shutdown: Shutdown) {
    let mut handle = shutdown.handle();
    tokio::spawn(async move {
        select! {
            res = ctrl_c() => {
                if res.is_err() {
                    error!("Failed to listen for ctrl_c signal - triggering shutdown");
                }
                info!("Shutdown requested");
                shutdown.trigger();
            }
            _ = handle.wait_for_shutdown() => {}
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_handle_sees_trigger() {
        let shutdown = Shutdown::new();
        let mut handle = shutdown.handle();
        assert!(!handle.is_triggered());

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trigger.trigger();
        });

        tokio::time::timeout(Duration::from_secs(5), handle.wait_for_shutdown())
            .await
            .expect("shutdown was not observed");
        assert!(handle.is_triggered());
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_late_handle_returns_immediately() {
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let mut handle = shutdown.handle();
        tokio::time::timeout(Duration::from_secs(1), handle.wait_for_shutdown())
            .await
            .expect("already-triggered shutdown should resolve at once");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trigger_never_resolves() {
        let shutdown = Shutdown::new();
        let mut handle = shutdown.handle();
        drop(shutdown);

        let waited = tokio::time::timeout(Duration::from_secs(60), handle.wait_for_shutdown()).await;
        assert!(waited.is_err());
    }
}
