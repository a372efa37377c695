use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::manager::ResourceManager;

/// Handle to a running usage sampling loop.
pub struct MonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    pub(crate) fn spawn(manager: Arc<ResourceManager>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(run(Arc::downgrade(&manager), interval, shutdown_rx));
        Self { shutdown_tx, join }
    }

    /// Signal shutdown and wait for the loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            tracing::error!("Resource monitoring loop panicked: {}", e);
        }
    }
}

async fn run(manager: Weak<ResourceManager>, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let usage = manager.get_resource_usage().await;
                tracing::debug!(
                    cpu = usage.cpu_percent,
                    memory = usage.memory_percent,
                    disk = usage.disk_percent,
                    network = usage.network_percent,
                    "Resource usage sampled"
                );
            }
            Ok(()) = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}
