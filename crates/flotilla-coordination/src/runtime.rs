use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use flotilla_scaling::ScalingDecision;

use crate::coordinator::Coordinator;

/// Handles to the coordinator's periodic loops.
pub(crate) struct BackgroundLoops {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundLoops {
    /// Signal every loop and wait for each in-flight cycle to finish.
    async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("{} loop panicked: {}", name, e);
            }
        }
    }
}

impl Coordinator {
    /// Spawn the health-check, rebalance and scaling loops and start usage
    /// sampling. No-op if already running.
    pub async fn start(self: &Arc<Self>) {
        let mut loops = self.loops.lock().await;
        if loops.is_some() {
            return;
        }

        let config = self.config();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = vec![
            (
                "health-check",
                spawn_periodic(self, config.health_check_interval(), shutdown_rx.clone(), |c| async move {
                    let stale = c.health_check().await;
                    if !stale.is_empty() {
                        tracing::info!("Health check flagged {} stale agent(s)", stale.len());
                    }
                }),
            ),
            (
                "rebalance",
                spawn_periodic(self, config.load_balance_interval(), shutdown_rx.clone(), |c| async move {
                    c.rebalance_load().await;
                }),
            ),
        ];

        if self.scaling_manager().config().enabled {
            handles.push((
                "scaling-check",
                spawn_periodic(self, config.scaling_check_interval(), shutdown_rx, |c| async move {
                    match c.check_scaling().await {
                        Ok(ScalingDecision::NoAction) => {}
                        Ok(decision) => tracing::info!(action = ?decision.action(), "Scaling action taken"),
                        Err(e) => tracing::warn!("Scaling check failed: {}", e),
                    }
                }),
            ));
        }

        self.resource_manager().start_monitoring().await;

        tracing::info!(
            loops = handles.len(),
            strategy = %config.load_balancing_strategy,
            "Coordinator started"
        );
        *loops = Some(BackgroundLoops { shutdown_tx, handles });
    }

    /// Stop every loop, letting in-flight cycles drain. No-op if not running.
    pub async fn stop(&self) {
        let loops = self.loops.lock().await.take();
        if let Some(loops) = loops {
            loops.shutdown().await;
            self.resource_manager().stop_monitoring().await;
            tracing::info!("Coordinator stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.loops.lock().await.is_some()
    }
}

/// Run `cycle` every `period` until shutdown is signalled or the coordinator is dropped.
/// The first cycle fires one period after start.
fn spawn_periodic<F, Fut>(
    coordinator: &Arc<Coordinator>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    cycle: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<Coordinator>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let coordinator = Arc::downgrade(coordinator);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(coordinator) = coordinator.upgrade() else {
                        break;
                    };
                    cycle(coordinator).await;
                }
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
