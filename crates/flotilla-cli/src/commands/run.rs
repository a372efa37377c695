use std::sync::Arc;

use anyhow::{Context, Result};

use flotilla_coordination::Coordinator;
use flotilla_resources::SysinfoProbe;

use crate::config::FlotillaConfig;

/// Build the coordinator against live host metrics and run it until Ctrl-C.
pub async fn run(config: FlotillaConfig) -> Result<()> {
    let probe = Arc::new(SysinfoProbe::default());
    let coordinator = Arc::new(
        Coordinator::new(config.coordinator, probe).context("Failed to build coordinator")?,
    );

    for registration in config.initial_agents {
        let agent_id = registration.agent_id.clone();
        coordinator
            .register_agent(registration)
            .await
            .with_context(|| format!("Failed to register initial agent {agent_id}"))?;
    }

    coordinator.start().await;
    tracing::info!(
        agents = coordinator.agent_count().await,
        "Flotilla running; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");
    coordinator.stop().await;

    let stats = coordinator.stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
