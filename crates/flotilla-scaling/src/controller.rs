use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use flotilla_types::Result;

use crate::event::ScalingMetrics;

/// Load of one agent, as seen when picking scale-down victims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentLoad {
    pub agent_id: String,
    pub active_tasks: u32,
}

/// The fleet surface the scaling manager acts through. The coordinator implements it.
#[async_trait]
pub trait FleetController: Send + Sync {
    async fn agent_count(&self) -> usize;

    async fn scaling_metrics(&self) -> ScalingMetrics;

    /// Every agent, in registration order.
    async fn agent_loads(&self) -> Vec<AgentLoad>;

    /// Add one agent slot. Returns the new agent's ID.
    async fn provision_agent(&self) -> Result<String>;

    async fn remove_agent(&self, agent_id: &str) -> Result<bool>;
}
