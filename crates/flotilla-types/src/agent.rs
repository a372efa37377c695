use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::{ResourceAllocation, ResourceRequirements};

/// Health of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Starting,
    Healthy,
    Degraded,
    Unhealthy,
    Stopping,
    Offline,
}

impl AgentStatus {
    /// Only healthy agents receive new work.
    pub fn accepts_tasks(self) -> bool {
        matches!(self, AgentStatus::Healthy)
    }

    /// Degraded and unhealthy agents return to healthy on a fresh heartbeat.
    pub fn recovers_on_heartbeat(self) -> bool {
        matches!(
            self,
            AgentStatus::Starting | AgentStatus::Degraded | AgentStatus::Unhealthy
        )
    }
}

fn default_max_concurrent_tasks() -> u32 {
    4
}

/// What a worker submits when it joins the fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub agent_id: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub resource_requirements: ResourceRequirements,
    /// Task slots this agent runs in parallel.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: u32,
}

impl AgentRegistration {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            capabilities: BTreeSet::new(),
            resource_requirements: ResourceRequirements::default(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
        }
    }

    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_requirements(mut self, requirements: ResourceRequirements) -> Self {
        self.resource_requirements = requirements;
        self
    }

    pub fn with_max_concurrent_tasks(mut self, slots: u32) -> Self {
        self.max_concurrent_tasks = slots;
        self
    }
}

/// A registered worker slot as tracked by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: String,
    pub status: AgentStatus,
    pub capabilities: BTreeSet<String>,
    pub resource_requirements: ResourceRequirements,
    pub resource_allocation: Option<ResourceAllocation>,
    pub max_concurrent_tasks: u32,
    pub active_tasks: u32,
    pub error_count: u32,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl AgentInfo {
    pub fn from_registration(registration: AgentRegistration) -> Self {
        let now = Utc::now();
        Self {
            agent_id: registration.agent_id,
            status: AgentStatus::Starting,
            capabilities: registration.capabilities,
            resource_requirements: registration.resource_requirements,
            resource_allocation: None,
            max_concurrent_tasks: registration.max_concurrent_tasks,
            active_tasks: 0,
            error_count: 0,
            last_heartbeat: now,
            registered_at: now,
        }
    }

    pub fn has_spare_capacity(&self) -> bool {
        self.active_tasks < self.max_concurrent_tasks
    }

    /// Healthy with at least one free slot.
    pub fn is_available(&self) -> bool {
        self.status.accepts_tasks() && self.has_spare_capacity()
    }

    pub fn has_capabilities<'a, I>(&self, required: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        required.into_iter().all(|cap| self.capabilities.contains(cap))
    }

    /// Fraction of task slots still free, in 0-1.
    pub fn free_slot_ratio(&self) -> f64 {
        if self.max_concurrent_tasks == 0 {
            return 0.0;
        }
        let free = self.max_concurrent_tasks.saturating_sub(self.active_tasks);
        free as f64 / self.max_concurrent_tasks as f64
    }
}
