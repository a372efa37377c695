use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use flotilla_scaling::ScalingConfig;
use flotilla_types::{AgentRegistration, FlotillaError, ResourceLimits, ResourceRequirements, Result};

use crate::strategy::LoadBalancingStrategy;

/// Coordinator settings, consumed once at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,

    #[serde(default = "default_min_agents")]
    pub min_agents: usize,

    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// An agent silent for longer than this is treated as failed by the health check.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,

    #[serde(default = "default_load_balance_interval_secs")]
    pub load_balance_interval_secs: u64,

    /// Carried for supervisors layered on top; not enforced here.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Carried for supervisors layered on top; not enforced here.
    #[serde(default = "default_agent_startup_timeout_secs")]
    pub agent_startup_timeout_secs: u64,

    /// Failures after which an agent is removed.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_scaling_check_interval_secs")]
    pub scaling_check_interval_secs: u64,

    #[serde(default = "default_usage_sample_interval_secs")]
    pub usage_sample_interval_secs: u64,

    #[serde(default)]
    pub load_balancing_strategy: LoadBalancingStrategy,

    #[serde(default = "default_enable_auto_scaling")]
    pub enable_auto_scaling: bool,

    #[serde(default)]
    pub resource_limits: ResourceLimits,

    /// Terminal tasks retained for inspection and metrics.
    #[serde(default = "default_max_task_history")]
    pub max_task_history: usize,

    /// Scaling thresholds. Its enabled flag and agent bounds are taken from the fields above.
    #[serde(default)]
    pub scaling: ScalingConfig,

    #[serde(default)]
    pub agent_template: AgentTemplate,
}

fn default_max_agents() -> usize {
    10
}

fn default_min_agents() -> usize {
    1
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_heartbeat_timeout_secs() -> u64 {
    90
}

fn default_load_balance_interval_secs() -> u64 {
    10
}

fn default_task_timeout_secs() -> u64 {
    300
}

fn default_agent_startup_timeout_secs() -> u64 {
    60
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_scaling_check_interval_secs() -> u64 {
    60
}

fn default_usage_sample_interval_secs() -> u64 {
    10
}

fn default_enable_auto_scaling() -> bool {
    true
}

fn default_max_task_history() -> usize {
    1_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
            min_agents: default_min_agents(),
            health_check_interval_secs: default_health_check_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            load_balance_interval_secs: default_load_balance_interval_secs(),
            task_timeout_secs: default_task_timeout_secs(),
            agent_startup_timeout_secs: default_agent_startup_timeout_secs(),
            failure_threshold: default_failure_threshold(),
            scaling_check_interval_secs: default_scaling_check_interval_secs(),
            usage_sample_interval_secs: default_usage_sample_interval_secs(),
            load_balancing_strategy: LoadBalancingStrategy::default(),
            enable_auto_scaling: default_enable_auto_scaling(),
            resource_limits: ResourceLimits::default(),
            max_task_history: default_max_task_history(),
            scaling: ScalingConfig::default(),
            agent_template: AgentTemplate::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_agents == 0 {
            return Err(FlotillaError::Config("max_agents must be at least 1".into()));
        }
        if self.min_agents > self.max_agents {
            return Err(FlotillaError::Config(format!(
                "min_agents ({}) exceeds max_agents ({})",
                self.min_agents, self.max_agents
            )));
        }
        if self.failure_threshold == 0 {
            return Err(FlotillaError::Config("failure_threshold must be at least 1".into()));
        }
        if !self.resource_limits.is_positive() {
            return Err(FlotillaError::Config(
                "resource_limits must be positive in every field".into(),
            ));
        }
        let intervals = [
            ("health_check_interval_secs", self.health_check_interval_secs),
            ("load_balance_interval_secs", self.load_balance_interval_secs),
            ("scaling_check_interval_secs", self.scaling_check_interval_secs),
            ("usage_sample_interval_secs", self.usage_sample_interval_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, secs)| *secs == 0) {
            return Err(FlotillaError::Config(format!("{name} must be at least 1")));
        }
        if self.max_task_history == 0 {
            return Err(FlotillaError::Config("max_task_history must be at least 1".into()));
        }
        self.scaling_config().validate()
    }

    /// The scaling section with the coordinator-level bounds applied.
    pub fn scaling_config(&self) -> ScalingConfig {
        ScalingConfig {
            enabled: self.enable_auto_scaling,
            min_agents: self.min_agents,
            max_agents: self.max_agents,
            ..self.scaling.clone()
        }
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn load_balance_interval(&self) -> Duration {
        Duration::from_secs(self.load_balance_interval_secs)
    }

    pub fn scaling_check_interval(&self) -> Duration {
        Duration::from_secs(self.scaling_check_interval_secs)
    }

    pub fn usage_sample_interval(&self) -> Duration {
        Duration::from_secs(self.usage_sample_interval_secs)
    }
}

/// Shape of the agents the scaling manager provisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTemplate {
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,

    #[serde(default)]
    pub capabilities: BTreeSet<String>,

    #[serde(default = "default_template_requirements")]
    pub resource_requirements: ResourceRequirements,

    #[serde(default = "default_template_slots")]
    pub max_concurrent_tasks: u32,
}

fn default_id_prefix() -> String {
    "auto-agent".to_string()
}

fn default_template_requirements() -> ResourceRequirements {
    ResourceRequirements::new(1.0, 512, 1024, 10.0)
}

fn default_template_slots() -> u32 {
    4
}

impl Default for AgentTemplate {
    fn default() -> Self {
        Self {
            id_prefix: default_id_prefix(),
            capabilities: BTreeSet::new(),
            resource_requirements: default_template_requirements(),
            max_concurrent_tasks: default_template_slots(),
        }
    }
}

impl AgentTemplate {
    pub fn to_registration(&self, agent_id: impl Into<String>) -> AgentRegistration {
        AgentRegistration::new(agent_id)
            .with_capabilities(self.capabilities.iter().cloned())
            .with_requirements(self.resource_requirements)
            .with_max_concurrent_tasks(self.max_concurrent_tasks)
    }
}
