use std::time::Duration;

use serde::{Deserialize, Serialize};

use flotilla_types::{FlotillaError, Result};

/// Thresholds and pacing for autoscaling decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_min_agents")]
    pub min_agents: usize,

    #[serde(default = "default_max_agents")]
    pub max_agents: usize,

    /// Minimum seconds between two scaling actions.
    #[serde(default = "default_cooldown_period_secs")]
    pub cooldown_period_secs: u64,

    #[serde(default = "default_step")]
    pub scale_up_step: usize,

    #[serde(default = "default_step")]
    pub scale_down_step: usize,

    /// Pending tasks above which capacity is added.
    #[serde(default = "default_queue_depth_threshold")]
    pub queue_depth_threshold: usize,

    /// Average response time in seconds above which capacity is added.
    #[serde(default = "default_response_time_threshold")]
    pub response_time_threshold: f64,

    #[serde(default = "default_scale_up_utilization")]
    pub scale_up_utilization: f64,

    #[serde(default = "default_scale_down_utilization")]
    pub scale_down_utilization: f64,

    /// Metric samples considered by the stability check.
    #[serde(default = "default_stability_window")]
    pub stability_window: usize,

    #[serde(default = "default_min_stability_samples")]
    pub min_stability_samples: usize,

    /// Population variance of queue depth must stay below this to count as stable.
    #[serde(default = "default_queue_variance_tolerance")]
    pub queue_variance_tolerance: f64,

    /// Population variance of response time (s²) must stay below this to count as stable.
    #[serde(default = "default_response_variance_tolerance")]
    pub response_variance_tolerance: f64,

    #[serde(default = "default_max_event_history")]
    pub max_event_history: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_min_agents() -> usize {
    1
}

fn default_max_agents() -> usize {
    10
}

fn default_cooldown_period_secs() -> u64 {
    300
}

fn default_step() -> usize {
    1
}

fn default_queue_depth_threshold() -> usize {
    100
}

fn default_response_time_threshold() -> f64 {
    5.0
}

fn default_scale_up_utilization() -> f64 {
    0.90
}

fn default_scale_down_utilization() -> f64 {
    0.30
}

fn default_stability_window() -> usize {
    10
}

fn default_min_stability_samples() -> usize {
    3
}

fn default_queue_variance_tolerance() -> f64 {
    25.0
}

fn default_response_variance_tolerance() -> f64 {
    0.25
}

fn default_max_event_history() -> usize {
    1_000
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            min_agents: default_min_agents(),
            max_agents: default_max_agents(),
            cooldown_period_secs: default_cooldown_period_secs(),
            scale_up_step: default_step(),
            scale_down_step: default_step(),
            queue_depth_threshold: default_queue_depth_threshold(),
            response_time_threshold: default_response_time_threshold(),
            scale_up_utilization: default_scale_up_utilization(),
            scale_down_utilization: default_scale_down_utilization(),
            stability_window: default_stability_window(),
            min_stability_samples: default_min_stability_samples(),
            queue_variance_tolerance: default_queue_variance_tolerance(),
            response_variance_tolerance: default_response_variance_tolerance(),
            max_event_history: default_max_event_history(),
        }
    }
}

impl ScalingConfig {
    pub fn cooldown_period(&self) -> Duration {
        Duration::from_secs(self.cooldown_period_secs)
    }

    /// Reject settings under which a scaling action could never take effect.
    pub fn validate(&self) -> Result<()> {
        if self.scale_up_step == 0 || self.scale_down_step == 0 {
            return Err(FlotillaError::Config(
                "scale_up_step and scale_down_step must be at least 1".into(),
            ));
        }
        if self.min_stability_samples == 0 {
            return Err(FlotillaError::Config("min_stability_samples must be at least 1".into()));
        }
        if self.stability_window < self.min_stability_samples {
            return Err(FlotillaError::Config(format!(
                "stability_window ({}) is smaller than min_stability_samples ({}); scale-down could never fire",
                self.stability_window, self.min_stability_samples
            )));
        }
        if self.max_event_history == 0 {
            return Err(FlotillaError::Config("max_event_history must be at least 1".into()));
        }
        Ok(())
    }
}
