use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fleet snapshot the coordinator hands to the scaling manager each cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingMetrics {
    pub current_agents: usize,
    pub target_agents: usize,
    pub queue_depth: usize,
    /// Seconds.
    pub avg_response_time: f64,
    /// 0-1.
    pub resource_utilization: f64,
    /// Completed tasks per second.
    pub throughput: f64,
    /// 0-1.
    pub error_rate: f64,
    pub timestamp: DateTime<Utc>,
}

impl ScalingMetrics {
    pub fn new(current_agents: usize) -> Self {
        Self {
            current_agents,
            target_agents: current_agents,
            queue_depth: 0,
            avg_response_time: 0.0,
            resource_utilization: 0.0,
            throughput: 0.0,
            error_rate: 0.0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn with_response_time(mut self, secs: f64) -> Self {
        self.avg_response_time = secs;
        self
    }

    pub fn with_utilization(mut self, utilization: f64) -> Self {
        self.resource_utilization = utilization;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
    NoAction,
}

/// The metric that fired a scaling decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingTrigger {
    pub reason: String,
    pub metric: String,
    pub current_value: f64,
    pub threshold: f64,
}

impl ScalingTrigger {
    pub fn new(reason: impl Into<String>, metric: impl Into<String>, current_value: f64, threshold: f64) -> Self {
        Self {
            reason: reason.into(),
            metric: metric.into(),
            current_value,
            threshold,
        }
    }
}

/// Outcome of one scaling check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalingDecision {
    NoAction,
    ScaleUp { added: usize, trigger: ScalingTrigger },
    ScaleDown { removed: usize, trigger: ScalingTrigger },
}

impl ScalingDecision {
    pub fn action(&self) -> ScalingAction {
        match self {
            ScalingDecision::NoAction => ScalingAction::NoAction,
            ScalingDecision::ScaleUp { .. } => ScalingAction::ScaleUp,
            ScalingDecision::ScaleDown { .. } => ScalingAction::ScaleDown,
        }
    }

    pub fn trigger(&self) -> Option<&ScalingTrigger> {
        match self {
            ScalingDecision::NoAction => None,
            ScalingDecision::ScaleUp { trigger, .. } | ScalingDecision::ScaleDown { trigger, .. } => {
                Some(trigger)
            }
        }
    }
}

/// Audit record of one executed scaling action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: ScalingAction,
    /// `None` for manually requested actions.
    pub trigger: Option<ScalingTrigger>,
    pub agents_before: usize,
    pub agents_after: usize,
    pub success: bool,
    pub error: Option<String>,
}

impl ScalingEvent {
    pub fn new(
        action: ScalingAction,
        trigger: Option<ScalingTrigger>,
        agents_before: usize,
        agents_after: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action,
            trigger,
            agents_before,
            agents_after,
            success: true,
            error: None,
        }
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}
