use serde::{Deserialize, Serialize};

use flotilla_scaling::{ScalingEvent, ScalingMetrics};
use flotilla_types::{AgentInfo, ResourceUsage, TaskAssignment};

/// Running counters kept by the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub tasks_submitted: u64,
    pub tasks_assigned: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_cancelled: u64,
    pub tasks_requeued: u64,
    pub agents_registered: u64,
    pub agents_removed: u64,
    pub load_balancing_events: u64,
}

impl CoordinatorStats {
    /// Failed share of finished tasks, 0 when nothing has finished.
    pub fn error_rate(&self) -> f64 {
        let finished = self.tasks_completed + self.tasks_failed;
        if finished == 0 {
            return 0.0;
        }
        self.tasks_failed as f64 / finished as f64
    }
}

/// Point-in-time view of the whole coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSnapshot {
    pub agents: Vec<AgentInfo>,
    /// Dispatch order.
    pub pending_tasks: Vec<TaskAssignment>,
    pub assigned_tasks: Vec<TaskAssignment>,
    pub resource_usage: ResourceUsage,
    pub scaling_metrics: ScalingMetrics,
    pub stats: CoordinatorStats,
    pub recent_scaling_events: Vec<ScalingEvent>,
}
