use thiserror::Error;

use crate::task::{TaskEvent, TaskStatus};

#[derive(Debug, Error)]
pub enum FlotillaError {
    /// Duplicate agent ID, registry at capacity, or resource denial during registration.
    #[error("Agent registration failed: {0}")]
    AgentRegistration(String),

    /// Duplicate allocation, or an aggregate limit / live usage ceiling would be breached.
    #[error("Resource allocation failed: {0}")]
    ResourceAllocation(String),

    /// A malformed submission. Running out of capacity is not an error; the task is queued.
    #[error("Task distribution failed: {0}")]
    TaskDistribution(String),

    /// Scale-up at the agent ceiling, scale-down below the floor, or a failed provisioning step.
    #[error("Scaling failed: {0}")]
    Scaling(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("State transition error: cannot transition from {from:?} via {event:?}")]
    InvalidStateTransition { from: TaskStatus, event: TaskEvent },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Metrics probe error: {0}")]
    MetricsProbe(String),
}

pub type Result<T> = std::result::Result<T, FlotillaError>;
