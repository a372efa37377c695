use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::FlotillaError;

/// Task assignment lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

/// Events that drive task status transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskEvent {
    Assign,
    Start,
    Complete,
    Fail,
    /// The owning agent went away; the task goes back to the queue.
    Requeue,
    Cancel,
}

impl TaskStatus {
    /// Attempt a status transition given an event.
    pub fn transition(self, event: TaskEvent) -> super::error::Result<TaskStatus> {
        match (self, event) {
            (TaskStatus::Pending, TaskEvent::Assign) => Ok(TaskStatus::Assigned),

            (TaskStatus::Assigned, TaskEvent::Start) => Ok(TaskStatus::InProgress),

            (TaskStatus::Assigned | TaskStatus::InProgress, TaskEvent::Complete) => {
                Ok(TaskStatus::Completed)
            }
            (TaskStatus::Assigned | TaskStatus::InProgress, TaskEvent::Fail) => {
                Ok(TaskStatus::Failed)
            }
            (TaskStatus::Assigned | TaskStatus::InProgress, TaskEvent::Requeue) => {
                Ok(TaskStatus::Pending)
            }

            (
                TaskStatus::Pending | TaskStatus::Assigned | TaskStatus::InProgress,
                TaskEvent::Cancel,
            ) => Ok(TaskStatus::Cancelled),

            (status, event) => Err(FlotillaError::InvalidStateTransition {
                from: status,
                event,
            }),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// A task submission as handed over by the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

impl TaskRequest {
    pub fn new(payload: serde_json::Value, priority: i32) -> Self {
        Self {
            payload,
            priority,
            required_capabilities: BTreeSet::new(),
            deadline: None,
        }
    }

    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// A unit of work, bound to an agent or waiting for one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: String,
    /// Empty while the task is pending.
    pub agent_id: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub required_capabilities: BTreeSet<String>,
    /// Advisory only; enforcement belongs to whoever runs the task.
    pub deadline: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    /// Arrival order, used to break priority ties.
    pub sequence: u64,
    /// How many times the task went back to the queue after an agent loss.
    pub requeue_count: u32,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskAssignment {
    pub fn from_request(request: TaskRequest, sequence: u64) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            agent_id: String::new(),
            payload: request.payload,
            priority: request.priority,
            required_capabilities: request.required_capabilities,
            deadline: request.deadline,
            status: TaskStatus::Pending,
            sequence,
            requeue_count: 0,
            created_at: Utc::now(),
            assigned_at: None,
            completed_at: None,
        }
    }

    pub fn assign_to(&mut self, agent_id: impl Into<String>) -> super::error::Result<()> {
        self.status = self.status.transition(TaskEvent::Assign)?;
        self.agent_id = agent_id.into();
        self.assigned_at = Some(Utc::now());
        Ok(())
    }

    /// Unbind from the owning agent and return to `Pending`.
    pub fn requeue(&mut self) -> super::error::Result<()> {
        self.status = self.status.transition(TaskEvent::Requeue)?;
        self.agent_id.clear();
        self.assigned_at = None;
        self.requeue_count += 1;
        Ok(())
    }

    /// Apply a terminal event (`Complete`, `Fail`, `Cancel`).
    pub fn finish(&mut self, event: TaskEvent) -> super::error::Result<()> {
        self.status = self.status.transition(event)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn apply_event(&mut self, event: TaskEvent) -> super::error::Result<()> {
        self.status = self.status.transition(event)?;
        Ok(())
    }

    /// Time from assignment to completion, when both are known.
    pub fn service_time_secs(&self) -> Option<f64> {
        let assigned = self.assigned_at?;
        let completed = self.completed_at?;
        Some((completed - assigned).num_milliseconds().max(0) as f64 / 1000.0)
    }
}
