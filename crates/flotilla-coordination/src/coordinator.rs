use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use tokio::sync::Mutex;

use flotilla_resources::{MetricsProbe, ResourceManager};
use flotilla_scaling::{ScalingDecision, ScalingManager, ScalingMetrics};
use flotilla_types::{
    AgentInfo, AgentRegistration, AgentStatus, FlotillaError, Result, TaskAssignment, TaskEvent,
    TaskRequest, TaskStatus,
};

use crate::config::CoordinatorConfig;
use crate::queue::PendingQueue;
use crate::runtime::BackgroundLoops;
use crate::snapshot::{CoordinatorSnapshot, CoordinatorStats};

/// Completions counted for throughput.
const THROUGHPUT_WINDOW_SECS: i64 = 60;
/// Finished tasks averaged for response time.
const RESPONSE_TIME_WINDOW: usize = 100;
const SNAPSHOT_SCALING_EVENTS: usize = 10;

/// Everything the coordinator mutates. Lives behind one lock so registry,
/// queue and allocation changes never interleave.
#[derive(Debug, Default)]
pub(crate) struct CoordinatorState {
    /// Registration order.
    agents: Vec<AgentInfo>,
    pending: PendingQueue,
    assigned: HashMap<String, TaskAssignment>,
    /// Terminal tasks, oldest first.
    history: VecDeque<TaskAssignment>,
    rr_cursor: usize,
    next_sequence: u64,
    stats: CoordinatorStats,
}

impl CoordinatorState {
    fn position(&self, agent_id: &str) -> Option<usize> {
        self.agents.iter().position(|a| a.agent_id == agent_id)
    }

    fn agent_mut(&mut self, agent_id: &str) -> Option<&mut AgentInfo> {
        self.agents.iter_mut().find(|a| a.agent_id == agent_id)
    }

    fn release_slot(&mut self, agent_id: &str) {
        if let Some(agent) = self.agent_mut(agent_id) {
            agent.active_tasks = agent.active_tasks.saturating_sub(1);
        }
    }

    fn record_terminal(&mut self, task: TaskAssignment, capacity: usize) {
        self.history.push_back(task);
        while self.history.len() > capacity {
            self.history.pop_front();
        }
    }

    /// Why `event` cannot be applied to a task that is not in the assigned map.
    fn missing_task(&self, task_id: &str, event: TaskEvent) -> FlotillaError {
        let known = self
            .pending
            .get(task_id)
            .or_else(|| self.history.iter().rev().find(|t| t.task_id == task_id));
        match known {
            Some(task) => FlotillaError::InvalidStateTransition {
                from: task.status,
                event,
            },
            None => FlotillaError::TaskNotFound(task_id.to_string()),
        }
    }

    /// Send every task bound to `agent_id` back to the pending queue.
    fn requeue_tasks_of(&mut self, agent_id: &str) -> Result<usize> {
        let task_ids: Vec<String> = self
            .assigned
            .values()
            .filter(|t| t.agent_id == agent_id)
            .map(|t| t.task_id.clone())
            .collect();

        let mut requeued = 0;
        for task_id in task_ids {
            if let Some(mut task) = self.assigned.remove(&task_id) {
                task.requeue()?;
                self.pending.push(task);
                requeued += 1;
            }
        }
        Ok(requeued)
    }
}

/// Single authority over the agent registry and task placement.
pub struct Coordinator {
    config: CoordinatorConfig,
    resources: Arc<ResourceManager>,
    scaling: ScalingManager,
    state: Mutex<CoordinatorState>,
    pub(crate) loops: Mutex<Option<BackgroundLoops>>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, probe: Arc<dyn MetricsProbe>) -> Result<Self> {
        config.validate()?;
        let resources = ResourceManager::new(config.resource_limits, probe)
            .with_sample_interval(config.usage_sample_interval());
        let scaling = ScalingManager::new(config.scaling_config());
        Ok(Self {
            config,
            resources: Arc::new(resources),
            scaling,
            state: Mutex::new(CoordinatorState::default()),
            loops: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn resource_manager(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    pub fn scaling_manager(&self) -> &ScalingManager {
        &self.scaling
    }

    // --- agent lifecycle ---

    /// Admit an agent: allocate its resources, then add it to the registry as Healthy.
    pub async fn register_agent(&self, registration: AgentRegistration) -> Result<AgentInfo> {
        if registration.agent_id.trim().is_empty() {
            return Err(FlotillaError::AgentRegistration(
                "agent id must not be empty".into(),
            ));
        }
        if registration.max_concurrent_tasks == 0 {
            return Err(FlotillaError::AgentRegistration(format!(
                "agent {} declares no task slots",
                registration.agent_id
            )));
        }
        if !registration.resource_requirements.is_well_formed() {
            return Err(FlotillaError::AgentRegistration(format!(
                "agent {} declares malformed resource requirements",
                registration.agent_id
            )));
        }

        // Probe I/O stays outside the critical section.
        let usage = self.resources.sample_host().await;

        let mut state = self.state.lock().await;
        if state.agents.len() >= self.config.max_agents {
            return Err(FlotillaError::AgentRegistration(format!(
                "registry is full ({} agents)",
                self.config.max_agents
            )));
        }
        if state.position(&registration.agent_id).is_some() {
            return Err(FlotillaError::AgentRegistration(format!(
                "agent {} is already registered",
                registration.agent_id
            )));
        }

        let allocation = self
            .resources
            .allocate_with_usage(
                &registration.agent_id,
                registration.resource_requirements,
                &usage,
            )
            .await
            .map_err(|e| {
                FlotillaError::AgentRegistration(format!(
                    "resource allocation denied for {}: {}",
                    registration.agent_id, e
                ))
            })?;

        let mut agent = AgentInfo::from_registration(registration);
        agent.resource_allocation = Some(allocation);
        agent.status = AgentStatus::Healthy;
        state.agents.push(agent.clone());
        state.stats.agents_registered += 1;

        tracing::info!(
            agent_id = %agent.agent_id,
            slots = agent.max_concurrent_tasks,
            fleet_size = state.agents.len(),
            "Agent registered"
        );
        Ok(agent)
    }

    /// Remove an agent, requeueing its tasks. Unknown IDs return false.
    pub async fn unregister_agent(&self, agent_id: &str) -> Result<bool> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some(idx) = state.position(agent_id) else {
            return Ok(false);
        };
        self.remove_agent_locked(state, idx).await?;
        Ok(true)
    }

    /// Refresh the heartbeat. A Starting, Degraded or Unhealthy agent returns to Healthy.
    pub async fn update_heartbeat(&self, agent_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let agent = state
            .agent_mut(agent_id)
            .ok_or_else(|| FlotillaError::AgentNotFound(agent_id.to_string()))?;
        agent.last_heartbeat = Utc::now();
        if agent.status.recovers_on_heartbeat() {
            tracing::info!(agent_id, from = ?agent.status, "Agent recovered on heartbeat");
            agent.status = AgentStatus::Healthy;
        }
        Ok(())
    }

    pub async fn update_agent_status(&self, agent_id: &str, status: AgentStatus) -> Result<()> {
        let mut state = self.state.lock().await;
        let agent = state
            .agent_mut(agent_id)
            .ok_or_else(|| FlotillaError::AgentNotFound(agent_id.to_string()))?;
        if agent.status != status {
            tracing::info!(agent_id, from = ?agent.status, to = ?status, "Agent status changed");
            agent.status = status;
        }
        Ok(())
    }

    /// Record a failure. At `failure_threshold` the agent is removed and its tasks requeued.
    pub async fn handle_agent_failure(&self, agent_id: &str) -> Result<()> {
        let mut guard = self.state.lock().await;
        self.fail_agent_locked(&mut guard, agent_id).await?;
        Ok(())
    }

    pub async fn get_agent(&self, agent_id: &str) -> Option<AgentInfo> {
        let state = self.state.lock().await;
        state.agents.iter().find(|a| a.agent_id == agent_id).cloned()
    }

    /// Registration order.
    pub async fn list_agents(&self) -> Vec<AgentInfo> {
        self.state.lock().await.agents.clone()
    }

    pub async fn agent_count(&self) -> usize {
        self.state.lock().await.agents.len()
    }

    async fn fail_agent_locked(&self, state: &mut CoordinatorState, agent_id: &str) -> Result<bool> {
        let idx = state
            .position(agent_id)
            .ok_or_else(|| FlotillaError::AgentNotFound(agent_id.to_string()))?;

        let agent = &mut state.agents[idx];
        agent.status = AgentStatus::Unhealthy;
        agent.error_count += 1;
        let error_count = agent.error_count;
        tracing::warn!(
            agent_id,
            error_count,
            threshold = self.config.failure_threshold,
            "Agent failure recorded"
        );

        if error_count >= self.config.failure_threshold {
            self.remove_agent_locked(state, idx).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Requeue, deallocate, then drop from the registry.
    async fn remove_agent_locked(&self, state: &mut CoordinatorState, idx: usize) -> Result<AgentInfo> {
        let agent_id = state.agents[idx].agent_id.clone();
        state.agents[idx].status = AgentStatus::Stopping;

        let requeued = state.requeue_tasks_of(&agent_id)?;
        self.resources.deallocate_resources(&agent_id).await;

        let mut agent = state.agents.remove(idx);
        agent.status = AgentStatus::Offline;
        agent.active_tasks = 0;
        agent.resource_allocation = None;

        if state.rr_cursor > idx {
            state.rr_cursor -= 1;
        }
        if state.rr_cursor >= state.agents.len() {
            state.rr_cursor = 0;
        }
        state.stats.agents_removed += 1;
        state.stats.tasks_requeued += requeued as u64;

        tracing::info!(
            agent_id = %agent_id,
            requeued,
            fleet_size = state.agents.len(),
            "Agent removed"
        );
        Ok(agent)
    }

    // --- task lifecycle ---

    /// Submit a bare payload. A capacity shortfall yields a Pending assignment, not an error.
    pub async fn distribute_task(&self, payload: serde_json::Value, priority: i32) -> Result<TaskAssignment> {
        self.submit_task(TaskRequest::new(payload, priority)).await
    }

    pub async fn submit_task(&self, request: TaskRequest) -> Result<TaskAssignment> {
        if request.payload.is_null() {
            return Err(FlotillaError::TaskDistribution(
                "task payload must not be null".into(),
            ));
        }
        if let Some(deadline) = request.deadline {
            if deadline <= Utc::now() {
                return Err(FlotillaError::TaskDistribution(format!(
                    "task deadline {deadline} has already passed"
                )));
            }
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.stats.tasks_submitted += 1;

        let task = TaskAssignment::from_request(request, sequence);
        if state.pending.is_empty() {
            return self.dispatch_locked(state, task);
        }

        // A backlog exists: the new task takes its place in priority order so it
        // cannot claim a free slot ahead of higher-priority waiting work.
        let task_id = task.task_id.clone();
        state.pending.push(task);
        self.drain_pending_locked(state);
        state
            .assigned
            .get(&task_id)
            .or_else(|| state.pending.get(&task_id))
            .cloned()
            .ok_or_else(|| {
                FlotillaError::TaskDistribution(format!("task {task_id} could not be dispatched"))
            })
    }

    /// Retry every pending task in dispatch order. Returns how many were placed.
    fn drain_pending_locked(&self, state: &mut CoordinatorState) -> usize {
        let mut placed = 0;
        for task in state.pending.drain() {
            let task_id = task.task_id.clone();
            match self.dispatch_locked(state, task) {
                Ok(task) if task.status == TaskStatus::Assigned => placed += 1,
                Ok(_) => {}
                Err(e) => tracing::error!(task_id = %task_id, "Pending task could not be dispatched: {}", e),
            }
        }
        placed
    }

    /// Bind a Pending task to an agent chosen by the configured strategy, or queue it.
    fn dispatch_locked(&self, state: &mut CoordinatorState, mut task: TaskAssignment) -> Result<TaskAssignment> {
        let limits = self.resources.limits();
        let choice = self.config.load_balancing_strategy.select(
            &state.agents,
            &task.required_capabilities,
            &mut state.rr_cursor,
            &limits,
        );

        match choice {
            Some(idx) => {
                let agent = &mut state.agents[idx];
                task.assign_to(agent.agent_id.clone())?;
                agent.active_tasks += 1;
                state.assigned.insert(task.task_id.clone(), task.clone());
                state.stats.tasks_assigned += 1;
                tracing::debug!(
                    task_id = %task.task_id,
                    agent_id = %task.agent_id,
                    priority = task.priority,
                    "Task assigned"
                );
            }
            None => {
                state.pending.push(task.clone());
                tracing::debug!(
                    task_id = %task.task_id,
                    priority = task.priority,
                    queue_depth = state.pending.len(),
                    "No agent available; task queued"
                );
            }
        }
        Ok(task)
    }

    /// Assigned to InProgress.
    pub async fn start_task(&self, task_id: &str) -> Result<TaskAssignment> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if let Some(task) = state.assigned.get_mut(task_id) {
            task.apply_event(TaskEvent::Start)?;
            return Ok(task.clone());
        }
        Err(state.missing_task(task_id, TaskEvent::Start))
    }

    /// Finish an assigned task, free the agent slot and move the record to history.
    pub async fn complete_task(&self, task_id: &str, success: bool) -> Result<()> {
        let event = if success { TaskEvent::Complete } else { TaskEvent::Fail };

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some(status) = state.assigned.get(task_id).map(|t| t.status) else {
            return Err(state.missing_task(task_id, event));
        };
        status.transition(event)?;

        let Some(mut task) = state.assigned.remove(task_id) else {
            return Err(FlotillaError::TaskNotFound(task_id.to_string()));
        };
        task.finish(event)?;

        let mut error_count = 0;
        if let Some(agent) = state.agent_mut(&task.agent_id) {
            agent.active_tasks = agent.active_tasks.saturating_sub(1);
            if !success {
                agent.error_count += 1;
                error_count = agent.error_count;
            }
        }
        if success {
            state.stats.tasks_completed += 1;
        } else {
            state.stats.tasks_failed += 1;
        }

        tracing::debug!(
            task_id,
            agent_id = %task.agent_id,
            success,
            service_secs = task.service_time_secs().unwrap_or_default(),
            "Task finished"
        );
        let agent_id = task.agent_id.clone();
        state.record_terminal(task, self.config.max_task_history);

        if !success && error_count >= self.config.failure_threshold {
            tracing::warn!(
                agent_id = %agent_id,
                error_count,
                threshold = self.config.failure_threshold,
                "Agent crossed failure threshold on task failure"
            );
            if let Some(idx) = state.position(&agent_id) {
                self.remove_agent_locked(state, idx).await?;
            }
        }
        Ok(())
    }

    /// Withdraw a pending or assigned task.
    pub async fn cancel_task(&self, task_id: &str) -> Result<TaskAssignment> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let status = state
            .pending
            .get(task_id)
            .or_else(|| state.assigned.get(task_id))
            .map(|t| t.status);
        let Some(status) = status else {
            return Err(state.missing_task(task_id, TaskEvent::Cancel));
        };
        status.transition(TaskEvent::Cancel)?;

        let mut task = match state.pending.remove(task_id) {
            Some(task) => task,
            None => {
                let task = state
                    .assigned
                    .remove(task_id)
                    .ok_or_else(|| FlotillaError::TaskNotFound(task_id.to_string()))?;
                state.release_slot(&task.agent_id);
                task
            }
        };
        task.finish(TaskEvent::Cancel)?;
        state.stats.tasks_cancelled += 1;

        tracing::info!(task_id, agent_id = %task.agent_id, "Task cancelled");
        state.record_terminal(task.clone(), self.config.max_task_history);
        Ok(task)
    }

    /// Looks in the assigned map, the pending queue, then history.
    pub async fn get_task(&self, task_id: &str) -> Option<TaskAssignment> {
        let state = self.state.lock().await;
        state
            .assigned
            .get(task_id)
            .or_else(|| state.pending.get(task_id))
            .or_else(|| state.history.iter().rev().find(|t| t.task_id == task_id))
            .cloned()
    }

    /// Dispatch order.
    pub async fn pending_tasks(&self) -> Vec<TaskAssignment> {
        self.state.lock().await.pending.iter().cloned().collect()
    }

    /// Submission order.
    pub async fn assigned_tasks(&self) -> Vec<TaskAssignment> {
        let state = self.state.lock().await;
        let mut tasks: Vec<TaskAssignment> = state.assigned.values().cloned().collect();
        tasks.sort_by_key(|t| t.sequence);
        tasks
    }

    /// Terminal tasks, oldest first.
    pub async fn task_history(&self) -> Vec<TaskAssignment> {
        self.state.lock().await.history.iter().cloned().collect()
    }

    pub async fn stats(&self) -> CoordinatorStats {
        self.state.lock().await.stats.clone()
    }

    // --- periodic work ---

    /// Retry every pending task in priority order. Returns how many were placed.
    pub async fn rebalance_load(&self) -> usize {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.stats.load_balancing_events += 1;
        if state.pending.is_empty() {
            return 0;
        }

        let placed = self.drain_pending_locked(state);
        tracing::debug!(
            placed,
            still_pending = state.pending.len(),
            "Pending queue rebalanced"
        );
        placed
    }

    /// Fail every agent whose heartbeat is older than the timeout. Returns their IDs.
    pub async fn health_check(&self) -> Vec<String> {
        let timeout = i64::try_from(self.config.heartbeat_timeout_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        let now = Utc::now();

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let stale: Vec<String> = state
            .agents
            .iter()
            .filter(|a| !matches!(a.status, AgentStatus::Stopping | AgentStatus::Offline))
            .filter(|a| now - a.last_heartbeat > timeout)
            .map(|a| a.agent_id.clone())
            .collect();

        for agent_id in &stale {
            tracing::warn!(agent_id = %agent_id, "Agent heartbeat is stale");
            if let Err(e) = self.fail_agent_locked(state, agent_id).await {
                tracing::error!(agent_id = %agent_id, "Failed to handle stale agent: {}", e);
            }
        }
        stale
    }

    /// One scaling cycle against this coordinator's own fleet.
    pub async fn check_scaling(&self) -> Result<ScalingDecision> {
        self.scaling.check_scaling_needs(self).await
    }

    /// Manually add agents from the configured template.
    pub async fn scale_up(&self, count: usize) -> Result<usize> {
        self.scaling.scale_up(self, count).await
    }

    /// Manually remove the least loaded agents.
    pub async fn scale_down(&self, count: usize) -> Result<usize> {
        self.scaling.scale_down(self, count).await
    }

    /// Derive the scaling snapshot from the registry, task history and host usage.
    pub async fn scaling_metrics(&self) -> ScalingMetrics {
        let usage = match self.resources.latest_usage().await {
            Some(usage) => usage,
            None => self.resources.sample_host().await,
        };
        let now = Utc::now();

        let state = self.state.lock().await;
        let current_agents = state.agents.len();
        let slots: u64 = state.agents.iter().map(|a| u64::from(a.max_concurrent_tasks)).sum();
        let active: u64 = state.agents.iter().map(|a| u64::from(a.active_tasks)).sum();
        let queue_depth = state.pending.len();

        let occupancy = if slots == 0 { 0.0 } else { active as f64 / slots as f64 };
        let host = usage.cpu_percent.max(usage.memory_percent) / 100.0;
        let resource_utilization = occupancy.max(host).clamp(0.0, 1.0);

        let service_times: Vec<f64> = state
            .history
            .iter()
            .rev()
            .filter(|t| matches!(t.status, TaskStatus::Completed | TaskStatus::Failed))
            .filter_map(|t| t.service_time_secs())
            .take(RESPONSE_TIME_WINDOW)
            .collect();
        let avg_response_time = if service_times.is_empty() {
            0.0
        } else {
            service_times.iter().sum::<f64>() / service_times.len() as f64
        };

        let cutoff = now - TimeDelta::seconds(THROUGHPUT_WINDOW_SECS);
        let recent_completions = state
            .history
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .filter(|t| t.completed_at.is_some_and(|at| at >= cutoff))
            .count();
        let throughput = recent_completions as f64 / THROUGHPUT_WINDOW_SECS as f64;

        let avg_slots = if current_agents > 0 {
            slots as f64 / current_agents as f64
        } else {
            f64::from(self.config.agent_template.max_concurrent_tasks)
        }
        .max(1.0);
        let demand = (active as usize + queue_depth) as f64;
        let target_agents =
            ((demand / avg_slots).ceil() as usize).clamp(self.config.min_agents, self.config.max_agents);

        ScalingMetrics {
            current_agents,
            target_agents,
            queue_depth,
            avg_response_time,
            resource_utilization,
            throughput,
            error_rate: state.stats.error_rate(),
            timestamp: now,
        }
    }

    /// Registry, queues, host usage, scaling metrics and recent scaling events.
    pub async fn get_coordinator_state(&self) -> CoordinatorSnapshot {
        let resource_usage = self.resources.get_resource_usage().await;
        let scaling_metrics = self.scaling_metrics().await;
        let recent_scaling_events = self.scaling.recent_events(SNAPSHOT_SCALING_EVENTS).await;

        let state = self.state.lock().await;
        let mut assigned_tasks: Vec<TaskAssignment> = state.assigned.values().cloned().collect();
        assigned_tasks.sort_by_key(|t| t.sequence);

        CoordinatorSnapshot {
            agents: state.agents.clone(),
            pending_tasks: state.pending.iter().cloned().collect(),
            assigned_tasks,
            resource_usage,
            scaling_metrics,
            stats: state.stats.clone(),
            recent_scaling_events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_resources::StaticProbe;
    use flotilla_types::{ResourceLimits, ResourceRequirements};
    use serde_json::json;

    fn coordinator(config: CoordinatorConfig) -> Coordinator {
        Coordinator::new(config, Arc::new(StaticProbe::idle())).unwrap()
    }

    fn registration(id: &str) -> AgentRegistration {
        AgentRegistration::new(id)
            .with_requirements(ResourceRequirements::new(1.0, 512, 1024, 10.0))
            .with_max_concurrent_tasks(2)
    }

    #[tokio::test]
    async fn test_register_sets_healthy_and_allocates() {
        let coord = coordinator(CoordinatorConfig::default());
        let agent = coord.register_agent(registration("agent-1")).await.unwrap();

        assert_eq!(agent.status, AgentStatus::Healthy);
        assert_eq!(agent.active_tasks, 0);
        assert!(agent.resource_allocation.is_some());
        let totals = coord.resource_manager().total_allocated().await;
        assert_eq!(totals.memory_mb, 512);
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_and_empty() {
        let coord = coordinator(CoordinatorConfig::default());
        coord.register_agent(registration("agent-1")).await.unwrap();

        let dup = coord.register_agent(registration("agent-1")).await;
        assert!(matches!(dup, Err(FlotillaError::AgentRegistration(_))));
        let empty = coord.register_agent(registration("  ")).await;
        assert!(matches!(empty, Err(FlotillaError::AgentRegistration(_))));
        assert_eq!(coord.agent_count().await, 1);
    }

    #[tokio::test]
    async fn test_register_denied_by_limits_leaves_no_trace() {
        let config = CoordinatorConfig {
            resource_limits: ResourceLimits::new(1.5, 4096, 8192, 1000.0),
            ..Default::default()
        };
        let coord = coordinator(config);
        coord.register_agent(registration("agent-1")).await.unwrap();

        let denied = coord.register_agent(registration("agent-2")).await;
        assert!(matches!(denied, Err(FlotillaError::AgentRegistration(_))));
        assert!(coord.get_agent("agent-2").await.is_none());
        assert!(coord.resource_manager().get_allocation("agent-2").await.is_none());
    }

    #[tokio::test]
    async fn test_capacity_shortfall_queues_task() {
        let coord = coordinator(CoordinatorConfig::default());
        let task = coord.distribute_task(json!({"job": 1}), 3).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.agent_id.is_empty());
        assert_eq!(coord.pending_tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_submissions_rejected() {
        let coord = coordinator(CoordinatorConfig::default());
        let null = coord.distribute_task(serde_json::Value::Null, 0).await;
        assert!(matches!(null, Err(FlotillaError::TaskDistribution(_))));

        let late = TaskRequest::new(json!(1), 0).with_deadline(Utc::now() - TimeDelta::seconds(5));
        assert!(matches!(
            coord.submit_task(late).await,
            Err(FlotillaError::TaskDistribution(_))
        ));
        assert_eq!(coord.stats().await.tasks_submitted, 0);
    }

    #[tokio::test]
    async fn test_complete_task_frees_slot_and_records_history() {
        let coord = coordinator(CoordinatorConfig::default());
        coord.register_agent(registration("agent-1")).await.unwrap();
        let task = coord.distribute_task(json!({"job": 1}), 0).await.unwrap();
        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(coord.get_agent("agent-1").await.unwrap().active_tasks, 1);

        coord.start_task(&task.task_id).await.unwrap();
        coord.complete_task(&task.task_id, true).await.unwrap();

        let agent = coord.get_agent("agent-1").await.unwrap();
        assert_eq!(agent.active_tasks, 0);
        assert_eq!(agent.error_count, 0);
        let finished = coord.get_task(&task.task_id).await.unwrap();
        assert_eq!(finished.status, TaskStatus::Completed);
        assert_eq!(coord.stats().await.tasks_completed, 1);

        let again = coord.complete_task(&task.task_id, true).await;
        assert!(matches!(again, Err(FlotillaError::InvalidStateTransition { .. })));
    }

    #[tokio::test]
    async fn test_failed_task_counts_against_agent() {
        let coord = coordinator(CoordinatorConfig::default());
        coord.register_agent(registration("agent-1")).await.unwrap();
        let task = coord.distribute_task(json!("x"), 0).await.unwrap();

        coord.complete_task(&task.task_id, false).await.unwrap();
        let agent = coord.get_agent("agent-1").await.unwrap();
        assert_eq!(agent.error_count, 1);
        assert_eq!(agent.status, AgentStatus::Healthy);
        assert_eq!(coord.stats().await.tasks_failed, 1);
    }

    #[tokio::test]
    async fn test_task_failures_past_threshold_remove_agent() {
        let config = CoordinatorConfig {
            failure_threshold: 2,
            ..Default::default()
        };
        let coord = coordinator(config);
        coord.register_agent(registration("agent-1")).await.unwrap();
        coord.register_agent(registration("agent-2")).await.unwrap();

        let first = coord.distribute_task(json!(1), 0).await.unwrap();
        assert_eq!(first.agent_id, "agent-1");
        coord.complete_task(&first.task_id, false).await.unwrap();
        assert_eq!(coord.get_agent("agent-1").await.unwrap().error_count, 1);

        let second = coord.distribute_task(json!(2), 0).await.unwrap();
        let third = coord.distribute_task(json!(3), 0).await.unwrap();
        assert_eq!(third.agent_id, "agent-1");
        coord.complete_task(&third.task_id, false).await.unwrap();

        assert!(coord.get_agent("agent-1").await.is_none());
        assert!(coord.resource_manager().get_allocation("agent-1").await.is_none());
        assert_eq!(coord.stats().await.agents_removed, 1);
        assert_eq!(coord.get_task(&second.task_id).await.unwrap().agent_id, "agent-2");
        assert_eq!(coord.get_task(&third.task_id).await.unwrap().status, TaskStatus::Failed);

        let next = coord.distribute_task(json!(4), 0).await.unwrap();
        assert_eq!(next.agent_id, "agent-2");
    }

    #[tokio::test]
    async fn test_submit_behind_backlog_respects_priority() {
        let coord = coordinator(CoordinatorConfig::default());
        coord
            .register_agent(registration("agent-1").with_max_concurrent_tasks(1))
            .await
            .unwrap();
        let running = coord.distribute_task(json!("running"), 0).await.unwrap();
        let urgent = coord.distribute_task(json!("urgent"), 9).await.unwrap();
        assert_eq!(urgent.status, TaskStatus::Pending);

        coord.complete_task(&running.task_id, true).await.unwrap();
        let late = coord.distribute_task(json!("late"), 1).await.unwrap();

        assert_eq!(late.status, TaskStatus::Pending);
        assert_eq!(coord.get_task(&urgent.task_id).await.unwrap().status, TaskStatus::Assigned);
        let pending = coord.pending_tasks().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_id, late.task_id);
    }

    #[tokio::test]
    async fn test_complete_unknown_and_pending_tasks() {
        let coord = coordinator(CoordinatorConfig::default());
        let missing = coord.complete_task("nope", true).await;
        assert!(matches!(missing, Err(FlotillaError::TaskNotFound(_))));

        let pending = coord.distribute_task(json!(1), 0).await.unwrap();
        let err = coord.complete_task(&pending.task_id, true).await;
        assert!(matches!(
            err,
            Err(FlotillaError::InvalidStateTransition { from: TaskStatus::Pending, .. })
        ));
        assert_eq!(coord.pending_tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_pending_and_assigned() {
        let coord = coordinator(CoordinatorConfig::default());
        let queued = coord.distribute_task(json!(1), 0).await.unwrap();
        let cancelled = coord.cancel_task(&queued.task_id).await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert!(coord.pending_tasks().await.is_empty());

        coord.register_agent(registration("agent-1")).await.unwrap();
        let running = coord.distribute_task(json!(2), 0).await.unwrap();
        coord.cancel_task(&running.task_id).await.unwrap();
        assert_eq!(coord.get_agent("agent-1").await.unwrap().active_tasks, 0);
        assert_eq!(coord.stats().await.tasks_cancelled, 2);

        let twice = coord.cancel_task(&running.task_id).await;
        assert!(matches!(twice, Err(FlotillaError::InvalidStateTransition { .. })));
    }

    #[tokio::test]
    async fn test_heartbeat_recovers_agent() {
        let coord = coordinator(CoordinatorConfig::default());
        coord.register_agent(registration("agent-1")).await.unwrap();
        coord.handle_agent_failure("agent-1").await.unwrap();
        assert_eq!(coord.get_agent("agent-1").await.unwrap().status, AgentStatus::Unhealthy);

        coord.update_heartbeat("agent-1").await.unwrap();
        let agent = coord.get_agent("agent-1").await.unwrap();
        assert_eq!(agent.status, AgentStatus::Healthy);
        assert_eq!(agent.error_count, 1);

        let unknown = coord.update_heartbeat("ghost").await;
        assert!(matches!(unknown, Err(FlotillaError::AgentNotFound(_))));
    }

    #[tokio::test]
    async fn test_unhealthy_agent_gets_no_tasks() {
        let coord = coordinator(CoordinatorConfig::default());
        coord.register_agent(registration("agent-1")).await.unwrap();
        coord.update_agent_status("agent-1", AgentStatus::Degraded).await.unwrap();

        let task = coord.distribute_task(json!(1), 0).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_unregister_requeues_tasks() {
        let coord = coordinator(CoordinatorConfig::default());
        coord.register_agent(registration("agent-1")).await.unwrap();
        let task = coord.distribute_task(json!(1), 4).await.unwrap();

        assert!(coord.unregister_agent("agent-1").await.unwrap());
        let pending = coord.pending_tasks().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_id, task.task_id);
        assert_eq!(pending[0].requeue_count, 1);
        assert!(coord.resource_manager().total_allocated().await.is_zero());
        assert_eq!(coord.stats().await.tasks_requeued, 1);
    }

    #[tokio::test]
    async fn test_rebalance_places_pending_in_priority_order() {
        let coord = coordinator(CoordinatorConfig::default());
        let low = coord.distribute_task(json!("low"), 1).await.unwrap();
        let high = coord.distribute_task(json!("high"), 9).await.unwrap();
        let mid = coord.distribute_task(json!("mid"), 5).await.unwrap();

        coord.register_agent(registration("agent-1")).await.unwrap();
        let placed = coord.rebalance_load().await;
        assert_eq!(placed, 2);

        let pending = coord.pending_tasks().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_id, low.task_id);
        assert_eq!(coord.get_task(&high.task_id).await.unwrap().status, TaskStatus::Assigned);
        assert_eq!(coord.get_task(&mid.task_id).await.unwrap().status, TaskStatus::Assigned);
    }

    #[tokio::test]
    async fn test_rebalance_counts_every_cycle() {
        let coord = coordinator(CoordinatorConfig::default());
        assert_eq!(coord.rebalance_load().await, 0);
        assert_eq!(coord.rebalance_load().await, 0);
        assert_eq!(coord.stats().await.load_balancing_events, 2);
    }

    #[tokio::test]
    async fn test_health_check_fails_stale_agents() {
        let config = CoordinatorConfig {
            heartbeat_timeout_secs: 0,
            failure_threshold: 1,
            ..Default::default()
        };
        let coord = coordinator(config);
        coord.register_agent(registration("agent-1")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let stale = coord.health_check().await;
        assert_eq!(stale, vec!["agent-1".to_string()]);
        assert_eq!(coord.agent_count().await, 0);
    }

    #[tokio::test]
    async fn test_scaling_metrics_derivation() {
        let coord = coordinator(CoordinatorConfig::default());
        coord.register_agent(registration("agent-1")).await.unwrap();
        let first = coord.distribute_task(json!(1), 0).await.unwrap();
        coord.distribute_task(json!(2), 0).await.unwrap();
        coord.distribute_task(json!(3), 0).await.unwrap();
        coord.complete_task(&first.task_id, false).await.unwrap();

        let metrics = coord.scaling_metrics().await;
        assert_eq!(metrics.current_agents, 1);
        assert_eq!(metrics.queue_depth, 1);
        // one of two slots busy, idle host
        assert!((metrics.resource_utilization - 0.5).abs() < 1e-9);
        assert!((metrics.error_rate - 1.0).abs() < 1e-9);
        assert_eq!(metrics.throughput, 0.0);
        // one active plus one pending over two slots per agent
        assert_eq!(metrics.target_agents, 1);
    }

    #[tokio::test]
    async fn test_snapshot_contents() {
        let coord = coordinator(CoordinatorConfig::default());
        coord.register_agent(registration("agent-1")).await.unwrap();
        coord.distribute_task(json!(1), 0).await.unwrap();
        coord.distribute_task(json!(2), 0).await.unwrap();
        coord.distribute_task(json!(3), 0).await.unwrap();

        let snapshot = coord.get_coordinator_state().await;
        assert_eq!(snapshot.agents.len(), 1);
        assert_eq!(snapshot.assigned_tasks.len(), 2);
        assert_eq!(snapshot.pending_tasks.len(), 1);
        assert_eq!(snapshot.stats.tasks_submitted, 3);
        assert_eq!(snapshot.scaling_metrics.queue_depth, 1);
        assert!(snapshot.recent_scaling_events.is_empty());
        assert_eq!(coord.resource_manager().usage_history(10).await.len(), 1);
    }
}
