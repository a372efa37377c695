use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use flotilla_types::{FlotillaError, Result};

use crate::config::ScalingConfig;
use crate::controller::FleetController;
use crate::event::{ScalingAction, ScalingDecision, ScalingEvent, ScalingMetrics, ScalingTrigger};
use crate::stability::StabilityReport;

#[derive(Debug, Default)]
struct ScalingState {
    last_scaling_event: Option<DateTime<Utc>>,
    events: VecDeque<ScalingEvent>,
    metrics_history: VecDeque<ScalingMetrics>,
}

/// Decides when the fleet grows or shrinks and carries the action out through a
/// [`FleetController`].
pub struct ScalingManager {
    config: ScalingConfig,
    state: Mutex<ScalingState>,
}

impl ScalingManager {
    pub fn new(config: ScalingConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ScalingState::default()),
        }
    }

    pub fn config(&self) -> &ScalingConfig {
        &self.config
    }

    /// Run one scaling cycle: fetch metrics, respect cooldown, then try scale-up
    /// before scale-down.
    pub async fn check_scaling_needs(&self, fleet: &dyn FleetController) -> Result<ScalingDecision> {
        let metrics = fleet.scaling_metrics().await;
        self.record_metrics(metrics.clone()).await;

        if !self.config.enabled {
            return Ok(ScalingDecision::NoAction);
        }
        if self.in_cooldown().await {
            tracing::debug!("Scaling check skipped: cooldown in effect");
            return Ok(ScalingDecision::NoAction);
        }

        if let Some(trigger) = self.should_scale_up(&metrics) {
            tracing::info!(
                metric = %trigger.metric,
                value = trigger.current_value,
                threshold = trigger.threshold,
                "Scale-up triggered: {}",
                trigger.reason
            );
            let added = self
                .execute_scale_up(fleet, self.config.scale_up_step, Some(trigger.clone()))
                .await?;
            return Ok(ScalingDecision::ScaleUp { added, trigger });
        }

        if let Some(trigger) = self.should_scale_down(&metrics).await {
            tracing::info!(
                metric = %trigger.metric,
                value = trigger.current_value,
                threshold = trigger.threshold,
                "Scale-down triggered: {}",
                trigger.reason
            );
            let removed = self
                .execute_scale_down(fleet, self.config.scale_down_step, Some(trigger.clone()))
                .await?;
            return Ok(ScalingDecision::ScaleDown { removed, trigger });
        }

        Ok(ScalingDecision::NoAction)
    }

    /// First scale-up condition that holds, checked in order: queue depth,
    /// response time, utilization. Suppressed at the agent ceiling.
    pub fn should_scale_up(&self, metrics: &ScalingMetrics) -> Option<ScalingTrigger> {
        if metrics.current_agents >= self.config.max_agents {
            return None;
        }

        if metrics.queue_depth > self.config.queue_depth_threshold {
            Some(ScalingTrigger::new(
                "High queue depth",
                "queue_depth",
                metrics.queue_depth as f64,
                self.config.queue_depth_threshold as f64,
            ))
        } else if metrics.avg_response_time > self.config.response_time_threshold {
            Some(ScalingTrigger::new(
                "High response time",
                "avg_response_time",
                metrics.avg_response_time,
                self.config.response_time_threshold,
            ))
        } else if metrics.resource_utilization > self.config.scale_up_utilization {
            Some(ScalingTrigger::new(
                "High resource utilization",
                "resource_utilization",
                metrics.resource_utilization,
                self.config.scale_up_utilization,
            ))
        } else {
            None
        }
    }

    /// Low utilization under stable conditions, above the agent floor.
    pub async fn should_scale_down(&self, metrics: &ScalingMetrics) -> Option<ScalingTrigger> {
        if metrics.current_agents <= self.config.min_agents {
            return None;
        }
        if metrics.resource_utilization >= self.config.scale_down_utilization {
            return None;
        }
        if !self.is_stable().await {
            tracing::debug!("Scale-down refused: recent load is not stable");
            return None;
        }
        Some(ScalingTrigger::new(
            "Low resource utilization",
            "resource_utilization",
            metrics.resource_utilization,
            self.config.scale_down_utilization,
        ))
    }

    pub async fn scale_up(&self, fleet: &dyn FleetController, count: usize) -> Result<usize> {
        self.execute_scale_up(fleet, count, None).await
    }

    pub async fn scale_down(&self, fleet: &dyn FleetController, count: usize) -> Result<usize> {
        self.execute_scale_down(fleet, count, None).await
    }

    async fn execute_scale_up(
        &self,
        fleet: &dyn FleetController,
        count: usize,
        trigger: Option<ScalingTrigger>,
    ) -> Result<usize> {
        let before = fleet.agent_count().await;
        if before >= self.config.max_agents {
            return Err(FlotillaError::Scaling(format!(
                "already at max_agents ({})",
                self.config.max_agents
            )));
        }
        let to_add = count.min(self.config.max_agents - before);

        let mut added = 0;
        let mut failure = None;
        for _ in 0..to_add {
            match fleet.provision_agent().await {
                Ok(agent_id) => {
                    tracing::info!(agent_id = %agent_id, "Provisioned agent");
                    added += 1;
                }
                Err(e) => {
                    tracing::warn!("Agent provisioning failed: {}", e);
                    failure = Some(e);
                    break;
                }
            }
        }

        let after = fleet.agent_count().await;
        let mut event = ScalingEvent::new(ScalingAction::ScaleUp, trigger, before, after);
        if let Some(e) = &failure {
            event = event.failed(e.to_string());
        }
        self.record_event(event).await;

        match failure {
            Some(e) if added == 0 => Err(FlotillaError::Scaling(format!(
                "could not provision any agent: {e}"
            ))),
            _ => Ok(added),
        }
    }

    async fn execute_scale_down(
        &self,
        fleet: &dyn FleetController,
        count: usize,
        trigger: Option<ScalingTrigger>,
    ) -> Result<usize> {
        let before = fleet.agent_count().await;
        if before < self.config.min_agents + count {
            return Err(FlotillaError::Scaling(format!(
                "removing {count} of {before} agents would drop below min_agents ({})",
                self.config.min_agents
            )));
        }

        // Stable sort keeps registration order among equally loaded agents.
        let mut loads = fleet.agent_loads().await;
        loads.sort_by_key(|load| load.active_tasks);

        let mut removed = 0;
        let mut failure: Option<FlotillaError> = None;
        for victim in loads.into_iter().take(count) {
            match fleet.remove_agent(&victim.agent_id).await {
                Ok(true) => {
                    tracing::info!(
                        agent_id = %victim.agent_id,
                        active_tasks = victim.active_tasks,
                        "Removed agent"
                    );
                    removed += 1;
                }
                Ok(false) => {
                    tracing::warn!(agent_id = %victim.agent_id, "Agent vanished before removal");
                }
                Err(e) => {
                    tracing::warn!(agent_id = %victim.agent_id, "Agent removal failed: {}", e);
                    failure = Some(e);
                    break;
                }
            }
        }

        let after = fleet.agent_count().await;
        let mut event = ScalingEvent::new(ScalingAction::ScaleDown, trigger, before, after);
        if let Some(e) = &failure {
            event = event.failed(e.to_string());
        }
        self.record_event(event).await;

        match failure {
            Some(e) if removed == 0 => Err(FlotillaError::Scaling(format!(
                "could not remove any agent: {e}"
            ))),
            _ => Ok(removed),
        }
    }

    /// Append a metrics snapshot to the stability window.
    pub async fn record_metrics(&self, metrics: ScalingMetrics) {
        let mut state = self.state.lock().await;
        state.metrics_history.push_back(metrics);
        while state.metrics_history.len() > self.config.stability_window.max(1) {
            state.metrics_history.pop_front();
        }
    }

    pub async fn stability(&self) -> StabilityReport {
        let state = self.state.lock().await;
        let window: Vec<ScalingMetrics> = state.metrics_history.iter().cloned().collect();
        StabilityReport::from_window(&window)
    }

    pub async fn is_stable(&self) -> bool {
        self.stability().await.is_stable(
            self.config.min_stability_samples,
            self.config.queue_variance_tolerance,
            self.config.response_variance_tolerance,
        )
    }

    async fn record_event(&self, event: ScalingEvent) {
        let mut state = self.state.lock().await;
        state.last_scaling_event = Some(event.timestamp);
        state.events.push_back(event);
        while state.events.len() > self.config.max_event_history.max(1) {
            state.events.pop_front();
        }
    }

    pub async fn in_cooldown(&self) -> bool {
        let state = self.state.lock().await;
        match state.last_scaling_event {
            Some(last) => {
                let elapsed = (Utc::now() - last).to_std().unwrap_or_default();
                elapsed < self.config.cooldown_period()
            }
            None => false,
        }
    }

    pub async fn last_scaling_event(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_scaling_event
    }

    /// Audit trail, oldest first.
    pub async fn events(&self) -> Vec<ScalingEvent> {
        self.state.lock().await.events.iter().cloned().collect()
    }

    pub async fn recent_events(&self, n: usize) -> Vec<ScalingEvent> {
        let state = self.state.lock().await;
        let skip = state.events.len().saturating_sub(n);
        state.events.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::AgentLoad;
    use async_trait::async_trait;

    /// Fleet double: a list of (agent_id, active_tasks) plus scripted metrics.
    struct MockFleet {
        agents: Mutex<Vec<AgentLoad>>,
        metrics: Mutex<ScalingMetrics>,
        next_id: Mutex<usize>,
        fail_provision: bool,
    }

    impl MockFleet {
        fn with_agents(loads: &[u32]) -> Self {
            let agents = loads
                .iter()
                .enumerate()
                .map(|(i, tasks)| AgentLoad {
                    agent_id: format!("agent-{i}"),
                    active_tasks: *tasks,
                })
                .collect::<Vec<_>>();
            let count = agents.len();
            Self {
                agents: Mutex::new(agents),
                metrics: Mutex::new(ScalingMetrics::new(count)),
                next_id: Mutex::new(count),
                fail_provision: false,
            }
        }

        async fn set_metrics(&self, f: impl FnOnce(ScalingMetrics) -> ScalingMetrics) {
            let mut metrics = self.metrics.lock().await;
            *metrics = f(metrics.clone());
        }

        async fn ids(&self) -> Vec<String> {
            self.agents
                .lock()
                .await
                .iter()
                .map(|a| a.agent_id.clone())
                .collect()
        }
    }

    #[async_trait]
    impl FleetController for MockFleet {
        async fn agent_count(&self) -> usize {
            self.agents.lock().await.len()
        }

        async fn scaling_metrics(&self) -> ScalingMetrics {
            let mut metrics = self.metrics.lock().await.clone();
            metrics.current_agents = self.agents.lock().await.len();
            metrics
        }

        async fn agent_loads(&self) -> Vec<AgentLoad> {
            self.agents.lock().await.clone()
        }

        async fn provision_agent(&self) -> Result<String> {
            if self.fail_provision {
                return Err(FlotillaError::AgentRegistration("no capacity".into()));
            }
            let mut next = self.next_id.lock().await;
            let id = format!("agent-{}", *next);
            *next += 1;
            self.agents.lock().await.push(AgentLoad {
                agent_id: id.clone(),
                active_tasks: 0,
            });
            Ok(id)
        }

        async fn remove_agent(&self, agent_id: &str) -> Result<bool> {
            let mut agents = self.agents.lock().await;
            let before = agents.len();
            agents.retain(|a| a.agent_id != agent_id);
            Ok(agents.len() != before)
        }
    }

    fn config(min: usize, max: usize) -> ScalingConfig {
        ScalingConfig {
            min_agents: min,
            max_agents: max,
            ..ScalingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_queue_depth_wins_then_cooldown() {
        let manager = ScalingManager::new(config(2, 5));
        let fleet = MockFleet::with_agents(&[0, 0]);
        fleet
            .set_metrics(|m| m.with_utilization(0.95).with_queue_depth(150))
            .await;

        let decision = manager.check_scaling_needs(&fleet).await.unwrap();
        assert_eq!(decision.action(), ScalingAction::ScaleUp);
        assert_eq!(decision.trigger().unwrap().reason, "High queue depth");
        assert_eq!(fleet.agent_count().await, 3);

        let events = manager.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].agents_before, 2);
        assert_eq!(events[0].agents_after, 3);
        assert!(events[0].success);

        let second = manager.check_scaling_needs(&fleet).await.unwrap();
        assert_eq!(second, ScalingDecision::NoAction);
        assert_eq!(fleet.agent_count().await, 3);
    }

    #[tokio::test]
    async fn test_trigger_order() {
        let manager = ScalingManager::new(config(1, 10));
        let slow = ScalingMetrics::new(2).with_response_time(6.0).with_utilization(0.95);
        assert_eq!(
            manager.should_scale_up(&slow).unwrap().reason,
            "High response time"
        );

        let hot = ScalingMetrics::new(2).with_utilization(0.95);
        assert_eq!(
            manager.should_scale_up(&hot).unwrap().reason,
            "High resource utilization"
        );

        let at_cap = ScalingMetrics::new(10).with_queue_depth(500);
        assert!(manager.should_scale_up(&at_cap).is_none());
    }

    #[tokio::test]
    async fn test_scale_down_refused_at_floor() {
        let manager = ScalingManager::new(config(2, 5));
        for _ in 0..5 {
            manager.record_metrics(ScalingMetrics::new(2).with_utilization(0.1)).await;
        }
        let metrics = ScalingMetrics::new(2).with_utilization(0.1);
        assert!(manager.should_scale_down(&metrics).await.is_none());
    }

    #[tokio::test]
    async fn test_scale_down_requires_stable_history() {
        let manager = ScalingManager::new(config(1, 5));
        let quiet = ScalingMetrics::new(3).with_utilization(0.1);

        manager.record_metrics(quiet.clone()).await;
        manager.record_metrics(quiet.clone()).await;
        assert!(manager.should_scale_down(&quiet).await.is_none());

        manager.record_metrics(quiet.clone()).await;
        assert!(manager.should_scale_down(&quiet).await.is_some());

        manager
            .record_metrics(ScalingMetrics::new(3).with_utilization(0.1).with_queue_depth(80))
            .await;
        assert!(manager.should_scale_down(&quiet).await.is_none());
    }

    #[tokio::test]
    async fn test_scale_down_blocked_by_response_time_jitter() {
        let manager = ScalingManager::new(config(1, 5));
        for secs in [0.5, 2.0, 0.5, 2.0] {
            manager
                .record_metrics(ScalingMetrics::new(3).with_utilization(0.1).with_response_time(secs))
                .await;
        }
        assert!(!manager.is_stable().await);
        let quiet = ScalingMetrics::new(3).with_utilization(0.1).with_response_time(1.0);
        assert!(manager.should_scale_down(&quiet).await.is_none());

        // Once the jitter leaves the window the same metrics allow a scale-down.
        for _ in 0..10 {
            manager
                .record_metrics(ScalingMetrics::new(3).with_utilization(0.1).with_response_time(1.0))
                .await;
        }
        assert!(manager.should_scale_down(&quiet).await.is_some());
    }

    #[tokio::test]
    async fn test_check_scales_down_least_loaded() {
        let manager = ScalingManager::new(config(1, 5));
        let fleet = MockFleet::with_agents(&[3, 0, 1, 0]);
        fleet.set_metrics(|m| m.with_utilization(0.1)).await;

        // Two cycles fill the window; neither can act yet.
        for _ in 0..2 {
            let decision = manager.check_scaling_needs(&fleet).await.unwrap();
            assert_eq!(decision, ScalingDecision::NoAction);
        }
        let decision = manager.check_scaling_needs(&fleet).await.unwrap();
        assert_eq!(decision.action(), ScalingAction::ScaleDown);
        assert_eq!(
            fleet.ids().await,
            vec!["agent-0".to_string(), "agent-2".to_string(), "agent-3".to_string()]
        );
    }

    #[tokio::test]
    async fn test_manual_scale_down_picks_fewest_tasks_in_order() {
        let manager = ScalingManager::new(config(1, 5));
        let fleet = MockFleet::with_agents(&[2, 0, 1, 0]);

        let removed = manager.scale_down(&fleet, 2).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(
            fleet.ids().await,
            vec!["agent-0".to_string(), "agent-2".to_string()]
        );
        let events = manager.events().await;
        assert!(events[0].trigger.is_none());
    }

    #[tokio::test]
    async fn test_scale_limits_are_errors() {
        let manager = ScalingManager::new(config(2, 3));
        let fleet = MockFleet::with_agents(&[0, 0, 0]);
        assert!(matches!(
            manager.scale_up(&fleet, 1).await,
            Err(FlotillaError::Scaling(_))
        ));

        let fleet = MockFleet::with_agents(&[0, 0]);
        assert!(matches!(
            manager.scale_down(&fleet, 1).await,
            Err(FlotillaError::Scaling(_))
        ));
        assert!(manager.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_scale_up_capped_at_max() {
        let manager = ScalingManager::new(config(1, 4));
        let fleet = MockFleet::with_agents(&[0, 0]);
        let added = manager.scale_up(&fleet, 10).await.unwrap();
        assert_eq!(added, 2);
        assert_eq!(fleet.agent_count().await, 4);
    }

    #[tokio::test]
    async fn test_failed_provisioning_is_audited() {
        let manager = ScalingManager::new(config(1, 4));
        let mut fleet = MockFleet::with_agents(&[0]);
        fleet.fail_provision = true;

        let result = manager.scale_up(&fleet, 1).await;
        assert!(matches!(result, Err(FlotillaError::Scaling(_))));
        let events = manager.events().await;
        assert_eq!(events.len(), 1);
        assert!(!events[0].success);
        assert!(manager.in_cooldown().await);
    }

    #[tokio::test]
    async fn test_disabled_never_acts() {
        let manager = ScalingManager::new(ScalingConfig {
            enabled: false,
            ..config(1, 5)
        });
        let fleet = MockFleet::with_agents(&[0]);
        fleet.set_metrics(|m| m.with_queue_depth(1_000)).await;
        assert_eq!(
            manager.check_scaling_needs(&fleet).await.unwrap(),
            ScalingDecision::NoAction
        );
        assert_eq!(fleet.agent_count().await, 1);
    }
}
