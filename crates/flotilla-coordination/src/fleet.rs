use async_trait::async_trait;
use uuid::Uuid;

use flotilla_scaling::{AgentLoad, FleetController, ScalingMetrics};
use flotilla_types::Result;

use crate::coordinator::Coordinator;

#[async_trait]
impl FleetController for Coordinator {
    async fn agent_count(&self) -> usize {
        Coordinator::agent_count(self).await
    }

    async fn scaling_metrics(&self) -> ScalingMetrics {
        Coordinator::scaling_metrics(self).await
    }

    async fn agent_loads(&self) -> Vec<AgentLoad> {
        self.list_agents()
            .await
            .into_iter()
            .map(|agent| AgentLoad {
                agent_id: agent.agent_id,
                active_tasks: agent.active_tasks,
            })
            .collect()
    }

    /// Registers a new agent shaped by the configured template.
    async fn provision_agent(&self) -> Result<String> {
        let template = &self.config().agent_template;
        let suffix = Uuid::new_v4().simple().to_string();
        let agent_id = format!("{}-{}", template.id_prefix, &suffix[..8]);
        let agent = self.register_agent(template.to_registration(agent_id)).await?;
        Ok(agent.agent_id)
    }

    async fn remove_agent(&self, agent_id: &str) -> Result<bool> {
        self.unregister_agent(agent_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::CoordinatorConfig;
    use flotilla_resources::StaticProbe;
    use flotilla_scaling::ScalingAction;
    use flotilla_types::AgentRegistration;
    use serde_json::json;

    fn coordinator(config: CoordinatorConfig) -> Coordinator {
        Coordinator::new(config, Arc::new(StaticProbe::idle())).unwrap()
    }

    #[tokio::test]
    async fn test_provision_uses_template() {
        let coord = coordinator(CoordinatorConfig::default());
        let agent_id = coord.provision_agent().await.unwrap();
        assert!(agent_id.starts_with("auto-agent-"));

        let agent = coord.get_agent(&agent_id).await.unwrap();
        assert_eq!(agent.max_concurrent_tasks, 4);
        assert_eq!(agent.resource_requirements.memory_mb, 512);
    }

    #[tokio::test]
    async fn test_agent_loads_in_registration_order() {
        let coord = coordinator(CoordinatorConfig::default());
        for id in ["a", "b", "c"] {
            coord.register_agent(AgentRegistration::new(id)).await.unwrap();
        }
        coord.distribute_task(json!(1), 0).await.unwrap();

        let loads = coord.agent_loads().await;
        let ids: Vec<&str> = loads.iter().map(|l| l.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(loads[0].active_tasks, 1);
    }

    #[tokio::test]
    async fn test_manual_scaling_through_coordinator() {
        let config = CoordinatorConfig {
            min_agents: 1,
            max_agents: 3,
            ..Default::default()
        };
        let coord = coordinator(config);
        coord.register_agent(AgentRegistration::new("seed")).await.unwrap();

        assert_eq!(coord.scale_up(5).await.unwrap(), 2);
        assert_eq!(FleetController::agent_count(&coord).await, 3);
        assert!(coord.scale_up(1).await.is_err());

        assert_eq!(coord.scale_down(2).await.unwrap(), 2);
        assert_eq!(FleetController::agent_count(&coord).await, 1);

        let events = coord.scaling_manager().events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, ScalingAction::ScaleUp);
        assert!(events.iter().all(|e| e.trigger.is_none()));
    }
}
