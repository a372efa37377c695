use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use flotilla_types::{AgentInfo, ResourceLimits};

/// How the coordinator picks an agent for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    /// Cycle through agents in registration order, skipping busy ones.
    #[default]
    RoundRobin,
    /// Fewest active tasks wins; earliest registration breaks ties.
    LeastConnections,
    /// Largest allocated-but-unused margin wins.
    ResourceBased,
    /// Least connections among agents holding every required capability.
    CapabilityBased,
}

impl std::fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadBalancingStrategy::RoundRobin => write!(f, "round_robin"),
            LoadBalancingStrategy::LeastConnections => write!(f, "least_connections"),
            LoadBalancingStrategy::ResourceBased => write!(f, "resource_based"),
            LoadBalancingStrategy::CapabilityBased => write!(f, "capability_based"),
        }
    }
}

impl LoadBalancingStrategy {
    /// Index into `agents` (registration order) of the agent that should take the
    /// next task, or `None` if nobody can. `cursor` is the round-robin position and
    /// is only moved by `RoundRobin`.
    pub fn select(
        self,
        agents: &[AgentInfo],
        required: &BTreeSet<String>,
        cursor: &mut usize,
        limits: &ResourceLimits,
    ) -> Option<usize> {
        match self {
            LoadBalancingStrategy::RoundRobin => round_robin(agents, cursor),
            LoadBalancingStrategy::LeastConnections => {
                least_connections(agents, |agent| agent.is_available())
            }
            LoadBalancingStrategy::ResourceBased => resource_based(agents, limits),
            LoadBalancingStrategy::CapabilityBased => least_connections(agents, |agent| {
                agent.is_available() && agent.has_capabilities(required)
            }),
        }
    }
}

fn round_robin(agents: &[AgentInfo], cursor: &mut usize) -> Option<usize> {
    let n = agents.len();
    if n == 0 {
        return None;
    }
    for offset in 0..n {
        let idx = (*cursor + offset) % n;
        if agents[idx].is_available() {
            *cursor = (idx + 1) % n;
            return Some(idx);
        }
    }
    None
}

fn least_connections(agents: &[AgentInfo], eligible: impl Fn(&AgentInfo) -> bool) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (idx, agent) in agents.iter().enumerate() {
        if !eligible(agent) {
            continue;
        }
        match best {
            Some((_, active)) if agent.active_tasks >= active => {}
            _ => best = Some((idx, agent.active_tasks)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Margin is the agent's share of the fleet limits scaled by its free slot ratio.
/// Agents without a meaningful grant tie at zero and fall back to free slots.
fn resource_based(agents: &[AgentInfo], limits: &ResourceLimits) -> Option<usize> {
    let mut best: Option<(usize, f64, f64)> = None;
    for (idx, agent) in agents.iter().enumerate() {
        if !agent.is_available() {
            continue;
        }
        let free = agent.free_slot_ratio();
        let share = agent
            .resource_allocation
            .as_ref()
            .map(|alloc| limits.compute_share(&alloc.resources))
            .unwrap_or(0.0);
        let margin = share * free;
        match best {
            Some((_, best_margin, best_free))
                if margin < best_margin || (margin == best_margin && free <= best_free) => {}
            _ => best = Some((idx, margin, free)),
        }
    }
    best.map(|(idx, _, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_types::{AgentRegistration, AgentStatus, ResourceAllocation, ResourceRequirements};

    fn agent(id: &str, slots: u32, active: u32) -> AgentInfo {
        let mut info = AgentInfo::from_registration(
            AgentRegistration::new(id).with_max_concurrent_tasks(slots),
        );
        info.status = AgentStatus::Healthy;
        info.active_tasks = active;
        info
    }

    fn with_grant(mut info: AgentInfo, cpu: f64, mem: u64) -> AgentInfo {
        let resources = ResourceRequirements::new(cpu, mem, 0, 0.0);
        info.resource_requirements = resources;
        info.resource_allocation = Some(ResourceAllocation::new(info.agent_id.clone(), resources));
        info
    }

    fn limits() -> ResourceLimits {
        ResourceLimits::new(8.0, 8192, 8192, 1000.0)
    }

    #[test]
    fn test_round_robin_cycles() {
        let agents = vec![agent("a", 4, 0), agent("b", 4, 0), agent("c", 4, 0)];
        let mut cursor = 0;
        let picks: Vec<usize> = (0..6)
            .map(|_| {
                LoadBalancingStrategy::RoundRobin
                    .select(&agents, &BTreeSet::new(), &mut cursor, &limits())
                    .unwrap()
            })
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_round_robin_skips_busy_and_unhealthy() {
        let mut agents = vec![agent("a", 1, 1), agent("b", 4, 0), agent("c", 4, 0)];
        agents[1].status = AgentStatus::Degraded;
        let mut cursor = 0;
        let pick = LoadBalancingStrategy::RoundRobin.select(&agents, &BTreeSet::new(), &mut cursor, &limits());
        assert_eq!(pick, Some(2));
        assert_eq!(cursor, 0);
    }

    #[test]
    fn test_least_connections_tie_goes_to_first() {
        let agents = vec![agent("a", 4, 2), agent("b", 4, 1), agent("c", 4, 1)];
        let mut cursor = 0;
        let pick = LoadBalancingStrategy::LeastConnections.select(&agents, &BTreeSet::new(), &mut cursor, &limits());
        assert_eq!(pick, Some(1));
    }

    #[test]
    fn test_capability_filter() {
        let mut gpu = agent("gpu", 4, 3);
        gpu.capabilities.insert("gpu".to_string());
        let agents = vec![agent("plain", 4, 0), gpu];
        let required: BTreeSet<String> = ["gpu".to_string()].into_iter().collect();
        let mut cursor = 0;

        let pick = LoadBalancingStrategy::CapabilityBased.select(&agents, &required, &mut cursor, &limits());
        assert_eq!(pick, Some(1));

        let none = LoadBalancingStrategy::CapabilityBased.select(&agents[..1], &required, &mut cursor, &limits());
        assert_eq!(none, None);
    }

    #[test]
    fn test_resource_based_prefers_largest_margin() {
        let agents = vec![
            with_grant(agent("small", 4, 0), 1.0, 1024),
            with_grant(agent("big-busy", 4, 3), 4.0, 4096),
            with_grant(agent("big-idle", 4, 0), 4.0, 4096),
        ];
        let mut cursor = 0;
        let pick = LoadBalancingStrategy::ResourceBased.select(&agents, &BTreeSet::new(), &mut cursor, &limits());
        assert_eq!(pick, Some(2));
    }

    #[test]
    fn test_resource_based_without_grants_uses_free_slots() {
        let agents = vec![agent("a", 4, 2), agent("b", 4, 0)];
        let mut cursor = 0;
        let pick = LoadBalancingStrategy::ResourceBased.select(&agents, &BTreeSet::new(), &mut cursor, &limits());
        assert_eq!(pick, Some(1));
    }

    #[test]
    fn test_no_agents() {
        let mut cursor = 0;
        for strategy in [
            LoadBalancingStrategy::RoundRobin,
            LoadBalancingStrategy::LeastConnections,
            LoadBalancingStrategy::ResourceBased,
            LoadBalancingStrategy::CapabilityBased,
        ] {
            assert_eq!(strategy.select(&[], &BTreeSet::new(), &mut cursor, &limits()), None);
        }
    }
}
