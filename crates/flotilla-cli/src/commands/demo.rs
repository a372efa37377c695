use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use flotilla_coordination::{Coordinator, CoordinatorConfig, LoadBalancingStrategy};
use flotilla_resources::StaticProbe;
use flotilla_scaling::{ScalingConfig, ScalingDecision};
use flotilla_types::{AgentRegistration, ResourceLimits, ResourceRequirements, TaskRequest, TaskStatus};

/// Drive a small simulated workload through every coordinator path and print the result.
pub async fn run(tasks: usize) -> Result<()> {
    println!("=== Flotilla: Fleet Coordination Demo ===\n");

    let probe = Arc::new(StaticProbe::new(35.0, 42.0, 20.0, 5.0));
    let config = CoordinatorConfig {
        min_agents: 1,
        max_agents: 4,
        failure_threshold: 2,
        load_balancing_strategy: LoadBalancingStrategy::LeastConnections,
        resource_limits: ResourceLimits::new(8.0, 16384, 65536, 1000.0),
        scaling: ScalingConfig {
            queue_depth_threshold: 4,
            cooldown_period_secs: 0,
            ..Default::default()
        },
        ..Default::default()
    };
    let coordinator = Coordinator::new(config, probe)?;

    // --- 1. Register agents ---
    for (id, caps) in [("agent-alpha", vec!["cpu"]), ("agent-beta", vec!["cpu", "gpu"])] {
        let agent = coordinator
            .register_agent(
                AgentRegistration::new(id)
                    .with_capabilities(caps)
                    .with_requirements(ResourceRequirements::new(2.0, 4096, 8192, 100.0))
                    .with_max_concurrent_tasks(3),
            )
            .await?;
        println!("[1] Registered {} ({:?})", agent.agent_id, agent.capabilities);
    }
    println!();

    // --- 2. Submit work ---
    let mut submitted = Vec::with_capacity(tasks);
    for i in 0..tasks {
        let priority = (i % 4) as i32;
        let request = TaskRequest::new(json!({"job": i, "kind": "simulate"}), priority);
        submitted.push(coordinator.submit_task(request).await?);
    }
    let assigned = submitted.iter().filter(|t| !t.agent_id.is_empty()).count();
    println!(
        "[2] Submitted {} tasks: {} assigned, {} pending",
        tasks,
        assigned,
        tasks - assigned
    );

    // --- 3. Finish what the fleet is running ---
    let mut finished = 0;
    for task in coordinator.assigned_tasks().await {
        // A failure can push an agent past its threshold and requeue the rest of its work.
        let still_assigned = coordinator
            .get_task(&task.task_id)
            .await
            .is_some_and(|t| t.status == TaskStatus::Assigned);
        if !still_assigned {
            continue;
        }
        coordinator.start_task(&task.task_id).await?;
        coordinator.complete_task(&task.task_id, task.sequence % 5 != 0).await?;
        finished += 1;
    }
    println!("[3] Finished {finished} tasks");

    // --- 4. Refill from the queue, then lose an agent ---
    let placed = coordinator.rebalance_load().await;
    println!("[4] Rebalance placed {placed} pending tasks");
    let mut failures = 0;
    while coordinator.get_agent("agent-alpha").await.is_some() {
        coordinator.handle_agent_failure("agent-alpha").await?;
        failures += 1;
    }
    println!(
        "    agent-alpha removed after {failures} reported failure(s); {} tasks pending",
        coordinator.pending_tasks().await.len()
    );
    println!();

    // --- 5. Let the scaling manager react ---
    match coordinator.check_scaling().await? {
        ScalingDecision::ScaleUp { added, trigger } => {
            println!(
                "[5] Scaled up by {added}: {} ({:.1} > {:.1})",
                trigger.reason, trigger.current_value, trigger.threshold
            )
        }
        ScalingDecision::ScaleDown { removed, trigger } => {
            println!("[5] Scaled down by {removed}: {}", trigger.reason)
        }
        ScalingDecision::NoAction => println!("[5] No scaling action"),
    }
    let placed = coordinator.rebalance_load().await;
    println!("    Rebalance placed {placed} pending tasks\n");

    // --- 6. Allocation efficiency ---
    let resources = coordinator.resource_manager();
    for _ in 0..10 {
        resources.get_resource_usage().await;
    }
    let recommendations = resources.optimize_resource_allocation().await;
    println!("[6] {} resource recommendation(s)", recommendations.len());
    for rec in &recommendations {
        println!(
            "    {} {:?}: efficiency {:.2}, {:.1} -> {:.1} cores ({})",
            rec.agent_id,
            rec.kind,
            rec.efficiency,
            rec.current.cpu_cores,
            rec.recommended.cpu_cores,
            rec.reason
        );
    }
    println!();

    // --- 7. Final state ---
    let snapshot = coordinator.get_coordinator_state().await;
    println!("[7] Coordinator state:");
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
