use serde::{Deserialize, Serialize};

use flotilla_types::{ResourceAllocation, ResourceLimits, ResourceRequirements, ResourceUsage};

/// Samples required before recommendations are produced.
pub const OPTIMIZATION_WINDOW: usize = 10;

/// Below this efficiency an allocation is considered oversized.
pub const LOW_EFFICIENCY: f64 = 0.5;
/// Above this efficiency an allocation is considered undersized.
pub const HIGH_EFFICIENCY: f64 = 0.9;

const ADJUSTMENT_FACTOR: f64 = 0.2;
const MIN_CPU_CORES: f64 = 1.0;
const MIN_MEMORY_MB: u64 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    Shrink,
    Grow,
}

/// A proposed resize of one agent's allocation. Never applied automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecommendation {
    pub agent_id: String,
    pub kind: AdjustmentKind,
    pub efficiency: f64,
    pub current: ResourceRequirements,
    pub recommended: ResourceRequirements,
    /// 0-1, how far the efficiency sits outside the comfort band.
    pub expected_improvement: f64,
    pub reason: String,
}

/// Mean of each usage field across `samples`.
pub fn average_usage(samples: &[ResourceUsage]) -> ResourceUsage {
    if samples.is_empty() {
        return ResourceUsage::zero();
    }
    let n = samples.len() as f64;
    let sum = |f: fn(&ResourceUsage) -> f64| samples.iter().map(f).sum::<f64>() / n;
    ResourceUsage::new(
        sum(|u| u.cpu_percent),
        sum(|u| u.memory_percent),
        sum(|u| u.disk_percent),
        sum(|u| u.network_percent),
    )
}

/// Observed usage relative to the share of the ceiling the allocation holds,
/// averaged over cpu and memory. `None` when the allocation holds neither.
pub fn allocation_efficiency(
    allocation: &ResourceAllocation,
    limits: &ResourceLimits,
    average: &ResourceUsage,
) -> Option<f64> {
    let mut ratios = Vec::with_capacity(2);

    let cpu_share = allocation.resources.cpu_cores / limits.cpu_cores * 100.0;
    if cpu_share > 0.0 {
        ratios.push(average.cpu_percent / cpu_share);
    }
    let memory_share = allocation.resources.memory_mb as f64 / limits.memory_mb as f64 * 100.0;
    if memory_share > 0.0 {
        ratios.push(average.memory_percent / memory_share);
    }

    if ratios.is_empty() {
        None
    } else {
        Some(ratios.iter().sum::<f64>() / ratios.len() as f64)
    }
}

pub fn shrunk(current: &ResourceRequirements) -> ResourceRequirements {
    let cpu = (current.cpu_cores * (1.0 - ADJUSTMENT_FACTOR))
        .max(MIN_CPU_CORES)
        .min(current.cpu_cores);
    let memory = ((current.memory_mb as f64 * (1.0 - ADJUSTMENT_FACTOR)) as u64)
        .max(MIN_MEMORY_MB)
        .min(current.memory_mb);
    ResourceRequirements {
        cpu_cores: cpu,
        memory_mb: memory,
        ..*current
    }
}

pub fn grown(current: &ResourceRequirements) -> ResourceRequirements {
    ResourceRequirements {
        cpu_cores: current.cpu_cores * (1.0 + ADJUSTMENT_FACTOR),
        memory_mb: (current.memory_mb as f64 * (1.0 + ADJUSTMENT_FACTOR)).round() as u64,
        ..*current
    }
}

/// Build a recommendation for one allocation. `can_grow` decides whether the extra
/// resources a grow would claim are currently grantable.
pub fn recommend(
    allocation: &ResourceAllocation,
    limits: &ResourceLimits,
    average: &ResourceUsage,
    can_grow: impl Fn(&ResourceRequirements) -> bool,
) -> Option<OptimizationRecommendation> {
    let efficiency = allocation_efficiency(allocation, limits, average)?;
    let current = allocation.resources;

    if efficiency < LOW_EFFICIENCY {
        let recommended = shrunk(&current);
        if recommended == current {
            return None;
        }
        return Some(OptimizationRecommendation {
            agent_id: allocation.agent_id.clone(),
            kind: AdjustmentKind::Shrink,
            efficiency,
            current,
            recommended,
            expected_improvement: ((LOW_EFFICIENCY - efficiency) / LOW_EFFICIENCY).clamp(0.0, 1.0),
            reason: format!(
                "Efficiency {:.0}% below {:.0}%; release 20% of cpu/memory",
                efficiency * 100.0,
                LOW_EFFICIENCY * 100.0
            ),
        });
    }

    if efficiency > HIGH_EFFICIENCY {
        let recommended = grown(&current);
        if !can_grow(&recommended.minus(&current)) {
            return None;
        }
        return Some(OptimizationRecommendation {
            agent_id: allocation.agent_id.clone(),
            kind: AdjustmentKind::Grow,
            efficiency,
            current,
            recommended,
            expected_improvement: ((efficiency - HIGH_EFFICIENCY) / HIGH_EFFICIENCY).clamp(0.0, 1.0),
            reason: format!(
                "Efficiency {:.0}% above {:.0}%; grant 20% more cpu/memory",
                efficiency * 100.0,
                HIGH_EFFICIENCY * 100.0
            ),
        });
    }

    None
}
