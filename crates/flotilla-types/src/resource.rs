use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resources an agent declares it needs. Also used for running totals.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub cpu_cores: f64,
    pub memory_mb: u64,
    pub disk_mb: u64,
    pub network_mbps: f64,
}

impl ResourceRequirements {
    pub fn new(cpu_cores: f64, memory_mb: u64, disk_mb: u64, network_mbps: f64) -> Self {
        Self {
            cpu_cores,
            memory_mb,
            disk_mb,
            network_mbps,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.cpu_cores == 0.0 && self.memory_mb == 0 && self.disk_mb == 0 && self.network_mbps == 0.0
    }

    /// Negative or non-finite float fields can never be granted.
    pub fn is_well_formed(&self) -> bool {
        self.cpu_cores.is_finite()
            && self.cpu_cores >= 0.0
            && self.network_mbps.is_finite()
            && self.network_mbps >= 0.0
    }

    /// Field-wise sum of `items`. Float fields are summed in fixed-point
    /// thousandths so totals do not depend on the order grants come and go.
    pub fn sum<'a, I>(items: I) -> ResourceRequirements
    where
        I: IntoIterator<Item = &'a ResourceRequirements>,
    {
        let mut cpu = 0i64;
        let mut memory_mb = 0u64;
        let mut disk_mb = 0u64;
        let mut net = 0i64;
        for item in items {
            cpu = cpu.saturating_add(to_fixed(item.cpu_cores));
            memory_mb = memory_mb.saturating_add(item.memory_mb);
            disk_mb = disk_mb.saturating_add(item.disk_mb);
            net = net.saturating_add(to_fixed(item.network_mbps));
        }
        ResourceRequirements {
            cpu_cores: from_fixed(cpu),
            memory_mb,
            disk_mb,
            network_mbps: from_fixed(net),
        }
    }

    pub fn plus(&self, other: &ResourceRequirements) -> ResourceRequirements {
        Self::sum([self, other])
    }

    /// Field-wise subtraction clamped at zero.
    pub fn minus(&self, other: &ResourceRequirements) -> ResourceRequirements {
        ResourceRequirements {
            cpu_cores: from_fixed((to_fixed(self.cpu_cores) - to_fixed(other.cpu_cores)).max(0)),
            memory_mb: self.memory_mb.saturating_sub(other.memory_mb),
            disk_mb: self.disk_mb.saturating_sub(other.disk_mb),
            network_mbps: from_fixed(
                (to_fixed(self.network_mbps) - to_fixed(other.network_mbps)).max(0),
            ),
        }
    }

    /// Name of the first field that exceeds `limits`, if any.
    pub fn exceeded_field(&self, limits: &ResourceLimits) -> Option<&'static str> {
        if to_fixed(self.cpu_cores) > to_fixed(limits.cpu_cores) {
            Some("cpu_cores")
        } else if self.memory_mb > limits.memory_mb {
            Some("memory_mb")
        } else if self.disk_mb > limits.disk_mb {
            Some("disk_mb")
        } else if to_fixed(self.network_mbps) > to_fixed(limits.network_mbps) {
            Some("network_mbps")
        } else {
            None
        }
    }

    pub fn fits_within(&self, limits: &ResourceLimits) -> bool {
        self.exceeded_field(limits).is_none()
    }
}

/// Global ceilings the whole fleet may consume in aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_cores: f64,
    pub memory_mb: u64,
    pub disk_mb: u64,
    pub network_mbps: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_cores: 16.0,
            memory_mb: 32_768,
            disk_mb: 102_400,
            network_mbps: 1_000.0,
        }
    }
}

impl ResourceLimits {
    pub fn new(cpu_cores: f64, memory_mb: u64, disk_mb: u64, network_mbps: f64) -> Self {
        Self {
            cpu_cores,
            memory_mb,
            disk_mb,
            network_mbps,
        }
    }

    pub fn is_positive(&self) -> bool {
        self.cpu_cores.is_finite()
            && self.cpu_cores > 0.0
            && self.memory_mb > 0
            && self.disk_mb > 0
            && self.network_mbps.is_finite()
            && self.network_mbps > 0.0
    }

    /// What is left once `totals` has been granted.
    pub fn headroom(&self, totals: &ResourceRequirements) -> ResourceRequirements {
        ResourceRequirements {
            cpu_cores: self.cpu_cores,
            memory_mb: self.memory_mb,
            disk_mb: self.disk_mb,
            network_mbps: self.network_mbps,
        }
        .minus(totals)
    }

    /// Fraction (0-1) of the ceiling that `amount` represents, averaged over cpu and memory.
    pub fn compute_share(&self, amount: &ResourceRequirements) -> f64 {
        let cpu = amount.cpu_cores / self.cpu_cores;
        let mem = amount.memory_mb as f64 / self.memory_mb as f64;
        (cpu + mem) / 2.0
    }
}

/// A grant recorded by the resource manager for exactly one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub agent_id: String,
    #[serde(flatten)]
    pub resources: ResourceRequirements,
    pub allocated_at: DateTime<Utc>,
}

impl ResourceAllocation {
    pub fn new(agent_id: impl Into<String>, resources: ResourceRequirements) -> Self {
        Self {
            agent_id: agent_id.into(),
            resources,
            allocated_at: Utc::now(),
        }
    }
}

/// A host usage sample. All fields are percentages in 0-100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub network_percent: f64,
    pub timestamp: DateTime<Utc>,
}

impl ResourceUsage {
    pub fn new(cpu_percent: f64, memory_percent: f64, disk_percent: f64, network_percent: f64) -> Self {
        Self {
            cpu_percent: clamp_percent(cpu_percent),
            memory_percent: clamp_percent(memory_percent),
            disk_percent: clamp_percent(disk_percent),
            network_percent: clamp_percent(network_percent),
            timestamp: Utc::now(),
        }
    }

    /// Sentinel reading used when the host probe fails.
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }

    /// Returns the first of cpu/memory/disk at or above `ceiling` percent.
    pub fn saturated_field(&self, ceiling: f64) -> Option<(&'static str, f64)> {
        [
            ("cpu", self.cpu_percent),
            ("memory", self.memory_percent),
            ("disk", self.disk_percent),
        ]
        .into_iter()
        .find(|(_, value)| *value >= ceiling)
    }
}

/// Resolution of the fractional resource fields: one thousandth of a core or Mbps.
const FIXED_POINT_SCALE: f64 = 1_000.0;

fn to_fixed(value: f64) -> i64 {
    (value * FIXED_POINT_SCALE).round() as i64
}

fn from_fixed(value: i64) -> f64 {
    value as f64 / FIXED_POINT_SCALE
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}
