use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use flotilla_types::{
    FlotillaError, ResourceAllocation, ResourceLimits, ResourceRequirements, ResourceUsage, Result,
};

use crate::monitor::MonitorHandle;
use crate::optimizer::{self, OPTIMIZATION_WINDOW, OptimizationRecommendation};
use crate::probe::MetricsProbe;

/// Samples kept in the usage ring buffer.
pub const USAGE_HISTORY_CAPACITY: usize = 1_000;

/// Live cpu/memory/disk usage at or above this percentage blocks new allocations.
pub const USAGE_CEILING_PERCENT: f64 = 90.0;

#[derive(Debug, Default)]
struct AllocationBook {
    allocations: HashMap<String, ResourceAllocation>,
    totals: ResourceRequirements,
    usage_history: VecDeque<ResourceUsage>,
}

impl AllocationBook {
    /// Aggregate-limit and usage-ceiling check. Returns the refusal reason.
    fn refusal(
        &self,
        limits: &ResourceLimits,
        requirements: &ResourceRequirements,
        usage: &ResourceUsage,
    ) -> Option<String> {
        if !requirements.is_well_formed() {
            return Some(format!("malformed requirements {requirements:?}"));
        }
        let projected = self.totals.plus(requirements);
        if let Some(field) = projected.exceeded_field(limits) {
            return Some(format!("{field} would exceed the fleet limit"));
        }
        if let Some((field, value)) = usage.saturated_field(USAGE_CEILING_PERCENT) {
            return Some(format!(
                "host {field} usage {value:.1}% is at or above {USAGE_CEILING_PERCENT:.0}%"
            ));
        }
        None
    }

    /// Rebuild the running totals from the grants currently held, so a release
    /// restores exactly the totals that preceded the grant.
    fn recompute_totals(&mut self) {
        self.totals = ResourceRequirements::sum(self.allocations.values().map(|a| &a.resources));
    }

    fn record_usage(&mut self, usage: ResourceUsage) {
        if self.usage_history.len() == USAGE_HISTORY_CAPACITY {
            self.usage_history.pop_front();
        }
        self.usage_history.push_back(usage);
    }
}

/// Bookkeeping of per-agent resource grants against global limits.
pub struct ResourceManager {
    limits: ResourceLimits,
    probe: Arc<dyn MetricsProbe>,
    book: Mutex<AllocationBook>,
    monitor: Mutex<Option<MonitorHandle>>,
    sample_interval: Duration,
}

impl ResourceManager {
    pub fn new(limits: ResourceLimits, probe: Arc<dyn MetricsProbe>) -> Self {
        Self {
            limits,
            probe,
            book: Mutex::new(AllocationBook::default()),
            monitor: Mutex::new(None),
            sample_interval: Duration::from_secs(10),
        }
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    pub fn limits(&self) -> ResourceLimits {
        self.limits
    }

    pub fn sample_interval(&self) -> Duration {
        self.sample_interval
    }

    /// One probe reading, zero-filled if the probe fails. Not recorded.
    pub async fn sample_host(&self) -> ResourceUsage {
        match self.probe.sample().await {
            Ok(usage) => usage,
            Err(e) => {
                tracing::warn!("Host metrics probe failed, using zero reading: {}", e);
                ResourceUsage::zero()
            }
        }
    }

    /// Sample the host and append the reading to the usage history.
    pub async fn get_resource_usage(&self) -> ResourceUsage {
        let usage = self.sample_host().await;
        self.book.lock().await.record_usage(usage);
        usage
    }

    pub async fn latest_usage(&self) -> Option<ResourceUsage> {
        self.book.lock().await.usage_history.back().copied()
    }

    /// The most recent `n` samples, oldest first.
    pub async fn usage_history(&self, n: usize) -> Vec<ResourceUsage> {
        let book = self.book.lock().await;
        let skip = book.usage_history.len().saturating_sub(n);
        book.usage_history.iter().skip(skip).copied().collect()
    }

    /// Whether `requirements` could be granted right now.
    pub async fn check_resource_constraints(&self, requirements: &ResourceRequirements) -> bool {
        let usage = self.sample_host().await;
        self.check_with_usage(requirements, &usage).await
    }

    pub async fn check_with_usage(
        &self,
        requirements: &ResourceRequirements,
        usage: &ResourceUsage,
    ) -> bool {
        let book = self.book.lock().await;
        match book.refusal(&self.limits, requirements, usage) {
            Some(reason) => {
                tracing::debug!("Resource constraint check refused: {}", reason);
                false
            }
            None => true,
        }
    }

    pub async fn allocate_resources(
        &self,
        agent_id: &str,
        requirements: ResourceRequirements,
    ) -> Result<ResourceAllocation> {
        let usage = self.sample_host().await;
        self.allocate_with_usage(agent_id, requirements, &usage).await
    }

    /// Allocate against a usage reading the caller already holds, so no probe I/O
    /// happens between the check and the commit.
    pub async fn allocate_with_usage(
        &self,
        agent_id: &str,
        requirements: ResourceRequirements,
        usage: &ResourceUsage,
    ) -> Result<ResourceAllocation> {
        let mut book = self.book.lock().await;

        if book.allocations.contains_key(agent_id) {
            return Err(FlotillaError::ResourceAllocation(format!(
                "agent {agent_id} already holds an allocation"
            )));
        }
        if let Some(reason) = book.refusal(&self.limits, &requirements, usage) {
            tracing::warn!(agent_id, "Resource allocation denied: {}", reason);
            return Err(FlotillaError::ResourceAllocation(reason));
        }

        let allocation = ResourceAllocation::new(agent_id, requirements);
        book.allocations
            .insert(agent_id.to_string(), allocation.clone());
        book.recompute_totals();

        tracing::info!(
            agent_id,
            cpu_cores = requirements.cpu_cores,
            memory_mb = requirements.memory_mb,
            "Resources allocated"
        );
        Ok(allocation)
    }

    /// Release an agent's allocation. Returns false if it held none.
    pub async fn deallocate_resources(&self, agent_id: &str) -> bool {
        let mut book = self.book.lock().await;
        match book.allocations.remove(agent_id) {
            Some(_) => {
                book.recompute_totals();
                tracing::info!(agent_id, "Resources deallocated");
                true
            }
            None => false,
        }
    }

    pub async fn get_allocation(&self, agent_id: &str) -> Option<ResourceAllocation> {
        self.book.lock().await.allocations.get(agent_id).cloned()
    }

    pub async fn allocations(&self) -> Vec<ResourceAllocation> {
        let book = self.book.lock().await;
        let mut allocations: Vec<ResourceAllocation> = book.allocations.values().cloned().collect();
        allocations.sort_by(|a, b| a.allocated_at.cmp(&b.allocated_at));
        allocations
    }

    pub async fn total_allocated(&self) -> ResourceRequirements {
        self.book.lock().await.totals
    }

    pub async fn available_resources(&self) -> ResourceRequirements {
        let totals = self.book.lock().await.totals;
        self.limits.headroom(&totals)
    }

    /// Resize proposals based on the last ten usage samples. Empty until ten exist.
    pub async fn optimize_resource_allocation(&self) -> Vec<OptimizationRecommendation> {
        let recent = self.usage_history(OPTIMIZATION_WINDOW).await;
        if recent.len() < OPTIMIZATION_WINDOW {
            tracing::debug!(
                samples = recent.len(),
                "Not enough usage samples to optimize allocations"
            );
            return Vec::new();
        }
        let average = optimizer::average_usage(&recent);
        let live = self.sample_host().await;

        let book = self.book.lock().await;
        let mut allocations: Vec<&ResourceAllocation> = book.allocations.values().collect();
        allocations.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));

        allocations
            .into_iter()
            .filter_map(|allocation| {
                optimizer::recommend(allocation, &self.limits, &average, |extra| {
                    book.refusal(&self.limits, extra, &live).is_none()
                })
            })
            .collect()
    }

    /// Start the periodic sampling loop. No-op if it is already running.
    pub async fn start_monitoring(self: &Arc<Self>) {
        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            return;
        }
        *monitor = Some(MonitorHandle::spawn(self.clone(), self.sample_interval));
        tracing::info!(
            interval_secs = self.sample_interval.as_secs_f64(),
            "Resource monitoring started"
        );
    }

    /// Stop the sampling loop and wait for the in-flight sample to finish.
    pub async fn stop_monitoring(&self) {
        let handle = self.monitor.lock().await.take();
        if let Some(handle) = handle {
            handle.shutdown().await;
            tracing::info!("Resource monitoring stopped");
        }
    }

    pub async fn is_monitoring(&self) -> bool {
        self.monitor.lock().await.is_some()
    }
}
