use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use sysinfo::{Disks, Networks, System};
use tokio::sync::RwLock;

use flotilla_types::{FlotillaError, ResourceUsage, Result};

/// Source of live host utilization readings.
#[async_trait]
pub trait MetricsProbe: Send + Sync {
    /// Take one reading. Callers treat errors as a zero-usage sample.
    async fn sample(&self) -> Result<ResourceUsage>;
}

struct HostState {
    system: System,
    networks: Networks,
    last_network_refresh: Instant,
}

/// Probe backed by `sysinfo`. Network utilization is a coarse proxy: bytes moved
/// across all interfaces since the previous sample, relative to `link_capacity_mbps`.
pub struct SysinfoProbe {
    state: Arc<Mutex<HostState>>,
    link_capacity_mbps: f64,
}

impl SysinfoProbe {
    pub fn new(link_capacity_mbps: f64) -> Self {
        let mut system = System::new();
        // CPU usage is computed between two refreshes; prime the first one.
        system.refresh_cpu_usage();
        Self {
            state: Arc::new(Mutex::new(HostState {
                system,
                networks: Networks::new_with_refreshed_list(),
                last_network_refresh: Instant::now(),
            })),
            link_capacity_mbps: link_capacity_mbps.max(1.0),
        }
    }

    fn read(state: &Mutex<HostState>, link_capacity_mbps: f64) -> Result<ResourceUsage> {
        let mut host = state
            .lock()
            .map_err(|_| FlotillaError::MetricsProbe("host probe state poisoned".into()))?;

        host.system.refresh_cpu_usage();
        host.system.refresh_memory();
        let cpu = host.system.global_cpu_info().cpu_usage() as f64;

        let total_memory = host.system.total_memory();
        let memory = if total_memory > 0 {
            host.system.used_memory() as f64 / total_memory as f64 * 100.0
        } else {
            0.0
        };

        let disks = Disks::new_with_refreshed_list();
        let (total_space, available_space) = disks
            .list()
            .iter()
            .fold((0u64, 0u64), |(total, avail), disk| {
                (total + disk.total_space(), avail + disk.available_space())
            });
        let disk = if total_space > 0 {
            (total_space - available_space.min(total_space)) as f64 / total_space as f64 * 100.0
        } else {
            0.0
        };

        host.networks.refresh();
        let elapsed = host.last_network_refresh.elapsed().as_secs_f64().max(1e-3);
        host.last_network_refresh = Instant::now();
        let bytes: u64 = host
            .networks
            .list()
            .iter()
            .map(|(_, data)| data.received() + data.transmitted())
            .sum();
        let mbps = bytes as f64 * 8.0 / 1_000_000.0 / elapsed;
        let network = mbps / link_capacity_mbps * 100.0;

        Ok(ResourceUsage::new(cpu, memory, disk, network))
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new(1_000.0)
    }
}

#[async_trait]
impl MetricsProbe for SysinfoProbe {
    async fn sample(&self) -> Result<ResourceUsage> {
        let state = self.state.clone();
        let link_capacity_mbps = self.link_capacity_mbps;
        tokio::task::spawn_blocking(move || Self::read(&state, link_capacity_mbps))
            .await
            .map_err(|e| FlotillaError::MetricsProbe(e.to_string()))?
    }
}

/// Probe that reports a fixed reading until told otherwise.
/// Useful where no host metrics source exists, and in tests.
#[derive(Debug)]
pub struct StaticProbe {
    reading: RwLock<ResourceUsage>,
}

impl StaticProbe {
    pub fn new(cpu_percent: f64, memory_percent: f64, disk_percent: f64, network_percent: f64) -> Self {
        Self {
            reading: RwLock::new(ResourceUsage::new(
                cpu_percent,
                memory_percent,
                disk_percent,
                network_percent,
            )),
        }
    }

    pub fn idle() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }

    pub async fn set(&self, cpu_percent: f64, memory_percent: f64, disk_percent: f64, network_percent: f64) {
        *self.reading.write().await =
            ResourceUsage::new(cpu_percent, memory_percent, disk_percent, network_percent);
    }
}

#[async_trait]
impl MetricsProbe for StaticProbe {
    async fn sample(&self) -> Result<ResourceUsage> {
        let mut reading = *self.reading.read().await;
        reading.timestamp = chrono::Utc::now();
        Ok(reading)
    }
}
