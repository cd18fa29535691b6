//! Local system sampling for the agent
//!
//! Keeps the `sysinfo` handles alive between samples: CPU usage and network
//! throughput are both computed from the difference to the previous refresh.

use std::collections::BTreeMap;
use std::time::Instant;

use sysinfo::{Disks, Networks, System};
use tracing::{instrument, trace};

use crate::MetricType;

/// One reading of all metric types
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemSample {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    /// KiB/s received plus transmitted
    pub network: f64,
    pub load: f64,
}

impl SystemSample {
    pub fn value(&self, metric: MetricType) -> f64 {
        match metric {
            MetricType::Cpu => self.cpu,
            MetricType::Memory => self.memory,
            MetricType::Disk => self.disk,
            MetricType::Network => self.network,
            MetricType::Load => self.load,
        }
    }

    /// Metrics keyed by their wire name, as sent in a report
    pub fn to_report(&self) -> BTreeMap<String, f64> {
        MetricType::ALL
            .iter()
            .map(|metric| (metric.as_str().to_string(), self.value(*metric)))
            .collect()
    }
}

/// Used share in percent, clamped to [0, 100]
pub fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

pub fn throughput_kib(bytes: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 / 1024.0 / elapsed_secs
}

pub struct SystemSampler {
    system: System,
    disks: Disks,
    networks: Networks,
    last_refresh: Instant,
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();

        Self {
            system,
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            last_refresh: Instant::now(),
        }
    }

    /// Take a sample. The first call should happen at least
    /// [`sysinfo::MINIMUM_CPU_UPDATE_INTERVAL`] after [`SystemSampler::new`].
    #[instrument(skip(self))]
    pub fn sample(&mut self) -> SystemSample {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        self.disks.refresh(true);
        self.networks.refresh(true);

        let elapsed = self.last_refresh.elapsed().as_secs_f64();
        self.last_refresh = Instant::now();

        let cpu = f64::from(self.system.global_cpu_usage());
        let cpu = if cpu.is_finite() { cpu.clamp(0.0, 100.0) } else { 0.0 };
        let memory = percent(self.system.used_memory(), self.system.total_memory());

        let (total_space, available_space) = self
            .disks
            .list()
            .iter()
            .fold((0u64, 0u64), |(total, available), disk| {
                (total + disk.total_space(), available + disk.available_space())
            });
        let disk = percent(total_space.saturating_sub(available_space), total_space);

        let transferred: u64 = self
            .networks
            .list()
            .values()
            .map(|data| data.received() + data.transmitted())
            .sum();
        let network = throughput_kib(transferred, elapsed);

        let load = System::load_average().one.max(0.0);

        let sample = SystemSample {
            cpu,
            memory,
            disk,
            network,
            load,
        };
        trace!("sampled {sample:?}");
        sample
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(50, 200), 25.0);
        assert_eq!(percent(1, 0), 0.0);
        assert_eq!(percent(300, 200), 100.0);
    }

    #[test]
    fn test_throughput() {
        assert_eq!(throughput_kib(2048, 2.0), 1.0);
        assert_eq!(throughput_kib(2048, 0.0), 0.0);
    }

    #[test]
    fn test_sample_values_are_valid() {
        let mut sampler = SystemSampler::new();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        let sample = sampler.sample();

        for metric in MetricType::ALL {
            assert!(
                metric.validate(sample.value(metric)).is_ok(),
                "{metric} = {} is invalid",
                sample.value(metric)
            );
        }
        assert_eq!(sample.to_report().len(), MetricType::ALL.len());
    }
}
