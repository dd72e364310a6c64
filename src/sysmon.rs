//! Host CPU and memory sampling for the administrative `status` command.

use sysinfo::System;

/// One sample of host resource usage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemSnapshot {
    pub cpu_usage_percent: f32,
    pub ram_usage_percent: f64,
    pub ram_used_kb: u64,
    pub ram_total_kb: u64,
}

/// Keeps the kernel counters needed to turn cumulative CPU times into a
/// usage percentage between consecutive samples. The first sample has no
/// baseline and reports 0% CPU.
#[derive(Debug)]
pub struct SystemMonitor {
    sys: System,
    first_sample: bool,
}

impl SystemMonitor {
    pub fn new() -> Self {
        Self {
            sys: System::new(),
            first_sample: true,
        }
    }

    pub fn sample(&mut self) -> SystemSnapshot {
        self.sys.refresh_memory();
        self.sys.refresh_cpu_usage();

        let cpu_usage_percent = if self.first_sample {
            self.first_sample = false;
            0.0
        } else {
            self.sys.global_cpu_usage()
        };

        let ram_total_kb = self.sys.total_memory() / 1024;
        let ram_used_kb = self.sys.used_memory() / 1024;
        let ram_usage_percent = if ram_total_kb > 0 {
            ram_used_kb as f64 / ram_total_kb as f64 * 100.0
        } else {
            0.0
        };

        SystemSnapshot {
            cpu_usage_percent,
            ram_usage_percent,
            ram_used_kb,
            ram_total_kb,
        }
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new()
    }
}
