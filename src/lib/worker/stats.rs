use sysinfo::{Disks, System};

use super::types::SystemStats;

impl SystemStats {
    pub fn memory_usage_percent(&self) -> f64 {
        percent(self.used_memory, self.total_memory)
    }

    pub fn disk_usage_percent(&self) -> f64 {
        percent(self.used_disk, self.total_disk)
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

pub fn get_stats(sysinfo: &System, task_count: u64) -> SystemStats {
    let disks = Disks::new_with_refreshed_list();
    let total_disk: u64 = disks.iter().map(|disk| disk.total_space()).sum();
    let available_disk: u64 = disks.iter().map(|disk| disk.available_space()).sum();

    SystemStats {
        cpu_usage: (sysinfo.global_cpu_usage() * 100.0).round() / 100.0,
        total_cpus: sysinfo.cpus().len() as u64,
        total_memory: sysinfo.total_memory(),
        used_memory: sysinfo.used_memory(),
        total_swap: sysinfo.total_swap(),
        used_swap: sysinfo.used_swap(),
        total_disk,
        used_disk: total_disk.saturating_sub(available_disk),
        system_name: System::name().unwrap_or_else(|| "Unknown".to_string()),
        hostname: System::host_name().unwrap_or_else(|| "Unknown".to_string()),
        task_count,
    }
}
