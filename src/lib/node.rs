use serde::{Deserialize, Serialize};

use crate::tasks::Task;
use crate::worker::types::SystemStats;

/// The manager's view of a worker: where to reach it, what it has, and how
/// much of that the manager has handed out.
///
/// This ledger is advisory. It is refreshed from worker stats and adjusted
/// on placement, but never synchronised with the worker's own bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Worker address, `host:port`. Unique across the cluster.
    pub name: String,
    pub api: String,
    pub cores: f64,
    pub cores_allocated: f64,
    /// Bytes.
    pub memory: u64,
    pub memory_allocated: u64,
    /// Bytes.
    pub disk: u64,
    pub disk_allocated: u64,
    pub task_count: u64,
}

impl Node {
    pub fn new(name: &str, api: &str) -> Self {
        Node {
            name: name.to_string(),
            api: api.to_string(),
            ..Default::default()
        }
    }

    /// Node for a worker address, reached over plain http.
    pub fn for_worker(address: &str) -> Self {
        Self::new(address, &format!("http://{address}"))
    }

    pub fn with_capacity(mut self, cores: f64, memory: u64, disk: u64) -> Self {
        self.cores = cores;
        self.memory = memory;
        self.disk = disk;
        self
    }

    pub fn free_cores(&self) -> f64 {
        (self.cores - self.cores_allocated).max(0.0)
    }

    pub fn free_memory(&self) -> u64 {
        self.memory.saturating_sub(self.memory_allocated)
    }

    pub fn free_disk(&self) -> u64 {
        self.disk.saturating_sub(self.disk_allocated)
    }

    /// True when the task's request fits in the free capacity on every dimension.
    pub fn fits(&self, task: &Task) -> bool {
        self.cores_allocated + task.cpu.max(0.0) <= self.cores
            && self.memory_allocated.saturating_add(task.memory_request()) <= self.memory
            && self.disk_allocated.saturating_add(task.disk_request()) <= self.disk
    }

    pub fn allocate(&mut self, task: &Task) {
        self.cores_allocated += task.cpu.max(0.0);
        self.memory_allocated = self.memory_allocated.saturating_add(task.memory_request());
        self.disk_allocated = self.disk_allocated.saturating_add(task.disk_request());
        self.task_count += 1;
    }

    pub fn release(&mut self, task: &Task) {
        self.cores_allocated = (self.cores_allocated - task.cpu.max(0.0)).max(0.0);
        self.memory_allocated = self.memory_allocated.saturating_sub(task.memory_request());
        self.disk_allocated = self.disk_allocated.saturating_sub(task.disk_request());
        self.task_count = self.task_count.saturating_sub(1);
    }

    /// Replaces the totals with what the worker last reported. Allocation is
    /// left alone.
    pub fn update_capacity(&mut self, stats: &SystemStats) {
        self.cores = stats.total_cpus as f64;
        self.memory = stats.total_memory;
        self.disk = stats.total_disk;
    }

    /// Average of the allocated share on each dimension once `task` is
    /// placed here. A dimension with no capacity counts as full.
    pub fn load_with(&self, task: &Task) -> f64 {
        fn ratio(used: f64, total: f64) -> f64 {
            if total <= 0.0 { 1.0 } else { (used / total).min(1.0) }
        }

        let cpu = ratio(self.cores_allocated + task.cpu.max(0.0), self.cores);
        let memory = ratio(
            self.memory_allocated.saturating_add(task.memory_request()) as f64,
            self.memory as f64,
        );
        let disk = ratio(
            self.disk_allocated.saturating_add(task.disk_request()) as f64,
            self.disk as f64,
        );

        (cpu + memory + disk) / 3.0
    }
}
