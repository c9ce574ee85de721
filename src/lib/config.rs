use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::scheduler::SchedulerKind;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub name: String,
    pub listen_addr: SocketAddr,
    /// How often the execution loop drains the local queue.
    pub run_interval: Duration,
    /// How often running tasks are checked against the runtime.
    pub reconcile_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "worker-1".to_string(),
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            run_interval: Duration::from_secs(5),
            reconcile_interval: Duration::from_secs(15),
        }
    }
}

impl WorkerConfig {
    pub fn new(name: &str, listen_addr: SocketAddr) -> Self {
        Self {
            name: name.to_string(),
            listen_addr,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub listen_addr: SocketAddr,
    /// Worker addresses, `host:port`.
    pub workers: Vec<String>,
    pub scheduler: SchedulerKind,
    pub dispatch_interval: Duration,
    /// How often worker task lists are pulled and merged.
    pub update_interval: Duration,
    /// How often worker capacity is refreshed from `/stats`.
    pub node_refresh_interval: Duration,
    /// Sends to a worker that fail in transport are retried this many times
    /// in total before the event is dead-lettered.
    pub max_dispatch_attempts: u32,
    pub request_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8081)),
            workers: Vec::new(),
            scheduler: SchedulerKind::default(),
            dispatch_interval: Duration::from_secs(2),
            update_interval: Duration::from_secs(15),
            node_refresh_interval: Duration::from_secs(30),
            max_dispatch_attempts: 5,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl ManagerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_worker(mut self, addr: &str) -> Self {
        self.workers.push(addr.to_string());
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerKind) -> Self {
        self.scheduler = scheduler;
        self
    }
}
