use std::collections::HashMap;

use async_trait::async_trait;

use super::types::{Config, ExecutorResult};

/// Lifecycle of a container as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInspection {
    pub status: ContainerStatus,
    pub exit_code: Option<i64>,
    pub port_bindings: HashMap<String, String>,
}

impl ContainerInspection {
    /// The container is gone for good and will not come back on its own.
    pub fn is_terminated(&self) -> bool {
        matches!(
            self.status,
            ContainerStatus::Exited | ContainerStatus::Dead | ContainerStatus::Removing
        )
    }
}

/// Starts, stops and inspects the runtime instance backing a task.
///
/// Errors are surfaced unchanged; callers decide what a failure means for
/// the task.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Pulls, creates and starts a container, returning its id.
    async fn start(&self, config: &Config) -> ExecutorResult<String>;

    async fn stop(&self, container_id: &str) -> ExecutorResult<()>;

    /// `Ok(None)` when the runtime has no such container.
    async fn inspect(&self, container_id: &str) -> ExecutorResult<Option<ContainerInspection>>;
}
