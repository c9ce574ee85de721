use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::tasks::types::DockerError;
use crate::tasks::{Executor, State, Task, TaskError, TaskEvent};

/// Runs tasks on one host.
///
/// The queue and the task registry are each behind their own lock, and no
/// lock is held across a call into the executor, so the HTTP surface stays
/// responsive while a container is being pulled or stopped.
pub struct Worker {
    pub name: String,
    pub(super) queue: Mutex<VecDeque<TaskEvent>>,
    pub(super) db: RwLock<HashMap<Uuid, Task>>,
    pub(super) executor: Arc<dyn Executor>,
    pub(super) sysinfo: Mutex<System>,
}

/// Host metrics reported on `/stats`. Sizes are in bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub cpu_usage: f32,
    pub total_cpus: u64,
    pub total_memory: u64,
    pub used_memory: u64,
    pub total_swap: u64,
    pub used_swap: u64,
    pub total_disk: u64,
    pub used_disk: u64,
    pub system_name: String,
    pub hostname: String,
    pub task_count: u64,
}

pub struct TaskServer {
    pub worker: Arc<Worker>,
    pub addr: SocketAddr,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("Task {task_id} asked for state {state}, which a worker cannot act on")]
    UnexpectedState { task_id: Uuid, state: State },

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error(transparent)]
    Docker(#[from] DockerError),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
