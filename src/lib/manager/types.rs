use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::assignments::Assignments;
use super::client::WorkerClient;
use crate::node::Node;
use crate::scheduler::Scheduler;
use crate::tasks::{Task, TaskError, TaskEvent};

/// Accepts task events, places them on workers and mirrors what the workers
/// report back.
///
/// Every registry sits behind its own lock. No two of them are ever held at
/// the same time, and none is held across a network call.
pub struct Manager {
    pub(super) pending: Mutex<VecDeque<TaskEvent>>,
    pub(super) task_db: RwLock<HashMap<Uuid, Task>>,
    pub(super) event_db: RwLock<HashMap<Uuid, TaskEvent>>,
    pub(super) workers: Vec<String>,
    pub(super) nodes: RwLock<Vec<Node>>,
    pub(super) assignments: Mutex<Assignments>,
    pub(super) scheduler: Mutex<Box<dyn Scheduler>>,
    pub(super) client: Arc<dyn WorkerClient>,
    /// Failed sends per event id.
    pub(super) dispatch_attempts: Mutex<HashMap<Uuid, u32>>,
    pub(super) dead_letters: Mutex<Vec<TaskEvent>>,
    pub(super) max_dispatch_attempts: u32,
}

pub struct ManagerServer {
    pub manager: Arc<Manager>,
    pub addr: SocketAddr,
}

/// What a single `send_work` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing was queued.
    Idle,
    Sent { task_id: Uuid, worker: String },
    /// A transport failure put the event back on the queue.
    Requeued { task_id: Uuid, attempt: u32 },
    /// Retries ran out; the event was set aside.
    DeadLettered { task_id: Uuid },
    /// No node could take the task. It stays recorded and unscheduled.
    PlacementFailed { task_id: Uuid },
    /// The event was refused, locally or by the worker, and will not be retried.
    Rejected { task_id: Uuid, reason: String },
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("No available candidates match resource request for task {0}")]
    NoCandidates(Uuid),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Task {0} is not assigned to any worker")]
    NotAssigned(Uuid),

    #[error(transparent)]
    Task(#[from] TaskError),
}

pub type ManagerResult<T> = Result<T, ManagerError>;
