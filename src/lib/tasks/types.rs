use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::state::valid_state_transition;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    #[default]
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Pending => write!(f, "pending"),
            State::Scheduled => write!(f, "scheduled"),
            State::Running => write!(f, "running"),
            State::Completed => write!(f, "completed"),
            State::Failed => write!(f, "failed"),
        }
    }
}

/// A unit of work: the container to run, what it may consume, and where it
/// is in its lifecycle.
///
/// Missing fields decode to their defaults so clients only need to send an
/// id and an image; unknown fields are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Task {
    pub id: Uuid,
    pub container_id: Option<String>,
    pub name: String,
    pub state: State,
    pub image: String,
    /// Requested cores, fractional.
    pub cpu: f64,
    /// Requested memory in bytes.
    pub memory: i64,
    /// Requested disk in bytes.
    pub disk: i64,
    /// Container ports such as `80/tcp`.
    pub exposed_ports: BTreeSet<String>,
    /// Published bindings observed on the runtime, `80/tcp` -> `0.0.0.0:32768`.
    pub port_bindings: HashMap<String, String>,
    pub env: Vec<String>,
    pub cmd: Vec<String>,
    pub restart_policy: String,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Task {
            id: Uuid::new_v4(),
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    /// Moves the task to `dst`, refusing anything the transition table does
    /// not allow. The task is left untouched on error.
    pub fn transition(&mut self, dst: State) -> TaskResult<()> {
        if !valid_state_transition(&self.state, &dst) {
            return Err(TaskError::InvalidTransition {
                task_id: self.id,
                from: self.state,
                to: dst,
            });
        }
        self.state = dst;
        Ok(())
    }

    pub fn validate(&self) -> TaskResult<()> {
        if self.id.is_nil() {
            return Err(TaskError::Validation("task id is required".to_string()));
        }
        if self.image.trim().is_empty() {
            return Err(TaskError::Validation(format!(
                "task {} has no image",
                self.id
            )));
        }
        if self.cpu < 0.0 || self.memory < 0 || self.disk < 0 {
            return Err(TaskError::Validation(format!(
                "task {} requests negative resources",
                self.id
            )));
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, State::Completed | State::Failed)
    }

    pub fn memory_request(&self) -> u64 {
        u64::try_from(self.memory).unwrap_or(0)
    }

    pub fn disk_request(&self) -> u64 {
        u64::try_from(self.disk).unwrap_or(0)
    }
}

/// An instruction to move a task toward a desired state.
///
/// Fields are private: an event is never edited once built. Issuing a new
/// desired state means building a new event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskEvent {
    #[serde(default = "Uuid::new_v4")]
    id: Uuid,
    state: State,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
    task: Task,
}

impl TaskEvent {
    pub fn new(state: State, task: Task) -> Self {
        TaskEvent {
            id: Uuid::new_v4(),
            state,
            timestamp: Utc::now(),
            task,
        }
    }

    /// Event asking for the task to be started.
    pub fn start(task: Task) -> Self {
        Self::new(State::Scheduled, task)
    }

    /// Event asking for the task to be stopped.
    pub fn stop(task: Task) -> Self {
        Self::new(State::Completed, task)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn task_id(&self) -> Uuid {
        self.task.id
    }
}

/// Runtime configuration derived from a task, handed to the executor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub name: String,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub exposed_ports: BTreeSet<String>,
    pub cmd: Vec<String>,
    pub image: String,
    pub cpu: f64,
    pub memory: i64,
    pub disk: i64,
    pub env: Vec<String>,
    pub restart_policy: String,
}

pub fn new_config(task: &Task) -> Config {
    Config {
        name: task.name.clone(),
        exposed_ports: task.exposed_ports.clone(),
        cmd: task.cmd.clone(),
        image: task.image.clone(),
        cpu: task.cpu,
        memory: task.memory,
        disk: task.disk,
        env: task.env.clone(),
        restart_policy: task.restart_policy.clone(),
        ..Default::default()
    }
}

/// Outcome of an executor action that succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerResult {
    pub task_id: Uuid,
    pub action: String,
    pub container_id: Option<String>,
    pub result: String,
}

impl DockerResult {
    pub fn success(task_id: Uuid, action: &str, container_id: Option<String>) -> Self {
        DockerResult {
            task_id,
            action: action.to_string(),
            container_id,
            result: "success".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DockerError {
    #[error("Docker client error: {0}")]
    ClientError(String),

    #[error("Docker API error: {0}")]
    Api(#[from] bollard::errors::Error),
}

pub type ExecutorResult<T> = Result<T, DockerError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    #[error("Invalid task: {0}")]
    Validation(String),

    #[error("Invalid state transition for task {task_id}: {from} -> {to}")]
    InvalidTransition { task_id: Uuid, from: State, to: State },
}

pub type TaskResult<T> = Result<T, TaskError>;
