//! In-process stand-ins for the container runtime and the worker transport.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use r_maestro::manager::{ClientError, ClientResult, WorkerClient};
use r_maestro::tasks::types::{Config, DockerError, ExecutorResult};
use r_maestro::tasks::{ContainerInspection, ContainerStatus, Executor, State, Task, TaskEvent};
use r_maestro::worker::{SystemStats, Worker, WorkerError};

/// Hands out container ids `c1`, `c2`, ... and reports every container as
/// running unless told otherwise.
#[derive(Default)]
pub struct FakeExecutor {
    next_id: AtomicU32,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    fail_inspect: AtomicBool,
    statuses: Mutex<HashMap<String, ContainerStatus>>,
    ports: Mutex<HashMap<String, HashMap<String, String>>>,
    missing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    pub fn fail_inspect(&self, fail: bool) {
        self.fail_inspect.store(fail, Ordering::SeqCst);
    }

    pub fn set_status(&self, container_id: &str, status: ContainerStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(container_id.to_string(), status);
    }

    pub fn set_ports(&self, container_id: &str, ports: &[(&str, &str)]) {
        let ports = ports
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.ports
            .lock()
            .unwrap()
            .insert(container_id.to_string(), ports);
    }

    pub fn remove_container(&self, container_id: &str) {
        self.missing.lock().unwrap().insert(container_id.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn start(&self, config: &Config) -> ExecutorResult<String> {
        self.record(format!("start:{}", config.image));
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(DockerError::ClientError(format!(
                "pull access denied for {}",
                config.image
            )));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("c{n}"))
    }

    async fn stop(&self, container_id: &str) -> ExecutorResult<()> {
        self.record(format!("stop:{container_id}"));
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(DockerError::ClientError(format!(
                "No such container: {container_id}"
            )));
        }
        self.missing.lock().unwrap().insert(container_id.to_string());
        Ok(())
    }

    async fn inspect(&self, container_id: &str) -> ExecutorResult<Option<ContainerInspection>> {
        self.record(format!("inspect:{container_id}"));
        if self.fail_inspect.load(Ordering::SeqCst) {
            return Err(DockerError::ClientError("daemon unavailable".to_string()));
        }
        if self.missing.lock().unwrap().contains(container_id) {
            return Ok(None);
        }
        let status = self
            .statuses
            .lock()
            .unwrap()
            .get(container_id)
            .copied()
            .unwrap_or(ContainerStatus::Running);
        let port_bindings = self
            .ports
            .lock()
            .unwrap()
            .get(container_id)
            .cloned()
            .unwrap_or_default();
        Ok(Some(ContainerInspection {
            status,
            exit_code: None,
            port_bindings,
        }))
    }
}

/// Routes manager calls straight into in-process workers.
#[derive(Default)]
pub struct LocalWorkerClient {
    workers: HashMap<String, Arc<Worker>>,
    transport_failures: AtomicU32,
    lost_replies: AtomicU32,
    reject_with: Mutex<Option<u16>>,
    stats: SystemStats,
    sent: Mutex<Vec<(String, Uuid)>>,
}

impl LocalWorkerClient {
    pub fn new(workers: &[(&str, Arc<Worker>)]) -> Self {
        LocalWorkerClient {
            workers: workers
                .iter()
                .map(|(name, worker)| (name.to_string(), worker.clone()))
                .collect(),
            stats: SystemStats {
                total_cpus: 4,
                total_memory: 8 << 30,
                total_disk: 100 << 30,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// The next `n` sends fail as if the worker were unreachable.
    pub fn fail_transport(&self, n: u32) {
        self.transport_failures.store(n, Ordering::SeqCst);
    }

    /// The next `n` sends reach the worker, but the caller sees a transport
    /// error as if the connection dropped before the reply.
    pub fn lose_replies(&self, n: u32) {
        self.lost_replies.store(n, Ordering::SeqCst);
    }

    pub fn reject_with(&self, status: Option<u16>) {
        *self.reject_with.lock().unwrap() = status;
    }

    /// `(worker, task_id)` for every event a worker accepted.
    pub fn sent(&self) -> Vec<(String, Uuid)> {
        self.sent.lock().unwrap().clone()
    }

    fn worker(&self, name: &str) -> ClientResult<&Arc<Worker>> {
        self.workers
            .get(name)
            .ok_or_else(|| ClientError::transport(name, "connection refused"))
    }

    fn injected_failure(&self, worker: &str) -> ClientResult<()> {
        let remaining = self.transport_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transport_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ClientError::transport(worker, "connection reset by peer"));
        }
        if let Some(status) = *self.reject_with.lock().unwrap() {
            return Err(ClientError::Status {
                worker: worker.to_string(),
                status,
                message: "rejected".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl WorkerClient for LocalWorkerClient {
    async fn send_event(&self, worker: &str, event: &TaskEvent) -> ClientResult<Task> {
        self.injected_failure(worker)?;
        let target = self.worker(worker)?;
        target.add_task(event.clone()).await;
        self.sent
            .lock()
            .unwrap()
            .push((worker.to_string(), event.task_id()));

        let lost = self.lost_replies.load(Ordering::SeqCst);
        if lost > 0 {
            self.lost_replies.store(lost - 1, Ordering::SeqCst);
            return Err(ClientError::transport(worker, "connection closed before reply"));
        }
        Ok(event.task().clone())
    }

    async fn stop_task(&self, worker: &str, task_id: Uuid) -> ClientResult<()> {
        self.injected_failure(worker)?;
        match self.worker(worker)?.enqueue_stop(task_id).await {
            Ok(_) => Ok(()),
            Err(WorkerError::TaskNotFound(_)) => Err(ClientError::Status {
                worker: worker.to_string(),
                status: 404,
                message: format!("No task with id {task_id} found"),
            }),
            Err(e) => Err(ClientError::Status {
                worker: worker.to_string(),
                status: 500,
                message: e.to_string(),
            }),
        }
    }

    async fn get_tasks(&self, worker: &str) -> ClientResult<Vec<Task>> {
        Ok(self.worker(worker)?.get_tasks().await)
    }

    async fn get_stats(&self, worker: &str) -> ClientResult<SystemStats> {
        self.worker(worker)?;
        Ok(self.stats.clone())
    }
}

pub fn task(image: &str) -> Task {
    Task::new(format!("test-{image}"), image)
}

pub fn scheduled(task: Task) -> TaskEvent {
    TaskEvent::new(State::Scheduled, task)
}
