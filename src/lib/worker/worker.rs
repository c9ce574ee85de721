use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sysinfo::System;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::stats::get_stats;
use super::types::{SystemStats, Worker, WorkerError, WorkerResult};
use crate::background::run_periodically;
use crate::tasks::types::{DockerResult, TaskResult, new_config};
use crate::tasks::{
    ContainerInspection, Executor, State, Task, TaskError, TaskEvent, valid_state_transition,
};

impl Worker {
    pub fn new(name: &str, executor: Arc<dyn Executor>) -> Self {
        Worker {
            name: name.to_string(),
            queue: Mutex::new(VecDeque::new()),
            db: RwLock::new(HashMap::new()),
            executor,
            sysinfo: Mutex::new(System::new_all()),
        }
    }

    /// Queues an event for the execution loop. The queue is unbounded.
    pub async fn add_task(&self, event: TaskEvent) {
        debug!(worker = %self.name, task_id = %event.task_id(), state = %event.state(), "Task queued");
        self.queue.lock().await.push_back(event);
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Takes the next event off the queue and acts on it.
    ///
    /// Returns `Ok(None)` when the queue is empty. An event whose desired
    /// state is not reachable from the recorded state is rejected and the
    /// record is left as it was.
    pub async fn run_task(&self) -> WorkerResult<Option<DockerResult>> {
        let Some(event) = self.queue.lock().await.pop_front() else {
            debug!(worker = %self.name, "No tasks in queue");
            return Ok(None);
        };

        let task_id = event.task_id();
        let desired = event.state();
        let persisted = self.db.read().await.get(&task_id).cloned();
        // First sighting: the incoming state stands in for the recorded one.
        let current = persisted.as_ref().map_or(desired, |task| task.state);

        if !valid_state_transition(&current, &desired) {
            warn!(
                worker = %self.name,
                %task_id,
                from = %current,
                to = %desired,
                "Invalid state transition"
            );
            return Err(TaskError::InvalidTransition {
                task_id,
                from: current,
                to: desired,
            }
            .into());
        }

        match desired {
            State::Scheduled => {
                let mut task = event.task().clone();
                task.state = current;
                self.start_task(task).await.map(Some)
            }
            State::Completed => {
                let task = persisted.unwrap_or_else(|| {
                    let mut task = event.task().clone();
                    task.state = current;
                    task
                });
                self.stop_task(task).await.map(Some)
            }
            state => {
                error!(worker = %self.name, %task_id, %state, "Event carries a state the worker cannot act on");
                Err(WorkerError::UnexpectedState { task_id, state })
            }
        }
    }

    /// Starts the task's container. A start failure marks the task
    /// `Failed`; either way the outcome is recorded before returning.
    async fn start_task(&self, mut task: Task) -> WorkerResult<DockerResult> {
        task.start_time = Some(Utc::now());
        let config = new_config(&task);
        let task_id = task.id;
        self.db.write().await.insert(task_id, task);

        info!(worker = %self.name, %task_id, image = %config.image, "Starting task");
        match self.executor.start(&config).await {
            Ok(container_id) => {
                let cid = container_id.clone();
                self.update_record(task_id, move |task| {
                    task.transition(State::Running)?;
                    task.container_id = Some(cid);
                    Ok(())
                })
                .await?;
                info!(worker = %self.name, %task_id, %container_id, "Task running");
                Ok(DockerResult::success(task_id, "start", Some(container_id)))
            }
            Err(err) => {
                error!(worker = %self.name, %task_id, error = %err, "Error running task");
                self.update_record(task_id, |task| {
                    task.transition(State::Failed)?;
                    task.finish_time = Some(Utc::now());
                    Ok(())
                })
                .await?;
                Err(err.into())
            }
        }
    }

    /// Stops the task's container and marks it `Completed`.
    ///
    /// A failed stop is logged, not returned: once a stop has been attempted
    /// the task counts as terminated.
    async fn stop_task(&self, task: Task) -> WorkerResult<DockerResult> {
        let task_id = task.id;
        match task.container_id.as_deref() {
            Some(container_id) => {
                if let Err(err) = self.executor.stop(container_id).await {
                    warn!(worker = %self.name, %task_id, container_id, error = %err, "Error stopping container");
                }
            }
            None => warn!(worker = %self.name, %task_id, "Task has no container to stop"),
        }

        let container_id = task.container_id.clone();
        self.db.write().await.entry(task_id).or_insert(task);
        self.update_record(task_id, |task| {
            task.transition(State::Completed)?;
            task.finish_time = Some(Utc::now());
            Ok(())
        })
        .await?;

        info!(worker = %self.name, %task_id, container_id = ?container_id, "Stopped task");
        Ok(DockerResult::success(task_id, "stop", container_id))
    }

    /// Applies `apply` to the stored record under the registry lock.
    async fn update_record<F>(&self, task_id: Uuid, apply: F) -> WorkerResult<Task>
    where
        F: FnOnce(&mut Task) -> TaskResult<()>,
    {
        let mut db = self.db.write().await;
        let task = db.get_mut(&task_id).ok_or(WorkerError::TaskNotFound(task_id))?;
        apply(task)?;
        Ok(task.clone())
    }

    /// Queues a stop for a task this worker knows about.
    pub async fn enqueue_stop(&self, task_id: Uuid) -> WorkerResult<Task> {
        let task = self
            .db
            .read()
            .await
            .get(&task_id)
            .cloned()
            .ok_or(WorkerError::TaskNotFound(task_id))?;

        self.add_task(TaskEvent::stop(task.clone())).await;
        info!(worker = %self.name, %task_id, container_id = ?task.container_id, "Added task to stop container");
        Ok(task)
    }

    pub async fn get_tasks(&self) -> Vec<Task> {
        self.db.read().await.values().cloned().collect()
    }

    pub async fn get_task(&self, task_id: Uuid) -> Option<Task> {
        self.db.read().await.get(&task_id).cloned()
    }

    pub async fn inspect_task(&self, task: &Task) -> WorkerResult<Option<ContainerInspection>> {
        match task.container_id.as_deref() {
            Some(container_id) => Ok(self.executor.inspect(container_id).await?),
            None => Ok(None),
        }
    }

    /// One reconciliation pass over running tasks.
    ///
    /// A task whose container is missing or has terminated is marked
    /// `Failed`; otherwise its published ports are refreshed. An inspect
    /// error leaves the task as it was until the next pass.
    pub async fn update_tasks(&self) {
        let running: Vec<Task> = self
            .db
            .read()
            .await
            .values()
            .filter(|task| task.state == State::Running)
            .cloned()
            .collect();
        debug!(worker = %self.name, running = running.len(), "Checking status of tasks");

        for task in running {
            let task_id = task.id;
            let inspection = match self.inspect_task(&task).await {
                Ok(inspection) => inspection,
                Err(err) => {
                    warn!(worker = %self.name, %task_id, error = %err, "Error inspecting task");
                    continue;
                }
            };

            let mut db = self.db.write().await;
            let Some(stored) = db.get_mut(&task_id) else {
                continue;
            };
            // A stop may have landed while we were inspecting.
            if stored.state != State::Running {
                continue;
            }

            match inspection {
                None => {
                    warn!(worker = %self.name, %task_id, "No container for running task");
                    mark_failed(stored);
                }
                Some(inspection) if inspection.is_terminated() => {
                    warn!(
                        worker = %self.name,
                        %task_id,
                        status = ?inspection.status,
                        exit_code = ?inspection.exit_code,
                        "Container for task in non-running state"
                    );
                    mark_failed(stored);
                }
                Some(inspection) => stored.port_bindings = inspection.port_bindings,
            }
        }
    }

    pub async fn collect_stats(&self) -> SystemStats {
        let task_count = self.db.read().await.len() as u64;
        // CPU usage is the delta since the previous refresh of this `System`.
        let mut sysinfo = self.sysinfo.lock().await;
        sysinfo.refresh_all();
        let stats = get_stats(&sysinfo, task_count);
        debug!(
            worker = %self.name,
            memory_pct = stats.memory_usage_percent(),
            disk_pct = stats.disk_usage_percent(),
            task_count,
            "Collected stats"
        );
        stats
    }

    /// Runs queued events until the queue is empty.
    pub async fn drain_queue(&self) {
        loop {
            match self.run_task().await {
                Ok(None) => break,
                Ok(Some(result)) => {
                    info!(worker = %self.name, task_id = %result.task_id, action = %result.action, "Task action succeeded");
                }
                Err(err) => error!(worker = %self.name, error = %err, "Error running task"),
            }
        }
    }
}

fn mark_failed(task: &mut Task) {
    match task.transition(State::Failed) {
        Ok(()) => task.finish_time = Some(Utc::now()),
        Err(err) => error!(error = %err, "Could not mark task failed"),
    }
}

pub async fn run_tasks(worker: Arc<Worker>, period: Duration, shutdown: CancellationToken) {
    run_periodically("worker-run-tasks", period, shutdown, || {
        let worker = worker.clone();
        async move { worker.drain_queue().await }
    })
    .await;
}

pub async fn update_tasks(worker: Arc<Worker>, period: Duration, shutdown: CancellationToken) {
    run_periodically("worker-update-tasks", period, shutdown, || {
        let worker = worker.clone();
        async move { worker.update_tasks().await }
    })
    .await;
}
