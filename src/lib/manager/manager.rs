use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::assignments::Assignments;
use super::client::{ClientError, WorkerClient};
use super::types::{DispatchOutcome, Manager, ManagerError, ManagerResult};
use crate::background::run_periodically;
use crate::config::ManagerConfig;
use crate::node::Node;
use crate::scheduler::Scheduler;
use crate::tasks::{State, Task, TaskError, TaskEvent, valid_state_transition};

impl Manager {
    pub fn new(
        nodes: Vec<Node>,
        scheduler: Box<dyn Scheduler>,
        client: Arc<dyn WorkerClient>,
    ) -> Self {
        let workers: Vec<String> = nodes.iter().map(|node| node.name.clone()).collect();
        Manager {
            pending: Mutex::new(VecDeque::new()),
            task_db: RwLock::new(HashMap::new()),
            event_db: RwLock::new(HashMap::new()),
            assignments: Mutex::new(Assignments::new(&workers)),
            workers,
            nodes: RwLock::new(nodes),
            scheduler: Mutex::new(scheduler),
            client,
            dispatch_attempts: Mutex::new(HashMap::new()),
            dead_letters: Mutex::new(Vec::new()),
            max_dispatch_attempts: 5,
        }
    }

    pub fn from_config(config: &ManagerConfig, client: Arc<dyn WorkerClient>) -> Self {
        let nodes = config
            .workers
            .iter()
            .map(String::as_str)
            .map(Node::for_worker)
            .collect();
        Self::new(nodes, config.scheduler.build(), client)
            .with_max_dispatch_attempts(config.max_dispatch_attempts)
    }

    pub fn with_max_dispatch_attempts(mut self, attempts: u32) -> Self {
        self.max_dispatch_attempts = attempts.max(1);
        self
    }

    pub fn workers(&self) -> &[String] {
        &self.workers
    }

    /// Queues an event for dispatch. Nothing is checked here.
    pub async fn add_task(&self, event: TaskEvent) {
        debug!(task_id = %event.task_id(), state = %event.state(), "Event queued");
        self.pending.lock().await.push_back(event);
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Runs the scheduler's filter, score and pick over the current nodes.
    pub async fn select_worker(&self, task: &Task) -> ManagerResult<Node> {
        let nodes = self.nodes.read().await.clone();
        let mut scheduler = self.scheduler.lock().await;

        let candidates = scheduler.select_candidate_nodes(task, &nodes);
        if candidates.is_empty() {
            return Err(ManagerError::NoCandidates(task.id));
        }
        let scores = scheduler.score(task, &candidates);
        let node = scheduler
            .pick(&scores, &candidates)
            .ok_or(ManagerError::NoCandidates(task.id))?;

        debug!(task_id = %task.id, scheduler = scheduler.name(), worker = %node.name, "Selected worker");
        Ok(node)
    }

    /// Takes one event off the pending queue and delivers it.
    ///
    /// Start events are placed by the scheduler unless the task already has
    /// a worker; stop events go to the worker already running the task.
    /// Transport failures requeue the event for the same worker until
    /// `max_dispatch_attempts` is reached.
    pub async fn send_work(&self) -> DispatchOutcome {
        let Some(event) = self.pending.lock().await.pop_front() else {
            debug!("No work in the queue");
            return DispatchOutcome::Idle;
        };
        info!(event_id = %event.id(), task_id = %event.task_id(), state = %event.state(), "Pulled event off pending queue");

        self.event_db
            .write()
            .await
            .insert(event.id(), event.clone());

        match event.state() {
            State::Scheduled => self.dispatch_start(event).await,
            State::Completed => self.dispatch_stop(event).await,
            state => {
                let task_id = event.task_id();
                error!(%task_id, %state, "Event carries a state the manager cannot dispatch");
                DispatchOutcome::Rejected {
                    task_id,
                    reason: format!("cannot dispatch an event for state {state}"),
                }
            }
        }
    }

    async fn dispatch_start(&self, event: TaskEvent) -> DispatchOutcome {
        let task_id = event.task_id();

        let current = self
            .task_db
            .read()
            .await
            .get(&task_id)
            .map_or(State::Pending, |task| task.state);
        if !valid_state_transition(&current, &State::Scheduled) {
            let err = TaskError::InvalidTransition {
                task_id,
                from: current,
                to: State::Scheduled,
            };
            warn!(%task_id, error = %err, "Refusing to schedule task");
            self.sent(event.id()).await;
            return DispatchOutcome::Rejected {
                task_id,
                reason: err.to_string(),
            };
        }

        let worker = match self.worker_for(task_id).await {
            Some(worker) => {
                debug!(%task_id, %worker, "Task already placed, resending to its worker");
                worker
            }
            None => match self.place(&event).await {
                Ok(worker) => worker,
                Err(outcome) => return outcome,
            },
        };

        match self.client.send_event(&worker, &event).await {
            Ok(accepted) => {
                info!(%task_id, %worker, state = %accepted.state, "Event sent to worker");
                self.sent(event.id()).await;
                DispatchOutcome::Sent { task_id, worker }
            }
            Err(ClientError::Decode { message, .. }) => {
                warn!(%task_id, %worker, reply = %message, "Worker accepted event but the reply could not be decoded");
                self.sent(event.id()).await;
                DispatchOutcome::Sent { task_id, worker }
            }
            Err(err) if err.is_transport() => {
                // The worker may have the event already, so the task stays on it.
                error!(%task_id, %worker, error = %err, "Error connecting to worker");
                self.requeue(event, err).await
            }
            Err(err) => {
                error!(%task_id, %worker, error = %err, "Worker refused event");
                self.assignments.lock().await.unassign(task_id);
                self.release(&worker, event.task()).await;
                self.sent(event.id()).await;
                DispatchOutcome::Rejected {
                    task_id,
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Picks a worker for a task that has none yet, marks the task
    /// `Scheduled` and reserves its resources on the node.
    async fn place(&self, event: &TaskEvent) -> Result<String, DispatchOutcome> {
        let task_id = event.task_id();
        let node = match self.select_worker(event.task()).await {
            Ok(node) => node,
            Err(err) => {
                warn!(%task_id, error = %err, "Error selecting worker");
                self.task_db
                    .write()
                    .await
                    .entry(task_id)
                    .or_insert_with(|| pending_copy(event.task()));
                return Err(DispatchOutcome::PlacementFailed { task_id });
            }
        };

        {
            let mut db = self.task_db.write().await;
            let task = db
                .entry(task_id)
                .or_insert_with(|| pending_copy(event.task()));
            if let Err(err) = task.transition(State::Scheduled) {
                warn!(%task_id, error = %err, "Task changed state while being placed");
                return Err(DispatchOutcome::Rejected {
                    task_id,
                    reason: err.to_string(),
                });
            }
        }
        self.assignments.lock().await.assign(task_id, &node.name);
        self.allocate(&node.name, event.task()).await;
        Ok(node.name)
    }

    async fn dispatch_stop(&self, event: TaskEvent) -> DispatchOutcome {
        let task_id = event.task_id();
        let worker = self
            .assignments
            .lock()
            .await
            .worker_for(task_id)
            .map(str::to_string);
        let Some(worker) = worker else {
            let err = ManagerError::NotAssigned(task_id);
            warn!(%task_id, error = %err, "Cannot stop task");
            return DispatchOutcome::Rejected {
                task_id,
                reason: err.to_string(),
            };
        };

        match self.client.stop_task(&worker, task_id).await {
            Ok(()) => {
                info!(%task_id, %worker, "Task has been scheduled to be stopped");
                self.sent(event.id()).await;
                DispatchOutcome::Sent { task_id, worker }
            }
            Err(err) if err.is_transport() => {
                error!(%task_id, %worker, error = %err, "Error connecting to worker");
                self.requeue(event, err).await
            }
            Err(err) => {
                error!(%task_id, %worker, error = %err, "Error sending request stopping task");
                self.sent(event.id()).await;
                DispatchOutcome::Rejected {
                    task_id,
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Puts a transport-failed event back at the end of the queue, or sets it
    /// aside once it has used up its attempts.
    async fn requeue(&self, event: TaskEvent, err: ClientError) -> DispatchOutcome {
        let task_id = event.task_id();
        let attempt = {
            let mut attempts = self.dispatch_attempts.lock().await;
            let attempt = attempts.entry(event.id()).or_insert(0);
            *attempt += 1;
            *attempt
        };

        if attempt < self.max_dispatch_attempts {
            warn!(%task_id, attempt, max_attempts = self.max_dispatch_attempts, "Requeueing event");
            self.pending.lock().await.push_back(event);
            return DispatchOutcome::Requeued { task_id, attempt };
        }

        // The task keeps its recorded state and its worker: a delivery that
        // only lost its reply still shows up in the next poll.
        error!(%task_id, attempt, error = %err, "Giving up on event, moving it to dead letters");
        self.dispatch_attempts.lock().await.remove(&event.id());
        self.dead_letters.lock().await.push(event);
        DispatchOutcome::DeadLettered { task_id }
    }

    async fn sent(&self, event_id: Uuid) {
        self.dispatch_attempts.lock().await.remove(&event_id);
    }

    async fn allocate(&self, worker: &str, task: &Task) {
        if let Some(node) = self.nodes.write().await.iter_mut().find(|n| n.name == worker) {
            node.allocate(task);
        }
    }

    async fn release(&self, worker: &str, task: &Task) {
        if let Some(node) = self.nodes.write().await.iter_mut().find(|n| n.name == worker) {
            node.release(task);
        }
    }

    /// Pulls every worker's task list and merges it into the registry.
    ///
    /// Unknown tasks are ignored. For known tasks the assigned worker's
    /// state, timestamps and container id overwrite the manager's copy.
    pub async fn update_tasks(&self) {
        for worker in &self.workers {
            debug!(%worker, "Checking worker for task updates");
            match self.client.get_tasks(worker).await {
                Ok(tasks) => self.merge_tasks(worker, tasks).await,
                Err(err) => warn!(%worker, error = %err, "Error fetching tasks from worker"),
            }
        }
    }

    async fn merge_tasks(&self, worker: &str, reported: Vec<Task>) {
        let assigned: HashSet<Uuid> = self.assignments.lock().await.tasks_for(worker);
        let mut finished = Vec::new();

        {
            let mut db = self.task_db.write().await;
            for task in reported {
                let task_id = task.id;
                let Some(local) = db.get_mut(&task_id) else {
                    info!(%task_id, %worker, "Task with ID not found, ignoring");
                    continue;
                };
                if !assigned.contains(&task_id) {
                    warn!(%task_id, %worker, "Worker reported a task assigned elsewhere, ignoring");
                    continue;
                }

                let was_terminal = local.is_terminal();
                if local.state != task.state {
                    info!(%task_id, %worker, from = %local.state, to = %task.state, "Task state updated");
                }
                local.state = task.state;
                local.start_time = task.start_time;
                local.finish_time = task.finish_time;
                local.container_id = task.container_id;

                if !was_terminal && local.is_terminal() {
                    finished.push(local.clone());
                }
            }
        }

        for task in finished {
            self.release(worker, &task).await;
        }
    }

    /// Refreshes each node's capacity from the worker's `/stats`.
    pub async fn update_nodes(&self) {
        for worker in &self.workers {
            match self.client.get_stats(worker).await {
                Ok(stats) => {
                    let mut nodes = self.nodes.write().await;
                    if let Some(node) = nodes.iter_mut().find(|n| &n.name == worker) {
                        node.update_capacity(&stats);
                        debug!(%worker, cores = node.cores, memory = node.memory, disk = node.disk, "Node capacity refreshed");
                    }
                }
                Err(err) => warn!(%worker, error = %err, "Error fetching stats from worker"),
            }
        }
    }

    /// Queues a stop for a task that is placed on a worker and not finished.
    pub async fn stop_task(&self, task_id: Uuid) -> ManagerResult<TaskEvent> {
        let task = self
            .task_db
            .read()
            .await
            .get(&task_id)
            .cloned()
            .ok_or(ManagerError::TaskNotFound(task_id))?;
        if task.is_terminal() {
            return Err(TaskError::InvalidTransition {
                task_id,
                from: task.state,
                to: State::Completed,
            }
            .into());
        }
        if self.worker_for(task_id).await.is_none() {
            return Err(ManagerError::NotAssigned(task_id));
        }

        let event = TaskEvent::stop(task);
        self.add_task(event.clone()).await;
        info!(event_id = %event.id(), %task_id, "Added task event to stop task");
        Ok(event)
    }

    pub async fn get_tasks(&self) -> Vec<Task> {
        self.task_db.read().await.values().cloned().collect()
    }

    pub async fn get_task(&self, task_id: Uuid) -> Option<Task> {
        self.task_db.read().await.get(&task_id).cloned()
    }

    pub async fn get_event(&self, event_id: Uuid) -> Option<TaskEvent> {
        self.event_db.read().await.get(&event_id).cloned()
    }

    pub async fn worker_for(&self, task_id: Uuid) -> Option<String> {
        self.assignments
            .lock()
            .await
            .worker_for(task_id)
            .map(str::to_string)
    }

    pub async fn assignments(&self) -> Assignments {
        self.assignments.lock().await.clone()
    }

    pub async fn nodes(&self) -> Vec<Node> {
        self.nodes.read().await.clone()
    }

    pub async fn dead_letters(&self) -> Vec<TaskEvent> {
        self.dead_letters.lock().await.clone()
    }

    /// Dispatches the events queued at the start of the call. Requeued
    /// events wait for the next round.
    pub async fn drain_pending(&self) {
        let queued = self.pending_len().await;
        for _ in 0..queued {
            match self.send_work().await {
                DispatchOutcome::Idle => break,
                outcome => debug!(?outcome, "Dispatch finished"),
            }
        }
    }
}

/// The manager's first record of a task: the submitted snapshot, not yet placed.
fn pending_copy(task: &Task) -> Task {
    Task {
        state: State::Pending,
        container_id: None,
        start_time: None,
        finish_time: None,
        ..task.clone()
    }
}

pub async fn process_tasks(manager: Arc<Manager>, period: Duration, shutdown: CancellationToken) {
    run_periodically("manager-process-tasks", period, shutdown, || {
        let manager = manager.clone();
        async move { manager.drain_pending().await }
    })
    .await;
}

pub async fn update_tasks(manager: Arc<Manager>, period: Duration, shutdown: CancellationToken) {
    run_periodically("manager-update-tasks", period, shutdown, || {
        let manager = manager.clone();
        async move { manager.update_tasks().await }
    })
    .await;
}

pub async fn update_nodes(manager: Arc<Manager>, period: Duration, shutdown: CancellationToken) {
    run_periodically("manager-update-nodes", period, shutdown, || {
        let manager = manager.clone();
        async move { manager.update_nodes().await }
    })
    .await;
}
