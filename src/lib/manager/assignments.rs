use std::collections::{HashMap, HashSet};

use uuid::Uuid;

/// Which worker holds which task, kept in both directions.
///
/// A task id is in exactly one worker's set iff that worker is its entry in
/// the reverse map. Only `assign` and `unassign` touch either side.
#[derive(Debug, Clone, Default)]
pub struct Assignments {
    worker_tasks: HashMap<String, HashSet<Uuid>>,
    task_workers: HashMap<Uuid, String>,
}

impl Assignments {
    pub fn new(workers: &[String]) -> Self {
        Assignments {
            worker_tasks: workers
                .iter()
                .map(|worker| (worker.clone(), HashSet::new()))
                .collect(),
            task_workers: HashMap::new(),
        }
    }

    /// Assigns `task_id` to `worker`, moving it off any previous worker.
    pub fn assign(&mut self, task_id: Uuid, worker: &str) {
        self.unassign(task_id);
        self.worker_tasks
            .entry(worker.to_string())
            .or_default()
            .insert(task_id);
        self.task_workers.insert(task_id, worker.to_string());
    }

    pub fn unassign(&mut self, task_id: Uuid) -> Option<String> {
        let worker = self.task_workers.remove(&task_id)?;
        if let Some(tasks) = self.worker_tasks.get_mut(&worker) {
            tasks.remove(&task_id);
        }
        Some(worker)
    }

    pub fn worker_for(&self, task_id: Uuid) -> Option<&str> {
        self.task_workers.get(&task_id).map(String::as_str)
    }

    pub fn tasks_for(&self, worker: &str) -> HashSet<Uuid> {
        self.worker_tasks.get(worker).cloned().unwrap_or_default()
    }

    pub fn is_consistent(&self) -> bool {
        let forward = self.worker_tasks.iter().all(|(worker, tasks)| {
            tasks
                .iter()
                .all(|task_id| self.task_workers.get(task_id) == Some(worker))
        });
        let backward = self.task_workers.iter().all(|(task_id, worker)| {
            self.worker_tasks
                .get(worker)
                .is_some_and(|tasks| tasks.contains(task_id))
        });
        forward && backward
    }
}
