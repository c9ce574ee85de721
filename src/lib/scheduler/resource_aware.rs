use crate::node::Node;
use crate::tasks::Task;

use super::types::{Scheduler, Scores};

/// Places a task on the node that would be least loaded after taking it.
///
/// Only nodes with enough free cores, memory and disk are candidates. The
/// score is the mean allocated share across the three dimensions with the
/// task included, so emptier nodes win and load spreads out.
#[derive(Debug, Clone)]
pub struct ResourceAware {
    pub name: String,
}

impl Default for ResourceAware {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceAware {
    pub fn new() -> Self {
        ResourceAware {
            name: "resource-aware".to_string(),
        }
    }
}

impl Scheduler for ResourceAware {
    fn name(&self) -> &str {
        &self.name
    }

    fn select_candidate_nodes(&self, task: &Task, nodes: &[Node]) -> Vec<Node> {
        nodes
            .iter()
            .filter(|node| {
                let fits = node.fits(task);
                if !fits {
                    tracing::debug!(
                        task_id = %task.id,
                        node = %node.name,
                        free_cores = node.free_cores(),
                        free_memory = node.free_memory(),
                        free_disk = node.free_disk(),
                        "Node lacks capacity for task"
                    );
                }
                fits
            })
            .cloned()
            .collect()
    }

    fn score(&mut self, task: &Task, candidates: &[Node]) -> Scores {
        candidates
            .iter()
            .map(|node| (node.name.clone(), node.load_with(task)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn task(cpu: f64, memory: u64) -> Task {
        let mut task = Task::new("t", "img");
        task.cpu = cpu;
        task.memory = memory as i64;
        task
    }

    fn node(name: &str, cores: f64, memory: u64) -> Node {
        Node::for_worker(name).with_capacity(cores, memory, 100 * GIB)
    }

    #[test]
    fn filter_excludes_overcommitted_nodes() {
        let scheduler = ResourceAware::new();
        let mut busy = node("busy:1", 4.0, 8 * GIB);
        busy.allocate(&task(3.5, GIB));
        let small = node("small:1", 1.0, GIB);
        let roomy = node("roomy:1", 4.0, 8 * GIB);

        let candidates =
            scheduler.select_candidate_nodes(&task(1.0, 2 * GIB), &[busy, small, roomy]);
        let names: Vec<&str> = candidates.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["roomy:1"]);
    }

    #[test]
    fn filter_returns_empty_when_nothing_fits() {
        let scheduler = ResourceAware::new();
        let nodes = vec![node("a:1", 1.0, GIB), node("b:1", 2.0, GIB)];
        assert!(scheduler.select_candidate_nodes(&task(4.0, GIB), &nodes).is_empty());
    }

    #[test]
    fn prefers_least_loaded_node() {
        let mut scheduler = ResourceAware::new();
        let mut loaded = node("loaded:1", 4.0, 8 * GIB);
        loaded.allocate(&task(2.0, 4 * GIB));
        let idle = node("idle:1", 4.0, 8 * GIB);
        let nodes = vec![loaded, idle];
        let request = task(1.0, GIB);

        let candidates = scheduler.select_candidate_nodes(&request, &nodes);
        let scores = scheduler.score(&request, &candidates);
        assert_eq!(scores.len(), candidates.len());
        assert!(scores["idle:1"] < scores["loaded:1"]);
        assert_eq!(scheduler.pick(&scores, &candidates).unwrap().name, "idle:1");
    }

    #[test]
    fn repeated_selection_is_deterministic() {
        let mut scheduler = ResourceAware::new();
        let nodes = vec![node("a:1", 4.0, 8 * GIB), node("b:1", 4.0, 8 * GIB)];
        let request = task(1.0, GIB);

        let mut picked = Vec::new();
        for _ in 0..5 {
            let candidates = scheduler.select_candidate_nodes(&request, &nodes);
            let scores = scheduler.score(&request, &candidates);
            picked.push(scheduler.pick(&scores, &candidates).unwrap().name);
        }
        assert!(picked.iter().all(|name| name == "a:1"));
    }
}
