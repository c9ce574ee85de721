use crate::node::Node;
use crate::tasks::Task;

use super::types::{Scheduler, Scores};

/// Rotates through every node in turn, ignoring resources.
#[derive(Debug, Clone)]
pub struct RoundRobin {
    pub name: String,
    last_worker: Option<usize>,
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobin {
    pub fn new() -> Self {
        RoundRobin {
            name: "roundrobin".to_string(),
            last_worker: None,
        }
    }
}

impl Scheduler for RoundRobin {
    fn name(&self) -> &str {
        &self.name
    }

    fn select_candidate_nodes(&self, _task: &Task, nodes: &[Node]) -> Vec<Node> {
        nodes.to_vec()
    }

    /// Advances the cursor and gives the node under it the only low score.
    fn score(&mut self, _task: &Task, candidates: &[Node]) -> Scores {
        if candidates.is_empty() {
            return Scores::new();
        }

        let next = match self.last_worker {
            Some(last) if last + 1 < candidates.len() => last + 1,
            _ => 0,
        };
        self.last_worker = Some(next);

        candidates
            .iter()
            .enumerate()
            .map(|(i, node)| (node.name.clone(), if i == next { 0.1 } else { 1.0 }))
            .collect()
    }
}
