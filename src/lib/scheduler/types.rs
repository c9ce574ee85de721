use std::collections::HashMap;
use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::node::Node;
use crate::tasks::Task;

/// Node name -> score. Lower is better for every policy.
pub type Scores = HashMap<String, f64>;

/// A placement policy: filter the nodes that can take a task, score them,
/// pick one.
///
/// Each stage can be called on its own. `score` takes `&mut self` because a
/// policy may keep a cursor between decisions.
pub trait Scheduler: Send + Sync {
    fn name(&self) -> &str;

    fn select_candidate_nodes(&self, task: &Task, nodes: &[Node]) -> Vec<Node>;

    /// Must score every candidate.
    fn score(&mut self, task: &Task, candidates: &[Node]) -> Scores;

    /// Lowest score wins; ties go to the earliest candidate.
    fn pick(&self, scores: &Scores, candidates: &[Node]) -> Option<Node> {
        let mut best: Option<(&Node, f64)> = None;
        for node in candidates {
            let Some(&score) = scores.get(&node.name) else {
                continue;
            };
            match best {
                Some((_, best_score)) if score >= best_score => {}
                _ => best = Some((node, score)),
            }
        }
        best.map(|(node, _)| node.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerKind {
    #[default]
    RoundRobin,
    ResourceAware,
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerKind::RoundRobin => write!(f, "round-robin"),
            SchedulerKind::ResourceAware => write!(f, "resource-aware"),
        }
    }
}
