use super::resource_aware::ResourceAware;
use super::round_robin::RoundRobin;
use super::types::{Scheduler, SchedulerKind};

impl SchedulerKind {
    /// Builds the policy. The choice is fixed for the lifetime of a manager.
    pub fn build(self) -> Box<dyn Scheduler> {
        match self {
            SchedulerKind::RoundRobin => Box::new(RoundRobin::new()),
            SchedulerKind::ResourceAware => Box::new(ResourceAware::new()),
        }
    }
}
