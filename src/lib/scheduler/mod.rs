pub mod resource_aware;
pub mod round_robin;
pub mod scheduler;
pub mod types;

pub use resource_aware::ResourceAware;
pub use round_robin::RoundRobin;
pub use types::{Scheduler, SchedulerKind, Scores};
