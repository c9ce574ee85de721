pub mod docker;
pub mod executor;
pub mod state;
pub mod types;

pub use executor::{ContainerInspection, ContainerStatus, Executor};
pub use state::valid_state_transition;
pub use types::{State, Task, TaskError, TaskEvent};
