pub mod api;
pub mod stats;
pub mod types;
pub mod worker;

pub use types::{SystemStats, TaskServer, Worker, WorkerError, WorkerResult};
