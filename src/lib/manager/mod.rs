pub mod api;
pub mod assignments;
pub mod client;
pub mod manager;
pub mod types;

pub use assignments::Assignments;
pub use client::{ClientError, ClientResult, HttpWorkerClient, WorkerClient};
pub use types::{DispatchOutcome, Manager, ManagerError, ManagerResult, ManagerServer};
