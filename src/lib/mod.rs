pub mod background;
pub mod config;
pub mod manager;
pub mod node;
pub mod scheduler;
pub mod server;
pub mod tasks;
pub mod worker;
