pub mod config;
pub mod error;
pub mod orchestrator;
pub mod scheduler;
pub mod shutdown;
