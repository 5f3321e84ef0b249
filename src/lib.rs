pub mod breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod keys;
pub mod models;
pub mod progress;
pub mod queue;
pub mod retry;
pub mod routes;
pub mod scheduler;
pub mod store;
pub mod task_store;
pub mod worker_processing;

pub use error::{SchedulerError, StoreError};
pub use scheduler::Scheduler;
