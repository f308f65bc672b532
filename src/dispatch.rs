//! Dispatch engine, its worker pool, and the registry/service that own running engines.

pub mod backoff;
pub mod cursor;
pub mod engine;
mod lifecycle;
pub mod registry;
pub mod service;
mod worker;
mod worker_pool;

pub use backoff::{retry_with_backoff, RetryDisposition, RetryError, RetryPolicy};
pub use cursor::Cursor;
pub use engine::{DispatchEngine, EngineReport, EngineState, EngineStatus, StatusSnapshot};
pub use registry::{RegistryError, TaskCompletion, TaskId, TaskRegistration, TaskRegistry};
pub use service::{DispatchService, StopTarget};
