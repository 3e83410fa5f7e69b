pub mod config;
pub mod errors;
pub mod events;
pub mod handler;
pub mod logging;
pub mod models;

pub use config::{AppConfig, LogConfig, OrchestratorConfig, PoolConfig, QueueConfig};
pub use errors::{BatchError, Result};
pub use events::{EngineEvent, EventBus};
pub use handler::{HandlerRegistry, TaskHandler};
pub use models::{
    BatchFile, BatchJob, EngineStatistics, ErrorStrategy, FileStatus, FileStatusCounts,
    JobOptions, JobPriority, JobProgress, JobStatus, PoolStats, QueueStatistics,
    ResourceSnapshot, Task, TaskResult,
};
