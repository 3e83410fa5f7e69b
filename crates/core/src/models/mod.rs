pub mod job;
pub mod stats;
pub mod task;

pub use job::{
    BatchFile, BatchJob, ErrorStrategy, FileStatus, JobOptions, JobPriority, JobProgress,
    JobStatus,
};
pub use stats::{EngineStatistics, FileStatusCounts, PoolStats, QueueStatistics, ResourceSnapshot};
pub use task::{Task, TaskResult};
