//! 文档批处理引擎
//!
//! 桌面文档编辑器的并发批处理核心：有界执行池、作业队列与任务编排
//! 的组合根。上层通过[`BatchEngine`]提交作业、订阅事件；文档操作
//! 本身由宿主应用以[`TaskHandler`]注册，引擎对操作内容不做假设。

pub mod app;
pub(crate) mod runner;

pub use app::{BatchEngine, JobFileSpec, JobRequest};

pub use docbatch_core::config::AppConfig;
pub use docbatch_core::errors::{BatchError, Result};
pub use docbatch_core::events::{EngineEvent, EventBus};
pub use docbatch_core::handler::{HandlerRegistry, TaskHandler};
pub use docbatch_core::logging::init_logging;
pub use docbatch_core::models::{
    BatchFile, BatchJob, EngineStatistics, ErrorStrategy, FileStatus, JobOptions, JobPriority,
    JobStatus, QueueStatistics,
};
pub use docbatch_orchestrator::{TaskCompletion, TaskOrchestrator, TaskSpec};
pub use docbatch_pool::{ExecutionPool, PoolHandle};
pub use docbatch_queue::JobQueue;
