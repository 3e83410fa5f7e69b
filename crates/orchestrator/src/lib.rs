//! 任务编排器：作业维度的池封装 + 资源监控

pub mod monitor;
pub mod orchestrator;

pub use monitor::{MemorySampler, ProcMemorySampler, ResourceMonitor};
pub use orchestrator::{TaskCompletion, TaskOrchestrator, TaskSpec};
