use thiserror::Error;
use uuid::Uuid;

/// 批处理引擎错误类型定义
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("执行单元崩溃: {message}")]
    UnitCrash { message: String },

    #[error("任务执行超时: {task_id} ({timeout_ms}ms)")]
    TaskTimeout { task_id: Uuid, timeout_ms: u64 },

    #[error("执行池已关闭")]
    PoolShutdown,

    #[error("执行池容量已满，任务保持排队")]
    CapacityExhausted,

    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("作业未找到: {id}")]
    JobNotFound { id: Uuid },

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for BatchError {
    fn from(e: serde_json::Error) -> Self {
        BatchError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, BatchError>;
