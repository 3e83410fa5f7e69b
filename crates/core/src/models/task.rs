use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 提交给执行池的单个任务
///
/// 任务一经创建即不可变，生命周期为：排队 → 分发 → 完成（成功或失败）
/// 或超时。任务完成后对象即被丢弃，不保留长期引用。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    /// 任务类型标签，用于选择对应的处理器
    pub task_type: String,
    /// 不透明的任务载荷，由处理器自行解释
    pub payload: serde_json::Value,
    /// 数值优先级，越大越先分发
    pub priority: i32,
    /// 超时覆盖（毫秒），None时使用池的默认超时
    pub timeout_ms: Option<u64>,
}

impl Task {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: task_type.into(),
            payload,
            priority: 0,
            timeout_ms: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// 任务执行结果
///
/// 每个被实际分发的任务恰好产生一次结果；超时任务由池侧合成失败，
/// 执行单元迟到的结果将被丢弃。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub success: bool,
    pub output: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub execution_time_ms: u64,
}

impl TaskResult {
    pub fn success(task_id: Uuid, output: serde_json::Value, execution_time_ms: u64) -> Self {
        Self {
            task_id,
            success: true,
            output: Some(output),
            error_message: None,
            execution_time_ms,
        }
    }

    pub fn failure(task_id: Uuid, error_message: String, execution_time_ms: u64) -> Self {
        Self {
            task_id,
            success: false,
            output: None,
            error_message: Some(error_message),
            execution_time_ms,
        }
    }
}
