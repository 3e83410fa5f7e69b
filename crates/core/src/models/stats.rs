use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 执行池统计信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub total_workers: usize,
    pub busy_workers: usize,
    pub idle_workers: usize,
    pub queued_tasks: usize,
    /// 池生命周期内完成的任务总数
    pub total_tasks_completed: u64,
    pub max_workers: usize,
}

impl PoolStats {
    /// 是否还有接收新任务的余量：存在空闲单元，或尚未达到单元数上限
    pub fn has_capacity(&self) -> bool {
        self.idle_workers > 0 || self.total_workers < self.max_workers
    }
}

/// 单个作业内按文件状态的计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// 作业队列的聚合统计，按需重新计算，不单独持久化
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatistics {
    pub total_jobs: usize,
    pub pending_jobs: usize,
    pub queued_jobs: usize,
    pub processing_jobs: usize,
    pub paused_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub cancelled_jobs: usize,
    /// 平均等待时间（创建到开始，毫秒）
    pub avg_wait_ms: Option<u64>,
    /// 平均处理时间（开始到完成，毫秒）
    pub avg_processing_ms: Option<u64>,
}

/// 对外暴露的引擎整体统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatistics {
    pub total_workers: usize,
    pub busy_workers: usize,
    pub idle_workers: usize,
    pub queued_tasks: usize,
    pub total_tasks_completed: u64,
    pub active_jobs: usize,
    pub active_tasks: usize,
}

/// 资源监控采样快照
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    pub pool: PoolStats,
    /// 进程常驻内存（MB）
    pub memory_mb: u64,
    pub active_tasks: usize,
    pub timestamp: DateTime<Utc>,
}
