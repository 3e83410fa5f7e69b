use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 作业内单个文件的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl FileStatus {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileStatus::Completed | FileStatus::Failed | FileStatus::Cancelled
        )
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileStatus::Pending => write!(f, "pending"),
            FileStatus::Processing => write!(f, "processing"),
            FileStatus::Completed => write!(f, "completed"),
            FileStatus::Failed => write!(f, "failed"),
            FileStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// 批处理作业状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Queued,
    Processing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Paused => write!(f, "paused"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// 作业优先级（四级枚举）
///
/// 排序时使用数值rank：critical < high < normal < low，rank小的先调度。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Critical,
    High,
    Normal,
    Low,
}

impl JobPriority {
    /// 排序用的数值rank，越小优先级越高
    pub fn rank(&self) -> u8 {
        match self {
            JobPriority::Critical => 0,
            JobPriority::High => 1,
            JobPriority::Normal => 2,
            JobPriority::Low => 3,
        }
    }

    /// 映射为执行池的数值任务优先级（越大越先分发）
    pub fn task_priority(&self) -> i32 {
        match self {
            JobPriority::Critical => 100,
            JobPriority::High => 50,
            JobPriority::Normal => 0,
            JobPriority::Low => -50,
        }
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

/// 作业内文件失败时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorStrategy {
    /// 继续处理其余文件；作业整体不因个别文件失败而标记为失败
    ContinueOnError,
    /// 首个文件失败即停止调度，剩余待处理文件标记为取消，作业失败
    AbortOnError,
}

impl Default for ErrorStrategy {
    fn default() -> Self {
        ErrorStrategy::ContinueOnError
    }
}

/// 作业选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobOptions {
    /// 单个文件的最大重试次数
    pub max_retries: u32,
    /// 作业内文件的并行处理上限
    pub parallelism: usize,
    pub error_strategy: ErrorStrategy,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            parallelism: 2,
            error_strategy: ErrorStrategy::default(),
        }
    }
}

/// 作业进度汇总
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub total_files: usize,
    pub completed_files: usize,
    pub failed_files: usize,
    pub current_file: Option<String>,
    /// 整体完成百分比（0-100）
    pub overall_percent: u8,
}

/// 作业内的单个输入文件
///
/// 归属于其父作业，只通过JobQueue的更新操作变更。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFile {
    pub id: Uuid,
    pub name: String,
    pub source_path: String,
    pub size_bytes: u64,
    pub page_count: Option<u32>,
    pub status: FileStatus,
    /// 处理进度百分比（0-100）
    pub progress: u8,
    pub retry_count: u32,
    pub error: Option<String>,
    pub output_path: Option<String>,
}

impl BatchFile {
    pub fn new(name: impl Into<String>, source_path: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            source_path: source_path.into(),
            size_bytes,
            page_count: None,
            status: FileStatus::Pending,
            progress: 0,
            retry_count: 0,
            error: None,
            output_path: None,
        }
    }
}

/// 用户发起的批处理作业
///
/// 不变式：只有当所有文件都到达终态时，作业状态才允许为completed或failed；
/// 取消作业时仍处于pending的文件被一并标记为cancelled。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub id: Uuid,
    /// 操作类型（压缩、转换、OCR、加水印等），对应处理器的任务类型
    pub operation: String,
    pub name: String,
    pub files: Vec<BatchFile>,
    pub options: JobOptions,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub template_id: Option<String>,
}

impl BatchJob {
    pub fn new(
        operation: impl Into<String>,
        name: impl Into<String>,
        files: Vec<BatchFile>,
        options: JobOptions,
        priority: JobPriority,
    ) -> Self {
        let total = files.len();
        Self {
            id: Uuid::new_v4(),
            operation: operation.into(),
            name: name.into(),
            files,
            options,
            priority,
            status: JobStatus::Pending,
            progress: JobProgress {
                total_files: total,
                ..JobProgress::default()
            },
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            template_id: None,
        }
    }

    pub fn file(&self, file_id: Uuid) -> Option<&BatchFile> {
        self.files.iter().find(|f| f.id == file_id)
    }
}
