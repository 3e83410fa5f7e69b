//! 作业与文件的状态转换
//!
//! 全部为纯函数：输入记录的引用，输出新记录，不做原地修改。
//! 进入processing时写入started_at，进入终态时写入completed_at。

use chrono::Utc;
use uuid::Uuid;

use docbatch_core::errors::{BatchError, Result};
use docbatch_core::models::{BatchJob, FileStatus, JobProgress, JobStatus};

/// 变更作业状态，并维护时间戳
///
/// 进入processing首次写入started_at；进入终态首次写入completed_at；
/// 从终态回到活跃状态（重试）时清除completed_at。
pub fn update_job_status(job: &BatchJob, status: JobStatus) -> BatchJob {
    let mut next = job.clone();
    next.status = status;
    match status {
        JobStatus::Processing => {
            if next.started_at.is_none() {
                next.started_at = Some(Utc::now());
            }
            next.completed_at = None;
        }
        JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => {
            if next.completed_at.is_none() {
                next.completed_at = Some(Utc::now());
            }
        }
        _ => {
            next.completed_at = None;
        }
    }
    next
}

/// 变更作业内单个文件的状态
///
/// completed时进度置为100并记录输出路径；failed时记录错误信息。
pub fn update_file_status(
    job: &BatchJob,
    file_id: Uuid,
    status: FileStatus,
    error: Option<String>,
    output_path: Option<String>,
) -> Result<BatchJob> {
    let mut next = job.clone();
    let file = next
        .files
        .iter_mut()
        .find(|f| f.id == file_id)
        .ok_or_else(|| BatchError::Validation(format!("作业 {} 中不存在文件 {}", job.id, file_id)))?;

    file.status = status;
    match status {
        FileStatus::Completed => {
            file.progress = 100;
            file.error = None;
            file.output_path = output_path;
        }
        FileStatus::Failed => {
            file.error = error;
        }
        FileStatus::Pending => {
            file.progress = 0;
            file.error = None;
            file.output_path = None;
        }
        _ => {}
    }
    Ok(next)
}

/// 更新处理中文件的进度百分比；终态文件的进度不再变化
pub fn update_file_progress(job: &BatchJob, file_id: Uuid, progress: u8) -> Result<BatchJob> {
    let mut next = job.clone();
    let file = next
        .files
        .iter_mut()
        .find(|f| f.id == file_id)
        .ok_or_else(|| BatchError::Validation(format!("作业 {} 中不存在文件 {}", job.id, file_id)))?;
    if !file.status.is_terminal() {
        file.progress = progress.min(100);
    }
    Ok(next)
}

/// 依据文件状态重新计算作业进度汇总
pub fn update_job_progress(job: &BatchJob) -> BatchJob {
    let mut next = job.clone();
    let total = next.files.len();
    let completed = next
        .files
        .iter()
        .filter(|f| f.status == FileStatus::Completed)
        .count();
    let failed = next
        .files
        .iter()
        .filter(|f| f.status == FileStatus::Failed)
        .count();
    let terminal = next.files.iter().filter(|f| f.status.is_terminal()).count();
    let current_file = next
        .files
        .iter()
        .find(|f| f.status == FileStatus::Processing)
        .map(|f| f.name.clone());

    next.progress = JobProgress {
        total_files: total,
        completed_files: completed,
        failed_files: failed,
        current_file,
        overall_percent: if total == 0 {
            100
        } else {
            ((terminal * 100) / total) as u8
        },
    };
    next
}

/// 重置可重试的失败文件
///
/// retry_count未达上限的failed文件回到pending并累加retry_count；
/// 已达上限的文件保持failed不变。
pub fn retry_failed_files(job: &BatchJob) -> BatchJob {
    let mut next = job.clone();
    let max_retries = next.options.max_retries;
    for file in next.files.iter_mut() {
        if file.status == FileStatus::Failed && file.retry_count < max_retries {
            file.status = FileStatus::Pending;
            file.retry_count += 1;
            file.progress = 0;
            file.error = None;
            file.output_path = None;
        }
    }
    update_job_progress(&next)
}

/// 取消作业
///
/// 仍处于pending的文件标记为cancelled；已分发的processing文件不受
/// 影响（非协作式取消），由其自身结果收尾。
pub fn cancel_job(job: &BatchJob) -> BatchJob {
    let mut next = job.clone();
    for file in next.files.iter_mut() {
        if file.status == FileStatus::Pending {
            file.status = FileStatus::Cancelled;
        }
    }
    let next = update_job_progress(&next);
    update_job_status(&next, JobStatus::Cancelled)
}

/// 中止作业（abortOnError策略触发）
///
/// 与取消类似：剩余pending文件标记为cancelled，但作业以failed收尾。
pub fn abort_job(job: &BatchJob) -> BatchJob {
    let mut next = job.clone();
    for file in next.files.iter_mut() {
        if file.status == FileStatus::Pending {
            file.status = FileStatus::Cancelled;
        }
    }
    let next = update_job_progress(&next);
    update_job_status(&next, JobStatus::Failed)
}

/// 暂停作业；仅对processing状态生效，否则原样返回
pub fn pause_job(job: &BatchJob) -> BatchJob {
    if job.status == JobStatus::Processing {
        update_job_status(job, JobStatus::Paused)
    } else {
        job.clone()
    }
}

/// 恢复作业；仅对paused状态生效，否则原样返回
pub fn resume_job(job: &BatchJob) -> BatchJob {
    if job.status == JobStatus::Paused {
        update_job_status(job, JobStatus::Processing)
    } else {
        job.clone()
    }
}
