use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use docbatch_core::errors::{BatchError, Result};
use docbatch_core::models::{
    BatchFile, BatchJob, FileStatus, FileStatusCounts, JobPriority, JobStatus, QueueStatistics,
};

const DEFAULT_MAX_JOBS: usize = 1_000;

/// 作业队列
///
/// 纯数据结构组件：独占持有全部BatchJob/BatchFile记录，不含定时器、
/// 不执行任何任务，由外部组件拉取待处理文件并驱动。作业按
/// `(priority_rank, created_at)` 升序排列，创建时间作为同级平局裁决。
#[derive(Debug, Serialize, Deserialize)]
pub struct JobQueue {
    jobs: Vec<BatchJob>,
    max_jobs: usize,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_JOBS)
    }
}

impl JobQueue {
    pub fn new(max_jobs: usize) -> Self {
        Self {
            jobs: Vec::new(),
            max_jobs,
        }
    }

    fn sort(&mut self) {
        self.jobs
            .sort_by_key(|j| (j.priority.rank(), j.created_at));
    }

    /// 插入新作业并重新排序
    pub fn add_job(&mut self, job: BatchJob) -> Result<()> {
        if self.jobs.len() >= self.max_jobs {
            return Err(BatchError::Validation(format!(
                "作业队列已满（上限{}）",
                self.max_jobs
            )));
        }
        debug!(job_id = %job.id, priority = ?job.priority, "作业入队");
        self.jobs.push(job);
        self.sort();
        Ok(())
    }

    pub fn get_job(&self, id: Uuid) -> Option<&BatchJob> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// 用新记录整体替换同id的作业（状态转换函数的提交入口）
    pub fn update_job(&mut self, job: BatchJob) -> Result<()> {
        let slot = self
            .jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or(BatchError::JobNotFound { id: job.id })?;
        *slot = job;
        Ok(())
    }

    pub fn remove_job(&mut self, id: Uuid) -> Option<BatchJob> {
        let idx = self.jobs.iter().position(|j| j.id == id)?;
        Some(self.jobs.remove(idx))
    }

    /// 最高优先级的未到终态作业
    pub fn get_next_job(&self) -> Option<&BatchJob> {
        self.jobs.iter().find(|j| !j.status.is_terminal())
    }

    /// 调整作业优先级并以同一比较器重新排序
    pub fn change_priority(&mut self, id: Uuid, priority: JobPriority) -> Result<()> {
        let job = self
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(BatchError::JobNotFound { id })?;
        job.priority = priority;
        self.sort();
        Ok(())
    }

    pub fn jobs(&self) -> &[BatchJob] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.jobs.len() >= self.max_jobs
    }

    /// 按文件状态统计单个作业
    pub fn get_job_statistics(job: &BatchJob) -> FileStatusCounts {
        let mut counts = FileStatusCounts::default();
        for file in &job.files {
            match file.status {
                FileStatus::Pending => counts.pending += 1,
                FileStatus::Processing => counts.processing += 1,
                FileStatus::Completed => counts.completed += 1,
                FileStatus::Failed => counts.failed += 1,
                FileStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// 所有文件都到达终态时作业才算完成
    pub fn is_job_complete(job: &BatchJob) -> bool {
        job.files.iter().all(|f| f.status.is_terminal())
    }

    pub fn has_job_failures(job: &BatchJob) -> bool {
        job.files.iter().any(|f| f.status == FileStatus::Failed)
    }

    /// 作业内第一个pending文件；作业内的调度单位严格按文件列表顺序
    pub fn get_next_pending_file(job: &BatchJob) -> Option<&BatchFile> {
        job.files.iter().find(|f| f.status == FileStatus::Pending)
    }

    /// 按需计算聚合统计
    pub fn statistics(&self) -> QueueStatistics {
        let mut stats = QueueStatistics {
            total_jobs: self.jobs.len(),
            ..QueueStatistics::default()
        };

        let mut wait_samples = Vec::new();
        let mut processing_samples = Vec::new();

        for job in &self.jobs {
            match job.status {
                JobStatus::Pending => stats.pending_jobs += 1,
                JobStatus::Queued => stats.queued_jobs += 1,
                JobStatus::Processing => stats.processing_jobs += 1,
                JobStatus::Paused => stats.paused_jobs += 1,
                JobStatus::Completed => stats.completed_jobs += 1,
                JobStatus::Failed => stats.failed_jobs += 1,
                JobStatus::Cancelled => stats.cancelled_jobs += 1,
            }
            if let Some(started) = job.started_at {
                wait_samples.push((started - job.created_at).num_milliseconds().max(0) as u64);
                if let Some(completed) = job.completed_at {
                    processing_samples
                        .push((completed - started).num_milliseconds().max(0) as u64);
                }
            }
        }

        stats.avg_wait_ms = average(&wait_samples);
        stats.avg_processing_ms = average(&processing_samples);
        stats
    }

    /// 导出队列全部状态（含排序），用于持久化或进程间转移
    pub fn export_state(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 从导出的状态重建队列，作业记录与顺序完全一致
    pub fn import_state(data: &str) -> Result<JobQueue> {
        Ok(serde_json::from_str(data)?)
    }
}

fn average(samples: &[u64]) -> Option<u64> {
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<u64>() / samples.len() as u64)
    }
}
