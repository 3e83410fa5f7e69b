//! 作业运行器
//!
//! 每个作业一个调度循环：严格按文件列表顺序拉取pending文件，
//! 并发度受options.parallelism约束；暂停时停止拉取，取消或中止时
//! 停止调度并等待在途任务落定。作业与文件状态只通过队列的纯转换
//! 函数变更，运行器自身不持有状态。

use std::time::Duration;

use serde_json::json;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use docbatch_core::models::{ErrorStrategy, FileStatus, JobStatus};
use docbatch_orchestrator::{TaskCompletion, TaskSpec};
use docbatch_queue::{transitions, JobQueue};

use crate::app::EngineContext;

/// 暂停与等待时的轮询间隔
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub(crate) async fn run_job(ctx: EngineContext, job_id: Uuid) {
    {
        let mut queue = ctx.queue.write().await;
        let Some(job) = queue.get_job(job_id) else { return };
        if job.status.is_terminal() {
            return;
        }
        let processing = transitions::update_job_status(job, JobStatus::Processing);
        if queue.update_job(processing).is_err() {
            return;
        }
    }
    info!(job_id = %job_id, "作业开始处理");

    let mut in_flight: JoinSet<TaskCompletion> = JoinSet::new();
    let mut aborted = false;

    loop {
        // 先收割已落定的任务
        while let Some(joined) = in_flight.try_join_next() {
            if let Ok(completion) = joined {
                apply_completion(&ctx, &completion, &mut aborted).await;
            }
        }
        if aborted {
            break;
        }

        let snapshot = { ctx.queue.read().await.get_job(job_id).cloned() };
        let Some(job) = snapshot else {
            // 作业已被移除，放弃调度
            return;
        };
        match job.status {
            JobStatus::Cancelled | JobStatus::Completed | JobStatus::Failed => break,
            JobStatus::Paused => {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
            _ => {}
        }

        let Some(file) = JobQueue::get_next_pending_file(&job).cloned() else {
            if in_flight.is_empty() {
                break;
            }
            if let Some(Ok(completion)) = in_flight.join_next().await {
                apply_completion(&ctx, &completion, &mut aborted).await;
            }
            continue;
        };

        if in_flight.len() >= job.options.parallelism.max(1) {
            if let Some(Ok(completion)) = in_flight.join_next().await {
                apply_completion(&ctx, &completion, &mut aborted).await;
            }
            continue;
        }

        // 暂停/取消可能与快照竞争，提交前在锁内复核
        if !mark_file_processing(&ctx, job_id, file.id).await {
            continue;
        }

        let spec = TaskSpec {
            job_id,
            file_id: file.id,
            task_type: job.operation.clone(),
            payload: json!({
                "fileId": file.id,
                "name": file.name,
                "sourcePath": file.source_path,
                "sizeBytes": file.size_bytes,
                "pageCount": file.page_count,
                "templateId": job.template_id,
            }),
            priority: job.priority.task_priority(),
            timeout_ms: None,
        };
        let orchestrator = ctx.orchestrator.clone();
        in_flight.spawn(async move { orchestrator.submit_task(spec).await });
    }

    // 非协作式收尾：在途任务照常完成并记录结果
    while let Some(joined) = in_flight.join_next().await {
        if let Ok(completion) = joined {
            apply_completion(&ctx, &completion, &mut aborted).await;
        }
    }

    finalize(&ctx, job_id, aborted).await;
}

/// 把pending文件标记为processing；作业或文件状态已变化时放弃提交
async fn mark_file_processing(ctx: &EngineContext, job_id: Uuid, file_id: Uuid) -> bool {
    let mut queue = ctx.queue.write().await;
    let Some(job) = queue.get_job(job_id) else {
        return false;
    };
    let still_pending = job.status == JobStatus::Processing
        && job
            .file(file_id)
            .map(|f| f.status == FileStatus::Pending)
            .unwrap_or(false);
    if !still_pending {
        return false;
    }
    match transitions::update_file_status(job, file_id, FileStatus::Processing, None, None) {
        Ok(updated) => {
            let updated = transitions::update_job_progress(&updated);
            queue.update_job(updated).is_ok()
        }
        Err(e) => {
            warn!(job_id = %job_id, file_id = %file_id, "标记文件处理中失败: {}", e);
            false
        }
    }
}

/// 把任务结果写回作业记录，并判定是否触发中止策略
async fn apply_completion(ctx: &EngineContext, completion: &TaskCompletion, aborted: &mut bool) {
    let mut queue = ctx.queue.write().await;
    let Some(job) = queue.get_job(completion.job_id) else {
        return;
    };

    let status = if completion.success {
        FileStatus::Completed
    } else {
        FileStatus::Failed
    };
    let updated = match transitions::update_file_status(
        job,
        completion.file_id,
        status,
        completion.error.clone(),
        completion.output_path.clone(),
    ) {
        Ok(updated) => updated,
        Err(e) => {
            warn!(job_id = %completion.job_id, "记录文件结果失败: {}", e);
            return;
        }
    };
    let updated = transitions::update_job_progress(&updated);

    if !completion.success && updated.options.error_strategy == ErrorStrategy::AbortOnError {
        *aborted = true;
    }
    if let Err(e) = queue.update_job(updated) {
        warn!(job_id = %completion.job_id, "写回作业记录失败: {}", e);
    }
}

/// 作业收尾
///
/// 中止策略触发时剩余pending文件取消、作业失败；否则所有文件到达
/// 终态即标记completed——continueOnError下个别文件失败不改变作业的
/// 完成状态，失败文件保留retry余量。
async fn finalize(ctx: &EngineContext, job_id: Uuid, aborted: bool) {
    let mut queue = ctx.queue.write().await;
    let Some(job) = queue.get_job(job_id) else {
        return;
    };
    if job.status.is_terminal() {
        info!(job_id = %job_id, status = %job.status, "作业收尾");
        return;
    }

    let finished = if aborted {
        transitions::abort_job(job)
    } else if JobQueue::is_job_complete(job) {
        transitions::update_job_status(job, JobStatus::Completed)
    } else {
        // 仍有未落定文件（外部状态干预），保持现状
        job.clone()
    };
    let status = finished.status;
    if queue.update_job(finished).is_ok() {
        info!(job_id = %job_id, status = %status, "作业结束");
    }
}
