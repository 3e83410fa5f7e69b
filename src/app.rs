//! 组合根
//!
//! 引擎显式构造并持有全部组件，不使用全局单例：
//! 配置 + 处理器注册表 → 执行池 → 任务编排器 → 作业队列 → 资源监控。
//! 上层（IPC/UI）只与BatchEngine交互，事件通过subscribe获取。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use docbatch_core::config::AppConfig;
use docbatch_core::errors::{BatchError, Result};
use docbatch_core::events::{EngineEvent, EventBus};
use docbatch_core::handler::HandlerRegistry;
use docbatch_core::models::{
    BatchFile, BatchJob, EngineStatistics, FileStatus, JobOptions, JobPriority, JobStatus,
    QueueStatistics,
};
use docbatch_orchestrator::{ProcMemorySampler, ResourceMonitor, TaskOrchestrator};
use docbatch_pool::{ExecutionPool, PoolHandle};
use docbatch_queue::{transitions, JobQueue};

use crate::runner;

/// 提交作业时的单个输入文件描述
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFileSpec {
    pub name: String,
    pub source_path: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub page_count: Option<u32>,
}

/// 作业提交请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    /// 操作类型，对应已注册的任务处理器
    pub operation: String,
    pub name: String,
    pub files: Vec<JobFileSpec>,
    #[serde(default)]
    pub options: JobOptions,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default)]
    pub template_id: Option<String>,
}

/// 作业运行器共享的引擎内部上下文
#[derive(Clone)]
pub(crate) struct EngineContext {
    pub(crate) queue: Arc<RwLock<JobQueue>>,
    pub(crate) orchestrator: TaskOrchestrator,
}

/// 批处理引擎
///
/// 需在tokio运行时内构造（内部会启动协调器与监控任务）。
pub struct BatchEngine {
    config: AppConfig,
    events: EventBus,
    pool: PoolHandle,
    orchestrator: TaskOrchestrator,
    queue: Arc<RwLock<JobQueue>>,
    monitor: Mutex<Option<ResourceMonitor>>,
    progress_forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl BatchEngine {
    pub fn new(config: AppConfig, handlers: Arc<HandlerRegistry>) -> Result<Self> {
        config.validate()?;
        info!(
            handlers = handlers.len(),
            max_workers = config.pool.max_workers,
            "初始化批处理引擎"
        );

        let events = EventBus::default();
        let pool = ExecutionPool::start(config.pool.clone(), handlers, events.clone())?;
        let orchestrator = TaskOrchestrator::new(pool.clone(), events.clone());
        let queue = Arc::new(RwLock::new(JobQueue::new(config.queue.max_jobs)));

        let monitor = if config.orchestrator.monitor_enabled {
            Some(ResourceMonitor::start(
                config.orchestrator.monitor_interval_ms,
                pool.clone(),
                orchestrator.clone(),
                events.clone(),
                Arc::new(ProcMemorySampler),
            ))
        } else {
            None
        };

        let progress_forwarder = spawn_progress_forwarder(
            events.subscribe(),
            orchestrator.clone(),
            Arc::clone(&queue),
        );

        Ok(Self {
            config,
            events,
            pool,
            orchestrator,
            queue,
            monitor: Mutex::new(monitor),
            progress_forwarder: Mutex::new(Some(progress_forwarder)),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 提交新作业，返回作业id
    ///
    /// 校验失败返回Validation错误；校验通过后作业入队并立即开始调度。
    pub async fn submit_job(&self, request: JobRequest) -> Result<Uuid> {
        if request.files.is_empty() {
            return Err(BatchError::Validation(
                "作业必须至少包含一个文件".to_string(),
            ));
        }
        if request.operation.trim().is_empty() {
            return Err(BatchError::Validation("操作类型不能为空".to_string()));
        }
        if request.options.parallelism < 1 {
            return Err(BatchError::Validation(
                "parallelism必须至少为1".to_string(),
            ));
        }

        let files = request
            .files
            .into_iter()
            .map(|spec| {
                let mut file = BatchFile::new(spec.name, spec.source_path, spec.size_bytes);
                file.page_count = spec.page_count;
                file
            })
            .collect();

        let mut job = BatchJob::new(
            request.operation,
            request.name,
            files,
            request.options,
            request.priority,
        );
        job.template_id = request.template_id;
        let job = transitions::update_job_status(&job, JobStatus::Queued);
        let job_id = job.id;

        self.queue.write().await.add_job(job)?;
        info!(job_id = %job_id, "作业已提交");
        self.spawn_runner(job_id);
        Ok(job_id)
    }

    /// 取消作业：pending文件标记为cancelled，在途任务不被中断
    pub async fn cancel_job(&self, id: Uuid) -> Result<()> {
        {
            let mut queue = self.queue.write().await;
            let job = queue.get_job(id).ok_or(BatchError::JobNotFound { id })?;
            if job.status.is_terminal() {
                return Err(BatchError::Validation(format!(
                    "作业 {} 已处于终态（{}），无法取消",
                    id, job.status
                )));
            }
            let cancelled = transitions::cancel_job(job);
            queue.update_job(cancelled)?;
        }
        self.orchestrator.cancel_job(id).await;
        Ok(())
    }

    /// 重试作业中可重试的失败文件并重新调度
    pub async fn retry_job(&self, id: Uuid) -> Result<()> {
        {
            let mut queue = self.queue.write().await;
            let job = queue.get_job(id).ok_or(BatchError::JobNotFound { id })?;
            if !job.status.is_terminal() {
                return Err(BatchError::Validation(format!(
                    "作业 {} 尚未结束，无法重试",
                    id
                )));
            }
            let retried = transitions::retry_failed_files(job);
            if JobQueue::get_next_pending_file(&retried).is_none() {
                return Err(BatchError::Validation(format!(
                    "作业 {} 没有可重试的失败文件",
                    id
                )));
            }
            let retried = transitions::update_job_status(&retried, JobStatus::Queued);
            queue.update_job(retried)?;
        }
        info!(job_id = %id, "作业重试");
        self.spawn_runner(id);
        Ok(())
    }

    /// 暂停作业；仅processing状态的作业可暂停
    pub async fn pause_job(&self, id: Uuid) -> Result<()> {
        let mut queue = self.queue.write().await;
        let job = queue.get_job(id).ok_or(BatchError::JobNotFound { id })?;
        let paused = transitions::pause_job(job);
        if paused.status != JobStatus::Paused {
            return Err(BatchError::Validation(format!(
                "作业 {} 当前状态为 {}，无法暂停",
                id, job.status
            )));
        }
        info!(job_id = %id, "作业已暂停");
        queue.update_job(paused)
    }

    /// 恢复已暂停的作业
    pub async fn resume_job(&self, id: Uuid) -> Result<()> {
        let mut queue = self.queue.write().await;
        let job = queue.get_job(id).ok_or(BatchError::JobNotFound { id })?;
        let resumed = transitions::resume_job(job);
        if resumed.status != JobStatus::Processing {
            return Err(BatchError::Validation(format!(
                "作业 {} 当前状态为 {}，无法恢复",
                id, job.status
            )));
        }
        info!(job_id = %id, "作业已恢复");
        queue.update_job(resumed)
    }

    pub async fn change_priority(&self, id: Uuid, priority: JobPriority) -> Result<()> {
        self.queue.write().await.change_priority(id, priority)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<BatchJob> {
        self.queue
            .read()
            .await
            .get_job(id)
            .cloned()
            .ok_or(BatchError::JobNotFound { id })
    }

    pub async fn jobs(&self) -> Vec<BatchJob> {
        self.queue.read().await.jobs().to_vec()
    }

    pub async fn remove_job(&self, id: Uuid) -> Result<BatchJob> {
        self.queue
            .write()
            .await
            .remove_job(id)
            .ok_or(BatchError::JobNotFound { id })
    }

    pub async fn queue_statistics(&self) -> QueueStatistics {
        self.queue.read().await.statistics()
    }

    /// 引擎整体统计：池指标 + 活跃作业/任务数
    pub async fn statistics(&self) -> Result<EngineStatistics> {
        let pool = self.pool.stats().await?;
        let active_jobs = {
            let queue = self.queue.read().await;
            queue
                .jobs()
                .iter()
                .filter(|j| !j.status.is_terminal())
                .count()
        };
        Ok(EngineStatistics {
            total_workers: pool.total_workers,
            busy_workers: pool.busy_workers,
            idle_workers: pool.idle_workers,
            queued_tasks: pool.queued_tasks,
            total_tasks_completed: pool.total_tasks_completed,
            active_jobs,
            active_tasks: self.orchestrator.active_task_count().await,
        })
    }

    /// 导出作业队列的完整状态（JSON）
    pub async fn export_queue(&self) -> Result<String> {
        self.queue.read().await.export_state()
    }

    /// 从导出的状态恢复作业队列
    ///
    /// 应在启动后、提交新作业之前调用。导入时上一次运行遗留的
    /// processing文件重置为pending，未到终态的作业重新入列并调度。
    pub async fn import_queue(&self, data: &str) -> Result<()> {
        let imported = JobQueue::import_state(data)?;
        let mut resumable = Vec::new();

        {
            let mut queue = self.queue.write().await;
            *queue = imported;
            let jobs: Vec<BatchJob> = queue.jobs().to_vec();
            for job in jobs {
                if job.status.is_terminal() {
                    continue;
                }
                let mut restored = job.clone();
                for file in restored.files.iter_mut() {
                    if file.status == FileStatus::Processing {
                        file.status = FileStatus::Pending;
                        file.progress = 0;
                    }
                }
                let restored = transitions::update_job_progress(&restored);
                let restored = transitions::update_job_status(&restored, JobStatus::Queued);
                queue.update_job(restored)?;
                resumable.push(job.id);
            }
        }

        info!(jobs = resumable.len(), "队列状态已导入，恢复未完成作业");
        for job_id in resumable {
            self.spawn_runner(job_id);
        }
        Ok(())
    }

    /// 订阅引擎事件流
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// 关闭引擎：停止监控 → 关闭编排器与执行池
    ///
    /// 排队任务被拒绝，在途任务被放弃；作业队列内容保留，可先export。
    pub async fn shutdown(&self) -> Result<()> {
        info!("批处理引擎关闭");
        if let Some(monitor) = self.monitor.lock().await.take() {
            monitor.stop().await;
        }
        if let Some(forwarder) = self.progress_forwarder.lock().await.take() {
            forwarder.abort();
        }
        self.orchestrator.shutdown().await
    }

    fn spawn_runner(&self, job_id: Uuid) {
        let ctx = EngineContext {
            queue: Arc::clone(&self.queue),
            orchestrator: self.orchestrator.clone(),
        };
        tokio::spawn(runner::run_job(ctx, job_id));
    }
}

/// 把taskProgress事件折回文件维度，更新作业记录中的文件进度
fn spawn_progress_forwarder(
    mut rx: broadcast::Receiver<EngineEvent>,
    orchestrator: TaskOrchestrator,
    queue: Arc<RwLock<JobQueue>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(EngineEvent::TaskProgress { task_id, progress }) => {
                    let Some((job_id, file_id)) = orchestrator.resolve_task(task_id).await else {
                        continue;
                    };
                    let mut queue = queue.write().await;
                    let Some(job) = queue.get_job(job_id) else { continue };
                    match transitions::update_file_progress(job, file_id, progress) {
                        Ok(updated) => {
                            let _ = queue.update_job(updated);
                        }
                        Err(e) => warn!(job_id = %job_id, "更新文件进度失败: {}", e),
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // 进度事件允许丢失，跳过积压继续
                    warn!(skipped, "进度转发滞后，部分事件被跳过");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
