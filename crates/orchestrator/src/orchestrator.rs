//! 任务编排器
//!
//! 在执行池之上补充作业维度的语义：任务与`(作业, 文件)`的关联、
//! 批量提交、作业级事件。编排器自身不持有文件状态，状态流转由
//! 作业队列的纯转换函数负责。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use docbatch_core::errors::Result;
use docbatch_core::events::{EngineEvent, EventBus};
use docbatch_core::models::Task;
use docbatch_pool::PoolHandle;

/// 一次文件级任务的提交描述
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub job_id: Uuid,
    pub file_id: Uuid,
    /// 任务类型标签，对应已注册的处理器
    pub task_type: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub timeout_ms: Option<u64>,
}

/// 文件级任务的最终结果
///
/// 编排器从不向上传播错误：池层的崩溃/超时/关闭都折叠为失败的完成记录。
#[derive(Debug, Clone)]
pub struct TaskCompletion {
    pub job_id: Uuid,
    pub file_id: Uuid,
    pub success: bool,
    pub output: Option<serde_json::Value>,
    /// 处理器输出中的`outputPath`字段（若有）
    pub output_path: Option<String>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// 任务编排器
///
/// 可克隆；活跃任务表以`作业id → 文件id集合`组织，仅作记账，
/// 不参与调度决策。
#[derive(Clone)]
pub struct TaskOrchestrator {
    pool: PoolHandle,
    events: EventBus,
    active: Arc<RwLock<HashMap<Uuid, HashSet<Uuid>>>>,
    /// 池任务id → (作业id, 文件id)，用于把taskProgress事件折回文件维度
    task_index: Arc<RwLock<HashMap<Uuid, (Uuid, Uuid)>>>,
}

impl TaskOrchestrator {
    pub fn new(pool: PoolHandle, events: EventBus) -> Self {
        Self {
            pool,
            events,
            active: Arc::new(RwLock::new(HashMap::new())),
            task_index: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 提交单个文件级任务并等待其落定
    ///
    /// 无论结果如何都会注销活跃记录并发布taskCompleted/taskFailed事件。
    pub async fn submit_task(&self, spec: TaskSpec) -> TaskCompletion {
        let TaskSpec {
            job_id,
            file_id,
            task_type,
            payload,
            priority,
            timeout_ms,
        } = spec;

        {
            let mut active = self.active.write().await;
            active.entry(job_id).or_default().insert(file_id);
        }

        let mut task = Task::new(task_type, payload).with_priority(priority);
        if let Some(ms) = timeout_ms {
            task = task.with_timeout_ms(ms);
        }
        let task_id = task.id;
        debug!(job_id = %job_id, file_id = %file_id, task_id = %task_id, "提交文件任务");
        self.task_index
            .write()
            .await
            .insert(task_id, (job_id, file_id));

        let outcome = self.pool.submit_task(task).await;

        self.task_index.write().await.remove(&task_id);
        {
            let mut active = self.active.write().await;
            if let Some(files) = active.get_mut(&job_id) {
                files.remove(&file_id);
                if files.is_empty() {
                    active.remove(&job_id);
                }
            }
        }

        let completion = match outcome {
            Ok(result) if result.success => {
                let output_path = result
                    .output
                    .as_ref()
                    .and_then(|o| o.get("outputPath"))
                    .and_then(|v| v.as_str())
                    .map(String::from);
                TaskCompletion {
                    job_id,
                    file_id,
                    success: true,
                    output: result.output,
                    output_path,
                    error: None,
                    elapsed_ms: result.execution_time_ms,
                }
            }
            Ok(result) => TaskCompletion {
                job_id,
                file_id,
                success: false,
                output: None,
                output_path: None,
                error: Some(
                    result
                        .error_message
                        .unwrap_or_else(|| "任务失败，原因未知".to_string()),
                ),
                elapsed_ms: result.execution_time_ms,
            },
            Err(e) => TaskCompletion {
                job_id,
                file_id,
                success: false,
                output: None,
                output_path: None,
                error: Some(e.to_string()),
                elapsed_ms: 0,
            },
        };

        if completion.success {
            self.events.publish(EngineEvent::TaskCompleted {
                job_id,
                file_id,
                output_path: completion.output_path.clone(),
                elapsed_ms: completion.elapsed_ms,
            });
        } else {
            self.events.publish(EngineEvent::TaskFailed {
                job_id,
                file_id,
                error: completion.error.clone().unwrap_or_default(),
                elapsed_ms: completion.elapsed_ms,
            });
        }

        completion
    }

    /// 批量提交：并发度由执行池约束，每个任务落定时回调一次
    ///
    /// 从不整体失败，单个任务的失败体现为结果列表中的失败条目。
    /// 结果顺序为落定顺序，不保证与提交顺序一致。
    pub async fn submit_batch<F>(&self, specs: Vec<TaskSpec>, mut on_progress: F) -> Vec<TaskCompletion>
    where
        F: FnMut(&TaskCompletion),
    {
        let mut in_flight: FuturesUnordered<_> =
            specs.into_iter().map(|spec| self.submit_task(spec)).collect();

        let mut completions = Vec::with_capacity(in_flight.len());
        while let Some(completion) = in_flight.next().await {
            on_progress(&completion);
            completions.push(completion);
        }
        completions
    }

    /// 取消作业：仅做记账并发布事件，不中断已分发的任务
    ///
    /// 在途任务照常完成并产生各自的事件，由作业层决定是否采纳其结果。
    pub async fn cancel_job(&self, job_id: Uuid) {
        let removed = self.active.write().await.remove(&job_id);
        info!(
            job_id = %job_id,
            in_flight = removed.map(|files| files.len()).unwrap_or(0),
            "作业已取消，在途任务不受影响"
        );
        self.events.publish(EngineEvent::JobCancelled { job_id });
    }

    pub async fn has_capacity(&self) -> bool {
        self.pool.has_capacity().await
    }

    pub async fn active_task_count(&self) -> usize {
        self.active.read().await.values().map(HashSet::len).sum()
    }

    pub async fn active_job_count(&self) -> usize {
        self.active.read().await.len()
    }

    pub async fn is_job_active(&self, job_id: Uuid) -> bool {
        self.active.read().await.contains_key(&job_id)
    }

    /// 池任务id对应的(作业id, 文件id)，任务落定后返回None
    pub async fn resolve_task(&self, task_id: Uuid) -> Option<(Uuid, Uuid)> {
        self.task_index.read().await.get(&task_id).copied()
    }

    /// 关闭编排器与其下的执行池
    pub async fn shutdown(&self) -> Result<()> {
        self.active.write().await.clear();
        self.task_index.write().await.clear();
        self.pool.shutdown().await
    }
}
