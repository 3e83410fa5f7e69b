use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::ResourceSnapshot;

/// 引擎对外发布的事件
///
/// 序列化后的事件名与载荷字段采用camelCase，与UI/IPC层的订阅契约一致。
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
#[serde(rename_all_fields = "camelCase")]
pub enum EngineEvent {
    /// 执行单元创建
    WorkerSpawned { worker_id: Uuid },
    /// 执行单元异常（崩溃信息）
    WorkerError { worker_id: Uuid, message: String },
    /// 执行单元异常退出
    WorkerExited { worker_id: Uuid },
    /// 执行单元被主动终止（空闲回收或池关闭）
    WorkerTerminated { worker_id: Uuid },
    /// 任务已分发到执行单元
    TaskStarted { task_id: Uuid, worker_id: Uuid },
    /// 任务处理进度（0-100）
    TaskProgress { task_id: Uuid, progress: u8 },
    /// 作业内某文件的任务成功完成
    TaskCompleted {
        job_id: Uuid,
        file_id: Uuid,
        output_path: Option<String>,
        elapsed_ms: u64,
    },
    /// 作业内某文件的任务失败
    TaskFailed {
        job_id: Uuid,
        file_id: Uuid,
        error: String,
        elapsed_ms: u64,
    },
    /// 作业被取消（尽力而为，不中断已分发的任务）
    JobCancelled { job_id: Uuid },
    /// 周期性资源采样
    ResourceUpdate { snapshot: ResourceSnapshot },
}

/// 事件总线
///
/// broadcast通道的轻量封装：任意组件发布，UI/IPC层订阅。
/// 没有订阅者时发布即丢弃，不视为错误。
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: EngineEvent) {
        // 无订阅者时send返回Err，按约定忽略
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_names() {
        let event = EngineEvent::WorkerSpawned {
            worker_id: Uuid::nil(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "workerSpawned");
        assert!(json["data"]["workerId"].is_string());

        let event = EngineEvent::TaskFailed {
            job_id: Uuid::nil(),
            file_id: Uuid::nil(),
            error: "boom".to_string(),
            elapsed_ms: 12,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "taskFailed");
        assert_eq!(json["data"]["elapsedMs"], 12);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new(8);
        bus.publish(EngineEvent::JobCancelled {
            job_id: Uuid::new_v4(),
        });

        let mut rx = bus.subscribe();
        bus.publish(EngineEvent::JobCancelled {
            job_id: Uuid::new_v4(),
        });
        assert!(matches!(
            rx.recv().await.unwrap(),
            EngineEvent::JobCancelled { .. }
        ));
    }
}
