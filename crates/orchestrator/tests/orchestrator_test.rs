//! 编排器集成测试：作业事件、批量提交、非协作式取消

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use docbatch_core::config::PoolConfig;
use docbatch_core::events::{EngineEvent, EventBus};
use docbatch_core::handler::{HandlerRegistry, TaskHandler};
use docbatch_orchestrator::{TaskOrchestrator, TaskSpec};
use docbatch_pool::ExecutionPool;

/// 按payload生成输出路径，可选休眠与失败
struct ConvertHandler;

impl TaskHandler for ConvertHandler {
    fn task_type(&self) -> &str {
        "convert"
    }

    fn run(
        &self,
        payload: &serde_json::Value,
        progress: &mut dyn FnMut(u8),
    ) -> std::result::Result<serde_json::Value, String> {
        if let Some(millis) = payload["sleepMillis"].as_u64() {
            thread::sleep(Duration::from_millis(millis));
        }
        if payload["fail"].as_bool().unwrap_or(false) {
            return Err("转换失败：文件已损坏".to_string());
        }
        progress(100);
        let name = payload["name"].as_str().unwrap_or("file");
        Ok(json!({ "outputPath": format!("/out/{name}.pdf") }))
    }
}

fn setup(max_workers: usize) -> (TaskOrchestrator, EventBus) {
    let events = EventBus::default();
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(ConvertHandler));

    let pool = ExecutionPool::start(
        PoolConfig {
            min_workers: 1,
            max_workers,
            ..PoolConfig::default()
        },
        Arc::new(registry),
        events.clone(),
    )
    .unwrap();

    (TaskOrchestrator::new(pool, events.clone()), events)
}

fn spec(job_id: Uuid, payload: serde_json::Value) -> TaskSpec {
    TaskSpec {
        job_id,
        file_id: Uuid::new_v4(),
        task_type: "convert".to_string(),
        payload,
        priority: 0,
        timeout_ms: None,
    }
}

#[tokio::test]
async fn test_submit_task_success_emits_completed() {
    let (orchestrator, events) = setup(2);
    let mut rx = events.subscribe();
    let job_id = Uuid::new_v4();

    let completion = orchestrator
        .submit_task(spec(job_id, json!({ "name": "report" })))
        .await;
    assert!(completion.success);
    assert_eq!(completion.output_path.as_deref(), Some("/out/report.pdf"));
    assert_eq!(orchestrator.active_task_count().await, 0);

    loop {
        match rx.recv().await.unwrap() {
            EngineEvent::TaskCompleted {
                job_id: event_job,
                output_path,
                ..
            } => {
                assert_eq!(event_job, job_id);
                assert_eq!(output_path.as_deref(), Some("/out/report.pdf"));
                break;
            }
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_submit_task_failure_emits_failed() {
    let (orchestrator, events) = setup(2);
    let mut rx = events.subscribe();
    let job_id = Uuid::new_v4();

    let completion = orchestrator
        .submit_task(spec(job_id, json!({ "fail": true })))
        .await;
    assert!(!completion.success);
    assert!(completion.error.as_deref().unwrap().contains("文件已损坏"));

    loop {
        match rx.recv().await.unwrap() {
            EngineEvent::TaskFailed { error, .. } => {
                assert!(error.contains("文件已损坏"));
                break;
            }
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_submit_batch_reports_progress_and_never_errors() {
    let (orchestrator, _events) = setup(2);
    let job_id = Uuid::new_v4();

    let specs = vec![
        spec(job_id, json!({ "name": "a" })),
        spec(job_id, json!({ "fail": true })),
        spec(job_id, json!({ "name": "c" })),
    ];

    let progressed = AtomicUsize::new(0);
    let completions = orchestrator
        .submit_batch(specs, |_completion| {
            progressed.fetch_add(1, Ordering::SeqCst);
        })
        .await;

    assert_eq!(completions.len(), 3);
    assert_eq!(progressed.load(Ordering::SeqCst), 3);
    assert_eq!(completions.iter().filter(|c| c.success).count(), 2);
    assert_eq!(completions.iter().filter(|c| !c.success).count(), 1);
}

#[tokio::test]
async fn test_active_count_tracks_in_flight_tasks() {
    let (orchestrator, _events) = setup(1);
    let job_id = Uuid::new_v4();

    let running = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .submit_task(spec(job_id, json!({ "name": "slow", "sleepMillis": 200 })))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(orchestrator.active_task_count().await, 1);
    assert!(orchestrator.is_job_active(job_id).await);

    assert!(running.await.unwrap().success);
    assert_eq!(orchestrator.active_task_count().await, 0);
    assert!(!orchestrator.is_job_active(job_id).await);
}

#[tokio::test]
async fn test_cancel_is_non_cooperative() {
    let (orchestrator, events) = setup(1);
    let mut rx = events.subscribe();
    let job_id = Uuid::new_v4();

    let running = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .submit_task(spec(job_id, json!({ "name": "slow", "sleepMillis": 200 })))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    orchestrator.cancel_job(job_id).await;
    assert!(!orchestrator.is_job_active(job_id).await);

    // 在途任务不被中断，照常成功完成
    let completion = running.await.unwrap();
    assert!(completion.success);

    let mut saw_cancelled = false;
    let mut saw_completed = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            EngineEvent::JobCancelled { job_id: id } => saw_cancelled = id == job_id,
            EngineEvent::TaskCompleted { .. } => saw_completed = true,
            _ => {}
        }
    }
    assert!(saw_cancelled);
    assert!(saw_completed);
}

#[tokio::test]
async fn test_shutdown_folds_pool_errors_into_failures() {
    let (orchestrator, _events) = setup(1);
    orchestrator.shutdown().await.unwrap();

    let completion = orchestrator
        .submit_task(spec(Uuid::new_v4(), json!({ "name": "late" })))
        .await;
    assert!(!completion.success);
    assert!(completion.error.is_some());
}
