//! 执行池集成测试：并发上限、优先级分发、崩溃恢复、超时与关闭语义

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::json;

use docbatch_core::config::PoolConfig;
use docbatch_core::errors::BatchError;
use docbatch_core::events::{EngineEvent, EventBus};
use docbatch_core::handler::{HandlerRegistry, TaskHandler};
use docbatch_core::models::Task;
use docbatch_pool::{ExecutionPool, PoolHandle};

/// 休眠指定毫秒数，同时统计瞬时并发峰值
struct SleepHandler {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl TaskHandler for SleepHandler {
    fn task_type(&self) -> &str {
        "sleep"
    }

    fn run(
        &self,
        payload: &serde_json::Value,
        progress: &mut dyn FnMut(u8),
    ) -> std::result::Result<serde_json::Value, String> {
        let millis = payload["millis"].as_u64().unwrap_or(50);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        progress(10);
        thread::sleep(Duration::from_millis(millis));
        progress(100);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({ "slept": millis }))
    }
}

/// 按payload中的tag记录实际执行顺序
struct RecordingHandler {
    order: Arc<Mutex<Vec<String>>>,
}

impl TaskHandler for RecordingHandler {
    fn task_type(&self) -> &str {
        "record"
    }

    fn run(
        &self,
        payload: &serde_json::Value,
        _progress: &mut dyn FnMut(u8),
    ) -> std::result::Result<serde_json::Value, String> {
        let tag = payload["tag"].as_str().unwrap_or("").to_string();
        self.order.lock().unwrap().push(tag);
        Ok(json!({}))
    }
}

struct PanicHandler;

impl TaskHandler for PanicHandler {
    fn task_type(&self) -> &str {
        "panic"
    }

    fn run(
        &self,
        _payload: &serde_json::Value,
        _progress: &mut dyn FnMut(u8),
    ) -> std::result::Result<serde_json::Value, String> {
        panic!("模拟处理器崩溃");
    }
}

struct TestFixture {
    peak: Arc<AtomicUsize>,
    order: Arc<Mutex<Vec<String>>>,
}

fn start_pool(min: usize, max: usize) -> (PoolHandle, TestFixture) {
    start_pool_with(PoolConfig {
        min_workers: min,
        max_workers: max,
        ..PoolConfig::default()
    })
}

fn start_pool_with(config: PoolConfig) -> (PoolHandle, TestFixture) {
    let peak = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(SleepHandler {
        active: Arc::new(AtomicUsize::new(0)),
        peak: Arc::clone(&peak),
    }));
    registry.register(Arc::new(RecordingHandler {
        order: Arc::clone(&order),
    }));
    registry.register(Arc::new(PanicHandler));

    let handle = ExecutionPool::start(config, Arc::new(registry), EventBus::default()).unwrap();
    (handle, TestFixture { peak, order })
}

fn sleep_task(millis: u64) -> Task {
    Task::new("sleep", json!({ "millis": millis }))
}

#[tokio::test]
async fn test_submit_and_complete() {
    let (pool, _fx) = start_pool(1, 2);

    let result = pool.submit_task(sleep_task(10)).await.unwrap();
    assert!(result.success);
    assert_eq!(result.output.unwrap()["slept"], 10);

    let stats = pool.stats().await.unwrap();
    assert_eq!(stats.total_tasks_completed, 1);
    assert_eq!(stats.busy_workers, 0);
}

#[tokio::test]
async fn test_unknown_task_type_fails_without_crash() {
    let (pool, _fx) = start_pool(1, 1);

    let result = pool
        .submit_task(Task::new("nope", json!({})))
        .await
        .unwrap();
    assert!(!result.success);
    assert!(result.error_message.unwrap().contains("不支持的任务类型"));

    // 单元仍然可用
    let result = pool.submit_task(sleep_task(5)).await.unwrap();
    assert!(result.success);
}

#[tokio::test]
async fn test_concurrency_never_exceeds_max_workers() {
    let (pool, fx) = start_pool(1, 2);

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move { pool.submit_task(sleep_task(100)).await })
        })
        .collect();
    for t in tasks {
        assert!(t.await.unwrap().unwrap().success);
    }

    assert!(fx.peak.load(Ordering::SeqCst) <= 2);
    let stats = pool.stats().await.unwrap();
    assert_eq!(stats.total_tasks_completed, 4);
    assert!(stats.total_workers <= 2);
}

#[tokio::test]
async fn test_priority_order_with_single_unit() {
    let (pool, fx) = start_pool(1, 1);

    // 占住唯一的单元，让后续任务在队列中排序
    let blocker = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.submit_task(sleep_task(200)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut waits = Vec::new();
    for (priority, tag) in [(1, "low"), (5, "high"), (3, "mid")] {
        let task = Task::new("record", json!({ "tag": tag })).with_priority(priority);
        let pool = pool.clone();
        waits.push(tokio::spawn(async move { pool.submit_task(task).await }));
    }
    for w in waits {
        assert!(w.await.unwrap().unwrap().success);
    }
    blocker.await.unwrap().unwrap();

    let order = fx.order.lock().unwrap().clone();
    assert_eq!(order, vec!["high", "mid", "low"]);
}

#[tokio::test]
async fn test_crash_recovery_respawns_unit() {
    let (pool, _fx) = start_pool(1, 1);
    let mut events = pool.subscribe();

    let err = pool
        .submit_task(Task::new("panic", json!({})))
        .await
        .unwrap_err();
    match err {
        BatchError::UnitCrash { message } => assert!(message.contains("模拟处理器崩溃")),
        other => panic!("预期UnitCrash，实际为 {other:?}"),
    }

    // 池自愈后仍可处理任务
    let result = pool.submit_task(sleep_task(5)).await.unwrap();
    assert!(result.success);

    let mut saw_error = false;
    let mut saw_respawn = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::WorkerError { .. } => saw_error = true,
            EngineEvent::WorkerSpawned { .. } => saw_respawn += 1,
            _ => {}
        }
    }
    assert!(saw_error);
    assert!(saw_respawn >= 1);
}

#[tokio::test]
async fn test_in_flight_timeout_rejects_caller_only() {
    let (pool, _fx) = start_pool(1, 1);

    let err = pool
        .submit_task(sleep_task(500).with_timeout_ms(100))
        .await
        .unwrap_err();
    assert!(matches!(err, BatchError::TaskTimeout { timeout_ms: 100, .. }));

    // 单元未被终止：迟到结果被丢弃后继续服务新任务
    let result = pool.submit_task(sleep_task(10)).await.unwrap();
    assert!(result.success);

    let stats = pool.stats().await.unwrap();
    assert_eq!(stats.total_workers, 1);
}

#[tokio::test]
async fn test_queued_task_timeout_is_removed() {
    let (pool, _fx) = start_pool(1, 1);

    let blocker = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.submit_task(sleep_task(400)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // 排队中超时：从队列撤销，不会被分发
    let err = pool
        .submit_task(sleep_task(10).with_timeout_ms(100))
        .await
        .unwrap_err();
    assert!(matches!(err, BatchError::TaskTimeout { .. }));

    blocker.await.unwrap().unwrap();
    let stats = pool.stats().await.unwrap();
    assert_eq!(stats.queued_tasks, 0);
    assert_eq!(stats.total_tasks_completed, 1);
}

#[tokio::test]
async fn test_shutdown_rejects_queued_and_future_submits() {
    let (pool, _fx) = start_pool(1, 1);

    let blocker = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.submit_task(sleep_task(500)).await })
    };
    let queued = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.submit_task(sleep_task(10)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    pool.shutdown().await.unwrap();

    assert!(matches!(
        blocker.await.unwrap(),
        Err(BatchError::PoolShutdown)
    ));
    assert!(matches!(
        queued.await.unwrap(),
        Err(BatchError::PoolShutdown)
    ));
    assert!(matches!(
        pool.submit_task(sleep_task(1)).await,
        Err(BatchError::PoolShutdown)
    ));
}

#[tokio::test]
async fn test_idle_units_are_reaped_to_minimum() {
    let (pool, _fx) = start_pool_with(PoolConfig {
        min_workers: 1,
        max_workers: 3,
        idle_timeout_ms: 100,
        reap_interval_ms: 50,
        ..PoolConfig::default()
    });

    let tasks: Vec<_> = (0..3)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move { pool.submit_task(sleep_task(100)).await })
        })
        .collect();
    for t in tasks {
        assert!(t.await.unwrap().unwrap().success);
    }

    let stats = pool.stats().await.unwrap();
    assert!(stats.total_workers >= 2);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let stats = pool.stats().await.unwrap();
    assert_eq!(stats.total_workers, 1);
}

#[tokio::test]
async fn test_progress_events_are_published() {
    let (pool, _fx) = start_pool(1, 1);
    let mut events = pool.subscribe();

    pool.submit_task(sleep_task(20)).await.unwrap();

    let mut progress_values = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::TaskProgress { progress, .. } = event {
            progress_values.push(progress);
        }
    }
    assert_eq!(progress_values, vec![10, 100]);
}
