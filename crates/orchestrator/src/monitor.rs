//! 资源监控
//!
//! 固定间隔采样执行池统计与进程常驻内存，作为resourceUpdate事件发布。
//! 纯观测用途，采样结果不反馈到任何调度决策。

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use docbatch_core::events::{EngineEvent, EventBus};
use docbatch_core::models::ResourceSnapshot;
use docbatch_pool::PoolHandle;

use crate::orchestrator::TaskOrchestrator;

/// 进程内存采样接口
#[cfg_attr(test, mockall::automock)]
pub trait MemorySampler: Send + Sync {
    /// 进程常驻内存（MB），不可用时返回None
    fn rss_mb(&self) -> Option<u64>;
}

/// 基于/proc/self/status的采样实现
pub struct ProcMemorySampler;

impl MemorySampler for ProcMemorySampler {
    fn rss_mb(&self) -> Option<u64> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_vm_rss_kb(&status).map(|kb| kb / 1024)
    }
}

fn parse_vm_rss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse().ok())
}

/// 资源监控器句柄，stop后采样循环退出
pub struct ResourceMonitor {
    shutdown_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl ResourceMonitor {
    pub fn start(
        interval_ms: u64,
        pool: PoolHandle,
        orchestrator: TaskOrchestrator,
        events: EventBus,
        sampler: Arc<dyn MemorySampler>,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let join = tokio::spawn(async move {
            let mut tick = interval(Duration::from_millis(interval_ms));
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_ms, "资源监控已启动");

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = tick.tick() => {
                        let pool_stats = match pool.stats().await {
                            Ok(stats) => stats,
                            Err(_) => {
                                // 执行池已关闭，监控随之停止
                                debug!("执行池不可达，资源监控退出");
                                break;
                            }
                        };
                        let snapshot = ResourceSnapshot {
                            pool: pool_stats,
                            memory_mb: sampler.rss_mb().unwrap_or(0),
                            active_tasks: orchestrator.active_task_count().await,
                            timestamp: Utc::now(),
                        };
                        events.publish(EngineEvent::ResourceUpdate { snapshot });
                    }
                }
            }
            info!("资源监控已停止");
        });

        Self { shutdown_tx, join }
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.join.await;
    }
}
