//! 执行池
//!
//! 有界的并行执行单元集合。全部池状态（单元表、任务队列、等待者表）
//! 由单个协调器任务独占持有，外部通过命令通道访问，天然串行化，
//! 无需加锁。真正的并行只发生在执行单元线程内部。

use std::collections::HashMap;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use docbatch_core::config::PoolConfig;
use docbatch_core::errors::{BatchError, Result};
use docbatch_core::events::{EngineEvent, EventBus};
use docbatch_core::handler::HandlerRegistry;
use docbatch_core::models::{PoolStats, Task, TaskResult};

use crate::task_queue::PriorityTaskQueue;
use crate::unit::{self, UnitInbound, UnitOutbound};

/// 协调器命令
enum PoolCommand {
    Submit {
        task: Task,
        reply: oneshot::Sender<Result<TaskResult>>,
    },
    Stats {
        reply: oneshot::Sender<PoolStats>,
    },
    /// 任务超时定时器到期
    Deadline { task_id: Uuid },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// 执行池句柄
///
/// 可克隆；池关闭后所有操作返回PoolShutdown。
#[derive(Clone)]
pub struct PoolHandle {
    cmd_tx: mpsc::UnboundedSender<PoolCommand>,
    events: EventBus,
}

impl PoolHandle {
    /// 提交任务并等待其结果
    ///
    /// 调用方挂起直至三者之一先发生：单元上报结果、任务超时被拒绝、
    /// 池关闭。任务处理器层面的失败体现在TaskResult的success标志，
    /// 崩溃/超时/关闭则为Err。
    pub async fn submit_task(&self, task: Task) -> Result<TaskResult> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(PoolCommand::Submit { task, reply })
            .map_err(|_| BatchError::PoolShutdown)?;
        rx.await.map_err(|_| BatchError::PoolShutdown)?
    }

    pub async fn stats(&self) -> Result<PoolStats> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(PoolCommand::Stats { reply })
            .map_err(|_| BatchError::PoolShutdown)?;
        rx.await.map_err(|_| BatchError::PoolShutdown)
    }

    /// 是否还能接收新任务：存在空闲单元或尚未达到单元数上限
    pub async fn has_capacity(&self) -> bool {
        match self.stats().await {
            Ok(stats) => stats.has_capacity(),
            Err(_) => false,
        }
    }

    /// 关闭执行池
    ///
    /// 排队任务以PoolShutdown拒绝，所有单元被终止，在途任务被放弃。
    /// 此后的提交一律返回PoolShutdown。
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(PoolCommand::Shutdown { reply })
            .map_err(|_| BatchError::PoolShutdown)?;
        rx.await.map_err(|_| BatchError::PoolShutdown)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

/// 执行池入口
pub struct ExecutionPool;

impl ExecutionPool {
    /// 启动执行池：同步创建min_workers个单元（失败即报错），
    /// 然后启动协调器任务并返回句柄
    pub fn start(
        config: PoolConfig,
        handlers: Arc<HandlerRegistry>,
        events: EventBus,
    ) -> Result<PoolHandle> {
        config.validate()?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (unit_tx, unit_rx) = mpsc::unbounded_channel();

        let mut coordinator = Coordinator {
            config: config.clone(),
            handlers,
            events: events.clone(),
            units: HashMap::new(),
            queue: PriorityTaskQueue::new(),
            waiters: HashMap::new(),
            in_flight: HashMap::new(),
            completed_count: 0,
            unit_tx,
            cmd_tx: cmd_tx.clone(),
        };

        // 初始化失败必须立刻暴露，而不是留到首次提交
        for _ in 0..config.min_workers {
            coordinator.spawn_unit()?;
        }
        info!(
            min_workers = config.min_workers,
            max_workers = config.max_workers,
            "执行池已初始化"
        );

        tokio::spawn(coordinator.run(cmd_rx, unit_rx));

        Ok(PoolHandle { cmd_tx, events })
    }
}

/// 单个执行单元的协调器侧记录
struct UnitState {
    tx: std_mpsc::Sender<UnitInbound>,
    busy: bool,
    created_at: Instant,
    completed_tasks: u64,
    last_activity: Instant,
}

/// 等待结果的提交方
struct Waiter {
    reply: oneshot::Sender<Result<TaskResult>>,
    timeout_ms: u64,
}

struct Coordinator {
    config: PoolConfig,
    handlers: Arc<HandlerRegistry>,
    events: EventBus,
    units: HashMap<Uuid, UnitState>,
    queue: PriorityTaskQueue,
    waiters: HashMap<Uuid, Waiter>,
    /// 已分发任务 → 所在单元
    in_flight: HashMap<Uuid, Uuid>,
    completed_count: u64,
    unit_tx: mpsc::UnboundedSender<UnitOutbound>,
    cmd_tx: mpsc::UnboundedSender<PoolCommand>,
}

impl Coordinator {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<PoolCommand>,
        mut unit_rx: mpsc::UnboundedReceiver<UnitOutbound>,
    ) {
        let mut reap = interval(Duration::from_millis(self.config.reap_interval_ms));
        reap.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(PoolCommand::Submit { task, reply }) => self.handle_submit(task, reply),
                    Some(PoolCommand::Stats { reply }) => {
                        let _ = reply.send(self.stats());
                    }
                    Some(PoolCommand::Deadline { task_id }) => self.handle_deadline(task_id),
                    Some(PoolCommand::Shutdown { reply }) => {
                        self.handle_shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.handle_shutdown();
                        break;
                    }
                },
                Some(event) = unit_rx.recv() => self.handle_unit_event(event),
                _ = reap.tick() => self.reap_idle_units(),
            }
        }

        info!("执行池协调器已停止");
    }

    fn handle_submit(&mut self, task: Task, reply: oneshot::Sender<Result<TaskResult>>) {
        let task_id = task.id;
        let timeout_ms = task.timeout_ms.unwrap_or(self.config.default_task_timeout_ms);

        // 超时定时器总会触发；任务先行完成时到期命令被忽略
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            let _ = cmd_tx.send(PoolCommand::Deadline { task_id });
        });

        self.waiters.insert(task_id, Waiter { reply, timeout_ms });
        debug!(task_id = %task_id, priority = task.priority, timeout_ms, "任务入队");
        self.queue.push(task);
        self.try_dispatch();
    }

    /// 分发算法：空闲单元优先，其次在上限内扩容，否则任务保持排队。
    /// 每次任务完成、单元崩溃或空闲回收后都会重新尝试。
    fn try_dispatch(&mut self) {
        loop {
            if self.queue.is_empty() {
                break;
            }
            match self.reserve_unit() {
                Ok(unit_id) => {
                    let Some(task) = self.queue.pop() else { break };
                    self.dispatch_to(unit_id, task);
                }
                Err(BatchError::CapacityExhausted) => {
                    // 非致命：任务留在队列中等待单元空闲
                    debug!(queued = self.queue.len(), "执行池容量已满，任务继续排队");
                    break;
                }
                Err(e) => {
                    warn!("创建执行单元失败: {}", e);
                    break;
                }
            }
        }
    }

    fn reserve_unit(&mut self) -> Result<Uuid> {
        if let Some(id) = self
            .units
            .iter()
            .find(|(_, unit)| !unit.busy)
            .map(|(id, _)| *id)
        {
            return Ok(id);
        }
        if self.units.len() < self.config.max_workers {
            return self.spawn_unit();
        }
        Err(BatchError::CapacityExhausted)
    }

    fn spawn_unit(&mut self) -> Result<Uuid> {
        let unit_id = Uuid::new_v4();
        // 线程句柄不保留：单元线程在入站通道关闭后自行退出
        let (tx, _join) = unit::spawn(unit_id, Arc::clone(&self.handlers), self.unit_tx.clone())
            .map_err(|e| BatchError::Internal(format!("无法创建执行单元: {e}")))?;

        let now = Instant::now();
        self.units.insert(
            unit_id,
            UnitState {
                tx,
                busy: false,
                created_at: now,
                completed_tasks: 0,
                last_activity: now,
            },
        );
        info!(unit_id = %unit_id, total = self.units.len(), "执行单元已创建");
        self.events
            .publish(EngineEvent::WorkerSpawned { worker_id: unit_id });
        Ok(unit_id)
    }

    fn dispatch_to(&mut self, unit_id: Uuid, task: Task) {
        let task_id = task.id;
        let send_result = match self.units.get_mut(&unit_id) {
            Some(unit) => {
                let result = unit.tx.send(UnitInbound::Run(task));
                if result.is_ok() {
                    unit.busy = true;
                    unit.last_activity = Instant::now();
                }
                result
            }
            None => return,
        };

        match send_result {
            Ok(()) => {
                self.in_flight.insert(task_id, unit_id);
                debug!(task_id = %task_id, unit_id = %unit_id, "任务已分发");
                self.events.publish(EngineEvent::TaskStarted {
                    task_id,
                    worker_id: unit_id,
                });
            }
            Err(_) => {
                // 单元线程已不存在：按崩溃处理
                self.handle_crashed(unit_id, task_id, "执行单元在分发前已退出".to_string());
            }
        }
    }

    fn handle_unit_event(&mut self, event: UnitOutbound) {
        match event {
            UnitOutbound::Progress { task_id, progress } => {
                self.events
                    .publish(EngineEvent::TaskProgress { task_id, progress });
            }
            UnitOutbound::Finished {
                unit_id,
                task_id,
                outcome,
                elapsed_ms,
            } => self.handle_finished(unit_id, task_id, outcome, elapsed_ms),
            UnitOutbound::Crashed {
                unit_id,
                task_id,
                message,
            } => self.handle_crashed(unit_id, task_id, message),
        }
    }

    fn handle_finished(
        &mut self,
        unit_id: Uuid,
        task_id: Uuid,
        outcome: std::result::Result<serde_json::Value, String>,
        elapsed_ms: u64,
    ) {
        if let Some(unit) = self.units.get_mut(&unit_id) {
            unit.busy = false;
            unit.completed_tasks += 1;
            unit.last_activity = Instant::now();
        }
        self.in_flight.remove(&task_id);
        self.completed_count += 1;

        match self.waiters.remove(&task_id) {
            Some(waiter) => {
                let result = match outcome {
                    Ok(output) => TaskResult::success(task_id, output, elapsed_ms),
                    Err(message) => TaskResult::failure(task_id, message, elapsed_ms),
                };
                let _ = waiter.reply.send(Ok(result));
            }
            None => {
                // 超时任务的迟到结果：静默丢弃，单元立即恢复可用
                debug!(task_id = %task_id, elapsed_ms, "丢弃已超时任务的过期结果");
            }
        }

        self.try_dispatch();
    }

    fn handle_crashed(&mut self, unit_id: Uuid, task_id: Uuid, message: String) {
        error!(unit_id = %unit_id, task_id = %task_id, "执行单元崩溃: {}", message);
        self.events.publish(EngineEvent::WorkerError {
            worker_id: unit_id,
            message: message.clone(),
        });

        if self.units.remove(&unit_id).is_some() {
            self.events
                .publish(EngineEvent::WorkerExited { worker_id: unit_id });
        }
        self.in_flight.remove(&task_id);

        if let Some(waiter) = self.waiters.remove(&task_id) {
            let _ = waiter.reply.send(Err(BatchError::UnitCrash { message }));
        }

        self.ensure_min_workers();
        self.try_dispatch();
    }

    /// 池级自愈：补足到min_workers，不作为用户可见错误上报
    fn ensure_min_workers(&mut self) {
        while self.units.len() < self.config.min_workers {
            if let Err(e) = self.spawn_unit() {
                error!("补充执行单元失败: {}", e);
                break;
            }
        }
    }

    fn handle_deadline(&mut self, task_id: Uuid) {
        let Some(waiter) = self.waiters.get(&task_id) else {
            // 任务已先行完成
            return;
        };
        let timeout_ms = waiter.timeout_ms;

        if self.queue.remove(task_id).is_some() {
            // 尚未分发：从队列撤销并拒绝调用方
            if let Some(waiter) = self.waiters.remove(&task_id) {
                warn!(task_id = %task_id, timeout_ms, "排队任务超时，已从队列移除");
                let _ = waiter
                    .reply
                    .send(Err(BatchError::TaskTimeout { task_id, timeout_ms }));
            }
        } else if self.in_flight.contains_key(&task_id) {
            // 已分发：拒绝调用方，但单元继续运行，迟到结果将被丢弃
            if let Some(waiter) = self.waiters.remove(&task_id) {
                warn!(
                    task_id = %task_id,
                    timeout_ms,
                    "在途任务超时，调用方已被拒绝，单元继续运行直至任务结束"
                );
                let _ = waiter
                    .reply
                    .send(Err(BatchError::TaskTimeout { task_id, timeout_ms }));
            }
        }
    }

    /// 空闲回收：超过min_workers的空闲单元在idle_timeout后终止
    fn reap_idle_units(&mut self) {
        if self.units.len() <= self.config.min_workers {
            return;
        }
        let idle_timeout = Duration::from_millis(self.config.idle_timeout_ms);
        let mut victims: Vec<Uuid> = self
            .units
            .iter()
            .filter(|(_, unit)| !unit.busy && unit.last_activity.elapsed() >= idle_timeout)
            .map(|(id, _)| *id)
            .collect();
        victims.sort_by_key(|id| self.units[id].last_activity);

        let mut reaped = false;
        for unit_id in victims {
            if self.units.len() <= self.config.min_workers {
                break;
            }
            if let Some(unit) = self.units.remove(&unit_id) {
                info!(
                    unit_id = %unit_id,
                    completed_tasks = unit.completed_tasks,
                    alive_ms = unit.created_at.elapsed().as_millis() as u64,
                    "回收空闲执行单元"
                );
                // 发送端随记录一起释放，单元线程随之退出
                drop(unit);
                self.events
                    .publish(EngineEvent::WorkerTerminated { worker_id: unit_id });
                reaped = true;
            }
        }
        if reaped {
            self.try_dispatch();
        }
    }

    fn handle_shutdown(&mut self) {
        info!(
            queued = self.queue.len(),
            in_flight = self.in_flight.len(),
            units = self.units.len(),
            "执行池关闭"
        );

        // 排队任务统一拒绝
        for task in self.queue.drain() {
            if let Some(waiter) = self.waiters.remove(&task.id) {
                let _ = waiter.reply.send(Err(BatchError::PoolShutdown));
            }
        }
        // 在途任务被放弃，不等待其结果
        for (task_id, _) in self.in_flight.drain() {
            if let Some(waiter) = self.waiters.remove(&task_id) {
                let _ = waiter.reply.send(Err(BatchError::PoolShutdown));
            }
        }
        for (unit_id, unit) in self.units.drain() {
            drop(unit);
            self.events
                .publish(EngineEvent::WorkerTerminated { worker_id: unit_id });
        }
    }

    fn stats(&self) -> PoolStats {
        let busy = self.units.values().filter(|u| u.busy).count();
        PoolStats {
            total_workers: self.units.len(),
            busy_workers: busy,
            idle_workers: self.units.len() - busy,
            queued_tasks: self.queue.len(),
            total_tasks_completed: self.completed_count,
            max_workers: self.config.max_workers,
        }
    }
}
