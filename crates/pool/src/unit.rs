//! 执行单元
//!
//! 每个单元是一个专属OS线程，一次只运行一个任务。与协调器之间
//! 仅通过消息通道通信：入站接收任务，出站上报进度、结果与崩溃，
//! 不存在任何共享可变内存。

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;
use uuid::Uuid;

use docbatch_core::handler::HandlerRegistry;
use docbatch_core::models::Task;

/// 协调器发往单元的消息
pub(crate) enum UnitInbound {
    Run(Task),
}

/// 单元发往协调器的消息
#[derive(Debug)]
pub(crate) enum UnitOutbound {
    Progress {
        task_id: Uuid,
        progress: u8,
    },
    Finished {
        unit_id: Uuid,
        task_id: Uuid,
        outcome: std::result::Result<serde_json::Value, String>,
        elapsed_ms: u64,
    },
    /// 处理器panic，单元线程随即退出
    Crashed {
        unit_id: Uuid,
        task_id: Uuid,
        message: String,
    },
}

/// 启动一个执行单元线程
///
/// 返回发往该单元的发送端与线程句柄；发送端被丢弃后线程正常退出。
pub(crate) fn spawn(
    unit_id: Uuid,
    handlers: Arc<HandlerRegistry>,
    outbound: UnboundedSender<UnitOutbound>,
) -> std::io::Result<(mpsc::Sender<UnitInbound>, thread::JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel::<UnitInbound>();

    let handle = thread::Builder::new()
        .name(format!("docbatch-unit-{unit_id}"))
        .spawn(move || run_loop(unit_id, rx, handlers, outbound))?;

    Ok((tx, handle))
}

fn run_loop(
    unit_id: Uuid,
    rx: mpsc::Receiver<UnitInbound>,
    handlers: Arc<HandlerRegistry>,
    outbound: UnboundedSender<UnitOutbound>,
) {
    while let Ok(UnitInbound::Run(task)) = rx.recv() {
        let start = Instant::now();
        let task_id = task.id;

        let outcome = match handlers.get(&task.task_type) {
            None => Err(format!("不支持的任务类型: {}", task.task_type)),
            Some(handler) => {
                let progress_tx = outbound.clone();
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    let mut report = |p: u8| {
                        let _ = progress_tx.send(UnitOutbound::Progress {
                            task_id,
                            progress: p.min(100),
                        });
                    };
                    handler.run(&task.payload, &mut report)
                }));

                match result {
                    Ok(outcome) => outcome,
                    Err(payload) => {
                        // panic视为单元崩溃：上报后线程退出，由协调器补充单元
                        let message = panic_message(payload);
                        let _ = outbound.send(UnitOutbound::Crashed {
                            unit_id,
                            task_id,
                            message,
                        });
                        return;
                    }
                }
            }
        };

        let _ = outbound.send(UnitOutbound::Finished {
            unit_id,
            task_id,
            outcome,
            elapsed_ms: start.elapsed().as_millis() as u64,
        });
    }

    // 入站通道关闭：单元被回收或池关闭
    debug!(unit_id = %unit_id, "执行单元线程退出");
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "处理器发生未知panic".to_string()
    }
}
