//! 有界执行池：协调器 + 执行单元线程 + 池内优先队列

pub mod pool;
pub mod task_queue;
mod unit;

pub use pool::{ExecutionPool, PoolHandle};
