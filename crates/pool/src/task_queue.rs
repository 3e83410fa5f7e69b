//! 池内任务优先队列
//!
//! 排序键为 `(优先级降序, 提交序号升序)`。平局裁决是结构性的：
//! 相同优先级的任务严格按提交先后（FIFO）出队，不依赖任何排序
//! 算法的稳定性。支持按任务id移除，用于超时任务仍在排队时的撤销。

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use uuid::Uuid;

use docbatch_core::models::Task;

#[derive(Debug, PartialEq, Eq)]
struct QueueEntry {
    priority: i32,
    seq: u64,
    task_id: Uuid,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap是最大堆：优先级大者在前，同级时序号小者在前
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct PriorityTaskQueue {
    heap: BinaryHeap<QueueEntry>,
    tasks: HashMap<Uuid, Task>,
    next_seq: u64,
}

impl PriorityTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: Task) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueueEntry {
            priority: task.priority,
            seq,
            task_id: task.id,
        });
        self.tasks.insert(task.id, task);
    }

    /// 弹出下一个待分发任务，自动跳过已被移除的堆条目
    pub fn pop(&mut self) -> Option<Task> {
        while let Some(entry) = self.heap.pop() {
            if let Some(task) = self.tasks.remove(&entry.task_id) {
                return Some(task);
            }
        }
        None
    }

    /// 按id移除仍在排队的任务；对应堆条目在pop时惰性清理
    pub fn remove(&mut self, task_id: Uuid) -> Option<Task> {
        self.tasks.remove(&task_id)
    }

    pub fn contains(&self, task_id: Uuid) -> bool {
        self.tasks.contains_key(&task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 清空队列并返回所有剩余任务（池关闭时统一拒绝）
    pub fn drain(&mut self) -> Vec<Task> {
        self.heap.clear();
        self.tasks.drain().map(|(_, task)| task).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(priority: i32, tag: &str) -> Task {
        Task::new("test", json!({ "tag": tag })).with_priority(priority)
    }

    #[test]
    fn test_pop_in_priority_order() {
        let mut queue = PriorityTaskQueue::new();
        queue.push(task(1, "a"));
        queue.push(task(5, "b"));
        queue.push(task(3, "c"));

        let order: Vec<i32> = std::iter::from_fn(|| queue.pop())
            .map(|t| t.priority)
            .collect();
        assert_eq!(order, vec![5, 3, 1]);
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let mut queue = PriorityTaskQueue::new();
        for tag in ["first", "second", "third"] {
            queue.push(task(7, tag));
        }

        let order: Vec<String> = std::iter::from_fn(|| queue.pop())
            .map(|t| t.payload["tag"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_remove_queued_task() {
        let mut queue = PriorityTaskQueue::new();
        let victim = task(2, "victim");
        let victim_id = victim.id;
        queue.push(task(1, "keep"));
        queue.push(victim);

        assert!(queue.remove(victim_id).is_some());
        assert!(!queue.contains(victim_id));
        assert_eq!(queue.len(), 1);

        // 堆中的残留条目被跳过
        let next = queue.pop().unwrap();
        assert_eq!(next.payload["tag"], "keep");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_drain_returns_all() {
        let mut queue = PriorityTaskQueue::new();
        queue.push(task(1, "a"));
        queue.push(task(2, "b"));

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }
}
