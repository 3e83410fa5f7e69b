use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

/// 任务处理器接口
///
/// 处理器在执行单元的专属线程上同步运行，一个单元同一时刻只运行一个
/// 任务。处理器之间以及处理器与协调器之间不共享可变状态；进度通过
/// 回调上报（0-100）。
///
/// 返回Err表示任务失败（业务层面），panic则视为执行单元崩溃。
pub trait TaskHandler: Send + Sync {
    /// 处理器对应的任务类型标签
    fn task_type(&self) -> &str;

    /// 执行任务
    fn run(
        &self,
        payload: &serde_json::Value,
        progress: &mut dyn FnMut(u8),
    ) -> std::result::Result<serde_json::Value, String>;
}

/// 任务处理器注册表
///
/// 在组合根构建完成后不可变，随后以Arc共享给所有执行单元。
/// 按任务类型查找处理器；未注册的类型由池侧合成失败结果。
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，同类型后注册者覆盖先注册者
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        let task_type = handler.task_type().to_string();
        info!("注册任务处理器: {}", task_type);
        self.handlers.insert(task_type, handler);
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    pub fn task_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
