use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;
use crate::errors::{BatchError, Result};

/// 初始化全局日志订阅器
///
/// RUST_LOG环境变量优先于配置中的级别；重复初始化返回配置错误。
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let result = if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    result.map_err(|e| BatchError::Configuration(format!("日志初始化失败: {e}")))
}
