use std::path::Path;
use std::thread;

use serde::{Deserialize, Serialize};

use crate::errors::{BatchError, Result};

/// 默认单元数上限：可用硬件并行度减一，下限为1
fn default_max_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// 执行池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// 最小执行单元数，初始化时同步创建
    pub min_workers: usize,
    /// 最大执行单元数
    pub max_workers: usize,
    /// 空闲单元回收阈值（毫秒）
    pub idle_timeout_ms: u64,
    /// 默认任务超时（毫秒），可被单个任务覆盖
    pub default_task_timeout_ms: u64,
    /// 空闲回收巡检间隔（毫秒）
    pub reap_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: default_max_workers(),
            idle_timeout_ms: 30_000,
            default_task_timeout_ms: 120_000,
            reap_interval_ms: 1_000,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_workers < 1 {
            return Err(BatchError::Configuration(
                "min_workers必须至少为1".to_string(),
            ));
        }
        if self.max_workers < self.min_workers {
            return Err(BatchError::Configuration(format!(
                "max_workers ({}) 不能小于 min_workers ({})",
                self.max_workers, self.min_workers
            )));
        }
        if self.default_task_timeout_ms == 0 || self.reap_interval_ms == 0 {
            return Err(BatchError::Configuration(
                "超时与巡检间隔必须为正".to_string(),
            ));
        }
        Ok(())
    }
}

/// 任务编排器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// 资源采样间隔（毫秒）
    pub monitor_interval_ms: u64,
    /// 是否启用资源监控
    pub monitor_enabled: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            monitor_interval_ms: 5_000,
            monitor_enabled: true,
        }
    }
}

/// 作业队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 队列中的作业数上限
    pub max_jobs: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_jobs: 1_000 }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// 是否输出JSON格式日志
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// 应用整体配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pool: PoolConfig,
    pub orchestrator: OrchestratorConfig,
    pub queue: QueueConfig,
    pub logging: LogConfig,
}

impl AppConfig {
    /// 加载配置：TOML文件（可选）+ 环境变量覆盖（前缀DOCBATCH，层级分隔符__）
    ///
    /// 例如 `DOCBATCH__POOL__MAX_WORKERS=4` 覆盖 `[pool] max_workers`。
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("DOCBATCH")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: AppConfig = builder
            .build()
            .map_err(|e| BatchError::Configuration(format!("配置加载失败: {e}")))?
            .try_deserialize()
            .map_err(|e| BatchError::Configuration(format!("配置解析失败: {e}")))?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        if self.queue.max_jobs == 0 {
            return Err(BatchError::Configuration(
                "queue.max_jobs必须为正".to_string(),
            ));
        }
        if self.orchestrator.monitor_enabled && self.orchestrator.monitor_interval_ms == 0 {
            return Err(BatchError::Configuration(
                "orchestrator.monitor_interval_ms必须为正".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.pool.max_workers >= 1);
        assert!(cfg.pool.min_workers <= cfg.pool.max_workers);
    }

    #[test]
    fn test_invalid_pool_config() {
        let cfg = PoolConfig {
            min_workers: 4,
            max_workers: 2,
            ..PoolConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(BatchError::Configuration(_))
        ));

        let cfg = PoolConfig {
            min_workers: 0,
            ..PoolConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "[pool]\nmin_workers = 2\nmax_workers = 3\n\n[queue]\nmax_jobs = 10\n"
        )
        .unwrap();

        let cfg = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.pool.min_workers, 2);
        assert_eq!(cfg.pool.max_workers, 3);
        assert_eq!(cfg.queue.max_jobs, 10);
        // 未覆盖的部分保持默认值
        assert_eq!(cfg.pool.idle_timeout_ms, 30_000);
    }
}
