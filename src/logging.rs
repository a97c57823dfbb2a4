use crate::types::{Result, RuleError};
use tracing_subscriber::EnvFilter;

/// 初始化日志系统, `RUST_LOG` 优先于配置的级别
pub fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| RuleError::Config(format!("无效的日志级别 {}: {}", level, e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| RuleError::Config(format!("日志系统初始化失败: {}", e)))
}
