//! 引擎配置
//!
//! 优先级 (高 -> 低):
//! 1. `RULECHAIN_` 前缀的环境变量
//! 2. 配置文件 (TOML)
//! 3. 默认值

use crate::types::{Result, RuleError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "RULECHAIN_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 引擎自身的管理通道, 来自该通道的消息不会被分发, 避免回环
    pub self_channel: String,
    /// 订阅的通配主题
    pub subscribe_topic: String,
    /// 同时执行的遍历任务上限
    pub worker_pool_size: usize,
    pub error_channel_capacity: usize,
    pub default_page_limit: u64,
    pub max_page_limit: u64,
    pub log_level: String,
    pub mqtt_connect_timeout_ms: u64,
    pub http_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            self_channel: "rulechain".to_string(),
            subscribe_topic: "channels.>".to_string(),
            worker_pool_size: 64,
            error_channel_capacity: 256,
            default_page_limit: 10,
            max_page_limit: 100,
            log_level: "info".to_string(),
            mqtt_connect_timeout_ms: 3000,
            http_timeout_ms: 5000,
        }
    }
}

impl EngineConfig {
    /// 从默认值、可选配置文件和环境变量加载
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config: EngineConfig = figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|e| RuleError::Config(format!("加载配置失败: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_pool_size == 0 {
            return Err(RuleError::Config("worker_pool_size 必须大于 0".to_string()));
        }
        if self.default_page_limit == 0 || self.max_page_limit == 0 {
            return Err(RuleError::Config("分页大小必须大于 0".to_string()));
        }
        if self.default_page_limit > self.max_page_limit {
            return Err(RuleError::Config(
                "default_page_limit 不能大于 max_page_limit".to_string(),
            ));
        }
        if self.subscribe_topic.is_empty() {
            return Err(RuleError::Config("subscribe_topic 不能为空".to_string()));
        }
        Ok(())
    }

    pub fn mqtt_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.mqtt_connect_timeout_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}
