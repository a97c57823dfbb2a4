//! 规则链管理服务
//!
//! 每个管理操作都先识别调用方身份, 再读取属于该用户的规则链, 按状态转换表检查后才修改
//! 存储和运行时实例。状态持久化失败时回滚运行时的变更。同一规则链上的管理操作串行执行。

mod auth;
mod cache;
mod repository;
mod transport;

pub use auth::*;
pub use cache::*;
pub use repository::*;
pub use transport::*;

use crate::config::EngineConfig;
use crate::engine::RuleEngine;
use crate::types::{
    Envelope, LifecycleOp, Message, NodeDescriptor, Result, RuleChain, RuleChainPage,
    RuleChainStatus, RuleError,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

pub struct RuleChainService {
    engine: Arc<RuleEngine>,
    repository: Arc<dyn RuleChainRepository>,
    cache: Arc<dyn RuleChainCache>,
    auth: Arc<dyn AuthN>,
    config: EngineConfig,
    /// 按规则链 id 的操作锁
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl RuleChainService {
    pub fn new(
        engine: Arc<RuleEngine>,
        repository: Arc<dyn RuleChainRepository>,
        cache: Arc<dyn RuleChainCache>,
        auth: Arc<dyn AuthN>,
        config: EngineConfig,
    ) -> Self {
        Self {
            engine,
            repository,
            cache,
            auth,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 获取规则链的操作锁, 读取-检查-修改期间持有
    async fn lock_chain(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // 没有持有者和等待者的锁可以丢弃
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks.entry(id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub fn engine(&self) -> &Arc<RuleEngine> {
        &self.engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 新建规则链, 状态为 created; id 为空时自动生成
    pub async fn add_new_rule_chain(&self, token: &str, mut chain: RuleChain) -> Result<RuleChain> {
        let principal = self.auth.identify(token).await?;

        chain.user_id = principal.user_id;
        if chain.id.is_empty() {
            chain.id = uuid::Uuid::new_v4().to_string();
        }
        let _guard = self.lock_chain(&chain.id).await;
        match self.repository.retrieve(&chain.user_id, &chain.id).await {
            Ok(_) => return Err(RuleError::AlreadyExists(chain.id)),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let now = now_millis();
        chain.status = RuleChainStatus::Created;
        chain.create_at = now;
        chain.last_update_at = now;
        chain.validate()?;

        let saved = self.repository.save(chain).await?;
        if let Err(e) = self.cache.save(&saved.name, &saved.id).await {
            warn!(chain_id = %saved.id, error = %e, "缓存写入失败");
        }
        info!(chain_id = %saved.id, user_id = %saved.user_id, "规则链已创建");
        Ok(saved)
    }

    pub async fn get_rule_chain_info(&self, token: &str, id: &str) -> Result<RuleChain> {
        let principal = self.auth.identify(token).await?;
        self.repository.retrieve(&principal.user_id, id).await
    }

    /// 更新定义; 运行中的规则链不允许更新
    pub async fn update_rule_chain(&self, token: &str, chain: RuleChain) -> Result<RuleChain> {
        let principal = self.auth.identify(token).await?;
        let _guard = self.lock_chain(&chain.id).await;
        let current = self.repository.retrieve(&principal.user_id, &chain.id).await?;
        current.check(LifecycleOp::Update)?;

        let updated = RuleChain {
            id: current.id,
            user_id: current.user_id,
            status: current.status,
            create_at: current.create_at,
            last_update_at: now_millis(),
            ..chain
        };
        updated.validate()?;

        let updated = self.repository.update(updated).await?;
        if updated.name != current.name {
            let rekeyed = match self.cache.remove(&updated.id).await {
                Ok(()) => self.cache.save(&updated.name, &updated.id).await,
                Err(e) => Err(e),
            };
            if let Err(e) = rekeyed {
                warn!(chain_id = %updated.id, error = %e, "缓存更新失败");
            }
        }
        info!(chain_id = %updated.id, "规则链已更新");
        Ok(updated)
    }

    /// 删除定义及缓存; 运行中的规则链不允许删除
    pub async fn revoke_rule_chain(&self, token: &str, id: &str) -> Result<()> {
        let principal = self.auth.identify(token).await?;
        let _guard = self.lock_chain(id).await;
        let current = self.repository.retrieve(&principal.user_id, id).await?;
        current.check(LifecycleOp::Revoke)?;

        self.engine.manager().delete_rule_chain(&current).await?;
        self.repository.revoke(&principal.user_id, id).await?;
        if let Err(e) = self.cache.remove(id).await {
            warn!(chain_id = %id, error = %e, "缓存删除失败");
        }
        info!(chain_id = %id, "规则链已删除");
        Ok(())
    }

    /// 分页查询, limit 为 0 时使用默认值, 超过上限时截断
    pub async fn list_rule_chain(&self, token: &str, offset: u64, limit: u64) -> Result<RuleChainPage> {
        let principal = self.auth.identify(token).await?;
        let limit = match limit {
            0 => self.config.default_page_limit,
            n => n.min(self.config.max_page_limit),
        };
        self.repository.list(&principal.user_id, offset, limit).await
    }

    pub async fn start_rule_chain(&self, token: &str, id: &str) -> Result<()> {
        let principal = self.auth.identify(token).await?;
        let _guard = self.lock_chain(id).await;
        let mut chain = self.repository.retrieve(&principal.user_id, id).await?;
        chain.check(LifecycleOp::Start)?;

        let manager = self.engine.manager();
        manager.start_rule_chain(&chain).await?;

        chain.status = RuleChainStatus::Started;
        chain.last_update_at = now_millis();
        if let Err(e) = self.repository.update(chain.clone()).await {
            error!(chain_id = %id, error = %e, "状态保存失败, 停止已启动的实例");
            if let Err(rollback) = manager.stop_rule_chain(&chain).await {
                error!(chain_id = %id, error = %rollback, "回滚失败");
            }
            return Err(e);
        }
        info!(chain_id = %id, channel = %chain.channel, sub_topic = %chain.sub_topic, "规则链已启动");
        Ok(())
    }

    pub async fn stop_rule_chain(&self, token: &str, id: &str) -> Result<()> {
        let principal = self.auth.identify(token).await?;
        let _guard = self.lock_chain(id).await;
        let mut chain = self.repository.retrieve(&principal.user_id, id).await?;
        chain.check(LifecycleOp::Stop)?;

        let manager = self.engine.manager();
        let was_running = match manager.stop_rule_chain(&chain).await {
            Ok(()) => true,
            Err(e) if e.is_not_found() => {
                // 持久状态与运行集不一致, 以停止为准
                warn!(chain_id = %id, "规则链标记为运行但没有运行实例");
                false
            }
            Err(e) => return Err(e),
        };

        chain.status = RuleChainStatus::Stopped;
        chain.last_update_at = now_millis();
        if let Err(e) = self.repository.update(chain.clone()).await {
            error!(chain_id = %id, error = %e, "状态保存失败, 恢复运行实例");
            if was_running {
                if let Err(rollback) = manager.start_rule_chain(&chain).await {
                    error!(chain_id = %id, error = %rollback, "回滚失败");
                }
            }
            return Err(e);
        }
        info!(chain_id = %id, "规则链已停止");
        Ok(())
    }

    /// 离线校验负载, 返回全部问题; 不影响存储和运行集
    pub async fn check_rule_chain(&self, token: &str, payload: &[u8]) -> Result<Vec<RuleError>> {
        self.auth.identify(token).await?;
        match self.engine.manager().compiler().compile(payload).await {
            Ok(graph) => {
                graph.close().await;
                Ok(Vec::new())
            }
            Err(errors) => Ok(errors),
        }
    }

    /// 传输层订阅的分发入口, 没有匹配的规则链时静默返回
    pub async fn save_states(&self, envelope: &Envelope) -> Result<()> {
        let msg = envelope.to_message()?;
        self.engine
            .dispatch(&envelope.channel, &envelope.sub_topic, msg)
            .await;
        Ok(())
    }

    /// 外部适配器的数据分发给注册了该适配器的规则链
    pub async fn save_adaptor_states(&self, adaptor_id: &str, payload: &[u8]) -> Result<usize> {
        let data: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| RuleError::Malformed(format!("适配器数据不是合法的JSON: {}", e)))?;
        let mut msg = Message::new("adaptor", data);
        msg.metadata.insert("adaptor_id".into(), adaptor_id.to_string());
        Ok(self.engine.dispatcher().dispatch_adaptor(adaptor_id, msg).await)
    }

    /// 启动时重建运行集: 重新启动所有持久状态为 started 的规则链
    ///
    /// 无法编译的规则链被标记为 stopped, 返回成功恢复的数量。单条规则链的失败不会中断恢复。
    pub async fn restore(&self) -> Result<usize> {
        let chains = self
            .repository
            .retrieve_by_status(RuleChainStatus::Started)
            .await?;
        let manager = self.engine.manager();

        let mut restored = 0;
        let mut failed = 0;
        for mut chain in chains {
            let _guard = self.lock_chain(&chain.id).await;
            match manager.start_rule_chain(&chain).await {
                Ok(()) => restored += 1,
                Err(e) => {
                    failed += 1;
                    warn!(chain_id = %chain.id, error = %e, "规则链恢复失败, 标记为 stopped");
                    chain.status = RuleChainStatus::Stopped;
                    chain.last_update_at = now_millis();
                    if let Err(e) = self.repository.update(chain.clone()).await {
                        error!(chain_id = %chain.id, error = %e, "状态保存失败");
                    }
                }
            }
        }
        info!(restored, failed, "运行集已恢复");
        Ok(restored)
    }

    /// 已注册的节点类型
    pub async fn node_types(&self) -> Vec<NodeDescriptor> {
        self.engine.get_registered_components().await
    }
}

impl std::fmt::Debug for RuleChainService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleChainService")
            .field("config", &self.config)
            .finish()
    }
}
