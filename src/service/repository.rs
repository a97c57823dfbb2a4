use crate::types::{Result, RuleChain, RuleChainPage, RuleChainStatus, RuleError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// 规则链定义的持久化接口, 所有查询都按所有者隔离
#[async_trait]
pub trait RuleChainRepository: Send + Sync {
    async fn save(&self, chain: RuleChain) -> Result<RuleChain>;

    async fn update(&self, chain: RuleChain) -> Result<RuleChain>;

    /// 不存在或不属于该用户时返回 NotFound
    async fn retrieve(&self, user_id: &str, id: &str) -> Result<RuleChain>;

    async fn revoke(&self, user_id: &str, id: &str) -> Result<()>;

    async fn list(&self, user_id: &str, offset: u64, limit: u64) -> Result<RuleChainPage>;

    /// 跨用户按状态查询, 启动时恢复运行集使用
    async fn retrieve_by_status(&self, status: RuleChainStatus) -> Result<Vec<RuleChain>>;
}

#[derive(Debug, Default)]
pub struct InMemoryRuleChainRepository {
    chains: RwLock<BTreeMap<String, RuleChain>>,
}

impl InMemoryRuleChainRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleChainRepository for InMemoryRuleChainRepository {
    async fn save(&self, chain: RuleChain) -> Result<RuleChain> {
        let mut chains = self.chains.write().await;
        if chains.contains_key(&chain.id) {
            return Err(RuleError::AlreadyExists(chain.id));
        }
        chains.insert(chain.id.clone(), chain.clone());
        Ok(chain)
    }

    async fn update(&self, chain: RuleChain) -> Result<RuleChain> {
        let mut chains = self.chains.write().await;
        match chains.get_mut(&chain.id) {
            Some(existing) if existing.user_id == chain.user_id => {
                *existing = chain.clone();
                Ok(chain)
            }
            _ => Err(RuleError::NotFound(chain.id)),
        }
    }

    async fn retrieve(&self, user_id: &str, id: &str) -> Result<RuleChain> {
        self.chains
            .read()
            .await
            .get(id)
            .filter(|c| c.user_id == user_id)
            .cloned()
            .ok_or_else(|| RuleError::NotFound(id.to_string()))
    }

    async fn revoke(&self, user_id: &str, id: &str) -> Result<()> {
        let mut chains = self.chains.write().await;
        match chains.get(id) {
            Some(chain) if chain.user_id == user_id => {
                chains.remove(id);
                Ok(())
            }
            _ => Err(RuleError::NotFound(id.to_string())),
        }
    }

    async fn list(&self, user_id: &str, offset: u64, limit: u64) -> Result<RuleChainPage> {
        let chains = self.chains.read().await;
        let owned: Vec<&RuleChain> = chains.values().filter(|c| c.user_id == user_id).collect();

        Ok(RuleChainPage {
            total: owned.len() as u64,
            offset,
            limit,
            rule_chains: owned
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect(),
        })
    }

    async fn retrieve_by_status(&self, status: RuleChainStatus) -> Result<Vec<RuleChain>> {
        Ok(self
            .chains
            .read()
            .await
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect())
    }
}
