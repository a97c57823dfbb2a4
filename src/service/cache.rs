use crate::types::{Result, RuleError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// 规则链 key (名称) 到 id 的缓存
#[async_trait]
pub trait RuleChainCache: Send + Sync {
    async fn save(&self, key: &str, id: &str) -> Result<()>;

    /// 未命中时返回 NotFound
    async fn id(&self, key: &str) -> Result<String>;

    /// 按 id 删除对应的 key
    async fn remove(&self, id: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryRuleChainCache {
    keys: RwLock<HashMap<String, String>>,
}

impl InMemoryRuleChainCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleChainCache for InMemoryRuleChainCache {
    async fn save(&self, key: &str, id: &str) -> Result<()> {
        self.keys
            .write()
            .await
            .insert(key.to_string(), id.to_string());
        Ok(())
    }

    async fn id(&self, key: &str) -> Result<String> {
        self.keys
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| RuleError::NotFound(key.to_string()))
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.keys.write().await.retain(|_, v| v != id);
        Ok(())
    }
}

const KEY_PREFIX: &str = "rulechain:key:";
const ID_PREFIX: &str = "rulechain:id:";

/// Redis 缓存, 同时保存 key -> id 和 id -> key, 使按 id 删除不需要扫描
#[derive(Clone)]
pub struct RedisRuleChainCache {
    conn: ConnectionManager,
}

impl RedisRuleChainCache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(cache_error)?;
        let conn = ConnectionManager::new(client).await.map_err(cache_error)?;
        debug!(url, "Redis 缓存已连接");
        Ok(Self { conn })
    }
}

fn cache_error(e: redis::RedisError) -> RuleError {
    RuleError::Cache(e.to_string())
}

#[async_trait]
impl RuleChainCache for RedisRuleChainCache {
    async fn save(&self, key: &str, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(format!("{}{}", KEY_PREFIX, key), id)
            .ignore()
            .set(format!("{}{}", ID_PREFIX, id), key)
            .ignore();
        let () = pipe.query_async(&mut conn).await.map_err(cache_error)?;
        Ok(())
    }

    async fn id(&self, key: &str) -> Result<String> {
        let mut conn = self.conn.clone();
        let id: Option<String> = conn
            .get(format!("{}{}", KEY_PREFIX, key))
            .await
            .map_err(cache_error)?;
        id.ok_or_else(|| RuleError::NotFound(key.to_string()))
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let id_key = format!("{}{}", ID_PREFIX, id);
        let key: Option<String> = conn.get(&id_key).await.map_err(cache_error)?;

        let mut pipe = redis::pipe();
        pipe.atomic().del(&id_key).ignore();
        if let Some(key) = key {
            pipe.del(format!("{}{}", KEY_PREFIX, key)).ignore();
        }
        let () = pipe.query_async(&mut conn).await.map_err(cache_error)?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisRuleChainCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRuleChainCache").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remove_by_id_drops_key() {
        let cache = InMemoryRuleChainCache::new();
        cache.save("temperature", "rc1").await.unwrap();
        cache.save("humidity", "rc2").await.unwrap();
        assert_eq!(cache.id("temperature").await.unwrap(), "rc1");

        cache.remove("rc1").await.unwrap();
        assert!(cache.id("temperature").await.unwrap_err().is_not_found());
        assert_eq!(cache.id("humidity").await.unwrap(), "rc2");
    }

    #[tokio::test]
    async fn redis_connect_rejects_bad_url() {
        let err = RedisRuleChainCache::connect("not-a-url").await.unwrap_err();
        assert!(matches!(err, RuleError::Cache(_)));
    }
}
