use crate::types::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// 属性作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeScope {
    #[default]
    Server,
    Client,
    Shared,
}

/// 实体关系
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub from: String,
    pub to: String,
    pub relation_type: String,
}

/// 属性存储, 由 save_attributes 节点使用
#[async_trait]
pub trait AttributeStore: Send + Sync + std::fmt::Debug {
    async fn save_attributes(
        &self,
        entity_id: &str,
        scope: AttributeScope,
        attributes: Map<String, Value>,
    ) -> Result<()>;
}

/// 关系存储, 由 create_relation 节点使用
#[async_trait]
pub trait RelationStore: Send + Sync + std::fmt::Debug {
    /// 创建关系, 已存在时返回 false
    async fn create_relation(&self, relation: Relation) -> Result<bool>;
}

#[derive(Debug, Default)]
pub struct InMemoryAttributeStore {
    attributes: RwLock<HashMap<(String, AttributeScope), Map<String, Value>>>,
}

impl InMemoryAttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, entity_id: &str, scope: AttributeScope) -> Option<Map<String, Value>> {
        self.attributes
            .read()
            .await
            .get(&(entity_id.to_string(), scope))
            .cloned()
    }
}

#[async_trait]
impl AttributeStore for InMemoryAttributeStore {
    async fn save_attributes(
        &self,
        entity_id: &str,
        scope: AttributeScope,
        attributes: Map<String, Value>,
    ) -> Result<()> {
        let mut all = self.attributes.write().await;
        all.entry((entity_id.to_string(), scope))
            .or_default()
            .extend(attributes);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRelationStore {
    relations: RwLock<Vec<Relation>>,
}

impl InMemoryRelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn relations(&self) -> Vec<Relation> {
        self.relations.read().await.clone()
    }
}

#[async_trait]
impl RelationStore for InMemoryRelationStore {
    async fn create_relation(&self, relation: Relation) -> Result<bool> {
        let mut relations = self.relations.write().await;
        if relations.contains(&relation) {
            return Ok(false);
        }
        relations.push(relation);
        Ok(true)
    }
}
