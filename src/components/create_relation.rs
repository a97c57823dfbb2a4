use crate::components::render_template;
use crate::engine::{NodeArgs, NodeHandler, Relation, RelationStore};
use crate::types::{Message, NodeCategory, NodeContext, NodeDescriptor, Result, RuleError};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// 关系方向, 以消息发布者为参照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationDirection {
    /// 发布者 -> 目标实体
    #[default]
    From,
    /// 目标实体 -> 发布者
    To,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRelationConfig {
    pub relation_type: String,
    /// 目标实体 id 模板
    pub entity_id: String,
    #[serde(default)]
    pub direction: RelationDirection,
}

#[derive(Debug)]
pub struct CreateRelationNode {
    config: CreateRelationConfig,
    store: Arc<dyn RelationStore>,
}

impl CreateRelationNode {
    pub fn from_args(args: &NodeArgs) -> Result<Self> {
        let config: CreateRelationConfig = args.parse_config()?;
        if config.relation_type.is_empty() || config.entity_id.is_empty() {
            return Err(RuleError::ConfigError(format!(
                "节点 {} 需要 relation_type 和 entity_id",
                args.node_id
            )));
        }
        Ok(Self {
            config,
            store: args.services.relations.clone(),
        })
    }

    async fn create(&self, msg: &Message) -> Result<bool> {
        let originator = msg
            .originator()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| RuleError::NodeExecutionError("消息缺少发布者".to_string()))?
            .to_string();
        let target = render_template(&self.config.entity_id, msg);
        if target.is_empty() {
            return Err(RuleError::NodeExecutionError(
                "目标实体 id 为空".to_string(),
            ));
        }

        let (from, to) = match self.config.direction {
            RelationDirection::From => (originator, target),
            RelationDirection::To => (target, originator),
        };
        self.store
            .create_relation(Relation {
                from,
                to,
                relation_type: self.config.relation_type.clone(),
            })
            .await
    }
}

#[async_trait]
impl NodeHandler for CreateRelationNode {
    async fn handle(&self, ctx: NodeContext, mut msg: Message) -> Result<()> {
        match self.create(&msg).await {
            Ok(created) => {
                msg.metadata
                    .insert("relation_created".into(), created.to_string());
                ctx.tell_success(msg).await
            }
            Err(e) => ctx.tell_failure(msg, &e).await,
        }
    }

    fn get_descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_name: "create_relation".to_string(),
            name: "创建关系".to_string(),
            description: "在消息发布者与目标实体之间创建关系".to_string(),
            category: NodeCategory::Action,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::engine::test_support::{registry_with_recorder, run_once};
    use crate::engine::{InMemoryRelationStore, NodeServices, Relation};
    use crate::types::Message;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn creates_relation_once() {
        let store = Arc::new(InMemoryRelationStore::new());
        let services = NodeServices {
            relations: store.clone(),
            ..NodeServices::in_memory(&EngineConfig::default())
        };
        let (registry, mut rx) = registry_with_recorder(services).await;
        let payload = json!({
            "nodes": [
                {"id": "rel", "type": "create_relation", "config": {
                    "relation_type": "Contains",
                    "entity_id": "${msg.asset}",
                    "direction": "to"
                }},
                {"id": "ok", "type": "recorder"}
            ],
            "connections": [{"from_id": "rel", "to_id": "ok", "label": "Success"}]
        });

        let mut msg = Message::new("telemetry", json!({"asset": "building-1"}));
        msg.metadata.insert("publisher".into(), "dev-1".into());

        run_once(registry.clone(), payload.clone(), msg.clone())
            .await
            .unwrap();
        run_once(registry, payload, msg).await.unwrap();

        let first = rx.try_recv().unwrap().1;
        let second = rx.try_recv().unwrap().1;
        assert_eq!(first.metadata.get("relation_created").unwrap(), "true");
        assert_eq!(second.metadata.get("relation_created").unwrap(), "false");
        assert_eq!(
            store.relations().await,
            vec![Relation {
                from: "building-1".into(),
                to: "dev-1".into(),
                relation_type: "Contains".into(),
            }]
        );
    }
}
