use crate::components::render_template;
use crate::engine::{AttributeScope, AttributeStore, NodeArgs, NodeHandler};
use crate::types::{Message, NodeCategory, NodeContext, NodeDescriptor, Result, RuleError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SaveAttributesConfig {
    #[serde(default)]
    pub scope: AttributeScope,
    /// 实体 id 模板, 为空时使用消息的发布者
    #[serde(default)]
    pub entity_id: Option<String>,
}

/// 把消息数据作为实体属性保存
#[derive(Debug)]
pub struct SaveAttributesNode {
    config: SaveAttributesConfig,
    store: Arc<dyn AttributeStore>,
}

impl SaveAttributesNode {
    pub fn from_args(args: &NodeArgs) -> Result<Self> {
        Ok(Self {
            config: args.parse_config()?,
            store: args.services.attributes.clone(),
        })
    }

    async fn save(&self, msg: &Message) -> Result<()> {
        let entity_id = match &self.config.entity_id {
            Some(template) => render_template(template, msg),
            None => msg.originator().unwrap_or_default().to_string(),
        };
        if entity_id.is_empty() {
            return Err(RuleError::NodeExecutionError(
                "无法确定属性所属实体".to_string(),
            ));
        }

        let Value::Object(attributes) = &msg.data else {
            return Err(RuleError::NodeExecutionError(format!(
                "属性数据必须是对象, 实际为: {}",
                msg.data
            )));
        };

        self.store
            .save_attributes(&entity_id, self.config.scope, attributes.clone())
            .await
    }
}

#[async_trait]
impl NodeHandler for SaveAttributesNode {
    async fn handle(&self, ctx: NodeContext, msg: Message) -> Result<()> {
        match self.save(&msg).await {
            Ok(()) => ctx.tell_success(msg).await,
            Err(e) => ctx.tell_failure(msg, &e).await,
        }
    }

    fn get_descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_name: "save_attributes".to_string(),
            name: "保存属性".to_string(),
            description: "把消息数据保存为实体属性".to_string(),
            category: NodeCategory::Action,
        }
    }
}
