use crate::engine::{NodeArgs, NodeHandler, ScriptEngine};
use crate::types::{Message, NodeCategory, NodeContext, NodeDescriptor, Result, RuleError};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
pub struct TransformConfig {
    pub script: String,
}

/// 用脚本改写消息, 改写后的消息走 Success 分支
#[derive(Debug)]
pub struct TransformNode {
    config: TransformConfig,
    scripts: Arc<dyn ScriptEngine>,
}

impl TransformNode {
    pub fn from_args(args: &NodeArgs) -> Result<Self> {
        let config: TransformConfig = args.parse_config()?;
        if config.script.trim().is_empty() {
            return Err(RuleError::ConfigError(format!(
                "节点 {} 的 script 不能为空",
                args.node_id
            )));
        }
        Ok(Self {
            config,
            scripts: args.services.scripts.clone(),
        })
    }
}

#[async_trait]
impl NodeHandler for TransformNode {
    async fn handle(&self, ctx: NodeContext, msg: Message) -> Result<()> {
        match self.scripts.evaluate_transform(&msg, &self.config.script) {
            Ok(out) => ctx.tell_success(out).await,
            Err(e) => ctx.tell_failure(msg, &e).await,
        }
    }

    fn get_descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_name: "transform".to_string(),
            name: "转换".to_string(),
            description: "使用脚本转换消息内容".to_string(),
            category: NodeCategory::Filter,
        }
    }
}
