use crate::engine::{NodeArgs, NodeHandler, ScriptEngine};
use crate::types::{Message, NodeCategory, NodeContext, NodeDescriptor, Result, RuleError};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct SwitchConfig {
    /// 返回出边标签 (或标签数组) 的脚本
    pub script: String,
}

#[derive(Debug)]
pub struct SwitchNode {
    config: SwitchConfig,
    scripts: Arc<dyn ScriptEngine>,
}

impl SwitchNode {
    pub fn from_args(args: &NodeArgs) -> Result<Self> {
        let config: SwitchConfig = args.parse_config()?;
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
impl NodeHandler for SwitchNode {
    async fn handle(&self, ctx: NodeContext, msg: Message) -> Result<()> {
        let labels = match self.scripts.evaluate_switch(&msg, &self.config.script) {
            Ok(labels) => labels,
            Err(e) => return ctx.tell_failure(msg, &e).await,
        };

        for label in labels {
            if !ctx.has_route(&label) {
                debug!(node_id = ctx.node_id(), label = %label, "标签没有后继节点");
                continue;
            }
            ctx.tell_next(msg.clone(), &label).await?;
        }
        Ok(())
    }

    fn get_descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_name: "switch".to_string(),
            name: "条件分支".to_string(),
            description: "根据脚本返回的标签选择分支".to_string(),
            category: NodeCategory::Filter,
        }
    }
}
