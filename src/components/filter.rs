use crate::engine::{NodeArgs, NodeHandler, ScriptEngine};
use crate::types::{
    Message, NodeCategory, NodeContext, NodeDescriptor, Result, RuleError, FALSE, TRUE,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    /// 返回布尔值的脚本
    pub script: String,
}

/// 根据脚本结果走 True 或 False 分支
#[derive(Debug)]
pub struct FilterNode {
    config: FilterConfig,
    scripts: Arc<dyn ScriptEngine>,
}

impl FilterNode {
    pub fn from_args(args: &NodeArgs) -> Result<Self> {
        let config: FilterConfig = args.parse_config()?;
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
impl NodeHandler for FilterNode {
    async fn handle(&self, ctx: NodeContext, msg: Message) -> Result<()> {
        match self.scripts.evaluate_filter(&msg, &self.config.script) {
            Ok(true) => ctx.tell_next(msg, TRUE).await,
            Ok(false) => ctx.tell_next(msg, FALSE).await,
            Err(e) => ctx.tell_failure(msg, &e).await,
        }
    }

    fn get_descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_name: "filter".to_string(),
            name: "过滤器".to_string(),
            description: "根据脚本条件选择 True/False 分支".to_string(),
            category: NodeCategory::Filter,
        }
    }
}
