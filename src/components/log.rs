use crate::components::render_template;
use crate::engine::{NodeArgs, NodeHandler};
use crate::types::{Message, NodeCategory, NodeContext, NodeDescriptor, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// 为空时输出整条消息
    #[serde(default)]
    pub template: Option<String>,
}

#[derive(Debug)]
pub struct LogNode {
    config: LogConfig,
}

impl LogNode {
    pub fn new(config: LogConfig) -> Self {
        Self { config }
    }

    pub fn from_args(args: &NodeArgs) -> Result<Self> {
        Ok(Self::new(args.parse_config()?))
    }

    fn format_message(&self, msg: &Message) -> String {
        match &self.config.template {
            Some(template) => render_template(template, msg),
            None => format!("[{}] {}", msg.msg_type, msg.data),
        }
    }
}

#[async_trait]
impl NodeHandler for LogNode {
    async fn handle(&self, ctx: NodeContext, msg: Message) -> Result<()> {
        info!(
            chain_id = ctx.chain_id(),
            node_id = ctx.node_id(),
            msg_id = %msg.id,
            "{}",
            self.format_message(&msg)
        );
        ctx.tell_success(msg).await
    }

    fn get_descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_name: "log".to_string(),
            name: "日志节点".to_string(),
            description: "输出格式化日志".to_string(),
            category: NodeCategory::Action,
        }
    }
}
