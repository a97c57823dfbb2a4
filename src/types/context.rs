use crate::engine::RuleChainInstance;
use crate::types::{Message, Result, RuleError, FAILURE, SUCCESS};
use std::fmt;
use std::sync::Arc;

/// 节点执行上下文
///
/// 节点通过上下文按标签把消息转发给后继节点, 图本身没有中心调度器。
#[derive(Clone)]
pub struct NodeContext {
    instance: Arc<RuleChainInstance>,
    node_id: String,
    node_type: String,
}

impl NodeContext {
    pub(crate) fn new(instance: Arc<RuleChainInstance>, node_id: &str, node_type: &str) -> Self {
        Self {
            instance,
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn chain_id(&self) -> &str {
        self.instance.id()
    }

    /// 发送消息到指定标签的后继节点, 没有后继时链路在此结束
    ///
    /// # Arguments
    /// * `msg` - 要发送的消息
    /// * `label` - 出边标签, 例如 "Success"
    pub async fn tell_next(&self, msg: Message, label: &str) -> Result<()> {
        self.instance.tell_next(&self.node_id, label, msg).await
    }

    pub async fn tell_success(&self, msg: Message) -> Result<()> {
        self.tell_next(msg, SUCCESS).await
    }

    /// 把错误写入元数据后走 Failure 分支
    pub async fn tell_failure(&self, mut msg: Message, err: &RuleError) -> Result<()> {
        msg.metadata.insert("error".into(), err.to_string());
        self.tell_next(msg, FAILURE).await
    }

    /// 当前节点在指定标签上是否有后继
    pub fn has_route(&self, label: &str) -> bool {
        self.instance.has_route(&self.node_id, label)
    }
}

impl fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext")
            .field("chain_id", &self.instance.id())
            .field("node_id", &self.node_id)
            .field("node_type", &self.node_type)
            .finish()
    }
}
