use crate::aop::{InterceptorManager, LoggingInterceptor};
use crate::engine::{CompiledGraph, NodeHandler};
use crate::types::{Message, NodeContext, Result, RuleChain, RuleError};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// 编译后的节点: 处理器 + 标签到后继节点的映射
pub struct RuleNode {
    pub id: String,
    pub type_name: String,
    pub handler: Arc<dyn NodeHandler>,
    pub routes: HashMap<String, Vec<String>>,
}

impl fmt::Debug for RuleNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleNode")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("routes", &self.routes)
            .finish()
    }
}

/// 规则链运行时实例, 只由实例管理器持有
pub struct RuleChainInstance {
    id: String,
    name: String,
    channel: String,
    sub_topic: String,
    first_rule_node_id: String,
    nodes: HashMap<String, RuleNode>,
    adaptors: Vec<String>,
    interceptors: InterceptorManager,
}

impl RuleChainInstance {
    pub fn new(def: &RuleChain, graph: CompiledGraph) -> Self {
        let mut interceptors = InterceptorManager::new();
        if def.debug_mode {
            interceptors.register_node_interceptor(Arc::new(LoggingInterceptor));
        }

        Self {
            id: def.id.clone(),
            name: def.name.clone(),
            channel: def.channel.clone(),
            sub_topic: def.sub_topic.clone(),
            first_rule_node_id: graph.first_rule_node_id,
            nodes: graph.nodes,
            adaptors: graph.adaptors,
            interceptors,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn sub_topic(&self) -> &str {
        &self.sub_topic
    }

    pub fn first_rule_node_id(&self) -> &str {
        &self.first_rule_node_id
    }

    pub fn adaptors(&self) -> &[String] {
        &self.adaptors
    }

    pub fn node(&self, id: &str) -> Option<&RuleNode> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn matches(&self, channel: &str, sub_topic: &str) -> bool {
        self.channel == channel && self.sub_topic == sub_topic
    }

    pub(crate) fn has_route(&self, node_id: &str, label: &str) -> bool {
        self.nodes
            .get(node_id)
            .and_then(|n| n.routes.get(label))
            .is_some_and(|targets| !targets.is_empty())
    }

    /// 从入口节点开始遍历
    pub async fn on_msg(self: Arc<Self>, msg: Message) -> Result<()> {
        let entry = self.first_rule_node_id.clone();
        self.execute_node(&entry, msg).await
    }

    pub(crate) async fn execute_node(self: &Arc<Self>, node_id: &str, msg: Message) -> Result<()> {
        let node = self
            .nodes
            .get(node_id)
            .ok_or_else(|| RuleError::InvalidGraph(format!("节点 {} 不存在", node_id)))?;
        let ctx = NodeContext::new(self.clone(), &node.id, &node.type_name);

        self.interceptors.before_node(&ctx, &msg).await?;

        // 节点 panic 按该节点的错误处理
        let result = AssertUnwindSafe(node.handler.handle(ctx.clone(), msg))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(RuleError::NodeExecutionError(format!(
                    "panic: {}",
                    panic_message(&*panic)
                )))
            });

        match result {
            Ok(()) => {
                self.interceptors.after_node(&ctx).await?;
                Ok(())
            }
            Err(e) => {
                self.interceptors.node_error(&ctx, &e).await?;
                // 只在出错的节点处包装一次, 上游节点原样传递
                Err(match e {
                    failed @ RuleError::NodeFailed { .. } => failed,
                    other => RuleError::NodeFailed {
                        node_id: node.id.clone(),
                        node_type: node.type_name.clone(),
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    /// 按标签依次执行后继节点, 没有后继时链路结束
    pub(crate) async fn tell_next(self: &Arc<Self>, from: &str, label: &str, msg: Message) -> Result<()> {
        let targets = match self.nodes.get(from).and_then(|n| n.routes.get(label)) {
            Some(targets) if !targets.is_empty() => targets,
            _ => return Ok(()),
        };

        for target in targets {
            let next: futures::future::BoxFuture<'_, Result<()>> =
                Box::pin(self.execute_node(target, msg.clone()));
            next.await?;
        }
        Ok(())
    }

    /// 释放所有节点持有的外部连接
    pub async fn close(&self) {
        for node in self.nodes.values() {
            node.handler.close().await;
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown".to_string()
    }
}

impl fmt::Debug for RuleChainInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleChainInstance")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("sub_topic", &self.sub_topic)
            .field("first_rule_node_id", &self.first_rule_node_id)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}
