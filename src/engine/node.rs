use crate::engine::{AttributeStore, RelationStore, ScriptEngine};
use crate::types::{Message, NodeCategory, NodeContext, NodeDescriptor, Result, RuleError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// 节点处理器特征,定义了节点的核心处理逻辑
#[async_trait]
pub trait NodeHandler: Send + Sync + fmt::Debug {
    /// 处理消息, 成功时由节点自己通过 `ctx` 调用后继节点
    ///
    /// # Arguments
    /// * `ctx` - 节点执行上下文
    /// * `msg` - 输入消息
    async fn handle(&self, ctx: NodeContext, msg: Message) -> Result<()>;

    /// 获取节点描述符
    fn get_descriptor(&self) -> NodeDescriptor;

    /// 规则链停止或删除时释放外部连接
    async fn close(&self) {}
}

/// 节点工厂的公共依赖
#[derive(Debug, Clone)]
pub struct NodeServices {
    pub scripts: Arc<dyn ScriptEngine>,
    pub attributes: Arc<dyn AttributeStore>,
    pub relations: Arc<dyn RelationStore>,
    pub mqtt_connect_timeout: Duration,
    pub http_timeout: Duration,
}

/// 工厂创建节点时的入参
#[derive(Debug, Clone)]
pub struct NodeArgs {
    pub node_id: String,
    pub config: serde_json::Value,
    pub services: NodeServices,
}

impl NodeArgs {
    /// 按节点自己的配置结构解析, 失败时带上节点 id
    pub fn parse_config<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.config.clone()).map_err(|e| {
            RuleError::ConfigError(format!("节点 {} 配置解析失败: {}", self.node_id, e))
        })
    }
}

/// 节点工厂函数类型; 外部节点需要在构造时建立连接, 因此是异步的
pub type NodeFactory =
    Arc<dyn Fn(NodeArgs) -> BoxFuture<'static, Result<Arc<dyn NodeHandler>>> + Send + Sync>;

struct Registration {
    category: NodeCategory,
    factory: NodeFactory,
}

/// 节点注册表,管理所有已注册的节点类型
pub struct NodeRegistry {
    registrations: RwLock<HashMap<String, Registration>>,
    services: NodeServices,
}

impl NodeRegistry {
    pub fn new(services: NodeServices) -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            services,
        }
    }

    /// 注册节点类型, 同名注册会覆盖旧的工厂
    pub async fn register(&self, category: NodeCategory, type_name: &str, factory: NodeFactory) {
        let replaced = self
            .registrations
            .write()
            .await
            .insert(type_name.to_string(), Registration { category, factory });
        if replaced.is_some() {
            tracing::warn!(node_type = type_name, "节点类型被重新注册");
        }
    }

    /// 根据节点类型和配置创建节点实例
    pub async fn create(
        &self,
        type_name: &str,
        node_id: &str,
        config: serde_json::Value,
    ) -> Result<Arc<dyn NodeHandler>> {
        let factory = {
            let registrations = self.registrations.read().await;
            registrations
                .get(type_name)
                .map(|r| r.factory.clone())
                .ok_or_else(|| RuleError::HandlerNotFound(type_name.to_string()))?
        };

        factory(NodeArgs {
            node_id: node_id.to_string(),
            config,
            services: self.services.clone(),
        })
        .await
    }

    pub async fn category(&self, type_name: &str) -> Option<NodeCategory> {
        self.registrations
            .read()
            .await
            .get(type_name)
            .map(|r| r.category)
    }

    /// 获取所有已注册的节点类型名称及类别
    pub async fn get_registered_types(&self) -> Vec<(String, NodeCategory)> {
        let mut types: Vec<_> = self
            .registrations
            .read()
            .await
            .iter()
            .map(|(name, r)| (name.clone(), r.category))
            .collect();
        types.sort_by(|a, b| a.0.cmp(&b.0));
        types
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("registrations", &"<node factories>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::services;
    use serde_json::json;

    #[derive(Debug)]
    struct Noop;

    #[async_trait]
    impl NodeHandler for Noop {
        async fn handle(&self, _ctx: NodeContext, _msg: Message) -> Result<()> {
            Ok(())
        }

        fn get_descriptor(&self) -> NodeDescriptor {
            NodeDescriptor {
                type_name: "noop".into(),
                name: "noop".into(),
                description: String::new(),
                category: NodeCategory::Action,
            }
        }
    }

    #[tokio::test]
    async fn create_unknown_type_fails() {
        let registry = NodeRegistry::new(services());
        let err = registry.create("missing", "n1", json!({})).await.unwrap_err();
        assert!(matches!(err, RuleError::HandlerNotFound(t) if t == "missing"));
    }

    #[tokio::test]
    async fn create_passes_node_id_to_factory() {
        let registry = NodeRegistry::new(services());
        registry
            .register(
                NodeCategory::Action,
                "noop",
                Arc::new(|args: NodeArgs| {
                    Box::pin(async move {
                        if args.node_id != "n7" {
                            return Err(RuleError::ConfigError(args.node_id));
                        }
                        Ok(Arc::new(Noop) as Arc<dyn NodeHandler>)
                    })
                }),
            )
            .await;

        assert!(registry.create("noop", "n7", json!({})).await.is_ok());
        assert!(registry.create("noop", "n8", json!({})).await.is_err());
        assert_eq!(registry.category("noop").await, Some(NodeCategory::Action));
    }

    #[tokio::test]
    async fn registered_types_are_sorted_by_name() {
        let registry = NodeRegistry::new(services());
        for (category, name) in [
            (NodeCategory::Filter, "switch"),
            (NodeCategory::External, "mqtt"),
            (NodeCategory::Action, "log"),
        ] {
            registry
                .register(
                    category,
                    name,
                    Arc::new(|_args: NodeArgs| {
                        Box::pin(async { Ok(Arc::new(Noop) as Arc<dyn NodeHandler>) })
                    }),
                )
                .await;
        }

        assert_eq!(
            registry.get_registered_types().await,
            vec![
                ("log".to_string(), NodeCategory::Action),
                ("mqtt".to_string(), NodeCategory::External),
                ("switch".to_string(), NodeCategory::Filter),
            ]
        );
    }
}
