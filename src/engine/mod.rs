mod compiler;
mod dispatcher;
mod instance;
mod manager;
mod node;
mod script;
mod store;

pub use compiler::*;
pub use dispatcher::*;
pub use instance::*;
pub use manager::*;
pub use node::*;
pub use script::*;
pub use store::*;

use crate::components::register_builtin;
use crate::config::EngineConfig;
use crate::types::{Message, NodeDescriptor, Result};
use std::sync::Arc;
use tokio::sync::mpsc;

/// 规则引擎: 节点注册表 + 实例管理器 + 分发器
pub struct RuleEngine {
    registry: Arc<NodeRegistry>,
    manager: Arc<InstanceManager>,
    dispatcher: Dispatcher,
}

impl RuleEngine {
    /// 创建引擎并注册内置组件, 返回遍历错误的接收端
    pub async fn new(
        config: &EngineConfig,
        services: NodeServices,
    ) -> Result<(Self, mpsc::Receiver<NodeFailure>)> {
        let registry = Arc::new(NodeRegistry::new(services));
        register_builtin(&registry).await;
        Self::with_registry(config, registry)
    }

    /// 使用外部提供的注册表 (可包含自定义节点类型)
    pub fn with_registry(
        config: &EngineConfig,
        registry: Arc<NodeRegistry>,
    ) -> Result<(Self, mpsc::Receiver<NodeFailure>)> {
        let manager = Arc::new(InstanceManager::new(Compiler::new(registry.clone())?));
        let (reporter, failures) = ErrorReporter::new(config.error_channel_capacity);
        let dispatcher = Dispatcher::new(manager.clone(), config.worker_pool_size, reporter);

        Ok((
            Self {
                registry,
                manager,
                dispatcher,
            },
            failures,
        ))
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn manager(&self) -> &Arc<InstanceManager> {
        &self.manager
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn dispatch(&self, channel: &str, sub_topic: &str, msg: Message) -> usize {
        self.dispatcher.dispatch(channel, sub_topic, msg).await
    }

    /// 获取所有已注册的组件类型
    pub async fn get_registered_components(&self) -> Vec<NodeDescriptor> {
        self.registry
            .get_registered_types()
            .await
            .into_iter()
            .map(|(type_name, category)| NodeDescriptor {
                name: type_name.clone(),
                description: format!("{} node", category),
                type_name,
                category,
            })
            .collect()
    }
}

impl NodeServices {
    /// 使用内存存储和 QuickJS 脚本引擎
    pub fn in_memory(config: &EngineConfig) -> Self {
        Self {
            scripts: Arc::new(QuickJsEngine::new()),
            attributes: Arc::new(InMemoryAttributeStore::new()),
            relations: Arc::new(InMemoryRelationStore::new()),
            mqtt_connect_timeout: config.mqtt_connect_timeout(),
            http_timeout: config.http_timeout(),
        }
    }
}
