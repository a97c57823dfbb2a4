use crate::engine::{Compiler, RuleChainInstance};
use crate::types::{Result, RuleChain, RuleError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct Registry {
    /// 正在运行的规则链
    running: HashMap<String, Arc<RuleChainInstance>>,
    /// 外部适配器 id -> 消费其数据的规则链 id
    adaptors: HashMap<String, Vec<String>>,
}

impl Registry {
    fn remove(&mut self, id: &str) -> Option<Arc<RuleChainInstance>> {
        let instance = self.running.remove(id)?;
        for adaptor in instance.adaptors() {
            if let Some(ids) = self.adaptors.get_mut(adaptor) {
                ids.retain(|chain_id| chain_id != id);
                if ids.is_empty() {
                    self.adaptors.remove(adaptor);
                }
            }
        }
        Some(instance)
    }
}

/// 运行时实例管理器
///
/// 两个映射只在同一把锁下读写, 锁只覆盖映射访问, 编译与节点执行都在锁外进行。
pub struct InstanceManager {
    compiler: Compiler,
    registry: Mutex<Registry>,
}

impl InstanceManager {
    pub fn new(compiler: Compiler) -> Self {
        Self {
            compiler,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    /// 启动规则链, 已在运行时直接返回成功
    pub async fn start_rule_chain(&self, def: &RuleChain) -> Result<()> {
        if self.is_running(&def.id).await {
            debug!(chain_id = %def.id, "规则链已在运行");
            return Ok(());
        }

        let graph = self
            .compiler
            .compile(&def.payload)
            .await
            .map_err(|mut errors| errors.swap_remove(0))?;
        let instance = Arc::new(RuleChainInstance::new(def, graph));

        let raced = {
            let mut registry = self.registry.lock().await;
            if registry.running.contains_key(&def.id) {
                true
            } else {
                for adaptor in instance.adaptors() {
                    let ids = registry.adaptors.entry(adaptor.clone()).or_default();
                    if !ids.contains(&def.id) {
                        ids.push(def.id.clone());
                    }
                }
                registry.running.insert(def.id.clone(), instance.clone());
                false
            }
        };

        if raced {
            // 并发启动时保留先安装的实例
            instance.close().await;
            return Ok(());
        }

        info!(
            chain_id = %def.id,
            channel = %def.channel,
            sub_topic = %def.sub_topic,
            nodes = instance.node_count(),
            "规则链已启动"
        );
        Ok(())
    }

    /// 停止规则链并释放节点持有的连接
    pub async fn stop_rule_chain(&self, def: &RuleChain) -> Result<()> {
        let instance = self
            .registry
            .lock()
            .await
            .remove(&def.id)
            .ok_or_else(|| RuleError::NotFound(format!("规则链 {} 未在运行", def.id)))?;

        instance.close().await;
        info!(chain_id = %def.id, "规则链已停止");
        Ok(())
    }

    /// 删除前保证规则链已停止
    pub async fn delete_rule_chain(&self, def: &RuleChain) -> Result<()> {
        match self.stop_rule_chain(def).await {
            Ok(()) | Err(RuleError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn get_adaptor_rule_chains(&self, adaptor_id: &str) -> Vec<Arc<RuleChainInstance>> {
        let registry = self.registry.lock().await;
        registry
            .adaptors
            .get(adaptor_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| registry.running.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 查找监听 (channel, sub_topic) 的运行实例
    pub async fn matching(&self, channel: &str, sub_topic: &str) -> Vec<Arc<RuleChainInstance>> {
        self.registry
            .lock()
            .await
            .running
            .values()
            .filter(|instance| instance.matches(channel, sub_topic))
            .cloned()
            .collect()
    }

    pub async fn is_running(&self, id: &str) -> bool {
        self.registry.lock().await.running.contains_key(id)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<RuleChainInstance>> {
        self.registry.lock().await.running.get(id).cloned()
    }

    pub async fn running_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.registry.lock().await.running.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::register_builtin;
    use crate::engine::test_support::services;
    use crate::engine::NodeRegistry;
    use serde_json::json;

    async fn manager() -> InstanceManager {
        let registry = Arc::new(NodeRegistry::new(services()));
        register_builtin(&registry).await;
        InstanceManager::new(Compiler::new(registry).unwrap())
    }

    fn chain(id: &str, payload: serde_json::Value) -> RuleChain {
        RuleChain {
            id: id.into(),
            user_id: "u1".into(),
            channel: "c1".into(),
            sub_topic: "t1".into(),
            payload: payload.to_string().into_bytes(),
            ..Default::default()
        }
    }

    fn log_payload() -> serde_json::Value {
        json!({
            "adaptors": ["modbus-1"],
            "nodes": [ { "id": "log", "type": "log", "config": { "template": "hi" } } ]
        })
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let manager = manager().await;
        let def = chain("rc1", log_payload());

        manager.start_rule_chain(&def).await.unwrap();
        let first = manager.get("rc1").await.unwrap();
        manager.start_rule_chain(&def).await.unwrap();
        let second = manager.get("rc1").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.running_ids().await, vec!["rc1".to_string()]);
        assert_eq!(manager.get_adaptor_rule_chains("modbus-1").await.len(), 1);
    }

    #[tokio::test]
    async fn start_with_invalid_payload_registers_nothing() {
        let manager = manager().await;
        let def = chain("rc1", json!({ "nodes": [] }));

        let err = manager.start_rule_chain(&def).await.unwrap_err();
        assert!(matches!(err, RuleError::InvalidGraph(_)));
        assert!(!manager.is_running("rc1").await);
        assert!(manager.get_adaptor_rule_chains("modbus-1").await.is_empty());
    }

    #[tokio::test]
    async fn stop_unknown_is_not_found() {
        let manager = manager().await;
        let err = manager
            .stop_rule_chain(&chain("nope", log_payload()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn stop_removes_instance_and_adaptor_index() {
        let manager = manager().await;
        let def = chain("rc1", log_payload());

        manager.start_rule_chain(&def).await.unwrap();
        manager.stop_rule_chain(&def).await.unwrap();

        assert!(!manager.is_running("rc1").await);
        assert!(manager.matching("c1", "t1").await.is_empty());
        assert!(manager.get_adaptor_rule_chains("modbus-1").await.is_empty());
    }

    #[tokio::test]
    async fn delete_stops_running_chain() {
        let manager = manager().await;
        let def = chain("rc1", log_payload());

        manager.delete_rule_chain(&def).await.unwrap();
        manager.start_rule_chain(&def).await.unwrap();
        manager.delete_rule_chain(&def).await.unwrap();
        assert!(!manager.is_running("rc1").await);
    }

    #[tokio::test]
    async fn matching_requires_channel_and_sub_topic() {
        let manager = manager().await;
        manager.start_rule_chain(&chain("rc1", log_payload())).await.unwrap();

        assert_eq!(manager.matching("c1", "t1").await.len(), 1);
        assert!(manager.matching("c1", "t2").await.is_empty());
        assert!(manager.matching("c2", "t1").await.is_empty());
    }
}
