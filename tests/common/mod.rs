#![allow(dead_code)]

use async_trait::async_trait;
use rulechain_rs::components::register_builtin;
use rulechain_rs::engine::{NodeArgs, NodeFailure, NodeHandler, NodeRegistry, NodeServices};
use rulechain_rs::service::{
    InMemoryBroker, InMemoryRuleChainCache, InMemoryRuleChainRepository, RuleChainCache,
    RuleChainRepository, StaticAuthN,
};
use rulechain_rs::{
    EngineConfig, Message, NodeCategory, NodeContext, NodeDescriptor, Result, RuleChain,
    RuleChainPage, RuleChainService, RuleChainStatus, RuleEngine, RuleError,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const TOKEN: &str = "token-u1";
pub const USER: &str = "u1";
pub const OTHER_TOKEN: &str = "token-u2";

/// recorder 节点收到的一条消息
#[derive(Debug, Clone)]
pub struct Hit {
    pub chain_id: String,
    pub node_id: String,
    pub msg: Message,
}

#[derive(Debug)]
struct Recorder {
    tx: mpsc::UnboundedSender<Hit>,
}

#[async_trait]
impl NodeHandler for Recorder {
    async fn handle(&self, ctx: NodeContext, msg: Message) -> Result<()> {
        let _ = self.tx.send(Hit {
            chain_id: ctx.chain_id().to_string(),
            node_id: ctx.node_id().to_string(),
            msg: msg.clone(),
        });
        ctx.tell_success(msg).await
    }

    fn get_descriptor(&self) -> NodeDescriptor {
        descriptor("recorder")
    }
}

#[derive(Debug)]
struct Panicking;

#[async_trait]
impl NodeHandler for Panicking {
    async fn handle(&self, _ctx: NodeContext, _msg: Message) -> Result<()> {
        panic!("node exploded");
    }

    fn get_descriptor(&self) -> NodeDescriptor {
        descriptor("panic")
    }
}

#[derive(Debug)]
struct Failing;

#[async_trait]
impl NodeHandler for Failing {
    async fn handle(&self, _ctx: NodeContext, _msg: Message) -> Result<()> {
        Err(RuleError::NodeExecutionError("always fails".to_string()))
    }

    fn get_descriptor(&self) -> NodeDescriptor {
        descriptor("fail")
    }
}

fn descriptor(type_name: &str) -> NodeDescriptor {
    NodeDescriptor {
        type_name: type_name.to_string(),
        name: type_name.to_string(),
        description: String::new(),
        category: NodeCategory::Action,
    }
}

/// 可以让 update 失败、让 retrieve 变慢并统计调用次数的存储
#[derive(Debug, Default)]
pub struct RecordingRepository {
    inner: InMemoryRuleChainRepository,
    pub fail_updates: AtomicBool,
    pub updates: AtomicUsize,
    pub retrieve_delay_ms: AtomicU64,
}

#[async_trait]
impl RuleChainRepository for RecordingRepository {
    async fn save(&self, chain: RuleChain) -> Result<RuleChain> {
        self.inner.save(chain).await
    }

    async fn update(&self, chain: RuleChain) -> Result<RuleChain> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(RuleError::Repository("database unavailable".to_string()));
        }
        self.inner.update(chain).await
    }

    async fn retrieve(&self, user_id: &str, id: &str) -> Result<RuleChain> {
        let delay = self.retrieve_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.retrieve(user_id, id).await
    }

    async fn revoke(&self, user_id: &str, id: &str) -> Result<()> {
        self.inner.revoke(user_id, id).await
    }

    async fn list(&self, user_id: &str, offset: u64, limit: u64) -> Result<RuleChainPage> {
        self.inner.list(user_id, offset, limit).await
    }

    async fn retrieve_by_status(&self, status: RuleChainStatus) -> Result<Vec<RuleChain>> {
        self.inner.retrieve_by_status(status).await
    }
}

/// 所有操作都失败的缓存
#[derive(Debug, Default)]
pub struct BrokenCache;

#[async_trait]
impl RuleChainCache for BrokenCache {
    async fn save(&self, _key: &str, _id: &str) -> Result<()> {
        Err(RuleError::Cache("cache offline".to_string()))
    }

    async fn id(&self, _key: &str) -> Result<String> {
        Err(RuleError::Cache("cache offline".to_string()))
    }

    async fn remove(&self, _id: &str) -> Result<()> {
        Err(RuleError::Cache("cache offline".to_string()))
    }
}

pub struct Harness {
    pub service: Arc<RuleChainService>,
    pub repository: Arc<RecordingRepository>,
    pub broker: Arc<InMemoryBroker>,
    pub hits: mpsc::UnboundedReceiver<Hit>,
    pub failures: mpsc::Receiver<NodeFailure>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_cache(Arc::new(InMemoryRuleChainCache::new())).await
    }

    pub async fn with_cache(cache: Arc<dyn RuleChainCache>) -> Self {
        let config = EngineConfig::default();
        let registry = Arc::new(NodeRegistry::new(NodeServices::in_memory(&config)));
        register_builtin(&registry).await;

        let (tx, hits) = mpsc::unbounded_channel();
        registry
            .register(
                NodeCategory::Action,
                "recorder",
                Arc::new(move |_args: NodeArgs| {
                    let tx = tx.clone();
                    Box::pin(async move { Ok(Arc::new(Recorder { tx }) as Arc<dyn NodeHandler>) })
                }),
            )
            .await;
        registry
            .register(
                NodeCategory::Action,
                "panic",
                Arc::new(|_args: NodeArgs| {
                    Box::pin(async { Ok(Arc::new(Panicking) as Arc<dyn NodeHandler>) })
                }),
            )
            .await;
        registry
            .register(
                NodeCategory::Action,
                "fail",
                Arc::new(|_args: NodeArgs| {
                    Box::pin(async { Ok(Arc::new(Failing) as Arc<dyn NodeHandler>) })
                }),
            )
            .await;

        let (engine, failures) =
            RuleEngine::with_registry(&config, registry).expect("engine should build");
        let repository = Arc::new(RecordingRepository::default());
        let auth = StaticAuthN::new()
            .with_token(TOKEN, USER)
            .with_token(OTHER_TOKEN, "u2");
        let service = Arc::new(RuleChainService::new(
            Arc::new(engine),
            repository.clone(),
            cache,
            Arc::new(auth),
            config,
        ));

        Self {
            service,
            repository,
            broker: Arc::new(InMemoryBroker::new()),
            hits,
            failures,
        }
    }

    /// 等待下一条 recorder 消息, 超时返回 None
    pub async fn next_hit(&mut self, wait: Duration) -> Option<Hit> {
        tokio::time::timeout(wait, self.hits.recv()).await.ok().flatten()
    }

    pub async fn next_failure(&mut self, wait: Duration) -> Option<NodeFailure> {
        tokio::time::timeout(wait, self.failures.recv())
            .await
            .ok()
            .flatten()
    }
}

pub fn chain(id: &str, channel: &str, sub_topic: &str, payload: Value) -> RuleChain {
    RuleChain {
        id: id.to_string(),
        name: format!("chain-{}", id),
        channel: channel.to_string(),
        sub_topic: sub_topic.to_string(),
        payload: payload.to_string().into_bytes(),
        ..Default::default()
    }
}

/// log 节点, Success 与 Failure 都接到终止的 recorder 节点
pub fn log_payload() -> Value {
    json!({
        "nodes": [
            {"id": "log", "type": "log", "config": {"template": "temperature=${msg.temperature}"}},
            {"id": "end", "type": "recorder"}
        ],
        "connections": [
            {"from_id": "log", "to_id": "end", "label": "Success"},
            {"from_id": "log", "to_id": "end", "label": "Failure"}
        ]
    })
}

pub fn single_node_payload(type_name: &str) -> Value {
    json!({"nodes": [{"id": "n1", "type": type_name}]})
}

pub const SHORT: Duration = Duration::from_millis(200);
pub const LONG: Duration = Duration::from_secs(5);
