use crate::engine::instance::panic_message;
use crate::engine::{InstanceManager, RuleChainInstance};
use crate::metrics;
use crate::types::{Message, RuleError};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// 一次遍历以错误结束的记录
#[derive(Debug, Clone, PartialEq)]
pub struct NodeFailure {
    pub chain_id: String,
    pub node_id: String,
    pub node_type: String,
    pub msg_id: Uuid,
    pub error: String,
}

/// 遍历错误的汇报通道: 日志 + 计数 + 有界通道
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    tx: mpsc::Sender<NodeFailure>,
    failures: Arc<AtomicU64>,
}

impl ErrorReporter {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<NodeFailure>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                failures: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn report(&self, failure: NodeFailure) {
        warn!(
            chain_id = %failure.chain_id,
            node_id = %failure.node_id,
            node_type = %failure.node_type,
            msg_id = %failure.msg_id,
            error = %failure.error,
            "规则链遍历失败"
        );
        metrics::record_node_error(&failure.node_type);
        self.failures.fetch_add(1, Ordering::Relaxed);

        match self.tx.try_send(failure) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                debug!(chain_id = %dropped.chain_id, "错误通道已满, 丢弃记录");
            }
            // 没有消费者时只保留日志和计数
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// 累计失败次数
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// 消息分发器
///
/// 每个匹配的实例在独立任务中从入口节点开始遍历; 分发器只等待工作池许可, 不等待遍历完成。
pub struct Dispatcher {
    manager: Arc<InstanceManager>,
    permits: Arc<Semaphore>,
    reporter: ErrorReporter,
}

impl Dispatcher {
    pub fn new(manager: Arc<InstanceManager>, pool_size: usize, reporter: ErrorReporter) -> Self {
        Self {
            manager,
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
            reporter,
        }
    }

    pub fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    /// 分发到监听 (channel, sub_topic) 的所有实例, 返回匹配数量
    pub async fn dispatch(&self, channel: &str, sub_topic: &str, msg: Message) -> usize {
        let instances = self.manager.matching(channel, sub_topic).await;
        if instances.is_empty() {
            debug!(channel, sub_topic, "没有匹配的规则链");
        }
        self.spawn_all(instances, msg).await
    }

    /// 把外部适配器的数据分发到订阅它的所有实例
    pub async fn dispatch_adaptor(&self, adaptor_id: &str, msg: Message) -> usize {
        let instances = self.manager.get_adaptor_rule_chains(adaptor_id).await;
        self.spawn_all(instances, msg).await
    }

    async fn spawn_all(&self, instances: Vec<Arc<RuleChainInstance>>, msg: Message) -> usize {
        let mut spawned = 0;
        for instance in instances {
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    error!("工作池已关闭");
                    break;
                }
            };
            tokio::spawn(traverse(
                instance,
                msg.clone(),
                self.reporter.clone(),
                permit,
            ));
            metrics::record_dispatch();
            spawned += 1;
        }
        spawned
    }
}

async fn traverse(
    instance: Arc<RuleChainInstance>,
    msg: Message,
    reporter: ErrorReporter,
    _permit: OwnedSemaphorePermit,
) {
    let chain_id = instance.id().to_string();
    let entry = instance.first_rule_node_id().to_string();
    let entry_type = instance
        .node(&entry)
        .map(|n| n.type_name.clone())
        .unwrap_or_default();
    let msg_id = msg.id;

    let result = AssertUnwindSafe(instance.on_msg(msg)).catch_unwind().await;

    let failure = match result {
        Ok(Ok(())) => {
            debug!(chain_id = %chain_id, msg_id = %msg_id, "规则链遍历完成");
            return;
        }
        Ok(Err(RuleError::NodeFailed {
            node_id,
            node_type,
            reason,
        })) => NodeFailure {
            chain_id,
            node_id,
            node_type,
            msg_id,
            error: reason,
        },
        Ok(Err(e)) => NodeFailure {
            chain_id,
            node_id: entry,
            node_type: entry_type,
            msg_id,
            error: e.to_string(),
        },
        // 节点自身的 panic 已在 execute_node 中转换, 这里只剩拦截器等外围代码
        Err(panic) => NodeFailure {
            chain_id,
            node_id: entry,
            node_type: entry_type,
            msg_id,
            error: format!("panic: {}", panic_message(&*panic)),
        },
    };
    reporter.report(failure);
}
