use crate::service::RuleChainService;
use crate::types::{Envelope, Result, RuleError};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 发布/订阅传输的订阅端, 输出原始消息字节
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, Vec<u8>>>;
}

/// 主题匹配: `*` 匹配一段, `>` 匹配剩余所有段
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut subject_parts = subject.split('.');
    for token in pattern.split('.') {
        match (token, subject_parts.next()) {
            (">", Some(_)) => return true,
            ("*", Some(_)) => {}
            (expected, Some(actual)) if expected == actual => {}
            _ => return false,
        }
    }
    subject_parts.next().is_none()
}

/// 进程内消息代理
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    subscriptions: RwLock<Vec<(String, mpsc::UnboundedSender<Vec<u8>>)>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 发布到主题, 返回收到消息的订阅数
    pub async fn publish(&self, subject: &str, payload: Vec<u8>) -> usize {
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.retain(|(_, tx)| !tx.is_closed());

        let mut delivered = 0;
        for (pattern, tx) in subscriptions.iter() {
            if subject_matches(pattern, subject) && tx.send(payload.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub async fn publish_envelope(&self, envelope: &Envelope) -> Result<usize> {
        Ok(self.publish(&envelope.subject(), envelope.encode()?).await)
    }
}

#[async_trait]
impl Subscriber for InMemoryBroker {
    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, Vec<u8>>> {
        if topic.is_empty() {
            return Err(RuleError::Transport("订阅主题不能为空".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions.write().await.push((topic.to_string(), tx));

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|raw| (raw, rx))
        })
        .boxed())
    }
}

/// 订阅主题并把收到的信封交给服务分发, 流结束时任务退出
pub async fn spawn_subscriber(
    service: Arc<RuleChainService>,
    subscriber: &dyn Subscriber,
    topic: &str,
) -> Result<JoinHandle<()>> {
    let mut stream = subscriber.subscribe(topic).await?;
    info!(topic, "开始订阅");

    Ok(tokio::spawn(async move {
        while let Some(raw) = stream.next().await {
            let envelope = match Envelope::decode(&raw) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(error = %e, "丢弃无法解析的消息");
                    continue;
                }
            };
            if envelope.channel == service.config().self_channel {
                debug!(channel = %envelope.channel, "忽略引擎自身通道的消息");
                continue;
            }
            if let Err(e) = service.save_states(&envelope).await {
                warn!(channel = %envelope.channel, sub_topic = %envelope.sub_topic, error = %e, "消息分发失败");
            }
        }
        info!("订阅流已结束");
    }))
}
