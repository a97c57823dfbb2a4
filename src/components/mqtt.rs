use crate::components::render_template;
use crate::engine::{NodeArgs, NodeHandler};
use crate::types::{Message, NodeCategory, NodeContext, NodeDescriptor, Result, RuleError};
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// close 时等待 DISCONNECT 发出的最长时间
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// 例如 mqtt://127.0.0.1:1883
    pub broker: String,
    /// 发布主题模板
    pub topic: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub retain: bool,
}

impl MqttConfig {
    fn qos(&self) -> QoS {
        match self.qos {
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtMostOnce,
        }
    }

    fn options(&self, node_id: &str) -> Result<MqttOptions> {
        let url = Url::parse(&self.broker)
            .map_err(|e| RuleError::ConfigError(format!("无效的 broker 地址 {}: {}", self.broker, e)))?;
        if !matches!(url.scheme(), "mqtt" | "tcp") {
            return Err(RuleError::ConfigError(format!(
                "不支持的 broker 协议: {}",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| RuleError::ConfigError(format!("broker 地址缺少主机: {}", self.broker)))?;
        let port = url.port().unwrap_or(1883);

        let client_id = self
            .client_id
            .clone()
            .unwrap_or_else(|| format!("rulechain-{}-{}", node_id, uuid::Uuid::new_v4().simple()));
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.clone().unwrap_or_default());
        }
        Ok(options)
    }
}

/// 把消息数据发布到 MQTT broker
///
/// 连接在节点创建时建立, 连不上时规则链编译失败; 规则链停止时断开。
pub struct MqttNode {
    config: MqttConfig,
    client: AsyncClient,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttNode {
    pub async fn connect(args: &NodeArgs) -> Result<Self> {
        let config: MqttConfig = args.parse_config()?;
        if config.topic.is_empty() {
            return Err(RuleError::ConfigError(format!(
                "节点 {} 的 topic 不能为空",
                args.node_id
            )));
        }
        let options = config.options(&args.node_id)?;

        let (client, mut eventloop) = AsyncClient::new(options, 10);
        tokio::time::timeout(
            args.services.mqtt_connect_timeout,
            wait_for_connack(&mut eventloop),
        )
        .await
        .map_err(|_| {
            RuleError::ConnectionError(format!("连接 MQTT broker {} 超时", config.broker))
        })??;
        info!(node_id = %args.node_id, broker = %config.broker, "MQTT 已连接");

        let node_id = args.node_id.clone();
        let driver = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        debug!(node_id = %node_id, "MQTT 已断开");
                        break;
                    }
                    Ok(event) => debug!(node_id = %node_id, ?event, "MQTT 事件"),
                    Err(e) => {
                        warn!(node_id = %node_id, error = %e, "MQTT 连接中断");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(Self {
            config,
            client,
            driver: Mutex::new(Some(driver)),
        })
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<()> {
    loop {
        let event = eventloop
            .poll()
            .await
            .map_err(|e| RuleError::ConnectionError(format!("MQTT 连接失败: {}", e)))?;
        if let Event::Incoming(Packet::ConnAck(ack)) = event {
            if ack.code == ConnectReturnCode::Success {
                return Ok(());
            }
            return Err(RuleError::ConnectionError(format!(
                "MQTT broker 拒绝连接: {:?}",
                ack.code
            )));
        }
    }
}

#[async_trait]
impl NodeHandler for MqttNode {
    async fn handle(&self, ctx: NodeContext, msg: Message) -> Result<()> {
        let topic = render_template(&self.config.topic, &msg);
        let published = match serde_json::to_vec(&msg.data) {
            Ok(payload) => self
                .client
                .publish(topic, self.config.qos(), self.config.retain, payload)
                .await
                .map_err(|e| RuleError::ConnectionError(format!("MQTT 发布失败: {}", e))),
            Err(e) => Err(e.into()),
        };

        match published {
            Ok(()) => ctx.tell_success(msg).await,
            Err(e) => ctx.tell_failure(msg, &e).await,
        }
    }

    fn get_descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_name: "mqtt".to_string(),
            name: "MQTT 发布".to_string(),
            description: "把消息数据发布到 MQTT 主题".to_string(),
            category: NodeCategory::External,
        }
    }

    async fn close(&self) {
        let Some(mut driver) = self.driver.lock().await.take() else {
            return;
        };
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "MQTT 断开失败");
            driver.abort();
            return;
        }
        // 事件循环发出 DISCONNECT 后自行退出
        if tokio::time::timeout(DISCONNECT_GRACE, &mut driver).await.is_err() {
            warn!(broker = %self.config.broker, "等待 MQTT 断开超时");
            driver.abort();
        }
    }
}

impl std::fmt::Debug for MqttNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttNode")
            .field("broker", &self.config.broker)
            .field("topic", &self.config.topic)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::services;
    use serde_json::json;

    fn args(config: serde_json::Value) -> NodeArgs {
        let mut services = services();
        services.mqtt_connect_timeout = Duration::from_millis(500);
        NodeArgs {
            node_id: "m1".into(),
            config,
            services,
        }
    }

    #[test]
    fn options_parse_broker_url() {
        let config: MqttConfig = serde_json::from_value(json!({
            "broker": "mqtt://broker.local:2883",
            "topic": "t",
            "client_id": "c1"
        }))
        .unwrap();
        let options = config.options("m1").unwrap();
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 2883));
        assert_eq!(options.client_id(), "c1");

        let config: MqttConfig =
            serde_json::from_value(json!({"broker": "http://x", "topic": "t"})).unwrap();
        assert!(matches!(config.options("m1"), Err(RuleError::ConfigError(_))));
    }

    #[tokio::test]
    async fn unreachable_broker_fails_construction() {
        let err = MqttNode::connect(&args(json!({
            "broker": "mqtt://127.0.0.1:1",
            "topic": "out"
        })))
        .await
        .unwrap_err();
        assert!(matches!(err, RuleError::ConnectionError(_)));
    }

    #[tokio::test]
    async fn close_sends_disconnect_to_broker() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            // CONNECT
            let _ = socket.read(&mut buf).await.unwrap();
            socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

            let mut received = Vec::new();
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => received.extend_from_slice(&buf[..n]),
                }
            }
            received
        });

        let node = MqttNode::connect(&args(json!({
            "broker": format!("mqtt://127.0.0.1:{}", port),
            "topic": "out"
        })))
        .await
        .unwrap();
        node.close().await;
        assert!(node.driver.lock().await.is_none());

        let received = tokio::time::timeout(Duration::from_secs(5), broker)
            .await
            .unwrap()
            .unwrap();
        assert!(
            received.windows(2).any(|w| w == [0xE0, 0x00]),
            "no DISCONNECT in {:?}",
            received
        );
    }

    #[tokio::test]
    async fn empty_topic_is_config_error() {
        let err = MqttNode::connect(&args(json!({"broker": "mqtt://127.0.0.1:1883", "topic": ""})))
            .await
            .unwrap_err();
        assert!(matches!(err, RuleError::ConfigError(_)));
    }
}
