use crate::components::render_template;
use crate::engine::{NodeArgs, NodeHandler};
use crate::types::{Message, NodeCategory, NodeContext, NodeDescriptor, Result, RuleError};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

fn default_method() -> String {
    "POST".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestClientConfig {
    /// 支持 ${...} 模板变量
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// 不设置时使用引擎配置的 http_timeout_ms
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// 调用外部 REST 接口, 响应作为新的消息数据
#[derive(Debug)]
pub struct RestClientNode {
    config: RestClientConfig,
    method: Method,
    client: Client,
}

impl RestClientNode {
    pub fn from_args(args: &NodeArgs) -> Result<Self> {
        let config: RestClientConfig = args.parse_config()?;
        if config.url.is_empty() {
            return Err(RuleError::ConfigError(format!(
                "节点 {} 的 url 不能为空",
                args.node_id
            )));
        }
        let method = Method::from_bytes(config.method.to_uppercase().as_bytes())
            .map_err(|_| RuleError::ConfigError(format!("无效的 HTTP 方法: {}", config.method)))?;
        let timeout = config
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(args.services.http_timeout);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RuleError::ConfigError(format!("HTTP 客户端创建失败: {}", e)))?;

        Ok(Self {
            config,
            method,
            client,
        })
    }

    async fn make_request(&self, msg: &Message) -> Result<Value> {
        let url = render_template(&self.config.url, msg);
        let mut request = self.client.request(self.method.clone(), &url);

        for (key, value) in &self.config.headers {
            request = request.header(key, render_template(value, msg));
        }

        // POST/PUT/PATCH 把消息数据作为请求体
        if [Method::POST, Method::PUT, Method::PATCH].contains(&self.method) {
            request = request.json(&msg.data);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RuleError::NodeExecutionError(format!("HTTP请求失败: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RuleError::NodeExecutionError(format!("响应读取失败: {}", e)))?;
        if !status.is_success() {
            return Err(RuleError::NodeExecutionError(format!(
                "HTTP请求返回错误状态码: {}",
                status
            )));
        }

        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        Ok(serde_json::json!({
            "status": status.as_u16(),
            "body": body,
        }))
    }
}

#[async_trait]
impl NodeHandler for RestClientNode {
    async fn handle(&self, ctx: NodeContext, mut msg: Message) -> Result<()> {
        match self.make_request(&msg).await {
            Ok(response) => {
                debug!(node_id = ctx.node_id(), url = %self.config.url, "请求成功");
                msg.data = response;
                msg.msg_type = "http_response".to_string();
                ctx.tell_success(msg).await
            }
            Err(e) => ctx.tell_failure(msg, &e).await,
        }
    }

    fn get_descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_name: "rest_api_call".to_string(),
            name: "HTTP客户端".to_string(),
            description: "发送HTTP请求,支持成功/失败分支路由".to_string(),
            category: NodeCategory::External,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::{registry_with_recorder, run_once, services};
    use serde_json::json;

    fn args(config: Value) -> NodeArgs {
        NodeArgs {
            node_id: "r1".into(),
            config,
            services: services(),
        }
    }

    #[test]
    fn method_defaults_to_post_and_is_validated() {
        let node = RestClientNode::from_args(&args(json!({"url": "http://localhost"}))).unwrap();
        assert_eq!(node.method, Method::POST);

        let node =
            RestClientNode::from_args(&args(json!({"url": "http://localhost", "method": "get"})))
                .unwrap();
        assert_eq!(node.method, Method::GET);

        let err = RestClientNode::from_args(&args(json!({"url": "http://x", "method": "BAD METHOD"})))
            .unwrap_err();
        assert!(matches!(err, RuleError::ConfigError(_)));
    }

    #[tokio::test]
    async fn connection_refused_goes_to_failure() {
        let (registry, mut rx) = registry_with_recorder(services()).await;
        let payload = json!({
            "nodes": [
                {"id": "call", "type": "rest_api_call", "config": {
                    "url": "http://127.0.0.1:1/devices/${metadata.publisher}",
                    "timeout_ms": 500
                }},
                {"id": "err", "type": "recorder"}
            ],
            "connections": [{"from_id": "call", "to_id": "err", "label": "Failure"}]
        });

        run_once(registry, payload, Message::new("telemetry", json!({"v": 1})))
            .await
            .unwrap();

        let (node, msg) = rx.try_recv().unwrap();
        assert_eq!(node, "err");
        assert!(msg.metadata["error"].contains("HTTP请求失败"));
        assert_eq!(msg.data, json!({"v": 1}));
    }
}
