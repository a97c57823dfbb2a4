use crate::types::{Result, RuleError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// 规则链内部流转的消息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub msg_type: String,
    pub metadata: HashMap<String, String>,
    pub data: serde_json::Value,
    pub timestamp: i64,
}

impl Message {
    pub fn new(msg_type: &str, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            msg_type: msg_type.to_string(),
            metadata: HashMap::new(),
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// 消息发起方, 取自 publisher 元数据
    pub fn originator(&self) -> Option<&str> {
        self.metadata.get("publisher").map(String::as_str)
    }
}

/// 传输层投递的消息信封
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub channel: String,
    #[serde(default)]
    pub sub_topic: String,
    #[serde(default)]
    pub publisher: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub created: i64,
}

pub const CHANNELS_PREFIX: &str = "channels";

impl Envelope {
    pub fn new(channel: &str, sub_topic: &str, payload: Vec<u8>) -> Self {
        Self {
            channel: channel.to_string(),
            sub_topic: sub_topic.to_string(),
            publisher: String::new(),
            protocol: String::new(),
            payload,
            created: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_publisher(mut self, publisher: &str) -> Self {
        self.publisher = publisher.to_string();
        self
    }

    /// 发布主题: channels.<channel>[.<sub_topic>]
    pub fn subject(&self) -> String {
        if self.sub_topic.is_empty() {
            format!("{}.{}", CHANNELS_PREFIX, self.channel)
        } else {
            format!("{}.{}.{}", CHANNELS_PREFIX, self.channel, self.sub_topic)
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(raw)
            .map_err(|e| RuleError::Malformed(format!("消息信封解析失败: {}", e)))?;
        if envelope.channel.is_empty() {
            return Err(RuleError::Malformed("消息信封缺少 channel".to_string()));
        }
        Ok(envelope)
    }

    /// 将信封负载解码为内部消息
    pub fn to_message(&self) -> Result<Message> {
        let data: serde_json::Value = serde_json::from_slice(&self.payload)
            .map_err(|e| RuleError::Malformed(format!("消息负载不是合法的JSON: {}", e)))?;

        let mut msg = Message::new("telemetry", data);
        if self.created > 0 {
            msg.timestamp = self.created;
        }
        msg.metadata.insert("channel".into(), self.channel.clone());
        msg.metadata.insert("sub_topic".into(), self.sub_topic.clone());
        if !self.publisher.is_empty() {
            msg.metadata.insert("publisher".into(), self.publisher.clone());
        }
        Ok(msg)
    }
}
