mod context;
mod descriptor;
mod error;
mod message;
mod node;

pub use context::*;
pub use descriptor::*;
pub use error::*;
pub use message::*;
pub use node::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 规则链持久化状态, 字符串取值需与已存储的定义保持一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleChainStatus {
    Created,
    Started,
    Stopped,
    #[default]
    Unknown,
}

/// 受状态机约束的管理操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOp {
    Update,
    Revoke,
    Start,
    Stop,
}

impl fmt::Display for LifecycleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleOp::Update => "update",
            LifecycleOp::Revoke => "revoke",
            LifecycleOp::Start => "start",
            LifecycleOp::Stop => "stop",
        };
        f.write_str(name)
    }
}

impl RuleChainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleChainStatus::Created => "created",
            RuleChainStatus::Started => "started",
            RuleChainStatus::Stopped => "stopped",
            RuleChainStatus::Unknown => "unknown",
        }
    }

    /// 状态转换表
    pub fn permits(&self, op: LifecycleOp) -> bool {
        match op {
            LifecycleOp::Update | LifecycleOp::Revoke | LifecycleOp::Start => {
                matches!(self, RuleChainStatus::Created | RuleChainStatus::Stopped)
            }
            LifecycleOp::Stop => matches!(self, RuleChainStatus::Started),
        }
    }
}

impl fmt::Display for RuleChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleChainStatus {
    type Err = RuleError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "created" => Ok(RuleChainStatus::Created),
            "started" => Ok(RuleChainStatus::Started),
            "stopped" => Ok(RuleChainStatus::Stopped),
            "unknown" => Ok(RuleChainStatus::Unknown),
            other => Err(RuleError::Malformed(format!("未知的规则链状态: {}", other))),
        }
    }
}

/// 规则链定义 (持久化形式)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RuleChain {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub debug_mode: bool,
    pub user_id: String,
    #[serde(default)]
    pub status: RuleChainStatus,
    /// 节点图描述, 见 [`GraphPayload`]
    #[serde(default)]
    pub payload: Vec<u8>,
    /// 平台级规则链 (否则为租户级)
    #[serde(default)]
    pub root: bool,
    pub channel: String,
    #[serde(default)]
    pub sub_topic: String,
    #[serde(default)]
    pub create_at: i64,
    #[serde(default)]
    pub last_update_at: i64,
}

impl RuleChain {
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(RuleError::Malformed("规则链缺少 id".to_string()));
        }
        if self.user_id.is_empty() {
            return Err(RuleError::Malformed("规则链缺少 owner".to_string()));
        }
        Ok(())
    }

    /// 检查状态是否允许该操作
    pub fn check(&self, op: LifecycleOp) -> Result<()> {
        if self.status.permits(op) {
            Ok(())
        } else {
            Err(RuleError::FailedPrecondition(format!(
                "规则链 {} 处于 {} 状态, 不允许 {}",
                self.id, self.status, op
            )))
        }
    }
}

/// 分页查询结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleChainPage {
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
    pub rule_chains: Vec<RuleChain>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_are_stable() {
        for (status, text) in [
            (RuleChainStatus::Created, "created"),
            (RuleChainStatus::Started, "started"),
            (RuleChainStatus::Stopped, "stopped"),
            (RuleChainStatus::Unknown, "unknown"),
        ] {
            assert_eq!(status.to_string(), text);
            assert_eq!(text.parse::<RuleChainStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::Value::String(text.to_string())
            );
        }
        assert!("running".parse::<RuleChainStatus>().is_err());
    }

    #[test]
    fn transition_table() {
        use LifecycleOp::*;
        use RuleChainStatus::*;

        let expected = [
            (Created, [true, true, true, false]),
            (Started, [false, false, false, true]),
            (Stopped, [true, true, true, false]),
            (Unknown, [false, false, false, false]),
        ];
        for (status, allowed) in expected {
            for (op, ok) in [Update, Revoke, Start, Stop].into_iter().zip(allowed) {
                assert_eq!(status.permits(op), ok, "{} / {}", status, op);
            }
        }
    }

    #[test]
    fn validate_requires_id_and_owner() {
        let mut chain = RuleChain {
            id: "rc1".into(),
            user_id: "u1".into(),
            ..Default::default()
        };
        assert!(chain.validate().is_ok());

        chain.user_id.clear();
        assert!(matches!(chain.validate(), Err(RuleError::Malformed(_))));

        chain.user_id = "u1".into();
        chain.id.clear();
        assert!(matches!(chain.validate(), Err(RuleError::Malformed(_))));
    }

    #[test]
    fn check_started_refuses_update() {
        let chain = RuleChain {
            id: "rc1".into(),
            user_id: "u1".into(),
            status: RuleChainStatus::Started,
            ..Default::default()
        };
        assert!(chain.check(LifecycleOp::Update).unwrap_err().is_failed_precondition());
        assert!(chain.check(LifecycleOp::Stop).is_ok());
    }
}
