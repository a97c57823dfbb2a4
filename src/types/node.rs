use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const SUCCESS: &str = "Success";
pub const FAILURE: &str = "Failure";
pub const TRUE: &str = "True";
pub const FALSE: &str = "False";

/// 节点类别
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeCategory {
    /// 动作节点 - 日志、属性保存、关系创建
    Action,
    /// 外部节点 - 持有对外连接 (MQTT、REST)
    External,
    /// 过滤/控制节点 - 通过脚本选择出边
    Filter,
}

impl fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeCategory::Action => write!(f, "action"),
            NodeCategory::External => write!(f, "external"),
            NodeCategory::Filter => write!(f, "filter"),
        }
    }
}

/// 规则链负载中的节点定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "empty_config")]
    pub config: Value,
}

fn empty_config() -> Value {
    Value::Object(Default::default())
}

/// 节点之间的带标签连接
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub from_id: String,
    pub to_id: String,
    pub label: String,
}

/// 规则链负载 (图拓扑 + 节点配置)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphPayload {
    #[serde(default)]
    pub first_rule_node_id: Option<String>,
    #[serde(default)]
    pub adaptors: Vec<String>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}
