mod create_relation;
mod filter;
mod log;
mod mqtt;
mod rest_client;
mod save_attributes;
mod switch;
mod transform;

pub use create_relation::{CreateRelationConfig, CreateRelationNode, RelationDirection};
pub use filter::{FilterConfig, FilterNode};
pub use log::{LogConfig, LogNode};
pub use mqtt::{MqttConfig, MqttNode};
pub use rest_client::{RestClientConfig, RestClientNode};
pub use save_attributes::{SaveAttributesConfig, SaveAttributesNode};
pub use switch::{SwitchConfig, SwitchNode};
pub use transform::{TransformConfig, TransformNode};

use crate::engine::{NodeArgs, NodeFactory, NodeHandler, NodeRegistry};
use crate::types::{Message, NodeCategory, Result};
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

/// 把异步构造函数包装为注册表使用的工厂
fn factory<F, Fut, N>(create: F) -> NodeFactory
where
    F: Fn(NodeArgs) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<N>> + Send + 'static,
    N: NodeHandler + 'static,
{
    Arc::new(move |args: NodeArgs| -> BoxFuture<'static, Result<Arc<dyn NodeHandler>>> {
        let fut = create(args);
        Box::pin(async move { Ok(Arc::new(fut.await?) as Arc<dyn NodeHandler>) })
    })
}

/// 注册内置组件
pub async fn register_builtin(registry: &NodeRegistry) {
    let factories: Vec<(NodeCategory, &str, NodeFactory)> = vec![
        (
            NodeCategory::Action,
            "log",
            factory(|args| async move { LogNode::from_args(&args) }),
        ),
        (
            NodeCategory::Action,
            "save_attributes",
            factory(|args| async move { SaveAttributesNode::from_args(&args) }),
        ),
        (
            NodeCategory::Action,
            "create_relation",
            factory(|args| async move { CreateRelationNode::from_args(&args) }),
        ),
        (
            NodeCategory::External,
            "mqtt",
            factory(|args| async move { MqttNode::connect(&args).await }),
        ),
        (
            NodeCategory::External,
            "rest_api_call",
            factory(|args| async move { RestClientNode::from_args(&args) }),
        ),
        (
            NodeCategory::Filter,
            "filter",
            factory(|args| async move { FilterNode::from_args(&args) }),
        ),
        (
            NodeCategory::Filter,
            "switch",
            factory(|args| async move { SwitchNode::from_args(&args) }),
        ),
        (
            NodeCategory::Filter,
            "transform",
            factory(|args| async move { TransformNode::from_args(&args) }),
        ),
    ];

    for (category, type_name, factory) in factories {
        registry.register(category, type_name, factory).await;
    }
}

fn value_by_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|part| !part.is_empty())
        .try_fold(data, |current, part| match current {
            Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => current.get(part),
        })
}

/// 替换模板中的 ${...} 变量
///
/// 支持 `${msgId}`、`${msgType}`、`${msg.<路径>}` (消息数据) 和 `${metadata.<键>}`,
/// 找不到的变量替换为空串。
pub(crate) fn render_template(template: &str, msg: &Message) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        let Some(end) = rest[start..].find('}') else {
            break;
        };
        result.push_str(&rest[..start]);
        let var_path = &rest[start + 2..start + end];

        let replacement = match var_path {
            "msgId" => msg.id.to_string(),
            "msgType" => msg.msg_type.clone(),
            "msg" => msg.data.to_string(),
            _ => {
                if let Some(path) = var_path.strip_prefix("msg.") {
                    match value_by_path(&msg.data, path) {
                        Some(Value::String(s)) => s.clone(),
                        Some(other) => other.to_string(),
                        None => String::new(),
                    }
                } else if let Some(key) = var_path.strip_prefix("metadata.") {
                    msg.metadata.get(key).cloned().unwrap_or_default()
                } else {
                    String::new()
                }
            }
        };

        result.push_str(&replacement);
        rest = &rest[start + end + 1..];
    }

    result.push_str(rest);
    result
}
