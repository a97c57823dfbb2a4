use crate::engine::{NodeHandler, NodeRegistry, RuleNode};
use crate::types::{GraphPayload, Result, RuleError};
use jsonschema::Validator;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// 编译后的节点图
#[derive(Debug)]
pub struct CompiledGraph {
    pub first_rule_node_id: String,
    pub nodes: HashMap<String, RuleNode>,
    pub adaptors: Vec<String>,
}

impl CompiledGraph {
    /// 释放所有节点持有的外部连接
    pub async fn close(&self) {
        for node in self.nodes.values() {
            node.handler.close().await;
        }
    }
}

fn payload_schema() -> Value {
    json!({
        "type": "object",
        "required": ["nodes"],
        "properties": {
            "first_rule_node_id": { "type": ["string", "null"] },
            "adaptors": { "type": "array", "items": { "type": "string", "minLength": 1 } },
            "nodes": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["id", "type"],
                    "properties": {
                        "id": { "type": "string", "minLength": 1 },
                        "type": { "type": "string", "minLength": 1 },
                        "name": { "type": "string" },
                        "config": { "type": "object" }
                    }
                }
            },
            "connections": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["from_id", "to_id", "label"],
                    "properties": {
                        "from_id": { "type": "string" },
                        "to_id": { "type": "string" },
                        "label": { "type": "string", "minLength": 1 }
                    }
                }
            }
        }
    })
}

/// 节点图编译器: 负载 -> 节点实例图
///
/// 编译会报告所有缺陷而不是在第一个错误处停止, 不修改任何运行时状态。
pub struct Compiler {
    registry: Arc<NodeRegistry>,
    schema: Validator,
}

impl Compiler {
    pub fn new(registry: Arc<NodeRegistry>) -> Result<Self> {
        let schema = jsonschema::validator_for(&payload_schema())
            .map_err(|e| RuleError::Config(format!("规则链负载 schema 无效: {}", e)))?;
        Ok(Self { registry, schema })
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub async fn compile(&self, payload: &[u8]) -> std::result::Result<CompiledGraph, Vec<RuleError>> {
        let graph = self.parse(payload)?;
        let mut errors = Vec::new();

        if graph.nodes.is_empty() {
            return Err(vec![RuleError::InvalidGraph("规则链没有定义任何节点".to_string())]);
        }

        // 重复的节点 id
        let mut seen = HashSet::new();
        for node in &graph.nodes {
            if !seen.insert(node.id.as_str()) {
                errors.push(RuleError::InvalidGraph(format!("节点 id 重复: {}", node.id)));
            }
        }

        // 创建节点实例, 外部节点的连接并发建立
        let specs: Vec<_> = {
            let mut unique = HashSet::new();
            graph
                .nodes
                .iter()
                .filter(|n| unique.insert(n.id.as_str()))
                .collect()
        };
        let created = futures::future::join_all(specs.iter().map(|spec| {
            self.registry
                .create(&spec.type_name, &spec.id, spec.config.clone())
        }))
        .await;

        let mut handlers: HashMap<String, (String, Arc<dyn NodeHandler>)> = HashMap::new();
        for (spec, result) in specs.iter().zip(created) {
            match result {
                Ok(handler) => {
                    handlers.insert(spec.id.clone(), (spec.type_name.clone(), handler));
                }
                Err(e) => errors.push(RuleError::InvalidGraph(format!(
                    "节点 {}[{}] 创建失败: {}",
                    spec.id, spec.type_name, e
                ))),
            }
        }

        // 连接必须指向同一图中存在的节点
        let mut routes: HashMap<String, HashMap<String, Vec<String>>> = HashMap::new();
        for conn in &graph.connections {
            let mut valid = true;
            if !seen.contains(conn.from_id.as_str()) {
                errors.push(RuleError::InvalidGraph(format!(
                    "连接 {} -[{}]-> {} 的起始节点不存在",
                    conn.from_id, conn.label, conn.to_id
                )));
                valid = false;
            }
            if !seen.contains(conn.to_id.as_str()) {
                errors.push(RuleError::InvalidGraph(format!(
                    "连接 {} -[{}]-> {} 的目标节点不存在",
                    conn.from_id, conn.label, conn.to_id
                )));
                valid = false;
            }
            if valid {
                let targets = routes
                    .entry(conn.from_id.clone())
                    .or_default()
                    .entry(conn.label.clone())
                    .or_default();
                if !targets.contains(&conn.to_id) {
                    targets.push(conn.to_id.clone());
                }
            }
        }

        let first_rule_node_id = match &graph.first_rule_node_id {
            Some(id) if !seen.contains(id.as_str()) => {
                errors.push(RuleError::InvalidGraph(format!("入口节点 {} 不存在", id)));
                id.clone()
            }
            Some(id) => id.clone(),
            None => graph.nodes[0].id.clone(),
        };

        errors.extend(find_cycles(&routes));

        if !errors.is_empty() {
            for (_, handler) in handlers.values() {
                handler.close().await;
            }
            return Err(errors);
        }

        let nodes = handlers
            .into_iter()
            .map(|(id, (type_name, handler))| {
                let routes = routes.remove(&id).unwrap_or_default();
                let node = RuleNode {
                    id: id.clone(),
                    type_name,
                    handler,
                    routes,
                };
                (id, node)
            })
            .collect::<HashMap<_, _>>();

        debug!(nodes = nodes.len(), entry = %first_rule_node_id, "规则链编译完成");

        Ok(CompiledGraph {
            first_rule_node_id,
            nodes,
            adaptors: graph.adaptors,
        })
    }

    fn parse(&self, payload: &[u8]) -> std::result::Result<GraphPayload, Vec<RuleError>> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| vec![RuleError::Malformed(format!("规则链负载不是合法的JSON: {}", e))])?;

        let schema_errors: Vec<RuleError> = self
            .schema
            .iter_errors(&value)
            .map(|e| {
                RuleError::InvalidGraph(format!("负载结构错误 ({}): {}", e.instance_path, e))
            })
            .collect();
        if !schema_errors.is_empty() {
            return Err(schema_errors);
        }

        serde_json::from_value(value).map_err(|e| vec![RuleError::from(e)])
    }
}

/// 通过深度优先搜索寻找环路, 每条回边报告一次
fn find_cycles(routes: &HashMap<String, HashMap<String, Vec<String>>>) -> Vec<RuleError> {
    fn visit<'a>(
        node: &'a str,
        routes: &'a HashMap<String, HashMap<String, Vec<String>>>,
        done: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
        errors: &mut Vec<RuleError>,
    ) {
        if done.contains(node) {
            return;
        }
        if let Some(pos) = stack.iter().position(|n| *n == node) {
            let mut path: Vec<&str> = stack[pos..].to_vec();
            path.push(node);
            errors.push(RuleError::InvalidGraph(format!(
                "节点循环依赖: {}",
                path.join(" -> ")
            )));
            return;
        }

        stack.push(node);
        if let Some(labels) = routes.get(node) {
            let mut targets: Vec<&String> = labels.values().flatten().collect();
            targets.sort();
            targets.dedup();
            for next in targets {
                visit(next, routes, done, stack, errors);
            }
        }
        stack.pop();
        done.insert(node);
    }

    let mut starts: Vec<&String> = routes.keys().collect();
    starts.sort();

    let mut done = HashSet::new();
    let mut errors = Vec::new();
    for start in starts {
        visit(start, routes, &mut done, &mut Vec::new(), &mut errors);
    }
    errors
}
