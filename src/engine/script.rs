use crate::types::{Message, Result, RuleError};
use rquickjs::{Context, Runtime};
use serde_json::Value;
use std::collections::HashMap;

/// 过滤/控制节点使用的脚本引擎
///
/// 脚本是函数体, 可以访问 `msg` (消息数据)、`metadata` 和 `msgType` 三个变量。
pub trait ScriptEngine: Send + Sync + std::fmt::Debug {
    /// 返回要走的出边标签 (字符串或字符串数组)
    fn evaluate_switch(&self, msg: &Message, script: &str) -> Result<Vec<String>>;

    /// 返回布尔值
    fn evaluate_filter(&self, msg: &Message, script: &str) -> Result<bool>;

    /// 返回新消息数据, 或 `{msg, metadata, msgType}` 对象
    fn evaluate_transform(&self, msg: &Message, script: &str) -> Result<Message>;
}

const MEMORY_LIMIT: usize = 32 * 1024 * 1024;

/// 基于 QuickJS 的脚本引擎, 每次求值使用独立的运行时
#[derive(Debug, Default, Clone)]
pub struct QuickJsEngine;

impl QuickJsEngine {
    pub fn new() -> Self {
        Self
    }

    fn execute(&self, msg: &Message, script: &str) -> Result<Value> {
        let rt = Runtime::new().map_err(|e| RuleError::ScriptError(e.to_string()))?;
        rt.set_memory_limit(MEMORY_LIMIT);
        let js_ctx = Context::full(&rt).map_err(|e| RuleError::ScriptError(e.to_string()))?;

        let js_code = format!(
            r#"
            const __result = (function (msg, metadata, msgType) {{
                {}
            }})({}, {}, {});
            __result === undefined ? "null" : JSON.stringify(__result);
            "#,
            script,
            msg.data,
            serde_json::to_string(&msg.metadata)?,
            serde_json::to_string(&msg.msg_type)?,
        );

        let result: String = js_ctx.with(|ctx| {
            ctx.eval::<String, _>(js_code).map_err(|e| match e {
                rquickjs::Error::Exception => {
                    let caught = ctx.catch();
                    let message = caught
                        .as_exception()
                        .and_then(|ex| ex.message())
                        .unwrap_or_else(|| format!("{:?}", caught));
                    RuleError::ScriptError(message)
                }
                other => RuleError::ScriptError(other.to_string()),
            })
        })?;

        serde_json::from_str(&result)
            .map_err(|e| RuleError::ScriptError(format!("脚本结果解析失败: {}", e)))
    }
}

impl ScriptEngine for QuickJsEngine {
    fn evaluate_switch(&self, msg: &Message, script: &str) -> Result<Vec<String>> {
        match self.execute(msg, script)? {
            Value::String(label) => Ok(vec![label]),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(label) => Ok(label),
                    other => Err(RuleError::ScriptError(format!(
                        "switch 脚本必须返回字符串标签, 实际为: {}",
                        other
                    ))),
                })
                .collect(),
            other => Err(RuleError::ScriptError(format!(
                "switch 脚本必须返回标签或标签数组, 实际为: {}",
                other
            ))),
        }
    }

    fn evaluate_filter(&self, msg: &Message, script: &str) -> Result<bool> {
        match self.execute(msg, script)? {
            Value::Bool(pass) => Ok(pass),
            other => Err(RuleError::ScriptError(format!(
                "filter 脚本必须返回布尔值, 实际为: {}",
                other
            ))),
        }
    }

    fn evaluate_transform(&self, msg: &Message, script: &str) -> Result<Message> {
        let result = self.execute(msg, script)?;
        let mut out = msg.clone();

        match result {
            Value::Object(mut obj) if obj.contains_key("msg") => {
                out.data = obj.remove("msg").unwrap_or(Value::Null);
                if let Some(metadata) = obj.remove("metadata") {
                    out.metadata = serde_json::from_value::<HashMap<String, String>>(metadata)
                        .map_err(|e| {
                            RuleError::ScriptError(format!("metadata 必须是字符串映射: {}", e))
                        })?;
                }
                if let Some(Value::String(msg_type)) = obj.remove("msgType") {
                    out.msg_type = msg_type;
                }
            }
            data => out.data = data,
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn msg() -> Message {
        let mut msg = Message::new("telemetry", json!({"temperature": 42, "humidity": 10}));
        msg.metadata.insert("publisher".into(), "dev-1".into());
        msg
    }

    #[test]
    fn filter_evaluates_boolean() {
        let engine = QuickJsEngine::new();
        assert!(engine.evaluate_filter(&msg(), "return msg.temperature > 40;").unwrap());
        assert!(!engine.evaluate_filter(&msg(), "return msg.temperature > 50;").unwrap());
    }

    #[test]
    fn filter_rejects_non_boolean() {
        let engine = QuickJsEngine::new();
        let err = engine.evaluate_filter(&msg(), "return 1;").unwrap_err();
        assert!(matches!(err, RuleError::ScriptError(_)));
    }

    #[test]
    fn switch_accepts_single_label_and_array() {
        let engine = QuickJsEngine::new();
        assert_eq!(
            engine
                .evaluate_switch(&msg(), "return msg.temperature > 40 ? 'Hot' : 'Normal';")
                .unwrap(),
            vec!["Hot".to_string()]
        );
        assert_eq!(
            engine
                .evaluate_switch(&msg(), "return ['A', metadata.publisher];")
                .unwrap(),
            vec!["A".to_string(), "dev-1".to_string()]
        );
    }

    #[test]
    fn transform_replaces_data_or_whole_message() {
        let engine = QuickJsEngine::new();

        let out = engine
            .evaluate_transform(&msg(), "return {celsius: msg.temperature};")
            .unwrap();
        assert_eq!(out.data, json!({"celsius": 42}));
        assert_eq!(out.msg_type, "telemetry");

        let out = engine
            .evaluate_transform(
                &msg(),
                "return {msg: {t: msg.temperature}, metadata: {k: 'v'}, msgType: 'alarm'};",
            )
            .unwrap();
        assert_eq!(out.data, json!({"t": 42}));
        assert_eq!(out.metadata.get("k").map(String::as_str), Some("v"));
        assert_eq!(out.msg_type, "alarm");
    }

    #[test]
    fn script_exception_is_reported() {
        let engine = QuickJsEngine::new();
        let err = engine
            .evaluate_filter(&msg(), "throw new Error('boom');")
            .unwrap_err();
        assert!(matches!(err, RuleError::ScriptError(m) if m.contains("boom")));
    }
}
