use crate::types::{Result, RuleError};
use async_trait::async_trait;
use std::collections::HashMap;

/// 调用方身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
}

/// 把调用方令牌解析为身份
#[async_trait]
pub trait AuthN: Send + Sync {
    async fn identify(&self, token: &str) -> Result<Principal>;
}

/// 固定令牌表, 用于测试和单机部署
#[derive(Debug, Default, Clone)]
pub struct StaticAuthN {
    tokens: HashMap<String, String>,
}

impl StaticAuthN {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: &str, user_id: &str) -> Self {
        self.tokens.insert(token.to_string(), user_id.to_string());
        self
    }
}

#[async_trait]
impl AuthN for StaticAuthN {
    async fn identify(&self, token: &str) -> Result<Principal> {
        self.tokens
            .get(token)
            .map(|user_id| Principal {
                user_id: user_id.clone(),
            })
            .ok_or(RuleError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identify_known_and_unknown_tokens() {
        let auth = StaticAuthN::new().with_token("t1", "u1");
        assert_eq!(auth.identify("t1").await.unwrap().user_id, "u1");
        assert!(matches!(
            auth.identify("nope").await,
            Err(RuleError::Unauthorized)
        ));
        assert!(matches!(auth.identify("").await, Err(RuleError::Unauthorized)));
    }
}
