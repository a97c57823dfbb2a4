use crate::types::{Message, NodeContext, RuleError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// 节点拦截器特征,用于在节点执行的不同阶段进行拦截处理
#[async_trait]
pub trait NodeInterceptor: Send + Sync + std::fmt::Debug {
    /// 节点执行前的拦截处理
    ///
    /// # Arguments
    /// * `ctx` - 节点执行上下文
    /// * `msg` - 待处理的消息
    async fn before(&self, ctx: &NodeContext, msg: &Message) -> Result<(), RuleError>;

    /// 节点及其后继执行成功后的拦截处理
    async fn after(&self, ctx: &NodeContext) -> Result<(), RuleError>;

    /// 节点执行出错时的拦截处理
    ///
    /// # Arguments
    /// * `ctx` - 节点执行上下文
    /// * `error` - 错误信息
    async fn error(&self, ctx: &NodeContext, error: &RuleError) -> Result<(), RuleError>;
}

/// 拦截器管理器,用于管理和执行所有注册的拦截器
#[derive(Debug, Default)]
pub struct InterceptorManager {
    node_interceptors: Vec<Arc<dyn NodeInterceptor>>,
}

impl InterceptorManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_node_interceptor(&mut self, interceptor: Arc<dyn NodeInterceptor>) {
        self.node_interceptors.push(interceptor);
    }

    pub fn is_empty(&self) -> bool {
        self.node_interceptors.is_empty()
    }

    /// 执行所有节点前置拦截器
    pub async fn before_node(&self, ctx: &NodeContext, msg: &Message) -> Result<(), RuleError> {
        for interceptor in &self.node_interceptors {
            interceptor.before(ctx, msg).await?;
        }
        Ok(())
    }

    /// 执行所有节点后置拦截器
    pub async fn after_node(&self, ctx: &NodeContext) -> Result<(), RuleError> {
        for interceptor in &self.node_interceptors {
            interceptor.after(ctx).await?;
        }
        Ok(())
    }

    /// 执行所有节点错误拦截器
    pub async fn node_error(&self, ctx: &NodeContext, error: &RuleError) -> Result<(), RuleError> {
        for interceptor in &self.node_interceptors {
            interceptor.error(ctx, error).await?;
        }
        Ok(())
    }
}

/// 调试模式下的日志拦截器,记录每个节点的输入与结果
#[derive(Debug)]
pub struct LoggingInterceptor;

#[async_trait]
impl NodeInterceptor for LoggingInterceptor {
    async fn before(&self, ctx: &NodeContext, msg: &Message) -> Result<(), RuleError> {
        info!(
            chain_id = ctx.chain_id(),
            node_id = ctx.node_id(),
            node_type = ctx.node_type(),
            data = %msg.data,
            metadata = ?msg.metadata,
            "开始执行节点"
        );
        Ok(())
    }

    async fn after(&self, ctx: &NodeContext) -> Result<(), RuleError> {
        info!(
            chain_id = ctx.chain_id(),
            node_id = ctx.node_id(),
            "节点执行成功"
        );
        Ok(())
    }

    async fn error(&self, ctx: &NodeContext, error: &RuleError) -> Result<(), RuleError> {
        info!(
            chain_id = ctx.chain_id(),
            node_id = ctx.node_id(),
            error = %error,
            "节点执行出错"
        );
        Ok(())
    }
}
