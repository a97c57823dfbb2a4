use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuleError>;

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("身份验证失败")]
    Unauthorized,

    #[error("规则链未找到: {0}")]
    NotFound(String),

    #[error("规则链已存在: {0}")]
    AlreadyExists(String),

    #[error("前置条件不满足: {0}")]
    FailedPrecondition(String),

    #[error("无效实体: {0}")]
    Malformed(String),

    #[error("规则链图无效: {0}")]
    InvalidGraph(String),

    #[error("找不到节点处理器: {0}")]
    HandlerNotFound(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("连接失败: {0}")]
    ConnectionError(String),

    #[error("脚本执行失败: {0}")]
    ScriptError(String),

    #[error("节点执行失败: {0}")]
    NodeExecutionError(String),

    /// 遍历过程中的错误, 在出错节点处包装一次
    #[error("节点 {node_id}[{node_type}] 执行失败: {reason}")]
    NodeFailed {
        node_id: String,
        node_type: String,
        reason: String,
    },

    #[error("存储错误: {0}")]
    Repository(String),

    #[error("缓存错误: {0}")]
    Cache(String),

    #[error("传输错误: {0}")]
    Transport(String),

    #[error("引擎配置错误: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RuleError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuleError::NotFound(_))
    }

    pub fn is_failed_precondition(&self) -> bool {
        matches!(self, RuleError::FailedPrecondition(_))
    }
}
