use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataFlowError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("数据流未找到: {id}")]
    DataFlowNotFound { id: i64 },
    #[error("数据流未找到: {name}")]
    DataFlowNameNotFound { name: String },
    #[error("数据流运行实例未找到: {id}")]
    DataFlowRunNotFound { id: i64 },
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("连接器重建失败: {type_tag} - {message}")]
    Rehydration { type_tag: String, message: String },
    #[error("数据流执行错误: {0}")]
    Execution(String),
    #[error("运行实例 {run_id} 已被其他调度周期认领")]
    ClaimConflict { run_id: i64 },
    #[error("非法的运行状态转换: 运行实例 {run_id} 从 {from} 到 {to}")]
    InvalidTransition {
        run_id: i64,
        from: String,
        to: String,
    },
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("数据验证失败: {0}")]
    ValidationError(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type DataFlowResult<T> = Result<T, DataFlowError>;

impl DataFlowError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn data_flow_not_found(id: i64) -> Self {
        Self::DataFlowNotFound { id }
    }
    pub fn data_flow_run_not_found(id: i64) -> Self {
        Self::DataFlowRunNotFound { id }
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn rehydration_error<T: Into<String>, S: Into<String>>(type_tag: T, msg: S) -> Self {
        Self::Rehydration {
            type_tag: type_tag.into(),
            message: msg.into(),
        }
    }
    pub fn execution_error<S: Into<String>>(msg: S) -> Self {
        Self::Execution(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }
    /// 注册阶段不可恢复的错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DataFlowError::Internal(_) | DataFlowError::Configuration(_)
        )
    }
    /// 调度器静默跳过、不记录到运行实例上的错误
    pub fn is_skippable(&self) -> bool {
        matches!(self, DataFlowError::ClaimConflict { .. })
    }
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DataFlowError::Database(_) | DataFlowError::DatabaseOperation(_)
        )
    }
    pub fn user_message(&self) -> &str {
        match self {
            DataFlowError::DataFlowNotFound { .. } | DataFlowError::DataFlowNameNotFound { .. } => {
                "请求的数据流不存在"
            }
            DataFlowError::DataFlowRunNotFound { .. } => "请求的运行记录不存在",
            DataFlowError::Configuration(_) => "数据流配置有误",
            DataFlowError::Rehydration { .. } => "连接器描述无法识别",
            DataFlowError::ValidationError(_) => "输入数据验证失败",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for DataFlowError {
    fn from(err: serde_json::Error) -> Self {
        DataFlowError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for DataFlowError {
    fn from(err: anyhow::Error) -> Self {
        DataFlowError::Internal(err.to_string())
    }
}
