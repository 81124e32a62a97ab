//! Repository error helpers with operation context
//!
//! Every repository failure is logged once, here, with the entity it concerned
//! and the operation that was attempted.

use chrono::{DateTime, Utc};
use dataflow_domain::DataFlowRunStatus;
use dataflow_errors::DataFlowError;
use sqlx::Error as SqlxError;
use std::fmt;
use tracing::{debug, error, instrument, warn};

/// Operation context for repository operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryOperation {
    Create,
    Read,
    Update,
    Delete,
    Query,
    Claim,
    BatchUpdate,
    BatchDelete,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryOperation::Create => write!(f, "创建"),
            RepositoryOperation::Read => write!(f, "读取"),
            RepositoryOperation::Update => write!(f, "更新"),
            RepositoryOperation::Delete => write!(f, "删除"),
            RepositoryOperation::Query => write!(f, "查询"),
            RepositoryOperation::Claim => write!(f, "认领"),
            RepositoryOperation::BatchUpdate => write!(f, "批量更新"),
            RepositoryOperation::BatchDelete => write!(f, "批量删除"),
        }
    }
}

/// Context information for data flow repository operations
#[derive(Debug, Clone)]
pub struct DataFlowOperationContext {
    pub operation: RepositoryOperation,
    pub data_flow_id: Option<i64>,
    pub name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DataFlowOperationContext {
    pub fn new(operation: RepositoryOperation) -> Self {
        Self {
            operation,
            data_flow_id: None,
            name: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.data_flow_id = Some(id);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn entity_description(&self) -> String {
        match (&self.data_flow_id, &self.name) {
            (Some(id), Some(name)) => format!("数据流 '{name}' (ID: {id})"),
            (Some(id), None) => format!("数据流 (ID: {id})"),
            (None, Some(name)) => format!("数据流 '{name}'"),
            (None, None) => "数据流".to_string(),
        }
    }
}

/// Context information for data flow run repository operations
#[derive(Debug, Clone)]
pub struct DataFlowRunOperationContext {
    pub operation: RepositoryOperation,
    pub run_id: Option<i64>,
    pub data_flow_id: Option<i64>,
    pub status: Option<DataFlowRunStatus>,
    pub timestamp: DateTime<Utc>,
}

impl DataFlowRunOperationContext {
    pub fn new(operation: RepositoryOperation) -> Self {
        Self {
            operation,
            run_id: None,
            data_flow_id: None,
            status: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_run_id(mut self, run_id: i64) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_data_flow_id(mut self, data_flow_id: i64) -> Self {
        self.data_flow_id = Some(data_flow_id);
        self
    }

    pub fn with_status(mut self, status: DataFlowRunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn entity_description(&self) -> String {
        match (&self.run_id, &self.data_flow_id) {
            (Some(run_id), Some(flow_id)) => format!("运行实例 (ID: {run_id}, 数据流ID: {flow_id})"),
            (Some(run_id), None) => format!("运行实例 (ID: {run_id})"),
            (None, Some(flow_id)) => format!("运行实例 (数据流ID: {flow_id})"),
            (None, None) => "运行实例".to_string(),
        }
    }
}

/// Whether the error is a unique-constraint violation (used by the claim path)
pub fn is_unique_violation(error: &SqlxError) -> bool {
    matches!(error, SqlxError::Database(db_error) if db_error.is_unique_violation())
}

fn describe_sqlx_error(operation_desc: &str, entity_desc: &str, error: &SqlxError) -> String {
    match error {
        SqlxError::Database(db_error) => match db_error.constraint() {
            Some(constraint) => {
                format!("{operation_desc}{entity_desc}时发生数据库约束冲突: {constraint}")
            }
            None if db_error.is_unique_violation() => {
                format!("{operation_desc}{entity_desc}时发生唯一约束冲突: {db_error}")
            }
            None => format!("{operation_desc}{entity_desc}时发生数据库错误: {db_error}"),
        },
        SqlxError::PoolClosed => format!("{operation_desc}{entity_desc}时数据库连接池已关闭"),
        SqlxError::PoolTimedOut => format!("{operation_desc}{entity_desc}时数据库连接池超时"),
        SqlxError::Io(io_error) => format!("{operation_desc}{entity_desc}时发生I/O错误: {io_error}"),
        _ => format!("{operation_desc}{entity_desc}时发生未知数据库错误: {error}"),
    }
}

/// Enhanced error helpers for repository operations
pub struct RepositoryErrorHelpers;

impl RepositoryErrorHelpers {
    /// Create a database error with data flow context
    #[instrument(skip_all, fields(
        operation = %context.operation,
        data_flow_id = ?context.data_flow_id,
        name = ?context.name,
        timestamp = %context.timestamp,
    ))]
    pub fn data_flow_database_error(context: DataFlowOperationContext, error: SqlxError) -> DataFlowError {
        let error_msg = describe_sqlx_error(
            &context.operation.to_string(),
            &context.entity_description(),
            &error,
        );
        error!(error = %error, "{}", error_msg);
        DataFlowError::database_error(error_msg)
    }

    /// Create a database error with data flow run context
    #[instrument(skip_all, fields(
        operation = %context.operation,
        run_id = ?context.run_id,
        data_flow_id = ?context.data_flow_id,
        status = ?context.status,
        timestamp = %context.timestamp,
    ))]
    pub fn run_database_error(context: DataFlowRunOperationContext, error: SqlxError) -> DataFlowError {
        let error_msg = describe_sqlx_error(
            &context.operation.to_string(),
            &context.entity_description(),
            &error,
        );
        error!(error = %error, "{}", error_msg);
        DataFlowError::database_error(error_msg)
    }

    pub fn data_flow_not_found(context: DataFlowOperationContext) -> DataFlowError {
        let entity_desc = context.entity_description();
        warn!("{}{}时未找到: {} 不存在", context.operation, entity_desc, entity_desc);
        match (context.data_flow_id, context.name) {
            (Some(id), _) => DataFlowError::data_flow_not_found(id),
            (None, Some(name)) => DataFlowError::DataFlowNameNotFound { name },
            (None, None) => DataFlowError::data_flow_not_found(0),
        }
    }

    pub fn run_not_found(context: DataFlowRunOperationContext) -> DataFlowError {
        let entity_desc = context.entity_description();
        warn!("{}{}时未找到: {} 不存在", context.operation, entity_desc, entity_desc);
        DataFlowError::data_flow_run_not_found(context.run_id.unwrap_or(0))
    }

    /// Log successful repository operation for data flows
    pub fn log_operation_success(
        context: &DataFlowOperationContext,
        entity_desc: &str,
        additional_info: Option<&str>,
    ) {
        match additional_info {
            Some(info) => debug!("{}{}成功: {}", context.operation, entity_desc, info),
            None => debug!("{}{}成功", context.operation, entity_desc),
        }
    }

    /// Log successful repository operation for data flow runs
    pub fn log_operation_success_run(
        context: &DataFlowRunOperationContext,
        entity_desc: &str,
        additional_info: Option<&str>,
    ) {
        match additional_info {
            Some(info) => debug!("{}{}成功: {}", context.operation, entity_desc, info),
            None => debug!("{}{}成功", context.operation, entity_desc),
        }
    }
}

/// Macro for creating data flow operation context easily
#[macro_export]
macro_rules! data_flow_context {
    ($operation:expr) => {
        $crate::error_handling::DataFlowOperationContext::new($operation)
    };
    ($operation:expr, id = $id:expr) => {
        $crate::error_handling::DataFlowOperationContext::new($operation).with_id($id)
    };
    ($operation:expr, name = $name:expr) => {
        $crate::error_handling::DataFlowOperationContext::new($operation).with_name($name)
    };
}

/// Macro for creating data flow run operation context easily
#[macro_export]
macro_rules! run_context {
    ($operation:expr) => {
        $crate::error_handling::DataFlowRunOperationContext::new($operation)
    };
    ($operation:expr, run_id = $run_id:expr) => {
        $crate::error_handling::DataFlowRunOperationContext::new($operation).with_run_id($run_id)
    };
    ($operation:expr, data_flow_id = $flow_id:expr) => {
        $crate::error_handling::DataFlowRunOperationContext::new($operation)
            .with_data_flow_id($flow_id)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_descriptions() {
        let ctx = data_flow_context!(RepositoryOperation::Read, id = 7).with_name("users");
        assert_eq!(ctx.entity_description(), "数据流 'users' (ID: 7)");
        assert_eq!(
            data_flow_context!(RepositoryOperation::Read).entity_description(),
            "数据流"
        );

        let ctx = run_context!(RepositoryOperation::Claim, run_id = 3).with_data_flow_id(9);
        assert_eq!(ctx.entity_description(), "运行实例 (ID: 3, 数据流ID: 9)");
        assert_eq!(ctx.operation.to_string(), "认领");
    }

    #[test]
    fn test_not_found_errors_keep_identity() {
        let err = RepositoryErrorHelpers::data_flow_not_found(data_flow_context!(
            RepositoryOperation::Read,
            name = "orders"
        ));
        assert!(matches!(err, DataFlowError::DataFlowNameNotFound { ref name } if name == "orders"));

        let err = RepositoryErrorHelpers::run_not_found(run_context!(
            RepositoryOperation::Update,
            run_id = 12
        ));
        assert!(matches!(err, DataFlowError::DataFlowRunNotFound { id: 12 }));
    }

    #[test]
    fn test_database_error_is_wrapped_with_context() {
        let err = RepositoryErrorHelpers::run_database_error(
            run_context!(RepositoryOperation::Create, data_flow_id = 1),
            SqlxError::PoolClosed,
        );
        assert!(matches!(err, DataFlowError::DatabaseOperation(ref msg) if msg.contains("连接池已关闭")));
        assert!(!is_unique_violation(&SqlxError::PoolClosed));
    }
}
