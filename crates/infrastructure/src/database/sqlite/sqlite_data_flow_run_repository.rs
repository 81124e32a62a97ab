use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dataflow_domain::{Cursor, DataFlowRun, DataFlowRunRepository, DataFlowRunStatus, RunStatusUpdate};
use dataflow_errors::{DataFlowError, DataFlowResult};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument, warn};

use crate::database::mapping::{cursor_from_text, from_millis, opt_from_millis, to_millis};
use crate::{
    error_handling::{is_unique_violation, RepositoryErrorHelpers, RepositoryOperation},
    run_context,
};

const SELECT_COLUMNS: &str = "SELECT id, data_flow_id, status, run_after, started_at, ended_at, \
     error_message, first_id, last_id, created_at FROM data_flow_runs";

const RETURNING_COLUMNS: &str = "RETURNING id, data_flow_id, status, run_after, started_at, \
     ended_at, error_message, first_id, last_id, created_at";

pub struct SqliteDataFlowRunRepository {
    pool: SqlitePool,
}

impl SqliteDataFlowRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_run(row: &SqliteRow) -> DataFlowResult<DataFlowRun> {
        let status: String = row.try_get("status")?;
        Ok(DataFlowRun {
            id: row.try_get("id")?,
            data_flow_id: row.try_get("data_flow_id")?,
            status: status.parse()?,
            run_after: from_millis(row.try_get("run_after")?)?,
            started_at: opt_from_millis(row.try_get("started_at")?)?,
            ended_at: opt_from_millis(row.try_get("ended_at")?)?,
            error_message: row.try_get("error_message")?,
            first_id: cursor_from_text(row.try_get("first_id")?),
            last_id: cursor_from_text(row.try_get("last_id")?),
            created_at: from_millis(row.try_get("created_at")?)?,
        })
    }

    async fn current_status(&self, run_id: i64) -> DataFlowResult<Option<DataFlowRunStatus>> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM data_flow_runs WHERE id = ?")
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DataFlowError::Database)?;
        status.map(|s| s.parse()).transpose()
    }
}

#[async_trait]
impl DataFlowRunRepository for SqliteDataFlowRunRepository {
    #[instrument(skip(self), fields(run_after = %run_after))]
    async fn create(&self, data_flow_id: i64, run_after: DateTime<Utc>) -> DataFlowResult<DataFlowRun> {
        let context = run_context!(RepositoryOperation::Create, data_flow_id = data_flow_id)
            .with_status(DataFlowRunStatus::Pending);

        let row = sqlx::query(&format!(
            "INSERT INTO data_flow_runs (data_flow_id, status, run_after, created_at) \
             VALUES (?, ?, ?, ?) {RETURNING_COLUMNS}"
        ))
        .bind(data_flow_id)
        .bind(DataFlowRunStatus::Pending)
        .bind(to_millis(run_after))
        .bind(to_millis(Utc::now()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::run_database_error(context.clone(), e))?;

        let run = Self::row_to_run(&row)?;
        RepositoryErrorHelpers::log_operation_success_run(&context, &run.entity_description(), None);
        Ok(run)
    }

    async fn get_by_id(&self, id: i64) -> DataFlowResult<Option<DataFlowRun>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DataFlowError::Database)?;
        row.as_ref().map(Self::row_to_run).transpose()
    }

    async fn find_by_data_flow(&self, data_flow_id: i64) -> DataFlowResult<Vec<DataFlowRun>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE data_flow_id = ? ORDER BY run_after DESC, id DESC"
        ))
        .bind(data_flow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DataFlowError::Database)?;
        rows.iter().map(Self::row_to_run).collect()
    }

    async fn find_earliest_pending(
        &self,
        data_flow_id: i64,
        now: DateTime<Utc>,
    ) -> DataFlowResult<Option<DataFlowRun>> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE data_flow_id = ? AND status = 'pending' AND run_after <= ? \
             ORDER BY run_after ASC, id ASC LIMIT 1"
        ))
        .bind(data_flow_id)
        .bind(to_millis(now))
        .fetch_optional(&self.pool)
        .await
        .map_err(DataFlowError::Database)?;
        row.as_ref().map(Self::row_to_run).transpose()
    }

    #[instrument(skip(self))]
    async fn claim(&self, run_id: i64, started_at: DateTime<Utc>) -> DataFlowResult<bool> {
        let context = run_context!(RepositoryOperation::Claim, run_id = run_id)
            .with_status(DataFlowRunStatus::InProgress);

        let result = sqlx::query(
            "UPDATE data_flow_runs SET status = 'in_progress', started_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(to_millis(started_at))
        .bind(run_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => {
                debug!("运行实例 {} 认领成功", run_id);
                Ok(true)
            }
            Ok(_) => {
                debug!("运行实例 {} 已被认领或不再待运行", run_id);
                Ok(false)
            }
            // 同一数据流已有运行中的实例
            Err(e) if is_unique_violation(&e) => {
                warn!("运行实例 {} 认领冲突: 同一数据流已有运行中的实例", run_id);
                Ok(false)
            }
            Err(e) => Err(RepositoryErrorHelpers::run_database_error(context, e)),
        }
    }

    #[instrument(skip(self, update), fields(status = %status))]
    async fn update_status(
        &self,
        run_id: i64,
        status: DataFlowRunStatus,
        update: RunStatusUpdate,
    ) -> DataFlowResult<DataFlowRun> {
        let context = run_context!(RepositoryOperation::Update, run_id = run_id).with_status(status);

        let Some(predecessor) = status.allowed_predecessor() else {
            let from = self
                .current_status(run_id)
                .await?
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(DataFlowError::InvalidTransition {
                run_id,
                from,
                to: status.to_string(),
            });
        };

        let row = sqlx::query(&format!(
            "UPDATE data_flow_runs SET status = ?, \
                 started_at = COALESCE(?, started_at), \
                 ended_at = COALESCE(?, ended_at), \
                 error_message = COALESCE(?, error_message) \
             WHERE id = ? AND status = ? {RETURNING_COLUMNS}"
        ))
        .bind(status)
        .bind(update.started_at.map(to_millis))
        .bind(update.ended_at.map(to_millis))
        .bind(update.error_message.as_deref())
        .bind(run_id)
        .bind(predecessor)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::run_database_error(context.clone(), e))?;

        match row {
            Some(row) => {
                let run = Self::row_to_run(&row)?;
                RepositoryErrorHelpers::log_operation_success_run(&context, &run.entity_description(), None);
                Ok(run)
            }
            None => match self.current_status(run_id).await? {
                None => Err(RepositoryErrorHelpers::run_not_found(context)),
                Some(actual) => Err(DataFlowError::InvalidTransition {
                    run_id,
                    from: actual.to_string(),
                    to: status.to_string(),
                }),
            },
        }
    }

    async fn update_cursors(&self, run_id: i64, first_id: &Cursor, last_id: &Cursor) -> DataFlowResult<()> {
        let result = sqlx::query("UPDATE data_flow_runs SET first_id = ?, last_id = ? WHERE id = ?")
            .bind(first_id.to_storage())
            .bind(last_id.to_storage())
            .bind(run_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::run_database_error(
                    run_context!(RepositoryOperation::Update, run_id = run_id),
                    e,
                )
            })?;

        if result.rows_affected() == 0 {
            return Err(RepositoryErrorHelpers::run_not_found(run_context!(
                RepositoryOperation::Update,
                run_id = run_id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cancel_pending(&self, data_flow_id: i64) -> DataFlowResult<u64> {
        let context = run_context!(RepositoryOperation::BatchUpdate, data_flow_id = data_flow_id)
            .with_status(DataFlowRunStatus::Cancelled);

        let result = sqlx::query(
            "UPDATE data_flow_runs SET status = 'cancelled', ended_at = ? \
             WHERE data_flow_id = ? AND status = 'pending'",
        )
        .bind(to_millis(Utc::now()))
        .bind(data_flow_id)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::run_database_error(context.clone(), e))?;

        let cancelled = result.rows_affected();
        if cancelled > 0 {
            RepositoryErrorHelpers::log_operation_success_run(
                &context,
                &context.entity_description(),
                Some(&format!("取消 {cancelled} 个待运行实例")),
            );
        }
        Ok(cancelled)
    }

    async fn find_overdue_pending(&self, before: DateTime<Utc>) -> DataFlowResult<Vec<DataFlowRun>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE status = 'pending' AND run_after <= ? ORDER BY run_after ASC"
        ))
        .bind(to_millis(before))
        .fetch_all(&self.pool)
        .await
        .map_err(DataFlowError::Database)?;
        rows.iter().map(Self::row_to_run).collect()
    }

    #[instrument(skip(self, run_ids), fields(count = run_ids.len()))]
    async fn cancel_runs(&self, run_ids: &[i64]) -> DataFlowResult<u64> {
        if run_ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE data_flow_runs SET status = 'cancelled', ended_at = ");
        builder.push_bind(to_millis(Utc::now()));
        builder.push(" WHERE status = 'pending' AND id IN (");
        let mut separated = builder.separated(", ");
        for id in run_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = builder.build().execute(&self.pool).await.map_err(|e| {
            RepositoryErrorHelpers::run_database_error(run_context!(RepositoryOperation::BatchUpdate), e)
        })?;
        Ok(result.rows_affected())
    }

    async fn has_future_pending(&self, data_flow_id: i64, now: DateTime<Utc>) -> DataFlowResult<bool> {
        let exists: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM data_flow_runs \
             WHERE data_flow_id = ? AND status = 'pending' AND run_after > ?)",
        )
        .bind(data_flow_id)
        .bind(to_millis(now))
        .fetch_one(&self.pool)
        .await
        .map_err(DataFlowError::Database)?;
        Ok(exists != 0)
    }

    async fn find_in_progress(&self) -> DataFlowResult<Vec<DataFlowRun>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE status = 'in_progress' ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DataFlowError::Database)?;
        rows.iter().map(Self::row_to_run).collect()
    }

    #[instrument(skip(self), fields(cutoff = %cutoff))]
    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> DataFlowResult<u64> {
        let result = sqlx::query(
            "DELETE FROM data_flow_runs \
             WHERE status IN ('success', 'failed', 'cancelled') \
             AND COALESCE(ended_at, created_at) < ?",
        )
        .bind(to_millis(cutoff))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::run_database_error(run_context!(RepositoryOperation::BatchDelete), e)
        })?;
        Ok(result.rows_affected())
    }
}
