use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dataflow_domain::{Cursor, DataFlow, DataFlowRepository};
use dataflow_errors::{DataFlowError, DataFlowResult};
use serde_json::Value;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{debug, instrument};

use crate::database::mapping::cursor_from_text;
use crate::{
    data_flow_context,
    error_handling::{RepositoryErrorHelpers, RepositoryOperation},
};

pub struct PostgresDataFlowRepository {
    pool: PgPool,
}

impl PostgresDataFlowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_data_flow(row: &PgRow) -> DataFlowResult<DataFlow> {
        let status: String = row.try_get("status")?;
        Ok(DataFlow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            source: row.try_get("source")?,
            sink: row.try_get("sink")?,
            runtime: row.try_get("runtime")?,
            status: status.parse()?,
            next_source_id: cursor_from_text(row.try_get("next_source_id")?),
            last_run_at: row.try_get("last_run_at")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn ensure_touched(id: i64, rows_affected: u64) -> DataFlowResult<()> {
        if rows_affected == 0 {
            return Err(RepositoryErrorHelpers::data_flow_not_found(data_flow_context!(
                RepositoryOperation::Update,
                id = id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DataFlowRepository for PostgresDataFlowRepository {
    #[instrument(skip(self, source, sink, runtime), fields(name = %name))]
    async fn upsert_by_name(
        &self,
        name: &str,
        source: &Value,
        sink: &Value,
        runtime: Option<&Value>,
    ) -> DataFlowResult<(DataFlow, bool)> {
        let context = data_flow_context!(RepositoryOperation::Create, name = name);

        // xmax = 0 表示本次语句插入了新行
        let row = sqlx::query(
            r#"
            INSERT INTO data_flows (name, source, sink, runtime, status)
            VALUES ($1, $2, $3, $4, 'active')
            ON CONFLICT (name) DO UPDATE
                SET source = EXCLUDED.source,
                    sink = EXCLUDED.sink,
                    runtime = EXCLUDED.runtime,
                    updated_at = NOW()
            RETURNING id, name, source, sink, runtime, status, next_source_id,
                      last_run_at, last_error, created_at, updated_at, (xmax = 0) AS inserted
            "#,
        )
        .bind(name)
        .bind(source)
        .bind(sink)
        .bind(runtime)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::data_flow_database_error(context.clone(), e))?;

        let created: bool = row.try_get("inserted")?;
        let data_flow = Self::row_to_data_flow(&row)?;
        RepositoryErrorHelpers::log_operation_success(
            &context,
            &data_flow.entity_description(),
            Some(if created { "新建" } else { "已存在，更新描述符" }),
        );
        Ok((data_flow, created))
    }

    async fn get_by_id(&self, id: i64) -> DataFlowResult<Option<DataFlow>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, source, sink, runtime, status, next_source_id,
                   last_run_at, last_error, created_at, updated_at
            FROM data_flows WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataFlowError::Database)?;

        row.as_ref().map(Self::row_to_data_flow).transpose()
    }

    async fn get_by_name(&self, name: &str) -> DataFlowResult<Option<DataFlow>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, source, sink, runtime, status, next_source_id,
                   last_run_at, last_error, created_at, updated_at
            FROM data_flows WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataFlowError::Database)?;

        row.as_ref().map(Self::row_to_data_flow).transpose()
    }

    async fn list(&self) -> DataFlowResult<Vec<DataFlow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, source, sink, runtime, status, next_source_id,
                   last_run_at, last_error, created_at, updated_at
            FROM data_flows ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DataFlowError::Database)?;

        rows.iter().map(Self::row_to_data_flow).collect()
    }

    #[instrument(skip(self, data_flow), fields(data_flow_id = data_flow.id, status = %data_flow.status))]
    async fn update(&self, data_flow: &DataFlow) -> DataFlowResult<DataFlow> {
        let context = data_flow_context!(RepositoryOperation::Update, id = data_flow.id)
            .with_name(data_flow.name.clone());

        let row = sqlx::query(
            r#"
            UPDATE data_flows
            SET source = $1, sink = $2, runtime = $3, status = $4, updated_at = NOW()
            WHERE id = $5
            RETURNING id, name, source, sink, runtime, status, next_source_id,
                      last_run_at, last_error, created_at, updated_at
            "#,
        )
        .bind(&data_flow.source)
        .bind(&data_flow.sink)
        .bind(&data_flow.runtime)
        .bind(data_flow.status)
        .bind(data_flow.id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::data_flow_database_error(context.clone(), e))?;

        match row {
            Some(row) => {
                let updated = Self::row_to_data_flow(&row)?;
                RepositoryErrorHelpers::log_operation_success(&context, &updated.entity_description(), None);
                Ok(updated)
            }
            None => Err(RepositoryErrorHelpers::data_flow_not_found(context)),
        }
    }

    #[instrument(skip(self), fields(cursor = %cursor))]
    async fn update_cursor(&self, id: i64, cursor: &Cursor) -> DataFlowResult<()> {
        let result = sqlx::query(
            "UPDATE data_flows SET next_source_id = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(cursor.to_storage())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::data_flow_database_error(
                data_flow_context!(RepositoryOperation::Update, id = id),
                e,
            )
        })?;
        Self::ensure_touched(id, result.rows_affected())?;
        debug!("数据流 {} 游标推进到 {}", id, cursor);
        Ok(())
    }

    async fn record_run_started(&self, id: i64, at: DateTime<Utc>) -> DataFlowResult<()> {
        let result = sqlx::query(
            "UPDATE data_flows SET last_run_at = $1, last_error = NULL, updated_at = NOW() WHERE id = $2",
        )
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::data_flow_database_error(
                data_flow_context!(RepositoryOperation::Update, id = id),
                e,
            )
        })?;
        Self::ensure_touched(id, result.rows_affected())
    }

    async fn record_error(&self, id: i64, message: &str) -> DataFlowResult<()> {
        let result = sqlx::query(
            "UPDATE data_flows SET last_error = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(message)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::data_flow_database_error(
                data_flow_context!(RepositoryOperation::Update, id = id),
                e,
            )
        })?;
        Self::ensure_touched(id, result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: i64) -> DataFlowResult<bool> {
        let context = data_flow_context!(RepositoryOperation::Delete, id = id);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryErrorHelpers::data_flow_database_error(context.clone(), e))?;

        let runs = sqlx::query("DELETE FROM data_flow_runs WHERE data_flow_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryErrorHelpers::data_flow_database_error(context.clone(), e))?;
        let flows = sqlx::query("DELETE FROM data_flows WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryErrorHelpers::data_flow_database_error(context.clone(), e))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryErrorHelpers::data_flow_database_error(context.clone(), e))?;

        let deleted = flows.rows_affected() > 0;
        if deleted {
            RepositoryErrorHelpers::log_operation_success(
                &context,
                &context.entity_description(),
                Some(&format!("级联删除 {} 个运行实例", runs.rows_affected())),
            );
        }
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn find_due(&self, now: DateTime<Utc>) -> DataFlowResult<Vec<DataFlow>> {
        let rows = sqlx::query(
            r#"
            SELECT f.id, f.name, f.source, f.sink, f.runtime, f.status, f.next_source_id,
                   f.last_run_at, f.last_error, f.created_at, f.updated_at
            FROM data_flows f
            WHERE f.status = 'active'
              AND EXISTS (
                  SELECT 1 FROM data_flow_runs r
                  WHERE r.data_flow_id = f.id AND r.status = 'pending' AND r.run_after <= $1
              )
            ORDER BY f.id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::data_flow_database_error(data_flow_context!(RepositoryOperation::Query), e)
        })?;

        rows.iter().map(Self::row_to_data_flow).collect()
    }
}
