use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dataflow_domain::{Cursor, DataFlow, DataFlowRepository};
use dataflow_errors::{DataFlowError, DataFlowResult};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument};

use crate::database::mapping::{
    cursor_from_text, descriptor_from_text, from_millis, opt_from_millis, to_millis,
};
use crate::{
    data_flow_context,
    error_handling::{RepositoryErrorHelpers, RepositoryOperation},
};

const SELECT_COLUMNS: &str = "SELECT id, name, source, sink, runtime, status, next_source_id, \
     last_run_at, last_error, created_at, updated_at FROM data_flows";

pub struct SqliteDataFlowRepository {
    pool: SqlitePool,
}

impl SqliteDataFlowRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_data_flow(row: &SqliteRow) -> DataFlowResult<DataFlow> {
        let status: String = row.try_get("status")?;
        let source: String = row.try_get("source")?;
        let sink: String = row.try_get("sink")?;
        let runtime: Option<String> = row.try_get("runtime")?;

        Ok(DataFlow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            source: descriptor_from_text(&source),
            sink: descriptor_from_text(&sink),
            runtime: runtime.as_deref().map(descriptor_from_text),
            status: status.parse()?,
            next_source_id: cursor_from_text(row.try_get("next_source_id")?),
            last_run_at: opt_from_millis(row.try_get("last_run_at")?)?,
            last_error: row.try_get("last_error")?,
            created_at: from_millis(row.try_get("created_at")?)?,
            updated_at: from_millis(row.try_get("updated_at")?)?,
        })
    }

    async fn touch(&self, sql: &str, id: i64, bind: Option<String>, at: Option<i64>) -> DataFlowResult<()> {
        let mut query = sqlx::query(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        if let Some(at) = at {
            query = query.bind(at);
        }
        let result = query
            .bind(to_millis(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                RepositoryErrorHelpers::data_flow_database_error(
                    data_flow_context!(RepositoryOperation::Update, id = id),
                    e,
                )
            })?;

        if result.rows_affected() == 0 {
            return Err(RepositoryErrorHelpers::data_flow_not_found(data_flow_context!(
                RepositoryOperation::Update,
                id = id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DataFlowRepository for SqliteDataFlowRepository {
    #[instrument(skip(self, source, sink, runtime), fields(name = %name))]
    async fn upsert_by_name(
        &self,
        name: &str,
        source: &Value,
        sink: &Value,
        runtime: Option<&Value>,
    ) -> DataFlowResult<(DataFlow, bool)> {
        let context = data_flow_context!(RepositoryOperation::Create, name = name);
        let now = to_millis(Utc::now());
        let runtime_text = runtime.map(Value::to_string);

        let mut tx = self.pool.begin().await.map_err(|e| {
            RepositoryErrorHelpers::data_flow_database_error(context.clone(), e)
        })?;

        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM data_flows WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| RepositoryErrorHelpers::data_flow_database_error(context.clone(), e))?;

        let (row, created) = match existing {
            Some(id) => {
                let row = sqlx::query(
                    "UPDATE data_flows SET source = ?, sink = ?, runtime = ?, updated_at = ? \
                     WHERE id = ? RETURNING id, name, source, sink, runtime, status, next_source_id, \
                     last_run_at, last_error, created_at, updated_at",
                )
                .bind(source.to_string())
                .bind(sink.to_string())
                .bind(&runtime_text)
                .bind(now)
                .bind(id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| RepositoryErrorHelpers::data_flow_database_error(context.clone(), e))?;
                (row, false)
            }
            None => {
                let row = sqlx::query(
                    "INSERT INTO data_flows (name, source, sink, runtime, status, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, 'active', ?, ?) \
                     RETURNING id, name, source, sink, runtime, status, next_source_id, \
                     last_run_at, last_error, created_at, updated_at",
                )
                .bind(name)
                .bind(source.to_string())
                .bind(sink.to_string())
                .bind(&runtime_text)
                .bind(now)
                .bind(now)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| RepositoryErrorHelpers::data_flow_database_error(context.clone(), e))?;
                (row, true)
            }
        };

        tx.commit()
            .await
            .map_err(|e| RepositoryErrorHelpers::data_flow_database_error(context.clone(), e))?;

        let data_flow = Self::row_to_data_flow(&row)?;
        RepositoryErrorHelpers::log_operation_success(
            &context,
            &data_flow.entity_description(),
            Some(if created { "新建" } else { "已存在，更新描述符" }),
        );
        Ok((data_flow, created))
    }

    async fn get_by_id(&self, id: i64) -> DataFlowResult<Option<DataFlow>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DataFlowError::Database)?;

        row.as_ref().map(Self::row_to_data_flow).transpose()
    }

    async fn get_by_name(&self, name: &str) -> DataFlowResult<Option<DataFlow>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE name = ?"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(DataFlowError::Database)?;

        row.as_ref().map(Self::row_to_data_flow).transpose()
    }

    async fn list(&self) -> DataFlowResult<Vec<DataFlow>> {
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY id"))
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
            "UPDATE data_flows SET source = ?, sink = ?, runtime = ?, status = ?, updated_at = ? \
             WHERE id = ? RETURNING id, name, source, sink, runtime, status, next_source_id, \
             last_run_at, last_error, created_at, updated_at",
        )
        .bind(data_flow.source.to_string())
        .bind(data_flow.sink.to_string())
        .bind(data_flow.runtime.as_ref().map(Value::to_string))
        .bind(data_flow.status)
        .bind(to_millis(Utc::now()))
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
        self.touch(
            "UPDATE data_flows SET next_source_id = ?, updated_at = ? WHERE id = ?",
            id,
            Some(cursor.to_storage()),
            None,
        )
        .await?;
        debug!("数据流 {} 游标推进到 {}", id, cursor);
        Ok(())
    }

    async fn record_run_started(&self, id: i64, at: DateTime<Utc>) -> DataFlowResult<()> {
        self.touch(
            "UPDATE data_flows SET last_run_at = ?, last_error = NULL, updated_at = ? WHERE id = ?",
            id,
            None,
            Some(to_millis(at)),
        )
        .await
    }

    async fn record_error(&self, id: i64, message: &str) -> DataFlowResult<()> {
        self.touch(
            "UPDATE data_flows SET last_error = ?, updated_at = ? WHERE id = ?",
            id,
            Some(message.to_string()),
            None,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: i64) -> DataFlowResult<bool> {
        let context = data_flow_context!(RepositoryOperation::Delete, id = id);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryErrorHelpers::data_flow_database_error(context.clone(), e))?;

        let runs = sqlx::query("DELETE FROM data_flow_runs WHERE data_flow_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryErrorHelpers::data_flow_database_error(context.clone(), e))?;
        let flows = sqlx::query("DELETE FROM data_flows WHERE id = ?")
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
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE status = 'active' AND EXISTS ( \
                 SELECT 1 FROM data_flow_runs r \
                 WHERE r.data_flow_id = data_flows.id AND r.status = 'pending' AND r.run_after <= ?) \
             ORDER BY id"
        ))
        .bind(to_millis(now))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            RepositoryErrorHelpers::data_flow_database_error(data_flow_context!(RepositoryOperation::Query), e)
        })?;

        rows.iter().map(Self::row_to_data_flow).collect()
    }
}
