use std::sync::Arc;
use std::time::Duration;

use dataflow_config::{DatabaseBackend, DatabaseConfig};
use dataflow_domain::{DataFlowRepository, DataFlowRunRepository};
use dataflow_errors::{DataFlowError, DataFlowResult};
use tracing::info;

use super::postgres::{PostgresDataFlowRepository, PostgresDataFlowRunRepository};
use super::sqlite::{SqliteDataFlowRepository, SqliteDataFlowRunRepository};

/// Database type detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            DatabaseType::PostgreSQL
        } else {
            DatabaseType::SQLite
        }
    }
}

impl From<DatabaseBackend> for DatabaseType {
    fn from(backend: DatabaseBackend) -> Self {
        match backend {
            DatabaseBackend::Postgres => DatabaseType::PostgreSQL,
            DatabaseBackend::Sqlite => DatabaseType::SQLite,
        }
    }
}

/// Database connection pool enum
#[derive(Clone)]
pub enum DatabasePool {
    PostgreSQL(sqlx::PgPool),
    SQLite(sqlx::SqlitePool),
}

impl DatabasePool {
    /// Create pool from configuration with automatic type detection
    pub async fn new(config: &DatabaseConfig) -> DataFlowResult<Self> {
        let db_type = config
            .backend()
            .map(DatabaseType::from)
            .unwrap_or_else(|| DatabaseType::from_url(&config.url));

        match db_type {
            DatabaseType::PostgreSQL => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .min_connections(config.min_connections)
                    .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
                    .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
                    .connect(&config.url)
                    .await
                    .map_err(DataFlowError::Database)?;
                Ok(DatabasePool::PostgreSQL(pool))
            }
            DatabaseType::SQLite => {
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(config.max_connections)
                    .min_connections(config.min_connections)
                    .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
                    .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
                    .connect(&config.url)
                    .await
                    .map_err(DataFlowError::Database)?;
                Ok(DatabasePool::SQLite(pool))
            }
        }
    }

    pub fn database_type(&self) -> DatabaseType {
        match self {
            DatabasePool::PostgreSQL(_) => DatabaseType::PostgreSQL,
            DatabasePool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    pub async fn migrate(&self) -> DataFlowResult<()> {
        let result = match self {
            DatabasePool::PostgreSQL(pool) => sqlx::migrate!("./migrations/postgres").run(pool).await,
            DatabasePool::SQLite(pool) => sqlx::migrate!("./migrations/sqlite").run(pool).await,
        };
        result.map_err(|e| DataFlowError::database_error(format!("数据库迁移失败: {e}")))
    }

    pub async fn health_check(&self) -> DataFlowResult<()> {
        match self {
            DatabasePool::PostgreSQL(pool) => {
                sqlx::query("SELECT 1")
                    .execute(pool)
                    .await
                    .map_err(DataFlowError::Database)?;
            }
            DatabasePool::SQLite(pool) => {
                sqlx::query("SELECT 1")
                    .execute(pool)
                    .await
                    .map_err(DataFlowError::Database)?;
            }
        }
        Ok(())
    }

    pub async fn close(&self) {
        match self {
            DatabasePool::PostgreSQL(pool) => pool.close().await,
            DatabasePool::SQLite(pool) => pool.close().await,
        }
    }
}

/// 统一的数据库入口：建连、迁移，并按后端构造仓储
pub struct DatabaseManager {
    pool: DatabasePool,
}

impl DatabaseManager {
    /// Connect and bring the schema up to date
    pub async fn new(config: &DatabaseConfig) -> DataFlowResult<Self> {
        let pool = DatabasePool::new(config).await?;
        pool.migrate().await?;
        info!("数据库已就绪: {:?}", pool.database_type());
        Ok(Self { pool })
    }

    pub fn from_pool(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub fn database_type(&self) -> DatabaseType {
        self.pool.database_type()
    }

    pub async fn health_check(&self) -> DataFlowResult<()> {
        self.pool.health_check().await
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    pub fn data_flow_repository(&self) -> Arc<dyn DataFlowRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => Arc::new(PostgresDataFlowRepository::new(pool.clone())),
            DatabasePool::SQLite(pool) => Arc::new(SqliteDataFlowRepository::new(pool.clone())),
        }
    }

    pub fn run_repository(&self) -> Arc<dyn DataFlowRunRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                Arc::new(PostgresDataFlowRunRepository::new(pool.clone()))
            }
            DatabasePool::SQLite(pool) => Arc::new(SqliteDataFlowRunRepository::new(pool.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_type_detection() {
        assert_eq!(
            DatabaseType::from_url("postgresql://localhost/dataflow"),
            DatabaseType::PostgreSQL
        );
        assert_eq!(DatabaseType::from_url("postgres://u:p@h/db"), DatabaseType::PostgreSQL);
        assert_eq!(DatabaseType::from_url("sqlite::memory:"), DatabaseType::SQLite);
        assert_eq!(DatabaseType::from_url("sqlite:dataflow.db"), DatabaseType::SQLite);
    }

    #[tokio::test]
    async fn test_sqlite_manager_migrates_and_checks_health() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..DatabaseConfig::default()
        };
        let manager = DatabaseManager::new(&config).await.unwrap();
        assert_eq!(manager.database_type(), DatabaseType::SQLite);
        manager.health_check().await.unwrap();

        let flows = manager.data_flow_repository();
        assert!(flows.list().await.unwrap().is_empty());
        manager.close().await;
    }
}
