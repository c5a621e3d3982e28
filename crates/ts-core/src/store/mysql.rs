//! MySQL implementation of [`Store`] on a `sqlx` pool.

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use tracing::info;
use ts_config::StoreSettings;

use super::{ColumnInfo, InsertStatement, SqlValue, Store, StoreError};

const TABLE_EXISTS_SQL: &str = "SELECT COUNT(*) FROM information_schema.TABLES \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?";

const COLUMNS_SQL: &str = "SELECT CAST(COLUMN_NAME AS CHAR), CAST(COLUMN_TYPE AS CHAR) \
     FROM information_schema.COLUMNS \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION";

const INDEXES_SQL: &str = "SELECT DISTINCT CAST(INDEX_NAME AS CHAR) FROM information_schema.STATISTICS \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?";

/// Pooled MySQL connection.
#[derive(Debug, Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    /// Connect and verify the connection.
    pub async fn connect(settings: &StoreSettings) -> Result<Self, StoreError> {
        let options = MySqlConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.database)
            .charset(&settings.charset);
        let pool = MySqlPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect_with(options)
            .await?;
        info!(
            host = %settings.host,
            port = settings.port,
            database = %settings.database,
            "connected to store"
        );
        Ok(Self { pool })
    }

}

#[async_trait]
impl Store for MySqlStore {
    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar(TABLE_EXISTS_SQL)
            .bind(table)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>, StoreError> {
        let rows: Vec<(String, String)> = sqlx::query_as(COLUMNS_SQL)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(name, column_type)| ColumnInfo { name, column_type })
            .collect())
    }

    async fn index_names(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let names: Vec<String> = sqlx::query_scalar(INDEXES_SQL)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }

    async fn execute(&self, sql: &str) -> Result<(), StoreError> {
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn insert(&self, statement: &InsertStatement) -> Result<u64, StoreError> {
        let mut query = sqlx::query(&statement.sql);
        for arg in &statement.args {
            query = match arg {
                SqlValue::Int(v) => query.bind(*v),
                SqlValue::Text(s) => query.bind(s.as_str()),
            };
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
