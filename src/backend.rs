use async_trait::async_trait;
use serde_json::Value;

use crate::connection::Row;
use crate::error::Result;

/// A statement with positionally bound (`?`) parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// SQL transport used by the remote client.
///
/// Implementations connect lazily and bump `generation` each time a fresh
/// transport is established, so callers can cache per-connection facts.
#[async_trait]
pub trait SqlBackend: Send + Sync {
    async fn connect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// 0 before the first connect.
    fn generation(&self) -> u64;

    /// Fetch all rows for a query.
    async fn fetch(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement, returning rows affected.
    async fn exec(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute statements in one transaction; nothing is applied if any fails.
    async fn exec_batch(&self, statements: &[Statement]) -> Result<u64>;

    async fn close(&self) -> Result<()>;

    /// `host:port` (or another locator) for error context.
    fn endpoint(&self) -> String;

    fn mode(&self) -> &'static str;
}

#[cfg(feature = "server")]
pub use mysql::MySqlBackend;

#[cfg(feature = "server")]
mod mysql {
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;
    use parking_lot::RwLock;
    use serde_json::Value;
    use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
    use sqlx::{Column, MySql, Row as _, TypeInfo, ValueRef};
    use tracing::{debug, info};

    use super::{SqlBackend, Statement};
    use crate::config::ServerConfig;
    use crate::connection::{Cell, Row};
    use crate::error::{Result, SeekDbError, from_sqlx};

    type Query<'q> = sqlx::query::Query<'q, MySql, MySqlArguments>;

    /// sqlx MySQL pool created on first use.
    pub struct MySqlBackend {
        config: ServerConfig,
        pool: RwLock<Option<MySqlPool>>,
        connect_lock: tokio::sync::Mutex<()>,
        generation: AtomicU64,
    }

    impl MySqlBackend {
        pub fn new(config: ServerConfig) -> Self {
            Self {
                config,
                pool: RwLock::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
            }
        }

        pub fn config(&self) -> &ServerConfig {
            &self.config
        }

        fn connect_options(&self) -> MySqlConnectOptions {
            // Multi-tenant servers authenticate as `user@tenant`.
            MySqlConnectOptions::new()
                .host(&self.config.host)
                .port(self.config.port)
                .username(&format!("{}@{}", self.config.user, self.config.tenant))
                .password(&self.config.password)
                .database(&self.config.database)
        }

        fn current(&self) -> Option<MySqlPool> {
            self.pool.read().as_ref().filter(|p| !p.is_closed()).cloned()
        }

        async fn pool(&self) -> Result<MySqlPool> {
            if let Some(pool) = self.current() {
                return Ok(pool);
            }
            self.connect().await?;
            self.current().ok_or_else(|| SeekDbError::Connection {
                endpoint: self.endpoint(),
                message: "connection closed concurrently".into(),
            })
        }
    }

    #[async_trait]
    impl SqlBackend for MySqlBackend {
        async fn connect(&self) -> Result<()> {
            if self.current().is_some() {
                return Ok(());
            }
            let _guard = self.connect_lock.lock().await;
            if self.current().is_some() {
                return Ok(());
            }

            let endpoint = self.endpoint();
            debug!(%endpoint, "connecting");
            let pool = MySqlPoolOptions::new()
                .max_connections(self.config.max_connections)
                .acquire_timeout(self.config.connect_timeout)
                .connect_with(self.connect_options())
                .await
                .map_err(|e| from_sqlx(e, &endpoint))?;

            *self.pool.write() = Some(pool);
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            info!(%endpoint, database = %self.config.database, generation, "connection established");
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.current().is_some()
        }

        fn generation(&self) -> u64 {
            self.generation.load(Ordering::SeqCst)
        }

        async fn fetch(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
            let pool = self.pool().await?;
            let rows = bind_all(sqlx::query(sql), params)
                .fetch_all(&pool)
                .await
                .map_err(|e| from_sqlx(e, &self.endpoint()))?;
            Ok(rows.iter().map(decode_row).collect())
        }

        async fn exec(&self, sql: &str, params: &[Value]) -> Result<u64> {
            let pool = self.pool().await?;
            let done = bind_all(sqlx::query(sql), params)
                .execute(&pool)
                .await
                .map_err(|e| from_sqlx(e, &self.endpoint()))?;
            Ok(done.rows_affected())
        }

        async fn exec_batch(&self, statements: &[Statement]) -> Result<u64> {
            let pool = self.pool().await?;
            let endpoint = self.endpoint();
            let mut tx = pool.begin().await.map_err(|e| from_sqlx(e, &endpoint))?;
            let mut affected = 0;
            for stmt in statements {
                // dropping `tx` on error rolls back
                let done = bind_all(sqlx::query(&stmt.sql), &stmt.params)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| from_sqlx(e, &endpoint))?;
                affected += done.rows_affected();
            }
            tx.commit().await.map_err(|e| from_sqlx(e, &endpoint))?;
            Ok(affected)
        }

        async fn close(&self) -> Result<()> {
            let pool = self.pool.write().take();
            if let Some(pool) = pool {
                pool.close().await;
                debug!(endpoint = %self.endpoint(), "connection closed");
            }
            Ok(())
        }

        fn endpoint(&self) -> String {
            self.config.endpoint()
        }

        fn mode(&self) -> &'static str {
            "server"
        }
    }

    fn bind_all<'q>(query: Query<'q>, params: &[Value]) -> Query<'q> {
        params.iter().fold(query, bind_value)
    }

    fn bind_value<'q>(query: Query<'q>, value: &Value) -> Query<'q> {
        match value {
            Value::String(s) => query.bind(s.clone()),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    query.bind(i)
                } else if let Some(u) = n.as_u64() {
                    query.bind(u)
                } else if let Some(f) = n.as_f64() {
                    query.bind(f)
                } else {
                    query.bind(n.to_string())
                }
            }
            Value::Bool(b) => query.bind(*b),
            Value::Null => query.bind::<Option<String>>(None),
            other => query.bind(other.to_string()),
        }
    }

    fn decode_row(row: &MySqlRow) -> Row {
        let mut out = Row::default();
        for (i, column) in row.columns().iter().enumerate() {
            out.push(column.name(), decode_cell(row, i));
        }
        out
    }

    fn decode_cell(row: &MySqlRow, i: usize) -> Cell {
        if row.try_get_raw(i).map(|v| v.is_null()).unwrap_or(true) {
            return Cell::Null;
        }
        let type_name = row.column(i).type_info().name().to_ascii_uppercase();
        let unsigned = type_name.contains("UNSIGNED");
        if type_name.contains("INT") {
            if unsigned {
                if let Ok(u) = row.try_get::<u64, _>(i) {
                    // values past i64::MAX stay exact as text
                    return i64::try_from(u).map_or_else(|_| Cell::Text(u.to_string()), Cell::Int);
                }
            } else if let Ok(v) = row.try_get::<i64, _>(i) {
                return Cell::Int(v);
            }
        }
        if type_name == "FLOAT" {
            if let Ok(v) = row.try_get::<f32, _>(i) {
                return Cell::Float(f64::from(v));
            }
        }
        if type_name == "DOUBLE" {
            if let Ok(v) = row.try_get::<f64, _>(i) {
                return Cell::Float(v);
            }
        }
        if let Ok(s) = row.try_get::<String, _>(i) {
            return Cell::Text(s);
        }
        match row.try_get::<Vec<u8>, _>(i) {
            Ok(bytes) => Cell::Bytes(bytes),
            Err(_) => Cell::Null,
        }
    }
}
