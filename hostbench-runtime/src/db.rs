use std::fmt;

use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use sqlx::{AnyConnection, Connection};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    HostRuntime,
    error::{Result, RuntimeError},
    hooks::tags,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Sqlite,
    Postgres,
    MySql,
}

impl SqlDialect {
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            _ => Err(RuntimeError::UnsupportedDatabase(url.to_string())),
        }
    }

    fn table_exists_sql(self, table: &str) -> String {
        let table = table.replace('\'', "''");
        match self {
            Self::Sqlite => format!(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '{table}'"
            ),
            Self::Postgres => format!(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = '{table}'"
            ),
            Self::MySql => format!(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = DATABASE() AND table_name = '{table}'"
            ),
        }
    }
}

/// The runtime's single database connection.
///
/// One connection is what makes per-test transactions meaningful: every
/// statement the code under test issues sees the same open transaction.
pub struct Database {
    conn: Mutex<AnyConnection>,
    dialect: SqlDialect,
    in_transaction: SyncMutex<bool>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("dialect", &self.dialect)
            .field("in_transaction", &*self.in_transaction.lock())
            .finish_non_exhaustive()
    }
}

impl Database {
    pub async fn connect(url: &str) -> Result<Self> {
        let dialect = SqlDialect::from_url(url)?;
        sqlx::any::install_default_drivers();
        let conn = AnyConnection::connect(url).await?;
        debug!(?dialect, "database connected");

        Ok(Self {
            conn: Mutex::new(conn),
            dialect,
            in_transaction: SyncMutex::new(false),
        })
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn in_transaction(&self) -> bool {
        *self.in_transaction.lock()
    }

    async fn run(&self, sql: &str) -> Result<u64> {
        let mut conn = self.conn.lock().await;
        let done = sqlx::query(sql).execute(&mut *conn).await?;
        Ok(done.rows_affected())
    }

    async fn scalar(&self, sql: &str) -> Result<i64> {
        let mut conn = self.conn.lock().await;
        Ok(sqlx::query_scalar::<_, i64>(sql).fetch_one(&mut *conn).await?)
    }
}

/// Database access bound to a runtime, so statements pass through the
/// `query` filter.
#[derive(Debug, Clone, Copy)]
pub struct Db<'a> {
    runtime: &'a HostRuntime,
    database: &'a Database,
}

impl<'a> Db<'a> {
    pub(crate) fn new(runtime: &'a HostRuntime, database: &'a Database) -> Self {
        Self { runtime, database }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.database.dialect
    }

    pub fn in_transaction(&self) -> bool {
        self.database.in_transaction()
    }

    /// Prefixed table name.
    pub fn table(&self, name: &str) -> String {
        format!("{}{}", self.runtime.options().table_prefix, name)
    }

    fn filtered(&self, sql: &str) -> String {
        match self.runtime.hooks().apply_filters(
            tags::QUERY,
            Value::String(sql.to_string()),
            &[],
        ) {
            Value::String(filtered) => filtered,
            _ => sql.to_string(),
        }
    }

    /// Runs a statement and returns the affected row count.
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        let sql = self.filtered(sql);
        debug!(%sql, "query");
        self.database.run(&sql).await
    }

    /// Runs a query returning one integer.
    pub async fn scalar_i64(&self, sql: &str) -> Result<i64> {
        let sql = self.filtered(sql);
        debug!(%sql, "query");
        self.database.scalar(&sql).await
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let sql = self.dialect().table_exists_sql(table);
        Ok(self.database.scalar(&sql).await? > 0)
    }

    pub async fn set_autocommit(&self, enabled: bool) -> Result<()> {
        if self.dialect() == SqlDialect::MySql {
            let value = if enabled { 1 } else { 0 };
            self.database
                .run(&format!("SET autocommit = {value}"))
                .await?;
        }
        Ok(())
    }

    pub async fn begin(&self) -> Result<()> {
        let statement = match self.dialect() {
            SqlDialect::MySql => "START TRANSACTION",
            SqlDialect::Sqlite | SqlDialect::Postgres => "BEGIN",
        };
        self.database.run(statement).await?;
        *self.database.in_transaction.lock() = true;
        Ok(())
    }

    /// Commits the open transaction; a no-op when none is open.
    pub async fn commit(&self) -> Result<()> {
        if !self.in_transaction() {
            return Ok(());
        }
        self.database.run("COMMIT").await?;
        *self.database.in_transaction.lock() = false;
        Ok(())
    }

    /// Rolls back the open transaction; a no-op when none is open.
    pub async fn rollback(&self) -> Result<()> {
        if !self.in_transaction() {
            return Ok(());
        }
        // Cleared first; a failed ROLLBACK is not retried.
        *self.database.in_transaction.lock() = false;
        self.database.run("ROLLBACK").await?;
        Ok(())
    }
}
