//! Per-test transactional isolation.
//!
//! Each test runs inside one uncommitted transaction that is rolled back at
//! tear-down. Schema changes made by the test are rewritten to temporary
//! tables so they disappear with it.

use anyhow::Context;
use async_trait::async_trait;
use hostbench_runtime::{HostRuntime, SqlDialect, tags};
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    config::HarnessConfig,
    lifecycle::{Concern, ConcernKind},
};

/// Filter ids on the runtime's `query` tag.
pub const CREATE_TEMPORARY_FILTER: &str = "isolation_create_temporary";
pub const DROP_TEMPORARY_FILTER: &str = "isolation_drop_temporary";
const FILTER_PRIORITY: i32 = 10;

/// Rest of `sql` after a leading `<verb> TABLE`, matched case-insensitively
/// with any whitespace between the words.
fn strip_table_verb<'a>(sql: &'a str, verb: &str) -> Option<&'a str> {
    let rest = strip_keyword(sql.trim_start(), verb)?;
    let trimmed = rest.trim_start();
    if trimmed.len() == rest.len() {
        return None;
    }
    strip_keyword(trimmed, "TABLE")
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let head = text.get(..keyword.len())?;
    let rest = &text[keyword.len()..];
    let boundary = rest
        .chars()
        .next()
        .is_none_or(|next| !(next.is_alphanumeric() || next == '_'));
    (head.eq_ignore_ascii_case(keyword) && boundary).then_some(rest)
}

/// `CREATE TABLE ...` as `CREATE TEMPORARY TABLE ...`; `None` for any other
/// statement.
pub fn create_temporary(sql: &str) -> Option<String> {
    strip_table_verb(sql, "CREATE")
        .map(|rest| format!("CREATE TEMPORARY TABLE{rest}"))
}

/// `DROP TABLE ...` in the dialect's temporary form.
///
/// PostgreSQL and SQLite resolve a name to the temporary table before the
/// real one, so only MySQL needs the statement changed.
pub fn drop_temporary(sql: &str, dialect: SqlDialect) -> Option<String> {
    if dialect != SqlDialect::MySql {
        return None;
    }
    strip_table_verb(sql, "DROP")
        .map(|rest| format!("DROP TEMPORARY TABLE{rest}"))
}

/// Both rewrites applied to one statement.
pub fn rewrite_ddl(sql: &str, dialect: SqlDialect) -> String {
    create_temporary(sql)
        .or_else(|| drop_temporary(sql, dialect))
        .unwrap_or_else(|| sql.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationState {
    Idle,
    Active,
}

/// Wraps every test in a transaction that is never committed.
#[derive(Debug)]
pub struct TransactionalIsolation {
    core_tables: Vec<String>,
    state: IsolationState,
}

impl Default for TransactionalIsolation {
    fn default() -> Self {
        Self::from_config(&HarnessConfig::default())
    }
}

impl TransactionalIsolation {
    pub fn new(core_tables: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            core_tables: core_tables.into_iter().map(Into::into).collect(),
            state: IsolationState::Idle,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.database.core_tables.iter().cloned())
    }

    pub fn state(&self) -> IsolationState {
        self.state
    }

    fn install_filters(runtime: &HostRuntime, dialect: SqlDialect) {
        let hooks = runtime.hooks();
        hooks.add_filter(
            tags::QUERY,
            CREATE_TEMPORARY_FILTER,
            FILTER_PRIORITY,
            |value, _| rewrite_with(value, create_temporary),
        );
        hooks.add_filter(
            tags::QUERY,
            DROP_TEMPORARY_FILTER,
            FILTER_PRIORITY,
            move |value, _| rewrite_with(value, |sql| drop_temporary(sql, dialect)),
        );
    }

    fn remove_filters(runtime: &HostRuntime) {
        let hooks = runtime.hooks();
        hooks.remove_filter(tags::QUERY, CREATE_TEMPORARY_FILTER, FILTER_PRIORITY);
        hooks.remove_filter(tags::QUERY, DROP_TEMPORARY_FILTER, FILTER_PRIORITY);
    }
}

fn rewrite_with(value: Value, rewrite: impl Fn(&str) -> Option<String>) -> Value {
    match value.as_str().and_then(&rewrite) {
        Some(rewritten) => Value::String(rewritten),
        None => value,
    }
}

#[async_trait]
impl Concern for TransactionalIsolation {
    fn name(&self) -> &str {
        "transactional_isolation"
    }

    fn kind(&self) -> ConcernKind {
        ConcernKind::Isolation
    }

    async fn set_up_suite(&mut self, runtime: &HostRuntime) -> anyhow::Result<()> {
        let db = runtime
            .db()
            .context("transactional isolation needs a database")?;
        db.commit().await.context("committing bootstrap work")?;
        Ok(())
    }

    async fn set_up(&mut self, runtime: &HostRuntime) -> anyhow::Result<()> {
        let db = runtime
            .db()
            .context("transactional isolation needs a database")?;

        // A test whose tear-down never ran must not leak into this one.
        if db.in_transaction() {
            db.rollback().await?;
        }

        db.set_autocommit(false).await?;
        db.begin().await.context("opening test transaction")?;
        Self::install_filters(runtime, db.dialect());
        self.state = IsolationState::Active;
        debug!(dialect = ?db.dialect(), "test transaction open");
        Ok(())
    }

    async fn tear_down(&mut self, runtime: &HostRuntime) -> anyhow::Result<()> {
        Self::remove_filters(runtime);
        self.state = IsolationState::Idle;

        let db = runtime
            .db()
            .context("transactional isolation needs a database")?;
        db.rollback().await.context("rolling back test transaction")?;
        debug!("test transaction rolled back");
        Ok(())
    }

    async fn tear_down_suite(
        &mut self,
        runtime: &HostRuntime,
    ) -> anyhow::Result<()> {
        let db = runtime
            .db()
            .context("transactional isolation needs a database")?;

        if db.in_transaction() {
            db.rollback().await?;
        }
        db.begin().await?;
        for table in &self.core_tables {
            let table = db.table(table);
            if !db.table_exists(&table).await? {
                continue;
            }
            let deleted = db
                .execute(&format!("DELETE FROM {table}"))
                .await
                .with_context(|| format!("clearing {table}"))?;
            debug!(%table, deleted, "cleared residual rows");
        }
        db.commit().await?;
        info!(tables = self.core_tables.len(), "core tables cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_table_becomes_temporary() {
        assert_eq!(
            create_temporary("  create table wp_x (id INT)").as_deref(),
            Some("CREATE TEMPORARY TABLE wp_x (id INT)")
        );
        assert_eq!(
            create_temporary("CREATE\n  TABLE IF NOT EXISTS t (a INT)").as_deref(),
            Some("CREATE TEMPORARY TABLE IF NOT EXISTS t (a INT)")
        );
        assert!(create_temporary("CREATE TABLESPACE x").is_none());
        assert!(create_temporary("SELECT 'CREATE TABLE'").is_none());
    }

    #[test]
    fn drop_table_is_rewritten_only_on_mysql() {
        assert_eq!(
            drop_temporary("DROP TABLE IF EXISTS t", SqlDialect::MySql).as_deref(),
            Some("DROP TEMPORARY TABLE IF EXISTS t")
        );
        assert!(drop_temporary("DROP TABLE t", SqlDialect::Postgres).is_none());
        assert!(drop_temporary("DROP TABLE t", SqlDialect::Sqlite).is_none());
    }

    #[test]
    fn other_statements_pass_through() {
        let sql = "INSERT INTO t VALUES (1)";
        assert_eq!(rewrite_ddl(sql, SqlDialect::MySql), sql);
    }

    #[tokio::test]
    async fn set_up_without_a_database_fails() {
        let runtime = HostRuntime::builder().build().unwrap();
        let mut isolation = TransactionalIsolation::default();
        let err = isolation.set_up(&runtime).await.unwrap_err();
        assert!(format!("{err:#}").contains("needs a database"));
        assert_eq!(isolation.state(), IsolationState::Idle);
    }
}
