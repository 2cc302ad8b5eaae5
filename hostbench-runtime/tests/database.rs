use hostbench_runtime::{RuntimeError, SqlDialect, tags};
use serde_json::Value;

#[path = "support/mod.rs"]
mod support;

use support::{runtime, sqlite_runtime};

#[test]
fn db_requires_an_attached_database() {
    let runtime = runtime();
    assert!(matches!(runtime.db(), Err(RuntimeError::NoDatabase)));
}

#[tokio::test]
async fn rollback_discards_rows_written_inside_the_transaction() {
    let runtime = sqlite_runtime().await;
    let db = runtime.db().unwrap();
    assert_eq!(db.dialect(), SqlDialect::Sqlite);

    let table = db.table("posts");
    db.execute(&format!("CREATE TABLE {table} (id INTEGER PRIMARY KEY)"))
        .await
        .unwrap();

    db.begin().await.unwrap();
    assert!(db.in_transaction());
    db.execute(&format!("INSERT INTO {table} (id) VALUES (1)"))
        .await
        .unwrap();
    db.rollback().await.unwrap();
    assert!(!db.in_transaction());

    let count = db
        .scalar_i64(&format!("SELECT COUNT(*) FROM {table}"))
        .await
        .unwrap();
    assert_eq!(count, 0);

    // A second rollback has nothing to undo.
    db.rollback().await.unwrap();
}

#[tokio::test]
async fn statements_pass_through_the_query_filter() {
    let runtime = sqlite_runtime().await;
    runtime.hooks().add_filter(tags::QUERY, "rename", 10, |value, _| {
        Value::String(value.as_str().unwrap_or_default().replace("ghost", "real"))
    });

    let db = runtime.db().unwrap();
    db.execute("CREATE TABLE ghost (id INTEGER)").await.unwrap();

    assert!(db.table_exists("real").await.unwrap());
    assert!(!db.table_exists("ghost").await.unwrap());
}
