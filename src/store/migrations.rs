//! Schema versioning for the libSQL store.
//!
//! Applied versions are recorded in `_migrations`. Every process that opens
//! the database runs [`run_migrations`]; reading the current version and
//! applying newer steps happen inside one immediate transaction, so an API
//! process and a worker process starting together cannot both apply a step.

use libsql::{Connection, TransactionBehavior, params};
use tracing::{debug, info};

use crate::error::DatabaseError;

struct Step {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Ordered by version. Append only.
const STEPS: &[Step] = &[
    Step {
        version: 1,
        name: "task_registry",
        sql: r#"
            CREATE TABLE IF NOT EXISTS tasks (
                key TEXT PRIMARY KEY,
                namespace TEXT NOT NULL,
                id TEXT NOT NULL,
                kind TEXT NOT NULL,
                state TEXT NOT NULL,
                payload TEXT NOT NULL,
                result TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_state
                ON tasks(namespace, state, updated_at);
        "#,
    },
    Step {
        version: 2,
        name: "work_queue",
        sql: r#"
            CREATE TABLE IF NOT EXISTS queue_messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                namespace TEXT NOT NULL,
                task_id TEXT NOT NULL,
                task_kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'ready',
                enqueued_at TEXT NOT NULL,
                claimed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_queue_ready
                ON queue_messages(namespace, status, seq);
        "#,
    },
];

fn failed(context: &'static str) -> impl Fn(libsql::Error) -> DatabaseError {
    move |e| DatabaseError::Migration(format!("{context}: {e}"))
}

/// Bring the schema up to the latest version.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(failed("create _migrations"))?;

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .await
        .map_err(failed("begin migration transaction"))?;

    let applied = schema_version(&tx).await?;
    let mut latest = applied;
    for step in STEPS.iter().filter(|step| step.version > applied) {
        info!(version = step.version, name = step.name, "Applying migration");
        tx.execute_batch(step.sql).await.map_err(|e| {
            DatabaseError::Migration(format!("V{} {}: {e}", step.version, step.name))
        })?;
        tx.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            params![step.version, step.name],
        )
        .await
        .map_err(failed("record migration"))?;
        latest = step.version;
    }

    tx.commit().await.map_err(failed("commit migrations"))?;
    debug!(from = applied, to = latest, "Schema up to date");
    Ok(())
}

/// Highest applied version; 0 for a fresh database.
pub async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(failed("read schema version"))?;
    match rows.next().await.map_err(failed("read schema version"))? {
        Some(row) => row.get::<i64>(0).map_err(failed("read schema version")),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory() -> Connection {
        libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap()
            .connect()
            .unwrap()
    }

    async fn tables(conn: &Connection) -> Vec<String> {
        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                (),
            )
            .await
            .unwrap();
        let mut names = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            names.push(row.get::<String>(0).unwrap());
        }
        names
    }

    #[tokio::test]
    async fn fresh_database_gets_every_table() {
        let conn = memory().await;
        run_migrations(&conn).await.unwrap();

        let names = tables(&conn).await;
        for expected in ["_migrations", "queue_messages", "tasks"] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}: {names:?}");
        }
        assert_eq!(schema_version(&conn).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn rerun_is_a_no_op() {
        let conn = memory().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT COUNT(*) FROM _migrations", ())
            .await
            .unwrap();
        let count: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(count, STEPS.len() as i64);
    }

    #[tokio::test]
    async fn only_newer_steps_are_applied() {
        let conn = memory().await;
        // A database created before the queue existed.
        conn.execute_batch(
            "CREATE TABLE _migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .await
        .unwrap();
        conn.execute_batch(STEPS[0].sql).await.unwrap();
        conn.execute(
            "INSERT INTO _migrations (version, name) VALUES (1, 'task_registry')",
            (),
        )
        .await
        .unwrap();
        assert!(!tables(&conn).await.iter().any(|n| n == "queue_messages"));

        run_migrations(&conn).await.unwrap();
        assert!(tables(&conn).await.iter().any(|n| n == "queue_messages"));
        assert_eq!(schema_version(&conn).await.unwrap(), 2);
    }
}
