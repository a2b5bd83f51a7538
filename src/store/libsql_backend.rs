//! libSQL backend: async `TaskRegistry` implementation.
//!
//! Supports local file and in-memory databases. A file database can be opened
//! by the API process and any number of worker processes at once; each opens
//! its own backend on the same path.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DatabaseError, RegistryError};
use crate::store::migrations;
use crate::store::traits::TaskRegistry;
use crate::tasks::{TaskId, TaskRecord, TaskState, Transition};

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "taskgate";

/// How long an idle consumer waits before re-checking the queue table for
/// messages enqueued by another process.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

const BUSY_TIMEOUT_MS: u64 = 5_000;

const TASK_COLUMNS: &str =
    "id, kind, state, payload, result, error, created_at, started_at, completed_at, updated_at";

/// Registry (and, in `libsql_queue`, work queue) over one libSQL database.
///
/// Holds a single connection shared by every caller; libSQL connections
/// accept concurrent async use. Each process opens its own backend on the
/// same file.
pub struct LibSqlBackend {
    // Owns the database the connection was made from.
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    namespace: String,
    pub(crate) poll_interval: Duration,
    /// Wakes consumers in this process when a message is enqueued here.
    pub(crate) notify: Notify,
}

impl LibSqlBackend {
    /// Open or create the database file at `path`, creating its directory if
    /// needed, and migrate it.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .map_err(|e| DatabaseError::Pool(format!("{}: {e}", dir.display())))?;
        }

        let backend = Self::open(path).await?;
        // Other processes share this file; wait on their locks instead of
        // failing immediately.
        pragma(&backend.conn, &format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}")).await?;
        pragma(&backend.conn, "PRAGMA journal_mode = WAL").await?;
        migrations::run_migrations(&backend.conn).await?;

        info!(path = %path.display(), namespace = %backend.namespace, "Task store opened");
        Ok(backend)
    }

    /// Private in-memory database, used by tests.
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let backend = Self::open(":memory:").await?;
        migrations::run_migrations(&backend.conn).await?;
        Ok(backend)
    }

    async fn open(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(path.as_ref())
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("open database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("connect: {e}")))?;

        Ok(Self {
            db: Arc::new(db),
            conn,
            namespace: DEFAULT_NAMESPACE.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            notify: Notify::new(),
        })
    }

    /// Prefix every registry key and queue row with `namespace`, so several
    /// deployments can share one database file without seeing each other.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Registry key for a task: `{namespace}:{id}`.
    fn key(&self, id: TaskId) -> String {
        format!("{}:{}", self.namespace, id)
    }
}

async fn pragma(conn: &Connection, sql: &str) -> Result<(), DatabaseError> {
    // journal_mode answers with a row, busy_timeout may not; drain either way.
    let mut rows = conn
        .query(sql, ())
        .await
        .map_err(|e| DatabaseError::Pool(format!("{sql}: {e}")))?;
    while rows
        .next()
        .await
        .map_err(|e| DatabaseError::Pool(format!("{sql}: {e}")))?
        .is_some()
    {}
    Ok(())
}

/// Stored timestamp format. Fixed width, so comparing the text in SQL orders
/// chronologically.
pub(crate) fn fmt_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(raw: &str, column: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Serialization(format!("tasks.{column} {raw:?}: {e}")))
}

fn nullable(value: Option<String>) -> libsql::Value {
    value.map_or(libsql::Value::Null, libsql::Value::Text)
}

/// Map a row selected with [`TASK_COLUMNS`].
fn row_to_task(row: &libsql::Row) -> Result<TaskRecord, DatabaseError> {
    let text = |idx: i32, column: &str| {
        row.get::<String>(idx)
            .map_err(|e| DatabaseError::Serialization(format!("tasks.{column}: {e}")))
    };
    // NULL columns fail the typed get.
    let nullable_text = |idx: i32| row.get::<String>(idx).ok();
    let json = |raw: &str, column: &str| {
        serde_json::from_str::<serde_json::Value>(raw)
            .map_err(|e| DatabaseError::Serialization(format!("tasks.{column}: {e}")))
    };
    let timestamp = |idx: i32, column: &str| -> Result<Option<DateTime<Utc>>, DatabaseError> {
        nullable_text(idx)
            .map(|raw| parse_datetime(&raw, column))
            .transpose()
    };

    let raw_id = text(0, "id")?;
    let id = Uuid::parse_str(&raw_id)
        .map_err(|e| DatabaseError::Serialization(format!("tasks.id {raw_id:?}: {e}")))?;
    let state: TaskState = text(2, "state")?
        .parse()
        .map_err(DatabaseError::Serialization)?;

    Ok(TaskRecord {
        id,
        kind: text(1, "kind")?,
        state,
        payload: json(&text(3, "payload")?, "payload")?,
        result: nullable_text(4).map(|raw| json(&raw, "result")).transpose()?,
        error: nullable_text(5),
        created_at: parse_datetime(&text(6, "created_at")?, "created_at")?,
        started_at: timestamp(7, "started_at")?,
        completed_at: timestamp(8, "completed_at")?,
        updated_at: parse_datetime(&text(9, "updated_at")?, "updated_at")?,
    })
}

// ── TaskRegistry implementation ─────────────────────────────────────

#[async_trait]
impl TaskRegistry for LibSqlBackend {
    async fn create(
        &self,
        id: TaskId,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<TaskRecord, RegistryError> {
        let record = TaskRecord::pending(id, kind, payload);
        let payload_str = serde_json::to_string(&record.payload)
            .map_err(|e| DatabaseError::Serialization(format!("payload: {e}")))?;
        let now = fmt_datetime(record.created_at);

        let inserted = self
            .conn()
            .execute(
                "INSERT INTO tasks (key, namespace, id, kind, state, payload, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT(key) DO NOTHING",
                params![
                    self.key(id),
                    self.namespace.as_str(),
                    id.to_string(),
                    kind,
                    TaskState::Pending.as_str(),
                    payload_str,
                    now
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create task: {e}")))?;

        if inserted == 0 {
            return Err(RegistryError::Conflict { id });
        }

        debug!(task_id = %id, kind, "Task record created");
        Ok(record)
    }

    async fn transition(
        &self,
        id: TaskId,
        transition: Transition,
    ) -> Result<TaskRecord, RegistryError> {
        let from = transition.source();
        let to = transition.target();
        let now = fmt_datetime(Utc::now());

        let (result, error, started_at, completed_at) = match transition {
            Transition::Start => (None, None, Some(now.clone()), None),
            Transition::Succeed(value) => {
                let raw = serde_json::to_string(&value)
                    .map_err(|e| DatabaseError::Serialization(format!("result: {e}")))?;
                (Some(raw), None, None, Some(now.clone()))
            }
            Transition::Fail(message) => {
                let message = if message.trim().is_empty() {
                    "task failed without a description".to_string()
                } else {
                    message
                };
                (None, Some(message), None, Some(now.clone()))
            }
        };

        // The state guard in the WHERE clause makes this a compare-and-set:
        // of two racing callers only one can match the expected state.
        let sql = format!(
            "UPDATE tasks
             SET state = ?1,
                 result = COALESCE(?2, result),
                 error = COALESCE(?3, error),
                 started_at = COALESCE(?4, started_at),
                 completed_at = COALESCE(?5, completed_at),
                 updated_at = ?6
             WHERE key = ?7 AND state = ?8
             RETURNING {TASK_COLUMNS}"
        );
        let mut rows = self
            .conn()
            .query(
                &sql,
                params![
                    to.as_str(),
                    nullable(result),
                    nullable(error),
                    nullable(started_at),
                    nullable(completed_at),
                    now,
                    self.key(id),
                    from.as_str()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("transition task: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let record = row_to_task(&row)?;
                debug!(task_id = %id, %from, %to, "Task transitioned");
                Ok(record)
            }
            Ok(None) => {
                drop(rows);
                let current = self.get(id).await?;
                Err(RegistryError::InvalidTransition {
                    id,
                    from: current.state,
                    to,
                })
            }
            Err(e) => Err(DatabaseError::Query(format!("transition task: {e}")).into()),
        }
    }

    async fn get(&self, id: TaskId) -> Result<TaskRecord, RegistryError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE key = ?1");
        let mut rows = self
            .conn()
            .query(&sql, params![self.key(id)])
            .await
            .map_err(|e| DatabaseError::Query(format!("get task: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row_to_task(&row)?),
            Ok(None) => Err(RegistryError::NotFound { id }),
            Err(e) => Err(DatabaseError::Query(format!("get task: {e}")).into()),
        }
    }

    async fn list_by_state(
        &self,
        state: TaskState,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, RegistryError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE namespace = ?1 AND state = ?2 AND updated_at < ?3
             ORDER BY updated_at ASC"
        );
        let mut rows = self
            .conn()
            .query(
                &sql,
                params![
                    self.namespace.as_str(),
                    state.as_str(),
                    fmt_datetime(updated_before)
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list tasks: {e}")))?;

        let mut records = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => records.push(row_to_task(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("list tasks: {e}")).into()),
            }
        }
        Ok(records)
    }
}
