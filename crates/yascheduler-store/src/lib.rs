#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! The durable task/node queue, backed by Postgres via `sqlx`.
//!
//! Schema (bit-exact with the system this crate reimplements):
//!
//! ```sql
//! CREATE TABLE yascheduler_tasks (
//!     task_id  BIGSERIAL PRIMARY KEY,
//!     label    TEXT NOT NULL,
//!     metadata JSONB NOT NULL,
//!     ip       TEXT,
//!     status   SMALLINT NOT NULL
//! );
//! CREATE TABLE yascheduler_nodes (
//!     ip      TEXT PRIMARY KEY,
//!     ncpus   INTEGER,
//!     enabled BOOLEAN NOT NULL,
//!     cloud   TEXT
//! );
//! ```

mod selector;

use async_trait::async_trait;
use serde_json::{Value, json};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info};
use yascheduler_core::{Node, PendingTask, SchedulerError, Task, TaskStatus, remote_folder};

pub use selector::{TaskSelector, Validated};

const CREATE_TASKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS yascheduler_tasks (
    task_id  BIGSERIAL PRIMARY KEY,
    label    TEXT NOT NULL,
    metadata JSONB NOT NULL,
    ip       TEXT,
    status   SMALLINT NOT NULL
)
"#;

const CREATE_NODES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS yascheduler_nodes (
    ip      TEXT PRIMARY KEY,
    ncpus   INTEGER,
    enabled BOOLEAN NOT NULL,
    cloud   TEXT
)
"#;

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    task_id: i64,
    label: String,
    metadata: Value,
    ip: Option<String>,
    status: i16,
}

impl TryFrom<TaskRow> for Task {
    type Error = SchedulerError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::try_from(row.status)
            .map_err(|bad| SchedulerError::Store(format!("unknown task status {bad}")))?;
        Ok(Task {
            task_id: row.task_id,
            label: row.label,
            metadata: row.metadata,
            ip: row.ip,
            status,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct NodeRow {
    ip: String,
    ncpus: Option<i32>,
    enabled: bool,
    cloud: Option<String>,
}

impl From<NodeRow> for Node {
    fn from(row: NodeRow) -> Self {
        Node {
            ip: row.ip,
            ncpus: row.ncpus,
            enabled: row.enabled,
            cloud: row.cloud,
        }
    }
}

/// Per-task summary returned by selector-based listing (`list_tasks`).
#[derive(Debug, Clone)]
pub struct TaskSummary {
    /// Monotonic identifier.
    pub task_id: i64,
    /// Free-form label.
    pub label: String,
    /// Assigned host, if any.
    pub ip: Option<String>,
    /// Current status.
    pub status: TaskStatus,
}

/// Capability set the scheduler and cloud manager depend on, so they can
/// run against an in-memory fake in tests instead of a real Postgres
/// instance.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// See [`Store::submit`].
    async fn submit(
        &self,
        label: &str,
        metadata: Value,
        engine_name: &str,
        engine: &yascheduler_engines::EngineDescriptor,
        remote_data_dir: &str,
    ) -> Result<i64, SchedulerError>;
    /// See [`Store::list_resources`].
    async fn list_resources(&self) -> Result<Vec<Node>, SchedulerError>;
    /// See [`Store::list_tasks`].
    async fn list_tasks(&self, selector: TaskSelector) -> Result<Vec<TaskSummary>, SchedulerError>;
    /// See [`Store::get_task`].
    async fn get_task(&self, task_id: i64) -> Result<Option<Task>, SchedulerError>;
    /// See [`Store::pending`].
    async fn pending(&self, limit: i64) -> Result<Vec<PendingTask>, SchedulerError>;
    /// See [`Store::mark_running`].
    async fn mark_running(&self, task_id: i64, ip: &str) -> Result<(), SchedulerError>;
    /// See [`Store::mark_done`].
    async fn mark_done(&self, task_id: i64, metadata: Value) -> Result<(), SchedulerError>;
    /// See [`Store::insert_node`].
    async fn insert_node(&self, node: &Node) -> Result<(), SchedulerError>;
    /// See [`Store::promote_node`].
    async fn promote_node(
        &self,
        placeholder_ip: &str,
        real_ip: &str,
        ncpus: Option<i32>,
    ) -> Result<(), SchedulerError>;
    /// See [`Store::delete_nodes`].
    async fn delete_nodes(&self, ips: &[String]) -> Result<(), SchedulerError>;
    /// See [`Store::enable_node`].
    async fn enable_node(&self, ip: &str) -> Result<(), SchedulerError>;
}

/// Handle to the durable task/node queue.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect to Postgres and ensure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, SchedulerError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Build a store around an already-connected pool (used by tests against
    /// an ephemeral database).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn migrate(&self) -> Result<(), SchedulerError> {
        sqlx::query(CREATE_TASKS_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_NODES_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    /// Validate `engine` against the registry's declared inputs, stamp
    /// `metadata.engine` and `metadata.remote_folder`, and insert a new
    /// `ToDo` task. Fails with `UnknownEngine`/`MissingInput` without
    /// touching the database.
    pub async fn submit(
        &self,
        label: &str,
        mut metadata: Value,
        engine_name: &str,
        engine: &yascheduler_engines::EngineDescriptor,
        remote_data_dir: &str,
    ) -> Result<i64, SchedulerError> {
        for input_file in &engine.input_files {
            if metadata.get(input_file).is_none() {
                return Err(SchedulerError::MissingInput {
                    engine: engine_name.to_string(),
                    file: input_file.clone(),
                });
            }
        }

        let obj = metadata
            .as_object_mut()
            .ok_or_else(|| SchedulerError::Store("metadata must be a JSON object".to_string()))?;
        obj.insert("engine".to_string(), json!(engine_name));
        obj.insert(
            "remote_folder".to_string(),
            json!(remote_folder(remote_data_dir)),
        );

        let row: (i64,) = sqlx::query_as(
            "INSERT INTO yascheduler_tasks (label, metadata, ip, status)
             VALUES ($1, $2, NULL, $3)
             RETURNING task_id",
        )
        .bind(label)
        .bind(&metadata)
        .bind(i16::from(TaskStatus::ToDo))
        .fetch_one(&self.pool)
        .await?;

        info!(task_id = row.0, label, engine = engine_name, "submitted");
        Ok(row.0)
    }

    /// All node rows, in no particular order.
    pub async fn list_resources(&self) -> Result<Vec<Node>, SchedulerError> {
        let rows: Vec<NodeRow> =
            sqlx::query_as("SELECT ip, ncpus, enabled, cloud FROM yascheduler_nodes")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(Node::from).collect())
    }

    /// List tasks by exactly one selector. `TaskSelector::None` and
    /// supplying both status and ids both fail with `BadSelector`.
    pub async fn list_tasks(
        &self,
        selector: TaskSelector,
    ) -> Result<Vec<TaskSummary>, SchedulerError> {
        let rows: Vec<TaskRow> = match selector.validate()? {
            selector::Validated::ByStatus(statuses) => {
                let codes: Vec<i16> = statuses.into_iter().map(i16::from).collect();
                sqlx::query_as(
                    "SELECT task_id, label, metadata, ip, status
                     FROM yascheduler_tasks WHERE status = ANY($1)
                     ORDER BY task_id",
                )
                .bind(&codes)
                .fetch_all(&self.pool)
                .await?
            }
            selector::Validated::ByIds(ids) => sqlx::query_as(
                "SELECT task_id, label, metadata, ip, status
                 FROM yascheduler_tasks WHERE task_id = ANY($1)
                 ORDER BY task_id",
            )
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?,
        };

        rows.into_iter()
            .map(|row| {
                let status = TaskStatus::try_from(row.status)
                    .map_err(|bad| SchedulerError::Store(format!("unknown task status {bad}")))?;
                Ok(TaskSummary {
                    task_id: row.task_id,
                    label: row.label,
                    ip: row.ip,
                    status,
                })
            })
            .collect()
    }

    /// Fetch a single task's full row, if it exists.
    pub async fn get_task(&self, task_id: i64) -> Result<Option<Task>, SchedulerError> {
        let row: Option<TaskRow> = sqlx::query_as(
            "SELECT task_id, label, metadata, ip, status FROM yascheduler_tasks WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Task::try_from).transpose()
    }

    /// Up to `limit` tasks with status `ToDo`. No ordering guarantee beyond
    /// "some subset of pending"; the implementation returns insertion order
    /// but callers must not rely on that.
    pub async fn pending(&self, limit: i64) -> Result<Vec<PendingTask>, SchedulerError> {
        let rows: Vec<(i64, String, Value)> = sqlx::query_as(
            "SELECT task_id, label, metadata FROM yascheduler_tasks
             WHERE status = $1 ORDER BY task_id LIMIT $2",
        )
        .bind(i16::from(TaskStatus::ToDo))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        debug!(count = rows.len(), limit, "pending tasks fetched");
        Ok(rows
            .into_iter()
            .map(|(task_id, label, metadata)| PendingTask {
                task_id,
                label,
                metadata,
            })
            .collect())
    }

    /// Atomically transition a task to `Running` on `ip`.
    pub async fn mark_running(&self, task_id: i64, ip: &str) -> Result<(), SchedulerError> {
        sqlx::query("UPDATE yascheduler_tasks SET status = $1, ip = $2 WHERE task_id = $3")
            .bind(i16::from(TaskStatus::Running))
            .bind(ip)
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        info!(task_id, ip, "task running");
        Ok(())
    }

    /// Atomically transition a task to `Done`, replacing its metadata.
    pub async fn mark_done(&self, task_id: i64, metadata: Value) -> Result<(), SchedulerError> {
        sqlx::query("UPDATE yascheduler_tasks SET status = $1, metadata = $2 WHERE task_id = $3")
            .bind(i16::from(TaskStatus::Done))
            .bind(&metadata)
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        info!(task_id, "task done");
        Ok(())
    }

    /// Insert a node row (operator-added, or a cloud-manager placeholder).
    pub async fn insert_node(&self, node: &Node) -> Result<(), SchedulerError> {
        sqlx::query(
            "INSERT INTO yascheduler_nodes (ip, ncpus, enabled, cloud) VALUES ($1, $2, $3, $4)",
        )
        .bind(&node.ip)
        .bind(node.ncpus)
        .bind(node.enabled)
        .bind(&node.cloud)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replace a placeholder node row's ip with the real address once
    /// provisioning and admission succeed, enabling it for dispatch.
    pub async fn promote_node(
        &self,
        placeholder_ip: &str,
        real_ip: &str,
        ncpus: Option<i32>,
    ) -> Result<(), SchedulerError> {
        sqlx::query(
            "UPDATE yascheduler_nodes SET ip = $1, ncpus = $2, enabled = true WHERE ip = $3",
        )
        .bind(real_ip)
        .bind(ncpus)
        .bind(placeholder_ip)
        .execute(&self.pool)
        .await?;
        info!(placeholder_ip, real_ip, "node promoted online");
        Ok(())
    }

    /// Remove node rows (used on deallocation).
    pub async fn delete_nodes(&self, ips: &[String]) -> Result<(), SchedulerError> {
        if ips.is_empty() {
            return Ok(());
        }
        sqlx::query("DELETE FROM yascheduler_nodes WHERE ip = ANY($1)")
            .bind(ips)
            .execute(&self.pool)
            .await?;
        info!(?ips, "nodes deallocated");
        Ok(())
    }

    /// Flip an already-real-ip node row to `enabled = true` once it passes
    /// admission. Unlike `promote_node`, the ip itself does not change —
    /// this is the path for operator-added nodes, which are inserted with
    /// their real ip already set.
    pub async fn enable_node(&self, ip: &str) -> Result<(), SchedulerError> {
        sqlx::query("UPDATE yascheduler_nodes SET enabled = true WHERE ip = $1")
            .bind(ip)
            .execute(&self.pool)
            .await?;
        info!(ip, "node admitted");
        Ok(())
    }
}

#[async_trait]
impl QueueStore for Store {
    async fn submit(
        &self,
        label: &str,
        metadata: Value,
        engine_name: &str,
        engine: &yascheduler_engines::EngineDescriptor,
        remote_data_dir: &str,
    ) -> Result<i64, SchedulerError> {
        self.submit(label, metadata, engine_name, engine, remote_data_dir)
            .await
    }

    async fn list_resources(&self) -> Result<Vec<Node>, SchedulerError> {
        self.list_resources().await
    }

    async fn list_tasks(&self, selector: TaskSelector) -> Result<Vec<TaskSummary>, SchedulerError> {
        self.list_tasks(selector).await
    }

    async fn get_task(&self, task_id: i64) -> Result<Option<Task>, SchedulerError> {
        self.get_task(task_id).await
    }

    async fn pending(&self, limit: i64) -> Result<Vec<PendingTask>, SchedulerError> {
        self.pending(limit).await
    }

    async fn mark_running(&self, task_id: i64, ip: &str) -> Result<(), SchedulerError> {
        self.mark_running(task_id, ip).await
    }

    async fn mark_done(&self, task_id: i64, metadata: Value) -> Result<(), SchedulerError> {
        self.mark_done(task_id, metadata).await
    }

    async fn insert_node(&self, node: &Node) -> Result<(), SchedulerError> {
        self.insert_node(node).await
    }

    async fn promote_node(
        &self,
        placeholder_ip: &str,
        real_ip: &str,
        ncpus: Option<i32>,
    ) -> Result<(), SchedulerError> {
        self.promote_node(placeholder_ip, real_ip, ncpus).await
    }

    async fn delete_nodes(&self, ips: &[String]) -> Result<(), SchedulerError> {
        self.delete_nodes(ips).await
    }

    async fn enable_node(&self, ip: &str) -> Result<(), SchedulerError> {
        self.enable_node(ip).await
    }
}
