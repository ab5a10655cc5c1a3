//! Task Repository
//!
//! Handles all database operations related to run tasks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipelines_core::domain::{FilterContext, ResourceType, RuntimeStatus, Task};
use pipelines_core::{Error, Result};
use sqlx::PgPool;
use sqlx::types::Json;

use super::list::{ListOptions, ListPage};
use super::{TaskStore, db_error};

const SORT_COLUMNS: &[(&str, &str)] = &[
    ("created_at", "created_at"),
    ("name", "name"),
    ("finished_at", "finished_at"),
    ("id", "id"),
];

const TASK_COLUMNS: &str = "id, namespace, pipeline_name, run_id, mlmd_execution_id, created_at, \
     started_at, finished_at, fingerprint, name, parent_task_id, state, state_history, \
     mlmd_inputs, mlmd_outputs";

pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn create(&self, task: &Task) -> Result<Task> {
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, namespace, pipeline_name, run_id, mlmd_execution_id, created_at,
                started_at, finished_at, fingerprint, name, parent_task_id, state,
                state_history, mlmd_inputs, mlmd_outputs
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(&task.id)
        .bind(&task.namespace)
        .bind(&task.pipeline_name)
        .bind(&task.run_id)
        .bind(&task.mlmd_execution_id)
        .bind(task.created_at)
        .bind(task.started_at)
        .bind(task.finished_at)
        .bind(&task.fingerprint)
        .bind(&task.name)
        .bind(&task.parent_task_id)
        .bind(task.state.as_str())
        .bind(Json(&task.state_history))
        .bind(&task.mlmd_inputs)
        .bind(&task.mlmd_outputs)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(e, format!("Failed to store task of run {}", task.run_id)))?;

        Ok(task.clone())
    }

    async fn get(&self, id: &str) -> Result<Task> {
        let row =
            sqlx::query_as::<_, TaskRow>(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error(e, format!("Failed to get task {id}")))?;

        row.ok_or_else(|| Error::resource_not_found("Task", id))?
            .try_into()
    }

    async fn list(&self, filter: &FilterContext, opts: &ListOptions) -> Result<ListPage<Task>> {
        let (run_id, namespace) = match &filter.reference_key {
            None => (None, None),
            Some(key) if key.resource_type == ResourceType::Run => (Some(key.id.as_str()), None),
            Some(key) if key.resource_type == ResourceType::Namespace => {
                (None, Some(key.id.as_str()))
            }
            Some(key) => {
                return Err(Error::invalid_input(format!(
                    "Tasks cannot be filtered by {}",
                    key.resource_type
                )));
            }
        };

        let where_clause = r#"
            WHERE ($1::text IS NULL OR run_id = $1)
              AND ($2::text IS NULL OR namespace = $2)
        "#;
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks {where_clause} {} LIMIT $3 OFFSET $4",
            opts.order_clause(SORT_COLUMNS)?
        );
        let rows = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(run_id)
            .bind(namespace)
            .bind(opts.fetch_limit())
            .bind(opts.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error(e, "Failed to list tasks"))?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM tasks {where_clause}"))
            .bind(run_id)
            .bind(namespace)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error(e, "Failed to count tasks"))?;

        let tasks = rows
            .into_iter()
            .map(Task::try_from)
            .collect::<Result<Vec<_>>>()?;
        opts.page(tasks, total)
    }

    async fn find_by_fingerprint(&self, run_id: &str, fingerprint: &str) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE run_id = $1 AND fingerprint = $2 ORDER BY created_at LIMIT 1"
        ))
        .bind(run_id)
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error(e, format!("Failed to look up task {fingerprint} of run {run_id}")))?;

        row.map(Task::try_from).transpose()
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    namespace: String,
    pipeline_name: String,
    run_id: String,
    mlmd_execution_id: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    fingerprint: String,
    name: String,
    parent_task_id: Option<String>,
    state: String,
    state_history: Json<Vec<RuntimeStatus>>,
    mlmd_inputs: String,
    mlmd_outputs: String,
}

impl TryFrom<TaskRow> for Task {
    type Error = Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Task {
            state: row.state.parse()?,
            id: row.id,
            namespace: row.namespace,
            pipeline_name: row.pipeline_name,
            run_id: row.run_id,
            mlmd_execution_id: row.mlmd_execution_id,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            fingerprint: row.fingerprint,
            name: row.name,
            parent_task_id: row.parent_task_id,
            state_history: row.state_history.0,
            mlmd_inputs: row.mlmd_inputs,
            mlmd_outputs: row.mlmd_outputs,
        })
    }
}
