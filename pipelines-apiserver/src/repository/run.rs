//! Run Repository
//!
//! Handles all database operations related to runs, their metrics and their
//! reference edges.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipelines_core::domain::{
    FilterContext, PipelineSpec, ResourceReference, ResourceType, Run, RunMetric, RuntimeConfig,
    RuntimeState, RuntimeStatus, StorageState,
};
use pipelines_core::{Error, Result};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use super::list::{ListOptions, ListPage};
use super::reference::{ReferenceRow, insert_references};
use super::{RunStore, db_error};

const SORT_COLUMNS: &[(&str, &str)] = &[
    ("created_at", "created_at"),
    ("name", "display_name"),
    ("display_name", "display_name"),
    ("finished_at", "finished_at"),
    ("id", "id"),
];

const RUN_COLUMNS: &str = "id, experiment_id, display_name, k8s_name, description, namespace, \
     service_account, storage_state, recurring_run_id, pipeline_id, pipeline_version_id, \
     pipeline_name, workflow_spec_manifest, pipeline_spec_manifest, parameters, \
     runtime_parameters, pipeline_root, conditions, state, state_history, \
     workflow_runtime_manifest, pipeline_runtime_manifest, created_at, scheduled_at, finished_at";

const FINAL_STATES: [RuntimeState; 4] = [
    RuntimeState::Succeeded,
    RuntimeState::Skipped,
    RuntimeState::Failed,
    RuntimeState::Canceled,
];

pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| db_error(e, "Failed to start a transaction"))
    }

    async fn set_storage_state(&self, id: &str, state: StorageState) -> Result<()> {
        let result = sqlx::query("UPDATE runs SET storage_state = $1 WHERE id = $2")
            .bind(state.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(e, format!("Failed to update the storage state of run {id}")))?;

        if result.rows_affected() == 0 {
            return Err(Error::resource_not_found("Run", id));
        }
        Ok(())
    }

    /// Attach metrics and reference edges to freshly loaded runs
    async fn hydrate(&self, mut runs: Vec<Run>) -> Result<Vec<Run>> {
        if runs.is_empty() {
            return Ok(runs);
        }
        let ids: Vec<String> = runs.iter().map(|r| r.id.clone()).collect();

        let metrics = sqlx::query_as::<_, RunMetricRow>(
            r#"
            SELECT run_id, node_id, name, number_value, format
            FROM run_metrics
            WHERE run_id = ANY($1)
            ORDER BY node_id, name
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error(e, "Failed to load run metrics"))?;

        let references = sqlx::query_as::<_, ReferenceRow>(
            r#"
            SELECT resource_id, resource_type, reference_id, reference_name, reference_type, relationship
            FROM resource_references
            WHERE resource_type = $1 AND resource_id = ANY($2)
            "#,
        )
        .bind(ResourceType::Run.as_str())
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error(e, "Failed to load run references"))?;

        let mut metrics_by_run: HashMap<String, Vec<RunMetric>> = HashMap::new();
        for row in metrics {
            metrics_by_run
                .entry(row.run_id.clone())
                .or_default()
                .push(row.into());
        }
        let mut references_by_run: HashMap<String, Vec<ResourceReference>> = HashMap::new();
        for row in references {
            let reference = ResourceReference::try_from(row)?;
            references_by_run
                .entry(reference.resource_id.clone())
                .or_default()
                .push(reference);
        }

        for run in &mut runs {
            run.metrics = metrics_by_run.remove(&run.id).unwrap_or_default();
            run.resource_references = references_by_run.remove(&run.id).unwrap_or_default();
        }
        Ok(runs)
    }
}

/// Column binds for a list scope
///
/// Owners stored on the row are matched directly; anything else goes through
/// the reference edges.
struct RunScope<'a> {
    experiment_id: Option<&'a str>,
    namespace: Option<&'a str>,
    recurring_run_id: Option<&'a str>,
    reference_type: Option<&'static str>,
    reference_id: Option<&'a str>,
}

impl<'a> RunScope<'a> {
    fn from_filter(filter: &'a FilterContext) -> Self {
        let mut scope = RunScope {
            experiment_id: None,
            namespace: None,
            recurring_run_id: None,
            reference_type: None,
            reference_id: None,
        };
        if let Some(key) = &filter.reference_key {
            match key.resource_type {
                ResourceType::Experiment => scope.experiment_id = Some(&key.id),
                ResourceType::Namespace => scope.namespace = Some(&key.id),
                ResourceType::Job => scope.recurring_run_id = Some(&key.id),
                other => {
                    scope.reference_type = Some(other.as_str());
                    scope.reference_id = Some(&key.id);
                }
            }
        }
        scope
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn create(&self, run: &Run) -> Result<Run> {
        let mut tx = self.begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO runs (
                id, experiment_id, display_name, k8s_name, description, namespace,
                service_account, storage_state, recurring_run_id, pipeline_id, pipeline_version_id,
                pipeline_name, workflow_spec_manifest, pipeline_spec_manifest, parameters,
                runtime_parameters, pipeline_root, conditions, state, state_history,
                workflow_runtime_manifest, pipeline_runtime_manifest, created_at, scheduled_at, finished_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23, $24, $25)
            "#,
        )
        .bind(&run.id)
        .bind(&run.experiment_id)
        .bind(&run.display_name)
        .bind(&run.k8s_name)
        .bind(&run.description)
        .bind(&run.namespace)
        .bind(&run.service_account)
        .bind(run.storage_state.as_str())
        .bind(&run.recurring_run_id)
        .bind(&run.pipeline_spec.pipeline_id)
        .bind(&run.pipeline_spec.pipeline_version_id)
        .bind(&run.pipeline_spec.pipeline_name)
        .bind(&run.pipeline_spec.workflow_spec_manifest)
        .bind(&run.pipeline_spec.pipeline_spec_manifest)
        .bind(&run.pipeline_spec.parameters)
        .bind(&run.pipeline_spec.runtime_config.parameters)
        .bind(&run.pipeline_spec.runtime_config.pipeline_root)
        .bind(&run.conditions)
        .bind(run.state.as_str())
        .bind(Json(&run.state_history))
        .bind(&run.workflow_runtime_manifest)
        .bind(&run.pipeline_runtime_manifest)
        .bind(run.created_at)
        .bind(run.scheduled_at)
        .bind(run.finished_at)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(Error::invalid_input(format!("Run {} already exists", run.id)));
            }
            Err(e) => return Err(db_error(e, "Failed to store run")),
        }

        insert_references(&mut tx, &run.resource_references).await?;
        tx.commit()
            .await
            .map_err(|e| db_error(e, format!("Failed to store run {}", run.id)))?;
        Ok(run.clone())
    }

    async fn get(&self, id: &str) -> Result<Run> {
        let row = sqlx::query_as::<_, RunRow>(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(e, format!("Failed to get run {id}")))?;

        let run = Run::try_from(row.ok_or_else(|| Error::resource_not_found("Run", id))?)?;
        let mut runs = self.hydrate(vec![run]).await?;
        runs.pop()
            .ok_or_else(|| Error::resource_not_found("Run", id))
    }

    async fn list(&self, filter: &FilterContext, opts: &ListOptions) -> Result<ListPage<Run>> {
        let scope = RunScope::from_filter(filter);
        let storage_state = opts.filter.storage_state.map(|s| s.as_str());
        let name = opts.filter.name.as_deref();

        let where_clause = r#"
            WHERE ($1::text IS NULL OR experiment_id = $1)
              AND ($2::text IS NULL OR namespace = $2)
              AND ($3::text IS NULL OR recurring_run_id = $3)
              AND ($4::text IS NULL OR id IN (
                    SELECT resource_id FROM resource_references
                    WHERE resource_type = 'Run' AND reference_type = $4 AND reference_id = $5))
              AND ($6::text IS NULL OR storage_state = $6)
              AND ($7::text IS NULL OR display_name = $7)
        "#;
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM runs {where_clause} {} LIMIT $8 OFFSET $9",
            opts.order_clause(SORT_COLUMNS)?
        );
        let rows = sqlx::query_as::<_, RunRow>(&sql)
            .bind(scope.experiment_id)
            .bind(scope.namespace)
            .bind(scope.recurring_run_id)
            .bind(scope.reference_type)
            .bind(scope.reference_id)
            .bind(storage_state)
            .bind(name)
            .bind(opts.fetch_limit())
            .bind(opts.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error(e, "Failed to list runs"))?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM runs {where_clause}"))
            .bind(scope.experiment_id)
            .bind(scope.namespace)
            .bind(scope.recurring_run_id)
            .bind(scope.reference_type)
            .bind(scope.reference_id)
            .bind(storage_state)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error(e, "Failed to count runs"))?;

        let runs = rows
            .into_iter()
            .map(Run::try_from)
            .collect::<Result<Vec<_>>>()?;
        let runs = self.hydrate(runs).await?;
        opts.page(runs, total)
    }

    async fn update(&self, run: &Run) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET conditions = $1, state = $2, state_history = $3,
                workflow_runtime_manifest = $4, pipeline_runtime_manifest = $5,
                k8s_name = $6, scheduled_at = $7, finished_at = $8
            WHERE id = $9
            "#,
        )
        .bind(&run.conditions)
        .bind(run.state.as_str())
        .bind(Json(&run.state_history))
        .bind(&run.workflow_runtime_manifest)
        .bind(&run.pipeline_runtime_manifest)
        .bind(&run.k8s_name)
        .bind(run.scheduled_at)
        .bind(run.finished_at)
        .bind(&run.id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(e, format!("Failed to update run {}", run.id)))?;

        if result.rows_affected() == 0 {
            return Err(Error::resource_not_found("Run", &run.id));
        }
        Ok(())
    }

    async fn create_or_update(&self, run: &Run) -> Result<()> {
        let mut tx = self.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO runs (
                id, experiment_id, display_name, k8s_name, description, namespace,
                service_account, storage_state, recurring_run_id, pipeline_id, pipeline_version_id,
                pipeline_name, workflow_spec_manifest, pipeline_spec_manifest, parameters,
                runtime_parameters, pipeline_root, conditions, state, state_history,
                workflow_runtime_manifest, pipeline_runtime_manifest, created_at, scheduled_at, finished_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23, $24, $25)
            ON CONFLICT (id) DO UPDATE
            SET conditions = EXCLUDED.conditions,
                state = EXCLUDED.state,
                state_history = EXCLUDED.state_history,
                workflow_runtime_manifest = EXCLUDED.workflow_runtime_manifest,
                pipeline_runtime_manifest = EXCLUDED.pipeline_runtime_manifest,
                scheduled_at = EXCLUDED.scheduled_at,
                finished_at = EXCLUDED.finished_at
            "#,
        )
        .bind(&run.id)
        .bind(&run.experiment_id)
        .bind(&run.display_name)
        .bind(&run.k8s_name)
        .bind(&run.description)
        .bind(&run.namespace)
        .bind(&run.service_account)
        .bind(run.storage_state.as_str())
        .bind(&run.recurring_run_id)
        .bind(&run.pipeline_spec.pipeline_id)
        .bind(&run.pipeline_spec.pipeline_version_id)
        .bind(&run.pipeline_spec.pipeline_name)
        .bind(&run.pipeline_spec.workflow_spec_manifest)
        .bind(&run.pipeline_spec.pipeline_spec_manifest)
        .bind(&run.pipeline_spec.parameters)
        .bind(&run.pipeline_spec.runtime_config.parameters)
        .bind(&run.pipeline_spec.runtime_config.pipeline_root)
        .bind(&run.conditions)
        .bind(run.state.as_str())
        .bind(Json(&run.state_history))
        .bind(&run.workflow_runtime_manifest)
        .bind(&run.pipeline_runtime_manifest)
        .bind(run.created_at)
        .bind(run.scheduled_at)
        .bind(run.finished_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error(e, format!("Failed to create or update run {}", run.id)))?;

        insert_references(&mut tx, &run.resource_references).await?;
        tx.commit()
            .await
            .map_err(|e| db_error(e, format!("Failed to create or update run {}", run.id)))
    }

    async fn terminate(&self, id: &str) -> Result<()> {
        let entry = RuntimeStatus {
            update_time: Utc::now(),
            state: RuntimeState::Canceling,
            error: None,
        };
        let finals: Vec<&str> = FINAL_STATES.iter().map(|s| s.as_str()).collect();
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET conditions = $1, state = $2, state_history = state_history || $3
            WHERE id = $4 AND state <> ALL($5)
            "#,
        )
        .bind(RuntimeState::Canceling.to_v1())
        .bind(RuntimeState::Canceling.as_str())
        .bind(Json(vec![entry]))
        .bind(id)
        .bind(&finals)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(e, format!("Failed to terminate run {id}")))?;

        if result.rows_affected() == 0 {
            let run = self.get(id).await?;
            return Err(Error::FailedPrecondition(format!(
                "Run {id} already finished in state {}",
                run.state
            )));
        }
        Ok(())
    }

    async fn archive(&self, id: &str) -> Result<()> {
        self.set_storage_state(id, StorageState::Archived).await
    }

    async fn unarchive(&self, id: &str) -> Result<()> {
        self.set_storage_state(id, StorageState::Available).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut tx = self.begin().await?;
        let result = sqlx::query("DELETE FROM runs WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(e, format!("Failed to delete run {id}")))?;
        if result.rows_affected() == 0 {
            return Err(Error::resource_not_found("Run", id));
        }

        sqlx::query("DELETE FROM resource_references WHERE resource_id = $1 AND resource_type = $2")
            .bind(id)
            .bind(ResourceType::Run.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(e, format!("Failed to delete references of run {id}")))?;

        tx.commit()
            .await
            .map_err(|e| db_error(e, format!("Failed to delete run {id}")))
    }

    async fn create_metric(&self, metric: &RunMetric) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO run_metrics (run_id, node_id, name, number_value, format)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&metric.run_id)
        .bind(&metric.node_id)
        .bind(&metric.name)
        .bind(metric.number_value)
        .bind(&metric.format)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(Error::invalid_input(format!(
                    "Metric {} of node {} was already reported for run {}",
                    metric.name, metric.node_id, metric.run_id
                )))
            }
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                Err(Error::resource_not_found("Run", &metric.run_id))
            }
            Err(e) => Err(db_error(e, format!("Failed to store metric {}", metric.name))),
        }
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RunRow {
    id: String,
    experiment_id: String,
    display_name: String,
    k8s_name: String,
    description: String,
    namespace: String,
    service_account: String,
    storage_state: String,
    recurring_run_id: Option<String>,
    pipeline_id: String,
    pipeline_version_id: String,
    pipeline_name: String,
    workflow_spec_manifest: String,
    pipeline_spec_manifest: String,
    parameters: String,
    runtime_parameters: String,
    pipeline_root: String,
    conditions: String,
    state: String,
    state_history: Json<Vec<RuntimeStatus>>,
    workflow_runtime_manifest: String,
    pipeline_runtime_manifest: String,
    created_at: DateTime<Utc>,
    scheduled_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<RunRow> for Run {
    type Error = Error;

    fn try_from(row: RunRow) -> Result<Self> {
        Ok(Run {
            storage_state: row.storage_state.parse()?,
            state: row.state.parse()?,
            id: row.id,
            experiment_id: row.experiment_id,
            display_name: row.display_name,
            k8s_name: row.k8s_name,
            description: row.description,
            namespace: row.namespace,
            service_account: row.service_account,
            recurring_run_id: row.recurring_run_id,
            pipeline_spec: PipelineSpec {
                pipeline_id: row.pipeline_id,
                pipeline_version_id: row.pipeline_version_id,
                pipeline_name: row.pipeline_name,
                workflow_spec_manifest: row.workflow_spec_manifest,
                pipeline_spec_manifest: row.pipeline_spec_manifest,
                parameters: row.parameters,
                runtime_config: RuntimeConfig {
                    parameters: row.runtime_parameters,
                    pipeline_root: row.pipeline_root,
                },
            },
            conditions: row.conditions,
            state_history: row.state_history.0,
            workflow_runtime_manifest: row.workflow_runtime_manifest,
            pipeline_runtime_manifest: row.pipeline_runtime_manifest,
            created_at: row.created_at,
            scheduled_at: row.scheduled_at,
            finished_at: row.finished_at,
            resource_references: Vec::new(),
            metrics: Vec::new(),
        })
    }
}

#[derive(sqlx::FromRow)]
struct RunMetricRow {
    run_id: String,
    node_id: String,
    name: String,
    number_value: f64,
    format: String,
}

impl From<RunMetricRow> for RunMetric {
    fn from(row: RunMetricRow) -> Self {
        RunMetric {
            run_id: row.run_id,
            node_id: row.node_id,
            name: row.name,
            number_value: row.number_value,
            format: row.format,
        }
    }
}
