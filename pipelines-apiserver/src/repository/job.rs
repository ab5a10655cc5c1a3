//! Job Repository
//!
//! Handles all database operations related to recurring runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipelines_core::domain::{
    FilterContext, Job, PipelineSpec, ResourceReference, ResourceType, RuntimeConfig, Trigger,
};
use pipelines_core::{Error, Result};
use sqlx::PgPool;
use sqlx::types::Json;

use super::list::{ListOptions, ListPage};
use super::reference::{ReferenceRow, insert_references};
use super::{JobStore, db_error};

const SORT_COLUMNS: &[(&str, &str)] = &[
    ("created_at", "created_at"),
    ("name", "display_name"),
    ("display_name", "display_name"),
    ("updated_at", "updated_at"),
    ("id", "id"),
];

const JOB_COLUMNS: &str = "id, display_name, k8s_name, namespace, service_account, description, \
     experiment_id, max_concurrency, no_catchup, enabled, conditions, trigger, pipeline_id, \
     pipeline_version_id, pipeline_name, workflow_spec_manifest, pipeline_spec_manifest, \
     parameters, runtime_parameters, pipeline_root, created_at, updated_at";

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn attach_references(&self, mut jobs: Vec<Job>) -> Result<Vec<Job>> {
        if jobs.is_empty() {
            return Ok(jobs);
        }
        let ids: Vec<String> = jobs.iter().map(|j| j.id.clone()).collect();
        let rows = sqlx::query_as::<_, ReferenceRow>(
            r#"
            SELECT resource_id, resource_type, reference_id, reference_name, reference_type, relationship
            FROM resource_references
            WHERE resource_type = $1 AND resource_id = ANY($2)
            "#,
        )
        .bind(ResourceType::Job.as_str())
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error(e, "Failed to load job references"))?;

        let mut by_job: HashMap<String, Vec<ResourceReference>> = HashMap::new();
        for row in rows {
            let reference = ResourceReference::try_from(row)?;
            by_job
                .entry(reference.resource_id.clone())
                .or_default()
                .push(reference);
        }
        for job in &mut jobs {
            job.resource_references = by_job.remove(&job.id).unwrap_or_default();
        }
        Ok(jobs)
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &Job) -> Result<Job> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error(e, "Failed to start a transaction"))?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, display_name, k8s_name, namespace, service_account, description,
                experiment_id, max_concurrency, no_catchup, enabled, conditions, trigger,
                pipeline_id, pipeline_version_id, pipeline_name, workflow_spec_manifest,
                pipeline_spec_manifest, parameters, runtime_parameters, pipeline_root,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22)
            "#,
        )
        .bind(&job.id)
        .bind(&job.display_name)
        .bind(&job.k8s_name)
        .bind(&job.namespace)
        .bind(&job.service_account)
        .bind(&job.description)
        .bind(&job.experiment_id)
        .bind(job.max_concurrency)
        .bind(job.no_catchup)
        .bind(job.enabled)
        .bind(&job.conditions)
        .bind(job.trigger.as_ref().map(Json))
        .bind(&job.pipeline_spec.pipeline_id)
        .bind(&job.pipeline_spec.pipeline_version_id)
        .bind(&job.pipeline_spec.pipeline_name)
        .bind(&job.pipeline_spec.workflow_spec_manifest)
        .bind(&job.pipeline_spec.pipeline_spec_manifest)
        .bind(&job.pipeline_spec.parameters)
        .bind(&job.pipeline_spec.runtime_config.parameters)
        .bind(&job.pipeline_spec.runtime_config.pipeline_root)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(Error::invalid_input(format!("Job {} already exists", job.id)));
            }
            Err(e) => return Err(db_error(e, "Failed to store job")),
        }

        insert_references(&mut tx, &job.resource_references).await?;
        tx.commit()
            .await
            .map_err(|e| db_error(e, format!("Failed to store job {}", job.id)))?;
        Ok(job.clone())
    }

    async fn get(&self, id: &str) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(e, format!("Failed to get job {id}")))?;

        let job = Job::try_from(row.ok_or_else(|| Error::resource_not_found("Job", id))?)?;
        self.attach_references(vec![job])
            .await?
            .pop()
            .ok_or_else(|| Error::resource_not_found("Job", id))
    }

    async fn list(&self, filter: &FilterContext, opts: &ListOptions) -> Result<ListPage<Job>> {
        let (mut experiment_id, mut namespace, mut reference_type, mut reference_id) =
            (None, None, None, None);
        if let Some(key) = &filter.reference_key {
            match key.resource_type {
                ResourceType::Experiment => experiment_id = Some(key.id.as_str()),
                ResourceType::Namespace => namespace = Some(key.id.as_str()),
                other => {
                    reference_type = Some(other.as_str());
                    reference_id = Some(key.id.as_str());
                }
            }
        }
        let name = opts.filter.name.as_deref();

        let where_clause = r#"
            WHERE ($1::text IS NULL OR experiment_id = $1)
              AND ($2::text IS NULL OR namespace = $2)
              AND ($3::text IS NULL OR id IN (
                    SELECT resource_id FROM resource_references
                    WHERE resource_type = 'Job' AND reference_type = $3 AND reference_id = $4))
              AND ($5::text IS NULL OR display_name = $5)
        "#;
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs {where_clause} {} LIMIT $6 OFFSET $7",
            opts.order_clause(SORT_COLUMNS)?
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(experiment_id)
            .bind(namespace)
            .bind(reference_type)
            .bind(reference_id)
            .bind(name)
            .bind(opts.fetch_limit())
            .bind(opts.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error(e, "Failed to list jobs"))?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM jobs {where_clause}"))
            .bind(experiment_id)
            .bind(namespace)
            .bind(reference_type)
            .bind(reference_id)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error(e, "Failed to count jobs"))?;

        let jobs = rows
            .into_iter()
            .map(Job::try_from)
            .collect::<Result<Vec<_>>>()?;
        let jobs = self.attach_references(jobs).await?;
        opts.page(jobs, total)
    }

    async fn enable(&self, id: &str, enabled: bool) -> Result<()> {
        let result = sqlx::query("UPDATE jobs SET enabled = $1, updated_at = $2 WHERE id = $3")
            .bind(enabled)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(e, format!("Failed to update the enabled flag of job {id}")))?;

        if result.rows_affected() == 0 {
            return Err(Error::resource_not_found("Job", id));
        }
        Ok(())
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET conditions = $1, enabled = $2, max_concurrency = $3, no_catchup = $4,
                trigger = $5, updated_at = $6
            WHERE id = $7
            "#,
        )
        .bind(&job.conditions)
        .bind(job.enabled)
        .bind(job.max_concurrency)
        .bind(job.no_catchup)
        .bind(job.trigger.as_ref().map(Json))
        .bind(job.updated_at)
        .bind(&job.id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(e, format!("Failed to update job {}", job.id)))?;

        if result.rows_affected() == 0 {
            return Err(Error::resource_not_found("Job", &job.id));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error(e, "Failed to start a transaction"))?;

        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(e, format!("Failed to delete job {id}")))?;
        if result.rows_affected() == 0 {
            return Err(Error::resource_not_found("Job", id));
        }

        sqlx::query("DELETE FROM resource_references WHERE resource_id = $1 AND resource_type = $2")
            .bind(id)
            .bind(ResourceType::Job.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(e, format!("Failed to delete references of job {id}")))?;

        tx.commit()
            .await
            .map_err(|e| db_error(e, format!("Failed to delete job {id}")))
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    display_name: String,
    k8s_name: String,
    namespace: String,
    service_account: String,
    description: String,
    experiment_id: String,
    max_concurrency: i64,
    no_catchup: bool,
    enabled: bool,
    conditions: String,
    trigger: Option<Json<Trigger>>,
    pipeline_id: String,
    pipeline_version_id: String,
    pipeline_name: String,
    workflow_spec_manifest: String,
    pipeline_spec_manifest: String,
    parameters: String,
    runtime_parameters: String,
    pipeline_root: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = Error;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Job {
            id: row.id,
            display_name: row.display_name,
            k8s_name: row.k8s_name,
            namespace: row.namespace,
            service_account: row.service_account,
            description: row.description,
            experiment_id: row.experiment_id,
            max_concurrency: row.max_concurrency,
            no_catchup: row.no_catchup,
            enabled: row.enabled,
            conditions: row.conditions,
            trigger: row.trigger.map(|t| t.0),
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
            created_at: row.created_at,
            updated_at: row.updated_at,
            resource_references: Vec::new(),
        })
    }
}
