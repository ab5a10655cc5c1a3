//! Pipeline Repository
//!
//! Handles all database operations related to pipelines and their versions.
//! Rows that are not `READY` are invisible to the plain getters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipelines_core::domain::{
    FilterContext, Pipeline, PipelineStatus, PipelineVersion, PipelineVersionStatus, ResourceType,
};
use pipelines_core::{Error, Result};
use sqlx::PgPool;

use super::list::{ListOptions, ListPage};
use super::{PipelineStore, db_error};

const PIPELINE_SORT_COLUMNS: &[(&str, &str)] = &[
    ("created_at", "created_at"),
    ("name", "name"),
    ("display_name", "name"),
    ("id", "id"),
];

const VERSION_SORT_COLUMNS: &[(&str, &str)] = &[
    ("created_at", "created_at"),
    ("name", "name"),
    ("display_name", "name"),
    ("id", "id"),
];

const PIPELINE_COLUMNS: &str =
    "id, name, description, namespace, status, default_version_id, created_at";

const VERSION_COLUMNS: &str = "id, name, description, pipeline_id, parameters, pipeline_spec, \
     pipeline_spec_uri, code_source_url, status, created_at";

pub struct PgPipelineStore {
    pool: PgPool,
}

impl PgPipelineStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_pipeline(&self, id: &str, ready_only: bool) -> Result<Pipeline> {
        let sql = format!(
            "SELECT {PIPELINE_COLUMNS} FROM pipelines WHERE id = $1 AND ($2::text IS NULL OR status = $2)"
        );
        let row = sqlx::query_as::<_, PipelineRow>(&sql)
            .bind(id)
            .bind(ready_only.then_some(PipelineStatus::Ready.as_str()))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(e, format!("Failed to get pipeline {id}")))?;

        row.ok_or_else(|| Error::resource_not_found("Pipeline", id))?
            .try_into()
    }

    async fn find_version(&self, id: &str, ready_only: bool) -> Result<PipelineVersion> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM pipeline_versions WHERE id = $1 AND ($2::text IS NULL OR status = $2)"
        );
        let row = sqlx::query_as::<_, PipelineVersionRow>(&sql)
            .bind(id)
            .bind(ready_only.then_some(PipelineVersionStatus::Ready.as_str()))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(e, format!("Failed to get pipeline version {id}")))?;

        row.ok_or_else(|| Error::resource_not_found("PipelineVersion", id))?
            .try_into()
    }
}

#[async_trait]
impl PipelineStore for PgPipelineStore {
    async fn create_pipeline(&self, pipeline: &Pipeline) -> Result<Pipeline> {
        let result = sqlx::query(
            r#"
            INSERT INTO pipelines (id, name, description, namespace, status, default_version_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&pipeline.id)
        .bind(&pipeline.name)
        .bind(&pipeline.description)
        .bind(&pipeline.namespace)
        .bind(pipeline.status.as_str())
        .bind(&pipeline.default_version_id)
        .bind(pipeline.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(pipeline.clone()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(Error::invalid_input(format!(
                    "Failed to create a new pipeline. The name {} already exists. Please specify a new name",
                    pipeline.name
                )))
            }
            Err(e) => Err(db_error(e, "Failed to create a new pipeline")),
        }
    }

    async fn get_pipeline(&self, id: &str) -> Result<Pipeline> {
        self.find_pipeline(id, true).await
    }

    async fn get_pipeline_with_status(&self, id: &str) -> Result<Pipeline> {
        self.find_pipeline(id, false).await
    }

    async fn get_pipeline_by_name_and_namespace(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Pipeline> {
        let sql = format!(
            "SELECT {PIPELINE_COLUMNS} FROM pipelines WHERE name = $1 AND namespace = $2 AND status = $3"
        );
        let row = sqlx::query_as::<_, PipelineRow>(&sql)
            .bind(name)
            .bind(namespace)
            .bind(PipelineStatus::Ready.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(e, format!("Failed to get pipeline {name} in {namespace:?}")))?;

        row.ok_or_else(|| Error::resource_not_found("Pipeline", format!("{namespace}/{name}")))?
            .try_into()
    }

    async fn list_pipelines(
        &self,
        filter: &FilterContext,
        opts: &ListOptions,
    ) -> Result<ListPage<Pipeline>> {
        let namespace = match &filter.reference_key {
            None => None,
            Some(key) if key.resource_type == ResourceType::Namespace => Some(key.id.as_str()),
            Some(key) => {
                return Err(Error::invalid_input(format!(
                    "Pipelines cannot be filtered by {}",
                    key.resource_type
                )));
            }
        };
        let name = opts.filter.name.as_deref();

        let where_clause = r#"
            WHERE status = $1
              AND ($2::text IS NULL OR namespace = $2)
              AND ($3::text IS NULL OR name = $3)
        "#;
        let sql = format!(
            "SELECT {PIPELINE_COLUMNS} FROM pipelines {where_clause} {} LIMIT $4 OFFSET $5",
            opts.order_clause(PIPELINE_SORT_COLUMNS)?
        );
        let rows = sqlx::query_as::<_, PipelineRow>(&sql)
            .bind(PipelineStatus::Ready.as_str())
            .bind(namespace)
            .bind(name)
            .bind(opts.fetch_limit())
            .bind(opts.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error(e, "Failed to list pipelines"))?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM pipelines {where_clause}"))
            .bind(PipelineStatus::Ready.as_str())
            .bind(namespace)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error(e, "Failed to count pipelines"))?;

        let pipelines = rows
            .into_iter()
            .map(Pipeline::try_from)
            .collect::<Result<Vec<_>>>()?;
        opts.page(pipelines, total)
    }

    async fn update_pipeline_status(&self, id: &str, status: PipelineStatus) -> Result<()> {
        let result = sqlx::query("UPDATE pipelines SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(e, format!("Failed to update the status of pipeline {id}")))?;

        if result.rows_affected() == 0 {
            return Err(Error::resource_not_found("Pipeline", id));
        }
        Ok(())
    }

    async fn update_pipeline_default_version(&self, id: &str, version_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE pipelines SET default_version_id = $1 WHERE id = $2")
            .bind(version_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(e, format!("Failed to update the default version of pipeline {id}")))?;

        if result.rows_affected() == 0 {
            return Err(Error::resource_not_found("Pipeline", id));
        }
        Ok(())
    }

    async fn delete_pipeline(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM pipelines WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(e, format!("Failed to delete pipeline {id}")))?;

        if result.rows_affected() == 0 {
            return Err(Error::resource_not_found("Pipeline", id));
        }
        Ok(())
    }

    async fn create_pipeline_version(&self, version: &PipelineVersion) -> Result<PipelineVersion> {
        let result = sqlx::query(
            r#"
            INSERT INTO pipeline_versions (
                id, name, description, pipeline_id, parameters, pipeline_spec,
                pipeline_spec_uri, code_source_url, status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&version.id)
        .bind(&version.name)
        .bind(&version.description)
        .bind(&version.pipeline_id)
        .bind(&version.parameters)
        .bind(&version.pipeline_spec)
        .bind(&version.pipeline_spec_uri)
        .bind(&version.code_source_url)
        .bind(version.status.as_str())
        .bind(version.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(version.clone()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(Error::invalid_input(format!(
                    "Failed to create a new pipeline version. The name {} already exists. Please specify a new name",
                    version.name
                )))
            }
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                Err(Error::resource_not_found("Pipeline", &version.pipeline_id))
            }
            Err(e) => Err(db_error(e, "Failed to create a new pipeline version")),
        }
    }

    async fn get_pipeline_version(&self, id: &str) -> Result<PipelineVersion> {
        self.find_version(id, true).await
    }

    async fn get_pipeline_version_with_status(&self, id: &str) -> Result<PipelineVersion> {
        self.find_version(id, false).await
    }

    async fn get_latest_pipeline_version(&self, pipeline_id: &str) -> Result<PipelineVersion> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM pipeline_versions WHERE pipeline_id = $1 AND status = $2 ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, PipelineVersionRow>(&sql)
            .bind(pipeline_id)
            .bind(PipelineVersionStatus::Ready.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                db_error(e, format!("Failed to get the latest version of pipeline {pipeline_id}"))
            })?;

        row.ok_or_else(|| Error::resource_not_found("Latest pipeline version of pipeline", pipeline_id))?
            .try_into()
    }

    async fn list_pipeline_versions(
        &self,
        pipeline_id: &str,
        opts: &ListOptions,
    ) -> Result<ListPage<PipelineVersion>> {
        let name = opts.filter.name.as_deref();
        let where_clause = r#"
            WHERE pipeline_id = $1
              AND status = $2
              AND ($3::text IS NULL OR name = $3)
        "#;
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM pipeline_versions {where_clause} {} LIMIT $4 OFFSET $5",
            opts.order_clause(VERSION_SORT_COLUMNS)?
        );
        let rows = sqlx::query_as::<_, PipelineVersionRow>(&sql)
            .bind(pipeline_id)
            .bind(PipelineVersionStatus::Ready.as_str())
            .bind(name)
            .bind(opts.fetch_limit())
            .bind(opts.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error(e, format!("Failed to list versions of pipeline {pipeline_id}")))?;

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM pipeline_versions {where_clause}"))
                .bind(pipeline_id)
                .bind(PipelineVersionStatus::Ready.as_str())
                .bind(name)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| db_error(e, "Failed to count pipeline versions"))?;

        let versions = rows
            .into_iter()
            .map(PipelineVersion::try_from)
            .collect::<Result<Vec<_>>>()?;
        opts.page(versions, total)
    }

    async fn count_pipeline_versions(&self, pipeline_id: &str) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM pipeline_versions WHERE pipeline_id = $1 AND status <> $2",
        )
        .bind(pipeline_id)
        .bind(PipelineVersionStatus::Deleting.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, format!("Failed to count versions of pipeline {pipeline_id}")))
    }

    async fn update_pipeline_version_status(
        &self,
        id: &str,
        status: PipelineVersionStatus,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE pipeline_versions SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                db_error(e, format!("Failed to update the status of pipeline version {id}"))
            })?;

        if result.rows_affected() == 0 {
            return Err(Error::resource_not_found("PipelineVersion", id));
        }
        Ok(())
    }

    async fn delete_pipeline_version(&self, id: &str) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error(e, "Failed to start a transaction"))?;

        let result = sqlx::query("DELETE FROM pipeline_versions WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(e, format!("Failed to delete pipeline version {id}")))?;
        if result.rows_affected() == 0 {
            return Err(Error::resource_not_found("PipelineVersion", id));
        }

        // Fall back to the newest remaining version
        sqlx::query(
            r#"
            UPDATE pipelines
            SET default_version_id = (
                SELECT v.id FROM pipeline_versions v
                WHERE v.pipeline_id = pipelines.id AND v.status = $2
                ORDER BY v.created_at DESC, v.id DESC
                LIMIT 1
            )
            WHERE default_version_id = $1
            "#,
        )
        .bind(id)
        .bind(PipelineVersionStatus::Ready.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error(e, format!("Failed to reset the default version after deleting {id}")))?;

        tx.commit()
            .await
            .map_err(|e| db_error(e, format!("Failed to delete pipeline version {id}")))
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: String,
    name: String,
    description: String,
    namespace: String,
    status: String,
    default_version_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PipelineRow> for Pipeline {
    type Error = Error;

    fn try_from(row: PipelineRow) -> Result<Self> {
        Ok(Pipeline {
            status: row.status.parse()?,
            id: row.id,
            name: row.name,
            description: row.description,
            namespace: row.namespace,
            default_version_id: row.default_version_id,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PipelineVersionRow {
    id: String,
    name: String,
    description: String,
    pipeline_id: String,
    parameters: String,
    pipeline_spec: String,
    pipeline_spec_uri: String,
    code_source_url: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<PipelineVersionRow> for PipelineVersion {
    type Error = Error;

    fn try_from(row: PipelineVersionRow) -> Result<Self> {
        Ok(PipelineVersion {
            status: row.status.parse()?,
            id: row.id,
            name: row.name,
            description: row.description,
            pipeline_id: row.pipeline_id,
            parameters: row.parameters,
            pipeline_spec: row.pipeline_spec,
            pipeline_spec_uri: row.pipeline_spec_uri,
            code_source_url: row.code_source_url,
            created_at: row.created_at,
        })
    }
}
