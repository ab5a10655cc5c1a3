//! Experiment Repository
//!
//! Handles all database operations related to experiments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipelines_core::domain::{Experiment, FilterContext, ResourceType, StorageState};
use pipelines_core::{Error, Result};
use sqlx::PgPool;

use super::list::{ListOptions, ListPage};
use super::{ExperimentStore, db_error};

const SORT_COLUMNS: &[(&str, &str)] = &[
    ("created_at", "created_at"),
    ("name", "name"),
    ("display_name", "name"),
    ("id", "id"),
];

pub struct PgExperimentStore {
    pool: PgPool,
}

impl PgExperimentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExperimentStore for PgExperimentStore {
    async fn create(&self, experiment: &Experiment) -> Result<Experiment> {
        let result = sqlx::query(
            r#"
            INSERT INTO experiments (id, name, description, namespace, storage_state, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&experiment.id)
        .bind(&experiment.name)
        .bind(&experiment.description)
        .bind(&experiment.namespace)
        .bind(experiment.storage_state.as_str())
        .bind(experiment.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(experiment.clone()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(Error::invalid_input(format!(
                    "Failed to create a new experiment. The name {} already exists. Please specify a new name",
                    experiment.name
                )))
            }
            Err(e) => Err(db_error(e, "Failed to create a new experiment")),
        }
    }

    async fn get(&self, id: &str) -> Result<Experiment> {
        let row = sqlx::query_as::<_, ExperimentRow>(
            r#"
            SELECT id, name, description, namespace, storage_state, created_at
            FROM experiments
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error(e, format!("Failed to get experiment {id}")))?;

        row.ok_or_else(|| Error::resource_not_found("Experiment", id))?
            .try_into()
    }

    async fn get_by_name_namespace(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Experiment>> {
        let row = sqlx::query_as::<_, ExperimentRow>(
            r#"
            SELECT id, name, description, namespace, storage_state, created_at
            FROM experiments
            WHERE name = $1 AND namespace = $2
            "#,
        )
        .bind(name)
        .bind(namespace)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error(e, format!("Failed to get experiment {name} in {namespace:?}")))?;

        row.map(Experiment::try_from).transpose()
    }

    async fn list(
        &self,
        filter: &FilterContext,
        opts: &ListOptions,
    ) -> Result<ListPage<Experiment>> {
        let namespace = match &filter.reference_key {
            None => None,
            Some(key) if key.resource_type == ResourceType::Namespace => Some(key.id.as_str()),
            Some(key) => {
                return Err(Error::invalid_input(format!(
                    "Experiments cannot be filtered by {}",
                    key.resource_type
                )));
            }
        };
        let storage_state = opts.filter.storage_state.map(|s| s.as_str());
        let name = opts.filter.name.as_deref();

        let where_clause = r#"
            WHERE ($1::text IS NULL OR namespace = $1)
              AND ($2::text IS NULL OR storage_state = $2)
              AND ($3::text IS NULL OR name = $3)
        "#;
        let sql = format!(
            "SELECT id, name, description, namespace, storage_state, created_at FROM experiments {where_clause} {} LIMIT $4 OFFSET $5",
            opts.order_clause(SORT_COLUMNS)?
        );
        let rows = sqlx::query_as::<_, ExperimentRow>(&sql)
            .bind(namespace)
            .bind(storage_state)
            .bind(name)
            .bind(opts.fetch_limit())
            .bind(opts.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error(e, "Failed to list experiments"))?;

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM experiments {where_clause}"))
                .bind(namespace)
                .bind(storage_state)
                .bind(name)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| db_error(e, "Failed to count experiments"))?;

        let experiments = rows
            .into_iter()
            .map(Experiment::try_from)
            .collect::<Result<Vec<_>>>()?;
        opts.page(experiments, total)
    }

    async fn archive(&self, id: &str) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error(e, "Failed to start a transaction"))?;

        let result = sqlx::query("UPDATE experiments SET storage_state = $1 WHERE id = $2")
            .bind(StorageState::Archived.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(e, format!("Failed to archive experiment {id}")))?;
        if result.rows_affected() == 0 {
            return Err(Error::resource_not_found("Experiment", id));
        }

        sqlx::query("UPDATE runs SET storage_state = $1 WHERE experiment_id = $2")
            .bind(StorageState::Archived.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(e, format!("Failed to archive the runs of experiment {id}")))?;

        sqlx::query("UPDATE jobs SET enabled = FALSE, updated_at = $1 WHERE experiment_id = $2")
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(e, format!("Failed to disable the jobs of experiment {id}")))?;

        tx.commit()
            .await
            .map_err(|e| db_error(e, format!("Failed to archive experiment {id}")))
    }

    async fn unarchive(&self, id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE experiments SET storage_state = $1 WHERE id = $2")
            .bind(StorageState::Available.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(e, format!("Failed to unarchive experiment {id}")))?;

        if result.rows_affected() == 0 {
            return Err(Error::resource_not_found("Experiment", id));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error(e, "Failed to start a transaction"))?;

        let result = sqlx::query("DELETE FROM experiments WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(e, format!("Failed to delete experiment {id}")))?;
        if result.rows_affected() == 0 {
            return Err(Error::resource_not_found("Experiment", id));
        }

        sqlx::query("DELETE FROM resource_references WHERE resource_id = $1 AND resource_type = $2")
            .bind(id)
            .bind(ResourceType::Experiment.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(e, format!("Failed to delete references of experiment {id}")))?;

        sqlx::query("DELETE FROM default_experiments WHERE experiment_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(e, "Failed to clear the default experiment"))?;

        tx.commit()
            .await
            .map_err(|e| db_error(e, format!("Failed to delete experiment {id}")))
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ExperimentRow {
    id: String,
    name: String,
    description: String,
    namespace: String,
    storage_state: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ExperimentRow> for Experiment {
    type Error = Error;

    fn try_from(row: ExperimentRow) -> Result<Self> {
        Ok(Experiment {
            storage_state: row.storage_state.parse()?,
            id: row.id,
            name: row.name,
            description: row.description,
            namespace: row.namespace,
            created_at: row.created_at,
        })
    }
}
