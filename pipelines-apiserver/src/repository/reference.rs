//! Reference Repository
//!
//! Reference edges between resources and the default experiment pointer.

use async_trait::async_trait;
use pipelines_core::domain::{ResourceReference, ResourceType};
use pipelines_core::{Error, Result};
use sqlx::{PgPool, Postgres, Transaction};

use super::{DefaultExperimentStore, ResourceReferenceStore, db_error};

/// Write reference edges inside the transaction of their owning row
pub(crate) async fn insert_references(
    tx: &mut Transaction<'static, Postgres>,
    references: &[ResourceReference],
) -> Result<()> {
    for reference in references {
        sqlx::query(
            r#"
            INSERT INTO resource_references (
                resource_id, resource_type, reference_id, reference_name, reference_type, relationship
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (resource_id, resource_type, reference_type) DO UPDATE
            SET reference_id = EXCLUDED.reference_id,
                reference_name = EXCLUDED.reference_name,
                relationship = EXCLUDED.relationship
            "#,
        )
        .bind(&reference.resource_id)
        .bind(reference.resource_type.as_str())
        .bind(&reference.reference_id)
        .bind(&reference.reference_name)
        .bind(reference.reference_type.as_str())
        .bind(reference.relationship.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            db_error(
                e,
                format!(
                    "Failed to store the {} reference of {} {}",
                    reference.reference_type, reference.resource_type, reference.resource_id
                ),
            )
        })?;
    }
    Ok(())
}

pub struct PgResourceReferenceStore {
    pool: PgPool,
}

impl PgResourceReferenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceReferenceStore for PgResourceReferenceStore {
    async fn get_reference(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
        reference_type: ResourceType,
    ) -> Result<ResourceReference> {
        let row = sqlx::query_as::<_, ReferenceRow>(
            r#"
            SELECT resource_id, resource_type, reference_id, reference_name, reference_type, relationship
            FROM resource_references
            WHERE resource_id = $1 AND resource_type = $2 AND reference_type = $3
            "#,
        )
        .bind(resource_id)
        .bind(resource_type.as_str())
        .bind(reference_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            db_error(e, format!("Failed to get the {reference_type} reference of {resource_type} {resource_id}"))
        })?;

        row.ok_or_else(|| {
            Error::resource_not_found(
                format!("{reference_type} reference of {resource_type}"),
                resource_id,
            )
        })?
        .try_into()
    }
}

pub struct PgDefaultExperimentStore {
    pool: PgPool,
}

impl PgDefaultExperimentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DefaultExperimentStore for PgDefaultExperimentStore {
    async fn get_default_experiment_id(&self) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT experiment_id FROM default_experiments WHERE singleton")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(e, "Failed to get the default experiment"))
    }

    async fn set_default_experiment_id(&self, id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO default_experiments (singleton, experiment_id)
            VALUES (TRUE, $1)
            ON CONFLICT (singleton) DO UPDATE SET experiment_id = EXCLUDED.experiment_id
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(e, "Failed to set the default experiment"))?;
        Ok(())
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
pub(crate) struct ReferenceRow {
    resource_id: String,
    resource_type: String,
    reference_id: String,
    reference_name: String,
    reference_type: String,
    relationship: String,
}

impl TryFrom<ReferenceRow> for ResourceReference {
    type Error = Error;

    fn try_from(row: ReferenceRow) -> Result<Self> {
        Ok(ResourceReference {
            resource_type: row.resource_type.parse()?,
            reference_type: row.reference_type.parse()?,
            relationship: row.relationship.parse()?,
            resource_id: row.resource_id,
            reference_id: row.reference_id,
            reference_name: row.reference_name,
        })
    }
}
