//! Experiment operations

use chrono::Utc;
use pipelines_core::domain::{Experiment, FilterContext, ResourceType, StorageState};
use pipelines_core::{Error, Result, ResultExt};
use serde_json::json;
use uuid::Uuid;

use super::ResourceManager;
use crate::repository::{ListOptions, ListPage};

/// Jobs disabled per page while archiving an experiment
pub const ARCHIVE_PAGE_SIZE: i32 = 50;

const DEFAULT_EXPERIMENT_NAME: &str = "Default";
const DEFAULT_EXPERIMENT_DESCRIPTION: &str =
    "All runs created without specifying an experiment will be grouped here";

impl ResourceManager {
    /// Create the experiment runs fall into when none is given
    ///
    /// Returns the id of the default experiment, creating it on first call.
    pub async fn create_default_experiment(&self) -> Result<String> {
        let existing = self
            .stores
            .default_experiment
            .get_default_experiment_id()
            .await
            .context("Failed to check if the default experiment exists")?;
        if let Some(id) = existing.filter(|id| !id.is_empty()) {
            tracing::debug!("Default experiment already exists: {}", id);
            return Ok(id);
        }

        let experiment = self
            .create_experiment(Experiment {
                name: DEFAULT_EXPERIMENT_NAME.to_string(),
                description: DEFAULT_EXPERIMENT_DESCRIPTION.to_string(),
                namespace: self.default_namespace().to_string(),
                ..Default::default()
            })
            .await
            .context("Failed to create the default experiment")?;
        self.stores
            .default_experiment
            .set_default_experiment_id(&experiment.id)
            .await
            .context("Failed to set the default experiment id")?;

        tracing::info!("Default experiment created: {}", experiment.id);
        Ok(experiment.id)
    }

    /// Default experiment id, created lazily
    pub(super) async fn default_experiment_id(&self) -> Result<String> {
        let existing = self
            .stores
            .default_experiment
            .get_default_experiment_id()
            .await
            .context("Failed to fetch the default experiment id")?;
        match existing.filter(|id| !id.is_empty()) {
            Some(id) => Ok(id),
            None => self.create_default_experiment().await,
        }
    }

    pub async fn create_experiment(&self, mut experiment: Experiment) -> Result<Experiment> {
        if experiment.name.trim().is_empty() {
            return Err(Error::invalid_input("Experiment name cannot be empty"));
        }
        if experiment.id.is_empty() {
            experiment.id = Uuid::new_v4().to_string();
        }
        if experiment.namespace.is_empty() && !self.config.multi_user {
            experiment.namespace = self.default_namespace().to_string();
        }
        experiment.storage_state = StorageState::Available;
        experiment.created_at = Utc::now();

        let experiment = self.stores.experiments.create(&experiment).await?;
        tracing::info!("Experiment created: {} ({})", experiment.name, experiment.id);
        Ok(experiment)
    }

    pub async fn get_experiment(&self, id: &str) -> Result<Experiment> {
        self.stores.experiments.get(id).await
    }

    pub async fn list_experiments(
        &self,
        filter: &FilterContext,
        opts: &ListOptions,
    ) -> Result<ListPage<Experiment>> {
        self.stores
            .experiments
            .list(filter, opts)
            .await
            .context("Failed to list experiments")
    }

    /// Archive an experiment, its runs and its jobs
    ///
    /// Every job's scheduled workflow is disabled first, a page at a time. A
    /// failure part way leaves the experiment unarchived and the call can be
    /// repeated.
    pub async fn archive_experiment(&self, id: &str) -> Result<()> {
        let filter = FilterContext::by(ResourceType::Experiment, id);
        let disable = json!({"spec": {"enabled": false}});
        let mut opts = ListOptions::new(ARCHIVE_PAGE_SIZE, "", "name", false)
            .map_err(|e| Error::internal(e, format!("Failed to archive experiment {id}")))?;
        loop {
            let page = self.stores.jobs.list(&filter, &opts).await.map_err(|e| {
                Error::internal(e, format!("Failed to list jobs of to-be-archived experiment {id}"))
            })?;
            for job in &page.items {
                self.clients
                    .scheduled_workflows
                    .patch(&job.namespace, &job.k8s_name, &disable)
                    .await
                    .map_err(|e| {
                        Error::internal(
                            e,
                            format!("Failed to disable job {} while archiving experiment {id}", job.id),
                        )
                    })?;
            }
            if page.next_page_token.is_empty() {
                break;
            }
            opts = ListOptions::new(ARCHIVE_PAGE_SIZE, &page.next_page_token, "name", false)
                .map_err(|e| Error::internal(e, format!("Failed to page jobs of experiment {id}")))?;
        }

        self.stores
            .experiments
            .archive(id)
            .await
            .with_context(|| format!("Failed to archive experiment {id}"))?;
        tracing::info!("Experiment archived: {}", id);
        Ok(())
    }

    pub async fn unarchive_experiment(&self, id: &str) -> Result<()> {
        self.stores
            .experiments
            .unarchive(id)
            .await
            .with_context(|| format!("Failed to unarchive experiment {id}"))
    }

    pub async fn delete_experiment(&self, id: &str) -> Result<()> {
        self.stores
            .experiments
            .get(id)
            .await
            .with_context(|| format!("Failed to delete experiment {id} due to error fetching it"))?;
        self.stores.experiments.delete(id).await?;
        tracing::info!("Experiment deleted: {}", id);
        Ok(())
    }
}
