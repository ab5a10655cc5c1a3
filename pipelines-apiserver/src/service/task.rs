//! Task operations

use chrono::Utc;
use pipelines_core::domain::{FilterContext, Task};
use pipelines_core::{Error, Result, ResultExt};
use uuid::Uuid;

use super::ResourceManager;
use crate::repository::{ListOptions, ListPage};

impl ResourceManager {
    /// Record a node execution of a run
    ///
    /// A task whose fingerprint was already reported for the same run is
    /// returned as is.
    pub async fn create_task(&self, mut task: Task) -> Result<Task> {
        if task.run_id.is_empty() {
            return Err(Error::invalid_input("Task must belong to a run"));
        }
        let namespace = self
            .namespace_from_run_id(&task.run_id)
            .await
            .with_context(|| format!("Failed to create a task for run {}", task.run_id))?;
        if task.namespace.is_empty() {
            task.namespace = namespace;
        } else if task.namespace != namespace {
            return Err(Error::invalid_input(format!(
                "Task namespace '{}' does not match the namespace '{namespace}' of run {}",
                task.namespace, task.run_id
            )));
        }

        if !task.fingerprint.is_empty() {
            let existing = self
                .stores
                .tasks
                .find_by_fingerprint(&task.run_id, &task.fingerprint)
                .await
                .context("Failed to look up tasks by fingerprint")?;
            if let Some(existing) = existing {
                tracing::debug!(
                    "Task {} of run {} already reported with fingerprint {}",
                    existing.id,
                    task.run_id,
                    task.fingerprint
                );
                return Ok(existing);
            }
        }

        if task.id.is_empty() {
            task.id = Uuid::new_v4().to_string();
        }
        task.created_at = Utc::now();
        let task = self
            .stores
            .tasks
            .create(&task)
            .await
            .with_context(|| format!("Failed to create a task for run {}", task.run_id))?;
        tracing::info!("Task created: {} ({}) in run {}", task.name, task.id, task.run_id);
        Ok(task)
    }

    pub async fn get_task(&self, id: &str) -> Result<Task> {
        self.stores
            .tasks
            .get(id)
            .await
            .with_context(|| format!("Failed to fetch task {id}"))
    }

    pub async fn list_tasks(
        &self,
        filter: &FilterContext,
        opts: &ListOptions,
    ) -> Result<ListPage<Task>> {
        self.stores
            .tasks
            .list(filter, opts)
            .await
            .context("Failed to list tasks")
    }
}
