use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Experiments
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS experiments (
            id TEXT PRIMARY KEY,
            name VARCHAR(128) NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            namespace VARCHAR(63) NOT NULL DEFAULT '',
            storage_state VARCHAR(32) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            UNIQUE (name, namespace)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Pipelines and their versions
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipelines (
            id TEXT PRIMARY KEY,
            name VARCHAR(128) NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            namespace VARCHAR(63) NOT NULL DEFAULT '',
            status VARCHAR(32) NOT NULL,
            default_version_id TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            UNIQUE (name, namespace)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_versions (
            id TEXT PRIMARY KEY,
            name VARCHAR(128) NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            pipeline_id TEXT NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
            parameters TEXT NOT NULL DEFAULT '',
            pipeline_spec TEXT NOT NULL DEFAULT '',
            pipeline_spec_uri TEXT NOT NULL DEFAULT '',
            code_source_url TEXT NOT NULL DEFAULT '',
            status VARCHAR(32) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            UNIQUE (pipeline_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Runs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            id TEXT PRIMARY KEY,
            experiment_id TEXT NOT NULL,
            display_name VARCHAR(255) NOT NULL,
            k8s_name VARCHAR(255) NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            namespace VARCHAR(63) NOT NULL DEFAULT '',
            service_account VARCHAR(255) NOT NULL DEFAULT '',
            storage_state VARCHAR(32) NOT NULL,
            recurring_run_id TEXT,
            pipeline_id TEXT NOT NULL DEFAULT '',
            pipeline_version_id TEXT NOT NULL DEFAULT '',
            pipeline_name VARCHAR(255) NOT NULL DEFAULT '',
            workflow_spec_manifest TEXT NOT NULL DEFAULT '',
            pipeline_spec_manifest TEXT NOT NULL DEFAULT '',
            parameters TEXT NOT NULL DEFAULT '',
            runtime_parameters TEXT NOT NULL DEFAULT '',
            pipeline_root TEXT NOT NULL DEFAULT '',
            conditions VARCHAR(64) NOT NULL DEFAULT '',
            state VARCHAR(64) NOT NULL,
            state_history JSONB NOT NULL DEFAULT '[]',
            workflow_runtime_manifest TEXT NOT NULL DEFAULT '',
            pipeline_runtime_manifest TEXT NOT NULL DEFAULT '',
            created_at TIMESTAMPTZ NOT NULL,
            scheduled_at TIMESTAMPTZ,
            finished_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_metrics (
            run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            node_id VARCHAR(255) NOT NULL,
            name VARCHAR(64) NOT NULL,
            number_value DOUBLE PRECISION NOT NULL,
            format VARCHAR(32) NOT NULL,
            PRIMARY KEY (run_id, node_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Recurring runs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            display_name VARCHAR(255) NOT NULL,
            k8s_name VARCHAR(255) NOT NULL,
            namespace VARCHAR(63) NOT NULL DEFAULT '',
            service_account VARCHAR(255) NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            experiment_id TEXT NOT NULL,
            max_concurrency BIGINT NOT NULL,
            no_catchup BOOLEAN NOT NULL DEFAULT FALSE,
            enabled BOOLEAN NOT NULL,
            conditions VARCHAR(64) NOT NULL DEFAULT '',
            trigger JSONB,
            pipeline_id TEXT NOT NULL DEFAULT '',
            pipeline_version_id TEXT NOT NULL DEFAULT '',
            pipeline_name VARCHAR(255) NOT NULL DEFAULT '',
            workflow_spec_manifest TEXT NOT NULL DEFAULT '',
            pipeline_spec_manifest TEXT NOT NULL DEFAULT '',
            parameters TEXT NOT NULL DEFAULT '',
            runtime_parameters TEXT NOT NULL DEFAULT '',
            pipeline_root TEXT NOT NULL DEFAULT '',
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Tasks
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            namespace VARCHAR(63) NOT NULL DEFAULT '',
            pipeline_name VARCHAR(255) NOT NULL DEFAULT '',
            run_id TEXT NOT NULL,
            mlmd_execution_id TEXT NOT NULL DEFAULT '',
            created_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            finished_at TIMESTAMPTZ,
            fingerprint TEXT NOT NULL DEFAULT '',
            name VARCHAR(255) NOT NULL DEFAULT '',
            parent_task_id TEXT,
            state VARCHAR(64) NOT NULL,
            state_history JSONB NOT NULL DEFAULT '[]',
            mlmd_inputs TEXT NOT NULL DEFAULT '',
            mlmd_outputs TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Reference edges
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resource_references (
            resource_id TEXT NOT NULL,
            resource_type VARCHAR(32) NOT NULL,
            reference_id TEXT NOT NULL,
            reference_name VARCHAR(255) NOT NULL DEFAULT '',
            reference_type VARCHAR(32) NOT NULL,
            relationship VARCHAR(32) NOT NULL,
            PRIMARY KEY (resource_id, resource_type, reference_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS default_experiments (
            singleton BOOLEAN PRIMARY KEY DEFAULT TRUE CHECK (singleton),
            experiment_id TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes for list queries
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_experiment_id ON runs(experiment_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_created_at ON runs(created_at DESC)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_experiment_id ON jobs(experiment_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pipeline_versions_pipeline ON pipeline_versions(pipeline_id, created_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_run_id ON tasks(run_id, fingerprint)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_resource_references_reference ON resource_references(reference_type, reference_id)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
