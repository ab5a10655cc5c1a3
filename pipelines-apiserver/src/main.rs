use std::sync::Arc;

use anyhow::Context;
use pipelines_apiserver::api::{self, AppState};
use pipelines_apiserver::config::ServerConfig;
use pipelines_apiserver::db;
use pipelines_apiserver::k8s::http::KubeClient;
use pipelines_apiserver::objectstore::LocalObjectStore;
use pipelines_apiserver::repository::{
    PgDefaultExperimentStore, PgExperimentStore, PgJobStore, PgPipelineStore,
    PgResourceReferenceStore, PgRunStore, PgTaskStore,
};
use pipelines_apiserver::service::{Clients, ResourceManager, Stores};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipelines_apiserver=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting pipelines API server...");

    let config = Arc::new(ServerConfig::from_env()?);
    tracing::info!(
        "Multi-user mode: {}, default namespace: {}",
        config.multi_user,
        config.default_namespace()
    );

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;
    tracing::info!("Database connection pool created");

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let stores = Stores {
        experiments: Arc::new(PgExperimentStore::new(pool.clone())),
        pipelines: Arc::new(PgPipelineStore::new(pool.clone())),
        runs: Arc::new(PgRunStore::new(pool.clone())),
        jobs: Arc::new(PgJobStore::new(pool.clone())),
        tasks: Arc::new(PgTaskStore::new(pool.clone())),
        references: Arc::new(PgResourceReferenceStore::new(pool.clone())),
        default_experiment: Arc::new(PgDefaultExperimentStore::new(pool)),
    };

    let kube = Arc::new(
        KubeClient::try_default()
            .await
            .context("Failed to create the Kubernetes client")?,
    );
    let clients = Clients {
        workflows: kube.clone(),
        scheduled_workflows: kube.clone(),
        pods: kube.clone(),
        access_review: kube,
        object_store: Arc::new(LocalObjectStore::new(config.object_store_root.clone())),
    };

    let manager = Arc::new(ResourceManager::new(stores, clients, config.clone()));
    let default_experiment = manager
        .create_default_experiment()
        .await
        .context("Failed to create the default experiment")?;
    tracing::info!("Default experiment: {}", default_experiment);

    // Build router with all API endpoints
    let app = api::create_router(AppState::new(manager, config.clone()));

    tracing::info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;
    Ok(())
}
