//! Conductor webhook server

use clap::Parser;
use conductor_api::services::{BuildbucketClient, GitHubClient};
use conductor_api::{AppState, ServerConfig, routes};
use conductor_config::load_system_config;
use conductor_core::datastore::Datastore;
use conductor_db::{MemoryDatastore, PgDatastore, create_pool, run_migrations};
use conductor_scheduler::Scheduler;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    let subscriber = tracing_subscriber::fmt().with_env_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let system = load_system_config(&config.system_config)?;
    info!(
        path = %config.system_config.display(),
        repositories = system.repositories.len(),
        "Loaded system configuration"
    );

    let datastore: Arc<dyn Datastore> = match &config.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let pool = create_pool(url).await?;
            run_migrations(&pool).await?;
            info!("Database connected");
            Arc::new(PgDatastore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set; commits are kept in memory");
            Arc::new(MemoryDatastore::new())
        }
    };

    let github = Arc::new(GitHubClient::new(
        config.github_api_url.clone(),
        config.github_token.clone(),
        system.config_path.clone(),
    ));
    let buildbucket = Arc::new(BuildbucketClient::new(
        config.buildbucket_url.clone(),
        config.buildbucket_project.clone(),
        config.buildbucket_bucket.clone(),
        config.buildbucket_token.clone(),
    ));

    let scheduler = Scheduler::new(
        Arc::new(system),
        github.clone(),
        datastore,
        github,
        buildbucket,
    );

    let app = routes::router(AppState::new(scheduler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Starting server on {}", config.listen_addr);
    let listener = TcpListener::bind(config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
