mod auth;
mod config;
mod dto;
mod error;
mod lifecycle;
mod routes;
mod sns;
mod state;
mod sweeper;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use hw_db::{MemoryRepository, PgRepository, Repository};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::routes::api_router;
use crate::sns::SnsVerifier;
use crate::state::AppState;
use crate::sweeper::spawn_sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env()?;

    // Storage
    let repo: Arc<dyn Repository> = if config.uses_memory_storage() {
        tracing::warn!("using in-memory storage; state is lost on restart");
        Arc::new(MemoryRepository::new(config.retention))
    } else {
        let pool = hw_db::create_pool(&config.database_url).await?;
        hw_db::run_migrations(&pool).await?;
        Arc::new(PgRepository::new(pool, config.retention))
    };

    // AWS
    let providers = hw_infra::build_providers(&config.aws_region).await;

    let verifier = SnsVerifier::new(config.sns_verify, &config.aws_region);
    if !verifier.is_enabled() {
        tracing::warn!("SNS signature verification is disabled");
    }

    spawn_sweeper(repo.clone(), config.sweep_interval);

    let state = AppState {
        repo,
        providers,
        verifier,
        config: config.clone(),
    };

    let app = api_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "starting lifecycle hook service");

    axum::serve(listener, app).await?;
    Ok(())
}
