use std::sync::Arc;

use axum::Router;
use thiserror::Error;
use tracing::info;

use cotizador_core::config::{AppConfig, ConfigError, LoadOptions};
use cotizador_db::repositories::{
    SqlProductRepository, SqlQuoteRepository, SqlSequenceRepository,
};
use cotizador_db::{connect_with_settings, migrations, DbPool, QuoteNumberAllocator};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    Ok(Application { config, db_pool })
}

/// Wires the HTTP surfaces over the shared pool. Each module owns its
/// router; integrations that are not configured still mount and answer
/// with a service-unavailable body.
pub fn build_router(app: &Application) -> Router {
    let quotes = Arc::new(SqlQuoteRepository::new(app.db_pool.clone()));
    let products = Arc::new(SqlProductRepository::new(app.db_pool.clone()));
    let sequences = Arc::new(SqlSequenceRepository::new(app.db_pool.clone()));
    let allocator = Arc::new(QuoteNumberAllocator::new(sequences));

    Router::new()
        .merge(crate::api::router(quotes.clone(), allocator))
        .merge(crate::sync::router(products.clone(), &app.config.wix))
        .merge(crate::pdf::router(quotes.clone()))
        .merge(crate::email::router(quotes.clone(), &app.config.email))
        .merge(crate::insights::router(quotes, products, &app.config.insights))
}
