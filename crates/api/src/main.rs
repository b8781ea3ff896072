use std::sync::Arc;

use anyhow::Context;

use keel_api::app::{self, services::AppServices};
use keel_api::background::BackgroundTracker;
use keel_api::config::ServiceConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    keel_observability::init();

    let config = ServiceConfig::from_env().context("invalid configuration")?;
    let verifier = Arc::new(config.token_verifier().context("failed to load token key")?);
    let tracker = BackgroundTracker::new();

    let services = match &config.database {
        Some(db) => AppServices::postgres(db, config.db_timeout, tracker.clone())
            .await
            .context("failed to initialise database")?,
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory storage with a dev caller");
            AppServices::in_memory(app::services::dev_users(), tracker.clone())
        }
    };

    let router = app::build_app(Arc::new(services), verifier);

    let listener = tokio::net::TcpListener::bind(config.address)
        .await
        .with_context(|| format!("failed to bind {}", config.address))?;

    tracing::info!(
        service = %config.service_name,
        addr = %listener.local_addr()?,
        "listening"
    );

    keel_api::server::serve(listener, router, config.shutdown_grace, tracker).await?;
    Ok(())
}
