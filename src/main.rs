use std::sync::Arc;

use template_catalog::config::AppConfig;
use template_catalog::store::PgStore;
use template_catalog::upstream::UpstreamClient;
use template_catalog::{create_app, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("template_catalog=debug")),
        )
        .init();

    let config = AppConfig::from_env()?;

    let pool = sqlx::PgPool::connect(&config.database_url).await?;
    sqlx::migrate!().run(&pool).await?;
    tracing::info!("Database migrations applied");

    let upstream = UpstreamClient::new(&config.upstream_base_url, config.upstream_timeout)?;
    let state = AppState::new(Arc::new(PgStore::new(pool)), Arc::new(upstream)).with_config(&config);

    if let Some(every) = config.sync_interval {
        tracing::info!(every_secs = every.as_secs(), "Scheduling periodic sync");
        tokio::spawn(state.sync.clone().run_periodic(every));
    }

    let app = create_app(state).await;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::debug!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
