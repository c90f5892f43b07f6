//! # Template Catalog
//! Mirrors a remote radiology report-template catalog into Postgres and
//! serves it over HTTP.
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

pub mod catalog_types;
pub mod config;
pub mod error;
pub mod generator;
pub mod handlers;
pub mod reconciler;
pub mod refresher;
pub mod store;
pub mod sync;
pub mod upstream;

use config::AppConfig;
use generator::GeneratePolicy;
use refresher::RefreshPolicy;
use store::CatalogStore;
use sync::SyncRunner;
use upstream::TemplateSource;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CatalogStore>,
    pub source: Arc<dyn TemplateSource>,
    pub sync: SyncRunner,
    pub refresh_policy: RefreshPolicy,
    pub generate_policy: GeneratePolicy,
}

impl AppState {
    pub fn new(store: Arc<dyn CatalogStore>, source: Arc<dyn TemplateSource>) -> Self {
        Self {
            sync: SyncRunner::new(Arc::clone(&store), Arc::clone(&source)),
            store,
            source,
            refresh_policy: RefreshPolicy::default(),
            generate_policy: GeneratePolicy::default(),
        }
    }

    pub fn with_config(mut self, config: &AppConfig) -> Self {
        self.refresh_policy = config.refresh.clone();
        self.generate_policy = config.generate.clone();
        self
    }
}

/// Used to create axum Router types that can be used elsewhere
///
pub async fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/subspecialties", get(handlers::list_subspecialties))
        .route("/subspecialties/:code", get(handlers::get_subspecialty))
        .route(
            "/subspecialties/:code/templates",
            get(handlers::get_subspecialty_templates),
        )
        .route("/templates", get(handlers::list_templates))
        .route("/templates/refresh", post(handlers::refresh_templates))
        .route("/templates/generate", post(handlers::generate_templates))
        .route("/templates/:template_id", get(handlers::get_template))
        .route(
            "/templates/:template_id/refresh",
            post(handlers::refresh_template),
        )
        .route("/sync", post(handlers::sync_all))
        .route("/sync/subspecialties", post(handlers::sync_subspecialties))
        .route("/heartbeat", get(handlers::heartbeat))
        .with_state(state)
}
