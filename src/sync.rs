//! Upstream synchronization and its periodic schedule.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{error, info};

use crate::error::{CatalogError, CatalogResult};
use crate::reconciler::{reconcile, ReconcileSummary};
use crate::store::CatalogStore;
use crate::upstream::TemplateSource;

/// Runs reconciliations, never more than one at a time per process.
#[derive(Clone)]
pub struct SyncRunner {
    store: Arc<dyn CatalogStore>,
    source: Arc<dyn TemplateSource>,
    running: Arc<Mutex<()>>,
}

impl SyncRunner {
    pub fn new(store: Arc<dyn CatalogStore>, source: Arc<dyn TemplateSource>) -> Self {
        Self {
            store,
            source,
            running: Arc::new(Mutex::new(())),
        }
    }

    /// Pulls subspecialties and templates and reconciles both.
    pub async fn sync_all(&self) -> CatalogResult<ReconcileSummary> {
        let _guard = self.acquire()?;
        let subspecialties = self.source.fetch_subspecialties().await?;
        let templates = self.source.fetch_templates().await?;
        info!(
            subspecialties = subspecialties.len(),
            templates = templates.len(),
            "Fetched upstream catalog"
        );
        reconcile(self.store.as_ref(), &subspecialties, &templates).await
    }

    /// Pulls subspecialties only. The association table is rebuilt from an
    /// empty template set, so every count drops to zero until the next full sync.
    pub async fn sync_subspecialties(&self) -> CatalogResult<ReconcileSummary> {
        let _guard = self.acquire()?;
        let subspecialties = self.source.fetch_subspecialties().await?;
        reconcile(self.store.as_ref(), &subspecialties, &[]).await
    }

    fn acquire(&self) -> CatalogResult<tokio::sync::MutexGuard<'_, ()>> {
        self.running
            .try_lock()
            .map_err(|_| CatalogError::Conflict("a synchronization is already running".into()))
    }

    /// Calls [`SyncRunner::sync_all`] every `every`, starting immediately.
    /// A tick that finds a run in progress is skipped.
    pub async fn run_periodic(self, every: Duration) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match self.sync_all().await {
                Ok(summary) => info!(
                    templates = summary.templates_processed,
                    errors = summary.errors.len(),
                    "Scheduled sync finished"
                ),
                Err(CatalogError::Conflict(_)) => {
                    info!("Scheduled sync skipped, another run is active")
                }
                Err(e) => error!(error = %e, "Scheduled sync failed"),
            }
        }
    }
}
