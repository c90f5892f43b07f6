#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use template_catalog::catalog_types::{
    GeneratedContent, Page, Paged, RawSubspecialty, RawTemplate, RawTemplateDetail, Subspecialty,
    Template, TemplateFilter, TemplatePatch, TemplateSummary,
};
use template_catalog::error::{CatalogError, CatalogResult};
use template_catalog::store::{CatalogStore, MemoryStore, ReconcileTx};
use template_catalog::upstream::TemplateSource;

pub fn raw_subspecialty(code: &str, name: &str) -> RawSubspecialty {
    RawSubspecialty {
        code: Some(code.to_string()),
        short_name: Some(code.to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

pub fn raw_template(template_id: &str, title: &str, spec_code: &str) -> RawTemplate {
    RawTemplate {
        template_id: Some(template_id.to_string()),
        template_version: Some("1".to_string()),
        title: Some(title.to_string()),
        lang: Some("en".to_string()),
        created: Some("2012-03-01 10:00:00".to_string()),
        spec_code: Some(spec_code.to_string()),
        views: Some(0),
        downloads: Some(0),
        ..Default::default()
    }
}

pub fn catalog_subspecialties() -> Vec<RawSubspecialty> {
    vec![
        raw_subspecialty("CA", "Cardiac"),
        raw_subspecialty("CH", "Chest"),
        raw_subspecialty("CT", "Computed Tomography"),
        raw_subspecialty("NR", "Neuroradiology"),
    ]
}

/// Counts calls currently running and the highest count seen.
#[derive(Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Scripted [`TemplateSource`].
///
/// Detail calls pop the next scripted response for the template id; when the
/// script is empty the call fails with an upstream error. `detail_delay`
/// keeps each detail call open long enough to observe overlap.
#[derive(Default)]
pub struct FakeSource {
    pub subspecialties: Vec<RawSubspecialty>,
    pub templates: Vec<RawTemplate>,
    pub listing_fails: bool,
    pub detail_delay: Duration,
    details: Mutex<HashMap<String, VecDeque<Option<RawTemplateDetail>>>>,
    detail_calls: Mutex<HashMap<String, usize>>,
    detail_order: Mutex<Vec<String>>,
    detail_in_flight: InFlight,
    listing_calls: Mutex<usize>,
}

impl FakeSource {
    pub fn new(subspecialties: Vec<RawSubspecialty>, templates: Vec<RawTemplate>) -> Self {
        Self {
            subspecialties,
            templates,
            ..Default::default()
        }
    }

    /// Queues detail responses for `template_id`; `None` is a failed call.
    pub fn script_details(&self, template_id: &str, responses: Vec<Option<RawTemplateDetail>>) {
        self.details
            .lock()
            .unwrap()
            .insert(template_id.to_string(), responses.into());
    }

    pub fn detail_calls(&self, template_id: &str) -> usize {
        self.detail_calls
            .lock()
            .unwrap()
            .get(template_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn listing_calls(&self) -> usize {
        *self.listing_calls.lock().unwrap()
    }

    /// Template ids in the order their detail calls started.
    pub fn detail_order(&self) -> Vec<String> {
        self.detail_order.lock().unwrap().clone()
    }

    pub fn peak_detail_calls(&self) -> usize {
        self.detail_in_flight.peak()
    }
}

#[async_trait]
impl TemplateSource for FakeSource {
    async fn fetch_subspecialties(&self) -> CatalogResult<Vec<RawSubspecialty>> {
        Ok(self.subspecialties.clone())
    }

    async fn fetch_templates(&self) -> CatalogResult<Vec<RawTemplate>> {
        *self.listing_calls.lock().unwrap() += 1;
        if self.listing_fails {
            return Err(CatalogError::Upstream("listing unavailable".into()));
        }
        Ok(self.templates.clone())
    }

    async fn fetch_template_details(
        &self,
        template_id: &str,
        _version: &str,
    ) -> CatalogResult<RawTemplateDetail> {
        *self
            .detail_calls
            .lock()
            .unwrap()
            .entry(template_id.to_string())
            .or_default() += 1;
        self.detail_order
            .lock()
            .unwrap()
            .push(template_id.to_string());

        self.detail_in_flight.enter();
        if !self.detail_delay.is_zero() {
            tokio::time::sleep(self.detail_delay).await;
        }
        self.detail_in_flight.leave();

        let next = self
            .details
            .lock()
            .unwrap()
            .get_mut(template_id)
            .and_then(|queue| queue.pop_front());

        match next {
            Some(Some(detail)) => Ok(detail),
            _ => Err(CatalogError::Upstream(format!(
                "details for {template_id} unavailable"
            ))),
        }
    }
}

pub fn detail_with_data(template_data: &str) -> RawTemplateDetail {
    RawTemplateDetail {
        template_data: Some(template_data.to_string()),
        ..Default::default()
    }
}

/// [`MemoryStore`] whose generated-content writes are slowed down and observed.
pub struct ObservedStore {
    pub inner: MemoryStore,
    pub write_delay: Duration,
    write_order: Mutex<Vec<String>>,
    writes_in_flight: InFlight,
}

impl ObservedStore {
    pub fn new(inner: MemoryStore, write_delay: Duration) -> Self {
        Self {
            inner,
            write_delay,
            write_order: Mutex::new(Vec::new()),
            writes_in_flight: InFlight::default(),
        }
    }

    pub fn write_order(&self) -> Vec<String> {
        self.write_order.lock().unwrap().clone()
    }

    pub fn peak_writes(&self) -> usize {
        self.writes_in_flight.peak()
    }
}

#[async_trait]
impl CatalogStore for ObservedStore {
    async fn begin_reconcile(&self) -> CatalogResult<Box<dyn ReconcileTx>> {
        self.inner.begin_reconcile().await
    }

    async fn templates_missing_data(&self) -> CatalogResult<Vec<Template>> {
        self.inner.templates_missing_data().await
    }

    async fn find_template(&self, template_id: &str) -> CatalogResult<Option<Template>> {
        self.inner.find_template(template_id).await
    }

    async fn merge_template_fields(
        &self,
        template_id: &str,
        patch: &TemplatePatch,
    ) -> CatalogResult<bool> {
        self.inner.merge_template_fields(template_id, patch).await
    }

    async fn store_generated(
        &self,
        template_id: &str,
        content: &GeneratedContent,
    ) -> CatalogResult<bool> {
        self.write_order
            .lock()
            .unwrap()
            .push(template_id.to_string());
        self.writes_in_flight.enter();
        tokio::time::sleep(self.write_delay).await;
        self.writes_in_flight.leave();
        self.inner.store_generated(template_id, content).await
    }

    async fn list_subspecialties(&self, page: Page) -> CatalogResult<Paged<Subspecialty>> {
        self.inner.list_subspecialties(page).await
    }

    async fn find_subspecialty(&self, code: &str) -> CatalogResult<Option<Subspecialty>> {
        self.inner.find_subspecialty(code).await
    }

    async fn list_templates(
        &self,
        filter: &TemplateFilter,
        page: Page,
    ) -> CatalogResult<Paged<TemplateSummary>> {
        self.inner.list_templates(filter, page).await
    }

    async fn subspecialty_codes_for_template(
        &self,
        template_id: &str,
    ) -> CatalogResult<Vec<String>> {
        self.inner.subspecialty_codes_for_template(template_id).await
    }
}
