use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{CatalogStore, ReconcileTx};
use crate::catalog_types::{
    GeneratedContent, NewSubspecialty, NewTemplate, Page, Paged, Subspecialty, Template,
    TemplateFilter, TemplatePatch, TemplateSummary,
};
use crate::error::{CatalogError, CatalogResult};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    subspecialties: BTreeMap<String, Subspecialty>,
    templates: BTreeMap<String, Template>,
    /// (subspecialty row id, template row id)
    links: BTreeSet<(i32, i32)>,
    next_subspecialty_id: i32,
    next_template_id: i32,
}

impl MemoryState {
    fn linked_codes(&self, template_row_id: i32) -> Vec<String> {
        let mut codes: Vec<String> = self
            .subspecialties
            .values()
            .filter(|s| self.links.contains(&(s.id, template_row_id)))
            .map(|s| s.code.clone())
            .collect();
        codes.sort();
        codes
    }

    fn matches(&self, template: &Template, filter: &TemplateFilter) -> bool {
        if let Some(code) = &filter.spec_code {
            let Some(sub) = self.subspecialties.get(code) else {
                return false;
            };
            if !self.links.contains(&(sub.id, template.id)) {
                return false;
            }
        }
        if let Some(lang) = &filter.lang {
            if &template.lang != lang {
                return false;
            }
        }
        match filter.has_data {
            Some(has) => template.template_data.is_some() == has,
            None => true,
        }
    }
}

/// In-process [`CatalogStore`] with the same upsert, merge and ordering rules
/// as the Postgres store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    rejected: Arc<Mutex<HashSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write touching `template_id` fail with a conflict.
    pub fn reject_template(&self, template_id: impl Into<String>) {
        lock(&self.rejected).insert(template_id.into());
    }

    pub fn subspecialty_count(&self) -> usize {
        lock(&self.state).subspecialties.len()
    }

    pub fn template_count(&self) -> usize {
        lock(&self.state).templates.len()
    }

    pub fn link_count(&self) -> usize {
        lock(&self.state).links.len()
    }

    fn check_rejected(&self, template_id: &str) -> CatalogResult<()> {
        if lock(&self.rejected).contains(template_id) {
            return Err(CatalogError::Conflict(format!(
                "write rejected for template {template_id}"
            )));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn paginate<T: Clone>(items: &[T], page: Page) -> Vec<T> {
    items
        .iter()
        .skip(page.skip as usize)
        .take(page.limit as usize)
        .cloned()
        .collect()
}

fn by_views_desc(a: &Template, b: &Template) -> std::cmp::Ordering {
    b.views
        .cmp(&a.views)
        .then_with(|| a.template_id.cmp(&b.template_id))
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn begin_reconcile(&self) -> CatalogResult<Box<dyn ReconcileTx>> {
        let working = lock(&self.state).clone();
        Ok(Box::new(MemoryReconcileTx {
            working,
            upserted: BTreeMap::new(),
            store: self.clone(),
        }))
    }

    async fn templates_missing_data(&self) -> CatalogResult<Vec<Template>> {
        let state = lock(&self.state);
        let mut missing: Vec<Template> = state
            .templates
            .values()
            .filter(|t| t.template_data.is_none())
            .cloned()
            .collect();
        missing.sort_by(by_views_desc);
        Ok(missing)
    }

    async fn find_template(&self, template_id: &str) -> CatalogResult<Option<Template>> {
        Ok(lock(&self.state).templates.get(template_id).cloned())
    }

    async fn merge_template_fields(
        &self,
        template_id: &str,
        patch: &TemplatePatch,
    ) -> CatalogResult<bool> {
        self.check_rejected(template_id)?;
        let mut state = lock(&self.state);
        let Some(t) = state.templates.get_mut(template_id) else {
            return Ok(false);
        };
        if let Some(v) = &patch.template_data {
            t.template_data = Some(v.clone());
        }
        if let Some(v) = &patch.description {
            t.description = Some(v.clone());
        }
        if let Some(v) = &patch.author {
            t.author = Some(v.clone());
        }
        if let Some(v) = &patch.firstname {
            t.firstname = Some(v.clone());
        }
        if let Some(v) = &patch.lastname {
            t.lastname = Some(v.clone());
        }
        t.updated_at = Utc::now();
        Ok(true)
    }

    async fn store_generated(
        &self,
        template_id: &str,
        content: &GeneratedContent,
    ) -> CatalogResult<bool> {
        self.check_rejected(template_id)?;
        let mut state = lock(&self.state);
        let Some(t) = state.templates.get_mut(template_id) else {
            return Ok(false);
        };
        if t.template_data.is_some() {
            return Ok(false);
        }
        t.template_data = Some(content.template_data.clone());
        t.description = Some(content.description.clone());
        t.author = Some(content.author.clone());
        t.firstname = Some(content.firstname.clone());
        t.lastname = Some(content.lastname.clone());
        t.updated_at = Utc::now();
        Ok(true)
    }

    async fn list_subspecialties(&self, page: Page) -> CatalogResult<Paged<Subspecialty>> {
        let state = lock(&self.state);
        let all: Vec<Subspecialty> = state.subspecialties.values().cloned().collect();
        Ok(Paged {
            total: all.len() as i64,
            items: paginate(&all, page),
        })
    }

    async fn find_subspecialty(&self, code: &str) -> CatalogResult<Option<Subspecialty>> {
        Ok(lock(&self.state).subspecialties.get(code).cloned())
    }

    async fn list_templates(
        &self,
        filter: &TemplateFilter,
        page: Page,
    ) -> CatalogResult<Paged<TemplateSummary>> {
        let state = lock(&self.state);
        let mut matching: Vec<&Template> = state
            .templates
            .values()
            .filter(|t| state.matches(t, filter))
            .collect();
        matching.sort_by(|a, b| by_views_desc(a, b));
        let summaries: Vec<TemplateSummary> =
            matching.into_iter().map(TemplateSummary::from).collect();
        Ok(Paged {
            total: summaries.len() as i64,
            items: paginate(&summaries, page),
        })
    }

    async fn subspecialty_codes_for_template(
        &self,
        template_id: &str,
    ) -> CatalogResult<Vec<String>> {
        let state = lock(&self.state);
        Ok(state
            .templates
            .get(template_id)
            .map(|t| state.linked_codes(t.id))
            .unwrap_or_default())
    }
}

/// Works on a private copy of the state and publishes it on commit.
///
/// Links and subspecialties are replaced wholesale. Template rows are
/// replaced only for templates this run upserted, and enrichment the run left
/// empty is taken from the live row, so refresh or generation writes made
/// while the run was open survive it.
struct MemoryReconcileTx {
    working: MemoryState,
    upserted: BTreeMap<String, NewTemplate>,
    store: MemoryStore,
}

#[async_trait]
impl ReconcileTx for MemoryReconcileTx {
    async fn clear_links(&mut self) -> CatalogResult<u64> {
        let removed = self.working.links.len() as u64;
        self.working.links.clear();
        Ok(removed)
    }

    async fn upsert_subspecialty(&mut self, input: &NewSubspecialty) -> CatalogResult<Subspecialty> {
        let now = Utc::now();
        let state = &mut self.working;
        if let Some(existing) = state.subspecialties.get_mut(&input.code) {
            existing.short_name = input.short_name.clone();
            existing.name = input.name.clone();
            existing.radlex_id = input.radlex_id.clone();
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        state.next_subspecialty_id += 1;
        let row = Subspecialty {
            id: state.next_subspecialty_id,
            code: input.code.clone(),
            short_name: input.short_name.clone(),
            name: input.name.clone(),
            radlex_id: input.radlex_id.clone(),
            count: 0,
            created_at: now,
            updated_at: now,
        };
        state.subspecialties.insert(row.code.clone(), row.clone());
        Ok(row)
    }

    async fn upsert_template(&mut self, input: &NewTemplate) -> CatalogResult<Template> {
        self.store.check_rejected(&input.template_id)?;
        self.upserted.insert(input.template_id.clone(), input.clone());
        let now = Utc::now();
        let state = &mut self.working;
        if let Some(t) = state.templates.get_mut(&input.template_id) {
            t.template_version = input.template_version.clone();
            t.title = input.title.clone();
            t.lang = input.lang.clone();
            t.created = input.created;
            t.specialty = input.specialty.clone();
            t.spec_code = input.spec_code.clone();
            t.views = input.views;
            t.downloads = input.downloads;
            t.description = input.description.clone().or(t.description.take());
            t.author = input.author.clone().or(t.author.take());
            t.firstname = input.firstname.clone().or(t.firstname.take());
            t.lastname = input.lastname.clone().or(t.lastname.take());
            t.data_type = input.data_type.clone();
            t.template_data = input.template_data.clone().or(t.template_data.take());
            t.updated_at = now;
            return Ok(t.clone());
        }

        state.next_template_id += 1;
        let row = Template {
            id: state.next_template_id,
            template_id: input.template_id.clone(),
            template_version: input.template_version.clone(),
            title: input.title.clone(),
            lang: input.lang.clone(),
            created: input.created,
            specialty: input.specialty.clone(),
            spec_code: input.spec_code.clone(),
            views: input.views,
            downloads: input.downloads,
            description: input.description.clone(),
            author: input.author.clone(),
            firstname: input.firstname.clone(),
            lastname: input.lastname.clone(),
            data_type: input.data_type.clone(),
            template_data: input.template_data.clone(),
            created_at: now,
            updated_at: now,
        };
        state.templates.insert(row.template_id.clone(), row.clone());
        Ok(row)
    }

    async fn link(&mut self, subspecialty_id: i32, template_id: i32) -> CatalogResult<bool> {
        Ok(self.working.links.insert((subspecialty_id, template_id)))
    }

    async fn recount(&mut self) -> CatalogResult<u64> {
        let links = &self.working.links;
        let mut updated = 0;
        for sub in self.working.subspecialties.values_mut() {
            sub.count = links.iter().filter(|(s, _)| *s == sub.id).count() as i32;
            updated += 1;
        }
        Ok(updated)
    }

    async fn commit(self: Box<Self>) -> CatalogResult<()> {
        let MemoryReconcileTx {
            working,
            upserted,
            store,
        } = *self;
        let mut live = lock(&store.state);

        let mut templates = live.templates.clone();
        for (template_id, input) in &upserted {
            let Some(mut row) = working.templates.get(template_id).cloned() else {
                continue;
            };
            if let Some(current) = live.templates.get(template_id) {
                row.description = input
                    .description
                    .clone()
                    .or_else(|| current.description.clone());
                row.author = input.author.clone().or_else(|| current.author.clone());
                row.firstname = input.firstname.clone().or_else(|| current.firstname.clone());
                row.lastname = input.lastname.clone().or_else(|| current.lastname.clone());
                row.template_data = input
                    .template_data
                    .clone()
                    .or_else(|| current.template_data.clone());
            }
            templates.insert(template_id.clone(), row);
        }

        live.templates = templates;
        live.subspecialties = working.subspecialties;
        live.links = working.links;
        live.next_subspecialty_id = working.next_subspecialty_id;
        live.next_template_id = working.next_template_id;
        Ok(())
    }
}
