//! Catalog persistence.
//!
//! [`CatalogStore`] is the seam every service talks to. [`PgStore`] backs the
//! running service; [`MemoryStore`] keeps the same semantics in process.

use async_trait::async_trait;

use crate::catalog_types::{
    GeneratedContent, NewSubspecialty, NewTemplate, Page, Paged, Subspecialty, Template,
    TemplateFilter, TemplatePatch, TemplateSummary,
};
use crate::error::CatalogResult;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Opens the scope a reconciliation run writes through. Nothing is
    /// visible to readers until [`ReconcileTx::commit`].
    async fn begin_reconcile(&self) -> CatalogResult<Box<dyn ReconcileTx>>;

    /// Templates without `template_data`, most viewed first.
    async fn templates_missing_data(&self) -> CatalogResult<Vec<Template>>;

    async fn find_template(&self, template_id: &str) -> CatalogResult<Option<Template>>;

    /// Writes the `Some` fields of `patch`. Returns `false` when no such template exists.
    async fn merge_template_fields(
        &self,
        template_id: &str,
        patch: &TemplatePatch,
    ) -> CatalogResult<bool>;

    /// Stores generated content, but only while `template_data` is still empty.
    async fn store_generated(
        &self,
        template_id: &str,
        content: &GeneratedContent,
    ) -> CatalogResult<bool>;

    async fn list_subspecialties(&self, page: Page) -> CatalogResult<Paged<Subspecialty>>;

    async fn find_subspecialty(&self, code: &str) -> CatalogResult<Option<Subspecialty>>;

    async fn list_templates(
        &self,
        filter: &TemplateFilter,
        page: Page,
    ) -> CatalogResult<Paged<TemplateSummary>>;

    /// Codes of the subspecialties a template is linked to, sorted.
    async fn subspecialty_codes_for_template(&self, template_id: &str)
        -> CatalogResult<Vec<String>>;
}

/// Write scope of one reconciliation run.
///
/// Per-item operations are isolated: a failed upsert or link leaves the scope
/// usable for the next item. Dropping without `commit` discards every write.
#[async_trait]
pub trait ReconcileTx: Send {
    /// Removes every subspecialty/template association. Returns rows removed.
    async fn clear_links(&mut self) -> CatalogResult<u64>;

    async fn upsert_subspecialty(&mut self, input: &NewSubspecialty) -> CatalogResult<Subspecialty>;

    async fn upsert_template(&mut self, input: &NewTemplate) -> CatalogResult<Template>;

    /// Find-or-create an association by row ids. Returns `true` if it was created.
    async fn link(&mut self, subspecialty_id: i32, template_id: i32) -> CatalogResult<bool>;

    /// Sets every subspecialty's `count` to its number of associations.
    async fn recount(&mut self) -> CatalogResult<u64>;

    async fn commit(self: Box<Self>) -> CatalogResult<()>;
}
