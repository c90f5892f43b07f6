//! Relationship reconciliation.
//!
//! Upserts raw subspecialties and templates, then rebuilds the
//! subspecialty/template association from each template's spec code and
//! recomputes the cached per-subspecialty counts. The run is one write scope:
//! readers see either the previous catalog or the fully rebuilt one.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog_types::{
    non_blank, parse_timestamp, NewSubspecialty, NewTemplate, RawSubspecialty, RawTemplate,
    Subspecialty, DEFAULT_DATA_TYPE, DEFAULT_LANG, DEFAULT_TEMPLATE_VERSION,
};
use crate::error::{CatalogError, CatalogResult};
use crate::store::CatalogStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub subspecialties_processed: usize,
    pub templates_processed: usize,
    pub relationships_created: usize,
    pub errors: Vec<String>,
}

/// Splits a comma separated spec code into trimmed, non-empty codes.
///
/// Input order is kept; a code repeated later in the list is dropped.
pub fn parse_spec_code(spec_code: &str) -> Vec<String> {
    let mut codes: Vec<String> = Vec::new();
    for code in spec_code.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        if !codes.iter().any(|c| c == code) {
            codes.push(code.to_string());
        }
    }
    codes
}

pub fn validate_subspecialty(raw: &RawSubspecialty) -> CatalogResult<NewSubspecialty> {
    if let Some(reason) = &raw.malformed {
        return Err(CatalogError::Validation(reason.clone()));
    }
    let code = non_blank(raw.code.as_deref())
        .ok_or_else(|| CatalogError::Validation("code is required".into()))?;
    let name = non_blank(raw.name.as_deref())
        .ok_or_else(|| CatalogError::Validation("name is required".into()))?;

    Ok(NewSubspecialty {
        short_name: non_blank(raw.short_name.as_deref()).unwrap_or_else(|| code.clone()),
        radlex_id: non_blank(raw.radlex_id.as_deref()),
        code,
        name,
    })
}

pub fn validate_template(raw: &RawTemplate) -> CatalogResult<NewTemplate> {
    if let Some(reason) = &raw.malformed {
        return Err(CatalogError::Validation(reason.clone()));
    }
    let template_id = non_blank(raw.template_id.as_deref())
        .ok_or_else(|| CatalogError::Validation("template_id is required".into()))?;
    let title = non_blank(raw.title.as_deref())
        .ok_or_else(|| CatalogError::Validation("title is required".into()))?;

    Ok(NewTemplate {
        template_id,
        template_version: non_blank(raw.template_version.as_deref())
            .unwrap_or_else(|| DEFAULT_TEMPLATE_VERSION.to_string()),
        title,
        lang: non_blank(raw.lang.as_deref()).unwrap_or_else(|| DEFAULT_LANG.to_string()),
        created: raw.created.as_deref().and_then(parse_timestamp),
        specialty: non_blank(raw.specialty.as_deref()),
        spec_code: non_blank(raw.spec_code.as_deref()),
        views: raw.views.unwrap_or(0).max(0),
        downloads: raw.downloads.unwrap_or(0).max(0),
        description: non_blank(raw.description.as_deref()),
        author: non_blank(raw.author.as_deref()),
        firstname: non_blank(raw.firstname.as_deref()),
        lastname: non_blank(raw.lastname.as_deref()),
        data_type: non_blank(raw.data_type.as_deref())
            .unwrap_or_else(|| DEFAULT_DATA_TYPE.to_string()),
        template_data: raw.template_data.clone().filter(|d| !d.trim().is_empty()),
    })
}

/// Identifier used in per-item error messages.
fn label(id: Option<&str>, index: usize) -> String {
    non_blank(id).unwrap_or_else(|| format!("#{}", index + 1))
}

/// Rebuilds the catalog from one batch of upstream records.
///
/// Failures of individual rows are collected in the summary and never abort
/// the run. Errors from clearing, recounting or committing are returned.
pub async fn reconcile(
    store: &dyn CatalogStore,
    subspecialties: &[RawSubspecialty],
    templates: &[RawTemplate],
) -> CatalogResult<ReconcileSummary> {
    let mut summary = ReconcileSummary::default();
    let mut tx = store.begin_reconcile().await?;

    let cleared = tx.clear_links().await?;
    info!(cleared, "Cleared subspecialty/template associations");

    let mut known: HashMap<String, Subspecialty> = HashMap::with_capacity(subspecialties.len());
    for (index, raw) in subspecialties.iter().enumerate() {
        let result = match validate_subspecialty(raw) {
            Ok(input) => tx.upsert_subspecialty(&input).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(row) => {
                known.insert(row.code.clone(), row);
                summary.subspecialties_processed += 1;
            }
            Err(e) => {
                let id = label(raw.code.as_deref(), index);
                warn!(code = %id, error = %e, "Skipping subspecialty");
                summary.errors.push(format!("Subspecialty {id}: {e}"));
            }
        }
    }

    for (index, raw) in templates.iter().enumerate() {
        let id = label(raw.template_id.as_deref(), index);
        let input = match validate_template(raw) {
            Ok(input) => input,
            Err(e) => {
                warn!(template_id = %id, error = %e, "Skipping template");
                summary.errors.push(format!("Template {id}: {e}"));
                continue;
            }
        };
        let codes = input
            .spec_code
            .as_deref()
            .map(parse_spec_code)
            .unwrap_or_default();

        let row = match tx.upsert_template(&input).await {
            Ok(row) => row,
            Err(e) => {
                warn!(template_id = %id, error = %e, "Skipping template");
                summary.errors.push(format!("Template {id}: {e}"));
                continue;
            }
        };
        summary.templates_processed += 1;

        for code in codes {
            let Some(sub) = known.get(&code) else {
                continue;
            };
            match tx.link(sub.id, row.id).await {
                Ok(true) => summary.relationships_created += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(template_id = %id, code = %code, error = %e, "Failed to link template");
                    summary.errors.push(format!("Template {id} -> {code}: {e}"));
                }
            }
        }
    }

    tx.recount().await?;
    tx.commit().await?;

    info!(
        subspecialties = summary.subspecialties_processed,
        templates = summary.templates_processed,
        relationships = summary.relationships_created,
        errors = summary.errors.len(),
        "Reconciliation complete"
    );

    Ok(summary)
}
