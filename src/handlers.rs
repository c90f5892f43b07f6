//! HTTP handlers.
//!
//! Every body is `{ "success": bool, "data": ... }`; list endpoints add a
//! `pagination` block. Failures are rendered by [`CatalogError`].

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::catalog_types::{
    Page, Paged, Subspecialty, TemplateFilter, TemplateSummary, TemplateWithLinks,
};
use crate::error::{CatalogError, CatalogResult};
use crate::generator::{GenerateSummary, Generator};
use crate::reconciler::ReconcileSummary;
use crate::refresher::{RefreshOutcome, RefreshSummary, Refresher};
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub total: i64,
    pub skip: i64,
    pub limit: i64,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(total: i64, page: Page) -> Self {
        Self {
            total,
            skip: page.skip,
            limit: page.limit,
            has_more: page.skip.saturating_add(page.limit) < total,
        }
    }
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
        pagination: None,
    })
}

fn paged<T: Serialize>(paged: Paged<T>, page: Page) -> Json<ApiResponse<Vec<T>>> {
    Json(ApiResponse {
        success: true,
        pagination: Some(Pagination::new(paged.total, page)),
        data: paged.items,
    })
}

#[derive(Debug, Deserialize)]
pub struct PaginationParams {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

impl PaginationParams {
    fn page(&self) -> Page {
        Page::new(self.skip, self.limit)
    }
}

#[derive(Debug, Deserialize)]
pub struct TemplateListParams {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
    pub spec_code: Option<String>,
    pub lang: Option<String>,
    pub has_data: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubspecialtyTemplates {
    pub subspecialty: Subspecialty,
    pub templates: Vec<TemplateSummary>,
}

pub async fn list_subspecialties(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> CatalogResult<Json<ApiResponse<Vec<Subspecialty>>>> {
    let page = params.page();
    let result = state.store.list_subspecialties(page).await?;
    Ok(paged(result, page))
}

pub async fn get_subspecialty(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> CatalogResult<Json<ApiResponse<Subspecialty>>> {
    let subspecialty = state
        .store
        .find_subspecialty(&code)
        .await?
        .ok_or_else(|| CatalogError::not_found("Subspecialty", code))?;
    Ok(ok(subspecialty))
}

pub async fn get_subspecialty_templates(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(params): Query<PaginationParams>,
) -> CatalogResult<Json<ApiResponse<SubspecialtyTemplates>>> {
    let subspecialty = state
        .store
        .find_subspecialty(&code)
        .await?
        .ok_or_else(|| CatalogError::not_found("Subspecialty", code.clone()))?;

    let page = params.page();
    let filter = TemplateFilter {
        spec_code: Some(code),
        ..Default::default()
    };
    let templates = state.store.list_templates(&filter, page).await?;

    Ok(Json(ApiResponse {
        success: true,
        pagination: Some(Pagination::new(templates.total, page)),
        data: SubspecialtyTemplates {
            subspecialty,
            templates: templates.items,
        },
    }))
}

pub async fn list_templates(
    State(state): State<AppState>,
    Query(params): Query<TemplateListParams>,
) -> CatalogResult<Json<ApiResponse<Vec<TemplateSummary>>>> {
    let page = Page::new(params.skip, params.limit);
    let filter = TemplateFilter {
        spec_code: params.spec_code,
        lang: params.lang,
        has_data: params.has_data,
    };
    let result = state.store.list_templates(&filter, page).await?;
    Ok(paged(result, page))
}

pub async fn get_template(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
) -> CatalogResult<Json<ApiResponse<TemplateWithLinks>>> {
    let template = state
        .store
        .find_template(&template_id)
        .await?
        .ok_or_else(|| CatalogError::not_found("Template", template_id.clone()))?;
    let subspecialty_codes = state
        .store
        .subspecialty_codes_for_template(&template_id)
        .await?;

    Ok(ok(TemplateWithLinks {
        template,
        subspecialty_codes,
    }))
}

pub async fn sync_all(
    State(state): State<AppState>,
) -> CatalogResult<Json<ApiResponse<ReconcileSummary>>> {
    Ok(ok(state.sync.sync_all().await?))
}

pub async fn sync_subspecialties(
    State(state): State<AppState>,
) -> CatalogResult<Json<ApiResponse<ReconcileSummary>>> {
    Ok(ok(state.sync.sync_subspecialties().await?))
}

pub async fn refresh_templates(
    State(state): State<AppState>,
) -> CatalogResult<Json<ApiResponse<RefreshSummary>>> {
    let refresher = Refresher::new(
        state.store.as_ref(),
        state.source.as_ref(),
        state.refresh_policy.clone(),
    );
    Ok(ok(refresher.refresh_all().await?))
}

pub async fn refresh_template(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
) -> CatalogResult<Json<ApiResponse<RefreshOutcome>>> {
    let refresher = Refresher::new(
        state.store.as_ref(),
        state.source.as_ref(),
        state.refresh_policy.clone(),
    );
    let outcome = refresher.refresh_one(&template_id).await?;
    Ok(Json(ApiResponse {
        success: outcome.success,
        data: outcome,
        pagination: None,
    }))
}

pub async fn generate_templates(
    State(state): State<AppState>,
) -> CatalogResult<Json<ApiResponse<GenerateSummary>>> {
    let generator = Generator::new(state.store.as_ref(), state.generate_policy.clone());
    Ok(ok(generator.generate_all().await?))
}

pub async fn heartbeat() -> Response {
    (StatusCode::OK).into_response()
}
