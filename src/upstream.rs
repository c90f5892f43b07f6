//! Client for the remote template catalog.
//!
//! Every endpoint answers with an envelope:
//!
//! ```json
//! { "SUCCESS": true, "MESSAGE": "", "DATA": [ ... ] }
//! ```
//!
//! Transport failures are normalized into [`CatalogError`]: a 404 becomes
//! `NotFound`, an elapsed request deadline becomes `Timeout`, and anything else
//! (non-2xx status, `SUCCESS: false`, unparseable body) becomes `Upstream`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::catalog_types::{RawSubspecialty, RawTemplate, RawTemplateDetail};
use crate::error::{CatalogError, CatalogResult};

pub const DEFAULT_BASE_URL: &str = "https://api3.rsna.org/radreport/v1";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("template_catalog/", env!("CARGO_PKG_VERSION"));

/// Source of raw catalog records.
#[async_trait]
pub trait TemplateSource: Send + Sync {
    async fn fetch_subspecialties(&self) -> CatalogResult<Vec<RawSubspecialty>>;

    async fn fetch_templates(&self) -> CatalogResult<Vec<RawTemplate>>;

    async fn fetch_template_details(
        &self,
        template_id: &str,
        version: &str,
    ) -> CatalogResult<RawTemplateDetail>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "SUCCESS", default)]
    success: bool,
    #[serde(rename = "MESSAGE", default)]
    message: Option<String>,
    #[serde(rename = "DATA")]
    data: Option<T>,
}

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: Client,
    base_url: Url,
}

impl UpstreamClient {
    pub fn new(base_url: &str, timeout: Duration) -> CatalogResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| CatalogError::Config(format!("invalid upstream url {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(CatalogError::Config(format!(
                "upstream url {base_url} cannot carry paths"
            )));
        }

        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| CatalogError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self { http, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_data<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, &str)],
    ) -> CatalogResult<T> {
        debug!(url = %url, "Querying upstream catalog");

        let response = self.http.get(url.clone()).query(query).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CatalogError::not_found("Upstream resource", url.path()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::Upstream(format!(
                "{url} returned {status}: {body}"
            )));
        }

        let body = response.text().await?;
        let envelope: Envelope<T> = serde_json::from_str(&body)
            .map_err(|e| CatalogError::Upstream(format!("unexpected response from {url}: {e}")))?;

        if !envelope.success {
            return Err(CatalogError::Upstream(
                envelope
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| format!("{url} reported failure")),
            ));
        }

        envelope
            .data
            .ok_or_else(|| CatalogError::Upstream(format!("{url} returned no DATA")))
    }
}

/// Decodes listing rows one at a time. A row that does not fit `T` becomes
/// `malformed(id, reason)` instead of failing the whole listing.
fn decode_rows<T: DeserializeOwned>(
    rows: Vec<Value>,
    id_key: &str,
    malformed: fn(Option<String>, String) -> T,
) -> Vec<T> {
    rows.into_iter()
        .enumerate()
        .map(|(index, row)| {
            let id = row_id(&row, id_key);
            serde_json::from_value(row).unwrap_or_else(|e| {
                warn!(row = index + 1, id = ?id, error = %e, "Malformed upstream row");
                malformed(id, format!("malformed record: {e}"))
            })
        })
        .collect()
}

fn row_id(row: &Value, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl TemplateSource for UpstreamClient {
    async fn fetch_subspecialties(&self) -> CatalogResult<Vec<RawSubspecialty>> {
        let rows: Vec<Value> = self.get_data(self.endpoint(&["subspecialty"]), &[]).await?;
        let subspecialties = decode_rows(rows, "code", RawSubspecialty::malformed);
        debug!(count = subspecialties.len(), "Fetched subspecialties");
        Ok(subspecialties)
    }

    async fn fetch_templates(&self) -> CatalogResult<Vec<RawTemplate>> {
        let rows: Vec<Value> = self.get_data(self.endpoint(&["templates"]), &[]).await?;
        let templates = decode_rows(rows, "template_id", RawTemplate::malformed);
        debug!(count = templates.len(), "Fetched templates");
        Ok(templates)
    }

    async fn fetch_template_details(
        &self,
        template_id: &str,
        version: &str,
    ) -> CatalogResult<RawTemplateDetail> {
        let url = self.endpoint(&["templates", template_id, "details"]);
        self.get_data(url, &[("version", version)])
            .await
            .map_err(|e| match e {
                CatalogError::NotFound { .. } => CatalogError::not_found("Template", template_id),
                other => other,
            })
    }
}
