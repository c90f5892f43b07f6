use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const DEFAULT_DATA_TYPE: &str = "html";
pub const DEFAULT_LANG: &str = "en";
pub const DEFAULT_TEMPLATE_VERSION: &str = "1";

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subspecialty {
    pub id: i32,
    pub code: String,
    pub short_name: String,
    pub name: String,
    pub radlex_id: Option<String>,
    pub count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Template {
    pub id: i32,
    pub template_id: String,
    pub template_version: String,
    pub title: String,
    pub lang: String,
    pub created: Option<DateTime<Utc>>,
    pub specialty: Option<String>,
    pub spec_code: Option<String>,
    pub views: i64,
    pub downloads: i64,
    pub description: Option<String>,
    pub author: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub data_type: String,
    pub template_data: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing projection of a template: everything except the document body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TemplateSummary {
    pub id: i32,
    pub template_id: String,
    pub template_version: String,
    pub title: String,
    pub lang: String,
    pub created: Option<DateTime<Utc>>,
    pub specialty: Option<String>,
    pub spec_code: Option<String>,
    pub views: i64,
    pub downloads: i64,
    pub author: Option<String>,
    pub data_type: String,
    pub has_data: bool,
}

impl From<&Template> for TemplateSummary {
    fn from(t: &Template) -> Self {
        Self {
            id: t.id,
            template_id: t.template_id.clone(),
            template_version: t.template_version.clone(),
            title: t.title.clone(),
            lang: t.lang.clone(),
            created: t.created,
            specialty: t.specialty.clone(),
            spec_code: t.spec_code.clone(),
            views: t.views,
            downloads: t.downloads,
            author: t.author.clone(),
            data_type: t.data_type.clone(),
            has_data: t.template_data.is_some(),
        }
    }
}

/// A template together with the subspecialty codes it is linked to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateWithLinks {
    #[serde(flatten)]
    pub template: Template,
    pub subspecialty_codes: Vec<String>,
}

/// Validated subspecialty ready to be upserted by `code`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubspecialty {
    pub code: String,
    pub short_name: String,
    pub name: String,
    pub radlex_id: Option<String>,
}

/// Validated template ready to be upserted by `template_id`.
///
/// `None` attribution and `template_data` never clear a stored value.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTemplate {
    pub template_id: String,
    pub template_version: String,
    pub title: String,
    pub lang: String,
    pub created: Option<DateTime<Utc>>,
    pub specialty: Option<String>,
    pub spec_code: Option<String>,
    pub views: i64,
    pub downloads: i64,
    pub description: Option<String>,
    pub author: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub data_type: String,
    pub template_data: Option<String>,
}

/// Partial update of a template's enrichment fields. Only `Some` values are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplatePatch {
    pub template_data: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
}

impl TemplatePatch {
    pub fn is_empty(&self) -> bool {
        self.template_data.is_none()
            && self.description.is_none()
            && self.author.is_none()
            && self.firstname.is_none()
            && self.lastname.is_none()
    }

    /// Attribution-only patch taken from a listing record.
    pub fn attribution_from(raw: &RawTemplate) -> Self {
        Self {
            template_data: None,
            description: non_blank(raw.description.as_deref()),
            author: non_blank(raw.author.as_deref()),
            firstname: non_blank(raw.firstname.as_deref()),
            lastname: non_blank(raw.lastname.as_deref()),
        }
    }
}

impl From<&RawTemplateDetail> for TemplatePatch {
    fn from(detail: &RawTemplateDetail) -> Self {
        Self {
            template_data: non_blank(detail.template_data.as_deref()),
            description: non_blank(detail.description.as_deref()),
            author: non_blank(detail.author.as_deref()),
            firstname: non_blank(detail.firstname.as_deref()),
            lastname: non_blank(detail.lastname.as_deref()),
        }
    }
}

/// Locally synthesized enrichment, written in a single update.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedContent {
    pub template_data: String,
    pub description: String,
    pub author: String,
    pub firstname: String,
    pub lastname: String,
}

// Upstream records. Every field is optional and loosely typed; validation
// into `NewSubspecialty` / `NewTemplate` happens during reconciliation.
//
// A listing row that does not decode is kept as a record carrying only its
// identifier and the decode error in `malformed`, so it is reported per item.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSubspecialty {
    #[serde(default, deserialize_with = "lenient_string")]
    pub code: Option<String>,
    #[serde(default, rename = "shortName", alias = "short_name")]
    pub short_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "radlexID", alias = "radlex_id", deserialize_with = "lenient_string")]
    pub radlex_id: Option<String>,
    #[serde(skip)]
    pub malformed: Option<String>,
}

impl RawSubspecialty {
    pub fn malformed(code: Option<String>, reason: String) -> Self {
        Self {
            code,
            malformed: Some(reason),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTemplate {
    #[serde(default, deserialize_with = "lenient_string")]
    pub template_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub template_version: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub specialty: Option<String>,
    #[serde(default, rename = "specCode", alias = "spec_code")]
    pub spec_code: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub views: Option<i64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub downloads: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
    #[serde(default, rename = "dataType", alias = "data_type")]
    pub data_type: Option<String>,
    #[serde(default, rename = "templateData", alias = "template_data")]
    pub template_data: Option<String>,
    #[serde(skip)]
    pub malformed: Option<String>,
}

impl RawTemplate {
    pub fn malformed(template_id: Option<String>, reason: String) -> Self {
        Self {
            template_id,
            malformed: Some(reason),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTemplateDetail {
    #[serde(default, deserialize_with = "lenient_string")]
    pub template_id: Option<String>,
    #[serde(default, rename = "templateData", alias = "template_data")]
    pub template_data: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
}

/// Accepts a string or a number, yielding its string form.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Accepts a number or a numeric string. Anything else reads as absent.
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parses the timestamp formats seen in upstream listings.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(ts.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

/// Offset pagination window, already clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub skip: i64,
    pub limit: i64,
}

impl Page {
    pub fn new(skip: Option<i64>, limit: Option<i64>) -> Self {
        Self {
            skip: skip.unwrap_or(0).max(0),
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TemplateFilter {
    /// Only templates linked to this subspecialty code.
    pub spec_code: Option<String>,
    pub lang: Option<String>,
    pub has_data: Option<bool>,
}
