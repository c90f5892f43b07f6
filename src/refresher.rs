//! Enrichment of templates whose `template_data` is missing.
//!
//! Each template walks a small state machine:
//!
//! ```text
//! Attempting(1) -> Attempting(2) -> ... -> Attempting(max) -> Fallback
//!       |               |                       |                |
//!       +---------------+------> Succeeded <----+----------------+--> Failed
//! ```
//!
//! A detail fetch that succeeds ends in `Succeeded`. After `max_attempts`
//! failed fetches the basic listing is consulted instead (`Fallback`), which
//! can only restore attribution fields.

use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog_types::{Template, TemplatePatch};
use crate::error::{CatalogError, CatalogResult};
use crate::store::CatalogStore;
use crate::upstream::TemplateSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Templates dispatched concurrently per batch.
    pub batch_size: usize,
    pub max_attempts: u32,
    /// Base backoff; the wait after attempt `n` is `retry_delay * n`.
    pub retry_delay: Duration,
    pub batch_pause: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            batch_size: 5,
            max_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            batch_pause: Duration::from_millis(1000),
        }
    }
}

impl RefreshPolicy {
    /// Wait before the attempt following `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_delay * attempt
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshState {
    Attempting(u32),
    Fallback,
    Succeeded { fallback: bool },
    Failed(String),
}

impl RefreshState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RefreshState::Succeeded { .. } | RefreshState::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshOutcome {
    pub success: bool,
    #[serde(default)]
    pub fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub total: usize,
    pub updated: usize,
    pub failed: usize,
    pub fallbacks: usize,
    pub errors: Vec<String>,
}

pub struct Refresher<'a> {
    store: &'a dyn CatalogStore,
    source: &'a dyn TemplateSource,
    policy: RefreshPolicy,
}

impl<'a> Refresher<'a> {
    pub fn new(
        store: &'a dyn CatalogStore,
        source: &'a dyn TemplateSource,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            store,
            source,
            policy,
        }
    }

    /// Refreshes every template without data, most viewed first.
    pub async fn refresh_all(&self) -> CatalogResult<RefreshSummary> {
        let pending = self.store.templates_missing_data().await?;
        let mut summary = RefreshSummary {
            total: pending.len(),
            ..Default::default()
        };
        info!(total = summary.total, "Refreshing templates without data");

        for (index, batch) in pending.chunks(self.policy.batch_size.max(1)).enumerate() {
            if index > 0 && !self.policy.batch_pause.is_zero() {
                tokio::time::sleep(self.policy.batch_pause).await;
            }

            let outcomes = join_all(batch.iter().map(|t| self.refresh_template(t))).await;

            for (template, outcome) in batch.iter().zip(outcomes) {
                if outcome.success {
                    summary.updated += 1;
                    if outcome.fallback {
                        summary.fallbacks += 1;
                    }
                } else {
                    summary.failed += 1;
                    summary.errors.push(format!(
                        "Template {}: {}",
                        template.template_id,
                        outcome.error.unwrap_or_default()
                    ));
                }
            }
            debug!(batch = index + 1, size = batch.len(), "Refresh batch settled");
        }

        info!(
            updated = summary.updated,
            failed = summary.failed,
            fallbacks = summary.fallbacks,
            "Template refresh complete"
        );
        Ok(summary)
    }

    /// Refreshes a single template regardless of whether it already has data.
    pub async fn refresh_one(&self, template_id: &str) -> CatalogResult<RefreshOutcome> {
        let template = self
            .store
            .find_template(template_id)
            .await?
            .ok_or_else(|| CatalogError::not_found("Template", template_id))?;
        Ok(self.refresh_template(&template).await)
    }

    async fn refresh_template(&self, template: &Template) -> RefreshOutcome {
        let mut state = RefreshState::Attempting(1);
        while !state.is_terminal() {
            state = self.step(template, state).await;
        }
        match state {
            RefreshState::Succeeded { fallback } => RefreshOutcome {
                success: true,
                fallback,
                error: None,
            },
            RefreshState::Failed(error) => RefreshOutcome {
                success: false,
                fallback: false,
                error: Some(error),
            },
            other => RefreshOutcome {
                success: false,
                fallback: false,
                error: Some(format!("refresh stopped in state {other:?}")),
            },
        }
    }

    /// Advances `template` by one transition.
    pub async fn step(&self, template: &Template, state: RefreshState) -> RefreshState {
        match state {
            RefreshState::Attempting(attempt) => self.attempt(template, attempt).await,
            RefreshState::Fallback => self.fallback(template).await,
            terminal => terminal,
        }
    }

    async fn attempt(&self, template: &Template, attempt: u32) -> RefreshState {
        let id = template.template_id.as_str();
        let fetched = self
            .source
            .fetch_template_details(id, &template.template_version)
            .await
            .and_then(|detail| {
                let patch = TemplatePatch::from(&detail);
                if patch.is_empty() {
                    Err(CatalogError::Upstream(format!("details for {id} carried no fields")))
                } else {
                    Ok(patch)
                }
            });

        match fetched {
            Ok(patch) => match self.store.merge_template_fields(id, &patch).await {
                Ok(true) => {
                    debug!(template_id = %id, attempt, "Template refreshed");
                    RefreshState::Succeeded { fallback: false }
                }
                Ok(false) => RefreshState::Failed(format!("template {id} disappeared")),
                Err(e) => RefreshState::Failed(e.to_string()),
            },
            Err(e) if attempt >= self.policy.max_attempts => {
                warn!(template_id = %id, attempt, error = %e, "Detail fetch exhausted, falling back");
                RefreshState::Fallback
            }
            Err(e) => {
                let wait = self.policy.backoff(attempt);
                debug!(template_id = %id, attempt, wait_ms = wait.as_millis() as u64, error = %e, "Detail fetch failed, retrying");
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
                RefreshState::Attempting(attempt + 1)
            }
        }
    }

    async fn fallback(&self, template: &Template) -> RefreshState {
        let id = template.template_id.as_str();
        let listing = match self.source.fetch_templates().await {
            Ok(listing) => listing,
            Err(e) => return RefreshState::Failed(format!("fallback listing failed: {e}")),
        };

        let Some(basic) = listing
            .iter()
            .find(|raw| raw.template_id.as_deref().map(str::trim) == Some(id))
        else {
            return RefreshState::Failed(format!("template {id} not present in upstream listing"));
        };

        let patch = TemplatePatch::attribution_from(basic);
        match self.store.merge_template_fields(id, &patch).await {
            Ok(true) => {
                info!(template_id = %id, "Template attribution restored from listing");
                RefreshState::Succeeded { fallback: true }
            }
            Ok(false) => RefreshState::Failed(format!("template {id} disappeared")),
            Err(e) => RefreshState::Failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_linearly() {
        let policy = RefreshPolicy {
            retry_delay: Duration::from_millis(250),
            ..Default::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(250));
        assert_eq!(policy.backoff(2), Duration::from_millis(500));
        assert_eq!(policy.backoff(3), Duration::from_millis(750));
    }

    #[test]
    fn default_policy_matches_upstream_limits() {
        let policy = RefreshPolicy::default();
        assert_eq!(policy.batch_size, 5);
        assert_eq!(policy.max_attempts, 3);
    }

    #[test]
    fn only_succeeded_and_failed_are_terminal() {
        assert!(!RefreshState::Attempting(1).is_terminal());
        assert!(!RefreshState::Fallback.is_terminal());
        assert!(RefreshState::Succeeded { fallback: true }.is_terminal());
        assert!(RefreshState::Failed("x".into()).is_terminal());
    }
}
