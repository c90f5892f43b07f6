use std::str::FromStr;
use std::time::Duration;

use crate::error::{CatalogError, CatalogResult};
use crate::generator::GeneratePolicy;
use crate::refresher::RefreshPolicy;
use crate::upstream;

/// Service configuration loaded from environment variables.
///
/// | Env Var                   | Default                               |
/// |---------------------------|---------------------------------------|
/// | `DATABASE_URL`            | required                              |
/// | `BIND_ADDR`               | `0.0.0.0:7777`                        |
/// | `UPSTREAM_BASE_URL`       | `https://api3.rsna.org/radreport/v1`  |
/// | `UPSTREAM_TIMEOUT_SECS`   | `30`                                  |
/// | `SYNC_INTERVAL_SECS`      | unset (no periodic sync)              |
/// | `REFRESH_RETRY_DELAY_MS`  | `1000`                                |
/// | `REFRESH_BATCH_PAUSE_MS`  | `1000`                                |
/// | `GENERATE_BATCH_PAUSE_MS` | `100`                                 |
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub upstream_base_url: String,
    pub upstream_timeout: Duration,
    pub sync_interval: Option<Duration>,
    pub refresh: RefreshPolicy,
    pub generate: GeneratePolicy,
}

impl AppConfig {
    pub fn from_env() -> CatalogResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> CatalogResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| CatalogError::Config("DATABASE_URL is required".into()))?;

        let refresh_defaults = RefreshPolicy::default();
        let generate_defaults = GeneratePolicy::default();

        let sync_interval = match parse_opt::<u64, _>(&lookup, "SYNC_INTERVAL_SECS")? {
            Some(0) | None => None,
            Some(secs) => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            database_url,
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:7777".into()),
            upstream_base_url: lookup("UPSTREAM_BASE_URL")
                .unwrap_or_else(|| upstream::DEFAULT_BASE_URL.into()),
            upstream_timeout: parse_opt(&lookup, "UPSTREAM_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(upstream::DEFAULT_TIMEOUT),
            sync_interval,
            refresh: RefreshPolicy {
                retry_delay: parse_opt(&lookup, "REFRESH_RETRY_DELAY_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(refresh_defaults.retry_delay),
                batch_pause: parse_opt(&lookup, "REFRESH_BATCH_PAUSE_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(refresh_defaults.batch_pause),
                ..refresh_defaults
            },
            generate: GeneratePolicy {
                batch_pause: parse_opt(&lookup, "GENERATE_BATCH_PAUSE_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(generate_defaults.batch_pause),
                ..generate_defaults
            },
        })
    }
}

fn parse_opt<T, F>(lookup: &F, key: &str) -> CatalogResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| CatalogError::Config(format!("{key} must be a valid number: {e}"))),
    }
}
