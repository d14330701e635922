use std::{collections::HashMap, fs, io::ErrorKind, path::Path, time::Duration};

use anyhow::Context;
use client_core::FetchPolicy;
use serde::Deserialize;

pub const SETTINGS_FILE: &str = "backoffice.toml";
pub const DEFAULT_SERVICE_URL: &str = "https://services.odata.org/V4/Northwind/Northwind.svc";
pub const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub service_url: String,
    pub page_size: usize,
    pub request_timeout_secs: Option<u64>,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub views: HashMap<String, ViewSettings>,
}

/// Per-view overrides under `[views.<name>]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ViewSettings {
    pub entity_set: Option<String>,
    pub search_fields: Option<Vec<String>>,
    pub page_size: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_url: DEFAULT_SERVICE_URL.into(),
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout_secs: None,
            retry_attempts: 0,
            retry_backoff_ms: 500,
            views: HashMap::new(),
        }
    }
}

impl Settings {
    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            timeout: self.request_timeout_secs.map(Duration::from_secs),
            retry_attempts: self.retry_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    load_settings_with(path, |key| std::env::var(key).ok())
}

/// Built-in defaults, then the TOML file (if present), then environment
/// variables.
pub fn load_settings_with<F>(path: &Path, env: F) -> anyhow::Result<Settings>
where
    F: Fn(&str) -> Option<String>,
{
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => toml::from_str::<Settings>(&raw)
            .with_context(|| format!("failed to parse settings file '{}'", path.display()))?,
        Err(err) if err.kind() == ErrorKind::NotFound => Settings::default(),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read settings file '{}'", path.display()))
        }
    };

    if let Some(v) = env("BACKOFFICE_SERVICE_URL") {
        settings.service_url = v;
    }
    if let Some(v) = env("APP__SERVICE_URL") {
        settings.service_url = v;
    }

    if let Some(v) = env("APP__PAGE_SIZE") {
        settings.page_size = v
            .parse()
            .with_context(|| format!("APP__PAGE_SIZE must be a positive integer, got '{v}'"))?;
    }

    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECS") {
        settings.request_timeout_secs = Some(v.parse().with_context(|| {
            format!("APP__REQUEST_TIMEOUT_SECS must be a whole number of seconds, got '{v}'")
        })?);
    }

    if let Some(v) = env("APP__RETRY_ATTEMPTS") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.retry_attempts = parsed;
        }
    }

    settings.page_size = settings.page_size.max(1);
    Ok(settings)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
