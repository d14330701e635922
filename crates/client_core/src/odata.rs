use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::ACCEPT, Client};
use serde_json::Value;
use shared::{error::LoadError, record::Record};
use tracing::{debug, warn};
use url::Url;

use crate::source::{PageRequest, PageResult, PageSource};

const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Optional hardening around each page fetch. The default applies no timeout
/// and no retries: a failed fetch ends the stream and the user re-triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    pub timeout: Option<Duration>,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: None,
            retry_attempts: 0,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ODataSource {
    http: Client,
    service_root: Url,
    policy: FetchPolicy,
}

impl ODataSource {
    pub fn new(service_root: &str) -> Result<Self, url::ParseError> {
        let mut service_root = Url::parse(service_root.trim())?;
        if !service_root.path().ends_with('/') {
            let path = format!("{}/", service_root.path());
            service_root.set_path(&path);
        }
        Ok(Self {
            http: Client::new(),
            service_root,
            policy: FetchPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn entity_url(&self, entity_set: &str) -> Result<Url, LoadError> {
        self.service_root
            .join(entity_set.trim_start_matches('/'))
            .map_err(|err| LoadError::fetch_failed(format!("invalid entity set {entity_set:?}: {err}")))
    }

    async fn fetch_once(&self, url: &Url, request: &PageRequest) -> Result<PageResult, LoadError> {
        let mut query = vec![
            ("$top", request.limit.to_string()),
            ("$skip", request.offset.to_string()),
        ];
        if let Some(filter) = &request.filter {
            query.push(("$filter", filter.clone()));
        }

        let mut builder = self
            .http
            .get(url.clone())
            .header(ACCEPT, "application/json")
            .query(&query);
        if let Some(timeout) = self.policy.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| transport_error(url, &err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::http_status(
                status.as_u16(),
                format!("{url} returned {status}"),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| transport_error(url, &err))?;
        let body: Value = serde_json::from_slice(&body)
            .map_err(|err| LoadError::malformed(format!("{url} returned invalid JSON: {err}")))?;
        decode_page(&body, request.limit)
    }
}

#[async_trait]
impl PageSource for ODataSource {
    async fn fetch_page(
        &self,
        entity_set: &str,
        request: &PageRequest,
    ) -> Result<PageResult, LoadError> {
        let url = self.entity_url(entity_set)?;
        let mut attempt = 0;
        loop {
            debug!(
                %url,
                offset = request.offset,
                limit = request.limit,
                filter = request.filter.as_deref().unwrap_or(""),
                attempt,
                "odata: fetching page"
            );
            match self.fetch_once(&url, request).await {
                Ok(page) => return Ok(page),
                Err(err) if err.is_retryable() && attempt < self.policy.retry_attempts => {
                    attempt += 1;
                    let delay = retry_delay(self.policy.retry_backoff, attempt);
                    warn!(%url, attempt, ?delay, "odata: fetch failed, retrying: {err}");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn retry_delay(backoff: Duration, attempt: u32) -> Duration {
    backoff.saturating_mul(attempt)
}

fn transport_error(url: &Url, err: &reqwest::Error) -> LoadError {
    if err.is_timeout() {
        return LoadError::fetch_failed(format!("request to {url} timed out"));
    }
    match err.status() {
        Some(status) => LoadError::http_status(status.as_u16(), format!("{url}: {err}")),
        None => LoadError::fetch_failed(format!("{url}: {err}")),
    }
}

/// Extracts the row array of an OData response: `value` (v4), or `d.results`
/// / `d` (v2).
pub fn decode_page(body: &Value, limit: usize) -> Result<PageResult, LoadError> {
    let rows = body
        .get("value")
        .and_then(Value::as_array)
        .or_else(|| {
            body.get("d").and_then(|d| {
                d.get("results")
                    .and_then(Value::as_array)
                    .or_else(|| d.as_array())
            })
        })
        .ok_or_else(|| LoadError::malformed("response body has no `value` array"))?;

    let records = rows
        .iter()
        .enumerate()
        .map(|(idx, row)| {
            Record::from_json(row)
                .ok_or_else(|| LoadError::malformed(format!("row {idx} is not a JSON object")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PageResult::from_records(records, limit))
}

pub fn escape_literal(raw: &str) -> String {
    raw.replace('\'', "''")
}

/// Builds `contains(F1,'q') or contains(F2,'q') ...` for a trimmed, escaped
/// query. `None` when there is nothing to match or nothing to match against.
pub fn contains_filter(fields: &[String], query: &str) -> Option<String> {
    let query = query.trim();
    if query.is_empty() || fields.is_empty() {
        return None;
    }
    let literal = escape_literal(query);
    let clauses: Vec<String> = fields
        .iter()
        .map(|field| format!("contains({field},'{literal}')"))
        .collect();
    Some(clauses.join(" or "))
}

#[cfg(test)]
#[path = "tests/odata_tests.rs"]
mod tests;
