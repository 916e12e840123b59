//! Scopus Search API source.
//!
//! API documentation: <https://dev.elsevier.com/documentation/ScopusSearchAPI.wadl>

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::config::Config;
use crate::models::{SearchHit, SearchPage, SearchRequest};
use crate::sources::{SearchSource, SourceError};
use crate::utils::HttpClient;

/// Scopus search source
///
/// Requires an Elsevier API key, sent as `X-ELS-APIKey`.
#[derive(Debug, Clone)]
pub struct ScopusSource {
    client: HttpClient,
    api_key: String,
    base_url: String,
    page_size: usize,
}

impl ScopusSource {
    /// Create a Scopus source from configuration
    ///
    /// Fails with [`SourceError::Authentication`] when no API key is configured.
    pub fn new(config: &Config, client: HttpClient) -> Result<Self, SourceError> {
        let api_key = config
            .credentials
            .elsevier_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                SourceError::Authentication(
                    "missing Elsevier API key; set ELSEVIER_API_KEY or credentials.elsevier_api_key"
                        .to_string(),
                )
            })?
            .to_string();

        Ok(Self {
            client,
            api_key,
            base_url: config.search.base_url.clone(),
            page_size: config.search.page_size.max(1),
        })
    }

    fn parse_page(response: ScopusResponse) -> Result<SearchPage, SourceError> {
        let results = response.search_results;
        let total = results
            .total_results
            .as_ref()
            .and_then(value_as_u64)
            .unwrap_or(0) as usize;

        let returned = results.entry.len();
        let hits = results
            .entry
            .into_iter()
            .filter(|entry| entry.error.is_none())
            .map(ScopusEntry::into_hit)
            .collect();

        Ok(SearchPage {
            total,
            hits,
            returned,
        })
    }
}

#[async_trait]
impl SearchSource for ScopusSource {
    fn id(&self) -> &str {
        "scopus"
    }

    fn name(&self) -> &str {
        "Scopus"
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    async fn fetch_page(&self, request: &SearchRequest) -> Result<SearchPage, SourceError> {
        let count = request.count.to_string();
        let start = request.start.to_string();

        tracing::debug!(
            "Scopus request: query={:?} start={} count={} sort={}",
            request.query,
            start,
            count,
            request.sort
        );

        let response = self
            .client
            .get(&self.base_url)
            .header("X-ELS-APIKey", &self.api_key)
            .header("Accept", "application/json")
            .query(&[
                ("query", request.query.as_str()),
                ("count", count.as_str()),
                ("start", start.as_str()),
                ("sort", request.sort.as_scopus()),
            ])
            .send()
            .await
            .map_err(|e| SourceError::Network(format!("Scopus request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let body: ScopusResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("Failed to parse Scopus response: {}", e)))?;

        Self::parse_page(body)
    }
}

/// Map a non-success HTTP status onto the error taxonomy
fn classify_status(status: StatusCode, body: &str) -> SourceError {
    let detail = service_error_text(body).unwrap_or_else(|| body.trim().chars().take(300).collect());
    let message = format!("Scopus API returned status {}: {}", status, detail);

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        SourceError::Authentication(message)
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        SourceError::Network(message)
    } else {
        SourceError::Query(message)
    }
}

/// Extract `service-error.status.statusText` from an Elsevier error body
fn service_error_text(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/service-error/status/statusText")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Scopus reports counts as strings; accept numbers too
fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct ScopusResponse {
    #[serde(rename = "search-results")]
    search_results: ScopusResults,
}

#[derive(Debug, Deserialize)]
struct ScopusResults {
    #[serde(rename = "opensearch:totalResults")]
    total_results: Option<Value>,
    #[serde(default)]
    entry: Vec<ScopusEntry>,
}

#[derive(Debug, Deserialize)]
struct ScopusEntry {
    #[serde(rename = "dc:title")]
    title: Option<String>,
    #[serde(rename = "prism:doi")]
    doi: Option<String>,
    #[serde(rename = "prism:coverDate")]
    cover_date: Option<String>,
    #[serde(rename = "prism:publicationName")]
    publication_name: Option<String>,
    #[serde(rename = "citedby-count")]
    cited_by: Option<Value>,
    #[serde(rename = "dc:creator")]
    creator: Option<String>,
    eid: Option<String>,
    // empty result sets come back as a single placeholder entry with this key
    error: Option<Value>,
}

impl ScopusEntry {
    fn into_hit(self) -> SearchHit {
        let year = self
            .cover_date
            .as_deref()
            .and_then(|date| date.get(..4))
            .and_then(|y| y.parse::<i32>().ok());

        let cited_by = self
            .cited_by
            .as_ref()
            .and_then(value_as_u64)
            .map(|n| n.min(u32::MAX as u64) as u32)
            .unwrap_or(0);

        SearchHit {
            identifier: self.doi.filter(|doi| !doi.trim().is_empty()),
            title: self.title.unwrap_or_default(),
            year,
            source: self.publication_name.unwrap_or_default(),
            cited_by,
            authors: self.creator.filter(|c| !c.is_empty()),
            eid: self.eid.filter(|e| !e.is_empty()),
        }
    }
}
