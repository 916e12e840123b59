//! Remote metadata and open-access sources.
//!
//! Two seams are defined here:
//!
//! - [`SearchSource`]: a paginated bibliographic search API. [`ScopusSource`]
//!   is the production implementation; only [`SearchSource::fetch_page`] is
//!   source specific, pagination is shared.
//! - [`OpenAccessLookup`]: resolves a DOI to candidate full-text URLs.
//!   [`UnpaywallSource`] is the production implementation.
//!
//! [`mock`] provides in-memory implementations of both for tests.

mod scopus;
mod unpaywall;

pub mod mock;

pub use mock::{make_hit, MockLookup, MockSearchSource};
pub use scopus::ScopusSource;
pub use unpaywall::UnpaywallSource;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{SearchPage, SearchRequest, SearchResults};

/// A paginated bibliographic search API
#[async_trait]
pub trait SearchSource: Send + Sync + std::fmt::Debug {
    /// Unique identifier for this source
    fn id(&self) -> &str;

    /// Human-readable name of this source
    fn name(&self) -> &str;

    /// Entries requested per page
    fn page_size(&self) -> usize {
        25
    }

    /// Fetch one page starting at `request.start` with at most `request.count` entries
    async fn fetch_page(&self, request: &SearchRequest) -> Result<SearchPage, SourceError>;

    /// Search, paginating until `request.count` hits are collected or the
    /// API runs out of results
    ///
    /// A transport failure after the first page ends pagination and is
    /// reported in [`SearchResults::interrupted`]; on the first page it is
    /// returned as an error.
    async fn search(&self, request: &SearchRequest) -> Result<SearchResults, SourceError> {
        let mut results = SearchResults::new(&request.query);
        let mut start = request.start;
        let mut pages = 0usize;
        let page_size = self.page_size().max(1);

        while results.hits.len() < request.count {
            let remaining = request.count - results.hits.len();
            let mut page_request = request.clone().start(start);
            page_request.count = remaining.min(page_size);

            let page = match self.fetch_page(&page_request).await {
                Ok(page) => page,
                Err(SourceError::Network(detail)) if pages > 0 => {
                    tracing::warn!(
                        "{} pagination stopped at offset {}: {}",
                        self.name(),
                        start,
                        detail
                    );
                    results.interrupted = Some(detail);
                    break;
                }
                Err(e) => return Err(e),
            };

            if pages == 0 {
                results.total = page.total;
            }
            pages += 1;

            if page.returned == 0 {
                break;
            }

            results.scanned += page.returned;
            start += page.returned;
            results.hits.extend(page.hits);

            tracing::debug!(
                "{} page {}: {} entries, {} hits so far of {}",
                self.name(),
                pages,
                page.returned,
                results.hits.len(),
                results.total
            );

            if start >= results.total {
                break;
            }
        }

        results.hits.truncate(request.count);
        Ok(results)
    }
}

/// Open-access record for one DOI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OaRecord {
    pub doi: String,
    pub title: Option<String>,
    pub is_oa: bool,

    /// Candidate full-text URLs, best first, without duplicates
    pub candidate_urls: Vec<String>,
}

/// Resolves a DOI to open-access full-text locations
#[async_trait]
pub trait OpenAccessLookup: Send + Sync + std::fmt::Debug {
    /// Human-readable name of this service
    fn name(&self) -> &str;

    /// Look up a DOI; an unknown DOI is [`SourceError::NotFound`]
    async fn lookup(&self, doi: &str) -> Result<OaRecord, SourceError>;
}

/// Errors that can occur when interacting with a source
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Missing or rejected credential
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The API rejected the query
    #[error("Query error: {0}")]
    Query(String),

    /// Network or HTTP error
    #[error("Network error: {0}")]
    Network(String),

    /// Paper not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// IO error (file system)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Whether this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::Authentication(_) | SourceError::Query(_))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Parse(format!("JSON: {}", err))
    }
}
