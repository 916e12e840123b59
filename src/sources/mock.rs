//! Mock sources for testing purposes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::{SearchHit, SearchPage, SearchRequest};
use crate::sources::{OaRecord, OpenAccessLookup, SearchSource, SourceError};

/// A mock search source serving a fixed list of hits page by page.
#[derive(Debug)]
pub struct MockSearchSource {
    hits: Vec<SearchHit>,
    page_size: usize,
    failures: Mutex<HashMap<usize, SourceError>>,
    requests: Mutex<Vec<SearchRequest>>,
}

impl MockSearchSource {
    /// Create a new mock source over `hits`.
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            page_size: 25,
            failures: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Set the page size used by pagination.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Fail the `page`-th request (zero based) with `error`.
    pub fn fail_page(self, page: usize, error: SourceError) -> Self {
        self.failures
            .lock()
            .expect("mock failures lock")
            .insert(page, error);
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<SearchRequest> {
        self.requests.lock().expect("mock requests lock").clone()
    }
}

#[async_trait]
impl SearchSource for MockSearchSource {
    fn id(&self) -> &str {
        "mock"
    }

    fn name(&self) -> &str {
        "Mock Source"
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    async fn fetch_page(&self, request: &SearchRequest) -> Result<SearchPage, SourceError> {
        let page = {
            let mut requests = self.requests.lock().expect("mock requests lock");
            requests.push(request.clone());
            requests.len() - 1
        };

        if let Some(error) = self.failures.lock().expect("mock failures lock").remove(&page) {
            return Err(error);
        }

        let hits: Vec<SearchHit> = self
            .hits
            .iter()
            .skip(request.start)
            .take(request.count)
            .cloned()
            .collect();

        Ok(SearchPage {
            total: self.hits.len(),
            returned: hits.len(),
            hits,
        })
    }
}

/// A mock open-access lookup backed by a map of DOI to record.
///
/// Unknown DOIs return [`SourceError::NotFound`].
#[derive(Debug, Default)]
pub struct MockLookup {
    records: HashMap<String, OaRecord>,
    lookups: Mutex<Vec<String>>,
}

impl MockLookup {
    /// Create an empty mock lookup.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open-access record with candidate URLs.
    pub fn with_record(mut self, doi: &str, urls: &[&str]) -> Self {
        self.records.insert(
            doi.to_string(),
            OaRecord {
                doi: doi.to_string(),
                title: None,
                is_oa: !urls.is_empty(),
                candidate_urls: urls.iter().map(|u| u.to_string()).collect(),
            },
        );
        self
    }

    /// DOIs looked up so far, in order.
    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().expect("mock lookups lock").clone()
    }
}

#[async_trait]
impl OpenAccessLookup for MockLookup {
    fn name(&self) -> &str {
        "Mock Lookup"
    }

    async fn lookup(&self, doi: &str) -> Result<OaRecord, SourceError> {
        self.lookups
            .lock()
            .expect("mock lookups lock")
            .push(doi.to_string());

        self.records
            .get(doi)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(doi.to_string()))
    }
}

/// Helper function to create a search hit for testing.
pub fn make_hit(identifier: Option<&str>, title: &str, cited_by: u32) -> SearchHit {
    let mut hit = SearchHit::new(title);
    hit.identifier = identifier.map(str::to_string);
    hit.cited_by = cited_by;
    hit
}
