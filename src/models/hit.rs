//! Search hit model: one flattened bibliographic record.

use serde::{Deserialize, Serialize};

/// One bibliographic record returned by the metadata search
///
/// Hits are produced once by a search source and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Digital Object Identifier (absent for some entries)
    pub identifier: Option<String>,

    /// Paper title
    pub title: String,

    /// Publication year
    pub year: Option<i32>,

    /// Source/venue name
    pub source: String,

    /// Citation count (0 when the API omits it)
    pub cited_by: u32,

    /// First author as reported by the API
    pub authors: Option<String>,

    /// Source-specific record id (Scopus EID)
    pub eid: Option<String>,
}

impl SearchHit {
    /// Create a new hit with a title and defaults elsewhere
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            identifier: None,
            title: title.into(),
            year: None,
            source: String::new(),
            cited_by: 0,
            authors: None,
            eid: None,
        }
    }

    /// The identifier if present and usable
    ///
    /// Scopus reports missing DOIs as absent, empty, or `N/A`.
    pub fn usable_identifier(&self) -> Option<&str> {
        self.identifier
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty() && !id.eq_ignore_ascii_case("n/a"))
    }
}

/// Builder for constructing SearchHit objects
#[derive(Debug, Clone)]
pub struct SearchHitBuilder {
    hit: SearchHit,
}

impl SearchHitBuilder {
    /// Create a new builder with the required title
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            hit: SearchHit::new(title),
        }
    }

    /// Set identifier
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.hit.identifier = Some(identifier.into());
        self
    }

    /// Set publication year
    pub fn year(mut self, year: i32) -> Self {
        self.hit.year = Some(year);
        self
    }

    /// Set source/venue name
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.hit.source = source.into();
        self
    }

    /// Set citation count
    pub fn cited_by(mut self, count: u32) -> Self {
        self.hit.cited_by = count;
        self
    }

    /// Set authors
    pub fn authors(mut self, authors: impl Into<String>) -> Self {
        self.hit.authors = Some(authors.into());
        self
    }

    /// Set EID
    pub fn eid(mut self, eid: impl Into<String>) -> Self {
        self.hit.eid = Some(eid.into());
        self
    }

    /// Build the SearchHit
    pub fn build(self) -> SearchHit {
        self.hit
    }
}
