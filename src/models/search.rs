//! Search request and response models.

use serde::{Deserialize, Serialize};

use crate::models::SearchHit;

/// Sort key for search results (always descending)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// Citation count, highest first
    #[default]
    Citations,
    /// Publication date, newest first
    Date,
    /// API relevance ranking
    Relevance,
}

impl SortKey {
    /// The Scopus `sort` parameter for this key
    pub fn as_scopus(&self) -> &'static str {
        match self {
            SortKey::Citations => "-citedby-count",
            SortKey::Date => "-coverDate",
            SortKey::Relevance => "relevancy",
        }
    }
}

impl std::fmt::Display for SortKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_scopus())
    }
}

/// What to search for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum QuerySpec {
    /// Free-text keywords, each matched against title, abstract and keywords
    Keywords(Vec<String>),
    /// Exact title
    Title(String),
    /// Exact DOI
    Doi(String),
    /// Pre-built query passed through verbatim
    Raw(String),
}

impl QuerySpec {
    /// Build a keyword query from a single phrase
    pub fn keywords(phrase: impl Into<String>) -> Self {
        QuerySpec::Keywords(vec![phrase.into()])
    }

    /// Render the structured Scopus query string
    pub fn build(&self) -> String {
        match self {
            QuerySpec::Raw(query) => query.clone(),
            QuerySpec::Title(title) => format!("TITLE(\"{}\")", escape_quotes(title)),
            QuerySpec::Doi(doi) => format!("DOI({})", quote_term(doi)),
            QuerySpec::Keywords(keywords) => keywords
                .iter()
                .map(|k| k.trim())
                .filter(|k| !k.is_empty())
                .map(|k| format!("TITLE-ABS-KEY(\"{}\")", escape_quotes(k)))
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }

    /// Render the query with an inclusive lower publication-year bound
    pub fn build_with_year(&self, from_year: Option<i32>) -> String {
        let base = self.build();
        match from_year {
            Some(year) => format!("({}) AND PUBYEAR > {}", base, year - 1),
            None => base,
        }
    }
}

fn escape_quotes(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn quote_term(term: &str) -> String {
    if term.chars().any(char::is_whitespace) {
        format!("\"{}\"", escape_quotes(term))
    } else {
        term.to_string()
    }
}

/// Parameters for one paginated search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Fully rendered query string
    pub query: String,

    /// Maximum number of hits to return
    pub count: usize,

    /// Sort key
    pub sort: SortKey,

    /// Offset of the first hit
    pub start: usize,
}

impl SearchRequest {
    /// Create a new search request
    pub fn new(query: impl Into<String>, count: usize) -> Self {
        Self {
            query: query.into(),
            count,
            sort: SortKey::default(),
            start: 0,
        }
    }

    /// Set sort key
    pub fn sort(mut self, sort: SortKey) -> Self {
        self.sort = sort;
        self
    }

    /// Set start offset
    pub fn start(mut self, start: usize) -> Self {
        self.start = start;
        self
    }
}

/// One page as returned by the remote API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchPage {
    /// Total hits reported by the API for the query
    pub total: usize,

    /// Raw entries on this page (placeholder entries already skipped)
    pub hits: Vec<SearchHit>,

    /// Entries the API returned on this page, including skipped placeholders
    pub returned: usize,
}

/// Accumulated results of a paginated search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    /// Query that was executed
    pub query: String,

    /// Total hits reported by the API
    pub total: usize,

    /// Entries scanned across all pages
    pub scanned: usize,

    /// Hits, capped at the requested count
    pub hits: Vec<SearchHit>,

    /// Transport failure that cut pagination short, if any
    pub interrupted: Option<String>,
}

impl SearchResults {
    /// Create empty results for a query
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            total: 0,
            scanned: 0,
            hits: Vec::new(),
            interrupted: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_query() {
        let query = QuerySpec::keywords("pedestrian simulation");
        assert_eq!(query.build(), "TITLE-ABS-KEY(\"pedestrian simulation\")");
    }

    #[test]
    fn test_multiple_keywords_are_and_joined() {
        let query = QuerySpec::Keywords(vec![
            "crowd".to_string(),
            "  ".to_string(),
            "evacuation".to_string(),
        ]);
        assert_eq!(
            query.build(),
            "TITLE-ABS-KEY(\"crowd\") AND TITLE-ABS-KEY(\"evacuation\")"
        );
    }

    #[test]
    fn test_quotes_are_escaped() {
        let query = QuerySpec::Title("The \"social force\" model".to_string());
        assert_eq!(query.build(), "TITLE(\"The \\\"social force\\\" model\")");
    }

    #[test]
    fn test_doi_query() {
        assert_eq!(
            QuerySpec::Doi("10.1103/PhysRevE.51.4282".to_string()).build(),
            "DOI(10.1103/PhysRevE.51.4282)"
        );
        assert_eq!(
            QuerySpec::Doi("10.1/a b".to_string()).build(),
            "DOI(\"10.1/a b\")"
        );
    }

    #[test]
    fn test_raw_query_verbatim() {
        let raw = "TITLE(crowd) AND PUBYEAR > 2019";
        assert_eq!(QuerySpec::Raw(raw.to_string()).build(), raw);
    }

    #[test]
    fn test_year_filter_is_inclusive() {
        let query = QuerySpec::keywords("crowd");
        assert_eq!(
            query.build_with_year(Some(2023)),
            "(TITLE-ABS-KEY(\"crowd\")) AND PUBYEAR > 2022"
        );
        assert_eq!(query.build_with_year(None), "TITLE-ABS-KEY(\"crowd\")");
    }

    #[test]
    fn test_sort_key_values() {
        assert_eq!(SortKey::Citations.as_scopus(), "-citedby-count");
        assert_eq!(SortKey::Date.as_scopus(), "-coverDate");
        assert_eq!(SortKey::default(), SortKey::Citations);
    }
}
