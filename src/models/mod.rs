//! Core data models for search hits, download outcomes and run summaries.

mod hit;
mod outcome;
mod search;
mod summary;

pub use hit::{SearchHit, SearchHitBuilder};
pub use outcome::{DownloadMethod, DownloadOutcome, DownloadStatus};
pub use search::{QuerySpec, SearchPage, SearchRequest, SearchResults, SortKey};
pub use summary::{FallbackReport, QueryParams, RunSummary, RunWarning};
