//! # papergrab
//!
//! Search a bibliographic metadata API by topic and download open-access
//! full text for the results, with quantity and freshness aware defaults.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`models`]: Core data structures (SearchHit, DownloadOutcome, RunSummary)
//! - [`sources`]: Metadata search (Scopus) and open-access lookup (Unpaywall) clients
//! - [`fallback`]: External retrieval commands used when no open-access copy exists
//! - [`download`]: Open-access resolver and downloader, single and batch
//! - [`intent`]: Quantity and freshness intent resolution
//! - [`orchestrator`]: Topic search to bounded batch download
//! - [`report`]: Text and JSON rendering of summaries
//! - [`utils`]: HTTP client, identifier validation and file naming
//! - [`config`]: Configuration management

pub mod config;
pub mod download;
pub mod fallback;
pub mod intent;
pub mod models;
pub mod orchestrator;
pub mod report;
pub mod sources;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use download::Downloader;
pub use models::{DownloadOutcome, RunSummary, SearchHit};
pub use orchestrator::BatchOrchestrator;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
