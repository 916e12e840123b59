//! Per-identifier download outcome.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::SearchHit;

/// Final status of one download attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Succeeded,
    NotFound,
    Failed,
    SkippedExists,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Succeeded => "succeeded",
            DownloadStatus::NotFound => "not-found",
            DownloadStatus::Failed => "failed",
            DownloadStatus::SkippedExists => "skipped-exists",
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the file was (or was attempted to be) obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadMethod {
    /// Open-access link from the lookup service
    Direct,
    /// External fallback command
    Fallback,
    None,
}

impl std::fmt::Display for DownloadMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DownloadMethod::Direct => "direct",
            DownloadMethod::Fallback => "fallback",
            DownloadMethod::None => "none",
        };
        f.write_str(s)
    }
}

/// Result of processing one identifier
///
/// Outcomes are produced once and appended to a run summary; nothing
/// modifies them afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadOutcome {
    /// Identifier as requested
    pub identifier: String,

    pub status: DownloadStatus,

    pub method: DownloadMethod,

    /// File written (or found already present)
    pub path: Option<PathBuf>,

    /// Error detail for `failed` and `not_found`
    pub error: Option<String>,

    /// Title reported by the lookup service or the search hit
    pub title: Option<String>,

    /// URL the content was finally read from
    pub resolved_url: Option<String>,

    /// Why the open-access path did not produce a file
    pub primary_error: Option<String>,

    /// Whether the fallback command ran
    pub fallback_attempted: bool,

    /// Fallback failure or setup error
    pub fallback_error: Option<String>,

    /// Venue from the search hit
    pub source: Option<String>,

    /// Publication year from the search hit
    pub year: Option<i32>,

    /// Citation count from the search hit
    pub cited_by: Option<u32>,
}

impl DownloadOutcome {
    fn base(identifier: impl Into<String>, status: DownloadStatus, method: DownloadMethod) -> Self {
        Self {
            identifier: identifier.into(),
            status,
            method,
            path: None,
            error: None,
            title: None,
            resolved_url: None,
            primary_error: None,
            fallback_attempted: false,
            fallback_error: None,
            source: None,
            year: None,
            cited_by: None,
        }
    }

    /// A file was written
    pub fn succeeded(identifier: impl Into<String>, method: DownloadMethod, path: PathBuf) -> Self {
        let mut outcome = Self::base(identifier, DownloadStatus::Succeeded, method);
        outcome.path = Some(path);
        outcome
    }

    /// No open-access copy and no fallback
    pub fn not_found(identifier: impl Into<String>, detail: impl Into<String>) -> Self {
        let mut outcome = Self::base(identifier, DownloadStatus::NotFound, DownloadMethod::None);
        outcome.error = Some(detail.into());
        outcome
    }

    /// The attempt failed
    pub fn failed(
        identifier: impl Into<String>,
        method: DownloadMethod,
        error: impl Into<String>,
    ) -> Self {
        let mut outcome = Self::base(identifier, DownloadStatus::Failed, method);
        outcome.error = Some(error.into());
        outcome
    }

    /// The target file already exists and was left untouched
    pub fn skipped_exists(identifier: impl Into<String>, path: PathBuf) -> Self {
        let mut outcome =
            Self::base(identifier, DownloadStatus::SkippedExists, DownloadMethod::None);
        outcome.path = Some(path);
        outcome
    }

    /// Set the title
    pub fn title(mut self, title: Option<String>) -> Self {
        if title.as_deref().is_some_and(|t| !t.is_empty()) {
            self.title = title;
        }
        self
    }

    /// Set the resolved URL
    pub fn resolved_url(mut self, url: Option<String>) -> Self {
        self.resolved_url = url;
        self
    }

    /// Record the open-access failure
    pub fn primary_error(mut self, error: Option<String>) -> Self {
        self.primary_error = error;
        self
    }

    /// Record the fallback attempt
    pub fn fallback(mut self, attempted: bool, error: Option<String>) -> Self {
        self.fallback_attempted = attempted;
        self.fallback_error = error;
        self
    }

    /// Copy bibliographic context from the search hit
    pub fn with_hit(mut self, hit: &SearchHit) -> Self {
        if self.title.is_none() && !hit.title.is_empty() {
            self.title = Some(hit.title.clone());
        }
        if !hit.source.is_empty() {
            self.source = Some(hit.source.clone());
        }
        self.year = hit.year;
        self.cited_by = Some(hit.cited_by);
        self
    }

    /// Whether the paper is on disk after this attempt
    pub fn is_available(&self) -> bool {
        matches!(
            self.status,
            DownloadStatus::Succeeded | DownloadStatus::SkippedExists
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SearchHitBuilder;

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&DownloadStatus::SkippedExists).unwrap();
        assert_eq!(json, "\"skipped_exists\"");
        assert_eq!(DownloadStatus::NotFound.to_string(), "not-found");
    }

    #[test]
    fn test_constructors() {
        let ok = DownloadOutcome::succeeded("10.1/a", DownloadMethod::Direct, "a.pdf".into());
        assert_eq!(ok.status, DownloadStatus::Succeeded);
        assert_eq!(ok.path, Some(PathBuf::from("a.pdf")));
        assert!(ok.is_available());

        let missing = DownloadOutcome::not_found("10.1/b", "no_oa");
        assert_eq!(missing.method, DownloadMethod::None);
        assert_eq!(missing.error.as_deref(), Some("no_oa"));
        assert!(!missing.is_available());

        let skipped = DownloadOutcome::skipped_exists("10.1/c", "c.pdf".into());
        assert!(skipped.is_available());
    }

    #[test]
    fn test_with_hit_keeps_lookup_title() {
        let hit = SearchHitBuilder::new("Search Title")
            .source("Safety Science")
            .year(2024)
            .cited_by(7)
            .build();

        let outcome = DownloadOutcome::not_found("10.1/a", "no_oa")
            .title(Some("Lookup Title".to_string()))
            .with_hit(&hit);
        assert_eq!(outcome.title.as_deref(), Some("Lookup Title"));
        assert_eq!(outcome.source.as_deref(), Some("Safety Science"));
        assert_eq!(outcome.year, Some(2024));
        assert_eq!(outcome.cited_by, Some(7));

        let outcome = DownloadOutcome::not_found("10.1/a", "no_oa").with_hit(&hit);
        assert_eq!(outcome.title.as_deref(), Some("Search Title"));
    }
}
