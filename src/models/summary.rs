//! Run summary aggregated over one invocation.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::fallback::FallbackMode;
use crate::intent::{Provenance, QuantityMode, ResolvedPolicy};
use crate::models::{DownloadOutcome, DownloadStatus, SortKey};
use crate::orchestrator::StopPolicy;

/// Query parameters a topic run used
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryParams {
    /// Rendered query, including any year filter
    pub query: String,
    pub sort: SortKey,
    pub latest_mode: bool,
    pub from_year: Option<i32>,
    pub quantity_mode: QuantityMode,
    pub provenance: Provenance,
    pub target: usize,
    pub search_cap: usize,
    pub attempt_cap: usize,
    pub success_cap: Option<usize>,
    pub stop_policy: StopPolicy,
}

impl QueryParams {
    /// Capture a resolved policy and the query it produced
    pub fn new(query: impl Into<String>, policy: &ResolvedPolicy, stop_policy: StopPolicy) -> Self {
        Self {
            query: query.into(),
            sort: policy.freshness.sort,
            latest_mode: policy.freshness.latest,
            from_year: policy.freshness.from_year,
            quantity_mode: policy.quantity.mode,
            provenance: policy.quantity.provenance,
            target: policy.quantity.target,
            search_cap: policy.search_cap,
            attempt_cap: policy.attempt_cap,
            success_cap: policy.success_cap,
            stop_policy,
        }
    }
}

/// How the fallback was configured for the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackReport {
    pub mode: FallbackMode,

    /// Resolved command line
    pub command: Option<String>,

    /// Why no command could be resolved
    pub setup_error: Option<String>,
}

impl FallbackReport {
    pub fn disabled() -> Self {
        Self {
            mode: FallbackMode::Off,
            command: None,
            setup_error: None,
        }
    }
}

/// Non-fatal conditions reported alongside the outcomes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunWarning {
    /// Fewer candidates than the target were found
    InsufficientResults { target: usize, found: usize },
    /// Pagination stopped on a transport failure
    SearchInterrupted { detail: String },
    /// Fallback was requested but no command could be resolved
    FallbackUnavailable { detail: String },
    /// The run was interrupted before these many candidates were attempted
    Cancelled { remaining: usize },
}

impl std::fmt::Display for RunWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunWarning::InsufficientResults { target, found } => write!(
                f,
                "insufficient results: {} candidates for a target of {}",
                found, target
            ),
            RunWarning::SearchInterrupted { detail } => {
                write!(f, "search interrupted: {}", detail)
            }
            RunWarning::FallbackUnavailable { detail } => {
                write!(f, "fallback unavailable: {}", detail)
            }
            RunWarning::Cancelled { remaining } => {
                write!(f, "cancelled with {} candidates remaining", remaining)
            }
        }
    }
}

/// Aggregate of one search/download invocation
///
/// Outcomes can only be appended through [`RunSummary::record`].
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    params: Option<QueryParams>,
    total_hits: usize,
    scanned: usize,
    candidate_count: usize,
    missing_identifier_count: usize,
    attempted: usize,
    succeeded: usize,
    already_present: usize,
    fallback: FallbackReport,
    warnings: Vec<RunWarning>,
    cancelled: bool,
    outcomes: Vec<DownloadOutcome>,
}

impl RunSummary {
    /// Start a summary
    pub fn new(params: Option<QueryParams>, fallback: FallbackReport) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            params,
            total_hits: 0,
            scanned: 0,
            candidate_count: 0,
            missing_identifier_count: 0,
            attempted: 0,
            succeeded: 0,
            already_present: 0,
            fallback,
            warnings: Vec::new(),
            cancelled: false,
            outcomes: Vec::new(),
        }
    }

    /// Record search statistics
    pub fn set_search_stats(
        &mut self,
        total_hits: usize,
        scanned: usize,
        candidate_count: usize,
        missing_identifier_count: usize,
    ) {
        self.total_hits = total_hits;
        self.scanned = scanned;
        self.candidate_count = candidate_count;
        self.missing_identifier_count = missing_identifier_count;
    }

    /// Append one outcome
    pub fn record(&mut self, outcome: DownloadOutcome) {
        self.attempted += 1;
        match outcome.status {
            DownloadStatus::Succeeded => self.succeeded += 1,
            DownloadStatus::SkippedExists => self.already_present += 1,
            DownloadStatus::NotFound | DownloadStatus::Failed => {}
        }
        self.outcomes.push(outcome);
    }

    /// Append a warning
    pub fn warn(&mut self, warning: RunWarning) {
        tracing::warn!("{}", warning);
        self.warnings.push(warning);
    }

    /// Mark the run as interrupted
    pub fn mark_cancelled(&mut self, remaining: usize) {
        self.cancelled = true;
        self.warn(RunWarning::Cancelled { remaining });
    }

    /// Stamp the finish time
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn params(&self) -> Option<&QueryParams> {
        self.params.as_ref()
    }

    pub fn total_hits(&self) -> usize {
        self.total_hits
    }

    pub fn scanned(&self) -> usize {
        self.scanned
    }

    pub fn candidate_count(&self) -> usize {
        self.candidate_count
    }

    pub fn missing_identifier_count(&self) -> usize {
        self.missing_identifier_count
    }

    pub fn attempted(&self) -> usize {
        self.attempted
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    /// Outcomes whose file was already on disk
    pub fn already_present(&self) -> usize {
        self.already_present
    }

    /// Papers on disk after the run, new or pre-existing
    pub fn available(&self) -> usize {
        self.succeeded + self.already_present
    }

    pub fn fallback(&self) -> &FallbackReport {
        &self.fallback
    }

    pub fn warnings(&self) -> &[RunWarning] {
        &self.warnings
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn outcomes(&self) -> &[DownloadOutcome] {
        &self.outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DownloadMethod;

    #[test]
    fn test_record_counts() {
        let mut summary = RunSummary::new(None, FallbackReport::disabled());
        summary.record(DownloadOutcome::succeeded(
            "10.1/a",
            DownloadMethod::Direct,
            "a.pdf".into(),
        ));
        summary.record(DownloadOutcome::not_found("10.1/b", "no_oa"));
        summary.record(DownloadOutcome::skipped_exists("10.1/c", "c.pdf".into()));
        summary.record(DownloadOutcome::failed(
            "10.1/d",
            DownloadMethod::Fallback,
            "exit 1",
        ));

        assert_eq!(summary.attempted(), 4);
        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.already_present(), 1);
        assert_eq!(summary.available(), 2);
        assert_eq!(summary.outcomes()[1].identifier, "10.1/b");
    }

    #[test]
    fn test_cancel_and_finish() {
        let mut summary = RunSummary::new(None, FallbackReport::disabled());
        assert!(!summary.is_finished());

        summary.mark_cancelled(3);
        summary.finish();

        assert!(summary.is_cancelled());
        assert!(summary.is_finished());
        assert_eq!(summary.warnings(), &[RunWarning::Cancelled { remaining: 3 }]);
    }

    #[test]
    fn test_json_shape() {
        let mut summary = RunSummary::new(None, FallbackReport::disabled());
        summary.warn(RunWarning::InsufficientResults {
            target: 20,
            found: 3,
        });
        let value = serde_json::to_value(&summary).unwrap();

        assert_eq!(value["succeeded"], 0);
        assert_eq!(value["fallback"]["mode"], "off");
        assert_eq!(value["warnings"][0]["kind"], "insufficient_results");
        assert_eq!(value["warnings"][0]["found"], 3);
        assert!(value["outcomes"].as_array().unwrap().is_empty());
    }
}
