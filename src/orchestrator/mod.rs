//! Intent-aware batch orchestration.
//!
//! A topic run resolves the caller's intent into a [`ResolvedPolicy`],
//! searches page by page until enough identifier-bearing candidates are
//! collected, then downloads candidates one at a time until the stop policy
//! is satisfied. The result is always a [`RunSummary`]; only credential and
//! query errors from the search abort the run.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::download::Downloader;
use crate::intent::{IntentRequest, ResolvedPolicy};
use crate::models::{QueryParams, QuerySpec, RunSummary, RunWarning, SearchHit, SearchRequest};
use crate::sources::{SearchSource, SourceError};

/// When a topic run stops downloading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopPolicy {
    /// Stop once `target` papers are on disk
    #[default]
    EarlyStop,
    /// Attempt exactly `target` candidates, regardless of success
    AttemptTarget,
}

impl std::fmt::Display for StopPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopPolicy::EarlyStop => f.write_str("early-stop"),
            StopPolicy::AttemptTarget => f.write_str("attempt-target"),
        }
    }
}

/// Shared flag checked before each identifier
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One topic run
#[derive(Debug, Clone)]
pub struct TopicRequest {
    pub query: QuerySpec,
    pub intent: IntentRequest,
    pub stop_policy: StopPolicy,
    pub outdir: PathBuf,
}

/// Candidates selected from the search
#[derive(Debug, Default)]
struct Collected {
    total: usize,
    scanned: usize,
    missing_identifier: usize,
    candidates: Vec<SearchHit>,
    interrupted: Option<String>,
}

/// Turns a topic search into a bounded, resumable batch of downloads
#[derive(Debug, Clone)]
pub struct BatchOrchestrator {
    search: Arc<dyn SearchSource>,
    downloader: Downloader,
    max_ceiling: usize,
    current_year: Option<i32>,
    cancel: CancellationFlag,
}

impl BatchOrchestrator {
    pub fn new(search: Arc<dyn SearchSource>, downloader: Downloader) -> Self {
        Self {
            search,
            downloader,
            max_ceiling: 100,
            current_year: None,
            cancel: CancellationFlag::new(),
        }
    }

    /// Target used by the `max` tier
    pub fn with_max_ceiling(mut self, max_ceiling: usize) -> Self {
        self.max_ceiling = max_ceiling;
        self
    }

    /// Pin the calendar year used for relative windows
    pub fn with_current_year(mut self, year: i32) -> Self {
        self.current_year = Some(year);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resolve the policy and rendered query for a request
    pub fn plan(&self, request: &TopicRequest) -> (ResolvedPolicy, String) {
        let policy = match self.current_year {
            Some(year) => request.intent.resolve(year, self.max_ceiling),
            None => request.intent.resolve_now(self.max_ceiling),
        };
        let query = request.query.build_with_year(policy.freshness.from_year);
        (policy, query)
    }

    /// Run a topic search and download its candidates
    pub async fn run(&self, request: &TopicRequest) -> Result<RunSummary, SourceError> {
        let (policy, query) = self.plan(request);
        let target = policy.quantity.target;

        tracing::info!(
            "topic run: query={:?} sort={} target={} ({:?}) search_cap={} attempt_cap={}",
            query,
            policy.freshness.sort,
            target,
            policy.quantity.provenance,
            policy.search_cap,
            policy.attempt_cap
        );

        let params = QueryParams::new(&query, &policy, request.stop_policy);
        let mut summary = RunSummary::new(Some(params), self.downloader.fallback_report());
        self.downloader.note_fallback(&mut summary);

        let collected = self.collect(&query, &policy).await?;
        if let Some(detail) = &collected.interrupted {
            summary.warn(RunWarning::SearchInterrupted {
                detail: detail.clone(),
            });
        }
        summary.set_search_stats(
            collected.total,
            collected.scanned,
            collected.candidates.len(),
            collected.missing_identifier,
        );

        if collected.candidates.len() < target {
            summary.warn(RunWarning::InsufficientResults {
                target,
                found: collected.candidates.len(),
            });
        }

        let limit = match request.stop_policy {
            StopPolicy::EarlyStop => collected.candidates.len(),
            StopPolicy::AttemptTarget => target.min(collected.candidates.len()),
        };

        for (index, hit) in collected.candidates.iter().take(limit).enumerate() {
            if request.stop_policy == StopPolicy::EarlyStop && summary.available() >= target {
                tracing::info!("target of {} reached after {} attempts", target, index);
                break;
            }
            if self.cancel.is_cancelled() {
                summary.mark_cancelled(limit - index);
                break;
            }

            let Some(identifier) = hit.usable_identifier() else {
                continue;
            };
            tracing::debug!("[{}/{}] {} {:?}", index + 1, limit, identifier, hit.title);

            let outcome = self
                .downloader
                .download(identifier, &request.outdir)
                .await
                .with_hit(hit);
            summary.record(outcome);

            if let Some(cap) = policy.success_cap {
                if summary.succeeded() >= cap {
                    tracing::info!("success cap of {} reached", cap);
                    break;
                }
            }
        }

        summary.finish();
        tracing::info!(
            "topic run finished: {} new, {} already present, {} attempted",
            summary.succeeded(),
            summary.already_present(),
            summary.attempted()
        );
        Ok(summary)
    }

    /// Page through the search until `attempt_cap` candidates are collected,
    /// `search_cap` entries are scanned, or results run out
    async fn collect(&self, query: &str, policy: &ResolvedPolicy) -> Result<Collected, SourceError> {
        let page_size = self.search.page_size().max(1);
        let mut collected = Collected::default();
        let mut seen = HashSet::new();
        let mut first_page = true;

        while collected.scanned < policy.search_cap
            && collected.candidates.len() < policy.attempt_cap
        {
            let count = page_size.min(policy.search_cap - collected.scanned);
            let request = SearchRequest::new(query, count)
                .sort(policy.freshness.sort)
                .start(collected.scanned);

            let page = match self.search.fetch_page(&request).await {
                Ok(page) => page,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!("{} search stopped at offset {}: {}", self.search.name(), collected.scanned, e);
                    collected.interrupted = Some(e.to_string());
                    break;
                }
            };

            if first_page {
                collected.total = page.total;
                first_page = false;
            }
            if page.returned == 0 {
                break;
            }
            collected.scanned += page.returned;

            for hit in page.hits {
                let Some(identifier) = hit.usable_identifier() else {
                    collected.missing_identifier += 1;
                    continue;
                };
                if !seen.insert(identifier.to_lowercase()) {
                    continue;
                }
                collected.candidates.push(hit);
                if collected.candidates.len() >= policy.attempt_cap {
                    break;
                }
            }

            if collected.scanned >= collected.total {
                break;
            }
        }

        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::{FallbackError, FallbackMode, FallbackStrategy, FallbackSuccess};
    use crate::intent::QuantityMode;
    use crate::models::{DownloadMethod, DownloadStatus, SortKey};
    use async_trait::async_trait;
    use std::path::Path;
    use crate::sources::{make_hit, MockLookup, MockSearchSource};
    use crate::utils::HttpClient;
    use tempfile::tempdir;

    fn request(outdir: &std::path::Path, intent: IntentRequest) -> TopicRequest {
        TopicRequest {
            query: QuerySpec::keywords("crowd evacuation"),
            intent,
            stop_policy: StopPolicy::EarlyStop,
            outdir: outdir.to_path_buf(),
        }
    }

    fn orchestrator(hits: Vec<SearchHit>, lookup: MockLookup) -> BatchOrchestrator {
        let downloader = Downloader::new(Some(Arc::new(lookup)), HttpClient::new().unwrap());
        BatchOrchestrator::new(Arc::new(MockSearchSource::new(hits)), downloader)
            .with_current_year(2026)
    }

    #[test]
    fn test_plan_applies_year_filter() {
        let dir = tempdir().unwrap();
        let orch = orchestrator(vec![], MockLookup::new());
        let intent = IntentRequest {
            latest: true,
            ..Default::default()
        };
        let (policy, query) = orch.plan(&request(dir.path(), intent));
        assert_eq!(policy.freshness.from_year, Some(2023));
        assert_eq!(policy.freshness.sort, SortKey::Date);
        assert_eq!(
            query,
            "(TITLE-ABS-KEY(\"crowd evacuation\")) AND PUBYEAR > 2022"
        );
    }

    #[tokio::test]
    async fn test_candidates_skip_missing_and_duplicates() {
        let dir = tempdir().unwrap();
        let hits = vec![
            make_hit(Some("10.1/a"), "A", 10),
            make_hit(None, "No DOI", 9),
            make_hit(Some("N/A"), "Placeholder DOI", 8),
            make_hit(Some("10.1/A"), "A again", 7),
            make_hit(Some("10.1/b"), "B", 6),
        ];
        let orch = orchestrator(hits, MockLookup::new());
        let intent = IntentRequest {
            target: Some(5),
            ..Default::default()
        };

        let summary = orch.run(&request(dir.path(), intent)).await.unwrap();
        assert_eq!(summary.total_hits(), 5);
        assert_eq!(summary.scanned(), 5);
        assert_eq!(summary.candidate_count(), 2);
        assert_eq!(summary.missing_identifier_count(), 2);
        assert_eq!(summary.attempted(), 2);
        assert!(summary
            .warnings()
            .contains(&RunWarning::InsufficientResults { target: 5, found: 2 }));
        assert_eq!(summary.outcomes()[0].cited_by, Some(10));
    }

    #[tokio::test]
    async fn test_early_stop_counts_existing_files() {
        let dir = tempdir().unwrap();
        for name in ["10.1_0.pdf", "10.1_1.pdf"] {
            std::fs::write(dir.path().join(name), b"%PDF-1.4").unwrap();
        }
        let hits: Vec<SearchHit> = (0..10)
            .map(|i| make_hit(Some(&format!("10.1/{}", i)), "T", 0))
            .collect();
        let orch = orchestrator(hits, MockLookup::new());
        let intent = IntentRequest {
            target: Some(2),
            ..Default::default()
        };

        let summary = orch.run(&request(dir.path(), intent)).await.unwrap();
        assert_eq!(summary.attempted(), 2);
        assert_eq!(summary.succeeded(), 0);
        assert_eq!(summary.already_present(), 2);
        assert!(summary
            .outcomes()
            .iter()
            .all(|o| o.status == DownloadStatus::SkippedExists));
    }

    #[tokio::test]
    async fn test_attempt_target_policy() {
        let dir = tempdir().unwrap();
        let hits: Vec<SearchHit> = (0..10)
            .map(|i| make_hit(Some(&format!("10.2/{}", i)), "T", 0))
            .collect();
        let orch = orchestrator(hits, MockLookup::new());
        let mut req = request(
            dir.path(),
            IntentRequest {
                target: Some(3),
                ..Default::default()
            },
        );
        req.stop_policy = StopPolicy::AttemptTarget;

        let summary = orch.run(&req).await.unwrap();
        assert_eq!(summary.attempted(), 3);
        assert_eq!(summary.succeeded(), 0);
    }

    #[tokio::test]
    async fn test_early_stop_keeps_going_while_failing() {
        let dir = tempdir().unwrap();
        let hits: Vec<SearchHit> = (0..6)
            .map(|i| make_hit(Some(&format!("10.3/{}", i)), "T", 0))
            .collect();
        let orch = orchestrator(hits, MockLookup::new());
        let intent = IntentRequest {
            target: Some(2),
            max_attempts: Some(4),
            ..Default::default()
        };

        let summary = orch.run(&request(dir.path(), intent)).await.unwrap();
        assert_eq!(summary.candidate_count(), 4);
        assert_eq!(summary.attempted(), 4);
        assert!(summary.outcomes().iter().all(|o| o.status == DownloadStatus::NotFound));
    }

    #[tokio::test]
    async fn test_attempt_cap_bounds_search() {
        let dir = tempdir().unwrap();
        let hits: Vec<SearchHit> = (0..200)
            .map(|i| make_hit(Some(&format!("10.4/{}", i)), "T", 0))
            .collect();
        let search = Arc::new(MockSearchSource::new(hits).with_page_size(25));
        let downloader = Downloader::new(Some(Arc::new(MockLookup::new())), HttpClient::new().unwrap());
        let orch = BatchOrchestrator::new(search.clone(), downloader).with_current_year(2026);
        let intent = IntentRequest {
            quantity_mode: Some(QuantityMode::Few),
            ..Default::default()
        };

        let summary = orch.run(&request(dir.path(), intent)).await.unwrap();
        assert_eq!(summary.candidate_count(), 20);
        assert_eq!(search.requests().len(), 1);
        assert_eq!(search.requests()[0].count, 25);
    }

    #[tokio::test]
    async fn test_authentication_error_is_fatal() {
        let dir = tempdir().unwrap();
        let search = MockSearchSource::new(vec![make_hit(Some("10.1/a"), "A", 1)])
            .fail_page(0, SourceError::Authentication("bad key".into()));
        let downloader = Downloader::new(Some(Arc::new(MockLookup::new())), HttpClient::new().unwrap());
        let orch = BatchOrchestrator::new(Arc::new(search), downloader);

        let result = orch.run(&request(dir.path(), IntentRequest::default())).await;
        assert!(matches!(result, Err(SourceError::Authentication(_))));
    }

    #[tokio::test]
    async fn test_network_error_becomes_warning() {
        let dir = tempdir().unwrap();
        let hits: Vec<SearchHit> = (0..40)
            .map(|i| make_hit(Some(&format!("10.5/{}", i)), "T", 0))
            .collect();
        let search = MockSearchSource::new(hits)
            .with_page_size(10)
            .fail_page(1, SourceError::Network("connection reset".into()));
        let downloader = Downloader::new(Some(Arc::new(MockLookup::new())), HttpClient::new().unwrap());
        let orch = BatchOrchestrator::new(Arc::new(search), downloader).with_current_year(2026);

        let summary = orch
            .run(&request(dir.path(), IntentRequest::default()))
            .await
            .unwrap();
        assert_eq!(summary.candidate_count(), 10);
        assert!(summary
            .warnings()
            .iter()
            .any(|w| matches!(w, RunWarning::SearchInterrupted { .. })));
    }

    /// Fallback that always writes a PDF
    #[derive(Debug)]
    struct WritingFallback;

    #[async_trait]
    impl FallbackStrategy for WritingFallback {
        fn describe(&self) -> String {
            "writer".to_string()
        }

        async fn attempt(
            &self,
            _identifier: &str,
            outdir: &Path,
            file_name: &str,
        ) -> Result<FallbackSuccess, FallbackError> {
            let path = outdir.join(file_name);
            std::fs::write(&path, b"%PDF-1.4")?;
            Ok(FallbackSuccess {
                path,
                resolved_url: None,
            })
        }
    }

    #[tokio::test]
    async fn test_success_cap_stops_both_policies() {
        for stop_policy in [StopPolicy::EarlyStop, StopPolicy::AttemptTarget] {
            let dir = tempdir().unwrap();
            let hits: Vec<SearchHit> = (0..10)
                .map(|i| make_hit(Some(&format!("10.7/{}", i)), "T", 0))
                .collect();
            let downloader = Downloader::new(None, HttpClient::new().unwrap())
                .with_fallback(FallbackMode::Force, Arc::new(WritingFallback));
            let orch = BatchOrchestrator::new(Arc::new(MockSearchSource::new(hits)), downloader)
                .with_current_year(2026);
            let mut req = request(
                dir.path(),
                IntentRequest {
                    target: Some(8),
                    max_success: Some(3),
                    ..Default::default()
                },
            );
            req.stop_policy = stop_policy;

            let summary = orch.run(&req).await.unwrap();
            assert_eq!(summary.attempted(), 3, "{}", stop_policy);
            assert_eq!(summary.succeeded(), 3);
            assert!(summary
                .outcomes()
                .iter()
                .all(|o| o.method == DownloadMethod::Fallback));
            assert_eq!(summary.params().unwrap().success_cap, Some(3));
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempdir().unwrap();
        let hits: Vec<SearchHit> = (0..5)
            .map(|i| make_hit(Some(&format!("10.6/{}", i)), "T", 0))
            .collect();
        let cancel = CancellationFlag::new();
        let orch = orchestrator(hits, MockLookup::new()).with_cancellation(cancel.clone());
        cancel.cancel();

        let summary = orch
            .run(&request(dir.path(), IntentRequest::default()))
            .await
            .unwrap();
        assert_eq!(summary.attempted(), 0);
        assert!(summary.is_cancelled());
        assert!(summary.is_finished());
    }
}
