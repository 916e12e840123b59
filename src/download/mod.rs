//! Open-access resolver and downloader.
//!
//! For each identifier the downloader:
//!
//! 1. skips it when the target file already exists;
//! 2. asks the open-access lookup for candidate URLs and tries them in order,
//!    following an HTML landing page to its PDF link once;
//! 3. depending on [`FallbackMode`], runs the external fallback.
//!
//! Downloads are streamed to `<name>.pdf.part` and renamed on completion,
//! so an interrupted transfer never leaves a file that a rerun would skip.

use scraper::{Html, Selector};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use crate::config::Config;
use crate::fallback::{resolve_fallback, EnvPath, FallbackError, FallbackMode, FallbackStrategy};
use crate::models::{DownloadMethod, DownloadOutcome, FallbackReport, RunSummary, RunWarning};
use crate::orchestrator::CancellationFlag;
use crate::sources::{OpenAccessLookup, SourceError, UnpaywallSource};
use crate::utils::{clean_identifier, normalize_doi, pdf_file_name, HttpClient};

/// Largest landing page read while looking for a PDF link
const MAX_HTML_BYTES: usize = 5 * 1024 * 1024;

const ACCEPT_PDF: &str = "application/pdf, text/html;q=0.9, */*;q=0.8";

/// Why the open-access path did not produce a file
#[derive(Debug)]
enum Miss {
    /// No open-access copy is known
    NotFound(String),
    /// A copy is known or the lookup failed, but nothing was written
    Failed(String),
}

impl Miss {
    fn detail(&self) -> &str {
        match self {
            Miss::NotFound(detail) | Miss::Failed(detail) => detail,
        }
    }
}

/// Result of the open-access path
#[derive(Debug, Default)]
struct Primary {
    title: Option<String>,
    resolved_url: Option<String>,
}

/// Downloads full text for identifiers
#[derive(Debug, Clone)]
pub struct Downloader {
    lookup: Option<Arc<dyn OpenAccessLookup>>,
    client: HttpClient,
    mode: FallbackMode,
    fallback: Option<Arc<dyn FallbackStrategy>>,
    setup_error: Option<String>,
}

impl Downloader {
    /// Create a downloader without fallback
    pub fn new(lookup: Option<Arc<dyn OpenAccessLookup>>, client: HttpClient) -> Self {
        Self {
            lookup,
            client,
            mode: FallbackMode::Off,
            fallback: None,
            setup_error: None,
        }
    }

    /// Build the production downloader from configuration
    ///
    /// The Unpaywall email is required unless the fallback mode is `force`.
    /// A fallback command that cannot be resolved is not an error; it is
    /// reported through [`Downloader::fallback_report`].
    pub fn from_config(
        config: &Config,
        client: HttpClient,
        override_cmd: Option<&str>,
    ) -> Result<Self, SourceError> {
        let mode = config.fallback.mode;
        let lookup: Option<Arc<dyn OpenAccessLookup>> = match mode {
            FallbackMode::Force => None,
            _ => Some(Arc::new(UnpaywallSource::new(config, client.clone())?)),
        };

        let downloader = Self::new(lookup, client);
        if !mode.is_enabled() {
            return Ok(downloader);
        }

        Ok(
            match resolve_fallback(override_cmd, &EnvPath, &config.fallback) {
                Ok(command) => {
                    let command =
                        command.with_default_email(config.credentials.unpaywall_email.clone());
                    tracing::info!("fallback command: {}", command.describe());
                    downloader.with_fallback(mode, Arc::new(command))
                }
                Err(FallbackError::Unavailable(detail)) => {
                    downloader.with_unavailable_fallback(mode, detail)
                }
                Err(e) => downloader.with_unavailable_fallback(mode, e.to_string()),
            },
        )
    }

    /// Use `fallback` in `mode`
    pub fn with_fallback(mut self, mode: FallbackMode, fallback: Arc<dyn FallbackStrategy>) -> Self {
        self.mode = mode;
        self.fallback = Some(fallback);
        self.setup_error = None;
        self
    }

    /// Record that `mode` was requested but no command could be resolved
    pub fn with_unavailable_fallback(mut self, mode: FallbackMode, detail: impl Into<String>) -> Self {
        self.mode = mode;
        self.fallback = None;
        self.setup_error = Some(detail.into());
        self
    }

    pub fn fallback_mode(&self) -> FallbackMode {
        self.mode
    }

    /// How the fallback is configured, for summaries
    pub fn fallback_report(&self) -> FallbackReport {
        FallbackReport {
            mode: self.mode,
            command: self.fallback.as_ref().map(|f| f.describe()),
            setup_error: self.setup_error.clone(),
        }
    }

    /// Add a warning to `summary` when the fallback was requested but is unavailable
    pub fn note_fallback(&self, summary: &mut RunSummary) {
        if self.mode.is_enabled() {
            if let Some(detail) = &self.setup_error {
                summary.warn(RunWarning::FallbackUnavailable {
                    detail: detail.clone(),
                });
            }
        }
    }

    /// Download one identifier into `outdir`
    ///
    /// Never fails: every problem is reported in the returned outcome.
    pub async fn download(&self, identifier: &str, outdir: &Path) -> DownloadOutcome {
        let identifier = clean_identifier(identifier);
        let file_name = pdf_file_name(&identifier);
        let target = outdir.join(&file_name);

        if target.exists() {
            tracing::info!("{} already present at {}", identifier, target.display());
            return DownloadOutcome::skipped_exists(identifier, target);
        }

        if let Err(e) = tokio::fs::create_dir_all(outdir).await {
            return DownloadOutcome::failed(
                identifier,
                DownloadMethod::None,
                format!("cannot create {}: {}", outdir.display(), e),
            );
        }

        let outcome = if self.mode == FallbackMode::Force {
            self.fallback_only(&identifier, outdir, &file_name).await
        } else {
            let mut primary = Primary::default();
            let result = self.open_access(&identifier, &target, &mut primary).await;
            match result {
                Ok(()) => DownloadOutcome::succeeded(&identifier, DownloadMethod::Direct, target)
                    .title(primary.title)
                    .resolved_url(primary.resolved_url),
                Err(miss) => {
                    self.after_miss(&identifier, outdir, &file_name, primary, miss)
                        .await
                }
            }
        };

        match &outcome.error {
            None => tracing::info!("{}: {}", identifier, outcome.status.as_str()),
            Some(error) => tracing::info!("{}: {} ({})", identifier, outcome.status.as_str(), error),
        }
        outcome
    }

    /// Download identifiers sequentially
    ///
    /// Individual failures never abort the batch; the cancellation flag is
    /// checked before each identifier.
    pub async fn download_batch(
        &self,
        identifiers: &[String],
        outdir: &Path,
        cancel: &CancellationFlag,
    ) -> RunSummary {
        let mut summary = RunSummary::new(None, self.fallback_report());
        summary.set_search_stats(0, 0, identifiers.len(), 0);
        self.note_fallback(&mut summary);

        for (index, identifier) in identifiers.iter().enumerate() {
            if cancel.is_cancelled() {
                summary.mark_cancelled(identifiers.len() - index);
                break;
            }
            tracing::debug!("[{}/{}] {}", index + 1, identifiers.len(), identifier);
            summary.record(self.download(identifier, outdir).await);
        }

        summary.finish();
        summary
    }

    async fn fallback_only(&self, identifier: &str, outdir: &Path, file_name: &str) -> DownloadOutcome {
        let Some(fallback) = &self.fallback else {
            let detail = self
                .setup_error
                .clone()
                .unwrap_or_else(|| "no fallback command".to_string());
            return DownloadOutcome::failed(identifier, DownloadMethod::None, detail.clone())
                .fallback(false, Some(detail));
        };

        match fallback.attempt(identifier, outdir, file_name).await {
            Ok(success) => {
                DownloadOutcome::succeeded(identifier, DownloadMethod::Fallback, success.path)
                    .resolved_url(success.resolved_url)
                    .fallback(true, None)
            }
            Err(e) => {
                let detail = e.to_string();
                DownloadOutcome::failed(identifier, DownloadMethod::Fallback, detail.clone())
                    .fallback(true, Some(detail))
            }
        }
    }

    async fn after_miss(
        &self,
        identifier: &str,
        outdir: &Path,
        file_name: &str,
        primary: Primary,
        miss: Miss,
    ) -> DownloadOutcome {
        let primary_error = Some(miss.detail().to_string());

        if self.mode == FallbackMode::Auto {
            if let Some(fallback) = &self.fallback {
                tracing::debug!("{}: open access failed ({}), trying fallback", identifier, miss.detail());
                return match fallback.attempt(identifier, outdir, file_name).await {
                    Ok(success) => {
                        DownloadOutcome::succeeded(identifier, DownloadMethod::Fallback, success.path)
                            .title(primary.title)
                            .resolved_url(success.resolved_url.or(primary.resolved_url))
                            .primary_error(primary_error)
                            .fallback(true, None)
                    }
                    Err(e) => {
                        let detail = e.to_string();
                        DownloadOutcome::failed(identifier, DownloadMethod::Fallback, detail.clone())
                            .title(primary.title)
                            .resolved_url(primary.resolved_url)
                            .primary_error(primary_error)
                            .fallback(true, Some(detail))
                    }
                };
            }
        }

        let outcome = match miss {
            Miss::NotFound(detail) => DownloadOutcome::not_found(identifier, detail),
            Miss::Failed(detail) => DownloadOutcome::failed(identifier, DownloadMethod::None, detail),
        };
        let fallback_error = match self.mode {
            FallbackMode::Auto => self.setup_error.clone(),
            _ => None,
        };
        outcome
            .title(primary.title)
            .resolved_url(primary.resolved_url)
            .primary_error(primary_error)
            .fallback(false, fallback_error)
    }

    /// Try every open-access candidate URL in order
    async fn open_access(
        &self,
        identifier: &str,
        target: &Path,
        primary: &mut Primary,
    ) -> Result<(), Miss> {
        let doi = normalize_doi(identifier).map_err(|e| Miss::NotFound(e.to_string()))?;
        let lookup = self
            .lookup
            .as_ref()
            .ok_or_else(|| Miss::Failed("no open-access lookup configured".to_string()))?;

        let record = match lookup.lookup(&doi).await {
            Ok(record) => record,
            Err(SourceError::NotFound(detail)) => return Err(Miss::NotFound(detail)),
            Err(e) => return Err(Miss::Failed(e.to_string())),
        };

        primary.title = record.title.clone();
        if !record.is_oa {
            return Err(Miss::NotFound("no open-access copy".to_string()));
        }
        if record.candidate_urls.is_empty() {
            return Err(Miss::NotFound("open access but no download URL".to_string()));
        }

        let mut last_error = String::new();
        for url in &record.candidate_urls {
            match self.fetch_candidate(url, target).await {
                Ok(resolved) => {
                    primary.resolved_url = Some(resolved);
                    return Ok(());
                }
                Err((resolved, error)) => {
                    tracing::debug!("{}: candidate {} failed: {}", identifier, url, error);
                    primary.resolved_url = Some(resolved);
                    last_error = error;
                }
            }
        }

        Err(Miss::Failed(last_error))
    }

    /// Fetch one candidate URL, following an HTML landing page once
    ///
    /// Returns the final URL on success, or the last URL reached and the reason.
    async fn fetch_candidate(&self, url: &str, target: &Path) -> Result<String, (String, String)> {
        let mut response = self
            .request(url)
            .await
            .map_err(|e| (url.to_string(), e))?;
        let final_url = response.url().to_string();
        let content_type = header_content_type(&response);

        let head = response
            .chunk()
            .await
            .map_err(|e| (final_url.clone(), format!("read error: {}", e)))?
            .unwrap_or_default();

        if is_pdf(&head, &content_type) {
            write_streamed(target, &head, response)
                .await
                .map_err(|e| (final_url.clone(), e))?;
            return Ok(final_url);
        }

        if !content_type.contains("html") {
            return Err((
                final_url,
                format!("non-PDF content type: {}", display_type(&content_type)),
            ));
        }

        let mut html = head.to_vec();
        while html.len() < MAX_HTML_BYTES {
            match response.chunk().await {
                Ok(Some(chunk)) => html.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(e) => return Err((final_url, format!("read error: {}", e))),
            }
        }

        let link = find_pdf_link(&String::from_utf8_lossy(&html), &final_url)
            .ok_or_else(|| (final_url.clone(), "HTML page without PDF link".to_string()))?;

        tracing::debug!("following landing page link {}", link);
        let mut response = self
            .request(&link)
            .await
            .map_err(|e| (link.clone(), format!("follow-up {}", e)))?;
        let followed_url = response.url().to_string();
        let content_type = header_content_type(&response);
        let head = response
            .chunk()
            .await
            .map_err(|e| (followed_url.clone(), format!("read error: {}", e)))?
            .unwrap_or_default();

        if !is_pdf(&head, &content_type) {
            return Err((
                followed_url,
                format!(
                    "follow-up non-PDF content type: {}",
                    display_type(&content_type)
                ),
            ));
        }

        write_streamed(target, &head, response)
            .await
            .map_err(|e| (followed_url.clone(), e))?;
        Ok(followed_url)
    }

    async fn request(&self, url: &str) -> Result<reqwest::Response, String> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, ACCEPT_PDF)
            .send()
            .await
            .map_err(|e| format!("request error: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }
        Ok(response)
    }
}

fn header_content_type(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase()
}

fn display_type(content_type: &str) -> &str {
    if content_type.is_empty() {
        "unknown"
    } else {
        content_type
    }
}

/// PDF magic bytes or a PDF content type
pub fn is_pdf(head: &[u8], content_type: &str) -> bool {
    head.starts_with(b"%PDF") || content_type.to_ascii_lowercase().contains("pdf")
}

/// Find a PDF link on a landing page, resolved against `base_url`
///
/// `<meta name="citation_pdf_url">` wins over the first link ending in `.pdf`.
pub fn find_pdf_link(html: &str, base_url: &str) -> Option<String> {
    let document = Html::parse_document(html);

    let meta = Selector::parse(r#"meta[name="citation_pdf_url"]"#).ok()?;
    let from_meta = document
        .select(&meta)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty());

    let link = from_meta.or_else(|| {
        let anchors = Selector::parse("a[href]").ok()?;
        document
            .select(&anchors)
            .filter_map(|el| el.value().attr("href"))
            .map(str::trim)
            .find(|href| {
                let path = href.split(['?', '#']).next().unwrap_or("");
                path.to_ascii_lowercase().ends_with(".pdf")
            })
    })?;

    let base = url::Url::parse(base_url).ok()?;
    base.join(link).ok().map(|u| u.to_string())
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Stream `head` and the rest of `response` to `target` via a `.part` file
async fn write_streamed(
    target: &Path,
    head: &[u8],
    mut response: reqwest::Response,
) -> Result<(), String> {
    let partial = partial_path(target);
    // leftover from an interrupted run
    let _ = tokio::fs::remove_file(&partial).await;

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&partial)
        .await
        .map_err(|e| format!("cannot create {}: {}", partial.display(), e))?;

    let mut written = head.len();
    let mut result = file.write_all(head).await.map_err(|e| e.to_string());
    while result.is_ok() {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                written += chunk.len();
                result = file.write_all(&chunk).await.map_err(|e| e.to_string());
            }
            Ok(None) => break,
            Err(e) => result = Err(format!("read error: {}", e)),
        }
    }
    if result.is_ok() {
        result = file.flush().await.map_err(|e| e.to_string());
    }
    drop(file);

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e);
    }

    if target.exists() {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(format!("{} appeared during download", target.display()));
    }

    tokio::fs::rename(&partial, target)
        .await
        .map_err(|e| format!("cannot rename {}: {}", partial.display(), e))?;

    tracing::debug!("wrote {} bytes to {}", written, target.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::FallbackSuccess;
    use crate::models::DownloadStatus;
    use crate::sources::MockLookup;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Fallback that writes a fixed PDF, or fails when `fail` is set
    #[derive(Debug, Default)]
    struct StubFallback {
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FallbackStrategy for StubFallback {
        fn describe(&self) -> String {
            "stub-fetch".to_string()
        }

        async fn attempt(
            &self,
            _identifier: &str,
            outdir: &Path,
            file_name: &str,
        ) -> Result<FallbackSuccess, FallbackError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(FallbackError::Execution("exit 1: mirror offline".to_string()));
            }
            let path = outdir.join(file_name);
            std::fs::write(&path, b"%PDF-1.4 stub")?;
            Ok(FallbackSuccess {
                path,
                resolved_url: None,
            })
        }
    }

    fn downloader(lookup: MockLookup) -> Downloader {
        Downloader::new(Some(Arc::new(lookup)), HttpClient::new().unwrap())
    }

    #[test]
    fn test_is_pdf() {
        assert!(is_pdf(b"%PDF-1.7", "application/octet-stream"));
        assert!(is_pdf(b"<html>", "application/pdf"));
        assert!(!is_pdf(b"<html>", "text/html; charset=utf-8"));
    }

    #[test]
    fn test_find_pdf_link_prefers_meta() {
        let html = r#"<html><head>
            <meta name="citation_pdf_url" content="/content/paper.pdf">
            </head><body><a href="other.pdf">PDF</a></body></html>"#;
        assert_eq!(
            find_pdf_link(html, "https://journal.example/article/1").as_deref(),
            Some("https://journal.example/content/paper.pdf")
        );
    }

    #[test]
    fn test_find_pdf_link_anchor() {
        let html = r#"<a href="/about">About</a><a href="files/full.PDF?download=1">Full text</a>"#;
        assert_eq!(
            find_pdf_link(html, "https://repo.example/record/9/").as_deref(),
            Some("https://repo.example/record/9/files/full.PDF?download=1")
        );
        assert_eq!(find_pdf_link("<p>nothing</p>", "https://repo.example/"), None);
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/tmp/10.1_x.pdf")),
            PathBuf::from("/tmp/10.1_x.pdf.part")
        );
    }

    #[tokio::test]
    async fn test_existing_file_is_skipped_without_lookup() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("10.1_a.pdf"), b"%PDF-1.4 old").unwrap();
        let lookup = Arc::new(MockLookup::new().with_record("10.1/a", &["https://x.example/a.pdf"]));
        let downloader = Downloader::new(Some(lookup.clone()), HttpClient::new().unwrap());

        let outcome = downloader.download("10.1/a", dir.path()).await;
        assert_eq!(outcome.status, DownloadStatus::SkippedExists);
        assert!(lookup.lookups().is_empty());
        assert_eq!(std::fs::read(dir.path().join("10.1_a.pdf")).unwrap(), b"%PDF-1.4 old");
    }

    #[tokio::test]
    async fn test_direct_pdf_download() {
        let mut server = mockito::Server::new_async().await;
        let _pdf = server
            .mock("GET", "/files/a.pdf")
            .with_status(200)
            .with_header("content-type", "application/octet-stream")
            .with_body("%PDF-1.5 body")
            .create_async()
            .await;

        let url = format!("{}/files/a.pdf", server.url());
        let dir = tempdir().unwrap();
        let downloader = downloader(MockLookup::new().with_record("10.1/a", &[url.as_str()]));

        let outcome = downloader.download("10.1/a", dir.path()).await;
        assert_eq!(outcome.status, DownloadStatus::Succeeded);
        assert_eq!(outcome.method, DownloadMethod::Direct);
        assert_eq!(outcome.resolved_url.as_deref(), Some(url.as_str()));
        let path = outcome.path.unwrap();
        assert_eq!(path, dir.path().join("10.1_a.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.5 body");
        assert!(!dir.path().join("10.1_a.pdf.part").exists());
    }

    #[tokio::test]
    async fn test_landing_page_is_followed() {
        let mut server = mockito::Server::new_async().await;
        let _landing = server
            .mock("GET", "/article/7")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(r#"<meta name="citation_pdf_url" content="/article/7/full.pdf">"#)
            .create_async()
            .await;
        let _pdf = server
            .mock("GET", "/article/7/full.pdf")
            .with_status(200)
            .with_header("content-type", "application/pdf")
            .with_body("%PDF-1.6")
            .create_async()
            .await;

        let landing = format!("{}/article/7", server.url());
        let dir = tempdir().unwrap();
        let downloader = downloader(MockLookup::new().with_record("10.1/b", &[landing.as_str()]));

        let outcome = downloader.download("10.1/b", dir.path()).await;
        assert_eq!(outcome.status, DownloadStatus::Succeeded);
        assert!(outcome
            .resolved_url
            .as_deref()
            .is_some_and(|u| u.ends_with("/article/7/full.pdf")));
    }

    #[tokio::test]
    async fn test_all_candidates_fail() {
        let mut server = mockito::Server::new_async().await;
        let _gone = server
            .mock("GET", "/gone.pdf")
            .with_status(410)
            .create_async()
            .await;
        let _zip = server
            .mock("GET", "/data.zip")
            .with_status(200)
            .with_header("content-type", "application/zip")
            .with_body("PK")
            .create_async()
            .await;

        let urls = [
            format!("{}/gone.pdf", server.url()),
            format!("{}/data.zip", server.url()),
        ];
        let dir = tempdir().unwrap();
        let downloader = downloader(
            MockLookup::new().with_record("10.1/c", &[urls[0].as_str(), urls[1].as_str()]),
        );

        let outcome = downloader.download("10.1/c", dir.path()).await;
        assert_eq!(outcome.status, DownloadStatus::Failed);
        assert_eq!(outcome.method, DownloadMethod::None);
        assert!(outcome
            .error
            .as_deref()
            .is_some_and(|e| e.contains("application/zip")));
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_not_found_without_fallback() {
        let dir = tempdir().unwrap();
        let outcome = downloader(MockLookup::new())
            .download("10.1/missing", dir.path())
            .await;
        assert_eq!(outcome.status, DownloadStatus::NotFound);
        assert_eq!(outcome.method, DownloadMethod::None);
        assert!(!outcome.fallback_attempted);
    }

    #[tokio::test]
    async fn test_closed_access_uses_fallback_in_auto_mode() {
        let dir = tempdir().unwrap();
        let stub = Arc::new(StubFallback::default());
        let downloader = downloader(MockLookup::new().with_record("10.1/d", &[]))
            .with_fallback(FallbackMode::Auto, stub.clone());

        let outcome = downloader.download("10.1/d", dir.path()).await;
        assert_eq!(outcome.status, DownloadStatus::Succeeded);
        assert_eq!(outcome.method, DownloadMethod::Fallback);
        assert!(outcome.fallback_attempted);
        assert_eq!(outcome.primary_error.as_deref(), Some("no open-access copy"));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_failure_is_recorded() {
        let dir = tempdir().unwrap();
        let stub = Arc::new(StubFallback {
            fail: true,
            ..Default::default()
        });
        let downloader = downloader(MockLookup::new()).with_fallback(FallbackMode::Auto, stub);

        let outcome = downloader.download("10.1/e", dir.path()).await;
        assert_eq!(outcome.status, DownloadStatus::Failed);
        assert_eq!(outcome.method, DownloadMethod::Fallback);
        assert!(outcome
            .fallback_error
            .as_deref()
            .is_some_and(|e| e.contains("mirror offline")));
    }

    #[tokio::test]
    async fn test_force_mode_skips_lookup() {
        let dir = tempdir().unwrap();
        let lookup = Arc::new(MockLookup::new());
        let stub = Arc::new(StubFallback::default());
        let downloader = Downloader::new(Some(lookup.clone()), HttpClient::new().unwrap())
            .with_fallback(FallbackMode::Force, stub);

        let outcome = downloader.download("10.1/f", dir.path()).await;
        assert_eq!(outcome.method, DownloadMethod::Fallback);
        assert!(lookup.lookups().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_fallback_is_reported() {
        let dir = tempdir().unwrap();
        let downloader = downloader(MockLookup::new())
            .with_unavailable_fallback(FallbackMode::Auto, "fetch-fulltext not found on PATH");

        let outcome = downloader.download("10.1/g", dir.path()).await;
        assert_eq!(outcome.status, DownloadStatus::NotFound);
        assert!(!outcome.fallback_attempted);
        assert_eq!(
            outcome.fallback_error.as_deref(),
            Some("fetch-fulltext not found on PATH")
        );

        let summary = downloader
            .download_batch(&["10.1/g".to_string()], dir.path(), &CancellationFlag::new())
            .await;
        assert!(matches!(
            summary.warnings()[0],
            RunWarning::FallbackUnavailable { .. }
        ));
    }

    #[tokio::test]
    async fn test_batch_never_aborts_and_honors_cancellation() {
        let dir = tempdir().unwrap();
        let ids: Vec<String> = ["10.1/h", "10.1/i", "10.1/j"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let summary = downloader(MockLookup::new())
            .download_batch(&ids, dir.path(), &CancellationFlag::new())
            .await;
        assert_eq!(summary.outcomes().len(), 3);
        assert_eq!(summary.succeeded(), 0);
        assert!(summary.is_finished());

        let cancel = CancellationFlag::new();
        cancel.cancel();
        let summary = downloader(MockLookup::new())
            .download_batch(&ids, dir.path(), &cancel)
            .await;
        assert_eq!(summary.attempted(), 0);
        assert!(summary.is_cancelled());
    }
}
