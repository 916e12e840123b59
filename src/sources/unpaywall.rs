//! Unpaywall open-access lookup.
//!
//! Uses the Unpaywall API for checking open access status of papers.
//! API documentation: <https://unpaywall.org/products/api>

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::Config;
use crate::sources::{OaRecord, OpenAccessLookup, SourceError};
use crate::utils::HttpClient;

/// Unpaywall lookup
///
/// The API is free but requires a contact email on every request.
#[derive(Debug, Clone)]
pub struct UnpaywallSource {
    client: HttpClient,
    email: String,
    base_url: String,
}

impl UnpaywallSource {
    /// Create an Unpaywall lookup from configuration
    ///
    /// Fails with [`SourceError::Authentication`] when no contact email is configured.
    pub fn new(config: &Config, client: HttpClient) -> Result<Self, SourceError> {
        let email = config
            .credentials
            .unpaywall_email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .ok_or_else(|| {
                SourceError::Authentication(
                    "missing Unpaywall email; set UNPAYWALL_EMAIL or pass --email".to_string(),
                )
            })?
            .to_string();

        Ok(Self {
            client,
            email,
            base_url: config.unpaywall.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn lookup_url(&self, doi: &str) -> String {
        format!(
            "{}/{}?email={}",
            self.base_url,
            urlencoding::encode(doi),
            urlencoding::encode(&self.email)
        )
    }
}

#[async_trait]
impl OpenAccessLookup for UnpaywallSource {
    fn name(&self) -> &str {
        "Unpaywall"
    }

    async fn lookup(&self, doi: &str) -> Result<OaRecord, SourceError> {
        let response = self
            .client
            .get(&self.lookup_url(doi))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| SourceError::Network(format!("Failed to lookup DOI in Unpaywall: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(format!(
                "DOI not known to Unpaywall: {}",
                doi
            )));
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let text: String = text.trim().chars().take(300).collect();
            return Err(SourceError::Network(format!(
                "Unpaywall API returned status {}: {}",
                status, text
            )));
        }

        let body: UnpaywallResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("Failed to parse Unpaywall response: {}", e)))?;

        Ok(body.into_record(doi))
    }
}

/// Unpaywall API response
#[derive(Debug, Deserialize)]
struct UnpaywallResponse {
    title: Option<String>,
    #[serde(default)]
    is_oa: bool,
    best_oa_location: Option<UnpaywallLocation>,
    #[serde(default)]
    oa_locations: Vec<UnpaywallLocation>,
}

#[derive(Debug, Deserialize)]
struct UnpaywallLocation {
    url_for_pdf: Option<String>,
    url: Option<String>,
}

impl UnpaywallResponse {
    fn into_record(self, doi: &str) -> OaRecord {
        let mut candidate_urls: Vec<String> = Vec::new();
        let locations = self.best_oa_location.iter().chain(self.oa_locations.iter());
        for location in locations {
            for url in [&location.url_for_pdf, &location.url].into_iter().flatten() {
                let url = url.trim();
                if !url.is_empty() && !candidate_urls.iter().any(|u| u == url) {
                    candidate_urls.push(url.to_string());
                }
            }
        }

        OaRecord {
            doi: doi.to_string(),
            title: self.title.filter(|t| !t.trim().is_empty()),
            is_oa: self.is_oa,
            candidate_urls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn config_for(base_url: &str) -> Config {
        let mut config = Config::default();
        config.credentials.unpaywall_email = Some("me@example.org".to_string());
        config.unpaywall.base_url = base_url.to_string();
        config
    }

    #[test]
    fn test_missing_email_is_authentication_error() {
        let result = UnpaywallSource::new(&Config::default(), HttpClient::new().unwrap());
        assert!(matches!(result, Err(SourceError::Authentication(_))));
    }

    #[test]
    fn test_lookup_url_encodes_doi() {
        let source =
            UnpaywallSource::new(&config_for("https://api.test/v2/"), HttpClient::new().unwrap())
                .unwrap();
        assert_eq!(
            source.lookup_url("10.1016/j.ssci.2023.1"),
            "https://api.test/v2/10.1016%2Fj.ssci.2023.1?email=me%40example.org"
        );
    }

    #[test]
    fn test_candidate_urls_ordered_and_unique() {
        let raw = serde_json::json!({
            "title": "Crowd evacuation",
            "is_oa": true,
            "best_oa_location": {
                "url_for_pdf": "https://repo.example/a.pdf",
                "url": "https://repo.example/a"
            },
            "oa_locations": [
                { "url_for_pdf": "https://repo.example/a.pdf", "url": "https://repo.example/a" },
                { "url_for_pdf": null, "url": "https://mirror.example/landing" },
                { "url_for_pdf": "  ", "url": null }
            ]
        });
        let response: UnpaywallResponse = serde_json::from_value(raw).unwrap();
        let record = response.into_record("10.1/x");

        assert!(record.is_oa);
        assert_eq!(record.title.as_deref(), Some("Crowd evacuation"));
        assert_eq!(
            record.candidate_urls,
            vec![
                "https://repo.example/a.pdf",
                "https://repo.example/a",
                "https://mirror.example/landing",
            ]
        );
    }

    #[test]
    fn test_closed_access_record() {
        let raw = serde_json::json!({ "title": "Paywalled", "is_oa": false, "best_oa_location": null });
        let response: UnpaywallResponse = serde_json::from_value(raw).unwrap();
        let record = response.into_record("10.1/y");
        assert!(!record.is_oa);
        assert!(record.candidate_urls.is_empty());
    }

    #[tokio::test]
    async fn test_lookup_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Regex(r"^/10\.1%2Fmissing".to_string()))
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"error": true}"#)
            .create_async()
            .await;

        let source =
            UnpaywallSource::new(&config_for(&server.url()), HttpClient::new().unwrap()).unwrap();
        let result = source.lookup("10.1/missing").await;
        assert!(matches!(result, Err(SourceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_lookup_success() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Regex(r"^/10\.1%2Fok".to_string()))
            .match_query(Matcher::UrlEncoded("email".into(), "me@example.org".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"title":"Open","is_oa":true,"best_oa_location":{"url_for_pdf":"https://x.example/p.pdf","url":null},"oa_locations":[]}"#,
            )
            .create_async()
            .await;

        let source =
            UnpaywallSource::new(&config_for(&server.url()), HttpClient::new().unwrap()).unwrap();
        let record = source.lookup("10.1/ok").await.unwrap();
        assert_eq!(record.candidate_urls, vec!["https://x.example/p.pdf"]);
    }
}
