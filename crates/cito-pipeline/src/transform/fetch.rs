//! HTTP fetch of the decision page, with bot-challenge detection.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use cito_types::{CaseDocument, CitoError, Result};

use super::{StageOutput, Transformer};
use crate::config::FetchConfig;
use crate::stage::{Capability, StageSpec};
use crate::store::FieldChange;

/// Largest challenge page kept on the document.
pub const CHALLENGE_HTML_LIMIT: usize = 32 * 1024;

/// Lowercase markers of WAF / bot-check interstitials.
const CHALLENGE_MARKERS: &[&str] = &[
    "awswafintegration",
    "awswaf",
    "token.awswaf",
    "challenge-container",
    "challenge.js",
    "window.gokuprops",
    "javascript is disabled",
    "verify that you're not a robot",
];

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub html: String,
    pub latency_ms: u64,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url`. Transport failures are errors; any HTTP status is a response.
    async fn fetch(&self, url: &str) -> Result<FetchResponse>;
}

// ---------------------------------------------------------------------------
// HttpFetcher
// ---------------------------------------------------------------------------

pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            reqwest::header::HeaderValue::from_static("pt-BR,pt;q=0.9,en;q=0.5"),
        );
        let timeout = Duration::from_secs(config.timeout_seconds);
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| CitoError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    fn transport_error(&self, url: &str, e: reqwest::Error) -> CitoError {
        if e.is_timeout() {
            CitoError::RequestTimeout {
                provider: "fetch".into(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            CitoError::FetchFailed {
                url: url.to_string(),
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse> {
        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(url, e))?;
        let status = response.status().as_u16();
        let html = response
            .text()
            .await
            .map_err(|e| self.transport_error(url, e))?;
        let latency_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(url, status, latency_ms, chars = html.len(), "Fetched page");
        Ok(FetchResponse {
            status,
            html,
            latency_ms,
        })
    }
}

// ---------------------------------------------------------------------------
// Challenge detection
// ---------------------------------------------------------------------------

pub fn is_challenge(html: &str) -> bool {
    let lower = html.to_lowercase();
    CHALLENGE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Cut `html` to at most `limit` bytes on a char boundary.
pub fn truncate_html(html: &str, limit: usize) -> String {
    if html.len() <= limit {
        return html.to_string();
    }
    let mut end = limit;
    while !html.is_char_boundary(end) {
        end -= 1;
    }
    html[..end].to_string()
}

// ---------------------------------------------------------------------------
// FetchTransformer
// ---------------------------------------------------------------------------

pub struct FetchTransformer {
    fetcher: Box<dyn Fetcher>,
}

impl FetchTransformer {
    pub fn new(fetcher: impl Fetcher + 'static) -> Self {
        Self {
            fetcher: Box::new(fetcher),
        }
    }
}

#[async_trait]
impl Transformer for FetchTransformer {
    fn capability(&self) -> Capability {
        Capability::Fetch
    }

    async fn transform(
        &self,
        _spec: &StageSpec,
        _doc: &CaseDocument,
        url: &str,
    ) -> Result<StageOutput> {
        let url = url.trim();
        let response = self.fetcher.fetch(url).await?;
        if is_challenge(&response.html) {
            return Err(CitoError::Challenge {
                url: url.to_string(),
                status: response.status,
                html: truncate_html(&response.html, CHALLENGE_HTML_LIMIT),
            });
        }
        if response.status >= 400 {
            return Err(CitoError::FetchFailed {
                url: url.to_string(),
                status: Some(response.status),
                message: format!("HTTP {}", response.status),
            });
        }
        if response.html.trim().is_empty() {
            return Err(CitoError::SchemaError(format!(
                "empty HTML body (HTTP {})",
                response.status
            )));
        }
        let chars = response.html.chars().count();
        let mut output = StageOutput::fields(
            vec![
                FieldChange::HtmlRaw(response.html),
                FieldChange::ChallengeHtml(None),
            ],
            None,
        )
        .with_output_chars(chars);
        output.http_status = Some(response.status);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use cito_types::{Identity, Stage};

    struct Canned(u16, &'static str);

    #[async_trait]
    impl Fetcher for Canned {
        async fn fetch(&self, _url: &str) -> Result<FetchResponse> {
            Ok(FetchResponse {
                status: self.0,
                html: self.1.to_string(),
                latency_ms: 12,
            })
        }
    }

    async fn run(fetcher: Canned) -> Result<StageOutput> {
        let spec = StageSpec::from_config(Stage::Scrape, &PipelineConfig::default()).unwrap();
        let doc = CaseDocument::discovered(Identity::new("1"));
        FetchTransformer::new(fetcher)
            .transform(&spec, &doc, " https://portal.stf.jus.br/x ")
            .await
    }

    // 1. Normal page becomes htmlRaw and clears a previous challenge
    #[tokio::test]
    async fn page_is_stored() {
        let out = run(Canned(200, "<html><body>ADI 4277</body></html>")).await.unwrap();
        assert_eq!(out.http_status, Some(200));
        match out.produced {
            super::super::Produced::Fields { changes, .. } => {
                assert!(matches!(&changes[0], FieldChange::HtmlRaw(h) if h.contains("ADI 4277")));
                assert_eq!(changes[1], FieldChange::ChallengeHtml(None));
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    // 2. Challenge pages are a distinct, non-retryable error
    #[tokio::test]
    async fn challenge_detected() {
        let err = run(Canned(202, "<script src=\"https://x.token.awswaf.com/challenge.js\"></script>"))
            .await
            .unwrap_err();
        match &err {
            CitoError::Challenge { status, url, .. } => {
                assert_eq!(*status, 202);
                assert_eq!(url, "https://portal.stf.jus.br/x");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.is_retryable());
    }

    // 3. HTTP errors: 5xx retryable, 404 not
    #[tokio::test]
    async fn http_errors() {
        assert!(run(Canned(503, "busy")).await.unwrap_err().is_retryable());
        assert!(!run(Canned(404, "nope")).await.unwrap_err().is_retryable());
        assert!(matches!(
            run(Canned(200, "  ")).await,
            Err(CitoError::SchemaError(_))
        ));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let html = "ã".repeat(10);
        let cut = truncate_html(&html, 5);
        assert_eq!(cut, "ãã");
        assert_eq!(truncate_html("abc", 10), "abc");
    }
}
