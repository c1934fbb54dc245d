//! Model interaction: build `generateContent` requests and call the API.
//!
//! [`GenerativeModel`] is the seam between the pipelines and the network.
//! [`GeminiClient`] is the production implementation; tests drive the
//! pipelines with scripted implementations instead.
//!
//! ## Retry Strategy
//!
//! [`call_model`] retries transient failures (timeout, transport, 429, 5xx)
//! with exponential backoff (`retry_backoff_ms * 2^(attempt-1)`). The default
//! is zero retries: every stage already has a fallback to drop into.

use crate::config::ExtractionConfig;
use crate::error::{ExtractError, StageError};
use crate::pipeline::encode::InlineImage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Longest slice of an error body kept in [`StageError::Status`].
const MAX_ERROR_BODY: usize = 500;

// ── Request types ────────────────────────────────────────────────────────────

/// A `generateContent` request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Content {
    pub parts: Vec<Part>,
}

/// One request part: prompt text or an inline image.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Part {
    Text { text: String },
    InlineData { inline_data: InlineImage },
}

impl GenerateRequest {
    /// A text-only request.
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![Part::Text {
                    text: prompt.into(),
                }],
            }],
        }
    }

    /// Prompt text followed by one inline image.
    pub fn with_image(prompt: impl Into<String>, image: InlineImage) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: prompt.into(),
                    },
                    Part::InlineData {
                        inline_data: image,
                    },
                ],
            }],
        }
    }

    /// The concatenated prompt text of every part.
    pub fn prompt(&self) -> String {
        self.contents
            .iter()
            .flat_map(|c| &c.parts)
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                Part::InlineData { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Whether any part carries an image.
    pub fn has_image(&self) -> bool {
        self.contents
            .iter()
            .flat_map(|c| &c.parts)
            .any(|p| matches!(p, Part::InlineData { .. }))
    }
}

// ── Response types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsePart {
    #[serde(default)]
    pub text: Option<String>,
    /// Thinking models interleave reasoning parts; those are skipped.
    #[serde(default)]
    pub thought: bool,
}

impl GenerateResponse {
    /// Text of the first candidate's first non-thought text part.
    pub fn candidate_text(&self) -> Result<String, StageError> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .and_then(|content| {
                content
                    .parts
                    .iter()
                    .filter(|p| !p.thought)
                    .find_map(|p| p.text.clone())
            })
            .filter(|t| !t.trim().is_empty())
            .ok_or(StageError::EmptyCandidate)
    }
}

// ── Model seam ───────────────────────────────────────────────────────────────

/// Sends one request and returns the model's reply text.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(
        &self,
        request: &GenerateRequest,
        timeout: Duration,
    ) -> Result<String, StageError>;
}

/// [`GenerativeModel`] talking to the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn new(
        config: &ExtractionConfig,
        api_key: impl Into<String>,
    ) -> Result<Self, ExtractError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ExtractError::HttpClient(e.to_string()))?;
        Ok(Self {
            http,
            url: generate_url(&config.endpoint, &config.model),
            api_key: api_key.into(),
        })
    }
}

/// `{endpoint}/{model}:generateContent`.
pub fn generate_url(endpoint: &str, model: &str) -> String {
    format!("{}/{}:generateContent", endpoint.trim_end_matches('/'), model)
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn generate(
        &self,
        request: &GenerateRequest,
        timeout: Duration,
    ) -> Result<String, StageError> {
        let secs = timeout.as_secs();
        let response = self
            .http
            .post(&self.url)
            .query(&[("key", self.api_key.as_str())])
            .json(request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StageError::Timeout { secs }
                } else {
                    // Strip the URL: it carries the API key as a query parameter.
                    StageError::Transport(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(StageError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: GenerateResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                StageError::Timeout { secs }
            } else {
                StageError::MalformedResponse(e.without_url().to_string())
            }
        })?;

        let text = body.candidate_text()?;
        debug!("Model replied with {} chars", text.len());
        Ok(text)
    }
}

/// Exponential backoff for the `attempt`-th retry (1-based), saturating at
/// `u64::MAX` instead of overflowing.
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor)
}

/// Call the model once, retrying transient failures per `config`.
pub async fn call_model(
    model: &dyn GenerativeModel,
    request: &GenerateRequest,
    timeout: Duration,
    config: &ExtractionConfig,
) -> Result<String, StageError> {
    let mut attempt = 0u32;
    loop {
        match model.generate(request, timeout).await {
            Ok(text) => return Ok(text),
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                attempt += 1;
                let backoff = backoff_ms(config.retry_backoff_ms, attempt);
                warn!(
                    "Model call failed ({}); retry {}/{} after {}ms",
                    e, attempt, config.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
