//! Configuration types for receipt and statement extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. The defaults reproduce the fixed
//! timeouts and text budgets the pipelines were tuned with; callers only
//! override what they need (tests point `endpoint` elsewhere, the CLI sets
//! `model` and `env_file`).
//!
//! API key resolution lives here as well: [`ExtractionConfig::resolve_api_key`]
//! checks an explicit key, then `GEMINI_API_KEY`, then a `key=value` env file.

use crate::error::ExtractError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable (and env-file key) holding the API key.
pub const API_KEY_VAR: &str = "GEMINI_API_KEY";

/// Default `generateContent` base URL.
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model resource name.
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-pro";

/// Configuration for one extraction run.
///
/// # Example
/// ```rust
/// use ledgerlens::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .model("models/gemini-2.5-flash")
///     .max_retries(2)
///     .build()
///     .unwrap();
/// assert_eq!(config.receipt_timeout_secs, 30);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Base URL of the `generateContent` API. Default: [`DEFAULT_ENDPOINT`].
    pub endpoint: String,

    /// Model resource name, e.g. `models/gemini-2.5-pro`.
    pub model: String,

    /// Explicit API key. Takes precedence over the environment and env file.
    pub api_key: Option<String>,

    /// `key=value` file consulted when `GEMINI_API_KEY` is unset. Default: `.env`.
    pub env_file: PathBuf,

    /// Timeout for the initial receipt request. Default: 30.
    pub receipt_timeout_secs: u64,

    /// Timeout for the category-repair request. Default: 25.
    pub reprompt_timeout_secs: u64,

    /// Timeout for the text-only statement request. Default: 45.
    pub statement_text_timeout_secs: u64,

    /// Timeout for the image statement request. Default: 60.
    ///
    /// Image requests carry a full rendered page and take noticeably longer
    /// to answer than the text prompt.
    pub statement_image_timeout_secs: u64,

    /// Retries per request on transient failures (timeout, 429, 5xx). Default: 0.
    ///
    /// Every stage already has a fallback, so the default is a single attempt.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Characters of statement text sent with the text prompt. Default: 8000.
    ///
    /// Anything past this budget is never seen by the model; long statements
    /// can lose transactions. The truncation is logged at WARN.
    pub statement_text_budget: usize,

    /// Characters of statement text sent as context with the image prompt. Default: 2000.
    pub image_context_budget: usize,

    /// Characters of statement text echoed in the failure object. Default: 1000.
    pub raw_text_preview: usize,

    /// Optional stage-level progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            env_file: PathBuf::from(".env"),
            receipt_timeout_secs: 30,
            reprompt_timeout_secs: 25,
            statement_text_timeout_secs: 45,
            statement_image_timeout_secs: 60,
            max_retries: 0,
            retry_backoff_ms: 500,
            statement_text_budget: 8000,
            image_context_budget: 2000,
            raw_text_preview: 1000,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("env_file", &self.env_file)
            .field("receipt_timeout_secs", &self.receipt_timeout_secs)
            .field("reprompt_timeout_secs", &self.reprompt_timeout_secs)
            .field("statement_text_timeout_secs", &self.statement_text_timeout_secs)
            .field("statement_image_timeout_secs", &self.statement_image_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("statement_text_budget", &self.statement_text_budget)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgress>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Resolve the API key: explicit key, then `GEMINI_API_KEY`, then the env file.
    ///
    /// Empty values count as missing at every level.
    pub fn resolve_api_key(&self) -> Result<String, ExtractError> {
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            return Ok(key.to_string());
        }
        if let Ok(key) = std::env::var(API_KEY_VAR) {
            if !key.is_empty() {
                debug!("API key read from {}", API_KEY_VAR);
                return Ok(key);
            }
        }
        load_env_file_key(&self.env_file).ok_or(ExtractError::MissingApiKey)
    }
}

/// Read `GEMINI_API_KEY` from a `key=value` file, if the file exists.
pub fn load_env_file_key(path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    let key = parse_env_key(&contents);
    if key.is_some() {
        debug!("API key read from {}", path.display());
    }
    key
}

/// Find the first `GEMINI_API_KEY=...` line; surrounding whitespace and
/// double quotes are stripped from the value.
pub fn parse_env_key(contents: &str) -> Option<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with(API_KEY_VAR))
        .find_map(|line| {
            let (name, value) = line.split_once('=')?;
            if name.trim() != API_KEY_VAR {
                return None;
            }
            let value = value.trim().trim_matches('"');
            (!value.is_empty()).then(|| value.to_string())
        })
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ExtractionConfigBuilder {
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Accepts both `gemini-2.5-pro` and `models/gemini-2.5-pro`.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.config.model = if model.starts_with("models/") {
            model
        } else {
            format!("models/{model}")
        };
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.env_file = path.into();
        self
    }

    pub fn receipt_timeout_secs(mut self, secs: u64) -> Self {
        self.config.receipt_timeout_secs = secs;
        self
    }

    pub fn reprompt_timeout_secs(mut self, secs: u64) -> Self {
        self.config.reprompt_timeout_secs = secs;
        self
    }

    pub fn statement_text_timeout_secs(mut self, secs: u64) -> Self {
        self.config.statement_text_timeout_secs = secs;
        self
    }

    pub fn statement_image_timeout_secs(mut self, secs: u64) -> Self {
        self.config.statement_image_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn statement_text_budget(mut self, chars: usize) -> Self {
        self.config.statement_text_budget = chars;
        self
    }

    pub fn image_context_budget(mut self, chars: usize) -> Self {
        self.config.image_context_budget = chars;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.model.trim_start_matches("models/").is_empty() {
            return Err(ExtractError::InvalidConfig("model must not be empty".into()));
        }
        if c.endpoint.is_empty() {
            return Err(ExtractError::InvalidConfig("endpoint must not be empty".into()));
        }
        let timeouts = [
            c.receipt_timeout_secs,
            c.reprompt_timeout_secs,
            c.statement_text_timeout_secs,
            c.statement_image_timeout_secs,
        ];
        if timeouts.contains(&0) {
            return Err(ExtractError::InvalidConfig(
                "timeouts must be at least 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}
