//! Error types for the ledgerlens library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ExtractError`]: **Fatal** for one invocation: the input file cannot be
//!   read, the HTTP client cannot be built, the output cannot be written.
//!   The pipelines turn these into an explicit `{"error": ...}` object; only
//!   output writing surfaces as a process error in the CLI.
//!
//! * [`StageError`]: **Non-fatal**: a single pipeline step failed (network
//!   blip, non-200 status, model returned prose instead of JSON, repaired
//!   object still invalid). The pipeline logs it and falls through to the
//!   next stage, so callers never see it directly.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the ledgerlens library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists but is neither a PDF nor a supported image.
    #[error("Unsupported input '{path}': not a PDF or a supported image\nFirst bytes: {magic:?}")]
    UnsupportedInput { path: PathBuf, magic: Vec<u8> },

    /// Reading the input file failed after it was resolved.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// The PDF has no pages to render.
    #[error("PDF '{path}' has no pages")]
    EmptyPdf { path: PathBuf },

    // ── API errors ────────────────────────────────────────────────────────
    /// No API key in the environment or the env file.
    #[error("No GEMINI_API_KEY found in environment or .env")]
    MissingApiKey,

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal failure of one pipeline step.
///
/// Every variant triggers fall-through to the next stage (reprompt, local
/// fallback, image retry, OCR) rather than aborting the run.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StageError {
    /// The request never produced a response (DNS, TLS, connection reset).
    #[error("request failed: {0}")]
    Transport(String),

    /// The call exceeded its per-stage timeout.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The API answered with a non-200 status.
    #[error("API error: status={status}: {body}")]
    Status { status: u16, body: String },

    /// The body was not the expected `generateContent` JSON shape.
    #[error("malformed API response: {0}")]
    MalformedResponse(String),

    /// The response carried no candidate text.
    #[error("response contained no candidate text")]
    EmptyCandidate,

    /// The candidate text contained no JSON object.
    #[error("no JSON object in model output")]
    NoJson,

    /// The model answered with `{}`.
    #[error("model returned an empty JSON object")]
    EmptyObject,

    /// A repaired object still had missing or invalid categories.
    #[error("repaired object still has invalid categories")]
    StillInvalid,

    /// PDF rendering / text extraction failed for a step that needed it.
    #[error("render failed: {0}")]
    Render(String),

    /// The local OCR engine failed.
    #[error("OCR failed: {0}")]
    Ocr(String),
}

impl StageError {
    /// Whether retrying the same request could plausibly succeed.
    ///
    /// Timeouts, transport errors, 429 and 5xx are transient; everything
    /// else (bad key, 400, malformed output) fails the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            StageError::Transport(_) | StageError::Timeout { .. } => true,
            StageError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<ExtractError> for StageError {
    fn from(e: ExtractError) -> Self {
        StageError::Render(e.to_string())
    }
}
