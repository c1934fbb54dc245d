//! Progress-callback trait for per-stage extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgress>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as a pipeline moves through its stages (initial request, reprompt,
//! local fallback, …).
//!
//! # Example
//!
//! ```rust
//! use ledgerlens::{ExtractionConfig, ExtractionProgress, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     failures: AtomicUsize,
//! }
//!
//! impl ExtractionProgress for CountingCallback {
//!     fn on_stage_failed(&self, stage: Stage, error: &str) {
//!         self.failures.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage} failed: {error}");
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { failures: AtomicUsize::new(0) });
//! let config = ExtractionConfig::builder()
//!     .progress_callback(cb as Arc<dyn ExtractionProgress>)
//!     .build()
//!     .unwrap();
//! ```

use std::fmt;
use std::sync::Arc;

/// A step of either pipeline, as reported to [`ExtractionProgress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Initial receipt request with the inline image.
    ReceiptRequest,
    /// Follow-up request asking the model to repair categories.
    Reprompt,
    /// Client-side merchant rule table.
    LocalFallback,
    /// Local OCR after the API produced nothing.
    OcrFallback,
    /// Reading text out of a statement PDF.
    StatementTextExtraction,
    /// Text-only statement request.
    StatementText,
    /// Statement request with the rendered first page.
    StatementImage,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::ReceiptRequest => "receipt request",
            Stage::Reprompt => "category reprompt",
            Stage::LocalFallback => "local fallback",
            Stage::OcrFallback => "local OCR",
            Stage::StatementTextExtraction => "PDF text extraction",
            Stage::StatementText => "statement text request",
            Stage::StatementImage => "statement image request",
        };
        f.write_str(label)
    }
}

/// Called by the pipelines as they move through their stages.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Implementations must be `Send + Sync` so the config
/// holding them can be shared freely.
pub trait ExtractionProgress: Send + Sync {
    /// Called just before a stage starts.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage produced a usable result.
    fn on_stage_complete(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage failed and the pipeline is falling through.
    fn on_stage_failed(&self, stage: Stage, error: &str) {
        let _ = (stage, error);
    }

    /// Called once with a short description of how the run resolved
    /// (`model`, `reprompt`, `local_fallback`, `raw_text`, `error`, …).
    fn on_finished(&self, resolution: &str) {
        let _ = resolution;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgress;

impl ExtractionProgress for NoopProgress {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgress>;

/// Forwards events to an optional callback.
pub(crate) struct Reporter<'a>(pub(crate) Option<&'a ProgressCallback>);

impl Reporter<'_> {
    pub(crate) fn start(&self, stage: Stage) {
        if let Some(cb) = self.0 {
            cb.on_stage_start(stage);
        }
    }

    pub(crate) fn complete(&self, stage: Stage) {
        if let Some(cb) = self.0 {
            cb.on_stage_complete(stage);
        }
    }

    pub(crate) fn failed(&self, stage: Stage, error: &dyn fmt::Display) {
        if let Some(cb) = self.0 {
            cb.on_stage_failed(stage, &error.to_string());
        }
    }

    pub(crate) fn finished(&self, resolution: &str) {
        if let Some(cb) = self.0 {
            cb.on_finished(resolution);
        }
    }
}
