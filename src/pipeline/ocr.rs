//! Local OCR, used only when the API produced no response at all.
//!
//! The fallback gives the user *something* back (the raw receipt text) when
//! the network or the API key is the problem. It is not fed into the
//! category loop.
//!
//! The tesseract engine is linked through `leptess` behind the `tesseract`
//! feature. Without it, [`default_backend`] returns [`Unavailable`] and the
//! fallback reports an OCR error object.

use crate::error::StageError;
use std::sync::Arc;

/// Abstraction over an OCR engine.
/// Implementations accept raw PNG/JPEG image bytes and return the recognised text.
pub trait OcrBackend: Send + Sync {
    fn recognize(&self, image_bytes: &[u8]) -> Result<String, StageError>;
}

/// Stand-in used when the crate was built without an OCR engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unavailable;

impl OcrBackend for Unavailable {
    fn recognize(&self, _image_bytes: &[u8]) -> Result<String, StageError> {
        Err(StageError::Ocr(
            "tesseract not available; build with the `tesseract` feature".to_string(),
        ))
    }
}

/// The engine used by production wiring: tesseract with English data.
#[cfg(feature = "tesseract")]
pub fn default_backend() -> Arc<dyn OcrBackend> {
    Arc::new(tesseract_backend::TesseractRecognizer::new(None, "eng"))
}

/// The engine used by production wiring: [`Unavailable`] in this build.
#[cfg(not(feature = "tesseract"))]
pub fn default_backend() -> Arc<dyn OcrBackend> {
    Arc::new(Unavailable)
}

// ── Tesseract backend (optional, gated behind `tesseract` feature) ───────────

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use super::OcrBackend;
    use crate::error::StageError;
    use leptess::LepTess;
    use tracing::debug;

    /// libtesseract through `leptess`. A fresh engine is created per call;
    /// the fallback runs at most once per receipt.
    #[derive(Debug, Clone)]
    pub struct TesseractRecognizer {
        data_path: Option<String>,
        lang: String,
    }

    impl TesseractRecognizer {
        /// `data_path: None` uses tesseract's own tessdata lookup.
        pub fn new(data_path: Option<String>, lang: &str) -> Self {
            Self {
                data_path,
                lang: lang.to_string(),
            }
        }
    }

    impl OcrBackend for TesseractRecognizer {
        fn recognize(&self, image_bytes: &[u8]) -> Result<String, StageError> {
            let mut lt = LepTess::new(self.data_path.as_deref(), &self.lang)
                .map_err(|e| StageError::Ocr(format!("tesseract init: {e}")))?;
            lt.set_image_from_mem(image_bytes)
                .map_err(|e| StageError::Ocr(format!("image decode: {e}")))?;
            let text = lt
                .get_utf8_text()
                .map_err(|e| StageError::Ocr(format!("tesseract: {e}")))?;
            debug!("OCR produced {} chars", text.len());
            Ok(text)
        }
    }
}
