//! # ledgerlens
//!
//! Extract structured receipts and bank-statement transactions from images
//! and PDFs with a generative model (Gemini `generateContent`).
//!
//! ## Why this crate?
//!
//! Models are good at reading receipts and bad at following output rules:
//! categories drift outside the vocabulary, JSON comes wrapped in prose, dates
//! arrive in whatever format the statement used. The value here is the repair
//! layer around the model call. Every record that leaves a pipeline carries a
//! category from the fixed vocabulary, and every failure resolves to a
//! fallback result or an explicit `{"error": ...}` object.
//!
//! ## Pipeline Overview
//!
//! ```text
//! receipt image / PDF
//!  │
//!  ├─ 1. Input     classify by magic bytes
//!  ├─ 2. Encode    image bytes (or rendered first page) → base64
//!  ├─ 3. Request   generateContent, 30 s
//!  ├─ 4. Parse     JSON object out of free-form text
//!  ├─ 5. Validate  categories in the expense vocabulary?
//!  ├─ 6. Repair    reprompt (25 s), then merchant rule table
//!  └─ 7. Normalise anything still invalid → other_expenses
//!
//! statement PDF
//!  │
//!  ├─ 1. Text      pdfium text extraction
//!  ├─ 2. Request   text prompt (45 s), else first page image (60 s)
//!  └─ 3. Clean     drop invalid rows, ISO dates, numeric coercion, categories
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ledgerlens::{ExtractionConfig, ReceiptExtractor};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // API key from GEMINI_API_KEY or a GEMINI_API_KEY=... line in ./.env
//!     let config = ExtractionConfig::default();
//!     let extractor = ReceiptExtractor::from_config(config)?;
//!     let output = extractor.extract("receipt.jpg").await;
//!     println!("{}", ledgerlens::output::to_pretty_json(&output)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ledgerlens` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `tesseract` | off | Local OCR fallback via `leptess` (needs libtesseract + libleptonica) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! ledgerlens = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod categories;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod receipt;
pub mod rules;
pub mod statement;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use categories::{CategoryKind, EXPENSE_CATEGORIES, INCOME_CATEGORIES};
pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use error::{ExtractError, StageError};
pub use output::{
    CategorySource, Confidence, ErrorReport, LineItem, ProcessingInfo, Receipt, ReceiptOutput,
    Statement, StatementOutput, Transaction,
};
pub use pipeline::gemini::{GenerateRequest, GenerativeModel};
pub use pipeline::ocr::OcrBackend;
pub use pipeline::render::DocumentRenderer;
pub use progress::{ExtractionProgress, NoopProgress, ProgressCallback, Stage};
pub use receipt::ReceiptExtractor;
pub use rules::{MerchantRule, MerchantRules};
pub use statement::StatementExtractor;
