//! Pipeline stages shared by the receipt and statement extractors.
//!
//! Each submodule implements exactly one step. The three external
//! collaborators (model API, PDF engine, OCR engine) sit behind traits so the
//! extractors can be driven end to end with in-memory implementations.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ gemini ──▶ extract
//! (sniff)   (pdfium)   (base64)   (HTTP)     (JSON object)
//!                         │
//!                         └──▶ ocr   (only when the API produced nothing)
//! ```
//!
//! 1. [`input`]: check the file exists and classify it as PDF or image
//! 2. [`render`]: PDF text extraction and first-page rasterisation; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`encode`]: base64-wrap image bytes for the `inline_data` request part
//! 4. [`gemini`]: `generateContent` request/response types, the
//!    [`gemini::GenerativeModel`] seam and retry/backoff
//! 5. [`extract`]: pull one JSON object out of free-form model text
//! 6. [`ocr`]: local text recognition for the receipt fallback

pub mod encode;
pub mod extract;
pub mod gemini;
pub mod input;
pub mod ocr;
pub mod render;
