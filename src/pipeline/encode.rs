//! Image encoding: file bytes or a rendered page → base64 [`InlineImage`].
//!
//! `generateContent` accepts images as base64 `inline_data` parts in the JSON
//! request body. Image files are sent byte-for-byte with their detected MIME
//! type; rendered PDF pages are encoded as PNG because compression artefacts
//! on small print hurt extraction far more than payload size does.

use crate::error::ExtractError;
use crate::pipeline::input::{InputKind, ResolvedInput};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use serde::Serialize;
use std::fmt;
use std::io::Cursor;
use tracing::debug;

/// A base64 image payload, serialised exactly as Gemini's `inline_data`.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

impl fmt::Debug for InlineImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineImage")
            .field("mime_type", &self.mime_type)
            .field("data", &format_args!("<{} bytes base64>", self.data.len()))
            .finish()
    }
}

impl InlineImage {
    /// Base64-encode raw bytes under the given MIME type.
    pub fn from_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        let data = STANDARD.encode(bytes);
        debug!("Encoded image → {} bytes base64", data.len());
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }
}

/// An image ready to send, plus the raw bytes it was encoded from (the local
/// OCR fallback reads those).
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub raw: Vec<u8>,
    pub inline: InlineImage,
}

impl EncodedImage {
    fn new(raw: Vec<u8>, mime_type: &str) -> Self {
        let inline = InlineImage::from_bytes(&raw, mime_type);
        Self { raw, inline }
    }
}

/// Encode an image input file as-is, keeping its detected MIME type.
///
/// PDFs are rejected here; render a page first and use [`encode_page`].
pub fn encode_image_file(input: &ResolvedInput) -> Result<EncodedImage, ExtractError> {
    let InputKind::Image(format) = input.kind else {
        return Err(ExtractError::Internal(format!(
            "'{}' is a PDF; render a page before encoding",
            input.path.display()
        )));
    };
    let bytes = std::fs::read(&input.path).map_err(|source| ExtractError::ReadFailed {
        path: input.path.clone(),
        source,
    })?;
    Ok(EncodedImage::new(bytes, format.to_mime_type()))
}

/// Encode a rasterised page as a base64 PNG.
pub fn encode_page(img: &DynamicImage) -> Result<EncodedImage, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(EncodedImage::new(buf, "image/png"))
}
