//! Input resolution: validate a user-supplied path and classify its content.
//!
//! The kind is decided from magic bytes, never from the extension: phone
//! exports routinely save JPEGs as `.png` and scanners emit PDFs without an
//! extension at all.

use crate::error::ExtractError;
use image::ImageFormat;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// What the input file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Pdf,
    Image(ImageFormat),
}

/// A validated local input file.
#[derive(Debug, Clone)]
pub struct ResolvedInput {
    pub path: PathBuf,
    pub kind: InputKind,
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_pdf(&self) -> bool {
        self.kind == InputKind::Pdf
    }
}

/// Resolve a local path, checking it exists, is readable and is a PDF or a
/// supported image.
pub fn resolve_input(path: impl AsRef<Path>) -> Result<ResolvedInput, ExtractError> {
    let path = path.as_ref().to_path_buf();

    if !path.is_file() {
        return Err(ExtractError::FileNotFound { path });
    }

    let mut f = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ExtractError::PermissionDenied { path });
        }
        Err(_) => return Err(ExtractError::FileNotFound { path }),
    };

    let mut header = Vec::with_capacity(16);
    f.by_ref()
        .take(16)
        .read_to_end(&mut header)
        .map_err(|source| ExtractError::ReadFailed {
            path: path.clone(),
            source,
        })?;

    let kind = classify(&header).ok_or_else(|| ExtractError::UnsupportedInput {
        path: path.clone(),
        magic: header.iter().copied().take(4).collect(),
    })?;

    debug!("Resolved {:?} input: {}", kind, path.display());
    Ok(ResolvedInput { path, kind })
}

/// Classify content from its leading bytes.
pub fn classify(header: &[u8]) -> Option<InputKind> {
    if header.starts_with(b"%PDF") {
        return Some(InputKind::Pdf);
    }
    image::guess_format(header).ok().map(InputKind::Image)
}
