//! PDF access: text extraction and first-page rasterisation via pdfium.
//!
//! pdfium is not async-safe, so the pipelines call the blocking
//! [`DocumentRenderer`] methods through [`extract_text`] / [`render_first_page`],
//! which hop onto Tokio's blocking pool.
//!
//! Library lookup order: `PDFIUM_LIB_PATH` (file or directory), the working
//! directory, then the system library path.

use crate::error::ExtractError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Environment variable pointing at an existing libpdfium.
pub const PDFIUM_LIB_PATH_VAR: &str = "PDFIUM_LIB_PATH";

/// PDF text extraction and page rendering.
pub trait DocumentRenderer: Send + Sync {
    /// All page text, concatenated in page order.
    fn extract_text(&self, path: &Path) -> Result<String, ExtractError>;

    /// The first page as an image.
    fn render_first_page(&self, path: &Path) -> Result<DynamicImage, ExtractError>;
}

/// [`DocumentRenderer`] backed by pdfium-render.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    /// Longest edge of the rendered page in pixels.
    pub max_rendered_pixels: u32,
}

impl Default for PdfiumRenderer {
    fn default() -> Self {
        Self {
            max_rendered_pixels: 2000,
        }
    }
}

impl PdfiumRenderer {
    fn bind(&self) -> Result<Pdfium, ExtractError> {
        let bindings = match std::env::var(PDFIUM_LIB_PATH_VAR) {
            Ok(configured) if !configured.is_empty() => {
                let configured = PathBuf::from(configured);
                let lib = if configured.is_dir() {
                    PathBuf::from(Pdfium::pdfium_platform_library_name_at_path(&configured))
                } else {
                    configured
                };
                Pdfium::bind_to_library(&lib)
            }
            _ => {
                let local = PathBuf::from(Pdfium::pdfium_platform_library_name_at_path("./"));
                Pdfium::bind_to_library(&local).or_else(|_| Pdfium::bind_to_system_library())
            }
        }
        .map_err(|e| ExtractError::PdfiumBindingFailed(format!("{e:?}")))?;
        Ok(Pdfium::new(bindings))
    }
}

fn open_error(path: &Path, e: PdfiumError) -> ExtractError {
    ExtractError::CorruptPdf {
        path: path.to_path_buf(),
        detail: format!("{e:?}"),
    }
}

impl DocumentRenderer for PdfiumRenderer {
    fn extract_text(&self, path: &Path) -> Result<String, ExtractError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| open_error(path, e))?;

        let mut text = String::new();
        for page in document.pages().iter() {
            let page_text = page.text().map_err(|e| open_error(path, e))?;
            text.push_str(&page_text.all());
            text.push('\n');
        }
        info!(
            "Extracted {} chars of text from {} pages",
            text.chars().count(),
            document.pages().len()
        );
        Ok(text)
    }

    fn render_first_page(&self, path: &Path) -> Result<DynamicImage, ExtractError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| open_error(path, e))?;

        let page = document.pages().first().map_err(|_| ExtractError::EmptyPdf {
            path: path.to_path_buf(),
        })?;

        let render_config = PdfRenderConfig::new()
            .set_target_width(self.max_rendered_pixels as i32)
            .set_maximum_height(self.max_rendered_pixels as i32);

        let image = page
            .render_with_config(&render_config)
            .map_err(|e| open_error(path, e))?
            .as_image();
        debug!("Rendered first page → {}x{} px", image.width(), image.height());
        Ok(image)
    }
}

/// Run [`DocumentRenderer::extract_text`] on the blocking pool.
pub async fn extract_text(
    renderer: &Arc<dyn DocumentRenderer>,
    path: &Path,
) -> Result<String, ExtractError> {
    let renderer = Arc::clone(renderer);
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || renderer.extract_text(&path))
        .await
        .map_err(|e| ExtractError::Internal(format!("Text extraction task panicked: {e}")))?
}

/// Run [`DocumentRenderer::render_first_page`] on the blocking pool.
pub async fn render_first_page(
    renderer: &Arc<dyn DocumentRenderer>,
    path: &Path,
) -> Result<DynamicImage, ExtractError> {
    let renderer = Arc::clone(renderer);
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || renderer.render_first_page(&path))
        .await
        .map_err(|e| ExtractError::Internal(format!("Render task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    struct FixedRenderer;

    impl DocumentRenderer for FixedRenderer {
        fn extract_text(&self, _path: &Path) -> Result<String, ExtractError> {
            Ok("OPENING BALANCE 100.00".into())
        }

        fn render_first_page(&self, path: &Path) -> Result<DynamicImage, ExtractError> {
            if path.ends_with("empty.pdf") {
                return Err(ExtractError::EmptyPdf {
                    path: path.to_path_buf(),
                });
            }
            Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                2,
                2,
                Rgba([255, 255, 255, 255]),
            )))
        }
    }

    #[tokio::test]
    async fn blocking_helpers_forward_results() {
        let renderer: Arc<dyn DocumentRenderer> = Arc::new(FixedRenderer);
        let text = extract_text(&renderer, Path::new("s.pdf")).await.unwrap();
        assert_eq!(text, "OPENING BALANCE 100.00");

        let img = render_first_page(&renderer, Path::new("s.pdf")).await.unwrap();
        assert_eq!(img.width(), 2);

        let err = render_first_page(&renderer, Path::new("empty.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::EmptyPdf { .. }));
    }

    #[test]
    fn default_pixel_cap() {
        assert_eq!(PdfiumRenderer::default().max_rendered_pixels, 2000);
    }
}
