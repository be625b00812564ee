//! PDF rasterisation: render every page of a form to PNG via pdfium.
//!
//! pdfium is a C++ library with thread-local state and is not async-safe, so
//! [`PageRasterizer::rasterize`] is a plain blocking call; the pipeline runs
//! it under `tokio::task::spawn_blocking`.
//!
//! Pages are rendered at a uniform scale factor rather than a target width:
//! intake forms are all letter/A4 sized, and a fixed multiplier keeps the
//! handwriting stroke width the model sees consistent from form to form.

use crate::error::{DocumentOpenError, IntakeError};
use crate::pipeline::{encode, input};
use pdfium_render::prelude::*;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Environment variable naming an explicit pdfium shared library.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// One rendered page, ready for the extraction service.
#[derive(Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-based page number in document order.
    pub page_num: usize,
    /// PNG-encoded pixels.
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("page_num", &self.page_num)
            .field("png", &format_args!("<{} bytes>", self.png.len()))
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Turns a document into one image per page.
///
/// Implementations must return pages numbered `1..=N` in document order with
/// no gaps, and must not modify the source file.
pub trait PageRasterizer: Send + Sync {
    fn rasterize(&self, pdf_path: &Path) -> Result<Vec<PageImage>, IntakeError>;
}

/// The pdfium-backed rasteriser.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    scale: f32,
    password: Option<String>,
}

impl PdfiumRasterizer {
    pub fn new(scale: f32, password: Option<String>) -> Self {
        Self { scale, password }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn rasterize(&self, pdf_path: &Path) -> Result<Vec<PageImage>, IntakeError> {
        // Cheap checks first so a bad path never needs the pdfium library.
        input::validate_document(pdf_path)?;
        let pdfium = bind_pdfium()?;
        render_document(&pdfium, pdf_path, self.scale, self.password.as_deref())
    }
}

/// Bind to pdfium: `PDFIUM_LIB_PATH` when set, else the system library.
pub fn bind_pdfium() -> Result<Pdfium, IntakeError> {
    let bindings = match std::env::var(PDFIUM_LIB_PATH_ENV) {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(&path)
            .map_err(|e| IntakeError::PdfiumBindingFailed(format!("{path}: {e:?}")))?,
        _ => Pdfium::bind_to_system_library()
            .map_err(|e| IntakeError::PdfiumBindingFailed(format!("{e:?}")))?,
    };
    Ok(Pdfium::new(bindings))
}

fn render_document(
    pdfium: &Pdfium,
    pdf_path: &Path,
    scale: f32,
    password: Option<&str>,
) -> Result<Vec<PageImage>, IntakeError> {
    let document = pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| open_error(pdf_path, e))?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);
    if total_pages == 0 {
        return Err(DocumentOpenError::Empty {
            path: pdf_path.to_path_buf(),
        }
        .into());
    }

    let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);

    let mut results = Vec::with_capacity(total_pages);
    for (idx, page) in pages.iter().enumerate() {
        let page_num = idx + 1;
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            IntakeError::RasterisationFailed {
                page: page_num,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        let png = encode::encode_png(&image).map_err(|e| IntakeError::RasterisationFailed {
            page: page_num,
            detail: format!("PNG encoding failed: {}", e),
        })?;
        debug!(
            "Rendered page {}/{} → {}x{} px, {} bytes PNG",
            page_num,
            total_pages,
            image.width(),
            image.height(),
            png.len()
        );

        results.push(PageImage {
            page_num,
            png,
            width: image.width(),
            height: image.height(),
        });
    }

    Ok(results)
}

fn open_error(pdf_path: &Path, e: PdfiumError) -> IntakeError {
    let err_str = format!("{:?}", e);
    let open = if err_str.contains("Password") || err_str.contains("password") {
        DocumentOpenError::PasswordRequired {
            path: pdf_path.to_path_buf(),
        }
    } else {
        DocumentOpenError::Corrupt {
            path: pdf_path.to_path_buf(),
            detail: err_str,
        }
    };
    open.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_fails_before_binding() {
        let r = PdfiumRasterizer::new(2.0, None);
        let err = r.rasterize(Path::new("/no/such/form.pdf")).unwrap_err();
        assert!(matches!(
            err,
            IntakeError::DocumentOpen(DocumentOpenError::NotFound { .. })
        ));
    }

    #[test]
    fn non_pdf_fails_before_binding() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("form.pdf");
        std::fs::write(&p, b"PK\x03\x04zip archive").unwrap();
        let err = PdfiumRasterizer::new(2.0, None).rasterize(&p).unwrap_err();
        assert!(matches!(
            err,
            IntakeError::DocumentOpen(DocumentOpenError::NotAPdf { .. })
        ));
    }

    #[test]
    fn page_image_debug_hides_bytes() {
        let img = PageImage {
            page_num: 1,
            png: vec![0; 2048],
            width: 10,
            height: 20,
        };
        let s = format!("{img:?}");
        assert!(s.contains("<2048 bytes>"));
    }
}
