//! Page rasterisation: turn an uploaded document into page images.
//!
//! PDFs go through pdfium on a `spawn_blocking` thread (pdfium keeps
//! thread-local state and is CPU-bound); raster uploads are decoded with the
//! `image` crate. A document whose pages cannot all be decoded fails as a
//! whole; partial page sets are never returned.

use super::classify::{classify, DocumentKind};
use super::input::UploadedDocument;
use crate::config::IntakeConfig;
use crate::error::DocumentError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::{debug, info};

/// Environment variable pointing at an existing libpdfium.
pub const PDFIUM_LIB_PATH_VAR: &str = "PDFIUM_LIB_PATH";

/// One rendered page, owned by the text extractor while it runs.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-indexed page number (always 1 for raster uploads).
    pub page_num: usize,
    pub image: DynamicImage,
}

impl PageImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Render every page of `document` in page order.
pub async fn render_pages(
    document: &UploadedDocument,
    config: &IntakeConfig,
) -> Result<Vec<PageImage>, DocumentError> {
    match classify(document.name()) {
        DocumentKind::RasterImage => decode_image(document).map(|page| vec![page]),
        DocumentKind::PagedDocument => {
            let name = document.name().to_string();
            let bytes = document.bytes().to_vec();
            let scale = config.render_scale;
            let max_pixels = config.max_rendered_pixels;
            let password = config.password.clone();

            tokio::task::spawn_blocking(move || {
                render_pdf_blocking(&name, &bytes, scale, max_pixels, password.as_deref())
            })
            .await
            .map_err(|e| DocumentError::Decode {
                name: document.name().to_string(),
                detail: format!("render task panicked: {e}"),
            })?
        }
    }
}

/// Decode a png/jpg upload into a single page.
pub fn decode_image(document: &UploadedDocument) -> Result<PageImage, DocumentError> {
    let image = image::load_from_memory(document.bytes()).map_err(|e| DocumentError::Decode {
        name: document.name().to_string(),
        detail: e.to_string(),
    })?;
    debug!(
        "{}: decoded image {}x{} px",
        document.name(),
        image.width(),
        image.height()
    );
    Ok(PageImage { page_num: 1, image })
}

/// Bind to pdfium: `PDFIUM_LIB_PATH` first, then the system library.
fn bind_pdfium() -> Result<Pdfium, PdfiumError> {
    let bindings = match std::env::var(PDFIUM_LIB_PATH_VAR) {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(path)?,
        _ => Pdfium::bind_to_system_library()?,
    };
    Ok(Pdfium::new(bindings))
}

/// Blocking implementation of PDF rendering.
fn render_pdf_blocking(
    name: &str,
    bytes: &[u8],
    scale: f32,
    max_pixels: u32,
    password: Option<&str>,
) -> Result<Vec<PageImage>, DocumentError> {
    let decode_err = |detail: String| DocumentError::Decode {
        name: name.to_string(),
        detail,
    };

    let pdfium = bind_pdfium().map_err(|e| decode_err(format!("pdfium unavailable: {e:?}")))?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, password)
        .map_err(|e| decode_err(format!("{e:?}")))?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    if total_pages == 0 {
        return Err(decode_err("PDF has no pages".into()));
    }
    info!("{}: PDF loaded, {} pages", name, total_pages);

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(scale)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(total_pages);
    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| decode_err(format!("page {}: {e:?}", idx + 1)))?;

        let image = bitmap.as_image();
        debug!(
            "{}: rendered page {} → {}x{} px",
            name,
            idx + 1,
            image.width(),
            image.height()
        );
        results.push(PageImage {
            page_num: idx + 1,
            image,
        });
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([255, 255, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .expect("encode png");
        buf
    }

    #[tokio::test]
    async fn raster_upload_yields_one_page() {
        let doc = UploadedDocument::new("receipt.png", png_bytes(12, 30)).unwrap();
        let pages = render_pages(&doc, &IntakeConfig::default()).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_num, 1);
        assert_eq!((pages[0].width(), pages[0].height()), (12, 30));
    }

    #[tokio::test]
    async fn corrupt_image_is_decode_error() {
        let doc = UploadedDocument::new("broken.jpg", b"not a jpeg".to_vec()).unwrap();
        let err = render_pages(&doc, &IntakeConfig::default()).await.unwrap_err();
        assert!(matches!(err, DocumentError::Decode { ref name, .. } if name == "broken.jpg"));
    }

    // Whether or not libpdfium can be bound here, a bad PDF must come back as
    // a per-document decode failure.
    #[tokio::test]
    async fn corrupt_pdf_is_decode_error() {
        let doc = UploadedDocument::new("scan.PDF", b"%PDF-1.7\ntruncated".to_vec()).unwrap();
        let err = render_pages(&doc, &IntakeConfig::default()).await.unwrap_err();
        assert!(matches!(err, DocumentError::Decode { ref name, .. } if name == "scan.PDF"));
    }

    #[tokio::test]
    async fn corrupt_pdf_with_password_is_decode_error() {
        let config = IntakeConfig::builder().password("hunter2").build().unwrap();
        let doc = UploadedDocument::new("locked.pdf", vec![0u8; 64]).unwrap();
        let err = render_pages(&doc, &config).await.unwrap_err();
        assert!(matches!(err, DocumentError::Decode { ref name, .. } if name == "locked.pdf"));
    }
}
