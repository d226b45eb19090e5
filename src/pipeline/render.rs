//! Rasterisation for the local optical extractor.
//!
//! pdfium keeps thread-local state, so every render runs on Tokio's blocking
//! pool. The longest edge of each page is capped at `max_rendered_pixels`
//! whatever the physical page size.

use crate::error::ExtractionError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Cursor;
use tracing::debug;

/// Rasterise every page of a standalone subset, in order.
pub async fn render_subset(
    bytes: Vec<u8>,
    max_pixels: u32,
) -> Result<Vec<DynamicImage>, ExtractionError> {
    tokio::task::spawn_blocking(move || render_subset_blocking(&bytes, max_pixels))
        .await
        .map_err(|e| ExtractionError::Render(format!("render task panicked: {e}")))?
}

fn render_subset_blocking(
    bytes: &[u8],
    max_pixels: u32,
) -> Result<Vec<DynamicImage>, ExtractionError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| ExtractionError::Render(format!("{:?}", e)))?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut images = Vec::new();
    for (index, page) in document.pages().iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| ExtractionError::Render(format!("page {}: {:?}", index + 1, e)))?;
        let image = bitmap.as_image();
        debug!(
            "Rendered subset page {} → {}x{} px",
            index + 1,
            image.width(),
            image.height()
        );
        images.push(image);
    }
    Ok(images)
}

/// Bind to pdfium in `PDFIUM_LIB_PATH` if set, else the system library.
fn bind_pdfium() -> Result<Pdfium, ExtractionError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir)),
        Err(_) => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| ExtractionError::Render(format!("pdfium library unavailable: {:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

/// PNG-encode a page and wrap it as base64 `ImageData` for the vision model.
///
/// PNG keeps glyph edges crisp; JPEG artefacts on rendered text hurt OCR.
pub fn encode_png(img: &DynamicImage) -> Result<ImageData, ExtractionError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| ExtractionError::Render(format!("PNG encoding failed: {e}")))?;
    Ok(ImageData::new(STANDARD.encode(&buf), "image/png").with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encodes_png_as_base64() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 4, Rgba([0, 0, 0, 255])));
        let data = encode_png(&img).expect("encode");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(&decoded[1..4], b"PNG");
    }
}
