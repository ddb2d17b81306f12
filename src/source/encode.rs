//! Image encoding: `DynamicImage` → base64 PNG [`PageImage`].
//!
//! Vision chat APIs accept images as base64 payloads in the JSON request
//! body. PNG is lossless, so rendered text stays crisp; JPEG artefacts on
//! glyph edges measurably hurt transcription at low DPI.

use crate::page::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode an image as base64 PNG, shrinking it first so that its longest
/// edge is at most `max_edge` pixels.
pub fn encode_png(img: &DynamicImage, max_edge: u32) -> Result<PageImage, image::ImageError> {
    let scaled;
    let img = if img.width().max(img.height()) > max_edge {
        scaled = img.thumbnail(max_edge, max_edge);
        &scaled
    } else {
        img
    };

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} image → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );
    Ok(PageImage::new(b64, "image/png"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn solid(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 255])))
    }

    fn decode(img: &PageImage) -> DynamicImage {
        let bytes = STANDARD.decode(&img.data).expect("valid base64");
        image::load_from_memory(&bytes).expect("valid png")
    }

    #[test]
    fn small_image_keeps_its_size() {
        let encoded = encode_png(&solid(10, 8), 100).unwrap();
        assert_eq!(encoded.mime_type, "image/png");
        let back = decode(&encoded);
        assert_eq!((back.width(), back.height()), (10, 8));
    }

    #[test]
    fn large_image_is_shrunk() {
        let back = decode(&encode_png(&solid(400, 200), 100).unwrap());
        assert_eq!(back.width(), 100);
        assert!(back.height() <= 50);
    }
}
