//! Image encoding: cropped `RgbImage` → PNG bytes → `ImageData` / data URL.
//!
//! PNG keeps the crop lossless; chart labels and thin lines survive where
//! JPEG artefacts would blur them. The same bytes are written to the
//! artifact store, sent to the vision model and exposed as the chunk's
//! image handle, so all three always agree.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::RgbImage;
use std::io::Cursor;
use tracing::debug;

/// PNG-encode a crop.
pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} crop → {} PNG bytes", img.width(), img.height(), buf.len());
    Ok(buf)
}

/// Wrap PNG bytes for a multimodal request.
///
/// `detail: "high"` lets GPT-4-class models tile the image instead of
/// downscaling it to a single overview tile.
pub fn image_data(png: &[u8]) -> ImageData {
    ImageData::new(STANDARD.encode(png), "image/png").with_detail("high")
}

/// `data:image/png;base64,…` URL for PNG bytes.
pub fn data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn encode_small_image() {
        let img = RgbImage::from_pixel(10, 10, Rgb([255, 0, 0]));
        let png = encode_png(&img).expect("encode should succeed");
        assert!(png.starts_with(b"\x89PNG"));

        let data = image_data(&png);
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded, png);
    }

    #[test]
    fn data_url_prefix() {
        let url = data_url(b"abc");
        assert_eq!(url, "data:image/png;base64,YWJj");
    }
}
