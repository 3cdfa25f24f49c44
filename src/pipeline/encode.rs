//! Image encoding: rendered pages to PNG files, PNG files to base64 payloads.
//!
//! PNG is lossless; JPEG artefacts on rendered text confuse vision models
//! and degrade OCR accuracy at low DPI. `detail: "high"` lets GPT-4-class
//! models tile the image instead of reading a single 512 px overview.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// A page image ready to embed in a request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub base64: String,
    pub mime_type: &'static str,
}

impl EncodedImage {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }

    pub fn to_image_data(&self) -> ImageData {
        ImageData::new(self.base64.clone(), self.mime_type).with_detail("high")
    }
}

/// PNG bytes of a rendered page.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Read an image artifact and base64 it.
pub async fn encode_file(path: &Path) -> std::io::Result<EncodedImage> {
    let bytes = tokio::fs::read(path).await?;
    let base64 = STANDARD.encode(&bytes);
    debug!("Encoded {} → {} bytes base64", path.display(), base64.len());
    Ok(EncodedImage {
        base64,
        mime_type: mime_for(path),
    })
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "image/png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let png = encode_png(&img).expect("encode should succeed");
        assert_eq!(&png[1..4], b"PNG");
    }

    #[tokio::test]
    async fn encode_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc_page1.png");
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255])));
        std::fs::write(&path, encode_png(&img).unwrap()).unwrap();

        let enc = encode_file(&path).await.unwrap();
        assert_eq!(enc.mime_type, "image/png");
        assert!(enc.data_uri().starts_with("data:image/png;base64,"));
        let decoded = STANDARD.decode(&enc.base64).expect("valid base64");
        assert_eq!(decoded, std::fs::read(&path).unwrap());

        let data = enc.to_image_data();
        assert_eq!(data.mime_type, "image/png");
    }

    #[test]
    fn jpeg_mime() {
        assert_eq!(mime_for(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(mime_for(Path::new("a.png")), "image/png");
    }
}
