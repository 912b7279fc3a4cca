use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// Shrink an image so its larger dimension fits within `max_dimension`.
///
/// Images already within the budget are returned untouched, avoiding a
/// pointless resample. Alpha channels are flattened to RGB before resizing
/// since the transport encoding is opaque PNG.
pub fn resize_to_fit(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width <= max_dimension && height <= max_dimension {
        return image;
    }

    let factor = max_dimension as f64 / width.max(height) as f64;
    let new_width = (width as f64 * factor).round() as u32;
    let new_height = (height as f64 * factor).round() as u32;
    debug!(
        old = format!("{}x{}", width, height),
        new = format!("{}x{}", new_width, new_height),
        "Resizing image for transport"
    );

    let image = if image.color().has_alpha() {
        DynamicImage::ImageRgb8(image.to_rgb8())
    } else {
        image
    };

    image.resize_exact(new_width, new_height, FilterType::Lanczos3)
}

/// Base64-encoded image ready to embed in a backend request
#[derive(Debug, Clone)]
pub struct EncodedImage {
    /// Base64-encoded PNG bytes
    pub data: String,
    /// MIME type of the encoded bytes
    pub media_type: String,
}

impl EncodedImage {
    /// Encode an already-normalized image as base64 PNG.
    pub fn from_image(image: &DynamicImage) -> Result<Self> {
        let mut buffer = Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, ImageFormat::Png)
            .context("Failed to encode image as PNG")?;

        Ok(Self {
            data: BASE64.encode(buffer.into_inner()),
            media_type: "image/png".to_string(),
        })
    }

    /// Data URL form used by OpenAI-style APIs.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_identity_within_budget() {
        let img = DynamicImage::new_rgb8(800, 600);
        let resized = resize_to_fit(img, 1024);
        assert_eq!(resized.dimensions(), (800, 600));
    }

    #[test]
    fn test_resize_identity_at_exact_budget() {
        let img = DynamicImage::new_rgb8(1024, 512);
        let resized = resize_to_fit(img, 1024);
        assert_eq!(resized.dimensions(), (1024, 512));
    }

    #[test]
    fn test_resize_wide_image() {
        let img = DynamicImage::new_rgb8(2048, 1024);
        let resized = resize_to_fit(img, 1024);
        assert_eq!(resized.dimensions(), (1024, 512));
    }

    #[test]
    fn test_resize_tall_image() {
        let img = DynamicImage::new_rgb8(500, 2000);
        let resized = resize_to_fit(img, 1000);
        assert_eq!(resized.dimensions(), (250, 1000));
    }

    #[test]
    fn test_resize_rounds_to_nearest() {
        // 1333x1000 at max 1024: factor = 1024/1333, height = 768.19 -> 768
        let img = DynamicImage::new_rgb8(1333, 1000);
        let resized = resize_to_fit(img, 1024);
        let (w, h) = resized.dimensions();
        assert_eq!(w, 1024);
        assert_eq!(h, 768);
    }

    #[test]
    fn test_resize_preserves_aspect_ratio() {
        let img = DynamicImage::new_rgb8(3000, 2000);
        let resized = resize_to_fit(img, 900);
        let (w, h) = resized.dimensions();
        assert_eq!(w.max(h), 900);
        let original_ratio = 3000.0 / 2000.0;
        let new_ratio = w as f64 / h as f64;
        assert!((original_ratio - new_ratio).abs() < 0.01);
    }

    #[test]
    fn test_resize_flattens_alpha() {
        let img = DynamicImage::new_rgba8(2000, 2000);
        let resized = resize_to_fit(img, 100);
        assert!(!resized.color().has_alpha());
        assert_eq!(resized.dimensions(), (100, 100));
    }

    #[test]
    fn test_encoded_image_png() {
        let img = DynamicImage::new_rgb8(8, 8);
        let encoded = EncodedImage::from_image(&img).unwrap();
        assert_eq!(encoded.media_type, "image/png");
        assert!(!encoded.data.is_empty());

        let bytes = BASE64.decode(&encoded.data).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn test_data_url() {
        let img = DynamicImage::new_rgb8(4, 4);
        let encoded = EncodedImage::from_image(&img).unwrap();
        assert!(encoded.data_url().starts_with("data:image/png;base64,"));
    }
}
