//! Text-to-image generation.
//!
//! The image endpoint takes the description as the last URL path segment
//! and answers with raw image bytes. The bottom band carries a watermark,
//! which we crop before re-encoding as JPEG.

use std::io::Cursor;
use std::time::Duration;

use image::{DynamicImage, GenericImageView, ImageFormat};
use tracing::{debug, info};

use crate::channels::PhotoAttachment;
use crate::error::LlmError;

const PROVIDER: &str = "image";

/// Height of the watermark band cropped from the bottom.
pub const WATERMARK_BAND_PX: u32 = 60;

/// Telegram's caption limit, in characters.
pub const MAX_CAPTION_CHARS: usize = 1024;

const IMAGE_TIMEOUT: Duration = Duration::from_secs(60);

pub const IMAGE_FILE_NAME: &str = "aiimage.jpg";

/// Fetches and post-processes generated images.
pub struct ImageGenerator {
    client: reqwest::Client,
    base_url: String,
}

impl ImageGenerator {
    pub fn new(base_url: impl Into<String>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(IMAGE_TIMEOUT)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.into(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Generate an image for `description`, ready to send as a photo.
    pub async fn generate(&self, description: &str) -> Result<PhotoAttachment, LlmError> {
        let url = image_url(&self.base_url, description)?;
        debug!(url = %url, "Requesting image");

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::BadStatus {
                provider: PROVIDER.into(),
                status: status.as_u16(),
                body,
            });
        }

        let raw = resp.bytes().await.map_err(|e| LlmError::RequestFailed {
            provider: PROVIDER.into(),
            reason: e.to_string(),
        })?;

        let bytes = tokio::task::spawn_blocking(move || process_image(&raw))
            .await
            .map_err(|e| LlmError::Image(format!("image task failed: {e}")))??;

        info!(size = bytes.len(), "Image generated");
        Ok(PhotoAttachment {
            bytes,
            file_name: IMAGE_FILE_NAME.to_string(),
            caption: Some(truncate_caption(description)),
        })
    }
}

/// `base` with `description` appended as one percent-encoded path segment.
pub fn image_url(base: &str, description: &str) -> Result<reqwest::Url, LlmError> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| LlmError::Image(format!("invalid image URL {base:?}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| LlmError::Image(format!("image URL {base:?} cannot take a path")))?
        .pop_if_empty()
        .push(description);
    Ok(url)
}

/// Decode, crop the watermark band and re-encode as JPEG.
pub fn process_image(raw: &[u8]) -> Result<Vec<u8>, LlmError> {
    let img = image::load_from_memory(raw).map_err(|e| LlmError::Image(e.to_string()))?;

    let (width, height) = img.dimensions();
    let img = if height > WATERMARK_BAND_PX {
        img.crop_imm(0, 0, width, height - WATERMARK_BAND_PX)
    } else {
        img
    };

    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
        .map_err(|e| LlmError::Image(e.to_string()))?;
    Ok(out)
}

/// Fit `text` into a photo caption, marking the cut with `...`.
pub fn truncate_caption(text: &str) -> String {
    if text.chars().count() <= MAX_CAPTION_CHARS {
        return text.to_string();
    }
    let mut caption: String = text.chars().take(MAX_CAPTION_CHARS - 3).collect();
    caption.push_str("...");
    caption
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 10, 10]));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn watermark_band_is_cropped() {
        let jpeg = process_image(&png(128, 200)).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (128, 140));
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn small_images_are_kept_whole() {
        let jpeg = process_image(&png(40, 50)).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (40, 50));
    }

    #[test]
    fn garbage_is_an_image_error() {
        assert!(matches!(
            process_image(b"definitely not an image"),
            Err(LlmError::Image(_))
        ));
    }

    #[test]
    fn description_becomes_one_path_segment() {
        let url = image_url("https://image.example.com/prompt/", "кот в шляпе / ночью").unwrap();
        let s = url.as_str();
        assert!(s.starts_with("https://image.example.com/prompt/"));
        assert!(!s.contains(' '));
        assert_eq!(url.path_segments().unwrap().count(), 2);
    }

    #[test]
    fn long_captions_are_truncated_on_char_boundaries() {
        let long = "ж".repeat(2000);
        let caption = truncate_caption(&long);
        assert_eq!(caption.chars().count(), MAX_CAPTION_CHARS);
        assert!(caption.ends_with("..."));
        assert_eq!(truncate_caption("short"), "short");
    }
}
