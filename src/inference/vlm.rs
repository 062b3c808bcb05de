use std::io::Cursor;
use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use base64::Engine;
use image::imageops::FilterType;
use image::{GenericImageView, ImageFormat};
use tracing::{debug, info};

use super::runtime::{RuntimeClient, RuntimeMessage};
use super::{ChatResult, GenerationParams, VisionModel};
use crate::error::{Error, Result};

/// Longest image edge sent to the vision model unless configured otherwise.
pub const DEFAULT_MAX_EDGE: u32 = 1024;

/// An image decoded, downscaled and re-encoded for the vision model.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// File name of the source, for logs.
    pub name: String,
    pub png_base64: String,
}

impl PreparedImage {
    /// Read and prepare the image at `path`.
    ///
    /// A missing path is `NotFound`. Directories and files that do not
    /// decode as an image are `InvalidInput`.
    pub async fn load(path: &Path, max_edge: u32) -> Result<Self> {
        let meta = tokio::fs::metadata(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::NotFound(format!("Image not found: {}", path.display()))
            }
            _ => Error::Io(e),
        })?;
        if !meta.is_file() {
            return Err(Error::InvalidInput(format!("Not an image file: {}", path.display())));
        }

        let data = tokio::fs::read(path).await?;
        let png_base64 = tokio::task::spawn_blocking(move || prepare_image(&data, max_edge))
            .await
            .map_err(|e| Error::Image(format!("Image worker failed: {}", e)))??;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!("[vlm] Prepared {} ({} base64 bytes)", name, png_base64.len());
        Ok(Self { name, png_base64 })
    }
}

/// Vision-language model resident in the runtime.
pub struct VlmEngine {
    runtime: RuntimeClient,
    model_id: String,
}

impl VlmEngine {
    /// Verify the weights exist, then pin them in memory.
    pub async fn load(runtime: RuntimeClient, model_id: &str) -> Result<Self> {
        info!("[vlm] Loading {}...", model_id);
        let t0 = Instant::now();

        runtime
            .show(model_id)
            .await
            .map_err(|e| Error::FatalInit(format!("Vision model '{}' unavailable: {}", model_id, e)))?;
        runtime
            .pin(model_id)
            .await
            .map_err(|e| Error::FatalInit(format!("Failed to load vision model '{}': {}", model_id, e)))?;

        info!("[vlm] Model loaded in {:.1}s", t0.elapsed().as_secs_f64());

        Ok(VlmEngine {
            runtime,
            model_id: model_id.to_string(),
        })
    }
}

#[async_trait]
impl VisionModel for VlmEngine {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn describe(
        &mut self,
        image: &PreparedImage,
        instruction: &str,
        params: &GenerationParams,
    ) -> Result<ChatResult> {
        debug!("[vlm] Describing {}", image.name);
        let turn = image_turn(instruction, image.png_base64.clone());
        let resp = self
            .runtime
            .chat(&self.model_id, std::slice::from_ref(&turn), params)
            .await
            .map_err(|e| Error::Generation(e.to_string()))?;

        let text = resp.message.content.trim().to_string();
        if text.is_empty() {
            return Err(Error::Generation(format!("{} returned an empty caption", self.model_id)));
        }

        info!(
            "[vlm] Generated {} tokens ({:.0}ms prefill, {:.1} tok/s)",
            resp.stats.eval_count,
            resp.stats.prefill_ms(),
            resp.stats.decode_tps()
        );

        Ok(ChatResult {
            text,
            prompt_tokens: resp.stats.prompt_eval_count,
            completion_tokens: resp.stats.eval_count,
            prefill_ms: resp.stats.prefill_ms(),
            decode_tps: resp.stats.decode_tps(),
        })
    }

    async fn release(&mut self) -> Result<()> {
        info!("[vlm] Unloading {}", self.model_id);
        self.runtime.unload(&self.model_id).await
    }
}

/// Single user turn carrying the image and its instruction.
fn image_turn(instruction: &str, image_b64: String) -> RuntimeMessage {
    RuntimeMessage {
        role: "user".to_string(),
        content: instruction.to_string(),
        images: vec![image_b64],
    }
}

/// Decode, shrink so the longest edge is at most `max_edge`, re-encode as
/// base64 PNG. Bytes that are not a supported image are invalid input.
pub fn prepare_image(data: &[u8], max_edge: u32) -> Result<String> {
    let img = image::load_from_memory(data)
        .map_err(|e| Error::InvalidInput(format!("Image decode error: {}", e)))?;

    let (width, height) = img.dimensions();
    let img = if width.max(height) > max_edge {
        img.resize(max_edge, max_edge, FilterType::Lanczos3)
    } else {
        img
    };

    let mut png = Cursor::new(Vec::new());
    img.write_to(&mut png, ImageFormat::Png)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(png.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_pixel(width, height, Rgb([200u8, 40, 40]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn decode(b64: &str) -> image::DynamicImage {
        let bytes = base64::engine::general_purpose::STANDARD.decode(b64).unwrap();
        image::load_from_memory(&bytes).unwrap()
    }

    #[test]
    fn large_images_are_downscaled_keeping_aspect() {
        let encoded = prepare_image(&png_bytes(2000, 1000), 1024).unwrap();
        assert_eq!(decode(&encoded).dimensions(), (1024, 512));
    }

    #[test]
    fn small_images_are_untouched() {
        let encoded = prepare_image(&png_bytes(64, 48), 1024).unwrap();
        assert_eq!(decode(&encoded).dimensions(), (64, 48));
    }

    #[test]
    fn garbage_is_invalid_input() {
        let err = prepare_image(b"definitely not an image", 1024).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn load_prepares_a_real_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.png");
        std::fs::write(&path, png_bytes(300, 100)).unwrap();

        let prepared = PreparedImage::load(&path, 150).await.unwrap();
        assert_eq!(prepared.name, "wide.png");
        assert_eq!(decode(&prepared.png_base64).dimensions(), (150, 50));
    }

    #[tokio::test]
    async fn load_rejects_text_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let notes = dir.path().join("notes.jpg");
        std::fs::write(&notes, "just some text").unwrap();

        let err = PreparedImage::load(&notes, DEFAULT_MAX_EDGE).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        let err = PreparedImage::load(dir.path(), DEFAULT_MAX_EDGE).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        let err = PreparedImage::load(&dir.path().join("gone.png"), DEFAULT_MAX_EDGE)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn turn_pairs_instruction_with_image() {
        let turn = image_turn("Describe this image.", "aGVsbG8=".to_string());
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "Describe this image.");
        assert_eq!(json["images"][0], "aGVsbG8=");
    }
}
