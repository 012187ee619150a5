//! Images module: text-to-image generation for the `generate_image` function.
//!
//! [`ImageGenerator`] fans one request per description out to an
//! [`ImageBackend`] concurrently and writes every result to the image cache as
//! `<generation_id>_<index>.<ext>`. Denied, unauthorized and expired-session
//! failures leave a `None` in that slot; anything else fails the whole batch.

pub mod firefly;

pub use firefly::FireflyClient;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::ImageError;
use crate::Result;

/// File extensions the image service may hand back.
const CACHE_EXTENSIONS: [&str; 4] = ["jpeg", "jpg", "png", "webp"];

/// Requested image shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectRatio {
    #[default]
    Square,
    Landscape,
    Portrait,
    Widescreen,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 4] = [
        AspectRatio::Square,
        AspectRatio::Landscape,
        AspectRatio::Portrait,
        AspectRatio::Widescreen,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Square => "square",
            AspectRatio::Landscape => "landscape",
            AspectRatio::Portrait => "portrait",
            AspectRatio::Widescreen => "widescreen",
        }
    }

    /// Output size in pixels (width, height).
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            AspectRatio::Square => (2048, 2048),
            AspectRatio::Landscape => (2304, 1792),
            AspectRatio::Portrait => (1792, 2304),
            AspectRatio::Widescreen => (2688, 1536),
        }
    }
}

/// Raw image returned by the backend.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub extension: String,
}

/// Image generation service.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    async fn text_to_image(
        &self,
        description: &str,
        aspect_ratio: AspectRatio,
    ) -> std::result::Result<RenderedImage, ImageError>;
}

/// A generated image waiting in the cache for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub path: PathBuf,
}

impl GeneratedImage {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// True when no slot of a batch failed.
pub fn all_succeeded(images: &[Option<GeneratedImage>]) -> bool {
    images.iter().all(Option::is_some)
}

/// Generates image batches and manages the on-disk cache.
#[derive(Clone)]
pub struct ImageGenerator {
    backend: Arc<dyn ImageBackend>,
    cache_dir: PathBuf,
}

impl ImageGenerator {
    pub fn new(backend: Arc<dyn ImageBackend>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            cache_dir: cache_dir.into(),
        }
    }

    /// Cache location of one image of a batch.
    pub fn cache_path(&self, generation_id: &str, index: usize, extension: &str) -> PathBuf {
        self.cache_dir.join(format!("{}_{}.{}", generation_id, index, extension))
    }

    /// Generate one image per description, concurrently.
    ///
    /// The result has one slot per description, in order.
    pub async fn generate(
        &self,
        generation_id: &str,
        descriptions: &[String],
        aspect_ratio: AspectRatio,
    ) -> Result<Vec<Option<GeneratedImage>>> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;

        let tasks = descriptions.iter().enumerate().map(|(index, description)| {
            self.generate_one(generation_id, index, description, aspect_ratio)
        });

        let batch: Result<Vec<_>> = join_all(tasks).await.into_iter().collect();
        if batch.is_err() {
            // siblings may already be on disk
            self.clear_cache(generation_id, descriptions.len()).await;
        }
        batch
    }

    async fn generate_one(
        &self,
        generation_id: &str,
        index: usize,
        description: &str,
        aspect_ratio: AspectRatio,
    ) -> Result<Option<GeneratedImage>> {
        match self.backend.text_to_image(description, aspect_ratio).await {
            Ok(image) => {
                let path = self.cache_path(generation_id, index, &image.extension);
                tokio::fs::write(&path, &image.bytes).await?;
                info!("Successfully generated image {}_{}", generation_id, index);
                Ok(Some(GeneratedImage { path }))
            }
            Err(e) if e.is_permanent() => {
                error!("Could not generate image {}_{}: {}", generation_id, index, e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every cached file of a batch; missing files are fine.
    pub async fn clear_cache(&self, generation_id: &str, count: usize) {
        for index in 0..count {
            for extension in CACHE_EXTENSIONS {
                let path = self.cache_path(generation_id, index, extension);
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!("Failed to remove cached image {:?}: {}", path, e),
                }
            }
        }
    }
}

/// Fake image backend for testing.
///
/// Fails with `Denied` for descriptions listed in `deny`, and with a
/// non-permanent API error for those in `break_on`.
#[cfg(test)]
#[derive(Default)]
pub struct FakeImageBackend {
    pub deny: Vec<String>,
    pub break_on: Vec<String>,
    pub requests: std::sync::Mutex<Vec<(String, AspectRatio)>>,
}

#[cfg(test)]
impl FakeImageBackend {
    pub fn denying(deny: &[&str]) -> Self {
        Self {
            deny: deny.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl ImageBackend for FakeImageBackend {
    async fn text_to_image(
        &self,
        description: &str,
        aspect_ratio: AspectRatio,
    ) -> std::result::Result<RenderedImage, ImageError> {
        self.requests
            .lock()
            .unwrap()
            .push((description.to_string(), aspect_ratio));

        if self.deny.iter().any(|d| d == description) {
            return Err(ImageError::Denied(description.to_string()));
        }
        if self.break_on.iter().any(|d| d == description) {
            return Err(ImageError::Api { status: 500, body: "boom".to_string() });
        }

        Ok(RenderedImage {
            bytes: description.as_bytes().to_vec(),
            extension: "jpeg".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptions(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_batch_with_one_denial() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeImageBackend::denying(&["forbidden"]));
        let generator = ImageGenerator::new(backend.clone(), dir.path());

        let images = generator
            .generate("42", &descriptions(&["a cat", "forbidden", "a dog"]), AspectRatio::Landscape)
            .await
            .unwrap();

        assert_eq!(images.len(), 3);
        assert!(images[0].is_some());
        assert!(images[1].is_none());
        assert!(images[2].is_some());
        assert!(!all_succeeded(&images));
        assert_eq!(backend.request_count(), 3);

        let first = images[0].as_ref().unwrap();
        assert_eq!(first.file_name(), "42_0.jpeg");
        assert_eq!(std::fs::read(&first.path).unwrap(), b"a cat");
        assert_eq!(images[2].as_ref().unwrap().file_name(), "42_2.jpeg");
    }

    #[tokio::test]
    async fn test_unexpected_failure_fails_batch() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeImageBackend {
            break_on: vec!["glitch".to_string()],
            ..FakeImageBackend::default()
        });
        let generator = ImageGenerator::new(backend, dir.path());

        let result = generator
            .generate("7", &descriptions(&["fine", "glitch"]), AspectRatio::Square)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeImageBackend {
            break_on: vec!["glitch".to_string()],
            ..FakeImageBackend::default()
        });
        let generator = ImageGenerator::new(backend, dir.path());

        let result = generator
            .generate("8", &descriptions(&["fine", "glitch", "also fine"]), AspectRatio::Square)
            .await;
        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ImageGenerator::new(Arc::new(FakeImageBackend::default()), dir.path());

        let images = generator
            .generate("99", &descriptions(&["one", "two"]), AspectRatio::Square)
            .await
            .unwrap();
        assert!(all_succeeded(&images));
        let unrelated = generator.cache_path("100", 0, "jpeg");
        std::fs::write(&unrelated, b"keep").unwrap();

        generator.clear_cache("99", 2).await;

        for image in images.iter().flatten() {
            assert!(!image.path.exists());
        }
        assert!(unrelated.exists());
    }

    #[test]
    fn test_aspect_ratio_serde() {
        let parsed: AspectRatio = serde_json::from_str("\"widescreen\"").unwrap();
        assert_eq!(parsed, AspectRatio::Widescreen);
        assert_eq!(parsed.dimensions(), (2688, 1536));
        assert!(serde_json::from_str::<AspectRatio>("\"panorama\"").is_err());
        for ratio in AspectRatio::ALL {
            assert_eq!(serde_json::to_value(ratio).unwrap(), ratio.as_str());
        }
    }
}
