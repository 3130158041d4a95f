// ============================================================
// Layer 4 — Image Loader
// ============================================================
// Decode → grayscale → resize → normalize, done lazily when a
// batch is assembled. Output is a row-major Vec<f32> of length
// width * height with values in [0, 1].

use image::imageops::FilterType;
use std::path::Path;

/// Decodes images into normalized single-channel pixel buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLoader {
    width:  u32,
    height: u32,
}

impl ImageLoader {
    /// `target_size` is (width, height).
    pub fn new(target_size: (u32, u32)) -> Self {
        Self { width: target_size.0, height: target_size.1 }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Load one file. Any decode error is returned to the caller,
    /// which decides whether to skip the record.
    pub fn load(&self, path: &Path) -> Result<Vec<f32>, image::ImageError> {
        let img = image::open(path)?;
        let gray = img
            .resize_exact(self.width, self.height, FilterType::Triangle)
            .to_luma8();
        Ok(gray.into_raw().into_iter().map(|p| p as f32 / 255.0).collect())
    }
}
