// ============================================================
// Layer 4 — Training-time Augmentation
// ============================================================
// Random transforms applied to the train split only:
//
//   1. Horizontal flip with probability `flip_probability`
//   2. Rotation by a uniform angle in ±`max_rotation_degrees`
//      (nearest-neighbour, uncovered pixels become 0.0)
//   3. Brightness shift by a uniform delta in ±`brightness_jitter`
//      then clamped back into [0, 1]
//
// Operates on the normalized row-major buffers produced by
// ImageLoader, so it needs no image crate types.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::domain::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AugmentationConfig {
    pub flip_probability:     f32,
    pub max_rotation_degrees: f32,
    pub brightness_jitter:    f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            flip_probability:     0.5,
            max_rotation_degrees: 10.0,
            brightness_jitter:    0.1,
        }
    }
}

impl AugmentationConfig {
    /// Identity transform.
    pub fn none() -> Self {
        Self {
            flip_probability:     0.0,
            max_rotation_degrees: 0.0,
            brightness_jitter:    0.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.flip_probability == 0.0
            && self.max_rotation_degrees == 0.0
            && self.brightness_jitter == 0.0
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.flip_probability) {
            return Err(PipelineError::Config(format!(
                "flip probability must be in [0, 1], got {}",
                self.flip_probability
            )));
        }
        if !(0.0..=180.0).contains(&self.max_rotation_degrees) {
            return Err(PipelineError::Config(format!(
                "max rotation must be in [0, 180] degrees, got {}",
                self.max_rotation_degrees
            )));
        }
        if !(0.0..=1.0).contains(&self.brightness_jitter) {
            return Err(PipelineError::Config(format!(
                "brightness jitter must be in [0, 1], got {}",
                self.brightness_jitter
            )));
        }
        Ok(())
    }

    /// Apply the configured transforms in place.
    pub fn apply<R: Rng>(&self, pixels: &mut [f32], width: usize, height: usize, rng: &mut R) {
        debug_assert_eq!(pixels.len(), width * height);

        if self.flip_probability > 0.0 && rng.gen::<f32>() < self.flip_probability {
            flip_horizontal(pixels, width);
        }

        if self.max_rotation_degrees > 0.0 {
            let max = self.max_rotation_degrees;
            let degrees = rng.gen_range(-max..=max);
            rotate(pixels, width, height, degrees);
        }

        if self.brightness_jitter > 0.0 {
            let j = self.brightness_jitter;
            let delta = rng.gen_range(-j..=j);
            for p in pixels.iter_mut() {
                *p = (*p + delta).clamp(0.0, 1.0);
            }
        }
    }
}

fn flip_horizontal(pixels: &mut [f32], width: usize) {
    for row in pixels.chunks_exact_mut(width) {
        row.reverse();
    }
}

fn rotate(pixels: &mut [f32], width: usize, height: usize, degrees: f32) {
    if degrees == 0.0 {
        return;
    }
    let (sin, cos) = degrees.to_radians().sin_cos();
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;
    let src = pixels.to_vec();

    for y in 0..height {
        for x in 0..width {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            // inverse mapping: where does this output pixel come from
            let sx = (cos * dx + sin * dy + cx).round();
            let sy = (-sin * dx + cos * dy + cy).round();
            pixels[y * width + x] = if sx >= 0.0 && sy >= 0.0 && (sx as usize) < width && (sy as usize) < height {
                src[sy as usize * width + sx as usize]
            } else {
                0.0
            };
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_identity_leaves_pixels_untouched() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let original: Vec<f32> = (0..16).map(|i| i as f32 / 16.0).collect();
        let mut pixels = original.clone();
        AugmentationConfig::none().apply(&mut pixels, 4, 4, &mut rng);
        assert_eq!(pixels, original);
    }

    #[test]
    fn test_certain_flip_mirrors_rows() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let cfg = AugmentationConfig { flip_probability: 1.0, ..AugmentationConfig::none() };
        let mut pixels = vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5];
        cfg.apply(&mut pixels, 3, 2, &mut rng);
        assert_eq!(pixels, vec![0.2, 0.1, 0.0, 0.5, 0.4, 0.3]);
    }

    #[test]
    fn test_brightness_stays_in_unit_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let cfg = AugmentationConfig { brightness_jitter: 1.0, ..AugmentationConfig::none() };
        for _ in 0..20 {
            let mut pixels = vec![0.0, 0.5, 1.0, 0.25];
            cfg.apply(&mut pixels, 2, 2, &mut rng);
            assert!(pixels.iter().all(|p| (0.0..=1.0).contains(p)));
        }
    }

    #[test]
    fn test_quarter_turn_moves_corner() {
        let mut pixels = vec![
            1.0, 0.0, 0.0,
            0.0, 0.0, 0.0,
            0.0, 0.0, 0.0,
        ];
        rotate(&mut pixels, 3, 3, 90.0);
        assert_eq!(pixels.iter().filter(|&&p| p == 1.0).count(), 1);
        assert_eq!(pixels[0], 0.0);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let bad = AugmentationConfig { flip_probability: 1.5, ..AugmentationConfig::default() };
        assert!(matches!(bad.validate(), Err(PipelineError::Config(_))));
        assert!(AugmentationConfig::default().validate().is_ok());
    }
}
