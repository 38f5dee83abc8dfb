//! Objective quality metrics derived from decoded pixels.
//!
//! Three scalars per image: sharpness (variance of the Laplacian
//! response), noise (standard deviation of the high-frequency residual
//! after a 3×3 Gaussian blur), and texture (density of strong Sobel
//! edges, in [0, 1]). The composite ranking key is the plain sum
//! `sharpness - noise + texture`; keeper selection depends on this exact
//! formula staying additive and unweighted.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::error::{CullError, Result};

/// Sobel gradient magnitude at or above this counts as an edge pixel.
const EDGE_MAGNITUDE: f64 = 128.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    /// Variance of the Laplacian response; higher means clearer edges.
    pub sharpness: f64,
    /// Std. dev. of the high-frequency residual; lower means cleaner.
    pub noise: f64,
    /// Fraction of pixels classified as edge, in [0, 1].
    pub texture: f64,
}

impl QualityScore {
    /// Composite ranking key. Not a calibrated perceptual metric.
    pub fn score(&self) -> f64 {
        self.sharpness - self.noise + self.texture
    }
}

/// Compute sharpness, noise, and texture for a grayscale image.
pub fn analyze(gray: &GrayImage) -> Result<QualityScore> {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return Err(CullError::InvalidImage);
    }

    Ok(QualityScore {
        sharpness: laplacian_variance(gray),
        noise: residual_stddev(gray),
        texture: edge_density(gray),
    })
}

#[inline]
fn px(gray: &GrayImage, x: u32, y: u32) -> f64 {
    gray.get_pixel(x, y)[0] as f64
}

/// Clamped-coordinate fetch; replicates the border pixel outside the grid.
#[inline]
fn px_clamped(gray: &GrayImage, x: i64, y: i64) -> f64 {
    let (w, h) = gray.dimensions();
    let cx = x.clamp(0, w as i64 - 1) as u32;
    let cy = y.clamp(0, h as i64 - 1) as u32;
    gray.get_pixel(cx, cy)[0] as f64
}

/// Variance of the 4-neighbor Laplacian over interior pixels. Images too
/// small to have an interior score 0.0.
fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let count = ((w - 2) * (h - 2)) as f64;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let response = 4.0 * px(gray, x, y)
                - px(gray, x - 1, y)
                - px(gray, x + 1, y)
                - px(gray, x, y - 1)
                - px(gray, x, y + 1);
            sum += response;
            sum_sq += response * response;
        }
    }

    let mean = sum / count;
    sum_sq / count - mean * mean
}

/// Standard deviation of `pixel - gaussian3x3(pixel)` over the whole grid,
/// borders replicated. The residual is kept signed.
fn residual_stddev(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    let count = (w * h) as f64;

    // 3×3 Gaussian, 1/16 * [1 2 1; 2 4 2; 1 2 1].
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            let blurred = (px_clamped(gray, x - 1, y - 1)
                + 2.0 * px_clamped(gray, x, y - 1)
                + px_clamped(gray, x + 1, y - 1)
                + 2.0 * px_clamped(gray, x - 1, y)
                + 4.0 * px_clamped(gray, x, y)
                + 2.0 * px_clamped(gray, x + 1, y)
                + px_clamped(gray, x - 1, y + 1)
                + 2.0 * px_clamped(gray, x, y + 1)
                + px_clamped(gray, x + 1, y + 1))
                / 16.0;
            let residual = px_clamped(gray, x, y) - blurred;
            sum += residual;
            sum_sq += residual * residual;
        }
    }

    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0).sqrt()
}

/// Fraction of interior pixels whose Sobel gradient magnitude reaches
/// `EDGE_MAGNITUDE`. Interior-only keeps the density independent of how
/// borders would be padded.
fn edge_density(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let mut edges = 0u64;
    let total = ((w - 2) * (h - 2)) as f64;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let gx = px(gray, x + 1, y - 1) + 2.0 * px(gray, x + 1, y) + px(gray, x + 1, y + 1)
                - px(gray, x - 1, y - 1)
                - 2.0 * px(gray, x - 1, y)
                - px(gray, x - 1, y + 1);
            let gy = px(gray, x - 1, y + 1) + 2.0 * px(gray, x, y + 1) + px(gray, x + 1, y + 1)
                - px(gray, x - 1, y - 1)
                - 2.0 * px(gray, x, y - 1)
                - px(gray, x + 1, y - 1);
            if (gx * gx + gy * gy).sqrt() >= EDGE_MAGNITUDE {
                edges += 1;
            }
        }
    }
    edges as f64 / total
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn uniform(w: u32, h: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(w, h, Luma([value]))
    }

    #[test]
    fn uniform_image_scores_zero_everywhere() {
        let q = analyze(&uniform(16, 16, 128)).unwrap();
        assert_eq!(q.sharpness, 0.0);
        assert_eq!(q.noise, 0.0);
        assert_eq!(q.texture, 0.0);
        assert_eq!(q.score(), 0.0);
    }

    #[test]
    fn empty_image_rejected() {
        assert!(matches!(
            analyze(&GrayImage::new(0, 0)),
            Err(CullError::InvalidImage)
        ));
    }

    #[test]
    fn checkerboard_beats_uniform_on_sharpness() {
        let board = GrayImage::from_fn(16, 16, |x, y| {
            Luma([if (x + y) % 2 == 0 { 0 } else { 255 }])
        });
        let q = analyze(&board).unwrap();
        assert!(q.sharpness > 0.0);
        assert!(q.noise > 0.0);
    }

    #[test]
    fn wide_stripes_are_all_edge() {
        // Period-4 vertical stripes: the Sobel x-gradient straddles a
        // boundary at every interior pixel.
        let stripes =
            GrayImage::from_fn(20, 20, |x, _| Luma([if (x / 2) % 2 == 0 { 0 } else { 255 }]));
        let q = analyze(&stripes).unwrap();
        assert!((q.texture - 1.0).abs() < 1e-12);
        assert!((0.0..=1.0).contains(&q.texture));
    }

    #[test]
    fn smooth_gradient_has_low_texture() {
        let ramp = GrayImage::from_fn(32, 32, |x, _| Luma([(x * 4) as u8]));
        let q = analyze(&ramp).unwrap();
        // 4-per-pixel horizontal ramp: |gx| = 16, far below the edge cutoff.
        assert_eq!(q.texture, 0.0);
    }

    #[test]
    fn composite_is_exact_additive_formula() {
        let q = QualityScore {
            sharpness: 120.0,
            noise: 5.0,
            texture: 0.3,
        };
        assert!((q.score() - 115.3).abs() < 1e-9);
    }

    #[test]
    fn tiny_image_degrades_gracefully() {
        let q = analyze(&uniform(2, 2, 10)).unwrap();
        assert_eq!(q.sharpness, 0.0);
        assert_eq!(q.texture, 0.0);
    }
}
