//! Perceptual fingerprinting: a DCT-based binary hash plus Hamming
//! similarity.
//!
//! The fingerprint is a `grid × grid` bit matrix (576 bits at the default
//! grid of 24) taken from the low-frequency corner of a 2-D DCT over the
//! downsampled image. Two fingerprints are only comparable when they were
//! produced with the same grid size; mismatched lengths are an error, not
//! a truncation.

use std::f64::consts::PI;
use std::fmt;

use image::GrayImage;
use image::imageops::{self, FilterType};

use crate::error::{CullError, Result};

/// Default transform grid edge; 24×24 retained coefficients = 576 bits.
pub const DEFAULT_GRID: u32 = 24;

/// Oversampling factor applied before the DCT. The image is resampled to
/// `grid * DCT_OVERSAMPLE` on a side so the retained block is a genuine
/// low-frequency cut rather than the whole spectrum.
const DCT_OVERSAMPLE: u32 = 4;

/// Fixed-length perceptual fingerprint, bits packed MSB-first per byte in
/// row-major coefficient order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    bits: Vec<u8>,
    bit_len: usize,
}

impl Fingerprint {
    /// Pack a bit sequence into a fingerprint. Trailing padding bits in the
    /// last byte are always zero.
    pub fn from_bits(bits: &[bool]) -> Self {
        let mut packed = vec![0u8; bits.len().div_ceil(8)];
        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                packed[i / 8] |= 0x80 >> (i % 8);
            }
        }
        Self {
            bits: packed,
            bit_len: bits.len(),
        }
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Count of differing bit positions. Errors on mismatched lengths.
    pub fn hamming(&self, other: &Fingerprint) -> Result<u32> {
        if self.bit_len != other.bit_len {
            return Err(CullError::HashSizeMismatch {
                left: self.bit_len,
                right: other.bit_len,
            });
        }
        Ok(self
            .bits
            .iter()
            .zip(&other.bits)
            .map(|(a, b)| (a ^ b).count_ones())
            .sum())
    }

    /// Similarity percentage in [0, 100]:
    /// `100 * (1 - hamming / bit_len)`. `similarity(a, a)` is exactly 100.
    pub fn similarity(&self, other: &Fingerprint) -> Result<f64> {
        let dist = self.hamming(other)?;
        Ok(100.0 * (1.0 - dist as f64 / self.bit_len as f64))
    }

    /// Serialize as `<bit_len>:<hex>`. Round-trips exactly through
    /// [`Fingerprint::from_hex`].
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(self.bits.len() * 2 + 8);
        out.push_str(&self.bit_len.to_string());
        out.push(':');
        for byte in &self.bits {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    /// Parse the `<bit_len>:<hex>` form. `None` on any malformation,
    /// including padding bits that should be zero but are not.
    pub fn from_hex(s: &str) -> Option<Self> {
        let (len_str, hex) = s.split_once(':')?;
        let bit_len: usize = len_str.parse().ok()?;
        if bit_len == 0 || hex.len() != bit_len.div_ceil(8) * 2 {
            return None;
        }
        let mut bits = Vec::with_capacity(hex.len() / 2);
        for chunk in hex.as_bytes().chunks(2) {
            let pair = std::str::from_utf8(chunk).ok()?;
            bits.push(u8::from_str_radix(pair, 16).ok()?);
        }
        // Reject set bits beyond bit_len so equality stays meaningful.
        let tail = bit_len % 8;
        if tail != 0 {
            let mask = 0xffu8 >> tail;
            if bits.last()? & mask != 0 {
                return None;
            }
        }
        Some(Self { bits, bit_len })
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Compute the perceptual hash of a grayscale image.
///
/// The image is resampled to `4*grid` on a side, transformed with a 2-D
/// DCT-II, and the top-left `grid × grid` low-frequency block is binarized
/// against the median of that block (1 where coefficient ≥ median), read
/// out row-major. Identical pixel input always yields an identical
/// fingerprint.
pub fn phash(gray: &GrayImage, grid: u32) -> Result<Fingerprint> {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 || grid == 0 {
        return Err(CullError::InvalidImage);
    }

    let side = grid * DCT_OVERSAMPLE;
    let small = imageops::resize(gray, side, side, FilterType::Lanczos3);

    let n = side as usize;
    let mut plane: Vec<f64> = Vec::with_capacity(n * n);
    for y in 0..side {
        for x in 0..side {
            plane.push(small.get_pixel(x, y)[0] as f64);
        }
    }

    let spectrum = dct_2d(&plane, n);

    let g = grid as usize;
    let mut retained = Vec::with_capacity(g * g);
    for row in 0..g {
        for col in 0..g {
            retained.push(spectrum[row * n + col]);
        }
    }

    let median = median_of(&retained);
    let bits: Vec<bool> = retained.iter().map(|&c| c >= median).collect();
    Ok(Fingerprint::from_bits(&bits))
}

/// Separable 2-D DCT-II over an `n × n` plane (unnormalized; only the
/// ordering of coefficients relative to their median matters here).
fn dct_2d(plane: &[f64], n: usize) -> Vec<f64> {
    // cos_table[k * n + x] = cos(pi * (2x + 1) * k / 2n)
    let mut cos_table = vec![0.0f64; n * n];
    for k in 0..n {
        for x in 0..n {
            cos_table[k * n + x] = (PI * (2 * x + 1) as f64 * k as f64 / (2 * n) as f64).cos();
        }
    }

    let mut rows = vec![0.0f64; n * n];
    for y in 0..n {
        for k in 0..n {
            let mut acc = 0.0;
            for x in 0..n {
                acc += plane[y * n + x] * cos_table[k * n + x];
            }
            rows[y * n + k] = acc;
        }
    }

    let mut out = vec![0.0f64; n * n];
    for k in 0..n {
        for col in 0..n {
            let mut acc = 0.0;
            for y in 0..n {
                acc += rows[y * n + col] * cos_table[k * n + y];
            }
            out[k * n + col] = acc;
        }
    }
    out
}

fn median_of(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("DCT coefficients are finite"));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
