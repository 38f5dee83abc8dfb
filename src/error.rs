use std::path::PathBuf;
use thiserror::Error;

/// Error kinds for the culling core.
///
/// Per-image failures (`Decode`, `InvalidImage`) are isolated: the pipeline
/// records them as skips and keeps going. `InvalidThreshold` is a
/// configuration error and fails the run before any image is touched.
/// `CacheCorruption` is advisory; a corrupt entry is treated as a miss.
#[derive(Debug, Error)]
pub enum CullError {
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("degenerate image: zero width or height")]
    InvalidImage,

    #[error("invalid threshold {0}: must be within 0..=100")]
    InvalidThreshold(f64),

    #[error("malformed cache entry at line {line}")]
    CacheCorruption { line: usize },

    #[error("cannot compare fingerprints of {left} and {right} bits")]
    HashSizeMismatch { left: usize, right: usize },
}

pub type Result<T, E = CullError> = std::result::Result<T, E>;
