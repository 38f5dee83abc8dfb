//! snapcull: group visually near-duplicate photos, score their technical
//! quality, keep the best of each group, and relocate the rest.

pub mod cache;
pub mod cluster;
pub mod error;
pub mod fingerprint;
pub mod history;
pub mod pipeline;
pub mod quality;

pub use error::CullError;
pub use fingerprint::Fingerprint;
pub use pipeline::{PipelineConfig, RunReport};
pub use quality::QualityScore;
