//! The pipeline run: scan → fingerprint (parallel, cache-backed) →
//! cluster → score → keeper selection → relocation plan.
//!
//! Per-image work is embarrassingly parallel and runs on the rayon pool;
//! each worker owns its own decode buffer. Results are collected at a
//! barrier before clustering, and cache writes are funneled through that
//! single collection point so no torn entry can be written. Quality
//! metrics are only computed for members of multi-image clusters, since
//! singletons never need a keeper decision.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use image::ImageReader;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::cache::{CACHE_FILE, CacheKey, FingerprintCache};
use crate::cluster::{average_similarity, group_by_similarity, select_keeper};
use crate::error::CullError;
use crate::fingerprint::{self, Fingerprint};
use crate::quality::{self, QualityScore};

/// Subdirectory (relative to the input root) that non-keepers move into.
pub const DUPLICATES_DIR: &str = "duplicates";

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Similarity threshold percentage in [0, 100], inclusive.
    pub threshold: f64,
    /// Edge of the DCT transform grid; 24 → 576-bit fingerprints.
    pub grid: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threshold: 70.0,
            grid: fingerprint::DEFAULT_GRID,
        }
    }
}

/// One scored member of a cluster.
#[derive(Debug, Clone)]
pub struct ClusterMember {
    pub path: PathBuf,
    pub quality: Option<QualityScore>,
}

impl ClusterMember {
    pub fn score(&self) -> Option<f64> {
        self.quality.map(|q| q.score())
    }
}

#[derive(Debug, Clone)]
pub struct ClusterReport {
    pub members: Vec<ClusterMember>,
    /// Index into `members`; `None` only when every member lost its
    /// quality score to a decode failure.
    pub keeper: Option<usize>,
    pub average_similarity: f64,
}

/// A non-keeper to relocate: source file and destination directory name
/// relative to the input root.
#[derive(Debug, Clone)]
pub struct Relocation {
    pub source: PathBuf,
    pub dest_dir: String,
}

/// An image excluded from the run, with the reason.
#[derive(Debug, Clone)]
pub struct Skip {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct RunReport {
    /// All clusters, singletons included; every fingerprinted image is in
    /// exactly one. An image whose quality pass later failed stays in its
    /// cluster as an unscored member and is also listed in `skipped`.
    pub clusters: Vec<ClusterReport>,
    pub relocations: Vec<Relocation>,
    pub skipped: Vec<Skip>,
    pub cache_hits: usize,
    pub cache_corrupt_lines: usize,
}

impl RunReport {
    /// Clusters holding more than one image.
    pub fn duplicate_clusters(&self) -> impl Iterator<Item = &ClusterReport> {
        self.clusters.iter().filter(|c| c.members.len() > 1)
    }
}

/// Recursively walk `dir`, returning a sorted list of image file paths.
pub fn scan_directory(dir: &Path) -> Result<Vec<PathBuf>> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message("Scanning for images…");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let allowed_exts = ["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp"];
    let mut images = Vec::new();
    for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        if path.is_file() {
            if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
                if allowed_exts.contains(&ext.to_lowercase().as_str()) {
                    images.push(path.to_path_buf());
                }
            }
        }
        spinner.tick();
    }
    spinner.finish_and_clear();

    // Sorted so fingerprint indices (and thus cluster order) are stable
    // across runs on the same tree.
    images.sort();
    Ok(images)
}

fn decode_gray(path: &Path) -> Result<image::GrayImage, CullError> {
    let img = ImageReader::open(path)
        .map_err(|err| CullError::Decode {
            path: path.to_path_buf(),
            source: image::ImageError::IoError(err),
        })?
        .decode()
        .map_err(|err| CullError::Decode {
            path: path.to_path_buf(),
            source: err,
        })?;
    let gray = img.to_luma8();
    if gray.width() == 0 || gray.height() == 0 {
        return Err(CullError::InvalidImage);
    }
    Ok(gray)
}

enum HashOutcome {
    Done {
        path: PathBuf,
        key: CacheKey,
        fingerprint: Fingerprint,
        from_cache: bool,
    },
    Skipped(Skip),
}

/// Run the full analysis over `root` and produce the relocation plan.
///
/// Individual decode failures are reported in `RunReport::skipped` and
/// never abort the run; an out-of-range threshold fails before any image
/// is touched.
pub fn run(root: &Path, config: PipelineConfig) -> Result<RunReport> {
    if !(0.0..=100.0).contains(&config.threshold) || config.threshold.is_nan() {
        return Err(CullError::InvalidThreshold(config.threshold).into());
    }

    let images = scan_directory(root)?;
    let cache_path = root.join(CACHE_FILE);
    let mut cache = FingerprintCache::load(&cache_path)?;

    // Phase 1: fingerprints, in parallel, read-through the cache.
    let bar = ProgressBar::new(images.len() as u64);
    bar.set_style(ProgressStyle::with_template(
        "{bar:40.green} {pos}/{len} hashing",
    )?);
    let outcomes: Vec<HashOutcome> = images
        .par_iter()
        .map(|path| {
            let out = hash_one(path, &cache, config.grid);
            bar.inc(1);
            out
        })
        .collect();
    bar.finish_and_clear();

    // Barrier: fold results, funnel cache writes through this one point.
    let mut records: Vec<(PathBuf, Fingerprint)> = Vec::with_capacity(outcomes.len());
    let mut report = RunReport {
        cache_corrupt_lines: cache.corrupt_lines(),
        ..RunReport::default()
    };
    for outcome in outcomes {
        match outcome {
            HashOutcome::Done {
                path,
                key,
                fingerprint,
                from_cache,
            } => {
                if from_cache {
                    report.cache_hits += 1;
                } else {
                    cache.put(path.clone(), key, fingerprint.clone());
                }
                records.push((path, fingerprint));
            }
            HashOutcome::Skipped(skip) => report.skipped.push(skip),
        }
    }
    cache
        .save(&cache_path)
        .with_context(|| format!("failed to persist cache {}", cache_path.display()))?;

    // Phase 2: clustering over the complete fingerprint set.
    let fingerprints: Vec<Fingerprint> = records.iter().map(|(_, fp)| fp.clone()).collect();
    let clusters = group_by_similarity(&fingerprints, config.threshold)?;

    // Phase 3: quality metrics, only where a keeper decision is needed.
    let mut scoring: Vec<usize> = clusters
        .iter()
        .filter(|c| c.len() > 1)
        .flatten()
        .copied()
        .collect();
    scoring.sort_unstable();
    let bar = ProgressBar::new(scoring.len() as u64);
    bar.set_style(ProgressStyle::with_template(
        "{bar:40.green} {pos}/{len} scoring",
    )?);
    let scored: Vec<(usize, Result<QualityScore, CullError>)> = scoring
        .par_iter()
        .map(|&idx| {
            let quality = decode_gray(&records[idx].0).and_then(|gray| quality::analyze(&gray));
            bar.inc(1);
            (idx, quality)
        })
        .collect();
    bar.finish_and_clear();

    let mut qualities: Vec<Option<QualityScore>> = vec![None; records.len()];
    for (idx, quality) in scored {
        match quality {
            Ok(q) => qualities[idx] = Some(q),
            Err(err) => {
                report.skipped.push(Skip {
                    path: records[idx].0.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }

    // Phase 4: keeper per cluster, relocation plan for the rest.
    for member_ids in &clusters {
        let average = average_similarity(&fingerprints, member_ids)?;
        let members: Vec<ClusterMember> = member_ids
            .iter()
            .map(|&idx| ClusterMember {
                path: records[idx].0.clone(),
                quality: qualities[idx],
            })
            .collect();

        let candidates: Vec<(&Path, f64)> = members
            .iter()
            .filter_map(|m| m.score().map(|s| (m.path.as_path(), s)))
            .collect();
        let keeper_path = select_keeper(&candidates).map(|i| candidates[i].0.to_path_buf());
        let keeper = keeper_path
            .as_ref()
            .and_then(|kp| members.iter().position(|m| &m.path == kp));

        if member_ids.len() > 1 {
            if let Some(keeper_idx) = keeper {
                for (pos, member) in members.iter().enumerate() {
                    // An image whose quality pass failed is left in place,
                    // like any other skipped image.
                    if pos != keeper_idx && member.quality.is_some() {
                        report.relocations.push(Relocation {
                            source: member.path.clone(),
                            dest_dir: DUPLICATES_DIR.to_string(),
                        });
                    }
                }
            }
        }

        report.clusters.push(ClusterReport {
            members,
            keeper,
            average_similarity: average,
        });
    }

    Ok(report)
}

fn hash_one(path: &Path, cache: &FingerprintCache, grid: u32) -> HashOutcome {
    let key = match CacheKey::for_file(path) {
        Ok(key) => key,
        Err(err) => {
            return HashOutcome::Skipped(Skip {
                path: path.to_path_buf(),
                reason: err.to_string(),
            });
        }
    };

    // An entry hashed at a different grid size is useless for this run;
    // recompute rather than hand mixed bit lengths to the grouper.
    if let Some(fp) = cache.get(path, key) {
        if fp.bit_len() == (grid * grid) as usize {
            return HashOutcome::Done {
                path: path.to_path_buf(),
                key,
                fingerprint: fp.clone(),
                from_cache: true,
            };
        }
    }

    match decode_gray(path).and_then(|gray| fingerprint::phash(&gray, grid)) {
        Ok(fingerprint) => HashOutcome::Done {
            path: path.to_path_buf(),
            key,
            fingerprint,
            from_cache: false,
        },
        Err(err) => HashOutcome::Skipped(Skip {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }),
    }
}
