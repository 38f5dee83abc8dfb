//! End-to-end runs over small generated PNG trees.

use std::fs;
use std::path::Path;

use image::{GrayImage, Luma};
use snapcull::cache::CACHE_FILE;
use snapcull::pipeline::{self, DUPLICATES_DIR, PipelineConfig};

/// Deterministic high-frequency test pattern.
fn noisy_pattern(w: u32, h: u32) -> GrayImage {
    GrayImage::from_fn(w, h, |x, y| {
        let v = (x.wrapping_mul(31) ^ y.wrapping_mul(57)).wrapping_add(x * y / 7);
        Luma([(v % 256) as u8])
    })
}

fn inverted(img: &GrayImage) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        Luma([255 - img.get_pixel(x, y)[0]])
    })
}

/// 3×3 box blur, interior only, borders copied.
fn blurred(img: &GrayImage) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        if x == 0 || y == 0 || x == img.width() - 1 || y == img.height() - 1 {
            return *img.get_pixel(x, y);
        }
        let mut sum = 0u32;
        for dy in 0..3 {
            for dx in 0..3 {
                sum += img.get_pixel(x + dx - 1, y + dy - 1)[0] as u32;
            }
        }
        Luma([(sum / 9) as u8])
    })
}

fn save(img: &GrayImage, path: &Path) {
    img.save(path).unwrap();
}

fn config(threshold: f64) -> PipelineConfig {
    PipelineConfig {
        threshold,
        ..PipelineConfig::default()
    }
}

#[test]
fn identical_copies_cluster_and_one_is_relocated() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let pattern = noisy_pattern(64, 64);
    save(&pattern, &root.join("base.png"));
    save(&pattern, &root.join("copy.png"));
    save(&inverted(&pattern), &root.join("unrelated.png"));

    let report = pipeline::run(root, config(95.0)).unwrap();

    // Clusters partition the input: {base, copy} plus a singleton.
    let sizes: Vec<usize> = report.clusters.iter().map(|c| c.members.len()).collect();
    assert_eq!(report.clusters.iter().map(|c| c.members.len()).sum::<usize>(), 3);
    assert!(sizes.contains(&2), "expected a duplicate pair, got {sizes:?}");
    assert!(sizes.contains(&1), "expected a singleton, got {sizes:?}");

    let pair = report.duplicate_clusters().next().unwrap();
    assert_eq!(pair.average_similarity, 100.0);

    // Identical pixels give identical scores; the tie breaks to the
    // lexicographically smaller path, so copy.png is the one to move.
    let keeper = pair.keeper.unwrap();
    assert!(pair.members[keeper].path.ends_with("base.png"));
    assert_eq!(report.relocations.len(), 1);
    assert!(report.relocations[0].source.ends_with("copy.png"));
    assert_eq!(report.relocations[0].dest_dir, DUPLICATES_DIR);
    assert!(report.skipped.is_empty());
}

/// Coarse blocks (stable low frequencies) overlaid with a fine checker
/// (high-frequency detail that blurring destroys).
fn detailed_blocks(w: u32, h: u32) -> GrayImage {
    GrayImage::from_fn(w, h, |x, y| {
        let base = if (x / 12 + y / 12) % 2 == 0 { 60 } else { 180 };
        let detail = if (x ^ y) % 2 == 0 { 0 } else { 40 };
        Luma([base + detail])
    })
}

#[test]
fn sharper_image_is_kept_over_its_blur() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let sharp = detailed_blocks(96, 96);
    save(&sharp, &root.join("sharp.png"));
    save(&blurred(&sharp), &root.join("soft.png"));

    let report = pipeline::run(root, config(70.0)).unwrap();

    let pair = report.duplicate_clusters().next().expect("blur should group with its source");
    let keeper = pair.keeper.unwrap();
    assert!(
        pair.members[keeper].path.ends_with("sharp.png"),
        "keeper was {:?}",
        pair.members[keeper].path
    );
    assert!(report.relocations[0].source.ends_with("soft.png"));
}

#[test]
fn second_run_hits_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let pattern = noisy_pattern(48, 48);
    save(&pattern, &root.join("a.png"));
    save(&inverted(&pattern), &root.join("b.png"));

    let first = pipeline::run(root, config(70.0)).unwrap();
    assert_eq!(first.cache_hits, 0);
    assert!(root.join(CACHE_FILE).exists());

    let second = pipeline::run(root, config(70.0)).unwrap();
    assert_eq!(second.cache_hits, 2);

    // Cache reuse never changes results, only cost.
    let first_sizes: Vec<usize> = first.clusters.iter().map(|c| c.members.len()).collect();
    let second_sizes: Vec<usize> = second.clusters.iter().map(|c| c.members.len()).collect();
    assert_eq!(first_sizes, second_sizes);
}

#[test]
fn modified_file_invalidates_its_cache_entry() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    save(&noisy_pattern(48, 48), &root.join("a.png"));

    pipeline::run(root, config(70.0)).unwrap();

    // Rewrite with different content; the stale entry must not be served.
    save(&inverted(&noisy_pattern(56, 56)), &root.join("a.png"));
    let report = pipeline::run(root, config(70.0)).unwrap();
    assert_eq!(report.cache_hits, 0);
}

#[test]
fn changed_hash_size_invalidates_cached_fingerprints() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let pattern = noisy_pattern(48, 48);
    save(&pattern, &root.join("a.png"));
    pipeline::run(root, config(70.0)).unwrap();

    // A second image gets freshly hashed at the new grid; the stale
    // 576-bit entry must be a miss, not a mixed-length comparison.
    save(&inverted(&pattern), &root.join("b.png"));
    let small_grid = PipelineConfig {
        threshold: 70.0,
        grid: 16,
    };
    let report = pipeline::run(root, small_grid).unwrap();
    assert_eq!(report.cache_hits, 0);
    assert_eq!(
        report.clusters.iter().map(|c| c.members.len()).sum::<usize>(),
        2
    );

    // Same grid again: both 256-bit entries now serve from cache.
    let rerun = pipeline::run(root, small_grid).unwrap();
    assert_eq!(rerun.cache_hits, 2);
}

#[test]
fn corrupt_cache_is_ignored_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    save(&noisy_pattern(48, 48), &root.join("a.png"));
    fs::write(root.join(CACHE_FILE), "garbage\nmore\tgarbage\n").unwrap();

    let report = pipeline::run(root, config(70.0)).unwrap();
    assert_eq!(report.cache_corrupt_lines, 2);
    assert_eq!(report.clusters.len(), 1);
}

#[test]
fn unreadable_image_is_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let pattern = noisy_pattern(64, 64);
    save(&pattern, &root.join("base.png"));
    save(&pattern, &root.join("copy.png"));
    fs::write(root.join("broken.jpg"), b"this is not a jpeg").unwrap();

    let report = pipeline::run(root, config(70.0)).unwrap();

    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].path.ends_with("broken.jpg"));
    // The rest of the run is unaffected.
    assert_eq!(report.relocations.len(), 1);
}

#[test]
fn out_of_range_threshold_fails_before_processing() {
    let dir = tempfile::tempdir().unwrap();
    assert!(pipeline::run(dir.path(), config(101.0)).is_err());
    assert!(pipeline::run(dir.path(), config(-0.5)).is_err());
}

#[test]
fn empty_directory_is_a_clean_empty_run() {
    let dir = tempfile::tempdir().unwrap();
    let report = pipeline::run(dir.path(), config(70.0)).unwrap();
    assert!(report.clusters.is_empty());
    assert!(report.relocations.is_empty());
    assert!(report.skipped.is_empty());
}

#[test]
fn reruns_pick_the_same_keeper() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let pattern = noisy_pattern(64, 64);
    save(&pattern, &root.join("one.png"));
    save(&pattern, &root.join("two.png"));

    let first = pipeline::run(root, config(90.0)).unwrap();
    let second = pipeline::run(root, config(90.0)).unwrap();

    let keeper_path = |r: &pipeline::RunReport| {
        let c = r.duplicate_clusters().next().unwrap();
        c.members[c.keeper.unwrap()].path.clone()
    };
    assert_eq!(keeper_path(&first), keeper_path(&second));
}
