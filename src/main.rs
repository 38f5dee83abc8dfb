use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use snapcull::history;
use snapcull::pipeline::{self, ClusterReport, PipelineConfig, Relocation, RunReport};

#[derive(Parser, Debug)]
#[command(name = "snapcull", version, about = "Group near-duplicate photos and keep the best")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Directory to scan
    #[arg(short, long, value_name = "DIR")]
    path: PathBuf,

    /// Minimum similarity percentage to group images (0-100)
    #[arg(long, default_value_t = 70.0)]
    threshold: f64,

    /// Edge of the fingerprint transform grid (24 → 576-bit hashes)
    #[arg(long, default_value_t = snapcull::fingerprint::DEFAULT_GRID)]
    hash_size: u32,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Find duplicate groups and suggest which image to keep
    Scan {
        #[command(flatten)]
        args: AnalyzeArgs,
    },

    /// Move non-keepers into `<dir>/duplicates`
    Cull {
        #[command(flatten)]
        args: AnalyzeArgs,

        /// Only show what would be moved
        #[arg(long)]
        dry_run: bool,

        /// Directory to move duplicates into (default: `<dir>/duplicates`)
        #[arg(long, value_name = "DIR")]
        target_dir: Option<PathBuf>,
    },

    /// Work with cull history
    History {
        #[command(subcommand)]
        command: HistoryCmd,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCmd {
    /// List all cull history records
    List {
        /// Directory containing the photos
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
    },

    /// Restore moved files from history
    Restore {
        /// Directory containing the photos
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Restore a specific record index
        #[arg(long, conflicts_with = "all")]
        record: Option<usize>,
        /// Restore all records
        #[arg(long, conflicts_with = "record")]
        all: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { args } => {
            let report = analyze(&args)?;
            print_report(&report, true);
        }

        Commands::Cull {
            args,
            dry_run,
            target_dir,
        } => {
            let report = analyze(&args)?;
            print_report(&report, false);

            if report.relocations.is_empty() {
                println!("Nothing to cull.");
                return Ok(());
            }

            let dup_dir = target_dir.unwrap_or_else(|| args.path.join(pipeline::DUPLICATES_DIR));
            if dry_run {
                for item in &report.relocations {
                    println!(
                        "[dry-run] MOVE {} → {}",
                        item.source.display(),
                        dup_dir.display()
                    );
                }
                println!("\nDry-run only; no files were changed.");
                return Ok(());
            }

            fs::create_dir_all(&dup_dir)
                .with_context(|| format!("failed to create directory {}", dup_dir.display()))?;
            let mut history_out = history::open_for_append(&args.path)?;

            for cluster in report.duplicate_clusters() {
                let Some(keeper_idx) = cluster.keeper else {
                    continue;
                };
                let keeper = &cluster.members[keeper_idx];
                let mut culled = Vec::new();
                for item in cluster_relocations(cluster, &report.relocations) {
                    let dest = move_collision_safe(&item.source, &dup_dir)?;
                    println!("Moved {} → {}", item.source.display(), dest.display());
                    culled.push(history::CulledFile {
                        original: item.source.to_string_lossy().into_owned(),
                        moved_to: dest.to_string_lossy().into_owned(),
                    });
                }
                if !culled.is_empty() {
                    let record = history::CullRecord::new(
                        &keeper.path,
                        keeper.score().unwrap_or(0.0),
                        culled,
                    );
                    history::append(&mut history_out, &record)?;
                }
            }

            println!(
                "\nRecorded cull history in {}",
                args.path.join(history::HISTORY_FILE).display()
            );
        }

        Commands::History { command } => match command {
            HistoryCmd::List { path } => {
                println!("Cull history:");
                for (i, (rec, _)) in history::load(&path)?.iter().enumerate() {
                    let originals: Vec<&str> =
                        rec.culled.iter().map(|c| c.original.as_str()).collect();
                    println!(
                        "[{}] {}\n     kept: {} (score {:.2})\n     culled: {:?}\n",
                        i, rec.timestamp, rec.retained, rec.retained_score, originals
                    );
                }
            }

            HistoryCmd::Restore { path, record, all } => {
                let restored = history::restore(&path, record, all)?;
                println!("Updated history, removed {restored} record(s)");
            }
        },
    }

    Ok(())
}

/// Validate configuration and run the pipeline, timing the whole pass.
fn analyze(args: &AnalyzeArgs) -> Result<RunReport> {
    if !args.path.is_dir() {
        bail!("'{}' is not a valid directory", args.path.display());
    }

    let config = PipelineConfig {
        threshold: args.threshold,
        grid: args.hash_size,
    };
    let start = Instant::now();
    let report = pipeline::run(&args.path, config)?;
    println!(
        "Analyzed {} image(s) in {:.2?} ({} cache hit(s))",
        report.clusters.iter().map(|c| c.members.len()).sum::<usize>(),
        start.elapsed(),
        report.cache_hits
    );
    if report.cache_corrupt_lines > 0 {
        eprintln!(
            "Ignored {} corrupt cache line(s); affected images were re-hashed",
            report.cache_corrupt_lines
        );
    }
    Ok(report)
}

fn print_report(report: &RunReport, with_legend: bool) {
    let groups: Vec<&ClusterReport> = report.duplicate_clusters().collect();
    if groups.is_empty() {
        println!("No duplicates found.");
    } else {
        println!("Found {} duplicate group(s):", groups.len());
    }

    for (i, cluster) in groups.iter().enumerate() {
        println!(
            "\nGroup {} ({} images) — avg. similarity: {:.2}%",
            i + 1,
            cluster.members.len(),
            cluster.average_similarity
        );
        for (pos, member) in cluster.members.iter().enumerate() {
            match member.quality {
                Some(q) => {
                    let marker = if cluster.keeper == Some(pos) { "KEEP" } else { "    " };
                    println!(
                        "  {marker} {} → sharpness: {:.2}, noise: {:.2}, texture: {:.3} | score: {:.2}",
                        member.path.display(),
                        q.sharpness,
                        q.noise,
                        q.texture,
                        member.score().unwrap_or(0.0)
                    );
                }
                None => println!("       {} → unscored", member.path.display()),
            }
        }
    }

    if !report.skipped.is_empty() {
        println!("\nSkipped {} image(s):", report.skipped.len());
        for skip in &report.skipped {
            println!("  {} ({})", skip.path.display(), skip.reason);
        }
    }

    if with_legend && !groups.is_empty() {
        println!("\nQuality metrics:");
        println!("  sharpness: variance of the Laplacian — higher is better (edge clarity)");
        println!("  noise: std. dev. of high-frequency content — lower is better");
        println!("  texture: edge pixel density in [0,1] — higher is better (fine detail)");
        println!("  keeper is chosen by: sharpness - noise + texture");
    }
}

/// Relocations belonging to one cluster, in member order.
fn cluster_relocations<'a>(
    cluster: &ClusterReport,
    relocations: &'a [Relocation],
) -> Vec<&'a Relocation> {
    relocations
        .iter()
        .filter(|r| cluster.members.iter().any(|m| m.path == r.source))
        .collect()
}

/// Move `source` into `dup_dir`, appending a numeric suffix on name
/// clashes so an existing file is never overwritten.
fn move_collision_safe(source: &Path, dup_dir: &Path) -> Result<PathBuf> {
    let file_name = source
        .file_name()
        .with_context(|| format!("no file name in {}", source.display()))?;
    let mut dest = dup_dir.join(file_name);

    if dest.exists() {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = source
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        for n in 1.. {
            let candidate = dup_dir.join(format!("{stem}-{n}{ext}"));
            if !candidate.exists() {
                dest = candidate;
                break;
            }
        }
    }

    fs::rename(source, &dest)
        .with_context(|| format!("failed to move {} → {}", source.display(), dest.display()))?;
    Ok(dest)
}
