//! Cull history: a JSONL ledger of every cull, with restore.
//!
//! One record per culled cluster, appended to `.snapcull-history.jsonl`
//! inside the scanned directory. Each culled file is recorded with both
//! its original path and the path the move actually landed on, so a
//! collision-renamed file restores correctly. Restore moves files back
//! and rewrites the ledger without the restored records.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const HISTORY_FILE: &str = ".snapcull-history.jsonl";

/// One relocated file: where it lived, and where the move put it
/// (the two differ in file name after a collision rename).
#[derive(Serialize, Deserialize, Debug)]
pub struct CulledFile {
    pub original: String,
    pub moved_to: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CullRecord {
    pub timestamp: String,
    /// The keeper's path.
    pub retained: String,
    /// Composite score of the keeper at cull time.
    pub retained_score: f64,
    /// Files moved into the duplicates directory.
    pub culled: Vec<CulledFile>,
}

impl CullRecord {
    pub fn new(retained: &Path, retained_score: f64, culled: Vec<CulledFile>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            retained: retained.to_string_lossy().into_owned(),
            retained_score,
            culled,
        }
    }
}

/// Open the history file for appending, creating it if needed.
pub fn open_for_append(root: &Path) -> Result<File> {
    let history_file = root.join(HISTORY_FILE);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&history_file)
        .with_context(|| format!("failed to open history file {}", history_file.display()))
}

pub fn append(out: &mut File, record: &CullRecord) -> Result<()> {
    writeln!(out, "{}", serde_json::to_string(record)?)?;
    Ok(())
}

/// All well-formed records, paired with their original line for rewrites.
/// Malformed lines are reported to stderr and dropped, like a corrupt
/// cache entry.
pub fn load(root: &Path) -> Result<Vec<(CullRecord, String)>> {
    let history_file = root.join(HISTORY_FILE);
    let f = File::open(&history_file)
        .with_context(|| format!("could not open history file {}", history_file.display()))?;
    let reader = BufReader::new(f);

    let mut records = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        match serde_json::from_str::<CullRecord>(&line) {
            Ok(rec) => records.push((rec, line)),
            Err(err) => eprintln!("skipping malformed history entry {i}: {err}"),
        }
    }
    Ok(records)
}

/// Restore culled files for the selected record indices (all records when
/// `all` is set, otherwise the single given index, defaulting to the most
/// recent), then rewrite the ledger without them.
pub fn restore(root: &Path, record: Option<usize>, all: bool) -> Result<usize> {
    let stored = load(root)?;
    if stored.is_empty() {
        bail!("no history records to restore");
    }

    let restore_indices: Vec<usize> = if all {
        (0..stored.len()).collect()
    } else {
        let idx = record.unwrap_or(stored.len() - 1);
        if idx >= stored.len() {
            bail!(
                "invalid history index {idx}; valid range is 0..{}",
                stored.len() - 1
            );
        }
        vec![idx]
    };

    for &i in &restore_indices {
        let rec = &stored[i].0;
        println!(
            "Restoring {} file(s) from record {}…",
            rec.culled.len(),
            rec.timestamp
        );
        for entry in &rec.culled {
            let src = PathBuf::from(&entry.moved_to);
            let dest = PathBuf::from(&entry.original);

            if !src.exists() {
                eprintln!("source file {} does not exist; skipping", src.display());
                continue;
            }
            if src == dest {
                eprintln!("source and destination are the same; skipping {}", src.display());
                continue;
            }
            fs::rename(&src, &dest).with_context(|| {
                format!("failed to restore {} → {}", src.display(), dest.display())
            })?;
            println!("Restored {} → {}", src.display(), dest.display());
        }
    }

    let remaining: Vec<String> = stored
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !restore_indices.contains(i))
        .map(|(_, (_, line))| line)
        .collect();
    let new_content = if remaining.is_empty() {
        String::new()
    } else {
        remaining.join("\n") + "\n"
    };
    let history_file = root.join(HISTORY_FILE);
    fs::write(&history_file, new_content)
        .with_context(|| format!("failed to update history file {}", history_file.display()))?;

    Ok(restore_indices.len())
}
