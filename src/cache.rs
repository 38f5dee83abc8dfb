//! Persistent fingerprint cache.
//!
//! A text side-table mapping canonical image paths to fingerprints so
//! reruns skip the DCT. Each entry carries an invalidation key (file size
//! plus mtime); a hit requires the key to match exactly, anything
//! else is a miss and the entry is overwritten after recomputation. The
//! cache is advisory: a missing file is an empty cache and a malformed
//! line is skipped, never an abort.
//!
//! On-disk format, one entry per line, tab-separated with the path last
//! so fields parse unambiguously from the left:
//!
//! ```text
//! <size>\t<mtime_nanos>\t<bit_len>:<hex>\t<path>
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};

use crate::error::CullError;
use crate::fingerprint::Fingerprint;

/// File name of the cache inside the scanned directory.
pub const CACHE_FILE: &str = ".snapcull-hashes.txt";

/// Invalidation key: cheap signals that a file's content changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheKey {
    pub size: u64,
    pub mtime_nanos: u128,
}

impl CacheKey {
    /// Stat-derived key for a file. Fails if the file cannot be stat'd.
    pub fn for_file(path: &Path) -> Result<Self> {
        let meta = fs::metadata(path)
            .with_context(|| format!("failed to stat {}", path.display()))?;
        let mtime_nanos = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Ok(Self {
            size: meta.len(),
            mtime_nanos,
        })
    }
}

struct Entry {
    key: CacheKey,
    fingerprint: Fingerprint,
}

/// In-memory view of the cache file.
pub struct FingerprintCache {
    entries: HashMap<PathBuf, Entry>,
    /// Lines that failed to parse on load; reported, then dropped on save.
    corrupt_lines: usize,
}

impl FingerprintCache {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            corrupt_lines: 0,
        }
    }

    /// Load the cache file. A missing file is an empty cache; malformed
    /// lines are counted and skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::empty());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read cache {}", path.display()));
            }
        };

        let mut cache = Self::empty();
        for (i, line) in text.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            match Self::parse_line(line) {
                Some((file, entry)) => {
                    cache.entries.insert(file, entry);
                }
                None => {
                    // Advisory store: a bad entry is a miss, not an abort.
                    eprintln!("{}", CullError::CacheCorruption { line: i + 1 });
                    cache.corrupt_lines += 1;
                }
            }
        }
        Ok(cache)
    }

    fn parse_line(line: &str) -> Option<(PathBuf, Entry)> {
        let mut fields = line.splitn(4, '\t');
        let size = fields.next()?.parse().ok()?;
        let mtime_nanos = fields.next()?.parse().ok()?;
        let fingerprint = Fingerprint::from_hex(fields.next()?)?;
        let file = PathBuf::from(fields.next()?);
        Some((
            file,
            Entry {
                key: CacheKey { size, mtime_nanos },
                fingerprint,
            },
        ))
    }

    /// A hit requires both the path and the invalidation key to match.
    pub fn get(&self, path: &Path, key: CacheKey) -> Option<&Fingerprint> {
        self.entries
            .get(path)
            .filter(|e| e.key == key)
            .map(|e| &e.fingerprint)
    }

    /// Insert or overwrite the entry for `path`.
    pub fn put(&mut self, path: PathBuf, key: CacheKey, fingerprint: Fingerprint) {
        self.entries.insert(path, Entry { key, fingerprint });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Count of unparseable lines seen at load time.
    pub fn corrupt_lines(&self) -> usize {
        self.corrupt_lines
    }

    /// Write every entry back out. Entry order is sorted by path so the
    /// file diffs cleanly between runs.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = fs::File::create(path)
            .with_context(|| format!("failed to write cache {}", path.display()))?;
        let mut out = BufWriter::new(file);

        let mut paths: Vec<&PathBuf> = self.entries.keys().collect();
        paths.sort();
        for file_path in paths {
            // The line format cannot carry newlines or non-UTF-8 paths;
            // such entries are not persisted and just get re-hashed.
            let Some(path_text) = file_path.to_str() else {
                continue;
            };
            if path_text.contains(['\n', '\r']) {
                continue;
            }
            let entry = &self.entries[file_path];
            writeln!(
                out,
                "{}\t{}\t{}\t{}",
                entry.key.size,
                entry.key.mtime_nanos,
                entry.fingerprint.to_hex(),
                path_text
            )?;
        }
        out.flush()?;
        Ok(())
    }
}
