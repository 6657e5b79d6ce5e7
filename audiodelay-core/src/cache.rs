//! Segment cache — content-addressed, on-disk, append-only.
//!
//! Entries are gzip-compressed little-endian f32 arrays named by the
//! sha256 of the acquisition parameters. The key embeds file identity
//! (canonical path, mtime, size), so entries self-invalidate when the
//! source file changes, and concurrent writers of the same key produce
//! byte-identical content. What is stored is always the *windowed* buffer,
//! never the raw decoded segment.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::UNIX_EPOCH;

use crate::models::SegmentTag;

const ENTRY_EXT: &str = "seg.gz";

static PUT_FAILURE_WARNED: Once = Once::new();

// ---------------------------------------------------------------------------
//  Keys
// ---------------------------------------------------------------------------

/// Identity of one decoded-and-windowed segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionKey(String);

impl AcquisitionKey {
    /// Hash path identity and acquisition parameters. When file stats are
    /// unavailable the key is salted with the process id, so the entry is
    /// never reused across invocations.
    pub fn new(
        path: &str,
        sample_rate: u32,
        duration: Option<f64>,
        offset: f64,
        tag: SegmentTag,
    ) -> Self {
        let canonical = std::fs::canonicalize(path)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| path.to_string());
        let duration_part = match duration {
            Some(d) => d.to_string(),
            None => "None".to_string(),
        };

        let material = match std::fs::metadata(path) {
            Ok(meta) => {
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                format!(
                    "{}|{}|{}|{}|{}|{}|{}",
                    canonical,
                    mtime,
                    meta.len(),
                    sample_rate,
                    duration_part,
                    offset,
                    tag.as_str()
                )
            }
            Err(_) => format!(
                "{}|{}|{}|{}|{}|pid:{}",
                canonical,
                sample_rate,
                duration_part,
                offset,
                tag.as_str(),
                std::process::id()
            ),
        };

        let digest = Sha256::digest(material.as_bytes());
        let hex = digest.iter().fold(String::with_capacity(64), |mut s, b| {
            use std::fmt::Write as _;
            let _ = write!(s, "{:02x}", b);
            s
        });
        Self(hex)
    }

    pub fn hex(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
//  Cache
// ---------------------------------------------------------------------------

/// Directory of compressed segment entries, shared across workers.
pub struct SegmentCache {
    root: PathBuf,
}

impl SegmentCache {
    /// Open the cache at the default root: `$AUDIOSYNC_CACHE_DIR`, else the
    /// user cache dir under `AudioSync/cache`, else the OS temp dir.
    pub fn open() -> Self {
        Self::at(default_cache_root())
    }

    pub fn at(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns `None` for missing or corrupt entries.
    pub fn get(&self, key: &AcquisitionKey) -> Option<Vec<f32>> {
        let path = self.entry_path(key);
        let file = std::fs::File::open(&path).ok()?;
        let mut decoder = GzDecoder::new(file);
        let mut bytes = Vec::new();
        if decoder.read_to_end(&mut bytes).is_err() {
            debug!("Discarding corrupt cache entry {}", path.display());
            return None;
        }
        if bytes.len() % 4 != 0 {
            debug!("Discarding truncated cache entry {}", path.display());
            return None;
        }
        Some(
            bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        )
    }

    /// Best-effort write; measurement correctness never depends on it.
    /// The first failure logs a single warning for the whole process.
    pub fn put(&self, key: &AcquisitionKey, samples: &[f32]) {
        if let Err(e) = self.write_entry(key, samples) {
            PUT_FAILURE_WARNED.call_once(|| {
                warn!(
                    "Segment cache write failed ({}); continuing without cache: {}",
                    self.root.display(),
                    e
                );
            });
        }
    }

    fn write_entry(&self, key: &AcquisitionKey, samples: &[f32]) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let mut bytes = Vec::with_capacity(samples.len() * 4);
        for &s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        let file = std::fs::File::create(self.entry_path(key))?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&bytes)?;
        encoder.finish()?;
        Ok(())
    }

    fn entry_path(&self, key: &AcquisitionKey) -> PathBuf {
        self.root.join(format!("{}.{}", key.hex(), ENTRY_EXT))
    }
}

fn default_cache_root() -> PathBuf {
    if let Ok(dir) = std::env::var("AUDIOSYNC_CACHE_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Some(base) = dirs::cache_dir() {
        return base.join("AudioSync").join("cache");
    }
    std::env::temp_dir().join("audiosync_cache")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key(tag: SegmentTag) -> AcquisitionKey {
        AcquisitionKey::new("/no/such/file.wav", 8000, Some(300.0), 0.0, tag)
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SegmentCache::at(dir.path().to_path_buf());
        let key = sample_key(SegmentTag::Start);
        let samples: Vec<f32> = (0..4096).map(|i| (i as f32 * 0.01).sin()).collect();

        assert!(cache.get(&key).is_none());
        cache.put(&key, &samples);
        let restored = cache.get(&key).expect("entry should exist after put");
        assert_eq!(restored, samples);
    }

    #[test]
    fn test_keys_do_not_collide() {
        let a = AcquisitionKey::new("/x/a.mkv", 8000, Some(300.0), 0.0, SegmentTag::Start);
        let b = AcquisitionKey::new("/x/a.mkv", 8000, Some(300.0), 0.0, SegmentTag::End);
        let c = AcquisitionKey::new("/x/a.mkv", 8000, Some(300.0), 12.5, SegmentTag::Start);
        let d = AcquisitionKey::new("/x/a.mkv", 8000, None, 0.0, SegmentTag::Start);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.hex().len(), 64);
    }

    #[test]
    fn test_corrupt_entry_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SegmentCache::at(dir.path().to_path_buf());
        let key = sample_key(SegmentTag::Mid);
        std::fs::create_dir_all(cache.root()).unwrap();
        std::fs::write(
            cache.root().join(format!("{}.{}", key.hex(), ENTRY_EXT)),
            b"not gzip at all",
        )
        .unwrap();
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_put_failure_is_silent() {
        // Root is a file, so create_dir_all fails.
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let cache = SegmentCache::at(blocker);
        cache.put(&sample_key(SegmentTag::End), &[1.0, 2.0]);
    }
}
