//! Encrypted-content detection

pub mod entropy;
pub mod rate;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Chunk size used by the fast path
pub const CHUNK_LEN: usize = 4096;

/// Threat level classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreatLevel {
    /// No threat detected
    Safe,
    /// Suspicious activity, monitor closely
    Suspicious,
    /// High probability threat, take action
    Critical,
}

/// Outcome of inspecting one file
#[derive(Debug, Clone)]
pub struct Classification {
    pub path: PathBuf,
    /// Content looks like ciphertext
    pub is_random: bool,
    /// The chunked fast path produced the verdict
    pub fast_path: bool,
    /// Shannon entropy of the whole content, bits per byte
    pub entropy: f64,
    /// Bytes inspected
    pub size: u64,
    pub elapsed: Duration,
}

impl Classification {
    fn negative(path: &Path, started: Instant) -> Self {
        Self {
            path: path.to_path_buf(),
            is_random: false,
            fast_path: false,
            entropy: 0.0,
            size: 0,
            elapsed: started.elapsed(),
        }
    }
}

/// File-level randomness classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classifier {
    /// Share of random chunks that settles the verdict early; 0 disables
    fast_detect_pct: u8,
}

impl Classifier {
    pub fn new(fast_detect_pct: u8) -> Self {
        Self {
            fast_detect_pct: fast_detect_pct.min(100),
        }
    }

    pub fn fast_detect_pct(&self) -> u8 {
        self.fast_detect_pct
    }

    /// Whether the file at `path` looks encrypted
    pub fn is_random(&self, path: &Path) -> bool {
        self.classify(path).is_random
    }

    /// Inspect a file.
    ///
    /// Missing files, non-regular files and unreadable files are negative;
    /// they commonly vanish between notification and inspection.
    pub fn classify(&self, path: &Path) -> Classification {
        let started = Instant::now();

        match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                trace!("Skipping non-regular file {:?}", path);
                return Classification::negative(path, started);
            }
            Err(_) => {
                trace!("File vanished before inspection: {:?}", path);
                return Classification::negative(path, started);
            }
        }

        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::PermissionDenied {
                    warn!("Error reading file {:?}: {}", path, e);
                }
                return Classification::negative(path, started);
            }
        };

        let (is_random, fast_path) = self.classify_bytes(&data);

        Classification {
            path: path.to_path_buf(),
            is_random,
            fast_path,
            entropy: entropy::calculate(&data),
            size: data.len() as u64,
            elapsed: started.elapsed(),
        }
    }

    /// Verdict over in-memory content: `(is_random, decided_by_fast_path)`
    pub fn classify_bytes(&self, data: &[u8]) -> (bool, bool) {
        if data.is_empty() {
            return (false, false);
        }

        if self.fast_detect_pct != 0 && self.fast_path(data) {
            return (true, true);
        }

        (entropy::is_random(data), false)
    }

    /// Chunk-by-chunk early accept
    fn fast_path(&self, data: &[u8]) -> bool {
        let total = data.len().div_ceil(CHUNK_LEN);
        let required = (total * self.fast_detect_pct as usize).div_ceil(100).max(1);

        let mut random_chunks = 0;
        for chunk in data.chunks(CHUNK_LEN) {
            if entropy::is_random(chunk) {
                random_chunks += 1;
                if random_chunks >= required {
                    return true;
                }
            }
        }

        false
    }
}

/// A positive classification as reported to subscribers
#[derive(Debug, Clone)]
pub struct Detection {
    pub path: PathBuf,
    pub entropy: f64,
    pub fast_path: bool,
    pub elapsed: Duration,
    pub detected_at: chrono::DateTime<chrono::Utc>,
}

impl From<Classification> for Detection {
    fn from(c: Classification) -> Self {
        Self {
            path: c.path,
            entropy: c.entropy,
            fast_path: c.fast_path,
            elapsed: c.elapsed,
            detected_at: chrono::Utc::now(),
        }
    }
}
