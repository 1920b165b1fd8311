//! Configuration management for cryptostalker

use crate::response::StopSignal;
use crate::tracker::DebouncePolicy;
use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directories to watch recursively
    #[serde(default)]
    pub watch: Vec<PathBuf>,

    /// Glob patterns for paths that are never inspected
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Detection settings
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Inspection scheduling
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Response to a detection
    #[serde(default)]
    pub response: ResponseConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {:?}", path))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config {:?}", path))?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject configurations the daemon cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.watch.is_empty() {
            anyhow::bail!("no path to watch; provide --path or `watch:` in the config file");
        }
        if self.detection.fast_detect_pct > 100 {
            anyhow::bail!(
                "fast_detect_pct must be between 0 and 100, got {}",
                self.detection.fast_detect_pct
            );
        }
        if self.scheduler.reap_interval_secs == 0 {
            anyhow::bail!("reap_interval_secs must be greater than zero");
        }
        self.exclusions()?;
        Ok(())
    }

    /// Compile the exclusion patterns
    pub fn exclusions(&self) -> anyhow::Result<Exclusions> {
        Exclusions::new(&self.exclude)
    }

    /// Debounce policy in effect
    pub fn debounce_policy(&self) -> DebouncePolicy {
        self.detection
            .debounce
            .unwrap_or_else(DebouncePolicy::for_platform)
    }
}

/// Compiled exclusion globs
#[derive(Debug, Clone)]
pub struct Exclusions {
    set: GlobSet,
}

impl Exclusions {
    pub fn new(patterns: &[String]) -> anyhow::Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern)
                .with_context(|| format!("invalid exclude pattern {:?}", pattern))?;
            builder.add(glob);
        }
        Ok(Self {
            set: builder.build()?,
        })
    }

    /// Check if a path should be excluded
    pub fn is_excluded(&self, path: &Path) -> bool {
        if self.set.is_empty() {
            return false;
        }
        if self.set.is_match(path) {
            return true;
        }
        // Bare patterns like `*.swp` also apply to the file name alone
        path.file_name()
            .map(|name| self.set.is_match(Path::new(name)))
            .unwrap_or(false)
    }
}

/// Detection thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Percentage of random 4 KiB chunks that flags a file early; 0 disables
    #[serde(default)]
    pub fast_detect_pct: u8,

    /// Detections within `window_secs` that raise the outbreak alarm; 0 disables
    #[serde(default = "default_count")]
    pub count: u32,

    /// Sliding window for `count`
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Debounce policy override; platform default when unset
    #[serde(default)]
    pub debounce: Option<DebouncePolicy>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            fast_detect_pct: 0,
            count: default_count(),
            window_secs: default_window_secs(),
            debounce: None,
        }
    }
}

impl DetectionConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Inspection scheduling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Delay before each inspection, in milliseconds
    #[serde(default = "default_sleep_ms")]
    pub sleep_ms: u64,

    /// Minimum spacing between inspection launches, in milliseconds
    #[serde(default)]
    pub dispatch_interval_ms: u64,

    /// Concurrent inspections allowed; 0 means unbounded
    #[serde(default)]
    pub max_inflight: usize,

    /// Period of the stale-state sweep
    #[serde(default = "default_reap_secs")]
    pub reap_interval_secs: u64,

    /// Age after which an unfinished path state is dropped
    #[serde(default = "default_reap_secs")]
    pub state_ttl_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sleep_ms: default_sleep_ms(),
            dispatch_interval_ms: 0,
            max_inflight: 0,
            reap_interval_secs: default_reap_secs(),
            state_ttl_secs: default_reap_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn sleep(&self) -> Duration {
        Duration::from_millis(self.sleep_ms)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.state_ttl_secs)
    }
}

/// Response configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Stop processes started within this many seconds; 0 disables
    #[serde(default)]
    pub stop_age_secs: u64,

    /// Signal used to stop them
    #[serde(default)]
    pub signal: StopSignal,

    /// Program invoked with the suspicious path as its argument
    #[serde(default)]
    pub script: Option<PathBuf>,
}

// Default value functions for serde
fn default_count() -> u32 {
    10
}

fn default_window_secs() -> u64 {
    60
}

fn default_sleep_ms() -> u64 {
    10
}

fn default_reap_secs() -> u64 {
    10
}
