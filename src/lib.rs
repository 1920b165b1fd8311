//! cryptostalker - early warning for in-place encryption
//!
//! Watches directory trees for new files and flags those whose content is
//! statistically indistinguishable from random bytes, the footprint of
//! ransomware encrypting files in place.
//!
//! # Pipeline
//!
//! - **Watcher** - recursive inotify subscription yielding [`watcher::FileEvent`]s
//! - **Tracker** - per-path debounce state deciding when a file is worth reading
//! - **Scheduler** - detached inspection tasks, optionally throttled
//! - **Detector** - chi-square / serial-correlation randomness test
//! - **Response** - stop young processes, run a hook
//!
//! # Example
//!
//! ```rust,no_run
//! use cryptostalker::{Config, Stalker};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::default();
//!     config.watch.push("/data".into());
//!
//!     let mut stalker = Stalker::new(config)?;
//!     stalker.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod daemon;
pub mod detector;
pub mod response;
pub mod scheduler;
pub mod tracker;
pub mod watcher;

pub use config::Config;
pub use detector::{entropy, Classifier, Detection, ThreatLevel};
pub use response::{Mitigator, Response, ResponseAction};
pub use tracker::{DebouncePolicy, PathTable};
pub use watcher::Watcher;

use config::Exclusions;
use detector::rate::DetectionRate;
use scheduler::Scheduler;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use watcher::FileEvent;

/// Main detection engine
pub struct Stalker {
    config: Config,
    watcher: Watcher,
    exclusions: Exclusions,
    table: Arc<PathTable>,
    scheduler: Scheduler,
    detections: mpsc::UnboundedReceiver<Detection>,
    rate: DetectionRate,
    subscribers: broadcast::Sender<Detection>,
}

impl Stalker {
    /// Validate the configuration and subscribe to every watch root
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;

        let watcher = Watcher::new(&config.watch)?;
        let table = Arc::new(PathTable::new(config.debounce_policy()));
        let (tx, detections) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(
            &config.scheduler,
            Classifier::new(config.detection.fast_detect_pct),
            Arc::new(Mitigator::new(&config.response)),
            tx,
        );
        let (subscribers, _) = broadcast::channel(256);

        info!(
            policy = %table.policy(),
            directories = watcher.watch_count(),
            "Stalker ready"
        );

        Ok(Self {
            exclusions: config.exclusions()?,
            rate: DetectionRate::new(config.detection.count, config.detection.window()),
            config,
            watcher,
            table,
            scheduler,
            detections,
            subscribers,
        })
    }

    /// Receive every detection from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Detection> {
        self.subscribers.subscribe()
    }

    /// Get current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared path state table
    pub fn table(&self) -> &Arc<PathTable> {
        &self.table
    }

    /// Feed one file event through the debouncer, dispatching an inspection
    /// when the path becomes ready.
    pub fn ingest(&mut self, event: FileEvent) -> bool {
        if self.exclusions.is_excluded(&event.path) {
            return false;
        }

        if self
            .table
            .record_and_check(&event.path, event.kind, Instant::now())
        {
            // Detached; the loop does not wait on it
            drop(self.scheduler.dispatch(event.path));
            true
        } else {
            false
        }
    }

    fn on_detection(&mut self, detection: Detection) {
        let now = Instant::now();
        let level = self.rate.record(now);
        let count = self.rate.count(now);

        match level {
            ThreatLevel::Critical => error!(
                count,
                window = ?self.rate.window(),
                "Mass encryption suspected: too many random files within the window"
            ),
            ThreatLevel::Suspicious => warn!(count, "Random files are accumulating"),
            ThreatLevel::Safe => {}
        }

        // No subscribers is fine
        let _ = self.subscribers.send(detection);
    }

    /// Run the event loop until the task is dropped
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let reaper = tokio::spawn(tracker::run_reaper(
            self.table.clone(),
            self.config.scheduler.reap_interval(),
            self.config.scheduler.state_ttl(),
        ));
        let _reaper = AbortOnDrop(reaper);

        loop {
            tokio::select! {
                event = self.watcher.next_event() => match event {
                    Ok(event) => {
                        debug!(path = ?event.path, kind = ?event.kind, "File event");
                        self.ingest(event);
                    }
                    Err(e) => {
                        error!("Watch error: {:#}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(detection) = self.detections.recv() => {
                    self.on_detection(detection);
                }
            }
        }
    }
}

/// Stops the reaper when the loop goes away
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
