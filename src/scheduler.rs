//! Inspection scheduling
//!
//! Every path that turns ready gets its own detached task. The event loop
//! never waits on a task, so a slow or stuck read only stalls itself.

use crate::config::SchedulerConfig;
use crate::detector::{Classifier, Detection};
use crate::response::Mitigator;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Dispatches inspection tasks for ready paths
pub struct Scheduler {
    classifier: Classifier,
    mitigator: Arc<Mitigator>,
    /// Delay each task waits before classifying
    inspect_delay: Duration,
    /// Minimum spacing between task launches
    dispatch_interval: Duration,
    /// Earliest instant the next task may start
    next_slot: Instant,
    /// Optional bound on concurrent classifications
    admission: Option<Arc<Semaphore>>,
    detections: mpsc::UnboundedSender<Detection>,
}

impl Scheduler {
    pub fn new(
        config: &SchedulerConfig,
        classifier: Classifier,
        mitigator: Arc<Mitigator>,
        detections: mpsc::UnboundedSender<Detection>,
    ) -> Self {
        Self {
            classifier,
            mitigator,
            inspect_delay: config.sleep(),
            dispatch_interval: config.dispatch_interval(),
            next_slot: Instant::now(),
            admission: (config.max_inflight > 0)
                .then(|| Arc::new(Semaphore::new(config.max_inflight))),
            detections,
        }
    }

    /// Start time for the next task, honouring the launch spacing
    fn claim_slot(&mut self) -> Instant {
        let now = Instant::now();
        let slot = self.next_slot.max(now);
        self.next_slot = slot + self.dispatch_interval;
        slot
    }

    /// Spawn a detached inspection of `path`
    pub fn dispatch(&mut self, path: PathBuf) -> JoinHandle<()> {
        let start = self.claim_slot() + self.inspect_delay;
        let classifier = self.classifier;
        let mitigator = self.mitigator.clone();
        let admission = self.admission.clone();
        let detections = self.detections.clone();

        debug!("Scheduling inspection of {:?}", path);

        tokio::spawn(async move {
            tokio::time::sleep_until(start).await;

            // Held until the task finishes
            let _permit = match admission {
                Some(gate) => match gate.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };

            let inspected = tokio::task::spawn_blocking(move || {
                let result = classifier.classify(&path);
                if result.is_random {
                    warn!(
                        path = ?result.path,
                        entropy = result.entropy,
                        fast_path = result.fast_path,
                        elapsed = ?result.elapsed,
                        "Suspicious file"
                    );
                    mitigator.respond(&result.path);
                }
                result
            })
            .await;

            match inspected {
                Ok(result) if result.is_random => {
                    // The receiver only goes away at shutdown
                    let _ = detections.send(Detection::from(result));
                }
                Ok(_) => {}
                Err(e) => error!("Inspection task failed: {}", e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResponseConfig;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};
    use tempfile::tempdir;

    fn scheduler(
        config: SchedulerConfig,
    ) -> (Scheduler, mpsc::UnboundedReceiver<Detection>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mitigator = Arc::new(Mitigator::new(&ResponseConfig::default()));
        (Scheduler::new(&config, Classifier::new(0), mitigator, tx), rx)
    }

    fn write_random(path: &std::path::Path, len: usize) {
        let mut data = vec![0u8; len];
        StdRng::seed_from_u64(99).fill_bytes(&mut data);
        std::fs::write(path, data).unwrap();
    }

    #[tokio::test]
    async fn test_random_file_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.bin");
        write_random(&path, 1 << 20);

        let (mut scheduler, mut rx) = scheduler(SchedulerConfig::default());
        scheduler.dispatch(path.clone()).await.unwrap();

        let detection = rx.try_recv().unwrap();
        assert_eq!(detection.path, path);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_vanished_file_not_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tmp123");
        std::fs::write(&path, b"scratch").unwrap();

        let (mut scheduler, mut rx) = scheduler(SchedulerConfig {
            sleep_ms: 50,
            ..Default::default()
        });
        let task = scheduler.dispatch(path.clone());
        std::fs::remove_file(&path).unwrap();
        task.await.unwrap();

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dispatch_interval_spaces_launches() {
        let (mut scheduler, _rx) = scheduler(SchedulerConfig {
            dispatch_interval_ms: 100,
            ..Default::default()
        });

        let first = scheduler.claim_slot();
        let second = scheduler.claim_slot();
        let third = scheduler.claim_slot();
        assert_eq!(second - first, Duration::from_millis(100));
        assert_eq!(third - second, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_admission_gate_bounds_inflight() {
        let dir = tempdir().unwrap();
        let (mut scheduler, mut rx) = scheduler(SchedulerConfig {
            sleep_ms: 0,
            max_inflight: 1,
            ..Default::default()
        });

        let tasks: Vec<_> = (0..4)
            .map(|i| {
                let path = dir.path().join(format!("{}.bin", i));
                write_random(&path, 64 * 1024);
                scheduler.dispatch(path)
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let mut reported = 0;
        while rx.try_recv().is_ok() {
            reported += 1;
        }
        assert_eq!(reported, 4);
        assert_eq!(scheduler.admission.as_ref().unwrap().available_permits(), 1);
    }
}
