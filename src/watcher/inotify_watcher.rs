//! inotify-based file system watcher

use super::{EventKind, FileEvent};
use anyhow::Context;
use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};
use std::collections::{HashMap, VecDeque};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use tokio::io::unix::AsyncFd;
use tracing::{debug, warn};

/// Events subscribed on every directory
fn watch_mask() -> WatchMask {
    WatchMask::CREATE
        | WatchMask::MODIFY
        | WatchMask::CLOSE_WRITE
        | WatchMask::ATTRIB
        | WatchMask::DELETE
        | WatchMask::MOVED_FROM
        | WatchMask::MOVED_TO
}

/// Map a kernel event mask to an event kind
fn classify_mask(mask: EventMask) -> Option<EventKind> {
    if mask.intersects(EventMask::CREATE | EventMask::MOVED_TO) {
        Some(EventKind::Create)
    } else if mask.intersects(EventMask::MODIFY | EventMask::CLOSE_WRITE) {
        Some(EventKind::Write)
    } else if mask.contains(EventMask::ATTRIB) {
        Some(EventKind::PermissionChange)
    } else if mask.intersects(EventMask::DELETE | EventMask::MOVED_FROM) {
        Some(EventKind::Remove)
    } else {
        None
    }
}

/// One decoded kernel record, detached from the read buffer
struct RawEvent {
    wd: WatchDescriptor,
    path: Option<PathBuf>,
    mask: EventMask,
}

/// inotify-based file system watcher
pub struct InotifyWatcher {
    /// inotify instance (non-blocking)
    inotify: Inotify,
    /// Async readiness for the inotify descriptor
    async_fd: AsyncFd<RawFd>,
    /// Map of watch descriptors to directories
    watches: HashMap<WatchDescriptor, PathBuf>,
    /// Translated events not yet handed out
    pending: VecDeque<FileEvent>,
    /// Event buffer
    buffer: [u8; 4096],
}

impl InotifyWatcher {
    /// Create a new inotify watcher
    pub fn new() -> anyhow::Result<Self> {
        let inotify = Inotify::init().context("failed to initialise inotify")?;
        let async_fd = AsyncFd::new(inotify.as_raw_fd())?;

        Ok(Self {
            inotify,
            async_fd,
            watches: HashMap::new(),
            pending: VecDeque::new(),
            buffer: [0u8; 4096],
        })
    }

    /// Watch a directory and everything below it
    pub fn add(&mut self, path: &Path) -> anyhow::Result<()> {
        let wd = self
            .inotify
            .watches()
            .add(path, watch_mask())
            .with_context(|| format!("failed to watch {:?}", path))?;
        self.watches.insert(wd, path.to_path_buf());

        if path.is_dir() {
            self.add_recursive(path);
        }

        Ok(())
    }

    /// Recursively add subdirectories; failures below the root are logged
    fn add_recursive(&mut self, dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot list {:?}: {}", dir, e);
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }

            match self.inotify.watches().add(&path, watch_mask()) {
                Ok(wd) => {
                    self.watches.insert(wd, path.clone());
                }
                Err(e) => {
                    warn!("Failed to watch {:?}: {}", path, e);
                    continue;
                }
            }

            self.add_recursive(&path);
        }
    }

    /// Number of subscribed directories
    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    /// Get next event (async)
    pub async fn next_event(&mut self) -> anyhow::Result<FileEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }

            let raw = self.read_raw().await?;
            for event in raw {
                self.translate(event);
            }
        }
    }

    /// Wait for readability and drain one buffer's worth of records
    async fn read_raw(&mut self) -> anyhow::Result<Vec<RawEvent>> {
        loop {
            let mut guard = self.async_fd.readable().await?;

            match self.inotify.read_events(&mut self.buffer) {
                Ok(events) => {
                    let watches = &self.watches;
                    return Ok(events
                        .map(|event| RawEvent {
                            path: watches.get(&event.wd).map(|dir| match event.name {
                                Some(name) => dir.join(name),
                                None => dir.clone(),
                            }),
                            wd: event.wd,
                            mask: event.mask,
                        })
                        .collect());
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    guard.clear_ready();
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Turn a raw record into zero or one queued event
    fn translate(&mut self, raw: RawEvent) {
        if raw.mask.contains(EventMask::Q_OVERFLOW) {
            warn!("inotify queue overflowed; some file events were lost");
            return;
        }

        if raw.mask.contains(EventMask::IGNORED) {
            if let Some(dir) = self.watches.remove(&raw.wd) {
                debug!("Watch dropped for {:?}", dir);
            }
            return;
        }

        let path = match raw.path {
            Some(path) => path,
            None => return,
        };

        if raw.mask.contains(EventMask::ISDIR) {
            // Subscribe to directories as they appear; they are never inspected
            if raw.mask.intersects(EventMask::CREATE | EventMask::MOVED_TO) {
                if let Err(e) = self.add(&path) {
                    warn!("Failed to watch new directory {:?}: {}", path, e);
                }
            }
            return;
        }

        if let Some(kind) = classify_mask(raw.mask) {
            self.pending.push_back(FileEvent { path, kind });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_classify_mask() {
        assert_eq!(classify_mask(EventMask::CREATE), Some(EventKind::Create));
        assert_eq!(classify_mask(EventMask::MOVED_TO), Some(EventKind::Create));
        assert_eq!(classify_mask(EventMask::CLOSE_WRITE), Some(EventKind::Write));
        assert_eq!(
            classify_mask(EventMask::ATTRIB),
            Some(EventKind::PermissionChange)
        );
        assert_eq!(classify_mask(EventMask::DELETE), Some(EventKind::Remove));
        assert_eq!(classify_mask(EventMask::ACCESS), None);
    }

    #[tokio::test]
    async fn test_reports_create_in_new_subdirectory() {
        let dir = tempdir().unwrap();
        let mut watcher = InotifyWatcher::new().unwrap();
        watcher.add(dir.path()).unwrap();
        assert_eq!(watcher.watch_count(), 1);

        let sub = dir.path().join("nested");
        std::fs::create_dir(&sub).unwrap();

        // Directory creation is consumed internally and never surfaces.
        let added = tokio::time::timeout(Duration::from_millis(300), watcher.next_event()).await;
        assert!(added.is_err(), "directory events must not be reported");
        assert_eq!(watcher.watch_count(), 2);

        let file = sub.join("a.bin");
        std::fs::write(&file, b"payload").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), watcher.next_event())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, FileEvent::new(file, EventKind::Create));
    }
}
