//! File system watching module
//!
//! Uses inotify for event notification. Raw kernel masks are folded into
//! the four event kinds the debounce state machine understands.

mod inotify_watcher;

pub use inotify_watcher::InotifyWatcher;

use std::path::{Path, PathBuf};

/// File system event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Absolute path of the affected file
    pub path: PathBuf,
    /// Type of event
    pub kind: EventKind,
}

impl FileEvent {
    pub fn new(path: impl Into<PathBuf>, kind: EventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Type of file system event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// File was created (or moved into a watched directory)
    Create,
    /// File content was written
    Write,
    /// File metadata or permissions changed
    PermissionChange,
    /// File was deleted (or moved out of a watched directory)
    Remove,
}

/// Recursive watcher over one or more roots
pub struct Watcher {
    inotify: InotifyWatcher,
    /// Watched roots
    roots: Vec<PathBuf>,
}

impl Watcher {
    /// Create a watcher and subscribe to every root.
    ///
    /// Fails if the notification subsystem cannot be initialised or any
    /// root cannot be subscribed.
    pub fn new(roots: &[PathBuf]) -> anyhow::Result<Self> {
        let mut watcher = Self {
            inotify: InotifyWatcher::new()?,
            roots: Vec::new(),
        };

        for root in roots {
            watcher.add(root)?;
        }

        Ok(watcher)
    }

    /// Add a root to watch
    pub fn add(&mut self, path: &Path) -> anyhow::Result<()> {
        self.inotify.add(path)?;
        self.roots.push(path.to_path_buf());
        tracing::info!("Watching: {:?}", path);

        Ok(())
    }

    /// Get next file system event
    pub async fn next_event(&mut self) -> anyhow::Result<FileEvent> {
        self.inotify.next_event().await
    }

    /// Get list of watched roots
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Number of directories currently subscribed
    pub fn watch_count(&self) -> usize {
        self.inotify.watch_count()
    }
}
