//! Per-request scratch directories.
//!
//! A [`Workspace`] wraps a [`TempDir`] so removal is tied to ownership:
//! [`Workspace::release`] consumes the handle (it cannot run twice), and a
//! handle dropped on any other path — early `?` return, panic unwind, or the
//! request future being cancelled — removes the tree in `Drop`.
//!
//! Guaranteed release cannot cover a crash of the whole process, so
//! [`sweep_orphans`] removes stale directories left under the root.
//!
//! ## Layout
//!
//! ```text
//! <root>/<prefix>XXXXXX/
//!   input/     uploaded file, written under its sanitised name
//!   output/    --outdir for the document engine
//!   profile/   LibreOffice user installation for this request only
//!   pages/     pdftoppm output
//! ```

use crate::output::sanitize_filename;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// An isolated, writable directory owned by one request.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a fresh workspace under `root` (created if missing).
    pub fn acquire(root: &Path, prefix: &str) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new().prefix(prefix).tempdir_in(root)?;
        for sub in ["input", "output", "profile", "pages"] {
            std::fs::create_dir(dir.path().join(sub))?;
        }
        debug!("Acquired workspace {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn input_dir(&self) -> PathBuf {
        self.path().join("input")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path().join("output")
    }

    pub fn profile_dir(&self) -> PathBuf {
        self.path().join("profile")
    }

    pub fn pages_dir(&self) -> PathBuf {
        self.path().join("pages")
    }

    /// Write `content` to `input/` under the sanitised `filename` and return
    /// its path.
    pub async fn write_input(&self, filename: &str, content: &[u8]) -> io::Result<PathBuf> {
        let path = self.input_dir().join(sanitize_filename(filename));
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }

    /// Remove the directory tree now and report failures.
    pub fn release(self) -> io::Result<()> {
        let path = self.path().to_path_buf();
        let result = self.dir.close();
        match &result {
            Ok(()) => debug!("Released workspace {}", path.display()),
            Err(e) => warn!("Failed to remove workspace {}: {}", path.display(), e),
        }
        result
    }
}

/// Remove workspace directories under `root` older than `max_age`.
///
/// Only direct children whose name starts with `prefix` are considered.
/// Returns how many directories were removed.
pub fn sweep_orphans(root: &Path, prefix: &str, max_age: Duration) -> io::Result<usize> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(prefix) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_dir() {
            continue;
        }
        let age = meta
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or(Duration::ZERO);
        if age <= max_age {
            continue;
        }
        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => {
                info!(
                    "Removed orphaned workspace {} (age {}s)",
                    entry.path().display(),
                    age.as_secs()
                );
                removed += 1;
            }
            Err(e) => warn!("Could not remove orphaned workspace {}: {}", entry.path().display(), e),
        }
    }
    Ok(removed)
}

/// Run [`sweep_orphans`] every `interval` on a background task.
pub fn spawn_sweeper(root: PathBuf, prefix: String, interval: Duration, max_age: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let (root, prefix) = (root.clone(), prefix.clone());
            let swept = tokio::task::spawn_blocking(move || sweep_orphans(&root, &prefix, max_age)).await;
            match swept {
                Ok(Ok(0)) => {}
                Ok(Ok(n)) => info!("Orphan sweep removed {} workspace(s)", n),
                Ok(Err(e)) => warn!("Orphan sweep failed: {}", e),
                Err(e) => warn!("Orphan sweep task panicked: {}", e),
            }
        }
    })
}
