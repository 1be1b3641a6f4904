//! Scratch directory for in-flight pipeline files.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::debug;

use super::error::TranscribeError;

/// Entries older than this are swept when the workspace is re-opened.
const MAX_SCRATCH_AGE: Duration = Duration::from_secs(60 * 60);

/// The scratch directory used by every pipeline stage. Concurrent requests
/// share the directory but never a file: names carry a timestamp and a random
/// suffix.
#[derive(Debug, Clone)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    /// Open the shared scratch directory under the platform temp dir,
    /// creating it if absent.
    pub fn ensure() -> Result<Self, TranscribeError> {
        Self::ensure_at(std::env::temp_dir().join("vm-scribe"))
    }

    /// Idempotent: re-opening an existing workspace only sweeps stale
    /// entries, it never touches fresh ones.
    pub fn ensure_at(dir: PathBuf) -> Result<Self, TranscribeError> {
        if dir.exists() {
            sweep(&dir, MAX_SCRATCH_AGE);
        }
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A collision-resistant path for one pipeline stage's output.
    pub fn scratch_path(&self, ext: &str) -> PathBuf {
        let name = format!(
            "vm_{}_{}.{}",
            chrono::Utc::now().timestamp_millis(),
            uuid::Uuid::new_v4().simple(),
            ext
        );
        self.dir.join(name)
    }
}

/// Best-effort: a sweep failure must never keep the workspace from opening,
/// and concurrent requests may delete entries underneath us.
fn sweep(dir: &Path, max_age: Duration) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let now = SystemTime::now();
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else { continue };
        let Ok(modified) = meta.modified() else { continue };
        let expired = now
            .duration_since(modified)
            .map_or(false, |age| age > max_age);
        if expired {
            debug!("[workspace] sweeping stale entry {}", entry.path().display());
            let _ = fs::remove_file(entry.path());
        }
    }
}
