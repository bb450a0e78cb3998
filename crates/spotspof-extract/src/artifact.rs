//! Temp artifact lifecycle.
//!
//! The [`ArtifactManager`] hands out request-unique paths under a shared temp
//! directory. Each [`TempArtifact`] is owned by exactly one request and is
//! deleted exactly once: explicitly through [`TempArtifact::release`], or on
//! drop when the owning request fails or the client goes away.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use spotspof_core::{Error, Result};
use uuid::Uuid;

/// Every artifact file name starts with this prefix.
const ARTIFACT_PREFIX: &str = "spotspof-";

/// Fresh names tried before allocation gives up.
const MAX_ALLOCATION_ATTEMPTS: usize = 3;

const MAX_STEM_LEN: usize = 48;
const MAX_REQUEST_TAG_LEN: usize = 16;

/// Allocates request-unique temp artifact paths in one directory.
#[derive(Debug, Clone)]
pub struct ArtifactManager {
    dir: PathBuf,
    extension: String,
}

impl ArtifactManager {
    /// Create a manager, creating `dir` if it does not exist.
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            extension: extension.into(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Allocate a fresh path for `track_id` on behalf of `request_id`.
    ///
    /// The file is not created; the path is only guaranteed not to exist yet.
    /// A random token makes concurrent requests for the same track land on
    /// different paths.
    pub fn allocate(&self, track_id: &str, request_id: &str) -> Result<TempArtifact> {
        let stem = sanitize(track_id, MAX_STEM_LEN);
        let request_tag = sanitize(request_id, MAX_REQUEST_TAG_LEN);

        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let token = Uuid::new_v4().simple().to_string();
            let unique_stem = format!("{ARTIFACT_PREFIX}{stem}-{request_tag}-{token}");
            let path = self.dir.join(format!("{unique_stem}.{}", self.extension));

            if path.exists() {
                tracing::warn!(path = %path.display(), "Temp artifact name collision; retrying");
                continue;
            }

            tracing::debug!(
                path = %path.display(),
                request_id = %request_id,
                "Allocated temp artifact"
            );

            return Ok(TempArtifact {
                path,
                unique_stem,
                owner_request_id: request_id.to_string(),
                created_at: Utc::now(),
                released: AtomicBool::new(false),
            });
        }

        Err(Error::ArtifactIo {
            source: std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("could not allocate a unique temp path for '{track_id}'"),
            ),
        })
    }

    /// Delete artifacts left behind by a previous process that are older than
    /// `max_age`. Best-effort; returns the number of files removed.
    pub fn sweep_stale(&self, max_age: Duration) -> usize {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), "Cannot scan temp dir: {e}");
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(ARTIFACT_PREFIX) {
                continue;
            }
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age >= max_age);
            if !stale {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(
                    path = %entry.path().display(),
                    "Failed to remove stale artifact: {e}"
                ),
            }
        }

        if removed > 0 {
            tracing::info!("Removed {removed} stale temp artifacts");
        }
        removed
    }
}

/// A request-owned temp file path with guaranteed cleanup.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    unique_stem: String,
    owner_request_id: String,
    created_at: DateTime<Utc>,
    released: AtomicBool,
}

impl TempArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn owner_request_id(&self) -> &str {
        &self.owner_request_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Delete the artifact and any partial files the tool left next to it.
    ///
    /// Idempotent: only the first call touches the filesystem. A missing file
    /// is not an error. Each deletion is attempted once; failures are logged.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        remove_best_effort(&self.path);

        // Intermediate files share the unique stem (`<stem>.webm`, `<stem>.part`, ...).
        let Some(dir) = self.path.parent() else {
            return;
        };
        let sibling_prefix = format!("{}.", self.unique_stem);
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                if entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with(&sibling_prefix)
                {
                    remove_best_effort(&entry.path());
                }
            }
        }

        tracing::debug!(
            path = %self.path.display(),
            request_id = %self.owner_request_id,
            "Released temp artifact"
        );
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        self.release();
    }
}

fn remove_best_effort(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), "Failed to remove temp file: {e}"),
    }
}

fn sanitize(raw: &str, max_len: usize) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .take(max_len)
        .collect();
    if cleaned.is_empty() {
        "x".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn manager() -> (tempfile::TempDir, ArtifactManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = ArtifactManager::new(dir.path().join("artifacts"), "mp3").unwrap();
        (dir, manager)
    }

    #[test]
    fn new_creates_directory() {
        let (_dir, manager) = manager();
        assert!(manager.dir().is_dir());
    }

    #[test]
    fn same_track_gets_distinct_paths() {
        let (_dir, manager) = manager();
        let a = manager.allocate("abc123", "req-1").unwrap();
        let b = manager.allocate("abc123", "req-1").unwrap();
        assert_ne!(a.path(), b.path());
        assert_eq!(a.path().extension().unwrap(), "mp3");
        assert!(a.path().starts_with(manager.dir()));
    }

    #[test]
    fn many_allocations_never_collide() {
        let (_dir, manager) = manager();
        let paths: HashSet<PathBuf> = (0..200)
            .map(|_| manager.allocate("same", "same").unwrap().path().to_path_buf())
            .collect();
        assert_eq!(paths.len(), 200);
    }

    #[test]
    fn hostile_ids_stay_inside_dir() {
        let (_dir, manager) = manager();
        let artifact = manager.allocate("../../etc/passwd", "../x").unwrap();
        assert_eq!(artifact.path().parent().unwrap(), manager.dir());
        let name = artifact.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("spotspof-etcpasswd-x-"));
    }

    #[test]
    fn release_deletes_file_and_partials() {
        let (_dir, manager) = manager();
        let artifact = manager.allocate("song", "r").unwrap();
        std::fs::write(artifact.path(), b"audio").unwrap();
        let partial = artifact.path().with_extension("webm.part");
        std::fs::write(&partial, b"partial").unwrap();
        let unrelated = manager.dir().join("spotspof-other.mp3");
        std::fs::write(&unrelated, b"keep").unwrap();

        artifact.release();

        assert!(!artifact.path().exists());
        assert!(!partial.exists());
        assert!(unrelated.exists());
        assert!(artifact.is_released());
    }

    #[test]
    fn release_twice_is_a_noop() {
        let (_dir, manager) = manager();
        let artifact = manager.allocate("song", "r").unwrap();
        std::fs::write(artifact.path(), b"audio").unwrap();
        artifact.release();
        artifact.release();
        assert!(!artifact.path().exists());
    }

    #[test]
    fn release_without_file_is_fine() {
        let (_dir, manager) = manager();
        let artifact = manager.allocate("never-written", "r").unwrap();
        artifact.release();
        assert!(artifact.is_released());
    }

    #[test]
    fn drop_releases() {
        let (_dir, manager) = manager();
        let path = {
            let artifact = manager.allocate("song", "r").unwrap();
            std::fs::write(artifact.path(), b"audio").unwrap();
            artifact.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn records_owner() {
        let (_dir, manager) = manager();
        let before = Utc::now();
        let artifact = manager.allocate("song", "request-42").unwrap();
        assert_eq!(artifact.owner_request_id(), "request-42");
        assert!(artifact.created_at() >= before);
    }

    #[test]
    fn sweep_removes_only_old_artifacts() {
        let (_dir, manager) = manager();
        let old = manager.dir().join("spotspof-old-x-1.mp3");
        let foreign = manager.dir().join("notes.txt");
        std::fs::write(&old, b"x").unwrap();
        std::fs::write(&foreign, b"x").unwrap();

        assert_eq!(manager.sweep_stale(Duration::from_secs(3600)), 0);
        assert!(old.exists());

        assert_eq!(manager.sweep_stale(Duration::ZERO), 1);
        assert!(!old.exists());
        assert!(foreign.exists());
    }
}
