//! Transient, per-session working directories.
//!
//! A [`Workspace`] is a scoped handle: it is released exactly once, either
//! explicitly through [`Workspace::release`] or implicitly when dropped. Drop
//! covers cancellation (the owning future is dropped mid-flight) and panics, so
//! no exit path leaves a directory behind.

use crate::config::types::{is_plain_file_name, WorkspaceConfig};
use crate::errors::KilnError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::{Builder, TempDir};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Creates uniquely named workspaces under a common root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    prefix: String,
    active: Arc<AtomicUsize>,
}

impl WorkspaceManager {
    pub fn new(config: &WorkspaceConfig) -> Self {
        Self {
            root: config.root.clone().unwrap_or_else(std::env::temp_dir),
            prefix: config.prefix.clone(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Parent directory under which workspaces are created.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of workspaces acquired and not yet released.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Create a new, empty, uniquely named directory.
    pub fn acquire(&self) -> Result<Workspace, KilnError> {
        let dir = Builder::new()
            .prefix(&self.prefix)
            .tempdir_in(&self.root)
            .map_err(|e| {
                KilnError::WorkspaceError(format!(
                    "Failed to create workspace under {}: {}",
                    self.root.display(),
                    e
                ))
            })?;

        self.active.fetch_add(1, Ordering::SeqCst);
        log::debug!("Acquired workspace {}", dir.path().display());

        Ok(Workspace {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
            active: Arc::clone(&self.active),
        })
    }
}

/// Handle to one acquired directory.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    dir: Option<TempDir>,
    active: Arc<AtomicUsize>,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Absolute path of a file inside the workspace.
    pub fn file(&self, filename: &str) -> PathBuf {
        self.path.join(filename)
    }

    /// Whether [`release`](Self::release) has already run.
    pub fn is_released(&self) -> bool {
        self.dir.is_none()
    }

    /// Write `content` to `filename` inside the workspace.
    pub async fn materialize(&self, filename: &str, content: &str) -> Result<PathBuf, KilnError> {
        if self.is_released() {
            return Err(KilnError::WorkspaceError(format!(
                "Workspace {} has already been released",
                self.path.display()
            )));
        }

        if !is_plain_file_name(filename) {
            return Err(KilnError::WorkspaceError(format!(
                "Refusing to write '{}' outside the workspace",
                filename
            )));
        }

        let target = self.file(filename);
        let write_err = |e: std::io::Error| {
            KilnError::WorkspaceError(format!("Failed to write {}: {}", target.display(), e))
        };

        let mut file = fs::File::create(&target).await.map_err(write_err)?;
        file.write_all(content.as_bytes()).await.map_err(write_err)?;
        file.flush().await.map_err(write_err)?;

        Ok(target)
    }

    /// Recursively delete the workspace. Idempotent; failures are logged.
    pub fn release(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        match dir.close() {
            Ok(()) => log::debug!("Released workspace {}", self.path.display()),
            Err(e) => log::warn!(
                "Failed to remove workspace {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.is_released() {
            log::debug!(
                "Workspace {} dropped without explicit release",
                self.path.display()
            );
            self.release();
        }
    }
}
