//! Shared manifest registry
//!
//! The registry owns the manifest and its backing file: loaded once, mutated
//! in memory by every transform pass and by the invalidation API, and
//! rewritten whole after every mutation batch. It is explicitly constructed
//! and injected; every [`Remember`](crate::transform::Remember) handed a
//! clone of the same registry shares the same in-memory manifest and the
//! same file on disk.
//!
//! Two transforms driving the *same* namespace concurrently are not
//! serialized beyond the per-operation lock; callers must sequence them or
//! accept last-write-wins on the persisted file. Different namespaces are
//! independent.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::{RecallError, RecallResult};
use crate::manifest::{map_companion, Manifest, DEFAULT_NAMESPACE};

/// Default manifest file name, relative to the working directory.
pub const DEFAULT_MANIFEST_FILE: &str = ".recall-cache.json";

pub(crate) struct RegistryState {
    pub(crate) manifest_path: PathBuf,
    pub(crate) manifest: Manifest,
}

impl RegistryState {
    /// Rewrite the whole manifest file, pretty-printed. Last writer wins.
    pub(crate) async fn persist(&self) -> RecallResult<()> {
        if let Some(parent) = self.manifest_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| RecallError::io("creating manifest directory", e))?;
        }

        let content = serde_json::to_string_pretty(&self.manifest)?;
        fs::write(&self.manifest_path, content).await.map_err(|e| {
            RecallError::io(
                format!("writing manifest to {}", self.manifest_path.display()),
                e,
            )
        })?;

        debug!("Manifest persisted to {}", self.manifest_path.display());
        Ok(())
    }
}

/// Handle to the process-wide cache registry
#[derive(Clone)]
pub struct Registry {
    state: Arc<Mutex<RegistryState>>,
}

impl Registry {
    /// Load the registry from `manifest_path`.
    ///
    /// A missing or malformed manifest file yields an empty registry; load
    /// failure is never surfaced to the caller.
    pub async fn load(manifest_path: impl Into<PathBuf>) -> Self {
        let manifest_path = manifest_path.into();

        let manifest = match fs::read(&manifest_path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(manifest) => manifest,
                Err(e) => {
                    debug!(
                        "Malformed manifest at {}, starting empty: {e}",
                        manifest_path.display()
                    );
                    Manifest::default()
                }
            },
            Err(e) => {
                debug!(
                    "No manifest at {}, starting empty: {e}",
                    manifest_path.display()
                );
                Manifest::default()
            }
        };

        Self {
            state: Arc::new(Mutex::new(RegistryState {
                manifest_path,
                manifest,
            })),
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().await
    }

    /// Serialize the registry to its backing file
    pub async fn persist(&self) -> RecallResult<()> {
        self.state.lock().await.persist().await
    }

    /// Snapshot of the manifest as it would be serialized.
    ///
    /// Intended for tests and diagnostics that assert on the wire shape
    /// without re-reading the file.
    pub async fn manifest_json(&self) -> RecallResult<serde_json::Value> {
        let state = self.state.lock().await;
        Ok(serde_json::to_value(&state.manifest)?)
    }

    /// Remove one entry from one namespace and delete its cached copy.
    ///
    /// A missing namespace or key is a successful no-op.
    pub async fn forget(&self, namespace: Option<&str>, key: &str) -> RecallResult<()> {
        let name = namespace.unwrap_or(DEFAULT_NAMESPACE);
        let mut state = self.state.lock().await;

        let Some(table) = state.manifest.get_mut(name) else {
            debug!("forget: namespace {name} not tracked, nothing to do");
            return Ok(());
        };
        let Some(entry) = table.entries.shift_remove(key) else {
            debug!("forget: {key} not tracked in {name}, nothing to do");
            return Ok(());
        };
        table.hot.remove(key);

        remove_file_quiet(&entry.cache).await?;
        if entry.map {
            remove_file_quiet(&map_companion(&entry.cache)).await?;
        }

        state.persist().await
    }

    /// Remove a whole namespace and delete its destination directory.
    ///
    /// A missing namespace is a successful no-op.
    pub async fn reset(&self, namespace: Option<&str>) -> RecallResult<()> {
        let name = namespace.unwrap_or(DEFAULT_NAMESPACE);
        let mut state = self.state.lock().await;

        let Some(table) = state.manifest.shift_remove(name) else {
            debug!("reset: namespace {name} not tracked, nothing to do");
            return Ok(());
        };

        remove_dir_quiet(&table.dest).await?;
        state.persist().await
    }

    /// Remove every namespace and delete every destination directory.
    ///
    /// Directory deletions run concurrently; the single final persist waits
    /// for all of them.
    pub async fn reset_all(&self) -> RecallResult<()> {
        let mut state = self.state.lock().await;
        let tables: Vec<_> = state.manifest.drain(..).map(|(_, table)| table).collect();

        let deletions = join_all(tables.iter().map(|table| remove_dir_quiet(&table.dest)));
        for result in deletions.await {
            result?;
        }

        state.persist().await
    }
}

/// Write `contents` to `path`, creating parent directories.
pub(crate) async fn write_file(path: &Path, contents: &[u8]) -> RecallResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| RecallError::io(format!("creating {}", parent.display()), e))?;
    }
    fs::write(path, contents)
        .await
        .map_err(|e| RecallError::io(format!("writing {}", path.display()), e))
}

/// Delete a file, treating "already gone" as success.
pub(crate) async fn remove_file_quiet(path: &Path) -> RecallResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RecallError::io(format!("deleting {}", path.display()), e)),
    }
}

/// Delete a directory tree, treating "already gone" as success.
pub(crate) async fn remove_dir_quiet(path: &Path) -> RecallResult<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RecallError::io(format!("deleting {}", path.display()), e)),
    }
}
