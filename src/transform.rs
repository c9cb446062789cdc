//! The remember transform
//!
//! One transform instance handles exactly one pass: it intercepts each file
//! the pipeline produced this run (writing a copy under the namespace
//! destination and passing the file through unchanged), then on flush
//! replays cached copies of files the run did not touch and garbage-collects
//! entries whose upstream origin disappeared.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use futures_util::future::join_all;
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{RecallError, RecallResult};
use crate::file::{ArtifactFile, FileContents};
use crate::manifest::{map_companion, CacheEntry, HotFile, Namespace, DEFAULT_NAMESPACE};
use crate::registry::{remove_file_quiet, write_file, Registry};

/// Default destination directory for cached copies.
pub const DEFAULT_DEST: &str = "out";

/// Per-pass transform configuration
#[derive(Debug, Clone)]
pub struct RememberConfig {
    /// Destination directory for cached copies
    pub dest: PathBuf,

    /// Namespace in the shared registry
    pub cache_name: String,

    /// Extension of the *source* file, e.g. ".ts"; when set, logical keys
    /// and origin paths track the source identity instead of the artifact's
    pub original_extension: Option<String>,

    /// Replay cached files strictly in manifest insertion order
    pub preserve_order: bool,

    /// Mark every entry from this pass as generated (no upstream origin,
    /// exempt from missing-origin cleanup)
    pub generated: bool,
}

impl Default for RememberConfig {
    fn default() -> Self {
        Self {
            dest: PathBuf::from(DEFAULT_DEST),
            cache_name: DEFAULT_NAMESPACE.to_string(),
            original_extension: None,
            preserve_order: false,
            generated: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransformState {
    Collecting,
    Flushing,
    Done,
}

/// Stream stage that remembers files this pass and replays the rest at flush.
///
/// Callers must not drive two instances against the same namespace
/// concurrently; see the registry docs.
pub struct Remember {
    registry: Registry,
    config: RememberConfig,
    seen: HashSet<String>,
    state: TransformState,
}

impl Remember {
    /// Create a transform for one pass over `config.cache_name`.
    ///
    /// Ensures the namespace exists and points its destination at
    /// `config.dest`. Existing entries keep the cache paths captured when
    /// they were first written.
    pub async fn new(registry: Registry, config: RememberConfig) -> Self {
        {
            let mut state = registry.lock().await;
            let table = state
                .manifest
                .entry(config.cache_name.clone())
                .or_insert_with(Namespace::default);
            table.dest = config.dest.clone();
        }

        Self {
            registry,
            config,
            seen: HashSet::new(),
            state: TransformState::Collecting,
        }
    }

    /// Logical key for a file: its relative path, with the extension
    /// rewritten to the configured source extension when one is set.
    fn logical_key(&self, relative: &Path) -> String {
        self.remap(relative).to_string_lossy().into_owned()
    }

    fn remap(&self, path: &Path) -> PathBuf {
        match &self.config.original_extension {
            Some(ext) => path.with_extension(ext.trim_start_matches('.')),
            None => path.to_path_buf(),
        }
    }

    /// Intercept one file produced this pass.
    ///
    /// Persists its bytes (and source map, if attached) under the namespace
    /// destination, records it in the registry, and returns the file
    /// unchanged for downstream stages. Content-less files are registered
    /// but nothing is written for them; stream content is rejected.
    pub async fn remember(&mut self, file: ArtifactFile) -> RecallResult<ArtifactFile> {
        if self.state != TransformState::Collecting {
            return Err(RecallError::TransformFinished);
        }

        if file.is_stream() {
            return Err(RecallError::StreamingContent(file.path.clone()));
        }

        let key = self.logical_key(&file.relative);
        self.seen.insert(key.clone());

        let orig = self.remap(&file.path);
        let mut state = self.registry.lock().await;
        let table = state
            .manifest
            .entry(self.config.cache_name.clone())
            .or_insert_with(|| Namespace::with_dest(&self.config.dest));

        // An existing entry keeps its captured paths; a fresh one derives
        // them from the current pass.
        let mut entry = table.entries.get(&key).cloned().unwrap_or_else(|| CacheEntry {
            orig,
            cache: self.config.dest.join(&file.relative),
            map: false,
            generated: false,
        });
        if self.config.generated {
            entry.generated = true;
        }

        let mut hot = None;
        match &file.contents {
            FileContents::Empty => {
                debug!("{key}: no content, registered without writing");
            }
            FileContents::Buffer(bytes) => {
                write_file(&entry.cache, bytes).await?;
                let mut copy = HotFile {
                    contents: bytes.clone(),
                    source_map: None,
                };

                if let Some(map) = &file.source_map {
                    let serialized = serde_json::to_vec(map)?;
                    write_file(&map_companion(&entry.cache), &serialized).await?;
                    entry.map = true;
                    copy.source_map = Some(map.clone());
                }

                hot = Some(copy);
            }
            // Rejected above before any bookkeeping
            FileContents::Stream(_) => unreachable!("stream content rejected on entry"),
        }

        // Metadata is recorded only once the content writes have succeeded,
        // so a failed write cannot leave an entry pointing at a missing
        // file. Re-inserting an existing key keeps its manifest position.
        table.entries.insert(key.clone(), entry);
        if let Some(copy) = hot {
            table.hot.insert(key, copy);
        }

        Ok(file)
    }

    /// End the pass: garbage-collect stale entries, replay the rest, persist.
    ///
    /// Returns the replayed files once the manifest write has completed.
    /// Entries seen this pass are left untouched; unseen entries whose
    /// origin vanished (and that are not generated) are removed along with
    /// their cached copies.
    pub async fn flush(&mut self) -> RecallResult<Vec<ArtifactFile>> {
        if self.state != TransformState::Collecting {
            return Err(RecallError::TransformFinished);
        }
        self.state = TransformState::Flushing;

        let mut state = self.registry.lock().await;
        let mut replayed = Vec::new();

        let Some(table) = state.manifest.get_mut(&self.config.cache_name) else {
            // Namespace reset out from under this pass; nothing to replay.
            self.seen.clear();
            self.state = TransformState::Done;
            state.persist().await?;
            return Ok(replayed);
        };

        let dest = table.dest.clone();
        let keys: Vec<String> = table.entries.keys().cloned().collect();
        let mut jobs: Vec<(String, CacheEntry, Option<HotFile>)> = Vec::new();

        for key in keys {
            if self.seen.contains(&key) {
                continue;
            }

            let entry = table.entries[&key].clone();
            let origin_exists = fs::try_exists(&entry.orig).await.unwrap_or(false);

            if !entry.generated && !origin_exists {
                table.entries.shift_remove(&key);
                table.hot.remove(&key);
                remove_file_quiet(&entry.cache).await?;
                if entry.map {
                    remove_file_quiet(&map_companion(&entry.cache)).await?;
                }
                debug!("{key}: origin gone, entry dropped");
            } else {
                let hot = table.hot.get(&key).cloned();
                jobs.push((key, entry, hot));
            }
        }

        if self.config.preserve_order {
            for (key, entry, hot) in jobs {
                if let Some(file) = replay_entry(&dest, &key, &entry, hot).await? {
                    replayed.push(file);
                }
            }
        } else {
            let reads = jobs.into_iter().map(|(key, entry, hot)| {
                let dest = dest.clone();
                async move { replay_entry(&dest, &key, &entry, hot).await }
            });
            for result in join_all(reads).await {
                if let Some(file) = result? {
                    replayed.push(file);
                }
            }
        }

        self.seen.clear();
        state.persist().await?;
        self.state = TransformState::Done;

        Ok(replayed)
    }

    /// Channel driver for orchestrators.
    ///
    /// Forwards every input file through [`remember`](Self::remember) in
    /// input order, then flushes and pushes the replayed files. Per-file
    /// unsupported-content errors are logged and skipped; hard I/O errors
    /// abort the pass. Returns only after the manifest has been persisted.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<ArtifactFile>,
        output: mpsc::Sender<ArtifactFile>,
    ) -> RecallResult<()> {
        while let Some(file) = input.recv().await {
            match self.remember(file).await {
                Ok(file) => {
                    if output.send(file).await.is_err() {
                        debug!("output receiver dropped, ending pass early");
                        break;
                    }
                }
                Err(err @ RecallError::StreamingContent(_)) => {
                    warn!("{err}");
                }
                Err(err) => return Err(err),
            }
        }

        for file in self.flush().await? {
            if output.send(file).await.is_err() {
                break;
            }
        }

        Ok(())
    }
}

/// Re-emit one cached entry as a file object.
///
/// Reads from the hot copy when present, the disk otherwise. A cache file
/// missing on disk is the expected deletion race and yields `None`; any
/// other read failure aborts the flush.
async fn replay_entry(
    dest: &Path,
    key: &str,
    entry: &CacheEntry,
    hot: Option<HotFile>,
) -> RecallResult<Option<ArtifactFile>> {
    let (contents, mut source_map) = match hot {
        Some(hot) => (hot.contents, hot.source_map),
        None => match fs::read(&entry.cache).await {
            Ok(bytes) => (bytes, None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{key}: cached copy vanished, skipping replay");
                return Ok(None);
            }
            Err(e) => {
                return Err(RecallError::io(
                    format!("reading cached copy {}", entry.cache.display()),
                    e,
                ))
            }
        },
    };

    if entry.map && source_map.is_none() {
        let companion = map_companion(&entry.cache);
        match fs::read(&companion).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(map) => source_map = Some(map),
                Err(e) => warn!("{key}: unparsable source map, dropped: {e}"),
            },
            Err(e) => debug!("{key}: source map {} unreadable: {e}", companion.display()),
        }
    }

    let relative = entry
        .cache
        .strip_prefix(dest)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| PathBuf::from(key));

    let mut file = ArtifactFile::buffered(entry.cache.clone(), relative, contents);
    if let Some(map) = source_map {
        file = file.with_source_map(map);
    }

    Ok(Some(file))
}
