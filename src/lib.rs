//! Recall - streaming remember-cache for incremental build pipelines
//!
//! Intercepts the files a build pass actually produced, persists each to a
//! durable cache keyed by its logical path, and replays cached copies of
//! everything the pass skipped, so downstream stages always see the complete
//! artifact set. Removed sources are garbage-collected from the cache; the
//! whole state survives process restarts through a JSON manifest.

pub mod error;
pub mod file;
pub mod manifest;
pub mod registry;
pub mod transform;

pub use error::{RecallError, RecallResult};
pub use file::{ArtifactFile, ByteStream, FileContents};
pub use registry::{Registry, DEFAULT_MANIFEST_FILE};
pub use transform::{Remember, RememberConfig, DEFAULT_DEST};
