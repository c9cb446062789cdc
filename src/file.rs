//! File objects crossing the transform boundary
//!
//! An [`ArtifactFile`] is what the orchestrator pushes into and pulls out of
//! the remember transform: a relative + absolute path pair, a byte-content
//! accessor that may be empty or an unbounded stream, and an optional
//! source-map side-channel.

use std::fmt;
use std::path::PathBuf;

use tokio::io::AsyncRead;

/// Boxed unbounded byte stream.
///
/// Carried only so the transform can recognize and reject it; the cache
/// cannot persist content it cannot materialize.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Byte content of an artifact file
pub enum FileContents {
    /// No content, e.g. a listing-only pass
    Empty,
    /// Fully materialized bytes
    Buffer(Vec<u8>),
    /// Unbounded stream of bytes; unsupported by the cache
    Stream(ByteStream),
}

impl fmt::Debug for FileContents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Buffer(bytes) => write!(f, "Buffer({} bytes)", bytes.len()),
            Self::Stream(_) => write!(f, "Stream(..)"),
        }
    }
}

/// A build artifact flowing through the pipeline
#[derive(Debug)]
pub struct ArtifactFile {
    /// Absolute path of the artifact
    pub path: PathBuf,

    /// Path relative to the pipeline root; basis of the logical key
    pub relative: PathBuf,

    /// Byte content
    pub contents: FileContents,

    /// Attached source map, serialized alongside the cached copy
    pub source_map: Option<serde_json::Value>,
}

impl ArtifactFile {
    /// Create a file with materialized byte content
    pub fn buffered(
        path: impl Into<PathBuf>,
        relative: impl Into<PathBuf>,
        contents: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            path: path.into(),
            relative: relative.into(),
            contents: FileContents::Buffer(contents.into()),
            source_map: None,
        }
    }

    /// Create a content-less file
    pub fn empty(path: impl Into<PathBuf>, relative: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            relative: relative.into(),
            contents: FileContents::Empty,
            source_map: None,
        }
    }

    /// Create a file whose content is an unbounded stream
    pub fn streamed(
        path: impl Into<PathBuf>,
        relative: impl Into<PathBuf>,
        stream: ByteStream,
    ) -> Self {
        Self {
            path: path.into(),
            relative: relative.into(),
            contents: FileContents::Stream(stream),
            source_map: None,
        }
    }

    /// Attach a source map
    pub fn with_source_map(mut self, map: serde_json::Value) -> Self {
        self.source_map = Some(map);
        self
    }

    /// Whether this file carries no content
    pub fn is_empty(&self) -> bool {
        matches!(self.contents, FileContents::Empty)
    }

    /// Whether this file's content is an unbounded stream
    pub fn is_stream(&self) -> bool {
        matches!(self.contents, FileContents::Stream(_))
    }

    /// Materialized bytes, if any
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.contents {
            FileContents::Buffer(bytes) => Some(bytes),
            _ => None,
        }
    }
}
