//! Manifest data model and its on-disk JSON shape
//!
//! The manifest maps namespace names to [`Namespace`] tables, each tracking
//! logical keys against cached copies on disk. In memory a namespace is a
//! proper record (destination directory + entry table); on disk it keeps the
//! historical flat shape where the reserved `"dest"` key sits inline among
//! the entries, so existing manifest files stay readable and tests can
//! assert on the wire format directly.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Namespace used when the caller does not name one.
pub const DEFAULT_NAMESPACE: &str = "cache";

/// Reserved key holding the namespace destination directory on disk.
const DEST_KEY: &str = "dest";

/// Top-level manifest: namespace name to namespace table.
///
/// Entry order is preserved so `preserve_order` replay can follow manifest
/// insertion order.
pub type Manifest = IndexMap<String, Namespace>;

/// One tracked logical file.
///
/// `cache` is captured when the entry is first created and reused on every
/// later pass, even if the namespace destination changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Expected location of the upstream source; missing origin triggers cleanup
    pub orig: PathBuf,

    /// Location of the persisted copy under the namespace destination
    pub cache: PathBuf,

    /// A companion source map exists at `cache` + ".map"
    #[serde(default, skip_serializing_if = "is_false")]
    pub map: bool,

    /// Entry has no real upstream origin; exempt from missing-origin cleanup
    #[serde(default, skip_serializing_if = "is_false")]
    pub generated: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// In-memory copy of a cached file, kept to skip a disk read during replay.
///
/// Never persisted; dropped whenever the corresponding entry is removed.
#[derive(Debug, Clone)]
pub struct HotFile {
    pub contents: Vec<u8>,
    pub source_map: Option<serde_json::Value>,
}

/// A named cache table within the shared registry
#[derive(Debug, Default)]
pub struct Namespace {
    /// Destination directory for this namespace's cached copies
    pub dest: PathBuf,

    /// Tracked entries in insertion order
    pub entries: IndexMap<String, CacheEntry>,

    /// Hot replay copies, keyed like `entries`
    pub hot: HashMap<String, HotFile>,
}

impl Namespace {
    /// Create an empty namespace pointed at `dest`
    pub fn with_dest(dest: impl Into<PathBuf>) -> Self {
        Self {
            dest: dest.into(),
            ..Default::default()
        }
    }
}

impl Serialize for Namespace {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len() + 1))?;
        map.serialize_entry(DEST_KEY, &self.dest)?;
        for (key, entry) in &self.entries {
            map.serialize_entry(key, entry)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Namespace {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NamespaceVisitor;

        impl<'de> Visitor<'de> for NamespaceVisitor {
            type Value = Namespace;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a cache namespace object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Namespace, A::Error> {
                let mut namespace = Namespace::default();
                while let Some(key) = access.next_key::<String>()? {
                    if key == DEST_KEY {
                        namespace.dest = access.next_value()?;
                    } else {
                        let entry = access.next_value()?;
                        namespace.entries.insert(key, entry);
                    }
                }
                Ok(namespace)
            }
        }

        deserializer.deserialize_map(NamespaceVisitor)
    }
}

/// Path of the source-map companion file for a cached copy
pub fn map_companion(cache: &Path) -> PathBuf {
    let mut companion = cache.as_os_str().to_os_string();
    companion.push(".map");
    PathBuf::from(companion)
}
