//! Hash-sharded directory layout for payload bytes.
//!
//! An object's payload directory is a pure function of its id:
//!
//! ```text
//! <payloads root>/<seg>/<seg>/<seg>/<seg>/<seg>/<escaped id>/<escaped payload name>
//! ```
//!
//! where the segments are consecutive slices of a hex digest of the id. The
//! digest function is pluggable through [`ShardHash`] so the layout can be
//! exercised with synthetic ids.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Produces the hex digest an id is sharded by.
pub trait ShardHash: Send + Sync {
    fn hex_digest(&self, id: &str) -> String;
}

/// Built-in digest algorithms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// MD5, compatible with existing data directories.
    #[default]
    Md5,
    Blake3,
}

impl ShardHash for HashAlgorithm {
    fn hex_digest(&self, id: &str) -> String {
        match self {
            Self::Md5 => hex::encode(Md5::digest(id.as_bytes())),
            Self::Blake3 => blake3::hash(id.as_bytes()).to_hex().to_string(),
        }
    }
}

/// Serializable layout parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardLayoutConfig {
    #[serde(default = "default_hash_length")]
    pub hash_length: usize,
    #[serde(default = "default_segment_length")]
    pub segment_length: usize,
    #[serde(default)]
    pub hash: HashAlgorithm,
}

fn default_hash_length() -> usize {
    ShardLayout::DEFAULT_HASH_LENGTH
}

fn default_segment_length() -> usize {
    ShardLayout::DEFAULT_SEGMENT_LENGTH
}

impl Default for ShardLayoutConfig {
    fn default() -> Self {
        Self {
            hash_length: ShardLayout::DEFAULT_HASH_LENGTH,
            segment_length: ShardLayout::DEFAULT_SEGMENT_LENGTH,
            hash: HashAlgorithm::default(),
        }
    }
}

/// Maps object ids to nested shard directories.
#[derive(Clone)]
pub struct ShardLayout {
    hash_length: usize,
    segment_length: usize,
    hasher: Arc<dyn ShardHash>,
}

impl ShardLayout {
    pub const DEFAULT_HASH_LENGTH: usize = 15;
    pub const DEFAULT_SEGMENT_LENGTH: usize = 3;

    /// Build a layout using the first `hash_length` digest characters split
    /// into `segment_length`-character directory names.
    pub fn new(
        hash_length: usize,
        segment_length: usize,
        hasher: impl ShardHash + 'static,
    ) -> StoreResult<Self> {
        if hash_length == 0 || segment_length == 0 {
            return Err(StoreError::BadRequest(format!(
                "shard layout needs non-zero lengths (hash {hash_length}, segment {segment_length})"
            )));
        }
        Ok(Self {
            hash_length,
            segment_length,
            hasher: Arc::new(hasher),
        })
    }

    pub fn from_config(config: &ShardLayoutConfig) -> StoreResult<Self> {
        Self::new(config.hash_length, config.segment_length, config.hash)
    }

    /// Number of shard directory levels above each object directory.
    pub fn depth(&self) -> usize {
        self.hash_length.div_ceil(self.segment_length)
    }

    /// The shard directory names for `id`, outermost first.
    ///
    /// A digest shorter than `hash_length` is used in full; the last segment
    /// may be shorter than `segment_length`.
    pub fn segments(&self, id: &str) -> Vec<String> {
        let digest = self.hasher.hex_digest(id);
        let hex: Vec<char> = digest.chars().take(self.hash_length).collect();
        hex.chunks(self.segment_length)
            .map(|chunk| chunk.iter().collect())
            .collect()
    }

    /// Object directory relative to the payloads root.
    pub fn relative_dir(&self, id: &str) -> PathBuf {
        let mut path: PathBuf = self.segments(id).into_iter().collect();
        path.push(escape_file_name(id));
        path
    }

    /// Object directory under `root`.
    pub fn object_dir(&self, root: &Path, id: &str) -> PathBuf {
        root.join(self.relative_dir(id))
    }
}

impl Default for ShardLayout {
    fn default() -> Self {
        Self {
            hash_length: Self::DEFAULT_HASH_LENGTH,
            segment_length: Self::DEFAULT_SEGMENT_LENGTH,
            hasher: Arc::new(HashAlgorithm::Md5),
        }
    }
}

impl fmt::Debug for ShardLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardLayout")
            .field("hash_length", &self.hash_length)
            .field("segment_length", &self.segment_length)
            .finish()
    }
}

/// Encode an arbitrary string as a portable file name.
///
/// ASCII letters, digits, `_` and `-` pass through; every other UTF-8 byte
/// becomes `.` followed by two uppercase hex digits. The encoding is
/// injective, so distinct ids never share a directory.
pub fn escape_file_name(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 10);
    for &b in s.as_bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push('.');
            out.push_str(&format!("{b:02X}"));
        }
    }
    out
}

/// OS-generated files that do not keep a directory alive.
const HOUSEKEEPING_FILES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];

/// Remove `start` and each ancestor that is empty, stopping at the first
/// non-empty directory or at `root` (which is never removed).
///
/// Housekeeping files are deleted on the way. Returns the number of
/// directories removed.
pub fn prune_empty_dirs(start: &Path, root: &Path) -> io::Result<usize> {
    let mut removed = 0;
    let mut current = start.to_path_buf();

    while current.starts_with(root) && current != root {
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match current.parent() {
                    Some(parent) => {
                        current = parent.to_path_buf();
                        continue;
                    }
                    None => break,
                }
            }
            Err(e) => return Err(e),
        };

        let mut occupied = false;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let is_housekeeping = name
                .to_str()
                .is_some_and(|n| HOUSEKEEPING_FILES.contains(&n));
            if is_housekeeping && fs::remove_file(entry.path()).is_ok() {
                continue;
            }
            occupied = true;
            break;
        }
        if occupied {
            break;
        }

        match fs::remove_dir(&current) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                // Repopulated by a concurrent writer.
                debug!(dir = %current.display(), error = %e, "stopped pruning");
                break;
            }
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct FixedHash(&'static str);

    impl ShardHash for FixedHash {
        fn hex_digest(&self, _id: &str) -> String {
            self.0.to_string()
        }
    }

    // -----------------------------------------------------------------------
    // Path computation
    // -----------------------------------------------------------------------

    #[test]
    fn default_layout_has_five_levels() {
        let layout = ShardLayout::default();
        assert_eq!(layout.depth(), 5);
        let segments = layout.segments("test/abc");
        assert_eq!(segments.len(), 5);
        assert!(segments.iter().all(|s| s.len() == 3));
    }

    #[test]
    fn md5_segments_match_digest_prefix() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        let layout = ShardLayout::default();
        assert_eq!(layout.segments(""), vec!["d41", "d8c", "d98", "f00", "b20"]);
    }

    #[test]
    fn relative_dir_ends_with_escaped_id() {
        let layout = ShardLayout::new(6, 3, FixedHash("abcdef0123")).unwrap();
        let dir = layout.relative_dir("20.500/x y");
        assert_eq!(dir, PathBuf::from("abc/def/20.2E500.2Fx.20y"));
    }

    #[test]
    fn short_last_segment() {
        let layout = ShardLayout::new(7, 3, FixedHash("abcdefgh")).unwrap();
        assert_eq!(layout.depth(), 3);
        assert_eq!(layout.segments("any"), vec!["abc", "def", "g"]);
    }

    #[test]
    fn blake3_layout_is_deterministic() {
        let layout = ShardLayout::new(15, 3, HashAlgorithm::Blake3).unwrap();
        assert_eq!(layout.segments("obj/1"), layout.segments("obj/1"));
        assert_ne!(
            layout.segments("obj/1"),
            ShardLayout::default().segments("obj/1")
        );
    }

    #[test]
    fn zero_lengths_are_rejected() {
        assert!(ShardLayout::new(0, 3, HashAlgorithm::Md5).is_err());
        assert!(ShardLayout::new(15, 0, HashAlgorithm::Md5).is_err());
    }

    #[test]
    fn config_defaults() {
        let config: ShardLayoutConfig = toml::from_str("").unwrap();
        assert_eq!(config, ShardLayoutConfig::default());
        let config: ShardLayoutConfig = toml::from_str("hash = \"blake3\"\nsegment_length = 5").unwrap();
        assert_eq!(config.hash, HashAlgorithm::Blake3);
        assert_eq!(config.hash_length, 15);
        assert_eq!(ShardLayout::from_config(&config).unwrap().depth(), 3);
    }

    // -----------------------------------------------------------------------
    // File name escaping
    // -----------------------------------------------------------------------

    #[test]
    fn escape_keeps_safe_characters() {
        assert_eq!(escape_file_name("Abc_9-z"), "Abc_9-z");
    }

    #[test]
    fn escape_encodes_everything_else() {
        assert_eq!(escape_file_name("a.b"), "a.2Eb");
        assert_eq!(escape_file_name("é"), ".C3.A9");
        assert_eq!(escape_file_name("../"), ".2E.2E.2F");
    }

    proptest! {
        #[test]
        fn escaped_names_are_portable(s in ".*") {
            let escaped = escape_file_name(&s);
            prop_assert!(escaped
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.'));
        }

        #[test]
        fn escaping_is_injective(a in ".{0,12}", b in ".{0,12}") {
            prop_assume!(a != b);
            prop_assert_ne!(escape_file_name(&a), escape_file_name(&b));
        }
    }

    // -----------------------------------------------------------------------
    // Pruning
    // -----------------------------------------------------------------------

    #[test]
    fn prune_removes_empty_chain_but_not_root() {
        let root = tempfile::tempdir().unwrap();
        let leaf = root.path().join("a/b/c");
        fs::create_dir_all(&leaf).unwrap();

        let removed = prune_empty_dirs(&leaf, root.path()).unwrap();
        assert_eq!(removed, 3);
        assert!(root.path().exists());
        assert!(!root.path().join("a").exists());
    }

    #[test]
    fn prune_stops_at_first_occupied_ancestor() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("a/b/c")).unwrap();
        fs::write(root.path().join("a/keep.bin"), b"x").unwrap();

        let removed = prune_empty_dirs(&root.path().join("a/b/c"), root.path()).unwrap();
        assert_eq!(removed, 2);
        assert!(root.path().join("a/keep.bin").exists());
        assert!(!root.path().join("a/b").exists());
    }

    #[test]
    fn prune_deletes_housekeeping_files() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("a/b");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(".DS_Store"), b"junk").unwrap();

        prune_empty_dirs(&dir, root.path()).unwrap();
        assert!(!root.path().join("a").exists());
    }

    #[test]
    fn prune_skips_missing_start() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("a")).unwrap();
        let removed = prune_empty_dirs(&root.path().join("a/gone"), root.path()).unwrap();
        assert_eq!(removed, 1);
    }
}
