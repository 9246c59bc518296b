//! Artifact directory layout.
//!
//! Every sample owns one directory under the output root, named by its
//! [`CanonicalKey`]. The directory's existence is the only record that a
//! sample was already handled; there is no separate index.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::key::CanonicalKey;

/// Extension of the wrapped compilation unit.
pub const UNIT_EXTENSION: &str = "java";
/// Suffix the analyzer appends to the unit path for its IR file.
pub const IR_SUFFIX: &str = ".proto";
/// Suffix of the structural graph written by the converter.
pub const DOT_SUFFIX: &str = ".dot";
/// Suffix of the JSON graph written by the converter.
pub const GRAPH_JSON_SUFFIX: &str = ".json";

/// Output root holding one directory per canonical key.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory owned by `key`.
    pub fn dir_for(&self, key: &CanonicalKey) -> PathBuf {
        self.root.join(key.dir_name())
    }

    /// Atomically take ownership of the directory for `key`.
    ///
    /// Returns `None` when the directory already exists, whether it was built
    /// by an earlier run or claimed by a concurrent job in this one.
    pub fn claim(&self, key: &CanonicalKey) -> Result<Option<PathBuf>> {
        fs::create_dir_all(&self.root).map_err(|e| PipelineError::io(&self.root, e))?;
        let dir = self.dir_for(key);
        match fs::create_dir(&dir) {
            Ok(()) => Ok(Some(dir)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(PipelineError::io(&dir, e)),
        }
    }

    /// Create the directory for `key` if it is absent.
    pub fn ensure_dir(&self, key: &CanonicalKey) -> Result<PathBuf> {
        let dir = self.dir_for(key);
        fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;
        Ok(dir)
    }

    /// `{dir}/{class}.java`
    pub fn unit_path(&self, key: &CanonicalKey) -> PathBuf {
        self.dir_for(key)
            .join(format!("{}.{}", key.class_name, UNIT_EXTENSION))
    }

    /// `{dir}/{class}.json`, the raw sample.
    pub fn metadata_path(&self, key: &CanonicalKey) -> PathBuf {
        self.dir_for(key).join(format!("{}.json", key.class_name))
    }
}

/// Append `suffix` to the full file name of `path` (`Foo.java` -> `Foo.java.proto`).
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}
