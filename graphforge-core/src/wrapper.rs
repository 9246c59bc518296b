//! Wrapping snippets into compilation units.
//!
//! Corpus snippets are bare method bodies. The analyzer needs a complete
//! source file, so each snippet is embedded in a class named after the file
//! it came from and written into the sample's artifact directory, together
//! with the raw sample record.

use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::key::CanonicalKey;
use crate::sample::Sample;
use crate::store::ArtifactStore;

/// Paths produced by [`UnitWrapper::write`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WrappedUnit {
    /// The `{class}.java` compilation unit.
    pub unit_path: PathBuf,
    /// The sample's artifact directory.
    pub dir: PathBuf,
}

/// Embed `body` as the only member of a public class named `class_name`.
pub fn wrap_unit(body: &str, class_name: &str) -> String {
    format!("public class {} {{ \n{}\n }}", class_name, body)
}

/// Writes wrapped units and sample metadata into an [`ArtifactStore`].
#[derive(Clone, Debug)]
pub struct UnitWrapper {
    store: ArtifactStore,
}

impl UnitWrapper {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Materialize the sample: directory, wrapped unit and raw metadata.
    ///
    /// Existing files in the directory are overwritten.
    pub fn write(&self, sample: &Sample, key: &CanonicalKey) -> Result<WrappedUnit> {
        let dir = self.store.ensure_dir(key)?;

        let unit = wrap_unit(sample.code().unwrap_or(""), &key.class_name);
        let unit_path = self.store.unit_path(key);
        fs::write(&unit_path, unit).map_err(|e| PipelineError::io(&unit_path, e))?;

        let metadata_path = self.store.metadata_path(key);
        let metadata = to_json_indented(sample)?;
        fs::write(&metadata_path, metadata).map_err(|e| PipelineError::io(&metadata_path, e))?;

        debug!("Wrapped {} into {}", key, unit_path.display());
        Ok(WrappedUnit { unit_path, dir })
    }
}

/// Pretty JSON with four-space indentation.
fn to_json_indented<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(buf)
}
