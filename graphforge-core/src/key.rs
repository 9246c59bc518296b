//! Canonical sample identity.
//!
//! A [`CanonicalKey`] is derived from a sample's provenance only, so the same
//! record always maps to the same artifact directory no matter which worker
//! or run handles it. The directory name is the pipeline's memoization key.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::sample::Sample;

/// `L<start>-L<end>`; the `L` markers are optional.
static LINE_RANGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^L?(\d+)-L?(\d+)$").unwrap());

/// Source file extension stripped from the class path.
const SOURCE_EXTENSION: &str = ".java";

/// Identity of one sample: `(project, class_name, start_line, end_line)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CanonicalKey {
    pub project: String,
    pub class_name: String,
    pub start_line: u32,
    pub end_line: u32,
    /// Line numbers as written in the url, leading zeros included.
    #[serde(skip)]
    range_digits: (String, String),
}

impl CanonicalKey {
    /// Derive the key for a sample.
    pub fn derive(sample: &Sample) -> Result<Self> {
        let url = sample.url().ok_or_else(|| PipelineError::MalformedProvenance {
            url: String::new(),
            reason: "missing url field",
        })?;
        Self::from_url(url, sample.project().unwrap_or(""))
    }

    /// Derive a key from a provenance URL and a raw project identifier.
    pub fn from_url(url: &str, project: &str) -> Result<Self> {
        let malformed = |reason| PipelineError::MalformedProvenance {
            url: url.to_string(),
            reason,
        };

        let last_segment = url.rsplit('/').next().unwrap_or(url);
        let mut parts = last_segment.split('#');
        let (class_path, range) = match (parts.next(), parts.next(), parts.next()) {
            (Some(path), Some(range), None) => (path, range),
            (_, None, _) => return Err(malformed("missing '#' line range")),
            _ => return Err(malformed("more than one '#' in url")),
        };

        let class_name = class_path
            .split(SOURCE_EXTENSION)
            .next()
            .unwrap_or(class_path);
        if class_name.is_empty() {
            return Err(malformed("empty class name"));
        }

        let caps = LINE_RANGE
            .captures(range)
            .ok_or_else(|| malformed("line range is not L<start>-L<end>"))?;
        let start_line = caps[1]
            .parse()
            .map_err(|_| malformed("start line out of range"))?;
        let end_line = caps[2]
            .parse()
            .map_err(|_| malformed("end line out of range"))?;

        Ok(Self {
            project: project.replace('/', "-"),
            class_name: class_name.to_string(),
            start_line,
            end_line,
            range_digits: (caps[1].to_string(), caps[2].to_string()),
        })
    }

    /// Destination directory name, `{project}_{class}_{start}_{end}`.
    ///
    /// Line numbers keep their original spelling, so `L010` and `L10` name
    /// different directories.
    pub fn dir_name(&self) -> String {
        let (start, end) = &self.range_digits;
        format!("{}_{}_{}_{}", self.project, self.class_name, start, end)
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir_name())
    }
}
