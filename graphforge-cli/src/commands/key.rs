//! Key command - show where a sample's artifacts would land
//!
//! Derives the canonical key for a provenance URL without touching the
//! corpus or the toolchain.

use colored::Colorize;
use graphforge_core::CanonicalKey;
use serde::Serialize;

use crate::output::{Output, OutputFormat, TableDisplay};

const GITHUB_HOST: &str = "github.com/";

/// Result of key derivation
#[derive(Debug, Serialize)]
pub struct KeyResult {
    pub url: String,
    #[serde(flatten)]
    pub key: CanonicalKey,
    pub dir_name: String,
}

impl TableDisplay for KeyResult {
    fn to_table(&self) -> String {
        let mut output = format!("{}\n", self.dir_name.green().bold());
        output.push_str(&format!("  Project: {}\n", self.key.project));
        output.push_str(&format!("  Class:   {}\n", self.key.class_name));
        output.push_str(&format!(
            "  Lines:   {}-{}\n",
            self.key.start_line, self.key.end_line
        ));
        output
    }
}

/// `owner/name` from a `https://github.com/<owner>/<name>/...` URL.
fn project_from_url(url: &str) -> Option<String> {
    let (_, path) = url.split_once(GITHUB_HOST)?;
    let mut parts = path.split('/').filter(|s| !s.is_empty());
    let owner = parts.next()?;
    let name = parts.next()?;
    Some(format!("{}/{}", owner, name))
}

/// Run the key command
///
/// Without `--repo`, the project is taken from a GitHub-style URL.
pub fn run(url: &str, repo: Option<&str>, format: OutputFormat) -> anyhow::Result<()> {
    let project = match repo {
        Some(repo) => repo.to_string(),
        None => project_from_url(url).unwrap_or_default(),
    };
    if project.is_empty() {
        tracing::warn!("No project for {}, the directory name will start with '_'", url);
    }

    let key = CanonicalKey::from_url(url, &project)?;
    let result = KeyResult {
        url: url.to_string(),
        dir_name: key.dir_name(),
        key,
    };

    Output::new(result, format).render()
}
