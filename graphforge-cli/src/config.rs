//! graphforge configuration loading from `.graphforge.toml`.
//!
//! Configuration is optional. Every section and key falls back to the
//! pipeline defaults, and command-line flags override whatever the file
//! says.
//!
//! # Example Configuration
//!
//! ```toml
//! [toolchain]
//! java_home = "/usr/lib/jvm/jdk-11-oracle-x64"
//! extractor_jar = "/opt/features/features-javac-extractor-jar-with-dependencies.jar"
//! converter_jar = "/opt/features/features-javac-dot-jar-with-dependencies.jar"
//! plugin = "FeaturePlugin"
//! timeout_secs = 120
//!
//! [pipeline]
//! max_tokens = 200
//! workers = 8
//! override_existing = false
//! shard_prefix = "java"
//! output_dir = "graphs"
//!
//! [output]
//! format = "table"
//! color = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use graphforge_core::corpus::DEFAULT_SHARD_PREFIX;
use graphforge_core::scheduler::{JobOptions, DEFAULT_MAX_TOKENS};
use graphforge_core::toolchain::ToolchainSettings;
use serde::Deserialize;

use crate::constants::CONFIG_FILE_NAME;

/// Root configuration structure loaded from `.graphforge.toml`.
#[derive(Debug, Deserialize, Default)]
pub struct GraphforgeConfig {
    /// External JDK and archive locations.
    #[serde(default)]
    pub toolchain: ToolchainConfig,

    /// Batch behaviour.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Output formatting preferences.
    #[serde(default)]
    pub output: OutputSettings,
}

/// Where the analyzer and converter live.
///
/// Unset keys keep the [`ToolchainSettings`] defaults.
#[derive(Debug, Deserialize, Default)]
pub struct ToolchainConfig {
    /// JDK home. `bin/javac` and `bin/java` are resolved inside it.
    #[serde(default)]
    pub java_home: Option<PathBuf>,

    /// Extractor plugin archive, put on the compiler classpath.
    #[serde(default)]
    pub extractor_jar: Option<PathBuf>,

    /// Executable converter archive.
    #[serde(default)]
    pub converter_jar: Option<PathBuf>,

    /// Compiler plugin name.
    #[serde(default)]
    pub plugin: Option<String>,

    /// Per-invocation time budget in seconds, at least 1. No limit when unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Batch behaviour.
#[derive(Debug, Deserialize)]
pub struct PipelineConfig {
    /// Samples with more tokens than this are filtered out.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Worker threads. Defaults to the number of CPUs.
    #[serde(default)]
    pub workers: Option<usize>,

    /// Rebuild samples whose artifact directory already exists.
    #[serde(default)]
    pub override_existing: bool,

    /// Only shard files starting with this prefix are read.
    #[serde(default = "default_shard_prefix")]
    pub shard_prefix: String,

    /// Output root. Each partition goes to `<output_dir>/<partition>`;
    /// when unset, to `<partition>/java_funcs`.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

fn default_max_tokens() -> usize {
    DEFAULT_MAX_TOKENS
}

fn default_shard_prefix() -> String {
    DEFAULT_SHARD_PREFIX.to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            workers: None,
            override_existing: false,
            shard_prefix: default_shard_prefix(),
            output_dir: None,
        }
    }
}

/// Output formatting preferences. `--format` overrides `format`.
#[derive(Debug, Deserialize, Default)]
pub struct OutputSettings {
    /// Valid values: `table`, `json`.
    #[serde(default)]
    pub format: Option<String>,

    /// Defaults to auto-detection.
    #[serde(default)]
    pub color: Option<bool>,
}

impl GraphforgeConfig {
    /// Load configuration from `.graphforge.toml` in the given directory.
    ///
    /// If the config file doesn't exist or can't be parsed, returns defaults.
    /// Read and parse errors are logged as warnings.
    pub fn load(root: &Path) -> Self {
        match Self::load_strict(root) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{:#}", e);
                Self::default()
            }
        }
    }

    /// Like [`load`](Self::load), but a config file that exists and cannot be
    /// read or parsed is an error.
    pub fn load_strict(root: &Path) -> anyhow::Result<Self> {
        let config_path = root.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        if config.toolchain.timeout_secs == Some(0) {
            anyhow::bail!(
                "Invalid {}: toolchain.timeout_secs must be at least 1",
                config_path.display()
            );
        }

        let base = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        config.resolve_paths(&base);
        Ok(config)
    }

    /// Make relative paths relative to the directory holding the config file.
    ///
    /// External tools run from `/`, so every path handed to them is absolute.
    fn resolve_paths(&mut self, base: &Path) {
        let tc = &mut self.toolchain;
        for path in [
            &mut tc.java_home,
            &mut tc.extractor_jar,
            &mut tc.converter_jar,
            &mut self.pipeline.output_dir,
        ]
        .into_iter()
        .flatten()
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Toolchain settings with the configured overrides applied.
    pub fn toolchain_settings(&self) -> ToolchainSettings {
        let tc = &self.toolchain;
        let mut settings = ToolchainSettings::default();
        if let Some(home) = &tc.java_home {
            settings.java_home = home.clone();
        }
        if let Some(jar) = &tc.extractor_jar {
            settings.extractor_jar = jar.clone();
        }
        if let Some(jar) = &tc.converter_jar {
            settings.converter_jar = jar.clone();
        }
        if let Some(plugin) = &tc.plugin {
            settings.plugin = plugin.clone();
        }
        settings.timeout = tc.timeout_secs.map(Duration::from_secs);
        settings
    }

    pub fn job_options(&self) -> JobOptions {
        JobOptions {
            max_tokens: self.pipeline.max_tokens,
            override_existing: self.pipeline.override_existing,
            workers: self.pipeline.workers,
        }
    }

    pub fn shard_prefix(&self) -> &str {
        &self.pipeline.shard_prefix
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.pipeline.output_dir.as_deref()
    }

    /// Get the default output format, if configured.
    pub fn default_format(&self) -> Option<&str> {
        self.output.format.as_deref()
    }

    /// Returns the configured value, or `None` to use auto-detection.
    pub fn use_color(&self) -> Option<bool> {
        self.output.color
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = GraphforgeConfig::default();
        assert_eq!(config.pipeline.max_tokens, 200);
        assert_eq!(config.shard_prefix(), "java");
        assert!(!config.pipeline.override_existing);
        assert!(config.output_dir().is_none());
        assert_eq!(config.toolchain_settings(), ToolchainSettings::default());
    }

    #[test]
    fn test_parse_full_config() {
        let toml_content = r#"
[toolchain]
java_home = "/opt/jdk"
extractor_jar = "/opt/extractor.jar"
converter_jar = "/opt/dot.jar"
plugin = "OtherPlugin"
timeout_secs = 90

[pipeline]
max_tokens = 512
workers = 4
override_existing = true
shard_prefix = "code"
output_dir = "/data/graphs"

[output]
format = "json"
color = false
"#;
        let config: GraphforgeConfig = toml::from_str(toml_content).unwrap();

        let settings = config.toolchain_settings();
        assert_eq!(settings.java_home, PathBuf::from("/opt/jdk"));
        assert_eq!(settings.extractor_jar, PathBuf::from("/opt/extractor.jar"));
        assert_eq!(settings.converter_jar, PathBuf::from("/opt/dot.jar"));
        assert_eq!(settings.plugin, "OtherPlugin");
        assert_eq!(settings.timeout, Some(Duration::from_secs(90)));

        let options = config.job_options();
        assert_eq!(options.max_tokens, 512);
        assert_eq!(options.workers, Some(4));
        assert!(options.override_existing);
        assert_eq!(config.shard_prefix(), "code");
        assert_eq!(config.output_dir(), Some(Path::new("/data/graphs")));

        assert_eq!(config.default_format(), Some("json"));
        assert_eq!(config.use_color(), Some(false));
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config: GraphforgeConfig = toml::from_str("[pipeline]\nworkers = 2\n").unwrap();
        assert_eq!(config.pipeline.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(config.shard_prefix(), DEFAULT_SHARD_PREFIX);
        assert_eq!(config.job_options().workers, Some(2));
    }

    #[test]
    fn test_relative_paths_resolve_against_config_dir() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            "[toolchain]\nextractor_jar = \"jars/extractor.jar\"\nconverter_jar = \"/abs/dot.jar\"\n\n[pipeline]\noutput_dir = \"graphs\"\n",
        )
        .unwrap();

        let config = GraphforgeConfig::load_strict(temp.path()).unwrap();
        let base = temp.path().canonicalize().unwrap();
        let settings = config.toolchain_settings();
        assert_eq!(settings.extractor_jar, base.join("jars/extractor.jar"));
        assert_eq!(settings.converter_jar, PathBuf::from("/abs/dot.jar"));
        assert_eq!(config.output_dir(), Some(base.join("graphs").as_path()));
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let temp = TempDir::new().unwrap();
        let config = GraphforgeConfig::load_strict(temp.path()).unwrap();
        assert_eq!(config.pipeline.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            "[toolchain]\ntimeout_secs = 0\n",
        )
        .unwrap();

        let err = GraphforgeConfig::load_strict(temp.path()).unwrap_err();
        assert!(err.to_string().contains("timeout_secs must be at least 1"));
        assert_eq!(GraphforgeConfig::load(temp.path()).toolchain_settings().timeout, None);
    }

    #[test]
    fn test_broken_file_strict_vs_lenient() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            "[pipeline]\nmax_tokens = \"many\"\n",
        )
        .unwrap();

        let err = GraphforgeConfig::load_strict(temp.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse"));

        let config = GraphforgeConfig::load(temp.path());
        assert_eq!(config.pipeline.max_tokens, DEFAULT_MAX_TOKENS);
    }
}
