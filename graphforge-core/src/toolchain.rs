//! External toolchain adapters.
//!
//! Graph extraction runs in two external stages:
//!
//! 1. **Analyze**: compile the wrapped unit with an analysis plugin loaded.
//!    The plugin serializes its IR next to the unit as a side effect.
//! 2. **Convert**: turn that IR into a structural (`.dot`) graph and a JSON
//!    graph, both next to the IR.
//!
//! [`Toolchain`] is the seam between the scheduler and those tools, so tests
//! and alternative backends can stand in for the real JDK.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::debug;

use crate::error::ToolError;
use crate::process::ProcessRunner;
use crate::store::{with_suffix, DOT_SUFFIX, GRAPH_JSON_SUFFIX, IR_SUFFIX};

/// A confirmed IR file produced by the analyzer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IrHandle {
    /// The compilation unit the IR was produced from.
    pub unit_path: PathBuf,
    /// `{unit}.proto`
    pub ir_path: PathBuf,
}

impl IrHandle {
    pub fn for_unit(unit_path: &Path) -> Self {
        Self {
            unit_path: unit_path.to_path_buf(),
            ir_path: with_suffix(unit_path, IR_SUFFIX),
        }
    }
}

/// Converter outputs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphArtifacts {
    /// `{unit}.dot`
    pub dot_path: PathBuf,
    /// `{unit}.json`
    pub json_path: PathBuf,
}

impl GraphArtifacts {
    pub fn for_ir(ir: &IrHandle) -> Self {
        Self {
            dot_path: with_suffix(&ir.unit_path, DOT_SUFFIX),
            json_path: with_suffix(&ir.unit_path, GRAPH_JSON_SUFFIX),
        }
    }
}

/// The two external stages of graph extraction.
///
/// Implementations block until their tool exits and must be shareable
/// across worker threads.
pub trait Toolchain: Send + Sync {
    /// Analyze a wrapped unit. Succeeds only if the IR file exists afterwards.
    fn analyze(&self, unit_path: &Path) -> Result<IrHandle, ToolError>;

    /// Convert a confirmed IR file into graph artifacts.
    fn convert_to_graph(&self, ir: &IrHandle) -> Result<GraphArtifacts, ToolError>;
}

impl<T: Toolchain + ?Sized> Toolchain for &T {
    fn analyze(&self, unit_path: &Path) -> Result<IrHandle, ToolError> {
        (**self).analyze(unit_path)
    }

    fn convert_to_graph(&self, ir: &IrHandle) -> Result<GraphArtifacts, ToolError> {
        (**self).convert_to_graph(ir)
    }
}

/// Default JDK location.
pub const DEFAULT_JAVA_HOME: &str = "/usr/lib/jvm/jdk-11-oracle-x64";
/// Default analysis plugin name, passed as `-Xplugin:<name>`.
pub const DEFAULT_PLUGIN: &str = "FeaturePlugin";

/// Settings for [`JavacToolchain`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolchainSettings {
    /// JDK home; `bin/javac` and `bin/java` are taken from here.
    pub java_home: PathBuf,
    /// Archive carrying the analysis plugin, put on the compiler classpath.
    pub extractor_jar: PathBuf,
    /// Executable archive of the IR-to-graph converter.
    pub converter_jar: PathBuf,
    /// Plugin name passed to `-Xplugin:`.
    pub plugin: String,
    /// Per-invocation time budget.
    pub timeout: Option<Duration>,
}

impl Default for ToolchainSettings {
    fn default() -> Self {
        Self {
            java_home: PathBuf::from(DEFAULT_JAVA_HOME),
            extractor_jar: PathBuf::from("features-javac-extractor-jar-with-dependencies.jar"),
            converter_jar: PathBuf::from("features-javac-dot-jar-with-dependencies.jar"),
            plugin: DEFAULT_PLUGIN.to_string(),
            timeout: None,
        }
    }
}

impl ToolchainSettings {
    pub fn javac(&self) -> PathBuf {
        self.java_home.join("bin").join("javac")
    }

    pub fn java(&self) -> PathBuf {
        self.java_home.join("bin").join("java")
    }

    /// `PATH` for child processes: the current `PATH` with the JDK's `bin` appended.
    fn child_path(&self) -> String {
        let bin = self.java_home.join("bin");
        match std::env::var("PATH") {
            Ok(path) if !path.is_empty() => format!("{}:{}", path, bin.display()),
            _ => bin.display().to_string(),
        }
    }
}

/// Shells out to `javac` with the extractor plugin, then to the converter jar.
#[derive(Clone, Debug)]
pub struct JavacToolchain {
    settings: ToolchainSettings,
    runner: ProcessRunner,
}

impl JavacToolchain {
    pub fn new(settings: ToolchainSettings) -> Self {
        let runner = ProcessRunner::new(settings.timeout);
        Self { settings, runner }
    }

    pub fn settings(&self) -> &ToolchainSettings {
        &self.settings
    }

    /// `<javac> -cp <extractor> -Xplugin:<plugin> <unit>`
    pub fn analyzer_command(&self, unit_path: &Path) -> Command {
        let mut cmd = self.base_command(self.settings.javac());
        cmd.arg("-cp")
            .arg(&self.settings.extractor_jar)
            .arg(format!("-Xplugin:{}", self.settings.plugin))
            .arg(unit_path);
        cmd
    }

    /// `<java> -jar <converter> -i <ir> -o <dot> -j <json>`
    pub fn converter_command(&self, ir: &IrHandle, out: &GraphArtifacts) -> Command {
        let mut cmd = self.base_command(self.settings.java());
        cmd.arg("-jar")
            .arg(&self.settings.converter_jar)
            .arg("-i")
            .arg(&ir.ir_path)
            .arg("-o")
            .arg(&out.dot_path)
            .arg("-j")
            .arg(&out.json_path);
        cmd
    }

    fn base_command(&self, program: PathBuf) -> Command {
        let mut cmd = Command::new(program);
        cmd.current_dir("/")
            .env("JAVA_HOME", &self.settings.java_home)
            .env("PATH", self.settings.child_path());
        cmd
    }
}

impl Toolchain for JavacToolchain {
    fn analyze(&self, unit_path: &Path) -> Result<IrHandle, ToolError> {
        let report = self.runner.run(self.analyzer_command(unit_path))?;
        if !report.success() {
            return Err(ToolError::NonZeroExit(report));
        }

        // The plugin can exit 0 without writing anything.
        let ir = IrHandle::for_unit(unit_path);
        if !ir.ir_path.exists() {
            return Err(ToolError::MissingOutput {
                path: ir.ir_path,
                report,
            });
        }

        debug!("Analyzed {}", unit_path.display());
        Ok(ir)
    }

    fn convert_to_graph(&self, ir: &IrHandle) -> Result<GraphArtifacts, ToolError> {
        let out = GraphArtifacts::for_ir(ir);
        let report = self.runner.run(self.converter_command(ir, &out))?;
        if !report.success() {
            return Err(ToolError::NonZeroExit(report));
        }

        for path in [&out.dot_path, &out.json_path] {
            if !path.exists() {
                return Err(ToolError::MissingOutput {
                    path: path.clone(),
                    report,
                });
            }
        }

        debug!("Converted {}", ir.ir_path.display());
        Ok(out)
    }
}
