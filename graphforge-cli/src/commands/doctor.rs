//! Doctor command - Health check for the external toolchain
//!
//! Checks that the configuration parses and that the JDK, the compiler,
//! the runtime and both archives are where the configuration says.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use colored::Colorize;
use graphforge_core::process::ProcessRunner;
use graphforge_core::toolchain::ToolchainSettings;
use serde::Serialize;

use crate::config::GraphforgeConfig;
use crate::constants::CONFIG_FILE_NAME;
use crate::output::{Output, OutputFormat, TableDisplay};

/// Budget for `javac -version`.
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Status of a health check item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckStatus {
    fn colored_icon(&self) -> String {
        match self {
            CheckStatus::Ok => "[OK]".green().to_string(),
            CheckStatus::Warning => "[!!]".yellow().to_string(),
            CheckStatus::Error => "[!!]".red().to_string(),
        }
    }
}

/// A single health check item
#[derive(Debug, Clone, Serialize)]
pub struct CheckItem {
    pub status: CheckStatus,
    pub label: String,
    pub value: String,
}

impl CheckItem {
    fn ok(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Ok,
            label: label.into(),
            value: value.into(),
        }
    }

    fn warning(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Warning,
            label: label.into(),
            value: value.into(),
        }
    }

    fn error(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Error,
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Result of health check
#[derive(Debug, Serialize)]
pub struct DoctorResult {
    pub checks: Vec<CheckItem>,
    pub recommendations: Vec<String>,
}

impl DoctorResult {
    pub fn healthy(&self) -> bool {
        self.checks.iter().all(|c| c.status != CheckStatus::Error)
    }
}

impl TableDisplay for DoctorResult {
    fn to_table(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!("{}\n", "graphforge Health Check".cyan().bold()));
        output.push_str(&format!("{}\n", "\u{2500}".repeat(40).dimmed()));

        for check in &self.checks {
            output.push_str(&format!(
                "{} {}: {}\n",
                check.status.colored_icon(),
                check.label,
                check.value
            ));
        }

        if !self.recommendations.is_empty() {
            output.push_str(&format!("\n{}\n", "Recommendations:".yellow().bold()));
            for rec in &self.recommendations {
                output.push_str(&format!("  - {}\n", rec));
            }
        }

        output
    }
}

/// Check one file the toolchain needs.
fn check_file(label: &str, path: &Path, hint: &str, out: &mut DoctorResult) {
    if path.is_file() {
        out.checks
            .push(CheckItem::ok(label, path.display().to_string()));
    } else {
        out.checks.push(CheckItem::error(
            label,
            format!("{} (not found)", path.display()),
        ));
        out.recommendations.push(hint.to_string());
    }
}

/// First non-empty line `javac -version` printed. JDK 8 prints to stderr.
fn probe_version(javac: &Path) -> Result<String, String> {
    let mut cmd = Command::new(javac);
    cmd.arg("-version");
    let report = ProcessRunner::new(Some(VERSION_PROBE_TIMEOUT))
        .run(cmd)
        .map_err(|e| e.to_string())?;
    if !report.success() {
        return Err(format!("exited with {:?}", report.exit_code));
    }
    Ok([&report.stdout, &report.stderr]
        .iter()
        .flat_map(|s| s.lines())
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("unknown")
        .to_string())
}

fn check_config(root: &Path) -> (GraphforgeConfig, CheckItem) {
    let path = root.join(CONFIG_FILE_NAME);
    if !path.exists() {
        return (
            GraphforgeConfig::default(),
            CheckItem::warning("Config", format!("{} not found, using defaults", CONFIG_FILE_NAME)),
        );
    }
    match GraphforgeConfig::load_strict(root) {
        Ok(config) => (config, CheckItem::ok("Config", path.display().to_string())),
        Err(e) => (
            GraphforgeConfig::default(),
            CheckItem::error("Config", format!("{:#}", e)),
        ),
    }
}

/// Run every check against the given settings.
pub fn diagnose(settings: &ToolchainSettings, out: &mut DoctorResult) {
    if settings.java_home.is_dir() {
        out.checks.push(CheckItem::ok(
            "Java home",
            settings.java_home.display().to_string(),
        ));
    } else {
        out.checks.push(CheckItem::error(
            "Java home",
            format!("{} (not a directory)", settings.java_home.display()),
        ));
        out.recommendations
            .push("Set [toolchain].java_home in .graphforge.toml".to_string());
    }

    let javac = settings.javac();
    check_file(
        "javac",
        &javac,
        "Point [toolchain].java_home at a full JDK, not a JRE",
        out,
    );
    if javac.is_file() {
        match probe_version(&javac) {
            Ok(version) => out.checks.push(CheckItem::ok("Compiler version", version)),
            Err(e) => out.checks.push(CheckItem::error("Compiler version", e)),
        }
    }
    check_file(
        "java",
        &settings.java(),
        "Point [toolchain].java_home at a full JDK",
        out,
    );
    check_file(
        "Extractor jar",
        &settings.extractor_jar,
        "Set [toolchain].extractor_jar to the extractor plugin archive",
        out,
    );
    check_file(
        "Converter jar",
        &settings.converter_jar,
        "Set [toolchain].converter_jar to the graph converter archive",
        out,
    );

    let timeout = match settings.timeout {
        Some(t) => format!("{}s per invocation", t.as_secs()),
        None => "none".to_string(),
    };
    out.checks.push(CheckItem::ok("Plugin", settings.plugin.clone()));
    out.checks.push(CheckItem::ok("Timeout", timeout));
}

/// Run the doctor command
///
/// Fails after printing the report when any check is an error.
pub fn run(format: OutputFormat) -> anyhow::Result<()> {
    let (config, config_check) = check_config(Path::new("."));
    let mut result = DoctorResult {
        checks: vec![config_check],
        recommendations: Vec::new(),
    };
    diagnose(&config.toolchain_settings(), &mut result);

    let healthy = result.healthy();
    Output::new(result, format).render()?;
    if !healthy {
        anyhow::bail!("Toolchain is not ready");
    }
    Ok(())
}
