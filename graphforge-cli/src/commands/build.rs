//! Build commands - run the extraction pipeline over a corpus or one shard
//!
//! `build` walks every partition under a corpus root (optionally filtered by
//! name), `shard` runs a single shard file. Both stream samples through the
//! scheduler and print one summary per partition.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Args;
use colored::Colorize;
use graphforge_core::corpus::{Corpus, Partition, DEFAULT_OUTPUT_DIRNAME};
use graphforge_core::scheduler::{JobOptions, JobOutcome, JobStatus, PartitionReport};
use graphforge_core::store::ArtifactStore;
use graphforge_core::toolchain::{JavacToolchain, ToolchainSettings};
use graphforge_core::{ProgressSink, Scheduler};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::config::GraphforgeConfig;
use crate::constants::{MAX_LISTED_FAILURES, SPINNER_TICK_MS};
use crate::output::{Output, OutputFormat, TableDisplay};

/// Pipeline flags shared by `build` and `shard`. Each overrides `.graphforge.toml`.
#[derive(Debug, Clone, Default, Args)]
pub struct PipelineArgs {
    /// Output root directory
    #[arg(long, value_name = "DIR")]
    pub out_dir: Option<PathBuf>,

    /// Number of worker threads (1 runs sequentially in corpus order)
    #[arg(short = 'j', long, env = "GRAPHFORGE_WORKERS")]
    pub workers: Option<usize>,

    /// Rebuild samples whose artifact directory already exists
    #[arg(short, long)]
    pub force: bool,

    /// Skip samples with more tokens than this
    #[arg(long, value_name = "N")]
    pub max_tokens: Option<usize>,

    /// Kill an external tool invocation after this many seconds (at least 1)
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Fail on .graphforge.toml errors instead of silently using defaults
    #[arg(long)]
    pub strict: bool,
}

/// Settings resolved from the config file and the command line.
struct Resolved {
    config: GraphforgeConfig,
    toolchain: ToolchainSettings,
    options: JobOptions,
}

impl PipelineArgs {
    fn resolve(&self) -> anyhow::Result<Resolved> {
        let cwd = Path::new(".");
        let config = if self.strict {
            GraphforgeConfig::load_strict(cwd)?
        } else {
            GraphforgeConfig::load(cwd)
        };

        let mut toolchain = config.toolchain_settings();
        if let Some(secs) = self.timeout {
            toolchain.timeout = Some(Duration::from_secs(secs));
        }

        let mut options = config.job_options();
        if let Some(max_tokens) = self.max_tokens {
            options.max_tokens = max_tokens;
        }
        if self.workers.is_some() {
            options.workers = self.workers;
        }
        options.override_existing |= self.force;

        Ok(Resolved {
            config,
            toolchain,
            options,
        })
    }

    /// `--out-dir` first, then `[pipeline].output_dir`.
    fn output_root(&self, config: &GraphforgeConfig) -> anyhow::Result<Option<PathBuf>> {
        match &self.out_dir {
            Some(dir) => absolute(dir).map(Some),
            None => Ok(config.output_dir().map(Path::to_path_buf)),
        }
    }
}

/// External tools run from `/`, so paths handed to them must be absolute.
fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to resolve the working directory")?;
    Ok(cwd.join(path))
}

/// Job counts shown next to the spinner.
struct BuildProgress {
    bar: ProgressBar,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl BuildProgress {
    fn new(partition: &str, quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new_spinner()
        };
        bar.set_style(
            ProgressStyle::default_spinner()
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                .template("{spinner:.cyan} {prefix:.bold} {pos} samples, {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix(partition.to_string());
        bar.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));

        Self {
            bar,
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for BuildProgress {
    fn job_finished(&self, outcome: &JobOutcome) {
        match outcome.status {
            JobStatus::Succeeded => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            JobStatus::Failed => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            JobStatus::Filtered | JobStatus::ExistsSkipped => {}
        }
        self.bar.inc(1);
        self.bar.set_message(format!(
            "{} built, {} failed",
            self.succeeded.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed)
        ));
    }
}

/// Result of a build run
#[derive(Debug, Serialize)]
pub struct BuildResult {
    pub source: String,
    pub partitions: Vec<PartitionSummary>,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

/// One partition's report plus where its artifacts went.
#[derive(Debug, Serialize)]
pub struct PartitionSummary {
    pub output_dir: String,
    #[serde(flatten)]
    pub report: PartitionReport,
}

impl BuildResult {
    fn new(source: &Path, partitions: Vec<PartitionSummary>, duration: Duration) -> Self {
        let sum = |f: fn(&PartitionReport) -> usize| -> usize {
            partitions.iter().map(|p| f(&p.report)).sum()
        };
        Self {
            source: source.display().to_string(),
            processed: sum(|r| r.processed),
            succeeded: sum(|r| r.succeeded),
            failed: sum(|r| r.failed),
            duration_ms: duration.as_millis() as u64,
            partitions,
        }
    }
}

impl TableDisplay for BuildResult {
    fn to_table(&self) -> String {
        let mut output = String::new();

        if self.failed == 0 {
            output.push_str(&format!(
                "{} Graphs built from {}\n",
                "SUCCESS:".green().bold(),
                self.source
            ));
        } else {
            output.push_str(&format!(
                "{} Graphs built from {} with {} failed sample(s)\n",
                "WARNING:".yellow().bold(),
                self.source,
                self.failed
            ));
        }

        for summary in &self.partitions {
            let r = &summary.report;
            output.push_str(&format!("\n{}\n", r.partition.cyan().bold()));
            output.push_str(&format!("  Output:    {}\n", summary.output_dir));
            output.push_str(&format!(
                "  Built:     {} graphs totally\n",
                r.succeeded.to_string().green()
            ));
            output.push_str(&format!("  Processed: {}\n", r.processed));
            if r.filtered > 0 {
                output.push_str(&format!("  Filtered:  {}\n", r.filtered));
            }
            if r.skipped_existing > 0 {
                output.push_str(&format!("  Existing:  {}\n", r.skipped_existing));
            }
            if r.failed > 0 {
                output.push_str(&format!("  Failed:    {}\n", r.failed.to_string().red()));
            }
            output.push_str(&format!(
                "  Duration:  {}ms\n",
                r.duration_ms.to_string().yellow()
            ));

            for failure in r.failures.iter().take(MAX_LISTED_FAILURES) {
                output.push_str(&format_failure(failure));
            }
            if r.failures.len() > MAX_LISTED_FAILURES {
                output.push_str(&format!(
                    "    {}\n",
                    format!(
                        "... and {} more (use --format json for all)",
                        r.failures.len() - MAX_LISTED_FAILURES
                    )
                    .dimmed()
                ));
            }
        }

        if self.partitions.len() > 1 {
            output.push_str(&format!("\n{}\n", "Total".cyan().bold()));
            output.push_str(&format!(
                "  {} built, {} processed, {} failed in {}ms\n",
                self.succeeded.to_string().green(),
                self.processed,
                self.failed,
                self.duration_ms
            ));
        }

        output
    }
}

fn format_failure(outcome: &JobOutcome) -> String {
    let key = outcome.key.as_deref().unwrap_or("<unkeyed>");
    let Some(failure) = &outcome.failure else {
        return format!("    {} {}\n", "x".red(), key);
    };

    let mut line = format!(
        "    {} {} [{}] {}\n",
        "x".red(),
        key,
        failure.kind,
        failure.message
    );
    if let Some(command) = &failure.command {
        line.push_str(&format!("      {}\n", command.dimmed()));
    }
    line
}

fn run_partition(
    toolchain: &JavacToolchain,
    options: &JobOptions,
    partition: &Partition,
    output_dir: PathBuf,
    quiet: bool,
) -> PartitionSummary {
    let scheduler = Scheduler::new(
        toolchain,
        ArtifactStore::new(output_dir.clone()),
        options.clone(),
    );
    let progress = BuildProgress::new(partition.name(), quiet);
    let report = scheduler.run(partition.name(), partition.samples(), &progress);
    progress.finish();

    PartitionSummary {
        output_dir: output_dir.display().to_string(),
        report,
    }
}

/// Run the build command
pub fn run(
    corpus_root: &Path,
    only: &[String],
    args: &PipelineArgs,
    quiet: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let resolved = args.resolve()?;
    let corpus_root = &absolute(corpus_root)?;

    let corpus = Corpus::discover(corpus_root, resolved.config.shard_prefix())
        .with_context(|| format!("Failed to read corpus at {}", corpus_root.display()))?;

    let partitions: Vec<&Partition> = if only.is_empty() {
        corpus.partitions().iter().collect()
    } else {
        only.iter()
            .map(|name| {
                corpus.partition(name).with_context(|| {
                    let known: Vec<_> = corpus.partitions().iter().map(|p| p.name()).collect();
                    format!(
                        "No partition named '{}' in {} (found: {})",
                        name,
                        corpus_root.display(),
                        known.join(", ")
                    )
                })
            })
            .collect::<anyhow::Result<_>>()?
    };

    if partitions.is_empty() {
        tracing::warn!("No partitions found under {}", corpus_root.display());
    }

    let toolchain = JavacToolchain::new(resolved.toolchain);
    let out_root = args.output_root(&resolved.config)?;

    let summaries = partitions
        .into_iter()
        .map(|partition| {
            run_partition(
                &toolchain,
                &resolved.options,
                partition,
                partition.output_dir(out_root.as_deref()),
                quiet,
            )
        })
        .collect();

    let result = BuildResult::new(corpus_root, summaries, start.elapsed());
    Output::new(result, format).render()
}

/// Run the shard command
///
/// Artifacts go straight into the output root (no partition subdirectory),
/// defaulting to `java_funcs` beside the shard.
pub fn run_shard(
    shard: &Path,
    args: &PipelineArgs,
    quiet: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let start = Instant::now();
    if !shard.is_file() {
        anyhow::bail!("Shard does not exist: {}", shard.display());
    }
    let resolved = args.resolve()?;
    let shard = &absolute(shard)?;

    let parent = shard.parent().unwrap_or_else(|| Path::new("/"));
    let name = shard
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| shard.display().to_string());
    let partition = Partition::from_shards(name, parent.to_path_buf(), vec![shard.to_path_buf()]);

    let output_dir = args
        .output_root(&resolved.config)?
        .unwrap_or_else(|| parent.join(DEFAULT_OUTPUT_DIRNAME));

    let toolchain = JavacToolchain::new(resolved.toolchain);
    let summary = run_partition(&toolchain, &resolved.options, &partition, output_dir, quiet);

    let result = BuildResult::new(shard, vec![summary], start.elapsed());
    Output::new(result, format).render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphforge_core::scheduler::FailureDetail;

    fn report(name: &str, succeeded: usize, failed: usize) -> PartitionReport {
        PartitionReport {
            partition: name.to_string(),
            processed: succeeded + failed,
            succeeded,
            failed,
            ..Default::default()
        }
    }

    fn summary(report: PartitionReport) -> PartitionSummary {
        PartitionSummary {
            output_dir: format!("/out/{}", report.partition),
            report,
        }
    }

    #[test]
    fn test_totals_sum_partitions() {
        let result = BuildResult::new(
            Path::new("/corpus"),
            vec![summary(report("train", 5, 1)), summary(report("valid", 2, 0))],
            Duration::from_millis(1500),
        );
        assert_eq!(result.processed, 8);
        assert_eq!(result.succeeded, 7);
        assert_eq!(result.failed, 1);
        assert_eq!(result.duration_ms, 1500);
    }

    #[test]
    fn test_table_lists_failures() {
        colored::control::set_override(false);
        let mut r = report("train", 1, 1);
        r.failures.push(JobOutcome {
            key: Some("o-r_Foo_1_3".to_string()),
            status: JobStatus::Failed,
            failure: Some(FailureDetail {
                kind: "analyzer_failure",
                message: "analyzer exited with code 1".to_string(),
                process: None,
                command: Some("javac Foo.java".to_string()),
            }),
        });
        let result = BuildResult::new(Path::new("/corpus"), vec![summary(r)], Duration::ZERO);

        let table = result.to_table();
        assert!(table.starts_with("WARNING:"));
        assert!(table.contains("Built:     1 graphs totally"));
        assert!(table.contains("o-r_Foo_1_3 [analyzer_failure]"));
        assert!(table.contains("javac Foo.java"));
        assert!(!table.contains("Total"));
    }

    #[test]
    fn test_json_flattens_report() {
        let result = BuildResult::new(
            Path::new("/corpus"),
            vec![summary(report("train", 3, 0))],
            Duration::ZERO,
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["partitions"][0]["partition"], "train");
        assert_eq!(value["partitions"][0]["succeeded"], 3);
        assert_eq!(value["partitions"][0]["output_dir"], "/out/train");
    }

    #[test]
    fn test_absolute() {
        assert_eq!(absolute(Path::new("/a/b")).unwrap(), PathBuf::from("/a/b"));
        let rel = absolute(Path::new("corpus")).unwrap();
        assert!(rel.is_absolute());
        assert!(rel.ends_with("corpus"));
    }

    #[test]
    fn test_cli_flags_override_defaults() {
        let args = PipelineArgs {
            workers: Some(3),
            force: true,
            max_tokens: Some(50),
            timeout: Some(7),
            ..Default::default()
        };
        let resolved = args.resolve().unwrap();
        assert_eq!(resolved.options.workers, Some(3));
        assert!(resolved.options.override_existing);
        assert_eq!(resolved.options.max_tokens, 50);
        assert_eq!(resolved.toolchain.timeout, Some(Duration::from_secs(7)));
    }

    #[derive(clap::Parser)]
    struct PipelineCli {
        #[command(flatten)]
        pipeline: PipelineArgs,
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        use clap::Parser;

        assert!(PipelineCli::try_parse_from(["graphforge", "--timeout", "0"]).is_err());
        let cli = PipelineCli::try_parse_from(["graphforge", "--timeout", "1"]).unwrap();
        assert_eq!(cli.pipeline.timeout, Some(1));
    }
}
