//! graphforge CLI - turn function-level code corpora into program graphs
//!
//! Wraps every sample of a gzip JSON-lines corpus into a compilation unit,
//! runs it through an extractor compiler plugin and a graph converter, and
//! keeps one artifact directory per sample.

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod constants;
mod output;

use commands::build::PipelineArgs;
use commands::*;
use config::GraphforgeConfig;
use output::OutputFormat;

/// Snippet-to-graph extraction for code datasets.
#[derive(Parser)]
#[command(name = "graphforge")]
#[command(author, version)]
#[command(about = "Snippet-to-graph extraction for code datasets")]
#[command(
    long_about = "graphforge wraps each function sample of a corpus into a compilation unit,\nextracts its compiler IR with a javac plugin and converts it into a graph.\n\nEvery sample gets its own directory, so interrupted runs resume where they stopped."
)]
#[command(propagate_version = true)]
#[command(after_help = "Quick Start:
  graphforge doctor                Check the configured JDK and archives
  graphforge build data/jsonl      Build graphs for every partition

Examples:
  graphforge build data/jsonl -p train -j 16
  graphforge shard data/jsonl/test/java_test_0.jsonl.gz --out-dir graphs
  graphforge key 'https://github.com/o/r/blob/sha/src/Foo.java#L10-L20'")]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format (overrides config default)
    #[arg(long, global = true, value_enum)]
    format: Option<OutputFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build graphs for every partition of a corpus
    #[command(visible_alias = "b")]
    Build {
        /// Corpus root holding one directory per partition
        corpus_root: PathBuf,

        /// Only build these partitions (repeatable)
        #[arg(short, long = "partition", value_name = "NAME")]
        partitions: Vec<String>,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Build graphs for a single shard file
    Shard {
        /// Gzip JSON-lines shard
        shard: PathBuf,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Print the artifact directory name for a provenance URL
    Key {
        /// Provenance URL ending in `<Class>.java#L<start>-L<end>`
        url: String,

        /// Project identifier (default: taken from a GitHub URL)
        #[arg(long)]
        repo: Option<String>,
    },

    /// Check the configured toolchain
    Doctor,
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    // Load configuration from .graphforge.toml
    let config = GraphforgeConfig::load(std::path::Path::new("."));

    // Resolve output format: CLI flag > config default > Table
    let format = cli.format.unwrap_or_else(|| {
        config
            .default_format()
            .and_then(|f| f.parse().ok())
            .unwrap_or(OutputFormat::Table)
    });

    if let Some(use_color) = config.use_color() {
        colored::control::set_override(use_color);
    }

    let command = match cli.command {
        Some(cmd) => cmd,
        None => {
            let _ = Cli::command().print_help();
            println!();
            return Ok(());
        }
    };

    match command {
        Commands::Build {
            corpus_root,
            partitions,
            pipeline,
        } => build::run(&corpus_root, &partitions, &pipeline, cli.quiet, format),
        Commands::Shard { shard, pipeline } => {
            build::run_shard(&shard, &pipeline, cli.quiet, format)
        }
        Commands::Key { url, repo } => key::run(&url, repo.as_deref(), format),
        Commands::Doctor => doctor::run(format),
    }
}
