//! graphforge core - snippet-to-graph extraction pipeline.
//!
//! Turns a corpus of function-level code samples into per-sample program
//! graphs by driving an external compiler plugin and graph converter.
//!
//! # Features
//!
//! - **Streaming corpus reader**: gzip JSON-lines shards, read lazily
//! - **Stable identity**: every sample maps to one deterministic directory
//! - **Skip/resume**: existing artifact directories are not rebuilt
//! - **Parallel jobs**: a Rayon worker pool with per-job fault isolation
//!
//! # Usage
//!
//! ```no_run
//! use std::path::Path;
//! use graphforge_core::corpus::Corpus;
//! use graphforge_core::scheduler::{JobOptions, Scheduler};
//! use graphforge_core::store::ArtifactStore;
//! use graphforge_core::toolchain::{JavacToolchain, ToolchainSettings};
//!
//! let corpus = Corpus::discover(Path::new("data/jsonl"), "java").unwrap();
//! for partition in corpus.partitions() {
//!     let scheduler = Scheduler::new(
//!         JavacToolchain::new(ToolchainSettings::default()),
//!         ArtifactStore::new(partition.output_dir(None)),
//!         JobOptions::default(),
//!     );
//!     let report = scheduler.run(partition.name(), partition.samples(), &());
//!     println!("{} built {} graphs", report.partition, report.succeeded);
//! }
//! ```

pub mod corpus;
pub mod error;
pub mod key;
pub mod process;
pub mod sample;
pub mod scheduler;
pub mod store;
pub mod toolchain;
pub mod wrapper;

pub use error::{CorpusError, PipelineError, ProcessReport, ToolError};
pub use key::CanonicalKey;
pub use sample::Sample;
pub use scheduler::{JobOptions, JobOutcome, JobStatus, PartitionReport, ProgressSink, Scheduler};

/// Get the version of graphforge-core.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
