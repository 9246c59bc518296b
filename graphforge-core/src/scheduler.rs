//! Per-sample jobs and the worker pool that runs them.
//!
//! A job takes one sample through
//!
//! ```text
//! Pending -> Filtered                                   (too many tokens)
//! Pending -> ExistsSkipped                              (directory present)
//! Pending -> Wrapped -> Analyzed -> Converted -> Succeeded
//! any stage -> Failed(cause)
//! ```
//!
//! Jobs are independent: each writes only into its own artifact directory,
//! so workers need no locking. Every error, and any panic, is contained at
//! the job boundary and reported as a failed [`JobOutcome`].

use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CorpusError, PipelineError, ProcessReport, Result};
use crate::key::CanonicalKey;
use crate::sample::Sample;
use crate::store::ArtifactStore;
use crate::toolchain::Toolchain;
use crate::wrapper::UnitWrapper;

/// Samples with more tokens than this are skipped.
pub const DEFAULT_MAX_TOKENS: usize = 200;

/// Knobs for one scheduler run.
#[derive(Clone, Debug)]
pub struct JobOptions {
    /// Token budget; exactly this many tokens is still processed.
    pub max_tokens: usize,
    /// Redo samples whose artifact directory already exists.
    pub override_existing: bool,
    /// Worker count. `None` uses available parallelism; `Some(1)` runs sequentially.
    pub workers: Option<usize>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            override_existing: false,
            workers: None,
        }
    }
}

impl JobOptions {
    /// Effective number of workers.
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(n) if n > 0 => n,
            _ => num_cpus::get().max(1),
        }
    }
}

/// Terminal state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Over the token budget; nothing attempted.
    Filtered,
    /// Artifact directory already present and override not requested.
    ExistsSkipped,
    Succeeded,
    Failed,
}

/// Diagnostic detail kept for a failed job.
#[derive(Debug, Clone, Serialize)]
pub struct FailureDetail {
    /// Error class, see [`PipelineError::kind`].
    pub kind: &'static str,
    pub message: String,
    /// Output of the failing external command, when there was one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessReport>,
    /// Failing command line, also set when the process never produced a report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl From<&PipelineError> for FailureDetail {
    fn from(err: &PipelineError) -> Self {
        let tool = err.tool_error();
        Self {
            kind: err.kind(),
            message: err.to_string(),
            process: tool.and_then(|t| t.report()).cloned(),
            command: tool.map(|t| t.command().to_string()),
        }
    }
}

/// Result of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    /// Artifact directory name, absent when no key could be derived.
    pub key: Option<String>,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,
}

impl JobOutcome {
    fn new(key: Option<&CanonicalKey>, status: JobStatus) -> Self {
        Self {
            key: key.map(CanonicalKey::dir_name),
            status,
            failure: None,
        }
    }

    fn failed(key: Option<&CanonicalKey>, err: &PipelineError) -> Self {
        Self {
            failure: Some(FailureDetail::from(err)),
            ..Self::new(key, JobStatus::Failed)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}

/// Receives a notification every time a job finishes, from any worker.
pub trait ProgressSink: Sync {
    fn job_finished(&self, outcome: &JobOutcome);
}

impl ProgressSink for () {
    fn job_finished(&self, _outcome: &JobOutcome) {}
}

/// Aggregate over one corpus partition.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PartitionReport {
    pub partition: String,
    pub processed: usize,
    pub succeeded: usize,
    pub filtered: usize,
    pub skipped_existing: usize,
    pub failed: usize,
    pub duration_ms: u64,
    /// Failed jobs only, with their diagnostics.
    pub failures: Vec<JobOutcome>,
}

impl PartitionReport {
    /// Fold finished outcomes into a report.
    pub fn from_outcomes(
        partition: impl Into<String>,
        outcomes: &[JobOutcome],
        duration: Duration,
    ) -> Self {
        let mut report = Self {
            partition: partition.into(),
            processed: outcomes.len(),
            duration_ms: duration.as_millis() as u64,
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome.status {
                JobStatus::Succeeded => report.succeeded += 1,
                JobStatus::Filtered => report.filtered += 1,
                JobStatus::ExistsSkipped => report.skipped_existing += 1,
                JobStatus::Failed => {
                    report.failed += 1;
                    report.failures.push(outcome.clone());
                }
            }
        }
        report
    }
}

/// Runs the extraction pipeline over a stream of samples.
pub struct Scheduler<T> {
    toolchain: T,
    wrapper: UnitWrapper,
    options: JobOptions,
}

impl<T: Toolchain> Scheduler<T> {
    pub fn new(toolchain: T, store: ArtifactStore, options: JobOptions) -> Self {
        Self {
            toolchain,
            wrapper: UnitWrapper::new(store),
            options,
        }
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    pub fn store(&self) -> &ArtifactStore {
        self.wrapper.store()
    }

    /// Run one job to a terminal state. Never fails and never panics outward.
    pub fn run_job(&self, sample: &Sample) -> JobOutcome {
        let mut key = None;
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.try_job(sample, &mut key)));

        let outcome = match result {
            Ok(Ok(status)) => JobOutcome::new(key.as_ref(), status),
            Ok(Err(err)) => {
                log_failure(key.as_ref(), &err);
                JobOutcome::failed(key.as_ref(), &err)
            }
            Err(payload) => {
                let err = PipelineError::Panicked(panic_message(payload.as_ref()));
                log_failure(key.as_ref(), &err);
                JobOutcome::failed(key.as_ref(), &err)
            }
        };
        debug!("Job {:?} -> {:?}", outcome.key, outcome.status);
        outcome
    }

    fn try_job(&self, sample: &Sample, key_slot: &mut Option<CanonicalKey>) -> Result<JobStatus> {
        if sample
            .token_count()
            .is_some_and(|n| n > self.options.max_tokens)
        {
            return Ok(JobStatus::Filtered);
        }

        let key = key_slot.insert(CanonicalKey::derive(sample)?);

        if !self.options.override_existing && self.store().claim(key)?.is_none() {
            return Ok(JobStatus::ExistsSkipped);
        }

        let wrapped = self.wrapper.write(sample, key)?;
        let ir = self
            .toolchain
            .analyze(&wrapped.unit_path)
            .map_err(PipelineError::AnalyzerFailure)?;
        self.toolchain
            .convert_to_graph(&ir)
            .map_err(PipelineError::ConverterFailure)?;

        Ok(JobStatus::Succeeded)
    }

    /// Turn an unreadable corpus record into a failed outcome.
    fn corpus_failure(&self, err: CorpusError) -> JobOutcome {
        let err = PipelineError::CorpusRead(err);
        log_failure(None, &err);
        JobOutcome::failed(None, &err)
    }

    fn run_item(&self, item: std::result::Result<Sample, CorpusError>) -> JobOutcome {
        match item {
            Ok(sample) => self.run_job(&sample),
            Err(err) => self.corpus_failure(err),
        }
    }

    /// Run every sample and collect outcomes.
    ///
    /// With one worker, jobs run strictly in input order on the calling
    /// thread. Otherwise they are spread over a dedicated pool and the
    /// returned order is unspecified.
    pub fn run_all<I, P>(&self, samples: I, progress: &P) -> Vec<JobOutcome>
    where
        I: IntoIterator<Item = std::result::Result<Sample, CorpusError>>,
        I::IntoIter: Send,
        P: ProgressSink + ?Sized,
    {
        let workers = self.options.worker_count();
        let samples = samples.into_iter();
        let job = |item| {
            let outcome = self.run_item(item);
            progress.job_finished(&outcome);
            outcome
        };

        if workers == 1 {
            return samples.map(job).collect();
        }

        match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool.install(|| samples.par_bridge().map(job).collect()),
            Err(e) => {
                warn!("Failed to build a {}-thread pool ({}), using the global pool", workers, e);
                samples.par_bridge().map(job).collect()
            }
        }
    }

    /// Run one partition and summarize it.
    pub fn run<I, P>(&self, partition: &str, samples: I, progress: &P) -> PartitionReport
    where
        I: IntoIterator<Item = std::result::Result<Sample, CorpusError>>,
        I::IntoIter: Send,
        P: ProgressSink + ?Sized,
    {
        let start = Instant::now();
        info!(
            "Building graphs for {} with {} worker(s)",
            partition,
            self.options.worker_count()
        );

        let outcomes = self.run_all(samples, progress);
        let report = PartitionReport::from_outcomes(partition, &outcomes, start.elapsed());

        info!(
            "{} built {} graphs totally ({} processed, {} failed)",
            partition, report.succeeded, report.processed, report.failed
        );
        report
    }
}

fn log_failure(key: Option<&CanonicalKey>, err: &PipelineError) {
    let label = key
        .map(CanonicalKey::dir_name)
        .unwrap_or_else(|| "<unkeyed>".to_string());
    match err.tool_error().and_then(|t| t.report()) {
        Some(report) => warn!("{}: {}\n{}", label, err, report.diagnostics()),
        None => warn!("{}: {}", label, err),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
