//! End-to-end pipeline tests.
//!
//! The JDK is replaced by small shell scripts installed as `bin/javac` and
//! `bin/java` under a temporary "java home", so the real process adapter,
//! artifact layout and scheduler are exercised together. The scripts are
//! written once, before any test spawns a process, so no exec can race a
//! half-written script.

#![cfg(unix)]

use std::fs::{self, File};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use graphforge_core::corpus::Corpus;
use graphforge_core::scheduler::DEFAULT_MAX_TOKENS;
use graphforge_core::store::ArtifactStore;
use graphforge_core::toolchain::{
    GraphArtifacts, IrHandle, JavacToolchain, Toolchain, ToolchainSettings,
};
use graphforge_core::{
    CorpusError, JobOptions, JobOutcome, JobStatus, PipelineError, ProgressSink, Sample,
    Scheduler, ToolError,
};
use once_cell::sync::Lazy;
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

/// Fake analyzer: fails on BROKEN, exits 0 without IR on SILENT, hangs on HANG.
const FAKE_JAVAC: &str = r#"#!/bin/sh
for last; do :; done
echo call >> "$(dirname "$last")/../analyze.log"
if grep -q BROKEN "$last"; then
  echo "$last:2: error: illegal start of expression" >&2
  exit 1
fi
if grep -q SILENT "$last"; then
  exit 0
fi
if grep -q HANG "$last"; then
  sleep 30
fi
printf 'ir' > "$last.proto"
"#;

/// Fake converter: writes both outputs unless the unit is named NoGraph.
const FAKE_JAVA: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    -o) dot="$2"; shift ;;
    -j) json="$2"; shift ;;
  esac
  shift
done
case "$dot" in
  *NoGraph*) echo "cannot read IR" >&2; exit 2 ;;
esac
echo 'digraph {}' > "$dot"
echo '{"nodes": []}' > "$json"
"#;

static JDK: Lazy<FakeJdk> = Lazy::new(FakeJdk::install);

struct FakeJdk {
    home: TempDir,
}

impl FakeJdk {
    fn install() -> Self {
        let home = TempDir::new().expect("Failed to create fake java home");
        let bin = home.path().join("bin");
        fs::create_dir(&bin).unwrap();
        for (name, script) in [("javac", FAKE_JAVAC), ("java", FAKE_JAVA)] {
            let path = bin.join(name);
            fs::write(&path, script).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
        Self { home }
    }

    fn settings(&self) -> ToolchainSettings {
        ToolchainSettings {
            java_home: self.home.path().to_path_buf(),
            extractor_jar: PathBuf::from("extractor.jar"),
            converter_jar: PathBuf::from("dot.jar"),
            plugin: "FeaturePlugin".to_string(),
            timeout: Some(Duration::from_secs(20)),
        }
    }

    fn toolchain(&self) -> JavacToolchain {
        JavacToolchain::new(self.settings())
    }
}

/// Analyzer invocations whose unit lived under `out`.
fn analyze_calls(out: &Path) -> usize {
    fs::read_to_string(out.join("analyze.log"))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

fn sample(class: &str, code: &str) -> Sample {
    serde_json::from_value(json!({
        "url": format!("https://github.com/acme/lib/blob/main/src/{}.java#L10-L20", class),
        "repo": "acme/lib",
        "code": code,
        "function_tokens": ["void", class, "(", ")"],
    }))
    .unwrap()
}

fn ok_items(samples: Vec<Sample>) -> Vec<Result<Sample, CorpusError>> {
    samples.into_iter().map(Ok).collect()
}

fn options(workers: usize) -> JobOptions {
    JobOptions {
        workers: Some(workers),
        ..Default::default()
    }
}

/// Outcomes as a sorted multiset of `(key, status)`, independent of completion order.
fn outcome_set(outcomes: &[JobOutcome]) -> Vec<(Option<String>, String)> {
    let mut set: Vec<_> = outcomes
        .iter()
        .map(|o| (o.key.clone(), format!("{:?}", o.status)))
        .collect();
    set.sort();
    set
}

// ============================================================================
// Pipeline Tests
// ============================================================================

#[test]
fn test_full_job_produces_all_artifacts() {
    let jdk = &*JDK;
    let out = TempDir::new().unwrap();
    let scheduler = Scheduler::new(jdk.toolchain(), ArtifactStore::new(out.path()), options(1));

    let outcome = scheduler.run_job(&sample("Parser", "int parse() { return 0; }"));
    assert_eq!(outcome.status, JobStatus::Succeeded, "{:?}", outcome.failure);

    let dir = out.path().join("acme-lib_Parser_10_20");
    for file in [
        "Parser.java",
        "Parser.json",
        "Parser.java.proto",
        "Parser.java.dot",
        "Parser.java.json",
    ] {
        assert!(dir.join(file).is_file(), "missing {}", file);
    }
}

#[test]
fn test_one_broken_sample_does_not_stop_the_batch() {
    let jdk = &*JDK;
    let out = TempDir::new().unwrap();
    let scheduler = Scheduler::new(jdk.toolchain(), ArtifactStore::new(out.path()), options(1));

    let items = ok_items(vec![
        sample("First", "void a() {}"),
        sample("Second", "void b() { BROKEN"),
        sample("Third", "void c() {}"),
    ]);
    let report = scheduler.run("train", items, &());

    assert_eq!(report.processed, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);

    let failure = report.failures[0].failure.as_ref().unwrap();
    assert_eq!(report.failures[0].key.as_deref(), Some("acme-lib_Second_10_20"));
    assert_eq!(failure.kind, "analyzer_failure");
    let process = failure.process.as_ref().unwrap();
    assert_eq!(process.exit_code, Some(1));
    assert!(process.stderr.contains("illegal start of expression"));
    assert!(process.command.contains("-Xplugin:FeaturePlugin"));
}

#[test]
fn test_clean_exit_without_ir_is_analyzer_failure() {
    let jdk = &*JDK;
    let out = TempDir::new().unwrap();
    let toolchain = jdk.toolchain();

    fs::create_dir(out.path().join("unit")).unwrap();
    let unit = out.path().join("unit/Quiet.java");
    fs::write(&unit, "public class Quiet { \nSILENT\n }").unwrap();
    let err = toolchain.analyze(&unit).unwrap_err();
    assert!(matches!(err, ToolError::MissingOutput { .. }), "{err}");

    let scheduler = Scheduler::new(toolchain, ArtifactStore::new(out.path()), options(1));
    let outcome = scheduler.run_job(&sample("Quiet", "SILENT"));
    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.failure.unwrap().kind, "analyzer_failure");
}

#[test]
fn test_converter_failure_fails_job() {
    let jdk = &*JDK;
    let out = TempDir::new().unwrap();
    let scheduler = Scheduler::new(jdk.toolchain(), ArtifactStore::new(out.path()), options(1));

    let outcome = scheduler.run_job(&sample("NoGraph", "void g() {}"));
    assert_eq!(outcome.status, JobStatus::Failed);
    let failure = outcome.failure.unwrap();
    assert_eq!(failure.kind, "converter_failure");
    assert_eq!(failure.process.unwrap().exit_code, Some(2));
    // The IR stage did complete.
    assert!(out
        .path()
        .join("acme-lib_NoGraph_10_20/NoGraph.java.proto")
        .exists());
}

#[test]
fn test_hung_analyzer_times_out() {
    let jdk = &*JDK;
    let out = TempDir::new().unwrap();
    let mut settings = jdk.settings();
    settings.timeout = Some(Duration::from_millis(300));
    let scheduler = Scheduler::new(
        JavacToolchain::new(settings),
        ArtifactStore::new(out.path()),
        options(1),
    );

    let items = ok_items(vec![sample("Slow", "HANG"), sample("Fast", "void f() {}")]);
    let report = scheduler.run("train", items, &());
    assert_eq!(report.succeeded, 1);
    let failure = report.failures[0].failure.as_ref().unwrap();
    assert!(failure.message.contains("timed out"), "{}", failure.message);
    assert_eq!(failure.process.as_ref().unwrap().exit_code, None);
}

#[test]
fn test_second_run_skips_everything_already_built() {
    let jdk = &*JDK;
    let out = TempDir::new().unwrap();
    let corpus = vec![
        sample("Alpha", "void a() {}"),
        sample("Beta", "void b() {}"),
        sample("Gamma", "void c() {}"),
    ];

    let scheduler = Scheduler::new(jdk.toolchain(), ArtifactStore::new(out.path()), options(2));
    let first = scheduler.run("train", ok_items(corpus.clone()), &());
    assert_eq!(first.succeeded, 3);
    let calls_after_first = analyze_calls(out.path());
    assert_eq!(calls_after_first, 3);

    let second = scheduler.run("train", ok_items(corpus), &());
    assert_eq!(second.succeeded, 0);
    assert_eq!(second.skipped_existing, 3);
    assert_eq!(analyze_calls(out.path()), calls_after_first);
}

#[test]
fn test_override_rebuilds_existing() {
    let jdk = &*JDK;
    let out = TempDir::new().unwrap();
    let store = ArtifactStore::new(out.path());
    fs::create_dir(out.path().join("acme-lib_Alpha_10_20")).unwrap();

    let scheduler = Scheduler::new(
        jdk.toolchain(),
        store,
        JobOptions {
            override_existing: true,
            ..options(1)
        },
    );
    assert_eq!(
        scheduler.run_job(&sample("Alpha", "void a() {}")).status,
        JobStatus::Succeeded
    );
}

#[test]
fn test_token_budget_boundary_never_invokes_toolchain() {
    let jdk = &*JDK;
    let out = TempDir::new().unwrap();
    let scheduler = Scheduler::new(jdk.toolchain(), ArtifactStore::new(out.path()), options(1));

    let with_tokens = |class: &str, n: usize| -> Sample {
        serde_json::from_value(json!({
            "url": format!("src/{}.java#L1-L2", class),
            "repo": "acme/lib",
            "code": "void f() {}",
            "function_tokens": vec!["x"; n],
        }))
        .unwrap()
    };

    assert_eq!(
        scheduler.run_job(&with_tokens("Exact", DEFAULT_MAX_TOKENS)).status,
        JobStatus::Succeeded
    );
    assert_eq!(
        scheduler.run_job(&with_tokens("Over", DEFAULT_MAX_TOKENS + 1)).status,
        JobStatus::Filtered
    );
    assert_eq!(analyze_calls(out.path()), 1);
}

#[test]
fn test_sequential_and_pooled_outcomes_match() {
    let jdk = &*JDK;
    let corpus: Vec<Sample> = (0..12)
        .map(|i| {
            let body = if i % 4 == 1 { "BROKEN" } else { "void f() {}" };
            sample(&format!("Unit{}", i), body)
        })
        .chain(std::iter::once(
            serde_json::from_value(json!({"url": "no-range", "code": "x"})).unwrap(),
        ))
        // Same provenance as Unit0 and Unit1: one build, the rest skipped.
        .chain((0..6).map(|_| sample("Unit0", "void f() {}")))
        .chain((0..3).map(|_| sample("Unit1", "BROKEN")))
        .collect();

    let seq_out = TempDir::new().unwrap();
    let sequential = Scheduler::new(jdk.toolchain(), ArtifactStore::new(seq_out.path()), options(1));
    let seq = sequential.run_all(ok_items(corpus.clone()), &());

    for workers in [2, 4, 8] {
        let pool_out = TempDir::new().unwrap();
        let pooled = Scheduler::new(
            jdk.toolchain(),
            ArtifactStore::new(pool_out.path()),
            options(workers),
        );
        let par = pooled.run_all(ok_items(corpus.clone()), &());
        assert_eq!(outcome_set(&seq), outcome_set(&par), "workers = {}", workers);
        assert_eq!(analyze_calls(pool_out.path()), 12, "workers = {}", workers);
    }

    let count = |status| seq.iter().filter(|o| o.status == status).count();
    assert_eq!(count(JobStatus::Succeeded), 9);
    assert_eq!(count(JobStatus::ExistsSkipped), 9);
    assert_eq!(count(JobStatus::Failed), 4);
    assert_eq!(analyze_calls(seq_out.path()), 12);
}

struct CountingSink(AtomicUsize);

impl ProgressSink for CountingSink {
    fn job_finished(&self, _outcome: &JobOutcome) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_progress_reported_once_per_job() {
    let jdk = &*JDK;
    let corpus: Vec<Sample> = (0..8).map(|i| sample(&format!("P{}", i), "void f() {}")).collect();

    for workers in [1, 3] {
        let out = TempDir::new().unwrap();
        let scheduler =
            Scheduler::new(jdk.toolchain(), ArtifactStore::new(out.path()), options(workers));
        let sink = CountingSink(AtomicUsize::new(0));
        scheduler.run("valid", ok_items(corpus.clone()), &sink);
        assert_eq!(sink.0.load(Ordering::SeqCst), 8);
    }
}

/// Panics on the unit named `Boom`, otherwise writes fake artifacts.
struct PanickyToolchain;

impl Toolchain for PanickyToolchain {
    fn analyze(&self, unit_path: &Path) -> Result<IrHandle, ToolError> {
        if unit_path.ends_with("Boom.java") {
            panic!("analyzer exploded");
        }
        let ir = IrHandle::for_unit(unit_path);
        fs::write(&ir.ir_path, b"ir").unwrap();
        Ok(ir)
    }

    fn convert_to_graph(&self, ir: &IrHandle) -> Result<GraphArtifacts, ToolError> {
        let out = GraphArtifacts::for_ir(ir);
        fs::write(&out.dot_path, "").unwrap();
        fs::write(&out.json_path, "").unwrap();
        Ok(out)
    }
}

#[test]
fn test_panicking_job_is_contained() {
    let out = TempDir::new().unwrap();
    let scheduler = Scheduler::new(PanickyToolchain, ArtifactStore::new(out.path()), options(2));

    let items = ok_items(vec![
        sample("Calm", "void a() {}"),
        sample("Boom", "void b() {}"),
        sample("Quiet", "void c() {}"),
    ]);
    let report = scheduler.run("test", items, &());
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    let failure = report.failures[0].failure.as_ref().unwrap();
    assert_eq!(failure.kind, "unexpected_error");
    assert!(failure.message.contains("analyzer exploded"));
}

#[test]
fn test_corpus_to_artifacts() {
    let jdk = &*JDK;
    let root = TempDir::new().unwrap();
    let train = root.path().join("train");
    fs::create_dir(&train).unwrap();

    let shard = File::create(train.join("java_train_0.jsonl.gz")).unwrap();
    let mut enc = GzEncoder::new(shard, Compression::default());
    for class in ["One", "Two"] {
        let line = serde_json::to_string(&sample(class, "void f() {}")).unwrap();
        writeln!(enc, "{}", line).unwrap();
    }
    writeln!(enc, "{{broken").unwrap();
    enc.finish().unwrap();

    let corpus = Corpus::discover(root.path(), "java").unwrap();
    let partition = corpus.partition("train").unwrap();
    let scheduler = Scheduler::new(
        jdk.toolchain(),
        ArtifactStore::new(partition.output_dir(None)),
        options(1),
    );
    let report = scheduler.run(partition.name(), partition.samples(), &());

    assert_eq!(report.processed, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert!(train.join("java_funcs/acme-lib_One_10_20/One.java.json").exists());
    assert!(matches!(
        report.failures[0].failure.as_ref().map(|f| f.kind),
        Some("unexpected_error")
    ));
}

#[test]
fn test_malformed_provenance_is_reported() {
    let out = TempDir::new().unwrap();
    let scheduler = Scheduler::new(PanickyToolchain, ArtifactStore::new(out.path()), options(1));
    let bad: Sample = serde_json::from_value(json!({"url": "Foo.java#L1", "code": "x"})).unwrap();

    let outcome = scheduler.run_job(&bad);
    assert_eq!(outcome.status, JobStatus::Failed);
    assert!(outcome.failure.unwrap().message.contains("Foo.java#L1"));
    assert!(matches!(
        graphforge_core::CanonicalKey::derive(&bad),
        Err(PipelineError::MalformedProvenance { .. })
    ));
}
