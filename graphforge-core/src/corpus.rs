//! Corpus shard discovery and streaming.
//!
//! A corpus root holds one directory per partition (e.g. `train`, `valid`,
//! `test`). Each partition holds gzip-compressed JSON-lines shards. Samples
//! are streamed lazily, shard after shard, so a partition never has to fit
//! in memory; [`Partition::samples`] can be called again to restart.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;

use crate::error::CorpusError;
use crate::sample::Sample;

/// Default file-name prefix of shards to pick up.
pub const DEFAULT_SHARD_PREFIX: &str = "java";
/// Shard file extension.
pub const SHARD_EXTENSION: &str = ".gz";
/// Output directory created inside a partition when no output root is set.
pub const DEFAULT_OUTPUT_DIRNAME: &str = "java_funcs";

/// A discovered corpus root.
#[derive(Clone, Debug)]
pub struct Corpus {
    root: PathBuf,
    partitions: Vec<Partition>,
}

impl Corpus {
    /// List partitions under `root` and their shards matching `shard_prefix`.
    ///
    /// Partitions and shards are sorted by name so runs are reproducible.
    pub fn discover(root: &Path, shard_prefix: &str) -> Result<Self, CorpusError> {
        if !root.is_dir() {
            return Err(CorpusError::MissingRoot(root.to_path_buf()));
        }

        let mut partitions = Vec::new();
        for dir in sorted_entries(root)? {
            if dir.is_dir() {
                partitions.push(Partition::discover(&dir, shard_prefix)?);
            }
        }

        debug!("Discovered {} partitions under {:?}", partitions.len(), root);
        Ok(Self {
            root: root.to_path_buf(),
            partitions,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Look up a partition by directory name.
    pub fn partition(&self, name: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.name == name)
    }
}

/// One partition directory and its shard files.
#[derive(Clone, Debug)]
pub struct Partition {
    name: String,
    dir: PathBuf,
    shards: Vec<PathBuf>,
}

impl Partition {
    /// Collect the shards of one partition directory.
    pub fn discover(dir: &Path, shard_prefix: &str) -> Result<Self, CorpusError> {
        let shards = sorted_entries(dir)?
            .into_iter()
            .filter(|p| p.is_file() && is_shard(p, shard_prefix))
            .collect();

        Ok(Self {
            name: dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            dir: dir.to_path_buf(),
            shards,
        })
    }

    /// A partition made of explicit shard files.
    pub fn from_shards(name: impl Into<String>, dir: PathBuf, shards: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir,
            shards,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn shards(&self) -> &[PathBuf] {
        &self.shards
    }

    /// Where this partition's artifact directories go.
    ///
    /// `<partition>/java_funcs` by default, `<out_root>/<partition>` otherwise.
    pub fn output_dir(&self, out_root: Option<&Path>) -> PathBuf {
        match out_root {
            Some(root) => root.join(&self.name),
            None => self.dir.join(DEFAULT_OUTPUT_DIRNAME),
        }
    }

    /// Stream every sample of every shard, in shard order.
    pub fn samples(&self) -> Samples {
        Samples {
            pending: self.shards.clone().into_iter(),
            current: None,
        }
    }
}

fn is_shard(path: &Path, prefix: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(prefix) && n.ends_with(SHARD_EXTENSION))
        .unwrap_or(false)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, CorpusError> {
    let read_err = |source| CorpusError::Read {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = fs::read_dir(dir)
        .map_err(read_err)?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err)?;
    entries.sort();
    Ok(entries)
}

/// Line-by-line reader over one gzip JSON-lines shard.
pub struct ShardReader {
    path: PathBuf,
    reader: BufReader<GzDecoder<File>>,
    buf: Vec<u8>,
    line_no: usize,
    done: bool,
}

impl ShardReader {
    pub fn open(path: &Path) -> Result<Self, CorpusError> {
        let file = File::open(path).map_err(|source| CorpusError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(GzDecoder::new(file)),
            buf: Vec::new(),
            line_no: 0,
            done: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for ShardReader {
    type Item = Result<Sample, CorpusError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            // Invalid UTF-8 is a parse error of its own line, not a stream error.
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(_) => {}
                Err(source) => {
                    // A broken stream cannot be resynchronized.
                    self.done = true;
                    return Some(Err(CorpusError::Read {
                        path: self.path.clone(),
                        source,
                    }));
                }
            }
            self.line_no += 1;

            let line = self.buf.trim_ascii();
            if line.is_empty() {
                continue;
            }

            return Some(Sample::from_json(line).map_err(|source| CorpusError::Parse {
                path: self.path.clone(),
                line: self.line_no,
                source,
            }));
        }
    }
}

/// Lazy sample stream over a list of shards. See [`Partition::samples`].
pub struct Samples {
    pending: std::vec::IntoIter<PathBuf>,
    current: Option<ShardReader>,
}

impl Iterator for Samples {
    type Item = Result<Sample, CorpusError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(reader) = self.current.as_mut() {
                if let Some(item) = reader.next() {
                    return Some(item);
                }
                self.current = None;
            }

            let shard = self.pending.next()?;
            debug!("Reading shard {:?}", shard);
            match ShardReader::open(&shard) {
                Ok(reader) => self.current = Some(reader),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
