//! Size-bounded shard files.
//!
//! A shard is one JSON array of encoded records stored as
//! `<kind>_<idx>.json` or `<kind>_<idx>.json.gz`, with `<idx>` zero-padded to
//! six digits and counting from 0. The writer flushes whenever the buffered
//! serialized size reaches the threshold, so the concatenation of all shards
//! of one kind is exactly the pushed sequence.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

use crate::{Error, Result};

/// Which record stream a shard belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShardKind {
    Nodes,
    Relationships,
}

impl ShardKind {
    pub fn prefix(self) -> &'static str {
        match self {
            ShardKind::Nodes => "nodes",
            ShardKind::Relationships => "relationships",
        }
    }

    pub fn file_name(self, index: usize, compressed: bool) -> String {
        let ext = if compressed { ".json.gz" } else { ".json" };
        format!("{}_{index:06}{ext}", self.prefix())
    }

    /// Parse `<prefix>_<digits><ext>` back into an index.
    fn parse_index(self, file_name: &str, compressed: bool) -> Option<usize> {
        let ext = if compressed { ".json.gz" } else { ".json" };
        let digits = file_name
            .strip_prefix(self.prefix())?
            .strip_prefix('_')?
            .strip_suffix(ext)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

impl std::fmt::Display for ShardKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

fn shard_io(path: &Path, source: std::io::Error) -> Error {
    Error::ShardIo { path: path.to_path_buf(), source }
}

fn shard_json(path: &Path, source: serde_json::Error) -> Error {
    if source.is_io() {
        Error::ShardIo { path: path.to_path_buf(), source: source.into() }
    } else {
        Error::ShardFormat { path: path.to_path_buf(), source }
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Totals reported by [`ShardWriter::finish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardSummary {
    pub shards: usize,
    pub records: u64,
}

/// Buffers records and flushes them to numbered shard files.
pub struct ShardWriter<T> {
    dir: PathBuf,
    kind: ShardKind,
    compress: bool,
    indent: usize,
    threshold: usize,
    buffer: Vec<serde_json::Value>,
    buffered_bytes: usize,
    next_index: usize,
    records: u64,
    _record: PhantomData<fn(&T)>,
}

impl<T: Serialize> ShardWriter<T> {
    /// `threshold` is in serialized (uncompressed, unindented) bytes; a
    /// single record larger than it still gets its own shard.
    pub fn new(dir: impl Into<PathBuf>, kind: ShardKind, compress: bool, indent: usize, threshold: usize) -> Self {
        Self {
            dir: dir.into(),
            kind,
            compress,
            indent,
            threshold: threshold.max(1),
            buffer: Vec::new(),
            buffered_bytes: 0,
            next_index: 0,
            records: 0,
            _record: PhantomData,
        }
    }

    /// Buffer one record, flushing if the threshold is reached.
    /// Returns the path of a shard written by this call.
    pub fn push(&mut self, record: &T) -> Result<Option<PathBuf>> {
        let value = serde_json::to_value(record).map_err(|e| shard_json(&self.dir, e))?;
        // +1 for the separating comma
        self.buffered_bytes += value.to_string().len() + 1;
        self.buffer.push(value);
        self.records += 1;
        if self.buffered_bytes >= self.threshold {
            return self.flush();
        }
        Ok(None)
    }

    /// Write buffered records as the next shard. No-op when empty.
    pub fn flush(&mut self) -> Result<Option<PathBuf>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        fs::create_dir_all(&self.dir).map_err(|e| shard_io(&self.dir, e))?;

        let name = self.kind.file_name(self.next_index, self.compress);
        let path = self.dir.join(&name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        self.write_file(&tmp)?;
        fs::rename(&tmp, &path).map_err(|e| shard_io(&path, e))?;

        tracing::info!(
            shard = %path.display(),
            records = self.buffer.len(),
            bytes = self.buffered_bytes,
            "shard flushed"
        );
        self.next_index += 1;
        self.buffer.clear();
        self.buffered_bytes = 0;
        Ok(Some(path))
    }

    fn write_file(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| shard_io(path, e))?;
        let writer = BufWriter::new(file);
        let file = if self.compress {
            let mut encoder = GzEncoder::new(writer, Compression::default());
            write_array(&mut encoder, &self.buffer, self.indent).map_err(|e| shard_json(path, e))?;
            let writer = encoder.finish().map_err(|e| shard_io(path, e))?;
            writer.into_inner().map_err(|e| shard_io(path, e.into_error()))?
        } else {
            let mut writer = writer;
            write_array(&mut writer, &self.buffer, self.indent).map_err(|e| shard_json(path, e))?;
            writer.into_inner().map_err(|e| shard_io(path, e.into_error()))?
        };
        file.sync_all().map_err(|e| shard_io(path, e))
    }

    /// Flush the final (possibly undersized) shard.
    pub fn finish(mut self) -> Result<ShardSummary> {
        self.flush()?;
        Ok(ShardSummary { shards: self.next_index, records: self.records })
    }
}

fn write_array<W: Write>(writer: W, records: &[serde_json::Value], indent: usize) -> serde_json::Result<()> {
    if indent == 0 {
        return serde_json::to_writer(writer, records);
    }
    let indent = vec![b' '; indent];
    let mut ser = Serializer::with_formatter(writer, PrettyFormatter::with_indent(&indent));
    records.serialize(&mut ser)
}

// ============================================================================
// Reader
// ============================================================================

/// Lazy reader over one kind of shard, in index order.
///
/// Iterating yields `(index, records)` one shard at a time. [`resume`]
/// skips ahead without opening earlier shards, and [`read_shard`] gives
/// random access for workers that load shards concurrently.
///
/// [`resume`]: ShardReader::resume
/// [`read_shard`]: ShardReader::read_shard
#[derive(Debug, Clone)]
pub struct ShardReader<T> {
    dir: PathBuf,
    kind: ShardKind,
    paths: Vec<PathBuf>,
    compressed: bool,
    position: usize,
    _record: PhantomData<fn() -> T>,
}

impl<T> ShardReader<T> {
    /// Discover the shards of `kind` in `dir`.
    ///
    /// Indices must run contiguously from 0, and if `expected` is given the
    /// count must match it. A missing directory means zero shards.
    pub fn open(dir: impl Into<PathBuf>, kind: ShardKind, compressed: bool, expected: Option<usize>) -> Result<Self> {
        let dir = dir.into();
        let mut indices = Vec::new();

        if dir.exists() {
            let entries = fs::read_dir(&dir).map_err(|e| shard_io(&dir, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| shard_io(&dir, e))?;
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if let Some(idx) = kind.parse_index(name, compressed) {
                    let canonical = kind.file_name(idx, compressed);
                    if name != canonical {
                        return Err(Error::ShardSet {
                            dir,
                            message: format!("{name} is not a shard file name, expected {canonical}"),
                        });
                    }
                    indices.push(idx);
                } else if kind.parse_index(name, !compressed).is_some() {
                    return Err(Error::ShardSet {
                        dir,
                        message: format!(
                            "found {name} but the export is {}compressed",
                            if compressed { "" } else { "not " }
                        ),
                    });
                }
            }
        }
        indices.sort_unstable();

        if let Some(gap) = indices.iter().enumerate().find(|(pos, idx)| *pos != **idx) {
            return Err(Error::ShardSet {
                dir,
                message: format!("{kind} shard {} is missing", gap.0),
            });
        }
        if let Some(expected) = expected {
            if expected != indices.len() {
                return Err(Error::ShardSet {
                    dir,
                    message: format!("expected {expected} {kind} shards, found {}", indices.len()),
                });
            }
        }

        let paths = indices
            .into_iter()
            .map(|idx| dir.join(kind.file_name(idx, compressed)))
            .collect();
        Ok(Self { dir, kind, paths, compressed, position: 0, _record: PhantomData })
    }

    /// Restart iteration at shard `from`.
    pub fn resume(mut self, from: usize) -> Result<Self> {
        if from > self.paths.len() {
            return Err(Error::ShardSet {
                dir: self.dir,
                message: format!("cannot resume {} at shard {from}: only {} shards", self.kind, self.paths.len()),
            });
        }
        self.position = from;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn kind(&self) -> ShardKind {
        self.kind
    }

    pub fn path(&self, index: usize) -> Option<&Path> {
        self.paths.get(index).map(PathBuf::as_path)
    }
}

impl<T: DeserializeOwned> ShardReader<T> {
    /// Read and deserialize shard `index`.
    pub fn read_shard(&self, index: usize) -> Result<Vec<T>> {
        let path = self.paths.get(index).ok_or_else(|| Error::ShardSet {
            dir: self.dir.clone(),
            message: format!("no {} shard {index}", self.kind),
        })?;
        let file = File::open(path).map_err(|e| shard_io(path, e))?;
        let reader = BufReader::new(file);
        let records = if self.compressed {
            serde_json::from_reader(BufReader::new(GzDecoder::new(reader)))
        } else {
            serde_json::from_reader(reader)
        };
        let records: Vec<T> = records.map_err(|e| shard_json(path, e))?;
        tracing::debug!(shard = %path.display(), records = records.len(), "shard read");
        Ok(records)
    }
}

impl<T: DeserializeOwned> Iterator for ShardReader<T> {
    type Item = Result<(usize, Vec<T>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.paths.len() {
            return None;
        }
        let index = self.position;
        self.position += 1;
        Some(self.read_shard(index).map(|records| (index, records)))
    }
}
