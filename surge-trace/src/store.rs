use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::model::{Environment, Expectation, ScenarioRecord, StepEntry};

/// Stream format version; prefixes every trace file so readers can evolve.
pub const TRACE_FORMAT_VERSION: i32 = 1;

/// Fixed filename of the per-run scenario index.
pub const SCENARIO_INDEX_FILENAME: &str = "scenarios.surge";

/// Extension shared by the scenario index and the step logs.
pub const STEP_LOG_EXTENSION: &str = "surge";

/// Frames larger than this are treated as corruption rather than allocated.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("trace i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("trace encoding failed: {0}")]
    Encode(#[source] bincode::Error),

    #[error("trace decoding failed: {0}")]
    Decode(#[source] bincode::Error),

    #[error("trace stream is truncated (missing {0})")]
    Truncated(&'static str),

    #[error("trace frame length {0} exceeds the supported maximum")]
    OversizedFrame(u32),

    #[error("trace store is already closed")]
    Closed,
}

fn step_log_filename(ordinal: usize) -> String {
    format!("step-{ordinal}.{STEP_LOG_EXTENSION}")
}

/// Whether a directory entry name looks like a step log (`step-N.surge`).
#[must_use]
pub fn is_step_log_filename(name: &str) -> bool {
    let Some(rest) = name.strip_prefix("step-") else {
        return false;
    };
    let Some(ordinal) = rest.strip_suffix(&format!(".{STEP_LOG_EXTENSION}")) else {
        return false;
    };
    !ordinal.is_empty() && ordinal.bytes().all(|b| b.is_ascii_digit())
}

/// Length-prefixed bincode frames over any byte sink.
struct FrameWriter<W: Write> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner }
    }

    fn write_frame<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let payload = bincode::serialize(value).map_err(Error::Encode)?;
        let len = u32::try_from(payload.len()).map_err(|_| {
            Error::Encode(Box::new(bincode::ErrorKind::SizeLimit))
        })?;
        self.inner.write_all(&len.to_le_bytes())?;
        self.inner.write_all(&payload)?;
        Ok(())
    }
}

/// Length-prefixed bincode frames over any byte source.
///
/// A frame payload may be longer than the decoded type expects; the trailing
/// bytes are ignored, which is the forward-compatibility seam for fields
/// appended by newer writers.
struct FrameReader<R: Read> {
    inner: R,
}

impl<R: Read> FrameReader<R> {
    fn new(inner: R) -> Self {
        Self { inner }
    }

    fn read_frame<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        let mut len_buf = [0u8; 4];
        match read_exact_or_eof(&mut self.inner, &mut len_buf)? {
            ReadOutcome::Eof => return Ok(None),
            ReadOutcome::Filled => {}
        }

        let len = u32::from_le_bytes(len_buf);
        if len > MAX_FRAME_LEN {
            return Err(Error::OversizedFrame(len));
        }

        let mut payload = vec![0u8; len as usize];
        self.inner.read_exact(&mut payload)?;
        let value = bincode::deserialize(&payload).map_err(Error::Decode)?;
        Ok(Some(value))
    }

    fn read_required_frame<T: DeserializeOwned>(&mut self, what: &'static str) -> Result<T> {
        self.read_frame()?.ok_or(Error::Truncated(what))
    }
}

enum ReadOutcome {
    Filled,
    Eof,
}

/// Like `read_exact`, but a clean EOF before the first byte is not an error.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(ReadOutcome::Eof);
            }
            return Err(Error::Truncated("frame length prefix"));
        }
        filled += n;
    }
    Ok(ReadOutcome::Filled)
}

type GzFrameWriter = FrameWriter<GzEncoder<File>>;

/// One step log on disk. Encoding is serialized behind the writer's own
/// lock so concurrent users writing to the same step never interleave.
struct StepLogWriter {
    frames: Mutex<Option<GzFrameWriter>>,
}

impl StepLogWriter {
    fn create(path: &Path, name: &str, expectation: &Expectation) -> Result<Self> {
        let file = File::create(path)?;
        let mut frames = FrameWriter::new(GzEncoder::new(file, Compression::default()));
        frames.write_frame(&TRACE_FORMAT_VERSION)?;
        frames.write_frame(&name)?;
        frames.write_frame(expectation)?;
        Ok(Self {
            frames: Mutex::new(Some(frames)),
        })
    }

    fn append(&self, entry: &StepEntry) -> Result<()> {
        let mut guard = self
            .frames
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let frames = guard.as_mut().ok_or(Error::Closed)?;
        frames.write_frame(entry)
    }

    fn finish(&self) -> Result<()> {
        let mut guard = self
            .frames
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(frames) = guard.take() {
            frames.inner.finish()?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct StepRegistry {
    by_name: HashMap<String, Arc<StepLogWriter>>,
}

struct Inner {
    folder: PathBuf,
    index: Mutex<Option<GzFrameWriter>>,
    steps: Mutex<StepRegistry>,
}

/// The per-run trace sink: one scenario index plus lazily created step logs.
///
/// A disabled store (no output folder) swallows every write, so scenario
/// code needs no special-casing when running without a report path.
pub struct TraceStore {
    inner: Option<Inner>,
}

impl TraceStore {
    /// A store that ignores all writes.
    #[must_use]
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Creates the output folder (if missing) and opens the scenario index.
    pub fn create(folder: &Path) -> Result<Self> {
        std::fs::create_dir_all(folder)?;
        let index_file = File::create(folder.join(SCENARIO_INDEX_FILENAME))?;
        let index = FrameWriter::new(GzEncoder::new(index_file, Compression::default()));
        Ok(Self {
            inner: Some(Inner {
                folder: folder.to_path_buf(),
                index: Mutex::new(Some(index)),
                steps: Mutex::new(StepRegistry::default()),
            }),
        })
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Appends one observation to the step's log, creating the log on the
    /// first archive for that step name. The expectation is persisted once,
    /// at log creation.
    pub fn archive(&self, step_name: &str, expectation: &Expectation, entry: &StepEntry) -> Result<()> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };

        let writer = {
            let mut registry = inner
                .steps
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match registry.by_name.get(step_name) {
                Some(writer) => writer.clone(),
                None => {
                    let filename = step_log_filename(registry.by_name.len() + 1);
                    let writer = Arc::new(StepLogWriter::create(
                        &inner.folder.join(filename),
                        step_name,
                        expectation,
                    )?);
                    registry
                        .by_name
                        .insert(step_name.to_string(), writer.clone());
                    writer
                }
            }
        };

        writer.append(entry)
    }

    /// Writes the scenario index and closes every open log. Idempotent, so
    /// the signal-teardown path and the normal path can both call it.
    pub fn finish(
        &self,
        environment: &Environment,
        scenarios: &BTreeMap<String, ScenarioRecord>,
    ) -> Result<()> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };

        {
            let mut guard = inner
                .index
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(mut index) = guard.take() {
                index.write_frame(&TRACE_FORMAT_VERSION)?;
                index.write_frame(environment)?;
                index.write_frame(scenarios)?;
                index.inner.finish()?;
                tracing::info!(
                    path = %inner.folder.join(SCENARIO_INDEX_FILENAME).display(),
                    "scenario index written"
                );
            }
        }

        let writers: Vec<(String, Arc<StepLogWriter>)> = {
            let registry = inner
                .steps
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            registry
                .by_name
                .iter()
                .map(|(name, writer)| (name.clone(), writer.clone()))
                .collect()
        };
        for (name, writer) in writers {
            writer.finish()?;
            tracing::info!(step = %name, "step log closed");
        }
        Ok(())
    }
}

/// Decoded scenario index stream.
#[derive(Debug, Clone)]
pub struct ScenarioIndex {
    pub version: i32,
    pub environment: Environment,
    pub scenarios: BTreeMap<String, ScenarioRecord>,
}

/// Reads a full `scenarios.surge` stream.
pub fn read_scenario_index(path: &Path) -> Result<ScenarioIndex> {
    let mut frames = FrameReader::new(GzDecoder::new(File::open(path)?));
    let version: i32 = frames.read_required_frame("format version")?;
    let environment: Environment = frames.read_required_frame("environment")?;
    let scenarios: BTreeMap<String, ScenarioRecord> = frames.read_required_frame("scenario map")?;
    Ok(ScenarioIndex {
        version,
        environment,
        scenarios,
    })
}

/// Streaming reader over one step log: the header is decoded eagerly, the
/// entries on demand.
pub struct StepLogReader {
    pub version: i32,
    pub step_name: String,
    pub expectation: Expectation,
    frames: FrameReader<GzDecoder<File>>,
}

impl StepLogReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut frames = FrameReader::new(GzDecoder::new(File::open(path)?));
        let version: i32 = frames.read_required_frame("format version")?;
        let step_name: String = frames.read_required_frame("step name")?;
        let expectation: Expectation = frames.read_required_frame("expectation")?;
        Ok(Self {
            version,
            step_name,
            expectation,
            frames,
        })
    }

    /// The next persisted entry, or `None` at a clean end of stream.
    pub fn next_entry(&mut self) -> Result<Option<StepEntry>> {
        self.frames.read_frame()
    }
}

/// Decodes just enough of a step log to learn which step it belongs to.
pub fn read_step_name(path: &Path) -> Result<String> {
    let mut frames = FrameReader::new(GzDecoder::new(File::open(path)?));
    let _version: i32 = frames.read_required_frame("format version")?;
    frames.read_required_frame("step name")
}
