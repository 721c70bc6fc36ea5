//! Partition writer
//!
//! Fans records out to one sink per partition key (vehicle id or the global
//! scope). Sinks are opened lazily on the first write for a key and held until
//! the end of the pass, so a split completes in one scan. An optional bound on
//! simultaneously open sinks evicts the least-recently-written one; the next
//! write for an evicted key reopens it in append mode.
//!
//! Every held sink is flushed and closed by [`PartitionWriter::close_all`],
//! which keeps going past individual failures, and again by `Drop` if the
//! writer is abandoned on an error path.

use crate::filter::Filterable;
use crate::formats::transit::encode_record;
use crate::pipeline::{Flow, Stage};
use crate::types::{DecoderError, MalformedUnit, Result, TransitRecord};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

const SINK_BUFFER_SIZE: usize = 64 * 1024;

/// Output destination of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PartitionKey {
    Vehicle(u32),
    Global,
}

impl PartitionKey {
    pub fn for_vehicle(veh_id: Option<u32>) -> Self {
        veh_id.map_or(PartitionKey::Global, PartitionKey::Vehicle)
    }

    /// `veh_<id>.<ext>` or `global.<ext>`
    pub fn file_name(&self, ext: &str) -> String {
        format!("{}.{}", self, ext)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::Vehicle(id) => write!(f, "veh_{}", id),
            PartitionKey::Global => f.write_str("global"),
        }
    }
}

/// Opens the sink behind a key
pub trait SinkFactory {
    type Sink: Write;

    /// `append` is set when the key was opened before in this pass
    fn open(&mut self, key: PartitionKey, append: bool) -> io::Result<Self::Sink>;
}

fn open_file(path: &Path, append: bool, header: Option<&str>) -> io::Result<BufWriter<File>> {
    let file = if append {
        OpenOptions::new().append(true).create(true).open(path)?
    } else {
        File::create(path)?
    };
    let mut writer = BufWriter::with_capacity(SINK_BUFFER_SIZE, file);
    if let (false, Some(header)) = (append, header) {
        writeln!(writer, "{}", header)?;
    }
    Ok(writer)
}

/// One file per key inside a directory
#[derive(Debug, Clone)]
pub struct DirectorySinks {
    dir: PathBuf,
    ext: String,
    header: Option<String>,
}

impl DirectorySinks {
    /// Create `dir` (and parents) if needed
    pub fn create(dir: impl Into<PathBuf>, ext: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            ext: ext.into(),
            header: None,
        })
    }

    /// Line written at the top of every newly created file
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: PartitionKey) -> PathBuf {
        self.dir.join(key.file_name(&self.ext))
    }
}

impl SinkFactory for DirectorySinks {
    type Sink = BufWriter<File>;

    fn open(&mut self, key: PartitionKey, append: bool) -> io::Result<Self::Sink> {
        open_file(&self.path_for(key), append, self.header.as_deref())
    }
}

/// Every key goes to one fixed file
#[derive(Debug, Clone)]
pub struct SingleFileSink {
    path: PathBuf,
    header: Option<String>,
}

impl SingleFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            header: None,
        }
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SinkFactory for SingleFileSink {
    type Sink = BufWriter<File>;

    fn open(&mut self, _key: PartitionKey, append: bool) -> io::Result<Self::Sink> {
        open_file(&self.path, append, self.header.as_deref())
    }
}

struct OpenSink<W> {
    writer: W,
    last_used: u64,
}

fn sink_error(key: PartitionKey, source: io::Error) -> DecoderError {
    DecoderError::Sink {
        key: key.to_string(),
        source,
    }
}

/// Key → open sink table with cumulative per-key counts
pub struct PartitionWriter<F: SinkFactory> {
    factory: F,
    open: HashMap<PartitionKey, OpenSink<F::Sink>>,
    /// Records written per key; a key is present once its sink was created
    counts: BTreeMap<PartitionKey, u64>,
    max_open: Option<usize>,
    tick: u64,
    evictions: u64,
}

impl<F: SinkFactory> PartitionWriter<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            open: HashMap::new(),
            counts: BTreeMap::new(),
            max_open: None,
            tick: 0,
            evictions: 0,
        }
    }

    /// Bound the number of simultaneously open sinks (0 = unbounded)
    pub fn with_max_open(mut self, max_open: usize) -> Self {
        self.max_open = (max_open > 0).then_some(max_open);
        self
    }

    /// Make sure the sink for `key` exists, even if nothing is written to it
    pub fn touch(&mut self, key: PartitionKey) -> Result<()> {
        self.sink(key).map(|_| ())
    }

    /// Write one encoded record to the sink for `key`
    pub fn write(&mut self, key: PartitionKey, bytes: &[u8]) -> Result<()> {
        let sink = self.sink(key)?;
        sink.write_all(bytes).map_err(|e| sink_error(key, e))?;
        *self.counts.entry(key).or_insert(0) += 1;
        Ok(())
    }

    fn sink(&mut self, key: PartitionKey) -> Result<&mut F::Sink> {
        self.tick += 1;
        let tick = self.tick;

        if !self.open.contains_key(&key) && self.max_open.is_some_and(|max| self.open.len() >= max) {
            self.evict_least_recent()?;
        }

        let append = self.counts.contains_key(&key);
        let factory = &mut self.factory;
        let sink = match self.open.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let writer = factory.open(key, append).map_err(|e| sink_error(key, e))?;
                log::debug!("Opened sink {} (append={})", key, append);
                entry.insert(OpenSink { writer, last_used: tick })
            }
        };
        sink.last_used = tick;
        self.counts.entry(key).or_insert(0);
        Ok(&mut sink.writer)
    }

    fn evict_least_recent(&mut self) -> Result<()> {
        let Some(key) = self.open.iter().min_by_key(|(_, s)| s.last_used).map(|(k, _)| *k) else {
            return Ok(());
        };
        if let Some(mut sink) = self.open.remove(&key) {
            self.evictions += 1;
            log::trace!("Evicting sink {}", key);
            sink.writer.flush().map_err(|e| sink_error(key, e))?;
        }
        Ok(())
    }

    /// Flush and close every open sink
    ///
    /// All sinks are attempted; the first failure is returned.
    pub fn close_all(&mut self) -> Result<()> {
        let mut first_error = None;
        let mut keys: Vec<PartitionKey> = self.open.keys().copied().collect();
        keys.sort();
        for key in keys {
            if let Some(mut sink) = self.open.remove(&key) {
                if let Err(e) = sink.writer.flush() {
                    log::error!("Failed to flush sink {}: {}", key, e);
                    first_error.get_or_insert(sink_error(key, e));
                }
            }
        }
        log::debug!("Closed {} sink(s), {} eviction(s)", self.counts.len(), self.evictions);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn counts(&self) -> &BTreeMap<PartitionKey, u64> {
        &self.counts
    }

    pub fn total_written(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }
}

impl<F: SinkFactory> Drop for PartitionWriter<F> {
    fn drop(&mut self) {
        if !self.open.is_empty() {
            if let Err(e) = self.close_all() {
                log::error!("Sink cleanup on drop failed: {}", e);
            }
        }
    }
}

/// Where a [`PartitionStage`] sends records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    /// By the record's vehicle id, global when it has none
    ByKey,
    /// Everything to one key
    Single(PartitionKey),
}

/// Adapts a [`PartitionWriter`] to a pass
///
/// `encode` renders one record into the provided buffer (cleared before each
/// call).
pub struct PartitionStage<T, F: SinkFactory, E> {
    writer: PartitionWriter<F>,
    routing: Routing,
    encode: E,
    route_malformed: bool,
    malformed_routed: u64,
    buf: Vec<u8>,
    _record: PhantomData<fn(&T)>,
}

impl<T, F, E> PartitionStage<T, F, E>
where
    T: Filterable,
    F: SinkFactory,
    E: FnMut(&T, &mut Vec<u8>),
{
    pub fn new(writer: PartitionWriter<F>, routing: Routing, encode: E) -> Self {
        Self {
            writer,
            routing,
            encode,
            route_malformed: false,
            malformed_routed: 0,
            buf: Vec::with_capacity(256),
            _record: PhantomData,
        }
    }

    /// Write malformed units verbatim (plus newline) to the global sink
    pub fn with_malformed_routing(mut self, enabled: bool) -> Self {
        self.route_malformed = enabled;
        self
    }

    pub fn writer(&self) -> &PartitionWriter<F> {
        &self.writer
    }

    /// Malformed units written to the global sink
    pub fn malformed_routed(&self) -> u64 {
        self.malformed_routed
    }

    fn key_for(&self, record: &T) -> PartitionKey {
        match self.routing {
            Routing::ByKey => PartitionKey::for_vehicle(record.vehicle_id()),
            Routing::Single(key) => key,
        }
    }
}

impl<T, F, E> Stage<T> for PartitionStage<T, F, E>
where
    T: Filterable,
    F: SinkFactory,
    E: FnMut(&T, &mut Vec<u8>),
{
    fn record(&mut self, record: &T) -> Result<Flow> {
        let key = self.key_for(record);
        self.buf.clear();
        (self.encode)(record, &mut self.buf);
        self.writer.write(key, &self.buf)?;
        Ok(Flow::Continue)
    }

    fn malformed(&mut self, unit: &MalformedUnit) -> Result<()> {
        if !self.route_malformed {
            return Ok(());
        }
        self.buf.clear();
        self.buf.extend_from_slice(unit.raw.as_bytes());
        self.buf.push(b'\n');
        self.writer.write(PartitionKey::Global, &self.buf)?;
        self.malformed_routed += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.writer.close_all()
    }
}

/// Encoder: the record's `Display` form plus newline
pub fn encode_display_line<T: fmt::Display>(record: &T, buf: &mut Vec<u8>) {
    // Writing into a Vec cannot fail
    let _ = writeln!(buf, "{}", record);
}

/// Encoder: the record's exact 28-byte binary form
pub fn encode_transit_binary(record: &TransitRecord, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&encode_record(record));
}
