//! Framed dev-log container reader
//!
//! A container is a FlatBuffers buffer holding one root batch (`session_id`,
//! `worker_id`, `logs`) whose entries each carry a timestamp, a level
//! ordinal, a source location and one payload selected by a kind tag. The
//! schema capability is the [`EntrySource`] trait: anything that can expose
//! the batch header, the entry headers and "decode payload of kind K at
//! offset O" can be scanned.
//!
//! [`FramedContainer`] reads through the `flatbuffers` runtime. The root
//! batch is verified when the container is opened; each entry table and its
//! payload are verified only when that entry is read, so a corrupt entry
//! becomes a malformed unit and never aborts the scan.

use super::{open_source, LogReader};
use crate::types::{
    CheckpointPayload, ContentKind, DebugPayload, Decoded, DecoderError, EdgeTransitionPayload, ErrorPayload,
    FramedLogEntry, FramedPayload, LockEventPayload, MalformedUnit, PerfPayload, Result,
};
use flatbuffers::{
    Follow, ForwardsUOffset, InvalidFlatbuffer, Table, VOffsetT, Verifiable, Vector, Verifier, VerifierOptions,
};
use std::io::Read;
use std::path::Path;

/// Vtable byte offsets per table type
mod slot {
    use flatbuffers::VOffsetT;

    const fn field(index: VOffsetT) -> VOffsetT {
        4 + 2 * index
    }

    pub mod batch {
        use super::*;
        pub const SESSION_ID: VOffsetT = field(0);
        pub const WORKER_ID: VOffsetT = field(1);
        pub const LOGS: VOffsetT = field(2);
    }

    pub mod entry {
        use super::*;
        pub const TIMESTAMP: VOffsetT = field(0);
        pub const LEVEL: VOffsetT = field(1);
        pub const LOCATION: VOffsetT = field(2);
        pub const CONTENT_TYPE: VOffsetT = field(3);
        pub const CONTENT: VOffsetT = field(4);
    }

    pub mod debug {
        use super::*;
        pub const VEH_ID: VOffsetT = field(0);
        pub const TAG: VOffsetT = field(1);
        pub const MESSAGE: VOffsetT = field(2);
    }

    pub mod checkpoint {
        use super::*;
        pub const VEH_ID: VOffsetT = field(0);
        pub const CP_INDEX: VOffsetT = field(1);
        pub const EDGE_ID: VOffsetT = field(2);
        pub const RATIO: VOffsetT = field(3);
        pub const FLAGS: VOffsetT = field(4);
        pub const ACTION: VOffsetT = field(5);
        pub const DETAILS: VOffsetT = field(6);
    }

    pub mod transition {
        use super::*;
        pub const VEH_ID: VOffsetT = field(0);
        pub const FROM_EDGE: VOffsetT = field(1);
        pub const TO_EDGE: VOffsetT = field(2);
        pub const NEXT_EDGES: VOffsetT = field(3);
        pub const PATH_BUF_LEN: VOffsetT = field(4);
    }

    pub mod lock {
        use super::*;
        pub const VEH_ID: VOffsetT = field(0);
        pub const LOCK_ID: VOffsetT = field(1);
        pub const EVENT_TYPE: VOffsetT = field(2);
        pub const EDGE_ID: VOffsetT = field(3);
        pub const WAIT_TIME_MS: VOffsetT = field(4);
    }

    pub mod error {
        use super::*;
        pub const VEH_ID: VOffsetT = field(0);
        pub const ERROR_CODE: VOffsetT = field(1);
        pub const MESSAGE: VOffsetT = field(2);
        pub const STACK_TRACE: VOffsetT = field(3);
    }

    pub mod perf {
        use super::*;
        pub const FPS: VOffsetT = field(0);
        pub const MEMORY_MB: VOffsetT = field(1);
        pub const ACTIVE_VEHICLES: VOffsetT = field(2);
        pub const LOCK_QUEUE_SIZE: VOffsetT = field(3);
    }
}

/// How the root offset is laid out at the start of the buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Framing {
    /// Root offset at byte 0
    #[default]
    Plain,
    /// A `u32` length precedes the root offset
    SizePrefixed,
}

/// Scalar header of one entry plus the location of its payload
#[derive(Debug, Clone, PartialEq)]
pub struct EntryHeader {
    pub index: usize,
    pub timestamp: f64,
    pub level: u8,
    pub location: String,
    pub kind: ContentKind,
    /// Absolute offset of the payload table, if present
    pub payload_offset: Option<usize>,
}

/// Schema capability consumed by the scan
pub trait EntrySource {
    fn session_id(&self) -> Option<&str>;

    fn worker_id(&self) -> u32;

    fn entry_count(&self) -> usize;

    fn entry_header(&self, index: usize) -> Result<EntryHeader>;

    /// Decode the payload of kind `header.kind` at `header.payload_offset`
    fn decode_payload(&self, header: &EntryHeader) -> Result<FramedPayload>;

    /// Header and payload together
    fn entry(&self, index: usize) -> Result<FramedLogEntry> {
        let header = self.entry_header(index)?;
        let payload = self.decode_payload(&header)?;
        Ok(FramedLogEntry {
            index: header.index,
            timestamp: header.timestamp,
            level: header.level,
            location: header.location,
            payload,
        })
    }
}

fn corrupt(msg: impl Into<String>) -> DecoderError {
    DecoderError::InvalidContainer(msg.into())
}

/// Root batch table
struct Batch<'a> {
    tab: Table<'a>,
}

impl<'a> Follow<'a> for Batch<'a> {
    type Inner = Batch<'a>;

    unsafe fn follow(buf: &'a [u8], loc: usize) -> Self::Inner {
        Self {
            tab: Table::new(buf, loc),
        }
    }
}

impl Verifiable for Batch<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> std::result::Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<ForwardsUOffset<&str>>("session_id", slot::batch::SESSION_ID, false)?
            .visit_field::<u32>("worker_id", slot::batch::WORKER_ID, false)?
            // Entry tables are checked one at a time as they are read
            .visit_field::<ForwardsUOffset<Vector<'_, u32>>>("logs", slot::batch::LOGS, false)?
            .finish();
        Ok(())
    }
}

// Accessors are only reached through a verified root.
impl<'a> Batch<'a> {
    fn session_id(&self) -> Option<&'a str> {
        unsafe { self.tab.get::<ForwardsUOffset<&str>>(slot::batch::SESSION_ID, None) }
    }

    fn worker_id(&self) -> u32 {
        unsafe { self.tab.get::<u32>(slot::batch::WORKER_ID, Some(0)) }.unwrap_or_default()
    }

    fn logs(&self) -> Option<Vector<'a, ForwardsUOffset<EntryTable<'a>>>> {
        unsafe {
            self.tab
                .get::<ForwardsUOffset<Vector<'a, ForwardsUOffset<EntryTable<'a>>>>>(slot::batch::LOGS, None)
        }
    }
}

/// One log entry table
struct EntryTable<'a> {
    tab: Table<'a>,
    loc: usize,
}

impl<'a> Follow<'a> for EntryTable<'a> {
    type Inner = EntryTable<'a>;

    unsafe fn follow(buf: &'a [u8], loc: usize) -> Self::Inner {
        Self {
            tab: Table::new(buf, loc),
            loc,
        }
    }
}

impl Verifiable for EntryTable<'_> {
    fn run_verifier(v: &mut Verifier, pos: usize) -> std::result::Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?
            .visit_field::<f64>("timestamp", slot::entry::TIMESTAMP, false)?
            .visit_field::<u8>("level", slot::entry::LEVEL, false)?
            .visit_field::<ForwardsUOffset<&str>>("location", slot::entry::LOCATION, false)?
            .visit_union::<u8, _>(
                "content_type",
                slot::entry::CONTENT_TYPE,
                "content",
                slot::entry::CONTENT,
                false,
                |_, v, pos| v.verify_union_variant::<ForwardsUOffset<AnyTable>>("content", pos),
            )?
            .finish();
        Ok(())
    }
}

// Accessors must only run after `EntryTable::run_verifier` passed for `loc`.
impl<'a> EntryTable<'a> {
    fn timestamp(&self) -> f64 {
        unsafe { self.tab.get::<f64>(slot::entry::TIMESTAMP, Some(0.0)) }.unwrap_or_default()
    }

    fn level(&self) -> u8 {
        unsafe { self.tab.get::<u8>(slot::entry::LEVEL, Some(0)) }.unwrap_or_default()
    }

    fn location(&self) -> Option<&'a str> {
        unsafe { self.tab.get::<ForwardsUOffset<&str>>(slot::entry::LOCATION, None) }
    }

    fn content_type(&self) -> u8 {
        unsafe { self.tab.get::<u8>(slot::entry::CONTENT_TYPE, Some(0)) }.unwrap_or_default()
    }

    fn content_offset(&self) -> Option<usize> {
        unsafe { self.tab.get::<ForwardsUOffset<PayloadTable<'a>>>(slot::entry::CONTENT, None) }.map(|p| p.loc)
    }
}

/// Checks that an offset lands on a well-formed table of any shape
struct AnyTable;

impl Verifiable for AnyTable {
    fn run_verifier(v: &mut Verifier, pos: usize) -> std::result::Result<(), InvalidFlatbuffer> {
        v.visit_table(pos)?.finish();
        Ok(())
    }
}

/// Field checks for the payload table of `kind`
fn verify_payload(kind: ContentKind, v: &mut Verifier, pos: usize) -> std::result::Result<(), InvalidFlatbuffer> {
    let table = v.visit_table(pos)?;
    let table = match kind {
        ContentKind::Debug => table
            .visit_field::<u32>("veh_id", slot::debug::VEH_ID, false)?
            .visit_field::<ForwardsUOffset<&str>>("tag", slot::debug::TAG, false)?
            .visit_field::<ForwardsUOffset<&str>>("message", slot::debug::MESSAGE, false)?,
        ContentKind::Checkpoint => table
            .visit_field::<u32>("veh_id", slot::checkpoint::VEH_ID, false)?
            .visit_field::<u32>("cp_index", slot::checkpoint::CP_INDEX, false)?
            .visit_field::<u32>("edge_id", slot::checkpoint::EDGE_ID, false)?
            .visit_field::<f32>("ratio", slot::checkpoint::RATIO, false)?
            .visit_field::<u32>("flags", slot::checkpoint::FLAGS, false)?
            .visit_field::<ForwardsUOffset<&str>>("action", slot::checkpoint::ACTION, false)?
            .visit_field::<ForwardsUOffset<&str>>("details", slot::checkpoint::DETAILS, false)?,
        ContentKind::EdgeTransition => table
            .visit_field::<u32>("veh_id", slot::transition::VEH_ID, false)?
            .visit_field::<u32>("from_edge", slot::transition::FROM_EDGE, false)?
            .visit_field::<u32>("to_edge", slot::transition::TO_EDGE, false)?
            .visit_field::<ForwardsUOffset<Vector<'_, u32>>>("next_edges", slot::transition::NEXT_EDGES, false)?
            .visit_field::<u32>("path_buf_len", slot::transition::PATH_BUF_LEN, false)?,
        ContentKind::LockEvent => table
            .visit_field::<u32>("veh_id", slot::lock::VEH_ID, false)?
            .visit_field::<u32>("lock_id", slot::lock::LOCK_ID, false)?
            .visit_field::<ForwardsUOffset<&str>>("event_type", slot::lock::EVENT_TYPE, false)?
            .visit_field::<u32>("edge_id", slot::lock::EDGE_ID, false)?
            .visit_field::<u32>("wait_time_ms", slot::lock::WAIT_TIME_MS, false)?,
        ContentKind::Error => table
            .visit_field::<u32>("veh_id", slot::error::VEH_ID, false)?
            .visit_field::<ForwardsUOffset<&str>>("error_code", slot::error::ERROR_CODE, false)?
            .visit_field::<ForwardsUOffset<&str>>("message", slot::error::MESSAGE, false)?
            .visit_field::<ForwardsUOffset<&str>>("stack_trace", slot::error::STACK_TRACE, false)?,
        ContentKind::Perf => table
            .visit_field::<f32>("fps", slot::perf::FPS, false)?
            .visit_field::<f32>("memory_mb", slot::perf::MEMORY_MB, false)?
            .visit_field::<u32>("active_vehicles", slot::perf::ACTIVE_VEHICLES, false)?
            .visit_field::<u32>("lock_queue_size", slot::perf::LOCK_QUEUE_SIZE, false)?,
        ContentKind::Unknown(_) => table,
    };
    table.finish();
    Ok(())
}

/// Payload table of any kind, read field by field
struct PayloadTable<'a> {
    tab: Table<'a>,
    loc: usize,
}

impl<'a> Follow<'a> for PayloadTable<'a> {
    type Inner = PayloadTable<'a>;

    unsafe fn follow(buf: &'a [u8], loc: usize) -> Self::Inner {
        Self {
            tab: Table::new(buf, loc),
            loc,
        }
    }
}

// Accessors must only run after `verify_payload` passed for this table's kind.
impl PayloadTable<'_> {
    fn u32(&self, field: VOffsetT) -> u32 {
        unsafe { self.tab.get::<u32>(field, Some(0)) }.unwrap_or_default()
    }

    fn f32(&self, field: VOffsetT) -> f32 {
        unsafe { self.tab.get::<f32>(field, Some(0.0)) }.unwrap_or_default()
    }

    fn string(&self, field: VOffsetT) -> String {
        unsafe { self.tab.get::<ForwardsUOffset<&str>>(field, None) }
            .unwrap_or_default()
            .to_string()
    }

    fn u32s(&self, field: VOffsetT) -> Vec<u32> {
        unsafe { self.tab.get::<ForwardsUOffset<Vector<'_, u32>>>(field, None) }
            .map(|v| v.iter().collect())
            .unwrap_or_default()
    }
}

/// A fully loaded framed container with a verified root
pub struct FramedContainer {
    buf: Vec<u8>,
    framing: Framing,
    opts: VerifierOptions,
    session_id: Option<String>,
    worker_id: u32,
    entry_count: usize,
}

impl FramedContainer {
    /// Read a whole container from disk, root offset at byte 0
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_framing(path, Framing::Plain)
    }

    pub fn open_with_framing(path: &Path, framing: Framing) -> Result<Self> {
        log::info!("Opening framed container: {:?} ({:?})", path, framing);
        let mut file = open_source(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Self::from_bytes(buf, framing)
    }

    pub fn from_bytes(buf: Vec<u8>, framing: Framing) -> Result<Self> {
        let opts = VerifierOptions::default();
        let batch = match framing {
            Framing::Plain => flatbuffers::root_with_opts::<Batch>(&opts, &buf),
            Framing::SizePrefixed => flatbuffers::size_prefixed_root_with_opts::<Batch>(&opts, &buf),
        }
        .map_err(|e| corrupt(format!("root batch: {}", e)))?;

        let session_id = batch.session_id().map(str::to_string);
        let worker_id = batch.worker_id();
        let entry_count = batch.logs().map_or(0, |logs| logs.len());

        log::debug!(
            "Container session={:?} worker={} entries={}",
            session_id,
            worker_id,
            entry_count
        );

        Ok(Self {
            buf,
            framing,
            opts,
            session_id,
            worker_id,
            entry_count,
        })
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    fn batch(&self) -> Batch<'_> {
        // SAFETY: `from_bytes` verified the root with this framing and `buf`
        // is never mutated afterwards.
        unsafe {
            match self.framing {
                Framing::Plain => flatbuffers::root_unchecked::<Batch>(&self.buf),
                Framing::SizePrefixed => flatbuffers::size_prefixed_root_unchecked::<Batch>(&self.buf),
            }
        }
    }

    fn decode_debug(table: PayloadTable<'_>) -> FramedPayload {
        FramedPayload::Debug(DebugPayload {
            veh_id: table.u32(slot::debug::VEH_ID),
            tag: table.string(slot::debug::TAG),
            message: table.string(slot::debug::MESSAGE),
        })
    }

    fn decode_checkpoint(table: PayloadTable<'_>) -> FramedPayload {
        FramedPayload::Checkpoint(CheckpointPayload {
            veh_id: table.u32(slot::checkpoint::VEH_ID),
            cp_index: table.u32(slot::checkpoint::CP_INDEX),
            edge_id: table.u32(slot::checkpoint::EDGE_ID),
            ratio: table.f32(slot::checkpoint::RATIO),
            flags: table.u32(slot::checkpoint::FLAGS),
            action: table.string(slot::checkpoint::ACTION),
            details: table.string(slot::checkpoint::DETAILS),
        })
    }

    fn decode_transition(table: PayloadTable<'_>) -> FramedPayload {
        FramedPayload::EdgeTransition(EdgeTransitionPayload {
            veh_id: table.u32(slot::transition::VEH_ID),
            from_edge: table.u32(slot::transition::FROM_EDGE),
            to_edge: table.u32(slot::transition::TO_EDGE),
            next_edges: table.u32s(slot::transition::NEXT_EDGES),
            path_buf_len: table.u32(slot::transition::PATH_BUF_LEN),
        })
    }

    fn decode_lock(table: PayloadTable<'_>) -> FramedPayload {
        FramedPayload::LockEvent(LockEventPayload {
            veh_id: table.u32(slot::lock::VEH_ID),
            lock_id: table.u32(slot::lock::LOCK_ID),
            event_type: table.string(slot::lock::EVENT_TYPE),
            edge_id: table.u32(slot::lock::EDGE_ID),
            wait_time_ms: table.u32(slot::lock::WAIT_TIME_MS),
        })
    }

    fn decode_error(table: PayloadTable<'_>) -> FramedPayload {
        FramedPayload::Error(ErrorPayload {
            veh_id: table.u32(slot::error::VEH_ID),
            error_code: table.string(slot::error::ERROR_CODE),
            message: table.string(slot::error::MESSAGE),
            stack_trace: table.string(slot::error::STACK_TRACE),
        })
    }

    fn decode_perf(table: PayloadTable<'_>) -> FramedPayload {
        FramedPayload::Perf(PerfPayload {
            fps: table.f32(slot::perf::FPS),
            memory_mb: table.f32(slot::perf::MEMORY_MB),
            active_vehicles: table.u32(slot::perf::ACTIVE_VEHICLES),
            lock_queue_size: table.u32(slot::perf::LOCK_QUEUE_SIZE),
        })
    }
}

impl EntrySource for FramedContainer {
    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    fn worker_id(&self) -> u32 {
        self.worker_id
    }

    fn entry_count(&self) -> usize {
        self.entry_count
    }

    fn entry_header(&self, index: usize) -> Result<EntryHeader> {
        let entry = self
            .batch()
            .logs()
            .filter(|logs| index < logs.len())
            .map(|logs| logs.get(index))
            .ok_or_else(|| corrupt(format!("entry {} out of range ({} entries)", index, self.entry_count)))?;

        let mut verifier = Verifier::new(&self.opts, &self.buf);
        EntryTable::run_verifier(&mut verifier, entry.loc).map_err(|e| corrupt(format!("entry {}: {}", index, e)))?;

        Ok(EntryHeader {
            index,
            timestamp: entry.timestamp(),
            level: entry.level(),
            location: entry.location().unwrap_or("unknown").to_string(),
            kind: ContentKind::from_tag(entry.content_type()),
            payload_offset: entry.content_offset(),
        })
    }

    fn decode_payload(&self, header: &EntryHeader) -> Result<FramedPayload> {
        if let ContentKind::Unknown(kind) = header.kind {
            return Ok(FramedPayload::Unknown { kind });
        }
        let offset = header
            .payload_offset
            .ok_or_else(|| corrupt(format!("entry {} ({}) has no payload", header.index, header.kind)))?;

        let mut verifier = Verifier::new(&self.opts, &self.buf);
        verify_payload(header.kind, &mut verifier, offset)
            .map_err(|e| corrupt(format!("entry {} payload: {}", header.index, e)))?;
        // SAFETY: the table at `offset` was verified for `header.kind` above.
        let table = unsafe { PayloadTable::follow(&self.buf, offset) };

        Ok(match header.kind {
            ContentKind::Debug => Self::decode_debug(table),
            ContentKind::Checkpoint => Self::decode_checkpoint(table),
            ContentKind::EdgeTransition => Self::decode_transition(table),
            ContentKind::LockEvent => Self::decode_lock(table),
            ContentKind::Error => Self::decode_error(table),
            ContentKind::Perf => Self::decode_perf(table),
            ContentKind::Unknown(kind) => FramedPayload::Unknown { kind },
        })
    }
}

/// Sequential reader over the entries of an [`EntrySource`]
pub struct FramedReader<S = FramedContainer> {
    source: S,
    next_index: usize,
}

impl<S: EntrySource> FramedReader<S> {
    pub fn new(source: S) -> Self {
        Self { source, next_index: 0 }
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S: EntrySource> Iterator for FramedReader<S> {
    type Item = Result<Decoded<FramedLogEntry>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.source.entry_count() {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;
        let item = match self.source.entry(index) {
            Ok(entry) => Decoded::Record(entry),
            Err(e) => {
                log::debug!("Entry {}: {}", index, e);
                Decoded::Malformed(MalformedUnit {
                    position: index as u64,
                    raw: e.to_string(),
                })
            }
        };
        Some(Ok(item))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.source.entry_count().saturating_sub(self.next_index);
        (remaining, Some(remaining))
    }
}

impl LogReader for FramedReader<FramedContainer> {
    type Record = FramedLogEntry;

    fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(FramedContainer::open(path)?))
    }
}

/// Container fixtures built with the `flatbuffers` builder
#[cfg(test)]
pub(crate) mod fixtures {
    use super::{slot, Framing};
    use crate::types::FramedPayload;
    use flatbuffers::{FlatBufferBuilder, UnionWIPOffset, WIPOffset};

    pub struct FixtureEntry {
        pub timestamp: f64,
        pub level: u8,
        pub location: &'static str,
        pub payload: FramedPayload,
    }

    /// Kind tag and payload table; unknown kinds get an empty table
    fn payload(fbb: &mut FlatBufferBuilder<'_>, payload: &FramedPayload) -> (u8, WIPOffset<UnionWIPOffset>) {
        match payload {
            FramedPayload::Debug(p) => {
                let tag = fbb.create_string(&p.tag);
                let message = fbb.create_string(&p.message);
                let t = fbb.start_table();
                fbb.push_slot_always(slot::debug::VEH_ID, p.veh_id);
                fbb.push_slot_always(slot::debug::TAG, tag);
                fbb.push_slot_always(slot::debug::MESSAGE, message);
                (1, fbb.end_table(t).as_union_value())
            }
            FramedPayload::Checkpoint(p) => {
                let action = fbb.create_string(&p.action);
                let details = fbb.create_string(&p.details);
                let t = fbb.start_table();
                fbb.push_slot_always(slot::checkpoint::VEH_ID, p.veh_id);
                fbb.push_slot_always(slot::checkpoint::CP_INDEX, p.cp_index);
                fbb.push_slot_always(slot::checkpoint::EDGE_ID, p.edge_id);
                fbb.push_slot_always(slot::checkpoint::RATIO, p.ratio);
                fbb.push_slot_always(slot::checkpoint::FLAGS, p.flags);
                fbb.push_slot_always(slot::checkpoint::ACTION, action);
                fbb.push_slot_always(slot::checkpoint::DETAILS, details);
                (2, fbb.end_table(t).as_union_value())
            }
            FramedPayload::EdgeTransition(p) => {
                let next_edges = fbb.create_vector(&p.next_edges);
                let t = fbb.start_table();
                fbb.push_slot_always(slot::transition::VEH_ID, p.veh_id);
                fbb.push_slot_always(slot::transition::FROM_EDGE, p.from_edge);
                fbb.push_slot_always(slot::transition::TO_EDGE, p.to_edge);
                fbb.push_slot_always(slot::transition::NEXT_EDGES, next_edges);
                fbb.push_slot_always(slot::transition::PATH_BUF_LEN, p.path_buf_len);
                (3, fbb.end_table(t).as_union_value())
            }
            FramedPayload::LockEvent(p) => {
                let event_type = fbb.create_string(&p.event_type);
                let t = fbb.start_table();
                fbb.push_slot_always(slot::lock::VEH_ID, p.veh_id);
                fbb.push_slot_always(slot::lock::LOCK_ID, p.lock_id);
                fbb.push_slot_always(slot::lock::EVENT_TYPE, event_type);
                fbb.push_slot_always(slot::lock::EDGE_ID, p.edge_id);
                fbb.push_slot_always(slot::lock::WAIT_TIME_MS, p.wait_time_ms);
                (4, fbb.end_table(t).as_union_value())
            }
            FramedPayload::Error(p) => {
                let error_code = fbb.create_string(&p.error_code);
                let message = fbb.create_string(&p.message);
                let stack_trace = fbb.create_string(&p.stack_trace);
                let t = fbb.start_table();
                fbb.push_slot_always(slot::error::VEH_ID, p.veh_id);
                fbb.push_slot_always(slot::error::ERROR_CODE, error_code);
                fbb.push_slot_always(slot::error::MESSAGE, message);
                fbb.push_slot_always(slot::error::STACK_TRACE, stack_trace);
                (5, fbb.end_table(t).as_union_value())
            }
            FramedPayload::Perf(p) => {
                let t = fbb.start_table();
                fbb.push_slot_always(slot::perf::FPS, p.fps);
                fbb.push_slot_always(slot::perf::MEMORY_MB, p.memory_mb);
                fbb.push_slot_always(slot::perf::ACTIVE_VEHICLES, p.active_vehicles);
                fbb.push_slot_always(slot::perf::LOCK_QUEUE_SIZE, p.lock_queue_size);
                (6, fbb.end_table(t).as_union_value())
            }
            FramedPayload::Unknown { kind } => {
                let t = fbb.start_table();
                (*kind, fbb.end_table(t).as_union_value())
            }
        }
    }

    pub fn container(session: &str, worker: u32, entries: &[FixtureEntry], framing: Framing) -> Vec<u8> {
        let mut fbb = FlatBufferBuilder::new();
        let mut logs = Vec::with_capacity(entries.len());
        for e in entries {
            let (kind, content) = payload(&mut fbb, &e.payload);
            let location = fbb.create_string(e.location);
            let t = fbb.start_table();
            fbb.push_slot_always(slot::entry::TIMESTAMP, e.timestamp);
            fbb.push_slot_always(slot::entry::LEVEL, e.level);
            fbb.push_slot_always(slot::entry::LOCATION, location);
            fbb.push_slot_always(slot::entry::CONTENT_TYPE, kind);
            fbb.push_slot_always(slot::entry::CONTENT, content);
            logs.push(fbb.end_table(t));
        }
        let logs = fbb.create_vector(&logs);
        let session = fbb.create_string(session);

        let t = fbb.start_table();
        fbb.push_slot_always(slot::batch::SESSION_ID, session);
        fbb.push_slot_always(slot::batch::WORKER_ID, worker);
        fbb.push_slot_always(slot::batch::LOGS, logs);
        let root = fbb.end_table(t);
        match framing {
            Framing::Plain => fbb.finish(root, None),
            Framing::SizePrefixed => fbb.finish_size_prefixed(root, None),
        }
        fbb.finished_data().to_vec()
    }
}
