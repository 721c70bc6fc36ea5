//! Core types for the VPS log decoder library
//!
//! This module defines the records every decoder emits, the stream item that
//! wraps them, and the library error type. Records are immutable once
//! decoded; derived values (transit time, speed, names) are computed on demand
//! by [`crate::derive`].

use crate::derive;
use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Errors that can occur while reading or writing logs
///
/// Only source-access and sink failures are errors. Malformed lines, partial
/// records and undecodable entries are reported through [`Decoded::Malformed`]
/// or file diagnostics instead.
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("Log file not found: {0:?}")]
    NotFound(PathBuf),

    #[error("Failed to read log file {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid framed container: {0}")]
    InvalidContainer(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Sink error for {key}: {source}")]
    Sink {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// One unit pulled from a decoder: either a typed record or a unit that did
/// not decode.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    Record(T),
    Malformed(MalformedUnit),
}

/// A unit that failed to decode, kept for counting and verbatim routing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedUnit {
    /// 1-based line number for text logs, entry index for framed containers
    pub position: u64,
    /// Raw content (the line without its newline, or a short description)
    pub raw: String,
}

/// Edge geometry class carried by transit records
///
/// Unknown codes pass through unchanged so a record always re-encodes to the
/// bytes it was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeType {
    Linear,
    Curve90,
    Curve180,
    CurveCsc,
    SCurve,
    LeftCurve,
    RightCurve,
    Unknown(u8),
}

impl EdgeType {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => EdgeType::Linear,
            1 => EdgeType::Curve90,
            2 => EdgeType::Curve180,
            3 => EdgeType::CurveCsc,
            4 => EdgeType::SCurve,
            5 => EdgeType::LeftCurve,
            6 => EdgeType::RightCurve,
            other => EdgeType::Unknown(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            EdgeType::Linear => 0,
            EdgeType::Curve90 => 1,
            EdgeType::Curve180 => 2,
            EdgeType::CurveCsc => 3,
            EdgeType::SCurve => 4,
            EdgeType::LeftCurve => 5,
            EdgeType::RightCurve => 6,
            EdgeType::Unknown(code) => *code,
        }
    }

    /// Display name, `UNKNOWN(code)` for codes outside the table
    pub fn name(&self) -> Cow<'static, str> {
        derive::edge_type_name(self.code())
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.name())
    }
}

impl Serialize for EdgeType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// One vehicle crossing one edge, decoded from a 28-byte record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitRecord {
    /// Record time (ms)
    pub timestamp: u32,
    pub worker_id: u8,
    pub fab_id: u8,
    pub edge_id: u16,
    pub veh_id: u32,
    /// Edge entry time (ms)
    pub enter_time: u32,
    /// Edge exit time (ms)
    pub exit_time: u32,
    /// Edge length (m)
    pub edge_length: f32,
    pub edge_type: EdgeType,
    /// Trailing pad bytes, kept so re-encoding is lossless
    #[serde(skip)]
    pub padding: [u8; 3],
}

impl TransitRecord {
    /// Transit duration in ms; non-positive for malformed input
    pub fn transit_time(&self) -> i64 {
        derive::transit_time(self.enter_time, self.exit_time)
    }

    /// Average speed in m/s, `None` when the transit time is not positive
    pub fn speed(&self) -> Option<f64> {
        derive::speed(self.edge_length, self.transit_time())
    }

    pub fn edge_type_name(&self) -> Cow<'static, str> {
        self.edge_type.name()
    }
}

impl fmt::Display for TransitRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let speed = self
            .speed()
            .map(|s| format!("{:>5.2}m/s", s))
            .unwrap_or_else(|| "    -    ".to_string());
        write!(
            f,
            "[{:>8}ms] veh={:>5} edge={:>5} ({:>10}) len={:>6.2}m transit={:>5}ms speed={}",
            self.timestamp,
            self.veh_id,
            self.edge_id,
            self.edge_type,
            self.edge_length,
            self.transit_time(),
            speed
        )
    }
}

/// Severity of a text log line
///
/// Unrecognized level strings are preserved verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Other(String),
}

impl LogLevel {
    /// The four standard levels in display order
    pub const STANDARD: [LogLevel; 4] = [LogLevel::Debug, LogLevel::Info, LogLevel::Warn, LogLevel::Error];

    pub fn parse(text: &str) -> Self {
        match text.trim() {
            "DEBUG" => LogLevel::Debug,
            "INFO" => LogLevel::Info,
            "WARN" => LogLevel::Warn,
            "ERROR" => LogLevel::Error,
            other => LogLevel::Other(other.to_string()),
        }
    }

    /// Level from a framed-container ordinal (0-3), `LEVEL{n}` otherwise
    pub fn from_ordinal(ordinal: u8) -> Self {
        match ordinal {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            3 => LogLevel::Error,
            n => LogLevel::Other(format!("LEVEL{}", n)),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Other(s) => s,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A parsed text log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextLogEntry {
    /// Timestamp as written (`HH:MM:SS.mmm`)
    pub timestamp: String,
    /// Timestamp in ms since simulation start; hours never wrap
    pub time_ms: u64,
    pub level: LogLevel,
    /// `global` or `veh:<id>`
    pub scope: String,
    /// Vehicle id extracted from the scope
    pub veh_id: Option<u32>,
    /// `file:line`
    pub source: String,
    pub tag: String,
    pub message: String,
    /// 1-based line number in the source file
    pub line_number: u64,
}

impl TextLogEntry {
    pub fn is_global(&self) -> bool {
        self.scope == "global"
    }

    /// Source file name without the line suffix
    pub fn file_name(&self) -> &str {
        derive::file_name_from_source(&self.source)
    }
}

impl fmt::Display for TextLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [{:5}] [{}] [{}] [{}] {}",
            self.timestamp, self.level, self.scope, self.source, self.tag, self.message
        )
    }
}

/// Payload kind tag of a framed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Debug,
    Checkpoint,
    EdgeTransition,
    LockEvent,
    Error,
    Perf,
    Unknown(u8),
}

impl ContentKind {
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            1 => ContentKind::Debug,
            2 => ContentKind::Checkpoint,
            3 => ContentKind::EdgeTransition,
            4 => ContentKind::LockEvent,
            5 => ContentKind::Error,
            6 => ContentKind::Perf,
            other => ContentKind::Unknown(other),
        }
    }

    pub fn tag(&self) -> u8 {
        match self {
            ContentKind::Debug => 1,
            ContentKind::Checkpoint => 2,
            ContentKind::EdgeTransition => 3,
            ContentKind::LockEvent => 4,
            ContentKind::Error => 5,
            ContentKind::Perf => 6,
            ContentKind::Unknown(tag) => *tag,
        }
    }

    pub fn name(&self) -> Cow<'static, str> {
        match self {
            ContentKind::Debug => Cow::Borrowed("DebugLog"),
            ContentKind::Checkpoint => Cow::Borrowed("CheckpointLog"),
            ContentKind::EdgeTransition => Cow::Borrowed("EdgeTransitionLog"),
            ContentKind::LockEvent => Cow::Borrowed("LockEventLog"),
            ContentKind::Error => Cow::Borrowed("ErrorLog"),
            ContentKind::Perf => Cow::Borrowed("PerfLog"),
            ContentKind::Unknown(tag) => Cow::Owned(format!("Unknown({})", tag)),
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugPayload {
    pub veh_id: u32,
    pub tag: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckpointPayload {
    pub veh_id: u32,
    pub cp_index: u32,
    pub edge_id: u32,
    pub ratio: f32,
    /// Bitmask, see [`derive::decode_checkpoint_flags`]
    pub flags: u32,
    pub action: String,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeTransitionPayload {
    pub veh_id: u32,
    pub from_edge: u32,
    pub to_edge: u32,
    pub next_edges: Vec<u32>,
    pub path_buf_len: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockEventPayload {
    pub veh_id: u32,
    pub lock_id: u32,
    pub event_type: String,
    pub edge_id: u32,
    pub wait_time_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub veh_id: u32,
    pub error_code: String,
    pub message: String,
    pub stack_trace: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerfPayload {
    pub fps: f32,
    pub memory_mb: f32,
    pub active_vehicles: u32,
    pub lock_queue_size: u32,
}

/// Kind-specific body of a framed entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum FramedPayload {
    #[serde(rename = "DebugLog")]
    Debug(DebugPayload),
    #[serde(rename = "CheckpointLog")]
    Checkpoint(CheckpointPayload),
    #[serde(rename = "EdgeTransitionLog")]
    EdgeTransition(EdgeTransitionPayload),
    #[serde(rename = "LockEventLog")]
    LockEvent(LockEventPayload),
    #[serde(rename = "ErrorLog")]
    Error(ErrorPayload),
    #[serde(rename = "PerfLog")]
    Perf(PerfPayload),
    Unknown { kind: u8 },
}

impl FramedPayload {
    pub fn kind(&self) -> ContentKind {
        match self {
            FramedPayload::Debug(_) => ContentKind::Debug,
            FramedPayload::Checkpoint(_) => ContentKind::Checkpoint,
            FramedPayload::EdgeTransition(_) => ContentKind::EdgeTransition,
            FramedPayload::LockEvent(_) => ContentKind::LockEvent,
            FramedPayload::Error(_) => ContentKind::Error,
            FramedPayload::Perf(_) => ContentKind::Perf,
            FramedPayload::Unknown { kind } => ContentKind::Unknown(*kind),
        }
    }

    /// Raw vehicle id carried by the payload, if the kind has one
    pub fn veh_id(&self) -> Option<u32> {
        match self {
            FramedPayload::Debug(p) => Some(p.veh_id),
            FramedPayload::Checkpoint(p) => Some(p.veh_id),
            FramedPayload::EdgeTransition(p) => Some(p.veh_id),
            FramedPayload::LockEvent(p) => Some(p.veh_id),
            FramedPayload::Error(p) => Some(p.veh_id),
            FramedPayload::Perf(_) | FramedPayload::Unknown { .. } => None,
        }
    }
}

/// One entry of a framed container with its payload decoded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FramedLogEntry {
    /// Position in the container
    pub index: usize,
    /// Monotonic timestamp (ms)
    pub timestamp: f64,
    /// Level ordinal (0-3 = DEBUG/INFO/WARN/ERROR)
    pub level: u8,
    pub location: String,
    pub payload: FramedPayload,
}

impl FramedLogEntry {
    pub fn level(&self) -> LogLevel {
        LogLevel::from_ordinal(self.level)
    }

    pub fn kind(&self) -> ContentKind {
        self.payload.kind()
    }

    /// Vehicle id; id 0 and vehicle-less payloads belong to the global scope
    pub fn vehicle_id(&self) -> Option<u32> {
        self.payload.veh_id().filter(|id| *id > 0)
    }

    pub fn time_ms(&self) -> u64 {
        derive::millis_from_f64(self.timestamp)
    }

    pub fn time_str(&self) -> String {
        derive::format_time_ms(self.time_ms())
    }

    /// Text used by message search: tag and message, error text, or action
    pub fn message(&self) -> Option<&str> {
        match &self.payload {
            FramedPayload::Debug(p) => Some(&p.message),
            FramedPayload::Error(p) => Some(&p.message),
            FramedPayload::Checkpoint(p) => Some(&p.details),
            FramedPayload::LockEvent(p) => Some(&p.event_type),
            _ => None,
        }
    }

    /// Kind-specific detail text following the bracketed header
    pub fn details(&self) -> String {
        match &self.payload {
            FramedPayload::Debug(p) => format!("[{}] {}", p.tag, p.message),
            FramedPayload::Checkpoint(p) => {
                let mut out = format!(
                    "CP#{} {}@{:.3} flags={}({}) {}",
                    p.cp_index,
                    derive::format_edge_name(p.edge_id),
                    p.ratio,
                    p.flags,
                    derive::decode_checkpoint_flags(p.flags),
                    p.action
                );
                if !p.details.is_empty() {
                    out.push_str(" | ");
                    out.push_str(&p.details);
                }
                out
            }
            FramedPayload::EdgeTransition(p) => {
                let next: Vec<String> = p
                    .next_edges
                    .iter()
                    .take(5)
                    .map(|e| derive::format_edge_name(*e))
                    .collect();
                format!(
                    "{}→{} next=[{}] pathLen={}",
                    derive::format_edge_name(p.from_edge),
                    derive::format_edge_name(p.to_edge),
                    next.join(","),
                    p.path_buf_len
                )
            }
            FramedPayload::LockEvent(p) => format!(
                "Lock#{} {} {} wait={}ms",
                p.lock_id,
                p.event_type,
                derive::format_edge_name(p.edge_id),
                p.wait_time_ms
            ),
            FramedPayload::Error(p) => format!("[{}] {}", p.error_code, p.message),
            FramedPayload::Perf(p) => format!(
                "FPS={:.1} MEM={:.1}MB VEH={} LOCK={}",
                p.fps, p.memory_mb, p.active_vehicles, p.lock_queue_size
            ),
            FramedPayload::Unknown { .. } => String::new(),
        }
    }
}

impl fmt::Display for FramedLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = match self.vehicle_id() {
            Some(id) => format!("veh:{}", id),
            None => "global".to_string(),
        };
        write!(
            f,
            "[{}] [{:5}] [{:10}] [{}] [{}]",
            self.time_str(),
            self.level(),
            scope,
            self.location,
            self.kind()
        )?;
        let details = self.details();
        if !details.is_empty() {
            write!(f, " {}", details)?;
        }
        Ok(())
    }
}
