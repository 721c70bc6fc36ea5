//! Log file format readers (fixed binary records, text lines, framed containers)
//!
//! Each reader implements a pull-based iterator over [`Decoded`] units and
//! holds only the state of the current unit.

use crate::types::{Decoded, DecoderError, Result};
use std::fs::File;
use std::path::Path;

pub mod framed;
pub mod text;
pub mod transit;

// Re-export reader types
pub use framed::{EntryHeader, EntrySource, FramedContainer, FramedReader, Framing};
pub use text::{parse_line, parse_line_detailed, LineError, TextLogReader};
pub use transit::{decode_record, encode_record, ReadMode, TransitFileInfo, TransitReader, RECORD_SIZE};

/// Common trait for all log readers
///
/// Provides a unified way to open any supported encoding and pull its units
/// one at a time.
pub trait LogReader: Iterator<Item = Result<Decoded<Self::Record>>> + Sized {
    type Record;

    /// Open a log file and return a reader positioned at its first unit
    fn open(path: &Path) -> Result<Self>;
}

/// Open a source file, distinguishing a missing path from an unreadable one
pub(crate) fn open_source(path: &Path) -> Result<File> {
    if !path.exists() {
        return Err(DecoderError::NotFound(path.to_path_buf()));
    }
    File::open(path).map_err(|source| DecoderError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}
