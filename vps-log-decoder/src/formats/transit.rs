//! Edge-transit fixed-record reader
//!
//! Each record is a 28-byte little-endian struct with no file header:
//!
//! | Field       | Type  | Offset |
//! |-------------|-------|--------|
//! | timestamp   | u32   | 0      |
//! | worker_id   | u8    | 4      |
//! | fab_id      | u8    | 5      |
//! | edge_id     | u16   | 6      |
//! | veh_id      | u32   | 8      |
//! | enter_time  | u32   | 12     |
//! | exit_time   | u32   | 16     |
//! | edge_length | f32   | 20     |
//! | edge_type   | u8    | 24     |
//! | padding     | 3×u8  | 25     |
//!
//! Files above a size threshold are read through a memory map so resident
//! memory stays independent of file size. Both modes yield identical records.

use super::{open_source, LogReader};
use crate::types::{Decoded, EdgeType, Result, TransitRecord};
use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Size of one record on disk
pub const RECORD_SIZE: usize = 28;

/// Files larger than this are memory-mapped in [`ReadMode::Auto`]
pub const DEFAULT_MMAP_THRESHOLD: u64 = 100 * 1024 * 1024;

/// How record bytes are pulled from disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Map files above `threshold_bytes`, read smaller ones through a buffer
    Auto { threshold_bytes: u64 },
    Buffered,
    Mapped,
}

impl Default for ReadMode {
    fn default() -> Self {
        ReadMode::Auto {
            threshold_bytes: DEFAULT_MMAP_THRESHOLD,
        }
    }
}

impl ReadMode {
    fn use_mmap(&self, file_size: u64) -> bool {
        // Zero-length files cannot be mapped on every platform
        if file_size == 0 {
            return false;
        }
        match self {
            ReadMode::Auto { threshold_bytes } => file_size > *threshold_bytes,
            ReadMode::Buffered => false,
            ReadMode::Mapped => true,
        }
    }
}

/// Size diagnostics for a record file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitFileInfo {
    pub file_size: u64,
    /// Number of complete records
    pub record_count: u64,
    /// Bytes after the last complete record (dropped)
    pub trailing_bytes: u64,
    pub mapped: bool,
}

impl TransitFileInfo {
    pub fn from_size(file_size: u64, mapped: bool) -> Self {
        Self {
            file_size,
            record_count: file_size / RECORD_SIZE as u64,
            trailing_bytes: file_size % RECORD_SIZE as u64,
            mapped,
        }
    }

    /// True when the file length is an exact multiple of the record size
    pub fn is_aligned(&self) -> bool {
        self.trailing_bytes == 0
    }
}

/// Decode one record from its on-disk bytes
pub fn decode_record(bytes: &[u8; RECORD_SIZE]) -> TransitRecord {
    TransitRecord {
        timestamp: LittleEndian::read_u32(&bytes[0..4]),
        worker_id: bytes[4],
        fab_id: bytes[5],
        edge_id: LittleEndian::read_u16(&bytes[6..8]),
        veh_id: LittleEndian::read_u32(&bytes[8..12]),
        enter_time: LittleEndian::read_u32(&bytes[12..16]),
        exit_time: LittleEndian::read_u32(&bytes[16..20]),
        edge_length: LittleEndian::read_f32(&bytes[20..24]),
        edge_type: EdgeType::from_code(bytes[24]),
        padding: [bytes[25], bytes[26], bytes[27]],
    }
}

/// Encode a record back to its exact on-disk bytes
pub fn encode_record(record: &TransitRecord) -> [u8; RECORD_SIZE] {
    let mut bytes = [0u8; RECORD_SIZE];
    LittleEndian::write_u32(&mut bytes[0..4], record.timestamp);
    bytes[4] = record.worker_id;
    bytes[5] = record.fab_id;
    LittleEndian::write_u16(&mut bytes[6..8], record.edge_id);
    LittleEndian::write_u32(&mut bytes[8..12], record.veh_id);
    LittleEndian::write_u32(&mut bytes[12..16], record.enter_time);
    LittleEndian::write_u32(&mut bytes[16..20], record.exit_time);
    LittleEndian::write_f32(&mut bytes[20..24], record.edge_length);
    bytes[24] = record.edge_type.code();
    bytes[25..28].copy_from_slice(&record.padding);
    bytes
}

enum Backing {
    Buffered(BufReader<File>),
    Mapped(Mmap),
}

/// Iterator over the records of one transit log file
pub struct TransitReader {
    info: TransitFileInfo,
    backing: Backing,
    next_index: u64,
}

impl TransitReader {
    /// Open a record file with an explicit read mode
    pub fn open_with_mode(path: &Path, mode: ReadMode) -> Result<Self> {
        log::info!("Opening transit log: {:?}", path);

        let file = open_source(path)?;
        let file_size = file.metadata()?.len();
        let mapped = mode.use_mmap(file_size);
        let info = TransitFileInfo::from_size(file_size, mapped);

        if !info.is_aligned() {
            log::warn!(
                "File size ({}) is not a multiple of record size ({}): {} trailing bytes ignored",
                file_size,
                RECORD_SIZE,
                info.trailing_bytes
            );
        }

        let backing = if mapped {
            // Read-only view; the file must not be truncated while mapped
            let mmap = unsafe { Mmap::map(&file)? };
            advise_sequential(&mmap);
            log::debug!("Memory-mapped {} bytes", file_size);
            Backing::Mapped(mmap)
        } else {
            Backing::Buffered(BufReader::with_capacity(RECORD_SIZE * 4096, file))
        };

        log::info!("Found {} records ({} bytes)", info.record_count, file_size);

        Ok(Self {
            info,
            backing,
            next_index: 0,
        })
    }

    pub fn info(&self) -> &TransitFileInfo {
        &self.info
    }

    /// Restart iteration from the first record
    pub fn rewind(&mut self) -> Result<()> {
        if let Backing::Buffered(reader) = &mut self.backing {
            reader.seek(SeekFrom::Start(0))?;
        }
        self.next_index = 0;
        Ok(())
    }

    /// Plain records, for callers that never see malformed units
    pub fn records(self) -> impl Iterator<Item = Result<TransitRecord>> {
        self.filter_map(|item| match item {
            Ok(Decoded::Record(record)) => Some(Ok(record)),
            Ok(Decoded::Malformed(_)) => None,
            Err(e) => Some(Err(e)),
        })
    }

    fn read_next(&mut self) -> Option<Result<TransitRecord>> {
        match &mut self.backing {
            Backing::Buffered(reader) => {
                let mut bytes = [0u8; RECORD_SIZE];
                match reader.read_exact(&mut bytes) {
                    Ok(()) => Some(Ok(decode_record(&bytes))),
                    Err(e) => {
                        // The file shrank underneath us; stop after reporting
                        self.next_index = self.info.record_count;
                        Some(Err(e.into()))
                    }
                }
            }
            Backing::Mapped(mmap) => {
                let start = self.next_index as usize * RECORD_SIZE;
                let chunk: &[u8; RECORD_SIZE] = mmap.get(start..start + RECORD_SIZE)?.try_into().ok()?;
                Some(Ok(decode_record(chunk)))
            }
        }
    }
}

#[cfg(unix)]
fn advise_sequential(mmap: &Mmap) {
    if let Err(e) = mmap.advise(memmap2::Advice::Sequential) {
        log::debug!("madvise(SEQUENTIAL) failed: {}", e);
    }
}

#[cfg(not(unix))]
fn advise_sequential(_mmap: &Mmap) {}

impl Iterator for TransitReader {
    type Item = Result<Decoded<TransitRecord>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.info.record_count {
            return None;
        }
        let item = self.read_next()?;
        self.next_index += 1;
        Some(item.map(Decoded::Record))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.info.record_count.saturating_sub(self.next_index) as usize;
        (0, Some(remaining))
    }
}

impl LogReader for TransitReader {
    type Record = TransitRecord;

    fn open(path: &Path) -> Result<Self> {
        Self::open_with_mode(path, ReadMode::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample(veh_id: u32, edge_type: u8) -> TransitRecord {
        TransitRecord {
            timestamp: 1000 + veh_id,
            worker_id: 2,
            fab_id: 1,
            edge_id: 513,
            veh_id,
            enter_time: 900,
            exit_time: 1900,
            edge_length: 2.5,
            edge_type: EdgeType::from_code(edge_type),
            padding: [0; 3],
        }
    }

    fn write_file(records: &[TransitRecord], extra: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for r in records {
            file.write_all(&encode_record(r)).unwrap();
        }
        file.write_all(extra).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_field_offsets() {
        let bytes = encode_record(&sample(0x0403_0201, 4));
        assert_eq!(&bytes[0..4], &(1000u32 + 0x0403_0201).to_le_bytes());
        assert_eq!(bytes[4], 2);
        assert_eq!(bytes[5], 1);
        assert_eq!(&bytes[6..8], &[0x01, 0x02]);
        assert_eq!(&bytes[8..12], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[20..24], &2.5f32.to_le_bytes());
        assert_eq!(bytes[24], 4);
        assert_eq!(&bytes[25..], &[0, 0, 0]);
    }

    #[test]
    fn test_arbitrary_bytes_round_trip() {
        // Includes non-zero padding and an unknown edge type
        let mut bytes = [0u8; RECORD_SIZE];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(37).wrapping_add(11);
        }
        assert_eq!(encode_record(&decode_record(&bytes)), bytes);
    }

    #[test]
    fn test_three_records_with_unknown_type() {
        let file = write_file(&[sample(1, 0), sample(2, 1), sample(3, 99)], &[]);
        let reader = TransitReader::open_with_mode(file.path(), ReadMode::Buffered).unwrap();
        assert!(reader.info().is_aligned());

        let records: Vec<_> = reader.records().collect::<Result<_>>().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].edge_type_name(), "LINEAR");
        assert_eq!(records[1].edge_type_name(), "CURVE_90");
        assert_eq!(records[2].edge_type_name(), "UNKNOWN(99)");
    }

    #[test]
    fn test_trailing_partial_record_dropped() {
        let file = write_file(&[sample(1, 0), sample(2, 0)], &[0xAB; 10]);
        let reader = TransitReader::open_with_mode(file.path(), ReadMode::Buffered).unwrap();
        let info = *reader.info();
        assert_eq!(info.file_size, 66);
        assert_eq!(info.record_count, 2);
        assert_eq!(info.trailing_bytes, 10);
        assert!(!info.is_aligned());
        assert_eq!(reader.records().count(), 2);
    }

    #[test]
    fn test_mapped_and_buffered_agree() {
        let records: Vec<_> = (0..50).map(|i| sample(i, (i % 9) as u8)).collect();
        let file = write_file(&records, &[1, 2, 3]);

        let buffered = TransitReader::open_with_mode(file.path(), ReadMode::Buffered).unwrap();
        let mapped = TransitReader::open_with_mode(file.path(), ReadMode::Mapped).unwrap();
        assert!(mapped.info().mapped);
        assert!(!buffered.info().mapped);

        let a: Vec<_> = buffered.records().collect::<Result<_>>().unwrap();
        let b: Vec<_> = mapped.records().collect::<Result<_>>().unwrap();
        assert_eq!(a, records);
        assert_eq!(a, b);
    }

    #[test]
    fn test_auto_mode_threshold() {
        let file = write_file(&[sample(1, 0)], &[]);
        let small = TransitReader::open_with_mode(file.path(), ReadMode::Auto { threshold_bytes: 100 }).unwrap();
        assert!(!small.info().mapped);
        let large = TransitReader::open_with_mode(file.path(), ReadMode::Auto { threshold_bytes: 10 }).unwrap();
        assert!(large.info().mapped);
    }

    #[test]
    fn test_empty_file_never_mapped() {
        let file = write_file(&[], &[]);
        let mut reader = TransitReader::open_with_mode(file.path(), ReadMode::Mapped).unwrap();
        assert!(!reader.info().mapped);
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_rewind_restarts() {
        let file = write_file(&[sample(1, 0), sample(2, 0)], &[]);
        for mode in [ReadMode::Buffered, ReadMode::Mapped] {
            let mut reader = TransitReader::open_with_mode(file.path(), mode).unwrap();
            assert_eq!(reader.by_ref().count(), 2);
            reader.rewind().unwrap();
            assert_eq!(reader.count(), 2);
        }
    }
}
