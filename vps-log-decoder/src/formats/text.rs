//! Simulation text log reader
//!
//! Lines have the shape
//!
//! ```text
//! [00:05:08.469] [INFO ] [global] [LockMgr.ts:238] [LockMgr] message text
//! ```
//!
//! i.e. timestamp, level, scope, source and tag in brackets followed by free
//! text. Lines are matched field by field with a small cursor instead of one
//! monolithic pattern, so each failure names the field that broke. A line that
//! does not match is not an error: it is yielded as a malformed unit and the
//! scan continues.

use super::{open_source, LogReader};
use crate::derive;
use crate::types::{Decoded, LogLevel, MalformedUnit, Result, TextLogEntry};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// The first field of a line that failed to match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineError {
    Timestamp,
    Level,
    Scope,
    Source,
    Tag,
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = match self {
            LineError::Timestamp => "timestamp",
            LineError::Level => "level",
            LineError::Scope => "scope",
            LineError::Source => "source",
            LineError::Tag => "tag",
        };
        write!(f, "malformed {} field", field)
    }
}

struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    /// Next `[...]` field with non-empty content, skipping leading whitespace
    fn bracketed(&mut self) -> Option<&'a str> {
        let inner = self.rest.trim_start().strip_prefix('[')?;
        let end = inner.find(']')?;
        if end == 0 {
            return None;
        }
        self.rest = &inner[end + 1..];
        Some(&inner[..end])
    }

    fn remainder(self) -> &'a str {
        self.rest.trim_start()
    }
}

/// `HH:MM:SS.mmm` (two or more hour digits) to milliseconds
fn parse_timestamp(ts: &str) -> Option<u64> {
    let (clock, millis) = ts.split_once('.')?;
    let mut parts = clock.split(':');
    let hours = digits(parts.next()?, 2, 20)?;
    let minutes = digits(parts.next()?, 2, 2)?;
    let seconds = digits(parts.next()?, 2, 2)?;
    let millis = digits(millis, 3, 3)?;
    if parts.next().is_some() {
        return None;
    }
    hours
        .checked_mul(3_600_000)?
        .checked_add(minutes * 60_000 + seconds * 1000 + millis)
}

fn digits(text: &str, min: usize, max: usize) -> Option<u64> {
    if text.len() < min || text.len() > max || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn is_level_word(level: &str) -> bool {
    !level.is_empty() && level.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Match one line, reporting the first field that failed
pub fn parse_line_detailed(line: &str, line_number: u64) -> std::result::Result<TextLogEntry, LineError> {
    let mut cursor = Cursor { rest: line.trim() };

    let timestamp = cursor.bracketed().ok_or(LineError::Timestamp)?;
    let time_ms = parse_timestamp(timestamp).ok_or(LineError::Timestamp)?;

    // Level may be right-padded inside its brackets: "[INFO ]"
    let level = cursor.bracketed().map(str::trim_end).ok_or(LineError::Level)?;
    if !is_level_word(level) {
        return Err(LineError::Level);
    }

    let scope = cursor.bracketed().ok_or(LineError::Scope)?;
    let source = cursor.bracketed().ok_or(LineError::Source)?;
    let tag = cursor.bracketed().ok_or(LineError::Tag)?;
    let message = cursor.remainder();

    Ok(TextLogEntry {
        timestamp: timestamp.to_string(),
        time_ms,
        level: LogLevel::parse(level),
        scope: scope.to_string(),
        veh_id: derive::vehicle_id_from_scope(scope),
        source: source.to_string(),
        tag: tag.to_string(),
        message: message.to_string(),
        line_number,
    })
}

/// Match one line; `None` when it does not follow the grammar
pub fn parse_line(line: &str, line_number: u64) -> Option<TextLogEntry> {
    parse_line_detailed(line, line_number).ok()
}

/// Streaming reader over a text log
///
/// Reads raw bytes up to each newline and decodes them lossily, so invalid
/// UTF-8 never stops a scan.
pub struct TextLogReader<R> {
    reader: R,
    buf: Vec<u8>,
    line_number: u64,
    unparsed: u64,
}

impl<R: BufRead> TextLogReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(256),
            line_number: 0,
            unparsed: 0,
        }
    }

    /// Lines consumed so far
    pub fn lines_read(&self) -> u64 {
        self.line_number
    }

    /// Lines that failed to match so far
    pub fn unparsed(&self) -> u64 {
        self.unparsed
    }
}

impl<R: BufRead> Iterator for TextLogReader<R> {
    type Item = Result<Decoded<TextLogEntry>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                self.line_number += 1;
                let content = self.buf.strip_suffix(b"\n").unwrap_or(&self.buf);
                let line = String::from_utf8_lossy(content);
                match parse_line_detailed(&line, self.line_number) {
                    Ok(entry) => Some(Ok(Decoded::Record(entry))),
                    Err(reason) => {
                        self.unparsed += 1;
                        log::trace!("Line {}: {}", self.line_number, reason);
                        Some(Ok(Decoded::Malformed(MalformedUnit {
                            position: self.line_number,
                            raw: line.into_owned(),
                        })))
                    }
                }
            }
            Err(e) => Some(Err(e.into())),
        }
    }
}

impl LogReader for TextLogReader<BufReader<File>> {
    type Record = TextLogEntry;

    fn open(path: &Path) -> Result<Self> {
        log::info!("Opening text log: {:?}", path);
        let file = open_source(path)?;
        Ok(Self::new(BufReader::with_capacity(1 << 20, file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor as IoCursor;

    #[test]
    fn test_parse_vehicle_line() {
        let entry = parse_line("[00:00:01.500] [INFO ] [veh:7] [Foo.ts:10] [Nav] moving", 3).unwrap();
        assert_eq!(entry.level, LogLevel::Info);
        assert_eq!(entry.veh_id, Some(7));
        assert_eq!(entry.tag, "Nav");
        assert_eq!(entry.message, "moving");
        assert_eq!(entry.time_ms, 1500);
        assert_eq!(entry.file_name(), "Foo.ts");
        assert_eq!(entry.line_number, 3);
    }

    #[test]
    fn test_parse_global_line() {
        let entry = parse_line("[00:05:08.469] [WARN] [global] [LockMgr.ts:238] [LockMgr] queue full", 1).unwrap();
        assert!(entry.is_global());
        assert_eq!(entry.veh_id, None);
        assert_eq!(entry.time_ms, 308_469);
    }

    #[test]
    fn test_hours_past_one_day_do_not_wrap() {
        let entry = parse_line("[25:00:00.001] [DEBUG] [global] [a.ts:1] [T] x", 1).unwrap();
        assert_eq!(entry.time_ms, 25 * 3_600_000 + 1);
        let entry = parse_line("[100:00:00.000] [DEBUG] [global] [a.ts:1] [T] x", 1).unwrap();
        assert_eq!(entry.time_ms, 360_000_000);
    }

    #[test]
    fn test_unknown_level_preserved() {
        let entry = parse_line("[00:00:00.000] [TRACE] [global] [a.ts:1] [T] x", 1).unwrap();
        assert_eq!(entry.level, LogLevel::Other("TRACE".to_string()));
    }

    #[test]
    fn test_whitespace_between_fields_optional() {
        let entry = parse_line("  [00:00:00.010][INFO][veh:3][a.ts:1][T]msg  ", 1).unwrap();
        assert_eq!(entry.veh_id, Some(3));
        assert_eq!(entry.message, "msg");
    }

    #[test]
    fn test_empty_message_allowed() {
        let entry = parse_line("[00:00:00.010] [INFO] [veh:3] [a.ts:1] [T]", 1).unwrap();
        assert_eq!(entry.message, "");
    }

    #[test]
    fn test_field_failures_are_named() {
        let cases = [
            ("random text", LineError::Timestamp),
            ("[0:00:00.000] [INFO] [g] [s] [t] m", LineError::Timestamp),
            ("[00:00:00.00] [INFO] [g] [s] [t] m", LineError::Timestamp),
            ("[00:00:00.000] [ INFO] [g] [s] [t] m", LineError::Level),
            ("[00:00:00.000] [IN-FO] [g] [s] [t] m", LineError::Level),
            ("[00:00:00.000] [INFO] [] [s] [t] m", LineError::Scope),
            ("[00:00:00.000] [INFO] [veh:1] [t] moving", LineError::Tag),
            ("[00:00:00.000] [INFO] [veh:1] m", LineError::Source),
        ];
        for (line, expected) in cases {
            assert_eq!(parse_line_detailed(line, 1), Err(expected), "line: {}", line);
        }
    }

    #[test]
    fn test_entry_display_is_canonical() {
        let entry = parse_line("[00:00:01.500]   [INFO]  [veh:7] [Foo.ts:10]   [Nav]    moving on", 1).unwrap();
        assert_eq!(entry.to_string(), "[00:00:01.500] [INFO ] [veh:7] [Foo.ts:10] [Nav] moving on");
        assert_eq!(parse_line(&entry.to_string(), 1).unwrap(), entry);
    }

    #[test]
    fn test_reader_counts_unparsed_lines() {
        let input = "[00:00:00.001] [INFO] [veh:1] [a.ts:1] [T] one\n\
                     garbage line\n\
                     [00:00:00.002] [INFO] [global] [a.ts:2] [T] two\r\n\
                     \n\
                     [00:00:00.003] [ERROR] [veh:2] [a.ts:3] [T] three";
        let mut reader = TextLogReader::new(IoCursor::new(input.as_bytes()));
        let items: Vec<_> = reader.by_ref().collect::<Result<_>>().unwrap();

        assert_eq!(items.len(), 5);
        assert_eq!(reader.lines_read(), 5);
        assert_eq!(reader.unparsed(), 2);
        match &items[1] {
            Decoded::Malformed(unit) => {
                assert_eq!(unit.position, 2);
                assert_eq!(unit.raw, "garbage line");
            }
            other => panic!("expected malformed unit, got {:?}", other),
        }
        match &items[2] {
            Decoded::Record(entry) => assert_eq!(entry.message, "two"),
            other => panic!("expected record, got {:?}", other),
        }
        assert!(matches!(&items[3], Decoded::Malformed(unit) if unit.raw.is_empty()));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut bytes = b"[00:00:00.001] [INFO] [veh:1] [a.ts:1] [T] bad ".to_vec();
        bytes.extend_from_slice(&[0xFF, 0xFE]);
        bytes.push(b'\n');
        let mut reader = TextLogReader::new(IoCursor::new(bytes));
        match reader.next() {
            Some(Ok(Decoded::Record(entry))) => assert!(entry.message.starts_with("bad \u{FFFD}")),
            other => panic!("unexpected item: {:?}", other),
        }
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_missing_bracketed_field_counts_once() {
        let input = "[00:00:00.000] [INFO] [veh:1] [Foo.ts:1] no tag here\n";
        let mut reader = TextLogReader::new(IoCursor::new(input.as_bytes()));
        let items: Vec<_> = reader.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(reader.unparsed(), 1);
    }
}
