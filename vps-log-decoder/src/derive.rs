//! Derived-field engine
//!
//! Pure functions over already-decoded values. Nothing here holds state or
//! fails: degenerate inputs map to `None` or to a deterministic placeholder
//! label.

use std::borrow::Cow;

/// Checkpoint flag bits, in display order
pub const CHECKPOINT_FLAGS: [(u32, &str); 4] = [
    (0x01, "LOCK_REQUEST"),
    (0x02, "LOCK_WAIT"),
    (0x04, "LOCK_RELEASE"),
    (0x08, "MOVE_PREPARE"),
];

const EDGE_TYPE_NAMES: [&str; 7] = [
    "LINEAR",
    "CURVE_90",
    "CURVE_180",
    "CURVE_CSC",
    "S_CURVE",
    "LEFT_CURVE",
    "RIGHT_CURVE",
];

/// Transit duration in ms (`exit - enter`), computed without overflow
pub fn transit_time(enter_time: u32, exit_time: u32) -> i64 {
    exit_time as i64 - enter_time as i64
}

/// Average speed in m/s; `None` unless the transit time is positive
pub fn speed(edge_length: f32, transit_ms: i64) -> Option<f64> {
    speed_from_totals(edge_length as f64, transit_ms)
}

/// Average speed of summed distance over summed transit time
pub fn speed_from_totals(distance: f64, transit_ms: i64) -> Option<f64> {
    if transit_ms <= 0 {
        return None;
    }
    let speed = distance / (transit_ms as f64 / 1000.0);
    speed.is_finite().then_some(speed)
}

pub fn edge_type_name(code: u8) -> Cow<'static, str> {
    match EDGE_TYPE_NAMES.get(code as usize) {
        Some(name) => Cow::Borrowed(name),
        None => Cow::Owned(format!("UNKNOWN({})", code)),
    }
}

/// Format ms as `HH:MM:SS.mmm`; hours keep counting past 23
pub fn format_time_ms(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms / 60_000) % 60;
    let seconds = (ms / 1000) % 60;
    let millis = ms % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}

/// Whole milliseconds of a floating-point timestamp; negative and NaN clamp to 0
pub fn millis_from_f64(ts: f64) -> u64 {
    if ts.is_finite() && ts > 0.0 {
        ts.floor() as u64
    } else {
        0
    }
}

/// Parse `H+:MM`, `H+:MM:SS` or `H+:MM:SS.mmm` into ms.
///
/// Used for time-window bounds; returns `None` for anything else.
pub fn parse_time_of_day(text: &str) -> Option<u64> {
    let mut parts = text.trim().split(':');
    let hours = parse_digits(parts.next()?, 1, usize::MAX)?;
    let minutes = parse_digits(parts.next()?, 1, 2)?;
    let (seconds, millis) = match parts.next() {
        None => (0, 0),
        Some(sec) => match sec.split_once('.') {
            Some((s, ms)) => {
                let millis = parse_digits(ms, 1, 3)?;
                // ".5" means 500 ms
                let scale = 10u64.pow(3 - ms.len() as u32);
                (parse_digits(s, 1, 2)?, millis * scale)
            }
            None => (parse_digits(sec, 1, 2)?, 0),
        },
    };
    if parts.next().is_some() || minutes > 59 || seconds > 59 {
        return None;
    }
    let total_secs = hours.checked_mul(3600)?.checked_add(minutes * 60 + seconds)?;
    total_secs.checked_mul(1000)?.checked_add(millis)
}

fn parse_digits(text: &str, min_len: usize, max_len: usize) -> Option<u64> {
    if text.len() < min_len || text.len() > max_len || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// Scope classification of a text log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    Vehicle(u32),
    Other,
}

pub fn classify_scope(scope: &str) -> Scope {
    if scope == "global" {
        return Scope::Global;
    }
    match vehicle_id_from_scope(scope) {
        Some(id) => Scope::Vehicle(id),
        None => Scope::Other,
    }
}

/// `veh:` followed by at least one digit; trailing text after the digits is ignored
pub fn vehicle_id_from_scope(scope: &str) -> Option<u32> {
    let rest = scope.strip_prefix("veh:")?;
    let end = rest.bytes().take_while(u8::is_ascii_digit).count();
    if end == 0 {
        return None;
    }
    rest[..end].parse().ok()
}

/// File part of a `file:line` source
pub fn file_name_from_source(source: &str) -> &str {
    source.split(':').next().unwrap_or(source)
}

pub fn format_edge_name(edge_id: u32) -> String {
    if edge_id > 0 {
        format!("E{}", edge_id)
    } else {
        "E0(none)".to_string()
    }
}

/// Human-readable checkpoint flags.
///
/// `0` means every stage has fired and been cleared: the checkpoint is
/// complete.
pub fn decode_checkpoint_flags(flags: u32) -> String {
    if flags == 0 {
        return "COMPLETED".to_string();
    }
    let names: Vec<&str> = CHECKPOINT_FLAGS
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    if names.is_empty() {
        format!("UNKNOWN({})", flags)
    } else {
        names.join("|")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_guard() {
        assert_eq!(speed(4.0, 2000), Some(2.0));
        assert_eq!(speed(4.0, 0), None);
        assert_eq!(speed(4.0, -10), None);
        assert_eq!(speed(f32::INFINITY, 10), None);
    }

    #[test]
    fn test_transit_time_no_overflow() {
        assert_eq!(transit_time(u32::MAX, 0), -(u32::MAX as i64));
        assert_eq!(transit_time(0, u32::MAX), u32::MAX as i64);
    }

    #[test]
    fn test_edge_type_names() {
        assert_eq!(edge_type_name(0), "LINEAR");
        assert_eq!(edge_type_name(6), "RIGHT_CURVE");
        assert_eq!(edge_type_name(7), "UNKNOWN(7)");
    }

    #[test]
    fn test_format_time_hours_do_not_wrap() {
        assert_eq!(format_time_ms(1500), "00:00:01.500");
        assert_eq!(format_time_ms(25 * 3_600_000 + 61_001), "25:01:01.001");
        assert_eq!(format_time_ms(150 * 3_600_000), "150:00:00.000");
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(parse_time_of_day("00:10"), Some(600_000));
        assert_eq!(parse_time_of_day("00:00:01"), Some(1000));
        assert_eq!(parse_time_of_day("00:00:01.500"), Some(1500));
        assert_eq!(parse_time_of_day("00:00:01.5"), Some(1500));
        assert_eq!(parse_time_of_day("26:00:00.000"), Some(26 * 3_600_000));
        assert_eq!(parse_time_of_day("00:61"), None);
        assert_eq!(parse_time_of_day("abc"), None);
        assert_eq!(parse_time_of_day("1:2:3:4"), None);
    }

    #[test]
    fn test_scope_classification() {
        assert_eq!(classify_scope("global"), Scope::Global);
        assert_eq!(classify_scope("veh:42"), Scope::Vehicle(42));
        assert_eq!(classify_scope("veh:12abc"), Scope::Vehicle(12));
        assert_eq!(classify_scope("veh:"), Scope::Other);
        assert_eq!(classify_scope("system"), Scope::Other);
        assert_eq!(vehicle_id_from_scope("veh:99999999999"), None);
    }

    #[test]
    fn test_file_name_from_source() {
        assert_eq!(file_name_from_source("LockMgr.ts:238"), "LockMgr.ts");
        assert_eq!(file_name_from_source("main"), "main");
    }

    #[test]
    fn test_edge_names() {
        assert_eq!(format_edge_name(12), "E12");
        assert_eq!(format_edge_name(0), "E0(none)");
    }

    #[test]
    fn test_checkpoint_flags() {
        assert_eq!(decode_checkpoint_flags(0), "COMPLETED");
        assert_eq!(decode_checkpoint_flags(0x05), "LOCK_REQUEST|LOCK_RELEASE");
        assert_eq!(decode_checkpoint_flags(0x0F), "LOCK_REQUEST|LOCK_WAIT|LOCK_RELEASE|MOVE_PREPARE");
        assert_eq!(decode_checkpoint_flags(0x10), "UNKNOWN(16)");
    }
}
