//! Report rendering
//!
//! Summary tables for the three encodings, record listings, CSV / JSON-lines
//! encoders for the export stages, and the split manifest. Everything renders
//! into a `Write` so the tables can be checked without a terminal.

use anyhow::{Context, Result};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use vps_log_decoder::{
    FramedAggregator, FramedLogEntry, LevelCounts, LogLevel, NumericStats, PartitionKey, PassReport, TextAggregator,
    TextLogEntry, TransitAggregator, TransitFileInfo, TransitRecord,
};

const WIDTH: usize = 60;

/// Rows shown before a listing is cut with "... and N more"
const TEXT_SUMMARY_VEHICLES: usize = 20;
const TEXT_SUMMARY_NAMES: usize = 10;
const TAG_TABLE_ROWS: usize = 30;
const TAG_COLUMN: usize = 30;

pub const TRANSIT_CSV_HEADER: &str =
    "timestamp,worker_id,fab_id,edge_id,veh_id,enter_time,exit_time,edge_length,edge_type,transit_time,speed";
pub const TEXT_CSV_HEADER: &str = "line,timestamp,time_ms,level,scope,veh_id,source,tag,message";
pub const FRAMED_CSV_HEADER: &str = "index,time,timestamp_ms,level,veh_id,location,kind,details";

/// Double rule with a title, as printed at the top of every section
pub fn banner(out: &mut impl Write, title: &str, width: usize) -> io::Result<()> {
    let rule = "═".repeat(width);
    writeln!(out, "{}", rule)?;
    writeln!(out, "  {}", title)?;
    writeln!(out, "{}", rule)
}

fn rule(out: &mut impl Write, width: usize) -> io::Result<()> {
    writeln!(out, "{}", "─".repeat(width))
}

/// `1234567` -> `1,234,567`
pub fn thousands(n: u64) -> String {
    group_digits(&n.to_string())
}

/// Fixed-point with grouped integer digits: `12345.678` -> `12,345.68`
pub fn thousands_f64(value: f64, decimals: usize) -> String {
    let text = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (text.as_str(), None),
    };
    let mut out = String::with_capacity(text.len() + 4);
    if value.is_sign_negative() && value != 0.0 {
        out.push('-');
    }
    out.push_str(&group_digits(int_part));
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(frac);
    }
    out
}

fn group_digits(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn percent(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

/// Comma-joined preview of at most `limit` items
fn preview<T: Display>(items: impl IntoIterator<Item = T>, total: usize, limit: usize) -> String {
    let shown: Vec<String> = items.into_iter().take(limit).map(|i| i.to_string()).collect();
    let more = if total > limit { ", ..." } else { "" };
    format!("[{}{}]", shown.join(", "), more)
}

fn format_stats(out: &mut impl Write, label: &str, stats: &NumericStats, unit: &str) -> io::Result<()> {
    match (stats.min(), stats.max(), stats.mean(), stats.std_dev()) {
        (Some(min), Some(max), Some(mean), Some(std)) => writeln!(
            out,
            "{:<18}: min={:.2}{u} max={:.2}{u} mean={:.2}{u} std={:.2}{u} (n={})",
            label,
            min,
            max,
            mean,
            std,
            thousands(stats.count()),
            u = unit
        ),
        _ => writeln!(out, "{:<18}: n/a", label),
    }
}

// ---------------------------------------------------------------------------
// Transit records
// ---------------------------------------------------------------------------

pub fn transit_summary(out: &mut impl Write, agg: &TransitAggregator, info: &TransitFileInfo) -> io::Result<()> {
    banner(out, "TRANSIT LOG SUMMARY", WIDTH)?;
    if agg.total == 0 {
        writeln!(out, "No records found.")?;
    } else {
        let (first, last) = (agg.first_timestamp.unwrap_or(0), agg.last_timestamp.unwrap_or(0));
        writeln!(out, "Total records     : {}", thousands(agg.total))?;
        writeln!(out, "Unique vehicles   : {}", thousands(agg.vehicles.len() as u64))?;
        writeln!(out, "Unique edges      : {}", thousands(agg.edges.len() as u64))?;
        writeln!(out, "Fab IDs           : {}", preview(agg.fabs.keys(), agg.fabs.len(), usize::MAX))?;
        writeln!(out, "Worker IDs        : {}", preview(agg.workers.keys(), agg.workers.len(), usize::MAX))?;
        writeln!(
            out,
            "Time range        : {}ms ~ {}ms ({:.1}s)",
            thousands(first as u64),
            thousands(last as u64),
            agg.duration_ms() as f64 / 1000.0
        )?;
        writeln!(out, "Total distance    : {}m", thousands_f64(agg.total_distance, 2))?;
        writeln!(
            out,
            "Total transit time: {}ms ({:.1}s)",
            thousands_f64(agg.total_transit_ms as f64, 0),
            agg.total_transit_ms as f64 / 1000.0
        )?;
        if let Some(speed) = agg.average_speed() {
            writeln!(out, "Average speed     : {:.2}m/s", speed)?;
        }
        format_stats(out, "Transit time", &agg.transit, "ms")?;
        if let Some(median) = agg.median_transit_ms() {
            writeln!(out, "Median transit    : ~{:.2}ms", median)?;
        }
        format_stats(out, "Speed", &agg.speed, "m/s")?;

        writeln!(out)?;
        writeln!(out, "Edge types:")?;
        for (edge_type, count) in &agg.edge_types {
            writeln!(
                out,
                "  {:<12}: {:>12} ({:5.1}%)",
                edge_type,
                thousands(*count),
                percent(*count, agg.total)
            )?;
        }
    }
    if info.trailing_bytes > 0 {
        writeln!(out)?;
        writeln!(
            out,
            "Note: {} trailing byte(s) after the last complete record were ignored",
            info.trailing_bytes
        )?;
    }
    writeln!(out, "{}", "═".repeat(WIDTH))
}

pub fn transit_vehicle_table(out: &mut impl Write, agg: &TransitAggregator) -> io::Result<()> {
    writeln!(out)?;
    banner(out, "VEHICLE SUMMARY", WIDTH)?;
    writeln!(
        out,
        "{:>8} {:>8} {:>12} {:>10} {:>10}",
        "VehID", "Records", "Distance", "Time(ms)", "Avg Speed"
    )?;
    rule(out, WIDTH)?;
    for (veh_id, totals) in agg.vehicles_sorted() {
        let speed = totals
            .average_speed()
            .map(|s| format!("{:>7.2}m/s", s))
            .unwrap_or_else(|| format!("{:>10}", "-"));
        writeln!(
            out,
            "{:>8} {:>8} {:>11.2}m {:>10} {}",
            veh_id,
            thousands(totals.records),
            totals.distance,
            thousands_f64(totals.transit_ms as f64, 0),
            speed
        )?;
    }
    Ok(())
}

pub fn transit_edge_table(out: &mut impl Write, agg: &TransitAggregator, top_n: usize) -> io::Result<()> {
    writeln!(out)?;
    banner(out, &format!("EDGE SUMMARY (Top {} by transit count)", top_n), WIDTH)?;
    writeln!(
        out,
        "{:>8} {:>8} {:>10} {:>10} {:>10}",
        "EdgeID", "Count", "Length", "Avg Time", "Avg Speed"
    )?;
    rule(out, WIDTH)?;
    for (edge_id, totals) in agg.top_edges_by_count(top_n) {
        let speed = totals
            .average_speed()
            .map(|s| format!("{:>7.2}m/s", s))
            .unwrap_or_else(|| format!("{:>10}", "-"));
        writeln!(
            out,
            "{:>8} {:>8} {:>9.2}m {:>8.1}ms {}",
            edge_id,
            thousands(totals.count),
            totals.edge_length,
            totals.average_transit(),
            speed
        )?;
    }
    Ok(())
}

/// CSV row; an absent speed is an empty field
pub fn encode_transit_csv(record: &TransitRecord, buf: &mut Vec<u8>) {
    let speed = record.speed().map(|s| format!("{:.4}", s)).unwrap_or_default();
    let _ = writeln!(
        buf,
        "{},{},{},{},{},{},{},{:.4},{},{},{}",
        record.timestamp,
        record.worker_id,
        record.fab_id,
        record.edge_id,
        record.veh_id,
        record.enter_time,
        record.exit_time,
        record.edge_length,
        csv_field(&record.edge_type_name()),
        record.transit_time(),
        speed
    );
}

#[derive(Serialize)]
struct TransitJson<'a> {
    #[serde(flatten)]
    record: &'a TransitRecord,
    edge_type_name: Cow<'static, str>,
    transit_time: i64,
    speed: Option<f64>,
}

/// One JSON object per line, raw fields plus derived ones
pub fn encode_transit_jsonl(record: &TransitRecord, buf: &mut Vec<u8>) {
    let row = TransitJson {
        record,
        edge_type_name: record.edge_type_name(),
        transit_time: record.transit_time(),
        speed: record.speed(),
    };
    if let Err(e) = serde_json::to_writer(&mut *buf, &row) {
        log::warn!("Skipping record at {}ms: {}", record.timestamp, e);
        return;
    }
    buf.push(b'\n');
}

// ---------------------------------------------------------------------------
// Text logs
// ---------------------------------------------------------------------------

pub fn text_summary(out: &mut impl Write, agg: &TextAggregator) -> io::Result<()> {
    banner(out, "LOG SUMMARY", WIDTH)?;
    writeln!(out, "Total entries     : {}", thousands(agg.total))?;
    writeln!(
        out,
        "Time range        : {} ~ {}",
        agg.first_timestamp.as_deref().unwrap_or("-"),
        agg.last_timestamp.as_deref().unwrap_or("-")
    )?;
    writeln!(out, "Unique vehicles   : {}", thousands(agg.vehicles.len() as u64))?;
    writeln!(out, "Unique tags       : {}", agg.tags.len())?;
    writeln!(out, "Unique files      : {}", agg.files.len())?;
    writeln!(out)?;

    writeln!(out, "Level distribution:")?;
    for level in LogLevel::STANDARD.iter() {
        level_bar(out, level.as_str(), agg.level_count(level), agg.total)?;
    }
    for (level, count) in agg.levels.iter().filter(|(l, _)| matches!(l, LogLevel::Other(_))) {
        level_bar(out, level.as_str(), *count, agg.total)?;
    }
    writeln!(out)?;

    writeln!(
        out,
        "Vehicles: {}",
        preview(agg.vehicles.keys(), agg.vehicles.len(), TEXT_SUMMARY_VEHICLES)
    )?;
    let mut tags: Vec<&str> = agg.tags.keys().map(String::as_str).collect();
    tags.sort_unstable();
    writeln!(out, "Tags: {}", preview(&tags, tags.len(), TEXT_SUMMARY_NAMES))?;
    writeln!(out, "Files: {}", preview(&agg.files, agg.files.len(), TEXT_SUMMARY_NAMES))?;
    writeln!(out, "{}", "═".repeat(WIDTH))
}

fn level_bar(out: &mut impl Write, level: &str, count: u64, total: u64) -> io::Result<()> {
    let pct = percent(count, total);
    writeln!(
        out,
        "  {:6}: {:>12} ({:5.1}%) {}",
        level,
        thousands(count),
        pct,
        "█".repeat((pct / 2.0) as usize)
    )
}

fn level_row(out: &mut impl Write, label: &str, label_width: usize, counts: &LevelCounts) -> io::Result<()> {
    writeln!(
        out,
        "{:>w$} {:>10} {:>10} {:>10} {:>10} {:>10}",
        label,
        thousands(counts.total()),
        thousands(counts.debug),
        thousands(counts.info),
        thousands(counts.warn),
        thousands(counts.error),
        w = label_width
    )
}

/// Global row first, then vehicles in id order
pub fn text_vehicle_table(out: &mut impl Write, agg: &TextAggregator) -> io::Result<()> {
    banner(out, "VEHICLE LOG SUMMARY", 70)?;
    writeln!(
        out,
        "{:>8} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "VehID", "Total", "DEBUG", "INFO", "WARN", "ERROR"
    )?;
    rule(out, 70)?;
    level_row(out, "global", 8, &agg.global)?;
    for (veh_id, counts) in &agg.vehicles {
        level_row(out, &veh_id.to_string(), 8, counts)?;
    }
    Ok(())
}

/// Long tags are cut to fit the column
fn tag_label(tag: &str) -> Cow<'_, str> {
    if tag.chars().count() > TAG_COLUMN {
        let cut: String = tag.chars().take(TAG_COLUMN - 2).collect();
        Cow::Owned(cut + "..")
    } else {
        Cow::Borrowed(tag)
    }
}

pub fn text_tag_table(out: &mut impl Write, agg: &TextAggregator) -> io::Result<()> {
    banner(out, "TAG LOG SUMMARY", 80)?;
    writeln!(
        out,
        "{:<30} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "Tag", "Total", "DEBUG", "INFO", "WARN", "ERROR"
    )?;
    rule(out, 80)?;
    for (tag, counts) in agg.top_tags(TAG_TABLE_ROWS) {
        writeln!(
            out,
            "{:<30} {:>10} {:>10} {:>10} {:>10} {:>10}",
            tag_label(tag),
            thousands(counts.total()),
            thousands(counts.debug),
            thousands(counts.info),
            thousands(counts.warn),
            thousands(counts.error)
        )?;
    }
    Ok(())
}

pub fn encode_text_csv(entry: &TextLogEntry, buf: &mut Vec<u8>) {
    let veh = entry.veh_id.map(|v| v.to_string()).unwrap_or_default();
    let _ = writeln!(
        buf,
        "{},{},{},{},{},{},{},{},{}",
        entry.line_number,
        entry.timestamp,
        entry.time_ms,
        csv_field(entry.level.as_str()),
        csv_field(&entry.scope),
        veh,
        csv_field(&entry.source),
        csv_field(&entry.tag),
        csv_field(&entry.message)
    );
}

// ---------------------------------------------------------------------------
// Framed containers
// ---------------------------------------------------------------------------

pub fn framed_header(out: &mut impl Write, session_id: Option<&str>, worker_id: u32, entries: usize) -> io::Result<()> {
    writeln!(out, "Session ID: {}", session_id.unwrap_or("N/A"))?;
    writeln!(out, "Worker ID: {}", worker_id)?;
    writeln!(out, "Total Entries: {}", thousands(entries as u64))?;
    rule(out, 100)
}

pub fn framed_summary(out: &mut impl Write, agg: &FramedAggregator, top_n: usize, by_vehicle: bool) -> io::Result<()> {
    writeln!(out)?;
    banner(out, "SUMMARY", 100)?;
    writeln!(out, "  Total Entries: {}", thousands(agg.total))?;
    writeln!(out)?;
    writeln!(out, "  By Level:")?;
    for (level, count) in agg.by_level() {
        writeln!(out, "    {:8}: {:>8}", level, thousands(count))?;
    }
    writeln!(out)?;
    writeln!(out, "  By Kind:")?;
    for (kind, count) in agg.by_kind() {
        writeln!(out, "    {:20}: {:>8}", kind, thousands(count))?;
    }
    if by_vehicle {
        writeln!(out)?;
        writeln!(out, "  By Vehicle (top {}):", top_n)?;
        let global = agg.global_count();
        if global > 0 {
            writeln!(out, "    {:15}: {:>8}", "global", thousands(global))?;
        }
        for (veh_id, count) in agg.top_vehicles(top_n) {
            writeln!(out, "    {:15}: {:>8}", format!("veh:{}", veh_id), thousands(count))?;
        }
    }
    Ok(())
}

pub fn encode_framed_csv(entry: &FramedLogEntry, buf: &mut Vec<u8>) {
    let veh = entry.vehicle_id().map(|v| v.to_string()).unwrap_or_default();
    let _ = writeln!(
        buf,
        "{},{},{},{},{},{},{},{}",
        entry.index,
        entry.time_str(),
        entry.time_ms(),
        csv_field(entry.level().as_str()),
        veh,
        csv_field(&entry.location),
        csv_field(&entry.kind().name()),
        csv_field(&entry.details())
    );
}

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

/// Print a head or tail listing with a footer that explains the cut
///
/// `truncated` is set when a head listing stopped before the end of input.
pub fn listing<'a, T: Display + 'a>(
    out: &mut impl Write,
    items: impl IntoIterator<Item = &'a T>,
    shown: usize,
    truncated: bool,
    tail: bool,
) -> io::Result<()> {
    for item in items {
        writeln!(out, "{}", item)?;
    }
    if shown == 0 {
        writeln!(out, "No matching entries.")?;
    } else if tail {
        writeln!(out, "\n--- Showing last {} entries ---", shown)?;
    } else if truncated {
        writeln!(out, "\n--- Showing first {} entries (use --limit to see more) ---", shown)?;
    }
    Ok(())
}

/// Quote a CSV field when it holds a separator, quote or line break
pub fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

pub fn split_summary(
    out: &mut impl Write,
    counts: &BTreeMap<PartitionKey, u64>,
    scanned: u64,
    malformed: u64,
    malformed_routed: u64,
    ext: &str,
    top_n: usize,
) -> io::Result<()> {
    let global = counts.get(&PartitionKey::Global).copied().unwrap_or(0);
    let mut vehicles: Vec<(u32, u64)> = counts
        .iter()
        .filter_map(|(key, count)| match key {
            PartitionKey::Vehicle(id) => Some((*id, *count)),
            PartitionKey::Global => None,
        })
        .collect();
    vehicles.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    writeln!(out)?;
    banner(out, "SPLIT SUMMARY", WIDTH)?;
    writeln!(out, "Total scanned     : {}", thousands(scanned))?;
    writeln!(out, "Unparsed routed   : {}", thousands(malformed_routed))?;
    let dropped = malformed.saturating_sub(malformed_routed);
    if dropped > 0 {
        writeln!(out, "Unparsed dropped  : {}", thousands(dropped))?;
    }
    writeln!(
        out,
        "Global            : {} -> {}",
        thousands(global),
        PartitionKey::Global.file_name(ext)
    )?;
    writeln!(out, "Vehicle files     : {}", vehicles.len())?;
    writeln!(out)?;
    writeln!(out, "{:>8} {:>12} {:<30}", "VehID", "Records", "File")?;
    rule(out, WIDTH)?;
    for (veh_id, count) in vehicles.iter().take(top_n) {
        writeln!(
            out,
            "{:>8} {:>12} {}",
            veh_id,
            thousands(*count),
            PartitionKey::Vehicle(*veh_id).file_name(ext)
        )?;
    }
    if vehicles.len() > top_n {
        writeln!(out, "... and {} more vehicles", vehicles.len() - top_n)?;
    }
    writeln!(out, "{}", "═".repeat(WIDTH))
}

/// Written next to the split files
#[derive(Debug, Serialize)]
pub struct SplitManifest {
    pub source: PathBuf,
    pub generated_at: String,
    pub scanned: u64,
    pub written: u64,
    pub malformed_routed: u64,
    pub interrupted: bool,
    /// File name -> records written
    pub files: BTreeMap<String, u64>,
}

impl SplitManifest {
    pub fn new(
        source: &Path,
        report: &PassReport,
        counts: &BTreeMap<PartitionKey, u64>,
        malformed_routed: u64,
        ext: &str,
    ) -> Self {
        Self {
            source: source.to_path_buf(),
            generated_at: chrono::Local::now().to_rfc3339(),
            scanned: report.scanned,
            written: counts.values().sum(),
            malformed_routed,
            interrupted: report.interrupted,
            files: counts.iter().map(|(key, count)| (key.file_name(ext), *count)).collect(),
        }
    }

    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join("manifest.json");
        let file = File::create(&path).with_context(|| format!("Failed to create manifest: {:?}", path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .with_context(|| format!("Failed to write manifest: {:?}", path))?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(path)
    }
}
