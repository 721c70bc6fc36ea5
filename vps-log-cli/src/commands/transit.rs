//! `vps-log transit`: fixed-record edge transit logs

use super::{check_interrupted, run_export, run_split, ExportTarget, NoStop, Runner, SplitTarget};
use crate::report;
use anyhow::{Context, Result};
use clap::Args;
use std::io::{self, Write};
use std::path::PathBuf;
use vps_log_decoder::partition::encode_transit_binary;
use vps_log_decoder::{DisplayBuffer, FilterConfig, PartitionKey, ReadMode, TransitAggregator, TransitReader};

#[derive(Args, Debug)]
pub struct TransitArgs {
    /// Edge transit log file (28-byte records)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Keep only these vehicle ids
    #[arg(long, value_name = "ID", num_args = 1.., conflicts_with = "export_veh")]
    pub veh: Vec<u32>,

    /// Keep only these edge ids
    #[arg(long, value_name = "ID", num_args = 1..)]
    pub edge: Vec<u32>,

    /// Window start (ms, or HH:MM[:SS[.mmm]])
    #[arg(long, value_name = "TIME")]
    pub from: Option<String>,

    /// Window end, inclusive
    #[arg(long, value_name = "TIME")]
    pub to: Option<String>,

    /// Always memory-map the file
    #[arg(long, conflicts_with = "no_mmap")]
    pub mmap: bool,

    /// Never memory-map the file
    #[arg(long)]
    pub no_mmap: bool,

    /// Per-vehicle table
    #[arg(long)]
    pub veh_summary: bool,

    /// Busiest edges table
    #[arg(long)]
    pub edge_summary: bool,

    /// Rows in the edge table
    #[arg(long, value_name = "N")]
    pub top: Option<usize>,

    /// List matching records
    #[arg(long)]
    pub records: bool,

    /// Records to list
    #[arg(short = 'n', long, value_name = "N")]
    pub limit: Option<usize>,

    /// List the last records instead of the first
    #[arg(long)]
    pub tail: bool,

    /// Export matching records as CSV
    #[arg(long, value_name = "OUT", conflicts_with = "jsonl")]
    pub csv: Option<PathBuf>,

    /// Export matching records as JSON lines
    #[arg(long, value_name = "OUT")]
    pub jsonl: Option<PathBuf>,

    /// Write one binary file per vehicle into DIR
    #[arg(long, value_name = "DIR")]
    pub split_veh: Option<PathBuf>,

    /// Export one vehicle's records as binary
    #[arg(long, value_name = "ID")]
    pub export_veh: Option<u32>,

    /// Output file for --export-veh (default: veh_<ID>.bin)
    #[arg(short, long, value_name = "OUT", requires = "export_veh")]
    pub output: Option<PathBuf>,
}

impl TransitArgs {
    fn filter_config(&self) -> FilterConfig {
        let vehicles = match self.export_veh {
            Some(id) => vec![id],
            None => self.veh.clone(),
        };
        FilterConfig::new()
            .with_vehicles(vehicles)
            .with_edges(self.edge.iter().copied())
            .with_time_window(self.from.clone(), self.to.clone())
    }

    fn read_mode(&self, runner: &Runner) -> ReadMode {
        if self.mmap {
            ReadMode::Mapped
        } else if self.no_mmap {
            ReadMode::Buffered
        } else {
            runner.config.scan.read_mode()
        }
    }
}

pub fn run(args: &TransitArgs, runner: &Runner) -> Result<()> {
    let filter = runner.compile_filter(&runner.merge_filter(args.filter_config()))?;
    let reader = TransitReader::open_with_mode(&args.file, args.read_mode(runner))
        .with_context(|| format!("Failed to open transit log: {:?}", args.file))?;
    let info = *reader.info();

    let stdout = io::stdout();
    let mut out = stdout.lock();

    if let Some(dir) = &args.split_veh {
        let target = SplitTarget {
            source: &args.file,
            dir,
            ext: "bin",
            route_malformed: false,
        };
        let outcome = run_split(runner, &filter, reader, target, encode_transit_binary, &mut out)?;
        return check_interrupted(&outcome);
    }

    if let Some(veh_id) = args.export_veh {
        let path = args
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(PartitionKey::Vehicle(veh_id).file_name("bin")));
        let target = ExportTarget {
            path: &path,
            key: PartitionKey::Vehicle(veh_id),
            header: None,
        };
        let outcome = run_export(runner, &filter, reader, target, encode_transit_binary, &mut out)?;
        return check_interrupted(&outcome);
    }

    if let Some(path) = &args.csv {
        let target = ExportTarget {
            path,
            key: PartitionKey::Global,
            header: Some(report::TRANSIT_CSV_HEADER),
        };
        let outcome = run_export(runner, &filter, reader, target, report::encode_transit_csv, &mut out)?;
        return check_interrupted(&outcome);
    }

    if let Some(path) = &args.jsonl {
        let target = ExportTarget {
            path,
            key: PartitionKey::Global,
            header: None,
        };
        let outcome = run_export(runner, &filter, reader, target, report::encode_transit_jsonl, &mut out)?;
        return check_interrupted(&outcome);
    }

    let limit = if args.records {
        args.limit.unwrap_or(runner.config.output.limit)
    } else {
        0
    };
    let buffer = if args.tail {
        DisplayBuffer::tail(limit)
    } else {
        DisplayBuffer::head(limit)
    };
    let mut stages = (TransitAggregator::new(), NoStop(buffer));

    writeln!(out, "Parsing: {:?}", args.file)?;
    let outcome = runner
        .pass(&filter)
        .run(reader, &mut stages)
        .with_context(|| format!("Scan of {:?} failed", args.file))?;
    let (agg, NoStop(buffer)) = stages;

    if !filter.is_pass_all() {
        writeln!(
            out,
            "Filtered to {} of {} records",
            report::thousands(outcome.matched),
            report::thousands(outcome.scanned)
        )?;
    }
    report::transit_summary(&mut out, &agg, &info)?;
    if args.veh_summary {
        report::transit_vehicle_table(&mut out, &agg)?;
    }
    if args.edge_summary {
        report::transit_edge_table(&mut out, &agg, args.top.unwrap_or(runner.config.output.top_n))?;
    }
    if args.records {
        writeln!(out)?;
        report::banner(
            &mut out,
            &format!("RECORDS (showing {} of {})", buffer.len(), report::thousands(outcome.matched)),
            60,
        )?;
        let shown = buffer.len();
        let truncated = (shown as u64) < outcome.matched;
        report::listing(&mut out, buffer.iter(), shown, truncated, args.tail)?;
    }

    check_interrupted(&outcome)
}
