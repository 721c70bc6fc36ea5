//! `vps-log text`: bracketed simulation text logs

use super::{check_interrupted, run_export, run_split, ExportTarget, Runner, SplitTarget};
use crate::report;
use anyhow::{Context, Result};
use clap::Args;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use vps_log_decoder::partition::encode_display_line;
use vps_log_decoder::{
    DisplayBuffer, FilterConfig, LogReader, PartitionKey, TextAggregator, TextLogEntry, TextLogReader,
};

#[derive(Args, Debug)]
pub struct TextArgs {
    /// Simulation text log
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Keep only these vehicle ids (global lines too, unless --no-global)
    #[arg(long, value_name = "ID", num_args = 1.., conflicts_with = "export_veh")]
    pub veh: Vec<u32>,

    /// Keep only these levels (DEBUG, INFO, WARN, ERROR)
    #[arg(long, value_name = "LEVEL", num_args = 1..)]
    pub level: Vec<String>,

    /// Keep only these tags
    #[arg(long, value_name = "TAG", num_args = 1..)]
    pub tag: Vec<String>,

    /// Keep only lines from these source files
    #[arg(long = "file", value_name = "NAME", num_args = 1..)]
    pub file_filter: Vec<String>,

    /// Drop global-scope lines
    #[arg(long)]
    pub no_global: bool,

    /// Window start (HH:MM[:SS[.mmm]] or ms)
    #[arg(long, value_name = "TIME")]
    pub from: Option<String>,

    /// Window end, inclusive
    #[arg(long, value_name = "TIME")]
    pub to: Option<String>,

    /// Case-insensitive message search
    #[arg(short, long, value_name = "TEXT")]
    pub search: Option<String>,

    /// Lines to list
    #[arg(short = 'n', long, value_name = "N")]
    pub limit: Option<usize>,

    /// List the last lines instead of the first
    #[arg(long)]
    pub tail: bool,

    /// Write one file per vehicle into DIR (unparsed lines go to global.txt)
    #[arg(long, value_name = "DIR")]
    pub split: Option<PathBuf>,

    /// Export one vehicle's lines
    #[arg(long, value_name = "ID")]
    pub export_veh: Option<u32>,

    /// Output file for matching lines (default for --export-veh: veh_<ID>.txt)
    #[arg(short, long, value_name = "OUT", conflicts_with = "csv")]
    pub output: Option<PathBuf>,

    /// Export matching lines as CSV
    #[arg(long, value_name = "OUT")]
    pub csv: Option<PathBuf>,

    /// Per-vehicle level table
    #[arg(long)]
    pub veh_summary: bool,

    /// Per-tag level table
    #[arg(long)]
    pub tag_summary: bool,
}

impl TextArgs {
    fn filter_config(&self) -> FilterConfig {
        let config = FilterConfig::new()
            .with_levels(self.level.iter().cloned())
            .with_tags(self.tag.iter().cloned())
            .with_files(self.file_filter.iter().cloned())
            .with_time_window(self.from.clone(), self.to.clone());
        let config = match &self.search {
            Some(text) => config.with_search(text.clone()),
            None => config,
        };
        match self.export_veh {
            Some(id) => config.with_vehicles([id]).with_global(false),
            None => config.with_vehicles(self.veh.iter().copied()).with_global(!self.no_global),
        }
    }
}

fn open(args: &TextArgs) -> Result<TextLogReader<BufReader<File>>> {
    TextLogReader::open(&args.file).with_context(|| format!("Failed to open text log: {:?}", args.file))
}

pub fn run(args: &TextArgs, runner: &Runner) -> Result<()> {
    let query = runner.merge_filter(args.filter_config());
    let filter = runner.compile_filter(&query)?;
    let reader = open(args)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    if let Some(dir) = &args.split {
        let target = SplitTarget {
            source: &args.file,
            dir,
            ext: "txt",
            route_malformed: query.include_global,
        };
        let outcome = run_split(
            runner,
            &filter,
            reader,
            target,
            encode_display_line::<TextLogEntry>,
            &mut out,
        )?;
        return check_interrupted(&outcome);
    }

    if let Some(veh_id) = args.export_veh {
        let path = args
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(PartitionKey::Vehicle(veh_id).file_name("txt")));
        let target = ExportTarget {
            path: &path,
            key: PartitionKey::Vehicle(veh_id),
            header: None,
        };
        let outcome = run_export(
            runner,
            &filter,
            reader,
            target,
            encode_display_line::<TextLogEntry>,
            &mut out,
        )?;
        return check_interrupted(&outcome);
    }

    if let Some(path) = &args.output {
        let target = ExportTarget {
            path,
            key: PartitionKey::Global,
            header: None,
        };
        let outcome = run_export(
            runner,
            &filter,
            reader,
            target,
            encode_display_line::<TextLogEntry>,
            &mut out,
        )?;
        return check_interrupted(&outcome);
    }

    if let Some(path) = &args.csv {
        let target = ExportTarget {
            path,
            key: PartitionKey::Global,
            header: Some(report::TEXT_CSV_HEADER),
        };
        let outcome = run_export(runner, &filter, reader, target, report::encode_text_csv, &mut out)?;
        return check_interrupted(&outcome);
    }

    if args.veh_summary || args.tag_summary || query.is_empty() {
        writeln!(out, "Analyzing: {:?}", args.file)?;
        let mut agg = TextAggregator::new();
        let outcome = runner
            .pass(&filter)
            .run(reader, &mut agg)
            .with_context(|| format!("Scan of {:?} failed", args.file))?;

        if args.veh_summary || args.tag_summary {
            if args.veh_summary {
                writeln!(out)?;
                report::text_vehicle_table(&mut out, &agg)?;
            }
            if args.tag_summary {
                writeln!(out)?;
                report::text_tag_table(&mut out, &agg)?;
            }
        } else {
            writeln!(out)?;
            report::text_summary(&mut out, &agg)?;
        }
        if outcome.malformed > 0 {
            writeln!(out, "Unparsed lines    : {}", report::thousands(outcome.malformed))?;
        }
        return check_interrupted(&outcome);
    }

    let limit = args.limit.unwrap_or(runner.config.output.limit);
    let mut buffer = if args.tail {
        DisplayBuffer::tail(limit)
    } else {
        DisplayBuffer::head(limit)
    };
    let outcome = runner
        .pass(&filter)
        .run(reader, &mut buffer)
        .with_context(|| format!("Scan of {:?} failed", args.file))?;
    report::listing(&mut out, buffer.iter(), buffer.len(), outcome.stopped_early, args.tail)?;
    check_interrupted(&outcome)
}
