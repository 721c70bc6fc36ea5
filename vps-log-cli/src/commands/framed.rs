//! `vps-log framed`: framed dev-log containers

use super::{check_interrupted, run_export, ExportTarget, NoStop, Runner};
use crate::report;
use anyhow::{Context, Result};
use clap::Args;
use std::io::{self, Write};
use std::path::PathBuf;
use vps_log_decoder::{
    DisplayBuffer, EntrySource, FilterConfig, FramedAggregator, FramedContainer, FramedReader, Framing, PartitionKey,
};

#[derive(Args, Debug)]
pub struct FramedArgs {
    /// Framed dev-log container (.bin)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// The container starts with a u32 size prefix
    #[arg(long)]
    pub size_prefixed: bool,

    /// Keep only these vehicle ids
    #[arg(long, value_name = "ID", num_args = 1..)]
    pub veh: Vec<u32>,

    /// Keep only these levels (DEBUG, INFO, WARN, ERROR)
    #[arg(long, value_name = "LEVEL", num_args = 1..)]
    pub level: Vec<String>,

    /// Keep only these kinds (CheckpointLog, Checkpoint, 2, ...)
    #[arg(long, value_name = "KIND", num_args = 1..)]
    pub kind: Vec<String>,

    /// Window start (HH:MM[:SS[.mmm]] or ms)
    #[arg(long, value_name = "TIME")]
    pub from: Option<String>,

    /// Window end, inclusive
    #[arg(long, value_name = "TIME")]
    pub to: Option<String>,

    /// Case-insensitive search in messages, error text and actions
    #[arg(short, long, value_name = "TEXT")]
    pub search: Option<String>,

    /// Only print the summary
    #[arg(long)]
    pub summary: bool,

    /// Print the summary after the listing
    #[arg(long)]
    pub stats: bool,

    /// Leave the per-vehicle section out of the summary
    #[arg(long)]
    pub no_veh_summary: bool,

    /// Entries to list
    #[arg(short = 'n', long, value_name = "N")]
    pub limit: Option<usize>,

    /// List the last entries instead of the first
    #[arg(long)]
    pub tail: bool,

    /// Export matching entries as CSV
    #[arg(long, value_name = "OUT")]
    pub csv: Option<PathBuf>,
}

impl FramedArgs {
    fn filter_config(&self) -> FilterConfig {
        let config = FilterConfig::new()
            .with_vehicles(self.veh.iter().copied())
            .with_levels(self.level.iter().cloned())
            .with_kinds(self.kind.iter().cloned())
            .with_time_window(self.from.clone(), self.to.clone());
        match &self.search {
            Some(text) => config.with_search(text.clone()),
            None => config,
        }
    }

    fn framing(&self) -> Framing {
        if self.size_prefixed {
            Framing::SizePrefixed
        } else {
            Framing::Plain
        }
    }
}

pub fn run(args: &FramedArgs, runner: &Runner) -> Result<()> {
    let filter = runner.compile_filter(&runner.merge_filter(args.filter_config()))?;
    let container = FramedContainer::open_with_framing(&args.file, args.framing())
        .with_context(|| format!("Failed to open framed container: {:?}", args.file))?;
    let reader = FramedReader::new(container);

    let stdout = io::stdout();
    let mut out = stdout.lock();

    let source = reader.source();
    report::framed_header(&mut out, source.session_id(), source.worker_id(), source.entry_count())?;

    if let Some(path) = &args.csv {
        let target = ExportTarget {
            path,
            key: PartitionKey::Global,
            header: Some(report::FRAMED_CSV_HEADER),
        };
        let outcome = run_export(runner, &filter, reader, target, report::encode_framed_csv, &mut out)?;
        return check_interrupted(&outcome);
    }

    let limit = if args.summary {
        0
    } else {
        args.limit.unwrap_or(runner.config.output.limit)
    };
    let buffer = if args.tail {
        DisplayBuffer::tail(limit)
    } else {
        DisplayBuffer::head(limit)
    };
    let mut stages = (FramedAggregator::new(), NoStop(buffer));
    let outcome = runner
        .pass(&filter)
        .run(reader, &mut stages)
        .with_context(|| format!("Scan of {:?} failed", args.file))?;
    let (agg, NoStop(buffer)) = stages;

    if !args.summary {
        let shown = buffer.len();
        let truncated = (shown as u64) < outcome.matched;
        report::listing(&mut out, buffer.iter(), shown, truncated, args.tail)?;
    }
    if outcome.malformed > 0 {
        writeln!(out, "{} entries could not be decoded", report::thousands(outcome.malformed))?;
    }
    if args.summary || args.stats {
        report::framed_summary(&mut out, &agg, runner.config.output.top_n, !args.no_veh_summary)?;
    }

    check_interrupted(&outcome)
}
