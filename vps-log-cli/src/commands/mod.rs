//! Command runners, one per input encoding
//!
//! Every runner makes exactly one pass over its input. Split and export modes
//! go through the shared helpers below so sink setup, the manifest and the
//! interrupt check behave the same for all encodings.

use crate::config::AppConfig;
use crate::report;
use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use vps_log_decoder::{
    Decoded, DirectorySinks, Filter, FilterConfig, Filterable, Flow, MalformedUnit, Pass, PassReport, PartitionKey,
    PartitionStage, PartitionWriter, Routing, SingleFileSink, Stage,
};

pub mod framed;
pub mod text;
pub mod transit;

/// Settings shared by every command of one invocation
pub struct Runner<'a> {
    pub config: &'a AppConfig,
    interrupt: Arc<AtomicBool>,
}

impl<'a> Runner<'a> {
    pub fn new(config: &'a AppConfig, interrupt: Arc<AtomicBool>) -> Self {
        Self { config, interrupt }
    }

    /// Command-line predicates over the `[filter]` section of the config
    pub fn merge_filter(&self, cli: FilterConfig) -> FilterConfig {
        let merged = cli.merged_over(&self.config.filter);
        log::debug!("Effective filter: {:?}", merged);
        merged
    }

    pub fn compile_filter(&self, config: &FilterConfig) -> Result<Filter> {
        let filter = Filter::compile(config).context("Invalid filter options")?;
        log::debug!("{} predicate(s) compiled", filter.predicates().len());
        Ok(filter)
    }

    pub fn pass<'f>(&self, filter: &'f Filter) -> Pass<'f> {
        Pass::new(filter)
            .with_progress_interval(self.config.scan.progress_interval)
            .with_interrupt(Arc::clone(&self.interrupt))
    }
}

/// Fail once partial output has been printed for an interrupted pass
pub fn check_interrupted(report: &PassReport) -> Result<()> {
    if report.interrupted {
        bail!(
            "Interrupted after {} units ({} matched); output above is partial",
            report.scanned,
            report.matched
        );
    }
    Ok(())
}

/// Hides `Flow::Stop` so a bounded listing can share a pass with aggregators
pub struct NoStop<S>(pub S);

impl<T, S: Stage<T>> Stage<T> for NoStop<S> {
    fn record(&mut self, record: &T) -> vps_log_decoder::Result<Flow> {
        self.0.record(record)?;
        Ok(Flow::Continue)
    }

    fn malformed(&mut self, unit: &MalformedUnit) -> vps_log_decoder::Result<()> {
        self.0.malformed(unit)
    }

    fn close(&mut self) -> vps_log_decoder::Result<()> {
        self.0.close()
    }
}

/// Where a split writes and how it renders records
pub struct SplitTarget<'p> {
    pub source: &'p Path,
    pub dir: &'p Path,
    pub ext: &'static str,
    /// Route undecodable units verbatim to the global file
    pub route_malformed: bool,
}

/// Fan every matching record out to `<dir>/veh_<id>.<ext>` / `global.<ext>`
pub fn run_split<T, I, E>(
    runner: &Runner,
    filter: &Filter,
    reader: I,
    target: SplitTarget,
    encode: E,
    out: &mut impl Write,
) -> Result<PassReport>
where
    T: Filterable,
    I: IntoIterator<Item = vps_log_decoder::Result<Decoded<T>>>,
    E: FnMut(&T, &mut Vec<u8>),
{
    let sinks = DirectorySinks::create(target.dir, target.ext)
        .with_context(|| format!("Failed to create output directory: {:?}", target.dir))?;
    let writer = PartitionWriter::new(sinks).with_max_open(runner.config.split.max_open_sinks);
    let mut stage = PartitionStage::new(writer, Routing::ByKey, encode).with_malformed_routing(target.route_malformed);

    writeln!(out, "Splitting: {:?}", target.source)?;
    writeln!(out, "Output dir: {:?}", target.dir)?;

    let report = runner
        .pass(filter)
        .run(reader, &mut stage)
        .with_context(|| format!("Split of {:?} failed", target.source))?;

    let writer = stage.writer();
    if writer.evictions() > 0 {
        log::info!("{} sink eviction(s) under max_open_sinks", writer.evictions());
    }
    report::split_summary(
        out,
        writer.counts(),
        report.scanned,
        report.malformed,
        stage.malformed_routed(),
        target.ext,
        runner.config.output.top_n,
    )?;

    let manifest = report::SplitManifest::new(
        target.source,
        &report,
        writer.counts(),
        stage.malformed_routed(),
        target.ext,
    );
    let path = manifest.write_to(target.dir)?;
    log::info!("Manifest written: {:?}", path);
    Ok(report)
}

/// Where an export writes
pub struct ExportTarget<'p> {
    pub path: &'p Path,
    pub key: PartitionKey,
    pub header: Option<&'static str>,
}

/// Write every matching record to one file
///
/// The file is created up front so an export with no matches still leaves
/// an (empty or header-only) file behind.
pub fn run_export<T, I, E>(
    runner: &Runner,
    filter: &Filter,
    reader: I,
    target: ExportTarget,
    encode: E,
    out: &mut impl Write,
) -> Result<PassReport>
where
    T: Filterable,
    I: IntoIterator<Item = vps_log_decoder::Result<Decoded<T>>>,
    E: FnMut(&T, &mut Vec<u8>),
{
    let mut sink = SingleFileSink::new(target.path);
    if let Some(header) = target.header {
        sink = sink.with_header(header);
    }
    let mut writer = PartitionWriter::new(sink);
    writer
        .touch(target.key)
        .with_context(|| format!("Failed to create output file: {:?}", target.path))?;
    let mut stage = PartitionStage::new(writer, Routing::Single(target.key), encode);

    let report = runner
        .pass(filter)
        .run(reader, &mut stage)
        .with_context(|| format!("Export to {:?} failed", target.path))?;

    writeln!(
        out,
        "Exported {} records to: {:?}",
        report::thousands(stage.writer().total_written()),
        target.path
    )?;
    Ok(report)
}
