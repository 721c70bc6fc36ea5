//! Single-pass driver
//!
//! A [`Pass`] pulls units from a reader one at a time, runs each record through
//! the compiled [`Filter`] and hands the survivors to a [`Stage`]. Stages are
//! the consumers of a pass (aggregators, display buffers, partition writers);
//! a pair `(A, B)` is itself a stage, so several consumers share one pass over
//! the file.
//!
//! # Example
//! ```no_run
//! use vps_log_decoder::{DisplayBuffer, Filter, FilterConfig, LogReader, Pass, TextLogReader};
//! use std::path::Path;
//!
//! let filter = Filter::compile(&FilterConfig::new().with_levels(["ERROR"])).unwrap();
//! let reader = TextLogReader::open(Path::new("sim.log")).unwrap();
//! let mut tail = DisplayBuffer::tail(20);
//! let report = Pass::new(&filter).run(reader, &mut tail).unwrap();
//! println!("{} of {} lines matched", report.matched, report.scanned);
//! ```

use crate::filter::{Filter, Filterable};
use crate::types::{Decoded, MalformedUnit, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Whether a stage wants more records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Consumer of the records that pass the filter
pub trait Stage<T> {
    fn record(&mut self, record: &T) -> Result<Flow>;

    /// A unit that did not decode; ignored unless the stage routes it
    fn malformed(&mut self, _unit: &MalformedUnit) -> Result<()> {
        Ok(())
    }

    /// Release resources; invoked exactly once at the end of every pass
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T, S: Stage<T> + ?Sized> Stage<T> for &mut S {
    fn record(&mut self, record: &T) -> Result<Flow> {
        (**self).record(record)
    }

    fn malformed(&mut self, unit: &MalformedUnit) -> Result<()> {
        (**self).malformed(unit)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Both stages see every record; the pass stops once either asks to
impl<T, A: Stage<T>, B: Stage<T>> Stage<T> for (A, B) {
    fn record(&mut self, record: &T) -> Result<Flow> {
        let first = self.0.record(record)?;
        let second = self.1.record(record)?;
        if first == Flow::Stop || second == Flow::Stop {
            Ok(Flow::Stop)
        } else {
            Ok(Flow::Continue)
        }
    }

    fn malformed(&mut self, unit: &MalformedUnit) -> Result<()> {
        self.0.malformed(unit)?;
        self.1.malformed(unit)
    }

    fn close(&mut self) -> Result<()> {
        let first = self.0.close();
        let second = self.1.close();
        first.and(second)
    }
}

/// Bounded buffer for head/tail listings
#[derive(Debug)]
pub struct DisplayBuffer<T> {
    items: VecDeque<T>,
    limit: usize,
    keep_last: bool,
}

impl<T> DisplayBuffer<T> {
    /// First `limit` records; stops the pass once full
    pub fn head(limit: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(limit.min(4096)),
            limit,
            keep_last: false,
        }
    }

    /// Last `limit` records, as a ring buffer
    pub fn tail(limit: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(limit.min(4096)),
            limit,
            keep_last: true,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items.into()
    }
}

impl<T: Clone> Stage<T> for DisplayBuffer<T> {
    fn record(&mut self, record: &T) -> Result<Flow> {
        if self.keep_last {
            if self.limit > 0 {
                if self.items.len() == self.limit {
                    self.items.pop_front();
                }
                self.items.push_back(record.clone());
            }
            return Ok(Flow::Continue);
        }
        if self.items.len() < self.limit {
            self.items.push_back(record.clone());
        }
        if self.items.len() >= self.limit {
            Ok(Flow::Stop)
        } else {
            Ok(Flow::Continue)
        }
    }
}

/// Counters of one completed (or aborted) pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Units pulled from the reader, malformed ones included
    pub scanned: u64,
    /// Records that passed the filter
    pub matched: u64,
    pub malformed: u64,
    /// A stage asked to stop before the end of the input
    pub stopped_early: bool,
    /// The interrupt flag was raised
    pub interrupted: bool,
}

/// One streaming pass over a reader
pub struct Pass<'f> {
    filter: &'f Filter,
    progress_interval: u64,
    interrupt: Option<Arc<AtomicBool>>,
}

impl<'f> Pass<'f> {
    pub fn new(filter: &'f Filter) -> Self {
        Self {
            filter,
            progress_interval: 1_000_000,
            interrupt: None,
        }
    }

    /// Log progress every `interval` units (0 disables)
    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Poll `flag` between units; a raised flag ends the pass cleanly
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Drive `reader` to completion through `stage`
    ///
    /// `stage.close()` runs on every exit path. When both the pass and the
    /// close fail, the pass error is returned and the close error is logged.
    pub fn run<T, I, S>(&self, reader: I, stage: &mut S) -> Result<PassReport>
    where
        T: Filterable,
        I: IntoIterator<Item = Result<Decoded<T>>>,
        S: Stage<T> + ?Sized,
    {
        let mut report = PassReport::default();
        let outcome = self.drive(reader, stage, &mut report);
        let closed = stage.close();

        match (outcome, closed) {
            (Err(e), Err(close_err)) => {
                log::error!("Cleanup after failed pass also failed: {}", close_err);
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => {
                if report.malformed > 0 {
                    log::warn!("{} malformed unit(s) skipped", report.malformed);
                }
                log::info!(
                    "Pass complete: scanned={} matched={} malformed={}{}{}",
                    report.scanned,
                    report.matched,
                    report.malformed,
                    if report.stopped_early { " (stopped early)" } else { "" },
                    if report.interrupted { " (interrupted)" } else { "" }
                );
                Ok(report)
            }
        }
    }

    fn drive<T, I, S>(&self, reader: I, stage: &mut S, report: &mut PassReport) -> Result<()>
    where
        T: Filterable,
        I: IntoIterator<Item = Result<Decoded<T>>>,
        S: Stage<T> + ?Sized,
    {
        for item in reader {
            if self.interrupted() {
                log::warn!("Interrupted after {} units", report.scanned);
                report.interrupted = true;
                return Ok(());
            }

            report.scanned += 1;
            match item? {
                Decoded::Record(record) => {
                    if self.filter.passes(&record) {
                        report.matched += 1;
                        if stage.record(&record)? == Flow::Stop {
                            report.stopped_early = true;
                            return Ok(());
                        }
                    }
                }
                Decoded::Malformed(unit) => {
                    report.malformed += 1;
                    stage.malformed(&unit)?;
                }
            }

            if self.progress_interval > 0 && report.scanned % self.progress_interval == 0 {
                log::info!("Scanning... {} units ({} matched)", report.scanned, report.matched);
            }
        }
        Ok(())
    }

    fn interrupted(&self) -> bool {
        self.interrupt.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use crate::formats::text::TextLogReader;
    use crate::types::{DecoderError, TextLogEntry};
    use std::io::Cursor;

    const LOG: &str = "\
[00:00:01.000] [INFO] [veh:1] [a.ts:1] [T] one
[00:00:02.000] [WARN] [veh:2] [a.ts:2] [T] two
not a log line
[00:00:03.000] [INFO] [global] [a.ts:3] [T] three
[00:00:04.000] [ERROR] [veh:1] [a.ts:4] [T] four
";

    fn reader() -> TextLogReader<Cursor<&'static [u8]>> {
        TextLogReader::new(Cursor::new(LOG.as_bytes()))
    }

    #[derive(Default)]
    struct Recorder {
        seen: Vec<u64>,
        malformed: Vec<String>,
        closed: u32,
        fail_on: Option<u64>,
        fail_close: bool,
    }

    impl Stage<TextLogEntry> for Recorder {
        fn record(&mut self, record: &TextLogEntry) -> Result<Flow> {
            if self.fail_on == Some(record.line_number) {
                return Err(DecoderError::Sink {
                    key: "test".into(),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.seen.push(record.line_number);
            Ok(Flow::Continue)
        }

        fn malformed(&mut self, unit: &MalformedUnit) -> Result<()> {
            self.malformed.push(unit.raw.clone());
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.closed += 1;
            if self.fail_close {
                return Err(DecoderError::Sink {
                    key: "test".into(),
                    source: std::io::Error::other("close failed"),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn test_counts_and_filtering() {
        let filter = Filter::compile(&FilterConfig::new().with_vehicles([1])).unwrap();
        let mut stage = Recorder::default();
        let report = Pass::new(&filter).run(reader(), &mut stage).unwrap();

        assert_eq!(report.scanned, 5);
        assert_eq!(report.malformed, 1);
        // veh:1 twice plus the global line
        assert_eq!(report.matched, 3);
        assert_eq!(stage.seen, vec![1, 4, 5]);
        assert_eq!(stage.malformed, vec!["not a log line"]);
        assert_eq!(stage.closed, 1);
    }

    #[test]
    fn test_head_stops_early() {
        let filter = Filter::pass_all();
        let mut head = DisplayBuffer::head(2);
        let report = Pass::new(&filter).run(reader(), &mut head).unwrap();
        assert!(report.stopped_early);
        assert_eq!(report.scanned, 2);
        let lines: Vec<u64> = head.iter().map(|e: &TextLogEntry| e.line_number).collect();
        assert_eq!(lines, vec![1, 2]);
    }

    #[test]
    fn test_zero_limit_head_stops_immediately() {
        let filter = Filter::pass_all();
        let mut head = DisplayBuffer::<TextLogEntry>::head(0);
        let report = Pass::new(&filter).run(reader(), &mut head).unwrap();
        assert!(report.stopped_early);
        assert_eq!(report.matched, 1);
        assert!(head.is_empty());
    }

    #[test]
    fn test_tail_keeps_last() {
        let filter = Filter::pass_all();
        let mut tail = DisplayBuffer::tail(2);
        let report = Pass::new(&filter).run(reader(), &mut tail).unwrap();
        assert!(!report.stopped_early);
        let lines: Vec<u64> = tail.into_vec().iter().map(|e: &TextLogEntry| e.line_number).collect();
        assert_eq!(lines, vec![4, 5]);
    }

    #[test]
    fn test_pair_stage_feeds_both() {
        let filter = Filter::pass_all();
        let mut recorder = Recorder::default();
        let mut head = DisplayBuffer::head(10);
        let mut pair = (&mut recorder, &mut head);
        Pass::new(&filter).run(reader(), &mut pair).unwrap();
        assert_eq!(recorder.seen.len(), 4);
        assert_eq!(head.len(), 4);
        assert_eq!(recorder.closed, 1);
    }

    #[test]
    fn test_close_runs_after_stage_error() {
        let filter = Filter::pass_all();
        let mut stage = Recorder {
            fail_on: Some(2),
            fail_close: true,
            ..Default::default()
        };
        let err = Pass::new(&filter).run(reader(), &mut stage).unwrap_err();
        assert_eq!(stage.closed, 1);
        // The pass error wins over the cleanup error
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_interrupt_stops_pass_and_closes() {
        let filter = Filter::pass_all();
        let flag = Arc::new(AtomicBool::new(true));
        let mut stage = Recorder::default();
        let report = Pass::new(&filter)
            .with_interrupt(flag)
            .run(reader(), &mut stage)
            .unwrap();
        assert!(report.interrupted);
        assert_eq!(report.scanned, 0);
        assert_eq!(stage.closed, 1);
    }
}
