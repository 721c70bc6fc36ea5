//! Compiled filter pipeline
//!
//! A [`Filter`] is an immutable conjunction of predicates compiled from a
//! [`FilterConfig`]. Only configured predicates are materialized, so an empty
//! configuration compiles to a filter that passes everything without looking at
//! the record. Set predicates use hash sets for O(1) membership.

use crate::config::FilterConfig;
use crate::derive;
use crate::types::{ContentKind, FramedLogEntry, FramedPayload, LogLevel, Result, TextLogEntry, TransitRecord};
use std::borrow::Cow;
use std::collections::HashSet;

/// Dimensions a record exposes to the filter
///
/// A dimension the record type does not carry returns `None`; a set predicate
/// on such a dimension skips the record.
pub trait Filterable {
    fn level(&self) -> Option<Cow<'_, LogLevel>> {
        None
    }

    fn vehicle_id(&self) -> Option<u32>;

    fn is_global(&self) -> bool;

    fn tag(&self) -> Option<&str> {
        None
    }

    fn file_name(&self) -> Option<&str> {
        None
    }

    /// Time in ms, in the unit of the time window
    fn time_ms(&self) -> u64;

    fn message(&self) -> Option<&str> {
        None
    }

    fn edge_id(&self) -> Option<u32> {
        None
    }

    fn kind(&self) -> Option<ContentKind> {
        None
    }
}

impl Filterable for TransitRecord {
    fn vehicle_id(&self) -> Option<u32> {
        Some(self.veh_id)
    }

    fn is_global(&self) -> bool {
        false
    }

    fn time_ms(&self) -> u64 {
        self.timestamp as u64
    }

    fn edge_id(&self) -> Option<u32> {
        Some(self.edge_id as u32)
    }
}

impl Filterable for TextLogEntry {
    fn level(&self) -> Option<Cow<'_, LogLevel>> {
        Some(Cow::Borrowed(&self.level))
    }

    fn vehicle_id(&self) -> Option<u32> {
        self.veh_id
    }

    fn is_global(&self) -> bool {
        TextLogEntry::is_global(self)
    }

    fn tag(&self) -> Option<&str> {
        Some(&self.tag)
    }

    fn file_name(&self) -> Option<&str> {
        Some(TextLogEntry::file_name(self))
    }

    fn time_ms(&self) -> u64 {
        self.time_ms
    }

    fn message(&self) -> Option<&str> {
        Some(&self.message)
    }
}

impl Filterable for FramedLogEntry {
    fn level(&self) -> Option<Cow<'_, LogLevel>> {
        Some(Cow::Owned(FramedLogEntry::level(self)))
    }

    fn vehicle_id(&self) -> Option<u32> {
        FramedLogEntry::vehicle_id(self)
    }

    fn is_global(&self) -> bool {
        FramedLogEntry::vehicle_id(self).is_none()
    }

    fn tag(&self) -> Option<&str> {
        match &self.payload {
            FramedPayload::Debug(p) => Some(&p.tag),
            _ => None,
        }
    }

    fn file_name(&self) -> Option<&str> {
        Some(derive::file_name_from_source(&self.location))
    }

    fn time_ms(&self) -> u64 {
        FramedLogEntry::time_ms(self)
    }

    fn message(&self) -> Option<&str> {
        FramedLogEntry::message(self)
    }

    fn kind(&self) -> Option<ContentKind> {
        Some(FramedLogEntry::kind(self))
    }
}

/// One compiled predicate
#[derive(Debug, Clone)]
pub enum Predicate {
    Levels(HashSet<LogLevel>),
    Vehicles { ids: HashSet<u32>, include_global: bool },
    Tags(HashSet<String>),
    Files(HashSet<String>),
    Edges(HashSet<u32>),
    Kinds(HashSet<ContentKind>),
    /// Inclusive bounds in ms
    TimeWindow { start: Option<u64>, end: Option<u64> },
    /// Lower-cased needle
    Search(String),
    ExcludeGlobal,
}

impl Predicate {
    pub fn matches<R: Filterable + ?Sized>(&self, record: &R) -> bool {
        match self {
            Predicate::Levels(levels) => record.level().is_some_and(|l| match &*l {
                // Filter levels are upper-cased at compile time
                LogLevel::Other(name) => levels.contains(&LogLevel::parse(&name.to_ascii_uppercase())),
                standard => levels.contains(standard),
            }),
            Predicate::Vehicles { ids, include_global } => {
                if record.is_global() {
                    *include_global
                } else {
                    record.vehicle_id().is_some_and(|id| ids.contains(&id))
                }
            }
            Predicate::Tags(tags) => record.tag().is_some_and(|t| tags.contains(t)),
            Predicate::Files(files) => record.file_name().is_some_and(|f| files.contains(f)),
            Predicate::Edges(edges) => record.edge_id().is_some_and(|e| edges.contains(&e)),
            Predicate::Kinds(kinds) => record.kind().is_some_and(|k| kinds.contains(&k)),
            Predicate::TimeWindow { start, end } => {
                let t = record.time_ms();
                start.map_or(true, |s| t >= s) && end.map_or(true, |e| t <= e)
            }
            Predicate::Search(needle) => record.message().is_some_and(|m| contains_ignore_case(m, needle)),
            Predicate::ExcludeGlobal => !record.is_global(),
        }
    }
}

/// Case-insensitive substring test; `needle` must already be lower case
///
/// ASCII needles are compared byte-wise without allocating.
fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    if needle.is_ascii() {
        let needle = needle.as_bytes();
        return haystack
            .as_bytes()
            .windows(needle.len())
            .any(|w| w.eq_ignore_ascii_case(needle));
    }
    haystack.to_lowercase().contains(needle)
}

/// Immutable conjunction of predicates
#[derive(Debug, Clone, Default)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    /// A filter with no predicates
    pub fn pass_all() -> Self {
        Self::default()
    }

    /// Compile a configuration; invalid time bounds or kind names are rejected
    pub fn compile(config: &FilterConfig) -> Result<Self> {
        let mut predicates = Vec::new();

        if !config.levels.is_empty() {
            predicates.push(Predicate::Levels(config.parsed_levels().into_iter().collect()));
        }
        if !config.vehicles.is_empty() {
            predicates.push(Predicate::Vehicles {
                ids: config.vehicles.iter().copied().collect(),
                include_global: config.include_global,
            });
        } else if !config.include_global {
            predicates.push(Predicate::ExcludeGlobal);
        }
        if !config.tags.is_empty() {
            predicates.push(Predicate::Tags(config.tags.iter().cloned().collect()));
        }
        if !config.files.is_empty() {
            predicates.push(Predicate::Files(config.files.iter().cloned().collect()));
        }
        if !config.edges.is_empty() {
            predicates.push(Predicate::Edges(config.edges.iter().copied().collect()));
        }
        if !config.kinds.is_empty() {
            predicates.push(Predicate::Kinds(config.parsed_kinds()?.into_iter().collect()));
        }
        let (start, end) = config.parsed_window()?;
        if start.is_some() || end.is_some() {
            predicates.push(Predicate::TimeWindow { start, end });
        }
        if let Some(search) = config.search.as_deref().filter(|s| !s.is_empty()) {
            predicates.push(Predicate::Search(search.to_lowercase()));
        }

        log::debug!("Compiled filter with {} predicate(s)", predicates.len());
        Ok(Self { predicates })
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// `true` when every record passes
    pub fn is_pass_all(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn passes<R: Filterable + ?Sized>(&self, record: &R) -> bool {
        self.predicates.iter().all(|p| p.matches(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::text::parse_line;
    use crate::types::{DebugPayload, EdgeType, PerfPayload};

    fn line(text: &str) -> TextLogEntry {
        parse_line(text, 1).unwrap()
    }

    fn sample() -> Vec<TextLogEntry> {
        vec![
            line("[00:00:01.000] [INFO] [veh:1] [Nav.ts:1] [Nav] Moving to E12"),
            line("[00:00:02.000] [WARN] [veh:2] [Lock.ts:5] [Lock] waiting for lock"),
            line("[00:00:03.000] [ERROR] [global] [Lock.ts:9] [LockMgr] queue FULL"),
            line("[00:00:04.000] [DEBUG] [veh:1] [Nav.ts:2] [Nav] idle"),
            line("[00:10:00.000] [INFO] [veh:3] [Sim.ts:7] [Sim] tick"),
        ]
    }

    fn passing(config: &FilterConfig) -> Vec<u64> {
        let filter = Filter::compile(config).unwrap();
        sample()
            .iter()
            .filter(|e| filter.passes(*e))
            .map(|e| e.time_ms / 1000)
            .collect()
    }

    #[test]
    fn test_empty_config_passes_everything() {
        let filter = Filter::compile(&FilterConfig::new()).unwrap();
        assert!(filter.is_pass_all());
        assert_eq!(passing(&FilterConfig::new()), vec![1, 2, 3, 4, 600]);
    }

    #[test]
    fn test_level_set() {
        assert_eq!(passing(&FilterConfig::new().with_levels(["WARN", "ERROR"])), vec![2, 3]);
    }

    #[test]
    fn test_nonstandard_level_matches_any_case() {
        let trace = line("[00:00:05.000] [Trace] [veh:1] [Nav.ts:4] [Nav] tracing");
        let lower_info = line("[00:00:06.000] [info] [veh:1] [Nav.ts:5] [Nav] lower");
        assert_eq!(trace.level, LogLevel::Other("Trace".to_string()));

        let by_trace = Filter::compile(&FilterConfig::new().with_levels(["trace"])).unwrap();
        assert!(by_trace.passes(&trace));
        assert!(!by_trace.passes(&lower_info));

        let by_info = Filter::compile(&FilterConfig::new().with_levels(["INFO"])).unwrap();
        assert!(by_info.passes(&lower_info));
        assert!(!by_info.passes(&trace));
    }

    #[test]
    fn test_vehicle_set_with_and_without_global() {
        assert_eq!(passing(&FilterConfig::new().with_vehicles([1])), vec![1, 3, 4]);
        assert_eq!(passing(&FilterConfig::new().with_vehicles([1]).with_global(false)), vec![1, 4]);
    }

    #[test]
    fn test_exclude_global_without_vehicle_set() {
        assert_eq!(passing(&FilterConfig::new().with_global(false)), vec![1, 2, 4, 600]);
    }

    #[test]
    fn test_tag_and_file_sets() {
        assert_eq!(passing(&FilterConfig::new().with_tags(["Nav"])), vec![1, 4]);
        assert_eq!(passing(&FilterConfig::new().with_files(["Lock.ts"])), vec![2, 3]);
    }

    #[test]
    fn test_time_window_inclusive() {
        let config = FilterConfig::new().with_time_window(Some("00:00:02".into()), Some("00:00:03.000".into()));
        assert_eq!(passing(&config), vec![2, 3]);
    }

    #[test]
    fn test_search_case_insensitive() {
        assert_eq!(passing(&FilterConfig::new().with_search("full")), vec![3]);
        assert_eq!(passing(&FilterConfig::new().with_search("LOCK")), vec![2]);
    }

    #[test]
    fn test_predicate_order_does_not_matter() {
        let config = FilterConfig::new()
            .with_levels(["INFO", "DEBUG", "WARN"])
            .with_vehicles([1, 2])
            .with_search("i");
        let filter = Filter::compile(&config).unwrap();
        let mut reversed = filter.predicates().to_vec();
        reversed.reverse();
        let reversed = Filter { predicates: reversed };
        for entry in sample() {
            assert_eq!(filter.passes(&entry), reversed.passes(&entry));
        }
        assert_eq!(passing(&config), vec![1, 2, 4]);
    }

    #[test]
    fn test_missing_dimension_is_skipped() {
        let record = TransitRecord {
            timestamp: 5000,
            worker_id: 0,
            fab_id: 0,
            edge_id: 4,
            veh_id: 9,
            enter_time: 0,
            exit_time: 1000,
            edge_length: 1.0,
            edge_type: EdgeType::Linear,
            padding: [0; 3],
        };
        let by_tag = Filter::compile(&FilterConfig::new().with_tags(["Nav"])).unwrap();
        assert!(!by_tag.passes(&record));
        let by_edge = Filter::compile(&FilterConfig::new().with_edges([4]).with_vehicles([9])).unwrap();
        assert!(by_edge.passes(&record));
        // Transit records are never global
        let no_global = Filter::compile(&FilterConfig::new().with_global(false)).unwrap();
        assert!(no_global.passes(&record));
    }

    #[test]
    fn test_framed_entries() {
        let debug = FramedLogEntry {
            index: 0,
            timestamp: 1200.7,
            level: 1,
            location: "Nav.ts:3".into(),
            payload: FramedPayload::Debug(DebugPayload {
                veh_id: 0,
                tag: "Nav".into(),
                message: "Route Found".into(),
            }),
        };
        let perf = FramedLogEntry {
            index: 1,
            timestamp: 1300.0,
            level: 0,
            location: "Perf.ts:1".into(),
            payload: FramedPayload::Perf(PerfPayload {
                fps: 60.0,
                memory_mb: 1.0,
                active_vehicles: 1,
                lock_queue_size: 0,
            }),
        };

        let kinds = Filter::compile(&FilterConfig::new().with_kinds(["perf"])).unwrap();
        assert!(!kinds.passes(&debug));
        assert!(kinds.passes(&perf));

        let search = Filter::compile(&FilterConfig::new().with_search("route")).unwrap();
        assert!(search.passes(&debug));
        assert!(!search.passes(&perf));

        // Vehicle id 0 is global
        let no_global = Filter::compile(&FilterConfig::new().with_global(false)).unwrap();
        assert!(!no_global.passes(&debug));

        let window = Filter::compile(&FilterConfig::new().with_time_window(Some("1200".into()), Some("1200".into()))).unwrap();
        assert!(window.passes(&debug));
    }

    #[test]
    fn test_contains_ignore_case() {
        assert!(contains_ignore_case("Queue FULL now", "full"));
        assert!(!contains_ignore_case("abc", "abcd"));
        assert!(contains_ignore_case("ÄRGER", "ärger"));
    }
}
