//! Filter configuration
//!
//! [`FilterConfig`] is the plain, serializable description of a query. It is
//! what the CLI builds from flags and what a `[filter]` table in a config file
//! deserializes into. Before a pass it is compiled once into an immutable
//! [`Filter`](crate::filter::Filter).

use crate::derive;
use crate::types::{ContentKind, DecoderError, LogLevel, Result};
use serde::{Deserialize, Serialize};

/// Query description for one pass
///
/// Every set that is left empty (and every `None`) places no restriction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Allowed levels (`DEBUG`, `INFO`, `WARN`, `ERROR` or any literal level)
    #[serde(default)]
    pub levels: Vec<String>,

    /// Allowed vehicle ids
    #[serde(default)]
    pub vehicles: Vec<u32>,

    /// Allowed tags (exact match)
    #[serde(default)]
    pub tags: Vec<String>,

    /// Allowed source file names (without the `:line` suffix)
    #[serde(default)]
    pub files: Vec<String>,

    /// Allowed edge ids (transit records)
    #[serde(default)]
    pub edges: Vec<u32>,

    /// Allowed content kinds (framed entries), by name or numeric tag
    #[serde(default)]
    pub kinds: Vec<String>,

    /// Inclusive window start, `HH:MM[:SS[.mmm]]` or plain milliseconds
    #[serde(default)]
    pub start: Option<String>,

    /// Inclusive window end, same format as `start`
    #[serde(default)]
    pub end: Option<String>,

    /// Case-insensitive substring searched in the message
    #[serde(default)]
    pub search: Option<String>,

    /// Whether global-scope records are kept
    #[serde(default = "default_true")]
    pub include_global: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            levels: Vec::new(),
            vehicles: Vec::new(),
            tags: Vec::new(),
            files: Vec::new(),
            edges: Vec::new(),
            kinds: Vec::new(),
            start: None,
            end: None,
            search: None,
            include_global: true,
        }
    }
}

impl FilterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: restrict levels
    pub fn with_levels<I, S>(mut self, levels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.levels.extend(levels.into_iter().map(Into::into));
        self
    }

    /// Builder method: restrict vehicle ids
    pub fn with_vehicles(mut self, vehicles: impl IntoIterator<Item = u32>) -> Self {
        self.vehicles.extend(vehicles);
        self
    }

    /// Builder method: restrict tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Builder method: restrict source files
    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files.extend(files.into_iter().map(Into::into));
        self
    }

    /// Builder method: restrict edge ids
    pub fn with_edges(mut self, edges: impl IntoIterator<Item = u32>) -> Self {
        self.edges.extend(edges);
        self
    }

    /// Builder method: restrict content kinds
    pub fn with_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.kinds.extend(kinds.into_iter().map(Into::into));
        self
    }

    /// Builder method: set the inclusive time window
    pub fn with_time_window(mut self, start: Option<String>, end: Option<String>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Builder method: set the message search text
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Builder method: keep or drop global-scope records
    pub fn with_global(mut self, include: bool) -> Self {
        self.include_global = include;
        self
    }

    /// `true` when no predicate is configured
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
            && self.vehicles.is_empty()
            && self.tags.is_empty()
            && self.files.is_empty()
            && self.edges.is_empty()
            && self.kinds.is_empty()
            && self.start.is_none()
            && self.end.is_none()
            && self.search.as_deref().map_or(true, str::is_empty)
            && self.include_global
    }

    /// Fill every predicate left unset in `self` from `base`
    ///
    /// Set predicates in `self` win; `include_global` is kept only if both
    /// allow it.
    pub fn merged_over(mut self, base: &FilterConfig) -> Self {
        fn fill<T: Clone>(own: &mut Vec<T>, base: &[T]) {
            if own.is_empty() {
                own.extend_from_slice(base);
            }
        }
        fill(&mut self.levels, &base.levels);
        fill(&mut self.vehicles, &base.vehicles);
        fill(&mut self.tags, &base.tags);
        fill(&mut self.files, &base.files);
        fill(&mut self.edges, &base.edges);
        fill(&mut self.kinds, &base.kinds);
        if self.start.is_none() {
            self.start = base.start.clone();
        }
        if self.end.is_none() {
            self.end = base.end.clone();
        }
        if self.search.is_none() {
            self.search = base.search.clone();
        }
        self.include_global &= base.include_global;
        self
    }

    pub(crate) fn parsed_levels(&self) -> Vec<LogLevel> {
        self.levels.iter().map(|l| LogLevel::parse(&l.to_ascii_uppercase())).collect()
    }

    pub(crate) fn parsed_kinds(&self) -> Result<Vec<ContentKind>> {
        self.kinds.iter().map(|k| parse_kind(k)).collect()
    }

    /// Window bounds in ms; an inverted window is rejected
    pub(crate) fn parsed_window(&self) -> Result<(Option<u64>, Option<u64>)> {
        let start = self.start.as_deref().map(parse_bound).transpose()?;
        let end = self.end.as_deref().map(parse_bound).transpose()?;
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(DecoderError::InvalidFilter(format!(
                    "time window start {} is after end {}",
                    derive::format_time_ms(s),
                    derive::format_time_ms(e)
                )));
            }
        }
        Ok((start, end))
    }
}

fn parse_bound(text: &str) -> Result<u64> {
    let trimmed = text.trim();
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return trimmed
            .parse()
            .map_err(|_| DecoderError::InvalidFilter(format!("time bound out of range: {}", text)));
    }
    derive::parse_time_of_day(trimmed)
        .ok_or_else(|| DecoderError::InvalidFilter(format!("invalid time bound '{}' (expected HH:MM[:SS[.mmm]])", text)))
}

/// Content kind from `DebugLog`, `debug`, `Debug` or a numeric tag
fn parse_kind(text: &str) -> Result<ContentKind> {
    let trimmed = text.trim();
    if let Ok(tag) = trimmed.parse::<u8>() {
        return Ok(ContentKind::from_tag(tag));
    }
    let lower = trimmed.to_ascii_lowercase();
    let base = lower.strip_suffix("log").unwrap_or(&lower);
    let kind = match base {
        "debug" => ContentKind::Debug,
        "checkpoint" => ContentKind::Checkpoint,
        "edgetransition" | "transition" => ContentKind::EdgeTransition,
        "lockevent" | "lock" => ContentKind::LockEvent,
        "error" => ContentKind::Error,
        "perf" => ContentKind::Perf,
        _ => return Err(DecoderError::InvalidFilter(format!("unknown content kind '{}'", text))),
    };
    Ok(kind)
}
