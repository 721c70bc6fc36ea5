//! Streaming aggregators
//!
//! Each aggregator is a [`Stage`] that folds records into running counts,
//! sums and extrema. Memory grows with key cardinality (vehicles, edges, tags),
//! never with record count. Top-N views sort the final maps on demand.

use crate::pipeline::{Flow, Stage};
use crate::types::{ContentKind, EdgeType, FramedLogEntry, LogLevel, Result, TextLogEntry, TransitRecord};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;

/// Running count/sum/sum-of-squares/min/max
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NumericStats {
    count: u64,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl NumericStats {
    pub fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Population standard deviation from the single-pass sums.
    ///
    /// Approximate: cancellation can cost precision for large, tightly
    /// clustered values.
    pub fn std_dev(&self) -> Option<f64> {
        let mean = self.mean()?;
        let variance = self.sum_sq / self.count as f64 - mean * mean;
        Some(variance.max(0.0).sqrt())
    }
}

/// Values below this get a bucket each
const EXACT_LIMIT: u64 = 1 << 10;
/// Buckets per power of two above [`EXACT_LIMIT`]
const SUB_BUCKET_BITS: u32 = 9;

/// Log-bucketed histogram of non-negative integers
///
/// Values below 1024 are counted exactly. Larger values share a bucket with
/// neighbours that agree in their top ten bits, so a reported quantile is
/// at most 0.2% below the true value. The bucket count is bounded by the
/// value range, not by how many values are pushed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Histogram {
    buckets: BTreeMap<u32, u64>,
    count: u64,
}

impl Histogram {
    pub fn push(&mut self, value: u64) {
        *self.buckets.entry(bucket_of(value)).or_insert(0) += 1;
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Lower bound of the bucket holding the value of 0-based `rank`
    fn value_at_rank(&self, rank: u64) -> Option<u64> {
        let mut seen = 0;
        for (&bucket, &n) in &self.buckets {
            seen += n;
            if rank < seen {
                return Some(bucket_floor(bucket));
            }
        }
        None
    }

    /// Nearest-rank quantile, `q` clamped to `0.0..=1.0`
    pub fn quantile(&self, q: f64) -> Option<u64> {
        if self.count == 0 {
            return None;
        }
        let rank = ((self.count - 1) as f64 * q.clamp(0.0, 1.0)).floor() as u64;
        self.value_at_rank(rank)
    }

    /// Median; the mean of the two middle values for an even count
    pub fn median(&self) -> Option<f64> {
        let mid = self.count / 2;
        if self.count % 2 == 1 {
            return self.value_at_rank(mid).map(|v| v as f64);
        }
        let low = self.value_at_rank(mid.checked_sub(1)?)?;
        let high = self.value_at_rank(mid)?;
        Some((low as f64 + high as f64) / 2.0)
    }
}

fn bucket_of(value: u64) -> u32 {
    if value < EXACT_LIMIT {
        return value as u32;
    }
    let msb = 63 - value.leading_zeros();
    let shift = msb - SUB_BUCKET_BITS;
    let mantissa = (value >> shift) as u32 - (1 << SUB_BUCKET_BITS);
    EXACT_LIMIT as u32 + ((shift - 1) << SUB_BUCKET_BITS) + mantissa
}

fn bucket_floor(bucket: u32) -> u64 {
    if u64::from(bucket) < EXACT_LIMIT {
        return u64::from(bucket);
    }
    let rel = bucket - EXACT_LIMIT as u32;
    let shift = (rel >> SUB_BUCKET_BITS) + 1;
    let mantissa = u64::from(rel & ((1 << SUB_BUCKET_BITS) - 1)) + (1 << SUB_BUCKET_BITS);
    mantissa << shift
}

/// Sort a keyed map by a descending score, ties by ascending key
fn top_by<'a, K, V, S, F>(map: impl IntoIterator<Item = (&'a K, &'a V)>, n: usize, score: F) -> Vec<(K, &'a V)>
where
    K: Ord + Copy + 'a,
    V: 'a,
    S: PartialOrd,
    F: Fn(&V) -> S,
{
    let mut items: Vec<(K, &V)> = map.into_iter().map(|(k, v)| (*k, v)).collect();
    items.sort_by(|a, b| {
        score(b.1)
            .partial_cmp(&score(a.1))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    items.truncate(n);
    items
}

fn bump<K: Ord>(map: &mut BTreeMap<K, u64>, key: K) {
    *map.entry(key).or_insert(0) += 1;
}

/// Per-vehicle transit totals
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VehicleTotals {
    pub records: u64,
    /// Sum of edge lengths (m)
    pub distance: f64,
    /// Sum of transit times (ms), non-positive values included
    pub transit_ms: i64,
}

impl VehicleTotals {
    /// Distance over summed transit time, `None` unless the time is positive
    pub fn average_speed(&self) -> Option<f64> {
        crate::derive::speed_from_totals(self.distance, self.transit_ms)
    }
}

/// Per-edge transit totals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeTotals {
    pub count: u64,
    /// Length reported by the first record for the edge (m)
    pub edge_length: f32,
    pub edge_type: EdgeType,
    pub transit_ms: i64,
}

impl EdgeTotals {
    pub fn average_transit(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.transit_ms as f64 / self.count as f64
        }
    }

    pub fn average_speed(&self) -> Option<f64> {
        let avg = self.average_transit();
        (avg > 0.0).then(|| self.edge_length as f64 / (avg / 1000.0))
    }
}

/// Aggregate state of a transit-record pass
#[derive(Debug, Clone, Default)]
pub struct TransitAggregator {
    pub total: u64,
    pub first_timestamp: Option<u32>,
    pub last_timestamp: Option<u32>,
    pub vehicles: HashMap<u32, VehicleTotals>,
    pub edges: HashMap<u16, EdgeTotals>,
    pub edge_types: BTreeMap<EdgeType, u64>,
    pub fabs: BTreeMap<u8, u64>,
    pub workers: BTreeMap<u8, u64>,
    /// Transit time over records with a positive duration (ms)
    pub transit: NumericStats,
    /// Same population as `transit`, for the median
    pub transit_histogram: Histogram,
    /// Speed over records with a defined speed (m/s)
    pub speed: NumericStats,
    pub total_distance: f64,
    /// Sum over all records, non-positive durations included (ms)
    pub total_transit_ms: i64,
}

impl TransitAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: &TransitRecord) {
        self.total += 1;
        self.first_timestamp = Some(self.first_timestamp.map_or(record.timestamp, |t| t.min(record.timestamp)));
        self.last_timestamp = Some(self.last_timestamp.map_or(record.timestamp, |t| t.max(record.timestamp)));

        let transit = record.transit_time();
        let length = record.edge_length as f64;

        let veh = self.vehicles.entry(record.veh_id).or_default();
        veh.records += 1;
        veh.distance += length;
        veh.transit_ms += transit;

        let edge = self.edges.entry(record.edge_id).or_insert_with(|| EdgeTotals {
            count: 0,
            edge_length: record.edge_length,
            edge_type: record.edge_type,
            transit_ms: 0,
        });
        edge.count += 1;
        edge.transit_ms += transit;

        bump(&mut self.edge_types, record.edge_type);
        bump(&mut self.fabs, record.fab_id);
        bump(&mut self.workers, record.worker_id);

        if transit > 0 {
            self.transit.push(transit as f64);
            self.transit_histogram.push(transit as u64);
        }
        if let Some(speed) = record.speed() {
            self.speed.push(speed);
        }
        self.total_distance += length;
        self.total_transit_ms += transit;
    }

    /// Span between first and last timestamp (ms)
    pub fn duration_ms(&self) -> u32 {
        match (self.first_timestamp, self.last_timestamp) {
            (Some(first), Some(last)) => last - first,
            _ => 0,
        }
    }

    /// Approximate median of positive transit times (ms)
    pub fn median_transit_ms(&self) -> Option<f64> {
        self.transit_histogram.median()
    }

    /// Total distance over total transit time
    pub fn average_speed(&self) -> Option<f64> {
        crate::derive::speed_from_totals(self.total_distance, self.total_transit_ms)
    }

    pub fn top_vehicles_by_distance(&self, n: usize) -> Vec<(u32, &VehicleTotals)> {
        top_by(&self.vehicles, n, |v| v.distance)
    }

    pub fn top_edges_by_count(&self, n: usize) -> Vec<(u16, &EdgeTotals)> {
        top_by(&self.edges, n, |e| e.count)
    }

    /// Vehicles in ascending id order
    pub fn vehicles_sorted(&self) -> Vec<(u32, &VehicleTotals)> {
        sorted_by_key(&self.vehicles)
    }
}

fn sorted_by_key<K: Ord + Copy + Hash, V>(map: &HashMap<K, V>) -> Vec<(K, &V)> {
    let mut items: Vec<(K, &V)> = map.iter().map(|(k, v)| (*k, v)).collect();
    items.sort_by_key(|(k, _)| *k);
    items
}

impl Stage<TransitRecord> for TransitAggregator {
    fn record(&mut self, record: &TransitRecord) -> Result<Flow> {
        self.push(record);
        Ok(Flow::Continue)
    }
}

/// Counts per level
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LevelCounts {
    pub debug: u64,
    pub info: u64,
    pub warn: u64,
    pub error: u64,
    /// Levels outside the standard four
    pub other: u64,
}

impl LevelCounts {
    pub fn push(&mut self, level: &LogLevel) {
        match level {
            LogLevel::Debug => self.debug += 1,
            LogLevel::Info => self.info += 1,
            LogLevel::Warn => self.warn += 1,
            LogLevel::Error => self.error += 1,
            LogLevel::Other(_) => self.other += 1,
        }
    }

    pub fn get(&self, level: &LogLevel) -> u64 {
        match level {
            LogLevel::Debug => self.debug,
            LogLevel::Info => self.info,
            LogLevel::Warn => self.warn,
            LogLevel::Error => self.error,
            LogLevel::Other(_) => self.other,
        }
    }

    pub fn total(&self) -> u64 {
        self.debug + self.info + self.warn + self.error + self.other
    }
}

/// Aggregate state of a text-log pass
#[derive(Debug, Clone, Default)]
pub struct TextAggregator {
    pub total: u64,
    /// Exact level distribution, unknown levels keyed verbatim
    pub levels: BTreeMap<LogLevel, u64>,
    pub vehicles: BTreeMap<u32, LevelCounts>,
    /// Lines without a vehicle id
    pub global: LevelCounts,
    pub tags: HashMap<String, LevelCounts>,
    pub files: BTreeSet<String>,
    pub first_timestamp: Option<String>,
    pub last_timestamp: Option<String>,
}

impl TextAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: &TextLogEntry) {
        self.total += 1;
        bump(&mut self.levels, entry.level.clone());

        match entry.veh_id {
            Some(id) => self.vehicles.entry(id).or_default().push(&entry.level),
            None => self.global.push(&entry.level),
        }

        match self.tags.get_mut(entry.tag.as_str()) {
            Some(counts) => counts.push(&entry.level),
            None => {
                let mut counts = LevelCounts::default();
                counts.push(&entry.level);
                self.tags.insert(entry.tag.clone(), counts);
            }
        }

        if !self.files.contains(entry.file_name()) {
            self.files.insert(entry.file_name().to_string());
        }

        if self.first_timestamp.is_none() {
            self.first_timestamp = Some(entry.timestamp.clone());
        }
        match &mut self.last_timestamp {
            Some(last) => {
                last.clear();
                last.push_str(&entry.timestamp);
            }
            None => self.last_timestamp = Some(entry.timestamp.clone()),
        }
    }

    pub fn level_count(&self, level: &LogLevel) -> u64 {
        self.levels.get(level).copied().unwrap_or(0)
    }

    /// Tags by descending total, ties by name
    pub fn top_tags(&self, n: usize) -> Vec<(&str, &LevelCounts)> {
        let mut items: Vec<(&str, &LevelCounts)> = self.tags.iter().map(|(k, v)| (k.as_str(), v)).collect();
        items.sort_by(|a, b| b.1.total().cmp(&a.1.total()).then_with(|| a.0.cmp(b.0)));
        items.truncate(n);
        items
    }
}

impl Stage<TextLogEntry> for TextAggregator {
    fn record(&mut self, record: &TextLogEntry) -> Result<Flow> {
        self.push(record);
        Ok(Flow::Continue)
    }
}

/// Aggregate state of a framed-container pass
#[derive(Debug, Clone, Default)]
pub struct FramedAggregator {
    pub total: u64,
    pub levels: BTreeMap<u8, u64>,
    pub kinds: BTreeMap<u8, u64>,
    /// Entries per vehicle; `None` is the global scope
    pub vehicles: BTreeMap<Option<u32>, u64>,
}

impl FramedAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: &FramedLogEntry) {
        self.total += 1;
        bump(&mut self.levels, entry.level);
        bump(&mut self.kinds, entry.kind().tag());
        bump(&mut self.vehicles, entry.vehicle_id());
    }

    pub fn by_level(&self) -> Vec<(LogLevel, u64)> {
        self.levels.iter().map(|(l, c)| (LogLevel::from_ordinal(*l), *c)).collect()
    }

    pub fn by_kind(&self) -> Vec<(ContentKind, u64)> {
        self.kinds.iter().map(|(k, c)| (ContentKind::from_tag(*k), *c)).collect()
    }

    /// Busiest vehicles, global scope excluded
    pub fn top_vehicles(&self, n: usize) -> Vec<(u32, u64)> {
        let vehicles = self.vehicles.iter().filter_map(|(k, v)| k.as_ref().map(|id| (id, v)));
        top_by(vehicles, n, |c| *c).into_iter().map(|(k, v)| (k, *v)).collect()
    }

    pub fn global_count(&self) -> u64 {
        self.vehicles.get(&None).copied().unwrap_or(0)
    }
}

impl Stage<FramedLogEntry> for FramedAggregator {
    fn record(&mut self, record: &FramedLogEntry) -> Result<Flow> {
        self.push(record);
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::text::parse_line;
    use crate::types::{DebugPayload, FramedPayload, PerfPayload};

    fn transit(veh: u32, edge: u16, ts: u32, enter: u32, exit: u32, len: f32, ty: u8) -> TransitRecord {
        TransitRecord {
            timestamp: ts,
            worker_id: 1,
            fab_id: (veh % 2) as u8,
            edge_id: edge,
            veh_id: veh,
            enter_time: enter,
            exit_time: exit,
            edge_length: len,
            edge_type: EdgeType::from_code(ty),
            padding: [0; 3],
        }
    }

    #[test]
    fn test_numeric_stats() {
        let mut stats = NumericStats::default();
        assert_eq!(stats.mean(), None);
        assert_eq!(stats.std_dev(), None);
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            stats.push(v);
        }
        assert_eq!(stats.count(), 8);
        assert_eq!(stats.mean(), Some(5.0));
        assert_eq!(stats.min(), Some(2.0));
        assert_eq!(stats.max(), Some(9.0));
        assert!((stats.std_dev().unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_histogram_small_values_are_exact() {
        let mut hist = Histogram::default();
        assert_eq!(hist.median(), None);
        assert_eq!(hist.quantile(0.5), None);

        for v in [5, 1, 3] {
            hist.push(v);
        }
        assert_eq!(hist.median(), Some(3.0));
        assert_eq!(hist.quantile(0.0), Some(1));
        assert_eq!(hist.quantile(1.0), Some(5));

        hist.push(4);
        assert_eq!(hist.count(), 4);
        assert_eq!(hist.median(), Some(3.5));
    }

    #[test]
    fn test_histogram_large_values_within_bucket_error() {
        let mut hist = Histogram::default();
        for v in [1_500, 1_000_001, 7_250, 12_345_678, 90_000] {
            hist.push(v);
        }
        let median = hist.median().unwrap();
        assert!(median <= 7_250.0);
        assert!((7_250.0 - median) / 7_250.0 < 1.0 / 512.0);

        let max = hist.quantile(1.0).unwrap();
        assert!(max <= 12_345_678);
        assert!((12_345_678 - max) as f64 / 12_345_678.0 < 1.0 / 512.0);
    }

    #[test]
    fn test_bucket_floor_is_a_lower_bound() {
        let mut last = 0;
        for v in [0, 1, 1023, 1024, 1025, 2047, 2048, 65_537, u64::from(u32::MAX), u64::MAX] {
            let bucket = bucket_of(v);
            assert!(bucket >= last);
            last = bucket;
            let floor = bucket_floor(bucket);
            assert!(floor <= v);
            assert_eq!(bucket_of(floor), bucket);
        }
        assert_eq!(bucket_floor(bucket_of(1023)), 1023);
        assert_eq!(bucket_floor(bucket_of(1025)), 1024);
    }

    #[test]
    fn test_transit_aggregate() {
        let mut agg = TransitAggregator::new();
        agg.push(&transit(1, 10, 5000, 0, 2000, 4.0, 0));
        agg.push(&transit(1, 11, 1000, 2000, 3000, 2.0, 1));
        agg.push(&transit(2, 10, 9000, 5000, 5000, 4.0, 99));

        assert_eq!(agg.total, 3);
        assert_eq!(agg.first_timestamp, Some(1000));
        assert_eq!(agg.last_timestamp, Some(9000));
        assert_eq!(agg.duration_ms(), 8000);
        assert_eq!(agg.vehicles.len(), 2);
        assert_eq!(agg.vehicles[&1].records, 2);
        assert_eq!(agg.vehicles[&1].distance, 6.0);
        assert_eq!(agg.vehicles[&1].average_speed(), Some(2.0));
        assert_eq!(agg.vehicles[&2].average_speed(), None);

        // The zero-duration record is excluded from time and speed stats
        assert_eq!(agg.transit.count(), 2);
        assert_eq!(agg.speed.count(), 2);
        assert_eq!(agg.transit.mean(), Some(1500.0));
        assert_eq!(agg.median_transit_ms(), Some(1500.0));
        assert_eq!(agg.average_speed(), Some(10.0 / 3.0));

        assert_eq!(agg.edge_types[&EdgeType::Unknown(99)], 1);
        assert_eq!(agg.fabs[&1], 2);
        assert_eq!(agg.edges[&10].count, 2);
        assert_eq!(agg.edges[&10].average_transit(), 1000.0);
    }

    #[test]
    fn test_top_n_ties_break_by_key() {
        let mut agg = TransitAggregator::new();
        for (veh, edge) in [(1, 30), (2, 20), (3, 20), (4, 10), (5, 10)] {
            agg.push(&transit(veh, edge, 0, 0, 1000, 1.0, 0));
        }
        let top: Vec<u16> = agg.top_edges_by_count(2).into_iter().map(|(e, _)| e).collect();
        assert_eq!(top, vec![10, 20]);

        let vehicles: Vec<u32> = agg.top_vehicles_by_distance(10).into_iter().map(|(v, _)| v).collect();
        assert_eq!(vehicles, vec![1, 2, 3, 4, 5]);
        assert_eq!(agg.vehicles_sorted().len(), 5);
    }

    #[test]
    fn test_text_aggregate() {
        let mut agg = TextAggregator::new();
        for line in [
            "[00:00:01.000] [INFO] [veh:1] [Nav.ts:1] [Nav] a",
            "[00:00:02.000] [WARN] [veh:1] [Nav.ts:2] [Nav] b",
            "[00:00:03.000] [ERROR] [global] [Lock.ts:9] [Lock] c",
            "[00:00:04.000] [TRACE] [veh:2] [Nav.ts:3] [Nav] d",
        ] {
            agg.push(&parse_line(line, 1).unwrap());
        }

        assert_eq!(agg.total, 4);
        assert_eq!(agg.level_count(&LogLevel::Info), 1);
        assert_eq!(agg.level_count(&LogLevel::Other("TRACE".into())), 1);
        assert_eq!(agg.vehicles[&1].total(), 2);
        assert_eq!(agg.vehicles[&1].get(&LogLevel::Warn), 1);
        assert_eq!(agg.global.error, 1);
        assert_eq!(agg.files.iter().collect::<Vec<_>>(), vec!["Lock.ts", "Nav.ts"]);
        assert_eq!(agg.first_timestamp.as_deref(), Some("00:00:01.000"));
        assert_eq!(agg.last_timestamp.as_deref(), Some("00:00:04.000"));

        let tags: Vec<&str> = agg.top_tags(5).into_iter().map(|(t, _)| t).collect();
        assert_eq!(tags, vec!["Nav", "Lock"]);
    }

    #[test]
    fn test_framed_aggregate() {
        let entry = |veh: u32, level: u8| FramedLogEntry {
            index: 0,
            timestamp: 0.0,
            level,
            location: "x.ts:1".into(),
            payload: FramedPayload::Debug(DebugPayload {
                veh_id: veh,
                tag: "T".into(),
                message: "m".into(),
            }),
        };
        let mut agg = FramedAggregator::new();
        agg.push(&entry(3, 1));
        agg.push(&entry(3, 1));
        agg.push(&entry(0, 3));
        agg.push(&FramedLogEntry {
            index: 3,
            timestamp: 0.0,
            level: 7,
            location: "p.ts:1".into(),
            payload: FramedPayload::Perf(PerfPayload {
                fps: 1.0,
                memory_mb: 1.0,
                active_vehicles: 1,
                lock_queue_size: 0,
            }),
        });

        assert_eq!(agg.total, 4);
        assert_eq!(agg.global_count(), 2);
        assert_eq!(agg.top_vehicles(10), vec![(3, 2)]);
        assert_eq!(
            agg.by_level(),
            vec![
                (LogLevel::Info, 2),
                (LogLevel::Error, 1),
                (LogLevel::Other("LEVEL7".into()), 1)
            ]
        );
        assert_eq!(agg.by_kind(), vec![(ContentKind::Debug, 3), (ContentKind::Perf, 1)]);
    }
}
