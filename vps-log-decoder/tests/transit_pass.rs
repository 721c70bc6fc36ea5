// Transit record files: read modes, binary split and aggregation
use std::fs;
use std::path::{Path, PathBuf};
use vps_log_decoder::formats::{encode_record, RECORD_SIZE};
use vps_log_decoder::partition::encode_transit_binary;
use vps_log_decoder::{
    DirectorySinks, EdgeType, Filter, FilterConfig, LogReader, Pass, PartitionKey, PartitionStage, PartitionWriter,
    ReadMode, Routing, TransitAggregator, TransitReader, TransitRecord,
};

fn record(i: u32) -> TransitRecord {
    TransitRecord {
        timestamp: 1000 + i * 10,
        worker_id: (i % 2) as u8,
        fab_id: 0,
        edge_id: (i % 5) as u16,
        veh_id: i % 3 + 1,
        enter_time: i * 100,
        // Every fourth record has a zero duration
        exit_time: if i % 4 == 0 { i * 100 } else { i * 100 + 500 },
        edge_length: 2.5,
        edge_type: EdgeType::from_code((i % 8) as u8),
        padding: [0; 3],
    }
}

fn write_records(dir: &Path, count: u32, trailing: usize) -> PathBuf {
    let path = dir.join("edge_transit.bin");
    let mut bytes = Vec::new();
    for i in 0..count {
        bytes.extend_from_slice(&encode_record(&record(i)));
    }
    bytes.extend(std::iter::repeat(0xAB).take(trailing));
    fs::write(&path, bytes).unwrap();
    path
}

fn collect(reader: TransitReader) -> Vec<TransitRecord> {
    reader.records().collect::<Result<_, _>>().unwrap()
}

#[test]
fn buffered_and_mapped_reads_agree() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_records(dir.path(), 50, 5);

    let buffered = TransitReader::open_with_mode(&path, ReadMode::Buffered).unwrap();
    assert!(!buffered.info().mapped);
    assert_eq!(buffered.info().record_count, 50);
    assert_eq!(buffered.info().trailing_bytes, 5);

    let mapped = TransitReader::open_with_mode(&path, ReadMode::Mapped).unwrap();
    assert!(mapped.info().mapped);

    let a = collect(buffered);
    let b = collect(mapped);
    assert_eq!(a.len(), 50);
    assert_eq!(a, b);
    assert_eq!(a[7], record(7));
}

#[test]
fn aggregate_excludes_zero_duration_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_records(dir.path(), 40, 0);

    let filter = Filter::pass_all();
    let mut agg = TransitAggregator::new();
    let report = Pass::new(&filter)
        .run(TransitReader::open(&path).unwrap(), &mut agg)
        .unwrap();

    assert_eq!(report.scanned, 40);
    assert_eq!(agg.total, 40);
    assert_eq!(agg.vehicles.len(), 3);
    assert_eq!(agg.edges.len(), 5);
    assert_eq!(agg.transit.count(), 30);
    assert_eq!(agg.speed.count(), 30);
    assert_eq!(agg.speed.mean(), Some(5.0));
    assert_eq!(agg.edge_types[&EdgeType::Unknown(7)], 5);
    assert_eq!(agg.first_timestamp, Some(1000));
    assert_eq!(agg.last_timestamp, Some(1390));
}

#[test]
fn binary_split_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_records(dir.path(), 30, 0);
    let out = dir.path().join("by_vehicle");

    let filter = Filter::compile(&FilterConfig::new().with_edges([0, 1, 2])).unwrap();
    let sinks = DirectorySinks::create(&out, "bin").unwrap();
    let mut split = PartitionStage::new(PartitionWriter::new(sinks), Routing::ByKey, encode_transit_binary);
    let report = Pass::new(&filter)
        .run(TransitReader::open(&path).unwrap(), &mut split)
        .unwrap();

    assert_eq!(report.matched, 18);
    assert_eq!(split.writer().total_written(), 18);
    assert!(!split.writer().counts().contains_key(&PartitionKey::Global));

    let mut total = 0;
    for veh in 1..=3u32 {
        let file = out.join(format!("veh_{}.bin", veh));
        assert_eq!(fs::metadata(&file).unwrap().len() % RECORD_SIZE as u64, 0);
        let records = collect(TransitReader::open(&file).unwrap());
        assert!(records.iter().all(|r| r.veh_id == veh && r.edge_id <= 2));
        total += records.len();
    }
    assert_eq!(total, 18);
}

#[test]
fn rewind_restarts_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_records(dir.path(), 3, 0);
    let mut reader = TransitReader::open(&path).unwrap();
    assert_eq!(reader.by_ref().count(), 3);
    reader.rewind().unwrap();
    assert_eq!(reader.count(), 3);
}
