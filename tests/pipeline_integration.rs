//! Integration tests for the full resolution pipeline
//!
//! Runs the pipeline against an on-disk SQLite source and a real CSV sink.

use ipgeo_batch::{
    CsvResultSink, GeoResolver, InMemoryGeoResolver, LocationRecord, Pipeline, PipelineError,
    PipelineOptions, ProcessingCounters, ShutdownController, SourceError, SqliteIpSource,
    TableStorage,
};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

const HEADER: &str = "ip,country,country_code,region,city";

struct Fixture {
    dir: TempDir,
    db_path: PathBuf,
    out_path: PathBuf,
}

impl Fixture {
    /// Source table `summary` holding the given (possibly repeated) IPs.
    fn new(ips: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("logs.db");
        let out_path = dir.path().join("data").join("ip_locations.csv");

        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE summary (id INTEGER PRIMARY KEY, ip TEXT, path TEXT);",
        )
        .unwrap();
        for ip in ips {
            conn.execute(
                "INSERT INTO summary (ip, path) VALUES (?1, '/index.html')",
                [ip],
            )
            .unwrap();
        }

        Self {
            dir,
            db_path,
            out_path,
        }
    }

    fn pipeline(
        &self,
        resolver: Arc<dyn GeoResolver>,
        batch_size: usize,
        max_workers: usize,
    ) -> Pipeline {
        let sink = CsvResultSink::open(&self.out_path).unwrap();
        Pipeline::new(
            Arc::new(SqliteIpSource::new(&self.db_path)),
            resolver,
            Arc::new(sink),
            PipelineOptions {
                collection: "summary".to_string(),
                batch_size,
                max_workers,
            },
        )
    }

    fn lines(&self) -> Vec<String> {
        std::fs::read_to_string(&self.out_path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn rows(&self) -> Vec<LocationRecord> {
        read_rows(&self.out_path)
    }
}

fn read_rows(path: &Path) -> Vec<LocationRecord> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader.deserialize().map(Result::unwrap).collect()
}

fn world() -> Arc<InMemoryGeoResolver> {
    let resolver = InMemoryGeoResolver::from_records([
        LocationRecord::new("8.8.8.8", "United States", "US", "California", "Mountain View"),
        LocationRecord::new("1.1.1.1", "Australia", "AU", "Queensland", "Brisbane"),
    ])
    .unwrap();

    for i in 0..200u32 {
        resolver
            .insert(LocationRecord::new(
                format!("100.64.{}.{}", i / 100, i % 100),
                "Brazil",
                "BR",
                "Sao Paulo",
                "Campinas",
            ))
            .unwrap();
    }
    Arc::new(resolver)
}

/// Resolver wrapper that requests shutdown on its first lookup.
struct InterruptingResolver {
    inner: Arc<InMemoryGeoResolver>,
    shutdown: ShutdownController,
}

impl GeoResolver for InterruptingResolver {
    fn resolve(&self, ip: &str) -> Option<LocationRecord> {
        self.shutdown.shutdown();
        self.inner.resolve(ip)
    }
}

/// Resolver that panics on one address.
struct PoisonedResolver {
    inner: Arc<InMemoryGeoResolver>,
    poison: String,
}

impl GeoResolver for PoisonedResolver {
    fn resolve(&self, ip: &str) -> Option<LocationRecord> {
        if ip == self.poison {
            panic!("corrupt database node for {}", ip);
        }
        self.inner.resolve(ip)
    }
}

/// In-memory table whose `fail_on`-th append (0 = header) writes half its
/// bytes and then errors, like a disk filling up mid-write.
struct FlakyStorage {
    bytes: Arc<Mutex<Vec<u8>>>,
    appends: usize,
    fail_on: usize,
}

impl TableStorage for FlakyStorage {
    fn size(&self) -> io::Result<u64> {
        Ok(self.bytes.lock().len() as u64)
    }

    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        let call = self.appends;
        self.appends += 1;
        if call == self.fail_on {
            self.bytes.lock().extend_from_slice(&bytes[..bytes.len() / 2]);
            return Err(io::Error::new(io::ErrorKind::Other, "no space left on device"));
        }
        self.bytes.lock().extend_from_slice(bytes);
        Ok(())
    }

    fn truncate(&mut self, size: u64) -> io::Result<()> {
        self.bytes.lock().truncate(size as usize);
        Ok(())
    }
}

#[tokio::test]
async fn test_scenario_three_ips_batch_of_two() {
    let fx = Fixture::new(&["8.8.8.8", "1.1.1.1", "not-an-ip", "8.8.8.8", "1.1.1.1"]);
    let pipeline = fx.pipeline(world(), 2, 30);

    let summary = pipeline.run(&ShutdownController::new()).await.unwrap();

    assert!(summary.is_success());
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.counters, ProcessingCounters::new(2, 1));

    let lines = fx.lines();
    assert_eq!(lines[0], HEADER);
    assert_eq!(lines.len(), 3);

    let rows = fx.rows();
    let ips: HashSet<&str> = rows.iter().map(|r| r.ip.as_str()).collect();
    assert_eq!(ips, HashSet::from(["8.8.8.8", "1.1.1.1"]));
    assert!(rows.iter().all(|r| !r.country.is_empty() && !r.country_code.is_empty()));
}

#[tokio::test]
async fn test_empty_source_writes_only_header() {
    let fx = Fixture::new(&[]);
    let pipeline = fx.pipeline(world(), 10, 4);

    let summary = pipeline.run(&ShutdownController::new()).await.unwrap();

    assert!(summary.is_success());
    assert_eq!(summary.batches, 0);
    assert_eq!(summary.counters, ProcessingCounters::default());
    assert_eq!(fx.lines(), vec![HEADER.to_string()]);
}

#[tokio::test]
async fn test_each_resolved_ip_written_exactly_once() {
    let mut ips: Vec<String> = (0..200u32)
        .map(|i| format!("100.64.{}.{}", i / 100, i % 100))
        .collect();
    // duplicates and misses in the raw collection
    ips.extend((0..50u32).map(|i| format!("100.64.0.{}", i)));
    ips.extend((0..30u32).map(|i| format!("192.0.2.{}", i)));
    let refs: Vec<&str> = ips.iter().map(String::as_str).collect();

    let fx = Fixture::new(&refs);
    let pipeline = fx.pipeline(world(), 17, 6);

    let summary = pipeline.run(&ShutdownController::new()).await.unwrap();

    assert_eq!(summary.counters, ProcessingCounters::new(200, 30));
    // 230 distinct IPs in batches of 17
    assert_eq!(summary.batches, 14);

    let lines = fx.lines();
    assert_eq!(lines.iter().filter(|l| l.as_str() == HEADER).count(), 1);

    let rows = fx.rows();
    assert_eq!(rows.len(), 200);
    let unique: HashSet<&str> = rows.iter().map(|r| r.ip.as_str()).collect();
    assert_eq!(unique.len(), 200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_count_does_not_change_output() {
    let ips: Vec<String> = (0..200u32)
        .map(|i| format!("100.64.{}.{}", i / 100, i % 100))
        .chain((0..40u32).map(|i| format!("198.51.100.{}", i)))
        .chain(std::iter::once("garbage".to_string()))
        .collect();
    let refs: Vec<&str> = ips.iter().map(String::as_str).collect();

    let single = Fixture::new(&refs);
    let many = Fixture::new(&refs);

    let a = single
        .pipeline(world(), 50, 1)
        .run(&ShutdownController::new())
        .await
        .unwrap();
    let b = many
        .pipeline(world(), 50, 30)
        .run(&ShutdownController::new())
        .await
        .unwrap();

    assert_eq!(a.counters, b.counters);

    let rows_a: HashSet<LocationRecord> = single.rows().into_iter().collect();
    let rows_b: HashSet<LocationRecord> = many.rows().into_iter().collect();
    assert_eq!(rows_a.len(), 200);
    assert_eq!(rows_a, rows_b);
}

#[tokio::test]
async fn test_faulting_lookup_is_isolated() {
    let fx = Fixture::new(&["8.8.8.8", "1.1.1.1", "100.64.0.1", "100.64.0.2", "100.64.0.3"]);
    let resolver = Arc::new(PoisonedResolver {
        inner: world(),
        poison: "100.64.0.2".to_string(),
    });
    let pipeline = fx.pipeline(resolver, 10, 4);

    let summary = pipeline.run(&ShutdownController::new()).await.unwrap();

    assert_eq!(summary.counters, ProcessingCounters::new(4, 1));
    let ips: HashSet<String> = fx.rows().into_iter().map(|r| r.ip).collect();
    assert_eq!(ips.len(), 4);
    assert!(!ips.contains("100.64.0.2"));
}

#[tokio::test]
async fn test_interrupt_finishes_current_batch_then_stops() {
    let ips: Vec<String> = (0..200u32)
        .map(|i| format!("100.64.{}.{}", i / 100, i % 100))
        .collect();
    let refs: Vec<&str> = ips.iter().map(String::as_str).collect();
    let fx = Fixture::new(&refs);

    let shutdown = ShutdownController::new();
    let resolver = Arc::new(InterruptingResolver {
        inner: world(),
        shutdown: shutdown.clone(),
    });
    let pipeline = fx.pipeline(resolver, 25, 5);

    let summary = pipeline.run(&shutdown).await.unwrap();

    assert!(summary.interrupted);
    assert!(!summary.is_success());
    assert_eq!(summary.batches, 1);
    assert_eq!(summary.counters, ProcessingCounters::new(25, 0));
    assert_eq!(fx.rows().len(), 25);
}

#[tokio::test]
async fn test_second_run_appends_without_new_header() {
    let fx = Fixture::new(&["8.8.8.8", "1.1.1.1"]);

    fx.pipeline(world(), 10, 2)
        .run(&ShutdownController::new())
        .await
        .unwrap();
    fx.pipeline(world(), 10, 2)
        .run(&ShutdownController::new())
        .await
        .unwrap();

    let lines = fx.lines();
    assert_eq!(lines.iter().filter(|l| l.as_str() == HEADER).count(), 1);
    assert_eq!(lines.len(), 5);
}

#[tokio::test]
async fn test_missing_source_database_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.csv");
    let pipeline = Pipeline::new(
        Arc::new(SqliteIpSource::new(dir.path().join("missing.db"))),
        world(),
        Arc::new(CsvResultSink::open(&out).unwrap()),
        PipelineOptions::default(),
    );

    let err = pipeline.run(&ShutdownController::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Source(SourceError::Connection(_))));
    assert!(read_rows(&out).is_empty());
}

#[tokio::test]
async fn test_missing_collection_is_fatal() {
    let fx = Fixture::new(&["8.8.8.8"]);
    let sink = CsvResultSink::open(&fx.out_path).unwrap();
    let pipeline = Pipeline::new(
        Arc::new(SqliteIpSource::new(&fx.db_path)),
        world(),
        Arc::new(sink),
        PipelineOptions {
            collection: "visits".to_string(),
            ..Default::default()
        },
    );

    let err = pipeline.run(&ShutdownController::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Source(SourceError::Query(_))));
    assert!(fx.dir.path().exists());
}

#[tokio::test]
async fn test_failed_sink_write_drops_only_that_batch() {
    let ips: Vec<String> = (0..6u32).map(|i| format!("100.64.0.{}", i)).collect();
    let refs: Vec<&str> = ips.iter().map(String::as_str).collect();
    let fx = Fixture::new(&refs);

    let bytes = Arc::new(Mutex::new(Vec::new()));
    // the second batch's write fails halfway through
    let sink = CsvResultSink::with_storage(FlakyStorage {
        bytes: bytes.clone(),
        appends: 0,
        fail_on: 2,
    })
    .unwrap();
    let pipeline = Pipeline::new(
        Arc::new(SqliteIpSource::new(&fx.db_path)),
        world(),
        Arc::new(sink),
        PipelineOptions {
            collection: "summary".to_string(),
            batch_size: 2,
            max_workers: 4,
        },
    );

    let summary = pipeline.run(&ShutdownController::new()).await.unwrap();

    assert!(summary.is_success());
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.counters, ProcessingCounters::new(6, 0));

    let data = bytes.lock().clone();
    let text = String::from_utf8(data.clone()).unwrap();
    assert_eq!(text.lines().filter(|l| *l == HEADER).count(), 1);

    let mut reader = csv::Reader::from_reader(data.as_slice());
    let rows: Vec<LocationRecord> = reader.deserialize().map(Result::unwrap).collect();
    // batches one and three survive
    assert_eq!(rows.len(), 4);
    let written: HashSet<&str> = rows.iter().map(|r| r.ip.as_str()).collect();
    assert_eq!(written.len(), 4);
    assert!(written.iter().all(|ip| refs.contains(ip)));
}
