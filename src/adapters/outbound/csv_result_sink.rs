//! CSV Result Sink
//!
//! Implements ResultSink as an append-only CSV table.

use crate::domain::entities::LocationRecord;
use crate::domain::ports::{ResultSink, SinkError};
use csv::WriterBuilder;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Byte store behind a CSV table.
pub trait TableStorage: Send {
    /// Current size in bytes.
    fn size(&self) -> io::Result<u64>;

    /// Append `bytes` at the end and flush them.
    fn append(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Cut the store back to `size` bytes.
    fn truncate(&mut self, size: u64) -> io::Result<()>;
}

impl TableStorage for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)?;
        self.flush()
    }

    fn truncate(&mut self, size: u64) -> io::Result<()> {
        self.set_len(size)
    }
}

/// Encode rows (or the header) into one contiguous CSV chunk.
fn encode<I, R>(rows: I) -> Result<Vec<u8>, SinkError>
where
    I: IntoIterator<Item = R>,
    R: serde::Serialize,
{
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    writer.into_inner().map_err(|e| SinkError::Io(e.into_error()))
}

/// Append-only CSV table of location records.
///
/// The header is written when the table is created (or found empty) and
/// never again. A single mutex serializes all writers. A batch is encoded
/// up front and lands as one chunk; if that write fails the table is cut
/// back to its previous size, so a failed batch leaves no bytes behind.
pub struct CsvResultSink<S = File> {
    storage: Mutex<S>,
}

impl CsvResultSink<File> {
    /// Open (or create) the output table at `path`.
    ///
    /// Missing parent directories are created. Existing content is kept.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if file.size()? == 0 {
            tracing::info!("created output table {}", path.display());
        } else {
            tracing::info!("appending to existing output table {}", path.display());
        }

        Self::with_storage(file)
    }
}

impl<S: TableStorage> CsvResultSink<S> {
    /// Wrap an arbitrary store, writing the header if it is empty.
    pub fn with_storage(mut storage: S) -> Result<Self, SinkError> {
        if storage.size()? == 0 {
            storage.append(&encode([LocationRecord::COLUMNS])?)?;
        }
        Ok(Self {
            storage: Mutex::new(storage),
        })
    }
}

impl<S: TableStorage> ResultSink for CsvResultSink<S> {
    fn append_batch(&self, records: &[LocationRecord]) -> Result<usize, SinkError> {
        if records.is_empty() {
            return Ok(0);
        }

        let chunk = encode(records)?;

        let mut storage = self.storage.lock();
        let size = storage.size()?;
        if let Err(e) = storage.append(&chunk) {
            if let Err(undo) = storage.truncate(size) {
                tracing::error!("could not remove partial batch from output table: {}", undo);
            }
            return Err(e.into());
        }

        Ok(records.len())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(ip: &str) -> LocationRecord {
        LocationRecord::new(ip, "Brazil", "BR", "Sao Paulo", "Sao Paulo")
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// In-memory store whose `fail_on`-th append (0 = header) writes half
    /// its bytes and then errors.
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
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.bytes.lock().extend_from_slice(bytes);
            Ok(())
        }

        fn truncate(&mut self, size: u64) -> io::Result<()> {
            self.bytes.lock().truncate(size as usize);
            Ok(())
        }
    }

    #[test]
    fn test_new_file_gets_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ip_locations.csv");

        CsvResultSink::open(&path).unwrap();
        assert_eq!(read_lines(&path), vec!["ip,country,country_code,region,city"]);
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("nested").join("out.csv");

        CsvResultSink::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_header_written_once_across_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        {
            let sink = CsvResultSink::open(&path).unwrap();
            sink.append_batch(&[record("200.1.1.1")]).unwrap();
        }
        {
            let sink = CsvResultSink::open(&path).unwrap();
            sink.append(&record("200.1.1.2")).unwrap();
        }

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines.iter().filter(|l| l.starts_with("ip,")).count(), 1);
        assert_eq!(lines[1], "200.1.1.1,Brazil,BR,Sao Paulo,Sao Paulo");
    }

    #[test]
    fn test_empty_batch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let sink = CsvResultSink::open(&path).unwrap();

        assert_eq!(sink.append_batch(&[]).unwrap(), 0);
        assert_eq!(read_lines(&path).len(), 1);
    }

    #[test]
    fn test_fields_are_quoted_when_needed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let sink = CsvResultSink::open(&path).unwrap();

        sink.append(&LocationRecord::new(
            "2001:db8::1",
            "Korea, Republic of",
            "KR",
            "Seoul",
            "Seoul",
        ))
        .unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<LocationRecord> = reader.deserialize().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].country, "Korea, Republic of");
    }

    #[test]
    fn test_failed_batch_leaves_table_intact() {
        let bytes = Arc::new(Mutex::new(Vec::new()));
        let sink = CsvResultSink::with_storage(FlakyStorage {
            bytes: bytes.clone(),
            appends: 0,
            fail_on: 1,
        })
        .unwrap();

        let lost: Vec<_> = (0..50).map(|i| record(&format!("10.0.0.{}", i))).collect();
        assert!(matches!(sink.append_batch(&lost), Err(SinkError::Io(_))));
        assert_eq!(
            String::from_utf8(bytes.lock().clone()).unwrap(),
            "ip,country,country_code,region,city\n"
        );

        let kept = [record("10.0.1.1"), record("10.0.1.2")];
        assert_eq!(sink.append_batch(&kept).unwrap(), 2);

        let data = bytes.lock().clone();
        let mut reader = csv::Reader::from_reader(data.as_slice());
        let rows: Vec<LocationRecord> = reader.deserialize().map(Result::unwrap).collect();
        assert_eq!(rows, kept.to_vec());
    }

    #[test]
    fn test_concurrent_writers_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let sink = Arc::new(CsvResultSink::open(&path).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let batch: Vec<_> = (0..4)
                            .map(|j| record(&format!("10.{}.{}.{}", t, i, j)))
                            .collect();
                        sink.append_batch(&batch).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<LocationRecord> = reader.deserialize().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 8 * 50 * 4);
        assert!(rows.iter().all(|r| r.country == "Brazil"));
    }
}
