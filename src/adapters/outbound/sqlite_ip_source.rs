//! SQLite Distinct-IP Source
//!
//! Implements DistinctIpSource over a SQLite file. Each "collection" is a
//! table with an `ip` column; deduplication is done by `SELECT DISTINCT`.

use crate::domain::ports::{DistinctIpSource, IpStream, SourceError, SourceInfo};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};

/// Rows buffered between the reader thread and the batch streamer.
const ROW_BUFFER: usize = 1024;

/// SQLite-backed distinct-IP source.
///
/// The database is opened read-only; a missing file is a connection error.
pub struct SqliteIpSource {
    db_path: PathBuf,
}

impl SqliteIpSource {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    fn open(db_path: &Path) -> Result<Connection, SourceError> {
        Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| SourceError::Connection(format!("{}: {}", db_path.display(), e)))
    }

    fn load_info(db_path: &Path) -> Result<SourceInfo, SourceError> {
        let conn = Self::open(db_path)?;

        let server_version: String = conn
            .query_row("SELECT sqlite_version()", [], |row| row.get(0))
            .map_err(|e| SourceError::Connection(e.to_string()))?;

        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .map_err(|e| SourceError::Query(e.to_string()))?;
        let collections = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| SourceError::Query(e.to_string()))?;

        Ok(SourceInfo {
            server_version,
            collections,
        })
    }

    /// Run the distinct query, pushing rows into `tx`.
    ///
    /// `ready` resolves once the statement is prepared so that setup errors
    /// are reported before any row is streamed.
    fn stream_rows(
        db_path: &Path,
        table: &str,
        ready: oneshot::Sender<Result<(), SourceError>>,
        tx: mpsc::Sender<Result<String, SourceError>>,
    ) {
        let conn = match Self::open(db_path) {
            Ok(conn) => conn,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        let sql = format!("SELECT DISTINCT ip FROM \"{}\" WHERE ip IS NOT NULL", table);
        let mut stmt = match conn.prepare(&sql) {
            Ok(stmt) => stmt,
            Err(e) => {
                let _ = ready.send(Err(SourceError::Query(e.to_string())));
                return;
            }
        };
        let mut rows = match stmt.query([]) {
            Ok(rows) => rows,
            Err(e) => {
                let _ = ready.send(Err(SourceError::Query(e.to_string())));
                return;
            }
        };

        if ready.send(Ok(())).is_err() {
            return;
        }

        loop {
            let item = match rows.next() {
                Ok(Some(row)) => match row.get_ref(0) {
                    Ok(ValueRef::Text(bytes)) => Ok(String::from_utf8_lossy(bytes).into_owned()),
                    Ok(other) => {
                        tracing::debug!("skipping non-text ip value of type {}", other.data_type());
                        continue;
                    }
                    Err(e) => Err(SourceError::Query(e.to_string())),
                },
                Ok(None) => break,
                Err(e) => Err(SourceError::Query(e.to_string())),
            };

            let failed = item.is_err();
            // receiver dropped: the consumer stopped reading
            if tx.blocking_send(item).is_err() || failed {
                break;
            }
        }
    }
}

/// Table names are spliced into SQL, so only plain identifiers are allowed.
pub(crate) fn validate_collection(name: &str) -> Result<(), SourceError> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SourceError::InvalidCollection(name.to_string()))
    }
}

#[async_trait]
impl DistinctIpSource for SqliteIpSource {
    async fn ping(&self) -> Result<SourceInfo, SourceError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || Self::load_info(&db_path))
            .await
            .map_err(|e| SourceError::Connection(format!("spawn_blocking error: {}", e)))?
    }

    async fn distinct_ips(&self, collection: &str) -> Result<IpStream, SourceError> {
        validate_collection(collection)?;

        let db_path = self.db_path.clone();
        let table = collection.to_string();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel(ROW_BUFFER);

        tokio::task::spawn_blocking(move || Self::stream_rows(&db_path, &table, ready_tx, tx));

        ready_rx
            .await
            .map_err(|_| SourceError::Connection("sqlite reader exited early".to_string()))??;

        tracing::info!(
            "streaming distinct IPs from {}:{}",
            self.db_path.display(),
            collection
        );

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }
}
