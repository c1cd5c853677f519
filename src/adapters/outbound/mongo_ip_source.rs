//! MongoDB Distinct-IP Source
//!
//! Implements DistinctIpSource with a `$group` aggregation over the `ip`
//! field. The server deduplicates (spilling to disk when needed) and the
//! cursor is consumed lazily, so the client never holds the full set.

use crate::domain::ports::{DistinctIpSource, IpStream, SourceError, SourceInfo};
use async_trait::async_trait;
use futures::future;
use futures::stream::StreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::ClientOptions;
use mongodb::Client;
use std::time::Duration;

/// Documents requested per cursor round-trip.
const CURSOR_BATCH: u32 = 10_000;

const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// MongoDB-backed distinct-IP source.
pub struct MongoIpSource {
    client: Client,
    database: String,
}

impl MongoIpSource {
    /// Build a client for `uri`.
    ///
    /// The driver connects lazily; reachability is verified by `ping`.
    pub async fn connect(uri: &str, database: &str) -> Result<Self, SourceError> {
        tracing::info!("connecting to MongoDB {} (db={})", redact_uri(uri), database);

        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| SourceError::Connection(e.to_string()))?;
        options.app_name = Some("ipgeo-batch".to_string());
        if options.server_selection_timeout.is_none() {
            options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);
        }

        let client =
            Client::with_options(options).map_err(|e| SourceError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            database: database.to_string(),
        })
    }
}

/// Classify a driver error: unreachable servers are fatal connection
/// failures, everything else is a query failure.
fn classify(err: MongoError) -> SourceError {
    match *err.kind {
        ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) => {
            SourceError::Connection(err.to_string())
        }
        _ => SourceError::Query(err.to_string()),
    }
}

/// Extract the grouped IP from an aggregation result document.
fn ip_from_group(doc: &Document) -> Option<String> {
    match doc.get("_id") {
        Some(Bson::String(ip)) => Some(ip.clone()),
        other => {
            tracing::debug!("skipping non-string ip group key: {:?}", other);
            None
        }
    }
}

/// Hide credentials in a connection string before it is logged.
///
/// Only the authority (between `://` and the first `/` or `?`) is searched
/// for user info.
pub fn redact_uri(uri: &str) -> String {
    let Some(scheme_end) = uri.find("://") else {
        return uri.to_string();
    };
    let authority_start = scheme_end + 3;
    let rest = &uri[authority_start..];
    let authority = rest.find(|c: char| c == '/' || c == '?').map_or(rest, |end| &rest[..end]);

    match authority.rfind('@') {
        Some(at) => format!(
            "{}://***{}",
            &uri[..scheme_end],
            &uri[authority_start + at..]
        ),
        None => uri.to_string(),
    }
}

#[async_trait]
impl DistinctIpSource for MongoIpSource {
    async fn ping(&self) -> Result<SourceInfo, SourceError> {
        let db = self.client.database(&self.database);

        db.run_command(doc! { "ping": 1 }).await.map_err(classify)?;

        let build_info = db
            .run_command(doc! { "buildInfo": 1 })
            .await
            .map_err(classify)?;
        let server_version = build_info
            .get_str("version")
            .unwrap_or("unknown")
            .to_string();

        let collections = db.list_collection_names().await.map_err(classify)?;

        Ok(SourceInfo {
            server_version,
            collections,
        })
    }

    async fn distinct_ips(&self, collection: &str) -> Result<IpStream, SourceError> {
        if collection.is_empty() || collection.contains('$') || collection.contains('\0') {
            return Err(SourceError::InvalidCollection(collection.to_string()));
        }

        tracing::info!("streaming distinct IPs from collection {}", collection);

        let cursor = self
            .client
            .database(&self.database)
            .collection::<Document>(collection)
            .aggregate(vec![doc! { "$group": { "_id": "$ip" } }])
            .allow_disk_use(true)
            .batch_size(CURSOR_BATCH)
            .await
            .map_err(classify)?;

        let stream = cursor.filter_map(|item| {
            future::ready(match item {
                Ok(doc) => ip_from_group(&doc).map(Ok),
                Err(e) => Some(Err(classify(e))),
            })
        });

        Ok(stream.boxed())
    }
}
