//! ipgeo-batch - Distinct IP geolocation pipeline
//!
//! This is the composition root that wires together all the components.

use anyhow::Context;
use ipgeo_batch::adapters::outbound::{
    redact_uri, CsvResultSink, MaxMindGeoResolver, MongoIpSource, SqliteIpSource,
};
use ipgeo_batch::config::{load_config, SourceKind};
use ipgeo_batch::domain::ports::{DistinctIpSource, GeoResolver, ResultSink};
use ipgeo_batch::infrastructure::{shutdown_signal, ShutdownController};
use ipgeo_batch::Pipeline;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let started = Instant::now();

    // Load configuration from environment
    let cfg = load_config()?;
    cfg.validate()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting ipgeo-batch source={:?} collection={} batch_size={} max_workers={}",
        cfg.source,
        cfg.collection,
        cfg.batch_size,
        cfg.max_workers
    );

    let shutdown = ShutdownController::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    // ===== COMPOSITION ROOT =====

    // 1. Distinct-IP source
    let source: Arc<dyn DistinctIpSource> = match cfg.source {
        SourceKind::MongoDb => {
            match MongoIpSource::connect(&cfg.mongo_uri, &cfg.mongo_db).await {
                Ok(source) => Arc::new(source),
                Err(e) => {
                    tracing::error!("cannot connect to {}: {}", redact_uri(&cfg.mongo_uri), e);
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        SourceKind::Sqlite => Arc::new(SqliteIpSource::new(&cfg.sqlite_path)),
    };

    // Fail fast before the lookup database is loaded
    match source.ping().await {
        Ok(info) => {
            tracing::info!("source server version {}", info.server_version);
            if info.collections.is_empty() {
                tracing::info!("no collections found");
            } else {
                tracing::info!("collections: {}", info.collections.join(", "));
            }
        }
        Err(e) => {
            tracing::error!("source connection failed: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    }

    // 2. GeoIP resolver, opened once and shared by all workers
    let resolver: Arc<dyn GeoResolver> = Arc::new(
        MaxMindGeoResolver::from_file(&cfg.geoip_path)
            .with_context(|| format!("loading GeoIP database {}", cfg.geoip_path))?,
    );

    // 3. Output table
    let sink: Arc<dyn ResultSink> = Arc::new(
        CsvResultSink::open(&cfg.output_path)
            .with_context(|| format!("opening output table {}", cfg.output_path))?,
    );

    // 4. Run
    let pipeline = Pipeline::new(source, resolver, sink, cfg.pipeline_options());
    let code = match pipeline.run(&shutdown).await {
        Ok(summary) if summary.is_success() => {
            tracing::info!(
                "IP location processing finished: {} resolved, {} failed",
                summary.counters.processed,
                summary.counters.failed
            );
            ExitCode::SUCCESS
        }
        Ok(summary) => {
            tracing::warn!(
                "IP location processing interrupted after {} batches: {} resolved, {} failed",
                summary.batches,
                summary.counters.processed,
                summary.counters.failed
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("IP location processing failed: {}", e);
            ExitCode::FAILURE
        }
    };

    tracing::info!(
        "process finished in {:.2} seconds",
        started.elapsed().as_secs_f64()
    );
    Ok(code)
}
