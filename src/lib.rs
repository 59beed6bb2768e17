//! Harvest OD
//!
//! Turns a harvest-volume raster into point origins and computes an
//! origin-destination cost matrix over a PostGIS/pgRouting road network.
//!
//! # Architecture
//!
//! - **Raster**: threshold, 8-connected labelling and zonal statistics
//! - **I/O**: GeoTIFF reading and versioned origins/destinations CSVs
//! - **DB**: connection handling, loaders and SQL for the geometry store
//! - **Pipeline**: partitioned routing on dedicated connections with metrics
//!
//! # Usage
//!
//! ```no_run
//! use harvest_od::{run_routing, Config};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"harvest-od.yaml".into())?;
//!     run_routing(&config, CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod io;
pub mod pipeline;
pub mod raster;

pub use config::{Config, ExtractionConfig, RoutingConfig};
pub use db::{Database, PgConnectionFactory, PgCostMatrixStore};
pub use io::{read_raster, Origin, OriginSchema, OriginWriter};
pub use pipeline::{Metrics, RoutingStats, Scheduler, SchedulerConfig};
pub use raster::{extract_regions, CoordinateProjector, PixelAnchor, Raster, Region};

use anyhow::{Context, Result};
use db::postgres::RoutingTables;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Extract one origin per connected region of `input` and write them to `output`.
///
/// Returns the number of origins written. An all-background raster writes a
/// header-only file.
pub fn extract_origins(input: &Path, output: &Path, config: &ExtractionConfig) -> Result<usize> {
    let raster = read_raster(input)?;
    let regions = extract_regions(&raster, config.threshold)
        .with_context(|| format!("Failed to extract regions from {}", input.display()))?;
    if regions.is_empty() {
        tracing::warn!(
            "No cells above threshold {} in {}",
            config.threshold,
            input.display()
        );
    }

    let projector = CoordinateProjector::new(raster.transform, config.pixel_anchor);
    let origins = io::origins_from_regions(&regions, &projector);

    let mut writer = OriginWriter::create(output, config.schema)?;
    for origin in &origins {
        writer.write(origin)?;
    }
    let written = writer.finish()?;

    tracing::info!("Wrote {} origins to {}", written, output.display());
    Ok(written)
}

/// Route every pending origin-destination pair and persist the cost matrix.
pub async fn run_routing(config: &Config, cancel: CancellationToken) -> Result<RoutingStats> {
    config.validate()?;

    let database = Database::parse(config.database_url()?)?;
    tracing::info!("Starting OD routing against {}", database.redacted());

    let routing = &config.routing;
    let routing_sql = std::fs::read_to_string(&routing.routing_sql)
        .with_context(|| format!("Cannot read routing query {}", routing.routing_sql.display()))?;
    if routing_sql.trim().is_empty() {
        anyhow::bail!("Routing query {} is empty", routing.routing_sql.display());
    }

    let tables = RoutingTables::from_config(config);
    let factory = Arc::new(PgConnectionFactory::new(database.clone(), routing_sql, &tables));
    let store = Arc::new(PgCostMatrixStore::connect(&database, config).await?);

    let scheduler_config = SchedulerConfig {
        n_workers: routing.n_processes,
        strategy: routing.strategy,
        unit_timeout: routing.chunk_timeout_secs.map(Duration::from_secs),
        retry: routing.retry.clone(),
        enable_metrics: config.metrics.enable,
        metrics_interval_secs: config.metrics.interval_secs,
        metrics_output_path: config.metrics.output_path.clone(),
        output_csv: routing.output_csv.clone(),
    };

    let scheduler = Scheduler::new(factory, store, Metrics::new(), scheduler_config, cancel);
    let stats = scheduler.run().await?;

    tracing::info!("Routing complete: {}", stats);
    Ok(stats)
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}

/// Initialize the Rayon thread pool used for raster statistics.
pub fn init_rayon(threads: Option<usize>) -> Result<()> {
    if let Some(threads) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }
    Ok(())
}
