//! Routing orchestration.
//!
//! A run is partition → workers (×N, concurrently) → aggregation. Work units
//! are fixed before any worker starts and fed through a shared bounded queue;
//! the cost matrix is written only after every worker has returned.

use super::aggregator::ResultAggregator;
use super::metrics::{Metrics, MetricsReporter};
use super::partition::{partition_pairs, PartitionStrategy};
use super::types::WorkUnit;
use super::worker::{RoutingWorker, UnitOutcome, UnitPolicy};
use crate::config::RetryConfig;
use crate::db::{ConnectionFactory, CostMatrixStore};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of workers, each with its own connection
    pub n_workers: usize,

    pub strategy: PartitionStrategy,

    /// Deadline for one attempt at a unit
    pub unit_timeout: Option<Duration>,

    pub retry: RetryConfig,

    /// Enable progress reporting
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after run completes
    pub metrics_output_path: Option<String>,

    /// Optional CSV copy of the inserted rows
    pub output_csv: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            n_workers: 1,
            strategy: PartitionStrategy::default(),
            unit_timeout: None,
            retry: RetryConfig::default(),
            enable_metrics: true,
            metrics_interval_secs: 10,
            metrics_output_path: None,
            output_csv: None,
        }
    }
}

/// Drives one routing run.
pub struct Scheduler {
    factory: Arc<dyn ConnectionFactory>,
    store: Arc<dyn CostMatrixStore>,
    metrics: Arc<Metrics>,
    config: SchedulerConfig,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        store: Arc<dyn CostMatrixStore>,
        metrics: Arc<Metrics>,
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            factory,
            store,
            metrics,
            config,
            cancel,
        }
    }

    /// Run to completion. Rows of completed units are persisted even if other
    /// units failed; the run then returns an error naming the failures.
    pub async fn run(&self) -> Result<RoutingStats> {
        if self.store.ensure_output_table().await? {
            tracing::info!("Created output cost matrix table");
        }

        let units = self.plan().await?;
        let total_units = units.len();
        if units.is_empty() {
            tracing::info!("No pending origin-destination pairs, nothing to route");
            return Ok(RoutingStats::default());
        }

        let n_workers = self.config.n_workers.max(1).min(total_units);
        tracing::info!(
            "Dispatching {} {:?} unit(s) to {} worker(s)",
            total_units,
            self.config.strategy,
            n_workers
        );

        // Start metrics reporter if enabled
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let reporter_handle = if self.config.enable_metrics {
            let reporter = MetricsReporter::new(
                self.metrics.clone(),
                self.config.metrics_interval_secs,
                total_units as u64,
            );
            Some(tokio::spawn(reporter.run(shutdown_rx)))
        } else {
            drop(shutdown_rx);
            None
        };

        // Prefill and close the queue so workers exit once it drains
        let (work_tx, work_rx) = async_channel::bounded::<WorkUnit>(total_units);
        for unit in units {
            work_tx.send(unit).await?;
        }
        work_tx.close();

        let (result_tx, mut result_rx) = mpsc::channel::<UnitOutcome>(n_workers);
        let policy = UnitPolicy {
            timeout: self.config.unit_timeout,
            retry: self.config.retry.clone(),
        };

        let mut handles = Vec::with_capacity(n_workers);
        for id in 0..n_workers {
            let worker = RoutingWorker::new(
                id,
                self.factory.clone(),
                self.metrics.clone(),
                policy.clone(),
                self.cancel.clone(),
            );
            handles.push(tokio::spawn(worker.run(work_rx.clone(), result_tx.clone())));
        }
        drop(result_tx);

        let mut aggregator = ResultAggregator::new(total_units);
        while let Some(outcome) = result_rx.recv().await {
            aggregator.accept(outcome);
        }

        let mut panicked = 0;
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Routing worker panicked: {}", e);
                panicked += 1;
            }
        }

        let persisted = aggregator.persist(self.store.as_ref(), &self.metrics).await;

        // Shutdown metrics reporter
        let _ = shutdown_tx.send(()).await;
        if let Some(handle) = reporter_handle {
            let _ = handle.await;
        }
        let rows_inserted = persisted?;

        if let Some(path) = &self.config.output_csv {
            aggregator.write_csv(path)?;
        }

        let stats = RoutingStats {
            total_units,
            units_completed: aggregator.completed(),
            units_failed: aggregator.failed().len(),
            units_cancelled: aggregator.cancelled().len(),
            rows_inserted,
        };

        if self.config.enable_metrics {
            let reporter = MetricsReporter::new(
                self.metrics.clone(),
                self.config.metrics_interval_secs,
                total_units as u64,
            );
            reporter.print_summary();

            if let Some(ref path) = self.config.metrics_output_path {
                let snapshot = self.metrics.snapshot();
                if let Err(e) = snapshot.save_to_file(path) {
                    tracing::warn!("Failed to save metrics to {}: {}", path, e);
                }
            }
        }

        if let Some((unit, error)) = aggregator.failed().first() {
            anyhow::bail!(
                "{} of {} unit(s) failed ({} rows from completed units were saved); first failure, {}: {:#}",
                stats.units_failed,
                total_units,
                rows_inserted,
                unit,
                error
            );
        }
        if !aggregator.cancelled().is_empty() || self.cancel.is_cancelled() {
            anyhow::bail!(
                "Routing cancelled: {} unit(s) not run ({} rows from completed units were saved)",
                stats.units_cancelled,
                rows_inserted
            );
        }
        if panicked > 0 || stats.units_completed != total_units {
            anyhow::bail!(
                "{} worker(s) panicked; {} of {} unit(s) completed",
                panicked,
                stats.units_completed,
                total_units
            );
        }

        if self.config.strategy == PartitionStrategy::NodePairs {
            self.store.drop_staging().await?;
        }

        Ok(stats)
    }

    /// Fix the work units for this run.
    async fn plan(&self) -> Result<Vec<WorkUnit>> {
        match self.config.strategy {
            PartitionStrategy::NodePairs => {
                let pending = self.store.pending_pairs().await?;
                tracing::info!("Processing {} origin-destination pairs", pending.len());

                let chunks = partition_pairs(&pending, self.config.n_workers);
                if chunks.is_empty() {
                    return Ok(Vec::new());
                }
                let staged = self.store.stage_chunks(&chunks).await?;
                tracing::debug!("Staged {} pair assignments", staged);
                Ok(chunks.iter().map(|chunk| WorkUnit::Chunk(chunk.id)).collect())
            }
            PartitionStrategy::Tiles => {
                let tiles = self.store.pending_tiles().await?;
                tracing::info!("Processing {} tile(s) containing origins", tiles.len());
                Ok(tiles.into_iter().map(WorkUnit::Tile).collect())
            }
        }
    }
}

/// Statistics from a routing run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RoutingStats {
    pub total_units: usize,
    pub units_completed: usize,
    pub units_failed: usize,
    pub units_cancelled: usize,
    pub rows_inserted: u64,
}

impl std::fmt::Display for RoutingStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Completed: {}, Failed: {}, Cancelled: {}, Total: {}, Rows inserted: {}",
            self.units_completed,
            self.units_failed,
            self.units_cancelled,
            self.total_units,
            self.rows_inserted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.n_workers, 1);
        assert_eq!(config.strategy, PartitionStrategy::NodePairs);
        assert!(config.unit_timeout.is_none());
        assert!(config.enable_metrics);
        assert!(config.metrics_output_path.is_none());
    }

    #[test]
    fn test_routing_stats_display() {
        let stats = RoutingStats {
            total_units: 8,
            units_completed: 6,
            units_failed: 1,
            units_cancelled: 1,
            rows_inserted: 420,
        };
        let display = format!("{}", stats);
        assert!(display.contains("Completed: 6"));
        assert!(display.contains("Failed: 1"));
        assert!(display.contains("Rows inserted: 420"));
    }
}
