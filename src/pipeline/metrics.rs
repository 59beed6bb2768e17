//! Routing progress and throughput metrics.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for a routing run.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Units whose rows were handed to the aggregator
    pub units_completed: AtomicU64,

    /// Units that exhausted their attempts
    pub units_failed: AtomicU64,

    /// Unit attempts that were retried
    pub units_retried: AtomicU64,

    /// Units abandoned on cancellation
    pub units_cancelled: AtomicU64,

    /// Worker connections opened
    pub connections_opened: AtomicU64,

    /// Pairs of completed units; attempts that were discarded do not count
    pub pairs_routed: AtomicU64,

    /// Result rows of completed units
    pub rows_fetched: AtomicU64,

    /// Rows written to the cost matrix
    pub rows_inserted: AtomicU64,

    /// Time spent in routing queries, discarded attempts included
    /// (microseconds, summed over workers)
    pub query_us: AtomicU64,

    /// Time spent in the bulk insert (microseconds)
    pub insert_us: AtomicU64,

    start_time: Option<Instant>,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    /// Record a completed unit with the pairs it routed and the rows they returned.
    pub fn add_unit_completed(&self, pairs: u64, rows: u64) {
        self.units_completed.fetch_add(1, Ordering::Relaxed);
        self.pairs_routed.fetch_add(pairs, Ordering::Relaxed);
        self.rows_fetched.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn add_unit_failed(&self) {
        self.units_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_unit_retried(&self) {
        self.units_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_unit_cancelled(&self) {
        self.units_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_query_time(&self, duration: Duration) {
        self.query_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn add_rows_inserted(&self, rows: u64, duration: Duration) {
        self.rows_inserted.fetch_add(rows, Ordering::Relaxed);
        self.insert_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    pub fn pairs_per_second(&self) -> f64 {
        let pairs = self.pairs_routed.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            pairs as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            units_completed: self.units_completed.load(Ordering::Relaxed),
            units_failed: self.units_failed.load(Ordering::Relaxed),
            units_retried: self.units_retried.load(Ordering::Relaxed),
            units_cancelled: self.units_cancelled.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            pairs_routed: self.pairs_routed.load(Ordering::Relaxed),
            rows_fetched: self.rows_fetched.load(Ordering::Relaxed),
            rows_inserted: self.rows_inserted.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            pairs_per_second: self.pairs_per_second(),
            query_secs: self.query_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            insert_secs: self.insert_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub units_completed: u64,
    pub units_failed: u64,
    pub units_retried: u64,
    pub units_cancelled: u64,
    pub connections_opened: u64,
    pub pairs_routed: u64,
    pub rows_fetched: u64,
    pub rows_inserted: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub pairs_per_second: f64,
    /// Routing query time summed across workers
    pub query_secs: f64,
    pub insert_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }

    /// Units finished either way.
    pub fn units_done(&self) -> u64 {
        self.units_completed + self.units_failed + self.units_cancelled
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Units: {} completed, {} failed, {} retried | Pairs: {} @ {:.1}/s | \
             Rows: {} fetched, {} inserted | Query: {:.1}s | Elapsed: {:.1}s",
            self.units_completed,
            self.units_failed,
            self.units_retried,
            self.pairs_routed,
            self.pairs_per_second,
            self.rows_fetched,
            self.rows_inserted,
            self.query_secs,
            self.elapsed.as_secs_f64(),
        )
    }
}

/// Periodic metrics reporter.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
    total_units: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64, total_units: u64) -> Self {
        Self {
            metrics,
            interval_secs,
            total_units,
        }
    }

    fn progress(&self, snapshot: &MetricsSnapshot) -> f64 {
        if self.total_units > 0 {
            snapshot.units_done() as f64 / self.total_units as f64 * 100.0
        } else {
            0.0
        }
    }

    /// Log a snapshot every interval until `shutdown` fires.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs.max(1)));
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.metrics.snapshot();
                    tracing::info!("[{:.1}%] {}", self.progress(&snapshot), snapshot);
                }
                _ = shutdown.recv() => {
                    let snapshot = self.metrics.snapshot();
                    tracing::info!("Final: {}", snapshot);
                    break;
                }
            }
        }
    }

    /// Print a final summary.
    pub fn print_summary(&self) {
        let snapshot = self.metrics.snapshot();

        println!("\n=== Routing Summary ===");
        println!("Total time: {:.1}s", snapshot.elapsed.as_secs_f64());
        println!(
            "Units: {}/{} completed, {} failed, {} cancelled",
            snapshot.units_completed, self.total_units, snapshot.units_failed, snapshot.units_cancelled
        );
        println!("Retried attempts: {}", snapshot.units_retried);
        println!("Connections opened: {}", snapshot.connections_opened);
        println!("Pairs routed: {}", snapshot.pairs_routed);
        println!("Rows fetched: {}", snapshot.rows_fetched);
        println!("Rows inserted: {}", snapshot.rows_inserted);
        println!("Routing rate: {:.1} pairs/s", snapshot.pairs_per_second);
        println!("Query time: {:.1}s (summed over workers)", snapshot.query_secs);
        println!("Insert time: {:.1}s", snapshot.insert_secs);
        println!("=======================\n");
    }
}
