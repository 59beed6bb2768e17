//! Routing workers.
//!
//! Each worker owns at most one connection at a time and pulls units from a
//! shared queue. A unit's rows are accumulated locally and handed over only
//! once every pair of the unit has been routed; a failing pair discards the
//! whole attempt.

use super::metrics::Metrics;
use super::types::{CostRow, UnitBatch, WorkUnit};
use crate::config::RetryConfig;
use crate::db::{ConnectionFactory, RoutingQuery, WorkerConnection};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Deadline and retry policy applied to every unit.
#[derive(Debug, Clone)]
pub struct UnitPolicy {
    /// Deadline per attempt; `None` waits indefinitely
    pub timeout: Option<Duration>,
    pub retry: RetryConfig,
}

/// What became of one unit.
#[derive(Debug)]
pub enum UnitOutcome {
    Completed(UnitBatch),
    Failed {
        unit: WorkUnit,
        attempts: u32,
        error: anyhow::Error,
    },
    Cancelled(WorkUnit),
}

enum Attempt {
    Done { pairs: usize, rows: Vec<CostRow> },
    Failed(anyhow::Error),
    Cancelled,
}

/// Why an attempt was abandoned before it finished.
enum Interrupted {
    Cancelled,
    TimedOut(Duration),
}

/// A routing worker bound to a connection factory.
pub struct RoutingWorker {
    id: usize,
    factory: Arc<dyn ConnectionFactory>,
    metrics: Arc<Metrics>,
    policy: UnitPolicy,
    cancel: CancellationToken,
}

impl RoutingWorker {
    pub fn new(
        id: usize,
        factory: Arc<dyn ConnectionFactory>,
        metrics: Arc<Metrics>,
        policy: UnitPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            factory,
            metrics,
            policy,
            cancel,
        }
    }

    /// Process units from `queue` until it is drained, sending one outcome per unit.
    pub async fn run(
        self,
        queue: async_channel::Receiver<WorkUnit>,
        results: mpsc::Sender<UnitOutcome>,
    ) {
        let mut connection: Option<Box<dyn WorkerConnection>> = None;

        while let Ok(unit) = queue.recv().await {
            let outcome = if self.cancel.is_cancelled() {
                self.metrics.add_unit_cancelled();
                UnitOutcome::Cancelled(unit)
            } else {
                self.process_unit_with_retry(unit, &mut connection).await
            };

            if results.send(outcome).await.is_err() {
                tracing::debug!("Worker {}: result receiver dropped, stopping", self.id);
                break;
            }
        }
        tracing::debug!("Worker {} finished", self.id);
    }

    /// Process a unit, retrying on a fresh connection with exponential backoff.
    pub async fn process_unit_with_retry(
        &self,
        unit: WorkUnit,
        connection: &mut Option<Box<dyn WorkerConnection>>,
    ) -> UnitOutcome {
        let max_attempts = self.policy.retry.max_attempts.max(1);
        let max_backoff = self.policy.retry.max_backoff_ms;
        let mut backoff = self.policy.retry.initial_backoff_ms;
        let mut attempt = 1;

        loop {
            match self.attempt_unit(unit, connection).await {
                Attempt::Done { pairs, rows } => {
                    self.metrics
                        .add_unit_completed(pairs as u64, rows.len() as u64);
                    return UnitOutcome::Completed(UnitBatch {
                        unit,
                        pairs,
                        attempts: attempt,
                        rows,
                    });
                }
                Attempt::Cancelled => {
                    *connection = None;
                    self.metrics.add_unit_cancelled();
                    return UnitOutcome::Cancelled(unit);
                }
                Attempt::Failed(error) => {
                    // The session may be mid-query; never reuse it
                    *connection = None;

                    if attempt >= max_attempts {
                        tracing::error!(
                            "Worker {}: {} failed after {} attempt(s): {:#}",
                            self.id,
                            unit,
                            attempt,
                            error
                        );
                        self.metrics.add_unit_failed();
                        return UnitOutcome::Failed {
                            unit,
                            attempts: attempt,
                            error,
                        };
                    }

                    tracing::warn!(
                        "Worker {}: {} attempt {} failed: {:#}, retrying in {}ms",
                        self.id,
                        unit,
                        attempt,
                        error,
                        backoff
                    );
                    self.metrics.add_unit_retried();

                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            self.metrics.add_unit_cancelled();
                            return UnitOutcome::Cancelled(unit);
                        }
                        _ = tokio::time::sleep(Duration::from_millis(backoff)) => {}
                    }
                    backoff = backoff.saturating_mul(2).min(max_backoff);
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt_unit(
        &self,
        unit: WorkUnit,
        connection: &mut Option<Box<dyn WorkerConnection>>,
    ) -> Attempt {
        let deadline = self.policy.timeout;

        let result = {
            let work = self.route_unit(unit, connection);
            tokio::select! {
                _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
                result = async move {
                    match deadline {
                        Some(limit) => tokio::time::timeout(limit, work)
                            .await
                            .map_err(|_| Interrupted::TimedOut(limit)),
                        None => Ok(work.await),
                    }
                } => result,
            }
        };

        match result {
            Ok(Ok((pairs, rows))) => Attempt::Done { pairs, rows },
            Ok(Err(error)) => Attempt::Failed(error),
            Err(interrupted) => {
                self.cancel_running_query(connection).await;
                match interrupted {
                    Interrupted::Cancelled => Attempt::Cancelled,
                    Interrupted::TimedOut(limit) => {
                        Attempt::Failed(anyhow::anyhow!("{} timed out after {:?}", unit, limit))
                    }
                }
            }
        }
    }

    /// Stop the server-side query abandoned by an interrupted attempt.
    async fn cancel_running_query(&self, connection: &mut Option<Box<dyn WorkerConnection>>) {
        let Some(conn) = connection.as_mut() else {
            return;
        };
        if let Err(e) = conn.cancel_query().await {
            tracing::warn!("Worker {}: {:#}", self.id, e);
        }
    }

    /// Route every pair of `unit` into a unit-local accumulator.
    async fn route_unit(
        &self,
        unit: WorkUnit,
        connection: &mut Option<Box<dyn WorkerConnection>>,
    ) -> Result<(usize, Vec<CostRow>)> {
        if connection.is_none() {
            *connection = Some(self.open_connection().await?);
        }
        let conn = connection
            .as_mut()
            .context("Worker connection unavailable")?;

        let pairs = conn.assigned_pairs(unit).await?;
        tracing::info!("Worker {}: routing {} pairs of {}", self.id, pairs.len(), unit);

        let mut rows = Vec::new();
        for pair in &pairs {
            let start = Instant::now();
            let result = conn
                .execute(*pair)
                .await
                .with_context(|| format!("{} failed at pair {}", unit, pair))?;
            tracing::debug!("Worker {}: {} -> {} row(s)", self.id, pair, result.len());
            self.metrics.add_query_time(start.elapsed());
            rows.extend(result);
        }

        Ok((pairs.len(), rows))
    }

    async fn open_connection(&self) -> Result<Box<dyn WorkerConnection>> {
        let mut conn = self
            .factory
            .connect()
            .await
            .with_context(|| format!("Worker {} failed to connect", self.id))?;
        conn.disable_parallel_query().await?;
        self.metrics.add_connection_opened();
        Ok(conn)
    }
}
