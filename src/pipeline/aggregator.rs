//! Collects unit results and persists them once all workers are done.

use super::metrics::Metrics;
use super::types::{CostRow, CostValue, WorkUnit};
use super::worker::UnitOutcome;
use crate::db::CostMatrixStore;
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Instant;

/// Accumulates completed unit batches in arrival order.
///
/// Every row is kept; a repeated pair key is left for the cost matrix's
/// primary key to reject.
pub struct ResultAggregator {
    total_units: usize,
    rows: Vec<CostRow>,
    completed: usize,
    failed: Vec<(WorkUnit, anyhow::Error)>,
    cancelled: Vec<WorkUnit>,
}

impl ResultAggregator {
    pub fn new(total_units: usize) -> Self {
        Self {
            total_units,
            rows: Vec::new(),
            completed: 0,
            failed: Vec::new(),
            cancelled: Vec::new(),
        }
    }

    /// Take ownership of one unit's outcome.
    pub fn accept(&mut self, outcome: UnitOutcome) {
        match outcome {
            UnitOutcome::Completed(batch) => {
                self.completed += 1;
                let fetched = batch.rows.len();
                self.rows.extend(batch.rows);
                tracing::info!(
                    "[{}/{}] {} complete: {} pairs, {} rows, {} attempt(s)",
                    self.done(),
                    self.total_units,
                    batch.unit,
                    batch.pairs,
                    fetched,
                    batch.attempts
                );
            }
            UnitOutcome::Failed { unit, attempts, error } => {
                tracing::error!(
                    "[{}/{}] {} failed after {} attempt(s)",
                    self.done() + 1,
                    self.total_units,
                    unit,
                    attempts
                );
                self.failed.push((unit, error));
            }
            UnitOutcome::Cancelled(unit) => {
                tracing::warn!("{} cancelled", unit);
                self.cancelled.push(unit);
            }
        }
    }

    /// Units accounted for so far.
    pub fn done(&self) -> usize {
        self.completed + self.failed.len() + self.cancelled.len()
    }

    pub fn rows(&self) -> &[CostRow] {
        &self.rows
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn failed(&self) -> &[(WorkUnit, anyhow::Error)] {
        &self.failed
    }

    pub fn cancelled(&self) -> &[WorkUnit] {
        &self.cancelled
    }

    /// Verify all rows share one column count.
    pub fn check_arity(&self) -> Result<Option<usize>> {
        let Some(first) = self.rows.first() else {
            return Ok(None);
        };
        let arity = first.arity();
        if let Some(row) = self.rows.iter().find(|row| row.arity() != arity) {
            anyhow::bail!(
                "Routing rows have inconsistent column counts: {} has {}, expected {}",
                row.key(),
                row.arity(),
                arity
            );
        }
        Ok(Some(arity))
    }

    /// Bulk insert every accumulated row in one transaction.
    pub async fn persist(&self, store: &dyn CostMatrixStore, metrics: &Metrics) -> Result<u64> {
        if self.rows.is_empty() {
            tracing::info!("No routing rows to insert");
            return Ok(0);
        }
        self.check_arity()?;

        let start = Instant::now();
        let inserted = store
            .insert_rows(&self.rows)
            .await
            .context("Failed to persist cost matrix rows")?;
        metrics.add_rows_inserted(inserted, start.elapsed());
        tracing::info!("Inserted {} rows in {:.1}s", inserted, start.elapsed().as_secs_f64());
        Ok(inserted)
    }

    /// Write the collected rows to a headerless CSV file, one row per line.
    pub fn write_csv(&self, path: &Path) -> Result<usize> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)
            .with_context(|| format!("Cannot create cost matrix file {}", path.display()))?;
        for row in &self.rows {
            let record: Vec<String> = row.values().map(|v| csv_field(&v)).collect();
            writer.write_record(&record)?;
        }
        writer.flush()?;
        tracing::info!("Wrote {} rows to {}", self.rows.len(), path.display());
        Ok(self.rows.len())
    }
}

fn csv_field(value: &CostValue) -> String {
    match value {
        CostValue::Null => String::new(),
        CostValue::Int(v) => v.to_string(),
        CostValue::Float(v) => v.to_string(),
        CostValue::Bool(v) => v.to_string(),
        CostValue::Text(v) => v.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{OdPair, UnitBatch};

    fn row(o: i64, d: i64, cost: f64) -> CostRow {
        CostRow {
            origin_node_id: o,
            destination_node_id: d,
            costs: vec![CostValue::Float(cost)],
        }
    }

    fn completed(unit: WorkUnit, rows: Vec<CostRow>) -> UnitOutcome {
        UnitOutcome::Completed(UnitBatch {
            unit,
            pairs: rows.len(),
            attempts: 1,
            rows,
        })
    }

    #[test]
    fn test_accept_in_arrival_order() {
        let mut aggregator = ResultAggregator::new(3);
        aggregator.accept(completed(WorkUnit::Chunk(2), vec![row(3, 9, 1.0)]));
        aggregator.accept(completed(WorkUnit::Chunk(1), vec![row(1, 9, 2.0), row(2, 9, 3.0)]));
        aggregator.accept(UnitOutcome::Failed {
            unit: WorkUnit::Chunk(3),
            attempts: 2,
            error: anyhow::anyhow!("boom"),
        });

        assert_eq!(aggregator.done(), 3);
        assert_eq!(aggregator.completed(), 2);
        assert_eq!(aggregator.failed().len(), 1);
        let keys: Vec<OdPair> = aggregator.rows().iter().map(CostRow::key).collect();
        assert_eq!(keys, vec![OdPair::new(3, 9), OdPair::new(1, 9), OdPair::new(2, 9)]);
    }

    #[test]
    fn test_rows_sharing_a_pair_are_all_kept() {
        let mut aggregator = ResultAggregator::new(2);
        aggregator.accept(completed(WorkUnit::Tile(1), vec![row(1, 9, 2.0), row(1, 9, 3.0)]));
        aggregator.accept(completed(WorkUnit::Tile(2), vec![row(1, 9, 5.0)]));
        let costs: Vec<CostValue> = aggregator
            .rows()
            .iter()
            .flat_map(|r| r.costs.clone())
            .collect();
        assert_eq!(
            costs,
            vec![CostValue::Float(2.0), CostValue::Float(3.0), CostValue::Float(5.0)]
        );
    }

    #[test]
    fn test_inconsistent_arity() {
        let mut aggregator = ResultAggregator::new(1);
        let mut short = row(2, 9, 1.0);
        short.costs.clear();
        aggregator.accept(completed(WorkUnit::Chunk(1), vec![row(1, 9, 1.0), short]));
        assert!(aggregator.check_arity().is_err());

        let empty = ResultAggregator::new(0);
        assert_eq!(empty.check_arity().unwrap(), None);
    }

    #[test]
    fn test_write_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matrix.csv");
        let mut aggregator = ResultAggregator::new(1);
        aggregator.accept(completed(
            WorkUnit::Chunk(1),
            vec![CostRow {
                origin_node_id: 1,
                destination_node_id: 2,
                costs: vec![CostValue::Float(10.5), CostValue::Null, CostValue::Text("rail".into())],
            }],
        ));
        assert_eq!(aggregator.write_csv(&path).unwrap(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1,2,10.5,,rail\n");
    }
}
