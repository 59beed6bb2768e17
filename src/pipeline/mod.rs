//! Parallel origin-destination routing.

pub mod aggregator;
pub mod metrics;
pub mod partition;
pub mod scheduler;
pub mod types;
pub mod worker;


pub use aggregator::ResultAggregator;
pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use partition::{partition_pairs, Chunk, PartitionStrategy};
pub use scheduler::{RoutingStats, Scheduler, SchedulerConfig};
pub use types::{CostRow, CostValue, OdPair, UnitBatch, WorkUnit};
pub use worker::{RoutingWorker, UnitOutcome, UnitPolicy};
