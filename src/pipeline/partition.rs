//! Static assignment of pending pairs to work units.

use super::types::OdPair;
use serde::{Deserialize, Serialize};

/// How pending work is divided among workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionStrategy {
    /// Round-robin pending node pairs into N numbered chunks
    #[default]
    NodePairs,
    /// One unit per spatial tile containing origins
    Tiles,
}

/// A numbered pile of node pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 1-based chunk id
    pub id: u32,
    pub pairs: Vec<OdPair>,
}

/// Distribute `pending` round-robin over chunks `1..=n`.
///
/// Every pair lands in exactly one chunk. Chunks left empty (fewer pairs than
/// chunks) are not returned.
pub fn partition_pairs(pending: &[OdPair], n: usize) -> Vec<Chunk> {
    let n = n.max(1);
    let mut chunks: Vec<Chunk> = (1..=n)
        .map(|id| Chunk {
            id: id as u32,
            pairs: Vec::with_capacity(pending.len() / n + 1),
        })
        .collect();

    for (i, pair) in pending.iter().enumerate() {
        chunks[i % n].pairs.push(*pair);
    }

    chunks.retain(|chunk| !chunk.pairs.is_empty());
    tracing::debug!(
        "Partitioned {} pairs into {} non-empty chunk(s)",
        pending.len(),
        chunks.len()
    );
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pairs(n: i64) -> Vec<OdPair> {
        (0..n).map(|i| OdPair::new(i, 1000 + i % 3)).collect()
    }

    #[test]
    fn test_partition_union_is_exact() {
        let pending = pairs(103);
        let chunks = partition_pairs(&pending, 8);
        assert_eq!(chunks.len(), 8);

        let mut seen = HashSet::new();
        for chunk in &chunks {
            for pair in &chunk.pairs {
                assert!(seen.insert(*pair), "pair {} assigned twice", pair);
            }
        }
        assert_eq!(seen, pending.iter().copied().collect::<HashSet<_>>());
    }

    #[test]
    fn test_partition_ids_and_balance() {
        let chunks = partition_pairs(&pairs(4), 2);
        let ids: Vec<u32> = chunks.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(chunks[0].pairs, vec![OdPair::new(0, 1000), OdPair::new(2, 1002)]);
        assert_eq!(chunks[1].pairs, vec![OdPair::new(1, 1001), OdPair::new(3, 1000)]);
    }

    #[test]
    fn test_partition_drops_empty_chunks() {
        let chunks = partition_pairs(&pairs(2), 5);
        assert_eq!(chunks.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(partition_pairs(&[], 4).is_empty());
    }

    #[test]
    fn test_partition_zero_workers_treated_as_one() {
        let chunks = partition_pairs(&pairs(3), 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].pairs.len(), 3);
    }
}
