//! Work items and result rows exchanged between routing stages.

use std::fmt;

/// An origin-destination pair of network node ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OdPair {
    pub origin_node_id: i64,
    pub destination_node_id: i64,
}

impl OdPair {
    pub fn new(origin_node_id: i64, destination_node_id: i64) -> Self {
        Self {
            origin_node_id,
            destination_node_id,
        }
    }
}

impl fmt::Display for OdPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} -> {})", self.origin_node_id, self.destination_node_id)
    }
}

/// A statically assigned unit of routing work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkUnit {
    /// Node-pair chunk, ids 1..=N
    Chunk(u32),
    /// Spatial tile id
    Tile(i64),
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkUnit::Chunk(id) => write!(f, "chunk {}", id),
            WorkUnit::Tile(id) => write!(f, "tile {}", id),
        }
    }
}

/// One opaque column value of a routing result row.
#[derive(Debug, Clone, PartialEq)]
pub enum CostValue {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

/// A routing result row: the pair's node ids followed by cost fields in query order.
#[derive(Debug, Clone, PartialEq)]
pub struct CostRow {
    pub origin_node_id: i64,
    pub destination_node_id: i64,
    pub costs: Vec<CostValue>,
}

impl CostRow {
    pub fn key(&self) -> OdPair {
        OdPair::new(self.origin_node_id, self.destination_node_id)
    }

    /// Total column count including the two id columns.
    pub fn arity(&self) -> usize {
        self.costs.len() + 2
    }

    /// All column values in table order.
    pub fn values(&self) -> impl Iterator<Item = CostValue> + '_ {
        [
            CostValue::Int(self.origin_node_id),
            CostValue::Int(self.destination_node_id),
        ]
        .into_iter()
        .chain(self.costs.iter().cloned())
    }
}

/// The complete result of one work unit, handed over only once the unit is exhausted.
#[derive(Debug)]
pub struct UnitBatch {
    pub unit: WorkUnit,
    /// Pairs routed for this unit
    pub pairs: usize,
    /// Attempts it took, starting at 1
    pub attempts: u32,
    pub rows: Vec<CostRow>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_unit_display() {
        assert_eq!(WorkUnit::Chunk(3).to_string(), "chunk 3");
        assert_eq!(WorkUnit::Tile(-7).to_string(), "tile -7");
    }

    #[test]
    fn test_cost_row_values_keep_order() {
        let row = CostRow {
            origin_node_id: 10,
            destination_node_id: 20,
            costs: vec![CostValue::Float(1.5), CostValue::Null, CostValue::Text("rail".into())],
        };
        assert_eq!(row.arity(), 5);
        assert_eq!(row.key(), OdPair::new(10, 20));
        let values: Vec<CostValue> = row.values().collect();
        assert_eq!(
            values,
            vec![
                CostValue::Int(10),
                CostValue::Int(20),
                CostValue::Float(1.5),
                CostValue::Null,
                CostValue::Text("rail".into()),
            ]
        );
    }
}
