use crate::{schema::Cell, splits::SplitPoints};

/// Returns the `i` such that `boundaries[i-1] <= row < boundaries[i]`, with
/// the first partition unbounded below and the last unbounded above.
/// `boundaries` must be strictly increasing.
pub fn partition_index(row: &[u8], boundaries: &[Vec<u8>]) -> usize {
    boundaries.partition_point(|b| b.as_slice() <= row)
}

/// Routes cells to partitions by row key. Every row key maps to exactly one
/// partition, and all keys of partition `i` sort before all keys of
/// partition `i + 1`.
#[derive(Debug, Clone)]
pub struct TotalOrderPartitioner {
    splits: SplitPoints,
}

impl TotalOrderPartitioner {
    pub fn new(splits: SplitPoints) -> Self {
        TotalOrderPartitioner { splits }
    }

    pub fn partition_count(&self) -> usize {
        self.splits.partition_count()
    }

    pub fn splits(&self) -> &SplitPoints {
        &self.splits
    }

    pub fn partition_row(&self, row: &[u8]) -> usize {
        partition_index(row, self.splits.boundaries())
    }

    pub fn partition(&self, cell: &Cell) -> usize {
        self.partition_row(&cell.row)
    }
}
