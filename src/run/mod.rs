use std::{cmp::Reverse, collections::BinaryHeap};

use crate::schema::Cell;

// A run is a batch of cells already in cell order. Each build worker sorts
// its share of a partition into one run and spills it; the partition's file
// is written from a k-way merge over the spilled runs.

#[derive(Debug, Default)]
pub struct Run {
    idx: usize,
    cells: Vec<Cell>,
}

impl Run {
    pub fn sorted(mut cells: Vec<Cell>) -> Self {
        cells.sort();
        Run { idx: 0, cells }
    }

    pub fn remaining(&self) -> usize {
        self.cells.len() - self.idx
    }
}

impl Iterator for Run {
    type Item = Cell;

    fn next(&mut self) -> Option<Cell> {
        let cell = self.cells.get_mut(self.idx).map(std::mem::take)?;
        self.idx += 1;
        Some(cell)
    }
}

/// Merges sorted sources into one sorted stream. Only the head of each
/// source is held, in a min-heap keyed on `(cell, source index)`, so equal
/// cells come out in source order.
///
/// The first error from any source is yielded and ends the merge.
pub struct MergingIter<I>
where
    I: Iterator<Item = anyhow::Result<Cell>>,
{
    sources: Vec<I>,
    heads: BinaryHeap<Reverse<(Cell, usize)>>,
    primed: bool,
}

impl<I> MergingIter<I>
where
    I: Iterator<Item = anyhow::Result<Cell>>,
{
    pub fn new<J>(j: J) -> Self
    where
        J: IntoIterator<Item = I>,
    {
        let sources: Vec<I> = j.into_iter().collect();
        Self {
            heads: BinaryHeap::with_capacity(sources.len()),
            sources,
            primed: false,
        }
    }

    fn advance(&mut self, idx: usize) -> anyhow::Result<()> {
        if let Some(cell) = self.sources[idx].next() {
            self.heads.push(Reverse((cell?, idx)));
        }
        Ok(())
    }

    fn step(&mut self) -> anyhow::Result<Option<Cell>> {
        if !self.primed {
            self.primed = true;
            for idx in 0..self.sources.len() {
                self.advance(idx)?;
            }
        }
        match self.heads.pop() {
            Some(Reverse((cell, idx))) => {
                self.advance(idx)?;
                Ok(Some(cell))
            }
            None => Ok(None),
        }
    }
}

impl<I> Iterator for MergingIter<I>
where
    I: Iterator<Item = anyhow::Result<Cell>>,
{
    type Item = anyhow::Result<Cell>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(cell) => cell.map(Ok),
            Err(e) => {
                self.heads.clear();
                self.sources.clear();
                Some(Err(e))
            }
        }
    }
}
