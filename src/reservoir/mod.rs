use rand::{rngs::StdRng, Rng, SeedableRng};

/// A fixed-size uniform sample of a stream of unknown length.
///
/// The first `capacity` items fill the buffer. After that, the item at
/// 1-based position `i` replaces a uniformly chosen slot with probability
/// `capacity / i`, so at any point every item inspected so far is in the
/// buffer with the same probability.
///
/// Inspection can be capped with `max_records`: once that many items have
/// been offered, further items are ignored. Sampling is approximate by
/// design, the cap only bounds the cost on very large shards.
#[derive(Debug, Clone)]
pub struct Reservoir<T> {
    capacity: usize,
    max_records: Option<u64>,
    seen: u64,
    items: Vec<T>,
}

impl<T> Reservoir<T> {
    pub fn new(capacity: usize) -> Self {
        Reservoir {
            capacity,
            max_records: None,
            seen: 0,
            items: Vec::with_capacity(capacity),
        }
    }

    pub fn with_max_records(capacity: usize, max_records: u64) -> Self {
        Reservoir {
            max_records: Some(max_records),
            ..Self::new(capacity)
        }
    }

    /// Offers one item. Returns false once the inspection cap is reached;
    /// the item is ignored in that case.
    pub fn offer<R: Rng + ?Sized>(&mut self, item: T, rng: &mut R) -> bool {
        if self.is_capped() {
            return false;
        }
        self.seen += 1;
        if self.items.len() < self.capacity {
            self.items.push(item);
        } else {
            let slot = rng.gen_range(0..self.seen);
            if slot < self.capacity as u64 {
                self.items[slot as usize] = item;
            }
        }
        true
    }

    pub fn is_capped(&self) -> bool {
        self.max_records.is_some_and(|max| self.seen >= max)
    }

    /// Number of items inspected (not counting ones ignored past the cap).
    pub fn seen(&self) -> u64 {
        self.seen
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    /// Combines two independent reservoirs into one that is a uniform sample
    /// of everything either of them inspected.
    ///
    /// Each output slot is drawn from `self` with probability proportional
    /// to how many of `self`'s inspected items have not been drawn yet, and
    /// the item is then picked uniformly from that side's buffer, without
    /// replacement. The merge is associative, so shard reservoirs can be
    /// folded together in any grouping.
    pub fn merge<R: Rng + ?Sized>(self, other: Reservoir<T>, rng: &mut R) -> Reservoir<T> {
        let capacity = self.capacity.max(other.capacity);
        let seen = self.seen + other.seen;
        let (mut left, mut right) = (self.items, other.items);
        let (mut left_remaining, mut right_remaining) = (self.seen, other.seen);

        let mut items = Vec::with_capacity(capacity);
        while items.len() < capacity && left_remaining + right_remaining > 0 {
            let from_left = rng.gen_range(0..left_remaining + right_remaining) < left_remaining;
            let src = if from_left {
                left_remaining -= 1;
                &mut left
            } else {
                right_remaining -= 1;
                &mut right
            };
            if src.is_empty() {
                continue;
            }
            let idx = rng.gen_range(0..src.len());
            items.push(src.swap_remove(idx));
        }

        Reservoir {
            capacity,
            max_records: self.max_records,
            seen,
            items,
        }
    }
}

/// The generator used for shard `shard`. With a seed the sample is
/// reproducible across runs; without one it comes from the OS.
pub fn shard_rng(seed: Option<u64>, shard: usize) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(shard as u64)),
        None => StdRng::from_entropy(),
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use rand::{rngs::StdRng, SeedableRng};

    use super::{shard_rng, Reservoir};

    #[test]
    fn test_short_stream() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut r = Reservoir::new(10);
        for i in 0..4 {
            assert!(r.offer(i, &mut rng));
        }
        let mut items = r.into_items();
        items.sort();
        assert_eq!(items, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_exact_size() {
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..100 {
            let mut r = Reservoir::new(7);
            for i in 0..50 {
                r.offer(i, &mut rng);
            }
            assert_eq!(r.len(), 7);
            assert_eq!(r.seen(), 50);
            let distinct: HashSet<_> = r.items().iter().collect();
            assert_eq!(distinct.len(), 7);
        }
    }

    #[test]
    fn test_uniformity() {
        const N: usize = 20;
        const K: usize = 5;
        const TRIALS: usize = 20_000;
        let mut rng = StdRng::seed_from_u64(3);
        let mut counts = [0_usize; N];
        for _ in 0..TRIALS {
            let mut r = Reservoir::new(K);
            for i in 0..N {
                r.offer(i, &mut rng);
            }
            for i in r.into_items() {
                counts[i] += 1;
            }
        }
        let expected = TRIALS * K / N;
        for (i, c) in counts.iter().enumerate() {
            assert!(
                c.abs_diff(expected) < expected / 10,
                "item {} picked {} times, expected about {}",
                i,
                c,
                expected
            );
        }
    }

    #[test]
    fn test_max_records() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut r = Reservoir::with_max_records(5, 100);
        let mut accepted = 0;
        for i in 0..1000 {
            if r.offer(i, &mut rng) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 100);
        assert_eq!(r.seen(), 100);
        assert!(r.is_capped());
        assert_eq!(r.len(), 5);
        assert!(r.items().iter().all(|i| *i < 100));
    }

    #[test]
    fn test_merge_small() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut a = Reservoir::new(5);
        let mut b = Reservoir::new(5);
        a.offer("a", &mut rng);
        a.offer("b", &mut rng);
        b.offer("c", &mut rng);
        let merged = a.merge(b, &mut rng);
        assert_eq!(merged.seen(), 3);
        let mut items = merged.into_items();
        items.sort();
        assert_eq!(items, vec!["a", "b", "c"]);

        let empty: Reservoir<u8> = Reservoir::new(3).merge(Reservoir::new(3), &mut rng);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_merge_uniformity() {
        // Two shards of very different sizes; the merged sample must still
        // pick every record with probability K / total.
        const K: usize = 5;
        const TRIALS: usize = 20_000;
        let mut rng = StdRng::seed_from_u64(6);
        let mut counts = [0_usize; 40];
        for _ in 0..TRIALS {
            let mut left = Reservoir::new(K);
            let mut right = Reservoir::new(K);
            for i in 0..10 {
                left.offer(i, &mut rng);
            }
            for i in 10..40 {
                right.offer(i, &mut rng);
            }
            let merged = left.merge(right, &mut rng);
            assert_eq!(merged.len(), K);
            for i in merged.into_items() {
                counts[i] += 1;
            }
        }
        let expected = TRIALS * K / 40;
        for (i, c) in counts.iter().enumerate() {
            assert!(
                c.abs_diff(expected) < expected / 8,
                "item {} picked {} times, expected about {}",
                i,
                c,
                expected
            );
        }
    }

    #[test]
    fn test_shard_rng_seeded() {
        use rand::Rng;
        let a: u64 = shard_rng(Some(9), 2).gen();
        let b: u64 = shard_rng(Some(9), 2).gen();
        let c: u64 = shard_rng(Some(9), 3).gen();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
