//! Index-range partitioning for parallel evaluation workers.
//!
//! The evaluation set is addressed by item index. A multi-device run
//! splits the index domain into contiguous, disjoint, gap-free shards,
//! one per worker, whose sizes differ by at most one index. Partitioning
//! is deterministic for a given `(domain, workers)` pair, so a re-run
//! dispatches identical shards.

use serde::{Deserialize, Serialize};

use crate::device::DeviceOrdinal;
use crate::error::{EvalError, Result};

/// Half-open range of dataset item indices: start inclusive, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexRange {
    pub start: usize,
    pub end: usize,
}

impl IndexRange {
    /// Create a range, enforcing `start < end`.
    pub fn new(start: usize, end: usize) -> Result<Self> {
        if start >= end {
            return Err(EvalError::Usage(format!(
                "invalid index range: start {start} must be below end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Number of indices covered.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Always false for a constructed range; kept for call-site clarity.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

impl std::fmt::Display for IndexRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// One unit of dispatched work: a shard range pinned to a device.
///
/// Created by the dispatcher at dispatch time, consumed by exactly one
/// worker process, discarded once its results are collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobShard {
    pub range: IndexRange,
    pub device: DeviceOrdinal,
}

/// Split `domain` into `workers` contiguous, pairwise disjoint, gap-free
/// sub-ranges covering exactly the domain.
///
/// The first `total % workers` shards take `ceil(total / workers)`
/// indices, the remainder take the floor, so sizes differ by at most one.
pub fn partition(domain: IndexRange, workers: usize) -> Result<Vec<IndexRange>> {
    if workers == 0 {
        return Err(EvalError::Usage("worker count must be at least 1".to_string()));
    }
    let total = domain.len();
    if workers > total {
        return Err(EvalError::Usage(format!(
            "cannot split {total} item(s) across {workers} workers"
        )));
    }

    let base = total / workers;
    let extra = total % workers;

    let mut shards = Vec::with_capacity(workers);
    let mut start = domain.start;
    for i in 0..workers {
        let size = if i < extra { base + 1 } else { base };
        shards.push(IndexRange {
            start,
            end: start + size,
        });
        start += size;
    }
    Ok(shards)
}

/// Pair shard `i` with device ordinal `i`.
pub fn assign(shards: &[IndexRange], devices: &[DeviceOrdinal]) -> Result<Vec<JobShard>> {
    if shards.len() != devices.len() {
        return Err(EvalError::Usage(format!(
            "{} shard(s) cannot be assigned to {} device(s)",
            shards.len(),
            devices.len()
        )));
    }
    Ok(shards
        .iter()
        .zip(devices.iter())
        .map(|(range, device)| JobShard {
            range: *range,
            device: *device,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full(total: usize) -> IndexRange {
        IndexRange::new(0, total).unwrap()
    }

    #[test]
    fn test_range_rejects_start_at_or_past_end() {
        assert!(IndexRange::new(5, 5).is_err());
        assert!(IndexRange::new(7, 3).is_err());
        assert!(IndexRange::new(0, 1).is_ok());
    }

    #[test]
    fn test_partition_even_split() {
        let shards = partition(full(1000), 4).unwrap();
        assert_eq!(
            shards,
            vec![
                IndexRange { start: 0, end: 250 },
                IndexRange { start: 250, end: 500 },
                IndexRange { start: 500, end: 750 },
                IndexRange { start: 750, end: 1000 },
            ]
        );
    }

    #[test]
    fn test_partition_uneven_split_differs_by_at_most_one() {
        let shards = partition(full(10), 3).unwrap();
        let sizes: Vec<usize> = shards.iter().map(|s| s.len()).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
    }

    #[test]
    fn test_partition_respects_outer_range() {
        let outer = IndexRange::new(100, 200).unwrap();
        let shards = partition(outer, 4).unwrap();
        assert_eq!(shards[0], IndexRange { start: 100, end: 125 });
        assert_eq!(shards[3], IndexRange { start: 175, end: 200 });
    }

    #[test]
    fn test_partition_properties_hold_across_combinations() {
        for total in [1usize, 2, 3, 7, 16, 99, 1000] {
            for workers in 1..=total.min(8) {
                let shards = partition(full(total), workers).unwrap();
                assert_eq!(shards.len(), workers);

                // Contiguous, ordered, gap-free, covering [0, total).
                assert_eq!(shards[0].start, 0);
                assert_eq!(shards[workers - 1].end, total);
                for pair in shards.windows(2) {
                    assert_eq!(pair[0].end, pair[1].start);
                }

                // Sizes differ by at most one.
                let min = shards.iter().map(|s| s.len()).min().unwrap();
                let max = shards.iter().map(|s| s.len()).max().unwrap();
                assert!(max - min <= 1, "total={total} workers={workers}");
            }
        }
    }

    #[test]
    fn test_partition_is_deterministic() {
        let a = partition(full(99), 7).unwrap();
        let b = partition(full(99), 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_partition_rejects_zero_workers() {
        assert!(partition(full(10), 0).is_err());
    }

    #[test]
    fn test_partition_rejects_more_workers_than_items() {
        assert!(partition(full(3), 4).is_err());
    }

    #[test]
    fn test_assign_pairs_shards_with_devices_in_order() {
        let shards = partition(full(100), 2).unwrap();
        let devices = vec![DeviceOrdinal(0), DeviceOrdinal(1)];
        let jobs = assign(&shards, &devices).unwrap();
        assert_eq!(jobs[0].device, DeviceOrdinal(0));
        assert_eq!(jobs[0].range, IndexRange { start: 0, end: 50 });
        assert_eq!(jobs[1].device, DeviceOrdinal(1));
        assert_eq!(jobs[1].range, IndexRange { start: 50, end: 100 });
    }

    #[test]
    fn test_assign_rejects_mismatched_lengths() {
        let shards = partition(full(100), 2).unwrap();
        assert!(assign(&shards, &[DeviceOrdinal(0)]).is_err());
    }
}
