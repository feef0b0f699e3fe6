//! Load-aware splitting of work items across worker slots.
//!
//! Buckets start round-robin sized, then single items move from the bucket
//! expected to finish last to the one expected to finish first, where each
//! bucket's finish time includes a launch delay that grows with its index.
//! Buckets that end up empty are dropped, so the number of workers actually
//! scheduled can be lower than requested.
//!
//! Every bucket covers a contiguous block of items, in item order. For the
//! file dimension this keeps the concatenated output in input order.

use std::ops::Range;

use forcing_common::{ForcingError, ForcingResult};

/// Estimated cost of running items in a worker bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    /// Delay between the starts of consecutive workers (seconds)
    pub launch_delay: f64,
    /// Time to process one item (seconds)
    pub item_cost: f64,
}

impl CostModel {
    pub const DEFAULT_LAUNCH_DELAY: f64 = 0.05;
    pub const DEFAULT_ITEM_COST: f64 = 1.0;

    pub fn new(launch_delay: f64, item_cost: f64) -> ForcingResult<Self> {
        if !launch_delay.is_finite() || launch_delay < 0.0 {
            return Err(ForcingError::Configuration(format!(
                "launch delay must be a non-negative number, got {}",
                launch_delay
            )));
        }
        if !item_cost.is_finite() || item_cost <= 0.0 {
            return Err(ForcingError::Configuration(format!(
                "item cost must be a positive number, got {}",
                item_cost
            )));
        }
        Ok(Self {
            launch_delay,
            item_cost,
        })
    }

    /// Estimated completion time of bucket `index` holding `size` items.
    pub fn completion(&self, index: usize, size: usize) -> f64 {
        self.launch_delay * index as f64 + self.item_cost * size as f64
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            launch_delay: Self::DEFAULT_LAUNCH_DELAY,
            item_cost: Self::DEFAULT_ITEM_COST,
        }
    }
}

/// Contiguous item ranges, one per scheduled worker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Partition {
    ranges: Vec<Range<usize>>,
}

impl Partition {
    /// Build contiguous ranges from bucket sizes.
    pub fn from_sizes(sizes: &[usize]) -> Self {
        let mut start = 0;
        let ranges = sizes
            .iter()
            .map(|&size| {
                let range = start..start + size;
                start += size;
                range
            })
            .collect();
        Self { ranges }
    }

    /// Number of workers to schedule.
    pub fn n_workers(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    #[cfg(test)]
    fn sizes(&self) -> Vec<usize> {
        self.ranges.iter().map(|r| r.len()).collect()
    }

    /// Total number of items covered.
    pub fn total(&self) -> usize {
        self.ranges.iter().map(|r| r.len()).sum()
    }
}

/// Splits items across workers using a [`CostModel`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkPartitioner {
    cost: CostModel,
}

impl WorkPartitioner {
    pub fn new(cost: CostModel) -> Self {
        Self { cost }
    }

    /// Balanced bucket sizes with empty buckets removed.
    ///
    /// A request for zero workers is treated as one.
    pub fn bucket_sizes(&self, n_items: usize, n_workers: usize) -> Vec<usize> {
        if n_items == 0 {
            return Vec::new();
        }
        let n_workers = n_workers.max(1);

        let mut sizes: Vec<usize> = (0..n_workers)
            .map(|i| n_items / n_workers + usize::from(i < n_items % n_workers))
            .collect();

        // Each move strictly lowers the sum of squared completion times, so
        // the loop ends; the bound only guards against float edge cases.
        let max_moves = n_items * n_workers + 1;
        for _ in 0..max_moves {
            let times: Vec<f64> = sizes
                .iter()
                .enumerate()
                .map(|(i, &s)| self.cost.completion(i, s))
                .collect();

            // only buckets holding items can give one away
            let busy: Vec<f64> = times
                .iter()
                .zip(&sizes)
                .map(|(&t, &s)| if s > 0 { t } else { f64::NEG_INFINITY })
                .collect();
            let (slow, t_max) = extreme(&busy, |a, b| a > b);
            let (fast, t_min) = extreme(&times, |a, b| a < b);

            if t_max - t_min <= self.cost.item_cost {
                break;
            }
            sizes[slow] -= 1;
            sizes[fast] += 1;
        }

        sizes.retain(|&s| s > 0);
        sizes
    }

    /// Contiguous partition of `n_items` across at most `n_workers` workers.
    pub fn partition(&self, n_items: usize, n_workers: usize) -> Partition {
        Partition::from_sizes(&self.bucket_sizes(n_items, n_workers))
    }
}

/// First index holding the extreme value under `better`.
fn extreme(values: &[f64], better: impl Fn(f64, f64) -> bool) -> (usize, f64) {
    let mut best = (0, values[0]);
    for (i, &v) in values.iter().enumerate().skip(1) {
        if better(v, best.1) {
            best = (i, v);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conservation() {
        let partitioner = WorkPartitioner::default();
        for n in 0..40 {
            for w in 0..12 {
                let sizes = partitioner.bucket_sizes(n, w);
                assert_eq!(sizes.iter().sum::<usize>(), n, "n={} w={}", n, w);
                assert!(sizes.iter().all(|&s| s > 0 && s <= n));
                assert!(sizes.len() <= w.max(1));
            }
        }
    }

    #[test]
    fn test_no_items_no_workers() {
        let partitioner = WorkPartitioner::default();
        assert!(partitioner.bucket_sizes(0, 8).is_empty());
        assert!(partitioner.partition(0, 8).is_empty());
    }

    #[test]
    fn test_shrinks_to_item_count() {
        let partitioner = WorkPartitioner::default();
        assert_eq!(partitioner.bucket_sizes(3, 10), vec![1, 1, 1]);
        assert_eq!(partitioner.partition(3, 10).n_workers(), 3);
    }

    #[test]
    fn test_zero_workers_treated_as_one() {
        let partitioner = WorkPartitioner::default();
        assert_eq!(partitioner.bucket_sizes(5, 0), vec![5]);
    }

    #[test]
    fn test_launch_delay_shifts_work_to_early_workers() {
        let partitioner = WorkPartitioner::new(CostModel::new(3.0, 1.0).unwrap());
        let sizes = partitioner.bucket_sizes(8, 4);
        assert_eq!(sizes.iter().sum::<usize>(), 8);
        // the first worker starts earliest and gets the most items
        assert!(sizes[0] > *sizes.last().unwrap());
    }

    #[test]
    fn test_deterministic() {
        let partitioner = WorkPartitioner::new(CostModel::new(0.7, 0.3).unwrap());
        assert_eq!(partitioner.bucket_sizes(97, 7), partitioner.bucket_sizes(97, 7));
    }

    #[test]
    fn test_contiguous_ranges() {
        let partition = Partition::from_sizes(&[3, 2]);
        assert_eq!(partition.ranges(), &[0..3, 3..5]);
        assert_eq!(partition.total(), 5);
        assert_eq!(partition.sizes(), vec![3, 2]);
    }

    #[test]
    fn test_invalid_cost_model() {
        assert!(CostModel::new(-1.0, 1.0).is_err());
        assert!(CostModel::new(0.0, 0.0).is_err());
        assert!(CostModel::new(f64::NAN, 1.0).is_err());
    }
}
