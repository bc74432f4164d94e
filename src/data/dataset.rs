// ============================================================
// Layer 3 — Paired Tensor Dataset
// ============================================================
// A dataset here is two tensors with a shared leading dimension:
// inputs [N, channels, len] paired row-for-row with outputs [N].
//
// The one invariant everything else depends on: any reordering
// must apply the same permutation to both tensors. Shuffling is
// therefore done once over indices and applied to both sides
// with a single `select` each.
//
// Reference: rand crate documentation (SliceRandom)
//            Burn Book §3 (Tensor operations)

use std::ops::Range;

use burn::prelude::*;
use rand::seq::SliceRandom;

use crate::data::sampler::BatchIndices;

/// Paired `(inputs, outputs)` tensors of equal leading length.
#[derive(Debug, Clone)]
pub struct TensorPair<B: Backend> {
    /// Input windows — shape: [examples, channels, len]
    pub inputs: Tensor<B, 3>,

    /// Regression targets — shape: [examples]
    pub outputs: Tensor<B, 1>,
}

impl<B: Backend> TensorPair<B> {
    pub fn new(inputs: Tensor<B, 3>, outputs: Tensor<B, 1>) -> Self {
        Self { inputs, outputs }
    }

    /// Number of paired examples.
    pub fn len(&self) -> usize {
        self.inputs.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of this dataset permuted by one fresh uniform random
    /// ordering, applied identically to both tensors. Each call draws
    /// an independent permutation.
    pub fn shuffled(&self) -> Self {
        let n = self.len();
        if n <= 1 {
            return self.clone();
        }

        // Fisher-Yates over indices, then one gather per tensor.
        let mut order: Vec<i32> = (0..n as i32).collect();
        order.shuffle(&mut rand::thread_rng());

        let indices =
            Tensor::<B, 1, Int>::from_ints(order.as_slice(), &self.inputs.device());
        Self {
            inputs:  self.inputs.clone().select(0, indices.clone()),
            outputs: self.outputs.clone().select(0, indices),
        }
    }

    /// The contiguous sub-range `range` of both tensors.
    pub fn range(&self, range: Range<usize>) -> Self {
        Self {
            inputs:  self.inputs.clone().slice([range.clone()]),
            outputs: self.outputs.clone().slice([range]),
        }
    }

    /// Everything outside `range`, in order. Used to build a fold's
    /// train split as the complement of its eval slice.
    pub fn complement(&self, range: &Range<usize>) -> Self {
        let n = self.len();
        if range.start == 0 {
            return self.range(range.end..n);
        }
        if range.end == n {
            return self.range(0..range.start);
        }
        let head = self.range(0..range.start);
        let tail = self.range(range.end..n);
        Self {
            inputs:  Tensor::cat(vec![head.inputs, tail.inputs], 0),
            outputs: Tensor::cat(vec![head.outputs, tail.outputs], 0),
        }
    }

    /// Split into `[0, index)` and `[index, len)`.
    pub fn split_at(&self, index: usize) -> (Self, Self) {
        (self.range(0..index), self.range(index..self.len()))
    }

    /// Gather the rows at `indices` (duplicates allowed).
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let ints: Vec<i32> = indices.iter().map(|&i| i as i32).collect();
        let index_tensor =
            Tensor::<B, 1, Int>::from_ints(ints.as_slice(), &self.inputs.device());
        Self {
            inputs:  self.inputs.clone().select(0, index_tensor.clone()),
            outputs: self.outputs.clone().select(0, index_tensor),
        }
    }

    /// Materialise one batch from a sampler decision.
    pub fn batch(&self, indices: &BatchIndices) -> Self {
        match indices {
            BatchIndices::Sequential(range) => self.range(range.clone()),
            BatchIndices::Drawn(rows)       => self.select_rows(rows),
        }
    }
}

/// Partition `0..len` into `partitions` contiguous ranges. The
/// remainder is spread over the leading ranges so the union covers
/// every index exactly once.
pub fn fold_ranges(len: usize, partitions: usize) -> Vec<Range<usize>> {
    let base      = len / partitions;
    let remainder = len % partitions;

    let mut start  = 0;
    let mut ranges = Vec::with_capacity(partitions);
    for k in 0..partitions {
        let size = base + usize::from(k < remainder);
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    type B = burn::backend::NdArray;

    /// Pair where every value in row i equals i, so a joint
    /// permutation is detectable per row.
    fn indexed_pair(n: usize) -> TensorPair<B> {
        let device = Default::default();
        let input_values: Vec<f32> = (0..n)
            .flat_map(|i| std::iter::repeat(i as f32).take(2))
            .collect();
        let output_values: Vec<f32> = (0..n).map(|i| i as f32).collect();
        TensorPair::new(
            Tensor::<B, 1>::from_floats(input_values.as_slice(), &device)
                .reshape([n, 1, 2]),
            Tensor::<B, 1>::from_floats(output_values.as_slice(), &device),
        )
    }

    fn output_values(pair: &TensorPair<B>) -> Vec<f32> {
        pair.outputs.clone().into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_shuffle_preserves_pairs_and_values() {
        let pair     = indexed_pair(16);
        let shuffled = pair.shuffled();

        // Same multiset of targets, only the order may differ.
        let mut targets = output_values(&shuffled);
        targets.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let expected: Vec<f32> = (0..16).map(|i| i as f32).collect();
        assert_eq!(targets, expected);

        // Both tensors moved under the same permutation: each row's
        // input values still equal its target.
        let targets = output_values(&shuffled);
        let inputs  = shuffled.inputs.into_data().to_vec::<f32>().unwrap();
        for (row, &target) in targets.iter().enumerate() {
            assert_eq!(inputs[row * 2], target);
            assert_eq!(inputs[row * 2 + 1], target);
        }
    }

    #[test]
    fn test_split_at_sizes() {
        let pair = indexed_pair(10);
        let (head, tail) = pair.split_at(3);
        assert_eq!(head.len(), 3);
        assert_eq!(tail.len(), 7);
        assert_eq!(output_values(&head), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_complement_skips_the_range() {
        let pair = indexed_pair(6);
        let rest = pair.complement(&(2..4));
        assert_eq!(output_values(&rest), vec![0.0, 1.0, 4.0, 5.0]);

        // Degenerate positions: range at either end.
        assert_eq!(output_values(&pair.complement(&(0..2))), vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(output_values(&pair.complement(&(4..6))), vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_fold_ranges_cover_exactly() {
        for (len, partitions) in [(10, 3), (9, 3), (7, 4), (12, 2)] {
            let ranges = fold_ranges(len, partitions);
            assert_eq!(ranges.len(), partitions);

            // Contiguous, disjoint, and covering 0..len exactly once.
            let mut next = 0;
            for range in &ranges {
                assert_eq!(range.start, next);
                next = range.end;
            }
            assert_eq!(next, len);

            // Sizes differ by at most one.
            let sizes: Vec<usize> = ranges.iter().map(|r| r.end - r.start).collect();
            let min = sizes.iter().min().unwrap();
            let max = sizes.iter().max().unwrap();
            assert!(max - min <= 1);
        }
    }

    #[test]
    fn test_select_rows_allows_duplicates() {
        let pair  = indexed_pair(5);
        let batch = pair.select_rows(&[4, 4, 0]);
        assert_eq!(output_values(&batch), vec![4.0, 4.0, 0.0]);
    }
}
