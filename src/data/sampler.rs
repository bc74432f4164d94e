// ============================================================
// Layer 3 — Batch Sampler
// ============================================================
// Decides which rows of a train split form each batch.
//
// Two modes:
//   Sequential — contiguous slices of the current shuffle order.
//                ceil(N / batch_size) slices, all non-empty.
//   Weighted   — `batch_size` rows drawn with replacement,
//                probability proportional to each row's most
//                recently observed training loss.
//
// The weight vector starts at all zeros, so the first epoch must
// batch sequentially even when loss sampling is enabled: drawing
// from an all-zero distribution has no defined answer, and the
// sequential pass is what seeds the weights in the first place.
//
// Batch size is annealed multiplicatively once per training epoch
// with integer truncation at every step, so repeated annealing
// compounds: floor(floor(100 * 0.9) * 0.9) = 81, not 81.0.
//
// Reference: rand crate documentation (WeightedIndex)

use std::ops::Range;

use anyhow::{anyhow, Result};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

/// One batch worth of row indices, as decided by the sampler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchIndices {
    /// A contiguous slice of the current shuffle order.
    Sequential(Range<usize>),

    /// Rows drawn with replacement under loss weighting.
    Drawn(Vec<usize>),
}

impl BatchIndices {
    pub fn len(&self) -> usize {
        match self {
            BatchIndices::Sequential(range) => range.len(),
            BatchIndices::Drawn(rows)       => rows.len(),
        }
    }
}

/// Shrink (or grow) the batch size once, truncating toward zero.
pub fn anneal_batch_size(batch_size: usize, factor: f64) -> usize {
    (batch_size as f64 * factor) as usize
}

/// The contiguous batch ranges covering `0..len`: ceil(len / batch_size)
/// slices in order, the last one shorter when the sizes don't divide.
/// Every returned range is non-empty; degenerate inputs yield no batches.
pub fn sequential_batches(len: usize, batch_size: usize) -> Vec<Range<usize>> {
    if len == 0 || batch_size == 0 {
        return Vec::new();
    }
    (0..len.div_ceil(batch_size))
        .map(|i| i * batch_size..((i + 1) * batch_size).min(len))
        .collect()
}

/// Per-example loss weights for one train split.
///
/// Updated destructively after each batch: the batch's observed
/// per-example losses overwrite the weights at the positions the
/// batch came from, so later epochs favour the rows that were
/// hardest the last time they were seen.
#[derive(Debug, Clone)]
pub struct LossWeights {
    weights: Vec<f32>,
}

impl LossWeights {
    /// All-zero weights, one slot per training example.
    pub fn zeros(len: usize) -> Self {
        Self { weights: vec![0.0; len] }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Draw `batch_size` row indices with replacement, probability
    /// proportional to weight. Fails when the vector carries no
    /// probability mass at all (never reached through the epoch-0
    /// sequential guard).
    pub fn draw(&self, batch_size: usize, rng: &mut impl Rng) -> Result<Vec<usize>> {
        let distribution = WeightedIndex::new(&self.weights)
            .map_err(|e| anyhow!("loss-weighted sampling is undefined here: {e}"))?;
        Ok((0..batch_size).map(|_| distribution.sample(rng)).collect())
    }

    /// Write a batch's observed losses back into the slots the batch
    /// was taken from. Duplicate draws resolve to the last write.
    pub fn record(&mut self, indices: &BatchIndices, losses: &[f32]) {
        match indices {
            BatchIndices::Sequential(range) => {
                for (slot, &loss) in self.weights[range.clone()].iter_mut().zip(losses) {
                    *slot = loss;
                }
            }
            BatchIndices::Drawn(rows) => {
                for (&row, &loss) in rows.iter().zip(losses) {
                    self.weights[row] = loss;
                }
            }
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_batches_partition_the_split() {
        // 10 rows, batch 3 → ceil(10/3) = 4 batches, last one short.
        let batches = sequential_batches(10, 3);
        assert_eq!(batches, vec![0..3, 3..6, 6..9, 9..10]);

        // Evenly divisible: no trailing remainder batch.
        let batches = sequential_batches(10, 5);
        assert_eq!(batches, vec![0..5, 5..10]);

        // Every row appears in exactly one batch.
        let covered: usize = sequential_batches(17, 4).iter().map(|r| r.len()).sum();
        assert_eq!(covered, 17);
        assert!(sequential_batches(17, 4).iter().all(|r| !r.is_empty()));
    }

    #[test]
    fn test_sequential_batches_degenerate_inputs() {
        assert!(sequential_batches(0, 8).is_empty());
        assert!(sequential_batches(8, 0).is_empty());
    }

    #[test]
    fn test_annealing_truncates_at_every_step() {
        // 100 → 90 → 81 → 72: three truncations, not one combined
        // multiplication (100 * 0.9^3 = 72.9 would round elsewhere).
        let mut batch_size = 100;
        for _ in 0..3 {
            batch_size = anneal_batch_size(batch_size, 0.9);
        }
        assert_eq!(batch_size, 72);

        assert_eq!(anneal_batch_size(256, 1.0), 256);
        assert_eq!(anneal_batch_size(1, 0.5), 0);
    }

    #[test]
    fn test_draw_from_all_zero_weights_is_an_error() {
        let weights = LossWeights::zeros(4);
        let mut rng = rand::thread_rng();
        assert!(weights.draw(8, &mut rng).is_err());
    }

    #[test]
    fn test_draw_follows_the_weights() {
        let mut weights = LossWeights::zeros(3);
        weights.record(&BatchIndices::Sequential(0..3), &[0.0, 5.0, 0.0]);

        // All the probability mass sits on row 1.
        let mut rng = rand::thread_rng();
        let rows = weights.draw(16, &mut rng).unwrap();
        assert_eq!(rows.len(), 16);
        assert!(rows.iter().all(|&r| r == 1));
    }

    #[test]
    fn test_record_writes_drawn_positions() {
        let mut weights = LossWeights::zeros(5);
        weights.record(&BatchIndices::Drawn(vec![4, 0, 4]), &[1.0, 2.0, 3.0]);
        assert_eq!(weights.weights, vec![2.0, 0.0, 0.0, 0.0, 3.0]);
    }
}
