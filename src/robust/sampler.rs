//! Quality-score-driven subset sampling.

use rand::Rng;

/// Draws preliminary subsets of (position, distance) pairs for the robust
/// loop, biased toward pairs with high combined quality scores.
///
/// The draw is a weighted selection without replacement: each remaining pair
/// is picked with probability proportional to its combined score, so
/// high-quality pairs are preferred while low-quality ones keep a non-zero
/// chance of being explored — the randomized exploration the RANSAC-style
/// completeness argument relies on.
///
/// With `evenly_distribute` enabled, a pair whose source is already present in
/// the subset under construction is only eligible once every still-unused
/// source has been exhausted. Several near-duplicate distance constraints to
/// the same point add no geometric information, so spreading the subset across
/// sources avoids degenerate candidate geometries.
pub(crate) struct QualitySampler<'a> {
    scores: &'a [f64],
    source_of: &'a [usize],
    subset_size: usize,
    evenly_distribute: bool,
}

impl<'a> QualitySampler<'a> {
    /// Arguments
    /// -----------------
    /// * `scores`: Combined per-pair quality scores, each in (0, ∞).
    /// * `source_of`: Source index of each pair (pairs sharing a source share
    ///   the value).
    /// * `subset_size`: Number of pairs per draw; must not exceed `scores.len()`.
    /// * `evenly_distribute`: Spread the subset across distinct sources first.
    pub(crate) fn new(
        scores: &'a [f64],
        source_of: &'a [usize],
        subset_size: usize,
        evenly_distribute: bool,
    ) -> Self {
        debug_assert_eq!(scores.len(), source_of.len());
        debug_assert!(subset_size <= scores.len());
        Self {
            scores,
            source_of,
            subset_size,
            evenly_distribute,
        }
    }

    /// Draw one subset of pair indices.
    pub(crate) fn draw(&self, rng: &mut impl Rng) -> Vec<usize> {
        let n = self.scores.len();
        let mut picked = vec![false; n];
        let mut used_sources: Vec<usize> = Vec::with_capacity(self.subset_size);
        let mut subset = Vec::with_capacity(self.subset_size);

        while subset.len() < self.subset_size {
            // Restrict to unused sources while any remain available.
            let fresh_only = self.evenly_distribute
                && (0..n)
                    .any(|i| !picked[i] && !used_sources.contains(&self.source_of[i]));

            let eligible = |i: usize| {
                !picked[i] && (!fresh_only || !used_sources.contains(&self.source_of[i]))
            };

            let total: f64 = (0..n).filter(|&i| eligible(i)).map(|i| self.scores[i]).sum();

            let chosen = if total > 0.0 {
                let mut u = rng.random_range(0.0..total);
                let mut chosen = None;
                for i in (0..n).filter(|&i| eligible(i)) {
                    u -= self.scores[i];
                    if u <= 0.0 {
                        chosen = Some(i);
                        break;
                    }
                }
                // Rounding may leave u marginally positive after the last item.
                chosen.unwrap_or_else(|| {
                    (0..n)
                        .rev()
                        .find(|&i| eligible(i))
                        .expect("at least one eligible pair")
                })
            } else {
                (0..n)
                    .find(|&i| eligible(i))
                    .expect("at least one eligible pair")
            };

            picked[chosen] = true;
            if !used_sources.contains(&self.source_of[chosen]) {
                used_sources.push(self.source_of[chosen]);
            }
            subset.push(chosen);
        }

        subset
    }
}

#[cfg(test)]
mod sampler_tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_draw_has_requested_size_and_no_duplicates() {
        let scores = vec![1.0; 10];
        let source_of: Vec<usize> = (0..10).collect();
        let sampler = QualitySampler::new(&scores, &source_of, 4, false);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..50 {
            let subset = sampler.draw(&mut rng);
            assert_eq!(subset.len(), 4);
            let mut sorted = subset.clone();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(sorted.len(), 4, "duplicate index in subset");
        }
    }

    #[test]
    fn test_high_scores_are_preferred() {
        // One pair carries 100x the score of the others: it should appear in
        // nearly every subset of size 2 drawn from 10 pairs.
        let mut scores = vec![1.0; 10];
        scores[3] = 100.0;
        let source_of: Vec<usize> = (0..10).collect();
        let sampler = QualitySampler::new(&scores, &source_of, 2, false);
        let mut rng = StdRng::seed_from_u64(42);

        let hits = (0..200)
            .filter(|_| sampler.draw(&mut rng).contains(&3))
            .count();
        assert!(hits > 150, "high-score pair selected only {hits}/200 times");
    }

    #[test]
    fn test_even_distribution_uses_distinct_sources() {
        // 3 sources with 2 readings each: a subset of 3 must touch all sources.
        let scores = vec![1.0; 6];
        let source_of = vec![0, 0, 1, 1, 2, 2];
        let sampler = QualitySampler::new(&scores, &source_of, 3, true);
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..100 {
            let subset = sampler.draw(&mut rng);
            let mut sources: Vec<usize> = subset.iter().map(|&i| source_of[i]).collect();
            sources.sort_unstable();
            sources.dedup();
            assert_eq!(sources.len(), 3, "subset reused a source: {subset:?}");
        }
    }

    #[test]
    fn test_even_distribution_falls_back_when_sources_run_out() {
        // 2 sources, subset of 3: one source must repeat, and the draw must
        // still complete.
        let scores = vec![1.0; 4];
        let source_of = vec![0, 0, 1, 1];
        let sampler = QualitySampler::new(&scores, &source_of, 3, true);
        let mut rng = StdRng::seed_from_u64(11);

        let subset = sampler.draw(&mut rng);
        assert_eq!(subset.len(), 3);
        let mut sources: Vec<usize> = subset.iter().map(|&i| source_of[i]).collect();
        sources.sort_unstable();
        sources.dedup();
        assert_eq!(sources.len(), 2);
    }
}
