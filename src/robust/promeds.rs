//! # PROMedS robust estimation loop
//!
//! Iterative robust position estimation: quality-biased subsets are laterated
//! into candidate solutions, every candidate is scored by the quality-weighted
//! median of its squared range residuals over **all** measurements, and the
//! lowest score wins. With all quality scores equal this degenerates to the
//! classical least-median-of-squares estimator.
//!
//! ## Loop structure
//!
//! The loop is driven step by step by the estimator facade so that lifecycle
//! and progress callbacks can fire between iterations without aliasing the
//! measurement arrays: [`PromedsLoop`] owns a copy of the flattened inputs and
//! all mutable loop state, [`PromedsLoop::step`] performs one
//! sample → solve → score iteration, and [`PromedsLoop::finish`] runs inlier
//! selection and the final refinement.
//!
//! ## Stop conditions
//!
//! 1. the hard `max_iterations` cap,
//! 2. the adaptive confidence bound `ln(1−confidence)/ln(1−ρᵏ)`, with `ρ` the
//!    inlier ratio of the current best candidate, recomputed on every new
//!    best,
//! 3. a best score at or below `stop_threshold`.
//!
//! Individual candidate failures (singular subset geometry, non-convergence)
//! are recovered by skipping the candidate; only a loop that never produced a
//! single usable candidate fails with
//! [`PosfitError::RobustEstimationFailure`].

use nalgebra::{SMatrix, SVector};
use rand::Rng;

use crate::constants::{INLIER_THRESHOLD_FLOOR, MAD_TO_SIGMA};
use crate::lateration::{self, min_required_measurements, nonlinear, SolveOptions};
use crate::posfit_errors::PosfitError;
use crate::robust::inliers::InliersData;
use crate::robust::sampler::QualitySampler;
use crate::robust::PromedsParams;

/// Weighted median of `(value, weight)` pairs.
///
/// Returns the smallest value whose cumulative weight reaches half the total
/// weight. The result only depends on the multiset of pairs, never on their
/// order, so callers may accumulate the pairs in parallel.
///
/// Return
/// ----------
/// * `None` when the slice is empty or the total weight is not positive.
pub(crate) fn weighted_median(pairs: &mut [(f64, f64)]) -> Option<f64> {
    if pairs.is_empty() {
        return None;
    }
    let total: f64 = pairs.iter().map(|&(_, w)| w).sum();
    if !(total > 0.0) {
        return None;
    }

    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let half = total / 2.0;
    let mut cumulative = 0.0;
    for &(value, weight) in pairs.iter() {
        cumulative += weight;
        if cumulative >= half {
            return Some(value);
        }
    }
    // Reachable only through floating-point rounding on the last accumulation.
    pairs.last().map(|&(value, _)| value)
}

/// Outcome of one call to [`PromedsLoop::step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum LoopStep {
    /// One iteration ran; `progress` is the fraction of the currently
    /// estimated total iteration count already spent.
    Iterated { iteration: usize, progress: f64 },
    /// The loop hit one of its stop conditions; call `finish`.
    Finished,
}

/// Final output of the robust loop.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RobustEstimate<const D: usize> {
    pub position: SVector<f64, D>,
    pub covariance: Option<SMatrix<f64, D, D>>,
    pub inliers: InliersData,
    pub iterations: usize,
}

/// Explicit state of one robust estimation run.
///
/// Owns a copy of the flattened measurement arrays for the duration of the
/// run, so the facade stays free to fire re-entrant listener callbacks while
/// the loop is in flight.
pub(crate) struct PromedsLoop<const D: usize> {
    positions: Vec<SVector<f64, D>>,
    distances: Vec<f64>,
    std_devs: Vec<f64>,
    quality_scores: Vec<f64>,
    source_of: Vec<usize>,
    params: PromedsParams,
    initial_position: Option<SVector<f64, D>>,

    iteration: usize,
    iterations_needed: usize,
    best_score: f64,
    best_position: Option<SVector<f64, D>>,
    done: bool,
}

impl<const D: usize> PromedsLoop<D> {
    /// Arguments
    /// -----------------
    /// * `positions`, `distances`, `std_devs`: Flattened parallel measurement
    ///   arrays (one entry per matched reading); deviations must be usable.
    /// * `quality_scores`: Combined source × reading scores, parallel to the
    ///   measurement arrays.
    /// * `source_of`: Source index of each pair, for even subset distribution.
    /// * `params`: Robust loop configuration.
    /// * `initial_position`: Optional hint for the non-linear solving path.
    pub(crate) fn new(
        positions: Vec<SVector<f64, D>>,
        distances: Vec<f64>,
        std_devs: Vec<f64>,
        quality_scores: Vec<f64>,
        source_of: Vec<usize>,
        params: PromedsParams,
        initial_position: Option<SVector<f64, D>>,
    ) -> Self {
        let iterations_needed = params.max_iterations;
        Self {
            positions,
            distances,
            std_devs,
            quality_scores,
            source_of,
            params,
            initial_position,
            iteration: 0,
            iterations_needed,
            best_score: f64::MAX,
            best_position: None,
            done: false,
        }
    }

    /// Iteration cap currently in force: the adaptive bound, clamped by the
    /// hard maximum.
    fn effective_cap(&self) -> usize {
        self.iterations_needed.min(self.params.max_iterations).max(1)
    }

    fn preliminary_options(&self) -> SolveOptions<D> {
        SolveOptions {
            linear_solver_used: self.params.linear_solver_used,
            homogeneous_linear_solver_used: self.params.homogeneous_linear_solver_used,
            refine_solution: self.params.preliminary_solution_refined,
            keep_covariance: false,
            max_refinement_iterations: self.params.max_refinement_iterations,
            refinement_eps: self.params.refinement_eps,
            initial_position: self.initial_position,
        }
    }

    /// Run one sample → solve → score iteration.
    pub(crate) fn step(&mut self, rng: &mut impl Rng) -> LoopStep {
        if self.done || self.iteration >= self.effective_cap() {
            self.done = true;
            return LoopStep::Finished;
        }
        self.iteration += 1;
        let iteration = self.iteration;

        let subset = {
            let sampler = QualitySampler::new(
                &self.quality_scores,
                &self.source_of,
                self.params.preliminary_subset_size,
                self.params.evenly_distribute_readings,
            );
            sampler.draw(rng)
        };

        let sub_positions: Vec<_> = subset.iter().map(|&i| self.positions[i]).collect();
        let sub_distances: Vec<_> = subset.iter().map(|&i| self.distances[i]).collect();
        let sub_std_devs: Vec<_> = subset.iter().map(|&i| self.std_devs[i]).collect();

        let options = self.preliminary_options();
        // A candidate that fails to solve is simply skipped; the loop keeps
        // sampling alternatives.
        if let Ok(solution) =
            lateration::solve(&sub_positions, &sub_distances, &sub_std_devs, &options)
        {
            if solution.position.iter().all(|c| c.is_finite()) {
                if let Some(score) = self.score_candidate(&solution.position) {
                    if score < self.best_score {
                        self.best_score = score;
                        self.best_position = Some(solution.position);
                        self.update_iterations_needed();
                    }
                }
            }
        }

        if self.best_score <= self.params.stop_threshold {
            self.done = true;
        }

        let progress = (iteration as f64 / self.effective_cap() as f64).min(1.0);
        LoopStep::Iterated {
            iteration,
            progress,
        }
    }

    /// Signed range residual of pair `i` against candidate position `x`.
    fn residual(&self, x: &SVector<f64, D>, i: usize) -> f64 {
        (x - self.positions[i]).norm() - self.distances[i]
    }

    /// PROMedS score of a candidate: quality-weighted median of the squared
    /// residuals over all pairs.
    fn score_candidate(&self, x: &SVector<f64, D>) -> Option<f64> {
        let mut pairs: Vec<(f64, f64)> = (0..self.positions.len())
            .map(|i| {
                let r = self.residual(x, i);
                (r * r, self.quality_scores[i])
            })
            .collect();
        weighted_median(&mut pairs)
    }

    /// Robust residual scale implied by the current best score.
    fn residual_scale(&self) -> f64 {
        let n = self.positions.len();
        let k = self.params.preliminary_subset_size;
        let dof = n.saturating_sub(k).max(1) as f64;
        MAD_TO_SIGMA * (1.0 + 5.0 / dof) * self.best_score.max(0.0).sqrt()
    }

    /// Squared-residual inlier threshold derived from the best score, floored
    /// so exactly-consistent measurements classify as inliers.
    fn derived_threshold(&self) -> f64 {
        let t = 2.5 * self.residual_scale();
        (t * t).max(INLIER_THRESHOLD_FLOOR)
    }

    fn classify(&self, x: &SVector<f64, D>, threshold: f64) -> (Vec<bool>, Vec<f64>, usize) {
        let mut flags = Vec::with_capacity(self.positions.len());
        let mut residuals = Vec::with_capacity(self.positions.len());
        let mut count = 0;
        for i in 0..self.positions.len() {
            let r = self.residual(x, i);
            let inlier = r * r <= threshold;
            if inlier {
                count += 1;
            }
            flags.push(inlier);
            residuals.push(r);
        }
        (flags, residuals, count)
    }

    /// Recompute the adaptive iteration bound from the inlier ratio of the
    /// current best candidate.
    ///
    /// The ratio is counted against the known measurement deviations
    /// (`|rᵢ| ≤ 2.5·σᵢ`) rather than against the candidate-derived threshold:
    /// a threshold derived from the candidate's own median would rate even a
    /// poor candidate as mostly-inliers and cut the loop short.
    fn update_iterations_needed(&mut self) {
        let best_position = match self.best_position {
            Some(p) => p,
            None => return,
        };
        let n = self.positions.len();
        let k = self.params.preliminary_subset_size;
        let count = (0..n)
            .filter(|&i| {
                let r = self.residual(&best_position, i);
                r.abs() <= 2.5 * self.std_devs[i]
            })
            .count();

        let ratio = count as f64 / n as f64;
        let p_all_inliers = ratio.powi(k as i32);

        self.iterations_needed = if p_all_inliers >= 1.0 {
            1
        } else if p_all_inliers <= 0.0 {
            self.params.max_iterations
        } else {
            let numerator = (1.0 - self.params.confidence).ln();
            let denominator = (1.0 - p_all_inliers).ln();
            (numerator / denominator).ceil() as usize
        }
        .clamp(1, self.params.max_iterations);
    }

    /// Inlier selection and final refinement.
    ///
    /// Return
    /// ----------
    /// * `Ok(RobustEstimate)` – winning position (refined over all inliers
    ///   when `result_refined` is set), covariance when kept, and the
    ///   populated [`InliersData`].
    /// * `Err(PosfitError::RobustEstimationFailure)` – no subset ever
    ///   produced a usable candidate.
    pub(crate) fn finish(self) -> Result<RobustEstimate<D>, PosfitError> {
        let best_position = self
            .best_position
            .ok_or(PosfitError::RobustEstimationFailure)?;

        let threshold = self.derived_threshold();
        let scale = self.residual_scale();
        let (flags, residuals, num_inliers) = self.classify(&best_position, threshold);

        let mut position = best_position;
        let mut covariance = None;

        if self.params.result_refined && num_inliers >= min_required_measurements::<D>() {
            let in_positions: Vec<_> = (0..flags.len())
                .filter(|&i| flags[i])
                .map(|i| self.positions[i])
                .collect();
            let in_distances: Vec<_> = (0..flags.len())
                .filter(|&i| flags[i])
                .map(|i| self.distances[i])
                .collect();
            let in_std_devs: Vec<_> = (0..flags.len())
                .filter(|&i| flags[i])
                .map(|i| self.std_devs[i])
                .collect();

            // A numerical failure of this single final pass keeps the best
            // preliminary candidate instead of failing the whole run.
            if let Ok(refined) = nonlinear::refine_gauss_newton(
                best_position,
                &in_positions,
                &in_distances,
                &in_std_devs,
                self.params.covariance_kept,
                self.params.max_refinement_iterations,
                self.params.refinement_eps,
            ) {
                position = refined.position;
                covariance = refined.covariance;
            }
        }

        Ok(RobustEstimate {
            position,
            covariance,
            inliers: InliersData {
                inliers: flags,
                residuals,
                scale,
            },
            iterations: self.iteration,
        })
    }
}
