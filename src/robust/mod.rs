//! # Robust PROMedS estimation parameters
//!
//! This module defines the [`PromedsParams`] configuration struct and its
//! builder, which control how the robust loop samples preliminary subsets,
//! scores candidate solutions, decides when to stop, and refines the final
//! estimate.
//!
//! ## Purpose
//!
//! The [`PromedsParams`] object centralizes all tunable parameters used by the
//! robust position estimator. It allows you to:
//!
//! - Bound the robust loop (`max_iterations`, `confidence`, `stop_threshold`),
//! - Select the preliminary solving path (linear/homogeneous/non-linear,
//!   optional per-candidate refinement),
//! - Control subset sampling (`preliminary_subset_size`,
//!   `evenly_distribute_readings`),
//! - Steer the final pass (`result_refined`, `covariance_kept`),
//! - Tune measurement weighting (`fallback_distance_std_dev`,
//!   `radio_source_position_covariance_used`),
//! - Throttle progress callbacks (`progress_delta`).
//!
//! ## Pipeline overview
//!
//! 1. **Subset sampling** – one subset of `preliminary_subset_size` pairs per
//!    iteration, biased toward high quality scores.
//! 2. **Preliminary solve** – each subset is laterated; with
//!    `preliminary_solution_refined` the candidate gets its own Gauss–Newton
//!    polish.
//! 3. **Scoring** – every candidate is scored by the quality-weighted median
//!    of squared residuals over *all* pairs; the lowest score wins.
//! 4. **Stop** – at `max_iterations`, at the adaptive confidence-based bound,
//!    or as soon as the best score drops below `stop_threshold`.
//! 5. **Inliers & final refine** – pairs within the derived threshold are
//!    inliers; with `result_refined` the estimate is re-solved over them,
//!    honoring `covariance_kept`.
//!
//! ## Example
//!
//! ```rust
//! use posfit::robust::PromedsParams;
//!
//! let params = PromedsParams::builder()
//!     .max_iterations(2000)
//!     .confidence(0.99)
//!     .stop_threshold(1e-9)
//!     .preliminary_subset_size(4)
//!     .result_refined(true)
//!     .covariance_kept(true)
//!     .build()
//!     .unwrap();
//! assert_eq!(params.preliminary_subset_size, 4);
//! ```

use std::cmp::Ordering::{Equal, Greater, Less};
use std::fmt;

use crate::constants::DEFAULT_FALLBACK_DISTANCE_STD_DEV;
use crate::posfit_errors::PosfitError;

pub mod inliers;
pub mod promeds;
pub mod sampler;

pub use inliers::InliersData;

/// Configuration parameters controlling the robust PROMedS loop.
///
/// Fields
/// -----------------
/// **Loop bounds**
/// * `stop_threshold` – best-score level (squared meters) below which the loop
///   stops early; must be > 0.
/// * `confidence` – target probability of having sampled at least one
///   outlier-free subset, in `[0, 1)`; drives the adaptive iteration bound.
/// * `max_iterations` – hard cap on robust iterations, ≥ 1.
/// * `progress_delta` – minimum fractional progress between two progress
///   callbacks, in `[0, 1]`; `0` reports every iteration.
///
/// **Sampling**
/// * `preliminary_subset_size` – pairs per candidate subset, ≥ 3 (and ≥ D + 1
///   for the estimator's dimensionality, enforced by the facade).
/// * `evenly_distribute_readings` – avoid drawing several readings of the same
///   source into one subset while other sources remain available.
///
/// **Solving paths**
/// * `linear_solver_used` – seed candidates with a linear solve.
/// * `homogeneous_linear_solver_used` – pick the homogeneous linear variant.
/// * `preliminary_solution_refined` – Gauss–Newton polish per candidate.
/// * `result_refined` – final re-solve over all inliers.
/// * `covariance_kept` – compute the covariance of the final estimate.
///
/// **Measurement weighting**
/// * `radio_source_position_covariance_used` – fold each source's position
///   covariance into its readings' distance deviations.
/// * `fallback_distance_std_dev` – deviation (meters) assumed when a reading
///   carries no usable one; must be > 0.
///
/// **Refinement numerics**
/// * `max_refinement_iterations` – Gauss–Newton iteration cap, ≥ 1.
/// * `refinement_eps` – Gauss–Newton step tolerance, > 0.
#[derive(Debug, Clone, PartialEq)]
pub struct PromedsParams {
    // --- Loop bounds ---
    pub stop_threshold: f64,
    pub confidence: f64,
    pub max_iterations: usize,
    pub progress_delta: f64,

    // --- Sampling ---
    pub preliminary_subset_size: usize,
    pub evenly_distribute_readings: bool,

    // --- Solving paths ---
    pub linear_solver_used: bool,
    pub homogeneous_linear_solver_used: bool,
    pub preliminary_solution_refined: bool,
    pub result_refined: bool,
    pub covariance_kept: bool,

    // --- Measurement weighting ---
    pub radio_source_position_covariance_used: bool,
    pub fallback_distance_std_dev: f64,

    // --- Refinement numerics ---
    pub max_refinement_iterations: usize,
    pub refinement_eps: f64,
}

impl PromedsParams {
    /// Construct a new [`PromedsParams`] with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new [`PromedsParamsBuilder`] to configure custom parameters.
    pub fn builder() -> PromedsParamsBuilder {
        PromedsParamsBuilder::new()
    }
}

impl Default for PromedsParams {
    fn default() -> Self {
        PromedsParams {
            stop_threshold: 1e-9,
            confidence: 0.99,
            max_iterations: 5000,
            progress_delta: 0.05,

            preliminary_subset_size: 3,
            evenly_distribute_readings: true,

            linear_solver_used: true,
            homogeneous_linear_solver_used: false,
            preliminary_solution_refined: false,
            result_refined: true,
            covariance_kept: false,

            radio_source_position_covariance_used: false,
            fallback_distance_std_dev: DEFAULT_FALLBACK_DISTANCE_STD_DEV,

            max_refinement_iterations: 50,
            refinement_eps: 1e-10,
        }
    }
}

/// Builder for [`PromedsParams`], with validation.
#[derive(Debug, Clone, Default)]
pub struct PromedsParamsBuilder {
    params: PromedsParams,
}

impl PromedsParamsBuilder {
    pub fn new() -> Self {
        Self {
            params: PromedsParams::default(),
        }
    }

    // --- Loop bounds ---
    pub fn stop_threshold(mut self, v: f64) -> Self {
        self.params.stop_threshold = v;
        self
    }
    pub fn confidence(mut self, v: f64) -> Self {
        self.params.confidence = v;
        self
    }
    pub fn max_iterations(mut self, v: usize) -> Self {
        self.params.max_iterations = v;
        self
    }
    pub fn progress_delta(mut self, v: f64) -> Self {
        self.params.progress_delta = v;
        self
    }

    // --- Sampling ---
    pub fn preliminary_subset_size(mut self, v: usize) -> Self {
        self.params.preliminary_subset_size = v;
        self
    }
    pub fn evenly_distribute_readings(mut self, v: bool) -> Self {
        self.params.evenly_distribute_readings = v;
        self
    }

    // --- Solving paths ---
    pub fn linear_solver_used(mut self, v: bool) -> Self {
        self.params.linear_solver_used = v;
        self
    }
    pub fn homogeneous_linear_solver_used(mut self, v: bool) -> Self {
        self.params.homogeneous_linear_solver_used = v;
        self
    }
    pub fn preliminary_solution_refined(mut self, v: bool) -> Self {
        self.params.preliminary_solution_refined = v;
        self
    }
    pub fn result_refined(mut self, v: bool) -> Self {
        self.params.result_refined = v;
        self
    }
    pub fn covariance_kept(mut self, v: bool) -> Self {
        self.params.covariance_kept = v;
        self
    }

    // --- Measurement weighting ---
    pub fn radio_source_position_covariance_used(mut self, v: bool) -> Self {
        self.params.radio_source_position_covariance_used = v;
        self
    }
    pub fn fallback_distance_std_dev(mut self, v: f64) -> Self {
        self.params.fallback_distance_std_dev = v;
        self
    }

    // --- Refinement numerics ---
    pub fn max_refinement_iterations(mut self, v: usize) -> Self {
        self.params.max_refinement_iterations = v;
        self
    }
    pub fn refinement_eps(mut self, v: f64) -> Self {
        self.params.refinement_eps = v;
        self
    }

    // ---- Numeric helpers for PartialOrd (handle NaN as invalid) ----

    /// Return true iff x > 0.0 and comparable (i.e., not NaN).
    #[inline]
    fn gt0(x: f64) -> bool {
        x.partial_cmp(&0.0) == Some(Greater)
    }

    /// Return true iff x >= 0.0 and comparable (i.e., not NaN).
    #[inline]
    fn ge0(x: f64) -> bool {
        matches!(x.partial_cmp(&0.0), Some(Greater) | Some(Equal))
    }

    /// Return true iff a < b and comparable (i.e., not NaN).
    #[inline]
    fn lt(a: f64, b: f64) -> bool {
        a.partial_cmp(&b) == Some(Less)
    }

    /// Finalize the builder and produce a [`PromedsParams`] instance.
    ///
    /// Validation rules
    /// -----------------
    /// * `stop_threshold > 0`,
    /// * `confidence ∈ [0, 1)` – the adaptive bound diverges at 1,
    /// * `max_iterations ≥ 1`,
    /// * `progress_delta ∈ [0, 1]` – negative values are rejected,
    /// * `preliminary_subset_size ≥ 3` – the absolute geometric floor; the
    ///   estimator facade additionally enforces `≥ D + 1`,
    /// * `fallback_distance_std_dev > 0`,
    /// * `max_refinement_iterations ≥ 1`, `refinement_eps > 0`.
    ///
    /// Return
    /// ----------
    /// * `Ok(PromedsParams)` if all values are valid.
    /// * `Err(PosfitError::InvalidParameter)` if any validation rule fails.
    pub fn build(self) -> Result<PromedsParams, PosfitError> {
        let p = &self.params;

        if !Self::gt0(p.stop_threshold) {
            return Err(PosfitError::InvalidParameter(
                "stop_threshold must be > 0".into(),
            ));
        }
        if !(Self::ge0(p.confidence) && Self::lt(p.confidence, 1.0)) {
            return Err(PosfitError::InvalidParameter(
                "confidence must be in [0, 1)".into(),
            ));
        }
        if p.max_iterations == 0 {
            return Err(PosfitError::InvalidParameter(
                "max_iterations must be >= 1".into(),
            ));
        }
        if !(Self::ge0(p.progress_delta) && !Self::lt(1.0, p.progress_delta)) {
            return Err(PosfitError::InvalidParameter(
                "progress_delta must be in [0, 1]".into(),
            ));
        }
        if p.preliminary_subset_size < 3 {
            return Err(PosfitError::InvalidParameter(
                "preliminary_subset_size must be >= 3".into(),
            ));
        }
        if !Self::gt0(p.fallback_distance_std_dev) {
            return Err(PosfitError::InvalidParameter(
                "fallback_distance_std_dev must be > 0".into(),
            ));
        }
        if p.max_refinement_iterations == 0 {
            return Err(PosfitError::InvalidParameter(
                "max_refinement_iterations must be >= 1".into(),
            ));
        }
        if !Self::gt0(p.refinement_eps) {
            return Err(PosfitError::InvalidParameter(
                "refinement_eps must be > 0".into(),
            ));
        }

        Ok(self.params)
    }
}

impl fmt::Display for PromedsParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            const PARAM_COL: usize = 44; // width reserved for "name = value"
            writeln!(f, "PROMedS Estimation Parameters")?;
            writeln!(f, "-----------------------------")?;

            macro_rules! line {
                ($fmt:expr, $val:expr, $comment:expr) => {{
                    let s = format!($fmt, $val);
                    let pad = if s.len() < PARAM_COL {
                        " ".repeat(PARAM_COL - s.len())
                    } else {
                        " ".to_string()
                    };
                    writeln!(f, "  {}{}# {}", s, pad, $comment)
                }};
            }

            writeln!(f, "[Loop bounds]")?;
            line!(
                "stop_threshold       = {:.1e}",
                self.stop_threshold,
                "Early-stop level on the best score"
            )?;
            line!(
                "confidence           = {:.3}",
                self.confidence,
                "Probability of one outlier-free subset"
            )?;
            line!(
                "max_iterations       = {}",
                self.max_iterations,
                "Hard iteration cap"
            )?;
            line!(
                "progress_delta       = {:.3}",
                self.progress_delta,
                "Minimum progress between callbacks"
            )?;

            writeln!(f, "\n[Sampling]")?;
            line!(
                "preliminary_subset_size = {}",
                self.preliminary_subset_size,
                "Pairs per candidate subset"
            )?;
            line!(
                "evenly_distribute_readings = {}",
                self.evenly_distribute_readings,
                "Spread subsets across sources"
            )?;

            writeln!(f, "\n[Solving paths]")?;
            line!(
                "linear_solver_used   = {}",
                self.linear_solver_used,
                "Linear preliminary solve"
            )?;
            line!(
                "homogeneous_linear_solver_used = {}",
                self.homogeneous_linear_solver_used,
                "Homogeneous linear variant"
            )?;
            line!(
                "preliminary_solution_refined = {}",
                self.preliminary_solution_refined,
                "Per-candidate Gauss-Newton polish"
            )?;
            line!(
                "result_refined       = {}",
                self.result_refined,
                "Final re-solve over inliers"
            )?;
            line!(
                "covariance_kept      = {}",
                self.covariance_kept,
                "Covariance of the final estimate"
            )?;

            writeln!(f, "\n[Measurement weighting]")?;
            line!(
                "radio_source_position_covariance_used = {}",
                self.radio_source_position_covariance_used,
                "Inflate deviations with source covariance"
            )?;
            line!(
                "fallback_distance_std_dev = {:.1e} m",
                self.fallback_distance_std_dev,
                "Deviation for readings without one"
            )?;

            writeln!(f, "\n[Refinement numerics]")?;
            line!(
                "max_refinement_iterations = {}",
                self.max_refinement_iterations,
                "Gauss-Newton iteration cap"
            )?;
            line!(
                "refinement_eps       = {:.1e}",
                self.refinement_eps,
                "Gauss-Newton step tolerance"
            )?;

            Ok(())
        } else {
            write!(
                f,
                "PromedsParams(stop_threshold={:.1e}, confidence={:.2}, max_iterations={}, subset_size={}, linear={}, refined={}, covariance={})",
                self.stop_threshold,
                self.confidence,
                self.max_iterations,
                self.preliminary_subset_size,
                self.linear_solver_used,
                self.result_refined,
                self.covariance_kept,
            )
        }
    }
}

#[cfg(test)]
mod promeds_params_tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = PromedsParams::default();
        assert_eq!(params.max_iterations, 5000);
        assert_eq!(params.preliminary_subset_size, 3);
        assert!(params.linear_solver_used);
        assert!(params.result_refined);
        assert!(!params.covariance_kept);
        assert!(params.evenly_distribute_readings);
    }

    #[test]
    fn test_builder_overrides() {
        let params = PromedsParams::builder()
            .max_iterations(100)
            .confidence(0.95)
            .preliminary_subset_size(5)
            .covariance_kept(true)
            .build()
            .unwrap();
        assert_eq!(params.max_iterations, 100);
        assert_eq!(params.confidence, 0.95);
        assert_eq!(params.preliminary_subset_size, 5);
        assert!(params.covariance_kept);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(PromedsParams::builder().stop_threshold(0.0).build().is_err());
        assert!(PromedsParams::builder().stop_threshold(f64::NAN).build().is_err());
        assert!(PromedsParams::builder().confidence(1.0).build().is_err());
        assert!(PromedsParams::builder().confidence(-0.1).build().is_err());
        assert!(PromedsParams::builder().max_iterations(0).build().is_err());
        assert!(PromedsParams::builder().progress_delta(-0.5).build().is_err());
        assert!(PromedsParams::builder().progress_delta(1.5).build().is_err());
        assert!(PromedsParams::builder()
            .preliminary_subset_size(2)
            .build()
            .is_err());
        assert!(PromedsParams::builder()
            .fallback_distance_std_dev(0.0)
            .build()
            .is_err());
        assert!(PromedsParams::builder().refinement_eps(-1.0).build().is_err());
        assert!(PromedsParams::builder()
            .max_refinement_iterations(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_display_alternate_lists_sections() {
        let text = format!("{:#}", PromedsParams::default());
        assert!(text.contains("[Loop bounds]"));
        assert!(text.contains("[Sampling]"));
        assert!(text.contains("[Solving paths]"));
    }
}
