//! # Position estimator facade
//!
//! [`PositionEstimator`] assembles the pieces of the pipeline — sources,
//! fingerprint, quality scores, the path-loss model, and the PROMedS
//! parameters — derives the flattened (position, distance, deviation) arrays,
//! and wraps the robust loop in a locking state machine:
//!
//! * every configuration setter checks the lock before validating,
//! * `estimate()` locks for its whole duration, fires the lifecycle and
//!   progress callbacks synchronously, and releases the lock on every exit
//!   path — success or error — before returning,
//! * re-entrant calls (setters or `estimate()` itself, including from inside
//!   listener callbacks) fail with
//!   [`PosfitError::EstimatorLocked`].
//!
//! The 2D and 3D estimators are the [`PositionEstimator2D`] and
//! [`PositionEstimator3D`] aliases of the same const-generic core; ranging and
//! RSSI readings mix freely inside one fingerprint and are flattened through
//! the same path.
//!
//! ## Example
//!
//! ```rust
//! use nalgebra::Vector2;
//! use posfit::estimator::PositionEstimator2D;
//! use posfit::fingerprint::{Fingerprint, Reading};
//! use posfit::sources::RadioSource2D;
//!
//! let truth = Vector2::new(2.0, 3.0);
//! let sources: Vec<RadioSource2D> = [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0), (10.0, 10.0)]
//!     .iter()
//!     .enumerate()
//!     .map(|(i, &(x, y))| RadioSource2D::new(i as u64, 2412.0, Vector2::new(x, y)))
//!     .collect();
//! let fingerprint = Fingerprint::from_readings(sources.iter().map(|s| {
//!     Reading::ranging(s.id.clone(), (s.position - truth).norm())
//! }));
//!
//! let mut estimator =
//!     PositionEstimator2D::with_sources_and_fingerprint(sources, fingerprint).unwrap();
//! let estimate = estimator.estimate().unwrap();
//! assert!((estimate.position - truth).norm() < 1e-6);
//! ```

use std::collections::HashMap;
use std::fmt;

use ahash::RandomState;
use itertools::Itertools;
use nalgebra::{SMatrix, SVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::constants::{Meter, SourceId};
use crate::fingerprint::{Fingerprint, Reading};
use crate::lateration::min_required_measurements;
use crate::posfit_errors::PosfitError;
use crate::radio_model::PathLossModel;
use crate::robust::inliers::InliersData;
use crate::robust::promeds::{LoopStep, PromedsLoop, RobustEstimate};
use crate::robust::PromedsParams;
use crate::sources::RadioSource;

pub mod batch;
pub mod listener;
#[cfg(feature = "progress")]
pub mod progress_bar;

pub use listener::EstimationListener;

/// Final output of a successful estimation.
///
/// The covariance is present only when `covariance_kept` was enabled and the
/// final refinement produced one; it is symmetric positive semi-definite.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatedPosition<const D: usize> {
    pub position: SVector<f64, D>,
    pub covariance: Option<SMatrix<f64, D, D>>,
}

/// Estimated position on a plane.
pub type EstimatedPosition2D = EstimatedPosition<2>;
/// Estimated position in space.
pub type EstimatedPosition3D = EstimatedPosition<3>;

/// Flattened (source, reading) pairs, one entry per matched reading.
///
/// Built once per `estimate()` call and treated as immutable for that call's
/// duration; `source_of`/`reading_of` map each pair back to its entities.
pub(crate) struct FlattenedMeasurements<const D: usize> {
    pub positions: Vec<SVector<f64, D>>,
    pub distances: Vec<Meter>,
    pub std_devs: Vec<f64>,
    pub quality_scores: Vec<f64>,
    pub source_of: Vec<usize>,
    pub reading_of: Vec<usize>,
    pub distinct_sources: usize,
}

/// Robust 2D/3D position estimator with a locking configuration state machine.
///
/// See the [module documentation](self) for the lifecycle contract.
pub struct PositionEstimator<const D: usize> {
    sources: Vec<RadioSource<D>>,
    fingerprint: Fingerprint,
    source_quality_scores: Option<Vec<f64>>,
    reading_quality_scores: Option<Vec<f64>>,
    radio_model: PathLossModel,
    params: PromedsParams,
    initial_position: Option<SVector<f64, D>>,
    listener: Option<Box<dyn EstimationListener<D>>>,
    inliers_data: Option<InliersData>,
    locked: bool,
}

/// Robust position estimator on a plane.
pub type PositionEstimator2D = PositionEstimator<2>;
/// Robust position estimator in space.
pub type PositionEstimator3D = PositionEstimator<3>;

impl<const D: usize> Default for PositionEstimator<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const D: usize> PositionEstimator<D> {
    /// Build an empty, not-yet-ready estimator with default parameters.
    ///
    /// The default preliminary subset size is the geometric minimum for the
    /// dimensionality (3 in 2D, 4 in 3D).
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            fingerprint: Fingerprint::new(),
            source_quality_scores: None,
            reading_quality_scores: None,
            radio_model: PathLossModel::default(),
            params: PromedsParams {
                preliminary_subset_size: min_required_measurements::<D>(),
                ..PromedsParams::default()
            },
            initial_position: None,
            listener: None,
            inliers_data: None,
            locked: false,
        }
    }

    /// Build an estimator from sources and a fingerprint.
    ///
    /// Return
    /// ----------
    /// * `Err(PosfitError::InvalidParameter)` if either collection is empty.
    pub fn with_sources_and_fingerprint(
        sources: Vec<RadioSource<D>>,
        fingerprint: Fingerprint,
    ) -> Result<Self, PosfitError> {
        let mut estimator = Self::new();
        estimator.set_sources(sources)?;
        estimator.set_fingerprint(fingerprint)?;
        Ok(estimator)
    }

    /// Build an estimator from sources, a fingerprint, and a listener.
    pub fn with_listener(
        sources: Vec<RadioSource<D>>,
        fingerprint: Fingerprint,
        listener: Box<dyn EstimationListener<D>>,
    ) -> Result<Self, PosfitError> {
        let mut estimator = Self::with_sources_and_fingerprint(sources, fingerprint)?;
        estimator.set_listener(Some(listener))?;
        Ok(estimator)
    }

    /// Build an estimator from sources, a fingerprint, and both quality-score
    /// arrays.
    ///
    /// Return
    /// ----------
    /// * `Err(PosfitError::QualityScoreLengthMismatch)` when an array length
    ///   does not match the corresponding entity count.
    /// * `Err(PosfitError::InvalidParameter)` for empty collections or
    ///   non-positive scores.
    pub fn with_quality_scores(
        sources: Vec<RadioSource<D>>,
        fingerprint: Fingerprint,
        source_quality_scores: Vec<f64>,
        reading_quality_scores: Vec<f64>,
    ) -> Result<Self, PosfitError> {
        let mut estimator = Self::with_sources_and_fingerprint(sources, fingerprint)?;
        estimator.set_source_quality_scores(Some(source_quality_scores))?;
        estimator.set_fingerprint_reading_quality_scores(Some(reading_quality_scores))?;
        Ok(estimator)
    }

    // ---------------------------------------------------------------------
    // Getters
    // ---------------------------------------------------------------------

    pub fn sources(&self) -> &[RadioSource<D>] {
        &self.sources
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn source_quality_scores(&self) -> Option<&[f64]> {
        self.source_quality_scores.as_deref()
    }

    pub fn fingerprint_reading_quality_scores(&self) -> Option<&[f64]> {
        self.reading_quality_scores.as_deref()
    }

    pub fn radio_model(&self) -> &PathLossModel {
        &self.radio_model
    }

    pub fn params(&self) -> &PromedsParams {
        &self.params
    }

    pub fn initial_position(&self) -> Option<&SVector<f64, D>> {
        self.initial_position.as_ref()
    }

    /// Whether an estimation is currently running on this instance.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Inlier classification of the last successful `estimate()` call.
    pub fn inliers_data(&self) -> Option<&InliersData> {
        self.inliers_data.as_ref()
    }

    /// Source positions of the flattened pairs, one per matched reading.
    pub fn positions(&self) -> Vec<SVector<f64, D>> {
        self.flatten().positions
    }

    /// Measured (or RSSI-derived) distances of the flattened pairs.
    pub fn distances(&self) -> Vec<Meter> {
        self.flatten().distances
    }

    /// Distance standard deviations of the flattened pairs, fallback applied.
    pub fn distance_standard_deviations(&self) -> Vec<f64> {
        self.flatten().std_devs
    }

    /// `(source index, reading index)` of each flattened pair, in the same
    /// order as [`positions`](PositionEstimator::positions) and the entries of
    /// [`inliers_data`](PositionEstimator::inliers_data).
    pub fn matched_pairs(&self) -> Vec<(usize, usize)> {
        let flat = self.flatten();
        flat.source_of
            .into_iter()
            .zip(flat.reading_of)
            .collect()
    }

    // ---------------------------------------------------------------------
    // Guarded setters
    // ---------------------------------------------------------------------

    fn ensure_unlocked(&self) -> Result<(), PosfitError> {
        if self.locked {
            Err(PosfitError::EstimatorLocked)
        } else {
            Ok(())
        }
    }

    fn validate_scores(scores: &[f64], expected: usize) -> Result<(), PosfitError> {
        if scores.len() != expected {
            return Err(PosfitError::QualityScoreLengthMismatch {
                expected,
                got: scores.len(),
            });
        }
        if scores.iter().any(|&q| !(q.is_finite() && q > 0.0)) {
            return Err(PosfitError::InvalidParameter(
                "quality scores must be finite and > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn set_sources(&mut self, sources: Vec<RadioSource<D>>) -> Result<(), PosfitError> {
        self.ensure_unlocked()?;
        if sources.is_empty() {
            return Err(PosfitError::InvalidParameter(
                "sources must not be empty".into(),
            ));
        }
        self.sources = sources;
        Ok(())
    }

    pub fn set_fingerprint(&mut self, fingerprint: Fingerprint) -> Result<(), PosfitError> {
        self.ensure_unlocked()?;
        if fingerprint.is_empty() {
            return Err(PosfitError::InvalidParameter(
                "fingerprint must contain at least one reading".into(),
            ));
        }
        self.fingerprint = fingerprint;
        Ok(())
    }

    /// Per-source quality scores, parallel to the sources array; `None`
    /// clears them (all sources weigh equally).
    pub fn set_source_quality_scores(
        &mut self,
        scores: Option<Vec<f64>>,
    ) -> Result<(), PosfitError> {
        self.ensure_unlocked()?;
        if let Some(ref scores) = scores {
            Self::validate_scores(scores, self.sources.len())?;
        }
        self.source_quality_scores = scores;
        Ok(())
    }

    /// Per-reading quality scores, parallel to the fingerprint readings;
    /// `None` clears them.
    pub fn set_fingerprint_reading_quality_scores(
        &mut self,
        scores: Option<Vec<f64>>,
    ) -> Result<(), PosfitError> {
        self.ensure_unlocked()?;
        if let Some(ref scores) = scores {
            Self::validate_scores(scores, self.fingerprint.len())?;
        }
        self.reading_quality_scores = scores;
        Ok(())
    }

    pub fn set_listener(
        &mut self,
        listener: Option<Box<dyn EstimationListener<D>>>,
    ) -> Result<(), PosfitError> {
        self.ensure_unlocked()?;
        self.listener = listener;
        Ok(())
    }

    pub fn set_radio_model(&mut self, radio_model: PathLossModel) -> Result<(), PosfitError> {
        self.ensure_unlocked()?;
        self.radio_model = radio_model;
        Ok(())
    }

    /// Hint for the non-linear solving path; `None` falls back to the
    /// distance-weighted source centroid.
    pub fn set_initial_position(
        &mut self,
        initial_position: Option<SVector<f64, D>>,
    ) -> Result<(), PosfitError> {
        self.ensure_unlocked()?;
        self.initial_position = initial_position;
        Ok(())
    }

    /// Replace the whole parameter set at once.
    pub fn set_params(&mut self, params: PromedsParams) -> Result<(), PosfitError> {
        self.ensure_unlocked()?;
        if params.preliminary_subset_size < min_required_measurements::<D>() {
            return Err(PosfitError::InvalidParameter(format!(
                "preliminary_subset_size must be >= {} for {}D lateration",
                min_required_measurements::<D>(),
                D
            )));
        }
        self.params = params;
        Ok(())
    }

    pub fn set_stop_threshold(&mut self, stop_threshold: f64) -> Result<(), PosfitError> {
        self.ensure_unlocked()?;
        if !(stop_threshold > 0.0) {
            return Err(PosfitError::InvalidParameter(
                "stop_threshold must be > 0".into(),
            ));
        }
        self.params.stop_threshold = stop_threshold;
        Ok(())
    }

    pub fn set_confidence(&mut self, confidence: f64) -> Result<(), PosfitError> {
        self.ensure_unlocked()?;
        if !(confidence >= 0.0 && confidence < 1.0) {
            return Err(PosfitError::InvalidParameter(
                "confidence must be in [0, 1)".into(),
            ));
        }
        self.params.confidence = confidence;
        Ok(())
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) -> Result<(), PosfitError> {
        self.ensure_unlocked()?;
        if max_iterations == 0 {
            return Err(PosfitError::InvalidParameter(
                "max_iterations must be >= 1".into(),
            ));
        }
        self.params.max_iterations = max_iterations;
        Ok(())
    }

    pub fn set_progress_delta(&mut self, progress_delta: f64) -> Result<(), PosfitError> {
        self.ensure_unlocked()?;
        if !(progress_delta >= 0.0 && progress_delta <= 1.0) {
            return Err(PosfitError::InvalidParameter(
                "progress_delta must be in [0, 1]".into(),
            ));
        }
        self.params.progress_delta = progress_delta;
        Ok(())
    }

    pub fn set_preliminary_subset_size(&mut self, size: usize) -> Result<(), PosfitError> {
        self.ensure_unlocked()?;
        if size < min_required_measurements::<D>() {
            return Err(PosfitError::InvalidParameter(format!(
                "preliminary_subset_size must be >= {} for {}D lateration",
                min_required_measurements::<D>(),
                D
            )));
        }
        self.params.preliminary_subset_size = size;
        Ok(())
    }

    pub fn set_fallback_distance_std_dev(&mut self, std_dev: f64) -> Result<(), PosfitError> {
        self.ensure_unlocked()?;
        if !(std_dev > 0.0) {
            return Err(PosfitError::InvalidParameter(
                "fallback_distance_std_dev must be > 0".into(),
            ));
        }
        self.params.fallback_distance_std_dev = std_dev;
        Ok(())
    }

    pub fn set_linear_solver_used(&mut self, used: bool) -> Result<(), PosfitError> {
        self.ensure_unlocked()?;
        self.params.linear_solver_used = used;
        Ok(())
    }

    pub fn set_homogeneous_linear_solver_used(&mut self, used: bool) -> Result<(), PosfitError> {
        self.ensure_unlocked()?;
        self.params.homogeneous_linear_solver_used = used;
        Ok(())
    }

    pub fn set_preliminary_solution_refined(&mut self, refined: bool) -> Result<(), PosfitError> {
        self.ensure_unlocked()?;
        self.params.preliminary_solution_refined = refined;
        Ok(())
    }

    pub fn set_result_refined(&mut self, refined: bool) -> Result<(), PosfitError> {
        self.ensure_unlocked()?;
        self.params.result_refined = refined;
        Ok(())
    }

    pub fn set_covariance_kept(&mut self, kept: bool) -> Result<(), PosfitError> {
        self.ensure_unlocked()?;
        self.params.covariance_kept = kept;
        Ok(())
    }

    pub fn set_evenly_distribute_readings(&mut self, evenly: bool) -> Result<(), PosfitError> {
        self.ensure_unlocked()?;
        self.params.evenly_distribute_readings = evenly;
        Ok(())
    }

    pub fn set_radio_source_position_covariance_used(
        &mut self,
        used: bool,
    ) -> Result<(), PosfitError> {
        self.ensure_unlocked()?;
        self.params.radio_source_position_covariance_used = used;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Readiness and flattening
    // ---------------------------------------------------------------------

    /// Whether `estimate()` can run: sources, fingerprint, and quality-score
    /// arrays are jointly present, consistent, and sufficient in count.
    pub fn is_ready(&self) -> bool {
        self.readiness_issue().is_none()
    }

    fn readiness_issue(&self) -> Option<String> {
        if self.sources.is_empty() {
            return Some("no sources configured".into());
        }
        if self.fingerprint.is_empty() {
            return Some("no fingerprint readings configured".into());
        }
        if let Some(ref scores) = self.source_quality_scores {
            if scores.len() != self.sources.len() {
                return Some(format!(
                    "{} source quality scores for {} sources",
                    scores.len(),
                    self.sources.len()
                ));
            }
        }
        if let Some(ref scores) = self.reading_quality_scores {
            if scores.len() != self.fingerprint.len() {
                return Some(format!(
                    "{} reading quality scores for {} readings",
                    scores.len(),
                    self.fingerprint.len()
                ));
            }
        }
        let flat = self.flatten();
        if flat.positions.len() < self.params.preliminary_subset_size {
            return Some(format!(
                "{} matched measurements, need at least {}",
                flat.positions.len(),
                self.params.preliminary_subset_size
            ));
        }
        if flat.distinct_sources < min_required_measurements::<D>() {
            return Some(format!(
                "{} distinct sources, need at least {}",
                flat.distinct_sources,
                min_required_measurements::<D>()
            ));
        }
        None
    }

    /// Flatten the (source, reading) pairs into parallel arrays.
    ///
    /// Readings referencing an unknown source id are skipped. RSSI readings
    /// are converted through the path-loss model; a reading deviation that is
    /// missing or non-usable falls back to `fallback_distance_std_dev`, and
    /// the source position covariance is folded in when enabled.
    pub(crate) fn flatten(&self) -> FlattenedMeasurements<D> {
        let index: HashMap<&SourceId, usize, RandomState> = self
            .sources
            .iter()
            .enumerate()
            .map(|(i, s)| (&s.id, i))
            .collect();

        let usable = |s: f64| s.is_finite() && s > 0.0;

        let mut flat = FlattenedMeasurements {
            positions: Vec::with_capacity(self.fingerprint.len()),
            distances: Vec::with_capacity(self.fingerprint.len()),
            std_devs: Vec::with_capacity(self.fingerprint.len()),
            quality_scores: Vec::with_capacity(self.fingerprint.len()),
            source_of: Vec::with_capacity(self.fingerprint.len()),
            reading_of: Vec::with_capacity(self.fingerprint.len()),
            distinct_sources: 0,
        };

        for (reading_idx, reading) in self.fingerprint.iter().enumerate() {
            let Some(&source_idx) = index.get(reading.source()) else {
                continue;
            };
            let source = &self.sources[source_idx];

            let (distance, own_std_dev) = match reading {
                Reading::Ranging {
                    distance, std_dev, ..
                } => (*distance, (*std_dev).filter(|&s| usable(s))),
                Reading::Rssi { rssi, std_dev, .. } => {
                    let d = self.radio_model.distance(*rssi);
                    let s = (*std_dev)
                        .filter(|&s| usable(s))
                        .map(|s| self.radio_model.distance_std_dev(*rssi, s));
                    (d, s)
                }
            };

            let mut std_dev = own_std_dev.unwrap_or(self.params.fallback_distance_std_dev);
            if self.params.radio_source_position_covariance_used {
                if let Some(position_std_dev) = source.position_std_dev() {
                    std_dev = (std_dev * std_dev + position_std_dev * position_std_dev).sqrt();
                }
            }

            let source_score = self
                .source_quality_scores
                .as_ref()
                .and_then(|scores| scores.get(source_idx).copied())
                .unwrap_or(1.0);
            let reading_score = self
                .reading_quality_scores
                .as_ref()
                .and_then(|scores| scores.get(reading_idx).copied())
                .unwrap_or(1.0);

            flat.positions.push(source.position);
            flat.distances.push(distance);
            flat.std_devs.push(std_dev);
            flat.quality_scores.push(source_score * reading_score);
            flat.source_of.push(source_idx);
            flat.reading_of.push(reading_idx);
        }

        flat.distinct_sources = flat.source_of.iter().unique().count();

        flat
    }

    // ---------------------------------------------------------------------
    // Estimation
    // ---------------------------------------------------------------------

    /// Run the robust estimation with an OS-seeded generator.
    ///
    /// See [`PositionEstimator::estimate_with_rng`] for the full contract.
    pub fn estimate(&mut self) -> Result<EstimatedPosition<D>, PosfitError> {
        let mut rng = StdRng::from_os_rng();
        self.estimate_with_rng(&mut rng)
    }

    /// Run the robust estimation with a caller-supplied generator.
    ///
    /// Return
    /// ----------
    /// * `Ok(EstimatedPosition)` – the robust estimate; `inliers_data()` is
    ///   populated as a side effect.
    /// * `Err(PosfitError::EstimatorLocked)` – an estimation is already
    ///   running on this instance.
    /// * `Err(PosfitError::EstimatorNotReady)` – inputs missing, mismatched,
    ///   or insufficient in count.
    /// * `Err(PosfitError::RobustEstimationFailure)` – no preliminary subset
    ///   produced a usable candidate.
    ///
    /// The lock is released on every exit path before this method returns.
    pub fn estimate_with_rng(
        &mut self,
        rng: &mut impl Rng,
    ) -> Result<EstimatedPosition<D>, PosfitError> {
        if self.locked {
            return Err(PosfitError::EstimatorLocked);
        }
        if let Some(issue) = self.readiness_issue() {
            return Err(PosfitError::EstimatorNotReady(issue));
        }

        self.locked = true;
        self.inliers_data = None;
        self.fire_start();

        let outcome = self.drive_loop(rng);

        match outcome {
            Ok(estimate) => {
                self.inliers_data = Some(estimate.inliers);
                // End callback fires while still locked, then the lock drops.
                self.fire_end();
                self.locked = false;
                Ok(EstimatedPosition {
                    position: estimate.position,
                    covariance: estimate.covariance,
                })
            }
            Err(e) => {
                self.locked = false;
                Err(e)
            }
        }
    }

    fn drive_loop(&mut self, rng: &mut impl Rng) -> Result<RobustEstimate<D>, PosfitError> {
        let flat = self.flatten();
        let mut robust_loop = PromedsLoop::new(
            flat.positions,
            flat.distances,
            flat.std_devs,
            flat.quality_scores,
            flat.source_of,
            self.params.clone(),
            self.initial_position,
        );

        let mut last_reported = 0.0;
        loop {
            match robust_loop.step(rng) {
                LoopStep::Iterated {
                    iteration,
                    progress,
                } => {
                    self.fire_next_iteration(iteration);
                    if progress - last_reported >= self.params.progress_delta {
                        last_reported = progress;
                        self.fire_progress_change(progress);
                    }
                }
                LoopStep::Finished => break,
            }
        }

        robust_loop.finish()
    }

    // The listener is moved out for the duration of each callback so it can
    // receive the estimator mutably; guarded setters keep the slot intact.
    fn fire_start(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            listener.on_estimate_start(self);
            self.listener = Some(listener);
        }
    }

    fn fire_end(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            listener.on_estimate_end(self);
            self.listener = Some(listener);
        }
    }

    fn fire_next_iteration(&mut self, iteration: usize) {
        if let Some(mut listener) = self.listener.take() {
            listener.on_estimate_next_iteration(self, iteration);
            self.listener = Some(listener);
        }
    }

    fn fire_progress_change(&mut self, progress: f64) {
        if let Some(mut listener) = self.listener.take() {
            listener.on_estimate_progress_change(self, progress);
            self.listener = Some(listener);
        }
    }
}

impl<const D: usize> fmt::Debug for PositionEstimator<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PositionEstimator")
            .field("sources", &self.sources.len())
            .field("readings", &self.fingerprint.len())
            .field("params", &self.params)
            .field("locked", &self.locked)
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}

#[cfg(test)]
mod estimator_tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector2;
    use rand::{rngs::StdRng, SeedableRng};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn square_sources() -> Vec<RadioSource<2>> {
        [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0), (10.0, 10.0)]
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| RadioSource::new(i as u64, 2412.0, Vector2::new(x, y)))
            .collect()
    }

    fn ranging_fingerprint(sources: &[RadioSource<2>], truth: Vector2<f64>) -> Fingerprint {
        Fingerprint::from_readings(
            sources
                .iter()
                .map(|s| Reading::ranging(s.id.clone(), (s.position - truth).norm())),
        )
    }

    #[test]
    fn test_new_estimator_defaults() {
        let estimator = PositionEstimator::<2>::new();
        assert!(estimator.sources().is_empty());
        assert!(estimator.fingerprint().is_empty());
        assert!(estimator.source_quality_scores().is_none());
        assert!(estimator.fingerprint_reading_quality_scores().is_none());
        assert!(estimator.initial_position().is_none());
        assert!(estimator.inliers_data().is_none());
        assert!(!estimator.is_locked());
        assert!(!estimator.is_ready());
        assert_eq!(estimator.params().preliminary_subset_size, 3);

        let estimator_3d = PositionEstimator::<3>::new();
        assert_eq!(estimator_3d.params().preliminary_subset_size, 4);
    }

    #[test]
    fn test_constructor_preserves_arguments() {
        let sources = square_sources();
        let fingerprint = ranging_fingerprint(&sources, Vector2::new(1.0, 1.0));
        let estimator = PositionEstimator::<2>::with_quality_scores(
            sources.clone(),
            fingerprint.clone(),
            vec![1.0; 4],
            vec![2.0; 4],
        )
        .unwrap();
        assert_eq!(estimator.sources(), &sources[..]);
        assert_eq!(estimator.fingerprint(), &fingerprint);
        assert_eq!(estimator.source_quality_scores().unwrap(), &[1.0; 4]);
        assert_eq!(
            estimator.fingerprint_reading_quality_scores().unwrap(),
            &[2.0; 4]
        );
        assert!(estimator.is_ready());
    }

    #[test]
    fn test_invalid_constructions() {
        let sources = square_sources();
        let fingerprint = ranging_fingerprint(&sources, Vector2::zeros());

        assert!(matches!(
            PositionEstimator::<2>::with_sources_and_fingerprint(vec![], fingerprint.clone()),
            Err(PosfitError::InvalidParameter(_))
        ));
        assert!(matches!(
            PositionEstimator::<2>::with_sources_and_fingerprint(
                sources.clone(),
                Fingerprint::new()
            ),
            Err(PosfitError::InvalidParameter(_))
        ));
        assert_eq!(
            PositionEstimator::<2>::with_quality_scores(
                sources.clone(),
                fingerprint.clone(),
                vec![1.0; 3],
                vec![1.0; 4],
            )
            .unwrap_err(),
            PosfitError::QualityScoreLengthMismatch {
                expected: 4,
                got: 3
            }
        );
        assert!(matches!(
            PositionEstimator::<2>::with_quality_scores(
                sources,
                fingerprint,
                vec![1.0, 1.0, 1.0, 0.0],
                vec![1.0; 4],
            ),
            Err(PosfitError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_is_ready_transitions() {
        let mut estimator = PositionEstimator::<2>::new();
        assert!(!estimator.is_ready());

        let sources = square_sources();
        estimator.set_sources(sources.clone()).unwrap();
        assert!(!estimator.is_ready());

        estimator
            .set_fingerprint(ranging_fingerprint(&sources, Vector2::new(2.0, 2.0)))
            .unwrap();
        assert!(estimator.is_ready());

        // A score array of the wrong length cannot be set directly, and a
        // stale one (set before sources changed) blocks readiness.
        estimator
            .set_source_quality_scores(Some(vec![1.0; 4]))
            .unwrap();
        assert!(estimator.is_ready());
        let mut extended = sources.clone();
        extended.push(RadioSource::new(99u64, 2412.0, Vector2::new(5.0, 5.0)));
        estimator.set_sources(extended).unwrap();
        assert!(!estimator.is_ready());
    }

    #[test]
    fn test_unknown_source_readings_are_skipped() {
        let sources = square_sources();
        let mut fingerprint = ranging_fingerprint(&sources, Vector2::new(1.0, 2.0));
        fingerprint.push(Reading::ranging("unknown-ap", 3.0));
        let estimator =
            PositionEstimator::<2>::with_sources_and_fingerprint(sources, fingerprint).unwrap();
        assert_eq!(estimator.positions().len(), 4);
        assert_eq!(estimator.distances().len(), 4);
    }

    #[test]
    fn test_setter_validation() {
        let mut estimator = PositionEstimator::<2>::new();
        assert!(estimator.set_stop_threshold(0.0).is_err());
        assert!(estimator.set_stop_threshold(f64::NAN).is_err());
        assert!(estimator.set_confidence(1.0).is_err());
        assert!(estimator.set_confidence(-0.5).is_err());
        assert!(estimator.set_max_iterations(0).is_err());
        assert!(estimator.set_progress_delta(-0.01).is_err());
        assert!(estimator.set_progress_delta(1.01).is_err());
        assert!(estimator.set_preliminary_subset_size(2).is_err());
        assert!(estimator.set_fallback_distance_std_dev(-1.0).is_err());

        assert!(estimator.set_preliminary_subset_size(4).is_ok());
        assert_eq!(estimator.params().preliminary_subset_size, 4);

        let mut estimator_3d = PositionEstimator::<3>::new();
        assert!(estimator_3d.set_preliminary_subset_size(3).is_err());
        assert!(estimator_3d.set_preliminary_subset_size(4).is_ok());
    }

    #[test]
    fn test_estimate_not_ready() {
        let mut estimator = PositionEstimator::<2>::new();
        assert!(matches!(
            estimator.estimate_with_rng(&mut StdRng::seed_from_u64(1)),
            Err(PosfitError::EstimatorNotReady(_))
        ));
    }

    #[test]
    fn test_estimate_recovers_truth_and_populates_inliers() {
        let truth = Vector2::new(3.5, 6.5);
        let sources = square_sources();
        let fingerprint = ranging_fingerprint(&sources, truth);
        let mut estimator =
            PositionEstimator::<2>::with_sources_and_fingerprint(sources, fingerprint).unwrap();
        let mut rng = StdRng::seed_from_u64(17);
        let estimate = estimator.estimate_with_rng(&mut rng).unwrap();
        assert_relative_eq!((estimate.position - truth).norm(), 0.0, epsilon = 1e-8);
        let inliers = estimator.inliers_data().unwrap();
        assert_eq!(inliers.len(), 4);
        assert_eq!(inliers.num_inliers(), 4);
        assert!(!estimator.is_locked());
    }

    #[test]
    fn test_flattened_arrays_idempotent_across_estimate() {
        let truth = Vector2::new(1.5, 8.0);
        let sources = square_sources();
        let fingerprint = ranging_fingerprint(&sources, truth);
        let mut estimator =
            PositionEstimator::<2>::with_sources_and_fingerprint(sources, fingerprint).unwrap();
        let before_positions = estimator.positions();
        let before_distances = estimator.distances();

        let mut rng = StdRng::seed_from_u64(5);
        estimator.estimate_with_rng(&mut rng).unwrap();

        assert_eq!(estimator.positions(), before_positions);
        assert_eq!(estimator.distances(), before_distances);
    }

    /// What a listener observed while the estimator was running.
    #[derive(Default)]
    struct ProbeState {
        start_fired: bool,
        end_fired: bool,
        iterations: usize,
        progress_reports: Vec<f64>,
        locked_during_start: bool,
        setter_result: Option<PosfitError>,
        reentrant_result: Option<PosfitError>,
    }

    struct ProbeListener {
        state: Rc<RefCell<ProbeState>>,
    }

    impl EstimationListener<2> for ProbeListener {
        fn on_estimate_start(&mut self, estimator: &mut PositionEstimator<2>) {
            let mut state = self.state.borrow_mut();
            state.start_fired = true;
            state.locked_during_start = estimator.is_locked();
            state.setter_result = estimator.set_max_iterations(10).err();
            state.reentrant_result = estimator.estimate().err();
        }

        fn on_estimate_end(&mut self, _estimator: &mut PositionEstimator<2>) {
            self.state.borrow_mut().end_fired = true;
        }

        fn on_estimate_next_iteration(
            &mut self,
            _estimator: &mut PositionEstimator<2>,
            _iteration: usize,
        ) {
            self.state.borrow_mut().iterations += 1;
        }

        fn on_estimate_progress_change(
            &mut self,
            _estimator: &mut PositionEstimator<2>,
            progress: f64,
        ) {
            self.state.borrow_mut().progress_reports.push(progress);
        }
    }

    #[test]
    fn test_locked_state_observable_from_listener() {
        let truth = Vector2::new(4.0, 4.0);
        let sources = square_sources();
        let fingerprint = ranging_fingerprint(&sources, truth);
        let mut estimator =
            PositionEstimator::<2>::with_sources_and_fingerprint(sources, fingerprint).unwrap();

        let state = Rc::new(RefCell::new(ProbeState::default()));
        estimator
            .set_listener(Some(Box::new(ProbeListener {
                state: state.clone(),
            })))
            .unwrap();

        let mut rng = StdRng::seed_from_u64(23);
        estimator.estimate_with_rng(&mut rng).unwrap();

        let state = state.borrow();
        assert!(state.start_fired);
        assert!(state.end_fired);
        assert!(state.locked_during_start);
        assert!(state.iterations >= 1);
        assert_eq!(state.setter_result, Some(PosfitError::EstimatorLocked));
        assert_eq!(state.reentrant_result, Some(PosfitError::EstimatorLocked));

        // After the run the lock is gone and setters work again.
        assert!(!estimator.is_locked());
        assert!(estimator.set_max_iterations(10).is_ok());
    }

    #[test]
    fn test_rssi_readings_flatten_through_radio_model() {
        let truth = Vector2::new(2.0, 1.0);
        let sources = square_sources();
        let model = PathLossModel::default();
        let fingerprint = Fingerprint::from_readings(sources.iter().map(|s| {
            Reading::rssi(s.id.clone(), model.rssi_at((s.position - truth).norm()))
        }));
        let mut estimator =
            PositionEstimator::<2>::with_sources_and_fingerprint(sources, fingerprint).unwrap();
        let mut rng = StdRng::seed_from_u64(31);
        let estimate = estimator.estimate_with_rng(&mut rng).unwrap();
        assert_relative_eq!((estimate.position - truth).norm(), 0.0, epsilon = 1e-6);
    }
}
