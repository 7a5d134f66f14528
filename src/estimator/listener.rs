//! Estimation lifecycle and progress callbacks.

use crate::estimator::PositionEstimator;

/// Synchronous observer of one estimation run.
///
/// All callbacks run on the calling thread, inside the `estimate()` call
/// stack, and every method has a no-op default. The estimator hands itself to
/// each callback mutably: any setter or re-entrant `estimate()` attempted from
/// inside a callback hits the locked state machine and fails with
/// [`PosfitError::EstimatorLocked`](crate::posfit_errors::PosfitError::EstimatorLocked),
/// which is exactly how the locked state becomes observable.
pub trait EstimationListener<const D: usize> {
    /// Fired once, right after the estimator locks.
    fn on_estimate_start(&mut self, _estimator: &mut PositionEstimator<D>) {}

    /// Fired once on success, while the estimator is still locked.
    fn on_estimate_end(&mut self, _estimator: &mut PositionEstimator<D>) {}

    /// Fired once per robust-loop iteration.
    fn on_estimate_next_iteration(
        &mut self,
        _estimator: &mut PositionEstimator<D>,
        _iteration: usize,
    ) {
    }

    /// Fired when cumulative fractional progress has advanced by at least the
    /// configured `progress_delta` since the last report.
    fn on_estimate_progress_change(
        &mut self,
        _estimator: &mut PositionEstimator<D>,
        _progress: f64,
    ) {
    }
}
