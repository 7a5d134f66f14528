//! # posfit
//!
//! Robust 2D/3D position estimation from distance-like measurements (ranging
//! or RSSI) to known radio sources, tolerant to outliers.
//!
//! The core is a PROMedS-style robust estimator layered on a multi-circle /
//! multi-sphere lateration solver: quality-biased subsets of measurements are
//! laterated into candidate positions, every candidate is scored by the
//! quality-weighted median of its squared range residuals over all
//! measurements, and the best candidate is refined over its inliers.
//!
//! Entry point: [`PositionEstimator2D`] / [`PositionEstimator3D`].

pub mod constants;
pub mod estimator;
pub mod fingerprint;
pub mod lateration;
pub mod posfit_errors;
pub mod radio_model;
pub mod robust;
pub mod sources;

pub use constants::{FingerprintId, FingerprintSet, SourceId};
pub use estimator::batch::{FingerprintFit, FullPositionResult, ReadingCountStats};
pub use estimator::{
    EstimatedPosition, EstimatedPosition2D, EstimatedPosition3D, EstimationListener,
    PositionEstimator, PositionEstimator2D, PositionEstimator3D,
};
pub use fingerprint::{Fingerprint, Reading};
pub use lateration::{LaterationSolution, SolveOptions};
pub use posfit_errors::PosfitError;
pub use radio_model::PathLossModel;
pub use robust::{InliersData, PromedsParams};
pub use sources::{RadioSource, RadioSource2D, RadioSource3D};
