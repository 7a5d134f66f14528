//! # Lateration solver
//!
//! Single-shot position solving from `N ≥ D + 1` (position, distance) pairs
//! with optional per-pair distance standard deviations. This is the solver the
//! PROMedS robust core calls once per candidate subset (cheap path) and once
//! more over all inliers (final pass).
//!
//! ## Solving paths
//!
//! * **Inhomogeneous linear** ([`linear::solve_inhomogeneous`]) – differences
//!   every sphere equation against the first one and solves the weighted
//!   normal equations. The default preliminary path.
//! * **Homogeneous linear** ([`linear::solve_homogeneous`]) – keeps the
//!   quadratic term as an extra homogeneous unknown and extracts the
//!   right-singular vector of the smallest singular value.
//! * **Non-linear refinement** ([`nonlinear::refine_gauss_newton`]) – weighted
//!   Gauss–Newton on the range residuals `|x − pᵢ| − dᵢ`, optionally producing
//!   the covariance of the estimate.
//!
//! [`solve`] dispatches between these paths according to [`SolveOptions`].
//!
//! ## Failure contract
//!
//! * Fewer than `D + 1` pairs → [`PosfitError::InsufficientMeasurements`].
//! * Singular geometry (colinear/coplanar sources) →
//!   [`PosfitError::SingularGeometryMatrix`].
//! * Singular normal equations during refinement →
//!   [`PosfitError::SingularNormalEquations`], distinct from
//!   [`PosfitError::RefinementDidNotConverge`] (iteration budget exhausted).

use nalgebra::{SMatrix, SVector};

use crate::posfit_errors::PosfitError;

pub mod linear;
pub mod nonlinear;

/// Geometric minimum number of (position, distance) pairs: 3 in 2D, 4 in 3D.
pub const fn min_required_measurements<const D: usize>() -> usize {
    D + 1
}

/// Flags and tolerances steering a single lateration solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveOptions<const D: usize> {
    /// Start from a linear solve (inhomogeneous or homogeneous); otherwise go
    /// straight to Gauss–Newton from the hint or the weighted centroid.
    pub linear_solver_used: bool,
    /// Use the homogeneous linear formulation instead of the differenced one.
    pub homogeneous_linear_solver_used: bool,
    /// Refine the linear solution with Gauss–Newton.
    pub refine_solution: bool,
    /// Compute the covariance of the refined estimate.
    pub keep_covariance: bool,
    /// Iteration cap for Gauss–Newton.
    pub max_refinement_iterations: usize,
    /// Step-norm convergence tolerance for Gauss–Newton.
    pub refinement_eps: f64,
    /// Starting point for the pure non-linear path.
    pub initial_position: Option<SVector<f64, D>>,
}

impl<const D: usize> Default for SolveOptions<D> {
    fn default() -> Self {
        Self {
            linear_solver_used: true,
            homogeneous_linear_solver_used: false,
            refine_solution: true,
            keep_covariance: false,
            max_refinement_iterations: 50,
            refinement_eps: 1e-10,
            initial_position: None,
        }
    }
}

/// Output of a single lateration solve.
///
/// The covariance is present only when refinement ran with
/// `keep_covariance` set and the final normal matrix was invertible.
#[derive(Debug, Clone, PartialEq)]
pub struct LaterationSolution<const D: usize> {
    pub position: SVector<f64, D>,
    pub covariance: Option<SMatrix<f64, D, D>>,
}

/// Solve one lateration problem according to `options`.
///
/// Arguments
/// -----------------
/// * `positions`: Known source positions, one per measurement.
/// * `distances`: Measured distances, parallel to `positions`.
/// * `std_devs`: 1-σ distance deviations, parallel to `positions`; every
///   entry must be usable (> 0) — the estimator facade guarantees this via
///   its fallback deviation.
/// * `options`: Solving path flags and tolerances.
///
/// Return
/// ----------
/// * `Ok(LaterationSolution)` on success.
/// * `Err(PosfitError)` per the failure contract of this module.
pub fn solve<const D: usize>(
    positions: &[SVector<f64, D>],
    distances: &[f64],
    std_devs: &[f64],
    options: &SolveOptions<D>,
) -> Result<LaterationSolution<D>, PosfitError> {
    let n = positions.len();
    if n != distances.len() || n != std_devs.len() {
        return Err(PosfitError::InvalidParameter(
            "positions, distances and std_devs must have equal lengths".into(),
        ));
    }
    if n < min_required_measurements::<D>() {
        return Err(PosfitError::InsufficientMeasurements {
            needed: min_required_measurements::<D>(),
            got: n,
        });
    }

    if options.linear_solver_used {
        let preliminary = if options.homogeneous_linear_solver_used {
            linear::solve_homogeneous(positions, distances, std_devs)?
        } else {
            linear::solve_inhomogeneous(positions, distances, std_devs)?
        };
        if options.refine_solution {
            nonlinear::refine_gauss_newton(
                preliminary,
                positions,
                distances,
                std_devs,
                options.keep_covariance,
                options.max_refinement_iterations,
                options.refinement_eps,
            )
        } else {
            Ok(LaterationSolution {
                position: preliminary,
                covariance: None,
            })
        }
    } else {
        let start = options
            .initial_position
            .unwrap_or_else(|| weighted_centroid(positions, distances));
        nonlinear::refine_gauss_newton(
            start,
            positions,
            distances,
            std_devs,
            options.keep_covariance,
            options.max_refinement_iterations,
            options.refinement_eps,
        )
    }
}

/// Starting point for the pure non-linear path: source centroid weighted by
/// inverse distance, so near sources pull harder than far ones.
fn weighted_centroid<const D: usize>(
    positions: &[SVector<f64, D>],
    distances: &[f64],
) -> SVector<f64, D> {
    let mut acc = SVector::<f64, D>::zeros();
    let mut total = 0.0;
    for (p, d) in positions.iter().zip(distances) {
        let w = 1.0 / d.max(crate::constants::EPS);
        acc += p * w;
        total += w;
    }
    if total > 0.0 {
        acc / total
    } else {
        acc
    }
}
