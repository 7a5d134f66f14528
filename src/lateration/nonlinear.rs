//! Gauss–Newton refinement of a lateration solution.

use nalgebra::{SMatrix, SVector};

use crate::lateration::LaterationSolution;
use crate::posfit_errors::PosfitError;

/// Distance below which a source is too close to the current iterate for its
/// residual direction to be defined; such terms are skipped for one step.
const DEGENERATE_RANGE: f64 = 1e-12;

/// Refine a position estimate by weighted Gauss–Newton.
///
/// Minimizes `Σᵢ wᵢ·(|x − pᵢ| − dᵢ)²` with `wᵢ = 1/σᵢ²`. Each step solves the
/// normal equations `(JᵀWJ)·δ = −JᵀWf` by Cholesky factorization, where the
/// Jacobian row for measurement `i` is the unit vector `(x − pᵢ)ᵀ/|x − pᵢ|`.
///
/// Arguments
/// -----------------
/// * `initial`: Starting position (typically a linear solve or a caller hint).
/// * `positions`, `distances`, `std_devs`: Parallel measurement arrays; every
///   deviation must be usable (> 0).
/// * `keep_covariance`: Compute the covariance `(JᵀWJ)⁻¹` at the converged
///   position.
/// * `max_iterations`: Iteration cap.
/// * `eps`: Convergence tolerance on the step norm.
///
/// Return
/// ----------
/// * `Ok(LaterationSolution)` – converged estimate, with covariance when
///   requested and the final normal matrix was invertible.
/// * `Err(PosfitError::SingularNormalEquations)` – the normal matrix lost
///   positive definiteness during iteration (numerical failure).
/// * `Err(PosfitError::RefinementDidNotConverge)` – the step norm never fell
///   below `eps` within `max_iterations` (convergence failure).
pub fn refine_gauss_newton<const D: usize>(
    initial: SVector<f64, D>,
    positions: &[SVector<f64, D>],
    distances: &[f64],
    std_devs: &[f64],
    keep_covariance: bool,
    max_iterations: usize,
    eps: f64,
) -> Result<LaterationSolution<D>, PosfitError> {
    let mut x = initial;
    let mut converged = false;

    for _ in 0..max_iterations {
        let (normal, gradient) = normal_equations(&x, positions, distances, std_devs);
        let cholesky = normal
            .cholesky()
            .ok_or(PosfitError::SingularNormalEquations)?;
        let step = cholesky.solve(&gradient);
        x -= step;

        if step.norm() < eps {
            converged = true;
            break;
        }
    }

    if !converged {
        return Err(PosfitError::RefinementDidNotConverge);
    }

    let covariance = if keep_covariance {
        let (normal, _) = normal_equations(&x, positions, distances, std_devs);
        normal.cholesky().map(|c| c.inverse())
    } else {
        None
    };

    Ok(LaterationSolution {
        position: x,
        covariance,
    })
}

/// Accumulate `JᵀWJ` and `JᵀWf` at the current iterate.
fn normal_equations<const D: usize>(
    x: &SVector<f64, D>,
    positions: &[SVector<f64, D>],
    distances: &[f64],
    std_devs: &[f64],
) -> (SMatrix<f64, D, D>, SVector<f64, D>) {
    let mut normal = SMatrix::<f64, D, D>::zeros();
    let mut gradient = SVector::<f64, D>::zeros();

    for ((p, d), sigma) in positions.iter().zip(distances).zip(std_devs) {
        let delta = x - p;
        let range = delta.norm();
        if range < DEGENERATE_RANGE {
            continue;
        }
        let unit = delta / range;
        let residual = range - d;
        let w = 1.0 / (sigma * sigma);

        normal += w * unit * unit.transpose();
        gradient += w * residual * unit;
    }

    (normal, gradient)
}

#[cfg(test)]
mod nonlinear_tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Vector2, Vector3};

    fn scenario_2d(truth: Vector2<f64>) -> (Vec<Vector2<f64>>, Vec<f64>, Vec<f64>) {
        let positions = vec![
            Vector2::new(-8.0, 0.0),
            Vector2::new(9.0, -4.0),
            Vector2::new(3.0, 11.0),
            Vector2::new(-2.0, -9.0),
        ];
        let distances = positions.iter().map(|p| (p - truth).norm()).collect();
        let std_devs = vec![0.5; positions.len()];
        (positions, distances, std_devs)
    }

    #[test]
    fn test_converges_from_offset_start() {
        let truth = Vector2::new(1.5, 2.5);
        let (positions, distances, std_devs) = scenario_2d(truth);
        let start = truth + Vector2::new(3.0, -2.0);
        let solution =
            refine_gauss_newton(start, &positions, &distances, &std_devs, false, 100, 1e-12)
                .unwrap();
        assert_relative_eq!(solution.position.x, truth.x, epsilon = 1e-9);
        assert_relative_eq!(solution.position.y, truth.y, epsilon = 1e-9);
    }

    #[test]
    fn test_covariance_shrinks_with_tighter_deviations() {
        let truth = Vector2::new(0.5, -0.5);
        let (positions, distances, _) = scenario_2d(truth);
        let loose = refine_gauss_newton(
            truth,
            &positions,
            &distances,
            &vec![2.0; 4],
            true,
            50,
            1e-12,
        )
        .unwrap()
        .covariance
        .unwrap();
        let tight = refine_gauss_newton(
            truth,
            &positions,
            &distances,
            &vec![0.2; 4],
            true,
            50,
            1e-12,
        )
        .unwrap()
        .covariance
        .unwrap();
        assert!(tight.trace() < loose.trace());
    }

    #[test]
    fn test_3d_convergence() {
        let truth = Vector3::new(-1.0, 2.0, 0.5);
        let positions = vec![
            Vector3::new(5.0, 0.0, 0.0),
            Vector3::new(0.0, 5.0, 0.0),
            Vector3::new(0.0, 0.0, 5.0),
            Vector3::new(-5.0, -5.0, 1.0),
            Vector3::new(4.0, -3.0, -2.0),
        ];
        let distances: Vec<f64> = positions.iter().map(|p| (p - truth).norm()).collect();
        let std_devs = vec![1.0; positions.len()];
        let start = Vector3::zeros();
        let solution =
            refine_gauss_newton(start, &positions, &distances, &std_devs, false, 100, 1e-12)
                .unwrap();
        assert_relative_eq!((solution.position - truth).norm(), 0.0, epsilon = 1e-8);
    }

    #[test]
    fn test_iteration_budget_is_enforced() {
        let truth = Vector2::new(1.0, 1.0);
        let (positions, distances, std_devs) = scenario_2d(truth);
        // One iteration from a far start cannot meet a 1e-12 step tolerance.
        let start = Vector2::new(40.0, -35.0);
        let err = refine_gauss_newton(start, &positions, &distances, &std_devs, false, 1, 1e-12)
            .unwrap_err();
        assert_eq!(err, PosfitError::RefinementDidNotConverge);
    }
}
