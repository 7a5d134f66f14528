//! Linear lateration solvers.
//!
//! Both solvers turn the sphere equations `|x − pᵢ|² = dᵢ²` into a linear
//! system and solve it by weighted least squares. They are cheap enough to run
//! once per robust-loop iteration and accurate enough to seed Gauss–Newton.

use nalgebra::{DMatrix, SMatrix, SVector};

use crate::posfit_errors::PosfitError;

/// Solve the differenced (inhomogeneous) linear system.
///
/// Subtracting the first sphere equation from the `i`-th one removes the
/// quadratic term and leaves, for `i = 1..n`:
///
/// ```text
/// 2·(pᵢ − p₀)ᵀ·x = (d₀² − dᵢ²) + (|pᵢ|² − |p₀|²)
/// ```
///
/// The weighted normal equations `AᵀWA·x = AᵀWb` are solved by Cholesky
/// factorization. Row `i` is weighted by `1/(σᵢ² + σ₀²)` since the differenced
/// equation mixes the uncertainties of measurement `i` and of the reference
/// measurement.
///
/// Arguments
/// -----------------
/// * `positions`: Source positions, `n ≥ D + 1`.
/// * `distances`: Measured distances, parallel to `positions`.
/// * `std_devs`: 1-σ distance deviations, parallel to `positions`.
///
/// Return
/// ----------
/// * `Ok(position)` – the weighted least-squares solution.
/// * `Err(PosfitError::SingularGeometryMatrix)` – the normal matrix is not
///   positive definite (colinear sources in 2D, coplanar in 3D).
pub fn solve_inhomogeneous<const D: usize>(
    positions: &[SVector<f64, D>],
    distances: &[f64],
    std_devs: &[f64],
) -> Result<SVector<f64, D>, PosfitError> {
    let p0 = &positions[0];
    let d0 = distances[0];
    let var0 = std_devs[0] * std_devs[0];

    let mut normal = SMatrix::<f64, D, D>::zeros();
    let mut rhs = SVector::<f64, D>::zeros();

    for i in 1..positions.len() {
        let a = 2.0 * (positions[i] - p0);
        let b = (d0 * d0 - distances[i] * distances[i])
            + (positions[i].norm_squared() - p0.norm_squared());
        let w = 1.0 / (std_devs[i] * std_devs[i] + var0);

        normal += w * a * a.transpose();
        rhs += w * b * a;
    }

    let cholesky = normal
        .cholesky()
        .ok_or(PosfitError::SingularGeometryMatrix)?;
    Ok(cholesky.solve(&rhs))
}

/// Solve the homogeneous linear formulation.
///
/// Keeping the quadratic term as its own unknown, each measurement yields
///
/// ```text
/// [1, −2·pᵢᵀ, |pᵢ|² − dᵢ²] · [|x|², x, 1]ᵀ = 0
/// ```
///
/// so the stacked `n×(D+2)` matrix annihilates the homogeneous solution
/// vector. That vector is recovered as the right-singular vector of the
/// smallest singular value and dehomogenized by its last component. Rows are
/// scaled by `1/σᵢ` before the decomposition.
///
/// Return
/// ----------
/// * `Ok(position)` – the dehomogenized solution.
/// * `Err(PosfitError::SingularGeometryMatrix)` – the SVD is unavailable or
///   the homogeneous coordinate vanishes (degenerate geometry).
pub fn solve_homogeneous<const D: usize>(
    positions: &[SVector<f64, D>],
    distances: &[f64],
    std_devs: &[f64],
) -> Result<SVector<f64, D>, PosfitError> {
    let n = positions.len();
    let mut system = DMatrix::<f64>::zeros(n, D + 2);

    for i in 0..n {
        let scale = 1.0 / std_devs[i];
        system[(i, 0)] = scale;
        for k in 0..D {
            system[(i, 1 + k)] = -2.0 * positions[i][k] * scale;
        }
        system[(i, D + 1)] =
            (positions[i].norm_squared() - distances[i] * distances[i]) * scale;
    }

    let svd = system.svd(false, true);
    let v_t = svd.v_t.ok_or(PosfitError::SingularGeometryMatrix)?;

    // Right-singular vector of the smallest singular value spans the nullspace.
    let mut min_idx = 0;
    for (idx, sv) in svd.singular_values.iter().enumerate() {
        if *sv < svd.singular_values[min_idx] {
            min_idx = idx;
        }
    }
    let null_vector = v_t.row(min_idx);

    let homogeneous = null_vector[D + 1];
    if homogeneous.abs() < f64::EPSILON * null_vector.norm() {
        return Err(PosfitError::SingularGeometryMatrix);
    }

    let mut position = SVector::<f64, D>::zeros();
    for k in 0..D {
        position[k] = null_vector[1 + k] / homogeneous;
    }
    Ok(position)
}

#[cfg(test)]
mod linear_tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Vector2, Vector3};

    fn exact_2d(truth: Vector2<f64>, positions: &[Vector2<f64>]) -> (Vec<f64>, Vec<f64>) {
        let distances = positions.iter().map(|p| (p - truth).norm()).collect();
        let std_devs = vec![1.0; positions.len()];
        (distances, std_devs)
    }

    #[test]
    fn test_inhomogeneous_exact_2d() {
        let truth = Vector2::new(3.0, -2.0);
        let positions = vec![
            Vector2::new(0.0, 0.0),
            Vector2::new(12.0, 1.0),
            Vector2::new(-3.0, 9.0),
            Vector2::new(5.0, -7.0),
        ];
        let (distances, std_devs) = exact_2d(truth, &positions);
        let solution = solve_inhomogeneous(&positions, &distances, &std_devs).unwrap();
        assert_relative_eq!(solution.x, truth.x, epsilon = 1e-10);
        assert_relative_eq!(solution.y, truth.y, epsilon = 1e-10);
    }

    #[test]
    fn test_homogeneous_exact_2d() {
        let truth = Vector2::new(-1.5, 4.0);
        let positions = vec![
            Vector2::new(0.0, 0.0),
            Vector2::new(10.0, 0.0),
            Vector2::new(0.0, 10.0),
            Vector2::new(10.0, 10.0),
        ];
        let (distances, std_devs) = exact_2d(truth, &positions);
        let solution = solve_homogeneous(&positions, &distances, &std_devs).unwrap();
        assert_relative_eq!(solution.x, truth.x, epsilon = 1e-8);
        assert_relative_eq!(solution.y, truth.y, epsilon = 1e-8);
    }

    #[test]
    fn test_both_formulations_agree() {
        let truth = Vector2::new(7.0, 7.0);
        let positions = vec![
            Vector2::new(-20.0, 5.0),
            Vector2::new(13.0, -11.0),
            Vector2::new(2.0, 19.0),
            Vector2::new(8.0, 3.0),
            Vector2::new(-6.0, -14.0),
        ];
        let (distances, std_devs) = exact_2d(truth, &positions);
        let inhomogeneous = solve_inhomogeneous(&positions, &distances, &std_devs).unwrap();
        let homogeneous = solve_homogeneous(&positions, &distances, &std_devs).unwrap();
        assert_relative_eq!(inhomogeneous.x, homogeneous.x, epsilon = 1e-7);
        assert_relative_eq!(inhomogeneous.y, homogeneous.y, epsilon = 1e-7);
    }

    #[test]
    fn test_inhomogeneous_exact_3d() {
        let truth = Vector3::new(1.0, 2.0, 3.0);
        let positions = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(10.0, 0.0, 0.0),
            Vector3::new(0.0, 10.0, 0.0),
            Vector3::new(0.0, 0.0, 10.0),
            Vector3::new(10.0, 10.0, 10.0),
        ];
        let distances: Vec<f64> = positions.iter().map(|p| (p - truth).norm()).collect();
        let std_devs = vec![1.0; positions.len()];
        let solution = solve_inhomogeneous(&positions, &distances, &std_devs).unwrap();
        assert_relative_eq!(solution.x, truth.x, epsilon = 1e-10);
        assert_relative_eq!(solution.y, truth.y, epsilon = 1e-10);
        assert_relative_eq!(solution.z, truth.z, epsilon = 1e-10);
    }

    #[test]
    fn test_colinear_sources_are_singular() {
        // Three sources on the x axis carry no information about y.
        let positions = vec![
            Vector2::new(0.0, 0.0),
            Vector2::new(5.0, 0.0),
            Vector2::new(10.0, 0.0),
        ];
        let distances = vec![1.0, 4.0, 9.0];
        let std_devs = vec![1.0; 3];
        let err = solve_inhomogeneous(&positions, &distances, &std_devs).unwrap_err();
        assert_eq!(err, PosfitError::SingularGeometryMatrix);
    }

    #[test]
    fn test_weights_favor_tight_measurements() {
        // One grossly wrong distance with a huge deviation barely moves the fit.
        let truth = Vector2::new(2.0, 2.0);
        let positions = vec![
            Vector2::new(0.0, 0.0),
            Vector2::new(10.0, 0.0),
            Vector2::new(0.0, 10.0),
            Vector2::new(10.0, 10.0),
        ];
        let mut distances: Vec<f64> = positions.iter().map(|p| (p - truth).norm()).collect();
        distances[3] += 30.0;
        let std_devs = vec![0.01, 0.01, 0.01, 1e4];
        let solution = solve_inhomogeneous(&positions, &distances, &std_devs).unwrap();
        assert_relative_eq!(solution.x, truth.x, epsilon = 1e-3);
        assert_relative_eq!(solution.y, truth.y, epsilon = 1e-3);
    }
}
