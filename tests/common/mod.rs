use nalgebra::SVector;
use rand::rngs::StdRng;
use rand::Rng;

use posfit::fingerprint::{Fingerprint, Reading};
use posfit::sources::RadioSource;

/// Tolerance for noiseless scenarios.
pub const ABSOLUTE_ERROR: f64 = 1e-6;

/// Tolerance for noisy / degraded-solver scenarios.
pub const LARGE_ABSOLUTE_ERROR: f64 = 0.5;

/// Scatter `count` sources uniformly in `[-50, 50]^D`.
pub fn scattered_sources<const D: usize>(count: usize, rng: &mut StdRng) -> Vec<RadioSource<D>> {
    (0..count)
        .map(|i| {
            let position = SVector::<f64, D>::from_fn(|_, _| rng.random_range(-50.0..50.0));
            RadioSource::new(i as u64, 2412.0, position)
        })
        .collect()
}

/// One exact ranging reading per source, measured from `truth`.
pub fn exact_fingerprint<const D: usize>(
    sources: &[RadioSource<D>],
    truth: &SVector<f64, D>,
) -> Fingerprint {
    Fingerprint::from_readings(
        sources
            .iter()
            .map(|s| Reading::ranging(s.id.clone(), (s.position - truth).norm())),
    )
}

pub fn assert_position_close<const D: usize>(
    actual: &SVector<f64, D>,
    expected: &SVector<f64, D>,
    epsilon: f64,
) {
    let error = (actual - expected).norm();
    assert!(
        error <= epsilon,
        "position error {error} exceeds {epsilon}: got {actual:?}, expected {expected:?}"
    );
}
