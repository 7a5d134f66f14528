use nalgebra::{SMatrix, SVector};
use serde::{Deserialize, Serialize};

use crate::constants::{MegaHertz, SourceId};

/// A positioned radio emitter with a known location.
///
/// Fields
/// -----------------
/// * `id`: Stable identifier of the emitter (BSSID or name).
/// * `frequency`: Carrier frequency in MHz (e.g. `2437.0` for Wi-Fi channel 6).
/// * `position`: Known position of the emitter, `D` = 2 or 3.
/// * `position_covariance`: Optional `D×D` covariance of the surveyed position.
///   When radio-source position covariance is enabled on the estimator, this
///   uncertainty is folded into the distance standard deviation of every
///   reading tied to this source.
///
/// The struct is a plain value container: mutation governance (the locked
/// state machine) lives in the estimator facade, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioSource<const D: usize> {
    pub id: SourceId,
    pub frequency: MegaHertz,
    pub position: SVector<f64, D>,
    pub position_covariance: Option<SMatrix<f64, D, D>>,
}

/// A radio source positioned on a plane.
pub type RadioSource2D = RadioSource<2>;
/// A radio source positioned in space.
pub type RadioSource3D = RadioSource<3>;

impl<const D: usize> RadioSource<D> {
    /// Build a source with a known position and no position covariance.
    pub fn new(id: impl Into<SourceId>, frequency: MegaHertz, position: SVector<f64, D>) -> Self {
        Self {
            id: id.into(),
            frequency,
            position,
            position_covariance: None,
        }
    }

    /// Build a source whose surveyed position carries a covariance estimate.
    pub fn with_position_covariance(
        id: impl Into<SourceId>,
        frequency: MegaHertz,
        position: SVector<f64, D>,
        position_covariance: SMatrix<f64, D, D>,
    ) -> Self {
        Self {
            id: id.into(),
            frequency,
            position,
            position_covariance: Some(position_covariance),
        }
    }

    /// Isotropic approximation of the positional standard deviation, used to
    /// inflate reading deviations when position covariance is enabled.
    ///
    /// Return
    /// ----------
    /// * `Some(σ)` with `σ = √(trace(Σ)/D)` when a covariance is present and
    ///   its trace is finite and non-negative, `None` otherwise.
    pub fn position_std_dev(&self) -> Option<f64> {
        let cov = self.position_covariance.as_ref()?;
        let mean_var = cov.trace() / D as f64;
        if mean_var.is_finite() && mean_var >= 0.0 {
            Some(mean_var.sqrt())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod radio_source_tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix2, Vector2};

    #[test]
    fn test_new_has_no_covariance() {
        let source = RadioSource2D::new("ap-1", 2412.0, Vector2::new(1.0, -2.0));
        assert_eq!(source.id, SourceId::Name("ap-1".into()));
        assert!(source.position_covariance.is_none());
        assert!(source.position_std_dev().is_none());
    }

    #[test]
    fn test_position_std_dev_is_isotropic_mean() {
        let cov = Matrix2::new(4.0, 0.0, 0.0, 16.0);
        let source =
            RadioSource2D::with_position_covariance(0x1u64, 2437.0, Vector2::zeros(), cov);
        // trace/D = 10, σ = √10
        assert_relative_eq!(source.position_std_dev().unwrap(), 10.0_f64.sqrt());
    }
}
