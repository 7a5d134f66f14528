//! # Log-distance path-loss conversion
//!
//! Minimal adapter turning a received power (RSSI, dBm) into the distance the
//! lateration pipeline consumes. The model is the classical log-distance form
//!
//! ```text
//! rssi(d) = P₁ − 10·n·log₁₀(d)
//! ```
//!
//! where `P₁` is the received power at 1 m and `n` the path-loss exponent.
//! Only the conversion contract the robust core needs lives here; propagation
//! physics beyond it is out of scope.

use serde::{Deserialize, Serialize};

use crate::constants::{Dbm, Meter};
use crate::posfit_errors::PosfitError;

/// Received power at the 1 m reference distance, dBm.
pub const DEFAULT_REFERENCE_POWER_DBM: Dbm = -40.0;

/// Free-space path-loss exponent; indoor environments typically sit in 2–4.
pub const DEFAULT_PATH_LOSS_EXPONENT: f64 = 2.0;

/// Log-distance path-loss model converting RSSI readings to distances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathLossModel {
    /// Received power at 1 m from the emitter, dBm.
    pub reference_power_dbm: Dbm,
    /// Path-loss exponent `n`.
    pub path_loss_exponent: f64,
}

impl Default for PathLossModel {
    fn default() -> Self {
        Self {
            reference_power_dbm: DEFAULT_REFERENCE_POWER_DBM,
            path_loss_exponent: DEFAULT_PATH_LOSS_EXPONENT,
        }
    }
}

impl PathLossModel {
    /// Build a model, validating the exponent.
    ///
    /// Arguments
    /// -----------------
    /// * `reference_power_dbm`: Received power at 1 m, dBm.
    /// * `path_loss_exponent`: Path-loss exponent, must be finite and > 0.
    ///
    /// Return
    /// ----------
    /// * `Ok(PathLossModel)` or `Err(PosfitError::InvalidParameter)`.
    pub fn new(reference_power_dbm: Dbm, path_loss_exponent: f64) -> Result<Self, PosfitError> {
        if !(path_loss_exponent.is_finite() && path_loss_exponent > 0.0) {
            return Err(PosfitError::InvalidParameter(
                "path_loss_exponent must be finite and > 0".into(),
            ));
        }
        if !reference_power_dbm.is_finite() {
            return Err(PosfitError::InvalidParameter(
                "reference_power_dbm must be finite".into(),
            ));
        }
        Ok(Self {
            reference_power_dbm,
            path_loss_exponent,
        })
    }

    /// Distance implied by a received power.
    pub fn distance(&self, rssi: Dbm) -> Meter {
        10f64.powf((self.reference_power_dbm - rssi) / (10.0 * self.path_loss_exponent))
    }

    /// First-order propagation of an RSSI deviation into a distance deviation.
    ///
    /// With `d = 10^((P₁ − rssi)/(10·n))`, the sensitivity is
    /// `|∂d/∂rssi| = d·ln(10)/(10·n)`, so `σ_d = d·ln(10)/(10·n)·σ_rssi`.
    pub fn distance_std_dev(&self, rssi: Dbm, rssi_std_dev: f64) -> Meter {
        let d = self.distance(rssi);
        d * std::f64::consts::LN_10 / (10.0 * self.path_loss_exponent) * rssi_std_dev
    }

    /// Received power implied by a distance (inverse of [`PathLossModel::distance`]).
    pub fn rssi_at(&self, distance: Meter) -> Dbm {
        self.reference_power_dbm - 10.0 * self.path_loss_exponent * distance.log10()
    }
}
