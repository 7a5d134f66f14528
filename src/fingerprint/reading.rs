use serde::{Deserialize, Serialize};

use crate::constants::{Dbm, Meter, SourceId};

/// One distance-related observation tied to a radio source.
///
/// Variants
/// ---------
/// * `Ranging` – a direct distance measurement (e.g. RTT/FTM ranging), in meters.
/// * `Rssi` – a received-power measurement in dBm, converted to a distance by
///   the estimator's path-loss model at flattening time.
///
/// Both variants carry an optional 1-σ standard deviation in the measurement's
/// own unit (meters for ranging, dBm for RSSI). A missing or non-usable
/// deviation falls back to the estimator's configured fallback distance
/// deviation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reading {
    Ranging {
        source: SourceId,
        distance: Meter,
        std_dev: Option<f64>,
    },
    Rssi {
        source: SourceId,
        rssi: Dbm,
        std_dev: Option<f64>,
    },
}

impl Reading {
    /// Build a ranging reading without a deviation estimate.
    pub fn ranging(source: impl Into<SourceId>, distance: Meter) -> Self {
        Reading::Ranging {
            source: source.into(),
            distance,
            std_dev: None,
        }
    }

    /// Build a ranging reading with a 1-σ distance deviation in meters.
    pub fn ranging_with_std_dev(
        source: impl Into<SourceId>,
        distance: Meter,
        std_dev: f64,
    ) -> Self {
        Reading::Ranging {
            source: source.into(),
            distance,
            std_dev: Some(std_dev),
        }
    }

    /// Build an RSSI reading without a deviation estimate.
    pub fn rssi(source: impl Into<SourceId>, rssi: Dbm) -> Self {
        Reading::Rssi {
            source: source.into(),
            rssi,
            std_dev: None,
        }
    }

    /// Build an RSSI reading with a 1-σ received-power deviation in dBm.
    pub fn rssi_with_std_dev(source: impl Into<SourceId>, rssi: Dbm, std_dev: f64) -> Self {
        Reading::Rssi {
            source: source.into(),
            rssi,
            std_dev: Some(std_dev),
        }
    }

    /// Identifier of the source this reading observes.
    pub fn source(&self) -> &SourceId {
        match self {
            Reading::Ranging { source, .. } | Reading::Rssi { source, .. } => source,
        }
    }

    /// The reading's own 1-σ deviation, in the measurement unit.
    pub fn std_dev(&self) -> Option<f64> {
        match self {
            Reading::Ranging { std_dev, .. } | Reading::Rssi { std_dev, .. } => *std_dev,
        }
    }

    pub fn is_ranging(&self) -> bool {
        matches!(self, Reading::Ranging { .. })
    }

    pub fn is_rssi(&self) -> bool {
        matches!(self, Reading::Rssi { .. })
    }
}

#[cfg(test)]
mod reading_tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let r = Reading::ranging_with_std_dev("ap-1", 12.5, 0.3);
        assert_eq!(r.source(), &SourceId::Name("ap-1".into()));
        assert_eq!(r.std_dev(), Some(0.3));
        assert!(r.is_ranging());
        assert!(!r.is_rssi());

        let r = Reading::rssi(0x1u64, -63.0);
        assert_eq!(r.source(), &SourceId::Bssid(0x1));
        assert_eq!(r.std_dev(), None);
        assert!(r.is_rssi());
    }
}
