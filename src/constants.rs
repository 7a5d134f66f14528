//! # Constants and type definitions for posfit
//!
//! This module centralizes the **numeric constants**, **unit aliases**, and **common type
//! definitions** used throughout the `posfit` library. It also defines the identifier and
//! container types used to organize radio sources and fingerprint readings.
//!
//! ## Overview
//!
//! - Default tolerances and fallback values for the robust estimation pipeline
//! - Unit aliases (meters, dBm, MHz) to keep signatures self-documenting
//! - Identifiers for radio sources and fingerprints
//! - Container types for storing readings and fingerprint collections
//!
//! These definitions are used by all main modules, including the lateration solvers,
//! the robust PROMedS core, and the estimator facade.

use crate::fingerprint::reading::Reading;
use crate::fingerprint::Fingerprint;
use ahash::RandomState;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;

// -------------------------------------------------------------------------------------------------
// Numeric constants
// -------------------------------------------------------------------------------------------------

/// Numerical epsilon used for floating-point comparisons
pub const EPS: f64 = 1e-6;

/// Default standard deviation (meters) assumed for a distance whose reading
/// carries no usable deviation of its own
pub const DEFAULT_FALLBACK_DISTANCE_STD_DEV: f64 = 1e-3;

/// Consistency constant relating the median absolute deviation of a Gaussian
/// sample to its standard deviation
pub const MAD_TO_SIGMA: f64 = 1.4826;

/// Absolute floor applied to the squared-residual inlier threshold, so that
/// exactly-consistent measurements still classify as inliers
pub const INLIER_THRESHOLD_FLOOR: f64 = 1e-12;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Distance in meters
pub type Meter = f64;
/// Received power in dBm
pub type Dbm = f64;
/// Carrier frequency in megahertz
pub type MegaHertz = f64;

/// Identifier of a fingerprint (one survey location)
pub type FingerprintId = String;

/// Lookup table from fingerprint identifier to its [`Fingerprint`]
pub type FingerprintSet = HashMap<FingerprintId, Fingerprint, RandomState>;

// -------------------------------------------------------------------------------------------------
// Identifiers and data containers
// -------------------------------------------------------------------------------------------------

/// Identifier of a radio source.
///
/// This can be:
/// - A BSSID packed into the low 48 bits of a `u64` (e.g. a Wi-Fi access point MAC)
/// - A free-form name (e.g. `"lab-beacon-3"`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceId {
    /// 48-bit BSSID stored in the low bits of a `u64`
    Bssid(u64),
    /// String-based identifier (beacon name, UUID, etc.)
    Name(String),
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceId::Bssid(mac) => {
                let b = mac.to_be_bytes();
                write!(
                    f,
                    "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                    b[2], b[3], b[4], b[5], b[6], b[7]
                )
            }
            SourceId::Name(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for SourceId {
    fn from(mac: u64) -> Self {
        SourceId::Bssid(mac)
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        SourceId::Name(s)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        SourceId::Name(s.to_string())
    }
}

impl std::str::FromStr for SourceId {
    type Err = std::convert::Infallible;

    /// Parse a `SourceId` from a string.
    /// - Colon-separated 12-hex-digit MAC → `Bssid(u64)`
    /// - Anything else → `Name(String)`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s.split(':').collect();
        if s.matches(':').count() == 5 && hex.len() == 12 {
            if let Ok(mac) = u64::from_str_radix(&hex, 16) {
                return Ok(SourceId::Bssid(mac));
            }
        }
        Ok(SourceId::Name(s.to_string()))
    }
}

/// A small, inline-optimized container for the readings of a single fingerprint.
pub type Readings = SmallVec<[Reading; 8]>;
