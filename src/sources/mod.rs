//! Radio source data model.
//!
//! A [`RadioSource`](radio_source::RadioSource) is a positioned reference
//! emitter (access point, beacon) whose location is known in advance. The
//! estimator facade pairs sources with fingerprint readings to build the
//! flattened measurement arrays consumed by the lateration solvers.

pub mod radio_source;

pub use radio_source::{RadioSource, RadioSource2D, RadioSource3D};
