use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::constants::Readings;
use crate::fingerprint::reading::Reading;

/// The ordered collection of readings captured at one unknown location.
///
/// Ordering is preserved as given by the caller: the flattened measurement
/// arrays handed to the lateration solvers keep the same reading order, and
/// per-reading quality scores are indexed against it. Readings need not be
/// unique per source — a fingerprint commonly holds several RSSI samples of
/// the same access point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub readings: Readings,
}

impl Fingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fingerprint from an ordered list of readings.
    pub fn from_readings(readings: impl IntoIterator<Item = Reading>) -> Self {
        Self {
            readings: readings.into_iter().collect(),
        }
    }

    pub fn push(&mut self, reading: Reading) {
        self.readings.push(reading);
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Reading> {
        self.readings.iter()
    }

    /// Number of distinct sources referenced by the readings.
    pub fn distinct_sources(&self) -> usize {
        self.readings
            .iter()
            .map(|reading| reading.source())
            .unique()
            .count()
    }
}

impl<'a> IntoIterator for &'a Fingerprint {
    type Item = &'a Reading;
    type IntoIter = std::slice::Iter<'a, Reading>;

    fn into_iter(self) -> Self::IntoIter {
        self.readings.iter()
    }
}
