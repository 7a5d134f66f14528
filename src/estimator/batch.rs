//! # Batch estimation over fingerprint sets
//!
//! Run the robust position estimator over a whole [`FingerprintSet`], collect
//! **per-fingerprint outcomes**, and expose helpers to summarize reading
//! counts.
//!
//! ## Result model
//!
//! Batch outcomes are returned as a [`FullPositionResult`]:
//!
//! ```text
//! FingerprintId → Result<EstimatedPosition, PosfitError>
//! ```
//!
//! Failures are **per-fingerprint**: one location failing to estimate (bad
//! geometry, not enough matched sources) does not abort the rest of the
//! batch, and the returned map always contains one entry per processed
//! fingerprint.
//!
//! ## Execution modes
//!
//! With the `progress` feature, [`FingerprintFit::estimate_all_positions`]
//! renders a live `indicatif` progress bar with per-iteration timing from the
//! EMA timer. [`FingerprintFit::estimate_all_positions_with_cancel`] polls a
//! caller-provided closure on a wall-clock interval, keeping cancellation
//! latency stable even when some fingerprints are slow.

use std::collections::HashMap;
use std::fmt;

use ahash::RandomState;
use rand::Rng;

use crate::constants::{FingerprintId, FingerprintSet};
use crate::estimator::{EstimatedPosition, PositionEstimator};
use crate::posfit_errors::PosfitError;
use crate::radio_model::PathLossModel;
use crate::robust::PromedsParams;
use crate::sources::RadioSource;

use std::time::{Duration, Instant};

#[cfg(feature = "progress")]
use super::progress_bar::IterTimer;
#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};

/// Full batch estimation results: one entry per processed fingerprint.
pub type FullPositionResult<const D: usize> =
    HashMap<FingerprintId, Result<EstimatedPosition<D>, PosfitError>, RandomState>;

/// Summary statistics for per-fingerprint reading counts.
///
/// Percentiles use the *nearest-rank* method: the index is `round(q × (N−1))`
/// for quantile `q ∈ [0,1]`, clamped to the valid range, which keeps results
/// stable for small sets.
#[derive(Debug, Clone, Copy)]
pub struct ReadingCountStats {
    pub min: usize,
    pub p25: usize,
    pub median: usize,
    pub p95: usize,
    pub max: usize,
}

impl fmt::Display for ReadingCountStats {
    /// Compact by default; pretty multi-line when using the alternate flag (`{:#}`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            writeln!(f, "Reading count per fingerprint — summary")?;
            writeln!(f, "---------------------------------------")?;
            writeln!(f, "min    : {}", self.min)?;
            writeln!(f, "p25    : {}", self.p25)?;
            writeln!(f, "median : {}", self.median)?;
            writeln!(f, "p95    : {}", self.p95)?;
            write!(f, "max    : {}", self.max)
        } else {
            write!(
                f,
                "min={}, p25={}, median={}, p95={}, max={}",
                self.min, self.p25, self.median, self.p95, self.max
            )
        }
    }
}

/// Batch estimation and statistics over a [`FingerprintSet`].
pub trait FingerprintFit {
    /// Estimate a position for **every fingerprint** in the set.
    ///
    /// All fingerprints are processed against the same source database,
    /// path-loss model, and parameter set, with one shared random number
    /// generator.
    ///
    /// Arguments
    /// -----------------
    /// * `sources`: Source database shared by every fingerprint.
    /// * `radio_model`: Path-loss model for RSSI readings.
    /// * `params`: Robust loop configuration.
    /// * `rng`: Random number generator driving subset sampling.
    ///
    /// Return
    /// ----------
    /// * A [`FullPositionResult`] mapping each fingerprint to either its
    ///   estimate or its isolated error.
    fn estimate_all_positions<const D: usize>(
        &self,
        sources: &[RadioSource<D>],
        radio_model: &PathLossModel,
        params: &PromedsParams,
        rng: &mut impl Rng,
    ) -> FullPositionResult<D>;

    /// Cooperative-cancellation variant: `should_cancel()` is polled on a
    /// wall-clock interval; already-computed entries are returned.
    fn estimate_all_positions_with_cancel<const D: usize, F>(
        &self,
        sources: &[RadioSource<D>],
        radio_model: &PathLossModel,
        params: &PromedsParams,
        rng: &mut impl Rng,
        should_cancel: F,
    ) -> FullPositionResult<D>
    where
        F: FnMut() -> bool;

    /// Total number of readings across all fingerprints.
    fn total_readings(&self) -> usize;

    /// Number of fingerprints in the set.
    fn number_of_fingerprints(&self) -> usize;

    /// Distribution statistics of readings per fingerprint, `None` when the
    /// set is empty.
    fn reading_count_stats(&self) -> Option<ReadingCountStats>;
}

fn estimate_one<const D: usize>(
    sources: &[RadioSource<D>],
    radio_model: &PathLossModel,
    params: &PromedsParams,
    fingerprint: &crate::fingerprint::Fingerprint,
    rng: &mut impl Rng,
) -> Result<EstimatedPosition<D>, PosfitError> {
    let mut estimator =
        PositionEstimator::<D>::with_sources_and_fingerprint(sources.to_vec(), fingerprint.clone())?;
    estimator.set_params(params.clone())?;
    estimator.set_radio_model(*radio_model)?;
    estimator.estimate_with_rng(rng)
}

fn nearest_rank(sorted: &[usize], quantile: f64) -> usize {
    let idx = (quantile * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

impl FingerprintFit for FingerprintSet {
    #[cfg(feature = "progress")]
    fn estimate_all_positions<const D: usize>(
        &self,
        sources: &[RadioSource<D>],
        radio_model: &PathLossModel,
        params: &PromedsParams,
        rng: &mut impl Rng,
    ) -> FullPositionResult<D> {
        use super::progress_bar::fmt_dur;

        let total = self.len() as u64;
        let pb = ProgressBar::new(total.max(1));
        pb.set_style(
            ProgressStyle::with_template(
                "{bar:40.cyan/blue} {pos}/{len} ({percent:>3}%) \
             | {per_sec} | ETA {eta_precise} | {msg}",
            )
            .expect("indicatif template"),
        );
        pb.enable_steady_tick(Duration::from_millis(200));

        let mut results: FullPositionResult<D> = HashMap::default();
        let mut it_timer = IterTimer::new(0.2);

        for (id, fingerprint) in self.iter() {
            let (last, avg) = it_timer.tick();
            pb.set_message(format!("last: {}, avg: {}", fmt_dur(last), fmt_dur(avg)));

            let res = estimate_one(sources, radio_model, params, fingerprint, rng);
            results.insert(id.clone(), res);

            pb.inc(1);
        }

        pb.finish_and_clear();
        results
    }

    #[cfg(not(feature = "progress"))]
    fn estimate_all_positions<const D: usize>(
        &self,
        sources: &[RadioSource<D>],
        radio_model: &PathLossModel,
        params: &PromedsParams,
        rng: &mut impl Rng,
    ) -> FullPositionResult<D> {
        // Output map using the same fast hasher as FingerprintSet.
        let mut results: FullPositionResult<D> = HashMap::default();

        for (id, fingerprint) in self.iter() {
            let res = estimate_one(sources, radio_model, params, fingerprint, rng);
            results.insert(id.clone(), res);
        }

        results
    }

    #[cfg(feature = "progress")]
    fn estimate_all_positions_with_cancel<const D: usize, F>(
        &self,
        sources: &[RadioSource<D>],
        radio_model: &PathLossModel,
        params: &PromedsParams,
        rng: &mut impl Rng,
        mut should_cancel: F,
    ) -> FullPositionResult<D>
    where
        F: FnMut() -> bool,
    {
        use super::progress_bar::fmt_dur;

        let total = self.len() as u64;
        let pb = ProgressBar::new(total.max(1));
        pb.set_style(
            ProgressStyle::with_template(
                "{bar:40.cyan/blue} {pos}/{len} ({percent:>3}%) | {per_sec} | ETA {eta_precise} | {msg}",
            )
            .expect("indicatif template"),
        );
        pb.enable_steady_tick(Duration::from_millis(200));

        let mut results: FullPositionResult<D> = HashMap::default();
        let mut it_timer = IterTimer::new(0.2);

        // Keep the cancellation latency roughly constant regardless of
        // per-fingerprint cost.
        const POLL_INTERVAL: Duration = Duration::from_millis(20);
        let mut last_poll = Instant::now();

        for (id, fingerprint) in self.iter() {
            if last_poll.elapsed() >= POLL_INTERVAL {
                if should_cancel() {
                    pb.set_message("Interrupted");
                    pb.disable_steady_tick();
                    pb.finish_and_clear();
                    break;
                }
                last_poll = Instant::now();
            }

            let (last, avg) = it_timer.tick();
            pb.set_message(format!("last: {}, avg: {}", fmt_dur(last), fmt_dur(avg)));

            let res = estimate_one(sources, radio_model, params, fingerprint, rng);
            results.insert(id.clone(), res);

            pb.inc(1);
        }

        pb.disable_steady_tick();
        pb.finish_and_clear();
        results
    }

    #[cfg(not(feature = "progress"))]
    fn estimate_all_positions_with_cancel<const D: usize, F>(
        &self,
        sources: &[RadioSource<D>],
        radio_model: &PathLossModel,
        params: &PromedsParams,
        rng: &mut impl Rng,
        mut should_cancel: F,
    ) -> FullPositionResult<D>
    where
        F: FnMut() -> bool,
    {
        let mut results: FullPositionResult<D> = HashMap::default();

        let poll_interval = Duration::from_millis(20);
        let mut last_poll = Instant::now();

        for (id, fingerprint) in self.iter() {
            if last_poll.elapsed() >= poll_interval {
                if should_cancel() {
                    break;
                }
                last_poll = Instant::now();
            }

            let res = estimate_one(sources, radio_model, params, fingerprint, rng);
            results.insert(id.clone(), res);
        }

        results
    }

    fn total_readings(&self) -> usize {
        self.values().map(|fingerprint| fingerprint.len()).sum()
    }

    fn number_of_fingerprints(&self) -> usize {
        self.len()
    }

    fn reading_count_stats(&self) -> Option<ReadingCountStats> {
        if self.is_empty() {
            return None;
        }
        let mut counts: Vec<usize> = self.values().map(|fingerprint| fingerprint.len()).collect();
        counts.sort_unstable();

        Some(ReadingCountStats {
            min: counts[0],
            p25: nearest_rank(&counts, 0.25),
            median: nearest_rank(&counts, 0.50),
            p95: nearest_rank(&counts, 0.95),
            max: counts[counts.len() - 1],
        })
    }
}
