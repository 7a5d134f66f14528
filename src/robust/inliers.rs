//! Inlier classification output of the robust loop.

/// Per-measurement inlier verdicts produced by one robust estimation run.
///
/// One instance is produced per successful `estimate()` call and replaced on
/// the next call. Indices follow the flattened (position, distance) pair
/// arrays, i.e. one entry per fingerprint reading that matched a source.
///
/// Fields
/// -----------------
/// * `inliers` – `true` where the pair's squared residual against the winning
///   candidate fell within the derived threshold.
/// * `residuals` – signed range residuals `|x̂ − pᵢ| − dᵢ` (meters) against
///   the winning candidate.
/// * `scale` – robust estimate of the residual standard deviation (meters),
///   derived from the best weighted-median score.
#[derive(Debug, Clone, PartialEq)]
pub struct InliersData {
    pub inliers: Vec<bool>,
    pub residuals: Vec<f64>,
    pub scale: f64,
}

impl InliersData {
    /// Number of measurements classified as inliers.
    pub fn num_inliers(&self) -> usize {
        self.inliers.iter().filter(|&&inlier| inlier).count()
    }

    /// Whether the `i`-th flattened pair was judged an inlier.
    pub fn is_inlier(&self, i: usize) -> bool {
        self.inliers.get(i).copied().unwrap_or(false)
    }

    /// Number of classified measurements.
    pub fn len(&self) -> usize {
        self.inliers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inliers.is_empty()
    }
}
