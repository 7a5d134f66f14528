use thiserror::Error;

/// Error type shared by every fallible operation in the crate.
///
/// The variants fall into four families:
///
/// * **Configuration errors** – invalid scalar parameters, empty collections,
///   or quality-score arrays whose length does not match the entity count.
///   Raised synchronously by constructors, setters, and the parameter builder.
/// * **Locked errors** – any mutator or re-entrant `estimate()` call made
///   while an estimation is running on the same instance.
/// * **Not-ready errors** – `estimate()` called before sources, fingerprint,
///   and quality scores are jointly consistent and sufficient in count.
/// * **Numerical failures** – singular or ill-conditioned systems inside the
///   lateration solvers, and exhaustion of every candidate subset inside the
///   robust loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PosfitError {
    #[error("Invalid estimator parameter: {0}")]
    InvalidParameter(String),

    #[error("Quality score array has length {got} but {expected} entities are configured")]
    QualityScoreLengthMismatch { expected: usize, got: usize },

    #[error("Estimator is locked while an estimation is running")]
    EstimatorLocked,

    #[error("Estimator is not ready: {0}")]
    EstimatorNotReady(String),

    #[error("Not enough measurements for lateration: got {got}, need at least {needed}")]
    InsufficientMeasurements { needed: usize, got: usize },

    #[error("Differenced source-position matrix is singular (sources may be colinear or coplanar)")]
    SingularGeometryMatrix,

    #[error("Normal equations are singular or not positive definite")]
    SingularNormalEquations,

    #[error("Non-linear refinement did not converge within the iteration budget")]
    RefinementDidNotConverge,

    #[error("Robust estimation failed: no preliminary subset produced a usable solution")]
    RobustEstimationFailure,
}
