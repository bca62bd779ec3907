//! Error types shared across the crate.

use thiserror::Error;

/// Canonical error type for posterior sampling and MAP search.
///
/// Configuration and shape problems are reported through this enum and are
/// never retried. Post-condition violations (e.g. a wrong sample count after
/// thinning) are programming errors and panic via `assert!` instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum McmcError {
    /// A run-configuration value is out of its valid range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The conditioning observation does not match the expected shape.
    #[error("observation has {got} entries, expected {expected}")]
    ObservationShape { expected: usize, got: usize },

    /// A parameter vector or batch does not match the potential's dimension.
    #[error("parameter dimension is {got}, expected {expected}")]
    ParamDim { expected: usize, got: usize },

    /// The prior's support cannot be mapped to unconstrained space.
    #[error("unsupported prior support: {0}")]
    UnsupportedSupport(String),

    /// `InitStrategy::LatestSample` was requested before any sampling call.
    #[error("latest-sample initialization requested but no previous sampling call has run")]
    MissingWarmStart,
}
