//! Error types for pp

use thiserror::Error;

/// pp error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A distribution parameter fails its declared constraint (construction time).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A value fails a support or domain check at use time.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// No transform is registered for the requested constraint.
    #[error("no transform registered for constraint `{0}`")]
    MissingTransform(String),

    /// A different transform is already registered for this constraint kind.
    #[error("transform registry conflict: {0}")]
    RegistryConflict(String),

    /// Batch/event shapes cannot be reconciled (includes enumeration ordering errors).
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The requested factor-algebra backend is not compiled in.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// An operation was invoked in the wrong lifecycle phase.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Numerical failure (e.g. a matrix that is not positive definite).
    #[error("computation error: {0}")]
    Computation(String),

    /// Not implemented
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
