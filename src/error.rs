//! Error taxonomy for the paraxial engine.
//!
//! Every operation in the crate is a deterministic pure function, so an error
//! is reproducible on identical input. Errors are returned at the point of
//! detection (construction or query time) and never retried internally.

use thiserror::Error;

/// Errors raised by element construction, propagation and analysis.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParaxialError {
    /// Physically nonsensical element or beam parameters.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Ray state and transfer matrix have different dimensionality.
    #[error("dimension mismatch: system is {expected}-dimensional, ray is {found}-dimensional")]
    DimensionMismatch { expected: usize, found: usize },

    /// The composed matrix has no finite answer for the query (afocal system).
    #[error("singular system: {0}")]
    SingularSystem(String),

    /// Numeric output was requested while free symbols remain unbound.
    #[error("not fully determined, unbound symbols: {}", .0.join(", "))]
    NotFullyDetermined(Vec<String>),

    /// Beam parameter does not describe a physical Gaussian beam.
    #[error("invalid beam parameter: {0}")]
    InvalidBeamParameter(String),

    /// Sub-system bounds outside the element sequence.
    #[error("range {start}..{end} out of bounds for system of {len} elements")]
    IndexOutOfRange { start: usize, end: usize, len: usize },

    /// Newton iteration did not reach the requested tolerance.
    #[error("solver failed to converge after {iterations} iterations (residual: {residual:.2e})")]
    NoConvergence { iterations: usize, residual: f64 },

    /// A serialized system description could not be read.
    #[error("parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, ParaxialError>;
