// src/error.rs

use thiserror::Error;

/// Errors surfaced by buffer construction, decomposition and reconstruction.
///
/// Every variant is returned to the immediate caller; nothing in the crate
/// retries or recovers locally. The type is `Clone` so a per-channel failure
/// can be carried inside a `CompressionOutcome` and handed to several readers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompressionError {
    /// Malformed buffer creation request (zero extent, negative rank, ...).
    #[error("Invalid dimension: {0}")]
    InvalidDimension(String),

    /// Element access outside the declared shape.
    #[error("Index ({row}, {col}) out of bounds for a {rows}x{cols} matrix")]
    OutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    /// Operands whose shapes do not fit together.
    #[error("Dimension mismatch: left is {left:?}, right is {right:?} ({context})")]
    DimensionMismatch {
        left: (usize, usize),
        right: (usize, usize),
        context: &'static str,
    },

    /// Non-finite input handed to the decomposition.
    #[error("Numerical error: {0}")]
    NumericalError(String),

    /// An iterative method ran out of its iteration budget.
    #[error("SVD did not converge within {max_sweeps} sweeps (largest remaining off-diagonal ratio {residual:e})")]
    ConvergenceError { max_sweeps: usize, residual: f64 },

    /// The request was superseded or cancelled before it produced a result.
    #[error("Request cancelled")]
    Cancelled,

    /// Failure reported by an optional third-party linear algebra backend.
    #[error("Linear algebra backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, CompressionError>;
