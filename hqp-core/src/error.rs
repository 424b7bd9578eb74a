//! Error types for the hierarchical QP solver.

use thiserror::Error;

/// Errors surfaced by the solver.
#[derive(Error, Debug)]
pub enum HqpError {
    /// Problem or metric rejected before any state change
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An active-set bookkeeping precondition failed. The solver state is
    /// no longer trustworthy; rebuild it with `set_problem`.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The active-set driver exceeded the global iteration ceiling.
    /// `primal()` holds the best iterate found so far.
    #[error("iteration limit reached after {iterations} iterations")]
    IterationLimit {
        /// Inner iterations spent before giving up
        iterations: usize,
    },
}

/// Result type for solver operations.
pub type HqpResult<T> = Result<T, HqpError>;
