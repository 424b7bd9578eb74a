//! Input validation for problem data.
//!
//! Rejects malformed `(A, l, u, breaks)` instances before any solver
//! state changes, so a failed `set_problem` leaves the previous problem
//! intact.

use nalgebra::{DMatrix, DVector};

use crate::error::{HqpError, HqpResult};

/// Check shapes, bounds, and level structure.
pub(crate) fn validate(
    matrix: &DMatrix<f64>,
    lower: &DVector<f64>,
    upper: &DVector<f64>,
    breaks: &[usize],
    max_rows: usize,
    max_levels: usize,
    cols: usize,
) -> HqpResult<()> {
    let m = matrix.nrows();
    if matrix.ncols() != cols {
        return Err(HqpError::InvalidArgument(format!(
            "matrix has {} columns, solver was sized for {}",
            matrix.ncols(),
            cols
        )));
    }
    if m > max_rows {
        return Err(HqpError::InvalidArgument(format!(
            "matrix has {} rows, solver was sized for at most {}",
            m, max_rows
        )));
    }
    if lower.len() != m || upper.len() != m {
        return Err(HqpError::InvalidArgument(format!(
            "bounds have lengths {} and {}, expected {}",
            lower.len(),
            upper.len(),
            m
        )));
    }
    if breaks.is_empty() {
        return Err(HqpError::InvalidArgument("breaks is empty".to_string()));
    }
    if breaks.len() > max_levels {
        return Err(HqpError::InvalidArgument(format!(
            "{} levels requested, solver was sized for at most {}",
            breaks.len(),
            max_levels
        )));
    }
    let mut prev = 0;
    for (k, &b) in breaks.iter().enumerate() {
        if b < prev {
            return Err(HqpError::InvalidArgument(format!(
                "breaks must be non-decreasing, got {} after {} at level {}",
                b, prev, k
            )));
        }
        prev = b;
    }
    if *breaks.last().unwrap() != m {
        return Err(HqpError::InvalidArgument(format!(
            "last break is {}, expected the row count {}",
            breaks.last().unwrap(),
            m
        )));
    }
    for i in 0..m {
        for j in 0..cols {
            if matrix[(i, j)].is_nan() {
                return Err(HqpError::InvalidArgument(format!(
                    "matrix entry ({}, {}) is NaN",
                    i, j
                )));
            }
        }
        let (l, u) = (lower[i], upper[i]);
        if l.is_nan() || u.is_nan() {
            return Err(HqpError::InvalidArgument(format!("bound {} is NaN", i)));
        }
        if l > u {
            return Err(HqpError::InvalidArgument(format!(
                "row {} has lower bound {} above upper bound {}",
                i, l, u
            )));
        }
        if l == u && !l.is_finite() {
            return Err(HqpError::InvalidArgument(format!(
                "row {} is an equality at a non-finite value",
                i
            )));
        }
    }
    Ok(())
}
