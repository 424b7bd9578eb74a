//! Hierarchical quadratic programming over prioritized linear constraints.
//!
//! Given priority levels L₀ ≺ L₁ ≺ … of two-sided constraints
//! `l ≤ A x ≤ u`, the solver returns the vector that minimizes the
//! squared slack of L₀, then, among all such vectors, the slack of L₁,
//! and so on, with ties broken by minimum norm under a user metric M.
//!
//! # Algorithm
//!
//! The core is a dense **null-space method** built on complete orthogonal
//! decompositions:
//!
//! - each level's active rows are factored inside the null space of every
//!   higher level, and the per-level factors are cached so an active-set
//!   change only rebuilds the levels at and below it;
//! - Lagrange multipliers are recovered by walking the cached factors
//!   backwards instead of assembling a KKT system;
//! - an active-set driver adds the worst violated bound, releases the
//!   bound with the strongest positive dual, and locks the resisting
//!   rows, level by level, until the hierarchy is lexicographically
//!   optimal;
//! - re-solving an unchanged problem warm-starts from the previous
//!   solution and converges with zero active-set changes.
//!
//! Everything is preallocated at construction; the steady-state solve
//! path performs no heap allocation, which keeps the solver usable inside
//! a real-time control loop.
//!
//! # Example
//!
//! ```
//! use nalgebra::{DMatrix, DVector};
//! use hqp_core::HierarchicalQP;
//!
//! // Track a point with the first priority, stay in a box with the
//! // second.
//! let mut qp = HierarchicalQP::new(4, 2);
//! let a = DMatrix::from_row_slice(4, 2, &[
//!     1.0, 0.0,
//!     0.0, 1.0,
//!     1.0, 0.0,
//!     0.0, 1.0,
//! ]);
//! let l = DVector::from_vec(vec![-0.5, -0.5, 2.0, 0.0]);
//! let u = DVector::from_vec(vec![0.5, 0.5, 2.0, 0.0]);
//! qp.set_problem(&a, &l, &u, &[2, 4]).unwrap();
//! let x = qp.get_primal().unwrap();
//! // The box wins over the target.
//! assert!((x[0] - 0.5).abs() < 1e-6);
//! ```

#![warn(clippy::all)]

pub mod error;
pub mod task;

mod bookkeeping;
mod cod;
mod driver;
mod dual;
mod primal;
mod problem;
mod solver;

pub use error::{HqpError, HqpResult};
pub use solver::{HierarchicalQP, SolveInfo};
pub use task::{StackOfTasks, Task};
