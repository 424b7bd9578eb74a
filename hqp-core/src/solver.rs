//! Solver state and public interface.
//!
//! `HierarchicalQP` owns every matrix and vector it will ever touch;
//! construction over `(m, n)` sizes them to their worst case and the
//! steady-state solve path performs no further allocation. The constraint
//! rows live in permuted order so that each level's slab is partitioned
//! into a locked prefix, a free-active band, and an inactive tail; `perm`
//! maps a storage position back to the caller's row numbering.

use std::io;

use nalgebra::{Cholesky, DMatrix, DVector};

use crate::cod::CodWorkspace;
use crate::error::{HqpError, HqpResult};
use crate::problem;

/// Counters describing the most recent solve.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolveInfo {
    /// Inner driver iterations spent
    pub iterations: usize,
    /// Rows whose bound was added to the active set
    pub activations: usize,
    /// Rows released back to inequality status
    pub deactivations: usize,
    /// Hierarchy levels the driver worked through
    pub levels_completed: usize,
}

/// Lexicographic least-squares solver over prioritized two-sided
/// linear constraints.
///
/// ```
/// use nalgebra::{DMatrix, DVector};
/// use hqp_core::HierarchicalQP;
///
/// let mut qp = HierarchicalQP::new(2, 2);
/// let a = DMatrix::identity(2, 2);
/// let target = DVector::from_vec(vec![3.0, 7.0]);
/// qp.set_problem(&a, &target, &target, &[1, 2]).unwrap();
/// let x = qp.get_primal().unwrap();
/// assert!((x[0] - 3.0).abs() < 1e-9);
/// ```
#[derive(Debug)]
pub struct HierarchicalQP {
    // Capacity and current dimensions
    pub(crate) max_rows: usize,
    pub(crate) max_levels: usize,
    pub(crate) cols: usize,
    pub(crate) rows: usize,
    pub(crate) levels: usize,

    /// Numerical threshold for rank decisions, violation scans, and dual
    /// scans.
    pub tolerance: f64,
    /// Active-set changes (activations + deactivations) recorded by the
    /// most recent `get_primal`.
    pub changes: usize,
    /// Iteration ceiling for the active-set driver; 0 selects the default
    /// `min(2000, 10 * m * p)`.
    pub max_iterations: usize,
    /// Emit driver progress on stderr.
    pub verbose: bool,

    // Constraint storage, permuted in place
    pub(crate) matrix: DMatrix<f64>,
    pub(crate) lower: DVector<f64>,
    pub(crate) upper: DVector<f64>,
    pub(crate) shift_lower: DVector<f64>,
    pub(crate) shift_upper: DVector<f64>,
    pub(crate) active_low: Vec<bool>,
    pub(crate) active_up: Vec<bool>,
    pub(crate) equality: Vec<bool>,
    pub(crate) level_of: Vec<usize>,
    pub(crate) perm: Vec<usize>,
    pub(crate) dual: DVector<f64>,

    // Level partitions
    pub(crate) breaks: Vec<usize>,
    pub(crate) breaks_fix: Vec<usize>,
    pub(crate) breaks_act: Vec<usize>,
    pub(crate) num_equalities: Vec<usize>,
    pub(crate) prev_breaks: Vec<usize>,

    // Factorization cache, one entry per level
    pub(crate) ranks: Vec<usize>,
    pub(crate) dofs: Vec<usize>,
    pub(crate) cod_mids: Vec<DMatrix<f64>>,
    pub(crate) cod_rights: Vec<DMatrix<f64>>,
    pub(crate) cod_lefts: DMatrix<f64>,

    // Primal workspace
    pub(crate) primal: DVector<f64>,
    pub(crate) task: DVector<f64>,
    pub(crate) guess: DVector<f64>,
    pub(crate) inverse: DMatrix<f64>,
    pub(crate) chol_metric: DMatrix<f64>,
    pub(crate) tau: DVector<f64>,
    pub(crate) force: DVector<f64>,
    pub(crate) target: DVector<f64>,
    /// First level whose contribution is not reflected in `primal`.
    pub(crate) cursor: usize,

    pub(crate) cod: CodWorkspace,

    // Result caches
    pub(crate) primal_valid: bool,
    pub(crate) slacks_valid: bool,
    pub(crate) slack_low: DVector<f64>,
    pub(crate) slack_up: DVector<f64>,

    pub(crate) info: SolveInfo,
}

impl HierarchicalQP {
    /// Preallocate a solver for problems with up to `max_rows` constraint
    /// rows over `cols` variables. Up to `max_rows` priority levels are
    /// supported; use [`HierarchicalQP::with_max_levels`] to bound the
    /// per-level factor cache more tightly.
    pub fn new(max_rows: usize, cols: usize) -> Self {
        Self::with_max_levels(max_rows, cols, max_rows)
    }

    /// Preallocate with an explicit cap on the number of priority levels.
    pub fn with_max_levels(max_rows: usize, cols: usize, max_levels: usize) -> Self {
        Self {
            max_rows,
            max_levels,
            cols,
            rows: 0,
            levels: 0,
            tolerance: 1e-9,
            changes: 0,
            max_iterations: 0,
            verbose: false,
            matrix: DMatrix::zeros(max_rows, cols),
            lower: DVector::zeros(max_rows),
            upper: DVector::zeros(max_rows),
            shift_lower: DVector::zeros(max_rows),
            shift_upper: DVector::zeros(max_rows),
            active_low: vec![false; max_rows],
            active_up: vec![false; max_rows],
            equality: vec![false; max_rows],
            level_of: vec![0; max_rows],
            perm: (0..max_rows).collect(),
            dual: DVector::zeros(max_rows),
            breaks: vec![0; max_levels],
            breaks_fix: vec![0; max_levels],
            breaks_act: vec![0; max_levels],
            num_equalities: vec![0; max_levels],
            prev_breaks: Vec::new(),
            ranks: vec![0; max_levels],
            dofs: vec![0; max_levels],
            cod_mids: (0..max_levels).map(|_| DMatrix::zeros(cols, cols)).collect(),
            cod_rights: (0..max_levels).map(|_| DMatrix::zeros(cols, cols)).collect(),
            cod_lefts: DMatrix::zeros(max_rows, cols),
            primal: DVector::zeros(cols),
            task: DVector::zeros(cols),
            guess: DVector::zeros(cols),
            inverse: DMatrix::zeros(cols, cols),
            chol_metric: DMatrix::identity(cols, cols),
            tau: DVector::zeros(cols),
            force: DVector::zeros(cols),
            target: DVector::zeros(max_rows),
            cursor: 0,
            cod: CodWorkspace::new(max_rows, cols),
            primal_valid: false,
            slacks_valid: false,
            slack_low: DVector::zeros(max_rows),
            slack_up: DVector::zeros(max_rows),
            info: SolveInfo::default(),
        }
    }

    /// Install the quadratic metric M (symmetric positive definite). The
    /// solver keeps `R⁻¹` from the upper Cholesky factorization `M = RᵀR`
    /// as the root null-space basis, so slack is measured in the M-norm.
    pub fn set_metric(&mut self, metric: &DMatrix<f64>) -> HqpResult<()> {
        let n = self.cols;
        if metric.nrows() != n || metric.ncols() != n {
            return Err(HqpError::InvalidArgument(format!(
                "metric is {}x{}, expected {}x{}",
                metric.nrows(),
                metric.ncols(),
                n,
                n
            )));
        }
        let mut scale = 0.0_f64;
        for j in 0..n {
            for i in 0..n {
                scale = scale.max(metric[(i, j)].abs());
            }
        }
        for j in 0..n {
            for i in 0..j {
                if (metric[(i, j)] - metric[(j, i)]).abs() > 1e-10 * scale.max(1.0) {
                    return Err(HqpError::InvalidArgument(
                        "metric is not symmetric".to_string(),
                    ));
                }
            }
        }
        let chol = Cholesky::new(metric.clone()).ok_or_else(|| {
            HqpError::InvalidArgument("metric is not positive definite".to_string())
        })?;
        // M = L L^T = R^T R with R = L^T; the root basis is R^{-1}.
        let r_upper = chol.l().transpose();
        let inv = r_upper
            .solve_upper_triangular(&DMatrix::identity(n, n))
            .ok_or_else(|| {
                HqpError::InvalidArgument("metric factorization is singular".to_string())
            })?;
        self.chol_metric.copy_from(&inv);
        self.primal_valid = false;
        self.slacks_valid = false;
        Ok(())
    }

    /// Install a problem instance. Rows `[breaks[k-1], breaks[k])` of the
    /// stacked constraints `l ≤ A x ≤ u` form priority level k.
    ///
    /// Equality rows (`l[i] == u[i]`) are activated and locked up front.
    /// When the row count and level structure match the previous problem,
    /// the previous solve's active inequality bounds are re-activated so
    /// that an unchanged problem warm-starts from the previous active set.
    pub fn set_problem(
        &mut self,
        matrix: &DMatrix<f64>,
        lower: &DVector<f64>,
        upper: &DVector<f64>,
        breaks: &[usize],
    ) -> HqpResult<()> {
        problem::validate(matrix, lower, upper, breaks, self.max_rows, self.max_levels, self.cols)?;
        let m = matrix.nrows();

        // Snapshot the active bounds by original row id before the
        // permutation resets, so a matching problem can warm-start.
        let carry = self.rows == m && self.prev_breaks == breaks;
        let mut saved_low = vec![false; m];
        let mut saved_up = vec![false; m];
        if carry {
            for pos in 0..m {
                if !self.equality[pos] {
                    saved_low[self.perm[pos]] = self.active_low[pos];
                    saved_up[self.perm[pos]] = self.active_up[pos];
                }
            }
        }

        self.rows = m;
        self.levels = breaks.len();
        self.matrix.view_mut((0, 0), (m, self.cols)).copy_from(matrix);
        self.lower.rows_mut(0, m).copy_from(lower);
        self.upper.rows_mut(0, m).copy_from(upper);
        for i in 0..m {
            self.perm[i] = i;
            self.active_low[i] = false;
            self.active_up[i] = false;
            self.equality[i] = lower[i] == upper[i];
            self.dual[i] = 0.0;
        }
        for (k, &end) in breaks.iter().enumerate() {
            self.breaks[k] = end;
            let start = if k == 0 { 0 } else { breaks[k - 1] };
            self.breaks_fix[k] = start;
            self.breaks_act[k] = start;
            for i in start..end {
                self.level_of[i] = k;
            }
        }

        // Equality rows move to the locked prefix of their level.
        for k in 0..self.levels {
            let start = self.level_start(k);
            for i in start..self.breaks[k] {
                if self.equality[i] {
                    self.activate(i, true)?;
                    self.lock(self.breaks_act[k] - 1)?;
                }
            }
            self.num_equalities[k] = self.breaks_fix[k] - start;
        }

        // Warm-start carry-over of inequality bounds.
        if carry {
            for k in 0..self.levels {
                for i in self.breaks_act[k]..self.breaks[k] {
                    let orig = self.perm[i];
                    if saved_low[orig] {
                        self.activate(i, true)?;
                    } else if saved_up[orig] {
                        self.activate(i, false)?;
                    }
                }
            }
        }

        self.prev_breaks = breaks.to_vec();
        self.primal_valid = false;
        self.slacks_valid = false;
        Ok(())
    }

    /// Solve (if needed) and return the primal solution. A cache hit
    /// records `changes = 0`.
    pub fn get_primal(&mut self) -> HqpResult<&DVector<f64>> {
        if self.primal_valid {
            self.changes = 0;
            return Ok(&self.primal);
        }
        self.solve_internal()?;
        Ok(&self.primal)
    }

    /// Current primal iterate without triggering a solve. After an
    /// `IterationLimit` error this holds the best iterate found.
    pub fn primal(&self) -> &DVector<f64> {
        &self.primal
    }

    /// Clipped slacks `(min(0, Ax - l), max(0, Ax - u))` indexed by the
    /// caller's original row numbering.
    pub fn get_slack(&mut self) -> HqpResult<(&DVector<f64>, &DVector<f64>)> {
        if !self.primal_valid {
            self.solve_internal()?;
        }
        if !self.slacks_valid {
            for i in 0..self.rows {
                let ax = self.row_dot_primal(i);
                let orig = self.perm[i];
                self.slack_low[orig] = (ax - self.lower[i]).min(0.0);
                self.slack_up[orig] = (ax - self.upper[i]).max(0.0);
            }
            self.slacks_valid = true;
        }
        Ok((&self.slack_low, &self.slack_up))
    }

    /// Squared violation of level k at the current solution.
    pub fn get_level_cost(&mut self, k: usize) -> HqpResult<f64> {
        if k >= self.levels {
            return Err(HqpError::InvalidArgument(format!(
                "level {} out of range, problem has {}",
                k, self.levels
            )));
        }
        if !self.primal_valid {
            self.solve_internal()?;
        }
        let mut cost = 0.0;
        for i in self.level_start(k)..self.breaks[k] {
            let ax = self.row_dot_primal(i);
            let viol = (self.lower[i] - ax).max(ax - self.upper[i]).max(0.0);
            cost += viol * viol;
        }
        Ok(cost)
    }

    /// Counters from the most recent solve.
    pub fn info(&self) -> &SolveInfo {
        &self.info
    }

    /// Write a one-line-per-level summary of the active set, in original
    /// row numbering. `=` marks an equality row, `u`/`l` the active bound
    /// side, `*` a lock acquired by the driver.
    pub fn print_active_set<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "Active set:")?;
        for k in 0..self.levels {
            let start = self.level_start(k);
            if self.breaks_act[k] == start {
                continue;
            }
            write!(out, "\tlevel {k} ->")?;
            for i in start..self.breaks_act[k] {
                let side = if self.equality[i] {
                    "="
                } else if self.active_up[i] {
                    "u"
                } else {
                    "l"
                };
                let lock = if i < self.breaks_fix[k] && !self.equality[i] {
                    "*"
                } else {
                    ""
                };
                write!(out, " {}{}{}", self.perm[i], side, lock)?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn level_start(&self, k: usize) -> usize {
        if k == 0 {
            0
        } else {
            self.breaks[k - 1]
        }
    }

    #[inline]
    pub(crate) fn row_dot_primal(&self, i: usize) -> f64 {
        let mut acc = 0.0;
        for j in 0..self.cols {
            acc += self.matrix[(i, j)] * self.primal[j];
        }
        acc
    }

    pub(crate) fn iteration_ceiling(&self) -> usize {
        if self.max_iterations > 0 {
            self.max_iterations
        } else {
            (10 * self.rows * self.levels).min(2000).max(1)
        }
    }
}
