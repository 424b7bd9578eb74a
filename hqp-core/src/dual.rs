//! Lagrange multiplier recovery.
//!
//! Instead of assembling a KKT system, multipliers flow backwards through
//! the per-level factorizations saved by the primal engine: each small
//! upper-triangular mid factor is solved in transpose and the result is
//! lifted by the cached left factor strip. The per-level structure is what
//! keeps the activation/deactivation decisions of the driver correct; a
//! single large least-squares solve would lose it.

use crate::cod;
use crate::solver::HierarchicalQP;

impl HierarchicalQP {
    /// Recover duals for the rows active in levels `0..=h`, measuring
    /// sensitivity of level h's slack.
    ///
    /// On return, `dual[i]` for an active row i holds the raw multiplier;
    /// the driver reads it as-is for upper bounds and negated for lower
    /// bounds, so a positive signed value always means releasing the row
    /// reduces the slack at level h.
    pub(crate) fn dual_update(&mut self, h: usize) {
        let n = self.cols;

        // Seed with level h's own residual s - A x. For levels the primal
        // engine factored this equals the cached residual; for a level
        // beyond the cursor it is the only way to obtain it.
        let h_start = self.level_start(h);
        for i in h_start..self.breaks_act[h] {
            let s = if self.active_up[i] {
                self.shift_upper[i]
            } else {
                self.shift_lower[i]
            };
            self.dual[i] = s - self.row_dot_primal(i);
        }

        // tau = A_h_act^T dual_h
        self.tau.fill(0.0);
        for i in h_start..self.breaks_act[h] {
            let d = self.dual[i];
            if d != 0.0 {
                for j in 0..n {
                    self.tau[j] += self.matrix[(i, j)] * d;
                }
            }
        }

        // Walk the saved factorizations from level h - 1 down to 0.
        for k in (0..h).rev() {
            let start = self.level_start(k);
            let end = self.breaks_act[k];
            if start == end {
                continue;
            }
            let rank = self.ranks[k];
            if rank == 0 || k >= self.cursor {
                for i in start..end {
                    self.dual[i] = 0.0;
                }
                continue;
            }

            let col0 = n - self.dofs[k];
            for t in 0..rank {
                let mut acc = 0.0;
                for j in 0..n {
                    acc += self.inverse[(j, col0 + t)] * self.tau[j];
                }
                self.force[t] = -acc;
            }
            {
                let seg = &mut self.force.as_mut_slice()[0..rank];
                cod::solve_upper_transpose_in_place(&self.cod_mids[k], rank, seg);
            }
            for i in start..end {
                let mut acc = 0.0;
                for t in 0..rank {
                    acc += self.cod_lefts[(i, t)] * self.force[t];
                }
                self.dual[i] = acc;
            }
            for i in start..end {
                let d = self.dual[i];
                if d != 0.0 {
                    for j in 0..n {
                        self.tau[j] += self.matrix[(i, j)] * d;
                    }
                }
            }
        }
    }
}
