//! Null-space projecting primal engine.
//!
//! Levels are resolved in priority order: each level equates its active
//! rows to the chosen bound side inside the null space of every higher
//! level, with the metric's Cholesky inverse as the root basis so the
//! minimum-norm tiebreak is taken in the M-norm. The factorization of
//! each level is cached (`cod_mids`, `cod_rights`, the shared `cod_lefts`
//! strip) so the active-set driver can rebuild only the levels at and
//! below a change, and so the dual engine can walk the chain backwards.

use crate::cod;
use crate::solver::HierarchicalQP;

impl HierarchicalQP {
    /// Full primal pass: reset and fold in every level from the top.
    pub(crate) fn equality_hqp(&mut self) {
        self.primal.fill(0.0);
        for k in 0..self.levels {
            self.ranks[k] = 0;
            self.dofs[k] = 0;
        }
        self.increment_from(0);
    }

    /// Nearest higher level that consumed degrees of freedom.
    pub(crate) fn parent_of(&self, k: usize) -> Option<usize> {
        (0..k).rev().find(|&j| self.dofs[j] > 0)
    }

    /// The cursor is the first level with active rows but no factorization
    /// (starved of degrees of freedom), or one past the last level. Levels
    /// at and beyond it contribute nothing to `primal`.
    fn recompute_cursor(&mut self) {
        self.cursor = self.levels;
        for k in 0..self.levels {
            if self.breaks_act[k] > self.level_start(k) && self.dofs[k] == 0 {
                self.cursor = k;
                break;
            }
        }
    }

    /// Fold levels `from..` into `primal` until the degrees of freedom run
    /// out. Levels without active rows are skipped and stay transparent to
    /// the parent chain.
    pub(crate) fn increment_from(&mut self, from: usize) {
        let mut k = from;
        while k < self.levels {
            if self.breaks_act[k] == self.level_start(k) {
                k += 1;
                continue;
            }
            let parent = self.parent_of(k);
            let dof = match parent {
                None => self.cols,
                Some(p) => self.dofs[p] - self.ranks[p],
            };
            if dof == 0 {
                break;
            }
            self.increment_primal(parent, k);
            k += 1;
        }
        self.recompute_cursor();
    }

    /// Subtract the cached contributions of levels `from..` and clear
    /// their factors.
    pub(crate) fn decrement_from(&mut self, from: usize) {
        for k in from..self.levels {
            if self.dofs[k] == 0 {
                continue;
            }
            let col0 = self.cols - self.dofs[k];
            for j in 0..self.cols {
                let mut acc = 0.0;
                for t in 0..self.ranks[k] {
                    acc += self.inverse[(j, col0 + t)] * self.task[col0 + t];
                }
                self.primal[j] -= acc;
            }
            self.ranks[k] = 0;
            self.dofs[k] = 0;
        }
        self.recompute_cursor();
    }

    /// Fold one level's active rows into `primal`.
    ///
    /// Decomposes the projected block `A_act · N` with the reusable COD,
    /// caches the factors, and adds `N P Z [T⁻¹ Q_r^T b; 0]` to the
    /// running solution, where `b` is the gap between the selected bound
    /// sides and the current iterate.
    pub(crate) fn increment_primal(&mut self, parent: Option<usize>, k: usize) {
        let n = self.cols;
        let start = self.level_start(k);
        let nact = self.breaks_act[k] - start;
        let dof = match parent {
            None => n,
            Some(p) => self.dofs[p] - self.ranks[p],
        };
        debug_assert!(nact > 0 && dof > 0);

        // Target gap b = s - A * primal, on the active bound side.
        for i in 0..nact {
            let row = start + i;
            let s = if self.active_up[row] {
                self.shift_upper[row]
            } else {
                self.shift_lower[row]
            };
            self.target[i] = s - self.row_dot_primal(row);
        }

        // Load the parent null-space basis (or the metric factor at the
        // root) into this level's cod_rights slot.
        match parent {
            Some(p) => {
                debug_assert!(p < k);
                let (head, tail) = self.cod_rights.split_at_mut(k);
                let src = &head[p];
                let dst = &mut tail[0];
                dst.view_mut((0, 0), (n, dof))
                    .copy_from(&src.view((0, self.ranks[p]), (n, dof)));
            }
            None => {
                self.cod_rights[k]
                    .view_mut((0, 0), (n, n))
                    .copy_from(&self.chol_metric);
            }
        }

        // Projected block A_act * N.
        {
            let stage = self.cod.stage();
            for i in 0..nact {
                for c in 0..dof {
                    let mut acc = 0.0;
                    for j in 0..n {
                        acc += self.matrix[(start + i, j)] * self.cod_rights[k][(j, c)];
                    }
                    stage[(i, c)] = acc;
                }
            }
        }
        self.cod.factorize(nact, dof, self.tolerance);
        let rank = self.cod.rank();

        self.cod.permute_basis(&mut self.cod_rights[k]);
        if rank < dof {
            // A trivial Z is never materialized; the basis is already
            // N P in that case.
            self.cod.annihilate_right();
            self.cod.apply_z(&mut self.cod_rights[k], n);
        }
        self.cod.build_q_thin();

        // Cache the factors for incremental rebuilds and dual recovery.
        for t in 0..rank {
            for c in t..rank {
                self.cod_mids[k][(t, c)] = self.cod.mid()[(t, c)];
            }
        }
        for i in 0..nact {
            for t in 0..rank {
                self.cod_lefts[(start + i, t)] = self.cod.q_thin()[(i, t)];
            }
        }
        self.ranks[k] = rank;
        self.dofs[k] = dof;

        // Install the contribution: coordinates live at columns
        // [n - dof, n - dof + rank) of the running pseudo-inverse.
        let col0 = n - dof;
        for t in 0..rank {
            for j in 0..n {
                self.inverse[(j, col0 + t)] = self.cod_rights[k][(j, t)];
            }
        }
        for t in 0..rank {
            let mut acc = 0.0;
            for i in 0..nact {
                acc += self.cod.q_thin()[(i, t)] * self.target[i];
            }
            self.task[col0 + t] = acc;
        }
        // Residual left over in the Q range; zero when the level is
        // consistent within its degrees of freedom.
        for i in 0..nact {
            let mut acc = 0.0;
            for t in 0..rank {
                acc += self.cod.q_thin()[(i, t)] * self.task[col0 + t];
            }
            self.dual[start + i] = self.target[i] - acc;
        }
        {
            let seg = &mut self.task.as_mut_slice()[col0..col0 + rank];
            cod::solve_upper_in_place(&self.cod_mids[k], rank, seg);
        }
        for j in 0..n {
            let mut acc = 0.0;
            for t in 0..rank {
                acc += self.inverse[(j, col0 + t)] * self.task[col0 + t];
            }
            self.primal[j] += acc;
        }
    }
}
