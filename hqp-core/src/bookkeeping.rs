//! Active-set bookkeeping.
//!
//! Each level's slab is kept partitioned as
//!
//! ```text
//! [start, breaks_fix)      locked-active rows
//! [breaks_fix, breaks_act) free-active rows
//! [breaks_act, breaks)     inactive rows
//! ```
//!
//! by swapping rows in place; `swap` is the single point through which
//! every permutation flows, so all parallel per-row arrays stay coherent
//! and `perm` keeps mapping storage positions to original row ids.

use crate::error::{HqpError, HqpResult};
use crate::solver::HierarchicalQP;

impl HierarchicalQP {
    /// Swap two rows across every parallel array. Callers are responsible
    /// for keeping the swap within one level's slab.
    pub(crate) fn swap(&mut self, i: usize, j: usize) {
        if i == j {
            return;
        }
        debug_assert_eq!(self.level_of[i], self.level_of[j]);
        self.matrix.swap_rows(i, j);
        self.cod_lefts.swap_rows(i, j);
        self.lower.swap_rows(i, j);
        self.upper.swap_rows(i, j);
        self.shift_lower.swap_rows(i, j);
        self.shift_upper.swap_rows(i, j);
        self.dual.swap_rows(i, j);
        self.active_low.swap(i, j);
        self.active_up.swap(i, j);
        self.equality.swap(i, j);
        self.perm.swap(i, j);
    }

    /// Move a free-active row into the locked prefix of its level.
    pub(crate) fn lock(&mut self, row: usize) -> HqpResult<()> {
        let k = self.level_of[row];
        if row < self.breaks_fix[k] || row >= self.breaks_act[k] {
            return Err(HqpError::InvariantViolation(format!(
                "lock: row {} outside the free-active band [{}, {}) of level {}",
                row, self.breaks_fix[k], self.breaks_act[k], k
            )));
        }
        self.swap(row, self.breaks_fix[k]);
        self.breaks_fix[k] += 1;
        Ok(())
    }

    /// Treat one bound of an inactive row as an equality and move the row
    /// into the active band. Equality rows get both sides flagged.
    pub(crate) fn activate(&mut self, row: usize, is_lower: bool) -> HqpResult<()> {
        let k = self.level_of[row];
        if row < self.breaks_act[k] || row >= self.breaks[k] {
            return Err(HqpError::InvariantViolation(format!(
                "activate: row {} outside the inactive band [{}, {}) of level {}",
                row, self.breaks_act[k], self.breaks[k], k
            )));
        }
        if self.equality[row] {
            self.active_low[row] = true;
            self.active_up[row] = true;
        } else if is_lower {
            self.active_low[row] = true;
        } else {
            self.active_up[row] = true;
        }
        self.swap(row, self.breaks_act[k]);
        self.breaks_act[k] += 1;
        Ok(())
    }

    /// Return a free-active row to strict inequality status. Locked rows
    /// (equality rows in particular) are never deactivated.
    pub(crate) fn deactivate(&mut self, row: usize) -> HqpResult<()> {
        let k = self.level_of[row];
        if row < self.breaks_fix[k] || row >= self.breaks_act[k] {
            return Err(HqpError::InvariantViolation(format!(
                "deactivate: row {} outside the free-active band [{}, {}) of level {}",
                row, self.breaks_fix[k], self.breaks_act[k], k
            )));
        }
        self.active_low[row] = false;
        self.active_up[row] = false;
        self.breaks_act[k] -= 1;
        self.swap(row, self.breaks_act[k]);
        Ok(())
    }
}
