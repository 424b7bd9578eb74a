//! Active-set outer loop.
//!
//! The driver minimizes the hierarchy one level at a time. At each inner
//! step it applies the single most promising change: the worst bound
//! violation anywhere in the problem is activated first; failing that,
//! the free-active row whose dual most strongly asks for release is
//! deactivated. Rows whose dual resists release are locked for the rest
//! of the current sweep so a degenerate exchange cannot cycle, and a
//! progress guard on the level's violation bounds the sweep when no
//! strict improvement shows up.

use crate::error::{HqpError, HqpResult};
use crate::solver::{HierarchicalQP, SolveInfo};

impl HierarchicalQP {
    /// Run one full solve. The problem is shifted so the previous
    /// solution is the origin (warm start), solved, and shifted back.
    pub(crate) fn solve_internal(&mut self) -> HqpResult<()> {
        self.info = SolveInfo::default();
        self.changes = 0;

        // Shift bounds by -A * guess so the solve starts at the origin.
        for i in 0..self.rows {
            let mut ax = 0.0;
            for j in 0..self.cols {
                ax += self.matrix[(i, j)] * self.guess[j];
            }
            self.shift_lower[i] = self.lower[i] - ax;
            self.shift_upper[i] = self.upper[i] - ax;
        }

        let all_equality = (0..self.rows).all(|i| self.equality[i]);
        let outcome = if all_equality {
            // No bound can ever change sides: a single primal pass is the
            // whole solve.
            self.equality_hqp();
            Ok(())
        } else {
            self.inequality_hqp()
        };

        // Un-shift and persist the next warm start, also on the error
        // path so `primal()` reports the best iterate in problem
        // coordinates.
        for j in 0..self.cols {
            self.primal[j] += self.guess[j];
            self.guess[j] = self.primal[j];
        }
        self.release_locks();
        if outcome.is_ok() {
            // Levels the cursor never reached contribute nothing; clear
            // their bounds so the next warm start begins clean.
            for k in self.cursor..self.levels {
                while self.breaks_act[k] > self.breaks_fix[k] {
                    self.deactivate(self.breaks_act[k] - 1)?;
                }
            }
            self.primal_valid = true;
        }
        self.slacks_valid = false;
        outcome
    }

    fn inequality_hqp(&mut self) -> HqpResult<()> {
        self.release_locks();
        for i in 0..self.rows {
            self.dual[i] = 0.0;
        }
        self.equality_hqp();

        let ceiling = self.iteration_ceiling();
        let mut iterations = 0usize;

        for h in 0..self.levels {
            let level_rows = self.breaks[h] - self.level_start(h);
            let stall_budget = 2 * level_rows.max(1);
            let mut stall = 0usize;
            let mut best_cost = f64::INFINITY;

            loop {
                iterations += 1;
                if iterations > ceiling {
                    self.info.iterations = iterations;
                    return Err(HqpError::IterationLimit { iterations });
                }

                // Most violated inactive bound, across every level.
                if let Some((row, is_lower)) = self.worst_violation() {
                    let lvl = self.level_of[row];
                    if self.verbose {
                        eprintln!(
                            "hqp: h={} activate row {} ({} bound) at level {}",
                            h,
                            self.perm[row],
                            if is_lower { "lower" } else { "upper" },
                            lvl
                        );
                    }
                    self.decrement_from(lvl);
                    self.activate(row, is_lower)?;
                    self.increment_from(lvl);
                    self.changes += 1;
                    self.info.activations += 1;
                    if self.note_progress(h, &mut best_cost, &mut stall) > stall_budget {
                        break;
                    }
                    continue;
                }

                // No violation: look for a bound worth releasing, and pin
                // down the ones that must resist this sweep.
                self.dual_update(h);
                if let Some(row) = self.worst_dual(h) {
                    let lvl = self.level_of[row];
                    if self.verbose {
                        eprintln!("hqp: h={} release row {} at level {}", h, self.perm[row], lvl);
                    }
                    self.decrement_from(lvl);
                    self.deactivate(row)?;
                    self.increment_from(lvl);
                    self.changes += 1;
                    self.info.deactivations += 1;
                    if self.note_progress(h, &mut best_cost, &mut stall) > stall_budget {
                        break;
                    }
                    continue;
                }
                self.lock_sweep(h)?;
                break;
            }

            // Locks only bind within one sweep.
            self.release_locks();
            self.info.levels_completed = h + 1;
        }

        self.info.iterations = iterations;
        Ok(())
    }

    /// Inactive row with the largest bound violation, earliest row on
    /// ties. Returns the violated side.
    fn worst_violation(&self) -> Option<(usize, bool)> {
        let mut best = self.tolerance;
        let mut found = None;
        for k in 0..self.levels {
            for i in self.breaks_act[k]..self.breaks[k] {
                let mut ax = 0.0;
                for j in 0..self.cols {
                    ax += self.matrix[(i, j)] * self.primal[j];
                }
                let over = ax - self.shift_upper[i];
                let under = self.shift_lower[i] - ax;
                let (viol, is_lower) = if over >= under { (over, false) } else { (under, true) };
                if viol > best {
                    best = viol;
                    found = Some((i, is_lower));
                }
            }
        }
        found
    }

    /// Free-active row of levels `0..=h` with the largest positive signed
    /// dual, earliest row on ties.
    fn worst_dual(&self, h: usize) -> Option<usize> {
        let mut best = self.tolerance;
        let mut found = None;
        for k in 0..=h {
            for i in self.breaks_fix[k]..self.breaks_act[k] {
                let signed = if self.active_up[i] { self.dual[i] } else { -self.dual[i] };
                if signed > best {
                    best = signed;
                    found = Some(i);
                }
            }
        }
        found
    }

    /// Lock every free-active row of levels `0..=h` whose signed dual says
    /// releasing it would worsen the slack at level h.
    fn lock_sweep(&mut self, h: usize) -> HqpResult<()> {
        for k in 0..=h {
            let mut i = self.breaks_fix[k];
            while i < self.breaks_act[k] {
                let signed = if self.active_up[i] { self.dual[i] } else { -self.dual[i] };
                if signed < -self.tolerance {
                    // The displaced row lands on position i and has been
                    // examined already; move on either way.
                    self.lock(i)?;
                }
                i += 1;
            }
        }
        Ok(())
    }

    /// Reset every level's locked prefix to its permanent equality rows.
    fn release_locks(&mut self) {
        for k in 0..self.levels {
            self.breaks_fix[k] = self.level_start(k) + self.num_equalities[k];
        }
    }

    /// Progress guard bookkeeping: returns the stall count after folding
    /// in the current level-h cost.
    fn note_progress(&self, h: usize, best_cost: &mut f64, stall: &mut usize) -> usize {
        let cost = self.level_cost_shifted(h);
        if cost < *best_cost - self.tolerance {
            *best_cost = cost;
            *stall = 0;
        } else {
            *stall += 1;
        }
        *stall
    }

    /// Level cost against the shifted bounds, matching the iterate the
    /// driver works on.
    fn level_cost_shifted(&self, h: usize) -> f64 {
        let mut cost = 0.0;
        for i in self.level_start(h)..self.breaks[h] {
            let mut ax = 0.0;
            for j in 0..self.cols {
                ax += self.matrix[(i, j)] * self.primal[j];
            }
            let viol = (self.shift_lower[i] - ax).max(ax - self.shift_upper[i]).max(0.0);
            cost += viol * viol;
        }
        cost
    }
}
