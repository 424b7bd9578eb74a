//! End-to-end tests for the hierarchical QP solver.
//!
//! Each scenario states the stacked problem, the expected lexicographic
//! optimum, and the property it exercises: bound activation, equality
//! cascades, metric weighting, warm starts, infeasible levels, and
//! permutation transparency of the returned slacks.

use hqp_core::{HierarchicalQP, StackOfTasks, Task};
use nalgebra::{DMatrix, DVector};

const TOL: f64 = 1e-6;

fn assert_vec_close(actual: &DVector<f64>, expected: &[f64], tol: f64) {
    assert_eq!(actual.len(), expected.len());
    for (i, &e) in expected.iter().enumerate() {
        assert!(
            (actual[i] - e).abs() < tol,
            "component {}: got {}, expected {}",
            i,
            actual[i],
            e
        );
    }
}

/// Stacked form of scenario S1: a box, a sum bound, an equality, and an
/// out-of-reach range, in four priority levels.
///
///   level 0:  -1 <= x_i <= 1            (box)
///   level 1:  x1 + x2 + x3 <= 1         (sum)
///   level 2:  x1 - x2 = 0.5             (equality)
///   level 3:  10 <= 3 x1 + x2 - x3 <= 20
fn s1_data() -> (DMatrix<f64>, DVector<f64>, DVector<f64>, Vec<usize>) {
    let a = DMatrix::from_row_slice(6, 3, &[
        1.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, //
        0.0, 0.0, 1.0, //
        1.0, 1.0, 1.0, //
        1.0, -1.0, 0.0, //
        3.0, 1.0, -1.0,
    ]);
    let l = DVector::from_vec(vec![-1.0, -1.0, -1.0, f64::NEG_INFINITY, 0.5, 10.0]);
    let u = DVector::from_vec(vec![1.0, 1.0, 1.0, 1.0, 0.5, 20.0]);
    (a, l, u, vec![3, 4, 5, 6])
}

#[test]
fn s1_box_sum_equality_range() {
    let (a, l, u, breaks) = s1_data();
    let mut qp = HierarchicalQP::new(6, 3);
    qp.set_problem(&a, &l, &u, &breaks).unwrap();

    let x = qp.get_primal().unwrap().clone();
    assert_vec_close(&x, &[1.0, 0.5, -1.0], TOL);

    // The box and the equality are met exactly; the range level is out of
    // reach and keeps its violation.
    assert!(qp.get_level_cost(0).unwrap() < TOL);
    assert!(qp.get_level_cost(1).unwrap() < TOL);
    assert!(qp.get_level_cost(2).unwrap() < TOL);
    let range_cost = qp.get_level_cost(3).unwrap();
    assert!(
        (range_cost - 5.5 * 5.5).abs() < 1e-4,
        "range cost {}",
        range_cost
    );
}

#[test]
fn s2_pure_equality_cascade() {
    // Two single-row equality levels: x1 = 3, then x2 = 7. The driver is
    // skipped entirely and the cascade pins both coordinates.
    let mut qp = HierarchicalQP::new(2, 2);
    let a = DMatrix::identity(2, 2);
    let t = DVector::from_vec(vec![3.0, 7.0]);
    qp.set_problem(&a, &t, &t, &[1, 2]).unwrap();

    let x = qp.get_primal().unwrap().clone();
    assert_vec_close(&x, &[3.0, 7.0], TOL);
    assert_eq!(qp.changes, 0);
}

fn s3_data() -> (DMatrix<f64>, DVector<f64>, DVector<f64>, Vec<usize>) {
    let a = DMatrix::from_row_slice(6, 2, &[
        0.1, -1.0, //
        1.0, -1.0, //
        1.0, 0.0, //
        1.0, 1.0, //
        1.0, 0.0, //
        0.0, 1.0,
    ]);
    let l = DVector::from_vec(vec![
        f64::NEG_INFINITY,
        f64::NEG_INFINITY,
        2.5,
        2.0,
        0.0,
        0.0,
    ]);
    let u = DVector::from_vec(vec![-0.55, 1.5, f64::INFINITY, f64::INFINITY, 0.0, 0.0]);
    (a, l, u, vec![2, 4, 6])
}

#[test]
fn s3_inequalities_above_weighted_target() {
    // level 0: 0.1 x1 - x2 <= -0.55 and x1 - x2 <= 1.5
    // level 1: x1 >= 2.5 and x1 + x2 >= 2
    // level 2: x = (0, 0), with metric M = [[10, 5], [5, 7]]
    //
    // The target is unreachable; the binding rows x1 >= 2.5 and
    // x1 - x2 <= 1.5 intersect at (2.5, 1).
    let (a, l, u, breaks) = s3_data();
    let mut qp = HierarchicalQP::new(6, 2);
    let metric = DMatrix::from_row_slice(2, 2, &[10.0, 5.0, 5.0, 7.0]);
    qp.set_metric(&metric).unwrap();
    qp.set_problem(&a, &l, &u, &breaks).unwrap();

    let x = qp.get_primal().unwrap().clone();
    assert_vec_close(&x, &[2.5, 1.0], TOL);
    assert!(qp.get_level_cost(0).unwrap() < TOL);
    assert!(qp.get_level_cost(1).unwrap() < TOL);
}

#[test]
fn s4_warm_start_is_idempotent() {
    let (a, l, u, breaks) = s1_data();
    let mut qp = HierarchicalQP::new(6, 3);
    qp.set_problem(&a, &l, &u, &breaks).unwrap();

    let first = qp.get_primal().unwrap().clone();
    assert!(qp.changes > 0);

    // Unchanged inputs: the second call must not move and must record
    // zero active-set changes.
    let second = qp.get_primal().unwrap().clone();
    assert_eq!(qp.changes, 0);
    for i in 0..3 {
        assert_eq!(first[i].to_bits(), second[i].to_bits(), "component {}", i);
    }
}

#[test]
fn resolve_after_set_problem_reuses_the_active_set() {
    // Re-installing the identical problem keeps the previous solution: the
    // warm start must converge back to the same point.
    let (a, l, u, breaks) = s1_data();
    let mut qp = HierarchicalQP::new(6, 3);
    qp.set_problem(&a, &l, &u, &breaks).unwrap();
    let first = qp.get_primal().unwrap().clone();
    let first_changes = qp.changes;

    qp.set_problem(&a, &l, &u, &breaks).unwrap();
    let second = qp.get_primal().unwrap().clone();
    assert_vec_close(&second, first.as_slice(), TOL);
    assert!(
        qp.changes <= first_changes,
        "warm start did more work than the cold solve: {} vs {}",
        qp.changes,
        first_changes
    );
}

#[test]
fn s5_conflicting_equalities() {
    // level 0: x = 1 and x = 2 (irreconcilable), level 1: x = 0.
    // Level 0 takes its least-squares compromise x = 1.5 and exhausts the
    // only degree of freedom; level 1 is ignored.
    let mut qp = HierarchicalQP::new(3, 1);
    let a = DMatrix::from_row_slice(3, 1, &[1.0, 1.0, 1.0]);
    let t = DVector::from_vec(vec![1.0, 2.0, 0.0]);
    qp.set_problem(&a, &t, &t, &[2, 3]).unwrap();

    let x = qp.get_primal().unwrap().clone();
    assert!((x[0] - 1.5).abs() < TOL);
    assert!((qp.get_level_cost(0).unwrap() - 0.5).abs() < TOL);
}

#[test]
fn s6_slacks_follow_the_callers_row_order() {
    // Solve S1, then re-pose it with the equality task promoted to level
    // 0. The slack vectors must be indexed by each problem's own row
    // numbering regardless of the internal permutation.
    let (a, l, u, breaks) = s1_data();
    let mut qp = HierarchicalQP::new(6, 3);
    qp.set_problem(&a, &l, &u, &breaks).unwrap();
    qp.get_primal().unwrap();
    let (low1, up1) = {
        let (low, up) = qp.get_slack().unwrap();
        (low.clone(), up.clone())
    };

    // Rebuild with the stack reordered: equality, box, sum, range.
    let mut stack = StackOfTasks::new();
    stack
        .push(
            Task::equality(
                DMatrix::from_row_slice(1, 3, &[1.0, -1.0, 0.0]),
                DVector::from_vec(vec![0.5]),
            )
            .unwrap(),
        )
        .unwrap();
    stack
        .push(
            Task::new(
                DMatrix::identity(3, 3),
                DVector::from_vec(vec![-1.0, -1.0, -1.0]),
                DVector::from_vec(vec![1.0, 1.0, 1.0]),
            )
            .unwrap(),
        )
        .unwrap();
    stack
        .push(
            Task::upper_bound(
                DMatrix::from_row_slice(1, 3, &[1.0, 1.0, 1.0]),
                DVector::from_vec(vec![1.0]),
            )
            .unwrap(),
        )
        .unwrap();
    stack
        .push(
            Task::new(
                DMatrix::from_row_slice(1, 3, &[3.0, 1.0, -1.0]),
                DVector::from_vec(vec![10.0]),
                DVector::from_vec(vec![20.0]),
            )
            .unwrap(),
        )
        .unwrap();
    let (a2, l2, u2, breaks2) = stack.get_stack().unwrap();

    let mut qp2 = HierarchicalQP::new(6, 3);
    qp2.set_problem(&a2, &l2, &u2, &breaks2).unwrap();
    let x2 = qp2.get_primal().unwrap().clone();
    assert_vec_close(&x2, &[1.0, 0.5, -1.0], TOL);

    let (low2, up2) = qp2.get_slack().unwrap();
    // Original rows: 0..2 box, 3 sum, 4 equality, 5 range.
    // Reordered rows: 0 equality, 1..3 box, 4 sum, 5 range.
    assert!((low2[0] - low1[4]).abs() < TOL && (up2[0] - up1[4]).abs() < TOL);
    for i in 0..3 {
        assert!((low2[1 + i] - low1[i]).abs() < TOL);
        assert!((up2[1 + i] - up1[i]).abs() < TOL);
    }
    assert!((low2[4] - low1[3]).abs() < TOL && (up2[4] - up1[3]).abs() < TOL);
    assert!((low2[5] - low1[5]).abs() < TOL && (up2[5] - up1[5]).abs() < TOL);
    // The unreachable range level shows up as a lower-side deficit.
    assert!((low2[5] + 5.5).abs() < 1e-4, "range slack {}", low2[5]);
}

#[test]
fn metric_scaling_leaves_the_solution_unchanged() {
    // Property 5: replacing M by a^2 M rescales the root basis but not
    // the lexicographic optimum.
    let (a, l, u, breaks) = s3_data();
    let metric = DMatrix::from_row_slice(2, 2, &[10.0, 5.0, 5.0, 7.0]);

    let mut qp = HierarchicalQP::new(6, 2);
    qp.set_metric(&metric).unwrap();
    qp.set_problem(&a, &l, &u, &breaks).unwrap();
    let x = qp.get_primal().unwrap().clone();

    let mut qp_scaled = HierarchicalQP::new(6, 2);
    qp_scaled.set_metric(&(&metric * 16.0)).unwrap();
    qp_scaled.set_problem(&a, &l, &u, &breaks).unwrap();
    let x_scaled = qp_scaled.get_primal().unwrap().clone();

    assert_vec_close(&x_scaled, x.as_slice(), 1e-8);
}

#[test]
fn level_costs_are_lexicographically_minimal() {
    // Property 6 on S1: no alternative point beats the solution at level
    // 0; no point matching it on levels 0..k beats it at level k.
    let (a, l, u, breaks) = s1_data();
    let mut qp = HierarchicalQP::new(6, 3);
    qp.set_problem(&a, &l, &u, &breaks).unwrap();
    let x = qp.get_primal().unwrap().clone();

    let cost = |x: &DVector<f64>, level: usize| -> f64 {
        let start = if level == 0 { 0 } else { breaks[level - 1] };
        let mut c = 0.0;
        for i in start..breaks[level] {
            let mut ax = 0.0;
            for j in 0..3 {
                ax += a[(i, j)] * x[j];
            }
            let v = (l[i] - ax).max(ax - u[i]).max(0.0);
            c += v * v;
        }
        c
    };

    // Candidate points that satisfy the first three levels but try to do
    // better on the range level, plus some arbitrary points.
    let candidates = [
        DVector::from_vec(vec![1.0, 0.5, -1.0]),
        DVector::from_vec(vec![2.0, 1.5, -2.0]),
        DVector::from_vec(vec![1.0, 0.5, -0.5]),
        DVector::from_vec(vec![0.5, 0.0, -1.0]),
        DVector::from_vec(vec![0.0, 0.0, 0.0]),
        DVector::from_vec(vec![-1.0, 1.0, 1.0]),
    ];
    for cand in &candidates {
        assert!(cost(&x, 0) <= cost(cand, 0) + TOL);
        let mut tied = true;
        for k in 0..4 {
            if !tied {
                break;
            }
            assert!(
                cost(&x, k) <= cost(cand, k) + TOL,
                "candidate {:?} beats the solution at level {}",
                cand.as_slice(),
                k
            );
            tied = (cost(&x, k) - cost(cand, k)).abs() <= TOL;
        }
    }
}

#[test]
fn equality_rows_hold_exactly_when_reachable() {
    // Property 2 on S1: the level-2 equality is not in conflict with any
    // higher level, so it holds to tolerance.
    let (a, l, u, breaks) = s1_data();
    let mut qp = HierarchicalQP::new(6, 3);
    qp.set_problem(&a, &l, &u, &breaks).unwrap();
    let x = qp.get_primal().unwrap();
    assert!((x[0] - x[1] - 0.5).abs() < TOL);
}

#[test]
fn invalid_inputs_are_rejected() {
    let mut qp = HierarchicalQP::new(4, 2);
    let a = DMatrix::identity(2, 2);
    let l = DVector::from_vec(vec![0.0, 0.0]);
    let u = DVector::from_vec(vec![1.0, 1.0]);

    // Crossed bounds
    let crossed = DVector::from_vec(vec![2.0, 0.0]);
    assert!(qp.set_problem(&a, &crossed, &u, &[2]).is_err());
    // Breaks not covering the rows
    assert!(qp.set_problem(&a, &l, &u, &[1]).is_err());
    // Decreasing breaks
    assert!(qp.set_problem(&a, &l, &u, &[2, 1]).is_err());
    // Non-symmetric metric
    let skew = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, -0.5, 1.0]);
    assert!(qp.set_metric(&skew).is_err());
    // Indefinite metric
    let indef = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
    assert!(qp.set_metric(&indef).is_err());

    // A failed install leaves the solver usable.
    qp.set_problem(&a, &l, &u, &[2]).unwrap();
    assert!(qp.get_primal().is_ok());
}

#[test]
fn active_set_printout_uses_original_row_ids() {
    let (a, l, u, breaks) = s1_data();
    let mut qp = HierarchicalQP::new(6, 3);
    qp.set_problem(&a, &l, &u, &breaks).unwrap();
    qp.get_primal().unwrap();

    let mut out = Vec::new();
    qp.print_active_set(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("Active set:"));
    // The level-2 equality (original row 4) is always active.
    assert!(text.contains("level 2"), "printout: {}", text);
    assert!(text.contains("4="), "printout: {}", text);
}

#[test]
fn solver_reports_activation_counts() {
    let (a, l, u, breaks) = s1_data();
    let mut qp = HierarchicalQP::new(6, 3);
    qp.set_problem(&a, &l, &u, &breaks).unwrap();
    qp.get_primal().unwrap();

    let info = *qp.info();
    assert_eq!(qp.changes, info.activations + info.deactivations);
    assert!(info.activations > 0);
    assert_eq!(info.levels_completed, 4);
    assert!(info.iterations >= info.activations + info.deactivations);
}
