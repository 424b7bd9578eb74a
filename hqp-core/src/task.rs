//! Task boundary layer.
//!
//! A task is an owned triple `(A_k, l_k, u_k)`; a stack of tasks
//! concatenates its members into the `(A, l, u, breaks)` form consumed by
//! [`crate::HierarchicalQP::set_problem`]. The solver core makes no
//! assumption about where tasks come from.

use nalgebra::{DMatrix, DVector};

use crate::error::{HqpError, HqpResult};

/// One block of two-sided constraints `l ≤ A x ≤ u`.
#[derive(Debug, Clone)]
pub struct Task {
    pub matrix: DMatrix<f64>,
    pub lower: DVector<f64>,
    pub upper: DVector<f64>,
}

impl Task {
    /// Build a task from explicit bounds.
    pub fn new(matrix: DMatrix<f64>, lower: DVector<f64>, upper: DVector<f64>) -> HqpResult<Self> {
        let m = matrix.nrows();
        if lower.len() != m || upper.len() != m {
            return Err(HqpError::InvalidArgument(format!(
                "task bounds have lengths {} and {}, expected {}",
                lower.len(),
                upper.len(),
                m
            )));
        }
        for i in 0..m {
            if lower[i] > upper[i] {
                return Err(HqpError::InvalidArgument(format!(
                    "task row {} has lower bound {} above upper bound {}",
                    i, lower[i], upper[i]
                )));
            }
        }
        Ok(Self { matrix, lower, upper })
    }

    /// Equality task `A x = target`.
    pub fn equality(matrix: DMatrix<f64>, target: DVector<f64>) -> HqpResult<Self> {
        Self::new(matrix, target.clone(), target)
    }

    /// One-sided task `A x ≤ upper`.
    pub fn upper_bound(matrix: DMatrix<f64>, upper: DVector<f64>) -> HqpResult<Self> {
        let lower = DVector::from_element(upper.len(), f64::NEG_INFINITY);
        Self::new(matrix, lower, upper)
    }

    /// One-sided task `A x ≥ lower`.
    pub fn lower_bound(matrix: DMatrix<f64>, lower: DVector<f64>) -> HqpResult<Self> {
        let upper = DVector::from_element(lower.len(), f64::INFINITY);
        Self::new(matrix, lower, upper)
    }

    pub fn rows(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn cols(&self) -> usize {
        self.matrix.ncols()
    }
}

/// Ordered collection of tasks; position is priority (0 highest).
#[derive(Debug, Clone, Default)]
pub struct StackOfTasks {
    tasks: Vec<Task>,
}

impl StackOfTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task at the lowest priority. All members must agree on
    /// the number of variables.
    pub fn push(&mut self, task: Task) -> HqpResult<()> {
        if let Some(first) = self.tasks.first() {
            if task.cols() != first.cols() {
                return Err(HqpError::InvalidArgument(format!(
                    "task has {} columns, stack has {}",
                    task.cols(),
                    first.cols()
                )));
            }
        }
        self.tasks.push(task);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Concatenate into the stacked form `(A, l, u, breaks)`.
    pub fn get_stack(&self) -> HqpResult<(DMatrix<f64>, DVector<f64>, DVector<f64>, Vec<usize>)> {
        let first = self
            .tasks
            .first()
            .ok_or_else(|| HqpError::InvalidArgument("stack is empty".to_string()))?;
        let cols = first.cols();
        let rows: usize = self.tasks.iter().map(Task::rows).sum();

        let mut matrix = DMatrix::zeros(rows, cols);
        let mut lower = DVector::zeros(rows);
        let mut upper = DVector::zeros(rows);
        let mut breaks = Vec::with_capacity(self.tasks.len());
        let mut at = 0;
        for task in &self.tasks {
            let m = task.rows();
            matrix.view_mut((at, 0), (m, cols)).copy_from(&task.matrix);
            lower.rows_mut(at, m).copy_from(&task.lower);
            upper.rows_mut(at, m).copy_from(&task.upper);
            at += m;
            breaks.push(at);
        }
        Ok((matrix, lower, upper, breaks))
    }

    /// Replace the stack's members by splitting stacked data at `breaks`.
    pub fn set_stack(
        &mut self,
        matrix: &DMatrix<f64>,
        lower: &DVector<f64>,
        upper: &DVector<f64>,
        breaks: &[usize],
    ) -> HqpResult<()> {
        let m = matrix.nrows();
        if lower.len() != m || upper.len() != m {
            return Err(HqpError::InvalidArgument(format!(
                "bounds have lengths {} and {}, expected {}",
                lower.len(),
                upper.len(),
                m
            )));
        }
        if breaks.is_empty() || *breaks.last().unwrap() != m {
            return Err(HqpError::InvalidArgument(
                "breaks must be non-empty and end at the row count".to_string(),
            ));
        }
        let mut tasks = Vec::with_capacity(breaks.len());
        let mut start = 0;
        for &end in breaks {
            if end < start {
                return Err(HqpError::InvalidArgument(
                    "breaks must be non-decreasing".to_string(),
                ));
            }
            let rows = end - start;
            tasks.push(Task::new(
                matrix.view((start, 0), (rows, matrix.ncols())).into_owned(),
                lower.rows(start, rows).into_owned(),
                upper.rows(start, rows).into_owned(),
            )?);
            start = end;
        }
        self.tasks = tasks;
        Ok(())
    }
}
