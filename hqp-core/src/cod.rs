//! In-place complete orthogonal decomposition of a projected task block.
//!
//! Factors an `nrows × dof` matrix E as
//!
//! ```text
//! E · P = Q · [T 0; 0 0] · Z^T
//! ```
//!
//! where P is a column permutation, Q and Z are orthogonal, and T is an
//! `rank × rank` upper-triangular block holding the numerical rank of E.
//! The construction is a column-pivoted Householder QR followed by
//! Householder annihilation of the trailing columns of the upper
//! trapezoid, applied from the right.
//!
//! All storage is preallocated once and reused across factorizations:
//! reflector vectors live below the diagonal of the factored matrix (left
//! side) and in the zeroed trailing columns of its top rows (right side),
//! so the hot path never touches the heap.

use nalgebra::{DMatrix, DVector};

/// Reusable scratch for one decomposition at a time.
#[derive(Debug)]
pub(crate) struct CodWorkspace {
    /// Factored matrix: R on and above the diagonal, left reflectors below
    /// it, right reflector tails in the trailing columns of rows `0..rank`.
    qr: DMatrix<f64>,
    /// Thin left factor `Q[:, 0..rank]`, materialized on demand.
    q: DMatrix<f64>,
    /// Left Householder coefficients, one per factorization step.
    tau_q: DVector<f64>,
    /// Right Householder coefficients, one per row of T.
    tau_z: DVector<f64>,
    /// Column pivot chosen at each step (`jperm[j]` swapped with `j`).
    jperm: Vec<usize>,
    nrows: usize,
    dof: usize,
    steps: usize,
    rank: usize,
}

impl CodWorkspace {
    pub(crate) fn new(max_rows: usize, cols: usize) -> Self {
        Self {
            qr: DMatrix::zeros(max_rows, cols),
            q: DMatrix::zeros(max_rows, cols),
            tau_q: DVector::zeros(cols),
            tau_z: DVector::zeros(cols),
            jperm: vec![0; cols],
            nrows: 0,
            dof: 0,
            steps: 0,
            rank: 0,
        }
    }

    /// Staging area for the matrix to factor. The caller writes the
    /// `nrows × dof` block starting at (0, 0) before calling `factorize`.
    pub(crate) fn stage(&mut self) -> &mut DMatrix<f64> {
        &mut self.qr
    }

    pub(crate) fn rank(&self) -> usize {
        self.rank
    }

    /// Column-pivoted Householder QR of the staged block, with the rank
    /// taken as the longest diagonal prefix satisfying
    /// `|R[j,j]| > tolerance · max_pivot` (strict, so a zero matrix has
    /// rank zero and a uniform rescaling of E leaves the rank unchanged).
    pub(crate) fn factorize(&mut self, nrows: usize, dof: usize, tolerance: f64) {
        self.nrows = nrows;
        self.dof = dof;
        self.steps = nrows.min(dof);

        for j in 0..self.steps {
            // Pivot: bring the remaining column with the largest tail norm
            // to position j. Norms are recomputed exactly; the blocks are
            // small and the downdate formula loses accuracy.
            let mut pivot = j;
            let mut pivot_norm = 0.0;
            for c in j..dof {
                let mut s = 0.0;
                for i in j..nrows {
                    s += self.qr[(i, c)] * self.qr[(i, c)];
                }
                if s > pivot_norm {
                    pivot_norm = s;
                    pivot = c;
                }
            }
            self.jperm[j] = pivot;
            if pivot != j {
                self.qr.swap_columns(j, pivot);
            }

            if pivot_norm == 0.0 {
                // Remaining block is exactly zero; the diagonal stays zero
                // and the rank scan below stops here.
                self.tau_q[j] = 0.0;
                continue;
            }

            // Householder reflector zeroing column j below the diagonal.
            let norm = pivot_norm.sqrt();
            let head = self.qr[(j, j)];
            let alpha = if head >= 0.0 { -norm } else { norm };
            let v0 = head - alpha;
            let tail = (pivot_norm - head * head).max(0.0);
            for i in j + 1..nrows {
                self.qr[(i, j)] /= v0;
            }
            let tau = 2.0 * v0 * v0 / (v0 * v0 + tail);
            self.tau_q[j] = tau;
            self.qr[(j, j)] = alpha;

            for c in j + 1..dof {
                let mut dot = self.qr[(j, c)];
                for i in j + 1..nrows {
                    dot += self.qr[(i, j)] * self.qr[(i, c)];
                }
                let scaled = tau * dot;
                self.qr[(j, c)] -= scaled;
                for i in j + 1..nrows {
                    let vi = self.qr[(i, j)];
                    self.qr[(i, c)] -= scaled * vi;
                }
            }
        }

        let mut max_pivot = 0.0_f64;
        for j in 0..self.steps {
            max_pivot = max_pivot.max(self.qr[(j, j)].abs());
        }
        let threshold = tolerance * max_pivot;
        let mut rank = 0;
        while rank < self.steps && self.qr[(rank, rank)].abs() > threshold {
            rank += 1;
        }
        self.rank = rank;
    }

    /// Compress the upper trapezoid `[T1 T2]` to `[T 0] · Z^T` by
    /// Householder reflectors applied from the right, bottom row first.
    /// Only meaningful when `rank < dof`; for a full-rank block Z is the
    /// identity and nothing is stored.
    pub(crate) fn annihilate_right(&mut self) {
        let rank = self.rank;
        let dof = self.dof;
        debug_assert!(rank < dof);

        for k in (0..rank).rev() {
            let mut tail = 0.0;
            for c in rank..dof {
                tail += self.qr[(k, c)] * self.qr[(k, c)];
            }
            if tail == 0.0 {
                self.tau_z[k] = 0.0;
                continue;
            }

            let head = self.qr[(k, k)];
            let norm = (head * head + tail).sqrt();
            let alpha = if head >= 0.0 { -norm } else { norm };
            let v0 = head - alpha;
            for c in rank..dof {
                self.qr[(k, c)] /= v0;
            }
            let tau = 2.0 * v0 * v0 / (v0 * v0 + tail);
            self.tau_z[k] = tau;
            self.qr[(k, k)] = alpha;

            // Rows above k pick up the reflector on columns {k} ∪ tail.
            for j in 0..k {
                let mut dot = self.qr[(j, k)];
                for c in rank..dof {
                    dot += self.qr[(j, c)] * self.qr[(k, c)];
                }
                let scaled = self.tau_z[k] * dot;
                self.qr[(j, k)] -= scaled;
                for c in rank..dof {
                    let vc = self.qr[(k, c)];
                    self.qr[(j, c)] -= scaled * vc;
                }
            }
        }
    }

    /// Apply the recorded column permutation to the first `dof` columns of
    /// `basis`, in factorization order, so that `basis` becomes `N · P`.
    pub(crate) fn permute_basis(&self, basis: &mut DMatrix<f64>) {
        for j in 0..self.steps {
            if self.jperm[j] != j {
                basis.swap_columns(j, self.jperm[j]);
            }
        }
    }

    /// Apply `Z` to the first `dof` columns of `basis` from the right,
    /// turning `N · P` into `N · P · Z`. Columns `rank..dof` of the result
    /// span the null space of the factored block within the parent basis.
    pub(crate) fn apply_z(&self, basis: &mut DMatrix<f64>, basis_rows: usize) {
        let rank = self.rank;
        let dof = self.dof;
        for k in (0..rank).rev() {
            let tau = self.tau_z[k];
            if tau == 0.0 {
                continue;
            }
            for j in 0..basis_rows {
                let mut dot = basis[(j, k)];
                for c in rank..dof {
                    dot += basis[(j, c)] * self.qr[(k, c)];
                }
                let scaled = tau * dot;
                basis[(j, k)] -= scaled;
                for c in rank..dof {
                    let vc = self.qr[(k, c)];
                    basis[(j, c)] -= scaled * vc;
                }
            }
        }
    }

    /// Materialize the thin left factor `Q[:, 0..rank]` into the internal
    /// buffer by applying the stored reflectors to the leading identity
    /// columns.
    pub(crate) fn build_q_thin(&mut self) -> &DMatrix<f64> {
        let nrows = self.nrows;
        let rank = self.rank;
        for c in 0..rank {
            for i in 0..nrows {
                self.q[(i, c)] = if i == c { 1.0 } else { 0.0 };
            }
        }
        // Reflectors beyond the rank act as the identity on these columns.
        for j in (0..rank).rev() {
            let tau = self.tau_q[j];
            if tau == 0.0 {
                continue;
            }
            for c in 0..rank {
                let mut dot = self.q[(j, c)];
                for i in j + 1..nrows {
                    dot += self.qr[(i, j)] * self.q[(i, c)];
                }
                let scaled = tau * dot;
                self.q[(j, c)] -= scaled;
                for i in j + 1..nrows {
                    let vi = self.qr[(i, j)];
                    self.q[(i, c)] -= scaled * vi;
                }
            }
        }
        &self.q
    }

    /// Upper-triangular mid factor `T`, valid after `factorize` (and
    /// `annihilate_right` when the rank is deficient).
    pub(crate) fn mid(&self) -> &DMatrix<f64> {
        &self.qr
    }

    pub(crate) fn q_thin(&self) -> &DMatrix<f64> {
        &self.q
    }
}

/// Solve `T y = x` in place for upper-triangular `T[0..rank, 0..rank]`.
pub(crate) fn solve_upper_in_place(t: &DMatrix<f64>, rank: usize, x: &mut [f64]) {
    for i in (0..rank).rev() {
        let mut acc = x[i];
        for j in i + 1..rank {
            acc -= t[(i, j)] * x[j];
        }
        x[i] = acc / t[(i, i)];
    }
}

/// Solve `T^T y = x` in place for upper-triangular `T[0..rank, 0..rank]`.
pub(crate) fn solve_upper_transpose_in_place(t: &DMatrix<f64>, rank: usize, x: &mut [f64]) {
    for i in 0..rank {
        let mut acc = x[i];
        for j in 0..i {
            acc -= t[(j, i)] * x[j];
        }
        x[i] = acc / t[(i, i)];
    }
}
