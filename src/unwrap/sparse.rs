//! Sparse matrix and conjugate gradient solver.
//!
//! This module provides a lightweight sparse matrix implementation (CSR
//! format) and a Jacobi-preconditioned conjugate gradient solver for the
//! symmetric positive definite systems assembled by the parameterization
//! stage. Those systems are Laplacian-like with diagonal entries varying by
//! vertex valence and triangle shape; the diagonal preconditioner evens that
//! out and keeps iteration counts low.

use nalgebra::DVector;

/// Compressed Sparse Row (CSR) matrix.
///
/// Stores a sparse matrix in CSR format for efficient matrix-vector
/// multiplication.
#[derive(Debug, Clone)]
pub(crate) struct CsrMatrix {
    /// Number of rows.
    rows: usize,
    /// Number of columns.
    cols: usize,
    /// Row pointers: row_ptr[i] is the index in col_idx/values where row i starts.
    /// Length is rows + 1, with row_ptr[rows] = nnz.
    row_ptr: Vec<usize>,
    /// Column indices for each non-zero value.
    col_idx: Vec<usize>,
    /// Non-zero values.
    values: Vec<f64>,
}

impl CsrMatrix {
    /// Create a CSR matrix from triplets (row, col, value).
    ///
    /// Duplicate entries at the same (row, col) are summed.
    pub fn from_triplets(rows: usize, cols: usize, mut triplets: Vec<(usize, usize, f64)>) -> Self {
        if triplets.is_empty() {
            return Self {
                rows,
                cols,
                row_ptr: vec![0; rows + 1],
                col_idx: Vec::new(),
                values: Vec::new(),
            };
        }

        // Sort by (row, col) for CSR construction
        triplets.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        // Merge duplicates and build CSR
        let mut row_ptr = vec![0usize; rows + 1];
        let mut col_idx = Vec::with_capacity(triplets.len());
        let mut values = Vec::with_capacity(triplets.len());

        let mut prev_row = usize::MAX;
        let mut prev_col = usize::MAX;

        for (row, col, val) in triplets {
            if row == prev_row && col == prev_col {
                // Same position: accumulate value
                *values.last_mut().unwrap() += val;
            } else {
                // New entry
                col_idx.push(col);
                values.push(val);
                // Update row pointers for any skipped rows
                for r in (prev_row.wrapping_add(1))..=row {
                    row_ptr[r] = col_idx.len() - 1;
                }
                prev_row = row;
                prev_col = col;
            }
        }

        // Fill remaining row pointers
        let nnz = col_idx.len();
        for r in (prev_row + 1)..=rows {
            row_ptr[r] = nnz;
        }

        Self {
            rows,
            cols,
            row_ptr,
            col_idx,
            values,
        }
    }

    /// Get the number of rows.
    #[inline]
    pub fn nrows(&self) -> usize {
        self.rows
    }

    /// Get the number of columns.
    #[inline]
    pub fn ncols(&self) -> usize {
        self.cols
    }

    /// Get the number of non-zero entries.
    #[inline]
    #[allow(dead_code)]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Multiply matrix by vector: y = A * x.
    pub fn mul_vec(&self, x: &DVector<f64>) -> DVector<f64> {
        assert_eq!(x.len(), self.cols, "Vector dimension mismatch");

        let mut y = DVector::zeros(self.rows);

        for i in 0..self.rows {
            let start = self.row_ptr[i];
            let end = self.row_ptr[i + 1];

            let mut sum = 0.0;
            for k in start..end {
                sum += self.values[k] * x[self.col_idx[k]];
            }
            y[i] = sum;
        }

        y
    }

    /// Extract the diagonal, with zeros replaced by one so the Jacobi
    /// preconditioner stays well-defined.
    pub fn diagonal(&self) -> DVector<f64> {
        let mut diag = DVector::from_element(self.rows.min(self.cols), 1.0);
        for i in 0..diag.len() {
            let start = self.row_ptr[i];
            let end = self.row_ptr[i + 1];
            for k in start..end {
                if self.col_idx[k] == i && self.values[k].abs() > 1e-300 {
                    diag[i] = self.values[k];
                }
            }
        }
        diag
    }
}

/// Outcome of a conjugate gradient solve.
///
/// The solve never errors by itself: callers inspect `converged` and decide
/// whether to fall back or report a failure with the recorded residual.
#[derive(Debug, Clone)]
pub(crate) struct CgOutcome {
    /// The best solution found.
    pub x: DVector<f64>,
    /// Iterations performed.
    pub iterations: usize,
    /// Final relative residual norm, |b - Ax| / |b|.
    pub residual: f64,
    /// Whether the residual dropped below the tolerance.
    pub converged: bool,
}

/// Solve A*x = b using Jacobi-preconditioned Conjugate Gradient.
///
/// Requires A to be symmetric positive definite.
///
/// # Arguments
///
/// * `a` - The system matrix (must be symmetric positive definite)
/// * `b` - The right-hand side vector
/// * `max_iter` - Maximum number of iterations
/// * `tolerance` - Convergence tolerance (relative residual norm)
pub(crate) fn conjugate_gradient(
    a: &CsrMatrix,
    b: &DVector<f64>,
    max_iter: usize,
    tolerance: f64,
) -> CgOutcome {
    let n = b.len();
    assert_eq!(a.nrows(), n, "Matrix-vector dimension mismatch");
    assert_eq!(a.ncols(), n, "Matrix must be square");

    let mut x = DVector::zeros(n);

    let b_norm = b.norm();
    if b_norm < 1e-300 {
        return CgOutcome {
            x,
            iterations: 0,
            residual: 0.0,
            converged: true,
        };
    }

    let inv_diag = a.diagonal().map(|d| 1.0 / d);
    let apply_precond = |r: &DVector<f64>| -> DVector<f64> { r.component_mul(&inv_diag) };

    // r = b - A*x = b for the zero initial guess
    let mut r = b.clone();
    let mut residual = r.norm() / b_norm;
    if residual < tolerance {
        return CgOutcome {
            x,
            iterations: 0,
            residual,
            converged: true,
        };
    }

    let mut z = apply_precond(&r);
    let mut p = z.clone();
    let mut rz = r.dot(&z);

    for iter in 0..max_iter {
        let ap = a.mul_vec(&p);

        let p_ap = p.dot(&ap);
        if p_ap.abs() < 1e-300 {
            // Singular or numerically indefinite system
            return CgOutcome {
                x,
                iterations: iter,
                residual,
                converged: false,
            };
        }
        let alpha = rz / p_ap;

        x += alpha * &p;
        r -= alpha * &ap;

        residual = r.norm() / b_norm;
        if residual < tolerance {
            return CgOutcome {
                x,
                iterations: iter + 1,
                residual,
                converged: true,
            };
        }

        z = apply_precond(&r);
        let rz_new = r.dot(&z);
        let beta = rz_new / rz;
        p = &z + beta * &p;
        rz = rz_new;
    }

    CgOutcome {
        x,
        iterations: max_iter,
        residual,
        converged: false,
    }
}
