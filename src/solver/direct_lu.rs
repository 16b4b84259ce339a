//! Direct dense solver using Faer: LU with full pivoting.
//!
//! Suitable for small systems and for the diagonal blocks of block
//! preconditioners. The factorization is cached and can be reused for
//! several right-hand sides.
//!
//! # References
//! - Faer documentation: https://github.com/sarah-ek/faer-rs
//! - Golub & Van Loan, Matrix Computations

use faer::linalg::solvers::{FullPivLu, SolveCore};
use faer::{Conj, Mat, MatMut};

use crate::core::traits::InnerProduct;
use crate::error::{LssError, Result};
use crate::preconditioner::Preconditioner;
use crate::solver::LinearSolver;
use crate::utils::convergence::SolveStats;

/// LU solver using full pivoting from Faer.
#[derive(Default)]
pub struct LuSolver {
    factor: Option<FullPivLu<f64>>,
}

impl LuSolver {
    pub fn new() -> Self {
        LuSolver { factor: None }
    }

    /// Factors `a`, replacing any previous factorization.
    pub fn factor(&mut self, a: &Mat<f64>) {
        self.factor = Some(FullPivLu::new(a.as_ref()));
    }

    /// Solve using the cached LU factorization. A singular matrix shows up
    /// as non-finite values and is reported as an error.
    pub fn solve_cached(&self, b: &[f64], x: &mut [f64]) -> Result<()> {
        let factor = self
            .factor
            .as_ref()
            .ok_or_else(|| LssError::Factor("solve called before factorization".into()))?;
        let n = b.len();
        x.copy_from_slice(b);
        let x_mat = MatMut::from_column_major_slice_mut(x, n, 1);
        factor.solve_in_place_with_conj(Conj::No, x_mat);
        if x.iter().any(|v| !v.is_finite()) {
            return Err(LssError::Factor("matrix is singular".into()));
        }
        Ok(())
    }
}

impl LinearSolver<Mat<f64>, Vec<f64>> for LuSolver {
    type Scalar = f64;

    /// Factors `a` and solves; always a single iteration.
    fn solve<I>(
        &mut self,
        a: &Mat<f64>,
        _pc: Option<&dyn Preconditioner<Vec<f64>>>,
        _ip: &I,
        b: &Vec<f64>,
        x: &mut Vec<f64>,
    ) -> Result<SolveStats<f64>>
    where
        I: InnerProduct<Vec<f64>, Scalar = f64>,
    {
        if a.nrows() != a.ncols() || a.nrows() != b.len() {
            return Err(LssError::NotSupported(format!(
                "direct solve of a {}x{} matrix with {} right-hand side values",
                a.nrows(),
                a.ncols(),
                b.len()
            )));
        }
        self.factor(a);
        x.resize(b.len(), 0.0);
        self.solve_cached(b, x)?;
        Ok(SolveStats {
            iterations: 1,
            final_residual: 0.0,
            converged: true,
        })
    }
}
