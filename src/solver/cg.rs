//! (Preconditioned) Conjugate Gradient per Saad §6.1 and §9.2.

use num_traits::Float;

use crate::core::traits::{InnerProduct, MatVec};
use crate::error::{LssError, Result};
use crate::preconditioner::{apply_or_copy, Preconditioner};
use crate::solver::LinearSolver;
use crate::utils::convergence::{Convergence, SolveStats};

pub struct CgSolver<T> {
    pub conv: Convergence<T>,
}

impl<T: Float> CgSolver<T> {
    pub fn new(tol: T, max_iters: usize) -> Self {
        Self { conv: Convergence { tol, max_iters } }
    }
}

impl<M, T> LinearSolver<M, Vec<T>> for CgSolver<T>
where
    M: MatVec<Vec<T>>,
    T: Float,
{
    type Scalar = T;

    fn solve<I>(
        &mut self,
        a: &M,
        pc: Option<&dyn Preconditioner<Vec<T>>>,
        ip: &I,
        b: &Vec<T>,
        x: &mut Vec<T>,
    ) -> Result<SolveStats<T>>
    where
        I: InnerProduct<Vec<T>, Scalar = T>,
    {
        let n = b.len();
        x.resize(n, T::zero());
        let mut r = vec![T::zero(); n];
        a.matvec(x, &mut r)?;
        for (ri, &bi) in r.iter_mut().zip(b) {
            *ri = bi - *ri;
        }
        let res0 = ip.norm(&r)?;
        let mut stats = SolveStats { iterations: 0, final_residual: res0, converged: res0 == T::zero() };
        if stats.converged {
            return Ok(stats);
        }

        let mut z = vec![T::zero(); n];
        apply_or_copy(pc, &r, &mut z)?;
        let mut p = z.clone();
        let mut rz = ip.dot(&r, &z)?;
        let mut ap = vec![T::zero(); n];
        for i in 1..=self.conv.max_iters {
            a.matvec(&p, &mut ap)?;
            let pap = ip.dot(&p, &ap)?;
            // Indefinite-matrix detection
            if pap <= T::zero() {
                return Err(LssError::Solve(format!("CG: matrix is not positive definite (iteration {})", i)));
            }
            let alpha = rz / pap;
            for (xj, pj) in x.iter_mut().zip(&p) {
                *xj = *xj + alpha * *pj;
            }
            for (rj, apj) in r.iter_mut().zip(&ap) {
                *rj = *rj - alpha * *apj;
            }
            let res_norm = ip.norm(&r)?;
            let (stop, s) = self.conv.check(res_norm, res0, i);
            stats = s;
            if stop {
                break;
            }
            apply_or_copy(pc, &r, &mut z)?;
            let rz_new = ip.dot(&r, &z)?;
            let beta = rz_new / rz;
            // Indefinite-preconditioner detection
            if beta < T::zero() {
                return Err(LssError::Solve(format!(
                    "CG: preconditioner is not positive definite (iteration {})",
                    i
                )));
            }
            for (pj, zj) in p.iter_mut().zip(&z) {
                *pj = *zj + beta * *pj;
            }
            rz = rz_new;
        }
        Ok(stats)
    }
}
