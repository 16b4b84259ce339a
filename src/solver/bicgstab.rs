//! Right-preconditioned BiCGStab solver (Saad §7.1)

use num_traits::Float;

use crate::core::traits::{InnerProduct, MatVec};
use crate::error::Result;
use crate::preconditioner::{apply_or_copy, Preconditioner};
use crate::solver::LinearSolver;
use crate::utils::convergence::{Convergence, SolveStats};

pub struct BiCgStabSolver<T> {
    pub conv: Convergence<T>,
}

impl<T: Float> BiCgStabSolver<T> {
    pub fn new(tol: T, max_iters: usize) -> Self {
        Self { conv: Convergence { tol, max_iters } }
    }
}

impl<M, T> LinearSolver<M, Vec<T>> for BiCgStabSolver<T>
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
        // r0 = b - A x0
        let mut r = vec![T::zero(); n];
        a.matvec(x, &mut r)?;
        for (ri, &bi) in r.iter_mut().zip(b) {
            *ri = bi - *ri;
        }
        let r_hat = r.clone(); // shadow residual
        let res0 = ip.norm(&r)?;
        let mut stats = SolveStats { iterations: 0, final_residual: res0, converged: res0 == T::zero() };
        if stats.converged {
            return Ok(stats);
        }

        let mut rho_prev = T::one();
        let mut alpha = T::one();
        let mut omega = T::one();
        let mut v = vec![T::zero(); n];
        let mut p = vec![T::zero(); n];
        let mut p_hat = vec![T::zero(); n];
        let mut s = vec![T::zero(); n];
        let mut s_hat = vec![T::zero(); n];
        let mut t = vec![T::zero(); n];
        for i in 1..=self.conv.max_iters {
            let rho = ip.dot(&r_hat, &r)?;
            if rho.abs() < T::min_positive_value() {
                break; // breakdown
            }
            let beta = (rho / rho_prev) * (alpha / omega);
            // p = r + beta * (p - omega * v)
            for ((pj, rj), vj) in p.iter_mut().zip(&r).zip(&v) {
                *pj = *rj + beta * (*pj - omega * *vj);
            }
            apply_or_copy(pc, &p, &mut p_hat)?;
            a.matvec(&p_hat, &mut v)?;
            let alpha_den = ip.dot(&r_hat, &v)?;
            if alpha_den.abs() < T::min_positive_value() {
                break; // breakdown
            }
            alpha = rho / alpha_den;
            // s = r - alpha * v
            for ((sj, rj), vj) in s.iter_mut().zip(&r).zip(&v) {
                *sj = *rj - alpha * *vj;
            }
            let s_norm = ip.norm(&s)?;
            let (stop, st) = self.conv.check(s_norm, res0, i);
            if st.converged {
                for (xj, pj) in x.iter_mut().zip(&p_hat) {
                    *xj = *xj + alpha * *pj;
                }
                stats = st;
                break;
            }
            // t = A s
            apply_or_copy(pc, &s, &mut s_hat)?;
            a.matvec(&s_hat, &mut t)?;
            let omega_den = ip.dot(&t, &t)?;
            if omega_den.abs() < T::min_positive_value() {
                break; // breakdown
            }
            omega = ip.dot(&t, &s)? / omega_den;
            // x = x + alpha * p + omega * s
            for ((xj, pj), sj) in x.iter_mut().zip(&p_hat).zip(&s_hat) {
                *xj = *xj + alpha * *pj + omega * *sj;
            }
            // r = s - omega * t
            for ((rj, sj), tj) in r.iter_mut().zip(&s).zip(&t) {
                *rj = *sj - omega * *tj;
            }
            let r_norm = ip.norm(&r)?;
            let (stop_r, st) = self.conv.check(r_norm, res0, i);
            stats = st;
            if stop || stop_r || omega.abs() < T::min_positive_value() {
                break;
            }
            rho_prev = rho;
        }
        Ok(stats)
    }
}
