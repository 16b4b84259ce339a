//! Convergence tracking & tolerance checks for iterative solvers.

/// Stopping criteria.
#[derive(Clone, Copy, Debug)]
pub struct Convergence<T> {
    pub tol: T,
    pub max_iters: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SolveStats<T> {
    pub iterations: usize,
    pub final_residual: T,
    pub converged: bool,
}

impl<T: Copy + num_traits::Float> Convergence<T> {
    /// Returns (should_stop, stats) given current `res_norm` and iteration `i`.
    ///
    /// The relative residual is measured against `res0_norm`; a zero initial
    /// residual counts as converged.
    pub fn check(&self, res_norm: T, res0_norm: T, i: usize) -> (bool, SolveStats<T>) {
        let rel = if res0_norm > T::zero() { res_norm / res0_norm } else { T::zero() };
        let converged = rel <= self.tol;
        (
            converged || i >= self.max_iters,
            SolveStats {
                iterations: i,
                final_residual: res_norm,
                converged,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hitting_the_iteration_cap_is_not_convergence() {
        let conv = Convergence { tol: 1e-6, max_iters: 3 };
        let (stop, stats) = conv.check(0.5, 1.0, 3);
        assert!(stop);
        assert!(!stats.converged);
        let (stop, stats) = conv.check(1e-8, 1.0, 1);
        assert!(stop && stats.converged);
        let (_, stats) = conv.check(0.0, 0.0, 0);
        assert!(stats.converged);
    }
}
