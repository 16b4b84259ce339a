//! Krylov & direct solvers, and the solution strategies systems delegate to.

use crate::core::traits::InnerProduct;
use crate::error::Result;
use crate::matrix::AnyMatrix;
use crate::preconditioner::Preconditioner;
use crate::utils::convergence::SolveStats;
use crate::vector::AnyVector;

/// Common interface for any direct or iterative solver.
pub trait LinearSolver<M, V> {
    type Scalar: Copy + PartialOrd;

    /// Solve A·x = b, writing result into `x`, which also holds the initial
    /// guess. Returns iteration stats (including convergence info).
    fn solve<I>(
        &mut self,
        a: &M,
        pc: Option<&dyn Preconditioner<V>>,
        ip: &I,
        b: &V,
        x: &mut V,
    ) -> Result<SolveStats<Self::Scalar>>
    where
        I: InnerProduct<V, Scalar = Self::Scalar>;
}

/// How a [`System`](crate::system::System) gets solved.
///
/// The hooks are called by the system with created, consistently shaped
/// objects; `solve` must leave `solution` populated in the index space it
/// was given, ghost rows included. Every method may communicate and must be
/// called on all ranks.
///
/// A strategy keeps no handle on the system's objects between calls and
/// rebuilds whatever it caches from the objects passed to `solve`, so it has
/// no created state of its own.
pub trait SolutionStrategy {
    fn name(&self) -> &'static str;

    fn set_matrix(&mut self, _matrix: &AnyMatrix) -> Result<()> {
        Ok(())
    }

    fn set_rhs(&mut self, _rhs: &AnyVector) -> Result<()> {
        Ok(())
    }

    fn set_solution(&mut self, _solution: &AnyVector) -> Result<()> {
        Ok(())
    }

    fn solve(&mut self, matrix: &AnyMatrix, rhs: &AnyVector, solution: &mut AnyVector) -> Result<SolveStats<f64>>;

    /// `‖b - A x‖₂` over all ranks.
    fn compute_residual(&mut self, matrix: &AnyMatrix, rhs: &AnyVector, solution: &AnyVector) -> Result<f64>;
}

pub mod bicgstab;
pub mod cg;
pub mod direct_lu;
pub mod strategy;

pub use bicgstab::BiCgStabSolver;
pub use cg::CgSolver;
pub use direct_lu::LuSolver;
pub use strategy::{strategy_for, DirectStrategy, EmptyStrategy, KrylovStrategy};
