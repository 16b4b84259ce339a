//! Solution strategies for systems.
//!
//! - [`EmptyStrategy`] accepts everything and solves nothing.
//! - [`KrylovStrategy`] runs CG or BiCGStab on the native back end across
//!   all ranks, optionally with a (block) Jacobi preconditioner.
//! - [`DirectStrategy`] factors the dense matrix with faer. Single process
//!   only.

use log::debug;

use crate::config::{Backend, PcKind, SolverKind, SolverOptions, SystemOptions};
use crate::core::{DistributedInnerProduct, DistributedOperator, InnerProduct, MatVec};
use crate::error::{LssError, Result};
use crate::matrix::{AnyMatrix, BlockCsrMatrix};
use crate::parallel::Comm;
use crate::preconditioner::{BlockJacobi, Jacobi, Preconditioner};
use crate::utils::convergence::SolveStats;
use crate::vector::{AnyVector, BlockVector, Vector};

use super::{BiCgStabSolver, CgSolver, LinearSolver, LuSolver, SolutionStrategy};

fn native_matrix(matrix: &AnyMatrix) -> Result<&BlockCsrMatrix> {
    matrix
        .as_native()
        .ok_or_else(|| LssError::NotSupported("this strategy needs a native matrix".into()))
}

fn native_vector(vector: &AnyVector) -> Result<&BlockVector> {
    vector
        .as_native()
        .ok_or_else(|| LssError::NotSupported("this strategy needs native vectors".into()))
}

fn native_vector_mut(vector: &mut AnyVector) -> Result<&mut BlockVector> {
    vector
        .as_native_mut()
        .ok_or_else(|| LssError::NotSupported("this strategy needs native vectors".into()))
}

/// Writes the owned part of a solve back and refreshes the ghosts.
fn store(x: &mut BlockVector, values: &[f64]) -> Result<()> {
    if x.owned().len() != values.len() {
        return Err(LssError::Solve(format!(
            "solution has {} owned rows, solver produced {}",
            x.owned().len(),
            values.len()
        )));
    }
    x.owned_mut().copy_from_slice(values);
    x.sync()
}

fn residual_norm(m: &BlockCsrMatrix, b: &BlockVector, x: &BlockVector) -> Result<f64> {
    let pattern = m
        .pattern()
        .ok_or_else(|| LssError::Setup("matrix is not created".into()))?;
    let mut ax = Vec::new();
    DistributedOperator::new(m).matvec(&x.owned().to_vec(), &mut ax)?;
    let r: Vec<f64> = b.owned().iter().zip(&ax).map(|(bi, ai)| bi - ai).collect();
    DistributedInnerProduct::new(pattern.comm()).norm(&r)
}

/// Does nothing; pairs with the empty back end.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyStrategy;

impl SolutionStrategy for EmptyStrategy {
    fn name(&self) -> &'static str {
        "empty"
    }

    fn solve(&mut self, _matrix: &AnyMatrix, _rhs: &AnyVector, _solution: &mut AnyVector) -> Result<SolveStats<f64>> {
        Ok(SolveStats {
            iterations: 0,
            final_residual: 0.0,
            converged: true,
        })
    }

    fn compute_residual(&mut self, _matrix: &AnyMatrix, _rhs: &AnyVector, _solution: &AnyVector) -> Result<f64> {
        Ok(0.0)
    }
}

pub struct KrylovStrategy {
    options: SolverOptions,
}

impl KrylovStrategy {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    fn build_pc(&self, m: &BlockCsrMatrix) -> Result<Option<Box<dyn Preconditioner<Vec<f64>>>>> {
        let pc: Option<Box<dyn Preconditioner<Vec<f64>>>> = match self.options.pc {
            PcKind::None => None,
            PcKind::Jacobi => Some(Box::new(Jacobi::from_matrix(m))),
            PcKind::BlockJacobi => Some(Box::new(BlockJacobi::from_matrix(m)?)),
        };
        Ok(pc)
    }
}

impl Default for KrylovStrategy {
    fn default() -> Self {
        Self::new(SolverOptions::default())
    }
}

impl SolutionStrategy for KrylovStrategy {
    fn name(&self) -> &'static str {
        "krylov"
    }

    fn set_matrix(&mut self, matrix: &AnyMatrix) -> Result<()> {
        native_matrix(matrix).map(|_| ())
    }

    fn set_rhs(&mut self, rhs: &AnyVector) -> Result<()> {
        native_vector(rhs).map(|_| ())
    }

    fn set_solution(&mut self, solution: &AnyVector) -> Result<()> {
        native_vector(solution).map(|_| ())
    }

    fn solve(&mut self, matrix: &AnyMatrix, rhs: &AnyVector, solution: &mut AnyVector) -> Result<SolveStats<f64>> {
        let m = native_matrix(matrix)?;
        let pattern = m
            .pattern()
            .ok_or_else(|| LssError::Setup("matrix is not created".into()))?;
        let op = DistributedOperator::new(m);
        let ip = DistributedInnerProduct::new(pattern.comm());
        let pc = self.build_pc(m)?;
        let b = native_vector(rhs)?.owned().to_vec();
        let x = native_vector_mut(solution)?;
        let mut xs = x.owned().to_vec();
        let (tol, max_iters) = (self.options.tol, self.options.max_iters);
        debug!(
            "rank {}: {:?} on {} owned rows, preconditioner {:?}",
            pattern.comm().rank(),
            self.options.kind,
            op.local_len(),
            self.options.pc
        );
        let stats = match self.options.kind {
            SolverKind::Cg => CgSolver::new(tol, max_iters).solve(&op, pc.as_deref(), &ip, &b, &mut xs)?,
            SolverKind::Bicgstab => BiCgStabSolver::new(tol, max_iters).solve(&op, pc.as_deref(), &ip, &b, &mut xs)?,
            SolverKind::DirectLu => {
                return Err(LssError::NotSupported("direct solves need the direct strategy".into()));
            }
        };
        store(x, &xs)?;
        Ok(stats)
    }

    fn compute_residual(&mut self, matrix: &AnyMatrix, rhs: &AnyVector, solution: &AnyVector) -> Result<f64> {
        residual_norm(native_matrix(matrix)?, native_vector(rhs)?, native_vector(solution)?)
    }
}

/// Dense LU of the whole matrix.
#[derive(Default)]
pub struct DirectStrategy {
    lu: LuSolver,
}

impl DirectStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SolutionStrategy for DirectStrategy {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn set_matrix(&mut self, matrix: &AnyMatrix) -> Result<()> {
        let m = native_matrix(matrix)?;
        match m.pattern() {
            Some(p) if p.comm().size() > 1 => Err(LssError::NotSupported(format!(
                "direct solves run on one process, not {}",
                p.comm().size()
            ))),
            _ => Ok(()),
        }
    }

    fn solve(&mut self, matrix: &AnyMatrix, rhs: &AnyVector, solution: &mut AnyVector) -> Result<SolveStats<f64>> {
        self.set_matrix(matrix)?;
        let m = native_matrix(matrix)?;
        let b = native_vector(rhs)?;
        let dense = m.to_dense();
        let rhs_values = b.owned().to_vec();
        let x = native_vector_mut(solution)?;
        let mut xs = Vec::new();
        let mut stats = self.lu.solve(&dense, None, &(), &rhs_values, &mut xs)?;
        store(x, &xs)?;
        stats.final_residual = residual_norm(m, b, x)?;
        Ok(stats)
    }

    fn compute_residual(&mut self, matrix: &AnyMatrix, rhs: &AnyVector, solution: &AnyVector) -> Result<f64> {
        residual_norm(native_matrix(matrix)?, native_vector(rhs)?, native_vector(solution)?)
    }
}

/// Default strategy for a set of system options.
pub fn strategy_for(options: &SystemOptions) -> Box<dyn SolutionStrategy> {
    match (options.backend, options.solver.kind) {
        (Backend::Empty, _) => Box::new(EmptyStrategy),
        (Backend::Native, SolverKind::DirectLu) => Box::new(DirectStrategy::new()),
        (Backend::Native, _) => Box::new(KrylovStrategy::new(options.solver.clone())),
    }
}
