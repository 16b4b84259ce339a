//! blocklss: distributed block-sparse linear system assembly
//!
//! This crate keeps the process-local view of a distributed mesh consistent
//! across ranks ([`parallel::CommPattern`]) and assembles block-sparse
//! linear systems from element contributions ([`system::System`]), with
//! Dirichlet and periodic boundary conditions and pluggable solution
//! strategies built on Krylov and direct solvers over Faer.

pub mod parallel;

pub mod config;
pub mod core;
pub mod error;
pub mod matrix;
pub mod preconditioner;
pub mod solver;
pub mod system;
pub mod utils;
pub mod vector;

// Re-exports for convenience
pub use config::{Backend, Layout, PcKind, SolverKind, SolverOptions, SystemOptions};
pub use crate::core::{DistributedInnerProduct, DistributedOperator, InnerProduct, MatVec};
pub use error::{LssError, Result};
pub use matrix::{AnyMatrix, BlockCsrMatrix, EmptyMatrix, Matrix};
pub use parallel::{Comm, CommPattern, Gid, LocalUniverse, SerialComm, UniverseComm};
pub use preconditioner::{BlockJacobi, Jacobi, Preconditioner};
pub use solver::{
    strategy_for, BiCgStabSolver, CgSolver, DirectStrategy, EmptyStrategy, KrylovStrategy, LinearSolver, LuSolver,
    SolutionStrategy,
};
pub use system::{BlockAccumulator, IndexMap, System, VariablesDescriptor};
pub use utils::convergence::{Convergence, SolveStats};
pub use vector::{AnyVector, BlockVector, EmptyVector, Vector};
