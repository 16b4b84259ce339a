//! A distributed linear system `A x = b`.
//!
//! [`System`] owns one matrix, the right-hand side and solution vectors and
//! a [`SolutionStrategy`]. It performs no numerical work of its own: it
//! keeps the three pieces consistent while the element loop assembles into
//! them and boundary conditions rewrite them, then hands them to the
//! strategy.
//!
//! ```
//! use std::rc::Rc;
//! use blocklss::parallel::{CommPattern, SerialComm};
//! use blocklss::system::{BlockAccumulator, System};
//! use blocklss::SystemOptions;
//!
//! let mut cp = CommPattern::new(SerialComm);
//! cp.setup_from(vec![0, 1], vec![0, 0]).unwrap();
//! let mut sys = System::new(SystemOptions::default());
//! sys.create(Rc::new(cp), 1, &[1, 0], &[0, 1, 2]).unwrap();
//!
//! let mut acc = BlockAccumulator::new(2, 1);
//! acc.set_indices(&[0, 1]);
//! acc.mat[(0, 0)] = 2.0;
//! acc.mat[(1, 1)] = 2.0;
//! acc.rhs.copy_from_slice(&[2.0, 4.0]);
//! sys.add_values(&acc).unwrap();
//! sys.solve().unwrap();
//! ```

use std::io::Write;
use std::rc::Rc;

use log::{debug, info, warn};

use crate::config::{Backend, SystemOptions};
use crate::error::{LssError, Result};
use crate::matrix::{AnyMatrix, BlockCsrMatrix, EmptyMatrix, Matrix};
use crate::parallel::{Comm, CommPattern};
use crate::solver::{strategy_for, SolutionStrategy};
use crate::utils::convergence::SolveStats;
use crate::vector::{AnyVector, BlockVector, EmptyVector, Vector};

use super::{BlockAccumulator, IndexMap, VariablesDescriptor};

pub struct System {
    options: SystemOptions,
    matrix: AnyMatrix,
    rhs: AnyVector,
    solution: AnyVector,
    strategy: Box<dyn SolutionStrategy>,
}

fn blank_matrix(backend: Backend) -> AnyMatrix {
    match backend {
        Backend::Empty => EmptyMatrix::new().into(),
        Backend::Native => BlockCsrMatrix::new().into(),
    }
}

fn blank_vector(backend: Backend) -> AnyVector {
    match backend {
        Backend::Empty => EmptyVector::new().into(),
        Backend::Native => BlockVector::new().into(),
    }
}

impl System {
    /// An uncreated system with the back end and strategy chosen by
    /// `options`.
    pub fn new(options: SystemOptions) -> Self {
        let strategy = strategy_for(&options);
        Self {
            matrix: blank_matrix(options.backend),
            rhs: blank_vector(options.backend),
            solution: blank_vector(options.backend),
            strategy,
            options,
        }
    }

    /// Replaces the default strategy. Use before `create`.
    pub fn with_strategy(mut self, strategy: Box<dyn SolutionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Installs a new strategy, notifying it of the current objects when
    /// the system is created. The old strategy is kept on failure.
    pub fn set_strategy(&mut self, mut strategy: Box<dyn SolutionStrategy>) -> Result<()> {
        if self.is_created()? {
            strategy.set_matrix(&self.matrix)?;
            strategy.set_rhs(&self.rhs)?;
            strategy.set_solution(&self.solution)?;
        }
        self.strategy = strategy;
        Ok(())
    }

    pub fn options(&self) -> &SystemOptions {
        &self.options
    }

    pub fn solvertype(&self) -> &'static str {
        self.matrix.solvertype()
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn create(
        &mut self,
        pattern: Rc<CommPattern>,
        neq: usize,
        node_connectivity: &[usize],
        starting_indices: &[usize],
    ) -> Result<()> {
        self.create_blocked(pattern, &VariablesDescriptor::single(neq), node_connectivity, starting_indices)
    }

    /// Allocates the matrix and both vectors over the local ids of
    /// `pattern`, sharing one index map. On failure the system is left
    /// uncreated.
    pub fn create_blocked(
        &mut self,
        pattern: Rc<CommPattern>,
        vars: &VariablesDescriptor,
        node_connectivity: &[usize],
        starting_indices: &[usize],
    ) -> Result<()> {
        if self.is_created()? {
            return Err(LssError::Setup("system already created".into()));
        }
        let outcome = self.allocate(pattern, vars, node_connectivity, starting_indices);
        if outcome.is_err() {
            self.destroy();
        }
        outcome
    }

    fn allocate(
        &mut self,
        pattern: Rc<CommPattern>,
        vars: &VariablesDescriptor,
        node_connectivity: &[usize],
        starting_indices: &[usize],
    ) -> Result<()> {
        let map = Rc::new(IndexMap::with_layout(&pattern, vars, self.options.layout)?);
        debug!(
            "rank {}: creating {} system, {} block rows ({} owned) of {} equations",
            pattern.comm().rank(),
            self.matrix.solvertype(),
            map.num_blocks(),
            map.num_owned(),
            map.neq()
        );
        self.matrix
            .create_with_map(pattern.clone(), map.clone(), node_connectivity, starting_indices)?;
        self.rhs.create_with_map(pattern.clone(), map.clone())?;
        self.solution.create_with_map(pattern, map)?;
        self.strategy.set_matrix(&self.matrix)?;
        self.strategy.set_rhs(&self.rhs)?;
        self.strategy.set_solution(&self.solution)
    }

    /// Whether the matrix and both vectors exist. A partially created
    /// system is a setup error.
    ///
    /// The strategy has no creation state of its own: it is handed the
    /// matrix and vectors on every `solve`, and `create`, `swap` and
    /// `set_strategy` only let it validate them. A created system stays
    /// created whichever strategy it holds.
    pub fn is_created(&self) -> Result<bool> {
        let states = [self.matrix.is_created(), self.rhs.is_created(), self.solution.is_created()];
        match states {
            [true, true, true] => Ok(true),
            [false, false, false] => Ok(false),
            [m, r, s] => Err(LssError::Setup(format!(
                "inconsistent system: matrix created {}, rhs created {}, solution created {}",
                m, r, s
            ))),
        }
    }

    pub fn destroy(&mut self) {
        self.matrix.destroy();
        self.rhs.destroy();
        self.solution.destroy();
    }

    /// Replaces the matrix and both vectors at once. Nothing changes unless
    /// the new trio is created, consistent (same row translation included),
    /// compatible with the current one when the system is created, and
    /// accepted by the strategy.
    pub fn swap(&mut self, matrix: AnyMatrix, rhs: AnyVector, solution: AnyVector) -> Result<()> {
        let consistent = matrix.is_created()
            && [&rhs, &solution].iter().all(|v| {
                v.is_created()
                    && v.solvertype() == matrix.solvertype()
                    && v.neq() == matrix.neq()
                    && v.blockrow_size() == matrix.blockrow_size()
                    && same_map(v.index_map(), matrix.index_map())
            });
        if !consistent {
            return Err(LssError::NotSupported(
                "swap needs a created matrix and vectors of the same type, shape and storage order".into(),
            ));
        }
        if self.is_created()? && !same_map(self.matrix.index_map(), matrix.index_map()) {
            return Err(LssError::NotSupported(
                "cannot swap in objects with a different storage order".into(),
            ));
        }
        if self.is_created()? && !self.matrix.is_swappable(&matrix) {
            return Err(LssError::NotSupported(format!(
                "cannot swap a {} matrix of {}x{} blocks (neq {}) for a {} matrix of {}x{} blocks (neq {})",
                self.matrix.solvertype(),
                self.matrix.blockrow_size(),
                self.matrix.blockcol_size(),
                self.matrix.neq(),
                matrix.solvertype(),
                matrix.blockrow_size(),
                matrix.blockcol_size(),
                matrix.neq()
            )));
        }
        self.strategy.set_matrix(&matrix)?;
        self.strategy.set_rhs(&rhs)?;
        self.strategy.set_solution(&solution)?;
        self.matrix = matrix;
        self.rhs = rhs;
        self.solution = solution;
        Ok(())
    }

    /// Overwrites the matrix blocks, rhs and solution entries of `acc`.
    /// The vectors are only touched once the matrix accepted every pair.
    pub fn set_values(&mut self, acc: &BlockAccumulator) -> Result<()> {
        acc.check_shape();
        self.matrix.set_values(acc)?;
        self.rhs.set_rhs_values(acc);
        self.solution.set_sol_values(acc);
        Ok(())
    }

    pub fn add_values(&mut self, acc: &BlockAccumulator) -> Result<()> {
        acc.check_shape();
        self.matrix.add_values(acc)?;
        self.rhs.add_rhs_values(acc);
        self.solution.add_sol_values(acc);
        Ok(())
    }

    pub fn get_values(&self, acc: &mut BlockAccumulator) -> Result<()> {
        acc.check_shape();
        self.matrix.get_values(acc)?;
        self.rhs.get_rhs_values(acc);
        self.solution.get_sol_values(acc);
        Ok(())
    }

    /// Imposes `x[blockrow, eq] = value` on the matrix, rhs and solution.
    ///
    /// With `preserve_symmetry` the column is eliminated into the rhs
    /// first, which needs a structurally symmetric sparsity and must be
    /// called on every rank holding `blockrow`, ghost copies included.
    pub fn dirichlet(&mut self, blockrow: usize, eq: usize, value: f64, preserve_symmetry: bool) {
        if preserve_symmetry {
            self.matrix.symmetric_dirichlet(blockrow, eq, value, &mut self.rhs);
        } else {
            self.matrix.set_row(blockrow, eq, 1.0, 0.0);
        }
        self.rhs.set_block_value(blockrow, eq, value);
        self.solution.set_block_value(blockrow, eq, value);
    }

    /// Ties `from` to `to`: the matrix rows are merged, the rhs of `from`
    /// moves into `to` and both solution entries take their average.
    pub fn periodicity(&mut self, to: usize, from: usize) -> Result<()> {
        self.matrix.tie_blockrow_pairs(to, from)?;
        for eq in 0..self.rhs.neq() {
            let moved = self.rhs.get_block_value(from, eq);
            self.rhs.add_block_value(to, eq, moved);
            self.rhs.set_block_value(from, eq, 0.0);
            let avg = 0.5 * (self.solution.get_block_value(to, eq) + self.solution.get_block_value(from, eq));
            self.solution.set_block_value(to, eq, avg);
            self.solution.set_block_value(from, eq, avg);
        }
        Ok(())
    }

    pub fn set_diagonal(&mut self, diag: &[f64]) -> Result<()> {
        self.matrix.set_diagonal(diag)
    }

    pub fn add_diagonal(&mut self, diag: &[f64]) -> Result<()> {
        self.matrix.add_diagonal(diag)
    }

    pub fn get_diagonal(&self) -> Vec<f64> {
        self.matrix.get_diagonal()
    }

    /// Sets every matrix entry and both vectors to `value`.
    pub fn reset(&mut self, value: f64) {
        self.matrix.reset(value);
        self.rhs.reset(value);
        self.solution.reset(value);
    }

    /// Runs the strategy. Collective.
    pub fn solve(&mut self) -> Result<SolveStats<f64>> {
        if !self.is_created()? {
            return Err(LssError::NotReady("the system must be created before solving"));
        }
        let stats = self.strategy.solve(&self.matrix, &self.rhs, &mut self.solution)?;
        if stats.converged {
            info!(
                "{} solve converged in {} iterations, residual {:e}",
                self.strategy.name(),
                stats.iterations,
                stats.final_residual
            );
        } else {
            warn!(
                "{} solve stopped after {} iterations, residual {:e}",
                self.strategy.name(),
                stats.iterations,
                stats.final_residual
            );
        }
        Ok(stats)
    }

    /// `‖b - A x‖₂` over all ranks. Collective.
    pub fn compute_residual(&mut self) -> Result<f64> {
        if !self.is_created()? {
            return Err(LssError::NotReady("the system must be created before computing a residual"));
        }
        self.strategy.compute_residual(&self.matrix, &self.rhs, &self.solution)
    }

    pub fn matrix(&self) -> &AnyMatrix {
        &self.matrix
    }

    pub fn matrix_mut(&mut self) -> &mut AnyMatrix {
        &mut self.matrix
    }

    pub fn rhs(&self) -> &AnyVector {
        &self.rhs
    }

    pub fn rhs_mut(&mut self) -> &mut AnyVector {
        &mut self.rhs
    }

    pub fn solution(&self) -> &AnyVector {
        &self.solution
    }

    pub fn solution_mut(&mut self) -> &mut AnyVector {
        &mut self.solution
    }

    /// Dumps matrix, rhs and solution in that order.
    pub fn print(&self, out: &mut dyn Write) -> Result<()> {
        self.matrix.print(out)?;
        self.rhs.print(out)?;
        self.solution.print(out)
    }
}

fn same_map(a: Option<&Rc<IndexMap>>, b: Option<&Rc<IndexMap>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Rc::ptr_eq(a, b) || a == b,
        (None, None) => true,
        _ => false,
    }
}
