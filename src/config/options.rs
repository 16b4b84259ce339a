//! Typed options for linear systems and their solvers.
//!
//! [`SystemOptions`] selects the storage back end and carries the
//! [`SolverOptions`] used to build the default solution strategy.

/// Storage back end of a system's matrix and vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Accepts every call and stores nothing. Useful to test assembly loops.
    Empty,
    /// Distributed block-CSR matrix with block vectors.
    #[default]
    Native,
}

impl Backend {
    /// Name reported by `solvertype()` of matrices and vectors.
    pub fn solvertype(self) -> &'static str {
        match self {
            Backend::Empty => "empty",
            Backend::Native => "native",
        }
    }
}

/// Solver behind the default strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolverKind {
    /// Conjugate gradient, preconditioned when a preconditioner is set.
    #[default]
    Cg,
    /// BiConjugate gradient stabilized, for non-symmetric systems.
    Bicgstab,
    /// Dense LU with full pivoting. Single process only.
    DirectLu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PcKind {
    #[default]
    None,
    Jacobi,
    /// Inverse of every `neq x neq` diagonal block.
    BlockJacobi,
}

/// Storage layout of the equations of a block-row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// `block * neq + eq`.
    #[default]
    Interleaved,
    /// One contiguous segment per variable.
    Blocked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolverOptions {
    pub kind: SolverKind,
    pub pc: PcKind,
    /// Relative residual reduction.
    pub tol: f64,
    pub max_iters: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            kind: SolverKind::default(),
            pc: PcKind::default(),
            tol: 1e-8,
            max_iters: 1000,
        }
    }
}

impl SolverOptions {
    pub fn with_kind(mut self, kind: SolverKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_pc(mut self, pc: PcKind) -> Self {
        self.pc = pc;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SystemOptions {
    pub backend: Backend,
    pub solver: SolverOptions,
    /// Storage layout used by `System::create_blocked`.
    pub layout: Layout,
}

impl SystemOptions {
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_solver(mut self, solver: SolverOptions) -> Self {
        self.solver = solver;
        self
    }
}
