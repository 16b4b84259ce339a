pub mod options;

pub use options::{Backend, Layout, PcKind, SolverKind, SolverOptions, SystemOptions};
