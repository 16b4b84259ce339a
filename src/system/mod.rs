//! The assembly façade: index bookkeeping, element accumulators and the
//! [`System`] that ties a matrix, two vectors and a solution strategy
//! together.

pub mod accumulator;
pub mod index_map;
pub mod linear_system;
pub mod variables;

pub use accumulator::BlockAccumulator;
pub use index_map::IndexMap;
pub use linear_system::System;
pub use variables::VariablesDescriptor;
