//! Preconditioners for the Krylov solvers.
//!
//! Preconditioners are built from an assembled [`BlockCsrMatrix`] and act
//! on owned rows in storage order. Both kinds here are local to a rank and
//! need no communication.
//!
//! [`BlockCsrMatrix`]: crate::matrix::BlockCsrMatrix

use crate::error::Result;

/// A preconditioner M ≈ A⁻¹.
pub trait Preconditioner<V> {
    /// Apply M⁻¹ to r, writing z = M⁻¹ r
    fn apply(&self, r: &V, z: &mut V) -> Result<()>;
}

/// `z = M⁻¹ r`, or `z = r` without a preconditioner.
pub fn apply_or_copy<V: Clone>(pc: Option<&dyn Preconditioner<V>>, r: &V, z: &mut V) -> Result<()> {
    match pc {
        Some(pc) => pc.apply(r, z),
        None => {
            z.clone_from(r);
            Ok(())
        }
    }
}

pub mod block_jacobi;
pub mod jacobi;

pub use block_jacobi::BlockJacobi;
pub use jacobi::Jacobi;
