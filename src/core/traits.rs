//! Core linear-algebra traits used by the iterative solvers.

use crate::error::Result;

/// Matrix–vector product: y ← A x.
pub trait MatVec<V> {
    /// Compute y = A · x. Distributed operators communicate here, so every
    /// rank must call it the same number of times.
    fn matvec(&self, x: &V, y: &mut V) -> Result<()>;
}

/// Inner products & norms.
pub trait InnerProduct<V> {
    /// Associated scalar type.
    type Scalar: Copy + PartialOrd;
    /// Compute dot(x, y).
    fn dot(&self, x: &V, y: &V) -> Result<Self::Scalar>;
    /// Compute ‖x‖₂.
    fn norm(&self, x: &V) -> Result<Self::Scalar>;
}
