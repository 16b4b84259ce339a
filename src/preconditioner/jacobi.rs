// Jacobi preconditioner implementation

use num_traits::Float;

use crate::error::Result;
use crate::matrix::BlockCsrMatrix;
use crate::preconditioner::Preconditioner;

/// Jacobi preconditioner: M⁻¹ = D⁻¹
pub struct Jacobi<T> {
    pub(crate) inv_diag: Vec<T>,
}

impl<T: Float> Jacobi<T> {
    /// Zero diagonal entries leave the matching component at zero.
    pub fn from_diagonal(diag: Vec<T>) -> Self {
        let inv_diag = diag
            .into_iter()
            .map(|d| if d != T::zero() { T::one() / d } else { T::zero() })
            .collect();
        Self { inv_diag }
    }
}

impl Jacobi<f64> {
    pub fn from_matrix(a: &BlockCsrMatrix) -> Self {
        Self::from_diagonal(a.diagonal_storage())
    }
}

impl<T: Float> Preconditioner<Vec<T>> for Jacobi<T> {
    fn apply(&self, x: &Vec<T>, y: &mut Vec<T>) -> Result<()> {
        debug_assert_eq!(x.len(), self.inv_diag.len());
        y.resize(x.len(), T::zero());
        for ((yi, xi), di) in y.iter_mut().zip(x).zip(&self.inv_diag) {
            *yi = *di * *xi;
        }
        Ok(())
    }
}
