//! Implementations of the core traits.
//!
//! - `faer::Mat` and `Vec<T>` with the unit inner product `()`, for dense
//!   single-process problems;
//! - [`DistributedOperator`] and [`DistributedInnerProduct`], which act on
//!   the owned rows of a [`BlockCsrMatrix`] and reduce over a communicator.
//!
//! Vectors handled by the distributed wrappers hold the owned rows only, in
//! storage order.

use faer::Mat;
use num_traits::Float;

use crate::core::traits::{InnerProduct, MatVec};
use crate::error::{LssError, Result};
use crate::matrix::BlockCsrMatrix;
use crate::parallel::Comm;

/// Implements matrix-vector multiplication for `faer::Mat`.
impl<T: Float> MatVec<Vec<T>> for Mat<T> {
    fn matvec(&self, x: &Vec<T>, y: &mut Vec<T>) -> Result<()> {
        if self.ncols() != x.len() || self.nrows() != y.len() {
            return Err(LssError::Setup(format!(
                "{}x{} matrix applied to {} values into {}",
                self.nrows(),
                self.ncols(),
                x.len(),
                y.len()
            )));
        }
        for i in 0..self.nrows() {
            y[i] = T::zero();
            for j in 0..self.ncols() {
                y[i] = y[i] + self[(i, j)] * x[j];
            }
        }
        Ok(())
    }
}

/// Implements inner product and norm for vectors, with optional Rayon parallelism.
impl<T: Float + Send + Sync> InnerProduct<Vec<T>> for () {
    type Scalar = T;

    fn dot(&self, x: &Vec<T>, y: &Vec<T>) -> Result<T> {
        debug_assert_eq!(x.len(), y.len(), "Vectors must have the same length");
        Ok(local_dot(x, y))
    }

    fn norm(&self, x: &Vec<T>) -> Result<T> {
        Ok(local_dot(x, x).sqrt())
    }
}

fn local_dot<T: Float + Send + Sync>(x: &[T], y: &[T]) -> T {
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        x.par_iter()
            .zip(y.par_iter())
            .map(|(xi, yi)| *xi * *yi)
            .reduce(|| T::zero(), |acc, v| acc + v)
    }
    #[cfg(not(feature = "rayon"))]
    {
        x.iter()
            .zip(y.iter())
            .map(|(xi, yi)| *xi * *yi)
            .fold(T::zero(), |acc, v| acc + v)
    }
}

/// Dot product and norm summed over every rank of a communicator.
pub struct DistributedInnerProduct<'a, C: Comm> {
    pub comm: &'a C,
}

impl<'a, C: Comm> DistributedInnerProduct<'a, C> {
    pub fn new(comm: &'a C) -> Self {
        Self { comm }
    }
}

impl<C: Comm> InnerProduct<Vec<f64>> for DistributedInnerProduct<'_, C> {
    type Scalar = f64;

    fn dot(&self, x: &Vec<f64>, y: &Vec<f64>) -> Result<f64> {
        debug_assert_eq!(x.len(), y.len(), "Vectors must have the same length");
        self.comm.all_reduce_sum(local_dot(x, y))
    }

    fn norm(&self, x: &Vec<f64>) -> Result<f64> {
        Ok(self.comm.all_reduce_sum(local_dot(x, x))?.max(0.0).sqrt())
    }
}

/// `y = A x` on the owned rows of a block matrix. Ghost values of `x` are
/// fetched from their owners on every application.
pub struct DistributedOperator<'a> {
    matrix: &'a BlockCsrMatrix,
}

impl<'a> DistributedOperator<'a> {
    pub fn new(matrix: &'a BlockCsrMatrix) -> Self {
        Self { matrix }
    }

    /// Number of owned rows on this rank.
    pub fn local_len(&self) -> usize {
        self.matrix.index_map().num_owned_rows()
    }
}

impl MatVec<Vec<f64>> for DistributedOperator<'_> {
    fn matvec(&self, x: &Vec<f64>, y: &mut Vec<f64>) -> Result<()> {
        let map = self.matrix.index_map();
        let pattern = self
            .matrix
            .pattern()
            .ok_or_else(|| LssError::Setup("matrix is not created".into()))?;
        if x.len() != map.num_owned_rows() {
            return Err(LssError::Setup(format!(
                "operator over {} owned rows applied to {} values",
                map.num_owned_rows(),
                x.len()
            )));
        }
        let mut full = vec![0.0; map.len()];
        full[..x.len()].copy_from_slice(x);
        pattern.synchronize_slice(&mut full, map.neq(), Some(map.p2m()))?;
        y.resize(x.len(), 0.0);
        self.matrix.matvec(&full, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::SerialComm;

    #[test]
    fn dense_matvec_checks_shapes() {
        let a = Mat::from_fn(2, 3, |i, j| (i * 3 + j) as f64);
        let x = vec![1.0, 1.0, 1.0];
        let mut y = vec![0.0; 2];
        a.matvec(&x, &mut y).unwrap();
        assert_eq!(y, vec![3.0, 12.0]);
        let mut bad = vec![0.0; 3];
        assert!(a.matvec(&x, &mut bad).is_err());
    }

    #[test]
    fn serial_and_distributed_products_agree() {
        let x = vec![3.0, 4.0];
        let y = vec![1.0, -1.0];
        let ip = DistributedInnerProduct::new(&SerialComm);
        assert_eq!(ip.dot(&x, &y).unwrap(), ().dot(&x, &y).unwrap());
        assert_eq!(ip.norm(&x).unwrap(), 5.0);
    }
}
