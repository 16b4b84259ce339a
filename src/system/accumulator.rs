//! Scratch buffer staging one local block contribution.

use faer::Mat;

/// Dense local contribution over `indices.len()` block-rows of `neq`
/// equations each.
///
/// `mat` is `(n * neq) x (n * neq)` with row `i * neq + a` and column
/// `j * neq + b` coupling equation `a` of `indices[i]` to equation `b` of
/// `indices[j]`. `rhs` and `sol` follow the same row numbering. Repeated
/// indices are kept as they are; the target decides whether they overwrite
/// or accumulate.
#[derive(Clone, Debug)]
pub struct BlockAccumulator {
    pub indices: Vec<usize>,
    pub mat: Mat<f64>,
    pub rhs: Vec<f64>,
    pub sol: Vec<f64>,
    neq: usize,
}

impl BlockAccumulator {
    pub fn new(n: usize, neq: usize) -> Self {
        let size = n * neq;
        Self {
            indices: vec![0; n],
            mat: Mat::zeros(size, size),
            rhs: vec![0.0; size],
            sol: vec![0.0; size],
            neq,
        }
    }

    /// Reshapes to `n` block-rows of `neq` equations. Contents are zeroed.
    pub fn resize(&mut self, n: usize, neq: usize) {
        let size = n * neq;
        self.neq = neq;
        self.indices.resize(n, 0);
        if self.mat.nrows() == size && self.mat.ncols() == size {
            self.fill_mat(0.0);
        } else {
            self.mat = Mat::zeros(size, size);
        }
        self.rhs.clear();
        self.rhs.resize(size, 0.0);
        self.sol.clear();
        self.sol.resize(size, 0.0);
    }

    /// Fills `mat`, `rhs` and `sol` with `value`; indices are kept.
    pub fn reset(&mut self, value: f64) {
        self.check_shape();
        self.fill_mat(value);
        self.rhs.iter_mut().for_each(|v| *v = value);
        self.sol.iter_mut().for_each(|v| *v = value);
    }

    fn fill_mat(&mut self, value: f64) {
        for j in 0..self.mat.ncols() {
            for i in 0..self.mat.nrows() {
                self.mat[(i, j)] = value;
            }
        }
    }

    pub fn set_indices(&mut self, indices: &[usize]) {
        debug_assert_eq!(indices.len(), self.indices.len(), "accumulator holds {} block rows", self.indices.len());
        self.indices.copy_from_slice(indices);
    }

    pub fn neq(&self) -> usize {
        self.neq
    }

    /// Number of block-rows.
    pub fn num_blocks(&self) -> usize {
        self.indices.len()
    }

    /// Number of scalar rows.
    pub fn size(&self) -> usize {
        self.indices.len() * self.neq
    }

    pub(crate) fn check_shape(&self) {
        let size = self.size();
        debug_assert_eq!(self.mat.nrows(), size);
        debug_assert_eq!(self.mat.ncols(), size);
        debug_assert_eq!(self.rhs.len(), size);
        debug_assert_eq!(self.sol.len(), size);
    }
}
