// Block-Jacobi preconditioner implementation

use log::debug;

use crate::error::Result;
use crate::matrix::BlockCsrMatrix;
use crate::preconditioner::Preconditioner;
use crate::solver::direct_lu::LuSolver;
use crate::system::IndexMap;

/// Block-Jacobi preconditioner over the `neq x neq` diagonal blocks of the
/// owned block rows.
pub struct BlockJacobi {
    /// Storage offsets of every block, `neq` per block.
    pub blocks: Vec<Vec<usize>>,
    pub block_factors: Vec<LuSolver>,
}

impl BlockJacobi {
    /// Setup: factor each diagonal block using LuSolver
    pub fn from_matrix(a: &BlockCsrMatrix) -> Result<Self> {
        let map: &IndexMap = a.index_map();
        let neq = map.neq();
        let mut blocks = Vec::with_capacity(map.num_owned());
        let mut block_factors = Vec::with_capacity(map.num_owned());
        for rb in 0..map.num_owned() {
            let values = a.diagonal_block(rb);
            let block = faer::Mat::from_fn(neq, neq, |i, j| values[i * neq + j]);
            let mut lu = LuSolver::new();
            lu.factor(&block);
            block_factors.push(lu);
            blocks.push((0..neq).map(|eq| map.block_offset(rb, eq)).collect());
        }
        debug!("block Jacobi over {} blocks of {}x{}", blocks.len(), neq, neq);
        Ok(Self { blocks, block_factors })
    }
}

impl Preconditioner<Vec<f64>> for BlockJacobi {
    /// Apply: z = M⁻¹ r
    fn apply(&self, r: &Vec<f64>, z: &mut Vec<f64>) -> Result<()> {
        z.resize(r.len(), 0.0);
        let mut r_block = Vec::new();
        let mut x_block = Vec::new();
        for (indices, lu) in self.blocks.iter().zip(&self.block_factors) {
            r_block.clear();
            r_block.extend(indices.iter().map(|&i| r[i]));
            x_block.resize(indices.len(), 0.0);
            lu.solve_cached(&r_block, &mut x_block)?;
            for (&i, &xi) in indices.iter().zip(x_block.iter()) {
                z[i] = xi;
            }
        }
        Ok(())
    }
}
