//! MPI-based parallel communication module.
//!
//! This module provides an implementation of the `Comm` trait on top of an
//! MPI communicator. It is only available when the `mpi` feature is enabled.
//!
//! # Usage
//!
//! MPI must be initialized by the caller, and the returned `Universe` kept
//! alive for as long as any `MpiComm` is in use (dropping it finalizes MPI):
//!
//! ```no_run
//! # #[cfg(feature = "mpi")]
//! # {
//! use blocklss::parallel::{Comm, MpiComm};
//! let universe = mpi::initialize().expect("MPI init failed");
//! let comm = MpiComm::world();
//! println!("Rank: {} / {}", comm.rank(), comm.size());
//! # drop(universe);
//! # }
//! ```
//!
//! # Errors
//! rsmpi aborts the job on any MPI error code, so the only failures reported
//! here are counts that do not fit into an MPI `Count`.

use std::rc::Rc;

use mpi::collective::SystemOperation;
use mpi::datatype::{Partition, PartitionMut};
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use mpi::Count;

use super::{check_counts, CommData};
use crate::error::{LssError, Result};

/// MPI communicator wrapper for distributed parallelism.
#[derive(Clone)]
pub struct MpiComm {
    world: Rc<SimpleCommunicator>,
    rank: usize,
    size: usize,
}

impl MpiComm {
    /// Wraps `MPI_COMM_WORLD`.
    pub fn world() -> Self {
        Self::from_communicator(SimpleCommunicator::world())
    }

    /// Wraps any communicator, e.g. a split of the world.
    pub fn from_communicator(world: SimpleCommunicator) -> Self {
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        MpiComm { world: Rc::new(world), rank, size }
    }
}

fn to_counts(counts: &[usize]) -> Result<(Vec<Count>, Vec<Count>)> {
    let mut c = Vec::with_capacity(counts.len());
    let mut d = Vec::with_capacity(counts.len());
    let mut offset: Count = 0;
    for &n in counts {
        let n = Count::try_from(n)
            .map_err(|_| LssError::Parallel(format!("count {} exceeds the MPI count range", n)))?;
        c.push(n);
        d.push(offset);
        offset = offset
            .checked_add(n)
            .ok_or_else(|| LssError::Parallel("displacement exceeds the MPI count range".into()))?;
    }
    Ok((c, d))
}

impl super::Comm for MpiComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) -> Result<()> {
        self.world.barrier();
        Ok(())
    }

    fn all_to_all_v<T: CommData>(
        &self,
        send: &[T],
        send_counts: &[usize],
        recv_counts: &[usize],
    ) -> Result<Vec<T>> {
        check_counts(self.size, send.len(), send_counts, recv_counts)?;
        let (scounts, sdispls) = to_counts(send_counts)?;
        let (rcounts, rdispls) = to_counts(recv_counts)?;
        let mut recv = vec![T::default(); recv_counts.iter().sum()];
        {
            let spart = Partition::new(send, scounts, sdispls);
            let mut rpart = PartitionMut::new(&mut recv[..], rcounts, rdispls);
            self.world.all_to_all_varcount_into(&spart, &mut rpart);
        }
        Ok(recv)
    }

    fn all_reduce_sum(&self, x: f64) -> Result<f64> {
        let mut y = 0.0f64;
        self.world.all_reduce_into(&x, &mut y, SystemOperation::sum());
        Ok(y)
    }

    fn all_reduce_sum_into(&self, input: &[f64], output: &mut [f64]) -> Result<()> {
        if input.len() != output.len() {
            return Err(LssError::Parallel(format!(
                "reduction of {} items into a buffer of {}",
                input.len(),
                output.len()
            )));
        }
        self.world.all_reduce_into(input, output, SystemOperation::sum());
        Ok(())
    }

    fn all_reduce_max(&self, x: f64) -> Result<f64> {
        let mut y = 0.0f64;
        self.world.all_reduce_into(&x, &mut y, SystemOperation::max());
        Ok(y)
    }
}
