//! Collective communication layer.
//!
//! Every distributed object in this crate talks to its peers through the
//! [`Comm`] trait. Only one primitive is required from a backend, the
//! variable-count all-to-all; broadcast, gather, scatter, all-gather and the
//! reductions are derived from it unless a backend has a native version.
//!
//! Backends form a closed set wrapped by [`UniverseComm`]:
//! - [`SerialComm`]: a single process, every collective is a local copy.
//! - [`LocalComm`]: several ranks running as threads of one process.
//! - `MpiComm` (feature `mpi`): the MPI world or any sub-communicator.
//!
//! All collectives block until every rank of the communicator has entered
//! the matching call. A rank that skips or reorders a collective makes the
//! whole job hang; there is no timeout and no cancellation.

use crate::error::{LssError, Result};

#[cfg(feature = "mpi")]
use mpi::datatype::Equivalence;

/// Element types that can travel through a collective.
#[cfg(feature = "mpi")]
pub trait CommData: Copy + Default + Send + 'static + Equivalence {}
/// Element types that can travel through a collective.
#[cfg(not(feature = "mpi"))]
pub trait CommData: Copy + Default + Send + 'static {}

impl CommData for f64 {}
impl CommData for u64 {}
impl CommData for i32 {}

pub trait Comm {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self) -> Result<()>;

    /// Variable-count all-to-all.
    ///
    /// `send` holds `send_counts[p]` items for every peer `p`, grouped by
    /// destination in rank order. The result holds `recv_counts[p]` items
    /// from every peer, grouped by source in rank order.
    fn all_to_all_v<T: CommData>(
        &self,
        send: &[T],
        send_counts: &[usize],
        recv_counts: &[usize],
    ) -> Result<Vec<T>>;

    /// Fixed-count all-to-all: `count` items for (and from) every peer.
    fn all_to_all<T: CommData>(&self, send: &[T], count: usize) -> Result<Vec<T>> {
        let counts = vec![count; self.size()];
        self.all_to_all_v(send, &counts, &counts)
    }

    /// Tells every peer how many items it will receive from this rank and
    /// returns how many items this rank will receive from every peer.
    fn exchange_counts(&self, send_counts: &[usize]) -> Result<Vec<usize>> {
        let counts: Vec<u64> = send_counts.iter().map(|&c| c as u64).collect();
        let recv = self.all_to_all(&counts, 1)?;
        Ok(recv.into_iter().map(|c| c as usize).collect())
    }

    /// Sends `data` from `root` to every rank. Non-root ranks may pass any
    /// buffer; it is replaced by the root's contents.
    fn broadcast<T: CommData>(&self, data: &mut Vec<T>, root: usize) -> Result<()> {
        let nproc = self.size();
        let mut send_counts = vec![0; nproc];
        if self.rank() == root {
            send_counts.iter_mut().for_each(|c| *c = data.len());
        }
        let recv_counts = self.exchange_counts(&send_counts)?;
        let send: Vec<T> = if self.rank() == root {
            (0..nproc).flat_map(|_| data.iter().copied()).collect()
        } else {
            Vec::new()
        };
        *data = self.all_to_all_v(&send, &send_counts, &recv_counts)?;
        Ok(())
    }

    /// Collects every rank's `local` slice on `root`, concatenated in rank
    /// order. Returns an empty vector on the other ranks.
    fn gather<T: CommData>(&self, local: &[T], root: usize) -> Result<Vec<T>> {
        let mut send_counts = vec![0; self.size()];
        send_counts[root] = local.len();
        let recv_counts = self.exchange_counts(&send_counts)?;
        self.all_to_all_v(local, &send_counts, &recv_counts)
    }

    /// Splits `global` on `root` into `chunk` items per rank.
    fn scatter<T: CommData>(&self, global: &[T], chunk: usize, root: usize) -> Result<Vec<T>> {
        let nproc = self.size();
        let send_counts = if self.rank() == root {
            if global.len() != chunk * nproc {
                return Err(LssError::Parallel(format!(
                    "scatter of {} items into {} chunks of {}",
                    global.len(),
                    nproc,
                    chunk
                )));
            }
            vec![chunk; nproc]
        } else {
            vec![0; nproc]
        };
        let mut recv_counts = vec![0; nproc];
        recv_counts[root] = chunk;
        let send: &[T] = if self.rank() == root { global } else { &[] };
        self.all_to_all_v(send, &send_counts, &recv_counts)
    }

    /// Every rank receives every rank's `local` slice, one vector per rank.
    fn all_gather_v<T: CommData>(&self, local: &[T]) -> Result<Vec<Vec<T>>> {
        let nproc = self.size();
        let send_counts = vec![local.len(); nproc];
        let recv_counts = self.exchange_counts(&send_counts)?;
        let send: Vec<T> = (0..nproc).flat_map(|_| local.iter().copied()).collect();
        let flat = self.all_to_all_v(&send, &send_counts, &recv_counts)?;
        let mut out = Vec::with_capacity(nproc);
        let mut offset = 0;
        for &c in &recv_counts {
            out.push(flat[offset..offset + c].to_vec());
            offset += c;
        }
        Ok(out)
    }

    /// Element-wise sum of `input` across ranks, written to `output` on
    /// `root` only.
    fn reduce_sum_into(&self, input: &[f64], output: &mut [f64], root: usize) -> Result<()> {
        let gathered = self.gather(input, root)?;
        if self.rank() == root {
            sum_chunks(&gathered, output)?;
        }
        Ok(())
    }

    /// Element-wise sum of `input` across ranks, written to `output` on
    /// every rank.
    fn all_reduce_sum_into(&self, input: &[f64], output: &mut [f64]) -> Result<()> {
        let nproc = self.size();
        let send: Vec<f64> = (0..nproc).flat_map(|_| input.iter().copied()).collect();
        let counts = vec![input.len(); nproc];
        let gathered = self.all_to_all_v(&send, &counts, &counts)?;
        sum_chunks(&gathered, output)
    }

    /// Element-wise sum across ranks, overwriting `values` on every rank.
    fn all_reduce_sum_in_place(&self, values: &mut [f64]) -> Result<()> {
        let input = values.to_vec();
        self.all_reduce_sum_into(&input, values)
    }

    fn all_reduce_sum(&self, x: f64) -> Result<f64> {
        let mut y = [0.0];
        self.all_reduce_sum_into(&[x], &mut y)?;
        Ok(y[0])
    }

    fn all_reduce_max(&self, x: f64) -> Result<f64> {
        let all = self.all_to_all(&vec![x; self.size()], 1)?;
        Ok(all.into_iter().fold(f64::NEG_INFINITY, f64::max))
    }
}

fn sum_chunks(gathered: &[f64], output: &mut [f64]) -> Result<()> {
    let n = output.len();
    if n == 0 {
        return Ok(());
    }
    if gathered.len() % n != 0 {
        return Err(LssError::Parallel(format!(
            "reduction of {} items into a buffer of {}",
            gathered.len(),
            n
        )));
    }
    output.iter_mut().for_each(|o| *o = 0.0);
    for chunk in gathered.chunks(n) {
        for (o, v) in output.iter_mut().zip(chunk) {
            *o += *v;
        }
    }
    Ok(())
}

/// Checks the shape of an all-to-all call before anything is exchanged.
pub(crate) fn check_counts(
    nproc: usize,
    send_len: usize,
    send_counts: &[usize],
    recv_counts: &[usize],
) -> Result<()> {
    if send_counts.len() != nproc || recv_counts.len() != nproc {
        return Err(LssError::Parallel(format!(
            "count arrays of length {}/{} on a communicator of size {}",
            send_counts.len(),
            recv_counts.len(),
            nproc
        )));
    }
    let total: usize = send_counts.iter().sum();
    if total != send_len {
        return Err(LssError::Parallel(format!(
            "send counts add up to {} but the send buffer holds {}",
            total, send_len
        )));
    }
    Ok(())
}

/// Communicator of a job running on a single process.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialComm;

impl Comm for SerialComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn barrier(&self) -> Result<()> {
        Ok(())
    }
    fn all_to_all_v<T: CommData>(
        &self,
        send: &[T],
        send_counts: &[usize],
        recv_counts: &[usize],
    ) -> Result<Vec<T>> {
        check_counts(1, send.len(), send_counts, recv_counts)?;
        if recv_counts[0] != send.len() {
            return Err(LssError::Parallel(format!(
                "expected {} items from self, sent {}",
                recv_counts[0],
                send.len()
            )));
        }
        Ok(send.to_vec())
    }
}

pub mod collectives;
pub mod comm_pattern;
pub use comm_pattern::{CommPattern, Gid, PatternState, SlotFlags};

pub mod local_comm;
pub use local_comm::{LocalComm, LocalUniverse};

#[cfg(feature = "mpi")]
pub mod mpi_comm;
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;

/// The communicator handle threaded through every distributed object.
#[derive(Clone)]
pub enum UniverseComm {
    Serial(SerialComm),
    Local(LocalComm),
    #[cfg(feature = "mpi")]
    Mpi(MpiComm),
}

impl From<SerialComm> for UniverseComm {
    fn from(comm: SerialComm) -> Self {
        UniverseComm::Serial(comm)
    }
}

impl From<LocalComm> for UniverseComm {
    fn from(comm: LocalComm) -> Self {
        UniverseComm::Local(comm)
    }
}

#[cfg(feature = "mpi")]
impl From<MpiComm> for UniverseComm {
    fn from(comm: MpiComm) -> Self {
        UniverseComm::Mpi(comm)
    }
}

impl Comm for UniverseComm {
    fn rank(&self) -> usize {
        match self {
            UniverseComm::Serial(comm) => comm.rank(),
            UniverseComm::Local(comm) => comm.rank(),
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.rank(),
        }
    }
    fn size(&self) -> usize {
        match self {
            UniverseComm::Serial(comm) => comm.size(),
            UniverseComm::Local(comm) => comm.size(),
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.size(),
        }
    }
    fn barrier(&self) -> Result<()> {
        match self {
            UniverseComm::Serial(comm) => comm.barrier(),
            UniverseComm::Local(comm) => comm.barrier(),
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.barrier(),
        }
    }
    fn all_to_all_v<T: CommData>(
        &self,
        send: &[T],
        send_counts: &[usize],
        recv_counts: &[usize],
    ) -> Result<Vec<T>> {
        match self {
            UniverseComm::Serial(comm) => comm.all_to_all_v(send, send_counts, recv_counts),
            UniverseComm::Local(comm) => comm.all_to_all_v(send, send_counts, recv_counts),
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.all_to_all_v(send, send_counts, recv_counts),
        }
    }
    fn all_reduce_sum(&self, x: f64) -> Result<f64> {
        match self {
            UniverseComm::Serial(_) => Ok(x),
            UniverseComm::Local(comm) => comm.all_reduce_sum(x),
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.all_reduce_sum(x),
        }
    }
    fn all_reduce_sum_into(&self, input: &[f64], output: &mut [f64]) -> Result<()> {
        match self {
            UniverseComm::Serial(_) => {
                output.copy_from_slice(input);
                Ok(())
            }
            UniverseComm::Local(comm) => comm.all_reduce_sum_into(input, output),
            #[cfg(feature = "mpi")]
            UniverseComm::Mpi(comm) => comm.all_reduce_sum_into(input, output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_collectives_are_local_copies() {
        let comm = SerialComm;
        assert_eq!(comm.rank(), 0);
        assert_eq!(comm.size(), 1);
        let out = comm.all_to_all_v(&[1.0, 2.0], &[2], &[2]).unwrap();
        assert_eq!(out, vec![1.0, 2.0]);
        assert_eq!(comm.all_reduce_sum(3.5).unwrap(), 3.5);
        assert_eq!(comm.gather(&[7u64], 0).unwrap(), vec![7]);
        let mut b = vec![1i32, 2, 3];
        comm.broadcast(&mut b, 0).unwrap();
        assert_eq!(b, vec![1, 2, 3]);
    }

    #[test]
    fn serial_rejects_mismatched_counts() {
        let comm = SerialComm;
        assert!(comm.all_to_all_v(&[1.0, 2.0], &[1], &[1]).is_err());
        assert!(comm.all_to_all_v(&[1.0], &[1, 0], &[1, 0]).is_err());
    }

    #[test]
    fn universe_dispatches_to_serial() {
        let comm = UniverseComm::from(SerialComm);
        let mut v = [1.0, 2.0];
        comm.all_reduce_sum_in_place(&mut v).unwrap();
        assert_eq!(v, [1.0, 2.0]);
        assert_eq!(comm.all_reduce_max(-4.0).unwrap(), -4.0);
    }
}
