//! Several ranks inside one process.
//!
//! Each rank runs on its own OS thread and owns a [`LocalComm`] handle.
//! Collectives go through a shared exchange board: every rank deposits one
//! message per destination, waits on a generation barrier, then collects the
//! messages addressed to it. The blocking semantics match MPI collectives,
//! which makes this backend suitable for exercising SPMD code in tests.
//!
//! Once a rank leaves [`LocalUniverse::run`], by returning or by panicking,
//! the board is marked aborted: no later collective can complete, so every
//! rank still blocked in one gets an error instead of waiting forever.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use super::{check_counts, Comm, CommData};
use crate::error::{LssError, Result};

type Message = Option<Box<dyn Any + Send>>;

struct Board {
    slots: Vec<Message>,
    arrived: usize,
    generation: u64,
    aborted: bool,
}

struct Exchange {
    size: usize,
    board: Mutex<Board>,
    turn: Condvar,
}

impl Exchange {
    fn lock(&self) -> Result<MutexGuard<'_, Board>> {
        self.board
            .lock()
            .map_err(|_| LssError::Parallel("exchange board poisoned".into()))
    }

    /// Generation barrier over all ranks of the universe.
    fn wait(&self) -> Result<()> {
        let mut board = self.lock()?;
        if board.aborted {
            return Err(LssError::Parallel("a peer rank left the universe".into()));
        }
        let generation = board.generation;
        board.arrived += 1;
        if board.arrived == self.size {
            board.arrived = 0;
            board.generation += 1;
            self.turn.notify_all();
            return Ok(());
        }
        while board.generation == generation && !board.aborted {
            board = self
                .turn
                .wait(board)
                .map_err(|_| LssError::Parallel("exchange board poisoned".into()))?;
        }
        if board.generation == generation {
            return Err(LssError::Parallel("a peer rank left the universe".into()));
        }
        Ok(())
    }

    fn abort(&self) {
        let mut board = self.board.lock().unwrap_or_else(|e| e.into_inner());
        board.aborted = true;
        self.turn.notify_all();
    }
}

/// Handle of one rank in a [`LocalUniverse`].
#[derive(Clone)]
pub struct LocalComm {
    rank: usize,
    shared: Arc<Exchange>,
}

/// A fixed group of in-process ranks sharing one exchange board.
pub struct LocalUniverse {
    shared: Arc<Exchange>,
}

impl LocalUniverse {
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(LssError::Setup("a universe needs at least one rank".into()));
        }
        let board = Board {
            slots: (0..size * size).map(|_| None).collect(),
            arrived: 0,
            generation: 0,
            aborted: false,
        };
        Ok(Self {
            shared: Arc::new(Exchange {
                size,
                board: Mutex::new(board),
                turn: Condvar::new(),
            }),
        })
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }

    /// Handle for `rank`. Every rank must be driven by a different thread.
    pub fn comm(&self, rank: usize) -> LocalComm {
        debug_assert!(rank < self.shared.size);
        LocalComm {
            rank,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Runs `f` once per rank, each on its own thread, and returns the
    /// results in rank order. A panic on any rank is propagated after all
    /// ranks have stopped.
    pub fn run<R, F>(size: usize, f: F) -> Result<Vec<R>>
    where
        F: Fn(LocalComm) -> R + Sync,
        R: Send,
    {
        let universe = Self::new(size)?;
        let f = &f;
        let joined: Vec<std::thread::Result<R>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..size)
                .map(|rank| {
                    let comm = universe.comm(rank);
                    let shared = Arc::clone(&universe.shared);
                    s.spawn(move || {
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(comm)));
                        shared.abort();
                        outcome
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| Err(e)))
                .collect()
        });
        let mut out = Vec::with_capacity(size);
        for result in joined {
            match result {
                Ok(r) => out.push(r),
                Err(payload) => panic::resume_unwind(payload),
            }
        }
        Ok(out)
    }
}

impl Comm for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) -> Result<()> {
        self.shared.wait()
    }

    fn all_to_all_v<T: CommData>(
        &self,
        send: &[T],
        send_counts: &[usize],
        recv_counts: &[usize],
    ) -> Result<Vec<T>> {
        let n = self.shared.size;
        // A malformed call still takes part in the exchange so that peers
        // are not left waiting on the barrier.
        let checked = check_counts(n, send.len(), send_counts, recv_counts);
        {
            let mut board = self.shared.lock()?;
            let mut offset = 0;
            for dst in 0..n {
                let chunk: Vec<T> = if checked.is_ok() {
                    let c = send_counts[dst];
                    let v = send[offset..offset + c].to_vec();
                    offset += c;
                    v
                } else {
                    Vec::new()
                };
                board.slots[self.rank * n + dst] = Some(Box::new(chunk));
            }
        }
        self.shared.wait()?;

        let mut received = Vec::new();
        let mut failure = None;
        {
            let mut board = self.shared.lock()?;
            for src in 0..n {
                match board.slots[src * n + self.rank].take().map(|m| m.downcast::<Vec<T>>()) {
                    Some(Ok(chunk)) => {
                        if checked.is_ok() && chunk.len() != recv_counts[src] {
                            failure.get_or_insert(LssError::Parallel(format!(
                                "rank {} expected {} items from rank {}, got {}",
                                self.rank,
                                recv_counts[src],
                                src,
                                chunk.len()
                            )));
                        }
                        received.extend_from_slice(&chunk);
                    }
                    Some(Err(_)) => {
                        failure.get_or_insert(LssError::Parallel(format!(
                            "rank {} received a message of the wrong type from rank {}",
                            self.rank, src
                        )));
                    }
                    None => {
                        failure.get_or_insert(LssError::Parallel(format!(
                            "rank {} found no message from rank {}",
                            self.rank, src
                        )));
                    }
                }
            }
        }
        self.shared.wait()?;
        checked?;
        match failure {
            Some(e) => Err(e),
            None => Ok(received),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_to_all_v_routes_by_rank() {
        let out = LocalUniverse::run(3, |comm| {
            let me = comm.rank();
            // send (me * 10 + dst) repeated dst+1 times to every dst
            let counts: Vec<usize> = (0..3).map(|dst| dst + 1).collect();
            let send: Vec<u64> = (0..3)
                .flat_map(|dst| std::iter::repeat((me * 10 + dst) as u64).take(dst + 1))
                .collect();
            let recv_counts = vec![me + 1; 3];
            comm.all_to_all_v(&send, &counts, &recv_counts).unwrap()
        })
        .unwrap();
        assert_eq!(out[0], vec![0, 10, 20]);
        assert_eq!(out[1], vec![1, 1, 11, 11, 21, 21]);
        assert_eq!(out[2], vec![2, 2, 2, 12, 12, 12, 22, 22, 22]);
    }

    #[test]
    fn derived_collectives() {
        let out = LocalUniverse::run(4, |comm| {
            let me = comm.rank() as f64;
            let sum = comm.all_reduce_sum(me).unwrap();
            let max = comm.all_reduce_max(me).unwrap();
            let mut b = if comm.rank() == 2 { vec![5i32, 6] } else { Vec::new() };
            comm.broadcast(&mut b, 2).unwrap();
            let g = comm.gather(&[comm.rank() as u64], 0).unwrap();
            let s = comm.scatter(&[0.5, 1.5, 2.5, 3.5], 1, 0).unwrap();
            let counts = comm.exchange_counts(&[comm.rank(); 4]).unwrap();
            (sum, max, b, g, s, counts)
        })
        .unwrap();
        for (rank, (sum, max, b, g, s, counts)) in out.into_iter().enumerate() {
            assert_eq!(sum, 6.0);
            assert_eq!(max, 3.0);
            assert_eq!(b, vec![5, 6]);
            if rank == 0 {
                assert_eq!(g, vec![0, 1, 2, 3]);
            } else {
                assert!(g.is_empty());
            }
            assert_eq!(s, vec![rank as f64 + 0.5]);
            assert_eq!(counts, vec![0, 1, 2, 3]);
        }
    }

    #[test]
    fn mismatched_counts_fail_without_hanging() {
        let out = LocalUniverse::run(2, |comm| {
            let (counts, recv) = if comm.rank() == 0 {
                (vec![2, 0], vec![1, 0])
            } else {
                (vec![1, 0], vec![0, 0])
            };
            comm.all_to_all_v(&[1.0], &counts, &recv).is_err()
        })
        .unwrap();
        assert_eq!(out, vec![true, false]);
    }

    #[test]
    fn early_return_releases_blocked_peers() {
        let out = LocalUniverse::run(2, |comm| {
            if comm.rank() == 0 {
                return true;
            }
            comm.barrier().is_err()
        })
        .unwrap();
        assert_eq!(out, vec![true, true]);
    }

    #[test]
    fn zero_ranks_is_rejected() {
        assert!(LocalUniverse::new(0).is_err());
    }
}
