//! Strided, index-mapped all-to-all exchanges.
//!
//! A distributed array stores `stride` consecutive values per entity. An
//! exchange side is described by a [`Side`]: how many entities go to (or
//! come from) every peer, which entity ids take part, and an optional
//! position map translating `id * stride + k` into an offset of the buffer
//! (used when a buffer is stored in a permuted order).
//!
//! Out-of-place exchanges read one buffer and write another. The in-place
//! variant packs the outgoing values before anything is written, so the
//! same buffer can be used on both sides.

use super::{Comm, CommData};
use crate::error::{LssError, Result};

/// One side of an indexed exchange.
#[derive(Clone, Copy, Debug)]
pub struct Side<'a> {
    /// Entities per peer, in rank order.
    pub counts: &'a [usize],
    /// Entity ids, grouped by peer. `None` means `0, 1, 2, ...`.
    pub ids: Option<&'a [usize]>,
    /// Values per entity.
    pub stride: usize,
    /// Buffer offset of `id * stride + k`. `None` means the identity.
    pub position: Option<&'a [usize]>,
}

impl<'a> Side<'a> {
    pub fn new(counts: &'a [usize], stride: usize) -> Self {
        Self { counts, ids: None, stride, position: None }
    }

    pub fn with_ids(mut self, ids: &'a [usize]) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_position(mut self, position: &'a [usize]) -> Self {
        self.position = Some(position);
        self
    }

    fn entities(&self) -> usize {
        self.counts.iter().sum()
    }

    fn id(&self, k: usize) -> usize {
        match self.ids {
            Some(ids) => ids[k],
            None => k,
        }
    }

    fn offset(&self, flat: usize) -> usize {
        match self.position {
            Some(p) => p[flat],
            None => flat,
        }
    }

    fn scaled_counts(&self) -> Vec<usize> {
        self.counts.iter().map(|c| c * self.stride).collect()
    }

    fn check(&self, len: usize) -> Result<()> {
        let n = self.entities();
        if let Some(ids) = self.ids {
            if ids.len() < n {
                return Err(LssError::Parallel(format!(
                    "{} entities announced but only {} ids given",
                    n,
                    ids.len()
                )));
            }
        }
        for k in 0..n {
            let last = (self.id(k) + 1) * self.stride;
            if last == 0 {
                continue;
            }
            let bound = match self.position {
                Some(p) => p.len(),
                None => len,
            };
            if last > bound {
                return Err(LssError::Parallel(format!(
                    "entity {} with stride {} is out of range",
                    self.id(k),
                    self.stride
                )));
            }
        }
        Ok(())
    }
}

/// Gathers the values of the listed entities into a contiguous buffer.
pub fn pack<T: Copy>(data: &[T], side: &Side<'_>) -> Vec<T> {
    let n = side.entities();
    let mut out = Vec::with_capacity(n * side.stride);
    for k in 0..n {
        let base = side.id(k) * side.stride;
        for e in 0..side.stride {
            out.push(data[side.offset(base + e)]);
        }
    }
    out
}

/// Scatters a contiguous buffer back into the listed entities.
pub fn unpack<T: Copy>(data: &mut [T], side: &Side<'_>, values: &[T]) {
    let n = side.entities();
    debug_assert_eq!(values.len(), n * side.stride);
    for k in 0..n {
        let base = side.id(k) * side.stride;
        for e in 0..side.stride {
            data[side.offset(base + e)] = values[k * side.stride + e];
        }
    }
}

/// Exchanges the `send` entities of `input` into the `recv` entities of
/// `output`.
pub fn all_to_all_indexed<C: Comm, T: CommData>(
    comm: &C,
    input: &[T],
    send: Side<'_>,
    output: &mut [T],
    recv: Side<'_>,
) -> Result<()> {
    send.check(input.len())?;
    recv.check(output.len())?;
    let packed = pack(input, &send);
    let received = comm.all_to_all_v(&packed, &send.scaled_counts(), &recv.scaled_counts())?;
    unpack(output, &recv, &received);
    Ok(())
}

/// Same as [`all_to_all_indexed`] with one buffer on both sides.
pub fn all_to_all_indexed_in_place<C: Comm, T: CommData>(
    comm: &C,
    data: &mut [T],
    send: Side<'_>,
    recv: Side<'_>,
) -> Result<()> {
    send.check(data.len())?;
    recv.check(data.len())?;
    let packed = pack(data, &send);
    let received = comm.all_to_all_v(&packed, &send.scaled_counts(), &recv.scaled_counts())?;
    unpack(data, &recv, &received);
    Ok(())
}
