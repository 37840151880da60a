//! The arena backing all materialized tensors of a loaded model.
//!
//! One contiguous allocation is reserved up front, sized from the tensor
//! directory, and handed out slot by slot in directory order. Once filled,
//! the arena is frozen into shared immutable storage that [Tensor] views
//! point into.

use std::sync::Arc;

use thiserror::Error;

use crate::Tensor;

/// The arena's backing allocation failed.
#[derive(Debug, Error)]
#[error("arena allocation failed; {required} bytes required")]
pub struct AllocationError {
    /// The number of bytes the arena required.
    pub required: usize,
}

/// One contiguous memory region that backs every tensor of a loaded model.
///
/// The arena exclusively owns the bytes while it is being filled. Dropping
/// it on any path, including a failed load, releases the whole region at
/// once.
#[derive(Debug)]
pub struct Arena {
    buf: Vec<u8>,
    cursor: usize,
}

impl Arena {
    /// Fixed bookkeeping charge per tensor placed in the arena, mirroring
    /// the per-tensor header that sits in front of each payload.
    pub const TENSOR_OVERHEAD: usize = std::mem::size_of::<Tensor>();

    /// Reserves `total_bytes` in a single allocation. Failure is fatal to
    /// the load; there is no partial retry.
    pub fn reserve(total_bytes: usize) -> Result<Self, AllocationError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(total_bytes)
            .map_err(|_| AllocationError {
                required: total_bytes,
            })?;
        buf.resize(total_bytes, 0);
        Ok(Self { buf, cursor: 0 })
    }

    /// The total size of the arena in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes claimed so far, including per-tensor overhead.
    pub fn used(&self) -> usize {
        self.cursor
    }

    /// Claims the next slot: charges [Self::TENSOR_OVERHEAD] plus `n_bytes`
    /// and returns the offset of the payload region.
    pub fn alloc(&mut self, n_bytes: usize) -> Result<usize, AllocationError> {
        let offset = self.cursor + Self::TENSOR_OVERHEAD;
        let end = offset + n_bytes;
        if end > self.buf.len() {
            return Err(AllocationError { required: end });
        }
        self.cursor = end;
        Ok(offset)
    }

    /// The slot at `offset`, for the caller to fill with payload bytes.
    pub fn slot_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        &mut self.buf[offset..offset + len]
    }

    /// Converts the filled arena into shared immutable storage. Tensor
    /// views hold a reference-counted handle to this; the bytes live until
    /// the last view and the owning context are gone.
    pub fn freeze(self) -> Arc<[u8]> {
        Arc::from(self.buf)
    }
}
