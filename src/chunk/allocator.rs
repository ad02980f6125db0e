// In: src/chunk/allocator.rs

//! Buffer allocation. Providers never construct buffers directly; they go through a
//! [`BufferAllocator`] so that delivered chunks can be recycled into a pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::chunks::{Chunks, WritableChunks};
use super::typed_buffer::TypedBuffer;
use crate::error::SplayError;
use crate::types::ColumnKind;

pub trait BufferAllocator: Send + Sync {
    /// Returns an empty buffer of `kind` with capacity exactly `capacity`.
    fn allocate(&self, kind: ColumnKind, capacity: usize) -> TypedBuffer;

    /// Takes a buffer back. The default simply drops it.
    fn release(&self, buffer: TypedBuffer) -> Result<(), SplayError> {
        drop(buffer);
        Ok(())
    }

    /// Frees whatever the allocator keeps cached. Providers call this on close.
    fn trim(&self) {}
}

/// Allocates straight from the heap and frees on release.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl BufferAllocator for HeapAllocator {
    fn allocate(&self, kind: ColumnKind, capacity: usize) -> TypedBuffer {
        TypedBuffer::new(kind, capacity)
    }
}

//==================================================================================
// 1. Pooled Allocator
//==================================================================================

/// Snapshot of a [`PooledAllocator`]'s counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub allocated: u64,
    pub reused: u64,
    pub released: u64,
    pub pooled: usize,
}

/// Keeps released buffers in a free list per `(kind, capacity)` class and hands
/// them out again on the next matching `allocate`.
pub struct PooledAllocator {
    free: Mutex<HashMap<(ColumnKind, usize), Vec<TypedBuffer>>>,
    max_per_class: usize,
    allocated: AtomicU64,
    reused: AtomicU64,
    released: AtomicU64,
}

impl PooledAllocator {
    pub fn new(max_per_class: usize) -> Self {
        Self {
            free: Mutex::new(HashMap::new()),
            max_per_class,
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    /// Returns every buffer of a delivered set to the pool.
    pub fn recycle(&self, chunks: Chunks) -> Result<(), SplayError> {
        release_all(self, chunks.into_buffers())
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            pooled: self.free.lock().values().map(Vec::len).sum(),
        }
    }

    /// Drops every pooled buffer, returning how many were freed.
    pub fn shrink(&self) -> usize {
        let mut free = self.free.lock();
        let freed = free.values().map(Vec::len).sum();
        free.clear();
        freed
    }
}

impl Default for PooledAllocator {
    fn default() -> Self {
        Self::new(64)
    }
}

impl BufferAllocator for PooledAllocator {
    fn allocate(&self, kind: ColumnKind, capacity: usize) -> TypedBuffer {
        let recycled = self
            .free
            .lock()
            .get_mut(&(kind, capacity))
            .and_then(Vec::pop);
        match recycled {
            Some(buffer) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                buffer
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                TypedBuffer::new(kind, capacity)
            }
        }
    }

    fn release(&self, mut buffer: TypedBuffer) -> Result<(), SplayError> {
        buffer.reset();
        self.released.fetch_add(1, Ordering::Relaxed);
        let mut free = self.free.lock();
        let class = free
            .entry((buffer.kind(), buffer.capacity()))
            .or_default();
        if class.len() < self.max_per_class {
            class.push(buffer);
        }
        Ok(())
    }

    fn trim(&self) {
        let freed = self.shrink();
        if freed > 0 {
            log::debug!("Pooled allocator freed {} cached buffers", freed);
        }
    }
}

//==================================================================================
// 2. Buffer Set Helpers
//==================================================================================

/// Allocates one buffer per kind, each of capacity exactly `size`.
///
/// A buffer coming back with another capacity or kind is an allocator bug and fails
/// with `AllocationMismatch`; whatever was already allocated is released first.
pub(crate) fn make_chunks(
    allocator: &dyn BufferAllocator,
    kinds: &[ColumnKind],
    size: usize,
) -> Result<WritableChunks, SplayError> {
    let mut out = Vec::with_capacity(kinds.len());
    for &kind in kinds {
        let mut buffer = allocator.allocate(kind, size);
        if buffer.capacity() != size || buffer.kind() != kind {
            let err = SplayError::AllocationMismatch {
                kind: format!("{} (got {})", kind, buffer.kind()),
                requested: size,
                actual: buffer.capacity(),
            };
            out.push(buffer);
            if let Err(release_err) = release_all(allocator, out) {
                log::warn!("Releasing after allocation mismatch failed: {}", release_err);
            }
            return Err(err);
        }
        buffer.reset();
        out.push(buffer);
    }
    Ok(WritableChunks::new(out, size))
}

/// Releases every buffer, attempting all of them even if some fail.
pub(crate) fn release_all<I>(allocator: &dyn BufferAllocator, buffers: I) -> Result<(), SplayError>
where
    I: IntoIterator<Item = TypedBuffer>,
{
    let failures: Vec<String> = buffers
        .into_iter()
        .filter_map(|buffer| allocator.release(buffer).err())
        .map(|e| e.to_string())
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(SplayError::ReleaseFailed { failures })
    }
}

/// Releases every buffer of every set, aggregating failures across sets.
pub(crate) fn release_chunks<I>(allocator: &dyn BufferAllocator, sets: I) -> Result<(), SplayError>
where
    I: IntoIterator<Item = WritableChunks>,
{
    release_all(
        allocator,
        sets.into_iter().flat_map(WritableChunks::into_buffers),
    )
}
