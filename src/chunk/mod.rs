//! Typed column buffers and the buffer sets providers hand out.

pub mod allocator;
pub mod arrow_impl;
pub mod chunks;
pub mod typed_buffer;

pub use allocator::{BufferAllocator, HeapAllocator, PoolStats, PooledAllocator};
pub use chunks::{Chunks, ChunksId, WritableChunks};
pub use typed_buffer::{Element, ObjectRef, TypedBuffer, Value};
