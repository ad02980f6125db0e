// In: src/chunk/chunks.rs

//! Buffer sets: one [`TypedBuffer`] per output column, written in lock-step.
//!
//! A [`WritableChunks`] is what `take` hands out: `pos` rows are committed to it
//! so far and `size` rows fit in total. `flip` turns it into a read-only
//! [`Chunks`] whose every column holds exactly `size` (the old `pos`) values.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::{Field, Schema};

use super::arrow_impl;
use super::typed_buffer::TypedBuffer;
use crate::error::SplayError;
use crate::types::ColumnKind;

static NEXT_CHUNKS_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one hand-out of a buffer set. Every `take` stamps a fresh id, so a
/// `complete` can be matched against the set that is actually outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunksId(u64);

impl ChunksId {
    fn next() -> Self {
        ChunksId(NEXT_CHUNKS_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

//==================================================================================
// 1. WritableChunks
//==================================================================================

#[derive(Debug)]
pub struct WritableChunks {
    id: ChunksId,
    out: Vec<TypedBuffer>,
    pos: usize,
    size: usize,
}

impl WritableChunks {
    pub(crate) fn new(out: Vec<TypedBuffer>, size: usize) -> Self {
        Self {
            id: ChunksId::next(),
            out,
            pos: 0,
            size,
        }
    }

    pub fn id(&self) -> ChunksId {
        self.id
    }

    /// Rows committed so far; the next write lands at this offset in every column.
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn remaining(&self) -> usize {
        self.size - self.pos
    }

    pub fn column_count(&self) -> usize {
        self.out.len()
    }

    pub fn out(&self) -> &[TypedBuffer] {
        &self.out
    }

    /// Mutable access to the output columns. Writers append; the set's `pos` only
    /// moves when the owning transaction completes the take.
    pub fn out_mut(&mut self) -> &mut [TypedBuffer] {
        &mut self.out
    }

    pub fn kinds(&self) -> Vec<ColumnKind> {
        self.out.iter().map(TypedBuffer::kind).collect()
    }

    /// Gives this set a new identity for the next hand-out.
    pub(crate) fn restamp(&mut self) -> ChunksId {
        self.id = ChunksId::next();
        self.id
    }

    /// Records `rows` newly written rows.
    ///
    /// Every column must have grown by exactly `rows`; anything else means a writer
    /// skipped or overran a column.
    pub(crate) fn advance(&mut self, rows: usize) -> Result<(), SplayError> {
        if rows > self.remaining() {
            return Err(SplayError::invalid_argument(format!(
                "Completed {} rows but only {} remain in the chunks",
                rows,
                self.remaining()
            )));
        }
        let expected = self.pos + rows;
        if let Some((idx, col)) = self
            .out
            .iter()
            .enumerate()
            .find(|(_, col)| col.len() != expected)
        {
            return Err(SplayError::illegal_state(format!(
                "Column {} ({}) holds {} values, expected {} after completing {} rows",
                idx,
                col.kind(),
                col.len(),
                expected,
                rows
            )));
        }
        self.pos = expected;
        Ok(())
    }

    /// Rewinds to `pos` (and `id`), discarding everything written after it.
    pub(crate) fn rewind(&mut self, id: ChunksId, pos: usize) {
        for col in &mut self.out {
            col.truncate(pos);
        }
        self.pos = pos;
        self.id = id;
    }

    /// Consumes the set and exposes its first `pos` rows read-only.
    pub(crate) fn flip(mut self) -> Chunks {
        let pos = self.pos;
        for col in &mut self.out {
            col.truncate(pos);
        }
        Chunks {
            id: self.id,
            out: self.out,
            size: pos,
        }
    }

    pub(crate) fn into_buffers(self) -> Vec<TypedBuffer> {
        self.out
    }
}

//==================================================================================
// 2. Chunks (flipped, read-only)
//==================================================================================

/// A delivered buffer set. The consumer owns it and may inspect, export or
/// recycle it, but never write to it.
#[derive(Debug)]
pub struct Chunks {
    id: ChunksId,
    out: Vec<TypedBuffer>,
    size: usize,
}

impl Chunks {
    pub fn id(&self) -> ChunksId {
        self.id
    }

    /// Always 0 for a flipped set.
    pub fn pos(&self) -> usize {
        0
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn column_count(&self) -> usize {
        self.out.len()
    }

    pub fn out(&self) -> &[TypedBuffer] {
        &self.out
    }

    pub fn column(&self, index: usize) -> Option<&TypedBuffer> {
        self.out.get(index)
    }

    pub fn kinds(&self) -> Vec<ColumnKind> {
        self.out.iter().map(TypedBuffer::kind).collect()
    }

    pub fn into_buffers(self) -> Vec<TypedBuffer> {
        self.out
    }

    /// Exports this set as an Arrow batch with columns named `c0`, `c1`, ...
    pub fn to_record_batch(&self) -> Result<RecordBatch, SplayError> {
        let names: Vec<String> = (0..self.out.len()).map(|i| format!("c{}", i)).collect();
        self.to_record_batch_with_names(&names)
    }

    pub fn to_record_batch_with_names<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<RecordBatch, SplayError> {
        if names.len() != self.out.len() {
            return Err(SplayError::invalid_argument(format!(
                "Expected {} column names, got {}",
                self.out.len(),
                names.len()
            )));
        }
        let mut fields = Vec::with_capacity(self.out.len());
        let mut columns = Vec::with_capacity(self.out.len());
        for (name, col) in names.iter().zip(&self.out) {
            fields.push(Field::new(name.as_ref(), col.kind().to_arrow_type(), true));
            columns.push(arrow_impl::buffer_to_array(col)?);
        }
        let schema = Arc::new(Schema::new(fields));
        Ok(RecordBatch::try_new(schema, columns)?)
    }
}
