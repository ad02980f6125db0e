// In: src/provider/buffered.rs

//! A provider that accumulates committed rows in a backlog and delivers them only
//! on an explicit `flush`.
//!
//! Consecutive small transactions share buffer sets: a take reuses the newest
//! backlog set when it still has room. Rollback therefore cannot simply drop "the
//! transaction's sets"; it restores a mark of the backlog taken when the
//! transaction began (its length and the newest set's position and identity).
//! Savepoints are marks taken later in the same transaction.

use std::ops::DerefMut;
use std::sync::Arc;

use super::{flip_for_delivery, validate_chunk_size, ChunksProvider, ChunksSink};
use crate::chunk::allocator::{make_chunks, release_chunks};
use crate::chunk::{BufferAllocator, ChunksId, HeapAllocator, WritableChunks};
use crate::config::SplayConfig;
use crate::error::SplayError;
use crate::transaction::checkout::Slot;
use crate::transaction::{Checkout, CloseOutcome, Retire, SetsMark, TxCore, TxStats, TxStrategy};
use crate::types::ColumnKind;

//==================================================================================
// 1. Backlog State
//==================================================================================

/// Counters across the provider's lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BacklogStats {
    pub transactions_committed: u64,
    pub transactions_rolled_back: u64,
    pub flushes: u64,
    pub rows_flushed: u64,
}

/// The mutable state shared by [`BufferedProvider`] and
/// [`LockedProvider`](super::LockedProvider).
pub struct BufferedState {
    chunk_types: Vec<ColumnKind>,
    sink: Arc<dyn ChunksSink>,
    allocator: Arc<dyn BufferAllocator>,
    desired_chunk_size: usize,
    backlog: Vec<WritableChunks>,
    stats: BacklogStats,
    pub(crate) closed: bool,
}

impl BufferedState {
    pub(crate) fn new(
        chunk_types: Vec<ColumnKind>,
        sink: Arc<dyn ChunksSink>,
        allocator: Arc<dyn BufferAllocator>,
        desired_chunk_size: usize,
    ) -> Result<Self, SplayError> {
        Ok(Self {
            chunk_types,
            sink,
            allocator,
            desired_chunk_size: validate_chunk_size(desired_chunk_size)?,
            backlog: Vec::new(),
            stats: BacklogStats::default(),
            closed: false,
        })
    }

    pub fn chunk_types(&self) -> &[ColumnKind] {
        &self.chunk_types
    }

    pub(crate) fn allocator(&self) -> &dyn BufferAllocator {
        self.allocator.as_ref()
    }

    pub fn backlog_rows(&self) -> usize {
        self.backlog.iter().map(WritableChunks::pos).sum()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// `(id, pos)` of every backlog set, oldest first.
    pub fn backlog_snapshot(&self) -> Vec<(ChunksId, usize)> {
        self.backlog.iter().map(|c| (c.id(), c.pos())).collect()
    }

    pub fn stats(&self) -> BacklogStats {
        self.stats
    }

    fn mark(&self) -> SetsMark {
        SetsMark::of(&self.backlog)
    }

    /// Restores the backlog to `mark`, releasing every set added since.
    fn rewind_to(&mut self, mark: SetsMark) -> Result<(), SplayError> {
        let added = mark.rewind(&mut self.backlog);
        if added.is_empty() {
            return Ok(());
        }
        log::debug!("Rolling back {} buffered chunks", added.len());
        release_chunks(self.allocator.as_ref(), added)
    }

    fn rollback(&mut self, mark: SetsMark) -> Result<(), SplayError> {
        self.stats.transactions_rolled_back += 1;
        self.rewind_to(mark)
    }

    fn take(&mut self, min_size: usize) -> Result<&mut WritableChunks, SplayError> {
        let reusable = matches!(self.backlog.last(), Some(c) if c.remaining() >= min_size);
        if !reusable {
            let size = min_size.max(self.desired_chunk_size);
            let fresh = make_chunks(self.allocator.as_ref(), &self.chunk_types, size)?;
            log::trace!("Buffered provider allocated chunks of {} rows", size);
            self.backlog.push(fresh);
        }
        match self.backlog.last_mut() {
            Some(chunks) => {
                chunks.restamp();
                Ok(chunks)
            }
            None => Err(SplayError::illegal_state("Backlog is empty after take")),
        }
    }

    /// Delivers every non-empty backlog set in one sink call and empties the
    /// backlog. An empty backlog makes no call. Returns the rows delivered.
    pub(crate) fn flush(&mut self) -> Result<usize, SplayError> {
        if self.backlog.is_empty() {
            return Ok(0);
        }
        let sets = std::mem::take(&mut self.backlog);
        let (flipped, rows) = flip_for_delivery(self.allocator.as_ref(), sets);
        if flipped.is_empty() {
            return Ok(0);
        }
        self.stats.flushes += 1;
        self.stats.rows_flushed += rows as u64;
        log::debug!("Flushing {} rows in {} chunks", rows, flipped.len());
        log_metric!("event"="flush", "rows"=rows, "sets"=flipped.len());
        self.sink.accept(flipped)?;
        Ok(rows)
    }

    pub(crate) fn release_backlog(&mut self) -> Result<(), SplayError> {
        let sets = std::mem::take(&mut self.backlog);
        if !sets.is_empty() {
            log::debug!("Releasing {} unflushed chunks on close", sets.len());
        }
        release_chunks(self.allocator.as_ref(), sets)
    }
}

impl Retire for BufferedState {
    fn retire(mut self) -> Result<(), SplayError> {
        self.closed = true;
        let released = self.release_backlog();
        self.allocator.trim();
        released
    }
}

//==================================================================================
// 2. Strategy
//==================================================================================

/// Works against any handle to the backlog: a checkout for the unlocked provider,
/// an owned mutex guard for the locked one. The handle is given up on close.
pub struct BufferedStrategy<G> {
    state: Option<G>,
    begin: SetsMark,
}

impl<G: DerefMut<Target = BufferedState>> BufferedStrategy<G> {
    pub(crate) fn new(state: G) -> Self {
        let begin = state.mark();
        Self {
            state: Some(state),
            begin,
        }
    }

    fn state(&mut self) -> Result<&mut BufferedState, SplayError> {
        match self.state.as_deref_mut() {
            Some(state) => Ok(state),
            None => Err(SplayError::illegal_state("Buffered transaction is closed")),
        }
    }
}

impl<G: DerefMut<Target = BufferedState>> TxStrategy for BufferedStrategy<G> {
    fn take_impl(&mut self, min_size: usize) -> Result<&mut WritableChunks, SplayError> {
        self.state()?.take(min_size)
    }

    fn complete_impl(&mut self, _id: ChunksId, out_rows: usize) -> Result<(), SplayError> {
        match self.state()?.backlog.last_mut() {
            Some(chunks) => chunks.advance(out_rows),
            None => Err(SplayError::illegal_state("No backlog chunks to complete")),
        }
    }

    fn commit_impl(&mut self, _stats: &TxStats) -> Result<(), SplayError> {
        // Committed rows simply stay in the backlog until the next flush.
        Ok(())
    }

    fn close_impl(&mut self, outcome: &CloseOutcome) -> Result<(), SplayError> {
        let Some(mut state) = self.state.take() else {
            return Ok(());
        };
        let result = if outcome.is_successful_commit() {
            state.stats.transactions_committed += 1;
            Ok(())
        } else {
            state.rollback(self.begin)
        };
        // Returns the checkout to its slot, or unlocks the mutex.
        drop(state);
        result
    }

    fn savepoint_impl(&self) -> Option<SetsMark> {
        self.state.as_deref().map(BufferedState::mark)
    }

    fn rollback_to_impl(&mut self, mark: SetsMark) -> Result<(), SplayError> {
        self.state()?.rewind_to(mark)
    }
}

//==================================================================================
// 3. BufferedProvider
//==================================================================================

pub type BufferedTransaction = TxCore<BufferedStrategy<Checkout<BufferedState>>>;

/// Single-threaded buffered provider. Only one transaction may be open at a time,
/// and `flush` is rejected while one is.
pub struct BufferedProvider {
    chunk_types: Vec<ColumnKind>,
    slot: Slot<BufferedState>,
}

impl BufferedProvider {
    pub fn new(
        chunk_types: Vec<ColumnKind>,
        sink: Arc<dyn ChunksSink>,
        desired_chunk_size: usize,
    ) -> Result<Self, SplayError> {
        Self::with_allocator(chunk_types, sink, desired_chunk_size, Arc::new(HeapAllocator))
    }

    pub fn with_allocator(
        chunk_types: Vec<ColumnKind>,
        sink: Arc<dyn ChunksSink>,
        desired_chunk_size: usize,
        allocator: Arc<dyn BufferAllocator>,
    ) -> Result<Self, SplayError> {
        let state = BufferedState::new(chunk_types.clone(), sink, allocator, desired_chunk_size)?;
        Ok(Self {
            chunk_types,
            slot: Slot::new(state, "Buffered provider"),
        })
    }

    pub fn from_config(
        chunk_types: Vec<ColumnKind>,
        sink: Arc<dyn ChunksSink>,
        config: &SplayConfig,
    ) -> Result<Self, SplayError> {
        Self::new(chunk_types, sink, config.desired_chunk_size)
    }

    /// Delivers the backlog.
    pub fn flush(&self) -> Result<(), SplayError> {
        self.slot.with(|state| state.flush().map(|_| ()))
    }

    pub fn backlog_rows(&self) -> Result<usize, SplayError> {
        self.slot.with(|state| Ok(state.backlog_rows()))
    }

    pub fn backlog_snapshot(&self) -> Result<Vec<(ChunksId, usize)>, SplayError> {
        self.slot.with(|state| Ok(state.backlog_snapshot()))
    }

    pub fn stats(&self) -> Result<BacklogStats, SplayError> {
        self.slot.with(|state| Ok(state.stats()))
    }
}

impl ChunksProvider for BufferedProvider {
    type Tx = BufferedTransaction;

    fn chunk_types(&self) -> &[ColumnKind] {
        &self.chunk_types
    }

    fn begin_transaction(&self) -> Result<Self::Tx, SplayError> {
        let state = self.slot.checkout()?;
        Ok(TxCore::new(BufferedStrategy::new(state), "buffered"))
    }

    fn close(&self) -> Result<(), SplayError> {
        self.slot.close()
    }
}
