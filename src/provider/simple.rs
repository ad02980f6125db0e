// In: src/provider/simple.rs

//! The simplest provider: every transaction owns its buffer sets outright and
//! hands them to the sink on commit. Nothing is shared between transactions, so
//! any number may be open at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{flip_for_delivery, validate_chunk_size, ChunksProvider, ChunksSink};
use crate::chunk::allocator::{make_chunks, release_chunks};
use crate::chunk::{BufferAllocator, ChunksId, HeapAllocator, WritableChunks};
use crate::config::SplayConfig;
use crate::error::SplayError;
use crate::transaction::{CloseOutcome, SetsMark, TxCore, TxStats, TxStrategy};
use crate::types::ColumnKind;

struct SimpleShared {
    chunk_types: Vec<ColumnKind>,
    sink: Arc<dyn ChunksSink>,
    allocator: Arc<dyn BufferAllocator>,
    desired_chunk_size: usize,
    closed: AtomicBool,
}

pub struct SimpleProvider {
    shared: Arc<SimpleShared>,
}

pub type SimpleTransaction = TxCore<SimpleStrategy>;

impl SimpleProvider {
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
        let desired_chunk_size = validate_chunk_size(desired_chunk_size)?;
        Ok(Self {
            shared: Arc::new(SimpleShared {
                chunk_types,
                sink,
                allocator,
                desired_chunk_size,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn from_config(
        chunk_types: Vec<ColumnKind>,
        sink: Arc<dyn ChunksSink>,
        config: &SplayConfig,
    ) -> Result<Self, SplayError> {
        Self::new(chunk_types, sink, config.desired_chunk_size)
    }

    pub fn desired_chunk_size(&self) -> usize {
        self.shared.desired_chunk_size
    }
}

impl ChunksProvider for SimpleProvider {
    type Tx = SimpleTransaction;

    fn chunk_types(&self) -> &[ColumnKind] {
        &self.shared.chunk_types
    }

    fn begin_transaction(&self) -> Result<Self::Tx, SplayError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(SplayError::illegal_state("Simple provider is closed"));
        }
        Ok(TxCore::new(
            SimpleStrategy {
                shared: Arc::clone(&self.shared),
                full: Vec::new(),
                recent: None,
            },
            "simple",
        ))
    }

    /// Rejects new transactions and trims the allocator's cache. Transactions still
    /// open release their own sets when they close. Idempotent.
    fn close(&self) -> Result<(), SplayError> {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            self.shared.allocator.trim();
        }
        Ok(())
    }
}

/// Keeps filled sets in `full` and the one currently written to in `recent`.
pub struct SimpleStrategy {
    shared: Arc<SimpleShared>,
    full: Vec<WritableChunks>,
    recent: Option<WritableChunks>,
}

impl SimpleStrategy {
    fn sets_mark(&self) -> SetsMark {
        let len = self.full.len() + usize::from(self.recent.is_some());
        SetsMark::new(len, self.recent.as_ref().or(self.full.last()))
    }
}

impl TxStrategy for SimpleStrategy {
    fn take_impl(&mut self, min_size: usize) -> Result<&mut WritableChunks, SplayError> {
        let reusable = matches!(&self.recent, Some(r) if r.remaining() >= min_size);
        if !reusable {
            let size = min_size.max(self.shared.desired_chunk_size);
            let fresh = make_chunks(self.shared.allocator.as_ref(), &self.shared.chunk_types, size)?;
            log::trace!("Simple provider allocated chunks of {} rows", size);
            if let Some(previous) = self.recent.replace(fresh) {
                self.full.push(previous);
            }
        }
        match self.recent.as_mut() {
            Some(recent) => {
                recent.restamp();
                Ok(recent)
            }
            None => Err(SplayError::illegal_state("No current chunks after take")),
        }
    }

    fn complete_impl(&mut self, _id: ChunksId, out_rows: usize) -> Result<(), SplayError> {
        match self.recent.as_mut() {
            Some(recent) => recent.advance(out_rows),
            None => Err(SplayError::illegal_state("No current chunks to complete")),
        }
    }

    fn commit_impl(&mut self, _stats: &TxStats) -> Result<(), SplayError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(SplayError::illegal_state("Simple provider is closed"));
        }
        if let Some(recent) = self.recent.take() {
            self.full.push(recent);
        }
        // The sink owns the sets from here on, even when it fails.
        let sets = std::mem::take(&mut self.full);
        let (flipped, rows) = flip_for_delivery(self.shared.allocator.as_ref(), sets);
        if flipped.is_empty() {
            return Ok(());
        }
        log::debug!(
            "Simple provider delivering {} rows in {} chunks",
            rows,
            flipped.len()
        );
        log_metric!("event"="deliver", "provider"="simple", "rows"=rows, "sets"=flipped.len());
        self.shared.sink.accept(flipped)
    }

    fn close_impl(&mut self, _outcome: &CloseOutcome) -> Result<(), SplayError> {
        let mut sets = std::mem::take(&mut self.full);
        sets.extend(self.recent.take());
        if sets.is_empty() {
            return Ok(());
        }
        log::debug!("Simple provider releasing {} uncommitted chunks", sets.len());
        release_chunks(self.shared.allocator.as_ref(), sets)
    }

    fn savepoint_impl(&self) -> Option<SetsMark> {
        Some(self.sets_mark())
    }

    fn rollback_to_impl(&mut self, mark: SetsMark) -> Result<(), SplayError> {
        let mut sets = std::mem::take(&mut self.full);
        sets.extend(self.recent.take());
        let added = mark.rewind(&mut sets);
        self.recent = sets.pop();
        self.full = sets;
        if added.is_empty() {
            return Ok(());
        }
        log::debug!("Simple provider rolling back {} chunks to a savepoint", added.len());
        release_chunks(self.shared.allocator.as_ref(), added)
    }
}
