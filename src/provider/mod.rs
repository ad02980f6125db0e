// In: src/provider/mod.rs

//! Buffer providers: they allocate output buffer sets for transactions and deliver
//! committed sets to a [`ChunksSink`].
//!
//! | Provider            | Delivery                      | Thread safety            |
//! |---------------------|-------------------------------|--------------------------|
//! | `SimpleProvider`    | every commit                  | one transaction per tx   |
//! | `BufferedProvider`  | explicit `flush`              | one open tx at a time    |
//! | `LockedProvider`    | explicit `flush`              | mutex, blocking variants |
//! | `BatchingProvider`  | `commit_batch` / policy hook  | whatever it wraps        |

pub mod batching;
pub mod buffered;
pub mod locked;
pub mod simple;

#[cfg(test)]
mod provider_tests;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::chunk::{Chunks, WritableChunks};
use crate::config::{DeliveryMode, SplayConfig};
use crate::error::SplayError;
use crate::transaction::Transaction;
use crate::types::ColumnKind;

pub use batching::{BatchStats, BatchingProvider, CommitPolicy, ExplicitOnly, OutputRowsAtLeast};
pub use buffered::{BacklogStats, BufferedProvider, BufferedState};
pub use locked::{Interrupt, LockedProvider};
pub use simple::SimpleProvider;

//==================================================================================
// 1. Sink & Provider Contracts
//==================================================================================

/// The downstream consumer. Receives flipped sets in delivery order and owns them
/// from then on, even when it returns an error.
pub trait ChunksSink: Send + Sync {
    fn accept(&self, chunks: Vec<Chunks>) -> Result<(), SplayError>;
}

impl<F> ChunksSink for F
where
    F: Fn(Vec<Chunks>) -> Result<(), SplayError> + Send + Sync,
{
    fn accept(&self, chunks: Vec<Chunks>) -> Result<(), SplayError> {
        self(chunks)
    }
}

pub trait ChunksProvider {
    type Tx: Transaction;

    /// The column kinds of every buffer set this provider hands out.
    fn chunk_types(&self) -> &[ColumnKind];

    fn begin_transaction(&self) -> Result<Self::Tx, SplayError>;

    /// Releases anything still held. Idempotent.
    fn close(&self) -> Result<(), SplayError>;
}

impl<P: ChunksProvider + ?Sized> ChunksProvider for Arc<P> {
    type Tx = P::Tx;

    fn chunk_types(&self) -> &[ColumnKind] {
        (**self).chunk_types()
    }

    fn begin_transaction(&self) -> Result<Self::Tx, SplayError> {
        (**self).begin_transaction()
    }

    fn close(&self) -> Result<(), SplayError> {
        (**self).close()
    }
}

//==================================================================================
// 2. ChunksCollector
//==================================================================================

/// A sink that keeps every delivery in memory. Cloning shares the same storage.
#[derive(Clone, Default)]
pub struct ChunksCollector {
    deliveries: Arc<Mutex<Vec<Vec<Chunks>>>>,
}

impl ChunksCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivery_count(&self) -> usize {
        self.deliveries.lock().len()
    }

    /// Total rows across every delivered set.
    pub fn rows(&self) -> usize {
        self.deliveries
            .lock()
            .iter()
            .flatten()
            .map(Chunks::size)
            .sum()
    }

    /// Drains all deliveries, oldest first.
    pub fn take_all(&self) -> Vec<Vec<Chunks>> {
        std::mem::take(&mut *self.deliveries.lock())
    }
}

impl ChunksSink for ChunksCollector {
    fn accept(&self, chunks: Vec<Chunks>) -> Result<(), SplayError> {
        self.deliveries.lock().push(chunks);
        Ok(())
    }
}

//==================================================================================
// 3. Configured Provider
//==================================================================================

/// Either delivery mode behind one type, picked from [`SplayConfig::delivery`].
pub enum ConfiguredProvider {
    Simple(SimpleProvider),
    Buffered(BufferedProvider),
}

impl ConfiguredProvider {
    pub fn from_config(
        chunk_types: Vec<ColumnKind>,
        sink: Arc<dyn ChunksSink>,
        config: &SplayConfig,
    ) -> Result<Self, SplayError> {
        match config.delivery {
            DeliveryMode::Simple => Ok(ConfiguredProvider::Simple(SimpleProvider::from_config(
                chunk_types,
                sink,
                config,
            )?)),
            DeliveryMode::Buffered => Ok(ConfiguredProvider::Buffered(
                BufferedProvider::from_config(chunk_types, sink, config)?,
            )),
        }
    }

    /// Delivers the backlog of a buffered provider; a no-op for simple delivery.
    pub fn flush(&self) -> Result<(), SplayError> {
        match self {
            ConfiguredProvider::Simple(_) => Ok(()),
            ConfiguredProvider::Buffered(p) => p.flush(),
        }
    }
}

impl ChunksProvider for ConfiguredProvider {
    type Tx = Box<dyn Transaction>;

    fn chunk_types(&self) -> &[ColumnKind] {
        match self {
            ConfiguredProvider::Simple(p) => p.chunk_types(),
            ConfiguredProvider::Buffered(p) => p.chunk_types(),
        }
    }

    fn begin_transaction(&self) -> Result<Self::Tx, SplayError> {
        let tx: Box<dyn Transaction> = match self {
            ConfiguredProvider::Simple(p) => Box::new(p.begin_transaction()?),
            ConfiguredProvider::Buffered(p) => Box::new(p.begin_transaction()?),
        };
        Ok(tx)
    }

    fn close(&self) -> Result<(), SplayError> {
        match self {
            ConfiguredProvider::Simple(p) => p.close(),
            ConfiguredProvider::Buffered(p) => p.close(),
        }
    }
}

//==================================================================================
// 4. Shared Helpers
//==================================================================================

pub(crate) fn validate_chunk_size(desired_chunk_size: usize) -> Result<usize, SplayError> {
    if desired_chunk_size == 0 {
        return Err(SplayError::invalid_argument(
            "desired_chunk_size must be positive",
        ));
    }
    Ok(desired_chunk_size)
}

/// Flips every non-empty set and releases the empty ones. Returns the flipped sets
/// and their total row count.
pub(crate) fn flip_for_delivery(
    allocator: &dyn crate::chunk::BufferAllocator,
    sets: Vec<WritableChunks>,
) -> (Vec<Chunks>, usize) {
    let (full, empty): (Vec<_>, Vec<_>) = sets.into_iter().partition(|c| c.pos() > 0);
    if let Err(e) = crate::chunk::allocator::release_chunks(allocator, empty) {
        log::warn!("Releasing empty chunks before delivery failed: {}", e);
    }
    let rows = full.iter().map(WritableChunks::pos).sum();
    (full.into_iter().map(WritableChunks::flip).collect(), rows)
}
