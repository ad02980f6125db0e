// In: src/splay/one_to_many.rs

use std::sync::Arc;

use super::ObjectSplayer;
use crate::config::SplayConfig;
use crate::error::SplayError;
use crate::provider::ChunksProvider;
use crate::transaction::Transaction;
use crate::types::{ColumnKind, LogicalType};

/// Drives a row splayer over many input batches, bounding both how many records
/// go into one take and how many rows go into one transaction.
///
/// A transaction is committed as soon as it holds `max_tx_size` rows and a fresh
/// one is begun; whatever is left at the end is committed as a final, smaller
/// transaction. Any failure rolls back the transaction in progress only: rows of
/// transactions already committed stay delivered.
pub struct OneToManyAdapter<T> {
    delegate: Arc<dyn ObjectSplayer<T>>,
    max_take_size: usize,
    max_tx_size: usize,
}

impl<T> OneToManyAdapter<T> {
    pub fn new(
        delegate: Arc<dyn ObjectSplayer<T>>,
        max_take_size: usize,
        max_tx_size: usize,
    ) -> Result<Self, SplayError> {
        if max_take_size == 0 || max_take_size > max_tx_size {
            return Err(SplayError::InvalidConfiguration(format!(
                "Must have 0 < max_take_size <= max_tx_size, got max_take_size={}, max_tx_size={}",
                max_take_size, max_tx_size
            )));
        }
        if max_tx_size % max_take_size != 0 {
            return Err(SplayError::InvalidConfiguration(format!(
                "max_tx_size ({}) must be a multiple of max_take_size ({})",
                max_tx_size, max_take_size
            )));
        }
        Ok(Self {
            delegate,
            max_take_size,
            max_tx_size,
        })
    }

    pub fn from_config(
        delegate: Arc<dyn ObjectSplayer<T>>,
        config: &SplayConfig,
    ) -> Result<Self, SplayError> {
        Self::new(delegate, config.splay.max_take_size, config.splay.max_tx_size)
    }

    pub fn output_types(&self) -> &[LogicalType] {
        self.delegate.output_types()
    }

    pub fn chunk_types(&self) -> Vec<ColumnKind> {
        self.delegate.chunk_types()
    }

    pub fn max_take_size(&self) -> usize {
        self.max_take_size
    }

    pub fn max_tx_size(&self) -> usize {
        self.max_tx_size
    }

    pub fn handle<P: ChunksProvider>(&self, input: &[T], provider: &P) -> Result<(), SplayError> {
        self.handle_all(&[input], provider)
    }

    pub fn handle_all<P: ChunksProvider>(
        &self,
        inputs: &[&[T]],
        provider: &P,
    ) -> Result<(), SplayError> {
        let mut tx = provider.begin_transaction()?;
        let mut tx_rows = 0usize;
        for input in inputs {
            for took in input.chunks(self.max_take_size) {
                // The second half, if any, belongs to a fresh transaction.
                let (head, tail) = took.split_at(took.len().min(self.max_tx_size - tx_rows));
                for piece in [head, tail] {
                    if piece.is_empty() {
                        continue;
                    }
                    self.splay_piece(piece, &mut tx)?;
                    tx_rows += piece.len();
                    if tx_rows == self.max_tx_size {
                        Self::finish(&mut tx, tx_rows)?;
                        tx = provider.begin_transaction()?;
                        tx_rows = 0;
                    }
                }
            }
        }
        if tx_rows > 0 {
            Self::finish(&mut tx, tx_rows)?;
        }
        tx.close()
    }

    fn splay_piece<X: Transaction>(&self, piece: &[T], tx: &mut X) -> Result<(), SplayError> {
        let chunks = tx.take(piece.len())?;
        let id = chunks.id();
        self.delegate.splay_all(piece, chunks.out_mut())?;
        tx.complete(id, piece.len())
    }

    fn finish<X: Transaction>(tx: &mut X, rows: usize) -> Result<(), SplayError> {
        tx.record_input(rows);
        tx.commit()?;
        log::trace!("Committed a transaction of {} rows", rows);
        tx.close()
    }
}
