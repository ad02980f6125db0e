// In: src/splay/key_value.rs

//! Splays the keys and the values of a record stream into two independent
//! providers, each with its own splayer, row size and sink.

use std::sync::Arc;

use super::{ObjectSplayer, TransactionSplayer};
use crate::error::SplayError;
use crate::provider::simple::SimpleTransaction;
use crate::provider::{ChunksProvider, ChunksSink, SimpleProvider};
use crate::transaction::Transaction;

/// How one side (keys or values) is splayed and where it is delivered.
pub struct KeyValueSide<T> {
    splayer: Arc<dyn ObjectSplayer<T>>,
    row_size: usize,
    sink: Arc<dyn ChunksSink>,
}

impl<T> KeyValueSide<T> {
    /// `row_size` is the number of records per take; 0 means the chunk size.
    pub fn new(splayer: Arc<dyn ObjectSplayer<T>>, row_size: usize, sink: Arc<dyn ChunksSink>) -> Self {
        Self {
            splayer,
            row_size,
            sink,
        }
    }
}

struct Lane<T> {
    splayer: TransactionSplayer<T>,
    provider: SimpleProvider,
}

impl<T> Lane<T> {
    fn build(side: KeyValueSide<T>, chunk_size: usize, which: &str) -> Result<Self, SplayError> {
        let row_size = if side.row_size == 0 { chunk_size } else { side.row_size };
        if chunk_size % row_size != 0 {
            return Err(SplayError::InvalidConfiguration(format!(
                "{} row size {} does not divide chunk size {}",
                which, row_size, chunk_size
            )));
        }
        let splayer = TransactionSplayer::new(side.splayer, row_size)?;
        let provider = SimpleProvider::new(splayer.chunk_types(), side.sink, chunk_size)?;
        Ok(Self { splayer, provider })
    }
}

pub struct KeyValueSplayer<K, V> {
    keys: Option<Lane<K>>,
    values: Option<Lane<V>>,
    chunk_size: usize,
}

impl<K, V> KeyValueSplayer<K, V> {
    pub fn new(
        chunk_size: usize,
        keys: Option<KeyValueSide<K>>,
        values: Option<KeyValueSide<V>>,
    ) -> Result<Self, SplayError> {
        if chunk_size == 0 {
            return Err(SplayError::invalid_argument("Chunk size must be positive"));
        }
        if keys.is_none() && values.is_none() {
            return Err(SplayError::InvalidConfiguration(
                "At least one of keys or values must be splayed".to_string(),
            ));
        }
        Ok(Self {
            keys: keys.map(|s| Lane::build(s, chunk_size, "Key")).transpose()?,
            values: values.map(|s| Lane::build(s, chunk_size, "Value")).transpose()?,
            chunk_size,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn has_keys(&self) -> bool {
        self.keys.is_some()
    }

    pub fn has_values(&self) -> bool {
        self.values.is_some()
    }

    /// Splays one batch. Both sides are fully splayed before either commits, so a
    /// conversion failure on one side delivers nothing on the other.
    pub fn handle(&self, keys: Option<&[K]>, values: Option<&[V]>) -> Result<(), SplayError> {
        if keys.is_some() != self.keys.is_some() || values.is_some() != self.values.is_some() {
            return Err(SplayError::invalid_argument(
                "Key/value input does not match the configured sides",
            ));
        }
        if let (Some(k), Some(v)) = (keys, values) {
            if k.len() != v.len() {
                return Err(SplayError::invalid_argument(format!(
                    "Key and value counts differ: {} keys, {} values",
                    k.len(),
                    v.len()
                )));
            }
        }

        let mut key_tx = match (&self.keys, keys) {
            (Some(lane), Some(input)) => Some(Self::splay(lane, input)?),
            _ => None,
        };
        let mut value_tx = match (&self.values, values) {
            (Some(lane), Some(input)) => Some(Self::splay(lane, input)?),
            _ => None,
        };

        for tx in key_tx.iter_mut() {
            tx.commit()?;
            tx.close()?;
        }
        for tx in value_tx.iter_mut() {
            tx.commit()?;
            tx.close()?;
        }
        Ok(())
    }

    fn splay<T>(lane: &Lane<T>, input: &[T]) -> Result<SimpleTransaction, SplayError> {
        let mut tx = lane.provider.begin_transaction()?;
        lane.splayer.splay_all(input, &mut tx)?;
        Ok(tx)
    }

    pub fn close(&self) -> Result<(), SplayError> {
        let keys = self.keys.as_ref().map(|l| l.provider.close()).transpose();
        let values = self.values.as_ref().map(|l| l.provider.close()).transpose();
        keys.and(values).map(|_| ())
    }
}
