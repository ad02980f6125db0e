// In: src/splay/mod.rs

// ====================================================================================
// ARCHITECTURAL OVERVIEW: Splayers
// ====================================================================================
//
// A splayer converts a batch of input records into columns: record `i` of the batch
// becomes row `pos + i` of every output buffer. The layering is:
//
//   ObjectSplayer<T>      records -> &mut [TypedBuffer]     (pure conversion)
//     |-- FunctionSplayer    one typed function per column
//     `-- RowLimited         re-slices the input to at most L records per call
//
//   TransactionSplayer<T> records -> Transaction            (take/splay/complete)
//   OneToManyAdapter<T>   many batches -> Provider          (bounded take & tx sizes)
//   KeyValueSplayer<K,V>  keys and values -> two providers
//
// ====================================================================================

pub mod function;
pub mod key_value;
pub mod one_to_many;
pub mod row_limited;


use std::sync::Arc;

use crate::chunk::TypedBuffer;
use crate::error::SplayError;
use crate::transaction::Transaction;
use crate::types::{column_kinds, ColumnKind, LogicalType};

pub use function::{FunctionSplayer, TypedFunction};
pub use key_value::{KeyValueSide, KeyValueSplayer};
pub use one_to_many::OneToManyAdapter;
pub use row_limited::{row_limit, RowLimited};

/// Converts records into one value per output column each.
///
/// `splay_all` appends exactly `input.len()` values to every buffer in `out`, in
/// input order, or fails. Buffers must have room for the whole input.
pub trait ObjectSplayer<T>: Send + Sync {
    fn output_types(&self) -> &[LogicalType];

    fn splay_all(&self, input: &[T], out: &mut [TypedBuffer]) -> Result<(), SplayError>;

    /// The column kinds `out` must have.
    fn chunk_types(&self) -> Vec<ColumnKind> {
        column_kinds(self.output_types())
    }

    /// The largest input slice this splayer processes per delegate call, if bounded.
    fn row_limit(&self) -> Option<usize> {
        None
    }

    /// For a row-limited splayer, the splayer it wraps.
    fn limited_delegate(&self) -> Option<Arc<dyn ObjectSplayer<T>>> {
        None
    }
}

/// Fails with `InvalidArgument` unless `out` matches `kinds` column for column.
pub(crate) fn check_columns(kinds: &[ColumnKind], out: &[TypedBuffer]) -> Result<(), SplayError> {
    if out.len() != kinds.len() {
        return Err(SplayError::invalid_argument(format!(
            "Expected {} output columns, got {}",
            kinds.len(),
            out.len()
        )));
    }
    for (idx, (kind, buffer)) in kinds.iter().zip(out).enumerate() {
        if buffer.kind() != *kind {
            return Err(SplayError::invalid_argument(format!(
                "Output column {} is {}, expected {}",
                idx,
                buffer.kind(),
                kind
            )));
        }
    }
    Ok(())
}

/// Splays whole batches into a transaction, at most `take_size` records per take.
pub struct TransactionSplayer<T> {
    delegate: Arc<dyn ObjectSplayer<T>>,
    take_size: usize,
}

impl<T> TransactionSplayer<T> {
    pub fn new(delegate: Arc<dyn ObjectSplayer<T>>, take_size: usize) -> Result<Self, SplayError> {
        if take_size == 0 {
            return Err(SplayError::invalid_argument("take_size must be positive"));
        }
        Ok(Self {
            delegate,
            take_size,
        })
    }

    pub fn chunk_types(&self) -> Vec<ColumnKind> {
        self.delegate.chunk_types()
    }

    /// Appends every record of `input` to `tx`. On error the transaction is left
    /// poisoned or with an outstanding take; closing it rolls back.
    pub fn splay_all<X: Transaction + ?Sized>(&self, input: &[T], tx: &mut X) -> Result<(), SplayError> {
        for slice in input.chunks(self.take_size) {
            let chunks = tx.take(slice.len())?;
            let id = chunks.id();
            self.delegate.splay_all(slice, chunks.out_mut())?;
            tx.complete(id, slice.len())?;
        }
        tx.record_input(input.len());
        Ok(())
    }
}
