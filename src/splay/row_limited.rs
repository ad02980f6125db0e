// In: src/splay/row_limited.rs

use std::sync::Arc;

use super::ObjectSplayer;
use crate::chunk::TypedBuffer;
use crate::error::SplayError;
use crate::types::{ColumnKind, LogicalType};

/// Feeds the delegate at most `limit` records per call.
///
/// Output is identical to calling the delegate on the whole input; only the
/// granularity of the delegate calls changes.
pub struct RowLimited<T> {
    delegate: Arc<dyn ObjectSplayer<T>>,
    limit: usize,
}

impl<T> RowLimited<T> {
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn delegate(&self) -> &Arc<dyn ObjectSplayer<T>> {
        &self.delegate
    }
}

impl<T> ObjectSplayer<T> for RowLimited<T> {
    fn output_types(&self) -> &[LogicalType] {
        self.delegate.output_types()
    }

    fn chunk_types(&self) -> Vec<ColumnKind> {
        self.delegate.chunk_types()
    }

    fn splay_all(&self, input: &[T], out: &mut [TypedBuffer]) -> Result<(), SplayError> {
        for slice in input.chunks(self.limit) {
            self.delegate.splay_all(slice, out)?;
        }
        Ok(())
    }

    fn row_limit(&self) -> Option<usize> {
        Some(self.limit)
    }

    fn limited_delegate(&self) -> Option<Arc<dyn ObjectSplayer<T>>> {
        Some(Arc::clone(&self.delegate))
    }
}

/// Bounds `delegate` to `max_rows` records per call.
///
/// An already tighter limit is kept as is. A looser one is replaced rather than
/// stacked, so limiters never nest.
pub fn row_limit<T: 'static>(
    delegate: Arc<dyn ObjectSplayer<T>>,
    max_rows: usize,
) -> Result<Arc<dyn ObjectSplayer<T>>, SplayError> {
    if max_rows == 0 {
        return Err(SplayError::invalid_argument("Row limit must be positive"));
    }
    match delegate.row_limit() {
        Some(existing) if existing <= max_rows => Ok(delegate),
        _ => {
            let inner = delegate.limited_delegate().unwrap_or(delegate);
            Ok(Arc::new(RowLimited {
                delegate: inner,
                limit: max_rows,
            }))
        }
    }
}
