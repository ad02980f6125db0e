// In: src/provider/batching.rs

//! Coalesces many small logical transactions into one inner transaction of the
//! wrapped provider.
//!
//! Each logical transaction writes through to the currently open inner transaction.
//! A logical commit only records statistics and asks the [`CommitPolicy`] whether
//! the batch should be committed now; by default it never does, and the batch is
//! committed by an explicit [`BatchingProvider::commit_batch`].
//!
//! A logical transaction marks a savepoint in the inner transaction on its first
//! take. If it closes without a clean commit, the inner transaction is rolled back
//! to that savepoint only; what earlier logical transactions committed stays in the
//! batch. The wrapped provider must support savepoints.

use std::sync::Arc;

use super::ChunksProvider;
use crate::chunk::{ChunksId, WritableChunks};
use crate::config::SplayConfig;
use crate::error::SplayError;
use crate::transaction::checkout::Slot;
use crate::transaction::{
    Checkout, CloseOutcome, Retire, Savepoint, Transaction, TxCore, TxStats, TxStrategy,
};
use crate::types::ColumnKind;

//==================================================================================
// 1. Commit Policy
//==================================================================================

/// Counters for the batch currently open.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    pub logical_transactions: u64,
    pub input_rows: u64,
    pub output_rows: u64,
}

/// Decides, after each logical commit, whether the open batch is committed.
pub trait CommitPolicy: Send + Sync {
    fn should_commit(&self, batch: &BatchStats) -> bool;
}

impl<F> CommitPolicy for F
where
    F: Fn(&BatchStats) -> bool + Send + Sync,
{
    fn should_commit(&self, batch: &BatchStats) -> bool {
        self(batch)
    }
}

/// Never commits on its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExplicitOnly;

impl CommitPolicy for ExplicitOnly {
    fn should_commit(&self, _batch: &BatchStats) -> bool {
        false
    }
}

/// Commits once the batch holds at least `rows` output rows.
#[derive(Debug, Clone, Copy)]
pub struct OutputRowsAtLeast {
    pub rows: u64,
}

impl CommitPolicy for OutputRowsAtLeast {
    fn should_commit(&self, batch: &BatchStats) -> bool {
        batch.output_rows >= self.rows
    }
}

//==================================================================================
// 2. Batch State
//==================================================================================

/// Lifetime totals of a [`BatchingProvider`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchTotals {
    pub batches_committed: u64,
    pub batches_aborted: u64,
    pub logical_transactions: u64,
    pub logical_rolled_back: u64,
    pub input_rows: u64,
    pub output_rows: u64,
}

pub struct BatchState<T: Transaction> {
    inner: Option<T>,
    current: BatchStats,
    totals: BatchTotals,
    policy: Arc<dyn CommitPolicy>,
}

impl<T: Transaction> BatchState<T> {
    fn commit_batch(&mut self) -> Result<(), SplayError> {
        let Some(mut inner) = self.inner.take() else {
            return Ok(());
        };
        let batch = std::mem::take(&mut self.current);
        let committed = inner.commit();
        let closed = inner.close();
        match committed.and(closed) {
            Ok(()) => {
                self.totals.batches_committed += 1;
                log::debug!(
                    "Committed batch of {} logical transactions, {} rows",
                    batch.logical_transactions,
                    batch.output_rows
                );
                log_metric!(
                    "event"="batch_committed",
                    "logical_transactions"=batch.logical_transactions,
                    "output_rows"=batch.output_rows
                );
                Ok(())
            }
            Err(err) => {
                self.totals.batches_aborted += 1;
                Err(err)
            }
        }
    }

    fn abort_batch(&mut self) -> Result<(), SplayError> {
        let Some(mut inner) = self.inner.take() else {
            return Ok(());
        };
        let batch = std::mem::take(&mut self.current);
        self.totals.batches_aborted += 1;
        log::debug!(
            "Aborting batch of {} logical transactions, {} rows",
            batch.logical_transactions,
            batch.output_rows
        );
        inner.close()
    }
}

impl<T: Transaction> Retire for BatchState<T> {
    fn retire(mut self) -> Result<(), SplayError> {
        self.abort_batch()
    }
}

//==================================================================================
// 3. Strategy
//==================================================================================

pub struct BatchStrategy<P: ChunksProvider> {
    provider: Arc<P>,
    state: Option<Checkout<BatchState<P::Tx>>>,
    savepoint: Option<Savepoint>,
}

fn closed() -> SplayError {
    SplayError::illegal_state("Logical transaction is closed")
}

impl<P: ChunksProvider> TxStrategy for BatchStrategy<P> {
    fn take_impl(&mut self, min_size: usize) -> Result<&mut WritableChunks, SplayError> {
        let state = self.state.as_deref_mut().ok_or_else(closed)?;
        if state.inner.is_none() {
            state.inner = Some(self.provider.begin_transaction()?);
        }
        let inner = match state.inner.as_mut() {
            Some(inner) => inner,
            None => return Err(SplayError::illegal_state("No inner transaction after begin")),
        };
        if self.savepoint.is_none() {
            self.savepoint = Some(inner.savepoint()?);
        }
        inner.take(min_size)
    }

    fn complete_impl(&mut self, id: ChunksId, out_rows: usize) -> Result<(), SplayError> {
        let state = self.state.as_deref_mut().ok_or_else(closed)?;
        match state.inner.as_mut() {
            Some(inner) => inner.complete(id, out_rows),
            None => Err(SplayError::illegal_state("No inner transaction to complete")),
        }
    }

    fn commit_impl(&mut self, stats: &TxStats) -> Result<(), SplayError> {
        let state = self.state.as_deref_mut().ok_or_else(closed)?;
        if let Some(inner) = state.inner.as_mut() {
            inner.record_input(stats.input_rows as usize);
        }
        state.current.logical_transactions += 1;
        state.current.input_rows += stats.input_rows;
        state.current.output_rows += stats.output_rows;
        state.totals.logical_transactions += 1;
        state.totals.input_rows += stats.input_rows;
        state.totals.output_rows += stats.output_rows;
        if state.policy.should_commit(&state.current) {
            state.commit_batch()?;
        }
        Ok(())
    }

    fn close_impl(&mut self, outcome: &CloseOutcome) -> Result<(), SplayError> {
        let Some(mut state) = self.state.take() else {
            return Ok(());
        };
        let savepoint = self.savepoint.take();
        if outcome.is_successful_commit() {
            return Ok(());
        }
        state.totals.logical_rolled_back += 1;
        let (Some(savepoint), Some(inner)) = (savepoint, state.inner.as_mut()) else {
            // Nothing reached the inner transaction.
            return Ok(());
        };
        match inner.rollback_to(savepoint) {
            Ok(()) => Ok(()),
            Err(err) => {
                log::warn!("Rolling back a logical transaction failed, aborting its batch: {}", err);
                state.abort_batch()?;
                Err(err)
            }
        }
    }
}

//==================================================================================
// 4. BatchingProvider
//==================================================================================

pub type BatchTransaction<P> = TxCore<BatchStrategy<P>>;

pub struct BatchingProvider<P: ChunksProvider> {
    inner: Arc<P>,
    slot: Slot<BatchState<P::Tx>>,
}

impl<P: ChunksProvider> BatchingProvider<P> {
    /// Wraps `inner`; batches are committed only by `commit_batch`.
    pub fn new(inner: P) -> Self {
        Self::with_policy(inner, Arc::new(ExplicitOnly))
    }

    pub fn with_policy(inner: P, policy: Arc<dyn CommitPolicy>) -> Self {
        Self {
            inner: Arc::new(inner),
            slot: Slot::new(
                BatchState {
                    inner: None,
                    current: BatchStats::default(),
                    totals: BatchTotals::default(),
                    policy,
                },
                "Batching provider",
            ),
        }
    }

    /// Uses [`OutputRowsAtLeast`] when `batch.auto_commit_output_rows` is set.
    pub fn from_config(inner: P, config: &SplayConfig) -> Self {
        match config.batch.auto_commit_output_rows {
            Some(rows) => Self::with_policy(
                inner,
                Arc::new(OutputRowsAtLeast { rows: rows as u64 }),
            ),
            None => Self::new(inner),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Commits and closes the open inner transaction, if any.
    pub fn commit_batch(&self) -> Result<(), SplayError> {
        self.slot.with(|state| state.commit_batch())
    }

    /// Statistics of the batch currently open.
    pub fn current_batch(&self) -> Result<BatchStats, SplayError> {
        self.slot.with(|state| Ok(state.current))
    }

    pub fn totals(&self) -> Result<BatchTotals, SplayError> {
        self.slot.with(|state| Ok(state.totals))
    }
}

impl<P: ChunksProvider> ChunksProvider for BatchingProvider<P> {
    type Tx = BatchTransaction<P>;

    fn chunk_types(&self) -> &[ColumnKind] {
        self.inner.chunk_types()
    }

    fn begin_transaction(&self) -> Result<Self::Tx, SplayError> {
        let state = self.slot.checkout()?;
        Ok(TxCore::new(
            BatchStrategy {
                provider: Arc::clone(&self.inner),
                state: Some(state),
                savepoint: None,
            },
            "batching",
        ))
    }

    /// Aborts any open batch, then closes the wrapped provider.
    fn close(&self) -> Result<(), SplayError> {
        let aborted = self.slot.close();
        let closed = self.inner.close();
        aborted.and(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::provider::{BufferedProvider, ChunksCollector, SimpleProvider};

    fn simple(collector: &ChunksCollector) -> SimpleProvider {
        SimpleProvider::new(vec![ColumnKind::Int], Arc::new(collector.clone()), 8).unwrap()
    }

    fn logical_tx<P: ChunksProvider>(provider: &BatchingProvider<P>, values: &[i32]) {
        let mut tx = provider.begin_transaction().unwrap();
        let chunks = tx.take(values.len()).unwrap();
        let id = chunks.id();
        chunks.out_mut()[0].extend_from_slice(values).unwrap();
        tx.complete(id, values.len()).unwrap();
        tx.record_input(1);
        tx.commit().unwrap();
        tx.close().unwrap();
    }

    #[test]
    fn test_logical_commits_coalesce_until_commit_batch() {
        let collector = ChunksCollector::new();
        let provider = BatchingProvider::new(simple(&collector));
        logical_tx(&provider, &[1, 2]);
        logical_tx(&provider, &[3]);
        assert_eq!(collector.delivery_count(), 0);
        assert_eq!(
            provider.current_batch().unwrap(),
            BatchStats {
                logical_transactions: 2,
                input_rows: 2,
                output_rows: 3
            }
        );

        provider.commit_batch().unwrap();
        let deliveries = collector.take_all();
        assert_eq!(deliveries.len(), 1);
        let values: Vec<i32> = deliveries[0]
            .iter()
            .flat_map(|c| c.column(0).unwrap().values::<i32>().unwrap().to_vec())
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
        assert_eq!(provider.totals().unwrap().batches_committed, 1);
        assert_eq!(provider.current_batch().unwrap(), BatchStats::default());
    }

    #[test]
    fn test_commit_batch_without_open_batch_is_noop() {
        let collector = ChunksCollector::new();
        let provider = BatchingProvider::new(simple(&collector));
        provider.commit_batch().unwrap();
        assert_eq!(collector.delivery_count(), 0);
    }

    #[test]
    fn test_policy_commits_automatically() {
        let collector = ChunksCollector::new();
        let provider =
            BatchingProvider::with_policy(simple(&collector), Arc::new(OutputRowsAtLeast { rows: 3 }));
        logical_tx(&provider, &[1, 2]);
        assert_eq!(collector.delivery_count(), 0);
        logical_tx(&provider, &[3]);
        assert_eq!(collector.delivery_count(), 1);
        assert_eq!(collector.rows(), 3);
    }

    #[test]
    fn test_closure_policy() {
        let collector = ChunksCollector::new();
        let policy = |batch: &BatchStats| batch.logical_transactions >= 1;
        let provider = BatchingProvider::with_policy(simple(&collector), Arc::new(policy));
        logical_tx(&provider, &[9]);
        assert_eq!(collector.delivery_count(), 1);
    }

    #[test]
    fn test_failed_logical_transaction_keeps_earlier_commits() {
        let collector = ChunksCollector::new();
        let provider = BatchingProvider::new(simple(&collector));
        logical_tx(&provider, &[1, 2]);

        let mut failed = provider.begin_transaction().unwrap();
        let chunks = failed.take(3).unwrap();
        chunks.out_mut()[0].extend_from_slice(&[7, 8]).unwrap();
        failed.close().unwrap();

        // The failed one is closed but still in scope.
        logical_tx(&provider, &[3]);
        let totals = provider.totals().unwrap();
        assert_eq!(totals.logical_rolled_back, 1);
        assert_eq!(totals.batches_aborted, 0);
        assert_eq!(provider.current_batch().unwrap().output_rows, 3);

        provider.commit_batch().unwrap();
        let deliveries = collector.take_all();
        assert_eq!(deliveries.len(), 1);
        let values: Vec<i32> = deliveries[0]
            .iter()
            .flat_map(|c| c.column(0).unwrap().values::<i32>().unwrap().to_vec())
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
        drop(failed);
    }

    #[test]
    fn test_failed_logical_transaction_over_buffered_rewinds_to_its_start() {
        let collector = ChunksCollector::new();
        let buffered =
            BufferedProvider::new(vec![ColumnKind::Int], Arc::new(collector.clone()), 8).unwrap();
        let provider = BatchingProvider::new(buffered);
        logical_tx(&provider, &[5]);
        {
            let mut tx = provider.begin_transaction().unwrap();
            tx.take(1).unwrap();
            // Dropped with the take outstanding.
        }
        provider.commit_batch().unwrap();
        provider.inner().flush().unwrap();
        assert_eq!(collector.rows(), 1);
        assert_eq!(provider.inner().stats().unwrap().transactions_committed, 1);
    }

    #[test]
    fn test_overlapping_logical_transactions_are_rejected() {
        let collector = ChunksCollector::new();
        let provider = BatchingProvider::new(simple(&collector));
        let _open = provider.begin_transaction().unwrap();
        let err = provider.begin_transaction().err().unwrap();
        assert_eq!(err.category(), ErrorCategory::IllegalState);
        assert_eq!(
            provider.commit_batch().unwrap_err().category(),
            ErrorCategory::IllegalState
        );
    }

    #[test]
    fn test_batching_over_buffered_keeps_rows_in_backlog() {
        let collector = ChunksCollector::new();
        let buffered =
            BufferedProvider::new(vec![ColumnKind::Int], Arc::new(collector.clone()), 8).unwrap();
        let provider = BatchingProvider::new(buffered);
        logical_tx(&provider, &[4, 5]);
        provider.commit_batch().unwrap();
        assert_eq!(provider.inner().backlog_rows().unwrap(), 2);
        provider.inner().flush().unwrap();
        assert_eq!(collector.rows(), 2);
    }

    #[test]
    fn test_close_aborts_open_batch_and_inner_provider() {
        let collector = ChunksCollector::new();
        let provider = BatchingProvider::new(simple(&collector));
        logical_tx(&provider, &[1]);
        provider.close().unwrap();
        provider.close().unwrap();
        assert_eq!(collector.delivery_count(), 0);
        assert!(provider.begin_transaction().is_err());
    }
}
