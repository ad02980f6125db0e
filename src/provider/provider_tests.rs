// In: src/provider/provider_tests.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use proptest::prelude::*;

use super::*;
use crate::chunk::{ObjectRef, PooledAllocator, Value};
use crate::config::SplayConfig;
use crate::error::ErrorCategory;
use crate::transaction::Transaction;
use crate::types::ColumnKind;

//==================================================================================
// Helpers
//==================================================================================

/// Appends `values` as one take/complete cycle into a single-`Int`-column transaction.
fn append_ints<T: Transaction + ?Sized>(tx: &mut T, values: &[i32]) {
    let chunks = tx.take(values.len()).unwrap();
    let id = chunks.id();
    chunks.out_mut()[0].extend_from_slice(values).unwrap();
    tx.complete(id, values.len()).unwrap();
}

fn delivered_ints(deliveries: &[Vec<Chunks>]) -> Vec<i32> {
    deliveries
        .iter()
        .flatten()
        .flat_map(|c| c.column(0).unwrap().values::<i32>().unwrap().to_vec())
        .collect()
}

fn int_buffered(collector: &ChunksCollector, chunk_size: usize) -> BufferedProvider {
    BufferedProvider::new(vec![ColumnKind::Int], Arc::new(collector.clone()), chunk_size).unwrap()
}

//==================================================================================
// Scenarios
//==================================================================================

#[test]
fn test_simple_provider_delivers_one_set_per_commit() {
    let collector = ChunksCollector::new();
    let provider = SimpleProvider::new(
        vec![ColumnKind::Int, ColumnKind::Object],
        Arc::new(collector.clone()),
        2,
    )
    .unwrap();

    let mut tx = provider.begin_transaction().unwrap();
    for (n, s) in [(5, "a"), (7, "b")] {
        let chunks = tx.take(1).unwrap();
        let id = chunks.id();
        chunks.out_mut()[0].append(Value::Int(n)).unwrap();
        chunks.out_mut()[1].append(Value::object(s)).unwrap();
        tx.complete(id, 1).unwrap();
    }
    tx.commit().unwrap();
    tx.close().unwrap();

    let deliveries = collector.take_all();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].len(), 1);
    let set = &deliveries[0][0];
    assert_eq!(set.size(), 2);
    assert_eq!(set.column(0).unwrap().values::<i32>().unwrap(), &[5, 7]);
    let strings: Vec<&str> = set
        .column(1)
        .unwrap()
        .values::<Option<ObjectRef>>()
        .unwrap()
        .iter()
        .map(|o| o.as_ref().and_then(ObjectRef::as_str).unwrap())
        .collect();
    assert_eq!(strings, vec!["a", "b"]);
}

#[test]
fn test_buffered_flush_combines_transactions() {
    let collector = ChunksCollector::new();
    let provider = int_buffered(&collector, 1024);

    for value in [11, 22] {
        let mut tx = provider.begin_transaction().unwrap();
        append_ints(&mut tx, &[value]);
        tx.commit().unwrap();
        tx.close().unwrap();
    }
    assert_eq!(collector.delivery_count(), 0);

    provider.flush().unwrap();
    let deliveries = collector.take_all();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(delivered_ints(&deliveries), vec![11, 22]);
    assert_eq!(provider.backlog_rows().unwrap(), 0);
    assert!(provider.backlog_snapshot().unwrap().is_empty());
}

#[test]
fn test_failure_before_complete_rolls_back() {
    let collector = ChunksCollector::new();
    let provider = int_buffered(&collector, 8);
    {
        let mut tx = provider.begin_transaction().unwrap();
        append_ints(&mut tx, &[1, 2]);
        tx.commit().unwrap();
    }
    let before = provider.backlog_snapshot().unwrap();

    let splay = |tx: &mut dyn Transaction| -> Result<(), SplayError> {
        let chunks = tx.take(5)?;
        chunks.out_mut()[0].push(99i32)?;
        Err(SplayError::Conversion("bad record".to_string()))
    };
    let mut tx = provider.begin_transaction().unwrap();
    let result = splay(&mut tx);
    tx.close().unwrap();
    drop(tx);

    assert!(matches!(result, Err(SplayError::Conversion(_))));
    assert_eq!(provider.backlog_snapshot().unwrap(), before);
    provider.flush().unwrap();
    assert_eq!(delivered_ints(&collector.take_all()), vec![1, 2]);
}

#[test]
fn test_zero_chunk_size_is_invalid_argument() {
    let collector = ChunksCollector::new();
    let sink: Arc<dyn ChunksSink> = Arc::new(collector);
    let simple = SimpleProvider::new(vec![ColumnKind::Int], Arc::clone(&sink), 0);
    assert_eq!(
        simple.err().unwrap().category(),
        ErrorCategory::InvalidArgument
    );
    let buffered = BufferedProvider::new(vec![ColumnKind::Int], Arc::clone(&sink), 0);
    assert_eq!(
        buffered.err().unwrap().category(),
        ErrorCategory::InvalidArgument
    );
    let locked = LockedProvider::new(vec![ColumnKind::Int], sink, 0);
    assert_eq!(locked.err().unwrap().category(), ErrorCategory::InvalidArgument);
}

//==================================================================================
// Simple provider
//==================================================================================

#[test]
fn test_simple_take_larger_than_chunk_size_allocates_exact_fit() {
    let collector = ChunksCollector::new();
    let provider =
        SimpleProvider::new(vec![ColumnKind::Int], Arc::new(collector.clone()), 4).unwrap();
    let mut tx = provider.begin_transaction().unwrap();
    let chunks = tx.take(10).unwrap();
    assert_eq!(chunks.size(), 10);
    let id = chunks.id();
    tx.complete(id, 0).unwrap();

    // Remaining 10 >= 3: reused.
    let again = tx.take(3).unwrap();
    assert_eq!(again.size(), 10);
}

#[test]
fn test_simple_rollback_delivers_nothing() {
    let collector = ChunksCollector::new();
    let provider =
        SimpleProvider::new(vec![ColumnKind::Int], Arc::new(collector.clone()), 2).unwrap();
    let mut tx = provider.begin_transaction().unwrap();
    append_ints(&mut tx, &[1, 2]);
    append_ints(&mut tx, &[3]);
    tx.close().unwrap();
    assert_eq!(collector.delivery_count(), 0);
}

#[test]
fn test_simple_transactions_are_independent() {
    let collector = ChunksCollector::new();
    let provider =
        SimpleProvider::new(vec![ColumnKind::Int], Arc::new(collector.clone()), 4).unwrap();
    let mut first = provider.begin_transaction().unwrap();
    let mut second = provider.begin_transaction().unwrap();
    append_ints(&mut first, &[1]);
    append_ints(&mut second, &[2]);
    second.commit().unwrap();
    first.close().unwrap();
    assert_eq!(delivered_ints(&collector.take_all()), vec![2]);
}

#[test]
fn test_simple_commit_with_nothing_written_makes_no_delivery() {
    let collector = ChunksCollector::new();
    let provider =
        SimpleProvider::new(vec![ColumnKind::Int], Arc::new(collector.clone()), 4).unwrap();
    let mut tx = provider.begin_transaction().unwrap();
    let id = tx.take(1).unwrap().id();
    tx.complete(id, 0).unwrap();
    tx.commit().unwrap();
    assert_eq!(collector.delivery_count(), 0);
}

#[test]
fn test_simple_provider_closed_rejects_new_transactions() {
    let collector = ChunksCollector::new();
    let provider =
        SimpleProvider::new(vec![ColumnKind::Int], Arc::new(collector.clone()), 4).unwrap();
    provider.close().unwrap();
    provider.close().unwrap();
    assert_eq!(
        provider.begin_transaction().err().unwrap().category(),
        ErrorCategory::IllegalState
    );
}

//==================================================================================
// Buffered provider
//==================================================================================

#[test]
fn test_buffered_rollback_restores_reused_set_identity() {
    let collector = ChunksCollector::new();
    let provider = int_buffered(&collector, 8);
    {
        let mut tx = provider.begin_transaction().unwrap();
        append_ints(&mut tx, &[1, 2, 3]);
        tx.commit().unwrap();
    }
    let before = provider.backlog_snapshot().unwrap();
    assert_eq!(before.len(), 1);

    {
        let mut tx = provider.begin_transaction().unwrap();
        append_ints(&mut tx, &[4, 5]);
        // Spills into a second set.
        append_ints(&mut tx, &[6, 7, 8, 9, 10]);
        // Closed without commit.
    }
    assert_eq!(provider.backlog_snapshot().unwrap(), before);
    assert_eq!(provider.stats().unwrap().transactions_rolled_back, 1);

    provider.flush().unwrap();
    assert_eq!(delivered_ints(&collector.take_all()), vec![1, 2, 3]);
}

#[test]
fn test_buffered_failed_commit_is_rolled_back() {
    let collector = ChunksCollector::new();
    let provider = int_buffered(&collector, 8);
    let mut tx = provider.begin_transaction().unwrap();
    let chunks = tx.take(2).unwrap();
    let id = chunks.id();
    chunks.out_mut()[0].push(1i32).unwrap();
    // Claims two rows, writes one.
    assert!(tx.complete(id, 2).is_err());
    assert!(tx.commit().is_err());
    tx.close().unwrap();
    drop(tx);
    assert_eq!(provider.backlog_rows().unwrap(), 0);
}

#[test]
fn test_buffered_flush_rejected_while_transaction_open() {
    let collector = ChunksCollector::new();
    let provider = int_buffered(&collector, 8);
    let tx = provider.begin_transaction().unwrap();
    assert_eq!(provider.flush().unwrap_err().category(), ErrorCategory::IllegalState);
    assert_eq!(
        provider.begin_transaction().err().unwrap().category(),
        ErrorCategory::IllegalState
    );
    drop(tx);
    provider.flush().unwrap();
}

#[test]
fn test_buffered_empty_flush_makes_no_callback() {
    let collector = ChunksCollector::new();
    let provider = int_buffered(&collector, 8);
    provider.flush().unwrap();
    {
        let mut tx = provider.begin_transaction().unwrap();
        let id = tx.take(1).unwrap().id();
        tx.complete(id, 0).unwrap();
        tx.commit().unwrap();
    }
    provider.flush().unwrap();
    assert_eq!(collector.delivery_count(), 0);
}

#[test]
fn test_buffered_close_is_idempotent_and_discards_backlog() {
    let collector = ChunksCollector::new();
    let provider = int_buffered(&collector, 8);
    {
        let mut tx = provider.begin_transaction().unwrap();
        append_ints(&mut tx, &[1]);
        tx.commit().unwrap();
    }
    provider.close().unwrap();
    provider.close().unwrap();
    assert_eq!(collector.delivery_count(), 0);
    assert_eq!(provider.flush().unwrap_err().category(), ErrorCategory::IllegalState);
}

#[test]
fn test_buffered_close_during_transaction_retires_on_return() {
    let pool = Arc::new(PooledAllocator::new(8));
    let collector = ChunksCollector::new();
    let provider = BufferedProvider::with_allocator(
        vec![ColumnKind::Int],
        Arc::new(collector.clone()),
        4,
        pool.clone(),
    )
    .unwrap();
    let mut tx = provider.begin_transaction().unwrap();
    append_ints(&mut tx, &[1]);
    provider.close().unwrap();
    tx.commit().unwrap();
    tx.close().unwrap();
    // The committed set was released rather than delivered, and the pool trimmed.
    assert_eq!(collector.delivery_count(), 0);
    assert_eq!(pool.stats().released, 1);
    assert_eq!(pool.stats().pooled, 0);
}

#[test]
fn test_buffered_close_returns_state_without_drop() {
    let collector = ChunksCollector::new();
    let provider = int_buffered(&collector, 8);
    let mut first = provider.begin_transaction().unwrap();
    append_ints(&mut first, &[1, 2]);
    first.commit().unwrap();
    first.close().unwrap();

    provider.flush().unwrap();
    assert_eq!(delivered_ints(&collector.take_all()), vec![1, 2]);

    let mut second = provider.begin_transaction().unwrap();
    append_ints(&mut second, &[3]);
    second.commit().unwrap();
    second.close().unwrap();
    assert_eq!(provider.backlog_rows().unwrap(), 1);

    // Closing again is a no-op and does not touch the next transaction.
    let third = provider.begin_transaction().unwrap();
    first.close().unwrap();
    assert_eq!(provider.flush().unwrap_err().category(), ErrorCategory::IllegalState);
    drop(third);
    provider.flush().unwrap();
    assert_eq!(delivered_ints(&collector.take_all()), vec![3]);
}

#[test]
fn test_simple_provider_close_trims_pool() {
    let pool = Arc::new(PooledAllocator::new(8));
    let collector = ChunksCollector::new();
    let provider =
        SimpleProvider::with_allocator(vec![ColumnKind::Int], Arc::new(collector.clone()), 4, pool.clone())
            .unwrap();
    let mut tx = provider.begin_transaction().unwrap();
    append_ints(&mut tx, &[1]);
    tx.close().unwrap();
    assert_eq!(pool.stats().pooled, 1);

    provider.close().unwrap();
    assert_eq!(pool.stats().pooled, 0);
}

//==================================================================================
// Savepoints
//==================================================================================

#[test]
fn test_rollback_to_savepoint_keeps_earlier_rows() {
    let collector = ChunksCollector::new();
    let simple =
        SimpleProvider::new(vec![ColumnKind::Int], Arc::new(collector.clone()), 4).unwrap();
    let buffered = int_buffered(&collector, 4);
    let mut txs: Vec<Box<dyn Transaction>> = vec![
        Box::new(simple.begin_transaction().unwrap()),
        Box::new(buffered.begin_transaction().unwrap()),
    ];
    for tx in txs.iter_mut() {
        append_ints(tx, &[1, 2, 3]);
        let mark = tx.savepoint().unwrap();
        append_ints(tx, &[4]);
        // Spills into a second set.
        append_ints(tx, &[5, 6]);
        tx.take(1).unwrap();
        assert!(tx.savepoint().is_err());

        tx.rollback_to(mark).unwrap();
        assert_eq!(tx.stats().output_rows, 3);
        append_ints(tx, &[7]);
        tx.commit().unwrap();
        tx.close().unwrap();
    }
    drop(txs);
    buffered.flush().unwrap();
    assert_eq!(delivered_ints(&collector.take_all()), vec![1, 2, 3, 7, 1, 2, 3, 7]);
}

#[test]
fn test_rollback_to_clears_failed_complete() {
    let collector = ChunksCollector::new();
    let provider = int_buffered(&collector, 8);
    let mut tx = provider.begin_transaction().unwrap();
    let mark = tx.savepoint().unwrap();
    let chunks = tx.take(2).unwrap();
    let id = chunks.id();
    chunks.out_mut()[0].push(1i32).unwrap();
    assert!(tx.complete(id, 2).is_err());
    assert!(tx.take(1).is_err());

    tx.rollback_to(mark).unwrap();
    append_ints(&mut tx, &[9]);
    tx.commit().unwrap();
    tx.close().unwrap();
    assert!(tx.rollback_to(mark).is_err());
    provider.flush().unwrap();
    assert_eq!(delivered_ints(&collector.take_all()), vec![9]);
}

//==================================================================================
// Sink ownership
//==================================================================================

#[test]
fn test_failing_sink_still_takes_ownership() {
    let pool = Arc::new(PooledAllocator::new(8));
    let calls = Arc::new(AtomicUsize::new(0));
    let sink: Arc<dyn ChunksSink> = {
        let calls = Arc::clone(&calls);
        Arc::new(move |_chunks: Vec<Chunks>| -> Result<(), SplayError> {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(SplayError::sink("downstream closed"))
        })
    };
    let provider =
        BufferedProvider::with_allocator(vec![ColumnKind::Int], sink, 4, pool.clone()).unwrap();
    {
        let mut tx = provider.begin_transaction().unwrap();
        append_ints(&mut tx, &[1, 2]);
        tx.commit().unwrap();
    }
    let err = provider.flush().unwrap_err();
    assert!(matches!(err, SplayError::Sink { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // Nothing was reclaimed, and the backlog is gone.
    assert_eq!(pool.stats().released, 0);
    assert_eq!(provider.backlog_rows().unwrap(), 0);
}

#[test]
fn test_pooled_allocator_recycles_delivered_chunks() {
    let pool = Arc::new(PooledAllocator::new(8));
    let collector = ChunksCollector::new();
    let provider = SimpleProvider::with_allocator(
        vec![ColumnKind::Int, ColumnKind::Long],
        Arc::new(collector.clone()),
        4,
        pool.clone(),
    )
    .unwrap();

    for _ in 0..3 {
        let mut tx = provider.begin_transaction().unwrap();
        let chunks = tx.take(1).unwrap();
        let id = chunks.id();
        chunks.out_mut()[0].push(1i32).unwrap();
        chunks.out_mut()[1].push(1i64).unwrap();
        tx.complete(id, 1).unwrap();
        tx.commit().unwrap();
        tx.close().unwrap();
        for set in collector.take_all().into_iter().flatten() {
            pool.recycle(set).unwrap();
        }
    }
    let stats = pool.stats();
    assert_eq!(stats.allocated, 2);
    assert_eq!(stats.reused, 4);
}

//==================================================================================
// Configuration
//==================================================================================

#[test]
fn test_configured_provider_follows_delivery_mode() {
    let collector = ChunksCollector::new();
    let config =
        SplayConfig::from_json_str(r#"{"desired_chunk_size": 4, "delivery": "simple"}"#).unwrap();
    let provider =
        ConfiguredProvider::from_config(vec![ColumnKind::Int], Arc::new(collector.clone()), &config)
            .unwrap();
    let mut tx = provider.begin_transaction().unwrap();
    append_ints(&mut tx, &[3]);
    tx.commit().unwrap();
    drop(tx);
    assert_eq!(collector.delivery_count(), 1);

    let config = SplayConfig::from_json_str(r#"{"delivery": "buffered"}"#).unwrap();
    let provider =
        ConfiguredProvider::from_config(vec![ColumnKind::Int], Arc::new(collector.clone()), &config)
            .unwrap();
    let mut tx = provider.begin_transaction().unwrap();
    append_ints(&mut tx, &[4]);
    tx.commit().unwrap();
    drop(tx);
    assert_eq!(collector.delivery_count(), 1);
    provider.flush().unwrap();
    assert_eq!(collector.delivery_count(), 2);
}

//==================================================================================
// Properties
//==================================================================================

proptest! {
    /// Any take on either unlocked provider leaves room for at least `min` rows.
    #[test]
    fn prop_take_honors_min_size(
        chunk_size in 1usize..16,
        takes in proptest::collection::vec((0usize..24, 0usize..24), 1..16),
    ) {
        let collector = ChunksCollector::new();
        let simple = SimpleProvider::new(vec![ColumnKind::Int], Arc::new(collector.clone()), chunk_size).unwrap();
        let buffered = int_buffered(&collector, chunk_size);
        let mut txs: Vec<Box<dyn Transaction>> = vec![
            Box::new(simple.begin_transaction().unwrap()),
            Box::new(buffered.begin_transaction().unwrap()),
        ];
        for tx in txs.iter_mut() {
            for &(min, write) in &takes {
                let chunks = tx.take(min).unwrap();
                prop_assert!(chunks.remaining() >= min);
                let n = write.min(min);
                let id = chunks.id();
                let values: Vec<i32> = (0..n as i32).collect();
                chunks.out_mut()[0].extend_from_slice(&values).unwrap();
                tx.complete(id, n).unwrap();
            }
        }
    }

    /// Committed rows reach the sink exactly once and in append order.
    #[test]
    fn prop_committed_rows_delivered_in_order(
        chunk_size in 1usize..8,
        batches in proptest::collection::vec(proptest::collection::vec(any::<i32>(), 0..6), 1..12),
    ) {
        let collector = ChunksCollector::new();
        let provider = SimpleProvider::new(vec![ColumnKind::Int], Arc::new(collector.clone()), chunk_size).unwrap();
        let mut tx = provider.begin_transaction().unwrap();
        let mut expected = Vec::new();
        for batch in &batches {
            append_ints(&mut tx, batch);
            expected.extend_from_slice(batch);
        }
        tx.commit().unwrap();
        tx.close().unwrap();

        let deliveries = collector.take_all();
        prop_assert!(deliveries.len() <= 1);
        prop_assert_eq!(delivered_ints(&deliveries), expected);
    }
}
