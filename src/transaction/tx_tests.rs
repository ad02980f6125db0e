// In: src/transaction/tx_tests.rs

use super::*;
use crate::chunk::allocator::make_chunks;
use crate::chunk::HeapAllocator;
use crate::error::ErrorCategory;
use crate::types::ColumnKind;
use proptest::prelude::*;

/// Owns one buffer set and records which hooks ran.
struct RecordingStrategy {
    chunks: WritableChunks,
    calls: Vec<String>,
    fail_commit: bool,
    short_change: bool,
}

impl RecordingStrategy {
    fn new(size: usize) -> Self {
        Self {
            chunks: make_chunks(&HeapAllocator, &[ColumnKind::Int], size).unwrap(),
            calls: Vec::new(),
            fail_commit: false,
            short_change: false,
        }
    }
}

impl TxStrategy for RecordingStrategy {
    fn take_impl(&mut self, min_size: usize) -> Result<&mut WritableChunks, SplayError> {
        self.calls.push(format!("take({})", min_size));
        if self.chunks.remaining() < min_size && !self.short_change {
            return Err(SplayError::invalid_argument("out of room"));
        }
        self.chunks.restamp();
        Ok(&mut self.chunks)
    }

    fn complete_impl(&mut self, _id: ChunksId, out_rows: usize) -> Result<(), SplayError> {
        self.calls.push(format!("complete({})", out_rows));
        self.chunks.advance(out_rows)
    }

    fn commit_impl(&mut self, stats: &TxStats) -> Result<(), SplayError> {
        self.calls.push(format!("commit({})", stats.output_rows));
        if self.fail_commit {
            return Err(SplayError::sink("consumer down"));
        }
        Ok(())
    }

    fn close_impl(&mut self, outcome: &CloseOutcome) -> Result<(), SplayError> {
        self.calls
            .push(format!("close(success={})", outcome.is_successful_commit()));
        Ok(())
    }
}

fn write_ints(chunks: &mut WritableChunks, values: &[i32]) {
    chunks.out_mut()[0].extend_from_slice(values).unwrap();
}

#[test]
fn test_savepoints_need_strategy_support() {
    let mut tx = TxCore::new(RecordingStrategy::new(8), "recording");
    let err = tx.savepoint().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::IllegalState);
    // Refusing a savepoint does not poison the transaction.
    let id = tx.take(1).unwrap().id();
    tx.complete(id, 0).unwrap();
    tx.commit().unwrap();
}

#[test]
fn test_sets_mark_rewinds_list_and_newest_set() {
    let mut sets = vec![make_chunks(&HeapAllocator, &[ColumnKind::Int], 4).unwrap()];
    write_ints(&mut sets[0], &[1, 2]);
    sets[0].advance(2).unwrap();
    let mark = SetsMark::of(&sets);
    assert_eq!(mark.len(), 1);

    sets[0].restamp();
    write_ints(&mut sets[0], &[3]);
    sets[0].advance(1).unwrap();
    sets.push(make_chunks(&HeapAllocator, &[ColumnKind::Int], 4).unwrap());

    let added = mark.rewind(&mut sets);
    assert_eq!(added.len(), 1);
    assert_eq!(sets.len(), 1);
    assert_eq!(SetsMark::of(&sets), mark);
    assert_eq!(sets[0].out()[0].len(), 2);
}

#[test]
fn test_happy_path_runs_hooks_in_order() {
    let mut tx = TxCore::new(RecordingStrategy::new(8), "recording");
    let chunks = tx.take(2).unwrap();
    let id = chunks.id();
    write_ints(chunks, &[1, 2]);
    tx.complete(id, 2).unwrap();
    tx.record_input(1);
    tx.commit().unwrap();
    tx.close().unwrap();

    assert_eq!(
        tx.strategy().calls,
        vec!["take(2)", "complete(2)", "commit(2)", "close(success=true)"]
    );
    assert_eq!(
        tx.stats(),
        TxStats {
            takes: 1,
            input_rows: 1,
            output_rows: 2
        }
    );
}

#[test]
fn test_double_take_is_illegal_state() {
    let mut tx = TxCore::new(RecordingStrategy::new(8), "recording");
    tx.take(1).unwrap();
    let err = tx.take(1).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::IllegalState);
}

#[test]
fn test_complete_with_stale_id_is_illegal_state() {
    let mut tx = TxCore::new(RecordingStrategy::new(8), "recording");
    let stale = tx.take(1).unwrap().id();
    tx.complete(stale, 0).unwrap();
    tx.take(1).unwrap();

    let err = tx.complete(stale, 0).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::IllegalState);
}

#[test]
fn test_complete_without_take_is_illegal_state() {
    let mut tx = TxCore::new(RecordingStrategy::new(8), "recording");
    let id = tx.take(1).unwrap().id();
    tx.complete(id, 0).unwrap();
    assert_eq!(
        tx.complete(id, 0).unwrap_err().category(),
        ErrorCategory::IllegalState
    );
}

#[test]
fn test_commit_with_outstanding_take_is_illegal_state() {
    let mut tx = TxCore::new(RecordingStrategy::new(8), "recording");
    tx.take(1).unwrap();
    assert_eq!(tx.commit().unwrap_err().category(), ErrorCategory::IllegalState);
}

#[test]
fn test_operations_after_commit_or_close_fail() {
    let mut tx = TxCore::new(RecordingStrategy::new(8), "recording");
    tx.commit().unwrap();
    assert_eq!(tx.take(1).unwrap_err().category(), ErrorCategory::IllegalState);
    assert_eq!(tx.commit().unwrap_err().category(), ErrorCategory::IllegalState);
    tx.close().unwrap();
    assert!(tx.is_closed());
    assert_eq!(tx.take(0).unwrap_err().category(), ErrorCategory::IllegalState);
}

#[test]
fn test_close_is_idempotent() {
    let mut tx = TxCore::new(RecordingStrategy::new(8), "recording");
    tx.close().unwrap();
    tx.close().unwrap();
    let closes = tx
        .strategy()
        .calls
        .iter()
        .filter(|c| c.starts_with("close"))
        .count();
    assert_eq!(closes, 1);
}

#[test]
fn test_failed_complete_poisons_transaction_and_rolls_back() {
    let mut tx = TxCore::new(RecordingStrategy::new(4), "recording");
    let id = tx.take(1).unwrap().id();
    // Nothing written but one row claimed.
    let err = tx.complete(id, 1).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::IllegalState);
    assert!(tx.failures().complete.is_some());

    assert_eq!(tx.take(1).unwrap_err().category(), ErrorCategory::IllegalState);
    assert_eq!(tx.commit().unwrap_err().category(), ErrorCategory::IllegalState);
    tx.close().unwrap();
    assert_eq!(tx.strategy().calls.last().unwrap(), "close(success=false)");
}

#[test]
fn test_complete_beyond_remaining_is_invalid_argument() {
    let mut tx = TxCore::new(RecordingStrategy::new(2), "recording");
    let id = tx.take(1).unwrap().id();
    let err = tx.complete(id, 3).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvalidArgument);
}

#[test]
fn test_failed_commit_is_not_a_successful_outcome() {
    let mut strategy = RecordingStrategy::new(2);
    strategy.fail_commit = true;
    let mut tx = TxCore::new(strategy, "recording");
    assert!(matches!(tx.commit(), Err(SplayError::Sink { .. })));
    assert!(tx.is_committed());
    tx.close().unwrap();
    assert_eq!(tx.strategy().calls.last().unwrap(), "close(success=false)");
}

#[test]
fn test_short_take_from_strategy_is_caught() {
    let mut strategy = RecordingStrategy::new(1);
    strategy.short_change = true;
    let mut tx = TxCore::new(strategy, "recording");
    let err = tx.take(5).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::IllegalState);
    assert!(tx.failures().take.is_some());
}

#[test]
fn test_boxed_transaction_delegates() {
    let mut tx: Box<dyn Transaction> = Box::new(TxCore::new(RecordingStrategy::new(4), "boxed"));
    let chunks = tx.take(1).unwrap();
    let id = chunks.id();
    write_ints(chunks, &[9]);
    tx.complete(id, 1).unwrap();
    tx.commit().unwrap();
    tx.close().unwrap();
    assert!(tx.is_closed());
    assert_eq!(tx.stats().output_rows, 1);
}

proptest! {
    /// Every completed step advances `pos` by exactly its row count and never past `size`.
    #[test]
    fn prop_complete_advances_pos_monotonically(steps in proptest::collection::vec(0usize..5, 1..20)) {
        let size: usize = steps.iter().sum::<usize>() + 1;
        let mut tx = TxCore::new(RecordingStrategy::new(size), "recording");
        let mut expected_pos = 0;
        for n in steps {
            let chunks = tx.take(n).unwrap();
            prop_assert!(chunks.remaining() >= n);
            prop_assert_eq!(chunks.pos(), expected_pos);
            let id = chunks.id();
            let values: Vec<i32> = (0..n as i32).collect();
            write_ints(chunks, &values);
            tx.complete(id, n).unwrap();
            expected_pos += n;
            prop_assert!(expected_pos <= size);
        }
        prop_assert_eq!(tx.stats().output_rows as usize, expected_pos);
    }
}
