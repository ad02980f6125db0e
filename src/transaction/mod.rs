// In: src/transaction/mod.rs

// ====================================================================================
// ARCHITECTURAL OVERVIEW: The Transaction Protocol
// ====================================================================================
//
// A writer never allocates output buffers itself. It opens a transaction against a
// provider and loops:
//
//   1. take(min)            -> &mut WritableChunks with at least `min` rows of room
//   2. write rows into every column of the set
//   3. complete(id, n)      -> n rows (0..=min) are now part of the transaction
//
// and finally `commit()` then `close()`. A transaction that is closed without a clean
// commit rolls back: nothing it produced is ever observed by the consumer. `close()`
// is also where the provider gets its shared state (or its lock) back.
//
// Providers that keep their sets in one ordered list also support savepoints: a
// `rollback_to` discards only the work done after the mark and leaves the
// transaction open.
//
// The protocol checks (one outstanding take, no use after commit/close/failure) live
// once in `TxCore`. Providers only supply a `TxStrategy` with four hooks.
//
// ====================================================================================

pub mod checkout;
#[cfg(test)]
mod tx_tests;

use crate::chunk::{ChunksId, WritableChunks};
use crate::error::SplayError;

pub use checkout::{Checkout, Retire};

//==================================================================================
// 1. Public Contract
//==================================================================================

pub trait Transaction {
    /// Returns a buffer set with at least `min_size` rows of remaining capacity.
    ///
    /// Only one take may be outstanding; it must be completed before the next take
    /// or before `commit`.
    fn take(&mut self, min_size: usize) -> Result<&mut WritableChunks, SplayError>;

    /// Records that `out_rows` rows were written into the outstanding set `id`.
    /// Every column of the set must have grown by exactly `out_rows`.
    fn complete(&mut self, id: ChunksId, out_rows: usize) -> Result<(), SplayError>;

    /// Makes everything completed so far eligible for delivery.
    fn commit(&mut self) -> Result<(), SplayError>;

    /// Ends the transaction, rolling back unless it was cleanly committed.
    /// Idempotent.
    fn close(&mut self) -> Result<(), SplayError>;

    fn is_closed(&self) -> bool;

    /// Counts input records consumed, for statistics only.
    fn record_input(&mut self, rows: usize);

    fn stats(&self) -> TxStats;

    /// Marks the current position. Fails while a take is outstanding, after a
    /// failure, or when the provider cannot roll back partially.
    fn savepoint(&self) -> Result<Savepoint, SplayError>;

    /// Discards everything taken or completed since `savepoint`, an outstanding
    /// take included, and forgets the failures of that work. The transaction stays
    /// open.
    fn rollback_to(&mut self, savepoint: Savepoint) -> Result<(), SplayError>;
}

impl<T: Transaction + ?Sized> Transaction for Box<T> {
    fn take(&mut self, min_size: usize) -> Result<&mut WritableChunks, SplayError> {
        (**self).take(min_size)
    }
    fn complete(&mut self, id: ChunksId, out_rows: usize) -> Result<(), SplayError> {
        (**self).complete(id, out_rows)
    }
    fn commit(&mut self) -> Result<(), SplayError> {
        (**self).commit()
    }
    fn close(&mut self) -> Result<(), SplayError> {
        (**self).close()
    }
    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }
    fn record_input(&mut self, rows: usize) {
        (**self).record_input(rows)
    }
    fn stats(&self) -> TxStats {
        (**self).stats()
    }
    fn savepoint(&self) -> Result<Savepoint, SplayError> {
        (**self).savepoint()
    }
    fn rollback_to(&mut self, savepoint: Savepoint) -> Result<(), SplayError> {
        (**self).rollback_to(savepoint)
    }
}

/// Per-transaction counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TxStats {
    pub takes: u64,
    pub input_rows: u64,
    pub output_rows: u64,
}

/// Where a list of sets stood: how many there were, and the newest one's id and
/// fill. Rewinding to it truncates the list and restores the newest set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetsMark {
    len: usize,
    newest: Option<(ChunksId, usize)>,
}

impl SetsMark {
    pub fn of(sets: &[WritableChunks]) -> Self {
        Self::new(sets.len(), sets.last())
    }

    /// A list of `len` sets ending in `newest`.
    pub(crate) fn new(len: usize, newest: Option<&WritableChunks>) -> Self {
        Self {
            len,
            newest: newest.map(|c| (c.id(), c.pos())),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Restores `sets` to this mark and returns the sets added since, oldest first.
    pub(crate) fn rewind(self, sets: &mut Vec<WritableChunks>) -> Vec<WritableChunks> {
        let added = sets.split_off(self.len.min(sets.len()));
        if let (Some((id, pos)), Some(newest)) = (self.newest, sets.last_mut()) {
            newest.rewind(id, pos);
        }
        added
    }
}

/// A point inside an open transaction, from [`Transaction::savepoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint {
    mark: SetsMark,
    stats: TxStats,
}

impl Savepoint {
    pub fn stats(&self) -> TxStats {
        self.stats
    }
}

/// The first failure seen in each phase, as text.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PhaseFailures {
    pub take: Option<String>,
    pub complete: Option<String>,
    pub commit: Option<String>,
    pub rollback: Option<String>,
}

impl PhaseFailures {
    pub fn is_empty(&self) -> bool {
        self.first().is_none()
    }

    fn first(&self) -> Option<(&'static str, &str)> {
        self.take
            .as_deref()
            .map(|m| ("take", m))
            .or_else(|| self.complete.as_deref().map(|m| ("complete", m)))
            .or_else(|| self.commit.as_deref().map(|m| ("commit", m)))
            .or_else(|| self.rollback.as_deref().map(|m| ("rollback", m)))
    }
}

/// Everything a strategy needs to decide between keeping and discarding on close.
#[derive(Debug, Clone)]
pub struct CloseOutcome {
    pub committed: bool,
    pub outstanding: Option<ChunksId>,
    pub failures: PhaseFailures,
    pub stats: TxStats,
}

impl CloseOutcome {
    /// Committed, nothing outstanding and no phase ever failed.
    pub fn is_successful_commit(&self) -> bool {
        self.committed && self.outstanding.is_none() && self.failures.is_empty()
    }
}

//==================================================================================
// 2. Provider Hooks
//==================================================================================

/// What a provider plugs into [`TxCore`]. Hooks are only called once the protocol
/// checks have passed.
pub trait TxStrategy {
    /// Must return a set with `remaining() >= min_size`, freshly stamped.
    fn take_impl(&mut self, min_size: usize) -> Result<&mut WritableChunks, SplayError>;

    fn complete_impl(&mut self, id: ChunksId, out_rows: usize) -> Result<(), SplayError>;

    fn commit_impl(&mut self, stats: &TxStats) -> Result<(), SplayError>;

    /// Keeps or discards the transaction's work, then gives back any shared state
    /// the strategy holds. Called exactly once.
    fn close_impl(&mut self, outcome: &CloseOutcome) -> Result<(), SplayError>;

    /// The current position, if this strategy can rewind to it.
    fn savepoint_impl(&self) -> Option<SetsMark> {
        None
    }

    fn rollback_to_impl(&mut self, _mark: SetsMark) -> Result<(), SplayError> {
        Err(SplayError::illegal_state("Savepoints are not supported"))
    }
}

//==================================================================================
// 3. TxCore: the shared state machine
//==================================================================================

pub struct TxCore<S: TxStrategy> {
    strategy: S,
    label: &'static str,
    outstanding: Option<ChunksId>,
    committed: bool,
    closed: bool,
    failures: PhaseFailures,
    stats: TxStats,
}

impl<S: TxStrategy> TxCore<S> {
    pub fn new(strategy: S, label: &'static str) -> Self {
        log::trace!("Opened {} transaction", label);
        Self {
            strategy,
            label,
            outstanding: None,
            committed: false,
            closed: false,
            failures: PhaseFailures::default(),
            stats: TxStats::default(),
        }
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn failures(&self) -> &PhaseFailures {
        &self.failures
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    fn ensure_usable(&self, op: &str) -> Result<(), SplayError> {
        if self.closed {
            return Err(SplayError::illegal_state(format!(
                "Cannot {} on a closed transaction",
                op
            )));
        }
        if self.committed {
            return Err(SplayError::illegal_state(format!(
                "Cannot {} on a committed transaction",
                op
            )));
        }
        if let Some((phase, msg)) = self.failures.first() {
            return Err(SplayError::illegal_state(format!(
                "Cannot {} after {} failed: {}",
                op, phase, msg
            )));
        }
        Ok(())
    }
}

impl<S: TxStrategy> Transaction for TxCore<S> {
    fn take(&mut self, min_size: usize) -> Result<&mut WritableChunks, SplayError> {
        self.ensure_usable("take")?;
        if let Some(id) = self.outstanding {
            return Err(SplayError::illegal_state(format!(
                "Chunks {:?} are still outstanding, complete them before taking again",
                id
            )));
        }
        match self.strategy.take_impl(min_size) {
            Ok(chunks) if chunks.remaining() >= min_size => {
                self.outstanding = Some(chunks.id());
                self.stats.takes += 1;
                Ok(chunks)
            }
            Ok(chunks) => {
                let err = SplayError::illegal_state(format!(
                    "Provider returned chunks with {} rows remaining, {} requested",
                    chunks.remaining(),
                    min_size
                ));
                self.failures.take = Some(err.to_string());
                Err(err)
            }
            Err(err) => {
                self.failures.take = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn complete(&mut self, id: ChunksId, out_rows: usize) -> Result<(), SplayError> {
        self.ensure_usable("complete")?;
        match self.outstanding {
            Some(outstanding) if outstanding == id => {}
            Some(outstanding) => {
                return Err(SplayError::illegal_state(format!(
                    "Completing {:?} but {:?} is outstanding",
                    id, outstanding
                )))
            }
            None => {
                return Err(SplayError::illegal_state(format!(
                    "Completing {:?} but no chunks are outstanding",
                    id
                )))
            }
        }
        let result = self.strategy.complete_impl(id, out_rows);
        self.outstanding = None;
        match result {
            Ok(()) => {
                self.stats.output_rows += out_rows as u64;
                Ok(())
            }
            Err(err) => {
                self.failures.complete = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn commit(&mut self) -> Result<(), SplayError> {
        self.ensure_usable("commit")?;
        if let Some(id) = self.outstanding {
            return Err(SplayError::illegal_state(format!(
                "Cannot commit while {:?} is outstanding",
                id
            )));
        }
        let result = self.strategy.commit_impl(&self.stats);
        self.committed = true;
        if let Err(err) = &result {
            self.failures.commit = Some(err.to_string());
        }
        result
    }

    fn close(&mut self) -> Result<(), SplayError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let outcome = CloseOutcome {
            committed: self.committed,
            outstanding: self.outstanding.take(),
            failures: self.failures.clone(),
            stats: self.stats,
        };
        let result = self.strategy.close_impl(&outcome);
        if outcome.is_successful_commit() {
            log::debug!(
                "Closed {} transaction: committed {} rows in {} takes",
                self.label,
                self.stats.output_rows,
                self.stats.takes
            );
            log_metric!(
                "event"="tx_committed",
                "provider"=self.label,
                "output_rows"=self.stats.output_rows,
                "input_rows"=self.stats.input_rows
            );
        } else {
            log::debug!(
                "Closed {} transaction without a clean commit, rolled back {} rows",
                self.label,
                self.stats.output_rows
            );
            log_metric!(
                "event"="tx_rolled_back",
                "provider"=self.label,
                "output_rows"=self.stats.output_rows
            );
        }
        result
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn record_input(&mut self, rows: usize) {
        self.stats.input_rows += rows as u64;
    }

    fn stats(&self) -> TxStats {
        self.stats
    }

    fn savepoint(&self) -> Result<Savepoint, SplayError> {
        self.ensure_usable("savepoint")?;
        if let Some(id) = self.outstanding {
            return Err(SplayError::illegal_state(format!(
                "Cannot mark a savepoint while {:?} is outstanding",
                id
            )));
        }
        match self.strategy.savepoint_impl() {
            Some(mark) => Ok(Savepoint {
                mark,
                stats: self.stats,
            }),
            None => Err(SplayError::illegal_state(format!(
                "{} transactions do not support savepoints",
                self.label
            ))),
        }
    }

    fn rollback_to(&mut self, savepoint: Savepoint) -> Result<(), SplayError> {
        if self.closed || self.committed {
            return Err(SplayError::illegal_state(
                "Cannot roll back to a savepoint once the transaction is committed or closed",
            ));
        }
        if let Err(err) = self.strategy.rollback_to_impl(savepoint.mark) {
            self.failures.rollback = Some(err.to_string());
            return Err(err);
        }
        log::trace!(
            "Rolled {} transaction back to a savepoint, dropping {} rows",
            self.label,
            self.stats.output_rows.saturating_sub(savepoint.stats.output_rows)
        );
        // A savepoint is only handed out while nothing has failed.
        self.outstanding = None;
        self.failures = PhaseFailures::default();
        self.stats = savepoint.stats;
        Ok(())
    }
}

impl<S: TxStrategy> Drop for TxCore<S> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                log::warn!("Closing dropped {} transaction failed: {}", self.label, e);
            }
        }
    }
}
