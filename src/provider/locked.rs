// In: src/provider/locked.rs

//! The thread-safe buffered provider.
//!
//! A transaction owns an `ArcMutexGuard` over the backlog from begin until close,
//! so concurrent writers are serialized at `begin_transaction` and `flush`. Both
//! come in blocking, interruptible, try-once and timed forms. A failed or
//! interrupted acquisition never touches the backlog.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

use super::buffered::{BacklogStats, BufferedState, BufferedStrategy};
use super::{ChunksProvider, ChunksSink};
use crate::chunk::{BufferAllocator, ChunksId, HeapAllocator};
use crate::config::SplayConfig;
use crate::error::SplayError;
use crate::transaction::TxCore;
use crate::types::ColumnKind;

const DEFAULT_INTERRUPT_POLL: Duration = Duration::from_millis(1);

//==================================================================================
// 1. Interrupt Token
//==================================================================================

/// A shareable cancellation flag for interruptible lock acquisition.
///
/// Once set it stays set until [`clear`](Interrupt::clear) is called.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call is the one that set the flag.
    pub fn interrupt(&self) -> bool {
        self.flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

//==================================================================================
// 2. Owned Guard
//==================================================================================

type StateGuard = ArcMutexGuard<RawMutex, BufferedState>;

/// The backlog handle a locked transaction owns. Unlocks (fairly, if configured)
/// when dropped.
pub struct LockedState {
    guard: Option<StateGuard>,
    fair: bool,
}

impl Deref for LockedState {
    type Target = BufferedState;

    fn deref(&self) -> &BufferedState {
        match &self.guard {
            Some(guard) => guard,
            None => unreachable!("guard is only taken on drop"),
        }
    }
}

impl DerefMut for LockedState {
    fn deref_mut(&mut self) -> &mut BufferedState {
        match &mut self.guard {
            Some(guard) => guard,
            None => unreachable!("guard is only taken on drop"),
        }
    }
}

impl Drop for LockedState {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            if self.fair {
                ArcMutexGuard::unlock_fair(guard);
            } else {
                drop(guard);
            }
        }
    }
}

//==================================================================================
// 3. LockedProvider
//==================================================================================

pub type LockedTransaction = TxCore<BufferedStrategy<LockedState>>;

pub struct LockedProvider {
    chunk_types: Vec<ColumnKind>,
    state: Arc<Mutex<BufferedState>>,
    closed: AtomicBool,
    fair: bool,
    interrupt_poll: Duration,
}

impl LockedProvider {
    pub fn new(
        chunk_types: Vec<ColumnKind>,
        sink: Arc<dyn ChunksSink>,
        desired_chunk_size: usize,
    ) -> Result<Self, SplayError> {
        Self::with_options(
            chunk_types,
            sink,
            desired_chunk_size,
            Arc::new(HeapAllocator),
            false,
            DEFAULT_INTERRUPT_POLL,
        )
    }

    pub fn with_options(
        chunk_types: Vec<ColumnKind>,
        sink: Arc<dyn ChunksSink>,
        desired_chunk_size: usize,
        allocator: Arc<dyn BufferAllocator>,
        fair: bool,
        interrupt_poll: Duration,
    ) -> Result<Self, SplayError> {
        if interrupt_poll.is_zero() {
            return Err(SplayError::invalid_argument(
                "interrupt poll interval must be positive",
            ));
        }
        let state = BufferedState::new(chunk_types.clone(), sink, allocator, desired_chunk_size)?;
        Ok(Self {
            chunk_types,
            state: Arc::new(Mutex::new(state)),
            closed: AtomicBool::new(false),
            fair,
            interrupt_poll,
        })
    }

    pub fn from_config(
        chunk_types: Vec<ColumnKind>,
        sink: Arc<dyn ChunksSink>,
        config: &SplayConfig,
    ) -> Result<Self, SplayError> {
        Self::with_options(
            chunk_types,
            sink,
            config.desired_chunk_size,
            Arc::new(HeapAllocator),
            config.lock.fair,
            Duration::from_micros(config.lock.interrupt_poll_micros),
        )
    }

    // --- Acquisition -------------------------------------------------------------

    fn ensure_open(&self) -> Result<(), SplayError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SplayError::illegal_state("Locked provider is closed"));
        }
        Ok(())
    }

    fn wrap(&self, guard: StateGuard) -> Result<LockedState, SplayError> {
        let state = LockedState {
            guard: Some(guard),
            fair: self.fair,
        };
        // Checked again under the lock: close may have won the race.
        if state.closed {
            return Err(SplayError::illegal_state("Locked provider is closed"));
        }
        Ok(state)
    }

    fn acquire(&self) -> Result<LockedState, SplayError> {
        self.ensure_open()?;
        self.wrap(self.state.lock_arc())
    }

    fn acquire_interruptibly(&self, interrupt: &Interrupt) -> Result<LockedState, SplayError> {
        loop {
            if interrupt.is_interrupted() {
                return Err(SplayError::Interrupted);
            }
            self.ensure_open()?;
            if let Some(guard) = self.state.try_lock_arc_for(self.interrupt_poll) {
                return self.wrap(guard);
            }
        }
    }

    fn try_acquire(&self) -> Result<Option<LockedState>, SplayError> {
        self.ensure_open()?;
        self.state.try_lock_arc().map(|g| self.wrap(g)).transpose()
    }

    fn try_acquire_for(&self, timeout: Duration) -> Result<Option<LockedState>, SplayError> {
        self.ensure_open()?;
        self.state
            .try_lock_arc_for(timeout)
            .map(|g| self.wrap(g))
            .transpose()
    }

    fn transaction(state: LockedState) -> LockedTransaction {
        TxCore::new(BufferedStrategy::new(state), "locked")
    }

    // --- Transactions ------------------------------------------------------------

    pub fn begin_transaction_interruptibly(
        &self,
        interrupt: &Interrupt,
    ) -> Result<LockedTransaction, SplayError> {
        self.acquire_interruptibly(interrupt).map(Self::transaction)
    }

    /// Opens a transaction only if the lock is free right now.
    pub fn try_begin_transaction(&self) -> Result<Option<LockedTransaction>, SplayError> {
        Ok(self.try_acquire()?.map(Self::transaction))
    }

    pub fn try_begin_transaction_for(
        &self,
        timeout: Duration,
    ) -> Result<Option<LockedTransaction>, SplayError> {
        Ok(self.try_acquire_for(timeout)?.map(Self::transaction))
    }

    // --- Flush -------------------------------------------------------------------

    pub fn flush(&self) -> Result<(), SplayError> {
        self.acquire()?.flush().map(|_| ())
    }

    pub fn flush_interruptibly(&self, interrupt: &Interrupt) -> Result<(), SplayError> {
        self.acquire_interruptibly(interrupt)?.flush().map(|_| ())
    }

    /// Flushes only if the lock is free right now. `Ok(false)` means nothing was done.
    pub fn try_flush(&self) -> Result<bool, SplayError> {
        match self.try_acquire()? {
            Some(mut state) => state.flush().map(|_| true),
            None => Ok(false),
        }
    }

    pub fn try_flush_for(&self, timeout: Duration) -> Result<bool, SplayError> {
        match self.try_acquire_for(timeout)? {
            Some(mut state) => state.flush().map(|_| true),
            None => Ok(false),
        }
    }

    // --- Introspection -----------------------------------------------------------

    pub fn backlog_rows(&self) -> Result<usize, SplayError> {
        Ok(self.acquire()?.backlog_rows())
    }

    pub fn backlog_snapshot(&self) -> Result<Vec<(ChunksId, usize)>, SplayError> {
        Ok(self.acquire()?.backlog_snapshot())
    }

    pub fn stats(&self) -> Result<BacklogStats, SplayError> {
        Ok(self.acquire()?.stats())
    }
}

impl ChunksProvider for LockedProvider {
    type Tx = LockedTransaction;

    fn chunk_types(&self) -> &[ColumnKind] {
        &self.chunk_types
    }

    /// Blocks until no other transaction or flush holds the backlog.
    fn begin_transaction(&self) -> Result<Self::Tx, SplayError> {
        self.acquire().map(Self::transaction)
    }

    /// Waits for any open transaction, then releases the backlog. Idempotent.
    fn close(&self) -> Result<(), SplayError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        self.closed.store(true, Ordering::Release);
        let released = state.release_backlog();
        state.allocator().trim();
        released
    }
}
