// In: src/transaction/checkout.rs

//! Exclusive, non-blocking hand-out of a provider's mutable state.
//!
//! An unlocked provider keeps its state in a [`Slot`]. Opening a transaction moves
//! the state out into a [`Checkout`] the transaction owns until it closes; dropping
//! the checkout puts it back. If the provider was closed in the meantime, the state is retired
//! instead of returned. A second open while the state is out is an `IllegalState`.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::SplayError;

/// Final cleanup for provider state that will never be used again.
pub trait Retire {
    fn retire(self) -> Result<(), SplayError>;
}

struct SlotState<T> {
    value: Option<T>,
    closed: bool,
}

pub struct Slot<T: Retire> {
    state: Arc<Mutex<SlotState<T>>>,
    what: &'static str,
}

impl<T: Retire> Slot<T> {
    pub fn new(value: T, what: &'static str) -> Self {
        Self {
            state: Arc::new(Mutex::new(SlotState {
                value: Some(value),
                closed: false,
            })),
            what,
        }
    }

    pub fn checkout(&self) -> Result<Checkout<T>, SplayError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SplayError::illegal_state(format!("{} is closed", self.what)));
        }
        match state.value.take() {
            Some(value) => Ok(Checkout {
                value: Some(value),
                home: Arc::clone(&self.state),
                what: self.what,
            }),
            None => Err(SplayError::illegal_state(format!(
                "{} already has an open transaction",
                self.what
            ))),
        }
    }

    /// Runs `f` against the state in place. Fails while a transaction holds it.
    pub fn with<R, F>(&self, f: F) -> Result<R, SplayError>
    where
        F: FnOnce(&mut T) -> Result<R, SplayError>,
    {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SplayError::illegal_state(format!("{} is closed", self.what)));
        }
        match state.value.as_mut() {
            Some(value) => f(value),
            None => Err(SplayError::illegal_state(format!(
                "{} has an open transaction",
                self.what
            ))),
        }
    }

    /// Marks the slot closed and retires the state if it is home. A checked-out state
    /// is retired when its checkout drops. Idempotent.
    pub fn close(&self) -> Result<(), SplayError> {
        let value = {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.value.take()
        };
        match value {
            Some(value) => value.retire(),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

pub struct Checkout<T: Retire> {
    value: Option<T>,
    home: Arc<Mutex<SlotState<T>>>,
    what: &'static str,
}

impl<T: Retire> Deref for Checkout<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.value {
            Some(value) => value,
            None => unreachable!("checked-out state is only taken on drop"),
        }
    }
}

impl<T: Retire> DerefMut for Checkout<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.value {
            Some(value) => value,
            None => unreachable!("checked-out state is only taken on drop"),
        }
    }
}

impl<T: Retire> Drop for Checkout<T> {
    fn drop(&mut self) {
        let Some(value) = self.value.take() else {
            return;
        };
        let orphan = {
            let mut home = self.home.lock();
            if home.closed {
                Some(value)
            } else {
                home.value = Some(value);
                None
            }
        };
        if let Some(value) = orphan {
            if let Err(e) = value.retire() {
                log::warn!("Retiring state of closed {} failed: {}", self.what, e);
            }
        }
    }
}
