// In: src/config.rs

//! The single source of truth for splay configuration.
//!
//! `SplayConfig` is built once at the application boundary (usually from a JSON
//! document) and handed to the `from_config` constructors of providers and
//! adapters. Every field has a serde default, so `{}` is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::error::SplayError;

//==================================================================================
// I. Core Configuration Enums & Structs
//==================================================================================

/// When committed rows reach the consumer.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Every successful commit is delivered immediately.
    Simple,

    /// **Default:** Commits accumulate in a backlog that is delivered on `flush`.
    #[default]
    Buffered,
}

/// Settings for the locked (multi-threaded) provider.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LockConfig {
    /// Hand the lock directly to the next waiter when a transaction ends.
    pub fair: bool,

    /// How often interruptible waits re-check their interrupt token.
    pub interrupt_poll_micros: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            fair: false,
            interrupt_poll_micros: default_interrupt_poll_micros(),
        }
    }
}

/// Settings for splayers and the one-to-many adapter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SplayOptions {
    /// If set, row splayers see at most this many records per call.
    pub row_limit: Option<usize>,

    /// The largest number of records per `take`. Must divide `max_tx_size`.
    pub max_take_size: usize,

    /// The number of rows after which a transaction is committed.
    pub max_tx_size: usize,
}

impl Default for SplayOptions {
    fn default() -> Self {
        Self {
            row_limit: None,
            max_take_size: default_chunk_size(),
            max_tx_size: default_max_tx_size(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct BatchConfig {
    /// Commit the open batch automatically once it holds this many output rows.
    pub auto_commit_output_rows: Option<usize>,
}

//==================================================================================
// II. The Unified SplayConfig
//==================================================================================

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct SplayConfig {
    /// **The number of rows a provider allocates per buffer set**, unless a
    /// `take` asks for more.
    pub desired_chunk_size: usize,

    pub delivery: DeliveryMode,

    pub lock: LockConfig,

    pub splay: SplayOptions,

    pub batch: BatchConfig,
}

impl Default for SplayConfig {
    fn default() -> Self {
        Self {
            desired_chunk_size: default_chunk_size(),
            delivery: DeliveryMode::default(),
            lock: LockConfig::default(),
            splay: SplayOptions::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl SplayConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, SplayError> {
        let config: SplayConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the numeric invariants the providers and adapters rely on.
    pub fn validate(&self) -> Result<(), SplayError> {
        if self.desired_chunk_size == 0 {
            return Err(invalid("desired_chunk_size must be positive"));
        }
        if self.lock.interrupt_poll_micros == 0 {
            return Err(invalid("lock.interrupt_poll_micros must be positive"));
        }
        if self.splay.row_limit == Some(0) {
            return Err(invalid("splay.row_limit must be positive when set"));
        }
        let (take, tx) = (self.splay.max_take_size, self.splay.max_tx_size);
        if take == 0 || take > tx {
            return Err(invalid(format!(
                "Must have 0 < splay.max_take_size <= splay.max_tx_size, got {} and {}",
                take, tx
            )));
        }
        if tx % take != 0 {
            return Err(invalid(format!(
                "splay.max_tx_size ({}) must be a multiple of splay.max_take_size ({})",
                tx, take
            )));
        }
        if self.batch.auto_commit_output_rows == Some(0) {
            return Err(invalid("batch.auto_commit_output_rows must be positive when set"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> SplayError {
    SplayError::InvalidConfiguration(msg.into())
}

/// Helper for `serde` to provide a default for `desired_chunk_size`.
fn default_chunk_size() -> usize {
    2048
}

fn default_max_tx_size() -> usize {
    65536
}

fn default_interrupt_poll_micros() -> u64 {
    1000
}
