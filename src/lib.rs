//! This file is the root of the `splay_core` Rust crate.
//!
//! The crate turns batches of decoded records into typed column buffers under a
//! transaction protocol: a splayer `take`s a buffer set from a transaction, fills
//! it, `complete`s it, and the transaction's provider delivers committed sets to
//! a consumer sink.
//!
//! Its responsibilities are split as follows:
//! 1.  `chunk`: typed buffers, buffer sets and the allocators behind them.
//! 2.  `transaction`: the shared transaction state machine.
//! 3.  `provider`: the Simple, Buffered, Locked and Batching providers.
//! 4.  `splay`: row splayers and the adapters that drive them into providers.

//==================================================================================
// 0. Constants
//==================================================================================
/// The crate version, automatically set from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[doc(hidden)]
pub use log as __log;

//==================================================================================
// 1. Module Declarations
//==================================================================================
#[macro_use]
mod observability; // Make macros available throughout the crate

pub mod chunk;
pub mod config;
pub mod error;
pub mod provider;
pub mod splay;
pub mod transaction;
pub mod types;

//==================================================================================
// 2. Public Surface
//==================================================================================
pub use chunk::{
    BufferAllocator, Chunks, ChunksId, HeapAllocator, ObjectRef, PooledAllocator, TypedBuffer,
    Value, WritableChunks,
};
pub use config::{DeliveryMode, SplayConfig};
pub use error::{ErrorCategory, SplayError};
pub use observability::init_logging;
pub use provider::{
    BatchingProvider, BufferedProvider, ChunksCollector, ChunksProvider, ChunksSink,
    ConfiguredProvider, Interrupt, LockedProvider, SimpleProvider,
};
pub use splay::{
    row_limit, FunctionSplayer, KeyValueSide, KeyValueSplayer, ObjectSplayer, OneToManyAdapter,
    TransactionSplayer, TypedFunction,
};
pub use transaction::{Savepoint, Transaction, TxStats};
pub use types::{ColumnKind, LogicalType, PrimitiveType};
