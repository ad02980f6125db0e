//! This module defines the core, strongly-typed descriptors used throughout the
//! splay pipeline.
//!
//! It includes the physical `ColumnKind` enum every output buffer is classified
//! into, and the `LogicalType` tree upstream decoders describe their fields with.

pub mod column_kind;
pub mod logical_type;

// Re-export the main type(s) for easier access.
pub use column_kind::{
    ColumnKind, NULL_BYTE, NULL_CHAR, NULL_DOUBLE, NULL_FLOAT, NULL_INT, NULL_LONG, NULL_SHORT,
};
pub use logical_type::{column_kinds, LogicalType, PrimitiveType};
