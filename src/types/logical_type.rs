//! Logical (schema-level) types and their mapping onto physical column kinds.
//!
//! | LogicalType            | ColumnKind                     |
//! |------------------------|--------------------------------|
//! | Boolean                | Boolean                        |
//! | Byte / Short / Int ... | same-named kind                |
//! | Boxed(p)               | whatever `p` maps to           |
//! | Instant                | Long (epoch nanoseconds)       |
//! | String / Array / Custom| Object                         |

use super::ColumnKind;
use serde::{Deserialize, Serialize};

/// A primitive logical type. Kept separate so `Boxed` cannot nest.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogicalType {
    Primitive { of: PrimitiveType },
    /// A nullable primitive; nulls are written as the kind's sentinel.
    Boxed { of: PrimitiveType },
    String,
    Instant,
    Array { component: Box<LogicalType> },
    Custom { name: String },
}

impl LogicalType {
    pub fn boolean() -> Self {
        LogicalType::Primitive { of: PrimitiveType::Boolean }
    }
    pub fn byte() -> Self {
        LogicalType::Primitive { of: PrimitiveType::Byte }
    }
    pub fn char() -> Self {
        LogicalType::Primitive { of: PrimitiveType::Char }
    }
    pub fn short() -> Self {
        LogicalType::Primitive { of: PrimitiveType::Short }
    }
    pub fn int() -> Self {
        LogicalType::Primitive { of: PrimitiveType::Int }
    }
    pub fn long() -> Self {
        LogicalType::Primitive { of: PrimitiveType::Long }
    }
    pub fn float() -> Self {
        LogicalType::Primitive { of: PrimitiveType::Float }
    }
    pub fn double() -> Self {
        LogicalType::Primitive { of: PrimitiveType::Double }
    }
}

impl PrimitiveType {
    pub fn column_kind(&self) -> ColumnKind {
        match self {
            PrimitiveType::Boolean => ColumnKind::Boolean,
            PrimitiveType::Byte => ColumnKind::Byte,
            PrimitiveType::Char => ColumnKind::Char,
            PrimitiveType::Short => ColumnKind::Short,
            PrimitiveType::Int => ColumnKind::Int,
            PrimitiveType::Long => ColumnKind::Long,
            PrimitiveType::Float => ColumnKind::Float,
            PrimitiveType::Double => ColumnKind::Double,
        }
    }
}

impl ColumnKind {
    /// The pure lookup from a logical type to the buffer kind it is splayed into.
    pub fn of(logical: &LogicalType) -> ColumnKind {
        match logical {
            LogicalType::Primitive { of } | LogicalType::Boxed { of } => of.column_kind(),
            LogicalType::Instant => ColumnKind::Long,
            LogicalType::String | LogicalType::Array { .. } | LogicalType::Custom { .. } => {
                ColumnKind::Object
            }
        }
    }
}

/// Maps an ordered list of logical types onto their column kinds.
pub fn column_kinds(logical: &[LogicalType]) -> Vec<ColumnKind> {
    logical.iter().map(ColumnKind::of).collect()
}
