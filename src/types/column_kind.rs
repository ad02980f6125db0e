//! This module defines the canonical, type-safe representation of the physical
//! buffer kinds a splayer can write into.

use crate::error::SplayError;
use arrow_schema::DataType as ArrowDataType;
use serde::{Deserialize, Serialize};
use std::fmt;

//==================================================================================
// 1. Null Sentinels
//==================================================================================
// Primitive columns have no validity bitmap; nullable conversions write these instead.

pub const NULL_BYTE: i8 = i8::MIN;
pub const NULL_CHAR: u16 = u16::MAX;
pub const NULL_SHORT: i16 = i16::MIN;
pub const NULL_INT: i32 = i32::MIN;
pub const NULL_LONG: i64 = i64::MIN;
pub const NULL_FLOAT: f32 = -f32::MAX;
pub const NULL_DOUBLE: f64 = -f64::MAX;

//==================================================================================
// 2. ColumnKind
//==================================================================================

/// The closed set of physical element kinds a [`TypedBuffer`](crate::chunk::TypedBuffer)
/// can hold. Every output column is classified into exactly one of these.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Boolean,
    Byte,
    /// A UTF-16 code unit.
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    /// A shared, type-erased object reference.
    Object,
}

impl ColumnKind {
    pub const ALL: [ColumnKind; 9] = [
        ColumnKind::Boolean,
        ColumnKind::Byte,
        ColumnKind::Char,
        ColumnKind::Short,
        ColumnKind::Int,
        ColumnKind::Long,
        ColumnKind::Float,
        ColumnKind::Double,
        ColumnKind::Object,
    ];

    /// Converts an Arrow `DataType` into a `ColumnKind`.
    ///
    /// Timestamps land in `Long`, matching how instants are splayed (epoch nanos).
    pub fn from_arrow_type(arrow_type: &ArrowDataType) -> Result<Self, SplayError> {
        match arrow_type {
            ArrowDataType::Boolean => Ok(Self::Boolean),
            ArrowDataType::Int8 => Ok(Self::Byte),
            ArrowDataType::UInt16 => Ok(Self::Char),
            ArrowDataType::Int16 => Ok(Self::Short),
            ArrowDataType::Int32 => Ok(Self::Int),
            ArrowDataType::Int64 | ArrowDataType::Timestamp(_, _) => Ok(Self::Long),
            ArrowDataType::Float32 => Ok(Self::Float),
            ArrowDataType::Float64 => Ok(Self::Double),
            ArrowDataType::Utf8 | ArrowDataType::LargeUtf8 => Ok(Self::Object),
            dt => Err(SplayError::UnsupportedType(format!(
                "Cannot convert Arrow type {:?} to ColumnKind",
                dt
            ))),
        }
    }

    /// Converts a `ColumnKind` into the Arrow `DataType` used on export.
    pub fn to_arrow_type(&self) -> ArrowDataType {
        match self {
            Self::Boolean => ArrowDataType::Boolean,
            Self::Byte => ArrowDataType::Int8,
            Self::Char => ArrowDataType::UInt16,
            Self::Short => ArrowDataType::Int16,
            Self::Int => ArrowDataType::Int32,
            Self::Long => ArrowDataType::Int64,
            Self::Float => ArrowDataType::Float32,
            Self::Double => ArrowDataType::Float64,
            Self::Object => ArrowDataType::Utf8,
        }
    }

    /// Returns `true` for every kind except `Object`.
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Self::Object)
    }

    /// Size in bytes of one element, `None` for object references.
    pub fn element_width(&self) -> Option<usize> {
        match self {
            Self::Boolean | Self::Byte => Some(1),
            Self::Char | Self::Short => Some(2),
            Self::Int | Self::Float => Some(4),
            Self::Long | Self::Double => Some(8),
            Self::Object => None,
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
