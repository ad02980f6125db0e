// In: src/chunk/arrow_impl.rs

//! Marshalling between [`TypedBuffer`]s and Arrow arrays.
//!
//! Primitive columns carry no validity bitmap: sentinel nulls are exported as-is.
//! Object columns export to `Utf8` only when every value is a string (or `None`).

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Float32Array, Float64Array, Int16Array, Int32Array,
    Int64Array, Int8Array, StringArray, UInt16Array,
};
use arrow::datatypes::{DataType, Int64Type};

use super::typed_buffer::{ObjectRef, TypedBuffer};
use crate::error::SplayError;
use crate::types::ColumnKind;

/// Copies the written prefix of `buffer` into a new Arrow array.
pub fn buffer_to_array(buffer: &TypedBuffer) -> Result<ArrayRef, SplayError> {
    macro_rules! export_primitive {
        ($t:ty, $array:ty) => {{
            let values = buffer.values::<$t>().unwrap_or_default();
            Arc::new(<$array>::from(values.to_vec())) as ArrayRef
        }};
    }

    let array = match buffer.kind() {
        ColumnKind::Boolean => export_primitive!(bool, BooleanArray),
        ColumnKind::Byte => export_primitive!(i8, Int8Array),
        ColumnKind::Char => export_primitive!(u16, UInt16Array),
        ColumnKind::Short => export_primitive!(i16, Int16Array),
        ColumnKind::Int => export_primitive!(i32, Int32Array),
        ColumnKind::Long => export_primitive!(i64, Int64Array),
        ColumnKind::Float => export_primitive!(f32, Float32Array),
        ColumnKind::Double => export_primitive!(f64, Float64Array),
        ColumnKind::Object => {
            let objects = buffer.values::<Option<ObjectRef>>().unwrap_or_default();
            let strings = objects
                .iter()
                .map(|value| match value {
                    None => Ok(None),
                    Some(obj) => obj.as_str().map(Some).ok_or_else(|| {
                        SplayError::UnsupportedType(format!(
                            "Object column holds non-string value {:?}",
                            obj
                        ))
                    }),
                })
                .collect::<Result<Vec<Option<&str>>, SplayError>>()?;
            Arc::new(StringArray::from(strings)) as ArrayRef
        }
    };
    Ok(array)
}

/// Builds a full buffer (capacity == length) from an Arrow array.
///
/// Nulls in primitive arrays become the kind's sentinel only for `Int64`/timestamps,
/// which is how instants are splayed; other nullable primitives are rejected.
pub fn array_to_buffer(array: &dyn Array) -> Result<TypedBuffer, SplayError> {
    let kind = ColumnKind::from_arrow_type(array.data_type())?;
    let mut buffer = TypedBuffer::new(kind, array.len());

    macro_rules! import_primitive {
        ($arrow_ty:ty) => {{
            if array.null_count() > 0 {
                return Err(SplayError::UnsupportedType(format!(
                    "Nullable {} arrays have no sentinel mapping",
                    array.data_type()
                )));
            }
            let typed = array.as_primitive::<$arrow_ty>();
            buffer.extend(typed.values().iter().copied())?;
        }};
    }

    match array.data_type() {
        DataType::Boolean => {
            let bools = array.as_boolean();
            if bools.null_count() > 0 {
                return Err(SplayError::UnsupportedType(
                    "Nullable boolean arrays have no sentinel mapping".to_string(),
                ));
            }
            buffer.extend(bools.values().iter().collect::<Vec<bool>>())?;
        }
        DataType::Int8 => import_primitive!(arrow::datatypes::Int8Type),
        DataType::UInt16 => import_primitive!(arrow::datatypes::UInt16Type),
        DataType::Int16 => import_primitive!(arrow::datatypes::Int16Type),
        DataType::Int32 => import_primitive!(arrow::datatypes::Int32Type),
        DataType::Float32 => import_primitive!(arrow::datatypes::Float32Type),
        DataType::Float64 => import_primitive!(arrow::datatypes::Float64Type),
        DataType::Int64 | DataType::Timestamp(_, _) => {
            let longs = arrow::compute::cast(array, &DataType::Int64)?;
            let longs = longs.as_primitive::<Int64Type>();
            buffer.extend(
                longs
                    .iter()
                    .map(|v| v.unwrap_or(crate::types::NULL_LONG))
                    .collect::<Vec<_>>(),
            )?;
        }
        DataType::Utf8 => {
            let strings = array.as_string::<i32>();
            buffer.extend(
                strings
                    .iter()
                    .map(|v| v.map(ObjectRef::from))
                    .collect::<Vec<_>>(),
            )?;
        }
        DataType::LargeUtf8 => {
            let strings = array.as_string::<i64>();
            buffer.extend(
                strings
                    .iter()
                    .map(|v| v.map(ObjectRef::from))
                    .collect::<Vec<_>>(),
            )?;
        }
        dt => {
            return Err(SplayError::UnsupportedType(format!(
                "Unsupported type: {}",
                dt
            )))
        }
    }
    Ok(buffer)
}
