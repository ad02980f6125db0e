// In: src/splay/function.rs

//! A splayer assembled from one typed conversion function per output column.
//!
//! Conversions run column by column: each function is applied to the whole input
//! slice and the results are appended in one go. Nullable ("boxed") primitives
//! write the kind's null sentinel; instants are stored as epoch nanoseconds.

use chrono::{DateTime, Utc};

use super::{check_columns, ObjectSplayer};
use crate::chunk::{ObjectRef, TypedBuffer};
use crate::error::SplayError;
use crate::types::{
    column_kinds, ColumnKind, LogicalType, PrimitiveType, NULL_BYTE, NULL_CHAR, NULL_DOUBLE,
    NULL_FLOAT, NULL_INT, NULL_LONG, NULL_SHORT,
};

type Getter<T, R> = Box<dyn Fn(&T) -> Result<R, SplayError> + Send + Sync>;

enum Appender<T> {
    Boolean(Getter<T, bool>),
    Byte(Getter<T, i8>),
    Char(Getter<T, u16>),
    Short(Getter<T, i16>),
    Int(Getter<T, i32>),
    Long(Getter<T, i64>),
    Float(Getter<T, f32>),
    Double(Getter<T, f64>),
    Object(Getter<T, Option<ObjectRef>>),
}

// Binds `$f` to the getter of whichever variant `$appender` is.
macro_rules! with_getter {
    ($appender:expr, $f:ident => $body:expr) => {
        match $appender {
            Appender::Boolean($f) => $body,
            Appender::Byte($f) => $body,
            Appender::Char($f) => $body,
            Appender::Short($f) => $body,
            Appender::Int($f) => $body,
            Appender::Long($f) => $body,
            Appender::Float($f) => $body,
            Appender::Double($f) => $body,
            Appender::Object($f) => $body,
        }
    };
}

impl<T> Appender<T> {
    fn append_all(&self, input: &[T], out: &mut TypedBuffer) -> Result<(), SplayError> {
        with_getter!(self, f => {
            let values = input.iter().map(|r| f(r)).collect::<Result<Vec<_>, _>>()?;
            out.extend(values)
        })
    }

    fn append_one(&self, record: &T, out: &mut TypedBuffer) -> Result<(), SplayError> {
        with_getter!(self, f => out.push(f(record)?))
    }
}

/// One output column: its logical type and how to compute it from a record.
pub struct TypedFunction<T> {
    logical: LogicalType,
    appender: Appender<T>,
}

// Generates the infallible, fallible and nullable constructors of a numeric kind.
macro_rules! numeric_functions {
    ($($name:ident, $try_name:ident, $boxed_name:ident: $t:ty => $variant:ident, $null:expr);* $(;)?) => {
        $(
            pub fn $name<F>(f: F) -> Self
            where
                F: Fn(&T) -> $t + Send + Sync + 'static,
            {
                Self::primitive(
                    PrimitiveType::$variant,
                    Appender::$variant(Box::new(move |r: &T| -> Result<$t, SplayError> { Ok(f(r)) })),
                )
            }

            pub fn $try_name<F>(f: F) -> Self
            where
                F: Fn(&T) -> Result<$t, SplayError> + Send + Sync + 'static,
            {
                Self::primitive(PrimitiveType::$variant, Appender::$variant(Box::new(f)))
            }

            /// `None` is written as the kind's null sentinel.
            pub fn $boxed_name<F>(f: F) -> Self
            where
                F: Fn(&T) -> Option<$t> + Send + Sync + 'static,
            {
                Self {
                    logical: LogicalType::Boxed { of: PrimitiveType::$variant },
                    appender: Appender::$variant(Box::new(move |r: &T| -> Result<$t, SplayError> {
                        Ok(f(r).unwrap_or($null))
                    })),
                }
            }
        )*
    };
}

impl<T> TypedFunction<T> {
    fn primitive(of: PrimitiveType, appender: Appender<T>) -> Self {
        Self {
            logical: LogicalType::Primitive { of },
            appender,
        }
    }

    pub fn logical_type(&self) -> &LogicalType {
        &self.logical
    }

    pub fn column_kind(&self) -> ColumnKind {
        ColumnKind::of(&self.logical)
    }

    pub fn boolean<F>(f: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::primitive(
            PrimitiveType::Boolean,
            Appender::Boolean(Box::new(move |r: &T| -> Result<bool, SplayError> { Ok(f(r)) })),
        )
    }

    pub fn try_boolean<F>(f: F) -> Self
    where
        F: Fn(&T) -> Result<bool, SplayError> + Send + Sync + 'static,
    {
        Self::primitive(PrimitiveType::Boolean, Appender::Boolean(Box::new(f)))
    }

    numeric_functions! {
        byte, try_byte, boxed_byte: i8 => Byte, NULL_BYTE;
        char, try_char, boxed_char: u16 => Char, NULL_CHAR;
        short, try_short, boxed_short: i16 => Short, NULL_SHORT;
        int, try_int, boxed_int: i32 => Int, NULL_INT;
        long, try_long, boxed_long: i64 => Long, NULL_LONG;
        float, try_float, boxed_float: f32 => Float, NULL_FLOAT;
        double, try_double, boxed_double: f64 => Double, NULL_DOUBLE;
    }

    /// Epoch nanoseconds in a `Long` column; `None` or out-of-range becomes `NULL_LONG`.
    pub fn instant<F>(f: F) -> Self
    where
        F: Fn(&T) -> Option<DateTime<Utc>> + Send + Sync + 'static,
    {
        Self {
            logical: LogicalType::Instant,
            appender: Appender::Long(Box::new(move |r: &T| -> Result<i64, SplayError> {
                Ok(f(r)
                    .and_then(|ts| ts.timestamp_nanos_opt())
                    .unwrap_or(NULL_LONG))
            })),
        }
    }

    pub fn string<F>(f: F) -> Self
    where
        F: Fn(&T) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            logical: LogicalType::String,
            appender: Appender::Object(Box::new(
                move |r: &T| -> Result<Option<ObjectRef>, SplayError> {
                    Ok(f(r).map(ObjectRef::from))
                },
            )),
        }
    }

    pub fn try_string<F>(f: F) -> Self
    where
        F: Fn(&T) -> Result<Option<String>, SplayError> + Send + Sync + 'static,
    {
        Self {
            logical: LogicalType::String,
            appender: Appender::Object(Box::new(
                move |r: &T| -> Result<Option<ObjectRef>, SplayError> {
                    Ok(f(r)?.map(ObjectRef::from))
                },
            )),
        }
    }

    /// An array column; each array is stored as one shared `Vec<E>` object.
    pub fn array<E, F>(component: LogicalType, f: F) -> Self
    where
        E: Send + Sync + 'static,
        F: Fn(&T) -> Option<Vec<E>> + Send + Sync + 'static,
    {
        Self {
            logical: LogicalType::Array {
                component: Box::new(component),
            },
            appender: Appender::Object(Box::new(
                move |r: &T| -> Result<Option<ObjectRef>, SplayError> {
                    Ok(f(r).map(ObjectRef::new))
                },
            )),
        }
    }

    /// An arbitrary object column of a named custom type.
    pub fn object<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&T) -> Option<ObjectRef> + Send + Sync + 'static,
    {
        Self {
            logical: LogicalType::Custom { name: name.into() },
            appender: Appender::Object(Box::new(
                move |r: &T| -> Result<Option<ObjectRef>, SplayError> { Ok(f(r)) },
            )),
        }
    }
}

//==================================================================================
// FunctionSplayer
//==================================================================================

pub struct FunctionSplayer<T> {
    types: Vec<LogicalType>,
    kinds: Vec<ColumnKind>,
    appenders: Vec<Appender<T>>,
}

impl<T> FunctionSplayer<T> {
    pub fn new(functions: Vec<TypedFunction<T>>) -> Self {
        let (types, appenders): (Vec<_>, Vec<_>) = functions
            .into_iter()
            .map(|f| (f.logical, f.appender))
            .unzip();
        let kinds = column_kinds(&types);
        Self {
            types,
            kinds,
            appenders,
        }
    }

    fn check_room(&self, rows: usize, out: &[TypedBuffer]) -> Result<(), SplayError> {
        check_columns(&self.kinds, out)?;
        match out.iter().find(|b| b.remaining() < rows) {
            Some(full) => Err(SplayError::CapacityExceeded {
                kind: full.kind().to_string(),
                capacity: full.capacity(),
            }),
            None => Ok(()),
        }
    }

    /// Row-oriented form: appends one value per column for a single record.
    pub fn splay_row(&self, record: &T, out: &mut [TypedBuffer]) -> Result<(), SplayError> {
        self.check_room(1, out)?;
        for (appender, buffer) in self.appenders.iter().zip(out.iter_mut()) {
            appender.append_one(record, buffer)?;
        }
        Ok(())
    }
}

impl<T> ObjectSplayer<T> for FunctionSplayer<T> {
    fn output_types(&self) -> &[LogicalType] {
        &self.types
    }

    fn chunk_types(&self) -> Vec<ColumnKind> {
        self.kinds.clone()
    }

    fn splay_all(&self, input: &[T], out: &mut [TypedBuffer]) -> Result<(), SplayError> {
        self.check_room(input.len(), out)?;
        for (appender, buffer) in self.appenders.iter().zip(out.iter_mut()) {
            appender.append_all(input, buffer)?;
        }
        Ok(())
    }
}
