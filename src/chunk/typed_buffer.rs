//! The leaf of the chunk model: a typed, fixed-capacity, reusable column buffer.
//!
//! Dispatch over the element kind is a closed enum matched once per call, never a
//! runtime cast. The logical `capacity` is what `take` sized the buffer for; the
//! backing `Vec` may hold more, but appends beyond `capacity` are rejected.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::SplayError;
use crate::types::ColumnKind;

//==================================================================================
// 1. Object References
//==================================================================================

/// A shared, type-erased reference stored in `Object` columns.
#[derive(Clone)]
pub struct ObjectRef(Arc<dyn Any + Send + Sync>);

impl ObjectRef {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        ObjectRef(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Returns the string payload for `String` and `&'static str` objects.
    pub fn as_str(&self) -> Option<&str> {
        if let Some(s) = self.0.downcast_ref::<String>() {
            return Some(s.as_str());
        }
        self.0.downcast_ref::<&'static str>().copied()
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        match (self.as_str(), other.as_str()) {
            (Some(a), Some(b)) => a == b,
            _ => self.ptr_eq(other),
        }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) => write!(f, "ObjectRef({:?})", s),
            None => write!(f, "ObjectRef(<opaque>)"),
        }
    }
}

impl From<String> for ObjectRef {
    fn from(value: String) -> Self {
        ObjectRef::new(value)
    }
}

impl From<&str> for ObjectRef {
    fn from(value: &str) -> Self {
        ObjectRef::new(value.to_string())
    }
}

//==================================================================================
// 2. Values & Elements
//==================================================================================

/// A single dynamically-typed cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Object(Option<ObjectRef>),
}

impl Value {
    pub fn kind(&self) -> ColumnKind {
        match self {
            Value::Boolean(_) => ColumnKind::Boolean,
            Value::Byte(_) => ColumnKind::Byte,
            Value::Char(_) => ColumnKind::Char,
            Value::Short(_) => ColumnKind::Short,
            Value::Int(_) => ColumnKind::Int,
            Value::Long(_) => ColumnKind::Long,
            Value::Float(_) => ColumnKind::Float,
            Value::Double(_) => ColumnKind::Double,
            Value::Object(_) => ColumnKind::Object,
        }
    }

    pub fn object(value: impl Into<ObjectRef>) -> Self {
        Value::Object(Some(value.into()))
    }
}

#[derive(Clone)]
enum BufferData {
    Boolean(Vec<bool>),
    Byte(Vec<i8>),
    Char(Vec<u16>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Object(Vec<Option<ObjectRef>>),
}

mod sealed {
    pub trait Sealed {}
}

/// A Rust type that can be stored in a [`TypedBuffer`] without going through [`Value`].
pub trait Element: sealed::Sealed + Clone + Sized {
    const KIND: ColumnKind;

    #[doc(hidden)]
    fn slice(buffer: &TypedBuffer) -> Option<&[Self]>;

    #[doc(hidden)]
    fn vec_mut(buffer: &mut TypedBuffer) -> Option<&mut Vec<Self>>;

    fn into_value(self) -> Value;
}

// Implement `Element` for every storable type; one arm per `BufferData` variant.
macro_rules! impl_element {
    ($t:ty, $variant:ident) => {
        impl sealed::Sealed for $t {}

        impl Element for $t {
            const KIND: ColumnKind = ColumnKind::$variant;

            fn slice(buffer: &TypedBuffer) -> Option<&[Self]> {
                match &buffer.data {
                    BufferData::$variant(v) => Some(v.as_slice()),
                    _ => None,
                }
            }

            fn vec_mut(buffer: &mut TypedBuffer) -> Option<&mut Vec<Self>> {
                match &mut buffer.data {
                    BufferData::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn into_value(self) -> Value {
                Value::$variant(self)
            }
        }
    };
}

impl_element!(bool, Boolean);
impl_element!(i8, Byte);
impl_element!(u16, Char);
impl_element!(i16, Short);
impl_element!(i32, Int);
impl_element!(i64, Long);
impl_element!(f32, Float);
impl_element!(f64, Double);
impl_element!(Option<ObjectRef>, Object);

//==================================================================================
// 3. TypedBuffer
//==================================================================================

#[derive(Clone)]
pub struct TypedBuffer {
    data: BufferData,
    capacity: usize,
}

// Dispatches `$body` with `$v` bound to the concrete `Vec` of any variant.
macro_rules! with_vec {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            BufferData::Boolean($v) => $body,
            BufferData::Byte($v) => $body,
            BufferData::Char($v) => $body,
            BufferData::Short($v) => $body,
            BufferData::Int($v) => $body,
            BufferData::Long($v) => $body,
            BufferData::Float($v) => $body,
            BufferData::Double($v) => $body,
            BufferData::Object($v) => $body,
        }
    };
}

impl TypedBuffer {
    /// Allocates an empty buffer of `kind` able to hold exactly `capacity` values.
    pub fn new(kind: ColumnKind, capacity: usize) -> Self {
        let data = match kind {
            ColumnKind::Boolean => BufferData::Boolean(Vec::with_capacity(capacity)),
            ColumnKind::Byte => BufferData::Byte(Vec::with_capacity(capacity)),
            ColumnKind::Char => BufferData::Char(Vec::with_capacity(capacity)),
            ColumnKind::Short => BufferData::Short(Vec::with_capacity(capacity)),
            ColumnKind::Int => BufferData::Int(Vec::with_capacity(capacity)),
            ColumnKind::Long => BufferData::Long(Vec::with_capacity(capacity)),
            ColumnKind::Float => BufferData::Float(Vec::with_capacity(capacity)),
            ColumnKind::Double => BufferData::Double(Vec::with_capacity(capacity)),
            ColumnKind::Object => BufferData::Object(Vec::with_capacity(capacity)),
        };
        Self { data, capacity }
    }

    pub fn kind(&self) -> ColumnKind {
        match &self.data {
            BufferData::Boolean(_) => ColumnKind::Boolean,
            BufferData::Byte(_) => ColumnKind::Byte,
            BufferData::Char(_) => ColumnKind::Char,
            BufferData::Short(_) => ColumnKind::Short,
            BufferData::Int(_) => ColumnKind::Int,
            BufferData::Long(_) => ColumnKind::Long,
            BufferData::Float(_) => ColumnKind::Float,
            BufferData::Double(_) => ColumnKind::Double,
            BufferData::Object(_) => ColumnKind::Object,
        }
    }

    /// Number of values logically written.
    pub fn len(&self) -> usize {
        with_vec!(&self.data, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.len()
    }

    /// Appends one dynamically-typed value.
    pub fn append(&mut self, value: Value) -> Result<(), SplayError> {
        self.ensure_room(1)?;
        let kind = self.kind();
        match (&mut self.data, value) {
            (BufferData::Boolean(v), Value::Boolean(x)) => v.push(x),
            (BufferData::Byte(v), Value::Byte(x)) => v.push(x),
            (BufferData::Char(v), Value::Char(x)) => v.push(x),
            (BufferData::Short(v), Value::Short(x)) => v.push(x),
            (BufferData::Int(v), Value::Int(x)) => v.push(x),
            (BufferData::Long(v), Value::Long(x)) => v.push(x),
            (BufferData::Float(v), Value::Float(x)) => v.push(x),
            (BufferData::Double(v), Value::Double(x)) => v.push(x),
            (BufferData::Object(v), Value::Object(x)) => v.push(x),
            (_, other) => {
                return Err(SplayError::invalid_argument(format!(
                    "Cannot append a {} value to a {} buffer",
                    other.kind(),
                    kind
                )))
            }
        }
        Ok(())
    }

    /// Appends one statically-typed value.
    pub fn push<E: Element>(&mut self, value: E) -> Result<(), SplayError> {
        self.ensure_room(1)?;
        self.typed_vec_mut::<E>()?.push(value);
        Ok(())
    }

    /// Appends every value produced by `values`; nothing is written if they would not all fit.
    pub fn extend<E, I>(&mut self, values: I) -> Result<(), SplayError>
    where
        E: Element,
        I: IntoIterator<Item = E>,
        I::IntoIter: ExactSizeIterator,
    {
        let iter = values.into_iter();
        self.ensure_room(iter.len())?;
        self.typed_vec_mut::<E>()?.extend(iter);
        Ok(())
    }

    pub fn extend_from_slice<E: Element>(&mut self, values: &[E]) -> Result<(), SplayError> {
        self.extend(values.iter().cloned())
    }

    /// Borrows the written prefix as a typed slice, or `None` on a kind mismatch.
    pub fn values<E: Element>(&self) -> Option<&[E]> {
        E::slice(self)
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        match &self.data {
            BufferData::Boolean(v) => v.get(index).map(|x| Value::Boolean(*x)),
            BufferData::Byte(v) => v.get(index).map(|x| Value::Byte(*x)),
            BufferData::Char(v) => v.get(index).map(|x| Value::Char(*x)),
            BufferData::Short(v) => v.get(index).map(|x| Value::Short(*x)),
            BufferData::Int(v) => v.get(index).map(|x| Value::Int(*x)),
            BufferData::Long(v) => v.get(index).map(|x| Value::Long(*x)),
            BufferData::Float(v) => v.get(index).map(|x| Value::Float(*x)),
            BufferData::Double(v) => v.get(index).map(|x| Value::Double(*x)),
            BufferData::Object(v) => v.get(index).map(|x| Value::Object(x.clone())),
        }
    }

    /// Native-endian byte view of a numeric buffer. `None` for boolean and object buffers.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.data {
            BufferData::Byte(v) => Some(bytemuck::cast_slice(v.as_slice())),
            BufferData::Char(v) => Some(bytemuck::cast_slice(v.as_slice())),
            BufferData::Short(v) => Some(bytemuck::cast_slice(v.as_slice())),
            BufferData::Int(v) => Some(bytemuck::cast_slice(v.as_slice())),
            BufferData::Long(v) => Some(bytemuck::cast_slice(v.as_slice())),
            BufferData::Float(v) => Some(bytemuck::cast_slice(v.as_slice())),
            BufferData::Double(v) => Some(bytemuck::cast_slice(v.as_slice())),
            BufferData::Boolean(_) | BufferData::Object(_) => None,
        }
    }

    /// Empties the buffer for reuse, keeping its storage.
    pub fn reset(&mut self) {
        with_vec!(&mut self.data, v => v.clear())
    }

    /// Drops everything past `len`. Only rollback uses this.
    pub(crate) fn truncate(&mut self, len: usize) {
        with_vec!(&mut self.data, v => v.truncate(len))
    }

    fn ensure_room(&self, additional: usize) -> Result<(), SplayError> {
        if self.len() + additional > self.capacity {
            return Err(SplayError::CapacityExceeded {
                kind: self.kind().to_string(),
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    fn typed_vec_mut<E: Element>(&mut self) -> Result<&mut Vec<E>, SplayError> {
        let kind = self.kind();
        E::vec_mut(self).ok_or_else(|| {
            SplayError::invalid_argument(format!(
                "Cannot write {} values into a {} buffer",
                E::KIND,
                kind
            ))
        })
    }
}

impl fmt::Debug for TypedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedBuffer")
            .field("kind", &self.kind())
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

//==================================================================================
// 4. Unit Tests
//==================================================================================
