//! Native value representation on both sides of an adapter.

use crate::layout::CoreType;

/// A structured component-level value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    S8(i8),
    S16(i16),
    S32(i32),
    S64(i64),
    F32(f32),
    F64(f64),
    Char(char),
    String(String),
    List(Vec<Value>),
    Record(Vec<(String, Value)>),
    Tuple(Vec<Value>),
    Variant(String, Option<Box<Value>>),
    Enum(String),
    Option(Option<Box<Value>>),
    Result(Result<Option<Box<Value>>, Option<Box<Value>>>),
    Flags(Vec<String>),
    /// An owned resource handle.
    Own(u32),
    /// A borrowed resource handle.
    Borrow(u32),
}

impl Value {
    /// Short name of the value's shape, used in mismatch diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::U8(_) => "u8",
            Value::U16(_) => "u16",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::S8(_) => "s8",
            Value::S16(_) => "s16",
            Value::S32(_) => "s32",
            Value::S64(_) => "s64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Char(_) => "char",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Record(_) => "record",
            Value::Tuple(_) => "tuple",
            Value::Variant(..) => "variant",
            Value::Enum(_) => "enum",
            Value::Option(_) => "option",
            Value::Result(_) => "result",
            Value::Flags(_) => "flags",
            Value::Own(_) => "own",
            Value::Borrow(_) => "borrow",
        }
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn record<'a>(fields: impl IntoIterator<Item = (&'a str, Value)>) -> Self {
        Value::Record(
            fields
                .into_iter()
                .map(|(name, v)| (name.to_string(), v))
                .collect(),
        )
    }
}

/// A single flattened core WebAssembly value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoreValue {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl CoreValue {
    pub fn ty(&self) -> CoreType {
        match self {
            CoreValue::I32(_) => CoreType::I32,
            CoreValue::I64(_) => CoreType::I64,
            CoreValue::F32(_) => CoreType::F32,
            CoreValue::F64(_) => CoreType::F64,
        }
    }

    /// Zero of the given core type, used to pad narrower variant cases.
    pub fn zero(ty: CoreType) -> Self {
        match ty {
            CoreType::I32 => CoreValue::I32(0),
            CoreType::I64 => CoreValue::I64(0),
            CoreType::F32 => CoreValue::F32(0.0),
            CoreType::F64 => CoreValue::F64(0.0),
        }
    }

    /// Reinterpret this value into the joined slot type `to`.
    pub fn widen(self, to: CoreType) -> Self {
        match (self, to) {
            (CoreValue::F32(f), CoreType::I32) => CoreValue::I32(f.to_bits() as i32),
            (CoreValue::I32(i), CoreType::I64) => CoreValue::I64(i64::from(i as u32)),
            (CoreValue::F32(f), CoreType::I64) => CoreValue::I64(i64::from(f.to_bits())),
            (CoreValue::F64(f), CoreType::I64) => CoreValue::I64(f.to_bits() as i64),
            (v, _) => v,
        }
    }

    /// Inverse of [`CoreValue::widen`]: recover a case's own core type.
    pub fn narrow(self, to: CoreType) -> Self {
        match (self, to) {
            (CoreValue::I32(i), CoreType::F32) => CoreValue::F32(f32::from_bits(i as u32)),
            (CoreValue::I64(i), CoreType::I32) => CoreValue::I32(i as i32),
            (CoreValue::I64(i), CoreType::F32) => CoreValue::F32(f32::from_bits(i as u32)),
            (CoreValue::I64(i), CoreType::F64) => CoreValue::F64(f64::from_bits(i as u64)),
            (v, _) => v,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            CoreValue::I32(v) => Some(*v),
            _ => None,
        }
    }
}
