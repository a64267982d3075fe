//! Runtime values produced by parsing and consumed by building.
//!
//! Structured values are stored in [`Container`] (named entries, insertion
//! ordered) and [`ListContainer`] (positional). Both keep optional side-band
//! [`MetaInformation`] per entry, filled by the size-assignment pass and never
//! part of equality.

use crate::expr::Expr;
use crate::lazy::LazyValue;
use indexmap::IndexMap;
use std::ops::Deref;

/// Byte layout of one entry, as assigned by preprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetaInformation {
    pub offset: u64,
    pub size: u64,
    pub end_offset: u64,
    /// Size of out-of-line data referenced by a pointer; zero otherwise.
    pub pointer_size: u64,
}

impl MetaInformation {
    pub fn new(offset: u64, size: u64) -> Self {
        MetaInformation {
            offset,
            size,
            end_offset: offset + size,
            pointer_size: 0,
        }
    }

    pub fn with_pointer_size(mut self, pointer_size: u64) -> Self {
        self.pointer_size = pointer_size;
        self
    }
}

/// A single value (field, compound or deferred).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Float(f32),
    Double(f64),
    Bytes(Vec<u8>),
    Str(String),
    Struct(Container),
    List(ListContainer),
    /// Value still to be computed from context (rebuilt/computed fields after preprocessing).
    Deferred(Expr),
    /// Parsed lazily; materialize with [`LazyValue::force`].
    Lazy(LazyValue),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U8(x) => Some(*x as u64),
            Value::U16(x) => Some(*x as u64),
            Value::U32(x) => Some(*x as u64),
            Value::U64(x) => Some(*x),
            Value::I8(_) | Value::I16(_) | Value::I32(_) | Value::I64(_) => {
                self.as_i64().and_then(|x| u64::try_from(x).ok())
            }
            Value::Bool(b) => Some(*b as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I8(x) => Some(*x as i64),
            Value::I16(x) => Some(*x as i64),
            Value::I32(x) => Some(*x as i64),
            Value::I64(x) => Some(*x),
            Value::U8(x) => Some(*x as i64),
            Value::U16(x) => Some(*x as i64),
            Value::U32(x) => Some(*x as i64),
            Value::U64(x) => i64::try_from(*x).ok(),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Integer view wide enough for any integer variant.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::U64(x) => Some(*x as i128),
            _ => self.as_i64().map(i128::from),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x as f64),
            Value::Double(x) => Some(*x),
            _ => self.as_i128().map(|x| x as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Container> {
        match self {
            Value::Struct(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListContainer> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn is_integer(&self) -> bool {
        self.as_i128().is_some() && !matches!(self, Value::Bool(_))
    }

    /// Truthiness used by conditions: zero, empty and `None` are false.
    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Float(x) => *x != 0.0,
            Value::Double(x) => *x != 0.0,
            Value::Bytes(b) => !b.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::Struct(c) => !c.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Deferred(_) | Value::Lazy(_) => true,
            other => other.as_i128().map(|x| x != 0).unwrap_or(false),
        }
    }

    /// Equality that compares numbers by value across widths and signedness.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self.as_i128(), other.as_i128()) {
            (Some(a), Some(b)) if self.is_integer() && other.is_integer() => a == b,
            _ => match (self, other) {
                (Value::Float(_) | Value::Double(_), _) | (_, Value::Float(_) | Value::Double(_)) => {
                    match (self.as_f64(), other.as_f64()) {
                        (Some(a), Some(b)) => a == b,
                        _ => false,
                    }
                }
                _ => self == other,
            },
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::U8(_) => "u8",
            Value::U16(_) => "u16",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Bytes(_) => "bytes",
            Value::Str(_) => "str",
            Value::Struct(_) => "struct",
            Value::List(_) => "list",
            Value::Deferred(_) => "deferred",
            Value::Lazy(_) => "lazy",
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(x: $ty) -> Self {
                Value::$variant(x)
            }
        })*
    };
}

value_from! {
    bool => Bool, u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    i8 => I8, i16 => I16, i32 => I32, i64 => I64, f32 => Float, f64 => Double,
    Vec<u8> => Bytes, String => Str, Container => Struct, ListContainer => List,
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<usize> for Value {
    fn from(x: usize) -> Self {
        Value::U64(x as u64)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(ListContainer::from(items))
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    meta: Option<MetaInformation>,
}

/// Named, insertion-ordered entries of a structure.
#[derive(Debug, Clone, Default)]
pub struct Container {
    entries: IndexMap<String, Entry>,
}

impl Container {
    pub fn new() -> Self {
        Container::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries.get_mut(key).map(|e| &mut e.value)
    }

    /// Insert or overwrite a value; existing metadata is kept.
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.entries.get_mut(key) {
            Some(entry) => entry.value = value,
            None => {
                self.entries.insert(key.to_string(), Entry { value, meta: None });
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.shift_remove(key).map(|e| e.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn meta(&self, key: &str) -> Option<MetaInformation> {
        self.entries.get(key).and_then(|e| e.meta)
    }

    /// Attach metadata, creating a `None` entry if the key is absent.
    pub fn set_meta(&mut self, key: &str, meta: MetaInformation) {
        self.entries
            .entry(key.to_string())
            .or_insert(Entry { value: Value::None, meta: None })
            .meta = Some(meta);
    }

    /// Copy every entry (value and metadata) of `other` into `self`.
    pub fn update(&mut self, other: Container) {
        for (key, entry) in other.entries {
            match self.entries.get_mut(&key) {
                Some(existing) => {
                    existing.value = entry.value;
                    if entry.meta.is_some() {
                        existing.meta = entry.meta;
                    }
                }
                None => {
                    self.entries.insert(key, entry);
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), &e.value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        let public = |c: &Container| c.iter().filter(|(k, _)| !k.starts_with('_')).count();
        public(self) == public(other)
            && self
                .iter()
                .filter(|(k, _)| !k.starts_with('_'))
                .all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K: AsRef<str>, V: Into<Value>> FromIterator<(K, V)> for Container {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut c = Container::new();
        for (k, v) in iter {
            c.insert(k.as_ref(), v);
        }
        c
    }
}

/// Positional values of an array or sequence, with per-index metadata.
#[derive(Debug, Clone, Default)]
pub struct ListContainer {
    items: Vec<Value>,
    meta: Vec<Option<MetaInformation>>,
}

impl ListContainer {
    pub fn new() -> Self {
        ListContainer::default()
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.items.push(value.into());
        self.meta.push(None);
    }

    pub fn meta(&self, index: usize) -> Option<MetaInformation> {
        self.meta.get(index).copied().flatten()
    }

    pub fn set_meta(&mut self, index: usize, meta: MetaInformation) {
        if let Some(slot) = self.meta.get_mut(index) {
            *slot = Some(meta);
        }
    }

    pub fn truncate(&mut self, len: usize) {
        self.items.truncate(len);
        self.meta.truncate(len);
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.items
    }
}

impl Deref for ListContainer {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.items
    }
}

impl PartialEq for ListContainer {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl From<Vec<Value>> for ListContainer {
    fn from(items: Vec<Value>) -> Self {
        let meta = vec![None; items.len()];
        ListContainer { items, meta }
    }
}

impl<V: Into<Value>> FromIterator<V> for ListContainer {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        ListContainer::from(iter.into_iter().map(Into::into).collect::<Vec<Value>>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_equality_ignores_meta_and_private_keys() {
        let mut a = Container::new().with("x", 1u8).with("_io", 7u8);
        a.set_meta("x", MetaInformation::new(0, 1));
        let b = Container::new().with("x", 1u8);
        assert_eq!(a, b);
    }

    #[test]
    fn loose_eq_crosses_integer_widths() {
        assert!(Value::U8(3).loose_eq(&Value::I64(3)));
        assert!(!Value::U8(3).loose_eq(&Value::I64(-3)));
        assert!(Value::Str("a".into()).loose_eq(&Value::from("a")));
    }
}
