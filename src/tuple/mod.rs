//! Tuple model: positional, immutable containers for multi-valued cells.
//!
//! A single [`DbTuple`] covers both the fixed-arity shapes (1 to 7 elements)
//! and the unbounded fallback used for wider server tuples. Native Rust
//! tuples are turned into a `DbTuple` by the [`convert`] module.

pub mod convert;

pub use convert::{Inspect, convert, is_shape_cached, try_convert};

use std::fmt;
use std::sync::Arc;

use crate::error::{ChError, ChResult};
use crate::value::Value;

/// Largest arity that has a fixed-arity shape.
pub const MAX_FIXED_ARITY: usize = 7;

/// Shape of a [`DbTuple`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TupleKind {
    /// 1..=7 elements.
    Fixed(usize),
    /// More than [`MAX_FIXED_ARITY`] elements.
    Unbounded(usize),
}

/// An immutable, positionally indexed tuple of values.
///
/// Cloning shares the element storage. Equality compares elements by
/// position and value.
#[derive(Debug, Clone, PartialEq)]
pub struct DbTuple {
    items: Arc<[Value]>,
}

impl DbTuple {
    /// Create a tuple of any length of at least one.
    pub fn new(items: impl Into<Vec<Value>>) -> ChResult<Self> {
        let items: Vec<Value> = items.into();
        if items.is_empty() {
            return Err(ChError::Argument("a tuple needs at least one element".into()));
        }
        Ok(Self { items: items.into() })
    }

    /// Create a fixed-arity tuple; fails for more than seven elements.
    pub fn fixed(items: impl Into<Vec<Value>>) -> ChResult<Self> {
        let items: Vec<Value> = items.into();
        match items.len() {
            1..=MAX_FIXED_ARITY => Ok(Self { items: items.into() }),
            n => Err(ChError::UnsupportedArity(n)),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Always false; tuples have at least one element.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn kind(&self) -> TupleKind {
        match self.items.len() {
            n @ 1..=MAX_FIXED_ARITY => TupleKind::Fixed(n),
            n => TupleKind::Unbounded(n),
        }
    }

    /// Element at `index`.
    pub fn get(&self, index: usize) -> ChResult<&Value> {
        self.items.get(index).ok_or(ChError::OutOfRange {
            index,
            len: self.items.len(),
        })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.items
    }

    /// True when both tuples share the same storage.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.items, &b.items)
    }
}

impl<'a> IntoIterator for &'a DbTuple {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for DbTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::param::format_inline(&Value::Tuple(self.clone())))
    }
}
