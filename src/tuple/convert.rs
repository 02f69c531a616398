//! Conversion of native multi-value types into [`DbTuple`].
//!
//! Rust has no runtime reflection, so a type opts in by implementing
//! [`Inspect`]: it reports how many positional members it exposes and hands
//! them out by index. Newtypes over a tuple can expose the wrapped value via
//! [`Inspect::parent`], and discovery walks that chain until it finds a
//! shape of arity 1 to 7.
//!
//! The discovered shape is cached per concrete type, so later conversions of
//! the same type skip the walk and read the members directly.

use std::any::{Any, TypeId};
use std::sync::LazyLock;

use dashmap::DashMap;

use super::{DbTuple, MAX_FIXED_ARITY};
use crate::error::{ChError, ChResult};
use crate::value::Value;

/// Structural view of a value that may hold positional members.
pub trait Inspect: Any {
    fn as_any(&self) -> &dyn Any;

    /// Number of positional members, or `None` when the type is not
    /// multi-valued itself.
    fn arity(&self) -> Option<usize>;

    /// Member at `index`, `index < arity`.
    fn member(&self, index: usize) -> Option<Value>;

    /// The value this type wraps, if any.
    fn parent(&self) -> Option<&dyn Inspect> {
        None
    }
}

/// A discovered extraction path: `depth` parent hops, then `arity` members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Shape {
    depth: usize,
    arity: usize,
}

impl Shape {
    fn discover(value: &dyn Inspect) -> Option<Self> {
        let mut node = Some(value);
        let mut depth = 0;
        while let Some(current) = node {
            if let Some(arity @ 1..=MAX_FIXED_ARITY) = current.arity() {
                return Some(Self { depth, arity });
            }
            node = current.parent();
            depth += 1;
        }
        None
    }

    fn extract(&self, value: &dyn Inspect) -> Option<DbTuple> {
        let mut node = value;
        for _ in 0..self.depth {
            node = node.parent()?;
        }
        let items = (0..self.arity)
            .map(|i| node.member(i))
            .collect::<Option<Vec<Value>>>()?;
        DbTuple::fixed(items).ok()
    }
}

static SHAPES: LazyLock<DashMap<TypeId, Shape>> = LazyLock::new(DashMap::new);

/// Convert `value` into a tuple, or `None` when its type has no known shape.
///
/// A `DbTuple` is returned as-is, sharing its storage.
pub fn try_convert(value: Option<&dyn Inspect>) -> Option<DbTuple> {
    let value = value?;

    if let Some(tuple) = value.as_any().downcast_ref::<DbTuple>() {
        return Some(tuple.clone());
    }

    let key = value.as_any().type_id();
    let cached = SHAPES.get(&key).map(|entry| *entry.value());
    let shape = match cached {
        Some(shape) => shape,
        None => {
            let shape = Shape::discover(value)?;
            tracing::debug!(
                "tuple shape discovered: depth={} arity={}",
                shape.depth,
                shape.arity
            );
            *SHAPES.entry(key).or_insert(shape)
        }
    };

    shape.extract(value)
}

/// Like [`try_convert`], but a value that cannot be converted is an error.
pub fn convert(value: Option<&dyn Inspect>) -> ChResult<DbTuple> {
    try_convert(value).ok_or_else(|| {
        ChError::Argument("the provided value could not be converted to a tuple".into())
    })
}

/// Whether a shape has been cached for the concrete type `T`.
pub fn is_shape_cached<T: Any>() -> bool {
    SHAPES.contains_key(&TypeId::of::<T>())
}

impl Inspect for DbTuple {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn arity(&self) -> Option<usize> {
        Some(self.len())
    }

    fn member(&self, index: usize) -> Option<Value> {
        self.get(index).ok().cloned()
    }
}

macro_rules! inspect_tuple {
    ($len:expr; $($name:ident : $idx:tt),+) => {
        impl<$($name),+> Inspect for ($($name,)+)
        where
            $($name: Clone + Into<Value> + 'static),+
        {
            fn as_any(&self) -> &dyn Any {
                self
            }

            fn arity(&self) -> Option<usize> {
                Some($len)
            }

            fn member(&self, index: usize) -> Option<Value> {
                match index {
                    $($idx => Some(self.$idx.clone().into()),)+
                    _ => None,
                }
            }
        }
    };
}

inspect_tuple!(1; A: 0);
inspect_tuple!(2; A: 0, B: 1);
inspect_tuple!(3; A: 0, B: 1, C: 2);
inspect_tuple!(4; A: 0, B: 1, C: 2, D: 3);
inspect_tuple!(5; A: 0, B: 1, C: 2, D: 3, E: 4);
inspect_tuple!(6; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
inspect_tuple!(7; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
inspect_tuple!(8; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);
inspect_tuple!(9; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8);
inspect_tuple!(10; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8, J: 9);
inspect_tuple!(11; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8, J: 9, K: 10);
inspect_tuple!(12; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8, J: 9, K: 10, L: 11);
