//! Bound query parameters and their two text renderings.
//!
//! - `inline` renders a typed SQL literal, substituted into the query text
//!   when the server cannot take parameters over HTTP.
//! - `http` renders the escaped text the server parses a `param_<name>`
//!   URL argument from.

mod http;
mod inline;

pub use self::http::format_http;
pub use self::inline::format_inline;

use std::collections::HashMap;

use crate::value::Value;

/// A named parameter bound to a command.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Ordered set of parameters with unique names.
#[derive(Debug, Clone, Default)]
pub struct ParameterCollection {
    items: Vec<Parameter>,
}

impl ParameterCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` to `name`. Re-binding a name replaces the value and keeps
    /// its position.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let param = Parameter::new(name, value);
        match self.items.iter_mut().find(|p| p.name == param.name) {
            Some(existing) => existing.value = param.value,
            None => self.items.push(param),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.items.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let pos = self.items.iter().position(|p| p.name == name)?;
        Some(self.items.remove(pos).value)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.items.iter()
    }

    /// Inline literals keyed by parameter name, for query substitution.
    pub fn format_inline(&self) -> HashMap<String, String> {
        self.items
            .iter()
            .map(|p| (p.name.clone(), format_inline(&p.value)))
            .collect()
    }

    /// `(param_<name>, text)` pairs for the request URI.
    pub fn format_http(&self) -> Vec<(String, String)> {
        self.items
            .iter()
            .map(|p| (format!("param_{}", p.name), format_http(&p.value)))
            .collect()
    }
}

impl<'a> IntoIterator for &'a ParameterCollection {
    type Item = &'a Parameter;
    type IntoIter = std::slice::Iter<'a, Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
