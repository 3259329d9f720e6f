//! World entities: the concrete things agents can see, reference and act on

use crate::core::types::{EntityId, Vec2};
use serde::{Deserialize, Serialize};

/// Value of a named entity attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Num(f64),
    Text(String),
}

impl AttrValue {
    pub fn as_num(&self) -> Option<f64> {
        match self {
            AttrValue::Num(n) => Some(*n),
            AttrValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            AttrValue::Num(_) => None,
        }
    }
}

/// A single entity in the shared world ledger.
///
/// Entities are pure data; they are created and updated only through
/// accepted adjudication outcomes. Attribute order is insertion order so
/// snapshots and briefs are reproducible run to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub kind: String,
    pub position: Vec2,
    attrs: Vec<(String, AttrValue)>,
}

impl Entity {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, position: Vec2) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            kind: kind.into(),
            position,
            attrs: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: AttrValue) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn num_attr(&self, name: &str) -> Option<f64> {
        self.attr(name).and_then(AttrValue::as_num)
    }

    /// Insert or overwrite one attribute, preserving first-insertion order
    pub fn set_attr(&mut self, name: impl Into<String>, value: AttrValue) {
        let name = name.into();
        if let Some(slot) = self.attrs.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.attrs.push((name, value));
        }
    }

    /// Add `delta` to a numeric attribute, creating it at `delta` if absent
    pub fn adjust_num_attr(&mut self, name: &str, delta: f64) {
        let current = self.num_attr(name).unwrap_or(0.0);
        self.set_attr(name, AttrValue::Num(current + delta));
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.attrs.iter().map(|(n, v)| (n.as_str(), v))
    }
}
