//! Host-side instances and the configuration they are built from

use std::collections::HashMap;

use crate::tag::{TagSet, Tagged};

/// Supplies named options for an instance at construction time
pub trait InstanceConfig {
    /// Boolean option `key`, or `default` when it is missing or not a boolean
    fn bool(&self, key: &str, default: bool) -> bool;
}

/// Placement data an entity is constructed from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityData {
    /// Entity type name
    name: String,
    /// Raw attribute values
    values: HashMap<String, String>,
}
impl EntityData {
    /// Creates data for an entity type with no attributes
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: HashMap::new(),
        }
    }
    /// Sets attribute `key`
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
    /// Entity type name
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Raw attribute value
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}
impl InstanceConfig for EntityData {
    fn bool(&self, key: &str, default: bool) -> bool {
        match self.attr(key).map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("true") => true,
            Some(v) if v.eq_ignore_ascii_case("false") => false,
            _ => default,
        }
    }
}

/// A constructed entity. Its tag set is the only extension point it offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    /// Instance identity
    id: u64,
    /// Attached tags
    tags: TagSet,
}
impl Entity {
    /// Creates an untagged entity
    pub fn new(id: u64) -> Self {
        Self {
            id,
            tags: TagSet::new(),
        }
    }
    /// Instance identity
    pub fn id(&self) -> u64 {
        self.id
    }
}
impl Tagged for Entity {
    fn tags(&self) -> &TagSet {
        &self.tags
    }
    fn tags_mut(&mut self) -> &mut TagSet {
        &mut self.tags
    }
}
