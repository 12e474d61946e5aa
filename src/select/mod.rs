//! # Select
//!
//! This module covers the logic a rewritten call site runs: read one tag off the current instance and fetch one of two candidates

use std::borrow::Cow;
use std::fmt;

use crate::tag::{Tag, Tagged};

/// Token naming a kind of live instance, as understood by an [`InstanceLookup`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Kind(Cow<'static, str>);
impl Kind {
    /// Creates a kind token from a static name
    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }
    /// Name of the kind
    pub fn name(&self) -> &str {
        &self.0
    }
}
impl From<&'static str> for Kind {
    fn from(name: &'static str) -> Self {
        Self::new(name)
    }
}
impl From<String> for Kind {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}
impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Finds the current live instance of a kind in the active execution context
pub trait InstanceLookup {
    /// Handle to a live instance
    type Actor;

    /// Current instance of `kind`, if one is alive
    fn find(&self, kind: &Kind) -> Option<Self::Actor>;
}

/// Which candidate a selection picked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// The instance carries the tag
    A,
    /// The instance does not carry the tag
    B,
}

/// Binary choice between two kinds, driven by one tag
#[derive(Debug, Clone)]
pub struct Selector {
    /// Tag read off the instance
    tag: Tag,
    /// Kind fetched for tagged instances
    variant_a: Kind,
    /// Kind fetched otherwise
    variant_b: Kind,
}
impl Selector {
    /// Creates a selector. The tag is interned here so selection itself never touches the tag table.
    pub fn new(tag_name: &str, variant_a: impl Into<Kind>, variant_b: impl Into<Kind>) -> Self {
        Self {
            tag: Tag::intern(tag_name),
            variant_a: variant_a.into(),
            variant_b: variant_b.into(),
        }
    }
    /// Tag this selector reads
    pub fn tag(&self) -> Tag {
        self.tag
    }
    /// Which variant applies to `instance` right now
    pub fn variant<T: Tagged + ?Sized>(&self, instance: &T) -> Variant {
        if instance.has_tag(self.tag) {
            Variant::A
        } else {
            Variant::B
        }
    }
    /// Kind fetched for `variant`
    pub fn kind(&self, variant: Variant) -> &Kind {
        match variant {
            Variant::A => &self.variant_a,
            Variant::B => &self.variant_b,
        }
    }
    /// Fetches the candidate for `instance`
    ///
    /// A missing candidate comes back as `None`, exactly what the unpatched call site would have produced.
    pub fn select<T, L>(&self, instance: &T, lookup: &L) -> Option<L::Actor>
    where
        T: Tagged + ?Sized,
        L: InstanceLookup + ?Sized,
    {
        lookup.find(self.kind(self.variant(instance)))
    }
}
