//! # Tag
//!
//! This module covers tags, named markers attached to individual instances to pick between behavior variants later.
//!
//! A tag's identity is established the first time its name is used and reused for the rest of the process, so checks
//! compare small integers instead of strings. Instances either carry their own [`TagSet`] (see [`Tagged`]) or, when
//! their type cannot be changed, get one from a [`TagStore`] side table keyed by instance identity.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

use lazy_static::lazy_static;

/// Names to tags, for every tag created in this process
#[derive(Default)]
struct TagTable {
    /// Interned tags by name
    by_name: HashMap<&'static str, Tag>,
}

lazy_static! {
    static ref TAGS: Mutex<TagTable> = Mutex::new(TagTable::default());
}

/// Process-wide marker, compared by identity
#[derive(Clone, Copy)]
pub struct Tag {
    /// Bit index, unique per name
    id: usize,
    /// Name the tag was created from
    name: &'static str,
}
impl Tag {
    /// Returns the tag for `name`, creating it on first use
    pub fn intern(name: &str) -> Tag {
        let mut table = TAGS.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tag) = table.by_name.get(name) {
            return *tag;
        }
        // tags live as long as the process, like the table that hands them out
        let name: &'static str = Box::leak(name.to_owned().into_boxed_str());
        let tag = Tag {
            id: table.by_name.len(),
            name,
        };
        table.by_name.insert(name, tag);
        tag
    }
    /// Returns the tag for `name` if it has been created
    pub fn lookup(name: &str) -> Option<Tag> {
        TAGS.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_name
            .get(name)
            .copied()
    }
    /// Bit index of this tag
    pub fn id(&self) -> usize {
        self.id
    }
    /// Name of this tag
    pub fn name(&self) -> &'static str {
        self.name
    }
}
impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Tag {}
impl Hash for Tag {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({}#{})", self.name, self.id)
    }
}

/// Bit set of tags attached to one instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    /// One bit per tag id
    words: Vec<u64>,
}
impl TagSet {
    /// Creates an empty set
    pub fn new() -> Self {
        Self::default()
    }
    /// Adds `tag`. Returns `false` if it was already present.
    pub fn insert(&mut self, tag: Tag) -> bool {
        let (word, bit) = (tag.id / 64, 1u64 << (tag.id % 64));
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        let added = self.words[word] & bit == 0;
        self.words[word] |= bit;
        added
    }
    /// Whether `tag` is present
    pub fn contains(&self, tag: Tag) -> bool {
        self.words
            .get(tag.id / 64)
            .map_or(false, |word| word & (1u64 << (tag.id % 64)) != 0)
    }
    /// Whether no tag is present
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&word| word == 0)
    }
}

/// Instances that carry their own tag set
pub trait Tagged {
    /// Tags attached to this instance
    fn tags(&self) -> &TagSet;
    /// Mutable access to the attached tags
    fn tags_mut(&mut self) -> &mut TagSet;

    /// Attaches the tag named `name`. Attaching twice is a no-op.
    fn add_tag(&mut self, name: &str) {
        self.tags_mut().insert(Tag::intern(name));
    }
    /// Whether the tag named `name` is attached
    fn tag_check(&self, name: &str) -> bool {
        Tag::lookup(name).map_or(false, |tag| self.has_tag(tag))
    }
    /// Whether `tag` is attached. Prefer this on hot paths, with the tag interned once up front.
    fn has_tag(&self, tag: Tag) -> bool {
        self.tags().contains(tag)
    }
}
impl Tagged for TagSet {
    fn tags(&self) -> &TagSet {
        self
    }
    fn tags_mut(&mut self) -> &mut TagSet {
        self
    }
}

/// Side table of tag sets for instances whose type cannot carry one
///
/// Entries belong to their instance; call [`TagStore::release`] when the instance goes away.
#[derive(Debug)]
pub struct TagStore<K> {
    /// Tag sets by instance identity
    sets: HashMap<K, TagSet>,
}
impl<K> Default for TagStore<K> {
    fn default() -> Self {
        Self {
            sets: HashMap::new(),
        }
    }
}
impl<K: Hash + Eq> TagStore<K> {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }
    /// Attaches the tag named `name` to `instance`. Attaching twice is a no-op.
    pub fn attach(&mut self, instance: K, name: &str) {
        self.attach_tag(instance, Tag::intern(name));
    }
    /// Attaches an already interned tag to `instance`
    pub fn attach_tag(&mut self, instance: K, tag: Tag) {
        self.sets.entry(instance).or_default().insert(tag);
    }
    /// Whether `instance` carries the tag named `name`
    pub fn has_tag(&self, instance: &K, name: &str) -> bool {
        Tag::lookup(name).map_or(false, |tag| self.has(instance, tag))
    }
    /// Whether `instance` carries `tag`
    pub fn has(&self, instance: &K, tag: Tag) -> bool {
        self.sets.get(instance).map_or(false, |set| set.contains(tag))
    }
    /// Tag set of `instance`, if it has ever been tagged
    pub fn get(&self, instance: &K) -> Option<&TagSet> {
        self.sets.get(instance)
    }
    /// Drops everything attached to `instance`
    pub fn release(&mut self, instance: &K) -> Option<TagSet> {
        self.sets.remove(instance)
    }
    /// Number of tagged instances
    pub fn len(&self) -> usize {
        self.sets.len()
    }
    /// Whether no instance is tagged
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
