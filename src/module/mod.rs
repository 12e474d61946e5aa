//! # Module
//!
//! This module covers the boundary with the host: the load/unload lifecycle, access to function bodies,
//! and the host-side instance types that hooks and selectors work on

pub mod entity;
pub mod follow;

use std::collections::HashMap;

use thiserror::Error;

use crate::code::InstructionStream;
use crate::hook::{HookError, HookRegistry, TargetId};
use crate::patcher::rewrite::PatchError;

use self::entity::{Entity, EntityData};

/// Errors that abort a module load. These are programmer errors and should fail loudly.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoadError {
    /// Hook could not be installed
    #[error("{0}")]
    Hook(#[from] HookError),
    /// Patch is malformed
    #[error("{0}")]
    Patch(#[from] PatchError),
}

/// Gives access to the current instruction stream of a function
///
/// The host is responsible for executing the edited stream from then on.
pub trait BodyAccessor {
    /// Current body of `target`, if the host knows it
    fn body_mut(&mut self, target: &TargetId) -> Option<&mut InstructionStream>;
}

/// Simple in-memory body table
#[derive(Debug, Default)]
pub struct BodyTable {
    /// Bodies by function
    bodies: HashMap<TargetId, InstructionStream>,
}
impl BodyTable {
    /// Creates an empty table
    pub fn new() -> Self {
        Self::default()
    }
    /// Sets the body of `target`, returning the previous one
    pub fn insert(
        &mut self,
        target: impl Into<TargetId>,
        body: InstructionStream,
    ) -> Option<InstructionStream> {
        self.bodies.insert(target.into(), body)
    }
    /// Current body of `target`
    pub fn get(&self, target: &TargetId) -> Option<&InstructionStream> {
        self.bodies.get(target)
    }
    /// Seals the body of `target`, committing it for execution. Returns whether the body exists.
    pub fn commit(&mut self, target: &TargetId) -> bool {
        self.bodies.get_mut(target).map(InstructionStream::seal).is_some()
    }
}
impl BodyAccessor for BodyTable {
    fn body_mut(&mut self, target: &TargetId) -> Option<&mut InstructionStream> {
        self.bodies.get_mut(target)
    }
}

/// What a module gets to touch while loading or unloading
pub struct LoadContext<'a> {
    /// Hooks on entity constructors
    pub hooks: &'a mut HookRegistry<EntityData, Entity>,
    /// Function bodies open for patching
    pub bodies: &'a mut dyn BodyAccessor,
}

/// Lifecycle entry points called by the host
///
/// `load` may be called more than once without an `unload` in between and must tolerate that.
/// Neither runs concurrently with the functions being patched.
pub trait Module {
    /// Installs hooks and applies patches
    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<(), LoadError>;
    /// Removes hooks and forgets applied patches so a later load starts fresh
    fn unload(&mut self, ctx: &mut LoadContext<'_>);
}
