//! # Hook
//!
//! This module covers hooks, which run custom logic around or instead of a target function.
//!
//! Targets are identified by name. The host routes every call of a hookable function through [`HookRegistry::invoke`],
//! which is where installed handlers get their turn. How the host gets calls there (trampoline, vtable swap, generated stub)
//! is its own business.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Identity of a hookable function
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetId(Cow<'static, str>);
impl TargetId {
    /// Creates a target id from a static name
    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }
    /// Name of the target
    pub fn name(&self) -> &str {
        &self.0
    }
}
impl From<&'static str> for TargetId {
    fn from(name: &'static str) -> Self {
        Self::new(name)
    }
}
impl From<String> for TargetId {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}
impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// When a handler runs relative to the original
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Before the original. Sees the arguments, cannot change them or skip the original.
    Before,
    /// After the original. Sees the arguments and may adjust the result.
    After,
    /// Instead of the original. Receives the original and decides whether to call it.
    Replace,
}

/// Handler run before the original
pub type BeforeFn<A> = Box<dyn Fn(&A)>;
/// Handler run after the original
pub type AfterFn<A, R> = Box<dyn Fn(&A, &mut R)>;
/// Handler run instead of the original
pub type ReplaceFn<A, R> = Box<dyn Fn(&A, &dyn Fn(&A) -> R) -> R>;

/// Interception logic, tagged by kind
pub enum Handler<A, R> {
    /// See [`HookKind::Before`]
    Before(BeforeFn<A>),
    /// See [`HookKind::After`]
    After(AfterFn<A, R>),
    /// See [`HookKind::Replace`]
    Replace(ReplaceFn<A, R>),
}
impl<A, R> Handler<A, R> {
    /// Wraps a before handler
    pub fn before(f: impl Fn(&A) + 'static) -> Self {
        Self::Before(Box::new(f))
    }
    /// Wraps an after handler
    pub fn after(f: impl Fn(&A, &mut R) + 'static) -> Self {
        Self::After(Box::new(f))
    }
    /// Wraps a replace handler
    pub fn replace(f: impl Fn(&A, &dyn Fn(&A) -> R) -> R + 'static) -> Self {
        Self::Replace(Box::new(f))
    }
    /// Kind of this handler
    pub fn kind(&self) -> HookKind {
        match self {
            Self::Before(_) => HookKind::Before,
            Self::After(_) => HookKind::After,
            Self::Replace(_) => HookKind::Replace,
        }
    }
}
impl<A, R> fmt::Debug for Handler<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler::{:?}", self.kind())
    }
}

/// Errors when installing hooks
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HookError {
    /// A handler of this kind is already active on the target
    #[error("a {kind:?} hook is already installed on {target}")]
    AlreadyInstalled {
        /// Hooked function
        target: TargetId,
        /// Kind of the active handler
        kind: HookKind,
    },
}

/// Reference to an installed hook, used to uninstall it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookRef {
    /// Hooked function
    target: TargetId,
    /// Kind of the handler
    kind: HookKind,
    /// Installation serial, so a stale reference cannot remove a newer installation
    serial: u64,
}
impl HookRef {
    /// Hooked function
    pub fn target(&self) -> &TargetId {
        &self.target
    }
    /// Kind of the handler
    pub fn kind(&self) -> HookKind {
        self.kind
    }
}

/// An active installation
struct Installed<A, R> {
    /// Serial handed out in the matching [`HookRef`]
    serial: u64,
    /// The handler itself
    handler: Handler<A, R>,
}

/// Table of installed hooks for functions taking `A` and returning `R`
///
/// At most one handler per (target, kind) is active at a time.
pub struct HookRegistry<A, R> {
    /// Active installations
    entries: HashMap<(TargetId, HookKind), Installed<A, R>>,
    /// Next installation serial
    next_serial: u64,
}
impl<A, R> Default for HookRegistry<A, R> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_serial: 0,
        }
    }
}
impl<A, R> HookRegistry<A, R> {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handler` on `target`
    ///
    /// Fails with [`HookError::AlreadyInstalled`] if a handler of the same kind is already active there.
    pub fn install(
        &mut self,
        target: impl Into<TargetId>,
        handler: Handler<A, R>,
    ) -> Result<HookRef, HookError> {
        let target = target.into();
        let kind = handler.kind();
        let key = (target, kind);
        if self.entries.contains_key(&key) {
            let (target, kind) = key;
            return Err(HookError::AlreadyInstalled { target, kind });
        }

        let serial = self.next_serial;
        self.next_serial += 1;
        log::debug!("installing {:?} hook on {}", kind, key.0);
        let hook = HookRef {
            target: key.0.clone(),
            kind,
            serial,
        };
        self.entries.insert(key, Installed { serial, handler });
        Ok(hook)
    }

    /// Removes the installation `hook` refers to. Returns whether anything was removed.
    ///
    /// Uninstalling twice, or with a reference to an installation that was since replaced, is a no-op.
    pub fn uninstall(&mut self, hook: &HookRef) -> bool {
        let key = (hook.target.clone(), hook.kind);
        match self.entries.get(&key) {
            Some(installed) if installed.serial == hook.serial => {
                log::debug!("uninstalling {:?} hook on {}", hook.kind, hook.target);
                self.entries.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Whether a handler of `kind` is active on `target`
    pub fn is_installed(&self, target: &TargetId, kind: HookKind) -> bool {
        self.entries.contains_key(&(target.clone(), kind))
    }

    /// Whether `hook` still refers to an active installation
    pub fn is_active(&self, hook: &HookRef) -> bool {
        self.entries
            .get(&(hook.target.clone(), hook.kind))
            .map_or(false, |installed| installed.serial == hook.serial)
    }

    /// Number of active installations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is installed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Calls `target` through its hooks
    ///
    /// Runs the before handler, then the replace handler (handing it `original`) or `original` itself, then the after handler.
    /// Everything runs synchronously on the caller's thread.
    pub fn invoke(&self, target: &TargetId, args: &A, original: impl Fn(&A) -> R) -> R {
        if let Some(Handler::Before(before)) = self.handler(target, HookKind::Before) {
            before(args);
        }

        let mut result = match self.handler(target, HookKind::Replace) {
            Some(Handler::Replace(replace)) => replace(args, &original),
            _ => original(args),
        };

        if let Some(Handler::After(after)) = self.handler(target, HookKind::After) {
            after(args, &mut result);
        }
        result
    }

    /// Active handler of `kind` on `target`
    fn handler(&self, target: &TargetId, kind: HookKind) -> Option<&Handler<A, R>> {
        self.entries
            .get(&(target.clone(), kind))
            .map(|installed| &installed.handler)
    }
}
