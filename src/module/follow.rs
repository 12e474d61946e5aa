//! Makes a watcher follow a configurable target
//!
//! Watchers normally look up one fixed kind of instance every update. This module tags watchers whose placement data
//! asks for the alternative, and rewrites the update body so the lookup goes through a [`Selector`] that reads that tag.
//!
//! The rewritten idiom is `this.Scene.Tracker.GetEntity<T>()` stored into a local:
//!
//! ```text
//! ldarg.0
//! call      Entity::get_Scene
//! callvirt  Scene::get_Tracker
//! callvirt  Tracker::GetEntity<T>
//! stloc.0   (stloc.1 on some builds)
//! ```
//!
//! The three calls are replaced by one call to [`FollowModule::tracked_actor`], which takes the `this` left on the stack.

use crate::code::{Instruction, OpCode};
use crate::hook::{Handler, HookRef, TargetId};
use crate::patcher::guard::{self, SharedGuard};
use crate::patcher::rewrite::{PatchOutcome, StreamPatch};
use crate::pattern::predicate::{method_named, opcode};
use crate::pattern::Pattern;
use crate::select::{InstanceLookup, Kind, Selector};
use crate::tag::Tagged;

use super::entity::{Entity, EntityData, InstanceConfig};
use super::{LoadContext, LoadError, Module};

/// Name of the method the rewritten call site invokes
pub const TRACKED_ACTOR_METHOD: &str = "FollowModule::tracked_actor";

/// Settings for [`FollowModule`]
#[derive(Debug, Clone)]
pub struct FollowConfig {
    /// Placement option that opts a watcher into variant A
    pub option_key: String,
    /// Tag attached to opted-in watchers
    pub tag_name: String,
    /// Watcher constructor
    pub ctor_target: TargetId,
    /// Watcher update method whose body gets rewritten
    pub update_target: TargetId,
    /// Identifier of the update rewrite
    pub patch_id: String,
    /// Kind followed by tagged watchers
    pub variant_a: Kind,
    /// Kind followed otherwise, as the unpatched code does
    pub variant_b: Kind,
}
impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            option_key: "followVariantA".to_owned(),
            tag_name: "followVariantA".to_owned(),
            ctor_target: TargetId::new("Watcher::.ctor"),
            update_target: TargetId::new("Watcher::Update"),
            patch_id: "follow.watcher_update".to_owned(),
            variant_a: Kind::new("Player"),
            variant_b: Kind::new("Crystal"),
        }
    }
}

/// Where the update rewrite stands for the current module session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchState {
    /// Nothing attempted since the last unload
    Unpatched,
    /// Body rewritten
    Patched,
    /// Body or window missing, running unpatched
    SkippedNotFound,
    /// Another load already applied the rewrite
    SkippedAlreadyDone,
}
impl From<PatchOutcome> for PatchState {
    fn from(outcome: PatchOutcome) -> Self {
        match outcome {
            PatchOutcome::Patched { .. } => Self::Patched,
            PatchOutcome::SkippedNotFound => Self::SkippedNotFound,
            PatchOutcome::SkippedAlreadyDone => Self::SkippedAlreadyDone,
        }
    }
}

/// Tags watchers at construction and redirects their target lookup
pub struct FollowModule {
    /// Settings
    config: FollowConfig,
    /// Choice made by the rewritten call site
    selector: Selector,
    /// Record of applied rewrites
    guard: SharedGuard,
    /// Constructor hook, while installed
    ctor_hook: Option<HookRef>,
    /// Lifecycle state of the update rewrite
    state: PatchState,
    /// Outcome of the most recent patch attempt
    last_outcome: Option<PatchOutcome>,
}
impl FollowModule {
    /// Creates a module sharing the process-wide guard
    pub fn new(config: FollowConfig) -> Self {
        Self::with_guard(config, guard::global())
    }
    /// Creates a module using `guard` to remember applied rewrites
    pub fn with_guard(config: FollowConfig, guard: SharedGuard) -> Self {
        let selector = Selector::new(
            &config.tag_name,
            config.variant_a.clone(),
            config.variant_b.clone(),
        );
        Self {
            config,
            selector,
            guard,
            ctor_hook: None,
            state: PatchState::Unpatched,
            last_outcome: None,
        }
    }
    /// Settings
    pub fn config(&self) -> &FollowConfig {
        &self.config
    }
    /// Lifecycle state of the update rewrite
    pub fn state(&self) -> PatchState {
        self.state
    }
    /// Outcome of the most recent patch attempt
    pub fn last_outcome(&self) -> Option<PatchOutcome> {
        self.last_outcome
    }

    /// What the rewritten update calls: the instance this watcher should follow right now
    pub fn tracked_actor<L>(&self, watcher: &Entity, lookup: &L) -> Option<L::Actor>
    where
        L: InstanceLookup + ?Sized,
    {
        self.selector.select(watcher, lookup)
    }

    /// Rewrite of the update body
    fn update_patch(&self) -> StreamPatch<OpCode> {
        let redirect = Instruction::call(OpCode::Call, TRACKED_ACTOR_METHOD);
        StreamPatch::new(self.config.patch_id.clone(), vec![redirect])
            .shape(tracker_lookup(OpCode::StLoc0))
            .shape(tracker_lookup(OpCode::StLoc1))
            .window(1, 3)
    }

    /// Installs the constructor hook unless this module already holds it. Returns whether this call installed it.
    fn install_ctor_hook(&mut self, ctx: &mut LoadContext<'_>) -> Result<bool, LoadError> {
        if let Some(hook) = &self.ctor_hook {
            if ctx.hooks.is_active(hook) {
                log::debug!("constructor hook on {} already installed", hook.target());
                return Ok(false);
            }
        }

        let key = self.config.option_key.clone();
        let tag = self.selector.tag();
        let hook = ctx.hooks.install(
            self.config.ctor_target.clone(),
            Handler::after(move |data: &EntityData, watcher: &mut Entity| {
                if data.bool(&key, false) {
                    watcher.tags_mut().insert(tag);
                }
            }),
        )?;
        self.ctor_hook = Some(hook);
        Ok(true)
    }

    /// Applies the update rewrite to the host's body, if it has one
    fn patch_update(&self, ctx: &mut LoadContext<'_>) -> Result<PatchOutcome, LoadError> {
        let target = &self.config.update_target;
        match ctx.bodies.body_mut(target) {
            Some(body) => {
                let patch = self.update_patch();
                let mut guard = guard::lock(&self.guard);
                Ok(patch.apply(&mut guard, body)?)
            }
            None => {
                log::warn!("no body for {}, leaving it unpatched", target);
                Ok(PatchOutcome::SkippedNotFound)
            }
        }
    }
}
impl Module for FollowModule {
    /// Installs the constructor hook and rewrites the update body
    ///
    /// A failed rewrite removes the hook again if this load installed it. Every load sets the state from its own outcome,
    /// except that an already applied rewrite does not downgrade [`PatchState::Patched`].
    fn load(&mut self, ctx: &mut LoadContext<'_>) -> Result<(), LoadError> {
        let installed = self.install_ctor_hook(ctx)?;

        let outcome = match self.patch_update(ctx) {
            Ok(outcome) => outcome,
            Err(err) => {
                if installed {
                    if let Some(hook) = self.ctor_hook.take() {
                        ctx.hooks.uninstall(&hook);
                    }
                }
                log::error!("loading follow module failed: {}", err);
                return Err(err);
            }
        };

        self.last_outcome = Some(outcome);
        if !(outcome == PatchOutcome::SkippedAlreadyDone && self.state == PatchState::Patched) {
            self.state = outcome.into();
        }
        Ok(())
    }

    /// Removes the constructor hook and forgets this module's own rewrite, so the next load can patch again
    ///
    /// Records of other patch ids in a shared guard are left alone.
    fn unload(&mut self, ctx: &mut LoadContext<'_>) {
        if let Some(hook) = self.ctor_hook.take() {
            ctx.hooks.uninstall(&hook);
        }
        guard::lock(&self.guard).forget(&self.config.patch_id);
        self.state = PatchState::Unpatched;
        self.last_outcome = None;
    }
}

/// Shape of the tracker lookup, ending in `store`
fn tracker_lookup(store: OpCode) -> Pattern<OpCode> {
    Pattern::new()
        .then(opcode(OpCode::LdArg0))
        .then(method_named(OpCode::Call, "get_Scene"))
        .then(method_named(OpCode::CallVirt, "get_Tracker"))
        .then(opcode(OpCode::CallVirt))
        .then(opcode(store))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{FollowConfig, FollowModule, PatchState, TRACKED_ACTOR_METHOD};
    use crate::code::{Instruction, InstructionStream, OpCode, Operand};
    use crate::hook::{Handler, HookError, HookKind, HookRegistry};
    use crate::module::entity::{Entity, EntityData};
    use crate::module::{BodyTable, LoadContext, LoadError, Module};
    use crate::patcher::guard::{self, IdempotencyGuard};
    use crate::patcher::rewrite::{PatchError, PatchOutcome};
    use crate::patcher::EditError;
    use crate::select::{InstanceLookup, Kind};
    use crate::tag::Tagged;

    /// Host with a hook table, a body table and a scene
    struct Host {
        /// Constructor hooks
        hooks: HookRegistry<EntityData, Entity>,
        /// Function bodies
        bodies: BodyTable,
        /// Next entity id
        next_id: u64,
    }
    impl Host {
        /// Host whose update body was built with `store` as the local store
        fn new(config: &FollowConfig, store: OpCode) -> Self {
            let mut bodies = BodyTable::new();
            bodies.insert(config.update_target.clone(), update_body(store));
            Self {
                hooks: HookRegistry::new(),
                bodies,
                next_id: 0,
            }
        }
        /// Runs `f` with a load context over this host
        fn with_ctx<T>(&mut self, f: impl FnOnce(&mut LoadContext<'_>) -> T) -> T {
            let mut ctx = LoadContext {
                hooks: &mut self.hooks,
                bodies: &mut self.bodies,
            };
            f(&mut ctx)
        }
        /// Constructs a watcher through the constructor hooks
        fn construct(&mut self, config: &FollowConfig, data: &EntityData) -> Entity {
            self.next_id += 1;
            let id = self.next_id;
            self.hooks
                .invoke(&config.ctor_target, data, move |_| Entity::new(id))
        }
        /// Current update body
        fn update(&self, config: &FollowConfig) -> &InstructionStream {
            self.bodies.get(&config.update_target).unwrap()
        }
    }

    /// Scene where both candidates are alive
    struct Scene;
    impl InstanceLookup for Scene {
        type Actor = String;

        fn find(&self, kind: &Kind) -> Option<Self::Actor> {
            Some(kind.name().to_lowercase())
        }
    }

    /// Scene where nothing is alive
    struct EmptyScene;
    impl InstanceLookup for EmptyScene {
        type Actor = String;

        fn find(&self, _: &Kind) -> Option<Self::Actor> {
            None
        }
    }

    /// Watcher update body: base update, the tracker lookup at index 2, then use of the local
    fn update_body(store: OpCode) -> InstructionStream {
        InstructionStream::new(vec![
            Instruction::new(OpCode::LdArg0),
            Instruction::call(OpCode::Call, "Entity::Update"),
            Instruction::new(OpCode::LdArg0),
            Instruction::call(OpCode::Call, "Entity::get_Scene"),
            Instruction::call(OpCode::CallVirt, "Scene::get_Tracker"),
            Instruction::call(OpCode::CallVirt, "Tracker::GetEntity<Crystal>"),
            Instruction::new(store),
            Instruction::new(OpCode::LdLoc0),
            Instruction::with_operand(OpCode::BrFalse, Operand::Label(12)),
            Instruction::new(OpCode::LdArg0),
            Instruction::new(OpCode::LdLoc0),
            Instruction::call(OpCode::CallVirt, "Watcher::LookAt"),
            Instruction::new(OpCode::Ret),
        ])
    }

    /// Config with a tag name private to one test
    fn config(tag: &str) -> FollowConfig {
        FollowConfig {
            tag_name: format!("module::follow::tests::{tag}"),
            ..FollowConfig::default()
        }
    }

    /// Module with its own guard so tests do not share patch records
    fn module(config: &FollowConfig) -> FollowModule {
        FollowModule::with_guard(config.clone(), Arc::new(Mutex::new(IdempotencyGuard::new())))
    }

    #[test]
    /// Loading rewrites the lookup into one call and keeps `this` and the store
    fn test_load_rewrites_update() {
        let config = config("rewrite");
        let mut host = Host::new(&config, OpCode::StLoc0);
        let mut follow = module(&config);

        host.with_ctx(|ctx| follow.load(ctx)).unwrap();

        assert_eq!(follow.state(), PatchState::Patched);
        assert_eq!(
            follow.last_outcome(),
            Some(PatchOutcome::Patched {
                at: 2,
                shape: 0,
                delta: -2
            })
        );
        let body = host.update(&config);
        assert_eq!(body.len(), 11);
        assert_eq!(body[2].opcode, OpCode::LdArg0);
        assert_eq!(body[3], Instruction::call(OpCode::Call, TRACKED_ACTOR_METHOD));
        assert_eq!(body[4].opcode, OpCode::StLoc0);
        assert_eq!(body[5].opcode, OpCode::LdLoc0);
    }

    #[test]
    /// The alternate build shape is recognized too
    fn test_alternate_shape() {
        let config = config("alternate");
        let mut host = Host::new(&config, OpCode::StLoc1);
        let mut follow = module(&config);

        host.with_ctx(|ctx| follow.load(ctx)).unwrap();

        assert!(matches!(
            follow.last_outcome(),
            Some(PatchOutcome::Patched { shape: 1, .. })
        ));
        assert_eq!(host.update(&config)[4].opcode, OpCode::StLoc1);
    }

    #[test]
    /// Loading twice leaves the body as the first load left it
    fn test_double_load() {
        let config = config("double");
        let mut host = Host::new(&config, OpCode::StLoc0);
        let mut follow = module(&config);

        host.with_ctx(|ctx| follow.load(ctx)).unwrap();
        let after_first = host.update(&config).clone();

        host.with_ctx(|ctx| follow.load(ctx)).unwrap();
        assert_eq!(host.update(&config), &after_first);
        assert_eq!(follow.last_outcome(), Some(PatchOutcome::SkippedAlreadyDone));
        assert_eq!(follow.state(), PatchState::Patched);
        assert_eq!(host.hooks.len(), 1);
    }

    #[test]
    /// A second module sharing the guard does not patch again
    fn test_shared_guard() {
        let config = config("shared");
        let guard = Arc::new(Mutex::new(IdempotencyGuard::new()));
        let mut first = FollowModule::with_guard(config.clone(), guard.clone());
        let mut second = FollowModule::with_guard(config.clone(), guard);

        let mut host = Host::new(&config, OpCode::StLoc0);
        host.with_ctx(|ctx| first.load(ctx)).unwrap();
        assert_eq!(first.state(), PatchState::Patched);

        let mut other = Host::new(&config, OpCode::StLoc0);
        other.with_ctx(|ctx| second.load(ctx)).unwrap();
        assert_eq!(second.state(), PatchState::SkippedAlreadyDone);
        assert_eq!(other.update(&config), &update_body(OpCode::StLoc0));
    }

    #[test]
    /// Unload removes the hook and lets a fresh load patch again
    fn test_unload_then_reload() {
        let config = config("reload");
        let mut host = Host::new(&config, OpCode::StLoc0);
        let mut follow = module(&config);

        host.with_ctx(|ctx| follow.load(ctx)).unwrap();
        host.with_ctx(|ctx| follow.unload(ctx));
        assert!(host.hooks.is_empty());
        assert_eq!(follow.state(), PatchState::Unpatched);

        // unloading twice is harmless
        host.with_ctx(|ctx| follow.unload(ctx));

        host.bodies
            .insert(config.update_target.clone(), update_body(OpCode::StLoc0));
        host.with_ctx(|ctx| follow.load(ctx)).unwrap();
        assert_eq!(follow.state(), PatchState::Patched);
        assert!(host
            .hooks
            .is_installed(&config.ctor_target, HookKind::After));
    }

    #[test]
    /// A changed upstream body is left alone without failing the load
    fn test_pattern_not_found() {
        let config = config("missing");
        let mut host = Host::new(&config, OpCode::StLoc0);
        host.bodies.insert(
            config.update_target.clone(),
            InstructionStream::new(vec![Instruction::new(OpCode::Ret)]),
        );
        let mut follow = module(&config);

        host.with_ctx(|ctx| follow.load(ctx)).unwrap();
        assert_eq!(follow.state(), PatchState::SkippedNotFound);
        assert_eq!(host.update(&config).len(), 1);
        // the constructor hook still went in
        assert_eq!(host.hooks.len(), 1);
    }

    #[test]
    /// A missing body is treated like a missing window
    fn test_body_not_found() {
        let config = FollowConfig {
            update_target: "Other::Update".into(),
            ..config("no_body")
        };
        let mut host = Host::new(&FollowConfig::default(), OpCode::StLoc0);
        let mut follow = module(&config);

        host.with_ctx(|ctx| follow.load(ctx)).unwrap();
        assert_eq!(follow.state(), PatchState::SkippedNotFound);
        assert_eq!(
            host.update(&FollowConfig::default()),
            &update_body(OpCode::StLoc0)
        );
    }

    #[test]
    /// A body that shows up after a skipped load is patched by the next load
    fn test_body_arrives_later() {
        let config = FollowConfig {
            update_target: "Late::Update".into(),
            ..config("late_body")
        };
        let mut host = Host::new(&FollowConfig::default(), OpCode::StLoc0);
        let mut follow = module(&config);

        host.with_ctx(|ctx| follow.load(ctx)).unwrap();
        assert_eq!(follow.state(), PatchState::SkippedNotFound);

        host.bodies
            .insert(config.update_target.clone(), update_body(OpCode::StLoc0));
        host.with_ctx(|ctx| follow.load(ctx)).unwrap();
        assert_eq!(follow.state(), PatchState::Patched);
        assert!(follow.last_outcome().unwrap().is_patched());
        assert_eq!(host.update(&config).len(), 11);

        host.with_ctx(|ctx| follow.load(ctx)).unwrap();
        assert_eq!(follow.state(), PatchState::Patched);
        assert_eq!(follow.last_outcome(), Some(PatchOutcome::SkippedAlreadyDone));
    }

    #[test]
    /// Unloading forgets only this module's rewrite in a shared guard
    fn test_unload_keeps_other_records() {
        let config = config("forget");
        let shared = Arc::new(Mutex::new(IdempotencyGuard::new()));
        assert!(guard::lock(&shared).try_begin_patch("other.patch"));
        let mut follow = FollowModule::with_guard(config.clone(), shared.clone());
        let mut host = Host::new(&config, OpCode::StLoc0);

        host.with_ctx(|ctx| follow.load(ctx)).unwrap();
        assert!(guard::lock(&shared).is_applied(&config.patch_id));

        host.with_ctx(|ctx| follow.unload(ctx));
        let records = guard::lock(&shared);
        assert!(!records.is_applied(&config.patch_id));
        assert!(records.is_applied("other.patch"));
    }

    #[test]
    /// A rewrite that fails leaves no constructor hook behind
    fn test_failed_load_rolls_back() {
        let config = config("sealed");
        let shared = Arc::new(Mutex::new(IdempotencyGuard::new()));
        let mut follow = FollowModule::with_guard(config.clone(), shared.clone());
        let mut host = Host::new(&config, OpCode::StLoc0);
        assert!(host.bodies.commit(&config.update_target));

        let err = host.with_ctx(|ctx| follow.load(ctx)).unwrap_err();
        assert_eq!(err, LoadError::Patch(PatchError::Edit(EditError::Sealed)));
        assert!(host.hooks.is_empty());
        assert_eq!(follow.state(), PatchState::Unpatched);
        assert!(guard::lock(&shared).is_empty());
        assert_eq!(
            host.update(&config).as_slice(),
            update_body(OpCode::StLoc0).as_slice()
        );

        host.bodies
            .insert(config.update_target.clone(), update_body(OpCode::StLoc0));
        host.with_ctx(|ctx| follow.load(ctx)).unwrap();
        assert_eq!(follow.state(), PatchState::Patched);
        assert_eq!(host.hooks.len(), 1);
    }

    #[test]
    /// A constructor hook owned by someone else fails the load
    fn test_foreign_hook() {
        let config = config("foreign");
        let mut host = Host::new(&config, OpCode::StLoc0);
        host.hooks
            .install(config.ctor_target.clone(), Handler::after(|_, _| {}))
            .unwrap();
        let mut follow = module(&config);

        let err = host.with_ctx(|ctx| follow.load(ctx)).unwrap_err();
        assert_eq!(
            err,
            LoadError::Hook(HookError::AlreadyInstalled {
                target: config.ctor_target.clone(),
                kind: HookKind::After
            })
        );
        assert_eq!(follow.state(), PatchState::Unpatched);
    }

    #[test]
    /// Construction reads the option once and the selector follows the resulting tag
    fn test_tag_drives_selection() {
        let config = config("select");
        let mut host = Host::new(&config, OpCode::StLoc0);
        let mut follow = module(&config);
        host.with_ctx(|ctx| follow.load(ctx)).unwrap();

        let plain = host.construct(&config, &EntityData::new("watcher"));
        let opted_out = host.construct(
            &config,
            &EntityData::new("watcher").with("followVariantA", "false"),
        );
        let opted_in = host.construct(
            &config,
            &EntityData::new("watcher").with("followVariantA", "true"),
        );

        assert!(!plain.tag_check(&config.tag_name));
        assert!(!opted_out.tag_check(&config.tag_name));
        assert!(opted_in.tag_check(&config.tag_name));

        assert_eq!(follow.tracked_actor(&plain, &Scene).as_deref(), Some("crystal"));
        assert_eq!(follow.tracked_actor(&opted_out, &Scene).as_deref(), Some("crystal"));
        assert_eq!(follow.tracked_actor(&opted_in, &Scene).as_deref(), Some("player"));
        assert_eq!(follow.tracked_actor(&opted_in, &EmptyScene), None);
    }

    #[test]
    /// Tagging after construction flips the selection on the next call
    fn test_select_before_attach() {
        let config = config("late");
        let follow = module(&config);
        let mut watcher = Entity::new(1);

        assert_eq!(follow.tracked_actor(&watcher, &Scene).as_deref(), Some("crystal"));
        watcher.add_tag(&config.tag_name);
        assert_eq!(follow.tracked_actor(&watcher, &Scene).as_deref(), Some("player"));
    }

    #[test]
    /// Without the module loaded, construction leaves watchers untagged
    fn test_unloaded_construct() {
        let config = config("unloaded");
        let mut host = Host::new(&config, OpCode::StLoc0);
        let watcher = host.construct(
            &config,
            &EntityData::new("watcher").with("followVariantA", "true"),
        );
        assert!(watcher.tags().is_empty());
    }
}
