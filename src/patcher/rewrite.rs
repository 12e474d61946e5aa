//! Rewrites a known instruction window exactly once per module session
//!
//! A [`StreamPatch`] finds the first window matching one of its shapes, then splices its replacement over part of that window.
//! The [`IdempotencyGuard`] gates the splice so that running the same patch again is a no-op.

use thiserror::Error;

use crate::code::{Instruction, InstructionStream};
use crate::pattern::{find_first_of, Pattern, PatternError};

use super::guard::IdempotencyGuard;
use super::{check_range, replace, EditError};

/// Errors that abort a patch. These are authoring mistakes, not environment mismatches.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    /// A shape could not be used for matching
    #[error("{0}")]
    Pattern(#[from] PatternError),
    /// The splice window was invalid
    #[error("{0}")]
    Edit(#[from] EditError),
    /// The splice window reaches past the end of the matched shape
    #[error("window {skip}+{remove} does not fit shape {shape} of length {len}")]
    WindowExceedsShape {
        /// Index of the matched shape
        shape: usize,
        /// Length of the matched shape
        len: usize,
        /// Kept prefix
        skip: usize,
        /// Removed instructions
        remove: usize,
    },
}

/// Result of attempting a patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Replacement was spliced in
    Patched {
        /// Start of the matched window
        at: usize,
        /// Index of the shape that matched
        shape: usize,
        /// Change in stream length
        delta: isize,
    },
    /// No shape matched. The target keeps running unpatched.
    SkippedNotFound,
    /// The patch already ran this session
    SkippedAlreadyDone,
}
impl PatchOutcome {
    /// Whether the body was changed by this attempt
    pub fn is_patched(&self) -> bool {
        matches!(self, Self::Patched { .. })
    }
}

/// Description of one rewrite: what to look for and what to put in its place
pub struct StreamPatch<O> {
    /// Identifier used by the idempotency guard
    id: String,
    /// Known shapes of the target window, tried in order
    shapes: Vec<Pattern<O>>,
    /// Kept prefix and removed count inside the match. `None` removes the whole match.
    window: Option<(usize, usize)>,
    /// Instructions spliced in place of the removed ones
    replacement: Vec<Instruction<O>>,
}
impl<O: Clone> StreamPatch<O> {
    /// Creates a patch that replaces the whole matched window
    pub fn new(id: impl Into<String>, replacement: Vec<Instruction<O>>) -> Self {
        Self {
            id: id.into(),
            shapes: Vec::new(),
            window: None,
            replacement,
        }
    }
    /// Adds a known shape. Each shape must be at least `skip + remove` long, which is checked when it matches.
    pub fn shape(mut self, pattern: Pattern<O>) -> Self {
        self.shapes.push(pattern);
        self
    }
    /// Keeps `skip` matched instructions and removes the `remove` after them
    pub fn window(mut self, skip: usize, remove: usize) -> Self {
        self.window = Some((skip, remove));
        self
    }
    /// Identifier used by the guard
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Applies the patch to `stream`
    ///
    /// Already-applied patches are skipped before matching, so a rewritten body is never scanned for a second window.
    /// A missing window is reported as [`PatchOutcome::SkippedNotFound`] and does not consume the identifier.
    pub fn apply(
        &self,
        guard: &mut IdempotencyGuard,
        stream: &mut InstructionStream<O>,
    ) -> Result<PatchOutcome, PatchError> {
        if guard.is_applied(&self.id) {
            log::debug!("patch {} already applied, skipping", self.id);
            return Ok(PatchOutcome::SkippedAlreadyDone);
        }

        let Some((at, shape)) = find_first_of(stream, &self.shapes, 0)? else {
            log::warn!("patch {}: target window not found, leaving body unpatched", self.id);
            return Ok(PatchOutcome::SkippedNotFound);
        };

        let len = self.shapes[shape].len();
        let (skip, remove) = self.window.unwrap_or((0, len));
        if skip.checked_add(remove).map_or(true, |end| end > len) {
            return Err(PatchError::WindowExceedsShape {
                shape,
                len,
                skip,
                remove,
            });
        }

        let position = at + skip;
        check_range(stream, position, remove)?;
        if !guard.try_begin_patch(&self.id) {
            return Ok(PatchOutcome::SkippedAlreadyDone);
        }

        log::info!(
            "patch {}: rewriting at index {} (shape {})",
            self.id,
            at,
            shape
        );
        let delta = replace(stream, position, remove, self.replacement.iter().cloned())?;
        Ok(PatchOutcome::Patched { at, shape, delta })
    }
}
