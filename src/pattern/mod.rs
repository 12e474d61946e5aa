//! # Pattern
//!
//! This module covers patterns, which locate a known instruction idiom inside an instruction stream.
//!
//! A pattern is an ordered list of predicates. Predicate `i` is asked about the instruction at offset `i` of a candidate window,
//! together with that instruction's absolute position. Because the same source can compile to slightly different shapes
//! (a different local slot, a different load opcode), callers supply one pattern per known shape and use [`find_first_of`].

pub mod predicate;

use std::fmt;

use thiserror::Error;

use crate::code::{Instruction, InstructionStream};

/// A single acceptance test over an instruction and its absolute position
pub type Predicate<O> = Box<dyn Fn(&Instruction<O>, usize) -> bool>;

/// Errors from pattern matching. A missing match is not an error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    /// Pattern has no predicates and would match everywhere
    #[error("empty pattern")]
    Empty,
}

/// How a pattern is placed over a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Scan forward from the start hint for the first matching window
    #[default]
    Contiguous,
    /// Only test the window beginning exactly at the start hint
    Anchored,
}

/// Ordered list of per-position predicates
pub struct Pattern<O> {
    /// Predicates, one per window offset
    predicates: Vec<Predicate<O>>,
    /// Placement mode
    mode: MatchMode,
}
impl<O> Pattern<O> {
    /// Creates an empty, contiguous pattern
    pub fn new() -> Self {
        Self {
            predicates: Vec::new(),
            mode: MatchMode::Contiguous,
        }
    }
    /// Creates an empty pattern that only matches at the start hint
    pub fn anchored() -> Self {
        Self {
            predicates: Vec::new(),
            mode: MatchMode::Anchored,
        }
    }
    /// Appends a predicate for the next window offset
    pub fn then<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Instruction<O>, usize) -> bool + 'static,
    {
        self.predicates.push(Box::new(predicate));
        self
    }
    /// Window length
    pub fn len(&self) -> usize {
        self.predicates.len()
    }
    /// Whether the pattern has no predicates
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
    /// Placement mode
    pub fn mode(&self) -> MatchMode {
        self.mode
    }
    /// Whether every predicate accepts the window starting at `start`
    fn matches_at(&self, instructions: &[Instruction<O>], start: usize) -> bool {
        let window = start
            .checked_add(self.len())
            .and_then(|end| instructions.get(start..end));
        match window {
            Some(window) => self
                .predicates
                .iter()
                .zip(window)
                .enumerate()
                .all(|(i, (predicate, instr))| predicate(instr, start + i)),
            None => false,
        }
    }
}
impl<O> Default for Pattern<O> {
    fn default() -> Self {
        Self::new()
    }
}
impl<O> fmt::Debug for Pattern<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pattern")
            .field("len", &self.len())
            .field("mode", &self.mode)
            .finish()
    }
}

/// Returns the start of the first window at or after `start` that `pattern` accepts
///
/// `Ok(None)` means the stream holds no such window. This is expected when the target changed upstream, and the caller decides whether to skip.
pub fn find_first<O>(
    stream: &InstructionStream<O>,
    pattern: &Pattern<O>,
    start: usize,
) -> Result<Option<usize>, PatternError> {
    if pattern.is_empty() {
        return Err(PatternError::Empty);
    }
    let instructions = stream.as_slice();
    let found = match pattern.mode {
        MatchMode::Anchored => Some(start).filter(|&s| pattern.matches_at(instructions, s)),
        MatchMode::Contiguous => {
            let last = instructions.len().checked_sub(pattern.len());
            last.and_then(|last| (start..=last).find(|&s| pattern.matches_at(instructions, s)))
        }
    };
    Ok(found)
}

/// Tries each shape in order and returns the first match as `(position, shape index)`
pub fn find_first_of<O>(
    stream: &InstructionStream<O>,
    shapes: &[Pattern<O>],
    start: usize,
) -> Result<Option<(usize, usize)>, PatternError> {
    for (index, shape) in shapes.iter().enumerate() {
        if let Some(position) = find_first(stream, shape, start)? {
            return Ok(Some((position, index)));
        }
    }
    Ok(None)
}
