//! # Patcher
//!
//! This module covers rewriting instruction streams: splicing a replacement over a window, remembering which patches already ran,
//! and the end-to-end lifecycle that ties matching, guarding and splicing together

pub mod guard;
pub mod rewrite;

use thiserror::Error;

use crate::code::{Instruction, InstructionStream};

/// Errors when editing a stream
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditError {
    /// Window to remove runs past the end of the stream
    #[error("cannot remove {remove} instructions at {position} from a stream of {len}")]
    OutOfRange {
        /// Start of the window
        position: usize,
        /// Number of instructions to remove
        remove: usize,
        /// Length of the stream
        len: usize,
    },
    /// Owning function has already been committed
    #[error("stream is sealed")]
    Sealed,
}

/// Checks that `remove` instructions starting at `position` can be spliced out of `stream`
pub fn check_range<O>(
    stream: &InstructionStream<O>,
    position: usize,
    remove: usize,
) -> Result<(), EditError> {
    if stream.is_sealed() {
        return Err(EditError::Sealed);
    }
    let len = stream.len();
    match position.checked_add(remove) {
        Some(end) if end <= len => Ok(()),
        _ => Err(EditError::OutOfRange {
            position,
            remove,
            len,
        }),
    }
}

/// Removes `remove` instructions at `position` and splices `insert` in their place, returning the change in stream length
///
/// No semantic validation happens here. Keeping the evaluation stack balanced is the job of whoever builds `insert`.
/// On error the stream is left untouched.
pub fn replace<O, I>(
    stream: &mut InstructionStream<O>,
    position: usize,
    remove: usize,
    insert: I,
) -> Result<isize, EditError>
where
    I: IntoIterator<Item = Instruction<O>>,
{
    check_range(stream, position, remove)?;
    let before = stream.len();
    stream
        .instructions
        .splice(position..position + remove, insert);
    Ok(stream.len() as isize - before as isize)
}
