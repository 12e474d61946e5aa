//! # Code
//!
//! This module covers instruction streams, the ordered instruction sequences that make up a function body

pub mod x64;

use std::fmt;
use std::ops::Index;

/// Operation codes of the managed instruction set that bodies are written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// No operation
    Nop,
    /// Load argument 0 (`this` for instance methods)
    LdArg0,
    /// Load argument 1
    LdArg1,
    /// Load the argument given by the operand
    LdArg,
    /// Load local 0
    LdLoc0,
    /// Load local 1
    LdLoc1,
    /// Load the local given by the operand
    LdLoc,
    /// Store into local 0
    StLoc0,
    /// Store into local 1
    StLoc1,
    /// Store into local 2
    StLoc2,
    /// Store into local 3
    StLoc3,
    /// Store into the local given by the operand
    StLoc,
    /// Push a 32-bit integer constant
    LdcI4,
    /// Push a null reference
    LdNull,
    /// Load the field given by the operand
    LdFld,
    /// Store into the field given by the operand
    StFld,
    /// Static call to the method given by the operand
    Call,
    /// Virtual call to the method given by the operand
    CallVirt,
    /// Duplicate the top of the stack
    Dup,
    /// Discard the top of the stack
    Pop,
    /// Unconditional branch
    Br,
    /// Branch if the top of the stack is true
    BrTrue,
    /// Branch if the top of the stack is false
    BrFalse,
    /// Return from the method
    Ret,
}

/// Reference to a method, as carried by call instructions
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Fully qualified name of the method
    name: String,
}
impl MethodRef {
    /// Creates a new method reference
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
    /// Name of the referenced method
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Typed operand of an instruction
///
/// The operand type is expected to match the operation code; nothing here validates that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// Integer constant or immediate
    Int(i64),
    /// Argument or local slot index
    Slot(u16),
    /// Branch target, as an instruction index
    Label(usize),
    /// Absolute address, used by native code
    Address(u64),
    /// String constant
    Str(String),
    /// Field name
    Field(String),
    /// Method reference
    Method(MethodRef),
}
impl Operand {
    /// Returns the referenced method if this operand is one
    pub fn method(&self) -> Option<&MethodRef> {
        match self {
            Self::Method(m) => Some(m),
            _ => None,
        }
    }
}

/// A single instruction: an operation code with an optional operand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction<O = OpCode> {
    /// Operation code
    pub opcode: O,
    /// Operand, if the operation takes one
    pub operand: Option<Operand>,
}
impl<O> Instruction<O> {
    /// Creates an instruction without an operand
    pub fn new(opcode: O) -> Self {
        Self {
            opcode,
            operand: None,
        }
    }
    /// Creates an instruction with an operand
    pub fn with_operand(opcode: O, operand: Operand) -> Self {
        Self {
            opcode,
            operand: Some(operand),
        }
    }
    /// Creates a call-like instruction referencing `method`
    pub fn call(opcode: O, method: impl Into<String>) -> Self {
        Self::with_operand(opcode, Operand::Method(MethodRef::new(method)))
    }
    /// Returns the referenced method if the operand is one
    pub fn method(&self) -> Option<&MethodRef> {
        self.operand.as_ref().and_then(Operand::method)
    }
}
impl<O: fmt::Debug> fmt::Display for Instruction<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operand {
            Some(operand) => write!(f, "{:?} {:?}", self.opcode, operand),
            None => write!(f, "{:?}", self.opcode),
        }
    }
}

/// Ordered instruction sequence owned by one function body
///
/// The stream can only be changed through [`crate::patcher::replace`], and only until it is sealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionStream<O = OpCode> {
    /// Instructions in execution order
    pub(crate) instructions: Vec<Instruction<O>>,
    /// Set once the owning function has been committed for execution
    pub(crate) sealed: bool,
}
impl<O> InstructionStream<O> {
    /// Creates an unsealed stream from a list of instructions
    pub fn new(instructions: Vec<Instruction<O>>) -> Self {
        Self {
            instructions,
            sealed: false,
        }
    }
    /// Number of instructions in the stream
    pub fn len(&self) -> usize {
        self.instructions.len()
    }
    /// Whether the stream has no instructions
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
    /// Instruction at `index`, if any
    pub fn get(&self, index: usize) -> Option<&Instruction<O>> {
        self.instructions.get(index)
    }
    /// Iterates over the instructions in order
    pub fn iter(&self) -> std::slice::Iter<'_, Instruction<O>> {
        self.instructions.iter()
    }
    /// Instructions as a slice
    pub fn as_slice(&self) -> &[Instruction<O>] {
        &self.instructions
    }
    /// Marks the stream as committed. Further edits fail.
    pub fn seal(&mut self) {
        self.sealed = true;
    }
    /// Whether the stream has been committed
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}
impl<O> Index<usize> for InstructionStream<O> {
    type Output = Instruction<O>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.instructions[index]
    }
}
impl<O> FromIterator<Instruction<O>> for InstructionStream<O> {
    fn from_iter<T: IntoIterator<Item = Instruction<O>>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
impl<'a, O> IntoIterator for &'a InstructionStream<O> {
    type Item = &'a Instruction<O>;
    type IntoIter = std::slice::Iter<'a, Instruction<O>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
