//! # x64
//!
//! Decodes native x86-64 function bodies into instruction streams, so compiled code can be matched with the same patterns as managed code

use iced_x86::{Code, Decoder, DecoderOptions, FlowControl, IcedError, Mnemonic, OpKind};
use thiserror::Error;

use super::{Instruction, InstructionStream, Operand};

/// Native instruction stream, keyed by mnemonic
pub type NativeStream = InstructionStream<Mnemonic>;

/// Errors while decoding native code
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Error creating the decoder
    #[error("{0}")]
    Iced(#[from] IcedError),
    /// Bytes at `offset` do not decode to a valid instruction
    #[error("invalid instruction at offset {offset:#x}")]
    Invalid {
        /// Offset into the decoded buffer
        offset: usize,
    },
}

/// Decodes `code` as 64-bit machine code located at `ip`
///
/// Branch and call targets become [`Operand::Address`], rip-relative memory operands become the absolute address they resolve to,
/// and immediates become [`Operand::Int`]. Everything else carries no operand.
pub fn decode(code: &[u8], ip: u64) -> Result<NativeStream, DecodeError> {
    let mut decoder = Decoder::try_with_ip(64, code, ip, DecoderOptions::NONE)?;
    let mut instructions = Vec::new();

    while decoder.can_decode() {
        let offset = decoder.position();
        let instr = decoder.decode();
        if instr.code() == Code::INVALID {
            return Err(DecodeError::Invalid { offset });
        }
        instructions.push(Instruction {
            opcode: instr.mnemonic(),
            operand: operand(&instr),
        });
    }

    Ok(InstructionStream::new(instructions))
}

/// Picks the operand worth matching on for a decoded instruction
fn operand(instr: &iced_x86::Instruction) -> Option<Operand> {
    match instr.flow_control() {
        FlowControl::Call | FlowControl::UnconditionalBranch | FlowControl::ConditionalBranch
            if instr.op_count() > 0 && is_near_branch(instr.op_kind(0)) =>
        {
            return Some(Operand::Address(instr.near_branch_target()));
        }
        _ => {}
    }

    if instr.is_ip_rel_memory_operand() {
        return Some(Operand::Address(instr.ip_rel_memory_address()));
    }

    (0..instr.op_count())
        .find(|&i| is_immediate(instr.op_kind(i)))
        .map(|i| Operand::Int(instr.immediate(i) as i64))
}

/// Whether `kind` is a near branch target
fn is_near_branch(kind: OpKind) -> bool {
    matches!(
        kind,
        OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64
    )
}

/// Whether `kind` is an immediate
fn is_immediate(kind: OpKind) -> bool {
    matches!(
        kind,
        OpKind::Immediate8
            | OpKind::Immediate16
            | OpKind::Immediate32
            | OpKind::Immediate64
            | OpKind::Immediate8to16
            | OpKind::Immediate8to32
            | OpKind::Immediate8to64
            | OpKind::Immediate32to64
    )
}
