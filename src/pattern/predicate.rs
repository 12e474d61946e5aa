//! Reusable predicate constructors for [`super::Pattern`]

use crate::code::Instruction;

/// Accepts any instruction
pub fn any<O>() -> impl Fn(&Instruction<O>, usize) -> bool {
    |_: &Instruction<O>, _: usize| true
}

/// Accepts instructions with exactly this opcode
pub fn opcode<O: PartialEq>(op: O) -> impl Fn(&Instruction<O>, usize) -> bool {
    move |instr: &Instruction<O>, _: usize| instr.opcode == op
}

/// Accepts instructions whose opcode is one of `ops`
///
/// Useful where builds differ only in encoding, e.g. `stloc.0` on one target and `stloc.1` on another.
pub fn opcode_in<O: PartialEq, const N: usize>(
    ops: [O; N],
) -> impl Fn(&Instruction<O>, usize) -> bool {
    move |instr: &Instruction<O>, _: usize| ops.contains(&instr.opcode)
}

/// Accepts `op` instructions whose method operand's name contains `name`
pub fn method_named<O: PartialEq>(
    op: O,
    name: &str,
) -> impl Fn(&Instruction<O>, usize) -> bool {
    let name = name.to_owned();
    move |instr: &Instruction<O>, _: usize| {
        instr.opcode == op
            && instr
                .method()
                .map_or(false, |method| method.name().contains(name.as_str()))
    }
}
