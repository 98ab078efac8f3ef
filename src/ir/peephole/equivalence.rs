//! `InstructionEquivalence` and `BasicBlockEquivalence`:
//! equality that respects register coloring. Two instructions are
//! equivalent iff they share opcode, literal operands, operand arity/width,
//! and — resolved through the allocator at the instruction's own position —
//! the same physical registers for every input and output. Positions and
//! debug values are never part of this comparison; callers that need
//! position-exactness check it themselves.

use crate::common::fx_hash::FxHashMap;
use crate::common::types::RegWidth;
use crate::ir::ir::{BasicBlock, BlockId, ConstValue, Instruction, InstructionKind, IrCode, PhysReg, Value};
use crate::ir::peephole::allocator::RegisterAllocator;

/// Every value in this IR is defined exactly once; a single pass over all
/// blocks is enough to know each value's register width for the whole CFG.
/// Used to resolve the width of an instruction's *input* operands, which —
/// unlike its output — the instruction itself doesn't carry.
pub fn collect_value_widths(code: &IrCode) -> FxHashMap<Value, RegWidth> {
    let mut widths = FxHashMap::default();
    for block in code.blocks() {
        for inst in &block.instructions {
            if let (Some(v), Some(w)) = (inst.output, inst.output_width()) {
                widths.insert(v, w);
            }
        }
    }
    widths
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum OpcodeKey {
    Move { wide: bool },
    ConstI32(i32),
    ConstI64(i64),
    ConstF32(u32),
    ConstF64(u64),
    ConstNull,
    BinOp(&'static str),
    Throwing(&'static str),
    DebugLocalsChange(Vec<(PhysReg, Option<(String, crate::common::types::IrType)>)>),
    Goto(BlockId),
    CondJump(BlockId, BlockId),
    Return,
}

fn opcode_key(kind: &InstructionKind) -> OpcodeKey {
    match kind {
        InstructionKind::Move { wide } => OpcodeKey::Move { wide: *wide },
        InstructionKind::ConstNumber(ConstValue::I32(v)) => OpcodeKey::ConstI32(*v),
        InstructionKind::ConstNumber(ConstValue::I64(v)) => OpcodeKey::ConstI64(*v),
        InstructionKind::ConstNumber(ConstValue::F32(v)) => OpcodeKey::ConstF32(v.to_bits()),
        InstructionKind::ConstNumber(ConstValue::F64(v)) => OpcodeKey::ConstF64(v.to_bits()),
        InstructionKind::ConstNumber(ConstValue::Null) => OpcodeKey::ConstNull,
        InstructionKind::BinOp(op) => OpcodeKey::BinOp(op),
        InstructionKind::Throwing(op) => OpcodeKey::Throwing(op),
        InstructionKind::DebugLocalsChange(diff) => OpcodeKey::DebugLocalsChange(
            diff.iter()
                .map(|(r, li)| (*r, li.as_ref().map(|l| (l.name.clone(), l.ty))))
                .collect(),
        ),
        InstructionKind::Goto(target) => OpcodeKey::Goto(*target),
        InstructionKind::CondJump {
            true_target,
            false_target,
        } => OpcodeKey::CondJump(*true_target, *false_target),
        InstructionKind::Return => OpcodeKey::Return,
    }
}

/// A hashable, allocator-resolved projection of one instruction, suitable as
/// a `HashMap` bucket key (used by P1 to bucket predecessors and by P4 to
/// bucket join-block predecessors by terminator equivalence).
///
/// `output_width`/`input_widths` carry "the same count and widths of
/// register operands" (§4.1) alongside the registers themselves: two
/// instructions that land on the same starting register but disagree on
/// width (e.g. a narrow and a wide write both based at the same `PhysReg`)
/// must not compare equal, since they don't actually clobber the same set
/// of physical registers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EquivKey {
    opcode: OpcodeKey,
    output_reg: Option<PhysReg>,
    output_width: Option<RegWidthKey>,
    input_regs: Vec<Option<PhysReg>>,
    input_widths: Vec<RegWidthKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RegWidthKey {
    Narrow,
    Wide,
}

impl From<RegWidth> for RegWidthKey {
    fn from(w: RegWidth) -> Self {
        match w {
            RegWidth::Narrow => RegWidthKey::Narrow,
            RegWidth::Wide => RegWidthKey::Wide,
        }
    }
}

/// Wraps a `RegisterAllocator` to provide register-coloring-aware
/// instruction and block equivalence. `widths` resolves the register width
/// of an instruction's *input* operands — a property of the defining
/// instruction elsewhere in the CFG, not of this instruction — typically
/// built once per pass via [`collect_value_widths`].
pub struct InstructionEquivalence<'a, R: RegisterAllocator> {
    allocator: &'a R,
    widths: &'a FxHashMap<crate::ir::ir::Value, RegWidth>,
}

impl<'a, R: RegisterAllocator> InstructionEquivalence<'a, R> {
    pub fn new(allocator: &'a R, widths: &'a FxHashMap<crate::ir::ir::Value, RegWidth>) -> Self {
        Self { allocator, widths }
    }

    /// The canonical bucket key for `inst`, resolving every input/output's
    /// physical register at `inst`'s own instruction number, plus the
    /// output's own width and each input's width (defaulting to `Narrow`
    /// when the defining instruction isn't known — e.g. a block parameter
    /// with no recorded def — matching the convention
    /// `prefix_sharing`'s register-commutativity check already uses).
    pub fn key(&self, inst: &Instruction) -> EquivKey {
        EquivKey {
            opcode: opcode_key(&inst.kind),
            output_reg: inst
                .output
                .and_then(|v| self.allocator.register_for_value(v, inst.number)),
            output_width: inst.output_width().map(RegWidthKey::from),
            input_regs: inst
                .inputs
                .iter()
                .map(|v| self.allocator.register_for_value(*v, inst.number))
                .collect(),
            input_widths: inst
                .inputs
                .iter()
                .map(|v| {
                    RegWidthKey::from(self.widths.get(v).copied().unwrap_or(RegWidth::Narrow))
                })
                .collect(),
        }
    }

    pub fn equivalent(&self, a: &Instruction, b: &Instruction) -> bool {
        self.key(a) == self.key(b)
    }
}

/// `BasicBlockEquivalence`: two blocks are equivalent iff all
/// of their instructions, including the terminator, are pairwise
/// `InstructionEquivalence`-equal, in order.
pub struct BasicBlockEquivalence<'a, R: RegisterAllocator> {
    instr_eq: InstructionEquivalence<'a, R>,
}

impl<'a, R: RegisterAllocator> BasicBlockEquivalence<'a, R> {
    pub fn new(allocator: &'a R, widths: &'a FxHashMap<crate::ir::ir::Value, RegWidth>) -> Self {
        Self {
            instr_eq: InstructionEquivalence::new(allocator, widths),
        }
    }

    pub fn key(&self, block: &BasicBlock) -> Vec<EquivKey> {
        block.instructions.iter().map(|i| self.instr_eq.key(i)).collect()
    }

    pub fn equivalent(&self, a: &BasicBlock, b: &BasicBlock) -> bool {
        a.instructions.len() == b.instructions.len()
            && a.instructions
                .iter()
                .zip(&b.instructions)
                .all(|(ia, ib)| self.instr_eq.equivalent(ia, ib))
    }
}
