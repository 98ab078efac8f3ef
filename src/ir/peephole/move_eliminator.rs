//! `MoveEliminator`: tracks, per physical register, which
//! `Value` is currently resident there, invalidated whenever an instruction
//! writes that register. Used by `redundancy_removal` to drop self-moves.

use crate::common::fx_hash::FxHashMap;
use crate::ir::ir::{Instruction, PhysReg, Value};
use crate::ir::peephole::allocator::RegisterAllocator;

pub struct MoveEliminator<'a, R: RegisterAllocator> {
    allocator: &'a R,
    resident: FxHashMap<PhysReg, Value>,
}

impl<'a, R: RegisterAllocator> MoveEliminator<'a, R> {
    pub fn new(allocator: &'a R) -> Self {
        Self {
            allocator,
            resident: FxHashMap::default(),
        }
    }

    /// `shouldBeEliminated`: true iff `src`/`dst` share a physical register
    /// at this instruction, or the eliminator already knows `dst`'s
    /// register currently holds `src`'s value. A wide move's second half
    /// never needs a separate check: the allocator always colors a wide
    /// value as a contiguous pair starting at its base register, so the
    /// bases matching implies both halves match.
    pub fn should_be_eliminated(&self, inst: &Instruction) -> bool {
        if !inst.kind.is_move() {
            return false;
        }
        let (Some(dest), Some(&src)) = (inst.output, inst.inputs.first()) else {
            return false;
        };
        match (
            self.allocator.register_for_value(dest, inst.number),
            self.allocator.register_for_value(src, inst.number),
        ) {
            (Some(d), Some(s)) if d == s => true,
            (Some(d), _) => self.resident.get(&d) == Some(&src),
            _ => false,
        }
    }

    /// Records that `inst` (if it defines a register-allocated output)
    /// overwrites whatever value used to be resident in that register.
    pub fn record_instruction(&mut self, inst: &Instruction) {
        if let Some(out) = inst.output {
            if let Some(reg) = self.allocator.register_for_value(out, inst.number) {
                self.resident.insert(reg, out);
            }
        }
    }
}
