//! P2: Redundancy Removal.
//!
//! Runs independently per block, maintaining a block-local
//! `register -> ConstNumber` map of known-resident constants. The map never
//! flows across block boundaries: two predecessors of a join can hold
//! different constants in the same register.

use crate::common::fx_hash::FxHashMap;
use crate::ir::ir::{ConstValue, Instruction, InstructionKind, IrCode, PhysReg};
use crate::ir::peephole::allocator::{LiveKind, RegisterAllocator};
use crate::ir::peephole::move_eliminator::MoveEliminator;

/// Runs P2 over every block. Returns the number of instructions removed.
pub fn run(code: &mut IrCode, allocator: &mut impl RegisterAllocator) -> usize {
    let mut removed = 0;
    for block_id in code.block_ids() {
        let block = code.block_mut(block_id);
        let kept = run_block(&block.instructions, &*allocator);
        removed += block.instructions.len() - kept.len();
        block.instructions = kept;
    }
    removed
}

fn run_block(instructions: &[Instruction], allocator: &impl RegisterAllocator) -> Vec<Instruction> {
    let mut move_eliminator = MoveEliminator::new(allocator);
    let mut resident: FxHashMap<PhysReg, ConstValue> = FxHashMap::default();
    let mut kept = Vec::with_capacity(instructions.len());

    for inst in instructions {
        if inst.kind.is_move() && move_eliminator.should_be_eliminated(inst) {
            continue;
        }

        let reg = inst
            .output
            .and_then(|v| allocator.register_for_value(v, inst.number));

        // The rematerializable check must happen regardless of whether the
        // allocator still reports a register for this definition: §4.4
        // defines "spilledAndRematerializable" as the allocator having
        // decided *not* to keep the definition in a register at all, which
        // this crate's `RegisterAllocator` contract represents by
        // `register_for_value` returning `None` at the defining instruction
        // — the exact case the old `(ConstNumber, Some(r))` match arm
        // skipped, silently keeping instructions the spec says to drop.
        if let (InstructionKind::ConstNumber(value), Some(output)) = (&inst.kind, inst.output) {
            let value = *value;
            if allocator.live_kind_at_definition(output) == LiveKind::Rematerializable {
                move_eliminator.record_instruction(inst);
                continue;
            }
            if let Some(r) = reg {
                if resident.get(&r).is_some_and(|known| known.same_value(value)) {
                    move_eliminator.record_instruction(inst);
                    continue;
                }
                invalidate_clobbered_upper_half(&mut resident, r);
                resident.insert(r, value);
                if value.ty().is_wide() {
                    resident.remove(&r.next());
                }
            }
        } else if let Some(r) = reg {
            let width = inst.output_width().expect("output present implies a width");
            resident.remove(&r);
            if width.registers() == 2 {
                resident.remove(&r.next());
            }
            invalidate_clobbered_upper_half(&mut resident, r);
        }

        move_eliminator.record_instruction(inst);
        kept.push(inst.clone());
    }

    kept
}

/// A wide constant resident at `r - 1` has had its upper half (`r`)
/// clobbered; it no longer describes a coherent value.
fn invalidate_clobbered_upper_half(resident: &mut FxHashMap<PhysReg, ConstValue>, r: PhysReg) {
    if let Some(lower) = r.prev() {
        if resident.get(&lower).is_some_and(|v| v.ty().is_wide()) {
            resident.remove(&lower);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ir::{BasicBlock, BlockId, Instruction, InstructionKind, PhysReg, Value};
    use crate::ir::peephole::testing::MockAllocator;

    fn const_inst(number: u32, v: Value, value: ConstValue) -> Instruction {
        Instruction::new(number, InstructionKind::ConstNumber(value)).with_output(v)
    }

    #[test]
    fn redundant_reload_of_same_constant_is_removed() {
        let mut alloc = MockAllocator::new();
        let (v1, v2) = (Value(1), Value(2));
        alloc.assign(v1, 0, PhysReg(0));
        alloc.assign(v2, 1, PhysReg(0));

        let mut block = BasicBlock::new(BlockId(0));
        block
            .instructions
            .push(const_inst(0, v1, ConstValue::I32(7)));
        block
            .instructions
            .push(const_inst(1, v2, ConstValue::I32(7)));
        block
            .instructions
            .push(Instruction::new(2, InstructionKind::Return));

        let kept = run_block(&block.instructions, &alloc);
        assert_eq!(kept.len(), 2, "second load of the same constant into r0 is redundant");
    }

    #[test]
    fn different_constant_in_same_register_is_kept() {
        let mut alloc = MockAllocator::new();
        let (v1, v2) = (Value(1), Value(2));
        alloc.assign(v1, 0, PhysReg(0));
        alloc.assign(v2, 1, PhysReg(0));

        let mut block = BasicBlock::new(BlockId(0));
        block
            .instructions
            .push(const_inst(0, v1, ConstValue::I32(7)));
        block
            .instructions
            .push(const_inst(1, v2, ConstValue::I32(8)));
        block
            .instructions
            .push(Instruction::new(2, InstructionKind::Return));

        let kept = run_block(&block.instructions, &alloc);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn rematerializable_constant_is_always_removed() {
        let mut alloc = MockAllocator::new();
        let v1 = Value(1);
        alloc.assign(v1, 0, PhysReg(0));
        alloc.set_live_kind(v1, LiveKind::Rematerializable);

        let mut block = BasicBlock::new(BlockId(0));
        block
            .instructions
            .push(const_inst(0, v1, ConstValue::I32(7)));
        block
            .instructions
            .push(Instruction::new(1, InstructionKind::Return));

        let kept = run_block(&block.instructions, &alloc);
        assert_eq!(kept.len(), 1);
        assert!(matches!(kept[0].kind, InstructionKind::Return));
    }

    #[test]
    fn rematerializable_constant_with_no_assigned_register_is_still_removed() {
        // The allocator decided not to keep this definition in a register at
        // all (§4.4's reading of "spilledAndRematerializable"): no `assign`
        // call means `register_for_value` returns `None` at this
        // instruction's own number.
        let mut alloc = MockAllocator::new();
        let v1 = Value(1);
        alloc.set_live_kind(v1, LiveKind::Rematerializable);

        let mut block = BasicBlock::new(BlockId(0));
        block
            .instructions
            .push(const_inst(0, v1, ConstValue::I32(7)));
        block
            .instructions
            .push(Instruction::new(1, InstructionKind::Return));

        let kept = run_block(&block.instructions, &alloc);
        assert_eq!(kept.len(), 1);
        assert!(matches!(kept[0].kind, InstructionKind::Return));
    }

    #[test]
    fn wide_write_invalidates_upper_half_resident_at_lower_register() {
        let mut alloc = MockAllocator::new();
        let (v1, v2, v3) = (Value(1), Value(2), Value(3));
        // r0 holds a wide constant (covering r0/r1); a later narrow write to
        // r1 clobbers its upper half, so a reload at r1 cannot be elided
        // against the stale wide entry.
        alloc.assign(v1, 0, PhysReg(0));
        alloc.assign(v2, 1, PhysReg(1));
        alloc.assign(v3, 2, PhysReg(1));

        let mut block = BasicBlock::new(BlockId(0));
        block
            .instructions
            .push(const_inst(0, v1, ConstValue::I64(1)));
        block
            .instructions
            .push(const_inst(1, v2, ConstValue::I32(2)));
        block
            .instructions
            .push(const_inst(2, v3, ConstValue::I32(2)));
        block
            .instructions
            .push(Instruction::new(3, InstructionKind::Return));

        let kept = run_block(&block.instructions, &alloc);
        // v1's wide load, v2's load, and the redundant v3 reload collapses.
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn self_move_is_removed_per_block() {
        let mut code = IrCode::new("t", BlockId(0));
        let mut alloc = MockAllocator::new();
        let v1 = Value(1);
        alloc.assign(v1, 0, PhysReg(2));

        let mut block = BasicBlock::new(BlockId(0));
        block.instructions.push(
            Instruction::new(0, InstructionKind::Move { wide: false })
                .with_output(v1)
                .with_inputs(vec![v1]),
        );
        block
            .instructions
            .push(Instruction::new(1, InstructionKind::Return));
        code.insert_block(block);

        let removed = run(&mut code, &mut alloc);
        assert_eq!(removed, 1);
        assert_eq!(code.block(BlockId(0)).instructions.len(), 1);
    }
}
