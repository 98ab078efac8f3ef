//! P3: Prefix Sharing.
//!
//! When a block B has exactly two normal successors S and T, each with B as
//! their only predecessor, hoist the longest common prefix of S and T into
//! B, just before B's terminator. If the two blocks' terminators themselves
//! turn out equivalent, B absorbs the terminator too and S/T are deleted.

use crate::common::fx_hash::FxHashMap;
use crate::common::types::RegWidth;
use crate::ir::ir::{BlockId, Instruction, InstructionKind, IrCode, Value};
use crate::ir::peephole::allocator::RegisterAllocator;
use crate::ir::peephole::equivalence::{collect_value_widths, InstructionEquivalence};
use crate::ir::peephole::locals;

/// Runs P3 to a fixed point. Returns the number of instructions hoisted
/// (terminator hoists count as one).
pub fn run(code: &mut IrCode, allocator: &mut impl RegisterAllocator) -> usize {
    let mut total = 0;
    let mut to_delete: Vec<BlockId> = Vec::new();

    loop {
        let widths = collect_value_widths(code);
        let mut changed = false;

        for b_id in code.block_ids() {
            if !code.contains(b_id) {
                continue;
            }
            let (hoisted, terminator_collapsed, deleted) =
                process_block(code, &*allocator, b_id, &widths);
            total += hoisted;
            if hoisted > 0 || terminator_collapsed {
                changed = true;
            }
            if let Some((s, t)) = deleted {
                to_delete.push(s);
                to_delete.push(t);
            }
        }

        if !changed {
            break;
        }
    }

    for id in to_delete {
        if code.contains(id) {
            code.remove_block(id);
        }
    }

    total
}

fn ranges_overlap(r1: crate::ir::ir::PhysReg, w1: RegWidth, r2: crate::ir::ir::PhysReg, w2: RegWidth) -> bool {
    let a0 = r1.0;
    let a1 = r1.0 + w1.registers();
    let b0 = r2.0;
    let b1 = r2.0 + w2.registers();
    a0 < b1 && b0 < a1
}

/// The six pre-conditions for hoisting, checked against a single
/// candidate pair of instructions (either the next unhoisted instruction of
/// S/T, or — for the terminator-hoisting special case — S's and T's
/// terminators themselves).
fn preconditions<R: RegisterAllocator>(
    code: &IrCode,
    allocator: &R,
    b_id: BlockId,
    s_id: BlockId,
    t_id: BlockId,
    i_s: &Instruction,
    i_t: &Instruction,
    widths: &FxHashMap<Value, RegWidth>,
) -> bool {
    let b = code.block(b_id);
    let s = code.block(s_id);
    let t = code.block(t_id);

    // 1. S and T agree on localsAtEntry.
    if s.locals_at_entry != t.locals_at_entry {
        return false;
    }

    // 2. InstructionEquivalence.
    if !InstructionEquivalence::new(allocator, widths).equivalent(i_s, i_t) {
        return false;
    }

    // 3. Opcode-level throw under a handler on B.
    if i_s.instruction_type_can_throw() && !b.catch_handlers.is_empty() {
        return false;
    }

    // 4. Instance-level throw under a handler on either sibling.
    if i_s.instruction_instance_can_throw()
        && (!s.catch_handlers.is_empty() || !t.catch_handlers.is_empty())
    {
        return false;
    }

    // 5. Register-range commutativity with B's terminator's inputs.
    let terminator = b.exit();
    if let Some(out) = i_s.output {
        if let Some(r_out) = allocator.register_for_value(out, i_s.number) {
            let w_out = i_s.output_width().unwrap_or(RegWidth::Narrow);
            for &input in &terminator.inputs {
                if let Some(r_in) = allocator.register_for_value(input, terminator.number) {
                    let w_in = widths.get(&input).copied().unwrap_or(RegWidth::Narrow);
                    if ranges_overlap(r_out, w_out, r_in, w_in) {
                        return false;
                    }
                }
            }
        }
    }

    // 6. Position compatibility.
    let position_ok = i_s.position == terminator.position
        || (terminator.position.is_none() && terminator.debug_values.is_empty());
    if !position_ok {
        return false;
    }

    true
}

fn hoist_front(code: &mut IrCode, b_id: BlockId, s_id: BlockId, t_id: BlockId) {
    let hoisted = code.block_mut(s_id).instructions.remove(0);
    code.block_mut(t_id).instructions.remove(0);

    if let InstructionKind::DebugLocalsChange(diff) = &hoisted.kind {
        if let Some(entry) = code.block_mut(s_id).locals_at_entry.as_mut() {
            locals::apply_change(entry, diff);
        }
        if let Some(entry) = code.block_mut(t_id).locals_at_entry.as_mut() {
            locals::apply_change(entry, diff);
        }
    }

    let b = code.block_mut(b_id);
    let insert_at = b.instructions.len() - 1;
    b.instructions.insert(insert_at, hoisted);
}

fn try_hoist_terminator<R: RegisterAllocator>(
    code: &mut IrCode,
    allocator: &R,
    b_id: BlockId,
    s_id: BlockId,
    t_id: BlockId,
    widths: &FxHashMap<Value, RegWidth>,
) -> bool {
    let i_s = code.block(s_id).exit().clone();
    let i_t = code.block(t_id).exit().clone();
    if !preconditions(code, allocator, b_id, s_id, t_id, &i_s, &i_t, widths) {
        return false;
    }

    code.unlink_predecessor(s_id, b_id);
    code.unlink_predecessor(t_id, b_id);
    for succ in code.block(s_id).successors() {
        code.unlink_predecessor(succ, s_id);
    }
    for succ in code.block(t_id).successors() {
        code.unlink_predecessor(succ, t_id);
    }

    *code.block_mut(b_id).exit_mut() = i_s;

    let new_targets = code.block(b_id).normal_successors();
    for target in new_targets {
        code.link(b_id, target);
    }

    for dead in [s_id, t_id] {
        let block = code.block_mut(dead);
        block.instructions.clear();
        block.catch_handlers.clear();
        block.predecessors.clear();
    }

    true
}

fn process_block<R: RegisterAllocator>(
    code: &mut IrCode,
    allocator: &R,
    b_id: BlockId,
    widths: &FxHashMap<Value, RegWidth>,
) -> (usize, bool, Option<(BlockId, BlockId)>) {
    let successors = code.block(b_id).normal_successors();
    if successors.len() != 2 {
        return (0, false, None);
    }
    let (s_id, t_id) = (successors[0], successors[1]);
    if s_id == t_id || s_id == b_id || t_id == b_id {
        return (0, false, None);
    }
    if !code.contains(s_id) || !code.contains(t_id) {
        return (0, false, None);
    }
    if code.block(s_id).predecessors != vec![b_id] || code.block(t_id).predecessors != vec![b_id] {
        return (0, false, None);
    }

    let mut hoisted = 0;
    loop {
        let s_len = code.block(s_id).instructions.len();
        let t_len = code.block(t_id).instructions.len();

        if s_len == 1 && t_len == 1 {
            if try_hoist_terminator(code, allocator, b_id, s_id, t_id, widths) {
                return (hoisted, true, Some((s_id, t_id)));
            }
            break;
        }
        if s_len <= 1 || t_len <= 1 {
            break;
        }

        let i_s = code.block(s_id).instructions[0].clone();
        let i_t = code.block(t_id).instructions[0].clone();
        if !preconditions(code, allocator, b_id, s_id, t_id, &i_s, &i_t, widths) {
            break;
        }

        hoist_front(code, b_id, s_id, t_id);
        hoisted += 1;
    }

    (hoisted, false, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ir::{BasicBlock, ConstValue, PhysReg};
    use crate::ir::peephole::testing::MockAllocator;

    fn diamond(identical_tail: bool) -> (IrCode, MockAllocator) {
        let mut code = IrCode::new("t", BlockId(0));
        let mut alloc = MockAllocator::new();

        let v_cond = Value(0);
        let v_s = Value(1);
        let v_t = Value(2);
        alloc.assign(v_s, 1, PhysReg(5));
        alloc.assign(v_t, 1, PhysReg(5));

        let mut entry = BasicBlock::new(BlockId(0));
        entry.instructions.push(
            Instruction::new(0, InstructionKind::CondJump {
                true_target: BlockId(1),
                false_target: BlockId(2),
            })
            .with_inputs(vec![v_cond]),
        );
        code.insert_block(entry);

        let mut s = BasicBlock::new(BlockId(1));
        s.predecessors.push(BlockId(0));
        s.instructions.push(
            Instruction::new(1, InstructionKind::ConstNumber(ConstValue::I32(9)))
                .with_output(v_s),
        );
        s.instructions.push(Instruction::new_goto(2, BlockId(3), None));
        code.insert_block(s);

        let mut t = BasicBlock::new(BlockId(2));
        t.predecessors.push(BlockId(0));
        t.instructions.push(
            Instruction::new(1, InstructionKind::ConstNumber(ConstValue::I32(9)))
                .with_output(v_t),
        );
        t.instructions.push(Instruction::new_goto(
            2,
            if identical_tail { BlockId(3) } else { BlockId(4) },
            None,
        ));
        code.insert_block(t);

        let mut j = BasicBlock::new(BlockId(3));
        j.predecessors.push(BlockId(1));
        if identical_tail {
            j.predecessors.push(BlockId(2));
        }
        j.instructions.push(Instruction::new(3, InstructionKind::Return));
        code.insert_block(j);

        if !identical_tail {
            let mut alt = BasicBlock::new(BlockId(4));
            alt.predecessors.push(BlockId(2));
            alt.instructions.push(Instruction::new(3, InstructionKind::Return));
            code.insert_block(alt);
        }

        (code, alloc)
    }

    #[test]
    fn hoists_common_prefix_into_predecessor() {
        let (mut code, mut alloc) = diamond(false);
        let hoisted = run(&mut code, &mut alloc);
        assert_eq!(hoisted, 1);

        let entry = code.block(BlockId(0));
        assert_eq!(entry.instructions.len(), 2, "hoisted const + original CondJump");
        assert!(matches!(entry.instructions[0].kind, InstructionKind::ConstNumber(_)));

        assert!(code.block(BlockId(1)).instructions.len() == 1);
        assert!(code.block(BlockId(2)).instructions.len() == 1);
    }

    #[test]
    fn identical_terminators_collapse_siblings_entirely() {
        let (mut code, mut alloc) = diamond(true);
        run(&mut code, &mut alloc);

        assert!(!code.contains(BlockId(1)));
        assert!(!code.contains(BlockId(2)));
        let entry = code.block(BlockId(0));
        assert!(matches!(entry.exit().kind, InstructionKind::Goto(BlockId(3))));
        assert_eq!(code.block(BlockId(3)).predecessors, vec![BlockId(0)]);
    }
}
