//! P1: Identical Predecessor Merge.
//!
//! For each join block B, if two of B's predecessors have identical
//! non-trivial bodies, collapse one into a single `goto` pointing at the
//! other. Runs to a fixed point: collapsing one pair can expose new
//! duplicates among a block's remaining predecessors.

use crate::common::fx_hash::FxHashMap;
use crate::ir::ir::{BlockId, Instruction, IrCode};
use crate::ir::peephole::allocator::RegisterAllocator;
use crate::ir::peephole::equivalence::{collect_value_widths, BasicBlockEquivalence};

/// Runs P1 to a fixed point. Returns the number of predecessors collapsed.
pub fn run(code: &mut IrCode, allocator: &mut impl RegisterAllocator) -> usize {
    let mut total = 0;
    loop {
        let widths = collect_value_widths(code);
        let bbeq = BasicBlockEquivalence::new(&*allocator, &widths);
        let merge = find_one_merge(code, &bbeq);
        let Some((survivor, discarded)) = merge else {
            break;
        };
        do_merge(code, allocator, survivor, discarded);
        total += 1;
    }
    total
}

fn find_one_merge<R: RegisterAllocator>(
    code: &IrCode,
    bbeq: &BasicBlockEquivalence<R>,
) -> Option<(BlockId, BlockId)> {
    for join in code.block_ids() {
        let mut preds: Vec<BlockId> = code.block(join).predecessors.clone();
        preds.sort();
        preds.dedup();

        let mut buckets: FxHashMap<Vec<crate::ir::peephole::equivalence::EquivKey>, BlockId> =
            FxHashMap::default();
        for pred in preds {
            if pred == join {
                continue;
            }
            let block = code.block(pred);
            if block.is_empty_forwarder() {
                // Already trivial; nothing to collapse it into.
                continue;
            }
            let key = bbeq.key(block);
            if let Some(&survivor) = buckets.get(&key) {
                return Some((survivor, pred));
            }
            buckets.insert(key, pred);
        }
    }
    None
}

fn do_merge(code: &mut IrCode, allocator: &mut impl RegisterAllocator, survivor: BlockId, discarded: BlockId) {
    if allocator.options().debug {
        let a = code.block(survivor);
        let b = code.block(discarded);
        assert_eq!(
            a.instructions.len(),
            b.instructions.len(),
            "P1 merge: {:?} and {:?} have different body lengths",
            survivor,
            discarded
        );
        for (ia, ib) in a.instructions.iter().zip(&b.instructions) {
            assert_eq!(
                ia.position, ib.position,
                "P1 merge requires matching Positions under options().debug"
            );
        }
    }

    // The allocator must see the original live intervals of both blocks
    // before either is mutated.
    allocator.merge_blocks(survivor, discarded);

    let former_successors = code.block(discarded).successors();
    for succ in former_successors {
        code.unlink_predecessor(succ, discarded);
    }

    let survivor_position = code.block(survivor).exit().position;
    let discarded_terminator_number = code.block(discarded).exit().number;

    let discarded_block = code.block_mut(discarded);
    discarded_block.catch_handlers.clear();
    discarded_block.instructions.clear();
    discarded_block.instructions.push(Instruction::new_goto(
        discarded_terminator_number,
        survivor,
        survivor_position,
    ));

    code.link(discarded, survivor);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ir::{BasicBlock, BlockId, Instruction, InstructionKind, Value};
    use crate::ir::peephole::testing::MockAllocator;

    fn build_diamond_with_identical_preds(position_matches: bool) -> (IrCode, MockAllocator) {
        // Entry(0) -> P1(1), P2(2); P1, P2 -> J(3).
        let mut code = IrCode::new("t", BlockId(0));
        let mut alloc = MockAllocator::new();

        let mut entry = BasicBlock::new(BlockId(0));
        entry
            .instructions
            .push(Instruction::new(0, InstructionKind::CondJump {
                true_target: BlockId(1),
                false_target: BlockId(2),
            }));
        code.insert_block(entry);

        let pos_a = crate::common::source::Position::new(0, 10);
        let pos_b = if position_matches {
            pos_a
        } else {
            crate::common::source::Position::new(0, 11)
        };

        let v1 = Value(1);
        let v2 = Value(2);
        alloc.assign(v1, 1, crate::ir::ir::PhysReg(0));
        alloc.assign(v2, 2, crate::ir::ir::PhysReg(0));

        let mut p1 = BasicBlock::new(BlockId(1));
        p1.predecessors.push(BlockId(0));
        p1.instructions.push(
            Instruction::new(1, InstructionKind::Move { wide: false })
                .with_output(v1)
                .with_inputs(vec![v1])
                .with_position(pos_a),
        );
        p1.instructions
            .push(Instruction::new_goto(2, BlockId(3), Some(pos_a)));
        code.insert_block(p1);

        let mut p2 = BasicBlock::new(BlockId(2));
        p2.predecessors.push(BlockId(0));
        p2.instructions.push(
            Instruction::new(1, InstructionKind::Move { wide: false })
                .with_output(v2)
                .with_inputs(vec![v2])
                .with_position(pos_b),
        );
        p2.instructions
            .push(Instruction::new_goto(2, BlockId(3), Some(pos_b)));
        code.insert_block(p2);

        let mut j = BasicBlock::new(BlockId(3));
        j.predecessors.push(BlockId(1));
        j.predecessors.push(BlockId(2));
        j.instructions.push(Instruction::new(3, InstructionKind::Return));
        code.insert_block(j);

        (code, alloc)
    }

    #[test]
    fn collapses_identical_predecessors() {
        let (mut code, mut alloc) = build_diamond_with_identical_preds(true);
        let merges = run(&mut code, &mut alloc);
        assert_eq!(merges, 1);

        let j_preds = code.block(BlockId(3)).predecessors.clone();
        assert_eq!(j_preds, vec![BlockId(1)]);

        let p2 = code.block(BlockId(2));
        assert_eq!(p2.instructions.len(), 1);
        assert!(matches!(p2.exit().kind, InstructionKind::Goto(BlockId(1))));
        assert_eq!(p2.predecessors, vec![BlockId(0)]);

        let p1 = code.block(BlockId(1));
        assert!(p1.predecessors.contains(&BlockId(2)));
    }

    #[test]
    fn second_pass_finds_nothing_more() {
        let (mut code, mut alloc) = build_diamond_with_identical_preds(true);
        run(&mut code, &mut alloc);
        let second = run(&mut code, &mut alloc);
        assert_eq!(second, 0, "P1 must be a fixed point w.r.t. itself");
    }
}
