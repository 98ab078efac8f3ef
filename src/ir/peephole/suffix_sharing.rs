//! P4: Suffix Sharing.
//!
//! For each join block J, bucket J's predecessors by their equivalent last
//! instruction (the terminator itself, matched modulo register allocation).
//! Each bucket of two or more predecessors contributes the maximal common
//! suffix it shares; if that suffix is long enough to be worth the overhead
//! of a new block, splice it into a fresh tail block `N` and repoint every
//! predecessor in the bucket at `N`.
//!
//! Return-terminated blocks have no natural common successor, so they are
//! bucketed against a synthetic "normal exit" grouping that is never itself inserted into the CFG — only the
//! extracted tail block `N` is real.

use crate::common::fx_hash::FxHashMap;
use crate::ir::ir::{BasicBlock, BlockId, Instruction, IrCode};
use crate::ir::peephole::allocator::RegisterAllocator;
use crate::ir::peephole::equivalence::{collect_value_widths, EquivKey, InstructionEquivalence};
use crate::ir::peephole::locals;

/// Runs P4 to a fixed point. Returns the number of suffixes extracted.
pub fn run(code: &mut IrCode, allocator: &mut impl RegisterAllocator) -> usize {
    let mut total = 0;
    loop {
        let mut changed = 0;

        for b_id in code.block_ids() {
            if !code.contains(b_id) {
                continue;
            }
            let mut preds = code.block(b_id).predecessors.clone();
            preds.sort();
            preds.dedup();
            if preds.len() < 2 {
                continue;
            }
            changed += process_join(code, allocator, Some(b_id), preds);
        }

        let mut returns = code.normal_exit_blocks();
        returns.sort();
        returns.dedup();
        if returns.len() >= 2 {
            changed += process_join(code, allocator, None, returns);
        }

        if changed == 0 {
            break;
        }
        total += changed;
    }
    total
}

/// Buckets `preds` by terminator equivalence and attempts extraction on each
/// bucket with two or more members. `join` is `None` for the synthetic
/// return-exit grouping.
fn process_join<R: RegisterAllocator>(
    code: &mut IrCode,
    allocator: &mut R,
    join: Option<BlockId>,
    preds: Vec<BlockId>,
) -> usize {
    let mut buckets: FxHashMap<EquivKey, Vec<BlockId>> = FxHashMap::default();
    {
        let widths = collect_value_widths(code);
        let eq = InstructionEquivalence::new(&*allocator, &widths);
        for p in preds {
            if !code.contains(p) {
                continue;
            }
            let key = eq.key(code.block(p).exit());
            buckets.entry(key).or_default().push(p);
        }
    }

    let mut extracted = 0;
    for bucket in buckets.into_values() {
        if bucket.len() < 2 {
            continue;
        }
        let k = common_suffix_length(code, &*allocator, &bucket);
        if try_extract(code, allocator, join, &bucket, k) {
            extracted += 1;
        }
    }
    extracted
}

/// The largest `k` such that the last `k` instructions of every predecessor
/// in `bucket` are pairwise `identicalAfterRegisterAllocation` and the locals
/// state entering that shared suffix agrees across the bucket. Stops the
/// moment either condition fails.
fn common_suffix_length<R: RegisterAllocator>(
    code: &IrCode,
    allocator: &R,
    bucket: &[BlockId],
) -> usize {
    let min_len = bucket
        .iter()
        .map(|p| code.block(*p).instructions.len())
        .min()
        .unwrap_or(0);

    let mut k = 0;
    while k < min_len {
        let idx_of = |p: BlockId| code.block(p).instructions.len() - 1 - k;

        let first = bucket[0];
        let candidate = &code.block(first).instructions[idx_of(first)];
        let instructions_match = bucket[1..].iter().all(|&p| {
            let other = &code.block(p).instructions[idx_of(p)];
            allocator.identical_after_register_allocation(candidate, other)
        });
        if !instructions_match {
            break;
        }

        let first_locals = locals::locals_at_boundary(code.block(first), idx_of(first));
        let locals_agree = bucket[1..].iter().all(|&p| {
            locals::locals_at_boundary(code.block(p), idx_of(p)) == first_locals
        });
        if !locals_agree {
            break;
        }

        k += 1;
    }
    k
}

/// Applies the profitability test and, if
/// it passes, splices the shared suffix into a fresh block.
fn try_extract<R: RegisterAllocator>(
    code: &mut IrCode,
    allocator: &mut R,
    join: Option<BlockId>,
    bucket: &[BlockId],
    k: usize,
) -> bool {
    if k <= 1 {
        return false;
    }
    let overhead = allocator.options().overhead as i64;
    let bucket_savings = (bucket.len() as i64 - 1) * k as i64;
    if overhead - bucket_savings >= 0 {
        return false;
    }

    let first = bucket[0];
    let suffix_start = code.block(first).instructions.len() - k;
    let suffix: Vec<Instruction> = code.block(first).instructions[suffix_start..].to_vec();
    let can_throw = suffix.iter().any(|i| i.instruction_instance_can_throw());
    let entry_locals = locals::locals_at_boundary(code.block(first), suffix_start);

    let new_id = code.new_block_id();
    let mut new_block = BasicBlock::new(new_id);
    new_block.instructions = suffix;
    new_block.locals_at_entry = Some(entry_locals);
    code.insert_block(new_block);

    if can_throw {
        code.transfer_catch_handlers(new_id, first);
    }

    allocator.add_new_block_to_share_identical_suffix(new_id, k, bucket);

    for &p in bucket {
        let fallback_position = code.block(p).exit().position;
        let new_len = code.block(p).instructions.len() - k;

        let block = code.block_mut(p);
        block.instructions.truncate(new_len);
        if can_throw {
            block.catch_handlers.clear();
        }

        let replay_position = block
            .instructions
            .iter()
            .rev()
            .find_map(|i| i.position)
            .or(fallback_position);
        let term_number = block.instructions.last().map(|i| i.number + 1).unwrap_or(0);
        block
            .instructions
            .push(Instruction::new_goto(term_number, new_id, replay_position));

        if let Some(j) = join {
            code.unlink_predecessor(j, p);
        }
        code.link(p, new_id);
    }

    if let Some(j) = join {
        code.link(new_id, j);
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ir::{BlockId, ConstValue, Instruction, InstructionKind, PhysReg, Value};
    use crate::ir::peephole::testing::MockAllocator;

    /// Four predecessors of join block J each end with the same 5
    /// instructions followed by `goto J`.
    fn four_predecessors_sharing_a_tail() -> (IrCode, MockAllocator, Vec<BlockId>, BlockId) {
        let mut code = IrCode::new("t", BlockId(0));
        let mut alloc = MockAllocator::new();

        let j = BlockId(10);
        let mut join = BasicBlock::new(j);
        join.instructions.push(Instruction::new(0, InstructionKind::Return));
        code.insert_block(join);

        let mut preds = Vec::new();
        for i in 0..4u32 {
            let pred_id = BlockId(i + 1);
            let mut b = BasicBlock::new(pred_id);
            let base = i * 10;
            let v0 = Value(base);
            alloc.assign(v0, base, PhysReg(1));
            b.instructions.push(
                Instruction::new(base, InstructionKind::ConstNumber(ConstValue::I32(1)))
                    .with_output(v0),
            );
            for n in 1..5u32 {
                b.instructions.push(Instruction::new(base + n, InstructionKind::BinOp("add")));
            }
            b.instructions
                .push(Instruction::new_goto(base + 5, j, None));
            code.insert_block(b);
            code.link(pred_id, j);
            preds.push(pred_id);
        }

        (code, alloc, preds, j)
    }

    #[test]
    fn extracts_shared_tail_into_new_block() {
        let (mut code, mut alloc, preds, j) = four_predecessors_sharing_a_tail();
        let max_before = code.highest_block_number();

        let extracted = run(&mut code, &mut alloc);
        assert_eq!(extracted, 1);

        let new_id = BlockId(max_before + 1);
        assert!(code.contains(new_id));
        assert_eq!(code.block(new_id).instructions.len(), 6);

        for p in &preds {
            let block = code.block(*p);
            assert_eq!(block.instructions.len(), 1, "predecessor reduced to a single goto");
            assert!(matches!(block.exit().kind, InstructionKind::Goto(target) if target == new_id));
        }

        assert_eq!(code.block(j).predecessors, vec![new_id]);
        assert!(alloc.suffix_log.iter().any(|(n, k, _)| *n == new_id && *k == 6));
    }

    #[test]
    fn short_common_tail_is_not_extracted() {
        let (mut code, mut alloc, preds, j) = four_predecessors_sharing_a_tail();
        // Make the predecessors diverge after one instruction from the end,
        // leaving only the `goto` itself shared (k == 1, not worth hoisting).
        for (i, p) in preds.iter().enumerate() {
            let block = code.block_mut(*p);
            let n = block.instructions.len();
            block.instructions[n - 2].kind = InstructionKind::BinOp(match i % 2 {
                0 => "add",
                _ => "sub",
            });
        }

        let extracted = run(&mut code, &mut alloc);
        assert_eq!(extracted, 0);
        assert_eq!(code.block(j).predecessors.len(), 4);
    }

    #[test]
    fn positive_overhead_blocks_marginal_extraction() {
        let (mut code, mut alloc, _preds, _j) = four_predecessors_sharing_a_tail();
        alloc.options.overhead = 1000;
        let extracted = run(&mut code, &mut alloc);
        assert_eq!(extracted, 0, "overhead too high for a 4-way, 6-instruction suffix to pay off");
    }
}
