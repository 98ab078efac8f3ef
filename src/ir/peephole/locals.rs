//! Locals replay: `localsAtExit(block)` is `localsAtEntry`
//! with every `DebugLocalsChange` in the block applied in order. Used by
//! `prefix_sharing` to check two siblings agree on entry locals, and by
//! `suffix_sharing` to stop growing a shared suffix once predecessors
//! disagree on the locals state reaching it.

use crate::common::fx_hash::FxHashMap;
use crate::ir::ir::{BasicBlock, InstructionKind, LocalInfo, PhysReg};

pub type LocalsMap = FxHashMap<PhysReg, LocalInfo>;

/// Replays one `DebugLocalsChange` diff onto a locals map: `Some(info)`
/// entries are inserted/overwritten, `None` entries remove the register's
/// local.
pub fn apply_change(locals: &mut LocalsMap, diff: &[(PhysReg, Option<LocalInfo>)]) {
    for (reg, info) in diff {
        match info {
            Some(li) => {
                locals.insert(*reg, li.clone());
            }
            None => {
                locals.remove(reg);
            }
        }
    }
}

/// Locals state after replaying the first `n` instructions of `block`
/// (clamped to the block's length) onto its `localsAtEntry`.
pub fn locals_at_boundary(block: &BasicBlock, n: usize) -> LocalsMap {
    let mut locals = block.locals_at_entry.clone().unwrap_or_default();
    for inst in block.instructions.iter().take(n) {
        if let InstructionKind::DebugLocalsChange(diff) = &inst.kind {
            apply_change(&mut locals, diff);
        }
    }
    locals
}

/// `localsAtExit(block)`.
pub fn locals_at_exit(block: &BasicBlock) -> LocalsMap {
    locals_at_boundary(block, block.instructions.len())
}
