//! A reference `RegisterAllocator` implementation used by this crate's own
//! test suite, standing in for the linear-scan allocator the real toolchain
//! would supply.

use crate::common::fx_hash::FxHashMap;
use crate::common::types::RegWidth;
use crate::ir::ir::{BlockId, Instruction, PhysReg, Value};
use crate::ir::peephole::allocator::{LiveKind, OptimizerOptions, RegisterAllocator};
use crate::ir::peephole::equivalence::InstructionEquivalence;

/// Assigns every value a single physical register for its whole lifetime —
/// good enough for fixtures where the optimizer never needs to ask "at
/// which instruction number", since nothing in this crate reallocates a
/// value to different registers across its live range.
#[derive(Debug, Default)]
pub struct MockAllocator {
    regs: FxHashMap<Value, PhysReg>,
    live_kinds: FxHashMap<Value, LiveKind>,
    /// Widths of values assigned via `assign_wide`; absent entries default
    /// to `Narrow`, the same convention `equivalence::collect_value_widths`
    /// uses for the real pass. Consulted by `identical_after_register_
    /// allocation` so a fixture's wide and narrow values with coincidentally
    /// equal starting registers are never reported as allocator-identical.
    widths: FxHashMap<Value, RegWidth>,
    pub options: OptimizerOptions,
    pub merge_log: Vec<(BlockId, BlockId)>,
    pub suffix_log: Vec<(BlockId, usize, Vec<BlockId>)>,
}

impl MockAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, value: Value, _instruction_number: u32, reg: PhysReg) {
        self.regs.insert(value, reg);
    }

    /// Like `assign`, but records `value` as occupying a wide (two-register)
    /// slot for the purposes of `identical_after_register_allocation`.
    pub fn assign_wide(&mut self, value: Value, _instruction_number: u32, reg: PhysReg) {
        self.regs.insert(value, reg);
        self.widths.insert(value, RegWidth::Wide);
    }

    pub fn set_live_kind(&mut self, value: Value, kind: LiveKind) {
        self.live_kinds.insert(value, kind);
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.options.debug = debug;
        self
    }
}

impl RegisterAllocator for MockAllocator {
    fn register_for_value(&self, value: Value, _instruction_number: u32) -> Option<PhysReg> {
        self.regs.get(&value).copied()
    }

    fn live_kind_at_definition(&self, value: Value) -> LiveKind {
        self.live_kinds
            .get(&value)
            .copied()
            .unwrap_or(LiveKind::InRegister)
    }

    fn identical_after_register_allocation(&self, a: &Instruction, b: &Instruction) -> bool {
        InstructionEquivalence::new(self, &self.widths).equivalent(a, b)
    }

    fn merge_blocks(&mut self, surviving: BlockId, discarded: BlockId) {
        self.merge_log.push((surviving, discarded));
    }

    fn add_new_block_to_share_identical_suffix(
        &mut self,
        new_block: BlockId,
        suffix_size: usize,
        preds: &[BlockId],
    ) {
        self.suffix_log
            .push((new_block, suffix_size, preds.to_vec()));
    }

    fn options(&self) -> &OptimizerOptions {
        &self.options
    }
}
