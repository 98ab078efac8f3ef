//! The register allocator collaborator surface.
//!
//! The peephole optimizer never allocates registers itself; it consumes the
//! mapping the linear-scan allocator already produced, plus a couple of
//! callbacks so the allocator can keep its own liveness bookkeeping in sync
//! with blocks this pass splices in or collapses.

use crate::ir::ir::{BlockId, Instruction, PhysReg, Value};

/// Where a value's definition lives: resident in a register, spilled, or
/// rematerializable on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveKind {
    InRegister,
    Spilled,
    /// The allocator chose not to keep this definition anywhere; it will be
    /// recomputed on demand at each use.
    Rematerializable,
}

/// Tunable knobs the allocator/embedding compiler exposes to the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OptimizerOptions {
    /// When true, merges and hoists that would lose position-exactness are
    /// rejected instead of silently approximated.
    pub debug: bool,
    /// Suffix-sharing profitability threshold: a positive
    /// value demands longer shared suffixes before the rewrite pays off.
    /// Callers pass 0 at the normal call site.
    pub overhead: u32,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            debug: false,
            overhead: 0,
        }
    }
}

/// The allocator collaborator surface this pass needs from an external
/// linear-scan register allocator.
pub trait RegisterAllocator {
    /// `registerForValue(v, instructionNumber)`: the physical register `v`
    /// occupies at the given instruction position, or `None` if `v` needs
    /// no register.
    fn register_for_value(&self, value: Value, instruction_number: u32) -> Option<PhysReg>;

    /// Where `value`'s *definition* lives.
    fn live_kind_at_definition(&self, value: Value) -> LiveKind;

    /// `identicalAfterRegisterAllocation(i0, i1)`: true iff the allocator
    /// considers the two instructions interchangeable once register
    /// coloring is taken into account. The reference implementation in
    /// `testing::MockAllocator` delegates to `InstructionEquivalence`; a
    /// real allocator may also consult clobber sets or calling convention
    /// details this crate doesn't model.
    fn identical_after_register_allocation(&self, a: &Instruction, b: &Instruction) -> bool;

    /// Notifies the allocator that `discarded`'s liveness information should
    /// be folded into `surviving` because two identical predecessors were
    /// collapsed. Must be called *before* `discarded` is
    /// mutated, so the allocator still sees its original live intervals.
    fn merge_blocks(&mut self, surviving: BlockId, discarded: BlockId);

    /// Notifies the allocator that a new block was spliced in to hold a
    /// shared suffix, so it can extend live intervals across it.
    fn add_new_block_to_share_identical_suffix(
        &mut self,
        new_block: BlockId,
        suffix_size: usize,
        preds: &[BlockId],
    );

    fn options(&self) -> &OptimizerOptions;
}
