//! The post-register-allocation IR: values, instructions, basic blocks, and
//! the whole-method CFG (`IrCode`). This module is the minimal concrete
//! shape needed to exercise `ir::peephole` against an external SSA builder
//! and register allocator.
//!
//! Blocks are held in an indexed pool keyed by `BlockId` rather than linked
//! by direct reference: predecessor/successor edges are integer ids, so
//! phase rewrites are pure map/vec edits and the allocator's
//! `merge_blocks`/`add_new_block_to_share_identical_suffix` callbacks can
//! identify blocks by id alone.

use crate::common::fx_hash::FxHashMap;
use crate::common::source::Position;
use crate::common::types::{IrType, RegWidth};

/// An SSA result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(pub u32);

/// A basic block identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// A physical (DEX virtual) register number assigned by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysReg(pub u16);

impl PhysReg {
    /// The next register in a wide value's pair.
    pub fn next(self) -> PhysReg {
        PhysReg(self.0 + 1)
    }

    pub fn prev(self) -> Option<PhysReg> {
        self.0.checked_sub(1).map(PhysReg)
    }
}

/// A debugger-visible local variable descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalInfo {
    pub name: String,
    pub ty: IrType,
}

/// A literal constant carried by a `ConstNumber` instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Null,
}

impl ConstValue {
    pub fn ty(self) -> IrType {
        match self {
            ConstValue::I32(_) => IrType::I32,
            ConstValue::I64(_) => IrType::I64,
            ConstValue::F32(_) => IrType::F32,
            ConstValue::F64(_) => IrType::F64,
            ConstValue::Null => IrType::Ptr,
        }
    }

    /// Equality ignoring source position, as §4.4 requires ("same value,
    /// width, and type — ignoring source position") for redundant-reload
    /// detection. Floats compare bitwise: two `ConstNumber`s are the same
    /// reload candidate only if they'd reload the identical bit pattern.
    pub fn same_value(self, other: ConstValue) -> bool {
        match (self, other) {
            (ConstValue::I32(a), ConstValue::I32(b)) => a == b,
            (ConstValue::I64(a), ConstValue::I64(b)) => a == b,
            (ConstValue::F32(a), ConstValue::F32(b)) => a.to_bits() == b.to_bits(),
            (ConstValue::F64(a), ConstValue::F64(b)) => a.to_bits() == b.to_bits(),
            (ConstValue::Null, ConstValue::Null) => true,
            _ => false,
        }
    }
}

/// The opcode category of an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    /// `dest <- src`. Eliminated by `move_eliminator` when src/dest share a
    /// physical register. DEX distinguishes `move` from `move-wide` at the
    /// opcode level, so width is carried here rather than inferred.
    Move { wide: bool },
    /// `dest <- literal`. Candidate for redundancy removal (§4.4).
    ConstNumber(ConstValue),
    /// A side-effect-free, non-throwing arithmetic/logic op, named for
    /// display only (`"add"`, `"sub"`, ...). Used by prefix/suffix sharing.
    BinOp(&'static str),
    /// An operation that can throw at the opcode level (divide, array
    /// access, invoke, ...), named for display only.
    Throwing(&'static str),
    /// A no-op that changes which source-level locals map to which
    /// registers, replayed by `ir::peephole::locals`.
    DebugLocalsChange(Vec<(PhysReg, Option<LocalInfo>)>),
    /// Unconditional jump. Always a terminator.
    Goto(BlockId),
    /// Two-way conditional jump. Always a terminator.
    CondJump {
        true_target: BlockId,
        false_target: BlockId,
    },
    /// Function return, with an optional return value. Always a terminator.
    Return,
}

impl InstructionKind {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstructionKind::Goto(_) | InstructionKind::CondJump { .. } | InstructionKind::Return
        )
    }

    pub fn is_move(&self) -> bool {
        matches!(self, InstructionKind::Move { .. })
    }

    pub fn is_debug_locals_change(&self) -> bool {
        matches!(self, InstructionKind::DebugLocalsChange(_))
    }

    /// `instructionTypeCanThrow`: whether instructions of this
    /// opcode *can ever* throw, independent of operands.
    pub fn type_can_throw(&self) -> bool {
        matches!(self, InstructionKind::Throwing(_))
    }
}

/// A node in a block's ordered instruction sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Monotonic position key assigned at register allocation time.
    pub number: u32,
    pub output: Option<Value>,
    pub inputs: Vec<Value>,
    pub kind: InstructionKind,
    pub position: Option<Position>,
    /// No-op dependencies kept alive only so the debugger can still observe
    /// them.
    pub debug_values: Vec<Value>,
    /// Overrides the opcode's default throwing behavior for this specific
    /// instance — e.g. a divide by a statically-known-nonzero constant.
    /// `None` defers to the opcode-level default.
    pub instance_throws_override: Option<bool>,
    /// Whether this instruction's output (if any) occupies two consecutive
    /// physical registers. `ConstNumber` and `Move` derive this from their
    /// own payload instead; this flag covers every other defining opcode
    /// (`BinOp`, `Throwing`).
    pub output_wide: bool,
}

impl Instruction {
    pub fn new(number: u32, kind: InstructionKind) -> Self {
        Self {
            number,
            output: None,
            inputs: Vec::new(),
            kind,
            position: None,
            debug_values: Vec::new(),
            instance_throws_override: None,
            output_wide: false,
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<Value>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_wide_output(mut self) -> Self {
        self.output_wide = true;
        self
    }

    /// The width of this instruction's output, if it has one.
    pub fn output_width(&self) -> Option<RegWidth> {
        self.output?;
        Some(match &self.kind {
            InstructionKind::ConstNumber(v) => v.ty().width(),
            InstructionKind::Move { wide } => {
                if *wide {
                    RegWidth::Wide
                } else {
                    RegWidth::Narrow
                }
            }
            _ if self.output_wide => RegWidth::Wide,
            _ => RegWidth::Narrow,
        })
    }

    /// `instructionTypeCanThrow`.
    pub fn instruction_type_can_throw(&self) -> bool {
        self.kind.type_can_throw()
    }

    /// `instructionInstanceCanThrow`.
    pub fn instruction_instance_can_throw(&self) -> bool {
        self.instance_throws_override
            .unwrap_or_else(|| self.kind.type_can_throw())
    }

    /// A fresh `goto` terminator with the given target and position, per
    /// the "constructors for fresh Goto terminators" interface.
    pub fn new_goto(number: u32, target: BlockId, position: Option<Position>) -> Self {
        Self {
            position,
            ..Self::new(number, InstructionKind::Goto(target))
        }
    }

    /// `identicalNonValueNonPositionParts`: value-equality
    /// modulo position and SSA identity — same opcode, same literal
    /// operands, same arity/widths, ignoring which exact `Value`s and
    /// `Position` are involved. This is the un-colored half of
    /// `InstructionEquivalence` (§4.1); the allocator-aware half lives in
    /// `ir::peephole::equivalence`.
    pub fn identical_non_value_non_position_parts(&self, other: &Instruction) -> bool {
        self.inputs.len() == other.inputs.len()
            && self.output.is_some() == other.output.is_some()
            && match (&self.kind, &other.kind) {
                (InstructionKind::ConstNumber(a), InstructionKind::ConstNumber(b)) => {
                    a.same_value(*b)
                }
                (InstructionKind::BinOp(a), InstructionKind::BinOp(b)) => a == b,
                (InstructionKind::Throwing(a), InstructionKind::Throwing(b)) => a == b,
                (InstructionKind::Goto(_), InstructionKind::Goto(_)) => true,
                (InstructionKind::Return, InstructionKind::Return) => true,
                (InstructionKind::Move { wide: wa }, InstructionKind::Move { wide: wb }) => {
                    wa == wb
                }
                (InstructionKind::CondJump { .. }, InstructionKind::CondJump { .. }) => true,
                (InstructionKind::DebugLocalsChange(a), InstructionKind::DebugLocalsChange(b)) => {
                    a == b
                }
                _ => false,
            }
    }
}

/// Ordered list of instructions ending with a terminator.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    pub instructions: Vec<Instruction>,
    /// Ordered, and a multiset: a predecessor that reaches this block via
    /// two distinct edges (e.g. both arms of a `CondJump` with the same
    /// target) appears twice.
    pub predecessors: Vec<BlockId>,
    pub catch_handlers: Vec<BlockId>,
    pub locals_at_entry: Option<FxHashMap<PhysReg, LocalInfo>>,
}

impl BasicBlock {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            instructions: Vec::new(),
            predecessors: Vec::new(),
            catch_handlers: Vec::new(),
            locals_at_entry: None,
        }
    }

    /// `exit()`: the terminator is always the last instruction.
    pub fn exit(&self) -> &Instruction {
        self.instructions
            .last()
            .expect("a basic block always ends with a terminator")
    }

    pub fn exit_mut(&mut self) -> &mut Instruction {
        self.instructions
            .last_mut()
            .expect("a basic block always ends with a terminator")
    }

    /// Normal (non-exceptional) successor targets, in terminator order.
    pub fn normal_successors(&self) -> Vec<BlockId> {
        match &self.exit().kind {
            InstructionKind::Goto(target) => vec![*target],
            InstructionKind::CondJump {
                true_target,
                false_target,
            } => vec![*true_target, *false_target],
            InstructionKind::Return => vec![],
            _ => unreachable!("exit() is always a terminator"),
        }
    }

    /// All successors: normal successors before catch-handler successors
    ///.
    pub fn successors(&self) -> Vec<BlockId> {
        let mut out = self.normal_successors();
        out.extend(self.catch_handlers.iter().copied());
        out
    }

    pub fn is_empty_forwarder(&self) -> bool {
        self.instructions.len() == 1 && matches!(self.exit().kind, InstructionKind::Goto(_))
    }

    /// Whether any instruction in this block can throw, by instance
    ///.
    pub fn throwing_instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions
            .iter()
            .filter(|i| i.instruction_instance_can_throw())
    }
}

/// The whole-method control-flow graph.
///
/// Blocks live in an id-keyed pool; `order` tracks program
/// order for deterministic iteration, since the pool itself is unordered.
#[derive(Debug, Clone)]
pub struct IrCode {
    pub method_name: String,
    blocks: FxHashMap<BlockId, BasicBlock>,
    order: Vec<BlockId>,
    pub entry: BlockId,
    next_block_id: u32,
}

impl IrCode {
    pub fn new(method_name: impl Into<String>, entry: BlockId) -> Self {
        Self {
            method_name: method_name.into(),
            blocks: FxHashMap::default(),
            order: Vec::new(),
            entry,
            next_block_id: entry.0,
        }
    }

    pub fn insert_block(&mut self, block: BasicBlock) {
        self.next_block_id = self.next_block_id.max(block.id.0 + 1);
        if !self.blocks.contains_key(&block.id) {
            self.order.push(block.id);
        }
        self.blocks.insert(block.id, block);
    }

    pub fn remove_block(&mut self, id: BlockId) -> Option<BasicBlock> {
        self.order.retain(|b| *b != id);
        self.blocks.remove(&id)
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        self.blocks
            .get(&id)
            .unwrap_or_else(|| panic!("block {id:?} not in {}", self.method_name))
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        self.blocks
            .get_mut(&id)
            .unwrap_or_else(|| panic!("block {id:?} not in {}", self.method_name))
    }

    pub fn try_block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(&id)
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.blocks.contains_key(&id)
    }

    /// Blocks in program order — "an ordered container of blocks".
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.order.iter().map(move |id| &self.blocks[id])
    }

    pub fn block_ids(&self) -> Vec<BlockId> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// `getHighestBlockNumber()`.
    pub fn highest_block_number(&self) -> u32 {
        self.order.iter().map(|b| b.0).max().unwrap_or(0)
    }

    /// Allocates a fresh block id, monotonic from the current highest.
    pub fn new_block_id(&mut self) -> BlockId {
        let id = BlockId(self.next_block_id);
        self.next_block_id += 1;
        id
    }

    /// `computeNormalExitBlocks()`: blocks whose terminator is
    /// a `Return`.
    pub fn normal_exit_blocks(&self) -> Vec<BlockId> {
        self.blocks()
            .filter(|b| matches!(b.exit().kind, InstructionKind::Return))
            .map(|b| b.id)
            .collect()
    }

    /// Removes one occurrence of `pred` from `succ`'s predecessor multiset.
    pub fn unlink_predecessor(&mut self, succ: BlockId, pred: BlockId) {
        let block = self.block_mut(succ);
        if let Some(pos) = block.predecessors.iter().position(|p| *p == pred) {
            block.predecessors.remove(pos);
        }
    }

    /// `link(target)`: records `pred` as a predecessor of
    /// `succ`. Does not touch `pred`'s terminator — callers are responsible
    /// for making the edge real on both ends.
    pub fn link(&mut self, pred: BlockId, succ: BlockId) {
        self.block_mut(succ).predecessors.push(pred);
    }

    /// `detachAllSuccessors()`: removes `block` from every
    /// current successor's predecessor list, without touching `block`'s own
    /// terminator or catch handlers.
    pub fn detach_all_successors(&mut self, block: BlockId) {
        for succ in self.block(block).successors() {
            self.unlink_predecessor(succ, block);
        }
    }

    /// `replaceSuccessor(old, new)`: repoints `block`'s
    /// terminator (or catch-handler list) from `old` to `new`, maintaining
    /// predecessor symmetry on both `old` and `new`.
    pub fn replace_successor(&mut self, block: BlockId, old: BlockId, new: BlockId) {
        {
            let b = self.block_mut(block);
            match &mut b.exit_mut().kind {
                InstructionKind::Goto(t) if *t == old => *t = new,
                InstructionKind::CondJump {
                    true_target,
                    false_target,
                } => {
                    if *true_target == old {
                        *true_target = new;
                    }
                    if *false_target == old {
                        *false_target = new;
                    }
                }
                _ => {}
            }
            for handler in &mut b.catch_handlers {
                if *handler == old {
                    *handler = new;
                }
            }
        }
        self.unlink_predecessor(old, block);
        self.link(block, new);
    }

    /// `transferCatchHandlers(from)`: moves `from`'s catch
    /// handlers onto `to`, updating the handlers' predecessor lists.
    pub fn transfer_catch_handlers(&mut self, to: BlockId, from: BlockId) {
        let handlers = std::mem::take(&mut self.block_mut(from).catch_handlers);
        for handler in &handlers {
            self.unlink_predecessor(*handler, from);
            self.link(to, *handler);
        }
        self.block_mut(to).catch_handlers = handlers;
    }
}
