//! A flat re-export surface for the core IR types. Callers outside
//! `ir::ir` itself should import from here rather than reaching into
//! `ir::ir` directly.

pub use crate::ir::ir::{
    BasicBlock, BlockId, ConstValue, Instruction, InstructionKind, IrCode, LocalInfo, PhysReg,
    Value,
};
