use thiserror::Error;

use crate::ir::ir::{BlockId, Value};

/// A failed structural invariant of the post-register-allocation CFG.
///
/// This is exactly one condition class: an unsatisfiable precondition, a
/// programmer error upstream of this pass that must abort the whole
/// compilation rather than be repaired. It still gets a typed,
/// `thiserror`-derived shape (rather than a bare `panic!`) so the diagnostic
/// message is structured and so tests can assert on *which* invariant a
/// deliberately broken fixture violates. The embedding compiler is expected
/// to treat `Err` as a hard abort: don't retry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("method `{method}`: block {block:?} predecessor/successor links are asymmetric")]
    AsymmetricEdge { method: String, block: BlockId },

    #[error("method `{method}`: block {block:?} does not end in exactly one terminator")]
    MissingTerminator { method: String, block: BlockId },

    #[error("method `{method}`: block {block:?} has catch handlers and more than one throwing instruction")]
    MultipleThrowsUnderHandler { method: String, block: BlockId },

    #[error("method `{method}`: value {value:?} is used at instruction {instruction_number} with no register assignment")]
    UnmappedValueUse {
        method: String,
        value: Value,
        instruction_number: u32,
    },

    #[error("method `{method}`: block {block:?} localsAtEntry disagrees across predecessors")]
    InconsistentLocals { method: String, block: BlockId },

    #[error("method `{method}`: block {block:?} has non-monotonic instruction numbers")]
    NonMonotonicInstructionNumbers { method: String, block: BlockId },
}
