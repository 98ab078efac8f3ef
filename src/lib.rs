//! A post-register-allocation peephole optimizer for a Java-to-DEX
//! compiler's SSA IR. The crate's one entry point is
//! [`ir::peephole::optimize`]; everything else is either the minimal
//! concrete IR it operates on (`ir::ir`) or the phase pipeline itself
//! (`ir::peephole`). The front end, SSA builder, linear-scan register
//! allocator, code generator, and CLI are out of scope and are
//! represented only by the `ir::peephole::allocator::RegisterAllocator`
//! trait boundary an embedding compiler implements.

pub mod common;
pub mod ir;
