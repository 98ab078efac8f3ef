pub mod ir;
pub mod peephole;
pub mod reexports;
