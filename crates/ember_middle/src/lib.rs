pub mod ast;
pub mod compiler;
pub mod indexvec;
pub mod sourcemap;
pub mod ty;
