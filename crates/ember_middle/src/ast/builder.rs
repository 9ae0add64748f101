//! Construction helpers for annotated trees.
//!
//! A resolver (or a test) declares symbols against block identities first and assembles the blocks
//! afterwards, so that a block can collect the symbols that were declared for it.

use std::sync::Arc;

use crate::sourcemap::Span;
use crate::ty::Type;

use super::{
    Block, BlockId, Expr, ExprKind, FunctionFlags, FunctionId, FunctionNode, Program, Statement, Storage, Symbol,
    SymbolFlags, SymbolId, SymbolTable,
};

#[derive(Debug, Default)]
pub struct ProgramBuilder {
    symbols: SymbolTable,
    blocks: u32,
    functions: u32,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_id(&mut self) -> BlockId {
        let id = BlockId(self.blocks);
        self.blocks += 1;
        id
    }

    pub fn function_id(&mut self) -> FunctionId {
        let id = FunctionId(self.functions);
        self.functions += 1;
        id
    }

    pub fn declare(&mut self, block: BlockId, name: &str, storage: Storage, ty: Type, flags: SymbolFlags) -> SymbolId {
        self.symbols.add(Symbol {
            name: Arc::from(name),
            storage,
            ty,
            flags,
            block,
            use_count: 0,
        })
    }

    pub fn set_use_count(&mut self, id: SymbolId, count: u32) {
        self.symbols[id].use_count = count;
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id]
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// An identifier expression typed after its symbol
    pub fn ident(&self, id: SymbolId) -> Expr {
        Expr::new(ExprKind::Ident(id), self.symbols[id].ty)
    }

    /// Assembles a block out of the symbols declared for `id` so far
    pub fn block(&self, id: BlockId, needs_scope: bool, statements: Vec<Statement>) -> Block {
        let symbols = self
            .symbols
            .iter()
            .filter(|(_, sym)| sym.block == id)
            .map(|(sid, _)| sid)
            .collect();

        Block {
            id,
            symbols,
            needs_scope,
            statements,
        }
    }

    pub fn function(
        &self,
        id: FunctionId,
        name: &str,
        params: Vec<SymbolId>,
        body: Block,
        return_type: Type,
        flags: FunctionFlags,
    ) -> FunctionNode {
        FunctionNode {
            id,
            name: Arc::from(name),
            params,
            body,
            return_type,
            flags,
            line: 1,
            span: Span::COMPILER_GENERATED,
        }
    }

    pub fn finish(self, source_name: &str, main: FunctionNode) -> Program {
        Program {
            source_name: Arc::from(source_name),
            symbols: self.symbols,
            main,
        }
    }
}
