use std::sync::Arc;

use bitflags::bitflags;

use crate::index_type;
use crate::indexvec::IndexThinVec;
use crate::ty::Type;

index_type!(
    /// Index of a symbol in the [`SymbolTable`]
    SymbolId u32
);
index_type!(
    /// Identity of a lexical block
    BlockId u32
);
index_type!(
    /// Identity of a function node
    FunctionId u32
);

/// Where the value of a symbol lives at run time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// No storage was assigned (the symbol is never read or written)
    Unallocated,
    /// A local variable slot of the method that declares it
    Slot,
    /// A property of the scope record of its defining block
    Scope,
    /// The n-th incoming parameter slot
    Param(u16),
}

bitflags! {
    pub struct SymbolFlags: u16 {
        const GLOBAL = 1 << 0;
        const VAR = 1 << 1;
        const PARAM = 1 << 2;
        /// Introduced by the resolver, never visible to user code
        const INTERNAL = 1 << 3;
        /// A temporary that lives for the duration of a single statement
        const TEMP = 1 << 4;
        /// The exception binding of a catch clause
        const EXCEPTION = 1 << 5;
        /// The implicit `arguments` object of a function
        const ARGUMENTS = 1 << 6;
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: Arc<str>,
    pub storage: Storage,
    pub ty: Type,
    pub flags: SymbolFlags,
    /// The block that declares this symbol
    pub block: BlockId,
    /// How many times the resolver saw this symbol being used
    pub use_count: u32,
}

impl Symbol {
    pub fn is_scope(&self) -> bool {
        self.storage == Storage::Scope
    }

    pub fn is_global(&self) -> bool {
        self.flags.contains(SymbolFlags::GLOBAL)
    }

    pub fn is_param(&self) -> bool {
        self.flags.contains(SymbolFlags::PARAM)
    }

    /// Whether this symbol lives in a method-local slot (including incoming parameter slots)
    pub fn is_slot(&self) -> bool {
        matches!(self.storage, Storage::Slot | Storage::Param(_))
    }
}

/// The arena of symbols produced by the resolver.
///
/// AST nodes refer to symbols by [`SymbolId`], so the table is immutable for the duration of a compilation.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: IndexThinVec<Symbol, SymbolId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, symbol: Symbol) -> SymbolId {
        match self.symbols.try_push(symbol) {
            Ok(id) => id,
            Err(_) => panic!("symbol table exceeded u32::MAX entries"),
        }
    }

    pub fn get(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.get(id)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols.iter_enumerated()
    }
}

impl std::ops::Index<SymbolId> for SymbolTable {
    type Output = Symbol;

    fn index(&self, index: SymbolId) -> &Self::Output {
        &self.symbols[index]
    }
}

impl std::ops::IndexMut<SymbolId> for SymbolTable {
    fn index_mut(&mut self, index: SymbolId) -> &mut Self::Output {
        &mut self.symbols[index]
    }
}
