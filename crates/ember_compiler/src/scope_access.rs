use ember_middle::ast::Symbol;
use ember_middle::compiler::callsite::CallSiteFlags;

use crate::config::CompilerConfig;
use crate::lexical::LexicalContext;

/// How a scope-resident symbol is reached from the current position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeAccess {
    pub fast: bool,
    /// Number of parent links to follow before the property can be looked up, or -1 to search the whole chain
    pub depth: i32,
}

impl ScopeAccess {
    pub fn resolve(symbol: &Symbol, lc: &LexicalContext) -> Self {
        if lc.is_fast_scope(symbol) {
            Self {
                fast: true,
                depth: lc.scope_proto_depth(symbol.block),
            }
        } else {
            Self { fast: false, depth: -1 }
        }
    }

    /// Whether the lookup can assume the property lives on the receiver itself
    pub fn is_exact(&self) -> bool {
        self.fast && self.depth >= 0
    }

    pub fn flags(&self) -> CallSiteFlags {
        if self.is_exact() {
            CallSiteFlags::SCOPE | CallSiteFlags::FAST_SCOPE
        } else {
            CallSiteFlags::SCOPE
        }
    }

    /// Whether reads of `symbol` go through a shared getter stub
    pub fn shares_get(&self, symbol: &Symbol, config: &CompilerConfig) -> bool {
        self.fast && symbol.use_count > config.sharing.fast_scope_get
    }
}
