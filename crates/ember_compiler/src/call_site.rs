use ember_middle::ast::{CallExpr, ExprKind, SymbolTable};

use crate::config::CompilerConfig;
use crate::lexical::LexicalContext;
use crate::scope_access::ScopeAccess;

/// How a call expression is lowered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    /// An immediately invoked function literal, called statically
    Direct,
    /// A call to something named `eval`, checked at run time against the built-in
    Eval(ScopeAccess),
    /// The callee is looked up by name at every call
    Scope(ScopeAccess),
    /// The lookup and the call go through a stub shared by all calls with the same shape
    Shared(ScopeAccess),
    /// `base.name(...)` or `base[key](...)`, with the base as `this`
    Method,
    /// Any other callee value, called with an undefined `this`
    Value,
    /// `new callee(...)`
    New,
}

pub fn classify(call: &CallExpr, symbols: &SymbolTable, lc: &LexicalContext, config: &CompilerConfig) -> CallShape {
    if call.is_new {
        return CallShape::New;
    }

    match &call.callee.kind {
        ExprKind::Function(_) => CallShape::Direct,
        ExprKind::Access(..) | ExprKind::Index(..) => CallShape::Method,
        ExprKind::Ident(id) if symbols[*id].is_scope() => {
            let symbol = &symbols[*id];
            let access = ScopeAccess::resolve(symbol, lc);
            let uses = symbol.use_count;

            if call.is_eval {
                CallShape::Eval(access)
            } else if uses <= config.sharing.fast_scope_call
                || (!access.fast && uses <= config.sharing.slow_scope_call)
                || lc.in_dynamic_scope()
            {
                CallShape::Scope(access)
            } else {
                CallShape::Shared(access)
            }
        }
        _ => CallShape::Value,
    }
}
