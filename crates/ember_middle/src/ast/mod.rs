//! The annotated syntax tree consumed by the code generator.
//!
//! Every node has already been resolved: identifiers point at symbols, every expression carries the
//! static type the resolver inferred for it and every block knows whether it needs a scope record.

use std::sync::Arc;

use bitflags::bitflags;
use derive_more::Display;

use crate::sourcemap::Span;
use crate::ty::Type;

pub mod builder;
pub mod symbol;

pub use symbol::{BlockId, FunctionId, Storage, Symbol, SymbolFlags, SymbolId, SymbolTable};

/// A fully resolved program
#[derive(Debug, Clone)]
pub struct Program {
    pub source_name: Arc<str>,
    pub symbols: SymbolTable,
    /// The outermost function, whose body is the top level of the script
    pub main: FunctionNode,
}

bitflags! {
    pub struct FunctionFlags: u16 {
        /// The outermost function of a script
        const IS_PROGRAM = 1 << 0;
        const STRICT = 1 << 1;
        /// The body contains a direct call to `eval`
        const HAS_EVAL = 1 << 2;
        /// The function reads variables from an enclosing function's scope
        const NEEDS_PARENT_SCOPE = 1 << 3;
        /// The function refers to itself as a callee (by name or through `arguments.callee`)
        const NEEDS_CALLEE = 1 << 4;
        const NEEDS_ARGUMENTS = 1 << 5;
        /// Parameters arrive as a single array rather than in individual slots
        const VAR_ARGS = 1 << 6;
    }
}

#[derive(Debug, Clone)]
pub struct FunctionNode {
    pub id: FunctionId,
    /// The unique name of this function; identical inlined copies share it
    pub name: Arc<str>,
    pub params: Vec<SymbolId>,
    pub body: Block,
    pub return_type: Type,
    pub flags: FunctionFlags,
    pub line: u32,
    pub span: Span,
}

impl FunctionNode {
    pub fn is_program(&self) -> bool {
        self.flags.contains(FunctionFlags::IS_PROGRAM)
    }

    pub fn is_strict(&self) -> bool {
        self.flags.contains(FunctionFlags::STRICT)
    }

    pub fn has_eval(&self) -> bool {
        self.flags.contains(FunctionFlags::HAS_EVAL)
    }

    pub fn needs_parent_scope(&self) -> bool {
        self.flags.contains(FunctionFlags::NEEDS_PARENT_SCOPE)
    }

    pub fn needs_callee(&self) -> bool {
        self.flags.contains(FunctionFlags::NEEDS_CALLEE)
    }

    pub fn needs_arguments(&self) -> bool {
        self.flags.contains(FunctionFlags::NEEDS_ARGUMENTS)
    }

    pub fn is_var_args(&self) -> bool {
        self.flags.intersects(FunctionFlags::VAR_ARGS | FunctionFlags::NEEDS_ARGUMENTS)
    }
}

/// A lexical block
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    /// The symbols declared by this block, in declaration order
    pub symbols: Vec<SymbolId>,
    /// Whether entering this block allocates a scope record
    pub needs_scope: bool,
    pub statements: Vec<Statement>,
}

impl Block {
    /// Whether control can never fall off the end of this block
    pub fn is_terminal(&self) -> bool {
        self.statements.last().is_some_and(Statement::is_terminal)
    }
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StatementKind,
    pub line: u32,
    pub span: Span,
}

impl Statement {
    pub fn new(kind: StatementKind, line: u32) -> Self {
        Self {
            kind,
            line,
            span: Span::COMPILER_GENERATED,
        }
    }

    pub fn is_terminal(&self) -> bool {
        match &self.kind {
            StatementKind::Return(_)
            | StatementKind::Throw(_)
            | StatementKind::Break(_)
            | StatementKind::Continue(_) => true,
            StatementKind::Block(b) => b.is_terminal(),
            StatementKind::If(i) => i.pass.is_terminal() && i.fail.as_ref().is_some_and(Block::is_terminal),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum StatementKind {
    Expression(Expr),
    Var(VarDecl),
    Block(Block),
    If(IfStatement),
    While(WhileLoop),
    For(ForLoop),
    ForIn(ForInLoop),
    Labeled(LabeledStatement),
    Break(Option<Arc<str>>),
    Continue(Option<Arc<str>>),
    Return(Option<Expr>),
    Throw(Expr),
    Try(TryCatch),
    Switch(SwitchStatement),
    With(WithStatement),
    Empty,
}

#[derive(Debug, Clone)]
pub struct VarDecl {
    pub symbol: SymbolId,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct IfStatement {
    pub test: Expr,
    pub pass: Block,
    pub fail: Option<Block>,
}

/// `while (test) body` or `do body while (test)`
#[derive(Debug, Clone)]
pub struct WhileLoop {
    pub test: Expr,
    pub body: Block,
    pub do_while: bool,
}

#[derive(Debug, Clone)]
pub struct ForLoop {
    pub init: Option<Expr>,
    pub test: Option<Expr>,
    pub modify: Option<Expr>,
    pub body: Block,
}

/// `for (target in object) body`, or `for each (target in object) body` if `each` is set
#[derive(Debug, Clone)]
pub struct ForInLoop {
    pub target: Expr,
    pub object: Expr,
    pub body: Block,
    pub each: bool,
}

#[derive(Debug, Clone)]
pub struct LabeledStatement {
    pub label: Arc<str>,
    pub body: Box<Statement>,
}

#[derive(Debug, Clone)]
pub struct TryCatch {
    pub body: Block,
    pub catches: Vec<CatchClause>,
}

#[derive(Debug, Clone)]
pub struct CatchClause {
    /// The symbol the caught value is bound to, declared by `body`
    pub exception: SymbolId,
    /// `catch (e if condition)`
    pub condition: Option<Expr>,
    pub body: Block,
}

#[derive(Debug, Clone)]
pub struct SwitchStatement {
    pub discriminant: Expr,
    pub cases: Vec<SwitchCase>,
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    /// `None` for the default case
    pub test: Option<Expr>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub struct WithStatement {
    pub object: Expr,
    pub body: Block,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Type) -> Self {
        Self {
            kind,
            ty,
            span: Span::COMPILER_GENERATED,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn literal(literal: Literal) -> Self {
        let ty = literal.ty();
        Self::new(ExprKind::Literal(literal), ty)
    }

    pub fn undefined() -> Self {
        Self::literal(Literal::Undefined)
    }

    pub fn int(v: i32) -> Self {
        Self::literal(Literal::Int(v))
    }

    pub fn double(v: f64) -> Self {
        Self::literal(Literal::Double(v))
    }

    pub fn boolean(v: bool) -> Self {
        Self::literal(Literal::Boolean(v))
    }

    pub fn string(v: &str) -> Self {
        Self::literal(Literal::String(Arc::from(v)))
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr, ty: Type) -> Self {
        Self::new(ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)), ty)
    }

    pub fn unary(op: UnaryOp, operand: Expr, ty: Type) -> Self {
        Self::new(ExprKind::Unary(op, Box::new(operand)), ty)
    }

    pub fn access(base: Expr, property: &str, ty: Type) -> Self {
        Self::new(ExprKind::Access(Box::new(base), Arc::from(property)), ty)
    }

    pub fn index(base: Expr, index: Expr, ty: Type) -> Self {
        Self::new(ExprKind::Index(Box::new(base), Box::new(index)), ty)
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        let ty = value.ty;
        Self::new(
            ExprKind::Assign(AssignExpr {
                op: None,
                target: Box::new(target),
                value: Box::new(value),
            }),
            ty,
        )
    }

    pub fn compound_assign(op: BinaryOp, target: Expr, value: Expr, ty: Type) -> Self {
        Self::new(
            ExprKind::Assign(AssignExpr {
                op: Some(op),
                target: Box::new(target),
                value: Box::new(value),
            }),
            ty,
        )
    }

    pub fn call(callee: Expr, args: Vec<Expr>, ty: Type) -> Self {
        Self::new(
            ExprKind::Call(CallExpr {
                callee: Box::new(callee),
                args,
                is_new: false,
                is_eval: false,
            }),
            ty,
        )
    }

    pub fn ternary(test: Expr, then: Expr, otherwise: Expr, ty: Type) -> Self {
        Self::new(ExprKind::Ternary(Box::new(test), Box::new(then), Box::new(otherwise)), ty)
    }

    /// Whether evaluating this expression can have no side effects
    /// and the value cannot be changed by evaluating another expression first
    pub fn is_local(&self, symbols: &SymbolTable) -> bool {
        match &self.kind {
            ExprKind::Literal(lit) => !matches!(lit, Literal::Array(_) | Literal::Regex { .. }),
            ExprKind::Ident(id) => symbols[*id].is_slot(),
            ExprKind::This => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Literal),
    /// A reference to a resolved symbol
    Ident(SymbolId),
    This,
    /// `base.property`
    Access(Box<Expr>, Arc<str>),
    /// `base[index]`
    Index(Box<Expr>, Box<Expr>),
    Call(CallExpr),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Assign(AssignExpr),
    /// `test ? then : otherwise`
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Function(Box<FunctionNode>),
    Object(Vec<(Arc<str>, Expr)>),
    /// A request to the runtime that has no dedicated instruction
    Runtime(RuntimeRequest, Vec<Expr>),
}

#[derive(Debug, Clone)]
pub enum Literal {
    Undefined,
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(Arc<str>),
    Regex { pattern: Arc<str>, flags: Arc<str> },
    /// Elements of an array literal; `None` is a hole
    Array(Vec<Option<Expr>>),
}

impl Literal {
    pub fn ty(&self) -> Type {
        match self {
            Literal::Boolean(_) => Type::Boolean,
            Literal::Int(_) => Type::Int,
            Literal::Long(_) => Type::Long,
            Literal::Double(_) => Type::Double,
            Literal::Undefined => Type::Undefined,
            _ => Type::Object,
        }
    }

    /// Whether this literal can be folded into an array preset
    pub fn is_constant(&self) -> bool {
        !matches!(self, Literal::Array(_) | Literal::Regex { .. })
    }
}

#[derive(Debug, Clone)]
pub struct CallExpr {
    pub callee: Box<Expr>,
    pub args: Vec<Expr>,
    pub is_new: bool,
    /// The callee is the identifier `eval` and the resolver considers this a direct eval
    pub is_eval: bool,
}

#[derive(Debug, Clone)]
pub struct AssignExpr {
    /// The operator of a compound assignment (`a += b`)
    pub op: Option<BinaryOp>,
    pub target: Box<Expr>,
    pub value: Box<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum UnaryOp {
    #[display("-")]
    Neg,
    #[display("+")]
    Plus,
    #[display("!")]
    Not,
    #[display("~")]
    BitNot,
    #[display("void")]
    Void,
    #[display("++x")]
    PreIncrement,
    #[display("--x")]
    PreDecrement,
    #[display("x++")]
    PostIncrement,
    #[display("x--")]
    PostDecrement,
}

impl UnaryOp {
    pub fn is_self_modifying(self) -> bool {
        matches!(
            self,
            UnaryOp::PreIncrement | UnaryOp::PreDecrement | UnaryOp::PostIncrement | UnaryOp::PostDecrement
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BinaryOp {
    #[display("+")]
    Add,
    #[display("-")]
    Sub,
    #[display("*")]
    Mul,
    #[display("/")]
    Div,
    #[display("%")]
    Rem,
    #[display("&")]
    BitAnd,
    #[display("|")]
    BitOr,
    #[display("^")]
    BitXor,
    #[display("<<")]
    Shl,
    #[display(">>")]
    Sar,
    #[display(">>>")]
    Shr,
    #[display("==")]
    Eq,
    #[display("!=")]
    Ne,
    #[display("===")]
    StrictEq,
    #[display("!==")]
    StrictNe,
    #[display("<")]
    Lt,
    #[display("<=")]
    Le,
    #[display(">")]
    Gt,
    #[display(">=")]
    Ge,
    #[display("&&")]
    And,
    #[display("||")]
    Or,
    /// `a, b` evaluating to `a`
    #[display(",<")]
    CommaLeft,
    /// `a, b` evaluating to `b`
    #[display(",>")]
    CommaRight,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::StrictEq
                | BinaryOp::StrictNe
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RuntimeRequest {
    #[display("typeof")]
    Typeof,
    #[display("delete")]
    Delete,
    #[display("in")]
    In,
    #[display("instanceof")]
    InstanceOf,
}

impl RuntimeRequest {
    /// The number of operands this request takes
    pub fn arity(self) -> usize {
        match self {
            RuntimeRequest::Typeof => 1,
            RuntimeRequest::Delete | RuntimeRequest::In | RuntimeRequest::InstanceOf => 2,
        }
    }
}
