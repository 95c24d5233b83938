//! The external, untyped syntax tree produced by the parser.
//!
//! Rather than mirror the teacher's original virtual-dispatch hierarchy
//! (`AstExpr`/`AstStmt`/`AstItem` base classes, one override per concrete
//! shape) this is a closed set of enums: every case is known up front, so
//! a single lowering pass can `match` over it instead of threading
//! virtual calls through a dozen tiny subclasses.

pub mod lower;
mod span;

pub use span::{Span, Spanned};

/// The interner lives in [`crate::support::Interner`] and is injected into
/// every pipeline stage rather than kept as global state (SPEC_FULL.md §9).
pub type Symbol = crate::support::Symbol;

#[derive(Debug, Clone)]
pub struct CompUnit {
    pub items: Vec<Item>,
}

#[derive(Debug, Clone)]
pub enum Item {
    Decl(Decl),
    Func(FuncDef),
}

/// `const`? `int` name (`[` expr `]`)* (`=` init)? (`,` ...)* `;`
///
/// One `Decl` node may declare several symbols at once (`int a, b[3];`);
/// each gets its own dimensions and optional initializer.
#[derive(Debug, Clone)]
pub struct Decl {
    pub is_const: bool,
    pub bindings: Vec<DeclBinding>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct DeclBinding {
    pub name: Symbol,
    pub name_span: Span,
    /// Empty for a scalar; one `Expr` per array dimension otherwise.
    pub dims: Vec<Expr>,
    pub init: Option<Init>,
}

/// A scalar or (possibly nested) list initializer.
#[derive(Debug, Clone)]
pub enum Init {
    Expr(Expr),
    List(Vec<Init>, Span),
}

#[derive(Debug, Clone)]
pub struct FuncDef {
    pub ret_void: bool,
    pub name: Symbol,
    pub name_span: Span,
    pub params: Vec<Param>,
    pub body: Block,
    pub span: Span,
}

/// A parameter. `is_array` is false for a plain `int`; true for an array
/// parameter (`int a[]` or `int a[][3]`), whose first `[]` carries no size
/// expression because it decays to a pointer — `dims` holds only the
/// trailing dimensions.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: Symbol,
    pub name_span: Span,
    pub is_array: bool,
    pub dims: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    Decl(Decl),
    Assign {
        lval: LValue,
        rhs: Expr,
        span: Span,
    },
    Block(Block),
    If {
        cond: Cond,
        then_blk: Block,
        else_blk: Option<Block>,
        span: Span,
    },
    While {
        cond: Cond,
        body: Block,
        span: Span,
    },
    Break(Span),
    Continue(Span),
    Return {
        value: Option<Expr>,
        span: Span,
    },
    Empty(Span),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Expr(e) => e.span(),
            Stmt::Decl(d) => d.span,
            Stmt::Assign { span, .. } => *span,
            Stmt::Block(b) => b.span,
            Stmt::If { span, .. } => *span,
            Stmt::While { span, .. } => *span,
            Stmt::Break(s) => *s,
            Stmt::Continue(s) => *s,
            Stmt::Return { span, .. } => *span,
            Stmt::Empty(s) => *s,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LValue {
    pub name: Symbol,
    pub indices: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Pos,
    Neg,
    Not,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(i64, Span),
    LValue(LValue),
    Unary(UnOp, Box<Expr>, Span),
    Binary(BinOp, Box<Expr>, Box<Expr>, Span),
    Call {
        name: Symbol,
        name_span: Span,
        args: Vec<Expr>,
        span: Span,
    },
    /// A condition used where an `int` value is expected (`x = a < b;`),
    /// which yields 0 or 1.
    Cond(Box<Cond>),
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal(_, s) => *s,
            Expr::LValue(l) => l.span,
            Expr::Unary(_, _, s) => *s,
            Expr::Binary(_, _, _, s) => *s,
            Expr::Call { span, .. } => *span,
            Expr::Cond(c) => c.span(),
        }
    }
}

/// Comparison and short-circuit ops share one grammar tier with plain
/// expressions living underneath (`AstLogicalOp` in the original), so a
/// bare expression can always be coerced into a one-armed `Cond` and vice
/// versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    Or,
    And,
    Lt,
    Gt,
    Leq,
    Geq,
    Eq,
    Ne,
}

#[derive(Debug, Clone)]
pub enum Cond {
    Expr(Expr),
    Binary(LogicalOp, Box<Cond>, Box<Cond>, Span),
}

impl Cond {
    pub fn span(&self) -> Span {
        match self {
            Cond::Expr(e) => e.span(),
            Cond::Binary(_, _, _, s) => *s,
        }
    }
}
