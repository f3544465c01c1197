//! Typed AST (C3).
//!
//! Every node kind owns its children directly (tree ownership, no cycles).
//! `computedType` is filled in during type-checking (§4.3) and is required
//! to be non-null on every non-statement node reachable from `Script` once
//! the check phase completes.

use crate::source::Span;
use crate::types::TypeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StmtOp {
    And,
    Or,
    Semi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Range,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinaryOp {
    /// The dunder method arithmetic/comparison desugars to (§4.3).
    pub fn method_name(self) -> Option<&'static str> {
        Some(match self {
            BinaryOp::Add => "__PLUS__",
            BinaryOp::Sub => "__MINUS__",
            BinaryOp::Mul => "__MUL__",
            BinaryOp::Div => "__DIV__",
            BinaryOp::Mod => "__MOD__",
            BinaryOp::Eq => "__EQ__",
            BinaryOp::Ne => "__NE__",
            BinaryOp::Lt => "__LT__",
            BinaryOp::Gt => "__GT__",
            BinaryOp::Le => "__LE__",
            BinaryOp::Ge => "__GE__",
            BinaryOp::Range | BinaryOp::And | BinaryOp::Or
            | BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => return None,
        })
    }
}

/// Expression node. Carries `computed_type` filled by the checker.
#[derive(Debug, Clone)]
pub struct Expr {
    pub span: Span,
    pub computed_type: Option<TypeId>,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(span: Span, kind: ExprKind) -> Self {
        Expr { span, computed_type: None, kind }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    // Literals
    IntLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    RegexLiteral(String),
    SignalLiteral(String),
    BoolLiteral(bool),

    // Containers
    ArrayLiteral(Vec<Expr>),
    MapLiteral(Vec<(Expr, Expr)>),
    TupleLiteral(Vec<Expr>),

    // Names
    Var(String),
    Access(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),

    // Calls
    Apply(Box<Expr>, Vec<Expr>),
    MethodCall(Box<Expr>, String, Vec<Expr>),
    New(String, Vec<Expr>),

    // Operators
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Cast(Box<Expr>, String),
    InstanceOf(Box<Expr>, String),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),

    /// A coercion inserted by the type checker (§4.3 `TypeOp`).
    TypeOp(crate::types::Coercion, Box<Expr>),

    /// `typeof(expr)`: the runtime type name of `expr`'s value, as a
    /// `String` (spec.md line 93).
    TypeOf(Box<Expr>),

    // Command forms (also usable in expression position via `$(...)`)
    CmdSubst(Box<Pipeline>),
    ProcSubst(Box<Pipeline>),
    Tilde(Option<String>),
    StringInterp(Vec<Expr>),
}

#[derive(Debug, Clone)]
pub struct CmdArg {
    pub span: Span,
    pub segments: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirOp {
    In,        // <
    Out,       // >
    Append,    // >>
    ErrOut,    // 2>
    ErrAppend, // 2>>
    OutErr,    // &>
    OutErrApp, // &>>
    DupErr,    // 2>&1
    DupOut,    // 1>&2
    HereString, // <<<
}

#[derive(Debug, Clone)]
pub struct Redir {
    pub span: Span,
    pub op: RedirOp,
    pub target: Option<CmdArg>,
}

#[derive(Debug, Clone)]
pub struct Command {
    pub span: Span,
    pub name: CmdArg,
    pub args: Vec<CmdArg>,
    pub redirs: Vec<Redir>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkKind {
    Background,  // &
    Disown,      // &!
    PipeBg,      // &|
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    pub span: Span,
    pub commands: Vec<Command>,
    pub fork: Option<ForkKind>,
}

#[derive(Debug, Clone)]
pub struct CaseArm {
    pub patterns: Vec<Expr>,
    pub body: Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    Break,
    Continue,
    Return,
}

#[derive(Debug, Clone)]
pub struct Catch {
    pub name: String,
    pub ty: Option<String>,
    pub body: Block,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: String,
}

pub type Block = Vec<Stmt>;

#[derive(Debug, Clone)]
pub struct Stmt {
    pub span: Span,
    pub kind: StmtKind,
}

impl Stmt {
    pub fn new(span: Span, kind: StmtKind) -> Self {
        Stmt { span, kind }
    }
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    Block(Block),
    Loop { cond: Option<Expr>, body: Block, is_do_while: bool },
    For { var: String, iter: Expr, body: Block },
    Case { subject: Expr, arms: Vec<CaseArm> },
    Jump(JumpKind, Option<Expr>),
    Try { body: Block, catches: Vec<Catch>, finally: Option<Block> },
    Assert(Expr, Option<Expr>),
    VarDecl { name: String, ty: Option<String>, mutable: bool, init: Expr },
    Assign { target: Box<Expr>, value: Expr },
    ElementSelfAssign { target: Box<Expr>, index: Box<Expr>, op: BinaryOp, value: Box<Expr> },
    ImportEnv { name: String, default: Option<Expr> },
    ExportEnv { name: String, value: Expr },
    TypeAlias { name: String, target: String },
    Function { name: String, params: Vec<Param>, ret: Option<String>, body: Block },
    Interface { name: String },
    UserDefinedCmd { name: String, params: Vec<String>, body: Block },
    Source { path: CmdArg, as_name: Option<String>, is_list: bool },
    Pipeline(Pipeline),
    Throw(Expr),
    If { clauses: Vec<(Expr, Block)>, else_body: Option<Block> },
}

#[derive(Debug, Clone)]
pub struct Script {
    pub statements: Block,
}
