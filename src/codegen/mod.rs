//! Bytecode generator (C7).
//!
//! Lowers the checked AST to a linear instruction stream per callable
//! (`Chunk`): a constant pool, an `Op` stream (a typed instruction enum
//! rather than packed bytes — Rust's enum exhaustiveness gives us the
//! generator's "verify operand widths via a static table" for free), an
//! exception table, and a source-position table for runtime diagnostics.
//!
//! `finally` blocks are compiled by duplicating their body at each normal
//! exit, each `break`/`continue`/`return` that crosses them, and as an
//! implicit lowest-priority catch-all exception handler that re-throws
//! after running — see DESIGN.md for why this replaces the spec's
//! `ENTER_FINALLY`/`EXIT_FINALLY` sentinel protocol.

mod compiler;

pub use compiler::compile;

use crate::source::Position;
use crate::ast::{BinaryOp, UnaryOp};
use crate::types::TypeId;
use crate::value::Value;

#[derive(Debug, Clone)]
pub enum Op {
    Nop,
    Pop,
    Dup,
    PushVoid,
    PushTrue,
    PushFalse,
    LoadConst(u32),
    LoadLocal(u32),
    StoreLocal(u32),
    LoadField(String),
    StoreField(String),
    NewArray(usize),
    NewMap(usize),
    NewTuple(usize),
    Index,
    SetIndex,
    MakeRange,
    Concat(usize),
    UnaryOp(UnaryOp),
    BinaryOp(BinaryOp),
    InstanceOf(TypeId),
    CheckCast(TypeId),
    NumCast,
    ToStringOp,
    ToBoolOp,
    ToVoidOp,
    TypeOfOp,
    CallFunc(String, usize),
    /// Calls a `Value::Func` popped off the top of the stack (below the
    /// `argc` arguments), for indirect calls through a variable or field
    /// rather than a statically-named function.
    CallValue(usize),
    CallMethod(String, usize),
    New(TypeId, usize),
    Branch(usize),
    BranchFalse(usize),
    Goto(usize),
    Return,
    ReturnV,
    Throw,
    Assert,
    RunPipeline(usize),
    /// Like `RunPipeline`, but forks a capturing supervisor around the
    /// pipeline and pushes its captured stdout (trailing newlines
    /// stripped) as a `String` instead of the exit status as an `Int`.
    RunPipelineCapture(usize),
    ImportEnv(String),
    ExportEnv(String),
    TildeExpand,
    /// Reads the magic `$RANDOM` variable: a fresh value in `0..32768` on
    /// every access, matching the range bash's `$RANDOM` uses.
    LoadRandom,
}

#[derive(Debug, Clone)]
pub struct ExceptionEntry {
    pub start: usize,
    pub end: usize,
    pub handler: usize,
    pub catch_type: Option<TypeId>,
    pub local_slot: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub code: Vec<Op>,
    pub consts: Vec<Value>,
    pub pipelines: Vec<crate::ast::Pipeline>,
    pub exceptions: Vec<ExceptionEntry>,
    pub source_pos: Vec<Position>,
    pub num_locals: u32,
    pub param_names: Vec<String>,
    /// Slot -> declared name, for the pipeline-argument evaluator, which
    /// resolves `Var` nodes embedded in `CmdArg`s by name rather than by
    /// the slot index the rest of the VM uses.
    pub local_names: Vec<String>,
}

impl Chunk {
    pub fn new() -> Self {
        Chunk {
            code: Vec::new(),
            consts: Vec::new(),
            pipelines: Vec::new(),
            exceptions: Vec::new(),
            source_pos: Vec::new(),
            num_locals: 0,
            param_names: Vec::new(),
            local_names: Vec::new(),
        }
    }

    /// Disassembles this chunk as `pc: OPCODE operand...` lines (§6 dumps).
    pub fn disassemble(&self, name: &str) -> String {
        let mut out = format!("== {name} ==\n");
        for (pc, op) in self.code.iter().enumerate() {
            out.push_str(&format!("{pc:>4}: {op:?}\n"));
        }
        out
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Program {
    pub main: Chunk,
    pub functions: std::collections::HashMap<String, Chunk>,
    /// User-defined commands, invocable as pipeline commands.
    pub commands: std::collections::HashMap<String, Chunk>,
}
