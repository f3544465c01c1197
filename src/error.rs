//! Error taxonomy (§7). Lex/parse/type errors bubble out of the compile
//! phase as a structured `CompileError`; runtime errors are thrown `Value`s
//! handled entirely inside the VM (§4.7) and never surface as Rust errors.

use thiserror::Error;

use crate::source::Position;

#[derive(Debug, Error)]
pub enum LexError {
    #[error("{pos:?}: invalid token {text:?}")]
    InvalidToken { pos: Position, text: String },
    #[error("{pos:?}: invalid token format: {detail}")]
    TokenFormat { pos: Position, detail: String },
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("{pos:?}: expected {expected}, found {found}")]
    TokenMismatch { pos: Position, expected: String, found: String },
    #[error("{pos:?}: no viable alternative")]
    NoViableAlter { pos: Position },
}

#[derive(Debug, Error)]
pub enum TypeError {
    #[error("{pos:?}: undefined symbol '{name}'")]
    UndefinedSymbol { pos: Position, name: String },
    #[error("{pos:?}: undefined field '{name}'")]
    UndefinedField { pos: Position, name: String },
    #[error("{pos:?}: undefined method '{name}'")]
    UndefinedMethod { pos: Position, name: String },
    #[error("{pos:?}: undefined type '{name}'")]
    UndefinedType { pos: Position, name: String },
    #[error("{pos:?}: required type {expected}, found {actual}")]
    Required { pos: Position, expected: String, actual: String },
    #[error("{pos:?}: type {ty} cannot appear here")]
    Unacceptable { pos: Position, ty: String },
    #[error("{pos:?}: invalid cast from {from} to {to}")]
    CastOp { pos: Position, from: String, to: String },
    #[error("{pos:?}: '{name}' is already defined")]
    DefinedSymbol { pos: Position, name: String },
    #[error("{pos:?}: statement only allowed at toplevel")]
    OutsideToplevel { pos: Position },
    #[error("{pos:?}: statement only allowed inside a loop")]
    InsideLoop { pos: Position },
    #[error("{pos:?}: statement only allowed inside a function")]
    InsideFunc { pos: Position },
    #[error("{pos:?}: unreachable statement")]
    Unreachable { pos: Position },
    #[error("{pos:?}: try block has no meaningful effect")]
    MeaninglessTry { pos: Position },
    #[error("{pos:?}: try block is empty")]
    EmptyTry { pos: Position },
    #[error("{pos:?}: duplicated case pattern")]
    DupPattern { pos: Position },
    #[error("{pos:?}: constant expression required")]
    Constant { pos: Position },
    #[error("{pos:?}: symbol '{name}' conflicts with an existing declaration")]
    ConflictSymbol { pos: Position, name: String },
    #[error("{pos:?}: '{name}' is not a template type")]
    NotTemplate { pos: Position, name: String },
    #[error("{pos:?}: value of type {ty} is not callable")]
    NotCallable { pos: Position, ty: String },
    #[error("{pos:?}: expression is not assignable")]
    Assignable { pos: Position },
    #[error("{pos:?}: '{name}' is read-only")]
    ReadOnly { pos: Position, name: String },
    #[error("{pos:?}: unsupported construct")]
    Unsupported { pos: Position },
}

/// Runtime-error categories the VM can throw. Unlike `ParseError`/
/// `TypeError`, a `RuntimeErrorKind` is never itself propagated as a Rust
/// error — the VM only uses its `Display` to build the message of a
/// thrown `Value::Error` (§4.7 keeps exception handling entirely inside
/// the operand-stack/exception-table machinery, not `Result`).
#[derive(Debug, Error)]
pub enum RuntimeErrorKind {
    #[error("undefined function '{name}'")]
    UndefinedFunction { name: String },
    #[error("value of type {ty} is not callable")]
    NotCallable { ty: String },
    #[error("cannot cast {value} to {ty}")]
    CastFailed { value: String, ty: String },
    #[error("index {index} out of range")]
    OutOfRange { index: String },
    #[error("key {key} not found")]
    KeyNotFound { key: String },
    #[error("value of type {ty} is not indexable")]
    NotIndexable { ty: String },
    #[error("field '{field}' is not assignable")]
    FieldNotAssignable { field: String },
    #[error("assertion failed: {message}")]
    AssertionFailed { message: String },
}

impl From<RuntimeErrorKind> for String {
    fn from(e: RuntimeErrorKind) -> String {
        e.to_string()
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Type(#[from] TypeError),
}
