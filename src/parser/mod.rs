//! Recursive-descent parser (C5).
//!
//! Drives the modal lexer's mode stack to disambiguate grammar positions:
//! after `function NAME` it pushes `Name`; after `:` in a type position it
//! pushes `Type`; entering a command word it pushes `Cmd`.

mod parser;

pub use parser::Parser;

use crate::ast::Script;
use crate::error::ParseError;
use crate::source::SourceMap;

pub fn parse(source: &SourceMap) -> Result<Script, ParseError> {
    let mut p = Parser::new(source);
    p.parse_script()
}
