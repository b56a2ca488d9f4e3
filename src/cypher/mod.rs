//! # Cypher Language
//!
//! The openCypher subset the backup tool speaks: a lexer, a parser that
//! produces a clean AST, and the statement builders used by the exporter
//! and importer. Pure functions, no I/O and no storage dependency.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod statements;

use crate::Result;
use ast::Statement;

pub use parser::parse_expression;

/// Parse a Cypher query string into an AST.
pub fn parse(query: &str) -> Result<Statement> {
    let tokens = lexer::tokenize(query)?;
    parser::parse_statement(&tokens)
}
