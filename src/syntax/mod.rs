//! Syntax layer: tokens, typed tree and the reference parser.
//!
//! The semantic builders only depend on [`SyntaxTree`] and the node types in
//! [`ast`]; [`PhpParser`] is the default producer of those trees.

pub mod ast;
pub mod lexer;
mod parser;

pub use ast::{NodeId, SyntaxTree};
pub use parser::{ParseOutput, ParseProblem, PhpParser};
