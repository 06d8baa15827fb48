//! # phpmodel-base
//!
//! Multi-pass semantic model builder for PHP sources.
//!
//! ## Module Structure (dependency order)
//!
//! ```text
//! project → Job pipeline, prioritized scheduler, directory loading
//!   ↓
//! hir     → Scopes, declarations, types, name resolution, uses
//!   ↓
//! syntax  → Lexer + typed tree + reference parser
//!   ↓
//! base    → Primitives (FileId, TextRange, Name interning)
//! ```

/// Foundation types: FileId, TextRange, Name interning
pub mod base;

/// Semantic model: units, scopes, declarations and the builders
pub mod hir;

/// Analysis jobs and the background scheduler
pub mod project;

/// Tokens, syntax tree and parser
pub mod syntax;

// Re-export foundation types
pub use base::{FileId, FileSet, Interner, LineCol, LineIndex, Name, TextRange, TextSize};
