//! Foundation types for the phpmodel toolchain.
//!
//! - [`FileId`], [`FileSet`] - Document identities, paths and contents
//! - [`TextRange`], [`TextSize`] - Source positions
//! - [`LineCol`], [`LineIndex`] - Line/column conversion
//! - [`Name`], [`Interner`] - Identifier interning
//!
//! This module has NO dependencies on other phpmodel modules.

mod file_id;
mod intern;
mod span;

pub use file_id::{FileContents, FileId, FileSet};
pub use intern::{Interner, Name};
pub use span::{LineCol, LineIndex, TextRange, TextSize};

pub use text_size;
