//! Semantic model: scopes, declarations, types and resolved uses.
//!
//! ## Architecture
//!
//! ```text
//! SyntaxTree ──► SemanticBuilder ──► SemanticUnit ──► UnitStore
//!                  │  pre-declarations                    │
//!                  │  declarations + types + context      ▼
//!                  │  uses                          PersistentIndex
//!                  ▼
//!             NameResolver (flat tables, scope chain, namespace, index)
//! ```
//!
//! Every file gets one [`SemanticUnit`] identified by a [`UnitId`] that
//! survives rebuilds. A unit is built detached from the [`UnitStore`] and
//! published with [`AnalysisEnvironment::commit`], so readers only ever see
//! complete units.

mod build;
mod decl;
mod diagnostics;
mod doc_comment;
mod env;
mod ids;
mod include;
mod index;
mod name;
mod resolve;
mod scope;
mod store;
mod types;
mod unit;

pub use build::SemanticBuilder;
pub use decl::{
    Access, AliasKind, ClassData, ClassModifier, ClassType, DeclData, DeclKind, Declaration,
    MemberData, MethodData, TraitAliasData, VariableData,
};
pub use diagnostics::{Diagnostic, DiagnosticCollector, Origin, RelatedInfo, Severity, codes};
pub use doc_comment::{find_in_doc_comment, has_tag, is_deprecated};
pub use env::{AnalysisEnvironment, BuildConfig, DEFAULT_BUILTINS};
pub use ids::{DeclId, DeclRef, ScopeId, UnitId};
pub use include::{NoProjects, ProjectFileSet, normalize, resolve_include_path};
pub use index::{IndexEntry, PersistentIndex};
pub use name::{QualifiedIdentifier, fold};
pub use resolve::{DeclarationType, NameResolver, UnitLookup, UnitView};
pub use scope::{ImportTarget, Scope, ScopeImport, ScopeKind};
pub use store::UnitStore;
pub use types::{FunctionType, IntegralType, StructureType, Type};
pub use unit::{Features, SemanticUnit, Use};
