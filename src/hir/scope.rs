//! Lexical scopes of a unit.

use crate::base::TextRange;

use super::ids::{DeclId, DeclRef, ScopeId};
use super::name::QualifiedIdentifier;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// Root of a unit.
    Global,
    Namespace,
    /// Internal scope of a class, interface or trait.
    Class,
    /// Parameter list of a function, method or closure.
    Parameters,
    /// Body of a function, method or closure.
    Body,
    /// `use (...)` list of a closure.
    Captured,
}

impl ScopeKind {
    /// Declarations in searchable scopes are visible to flat lookups.
    pub fn is_searchable(self) -> bool {
        matches!(self, ScopeKind::Global | ScopeKind::Namespace | ScopeKind::Class)
    }

    /// Scopes belonging to a function-like construct.
    pub fn is_function_local(self) -> bool {
        matches!(self, ScopeKind::Parameters | ScopeKind::Body | ScopeKind::Captured)
    }
}

/// Target of an import edge.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ImportTarget {
    /// Another scope of the same unit.
    Local(ScopeId),
    /// The internal scope of a class declaration, possibly in another unit.
    /// Resolved when searched so rebuilt units stay reachable.
    Class(DeclRef),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ScopeImport {
    pub target: ImportTarget,
    /// Declarations of the target are visible as if declared here.
    pub propagate: bool,
}

#[derive(Clone, Debug)]
pub struct Scope {
    pub kind: ScopeKind,
    pub range: TextRange,
    pub parent: Option<ScopeId>,
    /// Declaration that owns this scope (class, function, namespace).
    pub owner: Option<DeclId>,
    /// Qualified identifier that prefixes declarations made here.
    pub id: QualifiedIdentifier,
    pub(crate) imports: Vec<ScopeImport>,
    pub(crate) children: Vec<ScopeId>,
    pub(crate) declarations: Vec<DeclId>,
}

impl Scope {
    pub fn new(
        kind: ScopeKind,
        range: TextRange,
        parent: Option<ScopeId>,
        id: QualifiedIdentifier,
    ) -> Self {
        Self {
            kind,
            range,
            parent,
            owner: None,
            id,
            imports: Vec::new(),
            children: Vec::new(),
            declarations: Vec::new(),
        }
    }

    pub fn is_searchable(&self) -> bool {
        self.kind.is_searchable()
    }

    pub fn imports(&self) -> &[ScopeImport] {
        &self.imports
    }

    pub fn children(&self) -> &[ScopeId] {
        &self.children
    }

    /// Declarations made directly in this scope, in creation order.
    pub fn declarations(&self) -> &[DeclId] {
        &self.declarations
    }

    pub fn imports_class(&self, class: DeclRef) -> bool {
        self.imports
            .iter()
            .any(|import| import.target == ImportTarget::Class(class))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_searchable_kinds() {
        assert!(ScopeKind::Global.is_searchable());
        assert!(ScopeKind::Class.is_searchable());
        assert!(!ScopeKind::Body.is_searchable());
        assert!(!ScopeKind::Parameters.is_searchable());
        assert!(ScopeKind::Captured.is_function_local());
    }
}
