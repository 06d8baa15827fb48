//! Arena identifiers for units, scopes and declarations.

use std::fmt;

/// Handle of a [`SemanticUnit`](super::SemanticUnit) in the unit store.
///
/// A unit keeps its id for its whole lifetime: rebuilding the same file
/// replaces the unit's contents under the same id, so references held by
/// other units stay valid.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct UnitId(pub u32);

impl UnitId {
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitId({})", self.0)
    }
}

/// Unit-local declaration index.
///
/// Stable across rebuilds for declarations that are re-encountered.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct DeclId(pub u32);

impl DeclId {
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for DeclId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeclId({})", self.0)
    }
}

/// Unit-local scope index. Scope 0 is the root of the unit.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ScopeId(pub u32);

impl ScopeId {
    pub const ROOT: ScopeId = ScopeId(0);

    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeId({})", self.0)
    }
}

/// A declaration anywhere in the store.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct DeclRef {
    pub unit: UnitId,
    pub decl: DeclId,
}

impl DeclRef {
    #[inline]
    pub const fn new(unit: UnitId, decl: DeclId) -> Self {
        Self { unit, decl }
    }
}

impl fmt::Debug for DeclRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeclRef({}:{})", self.unit.0, self.decl.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decl_ref_equality() {
        let a = DeclRef::new(UnitId::new(1), DeclId::new(0));
        let b = DeclRef::new(UnitId::new(1), DeclId::new(0));
        let c = DeclRef::new(UnitId::new(1), DeclId::new(1));
        let d = DeclRef::new(UnitId::new(2), DeclId::new(0));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_decl_ref_size() {
        assert_eq!(std::mem::size_of::<DeclRef>(), 8);
    }
}
