//! Symbol declarations.

use std::sync::Arc;

use smol_str::SmolStr;

use crate::base::TextRange;

use super::doc_comment;
use super::ids::{DeclRef, ScopeId, UnitId};
use super::name::QualifiedIdentifier;
use super::types::Type;

/// Declaration kind without payload, used for matching and indexing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeclKind {
    Class,
    Function,
    Method,
    Variable,
    /// A class property.
    ClassMember,
    /// A global constant (`const X` outside a class, or `define()`).
    Constant,
    ClassConstant,
    Namespace,
    /// `use A\B`, `global $x` or a captured closure variable.
    Alias,
    /// `use A\B` where `A\B` is not a known class.
    NamespaceAlias,
    /// A trait method imported into a class.
    TraitMethodAlias,
    /// An include/require of another unit.
    Import,
}

impl DeclKind {
    /// Whether the last segment of the lookup key keeps its case.
    pub fn is_case_sensitive(self) -> bool {
        matches!(
            self,
            DeclKind::Variable | DeclKind::ClassMember | DeclKind::Constant | DeclKind::ClassConstant
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum Access {
    #[default]
    Public,
    Protected,
    Private,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ClassType {
    Class,
    Interface,
    Trait,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum ClassModifier {
    #[default]
    None,
    Abstract,
    Final,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassData {
    pub class_type: ClassType,
    pub modifier: ClassModifier,
    pub bases: Vec<DeclRef>,
    pub traits: Vec<DeclRef>,
}

impl ClassData {
    pub fn new(class_type: ClassType, modifier: ClassModifier) -> Self {
        Self {
            class_type,
            modifier,
            bases: Vec::new(),
            traits: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct MethodData {
    pub access: Access,
    pub is_static: bool,
    pub is_abstract: bool,
    pub is_final: bool,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct VariableData {
    pub superglobal: bool,
    /// Distinct types assigned over time, oldest first.
    pub history: Vec<Type>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct MemberData {
    pub access: Access,
    pub is_static: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AliasKind {
    Class,
    Variable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraitAliasData {
    pub aliased: DeclRef,
    pub access: Access,
    pub is_static: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DeclData {
    Class(ClassData),
    Function,
    Method(MethodData),
    Variable(VariableData),
    ClassMember(MemberData),
    Constant,
    ClassConstant,
    Namespace,
    Alias {
        kind: AliasKind,
        target: Option<DeclRef>,
    },
    NamespaceAlias {
        imported: QualifiedIdentifier,
    },
    TraitMethodAlias(TraitAliasData),
    Import {
        unit: UnitId,
    },
}

impl DeclData {
    pub fn kind(&self) -> DeclKind {
        match self {
            DeclData::Class(_) => DeclKind::Class,
            DeclData::Function => DeclKind::Function,
            DeclData::Method(_) => DeclKind::Method,
            DeclData::Variable(_) => DeclKind::Variable,
            DeclData::ClassMember(_) => DeclKind::ClassMember,
            DeclData::Constant => DeclKind::Constant,
            DeclData::ClassConstant => DeclKind::ClassConstant,
            DeclData::Namespace => DeclKind::Namespace,
            DeclData::Alias { .. } => DeclKind::Alias,
            DeclData::NamespaceAlias { .. } => DeclKind::NamespaceAlias,
            DeclData::TraitMethodAlias(_) => DeclKind::TraitMethodAlias,
            DeclData::Import { .. } => DeclKind::Import,
        }
    }
}

/// A named symbol of a unit.
#[derive(Clone, Debug, PartialEq)]
pub struct Declaration {
    /// Identifier as written, without namespace.
    pub name: SmolStr,
    /// Fully qualified identifier as written.
    pub id: QualifiedIdentifier,
    /// Lookup key: `id` case-folded according to the kind.
    pub key: QualifiedIdentifier,
    pub range: TextRange,
    /// Scope the declaration was made in.
    pub scope: ScopeId,
    /// Scope opened by the declaration (class body, function parameters,
    /// namespace).
    pub internal_scope: Option<ScopeId>,
    pub doc: Option<Arc<str>>,
    pub ty: Option<Type>,
    pub data: DeclData,
}

impl Declaration {
    pub fn new(
        name: SmolStr,
        id: QualifiedIdentifier,
        key: QualifiedIdentifier,
        range: TextRange,
        scope: ScopeId,
        data: DeclData,
    ) -> Self {
        Self {
            name,
            id,
            key,
            range,
            scope,
            internal_scope: None,
            doc: None,
            ty: None,
            data,
        }
    }

    pub fn kind(&self) -> DeclKind {
        self.data.kind()
    }

    pub fn is_deprecated(&self) -> bool {
        self.doc.as_deref().is_some_and(doc_comment::is_deprecated)
    }

    pub fn class(&self) -> Option<&ClassData> {
        match &self.data {
            DeclData::Class(class) => Some(class),
            _ => None,
        }
    }

    pub fn class_mut(&mut self) -> Option<&mut ClassData> {
        match &mut self.data {
            DeclData::Class(class) => Some(class),
            _ => None,
        }
    }

    pub fn method(&self) -> Option<&MethodData> {
        match &self.data {
            DeclData::Method(method) => Some(method),
            _ => None,
        }
    }

    pub fn access(&self) -> Access {
        match &self.data {
            DeclData::Method(m) => m.access,
            DeclData::ClassMember(m) => m.access,
            DeclData::TraitMethodAlias(t) => t.access,
            _ => Access::Public,
        }
    }

    pub fn is_superglobal(&self) -> bool {
        matches!(&self.data, DeclData::Variable(v) if v.superglobal)
    }

    /// Whether a function-kind lookup may return this declaration.
    pub fn is_function_like(&self) -> bool {
        matches!(
            self.kind(),
            DeclKind::Function | DeclKind::Method | DeclKind::TraitMethodAlias
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_sensitivity_by_kind() {
        assert!(DeclKind::Variable.is_case_sensitive());
        assert!(DeclKind::Constant.is_case_sensitive());
        assert!(!DeclKind::Class.is_case_sensitive());
        assert!(!DeclKind::Method.is_case_sensitive());
    }

    #[test]
    fn test_deprecated_from_doc() {
        let mut decl = Declaration::new(
            "f".into(),
            QualifiedIdentifier::parse("f"),
            QualifiedIdentifier::parse("f"),
            TextRange::default(),
            ScopeId::ROOT,
            DeclData::Function,
        );
        assert!(!decl.is_deprecated());
        decl.doc = Some(Arc::from("/** @deprecated */"));
        assert!(decl.is_deprecated());
        assert_eq!(decl.kind(), DeclKind::Function);
    }
}
