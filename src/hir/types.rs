//! The lightweight type system attached to declarations.

use std::fmt;

use super::ids::DeclRef;
use super::name::QualifiedIdentifier;

/// Built-in scalar-ish types.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IntegralType {
    Null,
    Void,
    Bool,
    Int,
    Float,
    String,
    Mixed,
    Resource,
}

impl IntegralType {
    pub fn name(self) -> &'static str {
        match self {
            IntegralType::Null => "null",
            IntegralType::Void => "void",
            IntegralType::Bool => "bool",
            IntegralType::Int => "int",
            IntegralType::Float => "float",
            IntegralType::String => "string",
            IntegralType::Mixed => "mixed",
            IntegralType::Resource => "resource",
        }
    }
}

/// Reference to a class, interface or trait declaration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StructureType {
    pub decl: DeclRef,
    pub name: QualifiedIdentifier,
}

/// Signature of a function, method or closure.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct FunctionType {
    pub params: Vec<Type>,
    /// `None` until a return type is known.
    pub return_type: Option<Box<Type>>,
    /// Closures have no enclosing declaration.
    pub anonymous: bool,
}

impl FunctionType {
    pub fn return_type(&self) -> Option<&Type> {
        self.return_type.as_deref()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Integral(IntegralType),
    Function(FunctionType),
    Structure(StructureType),
    /// Array with an optional tracked element type.
    Array(Option<Box<Type>>),
    Union(Vec<Type>),
    /// By-reference parameter or return.
    Reference(Box<Type>),
}

impl Type {
    pub const MIXED: Type = Type::Integral(IntegralType::Mixed);
    pub const VOID: Type = Type::Integral(IntegralType::Void);
    pub const NULL: Type = Type::Integral(IntegralType::Null);
    pub const BOOL: Type = Type::Integral(IntegralType::Bool);
    pub const INT: Type = Type::Integral(IntegralType::Int);
    pub const FLOAT: Type = Type::Integral(IntegralType::Float);
    pub const STRING: Type = Type::Integral(IntegralType::String);

    pub fn array_of(element: Option<Type>) -> Type {
        Type::Array(element.map(Box::new))
    }

    pub fn is_mixed(&self) -> bool {
        matches!(self, Type::Integral(IntegralType::Mixed))
    }

    /// Mixed, possibly behind a reference. Such a type is replaced rather
    /// than merged when a better type shows up.
    pub fn is_replaceable(&self) -> bool {
        match self {
            Type::Reference(inner) => inner.is_mixed(),
            other => other.is_mixed(),
        }
    }

    pub fn unwrap_reference(&self) -> &Type {
        match self {
            Type::Reference(inner) => inner,
            other => other,
        }
    }

    /// The class a value of this type is an instance of, if unambiguous.
    pub fn structure(&self) -> Option<&StructureType> {
        match self.unwrap_reference() {
            Type::Structure(s) => Some(s),
            _ => None,
        }
    }

    /// Element type when this is an array with a tracked element.
    pub fn element_type(&self) -> Option<&Type> {
        match self.unwrap_reference() {
            Type::Array(Some(element)) => Some(element),
            _ => None,
        }
    }

    /// Combine two types: equal types collapse, mixed is replaced, anything
    /// else becomes a union without duplicates.
    pub fn merge(self, other: Type) -> Type {
        if self == other {
            return self;
        }
        if self.is_replaceable() {
            return other;
        }
        if other.is_replaceable() {
            return self;
        }

        let mut members = Vec::new();
        for ty in [self, other] {
            match ty {
                Type::Union(inner) => {
                    for member in inner {
                        if !members.contains(&member) {
                            members.push(member);
                        }
                    }
                }
                single => {
                    if !members.contains(&single) {
                        members.push(single);
                    }
                }
            }
        }
        if members.len() == 1 {
            members.pop().unwrap_or(Type::MIXED)
        } else {
            Type::Union(members)
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Integral(integral) => f.write_str(integral.name()),
            Type::Function(_) => f.write_str("function"),
            Type::Structure(s) => write!(f, "{}", s.name),
            Type::Array(None) => f.write_str("array"),
            Type::Array(Some(element)) => write!(f, "{element}[]"),
            Type::Union(members) => {
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str("|")?;
                    }
                    write!(f, "{member}")?;
                }
                Ok(())
            }
            Type::Reference(inner) => write!(f, "&{inner}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_equal_is_identity() {
        assert_eq!(Type::INT.merge(Type::INT), Type::INT);
    }

    #[test]
    fn test_merge_replaces_mixed() {
        assert_eq!(Type::MIXED.merge(Type::STRING), Type::STRING);
        assert_eq!(
            Type::Reference(Box::new(Type::MIXED)).merge(Type::INT),
            Type::INT
        );
    }

    #[test]
    fn test_merge_builds_flat_union() {
        let union = Type::INT.merge(Type::STRING).merge(Type::INT).merge(Type::BOOL);
        assert_eq!(union, Type::Union(vec![Type::INT, Type::STRING, Type::BOOL]));
        assert_eq!(union.to_string(), "int|string|bool");
    }

    #[test]
    fn test_display_array() {
        assert_eq!(Type::array_of(Some(Type::INT)).to_string(), "int[]");
        assert_eq!(Type::array_of(None).to_string(), "array");
    }
}
