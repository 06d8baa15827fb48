//! Typed syntax tree consumed by the semantic builders.
//!
//! The tree is immutable once parsed. Nodes that can introduce a declaration
//! or a scope carry a [`NodeId`]; ids are handed out sequentially by the
//! parser and act as stable arena indices for hand-off between passes.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use smol_str::SmolStr;

use crate::base::{Interner, LineIndex, Name, TextRange};

/// Stable index of a declaration-bearing node within one tree.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// A parsed file together with the interner its identifiers point into.
#[derive(Debug)]
pub struct SyntaxTree {
    pub file: SourceFile,
    interner: Interner,
    node_count: u32,
    line_index: LineIndex,
}

impl SyntaxTree {
    pub fn new(file: SourceFile, interner: Interner, node_count: u32, line_index: LineIndex) -> Self {
        Self {
            file,
            interner,
            node_count,
            line_index,
        }
    }

    /// Empty tree, as produced for an empty document.
    pub fn empty() -> Self {
        Self::new(
            SourceFile {
                statements: Vec::new(),
                range: TextRange::default(),
            },
            Interner::new(),
            0,
            LineIndex::default(),
        )
    }

    pub fn text(&self, name: Name) -> SmolStr {
        self.interner.text(name)
    }

    pub fn ident(&self, ident: &Ident) -> SmolStr {
        self.interner.text(ident.name)
    }

    /// Segments of a name path, as written.
    pub fn path_segments(&self, path: &NamePath) -> Vec<SmolStr> {
        path.segments.iter().map(|s| self.ident(s)).collect()
    }

    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    pub fn line_index(&self) -> &LineIndex {
        &self.line_index
    }
}

#[derive(Clone, Debug)]
pub struct Ident {
    pub name: Name,
    pub range: TextRange,
}

/// `Foo`, `A\B\Foo` or `\A\Foo`.
#[derive(Clone, Debug)]
pub struct NamePath {
    pub segments: Vec<Ident>,
    pub fully_qualified: bool,
    pub range: TextRange,
}

impl NamePath {
    pub fn last(&self) -> Option<&Ident> {
        self.segments.last()
    }
}

/// A `$variable` occurrence; `name` excludes the sigil.
#[derive(Clone, Debug)]
pub struct Var {
    pub name: Ident,
    pub range: TextRange,
}

#[derive(Debug)]
pub struct SourceFile {
    pub statements: Vec<Stmt>,
    pub range: TextRange,
}

#[derive(Debug)]
pub enum Stmt {
    Namespace(NamespaceDecl),
    Use(UseStmt),
    Class(ClassDecl),
    Function(FunctionDecl),
    Const(ConstStmt),
    Expr(ExprStmt),
    Return(ReturnStmt),
    Global(GlobalStmt),
    StaticVar(StaticVarStmt),
    Echo(EchoStmt),
    If(IfStmt),
    While(WhileStmt),
    Foreach(ForeachStmt),
    Try(TryStmt),
    Block(Block),
}

impl Stmt {
    pub fn range(&self) -> TextRange {
        match self {
            Stmt::Namespace(s) => s.range,
            Stmt::Use(s) => s.range,
            Stmt::Class(s) => s.range,
            Stmt::Function(s) => s.range,
            Stmt::Const(s) => s.range,
            Stmt::Expr(s) => s.range,
            Stmt::Return(s) => s.range,
            Stmt::Global(s) => s.range,
            Stmt::StaticVar(s) => s.range,
            Stmt::Echo(s) => s.range,
            Stmt::If(s) => s.range,
            Stmt::While(s) => s.range,
            Stmt::Foreach(s) => s.range,
            Stmt::Try(s) => s.range,
            Stmt::Block(s) => s.range,
        }
    }

    /// Doc comment attached to the statement, if the statement kind keeps one.
    pub fn doc(&self) -> Option<&Arc<str>> {
        match self {
            Stmt::Class(s) => s.doc.as_ref(),
            Stmt::Function(s) => s.doc.as_ref(),
            Stmt::Const(s) => s.doc.as_ref(),
            Stmt::Expr(s) => s.doc.as_ref(),
            _ => None,
        }
    }
}

/// `namespace A\B;` (no body) or `namespace A\B { ... }`.
#[derive(Debug)]
pub struct NamespaceDecl {
    pub id: NodeId,
    pub name: Option<NamePath>,
    pub body: Option<Vec<Stmt>>,
    pub range: TextRange,
}

#[derive(Debug)]
pub struct UseStmt {
    pub items: Vec<UseItem>,
    pub range: TextRange,
}

#[derive(Debug)]
pub struct UseItem {
    pub id: NodeId,
    pub path: NamePath,
    pub alias: Option<Ident>,
    pub range: TextRange,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ClassKind {
    Class,
    Interface,
    Trait,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum ClassModifierKind {
    #[default]
    None,
    Abstract,
    Final,
}

#[derive(Debug)]
pub struct ClassDecl {
    pub id: NodeId,
    pub kind: ClassKind,
    pub modifier: ClassModifierKind,
    pub name: Ident,
    /// Base class for classes, parent interfaces for interfaces.
    pub extends: Vec<NamePath>,
    pub implements: Vec<NamePath>,
    pub members: Vec<ClassMember>,
    pub doc: Option<Arc<str>>,
    pub range: TextRange,
}

bitflags! {
    /// Member modifiers as written.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u8 {
        const PUBLIC = 1 << 0;
        const PROTECTED = 1 << 1;
        const PRIVATE = 1 << 2;
        const STATIC = 1 << 3;
        const ABSTRACT = 1 << 4;
        const FINAL = 1 << 5;
    }
}

#[derive(Debug)]
pub enum ClassMember {
    Method(MethodDecl),
    Property(PropertyDecl),
    Const(ConstStmt),
    TraitUse(TraitUse),
}

#[derive(Debug)]
pub struct MethodDecl {
    pub id: NodeId,
    pub modifiers: Modifiers,
    pub name: Ident,
    pub params: Vec<Param>,
    pub return_hint: Option<TypeHint>,
    pub body: Option<Block>,
    pub doc: Option<Arc<str>>,
    pub range: TextRange,
}

#[derive(Debug)]
pub struct PropertyDecl {
    pub modifiers: Modifiers,
    pub vars: Vec<PropertyVar>,
    pub doc: Option<Arc<str>>,
    pub range: TextRange,
}

#[derive(Debug)]
pub struct PropertyVar {
    pub id: NodeId,
    pub var: Var,
    pub default: Option<Expr>,
    pub range: TextRange,
}

#[derive(Debug)]
pub struct ConstStmt {
    pub items: Vec<ConstItem>,
    pub doc: Option<Arc<str>>,
    pub range: TextRange,
}

#[derive(Debug)]
pub struct ConstItem {
    pub id: NodeId,
    pub name: Ident,
    pub value: Expr,
    pub range: TextRange,
}

/// `use T1, T2 { ... }` inside a class body.
#[derive(Debug)]
pub struct TraitUse {
    pub traits: Vec<NamePath>,
    pub adaptations: Vec<TraitAdaptation>,
    pub range: TextRange,
}

#[derive(Debug)]
pub struct TraitAdaptation {
    pub id: NodeId,
    pub trait_name: Option<NamePath>,
    pub method: Ident,
    pub kind: AdaptationKind,
    pub range: TextRange,
}

#[derive(Debug)]
pub enum AdaptationKind {
    /// `m as [modifiers] [alias]`
    Alias {
        modifiers: Modifiers,
        alias: Option<Ident>,
    },
    /// `T::m insteadof U, V`
    InsteadOf(Vec<NamePath>),
}

#[derive(Debug)]
pub struct FunctionDecl {
    pub id: NodeId,
    pub name: Ident,
    pub params: Vec<Param>,
    pub return_hint: Option<TypeHint>,
    pub body: Block,
    pub doc: Option<Arc<str>>,
    pub range: TextRange,
}

#[derive(Debug)]
pub struct Param {
    pub id: NodeId,
    pub hint: Option<TypeHint>,
    pub by_ref: bool,
    pub variadic: bool,
    pub var: Var,
    pub default: Option<Expr>,
    pub range: TextRange,
}

#[derive(Debug)]
pub enum TypeHint {
    Array(TextRange),
    Callable(TextRange),
    Named(NamePath),
}

#[derive(Debug)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub range: TextRange,
}

#[derive(Debug)]
pub struct ExprStmt {
    pub expr: Expr,
    pub doc: Option<Arc<str>>,
    pub range: TextRange,
}

#[derive(Debug)]
pub struct ReturnStmt {
    pub value: Option<Expr>,
    pub range: TextRange,
}

#[derive(Debug)]
pub struct GlobalStmt {
    pub vars: Vec<Var>,
    pub range: TextRange,
}

#[derive(Debug)]
pub struct StaticVarStmt {
    pub vars: Vec<StaticVar>,
    pub range: TextRange,
}

#[derive(Debug)]
pub struct StaticVar {
    pub var: Var,
    pub value: Option<Expr>,
}

#[derive(Debug)]
pub struct EchoStmt {
    pub values: Vec<Expr>,
    pub range: TextRange,
}

#[derive(Debug)]
pub struct IfStmt {
    pub condition: Expr,
    pub then_branch: Box<Stmt>,
    pub else_branch: Option<Box<Stmt>>,
    pub range: TextRange,
}

#[derive(Debug)]
pub struct WhileStmt {
    pub condition: Expr,
    pub body: Box<Stmt>,
    pub range: TextRange,
}

#[derive(Debug)]
pub struct ForeachStmt {
    pub subject: Expr,
    pub key: Option<Expr>,
    pub value: Expr,
    pub by_ref: bool,
    pub body: Box<Stmt>,
    pub range: TextRange,
}

#[derive(Debug)]
pub struct TryStmt {
    pub body: Block,
    pub catches: Vec<CatchClause>,
    pub finally: Option<Block>,
    pub range: TextRange,
}

#[derive(Debug)]
pub struct CatchClause {
    pub classes: Vec<NamePath>,
    pub var: Var,
    pub body: Block,
    pub range: TextRange,
}

#[derive(Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub range: TextRange,
}

#[derive(Debug)]
pub enum ExprKind {
    Variable(Var),
    Literal(Literal),
    Array(Vec<ArrayItem>),
    /// Bare name: constant fetch.
    Name(NamePath),
    ClassConst {
        class: NamePath,
        name: Ident,
    },
    StaticProperty {
        class: NamePath,
        var: Var,
    },
    Property {
        object: Box<Expr>,
        name: Ident,
    },
    Index {
        base: Box<Expr>,
        index: Option<Box<Expr>>,
    },
    Call {
        callee: NamePath,
        args: Vec<Expr>,
    },
    MethodCall {
        object: Box<Expr>,
        name: Ident,
        args: Vec<Expr>,
    },
    StaticCall {
        class: NamePath,
        name: Ident,
        args: Vec<Expr>,
    },
    New {
        class: NamePath,
        args: Vec<Expr>,
    },
    Closure(Box<Closure>),
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
        by_ref: bool,
    },
    CompoundAssign {
        target: Box<Expr>,
        op: BinaryOp,
        value: Box<Expr>,
    },
    Binary {
        lhs: Box<Expr>,
        op: BinaryOp,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Ternary {
        condition: Box<Expr>,
        then_value: Option<Box<Expr>>,
        else_value: Box<Expr>,
    },
    Instanceof {
        value: Box<Expr>,
        class: NamePath,
    },
    Include {
        kind: IncludeKind,
        path: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    String(SmolStr),
    Bool(bool),
    Null,
}

#[derive(Debug)]
pub struct ArrayItem {
    pub key: Option<Expr>,
    pub value: Expr,
}

#[derive(Debug)]
pub struct Closure {
    pub id: NodeId,
    pub is_static: bool,
    pub params: Vec<Param>,
    /// `None` when there is no `use (...)` clause.
    pub uses: Option<Vec<LexicalVar>>,
    pub return_hint: Option<TypeHint>,
    pub body: Block,
    pub doc: Option<Arc<str>>,
    pub range: TextRange,
}

#[derive(Debug)]
pub struct LexicalVar {
    pub var: Var,
    pub by_ref: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Eq,
    NotEq,
    Identical,
    NotIdentical,
    Lt,
    Gt,
    LtEq,
    GtEq,
    And,
    Or,
    Coalesce,
    BitOr,
    BitAnd,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Identical
                | BinaryOp::NotIdentical
                | BinaryOp::Lt
                | BinaryOp::Gt
                | BinaryOp::LtEq
                | BinaryOp::GtEq
                | BinaryOp::And
                | BinaryOp::Or
        )
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IncludeKind {
    Include,
    IncludeOnce,
    Require,
    RequireOnce,
}
