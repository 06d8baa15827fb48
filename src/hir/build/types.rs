//! Types of functions, parameters, properties and expressions.
//!
//! Annotation types (`@param`, `@return`, `@var`) win over structural ones.
//! An annotation that does not name a known type is ignored.

use smol_str::SmolStr;

use crate::syntax::SyntaxTree;
use crate::syntax::ast::{
    BinaryOp, ClassDecl, ConstItem, ConstStmt, Expr, ExprKind, Literal, NamePath, Param,
    PropertyDecl, PropertyVar, Stmt, TypeHint, UnaryOp,
};

use super::{BuildStage, BuildState, FunctionLike, path_identifier};
use crate::hir::decl::{DeclData, DeclKind, Declaration};
use crate::hir::doc_comment::find_in_doc_comment;
use crate::hir::ids::{DeclRef, ScopeId};
use crate::hir::name::{QualifiedIdentifier, fold};
use crate::hir::resolve::DeclarationType;
use crate::hir::types::{FunctionType, IntegralType, StructureType, Type};

/// Hints that name a scalar type rather than a class.
pub(crate) fn scalar_type(name: &str) -> Option<Type> {
    let ty = match name.to_ascii_lowercase().as_str() {
        "int" | "integer" => Type::INT,
        "float" | "double" => Type::FLOAT,
        "bool" | "boolean" | "true" | "false" => Type::BOOL,
        "string" => Type::STRING,
        "mixed" => Type::MIXED,
        "resource" => Type::Integral(IntegralType::Resource),
        "null" => Type::NULL,
        "void" => Type::VOID,
        "array" => Type::array_of(None),
        "callable" => Type::Function(FunctionType::default()),
        _ => return None,
    };
    Some(ty)
}

/// The structure type of a class declaration.
pub(crate) fn structure_of(state: &BuildState<'_>, class: DeclRef) -> Option<Type> {
    state
        .lookup()
        .with_decl(class, |d| match (&d.ty, &d.data) {
            (Some(ty @ Type::Structure(_)), _) => Some(ty.clone()),
            (_, DeclData::Class(_)) => Some(Type::Structure(StructureType {
                decl: class,
                name: d.id.clone(),
            })),
            _ => None,
        })
        .flatten()
}

fn class_type(state: &mut BuildState<'_>, scope: ScopeId, id: &QualifiedIdentifier) -> Option<Type> {
    let class = state.resolve(scope, id, DeclarationType::Class)?;
    structure_of(state, class)
}

/// Parse an annotation type such as `int`, `Foo[]` or `string|null`.
pub(crate) fn parse_type(state: &mut BuildState<'_>, scope: ScopeId, text: &str) -> Option<Type> {
    if text.contains('|') {
        return text
            .split('|')
            .filter_map(|part| parse_type(state, scope, part))
            .filter(|ty| !ty.is_mixed())
            .reduce(Type::merge);
    }
    if let Some(element) = text.strip_suffix("[]") {
        return Some(Type::array_of(parse_type(state, scope, element)));
    }
    if text.is_empty() {
        return None;
    }
    if let Some(ty) = scalar_type(text) {
        return Some(ty);
    }
    match text.to_ascii_lowercase().as_str() {
        "self" | "this" | "$this" | "static" => {
            let class = state.lookup().enclosing_class(scope)?;
            structure_of(state, class)
        }
        "object" => class_type(state, ScopeId::ROOT, &QualifiedIdentifier::parse("stdClass")),
        _ => class_type(state, scope, &QualifiedIdentifier::parse(text)),
    }
}

/// Type of a parameter or return hint.
pub(crate) fn hint_type(state: &mut BuildState<'_>, tree: &SyntaxTree, scope: ScopeId, hint: &TypeHint) -> Type {
    match hint {
        TypeHint::Array(_) => Type::array_of(None),
        TypeHint::Callable(_) => Type::Function(FunctionType::default()),
        TypeHint::Named(path) => {
            let id = path_identifier(tree, path);
            if id.len() == 1 {
                if let Some(ty) = id.last().and_then(|last| scalar_type(last)) {
                    return ty;
                }
            }
            parse_class_path(state, tree, scope, path).unwrap_or(Type::MIXED)
        }
    }
}

fn parse_class_path(state: &mut BuildState<'_>, tree: &SyntaxTree, scope: ScopeId, path: &NamePath) -> Option<Type> {
    class_type(state, scope, &path_identifier(tree, path))
}

fn declared_type(state: &BuildState<'_>, decl: DeclRef) -> Option<Type> {
    let lookup = state.lookup();
    let mut current = decl;
    for _ in 0..8 {
        let (ty, next) = lookup.with_decl(current, |d| match &d.data {
            DeclData::Alias { target, .. } => (d.ty.clone(), *target),
            _ => (d.ty.clone(), None),
        })?;
        match next {
            Some(next) if ty.is_none() => current = next,
            _ => return ty,
        }
    }
    None
}

fn return_type(ty: Option<Type>) -> Type {
    match ty {
        Some(Type::Function(function)) => function.return_type().cloned().unwrap_or(Type::MIXED),
        _ => Type::MIXED,
    }
}

fn member_type(
    state: &BuildState<'_>,
    class: Option<DeclRef>,
    name: &SmolStr,
    accept: impl Fn(&Declaration) -> bool + Copy,
) -> Option<Type> {
    let lookup = state.lookup();
    let member = lookup.find_member(class?, name, accept)?;
    declared_type(state, member)
}

fn is_property(decl: &Declaration) -> bool {
    decl.kind() == DeclKind::ClassMember
}

fn is_class_constant(decl: &Declaration) -> bool {
    decl.kind() == DeclKind::ClassConstant
}

/// Structural type of `expr`, evaluated in the current scope.
pub(crate) fn expr_type(state: &mut BuildState<'_>, tree: &SyntaxTree, expr: &Expr) -> Type {
    let scope = state.current_scope();
    match &expr.kind {
        ExprKind::Literal(literal) => match literal {
            Literal::Int(_) => Type::INT,
            Literal::Float(_) => Type::FLOAT,
            Literal::String(_) => Type::STRING,
            Literal::Bool(_) => Type::BOOL,
            Literal::Null => Type::NULL,
        },
        ExprKind::Array(items) => {
            let element = items
                .iter()
                .map(|item| expr_type(state, tree, &item.value))
                .reduce(Type::merge);
            Type::array_of(element)
        }
        ExprKind::Variable(var) => {
            let name = tree.ident(&var.name);
            if name == "this" {
                let class = state.lookup().enclosing_class(scope);
                return class.and_then(|c| structure_of(state, c)).unwrap_or(Type::MIXED);
            }
            let decl = state.lookup().find_variable(scope, &name);
            decl.and_then(|d| declared_type(state, d)).unwrap_or(Type::MIXED)
        }
        ExprKind::New { class, .. } => parse_class_path(state, tree, scope, class).unwrap_or(Type::MIXED),
        ExprKind::Call { callee, .. } => {
            let id = path_identifier(tree, callee);
            let function = state.resolve(scope, &id, DeclarationType::Function);
            return_type(function.and_then(|f| declared_type(state, f)))
        }
        ExprKind::MethodCall { object, name, .. } => {
            let class = expr_type(state, tree, object).structure().map(|s| s.decl);
            let name = fold(&tree.ident(name));
            return_type(member_type(state, class, &name, Declaration::is_function_like))
        }
        ExprKind::StaticCall { class, name, .. } => {
            let class = state.resolve(scope, &path_identifier(tree, class), DeclarationType::Class);
            let name = fold(&tree.ident(name));
            return_type(member_type(state, class, &name, Declaration::is_function_like))
        }
        ExprKind::Property { object, name } => {
            let class = expr_type(state, tree, object).structure().map(|s| s.decl);
            member_type(state, class, &tree.ident(name), is_property).unwrap_or(Type::MIXED)
        }
        ExprKind::StaticProperty { class, var } => {
            let class = state.resolve(scope, &path_identifier(tree, class), DeclarationType::Class);
            member_type(state, class, &tree.ident(&var.name), is_property).unwrap_or(Type::MIXED)
        }
        ExprKind::ClassConst { class, name } => {
            let name = tree.ident(name);
            if name.eq_ignore_ascii_case("class") {
                return Type::STRING;
            }
            let class = state.resolve(scope, &path_identifier(tree, class), DeclarationType::Class);
            member_type(state, class, &name, is_class_constant).unwrap_or(Type::MIXED)
        }
        ExprKind::Name(path) => {
            let constant = state.resolve(scope, &path_identifier(tree, path), DeclarationType::Constant);
            constant.and_then(|c| declared_type(state, c)).unwrap_or(Type::MIXED)
        }
        ExprKind::Closure(closure) => Type::Function(FunctionType {
            params: vec![Type::MIXED; closure.params.len()],
            return_type: None,
            anonymous: true,
        }),
        ExprKind::Assign { value, .. } => expr_type(state, tree, value),
        ExprKind::CompoundAssign { op, value, .. } => binary_type(state, tree, *op, None, value),
        ExprKind::Binary { lhs, op, rhs } => binary_type(state, tree, *op, Some(lhs), rhs),
        ExprKind::Unary { op, operand } => match op {
            UnaryOp::Not => Type::BOOL,
            UnaryOp::Neg | UnaryOp::Plus => match expr_type(state, tree, operand) {
                Type::Integral(IntegralType::Float) => Type::FLOAT,
                _ => Type::INT,
            },
        },
        ExprKind::Ternary {
            condition,
            then_value,
            else_value,
        } => {
            let then_type = expr_type(state, tree, then_value.as_deref().unwrap_or(condition));
            then_type.merge(expr_type(state, tree, else_value))
        }
        ExprKind::Instanceof { .. } => Type::BOOL,
        ExprKind::Index { base, .. } => expr_type(state, tree, base)
            .element_type()
            .cloned()
            .unwrap_or(Type::MIXED),
        ExprKind::Include { .. } => Type::MIXED,
    }
}

fn binary_type(state: &mut BuildState<'_>, tree: &SyntaxTree, op: BinaryOp, lhs: Option<&Expr>, rhs: &Expr) -> Type {
    if op.is_comparison() {
        return Type::BOOL;
    }
    match op {
        BinaryOp::Concat => Type::STRING,
        BinaryOp::Mod | BinaryOp::BitOr | BinaryOp::BitAnd => Type::INT,
        BinaryOp::Coalesce => {
            let rhs = expr_type(state, tree, rhs);
            match lhs {
                Some(lhs) => expr_type(state, tree, lhs).merge(rhs),
                None => rhs,
            }
        }
        _ => {
            let rhs = expr_type(state, tree, rhs);
            let lhs = lhs.map(|lhs| expr_type(state, tree, lhs)).unwrap_or(Type::INT);
            if lhs == Type::FLOAT || rhs == Type::FLOAT || op == BinaryOp::Div {
                Type::FLOAT
            } else {
                Type::INT
            }
        }
    }
}

// ============================================================================
// STAGE
// ============================================================================

#[derive(Debug)]
struct FunctionFrame {
    params: Vec<Type>,
    /// `@param` annotation types, in order.
    param_docs: Vec<SmolStr>,
    doc_return: Option<Type>,
    hint_return: Option<Type>,
    returns: Option<Type>,
    has_body: bool,
    anonymous: bool,
}

/// Computes types and publishes them through [`BuildState::update_type`].
#[derive(Debug, Default)]
pub(crate) struct TypeStage {
    frames: Vec<FunctionFrame>,
}

impl BuildStage for TypeStage {
    fn class_scope_opened(&mut self, state: &mut BuildState<'_>, _tree: &SyntaxTree, class: &ClassDecl) {
        let ty = state
            .predeclared
            .types
            .get(&class.id)
            .and_then(|&id| state.declaration(id))
            .and_then(|d| d.ty.clone());
        if let Some(ty) = ty {
            state.update_type(ty);
        }
    }

    fn enter_function(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, function: FunctionLike<'_>) {
        let scope = state.current_scope();
        let doc = function.doc();
        let doc_return = doc
            .and_then(|doc| find_in_doc_comment(doc, "return", true).into_iter().next())
            .and_then(|text| parse_type(state, scope, &text));
        let hint_return = function.return_hint().map(|hint| hint_type(state, tree, scope, hint));
        let param_docs = doc
            .map(|doc| find_in_doc_comment(doc, "param", false))
            .unwrap_or_default();
        self.frames.push(FunctionFrame {
            params: Vec::new(),
            param_docs,
            doc_return,
            hint_return,
            returns: None,
            has_body: function.body().is_some(),
            anonymous: function.is_closure(),
        });
    }

    fn enter_parameter(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, param: &Param, index: usize) {
        // hints resolve where the function is written, not in its parameter scope
        let scope = state
            .unit
            .scope(state.current_scope())
            .and_then(|s| s.parent)
            .unwrap_or(ScopeId::ROOT);
        let doc = self
            .frames
            .last()
            .and_then(|frame| frame.param_docs.get(index).cloned());

        let mut ty = match &param.hint {
            Some(hint) => hint_type(state, tree, scope, hint),
            None => Type::MIXED,
        };
        if ty.is_mixed() {
            if let Some(annotated) = doc.and_then(|text| parse_type(state, scope, &text)) {
                ty = annotated;
            } else if let Some(default) = &param.default {
                ty = expr_type(state, tree, default);
            }
        }
        if param.by_ref {
            ty = Type::Reference(Box::new(ty));
        }
        if let Some(frame) = self.frames.last_mut() {
            frame.params.push(ty.clone());
        }
        state.update_type(ty);
    }

    fn leave_function(&mut self, state: &mut BuildState<'_>, _tree: &SyntaxTree, _function: FunctionLike<'_>) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        if frame.anonymous {
            return;
        }
        let return_type = frame
            .doc_return
            .or(frame.hint_return)
            .or(frame.returns)
            .unwrap_or(if frame.has_body { Type::VOID } else { Type::MIXED });
        state.update_type(Type::Function(FunctionType {
            params: frame.params,
            return_type: Some(Box::new(return_type)),
            anonymous: false,
        }));
    }

    fn enter_property(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, decl: &PropertyDecl, var: &PropertyVar) {
        let scope = state.current_scope();
        let annotated = decl
            .doc
            .as_ref()
            .and_then(|doc| find_in_doc_comment(doc, "var", true).into_iter().next())
            .and_then(|text| parse_type(state, scope, &text));
        let ty = match (annotated, &var.default) {
            (Some(ty), _) => ty,
            (None, Some(default)) => expr_type(state, tree, default),
            (None, None) => Type::MIXED,
        };
        state.update_type(ty);
    }

    fn enter_class_const(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, _stmt: &ConstStmt, item: &ConstItem) {
        let ty = expr_type(state, tree, &item.value);
        state.update_type(ty);
    }

    fn enter_statement(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, stmt: &Stmt) {
        match stmt {
            Stmt::Return(ret) => {
                let Some(frame) = self.frames.last() else {
                    return;
                };
                if frame.doc_return.is_some() {
                    return;
                }
                let ty = match &ret.value {
                    Some(value) => expr_type(state, tree, value),
                    None => Type::VOID,
                };
                if let Some(frame) = self.frames.last_mut() {
                    frame.returns = Some(match frame.returns.take() {
                        Some(previous) => previous.merge(ty),
                        None => ty,
                    });
                }
            }
            Stmt::Expr(e) => {
                let scope = state.current_scope();
                state.annotated_type = e
                    .doc
                    .as_ref()
                    .and_then(|doc| find_in_doc_comment(doc, "var", true).into_iter().next())
                    .and_then(|text| parse_type(state, scope, &text));
            }
            _ => {}
        }
    }

    fn leave_statement(&mut self, state: &mut BuildState<'_>, _tree: &SyntaxTree, stmt: &Stmt) {
        if matches!(stmt, Stmt::Expr(_)) {
            state.annotated_type = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::base::FileSet;
    use crate::hir::env::{AnalysisEnvironment, BuildConfig};
    use crate::hir::include::NoProjects;
    use crate::hir::name::QualifiedIdentifier;
    use crate::hir::types::Type;
    use crate::hir::{SemanticBuilder, SemanticUnit};

    fn build(text: &str) -> SemanticUnit {
        let files = Arc::new(FileSet::new());
        let env = AnalysisEnvironment::new(BuildConfig::default(), files.clone(), Arc::new(NoProjects));
        env.ensure_builtins();
        let file = files.file_id(std::path::Path::new("/src/types.php"));
        let tree = env.parser().parse(text).tree.expect("parses");
        let mut builder = SemanticBuilder::new(&env, file);
        builder.build(&tree, None);
        builder.finish().expect("built").1
    }

    fn type_of(unit: &SemanticUnit, id: &str) -> Option<Type> {
        let ids = unit.find_declarations(&QualifiedIdentifier::parse(id));
        unit.declaration(*ids.first()?)?.ty.clone()
    }

    fn function_return(unit: &SemanticUnit, id: &str) -> String {
        match type_of(unit, id) {
            Some(Type::Function(f)) => f.return_type().map(|t| t.to_string()).unwrap_or_default(),
            other => panic!("not a function: {other:?}"),
        }
    }

    #[test]
    fn test_return_annotation_wins_over_structure() {
        let unit = build("<?php /** @return string */ function f() { return 1; }");
        assert_eq!(function_return(&unit, "f"), "string");
    }

    #[test]
    fn test_structural_returns_merge() {
        let unit = build("<?php function f($a) { if ($a) { return 1; } return 'x'; }");
        assert_eq!(function_return(&unit, "f"), "int|string");
    }

    #[test]
    fn test_unparsable_annotation_falls_back() {
        let unit = build("<?php /** @return NoSuchClass */ function f() { return 1.5; }");
        assert_eq!(function_return(&unit, "f"), "float");
    }

    #[test]
    fn test_function_without_return_is_void() {
        let unit = build("<?php function f() { echo 1; }");
        assert_eq!(function_return(&unit, "f"), "void");
    }

    #[test]
    fn test_parameter_types() {
        let unit = build(
            "<?php class A {}\n/**\n * @param A $a\n * @param int $b\n */\nfunction f(A $a, $b, array $c, &$d = 'x') {}",
        );
        let Some(Type::Function(f)) = type_of(&unit, "f") else {
            panic!("not a function");
        };
        let params: Vec<String> = f.params.iter().map(ToString::to_string).collect();
        assert_eq!(params, vec!["A", "int", "array", "&string"]);
    }

    #[test]
    fn test_array_element_tracking() {
        let unit = build("<?php $list = array(1, 2, 3); $first = $list[0];");
        assert_eq!(type_of(&unit, "list"), Some(Type::array_of(Some(Type::INT))));
        assert_eq!(type_of(&unit, "first"), Some(Type::INT));
    }

    #[test]
    fn test_var_annotation_on_statement() {
        let unit = build("<?php class A {}\n/** @var A */\n$a = make();");
        assert_eq!(type_of(&unit, "a").map(|t| t.to_string()), Some("A".to_string()));
    }

    #[test]
    fn test_method_call_uses_return_type() {
        let unit = build(
            "<?php class A { /** @return int */ function n() {} }\n$a = new A();\n$n = $a->n();",
        );
        assert_eq!(type_of(&unit, "n"), Some(Type::INT));
    }

    #[test]
    fn test_builtin_return_types() {
        let unit = build("<?php $len = strlen('abc');");
        assert_eq!(type_of(&unit, "len"), Some(Type::INT));
    }
}
