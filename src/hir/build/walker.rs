//! The tree walk shared by every build configuration.

use std::sync::Arc;

use crate::base::TextRange;
use crate::syntax::ast::{
    Block, ClassDecl, ClassMember, Closure, Expr, ExprKind, FunctionDecl, Ident, MethodDecl,
    NamespaceDecl, Param, Stmt, TypeHint,
};
use crate::syntax::{NodeId, SyntaxTree};

use super::{BuildStage, BuildState, ScopeKey, ScopeRole};
use crate::hir::name::{QualifiedIdentifier, fold};
use crate::hir::scope::{ImportTarget, ScopeKind};

/// Which parts of the tree a walk visits.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum WalkMode {
    /// Namespaces, classes and free functions; no members, no bodies.
    PreDeclaration,
    Declarations,
    Uses,
}

/// A function, method or closure.
#[derive(Copy, Clone, Debug)]
pub(crate) enum FunctionLike<'t> {
    Function(&'t FunctionDecl),
    Method(&'t ClassDecl, &'t MethodDecl),
    Closure(&'t Closure),
}

impl<'t> FunctionLike<'t> {
    pub fn node(&self) -> NodeId {
        match self {
            FunctionLike::Function(f) => f.id,
            FunctionLike::Method(_, m) => m.id,
            FunctionLike::Closure(c) => c.id,
        }
    }

    pub fn name(&self) -> Option<&'t Ident> {
        match self {
            FunctionLike::Function(f) => Some(&f.name),
            FunctionLike::Method(_, m) => Some(&m.name),
            FunctionLike::Closure(_) => None,
        }
    }

    pub fn params(&self) -> &'t [Param] {
        match self {
            FunctionLike::Function(f) => &f.params,
            FunctionLike::Method(_, m) => &m.params,
            FunctionLike::Closure(c) => &c.params,
        }
    }

    pub fn return_hint(&self) -> Option<&'t TypeHint> {
        match self {
            FunctionLike::Function(f) => f.return_hint.as_ref(),
            FunctionLike::Method(_, m) => m.return_hint.as_ref(),
            FunctionLike::Closure(c) => c.return_hint.as_ref(),
        }
    }

    pub fn body(&self) -> Option<&'t Block> {
        match self {
            FunctionLike::Function(f) => Some(&f.body),
            FunctionLike::Method(_, m) => m.body.as_ref(),
            FunctionLike::Closure(c) => Some(&c.body),
        }
    }

    pub fn doc(&self) -> Option<&'t Arc<str>> {
        match self {
            FunctionLike::Function(f) => f.doc.as_ref(),
            FunctionLike::Method(_, m) => m.doc.as_ref(),
            FunctionLike::Closure(c) => c.doc.as_ref(),
        }
    }

    pub fn range(&self) -> TextRange {
        match self {
            FunctionLike::Function(f) => f.range,
            FunctionLike::Method(_, m) => m.range,
            FunctionLike::Closure(c) => c.range,
        }
    }

    pub fn is_closure(&self) -> bool {
        matches!(self, FunctionLike::Closure(_))
    }
}

/// Call `$call` on every stage in order, forwarding type updates after each.
macro_rules! forward {
    ($walker:expr, $state:expr, |$stage:ident| $call:expr) => {{
        for i in 0..$walker.stages.len() {
            let $stage = &mut $walker.stages[i];
            $call;
            $walker.flush_type($state);
        }
    }};
}

/// Same as `forward!`, last stage first.
macro_rules! backward {
    ($walker:expr, $state:expr, |$stage:ident| $call:expr) => {{
        for i in (0..$walker.stages.len()).rev() {
            let $stage = &mut $walker.stages[i];
            $call;
            $walker.flush_type($state);
        }
    }};
}

pub(crate) struct Walker {
    mode: WalkMode,
    stages: Vec<Box<dyn BuildStage>>,
}

impl Walker {
    pub fn new(mode: WalkMode, stages: Vec<Box<dyn BuildStage>>) -> Self {
        Self { mode, stages }
    }

    fn flush_type(&mut self, state: &mut BuildState<'_>) {
        if let Some(ty) = state.take_type_update() {
            for stage in &mut self.stages {
                stage.update_current_type(state, &ty);
            }
        }
    }

    pub fn walk(mut self, state: &mut BuildState<'_>, tree: &SyntaxTree) {
        forward!(self, state, |stage| stage.begin(state, tree));

        let statements = &tree.file.statements;
        let mut braceless: Option<&NamespaceDecl> = None;
        for (i, stmt) in statements.iter().enumerate() {
            if let Stmt::Namespace(ns) = stmt {
                if let Some(open) = braceless.take() {
                    self.close_namespace(state, tree, open);
                }
                if ns.body.is_none() {
                    let end = statements[i + 1..]
                        .iter()
                        .find(|s| matches!(s, Stmt::Namespace(_)))
                        .map_or(tree.file.range.end(), |s| s.range().start());
                    self.open_namespace(state, tree, ns, TextRange::new(ns.range.start(), end));
                    braceless = Some(ns);
                    continue;
                }
            }
            self.walk_stmt(state, tree, stmt);
        }
        if let Some(open) = braceless {
            self.close_namespace(state, tree, open);
        }

        backward!(self, state, |stage| stage.finish(state, tree));
    }

    // ========================================================================
    // NAMESPACES
    // ========================================================================

    fn open_namespace(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, ns: &NamespaceDecl, range: TextRange) {
        let Some(name) = &ns.name else {
            return;
        };
        let segments = tree.path_segments(name);
        let mut id = QualifiedIdentifier::new();
        for (index, segment) in segments.iter().enumerate() {
            id.push(fold(segment));
            forward!(self, state, |stage| stage.enter_namespace(state, tree, ns, index));
            state.open_scope(
                ScopeKey::new(ns.id, ScopeRole::NamespaceSegment(index)),
                ScopeKind::Namespace,
                range,
                id.clone(),
            );
        }
    }

    fn close_namespace(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, ns: &NamespaceDecl) {
        let Some(name) = &ns.name else {
            return;
        };
        for index in (0..name.segments.len()).rev() {
            state.close_scope();
            backward!(self, state, |stage| stage.leave_namespace(state, tree, ns, index));
        }
    }

    // ========================================================================
    // STATEMENTS
    // ========================================================================

    fn walk_stmt(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, stmt: &Stmt) {
        match stmt {
            Stmt::Namespace(ns) => {
                self.open_namespace(state, tree, ns, ns.range);
                for inner in ns.body.iter().flatten() {
                    self.walk_stmt(state, tree, inner);
                }
                self.close_namespace(state, tree, ns);
                return;
            }
            Stmt::Class(class) => {
                self.walk_class(state, tree, class);
                return;
            }
            Stmt::Function(function) => {
                self.walk_function(state, tree, FunctionLike::Function(function));
                return;
            }
            _ => {}
        }
        if self.mode == WalkMode::PreDeclaration {
            return;
        }

        forward!(self, state, |stage| stage.enter_statement(state, tree, stmt));
        match stmt {
            Stmt::Const(c) => {
                for item in &c.items {
                    self.walk_expr(state, tree, &item.value);
                }
            }
            Stmt::Expr(e) => self.walk_expr(state, tree, &e.expr),
            Stmt::Return(r) => {
                if let Some(value) = &r.value {
                    self.walk_expr(state, tree, value);
                }
            }
            Stmt::StaticVar(s) => {
                for var in &s.vars {
                    if let Some(value) = &var.value {
                        self.walk_expr(state, tree, value);
                    }
                }
            }
            Stmt::Echo(e) => {
                for value in &e.values {
                    self.walk_expr(state, tree, value);
                }
            }
            Stmt::If(s) => {
                self.walk_expr(state, tree, &s.condition);
                self.walk_stmt(state, tree, &s.then_branch);
                if let Some(else_branch) = &s.else_branch {
                    self.walk_stmt(state, tree, else_branch);
                }
            }
            Stmt::While(s) => {
                self.walk_expr(state, tree, &s.condition);
                self.walk_stmt(state, tree, &s.body);
            }
            Stmt::Foreach(s) => {
                self.walk_expr(state, tree, &s.subject);
                self.walk_stmt(state, tree, &s.body);
            }
            Stmt::Try(s) => {
                self.walk_block(state, tree, &s.body);
                for catch in &s.catches {
                    self.walk_block(state, tree, &catch.body);
                }
                if let Some(finally) = &s.finally {
                    self.walk_block(state, tree, finally);
                }
            }
            Stmt::Block(b) => self.walk_block(state, tree, b),
            Stmt::Use(_) | Stmt::Global(_) => {}
            Stmt::Namespace(_) | Stmt::Class(_) | Stmt::Function(_) => {}
        }
        backward!(self, state, |stage| stage.leave_statement(state, tree, stmt));
    }

    fn walk_block(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, block: &Block) {
        for stmt in &block.statements {
            self.walk_stmt(state, tree, stmt);
        }
    }

    // ========================================================================
    // CLASSES AND FUNCTIONS
    // ========================================================================

    fn walk_class(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, class: &ClassDecl) {
        forward!(self, state, |stage| stage.enter_class(state, tree, class));
        let (_, key) = state.qualify(&tree.ident(&class.name), false);
        state.open_scope(ScopeKey::new(class.id, ScopeRole::Own), ScopeKind::Class, class.range, key);
        forward!(self, state, |stage| stage.class_scope_opened(state, tree, class));

        if self.mode != WalkMode::PreDeclaration {
            for member in &class.members {
                match member {
                    ClassMember::Method(method) => {
                        self.walk_function(state, tree, FunctionLike::Method(class, method));
                    }
                    ClassMember::Property(property) => {
                        for var in &property.vars {
                            forward!(self, state, |stage| stage.enter_property(state, tree, property, var));
                            if let Some(default) = &var.default {
                                self.walk_expr(state, tree, default);
                            }
                            backward!(self, state, |stage| stage.leave_property(state, tree, property, var));
                        }
                    }
                    ClassMember::Const(constants) => {
                        for item in &constants.items {
                            forward!(self, state, |stage| stage.enter_class_const(state, tree, constants, item));
                            self.walk_expr(state, tree, &item.value);
                            backward!(self, state, |stage| stage.leave_class_const(state, tree, constants, item));
                        }
                    }
                    ClassMember::TraitUse(_) => {}
                }
            }
        }

        backward!(self, state, |stage| stage.leave_class(state, tree, class));
        state.close_scope();
    }

    fn walk_function(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, function: FunctionLike<'_>) {
        forward!(self, state, |stage| stage.enter_function(state, tree, function));
        if self.mode == WalkMode::PreDeclaration {
            backward!(self, state, |stage| stage.leave_function(state, tree, function));
            return;
        }

        let node = function.node();
        let scope_id = {
            let parent = state.current_scope();
            let base = state.unit.scope(parent).map(|s| s.id.clone()).unwrap_or_default();
            match function.name() {
                Some(name) => base.child(fold(&tree.ident(name))),
                None => base,
            }
        };

        let params = function.params();
        let params_range = match (params.first(), params.last()) {
            (Some(first), Some(last)) => TextRange::new(first.range.start(), last.range.end()),
            _ => TextRange::empty(function.range().start()),
        };
        let params_scope = state.open_scope(
            ScopeKey::new(node, ScopeRole::Parameters),
            ScopeKind::Parameters,
            params_range,
            scope_id.clone(),
        );
        for (index, param) in params.iter().enumerate() {
            forward!(self, state, |stage| stage.enter_parameter(state, tree, param, index));
            if let Some(default) = &param.default {
                self.walk_expr(state, tree, default);
            }
            backward!(self, state, |stage| stage.leave_parameter(state, tree, param, index));
        }
        state.close_scope();

        let mut captured_scope = None;
        if let FunctionLike::Closure(closure) = function {
            if let Some(vars) = &closure.uses {
                let range = match (vars.first(), vars.last()) {
                    (Some(first), Some(last)) => TextRange::new(first.var.range.start(), last.var.range.end()),
                    _ => TextRange::empty(params_range.end()),
                };
                let scope = state.open_scope(
                    ScopeKey::new(node, ScopeRole::Captured),
                    ScopeKind::Captured,
                    range,
                    scope_id.clone(),
                );
                for var in vars {
                    forward!(self, state, |stage| stage.lexical_var(state, tree, var));
                }
                state.close_scope();
                captured_scope = Some(scope);
            }
        }

        if let Some(body) = function.body() {
            let body_scope = state.open_scope(ScopeKey::new(node, ScopeRole::Body), ScopeKind::Body, body.range, scope_id);
            state.add_scope_import(body_scope, ImportTarget::Local(params_scope), false);
            if let Some(captured) = captured_scope {
                state.add_scope_import(body_scope, ImportTarget::Local(captured), true);
            }
            self.walk_block(state, tree, body);
            state.close_scope();
        }

        backward!(self, state, |stage| stage.leave_function(state, tree, function));
    }

    // ========================================================================
    // EXPRESSIONS
    // ========================================================================

    fn walk_expr(&mut self, state: &mut BuildState<'_>, tree: &SyntaxTree, expr: &Expr) {
        forward!(self, state, |stage| stage.enter_expression(state, tree, expr));
        match &expr.kind {
            ExprKind::Variable(_)
            | ExprKind::Literal(_)
            | ExprKind::Name(_)
            | ExprKind::ClassConst { .. }
            | ExprKind::StaticProperty { .. } => {}
            ExprKind::Array(items) => {
                for item in items {
                    if let Some(key) = &item.key {
                        self.walk_expr(state, tree, key);
                    }
                    self.walk_expr(state, tree, &item.value);
                }
            }
            ExprKind::Property { object, .. } => self.walk_expr(state, tree, object),
            ExprKind::Index { base, index } => {
                self.walk_expr(state, tree, base);
                if let Some(index) = index {
                    self.walk_expr(state, tree, index);
                }
            }
            ExprKind::Call { args, .. } | ExprKind::StaticCall { args, .. } | ExprKind::New { args, .. } => {
                for arg in args {
                    self.walk_expr(state, tree, arg);
                }
            }
            ExprKind::MethodCall { object, args, .. } => {
                self.walk_expr(state, tree, object);
                for arg in args {
                    self.walk_expr(state, tree, arg);
                }
            }
            ExprKind::Closure(closure) => self.walk_function(state, tree, FunctionLike::Closure(closure)),
            ExprKind::Assign { target, value, .. } | ExprKind::CompoundAssign { target, value, .. } => {
                self.walk_expr(state, tree, value);
                self.walk_expr(state, tree, target);
            }
            ExprKind::Binary { lhs, rhs, .. } => {
                self.walk_expr(state, tree, lhs);
                self.walk_expr(state, tree, rhs);
            }
            ExprKind::Unary { operand, .. } => self.walk_expr(state, tree, operand),
            ExprKind::Ternary {
                condition,
                then_value,
                else_value,
            } => {
                self.walk_expr(state, tree, condition);
                if let Some(then_value) = then_value {
                    self.walk_expr(state, tree, then_value);
                }
                self.walk_expr(state, tree, else_value);
            }
            ExprKind::Instanceof { value, .. } => self.walk_expr(state, tree, value),
            ExprKind::Include { path, .. } => self.walk_expr(state, tree, path),
        }
        backward!(self, state, |stage| stage.leave_expression(state, tree, expr));
    }
}
