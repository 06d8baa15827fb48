//! Recursive-descent parser producing [`SyntaxTree`]s.
//!
//! The parser is deliberately all-or-nothing: the first syntax error aborts
//! and the caller receives no tree, only the problem list. The semantic
//! pipeline treats that as a total parse failure and keeps an empty unit.

use std::sync::Arc;

use smol_str::SmolStr;

use super::ast::*;
use super::lexer::{Token, TokenKind, tokenize};
use crate::base::{Interner, LineIndex, TextRange, TextSize};

/// A syntax error reported by the parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseProblem {
    pub message: SmolStr,
    pub range: TextRange,
}

/// What a parse run produced.
#[derive(Debug)]
pub struct ParseOutput {
    /// `None` when the text could not be parsed at all.
    pub tree: Option<SyntaxTree>,
    pub problems: Vec<ParseProblem>,
}

impl ParseOutput {
    pub fn is_success(&self) -> bool {
        self.tree.is_some()
    }
}

/// Parser for the PHP subset the semantic builders understand.
#[derive(Clone, Copy, Debug, Default)]
pub struct PhpParser;

impl PhpParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, text: &str) -> ParseOutput {
        let lexed = tokenize(text);
        if let Some(&range) = lexed.errors.first() {
            let problems = lexed
                .errors
                .iter()
                .map(|&range| ParseProblem {
                    message: SmolStr::new("Unexpected character"),
                    range,
                })
                .collect();
            tracing::debug!(?range, "lexing failed");
            return ParseOutput {
                tree: None,
                problems,
            };
        }

        let mut parser = Parser {
            text,
            tokens: lexed.tokens,
            docs: lexed.doc_comments,
            pos: 0,
            interner: Interner::new(),
            next_node: 0,
        };

        match parser.source_file() {
            Ok(file) => {
                let count = parser.next_node;
                ParseOutput {
                    tree: Some(SyntaxTree::new(
                        file,
                        parser.interner,
                        count,
                        LineIndex::new(text),
                    )),
                    problems: Vec::new(),
                }
            }
            Err(problem) => ParseOutput {
                tree: None,
                problems: vec![problem],
            },
        }
    }
}

type PResult<T> = Result<T, ParseProblem>;

struct Parser<'t> {
    text: &'t str,
    tokens: Vec<Token>,
    docs: Vec<TextRange>,
    pos: usize,
    interner: Interner,
    next_node: u32,
}

impl<'t> Parser<'t> {
    // ========================================================================
    // TOKEN CURSOR
    // ========================================================================

    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn nth_kind(&self, n: usize) -> Option<TokenKind> {
        self.tokens.get(self.pos + n).map(|t| t.kind)
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.nth_kind(0) == Some(kind)
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn slice(&self, range: TextRange) -> &'t str {
        &self.text[range]
    }

    fn nth_is_kw(&self, n: usize, kw: &str) -> bool {
        match self.tokens.get(self.pos + n) {
            Some(t) if t.kind == TokenKind::Ident => self.slice(t.range).eq_ignore_ascii_case(kw),
            _ => false,
        }
    }

    fn at_kw(&self, kw: &str) -> bool {
        self.nth_is_kw(0, kw)
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.at_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn current_start(&self) -> TextSize {
        match self.peek() {
            Some(t) => t.range.start(),
            None => self.end_of_input(),
        }
    }

    fn end_of_input(&self) -> TextSize {
        TextSize::of(self.text)
    }

    fn prev_end(&self) -> TextSize {
        match self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some(t) => t.range.end(),
            None => TextSize::from(0),
        }
    }

    fn range_from(&self, start: TextSize) -> TextRange {
        let end = self.prev_end().max(start);
        TextRange::new(start, end)
    }

    fn error<T>(&self, expected: &str) -> PResult<T> {
        let (found, range) = match self.peek() {
            Some(t) => (format!("'{}'", self.slice(t.range)), t.range),
            None => (
                "end of file".to_string(),
                TextRange::empty(self.end_of_input()),
            ),
        };
        Err(ParseProblem {
            message: SmolStr::new(format!("Syntax error: expected {expected}, found {found}")),
            range,
        })
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> PResult<Token> {
        match self.peek() {
            Some(t) if t.kind == kind => {
                self.pos += 1;
                Ok(t)
            }
            _ => self.error(expected),
        }
    }

    fn expect_kw(&mut self, kw: &str) -> PResult<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            self.error(kw)
        }
    }

    fn expect_semi(&mut self) -> PResult<()> {
        if self.eat(TokenKind::Semi) || self.at_eof() {
            Ok(())
        } else {
            self.error("';'")
        }
    }

    fn node_id(&mut self) -> NodeId {
        let id = NodeId::new(self.next_node);
        self.next_node += 1;
        id
    }

    /// The doc comment directly preceding the token at `start`, if any.
    fn doc_before(&self, start: TextSize) -> Option<Arc<str>> {
        let idx = self.docs.partition_point(|d| d.end() <= start);
        let doc = *self.docs.get(idx.checked_sub(1)?)?;
        if doc.start() >= self.prev_end() {
            Some(Arc::from(self.slice(doc)))
        } else {
            None
        }
    }

    // ========================================================================
    // NAMES
    // ========================================================================

    fn ident(&mut self) -> PResult<Ident> {
        let token = self.expect(TokenKind::Ident, "identifier")?;
        Ok(Ident {
            name: self.interner.intern(self.slice(token.range)),
            range: token.range,
        })
    }

    fn var(&mut self) -> PResult<Var> {
        let token = self.expect(TokenKind::Variable, "variable")?;
        let name_range = TextRange::new(token.range.start() + TextSize::from(1), token.range.end());
        Ok(Var {
            name: Ident {
                name: self.interner.intern(self.slice(name_range)),
                range: name_range,
            },
            range: token.range,
        })
    }

    fn name_path(&mut self) -> PResult<NamePath> {
        let start = self.current_start();
        let fully_qualified = self.eat(TokenKind::Backslash);
        let mut segments = vec![self.ident()?];
        while self.at(TokenKind::Backslash) && self.nth_kind(1) == Some(TokenKind::Ident) {
            self.pos += 1;
            segments.push(self.ident()?);
        }
        Ok(NamePath {
            segments,
            fully_qualified,
            range: self.range_from(start),
        })
    }

    fn name_path_list(&mut self) -> PResult<Vec<NamePath>> {
        let mut paths = vec![self.name_path()?];
        while self.eat(TokenKind::Comma) {
            paths.push(self.name_path()?);
        }
        Ok(paths)
    }

    // ========================================================================
    // STATEMENTS
    // ========================================================================

    fn source_file(&mut self) -> PResult<SourceFile> {
        let mut statements = Vec::new();
        while !self.at_eof() {
            statements.push(self.statement()?);
        }
        Ok(SourceFile {
            statements,
            range: TextRange::up_to(self.end_of_input()),
        })
    }

    fn statement(&mut self) -> PResult<Stmt> {
        let start = self.current_start();
        let doc = self.doc_before(start);

        if self.at_kw("namespace") && !self.nth_kind(1).is_some_and(|k| k == TokenKind::Backslash) {
            return self.namespace_decl(start);
        }
        if self.at_kw("use") {
            return self.use_stmt(start);
        }
        if self.at_kw("class")
            || self.at_kw("interface")
            || self.at_kw("trait")
            || ((self.at_kw("abstract") || self.at_kw("final")) && self.nth_is_kw(1, "class"))
        {
            return self.class_decl(start, doc).map(Stmt::Class);
        }
        if self.at_kw("function")
            && (self.nth_kind(1) == Some(TokenKind::Ident)
                || (self.nth_kind(1) == Some(TokenKind::Amp)
                    && self.nth_kind(2) == Some(TokenKind::Ident)))
        {
            return self.function_decl(start, doc).map(Stmt::Function);
        }
        if self.at_kw("const") {
            self.pos += 1;
            return self.const_items(start, doc).map(Stmt::Const);
        }
        if self.eat_kw("return") {
            let value = if self.at(TokenKind::Semi) || self.at_eof() {
                None
            } else {
                Some(self.expr()?)
            };
            self.expect_semi()?;
            return Ok(Stmt::Return(ReturnStmt {
                value,
                range: self.range_from(start),
            }));
        }
        if self.eat_kw("global") {
            let mut vars = vec![self.var()?];
            while self.eat(TokenKind::Comma) {
                vars.push(self.var()?);
            }
            self.expect_semi()?;
            return Ok(Stmt::Global(GlobalStmt {
                vars,
                range: self.range_from(start),
            }));
        }
        if self.at_kw("static") && self.nth_kind(1) == Some(TokenKind::Variable) {
            self.pos += 1;
            let mut vars = Vec::new();
            loop {
                let var = self.var()?;
                let value = if self.eat(TokenKind::Assign) {
                    Some(self.expr()?)
                } else {
                    None
                };
                vars.push(StaticVar { var, value });
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            self.expect_semi()?;
            return Ok(Stmt::StaticVar(StaticVarStmt {
                vars,
                range: self.range_from(start),
            }));
        }
        if self.eat_kw("echo") {
            let mut values = vec![self.expr()?];
            while self.eat(TokenKind::Comma) {
                values.push(self.expr()?);
            }
            self.expect_semi()?;
            return Ok(Stmt::Echo(EchoStmt {
                values,
                range: self.range_from(start),
            }));
        }
        if self.at_kw("if") {
            return self.if_stmt(start);
        }
        if self.eat_kw("while") {
            self.expect(TokenKind::LParen, "'('")?;
            let condition = self.expr()?;
            self.expect(TokenKind::RParen, "')'")?;
            let body = Box::new(self.statement()?);
            return Ok(Stmt::While(WhileStmt {
                condition,
                body,
                range: self.range_from(start),
            }));
        }
        if self.eat_kw("foreach") {
            return self.foreach_stmt(start);
        }
        if self.eat_kw("try") {
            return self.try_stmt(start);
        }
        if self.at(TokenKind::LBrace) {
            return self.block().map(Stmt::Block);
        }
        if self.eat(TokenKind::Semi) {
            return Ok(Stmt::Block(Block {
                statements: Vec::new(),
                range: self.range_from(start),
            }));
        }

        let expr = self.expr()?;
        self.expect_semi()?;
        Ok(Stmt::Expr(ExprStmt {
            expr,
            doc,
            range: self.range_from(start),
        }))
    }

    fn block(&mut self) -> PResult<Block> {
        let start = self.current_start();
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut statements = Vec::new();
        while !self.at(TokenKind::RBrace) {
            if self.at_eof() {
                return self.error("'}'");
            }
            statements.push(self.statement()?);
        }
        self.pos += 1;
        Ok(Block {
            statements,
            range: self.range_from(start),
        })
    }

    fn namespace_decl(&mut self, start: TextSize) -> PResult<Stmt> {
        self.expect_kw("namespace")?;
        let id = self.node_id();
        let name = if self.at(TokenKind::Ident) {
            Some(self.name_path()?)
        } else {
            None
        };
        let body = if self.at(TokenKind::LBrace) {
            Some(self.block()?.statements)
        } else {
            if name.is_none() {
                return self.error("namespace name or '{'");
            }
            self.expect_semi()?;
            None
        };
        Ok(Stmt::Namespace(NamespaceDecl {
            id,
            name,
            body,
            range: self.range_from(start),
        }))
    }

    fn use_stmt(&mut self, start: TextSize) -> PResult<Stmt> {
        self.expect_kw("use")?;
        let mut items = Vec::new();
        loop {
            let item_start = self.current_start();
            let id = self.node_id();
            let path = self.name_path()?;
            let alias = if self.eat_kw("as") {
                Some(self.ident()?)
            } else {
                None
            };
            items.push(UseItem {
                id,
                path,
                alias,
                range: self.range_from(item_start),
            });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect_semi()?;
        Ok(Stmt::Use(UseStmt {
            items,
            range: self.range_from(start),
        }))
    }

    fn const_items(&mut self, start: TextSize, doc: Option<Arc<str>>) -> PResult<ConstStmt> {
        let mut items = Vec::new();
        loop {
            let item_start = self.current_start();
            let id = self.node_id();
            let name = self.ident()?;
            self.expect(TokenKind::Assign, "'='")?;
            let value = self.expr()?;
            items.push(ConstItem {
                id,
                name,
                value,
                range: self.range_from(item_start),
            });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect_semi()?;
        Ok(ConstStmt {
            items,
            doc,
            range: self.range_from(start),
        })
    }

    fn if_stmt(&mut self, start: TextSize) -> PResult<Stmt> {
        // `if` or `elseif`
        self.bump();
        self.expect(TokenKind::LParen, "'('")?;
        let condition = self.expr()?;
        self.expect(TokenKind::RParen, "')'")?;
        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.at_kw("elseif") {
            let nested_start = self.current_start();
            Some(Box::new(self.if_stmt(nested_start)?))
        } else if self.eat_kw("else") {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If(IfStmt {
            condition,
            then_branch,
            else_branch,
            range: self.range_from(start),
        }))
    }

    fn foreach_stmt(&mut self, start: TextSize) -> PResult<Stmt> {
        self.expect(TokenKind::LParen, "'('")?;
        let subject = self.expr()?;
        self.expect_kw("as")?;
        let mut by_ref = self.eat(TokenKind::Amp);
        let first = self.postfix_expr()?;
        let (key, value) = if self.eat(TokenKind::FatArrow) {
            by_ref = self.eat(TokenKind::Amp);
            (Some(first), self.postfix_expr()?)
        } else {
            (None, first)
        };
        self.expect(TokenKind::RParen, "')'")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::Foreach(ForeachStmt {
            subject,
            key,
            value,
            by_ref,
            body,
            range: self.range_from(start),
        }))
    }

    fn try_stmt(&mut self, start: TextSize) -> PResult<Stmt> {
        let body = self.block()?;
        let mut catches = Vec::new();
        while self.at_kw("catch") {
            let catch_start = self.current_start();
            self.pos += 1;
            self.expect(TokenKind::LParen, "'('")?;
            let mut classes = vec![self.name_path()?];
            while self.eat(TokenKind::Pipe) {
                classes.push(self.name_path()?);
            }
            let var = self.var()?;
            self.expect(TokenKind::RParen, "')'")?;
            let body = self.block()?;
            catches.push(CatchClause {
                classes,
                var,
                body,
                range: self.range_from(catch_start),
            });
        }
        let finally = if self.eat_kw("finally") {
            Some(self.block()?)
        } else {
            None
        };
        if catches.is_empty() && finally.is_none() {
            return self.error("'catch' or 'finally'");
        }
        Ok(Stmt::Try(TryStmt {
            body,
            catches,
            finally,
            range: self.range_from(start),
        }))
    }

    // ========================================================================
    // DECLARATIONS
    // ========================================================================

    fn class_decl(&mut self, start: TextSize, doc: Option<Arc<str>>) -> PResult<ClassDecl> {
        let modifier = if self.eat_kw("abstract") {
            ClassModifierKind::Abstract
        } else if self.eat_kw("final") {
            ClassModifierKind::Final
        } else {
            ClassModifierKind::None
        };
        let kind = if self.eat_kw("class") {
            ClassKind::Class
        } else if self.eat_kw("interface") {
            ClassKind::Interface
        } else if self.eat_kw("trait") {
            ClassKind::Trait
        } else {
            return self.error("'class', 'interface' or 'trait'");
        };
        let id = self.node_id();
        let name = self.ident()?;

        let mut extends = Vec::new();
        let mut implements = Vec::new();
        if kind != ClassKind::Trait && self.eat_kw("extends") {
            extends = if kind == ClassKind::Interface {
                self.name_path_list()?
            } else {
                vec![self.name_path()?]
            };
        }
        if kind == ClassKind::Class && self.eat_kw("implements") {
            implements = self.name_path_list()?;
        }

        self.expect(TokenKind::LBrace, "'{'")?;
        let mut members = Vec::new();
        while !self.eat(TokenKind::RBrace) {
            if self.at_eof() {
                return self.error("'}'");
            }
            members.push(self.class_member()?);
        }

        Ok(ClassDecl {
            id,
            kind,
            modifier,
            name,
            extends,
            implements,
            members,
            doc,
            range: self.range_from(start),
        })
    }

    fn class_member(&mut self) -> PResult<ClassMember> {
        let start = self.current_start();
        let doc = self.doc_before(start);

        if self.eat_kw("use") {
            return self.trait_use(start).map(ClassMember::TraitUse);
        }
        if self.eat_kw("const") {
            return self.const_items(start, doc).map(ClassMember::Const);
        }

        let mut modifiers = Modifiers::empty();
        loop {
            let flag = if self.at_kw("public") || self.at_kw("var") {
                Modifiers::PUBLIC
            } else if self.at_kw("protected") {
                Modifiers::PROTECTED
            } else if self.at_kw("private") {
                Modifiers::PRIVATE
            } else if self.at_kw("static") {
                Modifiers::STATIC
            } else if self.at_kw("abstract") {
                Modifiers::ABSTRACT
            } else if self.at_kw("final") {
                Modifiers::FINAL
            } else {
                break;
            };
            modifiers |= flag;
            self.pos += 1;
        }

        if self.at_kw("const") {
            self.pos += 1;
            return self.const_items(start, doc).map(ClassMember::Const);
        }

        if self.eat_kw("function") {
            self.eat(TokenKind::Amp);
            let id = self.node_id();
            let name = self.ident()?;
            let params = self.params()?;
            let return_hint = self.return_hint()?;
            let body = if self.eat(TokenKind::Semi) {
                None
            } else {
                Some(self.block()?)
            };
            return Ok(ClassMember::Method(MethodDecl {
                id,
                modifiers,
                name,
                params,
                return_hint,
                body,
                doc,
                range: self.range_from(start),
            }));
        }

        // Typed properties: skip the type, it carries no extra meaning here.
        if !self.at(TokenKind::Variable) && (self.at(TokenKind::Ident) || self.at(TokenKind::Question)) {
            self.eat(TokenKind::Question);
            self.name_path()?;
        }

        let mut vars = Vec::new();
        loop {
            let var_start = self.current_start();
            let id = self.node_id();
            let var = self.var()?;
            let default = if self.eat(TokenKind::Assign) {
                Some(self.expr()?)
            } else {
                None
            };
            vars.push(PropertyVar {
                id,
                var,
                default,
                range: self.range_from(var_start),
            });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect_semi()?;
        Ok(ClassMember::Property(PropertyDecl {
            modifiers,
            vars,
            doc,
            range: self.range_from(start),
        }))
    }

    fn trait_use(&mut self, start: TextSize) -> PResult<TraitUse> {
        let traits = self.name_path_list()?;
        let mut adaptations = Vec::new();
        if self.eat(TokenKind::LBrace) {
            while !self.eat(TokenKind::RBrace) {
                if self.at_eof() {
                    return self.error("'}'");
                }
                adaptations.push(self.trait_adaptation()?);
            }
        } else {
            self.expect_semi()?;
        }
        Ok(TraitUse {
            traits,
            adaptations,
            range: self.range_from(start),
        })
    }

    fn trait_adaptation(&mut self) -> PResult<TraitAdaptation> {
        let start = self.current_start();
        let id = self.node_id();
        let first = self.name_path()?;
        let (trait_name, method) = if self.eat(TokenKind::DoubleColon) {
            (Some(first), self.ident()?)
        } else if first.segments.len() == 1 && !first.fully_qualified {
            let method = first.segments.into_iter().next();
            match method {
                Some(method) => (None, method),
                None => return self.error("method name"),
            }
        } else {
            return self.error("'::'");
        };

        let kind = if self.eat_kw("insteadof") {
            AdaptationKind::InsteadOf(self.name_path_list()?)
        } else {
            self.expect_kw("as")?;
            let mut modifiers = Modifiers::empty();
            loop {
                let flag = if self.at_kw("public") {
                    Modifiers::PUBLIC
                } else if self.at_kw("protected") {
                    Modifiers::PROTECTED
                } else if self.at_kw("private") {
                    Modifiers::PRIVATE
                } else if self.at_kw("static") {
                    Modifiers::STATIC
                } else if self.at_kw("final") {
                    Modifiers::FINAL
                } else if self.at_kw("abstract") {
                    Modifiers::ABSTRACT
                } else {
                    break;
                };
                modifiers |= flag;
                self.pos += 1;
            }
            let alias = if self.at(TokenKind::Ident) {
                Some(self.ident()?)
            } else {
                None
            };
            if modifiers.is_empty() && alias.is_none() {
                return self.error("alias or visibility");
            }
            AdaptationKind::Alias { modifiers, alias }
        };
        self.expect_semi()?;
        Ok(TraitAdaptation {
            id,
            trait_name,
            method,
            kind,
            range: self.range_from(start),
        })
    }

    fn function_decl(&mut self, start: TextSize, doc: Option<Arc<str>>) -> PResult<FunctionDecl> {
        self.expect_kw("function")?;
        self.eat(TokenKind::Amp);
        let id = self.node_id();
        let name = self.ident()?;
        let params = self.params()?;
        let return_hint = self.return_hint()?;
        let body = self.block()?;
        Ok(FunctionDecl {
            id,
            name,
            params,
            return_hint,
            body,
            doc,
            range: self.range_from(start),
        })
    }

    fn params(&mut self) -> PResult<Vec<Param>> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        while !self.eat(TokenKind::RParen) {
            let start = self.current_start();
            let id = self.node_id();
            let hint = if self.at(TokenKind::Variable) || self.at(TokenKind::Amp) || self.at(TokenKind::Ellipsis) {
                None
            } else {
                self.eat(TokenKind::Question);
                Some(self.type_hint()?)
            };
            let by_ref = self.eat(TokenKind::Amp);
            let variadic = self.eat(TokenKind::Ellipsis);
            let var = self.var()?;
            let default = if self.eat(TokenKind::Assign) {
                Some(self.expr()?)
            } else {
                None
            };
            params.push(Param {
                id,
                hint,
                by_ref,
                variadic,
                var,
                default,
                range: self.range_from(start),
            });
            if !self.eat(TokenKind::Comma) {
                self.expect(TokenKind::RParen, "')'")?;
                break;
            }
        }
        Ok(params)
    }

    fn type_hint(&mut self) -> PResult<TypeHint> {
        if let Some(token) = self.peek() {
            if self.at_kw("array") {
                self.pos += 1;
                return Ok(TypeHint::Array(token.range));
            }
            if self.at_kw("callable") {
                self.pos += 1;
                return Ok(TypeHint::Callable(token.range));
            }
        }
        self.name_path().map(TypeHint::Named)
    }

    fn return_hint(&mut self) -> PResult<Option<TypeHint>> {
        if self.eat(TokenKind::Colon) {
            self.eat(TokenKind::Question);
            Ok(Some(self.type_hint()?))
        } else {
            Ok(None)
        }
    }

    fn closure(&mut self, start: TextSize) -> PResult<Expr> {
        let doc = self.doc_before(start);
        let is_static = self.eat_kw("static");
        self.expect_kw("function")?;
        self.eat(TokenKind::Amp);
        let id = self.node_id();
        let params = self.params()?;
        let uses = if self.eat_kw("use") {
            self.expect(TokenKind::LParen, "'('")?;
            let mut vars = Vec::new();
            while !self.eat(TokenKind::RParen) {
                let by_ref = self.eat(TokenKind::Amp);
                vars.push(LexicalVar {
                    var: self.var()?,
                    by_ref,
                });
                if !self.eat(TokenKind::Comma) {
                    self.expect(TokenKind::RParen, "')'")?;
                    break;
                }
            }
            Some(vars)
        } else {
            None
        };
        let return_hint = self.return_hint()?;
        let body = self.block()?;
        let range = self.range_from(start);
        Ok(Expr {
            kind: ExprKind::Closure(Box::new(Closure {
                id,
                is_static,
                params,
                uses,
                return_hint,
                body,
                doc,
                range,
            })),
            range,
        })
    }

    // ========================================================================
    // EXPRESSIONS
    // ========================================================================

    fn expr(&mut self) -> PResult<Expr> {
        let start = self.current_start();
        let target = self.ternary()?;

        let compound = match self.nth_kind(0) {
            Some(TokenKind::ConcatAssign) => Some(BinaryOp::Concat),
            Some(TokenKind::PlusAssign) => Some(BinaryOp::Add),
            Some(TokenKind::MinusAssign) => Some(BinaryOp::Sub),
            Some(TokenKind::StarAssign) => Some(BinaryOp::Mul),
            Some(TokenKind::SlashAssign) => Some(BinaryOp::Div),
            _ => None,
        };
        if let Some(op) = compound {
            self.pos += 1;
            let value = self.expr()?;
            return Ok(Expr {
                kind: ExprKind::CompoundAssign {
                    target: Box::new(target),
                    op,
                    value: Box::new(value),
                },
                range: self.range_from(start),
            });
        }
        if self.eat(TokenKind::Assign) {
            let by_ref = self.eat(TokenKind::Amp);
            let value = self.expr()?;
            return Ok(Expr {
                kind: ExprKind::Assign {
                    target: Box::new(target),
                    value: Box::new(value),
                    by_ref,
                },
                range: self.range_from(start),
            });
        }
        Ok(target)
    }

    fn ternary(&mut self) -> PResult<Expr> {
        let start = self.current_start();
        let condition = self.binary(0)?;
        if !self.eat(TokenKind::Question) {
            return Ok(condition);
        }
        let then_value = if self.at(TokenKind::Colon) {
            None
        } else {
            Some(Box::new(self.expr()?))
        };
        self.expect(TokenKind::Colon, "':'")?;
        let else_value = Box::new(self.expr()?);
        Ok(Expr {
            kind: ExprKind::Ternary {
                condition: Box::new(condition),
                then_value,
                else_value,
            },
            range: self.range_from(start),
        })
    }

    fn binary_op(&self) -> Option<(BinaryOp, u8)> {
        let op = match self.nth_kind(0)? {
            TokenKind::Coalesce => (BinaryOp::Coalesce, 1),
            TokenKind::OrOr => (BinaryOp::Or, 2),
            TokenKind::AndAnd => (BinaryOp::And, 3),
            TokenKind::Pipe => (BinaryOp::BitOr, 4),
            TokenKind::Amp => (BinaryOp::BitAnd, 5),
            TokenKind::EqEq => (BinaryOp::Eq, 6),
            TokenKind::NotEq => (BinaryOp::NotEq, 6),
            TokenKind::EqEqEq => (BinaryOp::Identical, 6),
            TokenKind::NotEqEq => (BinaryOp::NotIdentical, 6),
            TokenKind::Lt => (BinaryOp::Lt, 7),
            TokenKind::Gt => (BinaryOp::Gt, 7),
            TokenKind::LtEq => (BinaryOp::LtEq, 7),
            TokenKind::GtEq => (BinaryOp::GtEq, 7),
            TokenKind::Plus => (BinaryOp::Add, 8),
            TokenKind::Minus => (BinaryOp::Sub, 8),
            TokenKind::Dot => (BinaryOp::Concat, 8),
            TokenKind::Star => (BinaryOp::Mul, 9),
            TokenKind::Slash => (BinaryOp::Div, 9),
            TokenKind::Percent => (BinaryOp::Mod, 9),
            TokenKind::Ident if self.at_kw("or") => (BinaryOp::Or, 0),
            TokenKind::Ident if self.at_kw("and") => (BinaryOp::And, 0),
            _ => return None,
        };
        Some(op)
    }

    fn binary(&mut self, min_prec: u8) -> PResult<Expr> {
        let start = self.current_start();
        let mut lhs = self.unary()?;
        while let Some((op, prec)) = self.binary_op() {
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(prec + 1)?;
            lhs = Expr {
                kind: ExprKind::Binary {
                    lhs: Box::new(lhs),
                    op,
                    rhs: Box::new(rhs),
                },
                range: self.range_from(start),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> PResult<Expr> {
        let start = self.current_start();
        let op = match self.nth_kind(0) {
            Some(TokenKind::Bang) => Some(UnaryOp::Not),
            Some(TokenKind::Minus) => Some(UnaryOp::Neg),
            Some(TokenKind::Plus) => Some(UnaryOp::Plus),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let operand = self.unary()?;
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                range: self.range_from(start),
            });
        }

        let include = [
            ("include_once", IncludeKind::IncludeOnce),
            ("include", IncludeKind::Include),
            ("require_once", IncludeKind::RequireOnce),
            ("require", IncludeKind::Require),
        ]
        .into_iter()
        .find(|(kw, _)| self.at_kw(kw));
        if let Some((_, kind)) = include {
            self.pos += 1;
            let path = self.expr()?;
            return Ok(Expr {
                kind: ExprKind::Include {
                    kind,
                    path: Box::new(path),
                },
                range: self.range_from(start),
            });
        }

        let value = self.postfix_expr()?;
        if self.eat_kw("instanceof") {
            let class = self.name_path()?;
            return Ok(Expr {
                kind: ExprKind::Instanceof {
                    value: Box::new(value),
                    class,
                },
                range: self.range_from(start),
            });
        }
        Ok(value)
    }

    fn postfix_expr(&mut self) -> PResult<Expr> {
        let start = self.current_start();
        let mut expr = self.primary()?;
        loop {
            if self.eat(TokenKind::Arrow) {
                let name = self.ident()?;
                expr = if self.at(TokenKind::LParen) {
                    let args = self.args()?;
                    Expr {
                        kind: ExprKind::MethodCall {
                            object: Box::new(expr),
                            name,
                            args,
                        },
                        range: self.range_from(start),
                    }
                } else {
                    Expr {
                        kind: ExprKind::Property {
                            object: Box::new(expr),
                            name,
                        },
                        range: self.range_from(start),
                    }
                };
            } else if self.eat(TokenKind::LBracket) {
                let index = if self.at(TokenKind::RBracket) {
                    None
                } else {
                    Some(Box::new(self.expr()?))
                };
                self.expect(TokenKind::RBracket, "']'")?;
                expr = Expr {
                    kind: ExprKind::Index {
                        base: Box::new(expr),
                        index,
                    },
                    range: self.range_from(start),
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn args(&mut self) -> PResult<Vec<Expr>> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        while !self.eat(TokenKind::RParen) {
            self.eat(TokenKind::Ellipsis);
            args.push(self.expr()?);
            if !self.eat(TokenKind::Comma) {
                self.expect(TokenKind::RParen, "')'")?;
                break;
            }
        }
        Ok(args)
    }

    fn array_items(&mut self, close: TokenKind) -> PResult<Vec<ArrayItem>> {
        let mut items = Vec::new();
        while !self.eat(close) {
            self.eat(TokenKind::Amp);
            let first = self.expr()?;
            let item = if self.eat(TokenKind::FatArrow) {
                self.eat(TokenKind::Amp);
                ArrayItem {
                    key: Some(first),
                    value: self.expr()?,
                }
            } else {
                ArrayItem {
                    key: None,
                    value: first,
                }
            };
            items.push(item);
            if !self.eat(TokenKind::Comma) {
                self.expect(close, "end of array")?;
                break;
            }
        }
        Ok(items)
    }

    fn literal(&self, token: Token) -> Literal {
        let text = self.slice(token.range);
        match token.kind {
            TokenKind::Int => text.parse().map(Literal::Int).unwrap_or(Literal::Float(f64::MAX)),
            TokenKind::Float => Literal::Float(text.parse().unwrap_or_default()),
            _ => {
                let inner = text.get(1..text.len().saturating_sub(1)).unwrap_or_default();
                let unescaped = if token.kind == TokenKind::SingleQuoted {
                    inner.replace("\\'", "'").replace("\\\\", "\\")
                } else {
                    inner.replace("\\\"", "\"").replace("\\\\", "\\")
                };
                Literal::String(SmolStr::new(unescaped))
            }
        }
    }

    fn primary(&mut self) -> PResult<Expr> {
        let start = self.current_start();
        let Some(token) = self.peek() else {
            return self.error("expression");
        };

        let kind = match token.kind {
            TokenKind::Variable => ExprKind::Variable(self.var()?),
            TokenKind::Int | TokenKind::Float | TokenKind::SingleQuoted | TokenKind::DoubleQuoted => {
                self.pos += 1;
                ExprKind::Literal(self.literal(token))
            }
            TokenKind::LParen => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(TokenKind::RParen, "')'")?;
                return Ok(inner);
            }
            TokenKind::LBracket => {
                self.pos += 1;
                ExprKind::Array(self.array_items(TokenKind::RBracket)?)
            }
            TokenKind::Ident if self.at_kw("array") && self.nth_kind(1) == Some(TokenKind::LParen) => {
                self.pos += 2;
                ExprKind::Array(self.array_items(TokenKind::RParen)?)
            }
            TokenKind::Ident if self.at_kw("true") || self.at_kw("false") => {
                self.pos += 1;
                ExprKind::Literal(Literal::Bool(self.slice(token.range).eq_ignore_ascii_case("true")))
            }
            TokenKind::Ident if self.at_kw("null") => {
                self.pos += 1;
                ExprKind::Literal(Literal::Null)
            }
            TokenKind::Ident if self.at_kw("function") => return self.closure(start),
            TokenKind::Ident if self.at_kw("static") && self.nth_is_kw(1, "function") => {
                return self.closure(start);
            }
            TokenKind::Ident if self.at_kw("new") => {
                self.pos += 1;
                let class = self.name_path()?;
                let args = if self.at(TokenKind::LParen) {
                    self.args()?
                } else {
                    Vec::new()
                };
                ExprKind::New { class, args }
            }
            TokenKind::Ident | TokenKind::Backslash => {
                let path = self.name_path()?;
                if self.at(TokenKind::LParen) {
                    let args = self.args()?;
                    ExprKind::Call { callee: path, args }
                } else if self.eat(TokenKind::DoubleColon) {
                    if self.at(TokenKind::Variable) {
                        ExprKind::StaticProperty {
                            class: path,
                            var: self.var()?,
                        }
                    } else {
                        let name = self.ident()?;
                        if self.at(TokenKind::LParen) {
                            let args = self.args()?;
                            ExprKind::StaticCall {
                                class: path,
                                name,
                                args,
                            }
                        } else {
                            ExprKind::ClassConst { class: path, name }
                        }
                    }
                } else {
                    ExprKind::Name(path)
                }
            }
            _ => return self.error("expression"),
        };

        Ok(Expr {
            kind,
            range: self.range_from(start),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> SyntaxTree {
        let output = PhpParser::new().parse(text);
        assert!(output.problems.is_empty(), "{:?}", output.problems);
        output.tree.expect("tree")
    }

    #[test]
    fn test_class_with_members() {
        let tree = parse(
            "<?php
            /** doc */
            abstract class A extends B implements I, J {
                const X = 1;
                private static $count = 0;
                abstract protected function run($a, Foo &$b = null);
                public function go() { return $this->count; }
            }",
        );
        let Stmt::Class(class) = &tree.file.statements[0] else {
            panic!("expected class");
        };
        assert_eq!(tree.ident(&class.name), "A");
        assert_eq!(class.modifier, ClassModifierKind::Abstract);
        assert_eq!(class.extends.len(), 1);
        assert_eq!(class.implements.len(), 2);
        assert_eq!(class.members.len(), 4);
        assert_eq!(class.doc.as_deref(), Some("/** doc */"));

        let ClassMember::Method(run) = &class.members[2] else {
            panic!("expected method");
        };
        assert!(run.body.is_none());
        assert!(run.modifiers.contains(Modifiers::ABSTRACT | Modifiers::PROTECTED));
        assert!(run.params[1].by_ref);
        assert!(run.params[1].default.is_some());
    }

    #[test]
    fn test_braceless_namespaces() {
        let tree = parse("<?php namespace A\\B; class C {} namespace D; function f() {}");
        assert_eq!(tree.file.statements.len(), 4);
        let Stmt::Namespace(ns) = &tree.file.statements[0] else {
            panic!("expected namespace");
        };
        assert!(ns.body.is_none());
        let segments = tree.path_segments(ns.name.as_ref().expect("name"));
        assert_eq!(segments, vec!["A", "B"]);
    }

    #[test]
    fn test_closure_with_uses() {
        let tree = parse("<?php $f = function ($x) use ($y, &$z) { return $x + $y; };");
        let Stmt::Expr(stmt) = &tree.file.statements[0] else {
            panic!("expected expression statement");
        };
        let ExprKind::Assign { value, .. } = &stmt.expr.kind else {
            panic!("expected assignment");
        };
        let ExprKind::Closure(closure) = &value.kind else {
            panic!("expected closure");
        };
        let uses = closure.uses.as_ref().expect("uses");
        assert_eq!(uses.len(), 2);
        assert!(uses[1].by_ref);
    }

    #[test]
    fn test_trait_adaptations() {
        let tree = parse(
            "<?php class C { use T, U { T::hello insteadof U; hello as protected greet; world as private; } }",
        );
        let Stmt::Class(class) = &tree.file.statements[0] else {
            panic!("expected class");
        };
        let ClassMember::TraitUse(uses) = &class.members[0] else {
            panic!("expected trait use");
        };
        assert_eq!(uses.traits.len(), 2);
        assert_eq!(uses.adaptations.len(), 3);
        assert!(matches!(uses.adaptations[0].kind, AdaptationKind::InsteadOf(_)));
        assert!(matches!(
            &uses.adaptations[2].kind,
            AdaptationKind::Alias { alias: None, modifiers } if modifiers.contains(Modifiers::PRIVATE)
        ));
    }

    #[test]
    fn test_property_chain_and_index() {
        let tree = parse("<?php $a->b->c[0] = 1;");
        let Stmt::Expr(stmt) = &tree.file.statements[0] else {
            panic!("expected expression statement");
        };
        let ExprKind::Assign { target, .. } = &stmt.expr.kind else {
            panic!("expected assignment");
        };
        assert!(matches!(target.kind, ExprKind::Index { .. }));
    }

    #[test]
    fn test_syntax_error_is_total_failure() {
        let output = PhpParser::new().parse("<?php class { }");
        assert!(output.tree.is_none());
        assert_eq!(output.problems.len(), 1);
        assert!(output.problems[0].message.starts_with("Syntax error"));
    }

    #[test]
    fn test_node_ids_are_sequential() {
        let tree = parse("<?php class A {} function f() {} class B {}");
        let ids: Vec<_> = tree
            .file
            .statements
            .iter()
            .filter_map(|s| match s {
                Stmt::Class(c) => Some(c.id),
                Stmt::Function(f) => Some(f.id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![NodeId::new(0), NodeId::new(1), NodeId::new(2)]);
        assert_eq!(tree.node_count(), 3);
    }
}
