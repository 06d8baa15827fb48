//! Tokenizer for the PHP subset understood by [`PhpParser`](super::PhpParser).
//!
//! Keywords are not separate token kinds: PHP keywords are case-insensitive
//! and many of them are legal member names, so the parser checks identifier
//! text instead.

use logos::Logos;

use crate::base::{TextRange, TextSize};

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"([ \t\r\n\f]+|//[^\n]*|#[^\n]*)")]
pub enum TokenKind {
    #[token("<?php")]
    OpenTag,
    #[token("?>")]
    CloseTag,

    #[regex(r"/\*([^*]|\*+[^*/])*\*+/")]
    BlockComment,

    #[regex(r"\$[A-Za-z_][A-Za-z0-9_]*")]
    Variable,
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,
    #[regex(r"[0-9]+")]
    Int,
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?")]
    Float,
    #[regex(r"'([^'\\]|\\.)*'")]
    SingleQuoted,
    #[regex(r#""([^"\\]|\\.)*""#)]
    DoubleQuoted,

    #[token("\\")]
    Backslash,
    #[token(";")]
    Semi,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("->")]
    Arrow,
    #[token("::")]
    DoubleColon,
    #[token("=>")]
    FatArrow,
    #[token("...")]
    Ellipsis,
    #[token("=")]
    Assign,
    #[token(".=")]
    ConcatAssign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("==")]
    EqEq,
    #[token("===")]
    EqEqEq,
    #[token("!=")]
    NotEq,
    #[token("!==")]
    NotEqEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token(".")]
    Dot,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("?")]
    Question,
    #[token("??")]
    Coalesce,
    #[token(":")]
    Colon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub range: TextRange,
}

/// Result of tokenizing a document.
#[derive(Debug, Default)]
pub struct Lexed {
    pub tokens: Vec<Token>,
    /// `/** ... */` comments, in source order.
    pub doc_comments: Vec<TextRange>,
    /// Ranges that did not form any token.
    pub errors: Vec<TextRange>,
}

pub fn tokenize(text: &str) -> Lexed {
    let mut lexed = Lexed::default();
    let mut lexer = TokenKind::lexer(text);

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let range = TextRange::new(
            TextSize::from(span.start as u32),
            TextSize::from(span.end as u32),
        );
        match result {
            Ok(TokenKind::OpenTag) => {}
            Ok(TokenKind::BlockComment) => {
                if lexer.slice().starts_with("/**") {
                    lexed.doc_comments.push(range);
                }
            }
            // A close tag terminates a statement like `;` does.
            Ok(TokenKind::CloseTag) => lexed.tokens.push(Token {
                kind: TokenKind::Semi,
                range,
            }),
            Ok(kind) => lexed.tokens.push(Token { kind, range }),
            Err(()) => lexed.errors.push(range),
        }
    }

    lexed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        tokenize(text).tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_variables_and_idents() {
        assert_eq!(
            kinds("<?php $a = new Foo;"),
            vec![
                TokenKind::Variable,
                TokenKind::Assign,
                TokenKind::Ident,
                TokenKind::Ident,
                TokenKind::Semi,
            ]
        );
    }

    #[test]
    fn test_doc_comments_are_collected() {
        let lexed = tokenize("<?php /** @return int */ function f() {} /* plain */");
        assert_eq!(lexed.doc_comments.len(), 1);
        assert!(lexed.errors.is_empty());
        assert_eq!(lexed.tokens[0].kind, TokenKind::Ident);
    }

    #[test]
    fn test_longest_operator_wins() {
        assert_eq!(
            kinds("$a === $b ?? $c"),
            vec![
                TokenKind::Variable,
                TokenKind::EqEqEq,
                TokenKind::Variable,
                TokenKind::Coalesce,
                TokenKind::Variable,
            ]
        );
    }

    #[test]
    fn test_namespaced_name() {
        assert_eq!(
            kinds(r"\A\B"),
            vec![
                TokenKind::Backslash,
                TokenKind::Ident,
                TokenKind::Backslash,
                TokenKind::Ident,
            ]
        );
    }
}
