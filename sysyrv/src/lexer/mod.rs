//! The lexer driver: wraps the [`logos`]-generated [`token::Token`] with
//! byte-offset span tracking and converts scan failures into
//! [`CompileError::Lex`].
//!
//! `original_source/lexer/lexer.h` drives its hand-rolled scanner
//! character by character and stashes the whole token vector on the
//! `Lexer` object before parsing begins; `logos` already gives us that
//! scanner, so this module is reduced to the one thing logos doesn't do
//! for free: turning a scan error at a byte offset into a diagnosable
//! [`CompileError`].

pub mod token;

pub use token::Token;

use crate::ast::Span;
use crate::error::{CompileError, Result};
use logos::Logos;

/// Scan the whole source text up front, matching
/// `original_source/lexer/lexer.h`'s `lex_all` — the parser never drives
/// the scanner incrementally, so there is no benefit to streaming it.
pub fn tokenize(source: &str) -> Result<Vec<(Token, Span)>> {
    let mut out = Vec::new();
    let mut lexer = Token::lexer(source);
    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(tok) => out.push((tok, Span::new(span.start, span.end))),
            Err(()) => {
                return Err(CompileError::lex(
                    format!("unexpected character `{}`", &source[span.clone()]),
                    Span::new(span.start, span.end),
                ));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_a_function_signature() {
        let tokens = tokenize("int main() { return 0; }").unwrap();
        let kinds: Vec<_> = tokens.iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                Token::Int,
                Token::Ident("main".into()),
                Token::LParen,
                Token::RParen,
                Token::LBrace,
                Token::Return,
                Token::DecLit(0),
                Token::Semicolon,
                Token::RBrace,
            ]
        );
    }

    #[test]
    fn rejects_an_unknown_character() {
        assert!(tokenize("int x = 1 @ 2;").is_err());
    }

    #[test]
    fn skips_comments_and_whitespace() {
        let tokens = tokenize("// a line comment\nint /* inline */ x;").unwrap();
        let kinds: Vec<_> = tokens.iter().map(|(t, _)| t.clone()).collect();
        assert_eq!(kinds, vec![Token::Int, Token::Ident("x".into()), Token::Semicolon]);
    }
}
