//! Token definitions for the source grammar (spec.md §6).

use logos::Logos;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*([^*]|\*[^/])*\*/")]
pub enum Token {
    // Keywords
    #[token("const")]
    Const,
    #[token("int")]
    Int,
    #[token("void")]
    Void,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("return")]
    Return,

    // Punctuation
    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,
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
    #[token("=")]
    Assign,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("!")]
    Not,
    #[token("<=")]
    Leq,
    #[token(">=")]
    Geq,
    #[token("==")]
    EqEq,
    #[token("!=")]
    Ne,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,

    // Literals and identifiers. Order matters: logos picks the longest
    // match and then the earliest-declared variant on a tie, so the
    // more specific numeric forms are listed ahead of plain decimal.
    #[regex(r"0[xX][0-9a-fA-F]+", |lex| i64::from_str_radix(&lex.slice()[2..], 16).ok())]
    HexLit(i64),
    #[regex(r"0[0-7]+", |lex| i64::from_str_radix(lex.slice(), 8).ok())]
    OctLit(i64),
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    DecLit(i64),
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

impl Token {
    /// A human-readable name for diagnostics ("expected one of ...").
    pub fn describe(&self) -> String {
        match self {
            Token::Const => "`const`".into(),
            Token::Int => "`int`".into(),
            Token::Void => "`void`".into(),
            Token::If => "`if`".into(),
            Token::Else => "`else`".into(),
            Token::While => "`while`".into(),
            Token::Break => "`break`".into(),
            Token::Continue => "`continue`".into(),
            Token::Return => "`return`".into(),
            Token::Semicolon => "`;`".into(),
            Token::Comma => "`,`".into(),
            Token::Plus => "`+`".into(),
            Token::Minus => "`-`".into(),
            Token::Star => "`*`".into(),
            Token::Slash => "`/`".into(),
            Token::Percent => "`%`".into(),
            Token::Assign => "`=`".into(),
            Token::LParen => "`(`".into(),
            Token::RParen => "`)`".into(),
            Token::LBracket => "`[`".into(),
            Token::RBracket => "`]`".into(),
            Token::LBrace => "`{`".into(),
            Token::RBrace => "`}`".into(),
            Token::Not => "`!`".into(),
            Token::Leq => "`<=`".into(),
            Token::Geq => "`>=`".into(),
            Token::EqEq => "`==`".into(),
            Token::Ne => "`!=`".into(),
            Token::Lt => "`<`".into(),
            Token::Gt => "`>`".into(),
            Token::AndAnd => "`&&`".into(),
            Token::OrOr => "`||`".into(),
            Token::HexLit(_) | Token::OctLit(_) | Token::DecLit(_) => "a number literal".into(),
            Token::Ident(name) => format!("identifier `{name}`"),
        }
    }
}
