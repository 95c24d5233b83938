//! A hand-written recursive-descent parser, grounded on
//! `original_source/parser/parser.cpp`'s precedence climbing for the
//! expression grammar and its statement/item dispatch.
//!
//! Unlike the teacher crate (which reaches for `lalrpop` — dropped, see
//! DESIGN.md), the source grammar here is small and entirely LL(2): every
//! nonterminal can be chosen by looking at the current token and, for the
//! declaration/function-definition ambiguity, one token of extra
//! lookahead.

use crate::ast::*;
use crate::error::{CompileError, Result};
use crate::lexer::Token;
use crate::support::Interner;

pub fn parse(tokens: Vec<(Token, Span)>, interner: &mut Interner) -> Result<CompUnit> {
    let mut parser = Parser { tokens, pos: 0, interner };
    parser.parse_comp_unit()
}

struct Parser<'a> {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    interner: &'a mut Interner,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, off: usize) -> Option<&Token> {
        self.tokens.get(self.pos + off).map(|(t, _)| t)
    }

    fn cur_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|(_, s)| *s)
            .unwrap_or_else(|| self.tokens.last().map(|(_, s)| *s).unwrap_or(Span::new(0, 0)))
    }

    fn bump(&mut self) -> (Token, Span) {
        let pair = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        pair
    }

    fn expected_but_found(&self, expected: &str) -> CompileError {
        let found = self
            .peek()
            .map(|t| t.describe())
            .unwrap_or_else(|| "end of input".into());
        CompileError::parse(format!("expected {expected}, found {found}"), self.cur_span())
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == Some(tok) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Token) -> Result<Span> {
        if self.peek() == Some(&tok) {
            Ok(self.bump().1)
        } else {
            Err(self.expected_but_found(&tok.describe()))
        }
    }

    fn expect_ident(&mut self) -> Result<(Symbol, Span)> {
        match self.peek() {
            Some(Token::Ident(_)) => {
                let (tok, span) = self.bump();
                let Token::Ident(name) = tok else { unreachable!() };
                Ok((self.interner.intern(&name), span))
            }
            _ => Err(self.expected_but_found("an identifier")),
        }
    }

    // ---- top level ----------------------------------------------------

    fn parse_comp_unit(&mut self) -> Result<CompUnit> {
        let mut items = Vec::new();
        while self.peek().is_some() {
            items.push(self.parse_item()?);
        }
        Ok(CompUnit { items })
    }

    fn parse_item(&mut self) -> Result<Item> {
        match self.peek() {
            Some(Token::Const) => Ok(Item::Decl(self.parse_decl(true)?)),
            Some(Token::Void) => Ok(Item::Func(self.parse_func_def(true)?)),
            Some(Token::Int) => {
                // `int` Ident `(` is a function definition; anything else
                // starting with `int` is a variable/array declaration.
                if matches!(self.peek_at(1), Some(Token::Ident(_)))
                    && matches!(self.peek_at(2), Some(Token::LParen))
                {
                    Ok(Item::Func(self.parse_func_def(false)?))
                } else {
                    Ok(Item::Decl(self.parse_decl(false)?))
                }
            }
            _ => Err(self.expected_but_found("a declaration or function definition")),
        }
    }

    // ---- declarations ---------------------------------------------------

    fn parse_decl(&mut self, is_const: bool) -> Result<Decl> {
        let start = self.cur_span();
        if is_const {
            self.expect(Token::Const)?;
        }
        self.expect(Token::Int)?;

        let mut bindings = vec![self.parse_decl_binding(is_const)?];
        while self.eat(&Token::Comma) {
            bindings.push(self.parse_decl_binding(is_const)?);
        }
        let end = self.expect(Token::Semicolon)?;
        Ok(Decl { is_const, bindings, span: start.join(end) })
    }

    fn parse_decl_binding(&mut self, is_const: bool) -> Result<DeclBinding> {
        let (name, name_span) = self.expect_ident()?;
        let mut dims = Vec::new();
        while self.eat(&Token::LBracket) {
            dims.push(self.parse_add_expr()?);
            self.expect(Token::RBracket)?;
        }

        let init = if self.eat(&Token::Assign) {
            Some(self.parse_init()?)
        } else {
            if is_const {
                return Err(CompileError::parse(
                    "a `const` declaration requires an initializer",
                    name_span,
                ));
            }
            None
        };

        Ok(DeclBinding { name, name_span, dims, init })
    }

    fn parse_init(&mut self) -> Result<Init> {
        if self.peek() == Some(&Token::LBrace) {
            let start = self.expect(Token::LBrace)?;
            let mut elems = Vec::new();
            if self.peek() != Some(&Token::RBrace) {
                elems.push(self.parse_init()?);
                while self.eat(&Token::Comma) {
                    elems.push(self.parse_init()?);
                }
            }
            let end = self.expect(Token::RBrace)?;
            Ok(Init::List(elems, start.join(end)))
        } else {
            Ok(Init::Expr(self.parse_expr()?))
        }
    }

    // ---- function definitions -------------------------------------------

    fn parse_func_def(&mut self, ret_void: bool) -> Result<FuncDef> {
        let start = self.cur_span();
        self.bump(); // `void` or `int`
        let (name, name_span) = self.expect_ident()?;
        self.expect(Token::LParen)?;

        let mut params = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            params.push(self.parse_param()?);
            while self.eat(&Token::Comma) {
                params.push(self.parse_param()?);
            }
        }
        self.expect(Token::RParen)?;

        let body = self.parse_block()?;
        let span = start.join(body.span);
        Ok(FuncDef { ret_void, name, name_span, params, body, span })
    }

    fn parse_param(&mut self) -> Result<Param> {
        self.expect(Token::Int)?;
        let (name, name_span) = self.expect_ident()?;

        let mut is_array = false;
        let mut dims = Vec::new();
        if self.eat(&Token::LBracket) {
            is_array = true;
            self.expect(Token::RBracket)?;
            while self.eat(&Token::LBracket) {
                dims.push(self.parse_add_expr()?);
                self.expect(Token::RBracket)?;
            }
        }
        Ok(Param { name, name_span, is_array, dims })
    }

    // ---- statements -----------------------------------------------------

    fn parse_block(&mut self) -> Result<Block> {
        let start = self.expect(Token::LBrace)?;
        let mut stmts = Vec::new();
        while self.peek() != Some(&Token::RBrace) {
            stmts.push(self.parse_block_item()?);
        }
        let end = self.expect(Token::RBrace)?;
        Ok(Block { stmts, span: start.join(end) })
    }

    fn parse_block_item(&mut self) -> Result<Stmt> {
        match self.peek() {
            Some(Token::Const) => Ok(Stmt::Decl(self.parse_decl(true)?)),
            Some(Token::Int) => Ok(Stmt::Decl(self.parse_decl(false)?)),
            _ => self.parse_stmt(),
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        match self.peek() {
            Some(Token::LBrace) => Ok(Stmt::Block(self.parse_block()?)),
            Some(Token::If) => self.parse_if_stmt(),
            Some(Token::While) => self.parse_while_stmt(),
            Some(Token::Break) => {
                let span = self.expect(Token::Break)?;
                let end = self.expect(Token::Semicolon)?;
                Ok(Stmt::Break(span.join(end)))
            }
            Some(Token::Continue) => {
                let span = self.expect(Token::Continue)?;
                let end = self.expect(Token::Semicolon)?;
                Ok(Stmt::Continue(span.join(end)))
            }
            Some(Token::Return) => {
                let start = self.expect(Token::Return)?;
                let value = if self.peek() == Some(&Token::Semicolon) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                let end = self.expect(Token::Semicolon)?;
                Ok(Stmt::Return { value, span: start.join(end) })
            }
            Some(Token::Semicolon) => {
                let span = self.expect(Token::Semicolon)?;
                Ok(Stmt::Empty(span))
            }
            _ => self.parse_expr_or_assign_stmt(),
        }
    }

    fn parse_if_stmt(&mut self) -> Result<Stmt> {
        let start = self.expect(Token::If)?;
        self.expect(Token::LParen)?;
        let cond = self.parse_cond()?;
        self.expect(Token::RParen)?;
        let then_blk = self.parse_stmt_into_block()?;

        if self.eat(&Token::Else) {
            let else_blk = self.parse_stmt_into_block()?;
            let span = start.join(else_blk.span);
            Ok(Stmt::If { cond, then_blk, else_blk: Some(else_blk), span })
        } else {
            let span = start.join(then_blk.span);
            Ok(Stmt::If { cond, then_blk, else_blk: None, span })
        }
    }

    fn parse_while_stmt(&mut self) -> Result<Stmt> {
        let start = self.expect(Token::While)?;
        self.expect(Token::LParen)?;
        let cond = self.parse_cond()?;
        self.expect(Token::RParen)?;
        let body = self.parse_stmt_into_block()?;
        let span = start.join(body.span);
        Ok(Stmt::While { cond, body, span })
    }

    /// A bare (non-block) statement gets wrapped in a single-statement
    /// block so `if`/`while` bodies always translate the same way,
    /// matching `parse_stmt_into_block` in the original parser.
    fn parse_stmt_into_block(&mut self) -> Result<Block> {
        if self.peek() == Some(&Token::LBrace) {
            return self.parse_block();
        }
        let stmt = self.parse_stmt()?;
        let span = stmt.span();
        Ok(Block { stmts: vec![stmt], span })
    }

    fn parse_expr_or_assign_stmt(&mut self) -> Result<Stmt> {
        let start = self.cur_span();
        let expr = self.parse_expr()?;
        if self.eat(&Token::Assign) {
            let lval = expr_into_lvalue(expr, start)?;
            let rhs = self.parse_expr()?;
            let end = self.expect(Token::Semicolon)?;
            Ok(Stmt::Assign { lval, rhs, span: start.join(end) })
        } else {
            self.expect(Token::Semicolon)?;
            Ok(Stmt::Expr(expr))
        }
    }

    // ---- conditions -----------------------------------------------------

    fn parse_cond(&mut self) -> Result<Cond> {
        self.parse_lor_cond()
    }

    fn parse_lor_cond(&mut self) -> Result<Cond> {
        let mut lhs = self.parse_land_cond()?;
        while self.peek() == Some(&Token::OrOr) {
            let span = self.bump().1;
            let rhs = self.parse_land_cond()?;
            let joined = lhs.span().join(rhs.span()).join(span);
            lhs = Cond::Binary(LogicalOp::Or, Box::new(lhs), Box::new(rhs), joined);
        }
        Ok(lhs)
    }

    fn parse_land_cond(&mut self) -> Result<Cond> {
        let mut lhs = self.parse_eq_cond()?;
        while self.peek() == Some(&Token::AndAnd) {
            let span = self.bump().1;
            let rhs = self.parse_eq_cond()?;
            let joined = lhs.span().join(rhs.span()).join(span);
            lhs = Cond::Binary(LogicalOp::And, Box::new(lhs), Box::new(rhs), joined);
        }
        Ok(lhs)
    }

    fn parse_eq_cond(&mut self) -> Result<Cond> {
        let mut lhs = self.parse_rel_cond()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => LogicalOp::Eq,
                Some(Token::Ne) => LogicalOp::Ne,
                _ => break,
            };
            let span = self.bump().1;
            let rhs = self.parse_rel_cond()?;
            let joined = lhs.span().join(rhs.span()).join(span);
            lhs = Cond::Binary(op, Box::new(lhs), Box::new(rhs), joined);
        }
        Ok(lhs)
    }

    fn parse_rel_cond(&mut self) -> Result<Cond> {
        let lhs_expr = self.parse_add_expr()?;
        let op = match self.peek() {
            Some(Token::Lt) => Some(LogicalOp::Lt),
            Some(Token::Gt) => Some(LogicalOp::Gt),
            Some(Token::Leq) => Some(LogicalOp::Leq),
            Some(Token::Geq) => Some(LogicalOp::Geq),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(Cond::Expr(self.parse_expr_with_primary(lhs_expr)?));
        };
        self.bump();
        let rhs_expr = self.parse_add_expr()?;
        let rhs_expr = self.parse_expr_with_primary(rhs_expr)?;
        let lhs_expr = self.finish_add_expr(lhs_expr)?;
        let span = lhs_expr.span().join(rhs_expr.span());
        Ok(Cond::Binary(op, Box::new(Cond::Expr(lhs_expr)), Box::new(Cond::Expr(rhs_expr)), span))
    }

    // ---- expressions ------------------------------------------------------
    //
    // `parse_expr` only ever needs addition-tier precedence (the source
    // grammar's `Cond` is a distinct nonterminal), so there is a single
    // climb: UnaryExpr -> MulExp -> AddExp -> Exp.

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_add_expr()
    }

    /// Continue climbing from an already-parsed add-tier expression — used
    /// by `parse_rel_cond`, which must parse one `AddExp` before it knows
    /// whether a relational operator follows.
    fn parse_expr_with_primary(&mut self, expr: Expr) -> Result<Expr> {
        self.finish_add_expr(expr)
    }

    fn parse_add_expr(&mut self) -> Result<Expr> {
        let lhs = self.parse_mul_expr()?;
        self.finish_add_expr(lhs)
    }

    fn finish_add_expr(&mut self, mut lhs: Expr) -> Result<Expr> {
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            let opspan = self.bump().1;
            let rhs = self.parse_mul_expr()?;
            let span = lhs.span().join(rhs.span()).join(opspan);
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs), span);
        }
        Ok(lhs)
    }

    fn parse_mul_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary_expr()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            let opspan = self.bump().1;
            let rhs = self.parse_unary_expr()?;
            let span = lhs.span().join(rhs.span()).join(opspan);
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs), span);
        }
        Ok(lhs)
    }

    fn parse_unary_expr(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Some(Token::Plus) => Some(UnOp::Pos),
            Some(Token::Minus) => Some(UnOp::Neg),
            Some(Token::Not) => Some(UnOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            let start = self.bump().1;
            let inner = self.parse_unary_expr()?;
            let span = start.join(inner.span());
            return Ok(Expr::Unary(op, Box::new(inner), span));
        }
        self.parse_primary_expr()
    }

    fn parse_primary_expr(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::LParen) => {
                self.bump();
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::DecLit(_)) | Some(Token::OctLit(_)) | Some(Token::HexLit(_)) => {
                let (tok, span) = self.bump();
                let value = match tok {
                    Token::DecLit(v) | Token::OctLit(v) | Token::HexLit(v) => v,
                    _ => unreachable!(),
                };
                Ok(Expr::Literal(value, span))
            }
            Some(Token::Ident(_)) => self.parse_lval_or_call_expr(),
            _ => Err(self.expected_but_found("an expression")),
        }
    }

    fn parse_lval_or_call_expr(&mut self) -> Result<Expr> {
        let (name, name_span) = self.expect_ident()?;
        if self.peek() == Some(&Token::LParen) {
            self.bump();
            let mut args = Vec::new();
            if self.peek() != Some(&Token::RParen) {
                args.push(self.parse_expr()?);
                while self.eat(&Token::Comma) {
                    args.push(self.parse_expr()?);
                }
            }
            let end = self.expect(Token::RParen)?;
            Ok(Expr::Call { name, name_span, args, span: name_span.join(end) })
        } else {
            let mut indices = Vec::new();
            while self.eat(&Token::LBracket) {
                indices.push(self.parse_expr()?);
                self.expect(Token::RBracket)?;
            }
            let span = indices.last().map(|e| name_span.join(e.span())).unwrap_or(name_span);
            Ok(Expr::LValue(LValue { name, indices, span }))
        }
    }
}

/// An assignment's LHS must already have parsed as a plain lvalue
/// (`parse_expr_or_assign_stmt` only learns it is an assignment after
/// seeing `=`, by which point the grammar's `Exp` nonterminal has already
/// been parsed) — reject anything else as a parse error rather than a
/// panic, since a malformed program (`1 = 2;`) can reach here.
fn expr_into_lvalue(expr: Expr, span: Span) -> Result<LValue> {
    match expr {
        Expr::LValue(l) => Ok(l),
        _ => Err(CompileError::parse("the left-hand side of an assignment must be a variable", span)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_src(src: &str) -> Result<CompUnit> {
        let mut interner = Interner::new();
        let tokens = tokenize(src).unwrap();
        parse(tokens, &mut interner)
    }

    #[test]
    fn parses_a_minimal_function() {
        let unit = parse_src("int main() { return 0; }").unwrap();
        assert_eq!(unit.items.len(), 1);
        assert!(matches!(unit.items[0], Item::Func(_)));
    }

    #[test]
    fn parses_nested_array_declaration() {
        let unit = parse_src("int a[2][3] = {{1, 2, 3}, {4, 5, 6}};").unwrap();
        assert_eq!(unit.items.len(), 1);
    }

    #[test]
    fn parses_if_else_and_while() {
        let unit = parse_src(
            "int main() { int i; while (i < 10) { if (i == 5) break; else i = i + 1; } return i; }",
        )
        .unwrap();
        assert_eq!(unit.items.len(), 1);
    }

    #[test]
    fn dangling_else_binds_to_the_nearest_if() {
        let unit =
            parse_src("int main() { if (1) if (0) return 1; else return 2; return 3; }").unwrap();
        let Item::Func(f) = &unit.items[0] else { panic!() };
        match &f.body.stmts[0] {
            Stmt::If { else_blk, .. } => assert!(else_blk.is_none()),
            _ => panic!("expected an outer if with no else"),
        }
    }

    #[test]
    fn rejects_assignment_to_a_non_lvalue() {
        assert!(parse_src("int main() { 1 = 2; return 0; }").is_err());
    }
}
