//! HIR constant folding (SPEC_FULL.md §4.1 / spec.md §4.1).
//!
//! Ported statement-for-statement from `original_source/hir/consteval.cpp`.
//! The C++ version mutates nodes in place and signals "no replacement"
//! with a null return; here every `const_eval_*` function takes the node
//! by value and always returns the (possibly simplified, possibly
//! unchanged) replacement, which reads the same but needs no sentinel.
//!
//! Division and modulo by a literal zero are deliberately left unfolded —
//! that is a runtime trap in the source language, not a compile error.

use super::{HirBinaryOp, HirCond, HirExpr, HirLogicalOp, HirShortcutOp, HirStmt, HirUnaryOp, Literal};

pub fn const_eval_block(stmts: &mut Vec<HirStmt>) {
    let taken = std::mem::take(stmts);
    *stmts = taken.into_iter().map(const_eval_stmt).collect();
}

fn is_literal(e: &HirExpr) -> bool {
    matches!(e, HirExpr::Literal(_))
}

fn get_literal(e: &HirExpr) -> Literal {
    match e {
        HirExpr::Literal(v) => *v,
        _ => panic!("get_literal on a non-literal HirExpr"),
    }
}

/// Try to fold `+ value` into `expr` in place (an address offset or a
/// literal absorbs it directly; `Add`/`Sub` recurse into whichever side
/// can absorb it). Returns whether the fold happened.
fn const_add(expr: &mut HirExpr, value: Literal) -> bool {
    match expr {
        HirExpr::GlobalAddr { off, .. } => {
            *off += value;
            true
        }
        HirExpr::LocalAddr { off, .. } => {
            *off += value;
            true
        }
        HirExpr::Literal(lit) => {
            *lit += value;
            true
        }
        HirExpr::Unary { op: HirUnaryOp::Neg, expr: inner } => const_add(inner, -value),
        HirExpr::Binary { op: HirBinaryOp::Add, lhs, rhs } => {
            const_add(lhs, value) || const_add(rhs, value)
        }
        HirExpr::Binary { op: HirBinaryOp::Sub, lhs, rhs } => {
            const_add(lhs, value) || const_add(rhs, -value)
        }
        _ => false,
    }
}

/// Try to fold `* value` into `expr` in place.
fn const_mul(expr: &mut HirExpr, value: Literal) -> bool {
    match expr {
        HirExpr::Literal(lit) => {
            *lit *= value;
            true
        }
        HirExpr::Unary { op: HirUnaryOp::Neg, expr: inner } => const_mul(inner, value),
        HirExpr::Binary { op: HirBinaryOp::Mul, lhs, rhs } => {
            const_mul(lhs, value) || const_mul(rhs, value)
        }
        _ => false,
    }
}

pub fn const_eval_expr(expr: HirExpr) -> HirExpr {
    match expr {
        HirExpr::Unary { op, expr: inner } => {
            let inner = const_eval_expr(*inner);
            if !is_literal(&inner) || op == HirUnaryOp::Load {
                return HirExpr::Unary { op, expr: Box::new(inner) };
            }
            let value = get_literal(&inner);
            let folded = match op {
                HirUnaryOp::Not => (value == 0) as Literal,
                HirUnaryOp::Neg => -value,
                HirUnaryOp::Load => unreachable!(),
            };
            HirExpr::Literal(folded)
        }
        HirExpr::Binary { op, lhs, rhs } => const_eval_binary(op, *lhs, *rhs),
        HirExpr::Call { name, args } => HirExpr::Call {
            name,
            args: args.into_iter().map(const_eval_expr).collect(),
        },
        other => other,
    }
}

fn const_eval_binary(mut op: HirBinaryOp, lhs: HirExpr, rhs: HirExpr) -> HirExpr {
    let mut lhs = const_eval_expr(lhs);
    let mut rhs = const_eval_expr(rhs);

    if is_literal(&lhs) && is_literal(&rhs) {
        let l = get_literal(&lhs);
        let r = get_literal(&rhs);
        let folded = match op {
            HirBinaryOp::Add => Some(l.wrapping_add(r)),
            HirBinaryOp::Sub => Some(l.wrapping_sub(r)),
            HirBinaryOp::Mul => Some(l.wrapping_mul(r)),
            HirBinaryOp::Div => (r != 0).then(|| l / r),
            HirBinaryOp::Mod => (r != 0).then(|| l % r),
            HirBinaryOp::Lt => Some((l < r) as Literal),
            HirBinaryOp::Gt => Some((l > r) as Literal),
            HirBinaryOp::Leq => Some((l <= r) as Literal),
            HirBinaryOp::Geq => Some((l >= r) as Literal),
            HirBinaryOp::Eq => Some((l == r) as Literal),
            HirBinaryOp::Ne => Some((l != r) as Literal),
        };
        if let Some(v) = folded {
            return HirExpr::Literal(v);
        }
        return HirExpr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
    }

    // Normalize comparisons down to `Lt`, absorbing the +-1 into whichever
    // side can take it so the sign flip stays exact.
    match op {
        HirBinaryOp::Leq => {
            if !const_add(&mut rhs, 1) && !const_add(&mut lhs, -1) {
                return HirExpr::Unary {
                    op: HirUnaryOp::Not,
                    expr: Box::new(HirExpr::Binary {
                        op: HirBinaryOp::Lt,
                        lhs: Box::new(rhs),
                        rhs: Box::new(lhs),
                    }),
                };
            }
            op = HirBinaryOp::Lt;
        }
        HirBinaryOp::Geq => {
            if !const_add(&mut lhs, 1) && !const_add(&mut rhs, -1) {
                return HirExpr::Unary {
                    op: HirUnaryOp::Not,
                    expr: Box::new(HirExpr::Binary {
                        op: HirBinaryOp::Lt,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    }),
                };
            }
            std::mem::swap(&mut lhs, &mut rhs);
            op = HirBinaryOp::Lt;
        }
        HirBinaryOp::Gt => {
            std::mem::swap(&mut lhs, &mut rhs);
            op = HirBinaryOp::Lt;
        }
        _ => {}
    }

    if op == HirBinaryOp::Lt {
        if is_literal(&rhs) {
            let literal = get_literal(&rhs);
            if !(-2048..=2047).contains(&literal) && const_add(&mut lhs, -literal) {
                rhs = HirExpr::Literal(0);
            }
        } else if is_literal(&lhs) {
            let literal = get_literal(&lhs);
            if const_add(&mut rhs, -literal) {
                lhs = HirExpr::Literal(0);
            }
        }
        return HirExpr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
    }

    // Past this point only Add/Sub/Mul/Div/Mod/Eq/Ne remain. Put any
    // literal on the right so the single-literal cases below only need
    // to check one side.
    if is_literal(&lhs) {
        match op {
            HirBinaryOp::Add | HirBinaryOp::Mul | HirBinaryOp::Eq | HirBinaryOp::Ne => {
                std::mem::swap(&mut lhs, &mut rhs);
            }
            // `Sub`/`Div`/`Mod` aren't commutative: a literal numerator
            // (e.g. `5 - x`) just stays on the left.
            HirBinaryOp::Sub | HirBinaryOp::Div | HirBinaryOp::Mod => {}
            _ => unreachable!(),
        }
    }

    if is_literal(&rhs) {
        let val = get_literal(&rhs);
        match op {
            HirBinaryOp::Add => {
                if val == 0 || const_add(&mut lhs, val) {
                    return lhs;
                }
            }
            HirBinaryOp::Sub => {
                if val == 0 || const_add(&mut lhs, -val) {
                    return lhs;
                }
            }
            HirBinaryOp::Mul => {
                if val == 0 {
                    return HirExpr::Literal(0);
                }
                if val == 1 || const_mul(&mut lhs, val) {
                    return lhs;
                }
            }
            HirBinaryOp::Div => {
                if val == 1 {
                    return lhs;
                }
            }
            HirBinaryOp::Mod => {
                if val == 1 {
                    return HirExpr::Literal(0);
                }
            }
            HirBinaryOp::Eq | HirBinaryOp::Ne => {
                if val == 0 {
                    return HirExpr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
                }
                if const_add(&mut lhs, -val) {
                    return HirExpr::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(HirExpr::Literal(0)),
                    };
                }
            }
            _ => unreachable!(),
        }
    }

    if op == HirBinaryOp::Eq || op == HirBinaryOp::Ne {
        lhs = HirExpr::Binary { op: HirBinaryOp::Sub, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        rhs = HirExpr::Literal(0);
    }

    HirExpr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
}

fn is_literal_cond(c: &HirCond) -> bool {
    matches!(c, HirCond::True | HirCond::False)
}

fn get_literal_cond(c: &HirCond) -> bool {
    match c {
        HirCond::True => true,
        HirCond::False => false,
        _ => panic!("get_literal_cond on a non-literal HirCond"),
    }
}

pub fn const_eval_cond(cond: HirCond) -> HirCond {
    match cond {
        HirCond::Binary { op, lhs, rhs } => const_eval_binary_cond(op, *lhs, *rhs),
        HirCond::Shortcut { op, lhs, rhs } => const_eval_shortcut(op, *lhs, *rhs),
        other => other,
    }
}

fn const_eval_binary_cond(op: HirLogicalOp, lhs: HirExpr, rhs: HirExpr) -> HirCond {
    let mut lhs = const_eval_expr(lhs);
    let mut rhs = const_eval_expr(rhs);

    if is_literal(&lhs) && is_literal(&rhs) {
        let l = get_literal(&lhs);
        let r = get_literal(&rhs);
        let truth = match op {
            HirLogicalOp::Lt => l < r,
            HirLogicalOp::Gt => l > r,
            HirLogicalOp::Leq => l <= r,
            HirLogicalOp::Geq => l >= r,
            HirLogicalOp::Eq => l == r,
            HirLogicalOp::Ne => l != r,
        };
        return if truth { HirCond::True } else { HirCond::False };
    }

    if is_literal(&lhs) {
        let val = get_literal(&lhs);
        if val != 0 && const_add(&mut rhs, -val) {
            lhs = HirExpr::Literal(0);
            return HirCond::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        if val != 0 && (-2047..=2048).contains(&val) {
            rhs = HirExpr::Binary {
                op: HirBinaryOp::Add,
                lhs: Box::new(rhs),
                rhs: Box::new(HirExpr::Literal(-val)),
            };
            lhs = HirExpr::Literal(0);
        }
    } else if is_literal(&rhs) {
        let val = get_literal(&rhs);
        if val != 0 && const_add(&mut lhs, -val) {
            rhs = HirExpr::Literal(0);
            return HirCond::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        if val != 0 && (-2047..=2048).contains(&val) {
            lhs = HirExpr::Binary {
                op: HirBinaryOp::Add,
                lhs: Box::new(lhs),
                rhs: Box::new(HirExpr::Literal(-val)),
            };
            rhs = HirExpr::Literal(0);
        }
    }

    HirCond::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
}

fn const_eval_shortcut(op: HirShortcutOp, lhs: HirCond, rhs: HirCond) -> HirCond {
    let lhs = const_eval_cond(lhs);
    let rhs = const_eval_cond(rhs);

    if !is_literal_cond(&lhs) {
        return HirCond::Shortcut { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
    }
    let val = get_literal_cond(&lhs);
    match op {
        HirShortcutOp::Or => {
            if val {
                HirCond::True
            } else {
                rhs
            }
        }
        HirShortcutOp::And => {
            if val {
                rhs
            } else {
                HirCond::False
            }
        }
    }
}

fn const_eval_stmts(stmts: Vec<HirStmt>) -> Vec<HirStmt> {
    stmts.into_iter().map(const_eval_stmt).collect()
}

pub fn const_eval_stmt(stmt: HirStmt) -> HirStmt {
    match stmt {
        HirStmt::Store { addr, val } => HirStmt::Store {
            addr: const_eval_expr(addr),
            val: const_eval_expr(val),
        },
        HirStmt::Return { expr } => HirStmt::Return { expr: expr.map(const_eval_expr) },
        HirStmt::Block(stmts) => HirStmt::Block(const_eval_stmts(stmts)),
        HirStmt::If { cond, then_blk } => HirStmt::If {
            cond: const_eval_cond(cond),
            then_blk: const_eval_stmts(then_blk),
        },
        HirStmt::IfElse { cond, then_blk, else_blk } => HirStmt::IfElse {
            cond: const_eval_cond(cond),
            then_blk: const_eval_stmts(then_blk),
            else_blk: const_eval_stmts(else_blk),
        },
        HirStmt::While { cond, body } => HirStmt::While {
            cond: const_eval_cond(cond),
            body: const_eval_stmts(body),
        },
        HirStmt::Expr(e) => HirStmt::Expr(const_eval_expr(e)),
        HirStmt::Assign { lhs, rhs } => HirStmt::Assign { lhs, rhs: const_eval_expr(rhs) },
        HirStmt::Continue => HirStmt::Continue,
        HirStmt::Break => HirStmt::Break,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(v: Literal) -> HirExpr {
        HirExpr::Literal(v)
    }

    #[test]
    fn folds_pure_literal_arithmetic() {
        let expr = HirExpr::Binary {
            op: HirBinaryOp::Add,
            lhs: Box::new(lit(2)),
            rhs: Box::new(HirExpr::Binary {
                op: HirBinaryOp::Mul,
                lhs: Box::new(lit(3)),
                rhs: Box::new(lit(4)),
            }),
        };
        assert!(matches!(const_eval_expr(expr), HirExpr::Literal(14)));
    }

    #[test]
    fn leaves_division_by_literal_zero_unfolded() {
        let expr = HirExpr::Binary {
            op: HirBinaryOp::Div,
            lhs: Box::new(lit(10)),
            rhs: Box::new(lit(0)),
        };
        match const_eval_expr(expr) {
            HirExpr::Binary { op: HirBinaryOp::Div, .. } => {}
            other => panic!("expected an unfolded Div, got {other:?}"),
        }
    }

    #[test]
    fn drops_add_zero() {
        let expr = HirExpr::Binary {
            op: HirBinaryOp::Add,
            lhs: Box::new(HirExpr::LocalVar { vid: 1 }),
            rhs: Box::new(lit(0)),
        };
        assert!(matches!(const_eval_expr(expr), HirExpr::LocalVar { vid: 1 }));
    }

    #[test]
    fn folds_constant_condition_to_true() {
        let cond = HirCond::Binary {
            op: HirLogicalOp::Lt,
            lhs: Box::new(lit(1)),
            rhs: Box::new(lit(2)),
        };
        assert!(matches!(const_eval_cond(cond), HirCond::True));
    }

    #[test]
    fn or_short_circuits_on_true_literal() {
        let cond = HirCond::Shortcut {
            op: HirShortcutOp::Or,
            lhs: Box::new(HirCond::True),
            rhs: Box::new(HirCond::Binary {
                op: HirLogicalOp::Eq,
                lhs: Box::new(HirExpr::LocalVar { vid: 2 }),
                rhs: Box::new(lit(0)),
            }),
        };
        assert!(matches!(const_eval_cond(cond), HirCond::True));
    }
}
