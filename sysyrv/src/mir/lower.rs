//! HIR to MIR lowering (spec.md §4.2), ported from the statement/
//! expression walk in `original_source/mir/translate.cpp`.
//!
//! Three things make this pass more than a mechanical tree walk:
//!
//! - Addresses. `hir::consteval` folds a compile-time-constant index
//!   straight into a `GlobalAddr`/`LocalAddr`'s own `off`, but a
//!   dynamic index (`a[i]`) survives as a `Binary{Add, ..}` tree.
//!   [`lower_addr`] handles both: it peels off a trailing constant
//!   term and lets the statement's own `off` field carry it, rather
//!   than emitting a separate add.
//! - Conditions. `hir::consteval`'s condition-side folder does *not*
//!   collapse `Gt`/`Leq`/`Geq` down to `Lt` the way the value-side one
//!   does (see its module doc), so all six `HirLogicalOp` variants can
//!   reach [`emit_cond`]. MIR's `Branch` only has four; `Gt`/`Geq`
//!   become a swapped `Lt`/`Leq`.
//! - Short-circuiting. `&&`/`||` are lowered by threading two
//!   targets — "where to go if true" and "where to go if false" —
//!   through the tree, each either a real label or "fall through to
//!   the next instruction" ([`Target`]); this is the classic
//!   jump-threading translation (Appel, *Modern Compiler
//!   Implementation*) and is what lets `if (a && b)` skip evaluating
//!   `b` entirely when `a` is false, without ever materializing a
//!   boolean value for the `&&` itself.

use super::{BinaryOp, FuncBuilder, ImmOp, LogicalOp, MirBuilder, MirLabel, MirLocal, Stmt, UnaryOp, ZERO_LOCAL};
use crate::hir::{
    HirBinaryOp, HirCompUnit, HirCond, HirExpr, HirFuncItem, HirItem, HirLogicalOp, HirShortcutOp, HirStmt,
    HirUnaryOp,
};

pub fn lower_comp_unit(unit: &HirCompUnit) -> super::CompUnit {
    let mut mb = MirBuilder::new();
    for item in &unit.items {
        match item {
            HirItem::Func(f) => mb.add_item(super::Item::Func(lower_func(f))),
            HirItem::Data(d) => mb.add_item(super::Item::Data(super::DataItem {
                name: d.name,
                size: d.size,
                values: d.values.clone(),
            })),
            HirItem::Rodata(r) => mb.add_item(super::Item::Rodata(super::RodataItem {
                name: r.name,
                size: r.size,
                values: r.values.clone(),
            })),
            HirItem::Bss(bs) => mb.add_item(super::Item::Bss(super::BssItem { name: bs.name, size: bs.size })),
        }
    }
    mb.finish()
}

fn lower_func(f: &HirFuncItem) -> super::FuncItem {
    let mut b = FuncBuilder::new(f.name, f.num_args, f.num_locals, f.array_sz, f.array_off.clone());
    for stmt in &f.body {
        lower_stmt(stmt, &mut b);
    }
    // A function whose source body falls off the end without an
    // explicit `return` (legal for a `void` function, and for `int`
    // functions whose last statement is conditional — the source
    // language leaves that value undefined) just runs into the exit
    // label `finish` appends.
    b.finish()
}

fn lower_stmt(stmt: &HirStmt, b: &mut FuncBuilder) {
    match stmt {
        HirStmt::Store { addr, val } => {
            let value = lower_expr(val, b);
            let (address, off) = lower_addr(addr, b);
            b.push(Stmt::Store { value, address, off });
        }
        HirStmt::Return { expr } => {
            let value = expr.as_ref().map(|e| lower_expr(e, b));
            b.push(Stmt::Return { value });
        }
        HirStmt::Block(stmts) => {
            for s in stmts {
                lower_stmt(s, b);
            }
        }
        HirStmt::If { cond, then_blk } => {
            let after = b.new_label();
            emit_cond(cond, Target::Fall, Target::Label(after), b);
            for s in then_blk {
                lower_stmt(s, b);
            }
            b.set_label(after);
        }
        HirStmt::IfElse { cond, then_blk, else_blk } => {
            let else_label = b.new_label();
            let after = b.new_label();
            emit_cond(cond, Target::Fall, Target::Label(else_label), b);
            for s in then_blk {
                lower_stmt(s, b);
            }
            b.push(Stmt::Jump { target: after });
            b.set_label(else_label);
            for s in else_blk {
                lower_stmt(s, b);
            }
            b.set_label(after);
        }
        HirStmt::While { cond, body } => {
            let head = b.new_label();
            let tail = b.new_label();
            b.loop_push(head, tail);
            b.set_label(head);
            emit_cond(cond, Target::Fall, Target::Label(tail), b);
            for s in body {
                lower_stmt(s, b);
            }
            b.push(Stmt::Jump { target: head });
            b.loop_pop();
            b.set_label(tail);
        }
        HirStmt::Expr(e) => {
            lower_expr(e, b);
        }
        HirStmt::Assign { lhs, rhs } => {
            let v = lower_expr(rhs, b);
            b.push(Stmt::Unary { dst: *lhs, src: v, op: UnaryOp::Nop });
        }
        HirStmt::Continue => {
            let head = b.loop_head();
            b.push(Stmt::Jump { target: head });
        }
        HirStmt::Break => {
            let tail = b.loop_tail();
            b.push(Stmt::Jump { target: tail });
        }
    }
}

/// Where control flow should go once a condition's truth value is
/// known. `Fall` costs nothing to reach — it means "the next
/// statement pushed" — so [`emit_cond`] only allocates a label when a
/// branch actually needs one to jump to.
#[derive(Clone, Copy)]
enum Target {
    Fall,
    Label(MirLabel),
}

fn goto(t: Target, b: &mut FuncBuilder) {
    if let Target::Label(l) = t {
        b.push(Stmt::Jump { target: l });
    }
}

/// Turns a `Fall` target into a real label on demand, for the operand
/// of `&&`/`||` that needs to jump past its sibling. Returns whether
/// the label still needs `set_label` once the caller is done emitting
/// around it.
fn reify(t: Target, b: &mut FuncBuilder) -> (MirLabel, bool) {
    match t {
        Target::Label(l) => (l, false),
        Target::Fall => (b.new_label(), true),
    }
}

fn emit_cond(cond: &HirCond, on_true: Target, on_false: Target, b: &mut FuncBuilder) {
    match cond {
        HirCond::True => goto(on_true, b),
        HirCond::False => goto(on_false, b),
        HirCond::Binary { op, lhs, rhs } => {
            let l = lower_expr(lhs, b);
            let r = lower_expr(rhs, b);
            match (on_true, on_false) {
                (Target::Fall, Target::Label(fl)) => {
                    // Branch on the *complement*: fallthrough is the
                    // true path (spec.md §4.2).
                    let (mop, s1, s2) = inverted_logical(*op, l, r);
                    b.push(Stmt::Branch { src1: s1, src2: s2, target: fl, op: mop });
                }
                (Target::Label(tl), Target::Fall) => {
                    let (mop, s1, s2) = direct_logical(*op, l, r);
                    b.push(Stmt::Branch { src1: s1, src2: s2, target: tl, op: mop });
                }
                (Target::Label(tl), Target::Label(fl)) => {
                    let (mop, s1, s2) = direct_logical(*op, l, r);
                    b.push(Stmt::Branch { src1: s1, src2: s2, target: tl, op: mop });
                    b.push(Stmt::Jump { target: fl });
                }
                (Target::Fall, Target::Fall) => {}
            }
        }
        HirCond::Shortcut { op: HirShortcutOp::And, lhs, rhs } => {
            // `a && b`: if `a` is false, skip `b` entirely and go
            // straight to the overall false target.
            let (of_label, of_reified) = reify(on_false, b);
            emit_cond(lhs, Target::Fall, Target::Label(of_label), b);
            emit_cond(rhs, on_true, Target::Label(of_label), b);
            if of_reified {
                b.set_label(of_label);
            }
        }
        HirCond::Shortcut { op: HirShortcutOp::Or, lhs, rhs } => {
            // `a || b`: if `a` is true, skip `b` and go straight to
            // the overall true target.
            let (ot_label, ot_reified) = reify(on_true, b);
            emit_cond(lhs, Target::Label(ot_label), Target::Fall, b);
            emit_cond(rhs, Target::Label(ot_label), on_false, b);
            if ot_reified {
                b.set_label(ot_label);
            }
        }
    }
}

/// `op(l, r)` itself, reduced to one of MIR's four `LogicalOp`s by
/// swapping operands for `Gt`/`Geq` (spec.md §3.3 — `LogicalOp` has
/// no `Gt`/`Geq` of its own).
fn direct_logical(op: HirLogicalOp, l: MirLocal, r: MirLocal) -> (LogicalOp, MirLocal, MirLocal) {
    match op {
        HirLogicalOp::Lt => (LogicalOp::Lt, l, r),
        HirLogicalOp::Gt => (LogicalOp::Lt, r, l),
        HirLogicalOp::Leq => (LogicalOp::Leq, l, r),
        HirLogicalOp::Geq => (LogicalOp::Leq, r, l),
        HirLogicalOp::Eq => (LogicalOp::Eq, l, r),
        HirLogicalOp::Ne => (LogicalOp::Ne, l, r),
    }
}

/// `!op(l, r)`, same reduction. `Lt`/`Leq` and `Eq`/`Ne` are each
/// other's complements (with an operand swap for `Lt`/`Leq`), so this
/// stays within the same four-op set.
fn inverted_logical(op: HirLogicalOp, l: MirLocal, r: MirLocal) -> (LogicalOp, MirLocal, MirLocal) {
    match op {
        HirLogicalOp::Lt => (LogicalOp::Leq, r, l),
        HirLogicalOp::Gt => (LogicalOp::Leq, l, r),
        HirLogicalOp::Leq => (LogicalOp::Lt, r, l),
        HirLogicalOp::Geq => (LogicalOp::Lt, l, r),
        HirLogicalOp::Eq => (LogicalOp::Ne, l, r),
        HirLogicalOp::Ne => (LogicalOp::Eq, l, r),
    }
}

/// Lowers an address-valued expression to a `(base, off)` pair where
/// `base` is a register holding the address of `off = 0`, letting the
/// caller (a `Load`/`Store`, or [`lower_expr`]'s own
/// `GlobalAddr`/`LocalAddr` case) bake a constant displacement into
/// its own `off` field instead of emitting a separate add.
fn lower_addr(expr: &HirExpr, b: &mut FuncBuilder) -> (MirLocal, i32) {
    match expr {
        HirExpr::GlobalAddr { name, off } => {
            let t = b.new_temp();
            b.push(Stmt::SymbolAddr { dst: t, name: *name, off: 0 });
            (t, *off)
        }
        HirExpr::LocalAddr { vid, off } => {
            let t = b.new_temp();
            b.push(Stmt::ArrayAddr { dst: t, array: *vid, off: 0 });
            (t, *off)
        }
        HirExpr::Binary { op: HirBinaryOp::Add, lhs, rhs } => {
            if let HirExpr::Literal(k) = rhs.as_ref() {
                let (base, off) = lower_addr(lhs, b);
                (base, off.wrapping_add(*k))
            } else if let HirExpr::Literal(k) = lhs.as_ref() {
                let (base, off) = lower_addr(rhs, b);
                (base, off.wrapping_add(*k))
            } else {
                (lower_expr(expr, b), 0)
            }
        }
        _ => (lower_expr(expr, b), 0),
    }
}

fn lower_expr(expr: &HirExpr, b: &mut FuncBuilder) -> MirLocal {
    match expr {
        HirExpr::Literal(0) => ZERO_LOCAL,
        HirExpr::Literal(v) => {
            let t = b.new_temp();
            b.push(Stmt::Imm { dst: t, value: *v });
            t
        }
        HirExpr::LocalVar { vid } => *vid,
        HirExpr::GlobalAddr { .. } | HirExpr::LocalAddr { .. } => {
            let (base, off) = lower_addr(expr, b);
            add_off(base, off, b)
        }
        HirExpr::Unary { op: HirUnaryOp::Load, expr: inner } => {
            let (address, off) = lower_addr(inner, b);
            let t = b.new_temp();
            b.push(Stmt::Load { dst: t, address, off });
            t
        }
        HirExpr::Unary { op: HirUnaryOp::Neg, expr: inner } => {
            let v = lower_expr(inner, b);
            let t = b.new_temp();
            b.push(Stmt::Unary { dst: t, src: v, op: UnaryOp::Neg });
            t
        }
        HirExpr::Unary { op: HirUnaryOp::Not, expr: inner } => {
            let v = lower_expr(inner, b);
            let t = b.new_temp();
            b.push(Stmt::Unary { dst: t, src: v, op: UnaryOp::Eqz });
            t
        }
        HirExpr::Binary { op, lhs, rhs } => lower_binary(*op, lhs, rhs, b),
        HirExpr::Call { name, args } => {
            let arg_locals = args.iter().map(|a| lower_expr(a, b)).collect();
            let t = b.new_temp();
            b.push(Stmt::Call { dst: Some(t), name: *name, args: arg_locals });
            t
        }
    }
}

fn add_off(base: MirLocal, off: i32, b: &mut FuncBuilder) -> MirLocal {
    if off == 0 {
        return base;
    }
    if fits_addi(off) {
        let t = b.new_temp();
        b.push(Stmt::BinaryImm { dst: t, src1: base, src2: off, op: ImmOp::Add });
        return t;
    }
    let imm = lower_expr(&HirExpr::Literal(off), b);
    let t = b.new_temp();
    b.push(Stmt::Binary { dst: t, src1: base, src2: imm, op: BinaryOp::Add });
    t
}

fn lower_binary(op: HirBinaryOp, lhs: &HirExpr, rhs: &HirExpr, b: &mut FuncBuilder) -> MirLocal {
    match op {
        HirBinaryOp::Add => lower_commutative_imm(lhs, rhs, b, BinaryOp::Add, ImmOp::Add, fits_addi),
        HirBinaryOp::Sub => lower_sub(lhs, rhs, b),
        HirBinaryOp::Mul => lower_commutative_imm(lhs, rhs, b, BinaryOp::Mul, ImmOp::Mul, is_pow2),
        HirBinaryOp::Div => lower_plain_binary(lhs, rhs, b, BinaryOp::Div),
        HirBinaryOp::Mod => lower_plain_binary(lhs, rhs, b, BinaryOp::Mod),
        HirBinaryOp::Lt => lower_lt(lhs, rhs, b),
        HirBinaryOp::Gt => lower_lt(rhs, lhs, b),
        HirBinaryOp::Leq => lower_not_lt(rhs, lhs, b),
        HirBinaryOp::Geq => lower_not_lt(lhs, rhs, b),
        HirBinaryOp::Eq => lower_eq_ne(lhs, rhs, b, UnaryOp::Eqz),
        HirBinaryOp::Ne => lower_eq_ne(lhs, rhs, b, UnaryOp::Nez),
    }
}

fn lower_plain_binary(lhs: &HirExpr, rhs: &HirExpr, b: &mut FuncBuilder, op: BinaryOp) -> MirLocal {
    let l = lower_expr(lhs, b);
    let r = lower_expr(rhs, b);
    let t = b.new_temp();
    b.push(Stmt::Binary { dst: t, src1: l, src2: r, op });
    t
}

/// `Add`/`Mul` are commutative, so a literal operand on either side
/// can use `BinaryImm` as long as it fits (`fits`: the 12-bit
/// immediate range for `Add`, a power of two for `Mul`'s `slli`).
fn lower_commutative_imm(
    lhs: &HirExpr,
    rhs: &HirExpr,
    b: &mut FuncBuilder,
    op: BinaryOp,
    imm_op: ImmOp,
    fits: fn(i32) -> bool,
) -> MirLocal {
    if let HirExpr::Literal(k) = rhs {
        if fits(*k) {
            let l = lower_expr(lhs, b);
            let t = b.new_temp();
            b.push(Stmt::BinaryImm { dst: t, src1: l, src2: *k, op: imm_op });
            return t;
        }
    }
    if let HirExpr::Literal(k) = lhs {
        if fits(*k) {
            let r = lower_expr(rhs, b);
            let t = b.new_temp();
            b.push(Stmt::BinaryImm { dst: t, src1: r, src2: *k, op: imm_op });
            return t;
        }
    }
    lower_plain_binary(lhs, rhs, b, op)
}

/// `Sub` isn't commutative, so only a literal right-hand side can use
/// `BinaryImm` (there is no `ImmOp::Sub`; `x - k` becomes `x + (-k)`).
fn lower_sub(lhs: &HirExpr, rhs: &HirExpr, b: &mut FuncBuilder) -> MirLocal {
    if let HirExpr::Literal(k) = rhs {
        let neg = k.wrapping_neg();
        if fits_addi(neg) {
            let l = lower_expr(lhs, b);
            let t = b.new_temp();
            b.push(Stmt::BinaryImm { dst: t, src1: l, src2: neg, op: ImmOp::Add });
            return t;
        }
    }
    lower_plain_binary(lhs, rhs, b, BinaryOp::Sub)
}

fn lower_lt(lhs: &HirExpr, rhs: &HirExpr, b: &mut FuncBuilder) -> MirLocal {
    if let HirExpr::Literal(k) = rhs {
        if fits_addi(*k) {
            let l = lower_expr(lhs, b);
            let t = b.new_temp();
            b.push(Stmt::BinaryImm { dst: t, src1: l, src2: *k, op: ImmOp::Lt });
            return t;
        }
    }
    lower_plain_binary(lhs, rhs, b, BinaryOp::Lt)
}

/// `!(lhs < rhs)`, used to synthesize `Leq`/`Geq` as a 0/1 value —
/// MIR's `BinaryOp` only has `Lt`.
fn lower_not_lt(lhs: &HirExpr, rhs: &HirExpr, b: &mut FuncBuilder) -> MirLocal {
    let v = lower_lt(lhs, rhs, b);
    let t = b.new_temp();
    b.push(Stmt::Unary { dst: t, src: v, op: UnaryOp::Eqz });
    t
}

fn lower_eq_ne(lhs: &HirExpr, rhs: &HirExpr, b: &mut FuncBuilder, op: UnaryOp) -> MirLocal {
    let v = if matches!(rhs, HirExpr::Literal(0)) {
        lower_expr(lhs, b)
    } else if matches!(lhs, HirExpr::Literal(0)) {
        lower_expr(rhs, b)
    } else {
        lower_sub(lhs, rhs, b)
    };
    let t = b.new_temp();
    b.push(Stmt::Unary { dst: t, src: v, op });
    t
}

fn fits_addi(k: i32) -> bool {
    (-2048..=2047).contains(&k)
}

fn is_pow2(k: i32) -> bool {
    k > 0 && (k & (k - 1)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::HirFuncItem;
    use crate::support::Interner;

    fn build(body: Vec<HirStmt>, num_args: usize, num_locals: usize) -> super::super::FuncItem {
        let mut interner = Interner::new();
        let f = HirFuncItem {
            name: interner.intern("f"),
            num_args,
            num_locals,
            array_sz: 0,
            array_off: Vec::new(),
            body,
        };
        lower_func(&f)
    }

    #[test]
    fn return_zero_literal_uses_the_zero_register() {
        let func = build(vec![HirStmt::Return { expr: Some(HirExpr::literal(0)) }], 1, 1);
        assert!(matches!(func.stmts[1], Stmt::Return { value: Some(ZERO_LOCAL) }));
    }

    #[test]
    fn small_add_immediate_uses_binary_imm() {
        let func = build(
            vec![HirStmt::Return {
                expr: Some(HirExpr::Binary {
                    op: HirBinaryOp::Add,
                    lhs: Box::new(HirExpr::LocalVar { vid: 1 }),
                    rhs: Box::new(HirExpr::literal(4)),
                }),
            }],
            1,
            2,
        );
        assert!(func.stmts.iter().any(|s| matches!(s, Stmt::BinaryImm { op: ImmOp::Add, src2: 4, .. })));
    }

    #[test]
    fn power_of_two_multiply_uses_a_shift_imm() {
        let func = build(
            vec![HirStmt::Return {
                expr: Some(HirExpr::Binary {
                    op: HirBinaryOp::Mul,
                    lhs: Box::new(HirExpr::LocalVar { vid: 1 }),
                    rhs: Box::new(HirExpr::literal(8)),
                }),
            }],
            1,
            2,
        );
        assert!(func.stmts.iter().any(|s| matches!(s, Stmt::BinaryImm { op: ImmOp::Mul, src2: 8, .. })));
    }

    #[test]
    fn if_without_else_branches_on_the_complement() {
        let func = build(
            vec![
                HirStmt::If {
                    cond: HirCond::Binary {
                        op: HirLogicalOp::Lt,
                        lhs: Box::new(HirExpr::LocalVar { vid: 1 }),
                        rhs: Box::new(HirExpr::LocalVar { vid: 2 }),
                    },
                    then_blk: vec![HirStmt::Assign { lhs: 1, rhs: HirExpr::literal(0) }],
                },
                HirStmt::Return { expr: None },
            ],
            1,
            3,
        );
        // Lt(a, b) fallthrough=true means the branch guards the false
        // path with the complement, Leq(b, a).
        assert!(func.stmts.iter().any(|s| matches!(s, Stmt::Branch { op: LogicalOp::Leq, .. })));
    }

    #[test]
    fn while_loop_forms_a_back_edge_to_its_head() {
        let func = build(
            vec![HirStmt::While {
                cond: HirCond::True,
                body: vec![HirStmt::Break],
            }],
            1,
            1,
        );
        assert!(func.stmts.iter().any(|s| matches!(s, Stmt::Jump { .. })));
    }

    #[test]
    fn short_circuit_and_skips_the_second_operand_when_the_first_is_false() {
        let func = build(
            vec![HirStmt::If {
                cond: HirCond::Shortcut {
                    op: HirShortcutOp::And,
                    lhs: Box::new(HirCond::Binary {
                        op: HirLogicalOp::Lt,
                        lhs: Box::new(HirExpr::LocalVar { vid: 1 }),
                        rhs: Box::new(HirExpr::literal(0)),
                    }),
                    rhs: Box::new(HirCond::Binary {
                        op: HirLogicalOp::Gt,
                        lhs: Box::new(HirExpr::LocalVar { vid: 1 }),
                        rhs: Box::new(HirExpr::literal(10)),
                    }),
                },
                then_blk: vec![HirStmt::Break],
            }],
            1,
            1,
        );
        // Two branches: one guarding each half of the `&&`.
        let branch_count = func.stmts.iter().filter(|s| matches!(s, Stmt::Branch { .. })).count();
        assert_eq!(branch_count, 2);
    }
}
