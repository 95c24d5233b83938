//! Instruction selection (spec.md §4.6): walks a lowered, register-
//! allocated [`mir::FuncItem`] and drives [`AsmBuilder`] to produce one
//! [`super::Line`] per MIR statement (plus whatever spill/reload code
//! [`regalloc::allocate`] asked for around it), ported statement-by-
//! statement from `original_source/mir/codegen.cpp`'s twelve
//! `MirXxxStmt::codegen` overrides and its `MirFuncItem::codegen` driver.
//!
//! `regalloc::spill_loads(i)`/`spill_stores(i)` are spliced in,
//! respectively, immediately before and immediately after statement `i`'s
//! own instructions — see `regalloc.rs`'s module doc for why.

use super::builder::AsmBuilder;
use super::{AsmImm, BinaryImmOp, BinaryOp as AsmBinaryOp, BranchOp, File, IntDirType, LabelSec, MemoryOp, Register, UnaryOp as AsmUnaryOp};
use crate::mir::regalloc::{self, RegAlloc, SpillOp};
use crate::mir::{BinaryOp, CompUnit, FuncItem, ImmOp, Item, LogicalOp, MirArray, Stmt, UnaryOp};

const IMM_MIN: i32 = -2048;
const IMM_MAX: i32 = 2047;

fn fits_imm12(v: i32) -> bool {
    (IMM_MIN..=IMM_MAX).contains(&v)
}

/// Emit every item in a compilation unit, returning the raw (un-
/// relabeled) file plus the total MIR label count `relabel` needs.
pub fn emit_comp_unit(cu: &CompUnit) -> (File, usize) {
    let mut b = AsmBuilder::new();
    let mut num_labels = 0;
    for item in &cu.items {
        match item {
            Item::Func(f) => {
                num_labels += f.labels.len();
                emit_func(&mut b, f);
            }
            Item::Data(d) => emit_values(&mut b, LabelSec::Data, d.name, &d.values, d.size),
            Item::Rodata(d) => emit_values(&mut b, LabelSec::Rodata, d.name, &d.values, d.size),
            Item::Bss(d) => {
                b.mk_global_label(LabelSec::Bss, d.name);
                b.mk_int_directive(IntDirType::Skip, (d.size * 4) as AsmImm);
            }
        }
    }
    (b.finish(), num_labels)
}

fn emit_values(b: &mut AsmBuilder, section: LabelSec, name: crate::support::Symbol, values: &[(u32, i32)], size: u32) {
    b.mk_global_label(section, name);
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by_key(|&(idx, _)| idx);
    let mut pos = 0u32;
    for (idx, val) in sorted {
        if idx > pos {
            b.mk_int_directive(IntDirType::Skip, ((idx - pos) * 4) as AsmImm);
        }
        b.mk_int_directive(IntDirType::Put, val);
        pos = idx + 1;
    }
    if pos < size {
        b.mk_int_directive(IntDirType::Skip, ((size - pos) * 4) as AsmImm);
    }
}

/// The hardware register a function argument (or the return address,
/// local 0) physically arrives in — also reused, unmodified, as the ABI
/// register a call's outgoing argument `i` must land in (spec.md §4.5's
/// `reg_from_arg_id`, mirrored here since `regalloc`'s own copy is
/// private to that module).
fn arg_hw_reg(i: usize) -> Register {
    Register::from_bit(i as u32)
}

fn emit_func(b: &mut AsmBuilder, f: &FuncItem) {
    b.mk_global_label(LabelSec::Text, f.name);
    let ra = regalloc::allocate(f);
    b.alloc_labels(f.labels.len());

    let exit_stmt = f.stmts.len() - 1;
    let exit_label = f.labels.iter().position(|&target| target == exit_stmt).expect("a function body always has an exit label");

    let frame_size = ra.frame_size() as i32;
    emit_sp_adjust(b, -frame_size);

    for rid in 0..ra.num_callee_regs() {
        let reg = Register::from_bit(crate::asm::NR_REG_CALLER + rid);
        b.mk_memory_inst(MemoryOp::Store, reg, Register::Sp, ra.callee_reg_offset(rid) as AsmImm);
    }

    // Move every incoming argument into its allocated register first,
    // then spill any that regalloc decided don't fit — `spill_stores(0)`
    // is keyed at this statement on the same convention as every other
    // def, so it must run after the value actually lands there.
    for i in (0..f.num_args).rev() {
        b.mk_unary_inst(AsmUnaryOp::Mv, ra.reg(0, i), arg_hw_reg(i));
    }
    for op in ra.spill_stores(0) {
        emit_spill_op(b, &ra, op);
    }

    let mut label_at: Vec<Vec<usize>> = vec![Vec::new(); f.stmts.len()];
    for (label, &target) in f.labels.iter().enumerate() {
        label_at[target].push(label);
    }

    for i in 1..exit_stmt {
        for &label in &label_at[i] {
            b.mk_local_label(label);
        }
        for op in ra.spill_loads(i) {
            emit_spill_op(b, &ra, op);
        }
        emit_stmt(b, &ra, i, &f.stmts[i], exit_stmt, exit_label);
        for op in ra.spill_stores(i) {
            emit_spill_op(b, &ra, op);
        }
    }
    for &label in &label_at[exit_stmt] {
        b.mk_local_label(label);
    }

    for rid in (0..ra.num_callee_regs()).rev() {
        let reg = Register::from_bit(crate::asm::NR_REG_CALLER + rid);
        b.mk_memory_inst(MemoryOp::Load, reg, Register::Sp, ra.callee_reg_offset(rid) as AsmImm);
    }

    let return_reg = ra.reg(exit_stmt, 1);
    emit_sp_adjust(b, frame_size);
    b.mk_jump_reg_inst(return_reg);
}

fn emit_sp_adjust(b: &mut AsmBuilder, delta: i32) {
    if delta == 0 {
        return;
    }
    if fits_imm12(delta) {
        b.mk_binary_imm_inst(BinaryImmOp::Add, Register::Sp, Register::Sp, delta);
    } else {
        // T0 is never live across the prologue/epilogue boundary this
        // runs at, so it's always free to clobber here.
        b.mk_load_imm_inst(Register::T0, delta);
        b.mk_binary_inst(AsmBinaryOp::Add, Register::Sp, Register::Sp, Register::T0);
    }
}

fn emit_array_addr(b: &mut AsmBuilder, rd: Register, offset: i32) {
    if fits_imm12(offset) {
        b.mk_binary_imm_inst(BinaryImmOp::Add, rd, Register::Sp, offset);
    } else {
        b.mk_load_imm_inst(rd, offset);
        b.mk_binary_inst(AsmBinaryOp::Add, rd, rd, Register::Sp);
    }
}

fn array_offset(ra: &RegAlloc, array: MirArray, off: i32) -> i32 {
    off + ra.array_offset(array) as i32
}

fn emit_spill_op(b: &mut AsmBuilder, ra: &RegAlloc, op: &SpillOp) {
    match *op {
        SpillOp::Load { reg, local } => b.mk_memory_inst(MemoryOp::Load, reg, Register::Sp, ra.local_offset(local) as AsmImm),
        SpillOp::Store { reg, local } => b.mk_memory_inst(MemoryOp::Store, reg, Register::Sp, ra.local_offset(local) as AsmImm),
        SpillOp::RematSymbolAddr { reg, name, off } => b.mk_load_addr_inst(reg, name, off),
        SpillOp::RematArrayAddr { reg, array, off } => emit_array_addr(b, reg, array_offset(ra, array, off)),
        SpillOp::RematImm { reg, value } => b.mk_load_imm_inst(reg, value),
    }
}

fn emit_stmt(b: &mut AsmBuilder, ra: &RegAlloc, i: usize, stmt: &Stmt, exit_stmt: usize, exit_label: usize) {
    match *stmt {
        Stmt::Empty => {}

        Stmt::SymbolAddr { name, off, .. } => {
            let rd = ra.reg(i, 0);
            b.mk_load_addr_inst(rd, name, off);
        }

        Stmt::ArrayAddr { array, off, .. } => {
            let rd = ra.reg(i, 0);
            emit_array_addr(b, rd, array_offset(ra, array, off));
        }

        Stmt::Imm { value, .. } => {
            let rd = ra.reg(i, 0);
            b.mk_load_imm_inst(rd, value);
        }

        Stmt::Binary { op, .. } => {
            let rd = ra.reg(i, 0);
            let rs1 = ra.reg(i, 1);
            let rs2 = ra.reg(i, 2);
            let op = match op {
                BinaryOp::Add => AsmBinaryOp::Add,
                BinaryOp::Sub => AsmBinaryOp::Sub,
                BinaryOp::Mul => AsmBinaryOp::Mul,
                BinaryOp::Div => AsmBinaryOp::Div,
                BinaryOp::Mod => AsmBinaryOp::Mod,
                BinaryOp::Lt => AsmBinaryOp::Lt,
            };
            b.mk_binary_inst(op, rd, rs1, rs2);
        }

        Stmt::BinaryImm { src2, op, .. } => {
            let rd = ra.reg(i, 0);
            let rs1 = ra.reg(i, 1);
            match op {
                ImmOp::Add => {
                    assert!(fits_imm12(src2), "addi immediate {src2} out of range");
                    b.mk_binary_imm_inst(BinaryImmOp::Add, rd, rs1, src2);
                }
                ImmOp::Mul => {
                    assert!(src2 > 0 && src2 & (src2 - 1) == 0, "slli fast path requires a positive power of two, got {src2}");
                    b.mk_binary_imm_inst(BinaryImmOp::Shift, rd, rs1, src2.trailing_zeros() as AsmImm);
                }
                ImmOp::Lt => {
                    assert!(fits_imm12(src2), "slti immediate {src2} out of range");
                    b.mk_binary_imm_inst(BinaryImmOp::Lt, rd, rs1, src2);
                }
            }
        }

        Stmt::Unary { op, .. } => {
            let rd = ra.reg(i, 0);
            let rs = ra.reg(i, 1);
            let op = match op {
                UnaryOp::Neg => AsmUnaryOp::Neg,
                UnaryOp::Nop => AsmUnaryOp::Mv,
                UnaryOp::Eqz => AsmUnaryOp::Eqz,
                UnaryOp::Nez => AsmUnaryOp::Nez,
            };
            b.mk_unary_inst(op, rd, rs);
        }

        Stmt::Call { dst, name, ref args } => {
            for (j, _) in args.iter().enumerate() {
                let rs = ra.reg(i, j + 1);
                let rd = arg_hw_reg(j + 1);
                b.mk_unary_inst(AsmUnaryOp::Mv, rd, rs);
            }
            b.mk_call_inst(name);
            if dst.is_some() {
                let rd = ra.reg(i, 0);
                b.mk_unary_inst(AsmUnaryOp::Mv, rd, Register::A0);
            }
        }

        Stmt::Branch { op, target, .. } => {
            let rs1 = ra.reg(i, 1);
            let rs2 = ra.reg(i, 2);
            let op = match op {
                LogicalOp::Lt => BranchOp::Lt,
                LogicalOp::Leq => BranchOp::Leq,
                LogicalOp::Eq => BranchOp::Eq,
                LogicalOp::Ne => BranchOp::Ne,
            };
            b.mk_branch_inst(op, rs1, rs2, target);
        }

        Stmt::Jump { target } => b.mk_jump_inst(target),

        Stmt::Store { off, .. } => {
            let value = ra.reg(i, 1);
            let address = ra.reg(i, 2);
            b.mk_memory_inst(MemoryOp::Store, value, address, off);
        }

        Stmt::Load { off, .. } => {
            let rd = ra.reg(i, 0);
            let address = ra.reg(i, 1);
            b.mk_memory_inst(MemoryOp::Load, rd, address, off);
        }

        Stmt::Return { value } => {
            if value.is_some() {
                let rs = ra.reg(i, 1);
                b.mk_unary_inst(AsmUnaryOp::Mv, Register::A0, rs);
            }
            if i + 1 != exit_stmt {
                b.mk_jump_inst(exit_label);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::builder::{FuncBuilder, MirBuilder};
    use crate::mir::{BinaryOp, Stmt as MirStmt};
    use crate::support::Interner;

    #[test]
    fn a_leaf_function_returning_a_sum_emits_add_and_jr() {
        let mut interner = Interner::new();
        let name = interner.intern("add");
        let mut fb = FuncBuilder::new(name, 3, 3, 0, Vec::new());
        let t = fb.new_temp();
        fb.push(MirStmt::Binary { dst: t, src1: 1, src2: 2, op: BinaryOp::Add });
        fb.push(MirStmt::Return { value: Some(t) });
        let func = fb.finish();
        let mut mb = MirBuilder::new();
        mb.add_item(Item::Func(func));
        let cu = mb.finish();

        let (file, num_labels) = emit_comp_unit(&cu);
        let text = format!("{file}");
        assert!(text.contains("add "));
        assert!(text.contains("jr "));
        assert_eq!(num_labels, 1);
    }

    #[test]
    fn a_global_array_with_one_nonzero_word_pads_around_it() {
        let mut interner = Interner::new();
        let name = interner.intern("arr");
        let mut b = AsmBuilder::new();
        emit_values(&mut b, LabelSec::Data, name, &[(2, 7)], 4);
        let file = b.finish();
        let text = format!("{file}");
        assert!(text.contains(".skip 8"));
        assert!(text.contains(".long 7"));
        assert!(text.contains(".skip 4"));
    }
}
