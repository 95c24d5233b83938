//! Construction helpers for a [`super::File`], ported from
//! `original_source/asm/builder.h`'s `AsmBuilder`.
//!
//! Each function's MIR labels get their own disjoint range of global
//! label ids via [`AsmBuilder::alloc_labels`], so `mk_jump_inst`/
//! `mk_branch_inst` can take a bare per-function `MirLabel` and offset
//! it into the shared id space themselves.
//!
//! Unlike the original, which hands every instruction straight to
//! `stdout`, every `mk_*` constructor here appends to an in-memory
//! `Vec<Line>` and applies the builder-level peepholes spec.md §4.6
//! calls for: a move into its own source, a no-op `add`/`sub` with the
//! zero register, an `addi`/`slli` by zero, and a branch comparing a
//! register against itself are all dropped (or folded to an
//! unconditional jump, for an always-true self-comparison) instead of
//! ever reaching the line buffer.

use super::{AsmImm, BinaryImmOp, BinaryOp, BranchOp, File, IntDirType, LabelId, LabelSec, Line, MemoryOp, Register, UnaryOp};
use crate::mir::MirLabel;
use crate::support::Symbol;

#[derive(Default)]
pub struct AsmBuilder {
    lines: Vec<Line>,
    label_head: u32,
    label_tail: u32,
}

impl AsmBuilder {
    pub fn new() -> Self {
        AsmBuilder::default()
    }

    pub fn alloc_labels(&mut self, num: usize) {
        self.label_head = self.label_tail;
        self.label_tail += num as u32;
    }

    fn label_id(&self, mirlabel: MirLabel) -> LabelId {
        debug_assert!((mirlabel as u32) < self.label_tail - self.label_head);
        LabelId(mirlabel as u32 + self.label_head)
    }

    pub fn mk_global_label(&mut self, section: LabelSec, sym: Symbol) {
        self.lines.push(Line::GlobalLabel { section, sym });
    }

    pub fn mk_int_directive(&mut self, ty: IntDirType, data: AsmImm) {
        self.lines.push(Line::IntDirective { ty, data });
    }

    pub fn mk_local_label(&mut self, mirlabel: MirLabel) {
        let id = self.label_id(mirlabel);
        self.lines.push(Line::LocalLabel(id));
    }

    pub fn mk_binary_inst(&mut self, op: BinaryOp, rd: Register, rs1: Register, rs2: Register) {
        if matches!(op, BinaryOp::Add | BinaryOp::Sub) && rs2 == Register::X0 && rd == rs1 {
            return;
        }
        self.lines.push(Line::Binary { op, rd, rs1, rs2 });
    }

    pub fn mk_binary_imm_inst(&mut self, op: BinaryImmOp, rd: Register, rs1: Register, rs2: AsmImm) {
        if matches!(op, BinaryImmOp::Add | BinaryImmOp::Shift) && rs2 == 0 && rd == rs1 {
            return;
        }
        self.lines.push(Line::BinaryImm { op, rd, rs1, rs2 });
    }

    pub fn mk_unary_inst(&mut self, op: UnaryOp, rd: Register, rs: Register) {
        if matches!(op, UnaryOp::Mv) && rd == rs {
            return;
        }
        self.lines.push(Line::Unary { op, rd, rs });
    }

    pub fn mk_load_imm_inst(&mut self, rd: Register, imm: AsmImm) {
        self.lines.push(Line::LoadImm { rd, imm });
    }

    pub fn mk_load_addr_inst(&mut self, rd: Register, sym: Symbol, off: AsmImm) {
        self.lines.push(Line::LoadAddr { rd, sym, off });
    }

    pub fn mk_memory_inst(&mut self, op: MemoryOp, reg: Register, addr: Register, off: AsmImm) {
        self.lines.push(Line::Memory { op, reg, addr, off });
    }

    pub fn mk_call_inst(&mut self, sym: Symbol) {
        self.lines.push(Line::Call { sym });
    }

    pub fn mk_jump_inst(&mut self, mirtarget: MirLabel) {
        let target = self.label_id(mirtarget);
        self.lines.push(Line::Jump { target });
    }

    pub fn mk_branch_inst(&mut self, op: BranchOp, rs1: Register, rs2: Register, mirtarget: MirLabel) {
        let target = self.label_id(mirtarget);
        if rs1 == rs2 {
            // A self-comparison is either always true (Leq/Eq) or
            // always false (Lt/Ne); codegen never relies on a
            // side-effecting condition here, so fold to an
            // unconditional jump or drop it outright.
            match op {
                BranchOp::Leq | BranchOp::Eq => self.lines.push(Line::Jump { target }),
                BranchOp::Lt | BranchOp::Ne => {}
            }
            return;
        }
        self.lines.push(Line::Branch { op, rs1, rs2, target });
    }

    pub fn mk_jump_reg_inst(&mut self, rs: Register) {
        self.lines.push(Line::JumpReg { rs });
    }

    pub fn finish(self) -> File {
        File::new(self.lines)
    }
}
