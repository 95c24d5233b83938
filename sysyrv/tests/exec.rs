//! Executes generated assembly directly rather than only grepping its
//! text, closing the gap the structural checks in `compile.rs` leave:
//! a miscompilation that still contains the right mnemonics (e.g. a
//! loop-scoped spill reload keyed at the wrong statement) passes every
//! substring assertion there but produces a wrong number here.
//!
//! The interpreter below is a small flat-memory machine over
//! [`sysyrv::asm::Line`] — register file plus a word-addressed map for
//! the stack and any global data — not a real RISC-V core, but every
//! instruction shape this backend emits executes with real integer
//! semantics, including `call`/`jr` (a `call` stashes the return line
//! index in `ra` exactly as a real `jal ra` would; `jr` jumps to
//! whatever value currently sits in its register, so a spilled/
//! restored return address is exercised for real, not assumed).

use std::collections::HashMap;

use sysyrv::asm::{self, emit, relabel, LabelId, Line, Register};
use sysyrv::error::Result;
use sysyrv::mir;
use sysyrv::support::{Interner, Symbol};
use sysyrv::{ast, lexer, parser};

fn compile_to_file(source: &str, interner: &mut Interner) -> Result<asm::File> {
    let tokens = lexer::tokenize(source)?;
    let ast_cu = parser::parse(tokens, interner)?;
    let mut hir_cu = ast::lower::lower_comp_unit(&ast_cu, interner)?;
    hir_cu.const_eval();
    let mut mir_cu = mir::lower_comp_unit(&hir_cu);
    for item in &mut mir_cu.items {
        if let mir::Item::Func(f) = item {
            mir::optimize::optimize(f);
        }
    }
    let (mut file, num_labels) = emit::emit_comp_unit(&mir_cu);
    relabel::relabel(&mut file, num_labels);
    relabel::relabel(&mut file, num_labels);
    Ok(file)
}

const STACK_BASE: i32 = 1_000_000;

/// A flat-memory interpreter over one compiled [`asm::File`]. Built
/// once per file; `call` re-seeds registers and the stack pointer for
/// each invocation, so the same machine can be called repeatedly.
struct Machine {
    lines: Vec<Line>,
    labels: HashMap<u32, usize>,
    entries: HashMap<Symbol, usize>,
    globals: HashMap<Symbol, i32>,
    regs: [i32; 33],
    mem: HashMap<i32, i32>,
}

impl Machine {
    fn new(file: &asm::File) -> Self {
        let lines = file.lines.clone();
        let mut labels = HashMap::new();
        let mut entries = HashMap::new();
        for (pos, line) in lines.iter().enumerate() {
            match line {
                Line::LocalLabel(LabelId(id)) => {
                    labels.insert(*id, pos);
                }
                Line::GlobalLabel { section: asm::LabelSec::Text, sym } => {
                    entries.insert(*sym, pos);
                }
                _ => {}
            }
        }
        let (globals, mem) = layout_globals(&lines);
        Machine { lines, labels, entries, globals, regs: [0; 33], mem }
    }

    fn read(&self, r: Register) -> i32 {
        if r == Register::X0 {
            0
        } else {
            self.regs[r.bit() as usize]
        }
    }

    fn write(&mut self, r: Register, v: i32) {
        if r != Register::X0 {
            self.regs[r.bit() as usize] = v;
        }
    }

    /// Calls `sym` with `args` landing in the real argument registers
    /// (slot 0 is always the return address, so `args[0]` lands where
    /// a real caller's `n`-th parameter would) and runs to completion,
    /// returning the value left in `a0`.
    fn call(&mut self, sym: Symbol, args: &[i32]) -> i32 {
        let halt = self.lines.len();
        self.write(Register::Ra, halt as i32);
        self.write(Register::Sp, STACK_BASE);
        for (i, &val) in args.iter().enumerate() {
            self.write(Register::from_bit((i + 1) as u32), val);
        }
        let mut pc = *self.entries.get(&sym).expect("call target must be a defined function");

        loop {
            if pc == halt {
                return self.read(Register::A0);
            }
            let line = self.lines[pc].clone();
            match line {
                Line::GlobalLabel { .. } | Line::IntDirective { .. } | Line::LocalLabel(_) => pc += 1,
                Line::Binary { op, rd, rs1, rs2 } => {
                    let (a, b) = (self.read(rs1), self.read(rs2));
                    let v = match op {
                        asm::BinaryOp::Add => a.wrapping_add(b),
                        asm::BinaryOp::Sub => a.wrapping_sub(b),
                        asm::BinaryOp::Mul => a.wrapping_mul(b),
                        asm::BinaryOp::Div => a.wrapping_div(b),
                        asm::BinaryOp::Mod => a.wrapping_rem(b),
                        asm::BinaryOp::Lt => (a < b) as i32,
                    };
                    self.write(rd, v);
                    pc += 1;
                }
                Line::BinaryImm { op, rd, rs1, rs2 } => {
                    let a = self.read(rs1);
                    let v = match op {
                        asm::BinaryImmOp::Add => a.wrapping_add(rs2),
                        asm::BinaryImmOp::Shift => a.wrapping_shl(rs2 as u32),
                        asm::BinaryImmOp::Lt => (a < rs2) as i32,
                    };
                    self.write(rd, v);
                    pc += 1;
                }
                Line::Unary { op, rd, rs } => {
                    let a = self.read(rs);
                    let v = match op {
                        asm::UnaryOp::Mv => a,
                        asm::UnaryOp::Eqz => (a == 0) as i32,
                        asm::UnaryOp::Nez => (a != 0) as i32,
                        asm::UnaryOp::Neg => a.wrapping_neg(),
                    };
                    self.write(rd, v);
                    pc += 1;
                }
                Line::LoadImm { rd, imm } => {
                    self.write(rd, imm);
                    pc += 1;
                }
                Line::LoadAddr { rd, sym, off } => {
                    let base = *self.globals.get(&sym).expect("address of an undefined global");
                    self.write(rd, base + off);
                    pc += 1;
                }
                Line::Memory { op, reg, addr, off } => {
                    let a = self.read(addr) + off;
                    match op {
                        asm::MemoryOp::Load => {
                            let v = *self.mem.get(&a).unwrap_or(&0);
                            self.write(reg, v);
                        }
                        asm::MemoryOp::Store => {
                            let v = self.read(reg);
                            self.mem.insert(a, v);
                        }
                    }
                    pc += 1;
                }
                Line::Call { sym } => {
                    self.write(Register::Ra, (pc + 1) as i32);
                    pc = *self.entries.get(&sym).expect("call target must be a defined function");
                }
                Line::Jump { target } => pc = self.labels[&target.0],
                Line::Branch { op, rs1, rs2, target } => {
                    let (a, b) = (self.read(rs1), self.read(rs2));
                    let taken = match op {
                        asm::BranchOp::Lt => a < b,
                        asm::BranchOp::Leq => a <= b,
                        asm::BranchOp::Eq => a == b,
                        asm::BranchOp::Ne => a != b,
                    };
                    pc = if taken { self.labels[&target.0] } else { pc + 1 };
                }
                Line::JumpReg { rs } => pc = self.read(rs) as usize,
            }
        }
    }
}

/// Assigns each `.data`/`.rodata`/`.bss` symbol a base address by
/// bumping a cursor through the section's own directives, writing any
/// `.long` values into the same flat memory the stack uses (globals
/// and the stack never overlap: globals start at 0, the stack at
/// [`STACK_BASE`]).
fn layout_globals(lines: &[Line]) -> (HashMap<Symbol, i32>, HashMap<i32, i32>) {
    let mut bases = HashMap::new();
    let mut mem = HashMap::new();
    let mut cursor = 0i32;
    let mut current: Option<Symbol> = None;
    for line in lines {
        match line {
            Line::GlobalLabel { section, sym } if *section != asm::LabelSec::Text => {
                bases.insert(*sym, cursor);
                current = Some(*sym);
            }
            Line::GlobalLabel { .. } => current = None,
            Line::IntDirective { ty, data } if current.is_some() => match ty {
                asm::IntDirType::Put => {
                    mem.insert(cursor, *data);
                    cursor += 4;
                }
                asm::IntDirType::Skip => cursor += data,
            },
            _ => {}
        }
    }
    (bases, mem)
}

/// S2: recursive fibonacci (`original_source/tests/005_recur_fib.c`) —
/// every recursive call pushes a fresh frame whose own spilled return
/// address must come back correctly for the whole chain to unwind.
#[test]
fn s2_recursive_fibonacci_computes_the_right_value() {
    let src = "
        int fib(int n) {
            if (n < 2) {
                return n;
            }
            return fib(n - 1) + fib(n - 2);
        }
    ";
    let mut interner = Interner::new();
    let file = compile_to_file(src, &mut interner).expect("fib should compile");
    let fib = interner.intern("fib");
    let mut m = Machine::new(&file);
    assert_eq!(m.call(fib, &[10]), 55);
    assert_eq!(m.call(fib, &[1]), 1);
    assert_eq!(m.call(fib, &[0]), 0);
}

/// S5: short-circuit evaluation — checked here by the actual truth
/// table of `&&`, not just by the presence of a branch in the text.
#[test]
fn s5_shortcut_and_computes_the_right_truth_table() {
    let src = "
        int a(int x) { return x; }
        int b(int x) { return x + 100; }
        int f(int x, int y) {
            if (a(x) && b(y)) {
                return 1;
            }
            return 0;
        }
    ";
    let mut interner = Interner::new();
    let file = compile_to_file(src, &mut interner).expect("f should compile");
    let f = interner.intern("f");
    let mut m = Machine::new(&file);
    assert_eq!(m.call(f, &[0, 5]), 0);
    assert_eq!(m.call(f, &[3, 0]), 0);
    assert_eq!(m.call(f, &[3, 7]), 1);
}

/// S6: a loop-carried accumulator kept alive alongside two dozen other
/// locals live across the whole function, forcing the allocator to
/// spill something. `acc` is the one value actually redefined inside
/// the loop body; if its loop-scoped spill reload were ever keyed at
/// the loop head instead of the pre-header, it would re-read the
/// stale pre-loop value on every iteration and this would settle on
/// `1` instead of accumulating to `n`.
#[test]
fn s6_spill_heavy_loop_accumulates_the_right_total() {
    let src = "
        int sumloop(int n) {
            int acc = 0;
            int b0 = 1; int b1 = 2; int b2 = 3; int b3 = 4; int b4 = 5; int b5 = 6;
            int b6 = 7; int b7 = 8; int b8 = 9; int b9 = 10; int b10 = 11; int b11 = 12;
            int b12 = 13; int b13 = 14; int b14 = 15; int b15 = 16; int b16 = 17; int b17 = 18;
            int b18 = 19; int b19 = 20; int b20 = 21; int b21 = 22; int b22 = 23; int b23 = 24;
            int i = 0;
            while (i < n) {
                acc = acc + 1;
                i = i + 1;
            }
            return acc + b0 + b1 + b2 + b3 + b4 + b5 + b6 + b7 + b8 + b9
                + b10 + b11 + b12 + b13 + b14 + b15 + b16 + b17 + b18 + b19
                + b20 + b21 + b22 + b23;
        }
    ";
    let mut interner = Interner::new();
    let file = compile_to_file(src, &mut interner).expect("sumloop should compile");
    let sumloop = interner.intern("sumloop");
    let mut m = Machine::new(&file);
    let b_total: i32 = (1..=24).sum();
    assert_eq!(m.call(sumloop, &[37]), 37 + b_total);
    assert_eq!(m.call(sumloop, &[0]), b_total);
}
