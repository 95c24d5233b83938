//! Integration tests: compile a full source string to assembly text and
//! check structural properties, grounded in `original_source/tests/`'s
//! fixture shapes (parameter arithmetic, recursion, global array
//! initializers, short-circuit evaluation, spill/remat under pressure)
//! translated into this crate's own source grammar rather than the C
//! harnesses those fixtures actually use (which assume libc `assert`/
//! `printf`, not available here).

use sysyrv::asm::{emit, relabel};
use sysyrv::error::Result;
use sysyrv::mir;
use sysyrv::support::Interner;
use sysyrv::{ast, lexer, parser};

fn compile(source: &str) -> Result<String> {
    let tokens = lexer::tokenize(source)?;
    let mut interner = Interner::new();
    let ast_cu = parser::parse(tokens, &mut interner)?;
    let mut hir_cu = ast::lower::lower_comp_unit(&ast_cu, &mut interner)?;
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
    Ok(file.to_string())
}

fn compile_ok(source: &str) -> String {
    compile(source).unwrap_or_else(|e| panic!("expected {source:?} to compile, got {e}"))
}

/// S1: parameter arithmetic (`original_source/tests/002_params_arithm.c`).
#[test]
fn s1_parameter_arithmetic_emits_one_function_per_operator() {
    let src = "
        int add(int a, int b) { return a + b; }
        int sub(int a, int b) { return a - b; }
        int mul(int a, int b) { return a * b; }
        int divi(int a, int b) { return a / b; }
    ";
    let asm = compile_ok(src);
    assert!(asm.contains("add:"));
    assert!(asm.contains("sub:"));
    assert!(asm.contains("mul:"));
    assert!(asm.contains("divi:"));
    assert!(asm.contains(" add "));
    assert!(asm.contains(" sub "));
    assert!(asm.contains(" mul "));
    assert!(asm.contains(" div "));
}

/// S2: recursive fibonacci (`original_source/tests/005_recur_fib.c`) —
/// exercises a call whose live range must survive its own recursive
/// call, forcing a callee-saved register or a spill around it.
#[test]
fn s2_recursive_fibonacci_calls_itself_and_returns() {
    let src = "
        int fib(int n) {
            if (n < 2) {
                return n;
            }
            return fib(n - 1) + fib(n - 2);
        }
    ";
    let asm = compile_ok(src);
    assert!(asm.contains("fib:"));
    assert!(asm.contains("call fib"));
    assert!(asm.contains("jr "));
}

/// S4: a global array with a sparse, nested-brace initializer
/// (`original_source/tests/009_global_array.c`'s `{1,2,3,{4},{},{5},6,7}`
/// shape, recovered in SPEC_FULL.md §2's grammar supplement).
#[test]
fn s4_global_array_initializer_has_gaps() {
    let src = "
        int matrix[5][3] = {1, 2, 3, {4}, {}, {5}, 6, 7};
        int get(int i, int j) { return matrix[i][j]; }
    ";
    let asm = compile_ok(src);
    assert!(asm.contains(".data"));
    assert!(asm.contains("matrix:"));
    assert!(asm.contains(".long 1"));
    assert!(asm.contains(".skip"));
}

/// S5: short-circuit evaluation — `b()` must never run when `a()` is
/// false for `&&` (or true for `||`); this is testable structurally only
/// by checking a branch/jump appears rather than both calls being
/// unconditionally emitted back to back.
#[test]
fn s5_shortcut_and_branches_around_the_second_call() {
    let src = "
        int a(int x) { return x; }
        int b(int x) { return x; }
        int f(int x, int y) {
            if (a(x) && b(y)) {
                return 1;
            }
            return 0;
        }
    ";
    let asm = compile_ok(src);
    assert!(asm.contains("call a"));
    assert!(asm.contains("call b"));
    assert!(asm.contains("beq") || asm.contains("bne") || asm.contains("j ."));
}

/// S6: enough live locals across a loop and a call to force spill/remat
/// (`original_source/tests/013_spill_remat.c`). Not asserting exact
/// register assignment (that's an implementation detail the allocator is
/// free to vary) — only that the function compiles at all under heavy
/// register pressure and that it still calls out to `sink`.
#[test]
fn s6_many_live_locals_across_a_call_still_compiles() {
    let src = "
        int sink(int x) { return x * 2; }
        int pressure(int a0, int a1, int a2, int a3, int a4, int a5, int a6, int a7) {
            int t0 = a0 + 1;
            int t1 = a1 + 2;
            int t2 = a2 + 3;
            int t3 = a3 + 4;
            int t4 = a4 + 5;
            int t5 = a5 + 6;
            int t6 = a6 + 7;
            int t7 = a7 + 8;
            int s = sink(t0);
            return t0 + t1 + t2 + t3 + t4 + t5 + t6 + t7 + s;
        }
    ";
    let asm = compile_ok(src);
    assert!(asm.contains("pressure:"));
    assert!(asm.contains("call sink"));
}

#[test]
fn a_while_loop_with_break_and_continue_compiles() {
    let src = "
        int count(int n) {
            int i = 0;
            int total = 0;
            while (i < n) {
                i = i + 1;
                if (i == 5) {
                    continue;
                }
                if (i == 8) {
                    break;
                }
                total = total + i;
            }
            return total;
        }
    ";
    let asm = compile_ok(src);
    assert!(asm.contains("count:"));
}

#[test]
fn an_unknown_identifier_is_a_name_error_not_a_panic() {
    let err = compile("int f() { return nope; }").unwrap_err();
    assert!(matches!(err, sysyrv::CompileError::Name { .. }));
}

#[test]
fn division_by_zero_in_a_constant_expression_is_rejected() {
    let err = compile("int a[1 / 0];").unwrap_err();
    assert!(matches!(err, sysyrv::CompileError::ConstEval { .. }));
}

#[test]
fn snapshot_of_a_trivial_constant_function() {
    let asm = compile_ok("int answer() { return 42; }");
    insta::assert_snapshot!(asm);
}
