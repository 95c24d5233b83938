//! Per-function analysis context: predecessor/successor links and the
//! natural-loop forest, ported from `original_source/mir/context.h` +
//! the `fill_stmt_info`/`identify_loops` halves of `mir/regalloc.cpp`
//! (spec.md §4.3).
//!
//! Unlike the original's `MirFuncContext`, which also owns the SSA,
//! GVN and register-allocation state, this struct holds only what is
//! stable across a function's lifetime between structural edits: the
//! control-flow links and loop forest. `optimize.rs` and `regalloc.rs`
//! call [`FuncContext::build`] again whenever they've changed the
//! statement list enough to invalidate it (new labels, new jumps).

use super::{FuncItem, MirLabel, MirLocal, Stmt};
use crate::support::Bitset;

/// One natural loop (spec.md §4.3). Loop 0 is always the whole
/// function; every other loop is identified from a back edge (a jump
/// whose target is a strictly earlier statement).
#[derive(Debug, Clone)]
pub struct Loop {
    /// Every statement position in the loop body, including the head.
    pub stmts: Bitset,
    /// Loops directly nested in this one.
    pub kids: Vec<usize>,
    /// The directly enclosing loop; `None` only for loop 0.
    pub parent: Option<usize>,
    /// The loop header: the first statement reached on entry, and the
    /// target of the back edge.
    pub head: usize,
    /// Statement positions just outside the loop that a body statement
    /// can fall into or jump to — where LICM's hoisted code and
    /// register spill-stores for live-out locals land.
    pub tails: Vec<usize>,
}

impl Loop {
    pub fn contains(&self, pos: usize) -> bool {
        self.stmts.get(pos)
    }
}

/// Control-flow-graph facts about one function's flat statement list.
pub struct FuncContext {
    pub next: Vec<Vec<usize>>,
    pub prev: Vec<Vec<usize>>,
    pub loops: Vec<Loop>,
    labels: Vec<usize>,
    exit_label: MirLabel,
}

impl FuncContext {
    pub fn build(func: &FuncItem) -> Self {
        let n = func.stmts.len();
        let mut ctx = FuncContext {
            next: vec![Vec::new(); n],
            prev: vec![Vec::new(); n],
            loops: Vec::new(),
            labels: func.labels.clone(),
            exit_label: func.labels.len() - 1,
        };
        ctx.fill_stmt_info(&func.stmts);
        ctx.identify_loops(n);
        ctx
    }

    pub fn label_to_stmt(&self, label: MirLabel) -> usize {
        self.labels[label]
    }

    pub fn exit_label(&self) -> MirLabel {
        self.exit_label
    }

    pub fn num_stmts(&self) -> usize {
        self.next.len()
    }

    fn fill_stmt_info(&mut self, stmts: &[Stmt]) {
        for pos in 0..stmts.len() {
            let succs = stmts[pos].successors(self, pos);
            for s in succs {
                self.next[pos].push(s);
                self.prev[s].push(pos);
            }
        }
    }

    /// Every statement whose predecessor set contains a position after
    /// it closes a back edge; the loop body is everything that can
    /// reverse-reach the back edge's source without leaving
    /// `[head, max back-edge source]` (`original_source/mir/
    /// regalloc.cpp`'s loop-discovery half of `prepare`).
    fn identify_loops(&mut self, n: usize) {
        let mut whole = Bitset::new(n);
        whole.set_all();
        self.loops.push(Loop { stmts: whole, kids: Vec::new(), parent: None, head: 0, tails: vec![n - 1] });

        for pos in 0..n {
            let back_preds: Vec<usize> = self.prev[pos].iter().copied().filter(|&p| p > pos).collect();
            if back_preds.is_empty() {
                continue;
            }
            let ppos_max = *back_preds.iter().max().unwrap();

            let mut body = Bitset::new(n);
            body.set(pos);
            let mut queue = back_preds.clone();
            for &p in &back_preds {
                body.set(p);
            }
            while let Some(cur) = queue.pop() {
                for &pr in &self.prev[cur] {
                    if pr >= pos && pr <= ppos_max && !body.get(pr) {
                        body.set(pr);
                        queue.push(pr);
                    }
                }
            }

            let mut tails = Vec::new();
            for s in body.iter() {
                for &succ in &self.next[s] {
                    if !body.get(succ) && !tails.contains(&succ) {
                        tails.push(succ);
                    }
                }
            }
            self.loops.push(Loop { stmts: body, kids: Vec::new(), parent: None, head: pos, tails });
        }

        // Nest by inclusion: the smallest strictly-containing loop wins
        // as the direct parent.
        for i in 1..self.loops.len() {
            let mut parent = 0usize;
            for j in 0..self.loops.len() {
                if i == j {
                    continue;
                }
                if self.loops[j].stmts.contain(&self.loops[i].stmts)
                    && self.loops[j].stmts.count_ones() < self.loops[parent].stmts.count_ones()
                {
                    parent = j;
                }
            }
            self.loops[i].parent = Some(parent);
        }
        for i in 1..self.loops.len() {
            let p = self.loops[i].parent.unwrap();
            self.loops[p].kids.push(i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::LogicalOp;
    use crate::support::Interner;

    fn dummy_func(stmts: Vec<Stmt>, labels: Vec<usize>) -> FuncItem {
        let mut interner = Interner::new();
        FuncItem {
            name: interner.intern("f"),
            labels,
            stmts,
            num_args: 0,
            num_locals: 1,
            num_temps: 1,
            array_size: 0,
            array_offs: Vec::new(),
        }
    }

    #[test]
    fn straight_line_has_no_loops() {
        let stmts = vec![Stmt::Empty, Stmt::Imm { dst: 0, value: 1 }, Stmt::Return { value: Some(0) }, Stmt::Empty];
        let func = dummy_func(stmts, vec![3]);
        let ctx = FuncContext::build(&func);
        assert_eq!(ctx.loops.len(), 1);
        assert_eq!(ctx.next[1], vec![2]);
        assert_eq!(ctx.next[2], vec![3]);
    }

    #[test]
    fn back_edge_forms_a_loop() {
        // stmts: 0 empty(pre-header), 1 head empty, 2 branch->exit(4),
        // 3 jump->1 (back edge), 4 empty exit.
        let stmts = vec![
            Stmt::Empty,
            Stmt::Empty,
            Stmt::Branch { src1: 0, src2: 0, target: 0, op: LogicalOp::Lt },
            Stmt::Jump { target: 1 },
            Stmt::Empty,
        ];
        // label 0 -> stmt 4 (exit target of the branch), label 1 -> stmt 1 (loop head)
        let func = dummy_func(stmts, vec![4, 1]);
        let ctx = FuncContext::build(&func);
        assert_eq!(ctx.loops.len(), 2);
        let inner = &ctx.loops[1];
        assert_eq!(inner.head, 1);
        assert!(inner.contains(1) && inner.contains(2) && inner.contains(3));
        assert!(!inner.contains(0) && !inner.contains(4));
    }
}
