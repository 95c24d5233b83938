//! MIR construction helpers, ported from `original_source/mir/builder.h`.
//!
//! `MirFuncBuilder` hands out fresh labels/temporaries while a
//! function's HIR body is being walked and tracks the innermost
//! enclosing loop's head/tail labels for `break`/`continue`.

use super::{FuncItem, Item, MirLabel, MirLocal, Stmt};
use crate::support::Symbol;

pub struct FuncBuilder {
    name: Symbol,
    labels: Vec<usize>,
    stmts: Vec<Stmt>,
    loop_stack: Vec<(MirLabel, MirLabel)>,

    num_args: usize,
    num_locals: usize,
    num_temps: usize,

    array_size: usize,
    array_offs: Vec<usize>,
}

impl FuncBuilder {
    pub fn new(name: Symbol, num_args: usize, num_locals: usize, array_size: usize, array_offs: Vec<usize>) -> Self {
        FuncBuilder {
            name,
            labels: Vec::new(),
            // Two sentinel empty statements bracket the function
            // (spec.md §4.2): a pre-header LICM can hoist into, and a
            // final exit every `Return` jumps to.
            stmts: vec![Stmt::Empty, Stmt::Empty],
            loop_stack: Vec::new(),
            num_args,
            num_locals,
            num_temps: num_locals,
            array_size,
            array_offs,
        }
    }

    pub fn new_label(&mut self) -> MirLabel {
        self.labels.push(usize::MAX);
        self.labels.len() - 1
    }

    pub fn set_label(&mut self, label: MirLabel) {
        self.labels[label] = self.stmts.len();
        self.stmts.push(Stmt::Empty);
    }

    pub fn new_temp(&mut self) -> MirLocal {
        let id = self.num_temps;
        self.num_temps += 1;
        id
    }

    pub fn push(&mut self, stmt: Stmt) {
        self.stmts.push(stmt);
    }

    pub fn loop_push(&mut self, head: MirLabel, tail: MirLabel) {
        self.loop_stack.push((head, tail));
        // A fresh pre-header for the loop's own LICM pass.
        self.stmts.push(Stmt::Empty);
    }

    pub fn loop_head(&self) -> MirLabel {
        self.loop_stack.last().expect("break/continue outside a loop").0
    }

    pub fn loop_tail(&self) -> MirLabel {
        self.loop_stack.last().expect("break/continue outside a loop").1
    }

    pub fn loop_pop(&mut self) {
        self.loop_stack.pop();
    }

    pub fn finish(mut self) -> FuncItem {
        let exit = self.new_label();
        self.set_label(exit);
        FuncItem {
            name: self.name,
            labels: self.labels,
            stmts: self.stmts,
            num_args: self.num_args,
            num_locals: self.num_locals,
            num_temps: self.num_temps,
            array_size: self.array_size,
            array_offs: self.array_offs,
        }
    }
}

#[derive(Default)]
pub struct MirBuilder {
    items: Vec<Item>,
}

impl MirBuilder {
    pub fn new() -> Self {
        MirBuilder::default()
    }

    pub fn add_item(&mut self, item: Item) {
        self.items.push(item);
    }

    pub fn finish(self) -> super::CompUnit {
        super::CompUnit { items: self.items }
    }
}
