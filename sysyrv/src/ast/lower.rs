//! Name resolution, type checking, and AST-to-HIR translation, fused into
//! one pass.
//!
//! `original_source` keeps these as three separate tree walks
//! (`ast/nameresolve.cpp`, `ast/typecheck.cpp`, `ast/translate.cpp`) over
//! a context that mutates each AST node in place with its resolved
//! definition and type. Our AST nodes are immutable (plain enums, no
//! mutable `ref`/`ty` fields to fill in), so there is nothing to gain by
//! keeping the passes apart: a symbol's kind and shape are known the
//! moment it is resolved, so recording an error and producing the HIR
//! node happen together, in one scope-aware walk.
//!
//! Scoping matches `ast/context.h`'s `AstScope`/`AstContext`: a symbol is
//! visible in its own scope and every enclosing one, lookup walks the
//! scope stack innermost-first, and a name may shadow an outer
//! declaration but not one already bound in the very same scope.

use std::collections::HashMap;

use super::*;
use crate::error::{CompileError, Result};
use crate::hir::{
    self, HirBinaryOp, HirCompUnit, HirCond, HirExpr, HirFuncItem, HirItem, HirLogicalOp,
    HirShortcutOp, HirStmt, HirUnaryOp, Literal,
};
use crate::support::Interner;

/// What a resolved name refers to, with just enough shape information to
/// translate every expression form that can reference it. This collapses
/// `original_source`'s `AstType` hierarchy and its five per-definition
/// side tables (`types`/`values`/`arrays`/`locals`/`globals` in
/// `AstScope`) into one value per binding.
#[derive(Debug, Clone)]
enum Def {
    Func { ret_void: bool, nargs: usize },
    ConstScalar(Literal),
    Scalar { local: hir::HirLocalId },
    GlobalScalar { symbol: Symbol },
    LocalArray { arrayid: hir::HirArrayId, shape: Vec<u32> },
    GlobalArray { symbol: Symbol, shape: Vec<u32> },
    /// An array-typed parameter, decayed to a pointer; `shape` holds the
    /// trailing dimensions only (the leading `[]` carries no size).
    Ptr { local: hir::HirLocalId, shape: Vec<u32> },
}

/// `original_source/hir/builder.h`'s `HirFuncBuilder`: allocates dense
/// local ids and array-frame offsets while a function's AST is being
/// walked. Array storage is scoped — a block's arrays give back their
/// frame space when the block ends, so sibling blocks can reuse it —
/// while `array_maxsz` remembers the high-water mark, which becomes the
/// function's total array frame size.
struct HirFuncBuilder {
    num_args: usize,
    num_locals: usize,
    array_cursz: usize,
    array_maxsz: usize,
    array_off: Vec<usize>,
    array_stk: Vec<usize>,
    body: Vec<Vec<HirStmt>>,
    items: Vec<HirItem>,
}

impl HirFuncBuilder {
    fn new(nargs: usize) -> Self {
        // Slot 0 is reserved (see HirFuncItem's doc comment); real
        // locals, including arguments, start at 1.
        HirFuncBuilder {
            num_args: nargs + 1,
            num_locals: nargs + 1,
            array_cursz: 0,
            array_maxsz: 0,
            array_off: Vec::new(),
            array_stk: Vec::new(),
            body: vec![Vec::new()],
            items: Vec::new(),
        }
    }

    fn new_local(&mut self) -> hir::HirLocalId {
        let id = self.num_locals;
        self.num_locals += 1;
        id
    }

    fn new_array(&mut self, size: usize) -> hir::HirArrayId {
        let id = self.array_off.len();
        self.array_off.push(self.array_cursz);
        self.array_cursz += size;
        self.array_maxsz = self.array_maxsz.max(self.array_cursz);
        id
    }

    fn scope_push(&mut self) {
        self.array_stk.push(self.array_cursz);
        self.body.push(Vec::new());
    }

    fn scope_pop(&mut self) -> Vec<HirStmt> {
        self.array_cursz = self.array_stk.pop().expect("scope_pop without scope_push");
        self.body.pop().expect("scope_pop without scope_push")
    }

    fn add_statement(&mut self, stmt: HirStmt) {
        self.body.last_mut().expect("no open scope").push(stmt);
    }

    fn add_item(&mut self, item: HirItem) {
        self.items.push(item);
    }

    fn finish(mut self, name: Symbol) -> (HirFuncItem, Vec<HirItem>) {
        let body = self.body.pop().expect("unbalanced scopes");
        assert!(self.body.is_empty(), "unbalanced scope_push/scope_pop");
        let item = HirFuncItem {
            name,
            num_args: self.num_args,
            num_locals: self.num_locals,
            array_sz: self.array_maxsz,
            array_off: self.array_off,
            body,
        };
        (item, self.items)
    }
}

pub fn lower_comp_unit(unit: &CompUnit, interner: &mut Interner) -> Result<HirCompUnit> {
    let mut lw = Lowerer { interner, scopes: vec![HashMap::new()], loop_depth: 0, items: Vec::new() };
    lw.seed_prelude();
    for item in &unit.items {
        lw.lower_item(item)?;
    }
    Ok(HirCompUnit { items: lw.items })
}

struct Lowerer<'a> {
    interner: &'a mut Interner,
    scopes: Vec<HashMap<Symbol, Def>>,
    loop_depth: u32,
    items: Vec<HirItem>,
}

impl<'a> Lowerer<'a> {
    fn seed_prelude(&mut self) {
        // `original_source/ast/nameresolve.cpp`'s `AstCompUnit::name_resolve`
        // seeds these eight runtime-provided functions before resolving
        // any user code, so a user declaration of the same name is a
        // redefinition error rather than silently shadowing the builtin.
        let prelude: &[(&str, bool, usize)] = &[
            ("getint", false, 0),
            ("putint", true, 1),
            ("getch", false, 0),
            ("putch", true, 1),
            ("getarray", false, 1),
            ("putarray", true, 2),
            ("starttime", true, 1),
            ("stoptime", true, 1),
        ];
        for &(name, ret_void, nargs) in prelude {
            let sym = self.interner.intern(name);
            self.scopes[0].insert(sym, Def::Func { ret_void, nargs });
        }
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn insert(&mut self, name: Symbol, def: Def, span: Span, what: &str) -> Result<()> {
        let scope = self.scopes.last_mut().expect("no open scope");
        if scope.contains_key(&name) {
            return Err(CompileError::name(
                format!("redefinition of {what} `{}`", self.interner.resolve(name)),
                span,
            ));
        }
        scope.insert(name, def);
        Ok(())
    }

    fn lookup(&self, name: Symbol) -> Option<&Def> {
        self.scopes.iter().rev().find_map(|s| s.get(&name))
    }

    fn lookup_or_err(&self, name: Symbol, span: Span) -> Result<Def> {
        self.lookup(name)
            .cloned()
            .ok_or_else(|| CompileError::name(format!("use of undeclared identifier `{}`", self.interner.resolve(name)), span))
    }

    // ---- items -----------------------------------------------------------

    fn lower_item(&mut self, item: &Item) -> Result<()> {
        match item {
            Item::Decl(decl) => self.lower_global_decl(decl),
            Item::Func(f) => self.lower_func(f),
        }
    }

    fn shape_from_dims(&mut self, dims: &[Expr], what: Symbol) -> Result<Vec<u32>> {
        let mut shape = Vec::with_capacity(dims.len());
        for dim in dims {
            let value = self.const_eval(dim)?;
            if value <= 0 {
                return Err(CompileError::const_eval(
                    format!("negative size for array `{}` is not allowed", self.interner.resolve(what)),
                    dim.span(),
                ));
            }
            shape.push(value as u32);
        }
        Ok(shape)
    }

    fn lower_global_decl(&mut self, decl: &Decl) -> Result<()> {
        for binding in &decl.bindings {
            let shape = self.shape_from_dims(&binding.dims, binding.name)?;

            if shape.is_empty() {
                self.lower_global_scalar(decl.is_const, binding)?;
            } else {
                self.lower_global_array(decl.is_const, binding, shape)?;
            }
        }
        Ok(())
    }

    fn lower_global_scalar(&mut self, is_const: bool, binding: &DeclBinding) -> Result<()> {
        if is_const {
            let init = binding.init.as_ref().ok_or_else(|| {
                CompileError::ty("a `const` declaration requires an initializer", binding.name_span)
            })?;
            let collected = collect_init(init, &[])?;
            let value = self.const_eval(&collected[0].1)?;
            self.insert(binding.name, Def::ConstScalar(value), binding.name_span, "variable")?;
            return Ok(());
        }

        match &binding.init {
            Some(init) => {
                let collected = collect_init(init, &[])?;
                let value = self.const_eval(&collected[0].1)?;
                self.items.push(HirItem::Data(hir::HirDataItem {
                    name: binding.name,
                    size: 1,
                    values: vec![(0, value)],
                }));
            }
            None => self.items.push(HirItem::Bss(hir::HirBssItem { name: binding.name, size: 1 })),
        }
        self.insert(binding.name, Def::GlobalScalar { symbol: binding.name }, binding.name_span, "variable")
    }

    fn lower_global_array(&mut self, is_const: bool, binding: &DeclBinding, shape: Vec<u32>) -> Result<()> {
        let num_elems: u32 = shape.iter().product();

        if is_const {
            let init = binding.init.as_ref().ok_or_else(|| {
                CompileError::ty("a `const` array requires an initializer", binding.name_span)
            })?;
            let values = self.collect_const(init, &shape)?;
            self.items.push(HirItem::Rodata(hir::HirRodataItem { name: binding.name, size: num_elems, values }));
        } else {
            match &binding.init {
                Some(init) => {
                    let values = self.collect_const(init, &shape)?;
                    if values.is_empty() {
                        self.items.push(HirItem::Bss(hir::HirBssItem { name: binding.name, size: num_elems }));
                    } else {
                        self.items.push(HirItem::Data(hir::HirDataItem { name: binding.name, size: num_elems, values }));
                    }
                }
                None => self.items.push(HirItem::Bss(hir::HirBssItem { name: binding.name, size: num_elems })),
            }
        }
        self.insert(binding.name, Def::GlobalArray { symbol: binding.name, shape }, binding.name_span, "variable")
    }

    fn lower_func(&mut self, f: &FuncDef) -> Result<()> {
        if f.params.len() > 8 {
            return Err(CompileError::name(
                format!("too many arguments for function `{}`", self.interner.resolve(f.name)),
                f.span,
            ));
        }
        self.insert(f.name, Def::Func { ret_void: f.ret_void, nargs: f.params.len() }, f.name_span, "function")?;

        self.push_scope();
        self.loop_depth = 0;
        let mut builder = HirFuncBuilder::new(f.params.len());

        for param in &f.params {
            let local = builder.new_local();
            let def = if param.is_array {
                let shape = self.shape_from_dims(&param.dims, param.name)?;
                Def::Ptr { local, shape }
            } else {
                Def::Scalar { local }
            };
            self.insert(param.name, def, param.name_span, "parameter")?;
        }

        for stmt in &f.body.stmts {
            self.lower_stmt(stmt, &mut builder)?;
        }

        self.pop_scope();
        let (func_item, extra_items) = builder.finish(f.name);
        self.items.extend(extra_items);
        self.items.push(HirItem::Func(func_item));
        Ok(())
    }

    // ---- statements --------------------------------------------------------

    fn lower_block(&mut self, block: &Block, builder: &mut HirFuncBuilder) -> Result<Vec<HirStmt>> {
        self.push_scope();
        builder.scope_push();
        let mut err = None;
        for stmt in &block.stmts {
            if let Err(e) = self.lower_stmt(stmt, builder) {
                err = Some(e);
                break;
            }
        }
        let stmts = builder.scope_pop();
        self.pop_scope();
        match err {
            Some(e) => Err(e),
            None => Ok(stmts),
        }
    }

    fn lower_stmt(&mut self, stmt: &Stmt, builder: &mut HirFuncBuilder) -> Result<()> {
        match stmt {
            Stmt::Decl(decl) => self.lower_local_decl(decl, builder),
            Stmt::Expr(e) => {
                let hir_e = self.lower_expr(e, builder)?;
                builder.add_statement(HirStmt::Expr(hir_e));
                Ok(())
            }
            Stmt::Assign { lval, rhs, .. } => {
                let hir_rhs = self.lower_expr(rhs, builder)?;
                let stmt = self.lower_store(lval, hir_rhs, builder)?;
                builder.add_statement(stmt);
                Ok(())
            }
            Stmt::Block(b) => {
                let stmts = self.lower_block(b, builder)?;
                builder.add_statement(HirStmt::Block(stmts));
                Ok(())
            }
            Stmt::If { cond, then_blk, else_blk, .. } => {
                let hir_cond = self.lower_cond_into_cond(cond, builder)?;
                let then_stmts = self.lower_block(then_blk, builder)?;
                match else_blk {
                    Some(eb) => {
                        let else_stmts = self.lower_block(eb, builder)?;
                        builder.add_statement(HirStmt::IfElse { cond: hir_cond, then_blk: then_stmts, else_blk: else_stmts });
                    }
                    None => {
                        builder.add_statement(HirStmt::If { cond: hir_cond, then_blk: then_stmts });
                    }
                }
                Ok(())
            }
            Stmt::While { cond, body, .. } => {
                self.loop_depth += 1;
                let hir_cond = self.lower_cond_into_cond(cond, builder)?;
                let hir_body = self.lower_block(body, builder)?;
                self.loop_depth -= 1;
                builder.add_statement(HirStmt::While { cond: hir_cond, body: hir_body });
                Ok(())
            }
            Stmt::Break(span) => {
                if self.loop_depth == 0 {
                    return Err(CompileError::name("cannot `break` outside a loop", *span));
                }
                builder.add_statement(HirStmt::Break);
                Ok(())
            }
            Stmt::Continue(span) => {
                if self.loop_depth == 0 {
                    return Err(CompileError::name("cannot `continue` outside a loop", *span));
                }
                builder.add_statement(HirStmt::Continue);
                Ok(())
            }
            Stmt::Return { value, .. } => {
                let expr = value.as_ref().map(|e| self.lower_expr(e, builder)).transpose()?;
                builder.add_statement(HirStmt::Return { expr });
                Ok(())
            }
            Stmt::Empty(_) => Ok(()),
        }
    }

    fn lower_local_decl(&mut self, decl: &Decl, builder: &mut HirFuncBuilder) -> Result<()> {
        for binding in &decl.bindings {
            let shape = self.shape_from_dims(&binding.dims, binding.name)?;

            if shape.is_empty() {
                if decl.is_const {
                    let init = binding.init.as_ref().ok_or_else(|| {
                        CompileError::ty("a `const` declaration requires an initializer", binding.name_span)
                    })?;
                    let collected = collect_init(init, &[])?;
                    let value = self.const_eval(&collected[0].1)?;
                    self.insert(binding.name, Def::ConstScalar(value), binding.name_span, "variable")?;
                    continue;
                }

                let local = builder.new_local();
                self.insert(binding.name, Def::Scalar { local }, binding.name_span, "variable")?;
                if let Some(init) = &binding.init {
                    let collected = collect_init(init, &[])?;
                    let rhs = self.lower_expr(&collected[0].1, builder)?;
                    builder.add_statement(HirStmt::Assign { lhs: local, rhs });
                }
            } else if decl.is_const {
                let init = binding.init.as_ref().ok_or_else(|| {
                    CompileError::ty("a `const` array requires an initializer", binding.name_span)
                })?;
                let values = self.collect_const(init, &shape)?;
                let num_elems: u32 = shape.iter().product();
                let symbol = self.make_anon_symbol(binding.name);
                builder.add_item(HirItem::Rodata(hir::HirRodataItem { name: symbol, size: num_elems, values }));
                self.insert(binding.name, Def::GlobalArray { symbol, shape }, binding.name_span, "variable")?;
            } else {
                let num_elems: u32 = shape.iter().product();
                let arrayid = builder.new_array(num_elems as usize);
                self.insert(binding.name, Def::LocalArray { arrayid, shape: shape.clone() }, binding.name_span, "variable")?;

                if let Some(init) = &binding.init {
                    let collected = collect_init(init, &shape)?;
                    self.fill_local_array(builder, arrayid, num_elems, collected)?;
                }
            }
        }
        Ok(())
    }

    /// A local array whose initializer supplies fewer than half its
    /// elements gets a `while` loop that zeroes it in 32-byte strides
    /// before the explicit stores run, instead of one store per element —
    /// `original_source/ast/translate.cpp`'s `fill_and_set` vs.
    /// `fill_while_setting` split, which trades code size for a loop only
    /// when there is enough sparse padding to make it worthwhile.
    fn fill_local_array(
        &mut self,
        builder: &mut HirFuncBuilder,
        arrayid: hir::HirArrayId,
        size: u32,
        data: Vec<(u32, Expr)>,
    ) -> Result<()> {
        if (data.len() as u32) < size / 2 && size > 16 {
            self.fill_and_set(builder, arrayid, size, data)
        } else {
            self.fill_while_setting(builder, arrayid, size, data)
        }
    }

    fn fill_while_setting(
        &mut self,
        builder: &mut HirFuncBuilder,
        arrayid: hir::HirArrayId,
        size: u32,
        data: Vec<(u32, Expr)>,
    ) -> Result<()> {
        let mut it = data.into_iter().peekable();
        for i in 0..size {
            let addr = HirExpr::LocalAddr { vid: arrayid, off: (i * 4) as i32 };
            let value = match it.peek() {
                Some((pos, _)) if *pos == i => {
                    let (_, e) = it.next().unwrap();
                    self.lower_expr(&e, builder)?
                }
                _ => HirExpr::Literal(0),
            };
            builder.add_statement(HirStmt::Store { addr, val: value });
        }
        Ok(())
    }

    fn fill_and_set(
        &mut self,
        builder: &mut HirFuncBuilder,
        arrayid: hir::HirArrayId,
        size: u32,
        data: Vec<(u32, Expr)>,
    ) -> Result<()> {
        let aligned = size & !7;

        let now = builder.new_local();
        let end = builder.new_local();
        builder.add_statement(HirStmt::Assign { lhs: now, rhs: HirExpr::LocalAddr { vid: arrayid, off: 0 } });
        builder.add_statement(HirStmt::Assign {
            lhs: end,
            rhs: HirExpr::Binary {
                op: HirBinaryOp::Add,
                lhs: Box::new(HirExpr::LocalVar { vid: now }),
                rhs: Box::new(HirExpr::Literal((aligned * 4) as Literal)),
            },
        });

        let cond = HirCond::Binary {
            op: HirLogicalOp::Lt,
            lhs: Box::new(HirExpr::LocalVar { vid: now }),
            rhs: Box::new(HirExpr::LocalVar { vid: end }),
        };
        let mut zero_stmts = Vec::new();
        for i in 0..8u32 {
            zero_stmts.push(HirStmt::Store {
                addr: HirExpr::Binary {
                    op: HirBinaryOp::Add,
                    lhs: Box::new(HirExpr::LocalVar { vid: now }),
                    rhs: Box::new(HirExpr::Literal((i * 4) as Literal)),
                },
                val: HirExpr::Literal(0),
            });
        }
        zero_stmts.push(HirStmt::Assign {
            lhs: now,
            rhs: HirExpr::Binary {
                op: HirBinaryOp::Add,
                lhs: Box::new(HirExpr::LocalVar { vid: now }),
                rhs: Box::new(HirExpr::Literal(32)),
            },
        });
        builder.add_statement(HirStmt::While { cond, body: zero_stmts });

        let mut it = data.into_iter().peekable();
        while let Some((pos, _)) = it.peek().copied() {
            if pos >= aligned {
                break;
            }
            let (pos, e) = it.next().unwrap();
            let value = self.lower_expr(&e, builder)?;
            builder.add_statement(HirStmt::Store {
                addr: HirExpr::LocalAddr { vid: arrayid, off: (pos * 4) as i32 },
                val: value,
            });
        }

        for i in aligned..size {
            let value = match it.peek() {
                Some((pos, _)) if *pos == i => {
                    let (_, e) = it.next().unwrap();
                    self.lower_expr(&e, builder)?
                }
                _ => HirExpr::Literal(0),
            };
            builder.add_statement(HirStmt::Store { addr: HirExpr::LocalAddr { vid: arrayid, off: (i * 4) as i32 }, val: value });
        }
        Ok(())
    }

    fn make_anon_symbol(&mut self, base: Symbol) -> Symbol {
        let name = format!(".L{}.const.{}.{}", self.interner.resolve(base), self.scopes.len(), self.items.len());
        self.interner.intern(&name)
    }

    // ---- expressions --------------------------------------------------------

    fn lower_expr(&mut self, expr: &Expr, builder: &mut HirFuncBuilder) -> Result<HirExpr> {
        match expr {
            Expr::Literal(v, _) => Ok(HirExpr::Literal(*v as Literal)),
            Expr::LValue(lv) => self.lower_load(lv, builder),
            Expr::Unary(op, inner, _) => {
                if *op == UnOp::Pos {
                    return self.lower_expr(inner, builder);
                }
                let hir_op = match op {
                    UnOp::Not => HirUnaryOp::Not,
                    UnOp::Neg => HirUnaryOp::Neg,
                    UnOp::Pos => unreachable!(),
                };
                let hir_inner = self.lower_expr(inner, builder)?;
                Ok(HirExpr::Unary { op: hir_op, expr: Box::new(hir_inner) })
            }
            Expr::Binary(op, lhs, rhs, _) => {
                let hir_op = match op {
                    BinOp::Add => HirBinaryOp::Add,
                    BinOp::Sub => HirBinaryOp::Sub,
                    BinOp::Mul => HirBinaryOp::Mul,
                    BinOp::Div => HirBinaryOp::Div,
                    BinOp::Mod => HirBinaryOp::Mod,
                };
                let hir_lhs = self.lower_expr(lhs, builder)?;
                let hir_rhs = self.lower_expr(rhs, builder)?;
                Ok(HirExpr::Binary { op: hir_op, lhs: Box::new(hir_lhs), rhs: Box::new(hir_rhs) })
            }
            Expr::Call { name, name_span, args, span } => {
                let def = self.lookup_or_err(*name, *name_span)?;
                let Def::Func { nargs, .. } = def else {
                    return Err(CompileError::ty(
                        format!("`{}` is not callable", self.interner.resolve(*name)),
                        *name_span,
                    ));
                };
                if args.len() != nargs {
                    return Err(CompileError::ty(
                        format!(
                            "function `{}` expects {} argument(s), found {}",
                            self.interner.resolve(*name),
                            nargs,
                            args.len()
                        ),
                        *span,
                    ));
                }
                let mut hir_args = Vec::with_capacity(args.len());
                for a in args {
                    hir_args.push(self.lower_expr(a, builder)?);
                }
                Ok(HirExpr::Call { name: *name, args: hir_args })
            }
            Expr::Cond(cond) => self.lower_cond_into_expr(cond, builder),
        }
    }

    /// `original_source/ast/translate.cpp`'s `AstLvalExpr::into_addr`:
    /// walk the declared shape from the outside in, folding each index
    /// into a byte offset scaled by the stride of the dimensions to its
    /// right.
    fn lvalue_addr(&mut self, lv: &LValue, base: HirExpr, shape: &[u32], is_ptr: bool, builder: &mut HirFuncBuilder) -> Result<HirExpr> {
        if lv.indices.is_empty() {
            return Ok(base);
        }
        let is_ptr_n = if is_ptr { 1 } else { 0 };
        let total_dims = shape.len() + is_ptr_n;
        if lv.indices.len() > total_dims {
            return Err(CompileError::ty(
                format!("too many subscripts on `{}`", self.interner.resolve(lv.name)),
                lv.span,
            ));
        }

        let mut strip: i64 = 4;
        for i in (lv.indices.len()..total_dims).rev() {
            strip *= shape[i - is_ptr_n] as i64;
        }

        let mut base = base;
        let mut idx = lv.indices.len();
        while idx > 0 {
            idx -= 1;
            let hir_idx = self.lower_expr(&lv.indices[idx], builder)?;
            let offset = HirExpr::Binary {
                op: HirBinaryOp::Mul,
                lhs: Box::new(hir_idx),
                rhs: Box::new(HirExpr::Literal(strip as Literal)),
            };
            base = HirExpr::Binary { op: HirBinaryOp::Add, lhs: Box::new(base), rhs: Box::new(offset) };
            if idx != 0 {
                strip *= shape[idx - is_ptr_n] as i64;
            }
        }
        Ok(base)
    }

    fn lower_load(&mut self, lv: &LValue, builder: &mut HirFuncBuilder) -> Result<HirExpr> {
        let def = self.lookup_or_err(lv.name, lv.span)?;
        match def {
            Def::ConstScalar(v) => {
                if !lv.indices.is_empty() {
                    return Err(CompileError::ty(
                        format!("`{}` is not an array", self.interner.resolve(lv.name)),
                        lv.span,
                    ));
                }
                Ok(HirExpr::Literal(v))
            }
            Def::Scalar { local } => {
                if !lv.indices.is_empty() {
                    return Err(CompileError::ty(
                        format!("`{}` is not an array", self.interner.resolve(lv.name)),
                        lv.span,
                    ));
                }
                Ok(HirExpr::LocalVar { vid: local })
            }
            Def::GlobalScalar { symbol } => {
                if !lv.indices.is_empty() {
                    return Err(CompileError::ty(
                        format!("`{}` is not an array", self.interner.resolve(lv.name)),
                        lv.span,
                    ));
                }
                Ok(HirExpr::Unary {
                    op: HirUnaryOp::Load,
                    expr: Box::new(HirExpr::GlobalAddr { name: symbol, off: 0 }),
                })
            }
            Def::LocalArray { arrayid, shape } => {
                let addr = self.lvalue_addr(lv, HirExpr::LocalAddr { vid: arrayid, off: 0 }, &shape, false, builder)?;
                if lv.indices.len() == shape.len() {
                    Ok(HirExpr::Unary { op: HirUnaryOp::Load, expr: Box::new(addr) })
                } else {
                    Ok(addr)
                }
            }
            Def::GlobalArray { symbol, shape } => {
                let addr = self.lvalue_addr(lv, HirExpr::GlobalAddr { name: symbol, off: 0 }, &shape, false, builder)?;
                if lv.indices.len() == shape.len() {
                    Ok(HirExpr::Unary { op: HirUnaryOp::Load, expr: Box::new(addr) })
                } else {
                    Ok(addr)
                }
            }
            Def::Ptr { local, shape } => {
                let addr = self.lvalue_addr(lv, HirExpr::LocalVar { vid: local }, &shape, true, builder)?;
                if lv.indices.len() == shape.len() + 1 {
                    Ok(HirExpr::Unary { op: HirUnaryOp::Load, expr: Box::new(addr) })
                } else {
                    Ok(addr)
                }
            }
            Def::Func { .. } => Err(CompileError::ty(
                format!("`{}` is a function, not a value", self.interner.resolve(lv.name)),
                lv.span,
            )),
        }
    }

    fn not_assignable(&self, lv: &LValue) -> CompileError {
        CompileError::ty(format!("`{}` is not assignable", self.interner.resolve(lv.name)), lv.span)
    }

    fn lower_store(&mut self, lv: &LValue, rhs: HirExpr, builder: &mut HirFuncBuilder) -> Result<HirStmt> {
        let def = self.lookup_or_err(lv.name, lv.span)?;
        match def {
            Def::ConstScalar(_) => Err(self.not_assignable(lv)),
            Def::Scalar { local } => {
                if !lv.indices.is_empty() {
                    return Err(self.not_assignable(lv));
                }
                Ok(HirStmt::Assign { lhs: local, rhs })
            }
            Def::GlobalScalar { symbol } => {
                if !lv.indices.is_empty() {
                    return Err(self.not_assignable(lv));
                }
                Ok(HirStmt::Store { addr: HirExpr::GlobalAddr { name: symbol, off: 0 }, val: rhs })
            }
            Def::LocalArray { arrayid, shape } => {
                if lv.indices.len() != shape.len() {
                    return Err(self.not_assignable(lv));
                }
                let addr = self.lvalue_addr(lv, HirExpr::LocalAddr { vid: arrayid, off: 0 }, &shape, false, builder)?;
                Ok(HirStmt::Store { addr, val: rhs })
            }
            Def::GlobalArray { symbol, shape } => {
                if lv.indices.len() != shape.len() {
                    return Err(self.not_assignable(lv));
                }
                let addr = self.lvalue_addr(lv, HirExpr::GlobalAddr { name: symbol, off: 0 }, &shape, false, builder)?;
                Ok(HirStmt::Store { addr, val: rhs })
            }
            Def::Ptr { local, shape } => {
                if lv.indices.len() != shape.len() + 1 {
                    return Err(self.not_assignable(lv));
                }
                let addr = self.lvalue_addr(lv, HirExpr::LocalVar { vid: local }, &shape, true, builder)?;
                Ok(HirStmt::Store { addr, val: rhs })
            }
            Def::Func { .. } => Err(self.not_assignable(lv)),
        }
    }

    // ---- conditions ---------------------------------------------------------

    fn lower_cond_into_expr(&mut self, cond: &Cond, builder: &mut HirFuncBuilder) -> Result<HirExpr> {
        match cond {
            Cond::Expr(e) => self.lower_expr(e, builder),
            Cond::Binary(op, lhs, rhs, _) => {
                let hir_op = match op {
                    LogicalOp::Lt => HirBinaryOp::Lt,
                    LogicalOp::Gt => HirBinaryOp::Gt,
                    LogicalOp::Leq => HirBinaryOp::Leq,
                    LogicalOp::Geq => HirBinaryOp::Geq,
                    LogicalOp::Eq => HirBinaryOp::Eq,
                    LogicalOp::Ne => HirBinaryOp::Ne,
                    LogicalOp::And | LogicalOp::Or => {
                        return Err(CompileError::ty("`&&`/`||` cannot be used as an integer value", cond.span()));
                    }
                };
                let hir_lhs = self.lower_cond_into_expr(lhs, builder)?;
                let hir_rhs = self.lower_cond_into_expr(rhs, builder)?;
                Ok(HirExpr::Binary { op: hir_op, lhs: Box::new(hir_lhs), rhs: Box::new(hir_rhs) })
            }
        }
    }

    fn lower_cond_into_cond(&mut self, cond: &Cond, builder: &mut HirFuncBuilder) -> Result<HirCond> {
        match cond {
            Cond::Expr(e) => {
                // `!x` used directly as a condition avoids a double
                // negation (`eqz(nez(x))`) by testing `x == 0` instead.
                if let Expr::Unary(UnOp::Not, inner, _) = e {
                    let hir_inner = self.lower_expr(inner, builder)?;
                    return Ok(HirCond::Binary {
                        op: HirLogicalOp::Eq,
                        lhs: Box::new(hir_inner),
                        rhs: Box::new(HirExpr::Literal(0)),
                    });
                }
                let hir_e = self.lower_expr(e, builder)?;
                Ok(HirCond::Binary { op: HirLogicalOp::Ne, lhs: Box::new(hir_e), rhs: Box::new(HirExpr::Literal(0)) })
            }
            Cond::Binary(LogicalOp::And, lhs, rhs, _) => {
                let hir_lhs = self.lower_cond_into_cond(lhs, builder)?;
                let hir_rhs = self.lower_cond_into_cond(rhs, builder)?;
                Ok(HirCond::Shortcut { op: HirShortcutOp::And, lhs: Box::new(hir_lhs), rhs: Box::new(hir_rhs) })
            }
            Cond::Binary(LogicalOp::Or, lhs, rhs, _) => {
                let hir_lhs = self.lower_cond_into_cond(lhs, builder)?;
                let hir_rhs = self.lower_cond_into_cond(rhs, builder)?;
                Ok(HirCond::Shortcut { op: HirShortcutOp::Or, lhs: Box::new(hir_lhs), rhs: Box::new(hir_rhs) })
            }
            Cond::Binary(op, lhs, rhs, _) => {
                let hir_op = match op {
                    LogicalOp::Lt => HirLogicalOp::Lt,
                    LogicalOp::Gt => HirLogicalOp::Gt,
                    LogicalOp::Leq => HirLogicalOp::Leq,
                    LogicalOp::Geq => HirLogicalOp::Geq,
                    LogicalOp::Eq => HirLogicalOp::Eq,
                    LogicalOp::Ne => HirLogicalOp::Ne,
                    LogicalOp::And | LogicalOp::Or => unreachable!(),
                };
                let hir_lhs = self.lower_cond_into_expr(lhs, builder)?;
                let hir_rhs = self.lower_cond_into_expr(rhs, builder)?;
                Ok(HirCond::Binary { op: hir_op, lhs: Box::new(hir_lhs), rhs: Box::new(hir_rhs) })
            }
        }
    }

    // ---- constant evaluation --------------------------------------------------

    /// AST-level constant folding, used for array sizes and `const`
    /// initializers. Unlike [`crate::hir::consteval`] (which leaves
    /// division/modulo by a literal zero unfolded, since that is a
    /// runtime trap) this context requires a compile-time value, so
    /// division or modulo by zero is a hard error here —
    /// `original_source/ast/consteval.cpp`'s `AstBinaryExpr::const_eval`.
    fn const_eval(&mut self, expr: &Expr) -> Result<Literal> {
        match expr {
            Expr::Literal(v, _) => Ok(*v as Literal),
            Expr::Unary(op, inner, _) => {
                let v = self.const_eval(inner)?;
                Ok(match op {
                    UnOp::Pos => v,
                    UnOp::Neg => -v,
                    UnOp::Not => (v == 0) as Literal,
                })
            }
            Expr::Binary(op, lhs, rhs, span) => {
                let l = self.const_eval(lhs)?;
                let r = self.const_eval(rhs)?;
                match op {
                    BinOp::Add => Ok(l.wrapping_add(r)),
                    BinOp::Sub => Ok(l.wrapping_sub(r)),
                    BinOp::Mul => Ok(l.wrapping_mul(r)),
                    BinOp::Div => {
                        if r == 0 {
                            Err(CompileError::const_eval("division by zero in a constant expression", *span))
                        } else {
                            Ok(l / r)
                        }
                    }
                    BinOp::Mod => {
                        if r == 0 {
                            Err(CompileError::const_eval("division by zero in a constant expression", *span))
                        } else {
                            Ok(l % r)
                        }
                    }
                }
            }
            Expr::LValue(lv) => {
                if !lv.indices.is_empty() {
                    return Err(CompileError::const_eval(
                        "accessing an array element is not allowed in a constant expression",
                        lv.span,
                    ));
                }
                match self.lookup_or_err(lv.name, lv.span)? {
                    Def::ConstScalar(v) => Ok(v),
                    _ => Err(CompileError::const_eval(
                        format!("`{}` is not a constant", self.interner.resolve(lv.name)),
                        lv.span,
                    )),
                }
            }
            Expr::Call { span, .. } => Err(CompileError::const_eval(
                "calling a function is not allowed in a constant expression",
                *span,
            )),
            Expr::Cond(cond) => self.const_eval_cond_as_expr(cond),
        }
    }

    fn const_eval_cond_as_expr(&mut self, cond: &Cond) -> Result<Literal> {
        match cond {
            Cond::Expr(e) => self.const_eval(e),
            Cond::Binary(op, lhs, rhs, span) => {
                if matches!(op, LogicalOp::And | LogicalOp::Or) {
                    let l = self.const_eval_cond_as_expr(lhs)? != 0;
                    return Ok(match op {
                        LogicalOp::And => (l && self.const_eval_cond_as_expr(rhs)? != 0) as Literal,
                        LogicalOp::Or => (l || self.const_eval_cond_as_expr(rhs)? != 0) as Literal,
                        _ => unreachable!(),
                    });
                }
                let l = self.const_eval_cond_as_expr(lhs)?;
                let r = self.const_eval_cond_as_expr(rhs)?;
                let _ = span;
                Ok(match op {
                    LogicalOp::Lt => (l < r) as Literal,
                    LogicalOp::Gt => (l > r) as Literal,
                    LogicalOp::Leq => (l <= r) as Literal,
                    LogicalOp::Geq => (l >= r) as Literal,
                    LogicalOp::Eq => (l == r) as Literal,
                    LogicalOp::Ne => (l != r) as Literal,
                    LogicalOp::And | LogicalOp::Or => unreachable!(),
                })
            }
        }
    }

    fn collect_const(&mut self, init: &Init, shape: &[u32]) -> Result<Vec<(u32, Literal)>> {
        let collected = collect_init(init, shape)?;
        let mut out = Vec::new();
        for (off, e) in &collected {
            let value = self.const_eval(e)?;
            if value != 0 || shape.is_empty() {
                out.push((*off, value));
            }
        }
        Ok(out)
    }
}

/// Flattens a (possibly nested, possibly brace-elided) initializer
/// against a declared shape into a sparse list of `(flat index, expr)`
/// pairs. Ported from `original_source/ast/consteval.cpp`'s
/// `AstInit::collect`/`do_collect`/`do_collect_all`: braces may be
/// omitted at any depth, in which case scalars are consumed flatly
/// against the remaining dimensions until an explicit `{` re-establishes
/// structure.
fn collect_init(init: &Init, shape: &[u32]) -> Result<Vec<(u32, Expr)>> {
    let mut result = Vec::new();
    collect_all(init, shape, 0, &mut result, 0)?;
    Ok(result)
}

fn collect_all(init: &Init, shape: &[u32], depth: usize, result: &mut Vec<(u32, Expr)>, base: u32) -> Result<()> {
    match init {
        Init::Expr(e) => {
            if depth != shape.len() {
                return Err(CompileError::ty("a scalar initializer is invalid for an array", e.span()));
            }
            result.push((base, e.clone()));
            Ok(())
        }
        Init::List(list, span) => {
            if depth == shape.len() {
                return Err(CompileError::ty("excess braces around a scalar initializer", *span));
            }
            let consumed = collect_list(list, 0, shape, depth, result, base)?;
            if consumed < list.len() {
                return Err(CompileError::ty("excess elements in an array initializer", *span));
            }
            Ok(())
        }
    }
}

fn collect_list(
    list: &[Init],
    position: usize,
    shape: &[u32],
    depth: usize,
    result: &mut Vec<(u32, Expr)>,
    base: u32,
) -> Result<usize> {
    if depth == shape.len() {
        if position < list.len() {
            collect_all(&list[position], shape, depth, result, base)?;
            return Ok(position + 1);
        }
        return Ok(position);
    }
    if position == list.len() {
        return Ok(position);
    }

    let mut step: u32 = 1;
    for i in (depth + 1..shape.len()).rev() {
        step *= shape[i];
    }

    let mut position = position;
    let mut base = base;
    for _ in 0..shape[depth] {
        if position == list.len() {
            return Ok(position);
        }
        match &list[position] {
            Init::List(_, _) => {
                collect_all(&list[position], shape, depth + 1, result, base)?;
                position += 1;
            }
            Init::Expr(_) => {
                position = collect_list(list, position, shape, depth + 1, result, base)?;
            }
        }
        base += step;
    }
    Ok(position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser;

    fn lower(src: &str) -> Result<HirCompUnit> {
        let mut interner = Interner::new();
        let tokens = tokenize(src).unwrap();
        let ast = parser::parse(tokens, &mut interner).unwrap();
        lower_comp_unit(&ast, &mut interner)
    }

    #[test]
    fn lowers_a_minimal_function() {
        let hir = lower("int main() { return 0; }").unwrap();
        assert_eq!(hir.items.len(), 1);
        assert!(matches!(hir.items[0], HirItem::Func(_)));
    }

    #[test]
    fn rejects_undeclared_names() {
        assert!(lower("int main() { return x; }").is_err());
    }

    #[test]
    fn rejects_break_outside_a_loop() {
        assert!(lower("int main() { break; return 0; }").is_err());
    }

    #[test]
    fn rejects_too_many_parameters() {
        let src = "int f(int a,int b,int c,int d,int e,int g,int h,int i,int j) { return 0; } int main() { return 0; }";
        assert!(lower(src).is_err());
    }

    #[test]
    fn flattens_a_sparse_global_array_initializer() {
        // shape [5][3]; a bare scalar run fills row-major, a nested `{}`
        // realigns to the start of its row, and a trailing unbraced run
        // after a nested list resumes flat filling from that row.
        let hir = lower("int arr[5][3] = {1, 2, 3, {4}, {}, {5}, 6, 7};").unwrap();
        let HirItem::Data(data) = &hir.items[0] else { panic!("expected a Data item") };
        assert_eq!(data.size, 15);
        let offsets: Vec<u32> = data.values.iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets, vec![0, 1, 2, 3, 9, 12, 13]);
    }

    #[test]
    fn const_array_size_errors_on_division_by_zero() {
        assert!(lower("int a[1 / 0]; int main() { return 0; }").is_err());
    }

    #[test]
    fn assigning_to_a_const_is_an_error() {
        assert!(lower("int main() { const int x = 1; x = 2; return 0; }").is_err());
    }
}
