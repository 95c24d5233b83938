//! Middle Intermediate Representation: linear three-address code with
//! labels (spec.md §3.3).
//!
//! Ported from `original_source/mir/mir.h`'s `MirStmt` virtual-dispatch
//! hierarchy. There every concrete statement overrides a handful of
//! virtual methods (`get_def`, `get_uses`, `get_next`, ...); here they
//! are a single closed `enum Stmt` with those same operations as
//! inherent methods that `match` over it. `~0u` (the "no local" /
//! "zero register" sentinel) becomes `Option<MirLocal>` /
//! [`ZERO_LOCAL`] respectively, spelled out at each use so the zero-
//! register convention (spec.md §3.3) stays visible.

pub mod builder;
pub mod context;
pub mod lower;
pub mod optimize;
pub mod regalloc;

pub use builder::{FuncBuilder, MirBuilder};
pub use lower::lower_comp_unit;

use crate::support::Symbol;

/// Index of a local within a function's dense id space (spec.md §3.3):
/// `[0, num_args)` arguments (slot 0 is the return-address), then
/// user locals, then compiler temporaries, then (post-SSA) phi locals.
pub type MirLocal = usize;
/// Pseudo-local used in a *use* slot to mean "the zero register",
/// spec.md §3.3. Never appears as a *def*.
pub const ZERO_LOCAL: MirLocal = usize::MAX;

pub type MirArray = usize;
pub type MirLabel = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmOp {
    Add,
    /// Requires `imm > 0 && imm & (imm - 1) == 0`; lowers to `slli`.
    Mul,
    Lt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    /// The canonical move: phi realizations and plain assignment both
    /// emit this (spec.md §3.3).
    Nop,
    Eqz,
    Nez,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    Lt,
    Leq,
    Eq,
    Ne,
}

/// One MIR statement. `stmts[0]` and `stmts[last]` of every function are
/// always `Empty` sentinels (spec.md §3.3): the first is the
/// pre-header LICM can hoist into, the last is the function exit that
/// every `Return` jumps to.
#[derive(Debug, Clone)]
pub enum Stmt {
    Empty,
    SymbolAddr { dst: MirLocal, name: Symbol, off: i32 },
    ArrayAddr { dst: MirLocal, array: MirArray, off: i32 },
    Imm { dst: MirLocal, value: i32 },
    Binary { dst: MirLocal, src1: MirLocal, src2: MirLocal, op: BinaryOp },
    BinaryImm { dst: MirLocal, src1: MirLocal, src2: i32, op: ImmOp },
    Unary { dst: MirLocal, src: MirLocal, op: UnaryOp },
    Call { dst: Option<MirLocal>, name: Symbol, args: Vec<MirLocal> },
    Branch { src1: MirLocal, src2: MirLocal, target: MirLabel, op: LogicalOp },
    Jump { target: MirLabel },
    Store { value: MirLocal, address: MirLocal, off: i32 },
    Load { dst: MirLocal, address: MirLocal, off: i32 },
    Return { value: Option<MirLocal> },
}

impl Stmt {
    /// Successor statement indices, per spec.md §3.3's uniform
    /// `successors(ctx, pos)`. Every statement but branch/jump/return
    /// simply falls through to `pos + 1`.
    pub fn successors(&self, ctx: &context::FuncContext, pos: usize) -> Vec<usize> {
        match self {
            Stmt::Branch { target, .. } => vec![pos + 1, ctx.label_to_stmt(*target)],
            Stmt::Jump { target } => vec![ctx.label_to_stmt(*target)],
            Stmt::Return { .. } => vec![ctx.label_to_stmt(ctx.exit_label())],
            _ => vec![pos + 1],
        }
    }

    pub fn def(&self) -> Option<MirLocal> {
        match self {
            Stmt::SymbolAddr { dst, .. }
            | Stmt::ArrayAddr { dst, .. }
            | Stmt::Imm { dst, .. }
            | Stmt::Binary { dst, .. }
            | Stmt::BinaryImm { dst, .. }
            | Stmt::Unary { dst, .. }
            | Stmt::Load { dst, .. } => Some(*dst),
            Stmt::Call { dst, .. } => *dst,
            _ => None,
        }
    }

    /// Uses, in the fixed per-variant order `codegen`/register-info
    /// slots rely on (spec.md §3.3); `ZERO_LOCAL` is a real entry here
    /// (it means "the zero register"), never filtered out.
    pub fn uses(&self) -> Vec<MirLocal> {
        match self {
            Stmt::Binary { src1, src2, .. } => vec![*src1, *src2],
            Stmt::BinaryImm { src1, .. } => vec![*src1],
            Stmt::Unary { src, .. } => vec![*src],
            Stmt::Call { args, .. } => args.clone(),
            Stmt::Branch { src1, src2, .. } => vec![*src1, *src2],
            Stmt::Store { value, address, .. } => vec![*value, *address],
            Stmt::Load { address, .. } => vec![*address],
            Stmt::Return { value } => value.into_iter().copied().collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Stmt::Call { .. })
    }

    pub fn is_mem_load(&self) -> bool {
        matches!(self, Stmt::Load { .. })
    }

    pub fn is_jump_or_branch(&self) -> bool {
        matches!(self, Stmt::Jump { .. } | Stmt::Branch { .. })
    }

    pub fn maybe_mem_store(&self) -> bool {
        matches!(self, Stmt::Store { .. })
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Stmt::Return { .. })
    }

    /// `Unary(dst, src, Nop)` is the canonical move — used both for
    /// plain assignment and to realize SSA phi operands. Extracts
    /// `(dst, src)` so the SSA pass can recognize a statement it just
    /// emitted (spec.md §4.3 `extract_if_assign`).
    pub fn extract_if_assign(&self) -> Option<(MirLocal, MirLocal)> {
        match self {
            Stmt::Unary { dst, src, op: UnaryOp::Nop } => Some((*dst, *src)),
            _ => None,
        }
    }

    pub fn can_rematerialize(&self) -> bool {
        matches!(self, Stmt::SymbolAddr { .. } | Stmt::ArrayAddr { .. } | Stmt::Imm { .. })
    }

    /// Replace every occurrence of `local` in a use slot with
    /// `new_local`. Never touches the def slot (callers must not call
    /// this with `local` equal to the statement's own def).
    pub fn replace_use(&mut self, local: MirLocal, new_local: MirLocal) {
        match self {
            Stmt::Binary { src1, src2, .. } => {
                if *src1 == local {
                    *src1 = new_local;
                }
                if *src2 == local {
                    *src2 = new_local;
                }
            }
            Stmt::BinaryImm { src1, .. } => {
                if *src1 == local {
                    *src1 = new_local;
                }
            }
            Stmt::Unary { src, .. } => {
                if *src == local {
                    *src = new_local;
                }
            }
            Stmt::Call { args, .. } => {
                for a in args.iter_mut() {
                    if *a == local {
                        *a = new_local;
                    }
                }
            }
            Stmt::Branch { src1, src2, .. } => {
                if *src1 == local {
                    *src1 = new_local;
                }
                if *src2 == local {
                    *src2 = new_local;
                }
            }
            Stmt::Store { value, address, .. } => {
                if *value == local {
                    *value = new_local;
                }
                if *address == local {
                    *address = new_local;
                }
            }
            Stmt::Load { address, .. } => {
                if *address == local {
                    *address = new_local;
                }
            }
            Stmt::Return { value } => {
                if *value == Some(local) {
                    *value = Some(new_local);
                }
            }
            _ => {}
        }
    }

    /// Rename this statement's own def slot (used by SSA renaming to
    /// give each definition of a source-level local a fresh name).
    /// Panics if this statement has no def.
    pub fn replace_def(&mut self, new_local: MirLocal) {
        match self {
            Stmt::SymbolAddr { dst, .. }
            | Stmt::ArrayAddr { dst, .. }
            | Stmt::Imm { dst, .. }
            | Stmt::Binary { dst, .. }
            | Stmt::BinaryImm { dst, .. }
            | Stmt::Unary { dst, .. }
            | Stmt::Load { dst, .. } => *dst = new_local,
            Stmt::Call { dst, .. } => *dst = Some(new_local),
            _ => unreachable!("replace_def on a statement with no def"),
        }
    }

    /// A call whose result turns out to be dead keeps the call (its
    /// side effects remain live) but drops the destination (spec.md
    /// §4.4 DCE).
    pub fn remove_dest(&mut self) {
        match self {
            Stmt::Call { dst, .. } => *dst = None,
            _ => unreachable!("remove_dest on a non-call statement"),
        }
    }

    /// Structural equality used by GVN's redundancy cache (spec.md
    /// §4.4): two statements are candidates for merging iff they have
    /// the same shape and operands (and, for loads, the same memory
    /// version — compared separately by the caller).
    pub fn gvn_key(&self) -> Option<GvnKey> {
        match self {
            Stmt::SymbolAddr { name, off, .. } => Some(GvnKey::SymbolAddr(*name, *off)),
            Stmt::ArrayAddr { array, off, .. } => Some(GvnKey::ArrayAddr(*array, *off)),
            Stmt::Imm { value, .. } => Some(GvnKey::Imm(*value)),
            Stmt::Binary { src1, src2, op, .. } => Some(GvnKey::Binary(*src1, *src2, *op)),
            Stmt::BinaryImm { src1, src2, op, .. } => Some(GvnKey::BinaryImm(*src1, *src2, *op)),
            Stmt::Unary { src, op, .. } => Some(GvnKey::Unary(*src, *op)),
            Stmt::Load { address, off, .. } => Some(GvnKey::Load(*address, *off)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GvnKey {
    SymbolAddr(Symbol, i32),
    ArrayAddr(MirArray, i32),
    Imm(i32),
    Binary(MirLocal, MirLocal, BinaryOp),
    BinaryImm(MirLocal, i32, ImmOp),
    Unary(MirLocal, UnaryOp),
    Load(MirLocal, i32),
}

/// A lowered function: array frame layout, labels table, and the flat
/// statement list (spec.md §3.3).
#[derive(Debug, Clone)]
pub struct FuncItem {
    pub name: Symbol,
    pub labels: Vec<usize>,
    pub stmts: Vec<Stmt>,

    pub num_args: usize,
    pub num_locals: usize,
    pub num_temps: usize,

    pub array_size: usize,
    pub array_offs: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct DataItem {
    pub name: Symbol,
    pub size: u32,
    pub values: Vec<(u32, i32)>,
}

#[derive(Debug, Clone)]
pub struct RodataItem {
    pub name: Symbol,
    pub size: u32,
    pub values: Vec<(u32, i32)>,
}

#[derive(Debug, Clone)]
pub struct BssItem {
    pub name: Symbol,
    pub size: u32,
}

#[derive(Debug, Clone)]
pub enum Item {
    Func(FuncItem),
    Data(DataItem),
    Rodata(RodataItem),
    Bss(BssItem),
}

#[derive(Debug, Clone)]
pub struct CompUnit {
    pub items: Vec<Item>,
}
