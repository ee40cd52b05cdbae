//! cas++ back end. Walks the AST and emits assembler [`Item`]s; the caller renders or
//! assembles them.
//!
//! Register roles: `R0` accumulator and return value, `R1` second operand, `R1..R3`
//! syscall arguments, `R13` address scratch. Variables live in a fixed pool starting
//! at `R4`; there is no spilling.

use std::collections::HashMap;
use std::fmt;

use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::asm::parse::parse_reg;
use crate::asm::{parse_instruction, AsmErrorKind, Dir, Instr, Item, Target};
use crate::cc::ast::*;
use crate::cc::lexer::Pos;
use crate::decoder::Op;
use crate::syscall as sys;

const ACC: u8 = 0;
const TMP: u8 = 1;
const ARG3: u8 = 2;
const ADDR: u8 = 13;
const FIRST_VAR: usize = 4;

pub const MAX_REGISTER_BUDGET: usize = 9;

type Pool = BitArr!(for 16, in u16, Lsb0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Variable registers per function, capped at [`MAX_REGISTER_BUDGET`].
    pub register_budget: usize,
    pub origin: u32,
    /// First address handed out to arrays.
    pub data_base: u32,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self { register_budget: MAX_REGISTER_BUDGET, origin: 0x1000, data_base: 0x6000 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ty {
    Int,
    Bool,
    Char,
    Float,
    Void,
}

impl Ty {
    fn of(t: &Type) -> Option<Ty> {
        match t {
            Type::Int => Some(Ty::Int),
            Type::Bool => Some(Ty::Bool),
            Type::Char => Some(Ty::Char),
            Type::Float => Some(Ty::Float),
            Type::Void => Some(Ty::Void),
            Type::Class(_) => None,
        }
    }

    fn size(self) -> u32 {
        if self == Ty::Char {
            1
        } else {
            4
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Ty::Int => "int",
            Ty::Bool => "bool",
            Ty::Char => "char",
            Ty::Float => "float",
            Ty::Void => "void",
        })
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    #[error("{pos}: unsupported type in {construct}")]
    UnsupportedType { construct: String, pos: Pos },
    #[error("{pos}: type mismatch in {construct}: expected {expected}, found {found}")]
    TypeMismatch { construct: String, expected: Ty, found: Ty, pos: Pos },
    #[error("{pos}: undefined identifier `{name}`")]
    UndefinedIdentifier { name: String, pos: Pos },
    #[error("{pos}: `{name}` takes {expected} argument(s), found {found}")]
    ArityMismatch { name: String, expected: usize, found: usize, pos: Pos },
    #[error("{pos}: `{name}` cannot be indexed that way")]
    IndexType { name: String, pos: Pos },
    #[error("{pos}: out of registers declaring `{name}` (budget {budget})")]
    OutOfRegisters { name: String, pos: Pos, budget: usize },
    #[error("{pos}: `break` outside a loop")]
    BreakOutsideLoop { pos: Pos },
    #[error("{pos}: `continue` outside a loop")]
    ContinueOutsideLoop { pos: Pos },
    #[error("{pos}: `{name}` is already defined")]
    Redefinition { name: String, pos: Pos },
    #[error("no `main` function")]
    MissingMain,
    #[error("{pos}: index {index} is out of bounds for `{name}` of length {len}")]
    IndexOutOfBounds { name: String, index: i64, len: u32, pos: Pos },
    #[error("{pos}: {construct} is not assignable")]
    NotAnLvalue { construct: String, pos: Pos },
    #[error("{pos}: array `{name}` of {len} element(s) does not fit the data region")]
    ArrayTooLarge { name: String, len: i64, pos: Pos },
    #[error("code ends at {code_end:#x}, past the data region at {data_base:#x}")]
    CodeOverlapsData { code_end: u32, data_base: u32 },
    #[error("{pos}: inline assembly: {source}")]
    InlineAsm {
        pos: Pos,
        #[source]
        source: AsmErrorKind,
    },
}

impl CodegenError {
    pub fn pos(&self) -> Option<Pos> {
        match self {
            CodegenError::MissingMain | CodegenError::CodeOverlapsData { .. } => None,
            CodegenError::UnsupportedType { pos, .. }
            | CodegenError::TypeMismatch { pos, .. }
            | CodegenError::UndefinedIdentifier { pos, .. }
            | CodegenError::ArityMismatch { pos, .. }
            | CodegenError::IndexType { pos, .. }
            | CodegenError::OutOfRegisters { pos, .. }
            | CodegenError::BreakOutsideLoop { pos }
            | CodegenError::ContinueOutsideLoop { pos }
            | CodegenError::Redefinition { pos, .. }
            | CodegenError::IndexOutOfBounds { pos, .. }
            | CodegenError::NotAnLvalue { pos, .. }
            | CodegenError::ArrayTooLarge { pos, .. }
            | CodegenError::InlineAsm { pos, .. } => Some(*pos),
        }
    }
}

type CResult<T> = Result<T, CodegenError>;

#[derive(Debug, Clone, Copy)]
enum Intrinsic {
    /// `op R0`
    Unary(Op),
    /// `op R0, R1`
    Binary(Op),
    Lerp,
    Min,
    Max,
    Clamp,
    Swap,
    Sys { num: u32, min: usize, max: usize },
}

impl Intrinsic {
    fn lookup(name: &str) -> Option<Self> {
        use Intrinsic::*;
        let call = |num, n| Some(Sys { num, min: n, max: n });
        match name {
            "abs" => Some(Unary(Op::Abs)),
            "sign" => Some(Unary(Op::Sign)),
            "saturate" => Some(Unary(Op::Saturate)),
            "popcount" => Some(Unary(Op::Popcount)),
            "lzcnt" => Some(Unary(Op::Lzcnt)),
            "tzcnt" => Some(Unary(Op::Tzcnt)),
            "reverse" => Some(Unary(Op::Reverse)),
            "bswap" => Some(Unary(Op::Bswap)),
            "rotl" => Some(Binary(Op::Rol)),
            "rotr" => Some(Binary(Op::Ror)),
            "lerp" => Some(Lerp),
            "min" => Some(Min),
            "max" => Some(Max),
            "clamp" => Some(Clamp),
            "swap" => Some(Swap),
            "write" => call(sys::SYS_WRITE, 3),
            "read" => call(sys::SYS_READ, 3),
            "open" => call(sys::SYS_OPEN, 2),
            "close" => call(sys::SYS_CLOSE, 1),
            "exit" => call(sys::SYS_EXIT, 1),
            "alloc" => call(sys::SYS_ALLOC, 1),
            "free" => call(sys::SYS_FREE, 1),
            "gettime" => call(sys::SYS_GETTIME, 0),
            "sleep" => call(sys::SYS_SLEEP, 1),
            "rand" => call(sys::SYS_RAND, 0),
            "sqrt" => call(sys::SYS_SQRT, 1),
            "pow" => call(sys::SYS_POW, 2),
            "log" => call(sys::SYS_LOG, 1),
            "exp" => call(sys::SYS_EXP, 1),
            "sin" => call(sys::SYS_SIN, 1),
            "cos" => call(sys::SYS_COS, 1),
            "tan" => call(sys::SYS_TAN, 1),
            "hash" => call(sys::SYS_HASH, 2),
            "crc32" => call(sys::SYS_CRC32, 2),
            "strlen" => call(sys::SYS_STRLEN, 1),
            "strcmp" => call(sys::SYS_STRCMP, 2),
            "memset" => call(sys::SYS_MEMSET, 3),
            "printf" => Some(Sys { num: sys::SYS_PRINTF, min: 1, max: 3 }),
            "getpid" => call(sys::SYS_GETPID, 0),
            _ => None,
        }
    }

    fn arity(self) -> (usize, usize) {
        match self {
            Intrinsic::Unary(_) => (1, 1),
            Intrinsic::Binary(_) | Intrinsic::Min | Intrinsic::Max | Intrinsic::Swap => (2, 2),
            Intrinsic::Lerp | Intrinsic::Clamp => (3, 3),
            Intrinsic::Sys { min, max, .. } => (min, max),
        }
    }
}

#[derive(Debug, Clone)]
enum Binding {
    Reg { reg: u8, ty: Ty },
    Array { base: u32, elem: Ty, len: u32 },
    Const { ty: Ty, value: i64 },
    /// Fields are bound separately as `name.field`.
    Instance,
}

#[derive(Debug, Clone)]
struct Sig {
    params: Vec<Ty>,
    ret: Ty,
}

#[derive(Debug, Default)]
struct Scope {
    vars: HashMap<String, Binding>,
    regs: Vec<usize>,
}

struct Loop {
    cont: String,
    brk: String,
}

/// Where an assignable expression lives.
enum Place {
    Reg(u8, Ty),
    Elem { name: String, base: u32, elem: Ty, len: u32, index: Expr },
}

struct Codegen {
    cfg: CompilerConfig,
    classes: HashMap<String, Vec<(String, Ty)>>,
    funcs: HashMap<String, Sig>,
    globals: HashMap<String, Binding>,
    out: Vec<Item>,
    strings: Vec<(String, String)>,
    labels: usize,
    data_next: u32,
    scopes: Vec<Scope>,
    pool: Pool,
    loops: Vec<Loop>,
    ret_label: String,
    ret_ty: Ty,
}

/// Lower a parsed unit to assembler items: `_start` stub, functions, then string data.
pub fn generate(unit: &Unit, cfg: &CompilerConfig) -> CResult<Vec<Item>> {
    let mut g = Codegen {
        cfg: *cfg,
        classes: HashMap::new(),
        funcs: HashMap::new(),
        globals: HashMap::new(),
        out: Vec::new(),
        strings: Vec::new(),
        labels: 0,
        data_next: cfg.data_base,
        scopes: Vec::new(),
        pool: BitArray::ZERO,
        loops: Vec::new(),
        ret_label: String::new(),
        ret_ty: Ty::Void,
    };
    g.collect(unit)?;
    if !g.funcs.contains_key("main") {
        return Err(CodegenError::MissingMain);
    }
    g.label("_start".into());
    g.jump(Op::Call, &fn_label("main"));
    g.op2(Op::Mov, TMP, ACC);
    g.load_const(ACC, sys::SYS_EXIT as i64);
    g.op0(Op::Syscall);
    g.op0(Op::Halt);
    for item in &unit.items {
        if let TopItem::Func(f) = item {
            g.function(f)?;
        }
    }
    for (label, text) in std::mem::take(&mut g.strings) {
        g.out.push(Item::Label(label));
        g.out.push(Item::Dir(Dir::Str(text)));
    }
    debug!(items = g.out.len(), data_end = format_args!("{:#x}", g.data_next), "codegen finished");
    Ok(g.out)
}

/// Function labels that would read as register names get a prefix.
fn fn_label(name: &str) -> String {
    if parse_reg(name).is_some() {
        format!("_{name}")
    } else {
        name.to_string()
    }
}

fn wrap(v: i64) -> i64 {
    v as i32 as i64
}

fn inverse_jump(op: BinOp) -> Op {
    match op {
        BinOp::Eq => Op::Jne,
        BinOp::Ne => Op::Je,
        BinOp::Lt => Op::Jge,
        BinOp::Ge => Op::Jl,
        BinOp::Gt => Op::Jle,
        _ => Op::Jg,
    }
}

fn jump_if(op: BinOp) -> Op {
    match op {
        BinOp::Eq => Op::Je,
        BinOp::Ne => Op::Jne,
        BinOp::Lt => Op::Jl,
        BinOp::Ge => Op::Jge,
        BinOp::Gt => Op::Jg,
        _ => Op::Jle,
    }
}

/// Register-indirect load and store for an element type.
fn indirect_ops(elem: Ty) -> (Op, Op) {
    if elem == Ty::Char {
        (Op::LoadBR, Op::StoreBR)
    } else {
        (Op::LoadR, Op::StoreR)
    }
}

fn arith_op(op: BinOp) -> Op {
    match op {
        BinOp::Add => Op::Add,
        BinOp::Sub => Op::Sub,
        BinOp::Mul => Op::Mul,
        BinOp::Div => Op::Div,
        BinOp::Mod => Op::Mod,
        BinOp::BitAnd => Op::And,
        BinOp::BitOr => Op::Or,
        BinOp::BitXor => Op::Xor,
        BinOp::Shl => Op::Shl,
        _ => Op::Sar,
    }
}

fn describe(e: &Expr) -> String {
    match &e.kind {
        ExprKind::Ident(n) => format!("`{n}`"),
        ExprKind::Call(n, _) => format!("call to `{n}`"),
        ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Bool(_) | ExprKind::Char(_) => "a literal".into(),
        ExprKind::Str(_) => "a string literal".into(),
        _ => "this expression".into(),
    }
}

impl Codegen {
    /// Arrays stay below the heap unless the data region was configured above it.
    fn data_limit(&self) -> u32 {
        if self.cfg.data_base < sys::HEAP_BASE {
            sys::HEAP_BASE
        } else {
            u32::MAX
        }
    }

    fn budget(&self) -> usize {
        self.cfg.register_budget.min(MAX_REGISTER_BUDGET)
    }

    // ---- emission ----

    fn emit(&mut self, op: Op, rd: u8, rs: u8, target: Target) {
        self.out.push(Item::Instr(Instr::new(op, rd, rs, target)));
    }

    fn op0(&mut self, op: Op) {
        self.emit(op, 0, 0, Target::None);
    }

    fn op1(&mut self, op: Op, rd: u8) {
        self.emit(op, rd, 0, Target::None);
    }

    fn op2(&mut self, op: Op, rd: u8, rs: u8) {
        self.emit(op, rd, rs, Target::None);
    }

    fn opi(&mut self, op: Op, rd: u8, imm: i64) {
        self.emit(op, rd, 0, Target::Imm(imm));
    }

    fn jump(&mut self, op: Op, label: &str) {
        self.emit(op, 0, 0, Target::Label(label.to_string()));
    }

    fn label(&mut self, l: String) {
        self.out.push(Item::Label(l));
    }

    fn fresh(&mut self) -> String {
        self.labels += 1;
        format!("__L{}", self.labels)
    }

    fn load_const(&mut self, reg: u8, v: i64) {
        let v = wrap(v);
        if (-0x8000..=0x7FFF).contains(&v) {
            self.opi(Op::LoadI, reg, v);
            return;
        }
        let bits = v as u32;
        self.opi(Op::LoadI, reg, (bits >> 16) as u16 as i16 as i64);
        self.opi(Op::ShlI, reg, 16);
        if bits & 0xFFFF != 0 {
            self.opi(Op::OrI, reg, (bits & 0xFFFF) as i64);
        }
    }

    /// `LOAD`/`STORE` of `reg` at a fixed address, through `R13` above the 16-bit field.
    fn absolute(&mut self, op: Op, reg: u8, addr: u32) {
        if addr <= 0xFFFF {
            self.opi(op, reg, addr as i64);
        } else {
            let indirect = match op {
                Op::Load => Op::LoadR,
                Op::Store => Op::StoreR,
                Op::LoadB => Op::LoadBR,
                _ => Op::StoreBR,
            };
            self.load_const(ADDR, addr as i64);
            self.emit(indirect, reg, ADDR, Target::Imm(0));
        }
    }

    // ---- symbols ----

    fn collect(&mut self, unit: &Unit) -> CResult<()> {
        for item in &unit.items {
            match item {
                TopItem::Class(c) => {
                    if self.classes.contains_key(&c.name) {
                        return Err(CodegenError::Redefinition { name: c.name.clone(), pos: c.pos });
                    }
                    let mut fields: Vec<(String, Ty)> = Vec::new();
                    for f in &c.fields {
                        let ty = match Ty::of(&f.ty) {
                            Some(t) if t != Ty::Void => t,
                            _ => {
                                return Err(CodegenError::UnsupportedType {
                                    construct: format!("field `{}.{}`", c.name, f.name),
                                    pos: f.pos,
                                })
                            }
                        };
                        if fields.iter().any(|(n, _)| *n == f.name) {
                            return Err(CodegenError::Redefinition { name: f.name.clone(), pos: f.pos });
                        }
                        fields.push((f.name.clone(), ty));
                    }
                    self.classes.insert(c.name.clone(), fields);
                }
                TopItem::Func(f) => {
                    if self.funcs.contains_key(&f.name) || Intrinsic::lookup(&f.name).is_some() {
                        return Err(CodegenError::Redefinition { name: f.name.clone(), pos: f.pos });
                    }
                    let ret = Ty::of(&f.ret).ok_or_else(|| CodegenError::UnsupportedType {
                        construct: format!("return type of `{}`", f.name),
                        pos: f.pos,
                    })?;
                    let mut params = Vec::new();
                    for p in &f.params {
                        match Ty::of(&p.ty) {
                            Some(t) if t != Ty::Void => params.push(t),
                            _ => {
                                return Err(CodegenError::UnsupportedType {
                                    construct: format!("parameter `{}`", p.name),
                                    pos: p.pos,
                                })
                            }
                        }
                    }
                    if let Some(p) = f.params.get(self.budget()) {
                        return Err(CodegenError::OutOfRegisters {
                            name: p.name.clone(),
                            pos: p.pos,
                            budget: self.budget(),
                        });
                    }
                    self.funcs.insert(f.name.clone(), Sig { params, ret });
                }
                TopItem::Const(d) => {
                    if self.globals.contains_key(&d.name) {
                        return Err(CodegenError::Redefinition { name: d.name.clone(), pos: d.pos });
                    }
                    let ty = match Ty::of(&d.ty) {
                        Some(t) if t != Ty::Void && t != Ty::Float && d.array.is_none() => t,
                        _ => {
                            return Err(CodegenError::UnsupportedType {
                                construct: format!("global `{}`", d.name),
                                pos: d.pos,
                            })
                        }
                    };
                    let value = match &d.init {
                        Some(Init::Expr(e)) => self.const_eval(e),
                        _ => None,
                    };
                    let Some(value) = value else {
                        return Err(CodegenError::UnsupportedType {
                            construct: format!("non-constant initializer of `{}`", d.name),
                            pos: d.pos,
                        });
                    };
                    self.globals.insert(d.name.clone(), Binding::Const { ty, value });
                }
            }
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.vars.get(name))
            .or_else(|| self.globals.get(name))
            .cloned()
    }

    fn lookup_or_err(&self, name: &str, pos: Pos) -> CResult<Binding> {
        self.lookup(name).ok_or_else(|| CodegenError::UndefinedIdentifier { name: name.to_string(), pos })
    }

    fn check_free(&self, name: &str, pos: Pos) -> CResult<()> {
        let clash = self.scopes.last().is_some_and(|s| s.vars.contains_key(name))
            || self.funcs.contains_key(name)
            || Intrinsic::lookup(name).is_some();
        if clash {
            return Err(CodegenError::Redefinition { name: name.to_string(), pos });
        }
        Ok(())
    }

    fn bind(&mut self, name: String, b: Binding) {
        if let Some(s) = self.scopes.last_mut() {
            s.vars.insert(name, b);
        }
    }

    fn alloc_reg(&mut self, name: &str, pos: Pos) -> CResult<u8> {
        let budget = self.budget();
        let Some(r) = (FIRST_VAR..FIRST_VAR + budget).find(|&r| !self.pool[r]) else {
            return Err(CodegenError::OutOfRegisters { name: name.to_string(), pos, budget });
        };
        self.pool.set(r, true);
        if let Some(s) = self.scopes.last_mut() {
            s.regs.push(r);
        }
        trace!(name, reg = r, "register allocated");
        Ok(r as u8)
    }

    fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    fn pop_scope(&mut self) {
        if let Some(s) = self.scopes.pop() {
            for r in s.regs {
                self.pool.set(r, false);
            }
        }
    }

    fn live_regs(&self) -> Vec<u8> {
        self.pool.iter_ones().map(|r| r as u8).collect()
    }

    // ---- types ----

    fn mismatch(construct: &str, expected: Ty, found: Ty, pos: Pos) -> CodegenError {
        CodegenError::TypeMismatch { construct: construct.to_string(), expected, found, pos }
    }

    fn compat(&self, construct: &str, target: Ty, value: Ty, pos: Pos) -> CResult<()> {
        if value == Ty::Void || target == Ty::Void || (target == Ty::Float) != (value == Ty::Float) {
            return Err(Self::mismatch(construct, target, value, pos));
        }
        Ok(())
    }

    fn integral(&self, construct: &str, ty: Ty, pos: Pos) -> CResult<()> {
        match ty {
            Ty::Float => Err(CodegenError::UnsupportedType { construct: construct.to_string(), pos }),
            Ty::Void => Err(Self::mismatch(construct, Ty::Int, ty, pos)),
            _ => Ok(()),
        }
    }

    /// Fold integer constant expressions with 32-bit wrapping semantics.
    fn const_eval(&self, e: &Expr) -> Option<i64> {
        match &e.kind {
            ExprKind::Int(v) => Some(wrap(*v)),
            ExprKind::Char(c) => Some(*c as i64),
            ExprKind::Bool(b) => Some(*b as i64),
            ExprKind::Ident(n) => match self.lookup(n)? {
                Binding::Const { value, .. } => Some(value),
                _ => None,
            },
            ExprKind::Unary(op, x) => {
                let v = self.const_eval(x)?;
                Some(match op {
                    UnOp::Neg => wrap(v.wrapping_neg()),
                    UnOp::Plus => v,
                    UnOp::Not => (v == 0) as i64,
                    UnOp::BitNot => wrap(!v),
                })
            }
            ExprKind::Binary(op, l, r) => {
                let a = self.const_eval(l)? as i32;
                let b = self.const_eval(r)? as i32;
                let v = match op {
                    BinOp::Add => a.wrapping_add(b),
                    BinOp::Sub => a.wrapping_sub(b),
                    BinOp::Mul => a.wrapping_mul(b),
                    BinOp::Div if b != 0 => a.wrapping_div(b),
                    BinOp::Mod if b != 0 => a.wrapping_rem(b),
                    BinOp::Div | BinOp::Mod => return None,
                    BinOp::BitAnd => a & b,
                    BinOp::BitOr => a | b,
                    BinOp::BitXor => a ^ b,
                    BinOp::Shl => a.wrapping_shl(b as u32 & 31),
                    BinOp::Shr => a.wrapping_shr(b as u32 & 31),
                    BinOp::Eq => (a == b) as i32,
                    BinOp::Ne => (a != b) as i32,
                    BinOp::Lt => (a < b) as i32,
                    BinOp::Gt => (a > b) as i32,
                    BinOp::Le => (a <= b) as i32,
                    BinOp::Ge => (a >= b) as i32,
                    BinOp::And => (a != 0 && b != 0) as i32,
                    BinOp::Or => (a != 0 || b != 0) as i32,
                };
                Some(v as i64)
            }
            _ => None,
        }
    }

    fn const_ty(e: &Expr) -> Ty {
        match &e.kind {
            ExprKind::Char(_) => Ty::Char,
            ExprKind::Bool(_) => Ty::Bool,
            ExprKind::Binary(op, ..) if op.is_comparison() || matches!(op, BinOp::And | BinOp::Or) => Ty::Bool,
            ExprKind::Unary(UnOp::Not, _) => Ty::Bool,
            _ => Ty::Int,
        }
    }

    // ---- places ----

    fn field_reg(&self, base: &Expr, field: &str, pos: Pos) -> CResult<(u8, Ty)> {
        let ExprKind::Ident(inst) = &base.kind else {
            return Err(CodegenError::UnsupportedType { construct: "nested field access".into(), pos });
        };
        match self.lookup_or_err(inst, base.pos)? {
            Binding::Instance => {}
            _ => {
                return Err(CodegenError::UndefinedIdentifier { name: format!("{inst}.{field}"), pos })
            }
        }
        let name = format!("{inst}.{field}");
        match self.lookup(&name) {
            Some(Binding::Reg { reg, ty }) => Ok((reg, ty)),
            _ => Err(CodegenError::UndefinedIdentifier { name, pos }),
        }
    }

    fn array(&self, e: &Expr) -> CResult<(String, u32, Ty, u32)> {
        let ExprKind::Ident(name) = &e.kind else {
            return Err(CodegenError::IndexType { name: describe(e), pos: e.pos });
        };
        match self.lookup_or_err(name, e.pos)? {
            Binding::Array { base, elem, len } => Ok((name.clone(), base, elem, len)),
            _ => Err(CodegenError::IndexType { name: name.clone(), pos: e.pos }),
        }
    }

    fn place(&self, e: &Expr) -> CResult<Place> {
        match &e.kind {
            ExprKind::Ident(name) => match self.lookup_or_err(name, e.pos)? {
                Binding::Reg { reg, ty } => Ok(Place::Reg(reg, ty)),
                Binding::Const { .. } => {
                    Err(CodegenError::NotAnLvalue { construct: format!("constant `{name}`"), pos: e.pos })
                }
                Binding::Array { .. } => {
                    Err(CodegenError::NotAnLvalue { construct: format!("array `{name}`"), pos: e.pos })
                }
                Binding::Instance => {
                    Err(CodegenError::NotAnLvalue { construct: format!("instance `{name}`"), pos: e.pos })
                }
            },
            ExprKind::Field(base, field) => {
                let (reg, ty) = self.field_reg(base, field, e.pos)?;
                Ok(Place::Reg(reg, ty))
            }
            ExprKind::Index(arr, idx) => {
                let (name, base, elem, len) = self.array(arr)?;
                Ok(Place::Elem { name, base, elem, len, index: (**idx).clone() })
            }
            _ => Err(CodegenError::NotAnLvalue { construct: describe(e), pos: e.pos }),
        }
    }

    fn place_ty(p: &Place) -> Ty {
        match p {
            Place::Reg(_, ty) => *ty,
            Place::Elem { elem, .. } => *elem,
        }
    }

    /// Constant element address, bounds-checked.
    fn const_elem(&self, name: &str, base: u32, elem: Ty, len: u32, index: &Expr) -> CResult<Option<u32>> {
        let Some(i) = self.const_eval(index) else { return Ok(None) };
        if i < 0 || i >= len as i64 {
            return Err(CodegenError::IndexOutOfBounds { name: name.to_string(), index: i, len, pos: index.pos });
        }
        Ok(Some(base + i as u32 * elem.size()))
    }

    /// `R13 = base + index * size`; clobbers `R0`.
    fn elem_addr(&mut self, name: &str, base: u32, elem: Ty, index: &Expr) -> CResult<()> {
        let ty = self.expr(index)?;
        if matches!(ty, Ty::Float | Ty::Void) {
            return Err(CodegenError::IndexType { name: name.to_string(), pos: index.pos });
        }
        if elem.size() == 4 {
            self.opi(Op::ShlI, ACC, 2);
        }
        self.load_const(ADDR, base as i64);
        self.op2(Op::Add, ADDR, ACC);
        Ok(())
    }

    fn load_elem(&mut self, name: &str, base: u32, elem: Ty, len: u32, index: &Expr) -> CResult<Ty> {
        let (abs, ind) = if elem == Ty::Char { (Op::LoadB, Op::LoadBR) } else { (Op::Load, Op::LoadR) };
        match self.const_elem(name, base, elem, len, index)? {
            Some(addr) => self.absolute(abs, ACC, addr),
            None => {
                self.elem_addr(name, base, elem, index)?;
                self.emit(ind, ACC, ADDR, Target::Imm(0));
            }
        }
        Ok(elem)
    }

    /// Store `R0` into `p`, leaving `R0` unchanged.
    fn store_acc(&mut self, p: &Place) -> CResult<()> {
        match p {
            Place::Reg(reg, _) => self.op2(Op::Mov, *reg, ACC),
            Place::Elem { name, base, elem, len, index } => {
                let (abs, ind) =
                    if *elem == Ty::Char { (Op::StoreB, Op::StoreBR) } else { (Op::Store, Op::StoreR) };
                match self.const_elem(name, *base, *elem, *len, index)? {
                    Some(addr) => self.absolute(abs, ACC, addr),
                    None => {
                        self.op1(Op::Push, ACC);
                        self.elem_addr(name, *base, *elem, index)?;
                        self.op1(Op::Pop, ACC);
                        self.emit(ind, ACC, ADDR, Target::Imm(0));
                    }
                }
            }
        }
        Ok(())
    }

    // ---- expressions ----

    /// Load `e` into `reg` without touching `R0`, if it is a leaf.
    fn leaf_into(&mut self, e: &Expr, reg: u8) -> CResult<Option<Ty>> {
        if let Some(v) = self.const_eval(e) {
            self.load_const(reg, v);
            return Ok(Some(Self::const_ty(e)));
        }
        match &e.kind {
            ExprKind::Float(f) => {
                self.load_const(reg, f.to_bits() as i64);
                Ok(Some(Ty::Float))
            }
            ExprKind::Ident(name) => match self.lookup_or_err(name, e.pos)? {
                Binding::Reg { reg: r, ty } => {
                    self.op2(Op::Mov, reg, r);
                    Ok(Some(ty))
                }
                _ => Ok(None),
            },
            ExprKind::Field(base, field) => {
                let (r, ty) = self.field_reg(base, field, e.pos)?;
                self.op2(Op::Mov, reg, r);
                Ok(Some(ty))
            }
            _ => Ok(None),
        }
    }

    /// Left operand in `R0`, right in `R1`.
    fn operands(&mut self, l: &Expr, r: &Expr) -> CResult<(Ty, Ty)> {
        let lt = self.expr(l)?;
        if let Some(rt) = self.leaf_into(r, TMP)? {
            return Ok((lt, rt));
        }
        self.op1(Op::Push, ACC);
        let rt = self.expr(r)?;
        self.op2(Op::Mov, TMP, ACC);
        self.op1(Op::Pop, ACC);
        Ok((lt, rt))
    }

    fn compare(&mut self, l: &Expr, r: &Expr, pos: Pos) -> CResult<()> {
        let (lt, rt) = match self.const_eval(r) {
            Some(v) if (-0x8000..=0x7FFF).contains(&v) => {
                let lt = self.expr(l)?;
                self.opi(Op::CmpI, ACC, v);
                (lt, Self::const_ty(r))
            }
            _ => {
                let tys = self.operands(l, r)?;
                self.op2(Op::Cmp, ACC, TMP);
                tys
            }
        };
        self.integral("comparison", lt, pos)?;
        self.integral("comparison", rt, pos)
    }

    /// Jump to `target` when `e` is false.
    fn branch_false(&mut self, e: &Expr, target: &str) -> CResult<()> {
        match &e.kind {
            ExprKind::Binary(op, l, r) if op.is_comparison() => {
                self.compare(l, r, e.pos)?;
                self.jump(inverse_jump(*op), target);
            }
            ExprKind::Binary(BinOp::And, l, r) => {
                self.branch_false(l, target)?;
                self.branch_false(r, target)?;
            }
            ExprKind::Unary(UnOp::Not, x) => {
                let ty = self.expr(x)?;
                self.integral("condition", ty, e.pos)?;
                self.opi(Op::CmpI, ACC, 0);
                self.jump(Op::Jne, target);
            }
            _ => {
                let ty = self.expr(e)?;
                self.integral("condition", ty, e.pos)?;
                self.opi(Op::CmpI, ACC, 0);
                self.jump(Op::Je, target);
            }
        }
        Ok(())
    }

    /// Evaluate `e` into `R0` and return its type.
    fn expr(&mut self, e: &Expr) -> CResult<Ty> {
        if let Some(v) = self.const_eval(e) {
            self.load_const(ACC, v);
            return Ok(Self::const_ty(e));
        }
        match &e.kind {
            ExprKind::Float(f) => {
                self.load_const(ACC, f.to_bits() as i64);
                Ok(Ty::Float)
            }
            ExprKind::Str(s) => {
                let label = format!("__str_{}", self.strings.len());
                self.strings.push((label.clone(), s.clone()));
                self.emit(Op::LoadI, ACC, 0, Target::Label(label));
                Ok(Ty::Int)
            }
            ExprKind::Ident(name) => match self.lookup_or_err(name, e.pos)? {
                Binding::Reg { reg, ty } => {
                    self.op2(Op::Mov, ACC, reg);
                    Ok(ty)
                }
                Binding::Const { ty, value } => {
                    self.load_const(ACC, value);
                    Ok(ty)
                }
                Binding::Array { base, .. } => {
                    self.load_const(ACC, base as i64);
                    Ok(Ty::Int)
                }
                Binding::Instance => Err(CodegenError::UnsupportedType {
                    construct: format!("instance `{name}` used as a value"),
                    pos: e.pos,
                }),
            },
            ExprKind::Field(base, field) => {
                let (reg, ty) = self.field_reg(base, field, e.pos)?;
                self.op2(Op::Mov, ACC, reg);
                Ok(ty)
            }
            ExprKind::Index(arr, idx) => {
                let (name, base, elem, len) = self.array(arr)?;
                self.load_elem(&name, base, elem, len, idx)
            }
            ExprKind::Call(name, args) => self.call(name, args, e.pos),
            ExprKind::Unary(op, x) => self.unary(*op, x, e.pos),
            ExprKind::Binary(op, l, r) => self.binary(*op, l, r, e.pos),
            ExprKind::Assign(op, target, value) => self.assign(*op, target, value, e.pos),
            ExprKind::IncDec { target, inc, prefix } => self.inc_dec(target, *inc, *prefix, e.pos),
            ExprKind::Int(_) | ExprKind::Char(_) | ExprKind::Bool(_) => {
                // folded above
                Ok(Ty::Int)
            }
        }
    }

    fn unary(&mut self, op: UnOp, x: &Expr, pos: Pos) -> CResult<Ty> {
        let ty = self.expr(x)?;
        match op {
            UnOp::Plus => {}
            UnOp::Neg => {
                self.integral("negation", ty, pos)?;
                self.op1(Op::Neg, ACC);
            }
            UnOp::BitNot => {
                self.integral("`~`", ty, pos)?;
                self.op1(Op::Not, ACC);
            }
            UnOp::Not => {
                self.integral("`!`", ty, pos)?;
                let end = self.fresh();
                self.opi(Op::CmpI, ACC, 0);
                self.opi(Op::LoadI, ACC, 1);
                self.jump(Op::Je, &end);
                self.opi(Op::LoadI, ACC, 0);
                self.label(end);
                return Ok(Ty::Bool);
            }
        }
        Ok(ty)
    }

    fn binary(&mut self, op: BinOp, l: &Expr, r: &Expr, pos: Pos) -> CResult<Ty> {
        match op {
            BinOp::And => {
                let (f, end) = (self.fresh(), self.fresh());
                self.branch_false(l, &f)?;
                self.branch_false(r, &f)?;
                self.opi(Op::LoadI, ACC, 1);
                self.jump(Op::Jmp, &end);
                self.label(f);
                self.opi(Op::LoadI, ACC, 0);
                self.label(end);
                return Ok(Ty::Bool);
            }
            BinOp::Or => {
                let (t, end) = (self.fresh(), self.fresh());
                for side in [l, r] {
                    let ty = self.expr(side)?;
                    self.integral("`||`", ty, pos)?;
                    self.opi(Op::CmpI, ACC, 0);
                    self.jump(Op::Jne, &t);
                }
                self.opi(Op::LoadI, ACC, 0);
                self.jump(Op::Jmp, &end);
                self.label(t);
                self.opi(Op::LoadI, ACC, 1);
                self.label(end);
                return Ok(Ty::Bool);
            }
            _ if op.is_comparison() => {
                let end = self.fresh();
                self.compare(l, r, pos)?;
                self.opi(Op::LoadI, ACC, 1);
                self.jump(jump_if(op), &end);
                self.opi(Op::LoadI, ACC, 0);
                self.label(end);
                return Ok(Ty::Bool);
            }
            _ => {}
        }

        // immediate forms for small right-hand constants
        let imm = match (op, self.const_eval(r)) {
            (BinOp::Add, Some(v)) if (-0x8000..=0x7FFF).contains(&v) => Some((Op::AddI, v)),
            (BinOp::Sub, Some(v)) if (-0x8000..=0x7FFF).contains(&v) => Some((Op::SubI, v)),
            (BinOp::Mul, Some(v)) if (-0x8000..=0x7FFF).contains(&v) => Some((Op::MulI, v)),
            (BinOp::BitAnd, Some(v)) if (0..=0xFFFF).contains(&v) => Some((Op::AndI, v)),
            (BinOp::BitOr, Some(v)) if (0..=0xFFFF).contains(&v) => Some((Op::OrI, v)),
            (BinOp::BitXor, Some(v)) if (0..=0xFFFF).contains(&v) => Some((Op::XorI, v)),
            (BinOp::Shl, Some(v)) => Some((Op::ShlI, v & 31)),
            _ => None,
        };
        if let Some((iop, v)) = imm {
            let lt = self.expr(l)?;
            self.integral("arithmetic", lt, pos)?;
            self.opi(iop, ACC, v);
            return Ok(Ty::Int);
        }

        let (lt, rt) = self.operands(l, r)?;
        if lt == Ty::Float || rt == Ty::Float {
            if lt != rt {
                let found = if lt == Ty::Float { rt } else { lt };
                return Err(Self::mismatch("float arithmetic", Ty::Float, found, pos));
            }
            if op != BinOp::Mul {
                return Err(CodegenError::UnsupportedType { construct: "float arithmetic other than `*`".into(), pos });
            }
            self.op2(Op::Fmul, ACC, TMP);
            return Ok(Ty::Float);
        }
        self.integral("arithmetic", lt, pos)?;
        self.integral("arithmetic", rt, pos)?;
        self.op2(arith_op(op), ACC, TMP);
        Ok(Ty::Int)
    }

    fn assign(&mut self, op: Option<BinOp>, target: &Expr, value: &Expr, pos: Pos) -> CResult<Ty> {
        let place = self.place(target)?;
        let tty = Self::place_ty(&place);
        if let (Some(op), Place::Elem { name, base, elem, len, index }) = (op, &place) {
            if self.const_elem(name, *base, *elem, *len, index)?.is_none() {
                return self.compound_elem(op, name, *base, *elem, index, value);
            }
        }
        let vty = match op {
            None => self.expr(value)?,
            Some(op) => self.binary(op, target, value, pos)?,
        };
        self.compat("assignment", tty, vty, pos)?;
        self.store_acc(&place)?;
        Ok(tty)
    }

    /// `a[i] op= v` with a runtime index: the address is computed once and kept on the stack
    /// while `v` is evaluated.
    fn compound_elem(&mut self, op: BinOp, name: &str, base: u32, elem: Ty, index: &Expr, value: &Expr) -> CResult<Ty> {
        let (load, store) = indirect_ops(elem);
        self.elem_addr(name, base, elem, index)?;
        self.op1(Op::Push, ADDR);
        self.emit(load, ACC, ADDR, Target::Imm(0));
        self.op1(Op::Push, ACC);
        let vty = self.expr(value)?;
        self.integral("compound assignment", vty, value.pos)?;
        self.op2(Op::Mov, TMP, ACC);
        self.op1(Op::Pop, ACC);
        self.op2(arith_op(op), ACC, TMP);
        self.op1(Op::Pop, ADDR);
        self.emit(store, ACC, ADDR, Target::Imm(0));
        Ok(elem)
    }

    fn inc_dec(&mut self, target: &Expr, inc: bool, prefix: bool, pos: Pos) -> CResult<Ty> {
        let place = self.place(target)?;
        let ty = Self::place_ty(&place);
        self.integral(if inc { "`++`" } else { "`--`" }, ty, pos)?;
        let (step, undo) = if inc { (Op::Inc, Op::Dec) } else { (Op::Dec, Op::Inc) };
        match &place {
            &Place::Reg(reg, _) => {
                if prefix {
                    self.op1(step, reg);
                    self.op2(Op::Mov, ACC, reg);
                } else {
                    self.op2(Op::Mov, ACC, reg);
                    self.op1(step, reg);
                }
            }
            Place::Elem { name, base, elem, len, index } => {
                match self.const_elem(name, *base, *elem, *len, index)? {
                    Some(_) => {
                        self.load_elem(name, *base, *elem, *len, index)?;
                        self.op1(step, ACC);
                        self.store_acc(&place)?;
                    }
                    None => {
                        let (load, store) = indirect_ops(*elem);
                        self.elem_addr(name, *base, *elem, index)?;
                        self.emit(load, ACC, ADDR, Target::Imm(0));
                        self.op1(step, ACC);
                        self.emit(store, ACC, ADDR, Target::Imm(0));
                    }
                }
                if !prefix {
                    self.op1(undo, ACC);
                }
            }
        }
        Ok(ty)
    }

    // ---- calls ----

    fn call(&mut self, name: &str, args: &[Expr], pos: Pos) -> CResult<Ty> {
        if let Some(intr) = Intrinsic::lookup(name) {
            let (min, max) = intr.arity();
            if args.len() < min || args.len() > max {
                let expected = if args.len() < min { min } else { max };
                return Err(CodegenError::ArityMismatch { name: name.into(), expected, found: args.len(), pos });
            }
            return self.intrinsic(name, intr, args, pos);
        }
        let Some(sig) = self.funcs.get(name).cloned() else {
            return Err(CodegenError::UndefinedIdentifier { name: name.into(), pos });
        };
        if args.len() != sig.params.len() {
            return Err(CodegenError::ArityMismatch {
                name: name.into(),
                expected: sig.params.len(),
                found: args.len(),
                pos,
            });
        }
        let saved = self.live_regs();
        for &r in &saved {
            self.op1(Op::Push, r);
        }
        for (arg, &pty) in args.iter().zip(&sig.params) {
            let ty = self.expr(arg)?;
            self.compat(&format!("argument to `{name}`"), pty, ty, arg.pos)?;
            self.op1(Op::Push, ACC);
        }
        for i in (0..args.len()).rev() {
            self.op1(Op::Pop, (FIRST_VAR + i) as u8);
        }
        self.jump(Op::Call, &fn_label(name));
        for &r in saved.iter().rev() {
            self.op1(Op::Pop, r);
        }
        Ok(sig.ret)
    }

    fn int_arg(&mut self, name: &str, e: &Expr) -> CResult<()> {
        let ty = self.expr(e)?;
        self.integral(&format!("argument to `{name}`"), ty, e.pos)
    }

    /// Evaluate up to three arguments into `R0`, `R1`, `R2`.
    fn args3(&mut self, name: &str, args: &[Expr]) -> CResult<()> {
        for a in args {
            self.int_arg(name, a)?;
            self.op1(Op::Push, ACC);
        }
        for i in (0..args.len()).rev() {
            self.op1(Op::Pop, i as u8);
        }
        Ok(())
    }

    fn intrinsic(&mut self, name: &str, intr: Intrinsic, args: &[Expr], pos: Pos) -> CResult<Ty> {
        match intr {
            Intrinsic::Unary(op) => {
                self.int_arg(name, &args[0])?;
                self.op1(op, ACC);
            }
            Intrinsic::Binary(op) => {
                let (lt, rt) = self.operands(&args[0], &args[1])?;
                self.integral(name, lt, pos)?;
                self.integral(name, rt, pos)?;
                self.op2(op, ACC, TMP);
            }
            Intrinsic::Lerp => {
                self.args3(name, args)?;
                self.out.push(Item::Instr(Instr { op: Op::Lerp, rd: ACC, rs: TMP, rt: ARG3, target: Target::None }));
            }
            Intrinsic::Min | Intrinsic::Max => {
                let (lt, rt) = self.operands(&args[0], &args[1])?;
                self.integral(name, lt, pos)?;
                self.integral(name, rt, pos)?;
                let keep = self.fresh();
                self.op2(Op::Cmp, ACC, TMP);
                self.jump(if matches!(intr, Intrinsic::Min) { Op::Jle } else { Op::Jge }, &keep);
                self.op2(Op::Mov, ACC, TMP);
                self.label(keep);
            }
            Intrinsic::Clamp => {
                self.args3(name, args)?;
                let (lo_ok, hi_ok) = (self.fresh(), self.fresh());
                self.op2(Op::Cmp, ACC, TMP);
                self.jump(Op::Jge, &lo_ok);
                self.op2(Op::Mov, ACC, TMP);
                self.label(lo_ok);
                self.op2(Op::Cmp, ACC, ARG3);
                self.jump(Op::Jle, &hi_ok);
                self.op2(Op::Mov, ACC, ARG3);
                self.label(hi_ok);
            }
            Intrinsic::Swap => {
                let (a, b) = (self.place(&args[0])?, self.place(&args[1])?);
                let (Place::Reg(ra, ta), Place::Reg(rb, tb)) = (a, b) else {
                    return Err(CodegenError::UnsupportedType { construct: "`swap` of array elements".into(), pos });
                };
                self.compat("`swap`", ta, tb, pos)?;
                self.op2(Op::Mov, ACC, ra);
                self.op2(Op::Mov, ra, rb);
                self.op2(Op::Mov, rb, ACC);
                return Ok(Ty::Void);
            }
            Intrinsic::Sys { num, .. } => {
                for a in args {
                    self.int_arg(name, a)?;
                    self.op1(Op::Push, ACC);
                }
                for i in (0..args.len()).rev() {
                    self.op1(Op::Pop, (i + 1) as u8);
                }
                self.load_const(ACC, num as i64);
                self.op0(Op::Syscall);
            }
        }
        Ok(Ty::Int)
    }

    // ---- statements ----

    fn function(&mut self, f: &Func) -> CResult<()> {
        let sig = self.funcs.get(&f.name).cloned().ok_or_else(|| CodegenError::UndefinedIdentifier {
            name: f.name.clone(),
            pos: f.pos,
        })?;
        self.scopes.clear();
        self.pool = BitArray::ZERO;
        self.loops.clear();
        self.ret_label = format!("__ret_{}", f.name);
        self.ret_ty = sig.ret;
        let start = self.out.len();

        self.label(fn_label(&f.name));
        self.push_scope();
        for (p, &ty) in f.params.iter().zip(&sig.params) {
            self.check_free(&p.name, p.pos)?;
            let reg = self.alloc_reg(&p.name, p.pos)?;
            self.bind(p.name.clone(), Binding::Reg { reg, ty });
        }
        for s in &f.body {
            self.stmt(s)?;
        }
        self.pop_scope();
        self.opi(Op::LoadI, ACC, 0);
        self.label(self.ret_label.clone());
        self.op0(Op::Ret);
        debug!(function = %f.name, params = f.params.len(), items = self.out.len() - start, "function lowered");
        Ok(())
    }

    fn block(&mut self, stmts: &[Stmt]) -> CResult<()> {
        self.push_scope();
        for s in stmts {
            self.stmt(s)?;
        }
        self.pop_scope();
        Ok(())
    }

    fn scoped(&mut self, s: &Stmt) -> CResult<()> {
        self.block(std::slice::from_ref(s))
    }

    fn stmt(&mut self, s: &Stmt) -> CResult<()> {
        match s {
            Stmt::Decl(d) => self.decl(d),
            Stmt::Expr(e) => self.expr(e).map(|_| ()),
            Stmt::Block(b) => self.block(b),
            Stmt::If { cond, then, els } => {
                let else_l = self.fresh();
                self.branch_false(cond, &else_l)?;
                self.scoped(then)?;
                match els {
                    Some(els) => {
                        let end = self.fresh();
                        self.jump(Op::Jmp, &end);
                        self.label(else_l);
                        self.scoped(els)?;
                        self.label(end);
                    }
                    None => self.label(else_l),
                }
                Ok(())
            }
            Stmt::While { cond, body } => {
                let (head, end) = (self.fresh(), self.fresh());
                self.label(head.clone());
                self.branch_false(cond, &end)?;
                self.loop_body(body, &head, &end)?;
                self.jump(Op::Jmp, &head);
                self.label(end);
                Ok(())
            }
            Stmt::DoWhile { body, cond } => {
                let (head, test, end) = (self.fresh(), self.fresh(), self.fresh());
                self.label(head.clone());
                self.loop_body(body, &test, &end)?;
                self.label(test);
                self.branch_false(cond, &end)?;
                self.jump(Op::Jmp, &head);
                self.label(end);
                Ok(())
            }
            Stmt::For { init, cond, step, body } => {
                self.push_scope();
                if let Some(init) = init {
                    self.stmt(init)?;
                }
                let (head, next, end) = (self.fresh(), self.fresh(), self.fresh());
                self.label(head.clone());
                if let Some(cond) = cond {
                    self.branch_false(cond, &end)?;
                }
                self.loop_body(body, &next, &end)?;
                self.label(next);
                if let Some(step) = step {
                    self.expr(step)?;
                }
                self.jump(Op::Jmp, &head);
                self.label(end);
                self.pop_scope();
                Ok(())
            }
            Stmt::Break(pos) => match self.loops.last() {
                Some(l) => {
                    let brk = l.brk.clone();
                    self.jump(Op::Jmp, &brk);
                    Ok(())
                }
                None => Err(CodegenError::BreakOutsideLoop { pos: *pos }),
            },
            Stmt::Continue(pos) => match self.loops.last() {
                Some(l) => {
                    let cont = l.cont.clone();
                    self.jump(Op::Jmp, &cont);
                    Ok(())
                }
                None => Err(CodegenError::ContinueOutsideLoop { pos: *pos }),
            },
            Stmt::Return(value, pos) => {
                match (value, self.ret_ty) {
                    (Some(e), rt) => {
                        let ty = self.expr(e)?;
                        self.compat("return", rt, ty, *pos)?;
                    }
                    (None, Ty::Void) => {}
                    (None, rt) => return Err(Self::mismatch("return", rt, Ty::Void, *pos)),
                }
                let l = self.ret_label.clone();
                self.jump(Op::Jmp, &l);
                Ok(())
            }
            Stmt::Asm(text, pos) => {
                for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
                    let ins = parse_instruction(line).map_err(|source| CodegenError::InlineAsm { pos: *pos, source })?;
                    self.out.push(Item::Instr(ins));
                }
                Ok(())
            }
        }
    }

    fn loop_body(&mut self, body: &Stmt, cont: &str, brk: &str) -> CResult<()> {
        self.loops.push(Loop { cont: cont.to_string(), brk: brk.to_string() });
        let r = self.scoped(body);
        self.loops.pop();
        r
    }

    fn decl(&mut self, d: &Decl) -> CResult<()> {
        self.check_free(&d.name, d.pos)?;
        if let Some(size) = &d.array {
            return self.array_decl(d, size.as_ref());
        }
        if let Type::Class(class) = &d.ty {
            return self.instance_decl(d, class);
        }
        let ty = match Ty::of(&d.ty) {
            Some(t) if t != Ty::Void => t,
            _ => return Err(CodegenError::UnsupportedType { construct: format!("variable `{}`", d.name), pos: d.pos }),
        };
        if d.is_const && ty != Ty::Float {
            if let Some(value) = d.init.as_ref().and_then(|i| match i {
                Init::Expr(e) => self.const_eval(e),
                Init::List(_) => None,
            }) {
                self.bind(d.name.clone(), Binding::Const { ty, value });
                return Ok(());
            }
        }
        let reg = self.alloc_reg(&d.name, d.pos)?;
        match &d.init {
            Some(Init::Expr(e)) => {
                let vty = self.expr(e)?;
                self.compat(&format!("initializer of `{}`", d.name), ty, vty, e.pos)?;
                self.op2(Op::Mov, reg, ACC);
            }
            Some(Init::List(_)) => {
                return Err(CodegenError::UnsupportedType {
                    construct: format!("brace initializer for scalar `{}`", d.name),
                    pos: d.pos,
                })
            }
            None => self.opi(Op::LoadI, reg, 0),
        }
        self.bind(d.name.clone(), Binding::Reg { reg, ty });
        Ok(())
    }

    fn array_decl(&mut self, d: &Decl, size: Option<&Expr>) -> CResult<()> {
        let elem = match Ty::of(&d.ty) {
            Some(t @ (Ty::Int | Ty::Bool | Ty::Char)) => t,
            _ => return Err(CodegenError::UnsupportedType { construct: format!("array `{}`", d.name), pos: d.pos }),
        };
        let init_len = match &d.init {
            None => None,
            Some(Init::List(items)) => Some(items.len() as u32),
            Some(Init::Expr(Expr { kind: ExprKind::Str(s), .. })) if elem == Ty::Char => Some(s.len() as u32 + 1),
            Some(Init::Expr(e)) => {
                return Err(Self::mismatch(&format!("initializer of array `{}`", d.name), elem, Ty::Int, e.pos))
            }
        };
        let len = match (size, init_len) {
            (Some(e), _) => match self.const_eval(e) {
                Some(n) if n > 0 => u32::try_from(n).map_err(|_| CodegenError::ArrayTooLarge {
                    name: d.name.clone(),
                    len: n,
                    pos: e.pos,
                })?,
                _ => return Err(CodegenError::IndexType { name: d.name.clone(), pos: e.pos }),
            },
            (None, Some(n)) if n > 0 => n,
            _ => {
                return Err(CodegenError::UnsupportedType {
                    construct: format!("array `{}` without a size", d.name),
                    pos: d.pos,
                })
            }
        };
        if let Some(n) = init_len {
            if n > len {
                return Err(CodegenError::IndexOutOfBounds { name: d.name.clone(), index: n as i64 - 1, len, pos: d.pos });
            }
        }
        let too_large = || CodegenError::ArrayTooLarge { name: d.name.clone(), len: len.into(), pos: d.pos };
        let base = self.data_next.checked_add(3).ok_or_else(too_large)? & !3;
        let end = len.checked_mul(elem.size()).and_then(|n| base.checked_add(n)).ok_or_else(too_large)?;
        if end > self.data_limit() {
            return Err(too_large());
        }
        self.data_next = end;
        debug!(array = %d.name, base = format_args!("{base:#x}"), len, "array placed");

        let store = if elem == Ty::Char { Op::StoreB } else { Op::Store };
        match &d.init {
            Some(Init::List(items)) => {
                for (i, e) in items.iter().enumerate() {
                    let ty = self.expr(e)?;
                    self.compat(&format!("element of `{}`", d.name), elem, ty, e.pos)?;
                    self.absolute(store, ACC, base + i as u32 * elem.size());
                }
            }
            Some(Init::Expr(Expr { kind: ExprKind::Str(s), .. })) => {
                for (i, b) in s.bytes().enumerate() {
                    self.opi(Op::LoadI, ACC, b as i64);
                    self.absolute(store, ACC, base + i as u32);
                }
            }
            _ => {}
        }
        if let Some(n) = init_len {
            if n < len {
                self.opi(Op::LoadI, ACC, 0);
                for i in n..len {
                    self.absolute(store, ACC, base + i * elem.size());
                }
            }
        }
        self.bind(d.name.clone(), Binding::Array { base, elem, len });
        Ok(())
    }

    fn instance_decl(&mut self, d: &Decl, class: &str) -> CResult<()> {
        let Some(fields) = self.classes.get(class).cloned() else {
            return Err(CodegenError::UndefinedIdentifier { name: class.to_string(), pos: d.pos });
        };
        let inits: &[Expr] = match &d.init {
            None => &[],
            Some(Init::List(items)) => items,
            Some(Init::Expr(e)) => {
                return Err(CodegenError::UnsupportedType {
                    construct: format!("non-brace initializer of `{}`", d.name),
                    pos: e.pos,
                })
            }
        };
        if inits.len() > fields.len() {
            return Err(CodegenError::ArityMismatch {
                name: class.to_string(),
                expected: fields.len(),
                found: inits.len(),
                pos: d.pos,
            });
        }
        let mut bound = Vec::new();
        for (i, (fname, fty)) in fields.iter().enumerate() {
            let full = format!("{}.{fname}", d.name);
            let reg = self.alloc_reg(&full, d.pos)?;
            match inits.get(i) {
                Some(e) => {
                    let ty = self.expr(e)?;
                    self.compat(&format!("field `{full}`"), *fty, ty, e.pos)?;
                    self.op2(Op::Mov, reg, ACC);
                }
                None => self.opi(Op::LoadI, reg, 0),
            }
            bound.push((full, Binding::Reg { reg, ty: *fty }));
        }
        for (name, b) in bound {
            self.bind(name, b);
        }
        self.bind(d.name.clone(), Binding::Instance);
        Ok(())
    }
}
