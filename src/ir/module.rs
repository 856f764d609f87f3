// This module defines the statement and expression trees the interpreter
// walks, together with the symbol, function and module containers produced by
// the importer. The opcode set is exactly the subset the engine executes;
// everything outside it is represented by the Nyi variants, which the
// dispatcher rejects as a fatal condition when reached. Statement bodies are
// trees (block nodes nest), and are flattened into a linear statement vector
// once per function at load time.

use crate::ir::{LabelId, MirConst, PrimType, PuIdx, StIdx, StrIdx, TyIdx, TypeTable};

/// Storage class of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Global,
    /// File-scope static.
    FStatic,
    /// Function-local static.
    PuStatic,
    Extern,
    Auto,
    Formal,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub idx: StIdx,
    pub name: String,
    pub storage: Storage,
    pub ty: TyIdx,
    pub init: Option<MirConst>,
}

impl Symbol {
    pub fn is_const(&self) -> bool {
        self.init.is_some()
    }
}

/// Declared formal parameter. Register-resident formals carry their
/// pseudo-register number; the rest live in named-variable slots.
#[derive(Debug, Clone)]
pub struct FormalDef {
    pub sym: StIdx,
    pub ty: TyIdx,
    pub preg: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub pu: PuIdx,
    pub name: String,
    pub formals: Vec<FormalDef>,
    /// Local symbol table; holds function-local statics among others.
    pub locals: Vec<Symbol>,
    pub ret_ty: TyIdx,
    /// Auto-variable area size, importer-computed.
    pub frame_size: u32,
    /// One past the highest pseudo-register number used.
    pub num_pregs: u32,
    pub is_varargs: bool,
    pub is_extern: bool,
    /// Declared with no prototype.
    pub is_implicit: bool,
    pub is_weak: bool,
    pub body: Option<Stmt>,
}

impl Function {
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }
}

#[derive(Debug, Default)]
pub struct Module {
    pub types: TypeTable,
    /// Global symbol table, indexed by StIdx.
    pub symbols: Vec<Symbol>,
    /// Function table, indexed by PuIdx.
    pub functions: Vec<Function>,
    /// String-literal table, indexed by StrIdx.
    pub strings: Vec<String>,
    /// Declared size of the uninitialized function-local-static segment,
    /// addressed at run time through the GP register.
    pub global_mem_size: u32,
}

impl Module {
    pub fn func(&self, pu: PuIdx) -> Option<&Function> {
        self.functions.get(pu as usize)
    }

    pub fn global_symbol(&self, st: StIdx) -> Option<&Symbol> {
        self.symbols.get(st as usize)
    }
}

/// Register operand of regread/regassign. Negative special registers of the
/// source dialect appear here as named variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegId {
    Preg(u32),
    Retval0,
    Retval1,
    /// Frame pointer.
    Fp,
    /// Base of the uninitialized function-local-static segment.
    Gp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Ashr,
    Lshr,
    Band,
    Bior,
    Bxor,
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Abs,
    Bnot,
    Lnot,
}

/// Runtime intrinsics, both operator- and call-form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrinsicId {
    VaStart,
    Sin,
    Ctz32,
    Clz32,
    Ffs,
    Rev32,
}

impl IntrinsicId {
    pub fn name(self) -> &'static str {
        match self {
            IntrinsicId::VaStart => "va_start",
            IntrinsicId::Sin => "sin",
            IntrinsicId::Ctz32 => "ctz32",
            IntrinsicId::Clz32 => "clz32",
            IntrinsicId::Ffs => "ffs",
            IntrinsicId::Rev32 => "rev32",
        }
    }
}

/// Expression node: result primitive type plus operator payload.
#[derive(Debug, Clone)]
pub struct Expr {
    pub ptyp: PrimType,
    pub kind: ExprKind,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    ConstVal(MirConst),
    ConstStr(StrIdx),
    RegRead(RegId),
    /// Address of a symbol plus byte offset. `local` selects the current
    /// function's symbol space (formals, function-local statics) over the
    /// global table.
    AddrOfOff {
        local: bool,
        sym: StIdx,
        offset: i64,
    },
    AddrOfFunc(PuIdx),
    AddrOfLabel(LabelId),
    /// Load at frame pointer + offset. `agg_size` is the rounded byte size
    /// when the result type is an aggregate, zero otherwise.
    IreadFpOff {
        offset: i64,
        agg_size: u32,
    },
    /// Load at evaluated base + offset.
    IreadOff {
        offset: i64,
        agg_size: u32,
        base: Box<Expr>,
    },
    /// Aggregate load through a pointer; only valid feeding a call argument.
    Iread {
        agg_size: u32,
        base: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Comparison evaluated at `opnd_ty`, result retagged to the node type.
    Compare {
        op: CmpOp,
        opnd_ty: PrimType,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnOp,
        opnd: Box<Expr>,
    },
    Select {
        cond: Box<Expr>,
        then: Box<Expr>,
        other: Box<Expr>,
    },
    Cvt {
        from: PrimType,
        opnd: Box<Expr>,
    },
    /// Re-tag without conversion.
    Retype(Box<Expr>),
    /// Sign/zero extension of a bit slice at offset 0.
    Extend {
        signed: bool,
        boffset: u8,
        bsize: u8,
        opnd: Box<Expr>,
    },
    ExtractBits {
        boffset: u8,
        bsize: u8,
        opnd: Box<Expr>,
    },
    DepositBits {
        boffset: u8,
        bsize: u8,
        dst: Box<Expr>,
        src: Box<Expr>,
    },
    Alloca(Box<Expr>),
    IntrinsicOp {
        id: IntrinsicId,
        opnd: Box<Expr>,
    },
    Nyi(&'static str),
}

impl Expr {
    pub fn new(ptyp: PrimType, kind: ExprKind) -> Self {
        Expr { ptyp, kind }
    }

    pub fn iconst(ptyp: PrimType, ty: TyIdx, val: i64) -> Self {
        Expr::new(ptyp, ExprKind::ConstVal(MirConst::Int { ty, val }))
    }

    pub fn regread(ptyp: PrimType, reg: RegId) -> Self {
        Expr::new(ptyp, ExprKind::RegRead(reg))
    }

    pub fn binary(ptyp: PrimType, op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::new(
            ptyp,
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        )
    }

    pub fn compare(ptyp: PrimType, op: CmpOp, opnd_ty: PrimType, lhs: Expr, rhs: Expr) -> Self {
        Expr::new(
            ptyp,
            ExprKind::Compare {
                op,
                opnd_ty,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        )
    }
}

/// Statement node. Bodies are trees of these; `Block` is flattened away at
/// function-metadata build time.
#[derive(Debug, Clone)]
pub enum Stmt {
    Block(Vec<Stmt>),
    IassignFpOff {
        ptyp: PrimType,
        offset: i64,
        rhs: Expr,
    },
    IassignOff {
        ptyp: PrimType,
        offset: i64,
        addr: Expr,
        rhs: Expr,
    },
    /// Aggregate block copy of `size` bytes.
    BlkAssignOff {
        offset: i64,
        size: u32,
        dst: Expr,
        src: Expr,
    },
    Regassign {
        ptyp: PrimType,
        reg: RegId,
        rhs: Expr,
    },
    Call {
        callee: PuIdx,
        args: Vec<Expr>,
    },
    /// Indirect call; `args[0]` evaluates to the target address.
    IcallProto {
        ret_ty: TyIdx,
        args: Vec<Expr>,
    },
    IntrinsicCall {
        id: IntrinsicId,
        args: Vec<Expr>,
    },
    CondGoto {
        on_true: bool,
        cond: Expr,
        label: LabelId,
    },
    Goto(LabelId),
    RangeGoto {
        opnd: Expr,
        tag_offset: i64,
        table: Vec<LabelId>,
    },
    Igoto(Expr),
    Label(LabelId),
    Comment(String),
    Return,
    Nyi(&'static str),
}
