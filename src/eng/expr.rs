// This module implements expression evaluation. Every node produces a fresh
// ValueCell. Arithmetic families switch on the result primitive type and
// apply the native operator at that width; division and remainder define the
// divide-by-zero and MIN/-1 cases as zero instead of trapping; the unsigned
// right shift validates its amount and computes at the output width even when
// a signed-32 operand meets an unsigned-32 result type. Aggregate-valued
// reads take an explicit evaluation context from the enclosing statement:
// staging into the outgoing aggregate-argument buffer for a call operand, or
// a direct no-copy view sized to the function's return size when feeding the
// return register. eq/ne on floats use the dialect's epsilon comparison, and
// select converts both arms before choosing, so untaken-arm conversions still
// happen.

//! Expression evaluation.

use std::rc::Rc;

use crate::error::{EngResult, EngineError};
use crate::eng::cvt;
use crate::eng::frame::Frame;
use crate::eng::mem::{self, MemRef};
use crate::eng::module::ModuleState;
use crate::eng::value::ValueCell;
use crate::ir::{BinOp, CmpOp, Expr, ExprKind, IntrinsicId, MirConst, PrimType, RegId, Storage, UnOp};

/// Destination context for aggregate-valued reads.
#[derive(Debug, Clone, Copy)]
pub enum AggCtx {
    None,
    /// The read feeds a call argument; bytes are staged into the outgoing
    /// aggregate buffer at this offset.
    CallArg { offset: u32, size: u32 },
    /// The read feeds the return register; the result views the source bytes
    /// directly.
    RetRead { size: u32 },
}

fn mask_of(bsize: u32) -> u64 {
    if bsize >= 64 {
        u64::MAX
    } else {
        (1u64 << bsize) - 1
    }
}

macro_rules! int_arith {
    ($op:expr, $a:expr, $b:expr, $t:ty, $wrap:path) => {{
        let x = $a.bits() as $t;
        let y = $b.bits() as $t;
        Ok($wrap(match $op {
            BinOp::Add => x.wrapping_add(y),
            BinOp::Sub => x.wrapping_sub(y),
            BinOp::Mul => x.wrapping_mul(y),
            BinOp::Div => x.checked_div(y).unwrap_or(0),
            BinOp::Rem => x.checked_rem(y).unwrap_or(0),
            BinOp::Max => x.max(y),
            BinOp::Min => x.min(y),
            _ => unreachable!(),
        }))
    }};
}

/// Arithmetic, remainder and min/max at the result type's width. Operand
/// payloads are reinterpreted at that width, union-style.
fn arith(op: BinOp, ptyp: PrimType, a: &ValueCell, b: &ValueCell) -> EngResult<ValueCell> {
    match ptyp {
        PrimType::I8 => int_arith!(op, a, b, i8, ValueCell::I8),
        PrimType::I16 => int_arith!(op, a, b, i16, ValueCell::I16),
        PrimType::I32 => int_arith!(op, a, b, i32, ValueCell::I32),
        PrimType::I64 => int_arith!(op, a, b, i64, ValueCell::I64),
        PrimType::U8 => int_arith!(op, a, b, u8, ValueCell::U8),
        PrimType::U16 => int_arith!(op, a, b, u16, ValueCell::U16),
        PrimType::U32 => int_arith!(op, a, b, u32, ValueCell::U32),
        PrimType::U64 | PrimType::A64 | PrimType::Ptr => {
            let r = int_arith!(op, a, b, u64, ValueCell::U64)?;
            Ok(if ptyp == PrimType::U64 {
                r
            } else {
                r.retag(ptyp)
            })
        }
        PrimType::F32 => {
            if matches!(op, BinOp::Rem) {
                return Err(EngineError::TypeMismatch {
                    context: "remainder",
                    found: ptyp,
                });
            }
            let x = a.as_f32();
            let y = b.as_f32();
            Ok(ValueCell::F32(match op {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                BinOp::Mul => x * y,
                BinOp::Div => x / y,
                BinOp::Max => x.max(y),
                BinOp::Min => x.min(y),
                _ => unreachable!(),
            }))
        }
        PrimType::F64 => {
            if matches!(op, BinOp::Rem) {
                return Err(EngineError::TypeMismatch {
                    context: "remainder",
                    found: ptyp,
                });
            }
            let x = a.as_f64();
            let y = b.as_f64();
            Ok(ValueCell::F64(match op {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                BinOp::Mul => x * y,
                BinOp::Div => x / y,
                BinOp::Max => x.max(y),
                BinOp::Min => x.min(y),
                _ => unreachable!(),
            }))
        }
        _ => Err(EngineError::TypeMismatch {
            context: "arithmetic",
            found: ptyp,
        }),
    }
}

macro_rules! int_bits {
    ($op:expr, $a:expr, $sh:expr, $t:ty, $wrap:path) => {{
        let x = $a.bits() as $t;
        Ok($wrap(match $op {
            BinOp::Shl => x.wrapping_shl($sh.bits() as u32),
            BinOp::Ashr => x.wrapping_shr($sh.bits() as u32),
            BinOp::Band => x & ($sh.bits() as $t),
            BinOp::Bior => x | ($sh.bits() as $t),
            BinOp::Bxor => x ^ ($sh.bits() as $t),
            _ => unreachable!(),
        }))
    }};
}

/// Integer bit operations; the left operand is converted (not reinterpreted)
/// to the result type first.
fn bin_int(op: BinOp, ptyp: PrimType, a: &ValueCell, b: &ValueCell) -> EngResult<ValueCell> {
    let a = cvt::convert(ptyp, a)?;
    match ptyp {
        PrimType::I8 => int_bits!(op, a, b, i8, ValueCell::I8),
        PrimType::I16 => int_bits!(op, a, b, i16, ValueCell::I16),
        PrimType::I32 => int_bits!(op, a, b, i32, ValueCell::I32),
        PrimType::I64 => int_bits!(op, a, b, i64, ValueCell::I64),
        PrimType::U8 => int_bits!(op, a, b, u8, ValueCell::U8),
        PrimType::U16 => int_bits!(op, a, b, u16, ValueCell::U16),
        PrimType::U32 => int_bits!(op, a, b, u32, ValueCell::U32),
        PrimType::U64 => int_bits!(op, a, b, u64, ValueCell::U64),
        _ => Err(EngineError::TypeMismatch {
            context: "bit operation",
            found: ptyp,
        }),
    }
}

/// Unsigned right shift: validated amount, computed unsigned at the output
/// width regardless of the operand's declared sign.
fn lshr(ptyp: PrimType, a: &ValueCell, b: &ValueCell) -> EngResult<ValueCell> {
    if !ptyp.is_int() {
        return Err(EngineError::TypeMismatch {
            context: "unsigned shift",
            found: ptyp,
        });
    }
    let src = a.ptyp();
    let same_width = src.is_int() && src.size() == ptyp.size();
    if !same_width {
        return Err(EngineError::TypeMismatch {
            context: "unsigned shift operand",
            found: src,
        });
    }
    let sh = b.bits();
    if sh > 64 {
        return Err(EngineError::ShiftOutOfRange(sh));
    }
    let width = ptyp.bits() as u64;
    let masked = a.bits() & mask_of(ptyp.bits());
    let out = if sh >= width { 0 } else { masked >> sh };
    Ok(ValueCell::U64(out).retag(ptyp))
}

fn compare(
    op: CmpOp,
    opnd_ty: PrimType,
    out_ty: PrimType,
    a: &ValueCell,
    b: &ValueCell,
) -> EngResult<ValueCell> {
    let truth = match opnd_ty {
        PrimType::F32 => {
            let x = a.retag(PrimType::F32).as_f32();
            let y = b.retag(PrimType::F32).as_f32();
            match op {
                CmpOp::Eq => cvt::float_eq(x, y),
                CmpOp::Ne => !cvt::float_eq(x, y),
                CmpOp::Gt => x > y,
                CmpOp::Ge => x >= y,
                CmpOp::Lt => x < y,
                CmpOp::Le => x <= y,
            }
        }
        PrimType::F64 => {
            let x = a.retag(PrimType::F64).as_f64();
            let y = b.retag(PrimType::F64).as_f64();
            match op {
                CmpOp::Eq => cvt::double_eq(x, y),
                CmpOp::Ne => !cvt::double_eq(x, y),
                CmpOp::Gt => x > y,
                CmpOp::Ge => x >= y,
                CmpOp::Lt => x < y,
                CmpOp::Le => x <= y,
            }
        }
        t if t.is_signed() => {
            let w = t.bits();
            let sx = ((a.bits() & mask_of(w)) as i64) << (64 - w) >> (64 - w);
            let sy = ((b.bits() & mask_of(w)) as i64) << (64 - w) >> (64 - w);
            cmp_ord(op, sx.cmp(&sy))
        }
        t if t.is_unsigned() || t.is_address() => {
            let w = t.bits();
            let ux = a.bits() & mask_of(w);
            let uy = b.bits() & mask_of(w);
            cmp_ord(op, ux.cmp(&uy))
        }
        other => {
            return Err(EngineError::TypeMismatch {
                context: "comparison",
                found: other,
            })
        }
    };
    // The comparison materializes as a 64-bit integer retagged to the
    // expression type.
    Ok(ValueCell::I64(truth as i64).retag(out_ty))
}

fn cmp_ord(op: CmpOp, ord: std::cmp::Ordering) -> bool {
    match op {
        CmpOp::Eq => ord.is_eq(),
        CmpOp::Ne => ord.is_ne(),
        CmpOp::Gt => ord.is_gt(),
        CmpOp::Ge => ord.is_ge(),
        CmpOp::Lt => ord.is_lt(),
        CmpOp::Le => ord.is_le(),
    }
}

fn unary(op: UnOp, ptyp: PrimType, v: &ValueCell) -> EngResult<ValueCell> {
    match op {
        UnOp::Neg => Ok(match ptyp {
            PrimType::I8 => ValueCell::I8((v.bits() as i8).wrapping_neg()),
            PrimType::I16 => ValueCell::I16((v.bits() as i16).wrapping_neg()),
            PrimType::I32 => ValueCell::I32((v.bits() as i32).wrapping_neg()),
            PrimType::I64 => ValueCell::I64((v.bits() as i64).wrapping_neg()),
            PrimType::U8 => ValueCell::U8((v.bits() as u8).wrapping_neg()),
            PrimType::U16 => ValueCell::U16((v.bits() as u16).wrapping_neg()),
            PrimType::U32 => ValueCell::U32((v.bits() as u32).wrapping_neg()),
            PrimType::U64 => ValueCell::U64(v.bits().wrapping_neg()),
            PrimType::F32 => ValueCell::F32(-v.as_f32()),
            PrimType::F64 => ValueCell::F64(-v.as_f64()),
            other => {
                return Err(EngineError::TypeMismatch {
                    context: "negation",
                    found: other,
                })
            }
        }),
        UnOp::Abs => Ok(match ptyp {
            PrimType::I8 => ValueCell::I8((v.bits() as i8).wrapping_abs()),
            PrimType::I16 => ValueCell::I16((v.bits() as i16).wrapping_abs()),
            PrimType::I32 => ValueCell::I32((v.bits() as i32).wrapping_abs()),
            PrimType::I64 => ValueCell::I64((v.bits() as i64).wrapping_abs()),
            PrimType::F32 => ValueCell::F32(v.as_f32().abs()),
            PrimType::F64 => ValueCell::F64(v.as_f64().abs()),
            other => {
                return Err(EngineError::TypeMismatch {
                    context: "absolute value",
                    found: other,
                })
            }
        }),
        UnOp::Bnot => {
            if !ptyp.is_int() {
                return Err(EngineError::TypeMismatch {
                    context: "bitwise not",
                    found: ptyp,
                });
            }
            Ok(ValueCell::U64(!v.bits()).retag(ptyp))
        }
        UnOp::Lnot => {
            if !ptyp.is_int() {
                return Err(EngineError::TypeMismatch {
                    context: "logical not",
                    found: ptyp,
                });
            }
            let src_w = if v.ptyp().is_int() {
                v.ptyp().bits()
            } else {
                64
            };
            let zero = v.bits() & mask_of(src_w) == 0;
            Ok(ValueCell::I64(zero as i64).retag(ptyp))
        }
    }
}

impl ModuleState {
    /// Evaluate one expression node in `frame`.
    pub fn eval_expr(
        &mut self,
        frame: &mut Frame,
        expr: &Expr,
        ctx: AggCtx,
    ) -> EngResult<ValueCell> {
        let ptyp = expr.ptyp;
        match &expr.kind {
            ExprKind::ConstVal(c) => eval_const(ptyp, c),
            ExprKind::ConstStr(idx) => {
                if !ptyp.is_address() {
                    return Err(EngineError::ConstKindMismatch(ptyp));
                }
                Ok(ValueCell::Addr(self.intern_str(*idx)?))
            }
            ExprKind::RegRead(reg) => self.eval_regread(frame, ptyp, *reg),
            ExprKind::AddrOfOff { local, sym, offset } => {
                let base = if *local {
                    self.local_sym_addr(frame, *sym)?
                } else {
                    self.global_sym_addr(*sym)?
                };
                Ok(ValueCell::Addr(base.offset(*offset)))
            }
            ExprKind::AddrOfFunc(pu) => Ok(ValueCell::Addr(MemRef::Func(*pu))),
            ExprKind::AddrOfLabel(l) => {
                let pc = frame.func.label_pc(*l)?;
                Ok(ValueCell::Addr(MemRef::Label {
                    func: frame.func.pu,
                    pc,
                }))
            }
            ExprKind::IreadFpOff { offset, agg_size } => {
                let addr = frame.fp().offset(*offset);
                self.eval_read(frame, ptyp, addr, *agg_size, ctx)
            }
            ExprKind::IreadOff {
                offset,
                agg_size,
                base,
            } => {
                let b = self.eval_expr(frame, base, AggCtx::None)?;
                let addr = b.as_addr().ok_or(EngineError::TypeMismatch {
                    context: "indirect read base",
                    found: b.ptyp(),
                })?;
                self.eval_read(frame, ptyp, addr.offset(*offset), *agg_size, ctx)
            }
            ExprKind::Iread { agg_size, base } => {
                if ptyp != PrimType::Agg {
                    return Err(EngineError::TypeMismatch {
                        context: "typed indirect read",
                        found: ptyp,
                    });
                }
                let AggCtx::CallArg { .. } = ctx else {
                    return Err(EngineError::Unimplemented("iread outside a call operand"));
                };
                let b = self.eval_expr(frame, base, AggCtx::None)?;
                let addr = b.as_addr().ok_or(EngineError::TypeMismatch {
                    context: "indirect read base",
                    found: b.ptyp(),
                })?;
                self.eval_read(frame, ptyp, addr, *agg_size, ctx)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let a = self.eval_expr(frame, lhs, AggCtx::None)?;
                let b = self.eval_expr(frame, rhs, AggCtx::None)?;
                match op {
                    BinOp::Add
                    | BinOp::Sub
                    | BinOp::Mul
                    | BinOp::Div
                    | BinOp::Rem => arith(*op, ptyp, &a, &b),
                    BinOp::Max | BinOp::Min => {
                        if a.ptyp() != ptyp || b.ptyp() != ptyp {
                            return Err(EngineError::TypeMismatch {
                                context: "min/max operand",
                                found: a.ptyp(),
                            });
                        }
                        arith(*op, ptyp, &a, &b)
                    }
                    BinOp::Lshr => lshr(ptyp, &a, &b),
                    BinOp::Shl | BinOp::Ashr | BinOp::Band | BinOp::Bior | BinOp::Bxor => {
                        bin_int(*op, ptyp, &a, &b)
                    }
                }
            }
            ExprKind::Compare {
                op,
                opnd_ty,
                lhs,
                rhs,
            } => {
                let a = self.eval_expr(frame, lhs, AggCtx::None)?;
                let b = self.eval_expr(frame, rhs, AggCtx::None)?;
                compare(*op, *opnd_ty, ptyp, &a, &b)
            }
            ExprKind::Unary { op, opnd } => {
                let v = self.eval_expr(frame, opnd, AggCtx::None)?;
                unary(*op, ptyp, &v)
            }
            ExprKind::Select { cond, then, other } => {
                let c = self.eval_expr(frame, cond, AggCtx::None)?;
                // Both arms convert before selection.
                let t = cvt::convert(ptyp, &self.eval_expr(frame, then, AggCtx::None)?)?;
                let e = cvt::convert(ptyp, &self.eval_expr(frame, other, AggCtx::None)?)?;
                Ok(if cvt::is_zero(&c)? { e } else { t })
            }
            ExprKind::Cvt { from, opnd } => {
                let v = self.eval_expr(frame, opnd, AggCtx::None)?;
                cvt::convert(ptyp, &v.retag(*from))
            }
            ExprKind::Retype(opnd) => {
                let v = self.eval_expr(frame, opnd, AggCtx::None)?;
                Ok(v.retag(ptyp))
            }
            ExprKind::Extend {
                signed,
                boffset,
                bsize,
                opnd,
            } => {
                if *boffset != 0 {
                    return Err(EngineError::Unimplemented("extension at nonzero bit offset"));
                }
                let v = self.eval_expr(frame, opnd, AggCtx::None)?;
                let bsize = *bsize as u32;
                let mask = mask_of(bsize);
                let mut bits = v.bits() & mask;
                if *signed && bsize < 64 && (bits >> (bsize - 1)) & 1 == 1 {
                    bits |= !mask;
                }
                Ok(ValueCell::U64(bits).retag(ptyp))
            }
            ExprKind::ExtractBits {
                boffset,
                bsize,
                opnd,
            } => {
                let v = self.eval_expr(frame, opnd, AggCtx::None)?;
                let bsize = *bsize as u32;
                let mut field = (v.bits() >> boffset) & mask_of(bsize);
                if ptyp.is_signed() && bsize < 64 && (field >> (bsize - 1)) & 1 == 1 {
                    field |= !mask_of(bsize);
                }
                Ok(ValueCell::U64(field).retag(ptyp))
            }
            ExprKind::DepositBits {
                boffset,
                bsize,
                dst,
                src,
            } => {
                let d = self.eval_expr(frame, dst, AggCtx::None)?;
                let s = self.eval_expr(frame, src, AggCtx::None)?;
                let mask = mask_of(*bsize as u32) << boffset;
                let out = (d.bits() & !mask) | ((s.bits() << boffset) & mask);
                Ok(ValueCell::U64(out).retag(ptyp))
            }
            ExprKind::Alloca(size) => {
                let n = self.eval_expr(frame, size, AggCtx::None)?;
                Ok(ValueCell::Addr(frame.alloca(n.bits())?))
            }
            ExprKind::IntrinsicOp { id, opnd } => {
                let v = self.eval_expr(frame, opnd, AggCtx::None)?;
                eval_intrinsic_op(*id, ptyp, &v)
            }
            ExprKind::Nyi(name) => Err(EngineError::Unimplemented(*name)),
        }
    }

    fn eval_regread(
        &mut self,
        frame: &mut Frame,
        ptyp: PrimType,
        reg: RegId,
    ) -> EngResult<ValueCell> {
        match reg {
            RegId::Fp => {
                if !ptyp.is_address() {
                    return Err(EngineError::TypeMismatch {
                        context: "frame-pointer read",
                        found: ptyp,
                    });
                }
                Ok(ValueCell::Addr(frame.fp()))
            }
            RegId::Gp => Ok(ValueCell::Addr(self.gp_ref())),
            RegId::Retval0 => {
                let v = frame.retval0;
                if ptyp == PrimType::Agg
                    || ptyp == v.ptyp()
                    || (matches!(v, ValueCell::AggPair { .. })
                        && matches!(ptyp, PrimType::U64 | PrimType::A64))
                {
                    Ok(v)
                } else {
                    cvt::convert(ptyp, &v)
                }
            }
            RegId::Retval1 => Err(EngineError::Unimplemented("read of second return register")),
            RegId::Preg(i) => Ok(frame.preg(i)?.retag(ptyp)),
        }
    }

    /// Scalar or context-directed aggregate load.
    fn eval_read(
        &mut self,
        frame: &mut Frame,
        ptyp: PrimType,
        addr: MemRef,
        agg_size: u32,
        ctx: AggCtx,
    ) -> EngResult<ValueCell> {
        if ptyp != PrimType::Agg {
            return mem::mload(addr, ptyp, 0);
        }
        match ctx {
            AggCtx::CallArg { offset, size } => {
                let dst = frame.agg_args.base_ref().offset(offset as i64);
                let n = if size != 0 { size } else { agg_size };
                mem::mcopy(dst, addr, n)?;
                Ok(ValueCell::Agg { addr: dst, size: n })
            }
            AggCtx::RetRead { size } => mem::mload(addr, PrimType::Agg, size),
            AggCtx::None => {
                let size = if agg_size != 0 {
                    agg_size
                } else {
                    frame.func.ret_size
                };
                mem::mload(addr, PrimType::Agg, size)
            }
        }
    }

    /// Address of a function-scoped symbol: formals first, then
    /// function-local statics.
    fn local_sym_addr(&mut self, frame: &Frame, sym: u32) -> EngResult<MemRef> {
        let func = Rc::clone(&frame.func);
        if let Some(&pos) = func.parm_by_sym.get(&sym) {
            let parm = func.parms[pos as usize];
            return Ok(if parm.ptyp == PrimType::Agg {
                frame.caller_agg.offset(parm.store_idx as i64)
            } else {
                frame.var_slot(parm.store_idx)
            });
        }
        self.var_addr(Some(func.pu), sym)
    }

    fn global_sym_addr(&mut self, sym: u32) -> EngResult<MemRef> {
        let s = self
            .module
            .global_symbol(sym)
            .ok_or(EngineError::UnknownSymbol(sym))?;
        match s.storage {
            Storage::Extern => {
                let name = s.name.clone();
                Ok(MemRef::Raw(self.resolve_native(&name)?))
            }
            Storage::Global | Storage::FStatic => self.var_addr(None, sym),
            _ => Err(EngineError::UnknownSymbol(sym)),
        }
    }
}

fn eval_const(ptyp: PrimType, c: &MirConst) -> EngResult<ValueCell> {
    match c {
        MirConst::Int { val, .. } => {
            if !(ptyp.is_int() || ptyp.is_address()) {
                return Err(EngineError::ConstKindMismatch(ptyp));
            }
            Ok(ValueCell::I64(*val).retag(ptyp))
        }
        MirConst::Float { val, .. } => {
            if ptyp != PrimType::F32 {
                return Err(EngineError::ConstKindMismatch(ptyp));
            }
            Ok(ValueCell::F32(*val))
        }
        MirConst::Double { val, .. } => {
            if ptyp != PrimType::F64 {
                return Err(EngineError::ConstKindMismatch(ptyp));
            }
            Ok(ValueCell::F64(*val))
        }
        _ => Err(EngineError::ConstKindMismatch(ptyp)),
    }
}

fn eval_intrinsic_op(id: IntrinsicId, ptyp: PrimType, v: &ValueCell) -> EngResult<ValueCell> {
    match id {
        IntrinsicId::Sin => match ptyp {
            PrimType::F32 => Ok(ValueCell::F32(v.as_f32().sin())),
            PrimType::F64 => Ok(ValueCell::F64(v.as_f64().sin())),
            other => Err(EngineError::IntrinsicTypeMismatch {
                name: "sin",
                found: other,
            }),
        },
        IntrinsicId::Ctz32 | IntrinsicId::Clz32 | IntrinsicId::Ffs | IntrinsicId::Rev32 => {
            if !matches!(ptyp, PrimType::I32 | PrimType::U32) {
                return Err(EngineError::IntrinsicTypeMismatch {
                    name: id.name(),
                    found: ptyp,
                });
            }
            let x = v.bits() as u32;
            let r = match id {
                IntrinsicId::Ctz32 => x.trailing_zeros(),
                IntrinsicId::Clz32 => x.leading_zeros(),
                IntrinsicId::Ffs => {
                    if x == 0 {
                        0
                    } else {
                        x.trailing_zeros() + 1
                    }
                }
                IntrinsicId::Rev32 => x.reverse_bits(),
                _ => unreachable!(),
            };
            Ok(ValueCell::U64(r as u64).retag(ptyp))
        }
        IntrinsicId::VaStart => Err(EngineError::Unimplemented("va_start in operator position")),
    }
}
