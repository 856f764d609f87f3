// This module implements statement dispatch and the call paths. A function
// body executes as one flat loop over its flattened statement vector with an
// explicit program counter, so goto, conditional branches, jump tables and
// computed gotos all reduce to assigning the counter. Calls stage their
// arguments in the calling frame (scalar cells, an aggregate byte buffer and,
// for variadic interpreted callees, an emulated argument-save area), then
// either recurse into the interpreter or hand off to the native bridge.
// Return values flow through the caller's two return-register slots; an
// aggregate result of at most 16 bytes is materialized into them, anything
// larger is a fatal convention violation. Opcodes outside the supported
// subset stay fatal when reached.

//! Statement interpretation and call sequencing.

use std::rc::Rc;

use crate::error::{EngResult, EngineError};
use crate::eng::cvt;
use crate::eng::expr::AggCtx;
use crate::eng::frame::{Frame, ParmInf};
use crate::eng::mem::{self, MemRef, Segment};
use crate::eng::module::{FuncTarget, ModuleState};
use crate::eng::value::ValueCell;
use crate::ir::{round_up, Expr, ExprKind, IntrinsicId, PrimType, PuIdx, RegId, Stmt};

/// Offsets within the ARM64-style va_list structure the va_start intrinsic
/// fills in: the emulated stack pointer and the register-save offset fields.
const VA_LIST_STACK_OFF: i64 = 0;
const VA_LIST_GR_OFFS: i64 = 24;

/// Byte size of an aggregate-valued argument expression, as declared on the
/// read feeding it.
fn agg_arg_size(e: &Expr) -> u32 {
    match &e.kind {
        ExprKind::IreadFpOff { agg_size, .. }
        | ExprKind::IreadOff { agg_size, .. }
        | ExprKind::Iread { agg_size, .. } => *agg_size,
        _ => 0,
    }
}

impl ModuleState {
    /// Interpret function `pu`. Arguments are read from the caller's staging
    /// areas; the result lands in the caller's return-register slots.
    pub fn invoke(&mut self, pu: PuIdx, caller: &mut Frame) -> EngResult<()> {
        let func = self.func_meta(pu)?;
        let mut frame = Frame::new(
            Rc::clone(&func),
            caller.agg_args.base_ref(),
            caller.va_area.base_ref(),
        );
        frame.load_args(&caller.call_args)?;

        let mut pc: usize = 0;
        loop {
            let Some(stmt) = func.code.get(pc) else {
                return Ok(());
            };
            match stmt {
                Stmt::Label(_) | Stmt::Comment(_) => pc += 1,
                Stmt::IassignFpOff { ptyp, offset, rhs } => {
                    let val = self.eval_expr(&mut frame, rhs, AggCtx::None)?;
                    mem::mstore(frame.fp().offset(*offset), *ptyp, &val)?;
                    pc += 1;
                }
                Stmt::IassignOff {
                    ptyp,
                    offset,
                    addr,
                    rhs,
                } => {
                    let base = self.eval_expr(&mut frame, addr, AggCtx::None)?;
                    let base = base.as_addr().ok_or(EngineError::TypeMismatch {
                        context: "indirect store base",
                        found: base.ptyp(),
                    })?;
                    let val = self.eval_expr(&mut frame, rhs, AggCtx::None)?;
                    mem::mstore(base.offset(*offset), *ptyp, &val)?;
                    pc += 1;
                }
                Stmt::BlkAssignOff {
                    offset,
                    size,
                    dst,
                    src,
                } => {
                    let d = self.eval_expr(&mut frame, dst, AggCtx::None)?;
                    let d = d.as_addr().ok_or(EngineError::TypeMismatch {
                        context: "block copy destination",
                        found: d.ptyp(),
                    })?;
                    let s = self.eval_expr(&mut frame, src, AggCtx::None)?;
                    let s = s.as_addr().ok_or(EngineError::TypeMismatch {
                        context: "block copy source",
                        found: s.ptyp(),
                    })?;
                    mem::mcopy(d.offset(*offset), s, *size)?;
                    pc += 1;
                }
                Stmt::Regassign { ptyp, reg, rhs } => {
                    self.exec_regassign(&mut frame, caller, *ptyp, *reg, rhs)?;
                    pc += 1;
                }
                Stmt::Call { callee, args } => {
                    if self.is_ext_func(*callee)? {
                        self.call_ext_direct(&mut frame, *callee, args)?;
                    } else {
                        self.call_interp_direct(&mut frame, *callee, args)?;
                    }
                    pc += 1;
                }
                Stmt::IcallProto { ret_ty, args } => {
                    self.call_indirect(&mut frame, *ret_ty, args)?;
                    pc += 1;
                }
                Stmt::IntrinsicCall { id, args } => {
                    match id {
                        IntrinsicId::VaStart => self.exec_va_start(&mut frame, args)?,
                        _ => return Err(EngineError::Unimplemented("intrinsic call")),
                    }
                    pc += 1;
                }
                Stmt::CondGoto {
                    on_true,
                    cond,
                    label,
                } => {
                    let c = self.eval_expr(&mut frame, cond, AggCtx::None)?;
                    let taken = !cvt::is_zero(&c)? == *on_true;
                    if taken {
                        pc = func.label_pc(*label)? as usize;
                    } else {
                        pc += 1;
                    }
                }
                Stmt::Goto(label) => pc = func.label_pc(*label)? as usize,
                Stmt::RangeGoto {
                    opnd,
                    tag_offset,
                    table,
                } => {
                    let v = self.eval_expr(&mut frame, opnd, AggCtx::None)?;
                    let tag = v.as_i64().ok_or(EngineError::TypeMismatch {
                        context: "jump table index",
                        found: v.ptyp(),
                    })?;
                    let index = tag - tag_offset;
                    if index < 0 || index as usize >= table.len() {
                        return Err(EngineError::JumpTableOutOfRange {
                            index,
                            len: table.len(),
                        });
                    }
                    pc = func.label_pc(table[index as usize])? as usize;
                }
                Stmt::Igoto(target) => {
                    let v = self.eval_expr(&mut frame, target, AggCtx::None)?;
                    match v.as_addr() {
                        Some(MemRef::Label { func: f, pc: p }) if f == pu => pc = p as usize,
                        _ => return Err(EngineError::InvalidAddress),
                    }
                }
                Stmt::Return => return Ok(()),
                Stmt::Nyi(name) => return Err(EngineError::Unimplemented(*name)),
                Stmt::Block(_) => {
                    // Blocks are flattened away at load time.
                    return Err(EngineError::Unimplemented("nested block"));
                }
            }
        }
    }

    fn exec_regassign(
        &mut self,
        frame: &mut Frame,
        caller: &mut Frame,
        ptyp: PrimType,
        reg: RegId,
        rhs: &Expr,
    ) -> EngResult<()> {
        let ctx = if ptyp == PrimType::Agg {
            AggCtx::RetRead {
                size: frame.func.ret_size,
            }
        } else {
            AggCtx::None
        };
        let val = self.eval_expr(frame, rhs, ctx)?;
        let out = if val.ptyp() == ptyp {
            val
        } else if let Some(v) = cvt::zext_sext(ptyp, val.ptyp(), &val) {
            v
        } else if (ptyp.is_address() || ptyp == PrimType::U64)
            && (val.ptyp().is_address() || val.ptyp() == PrimType::U64)
        {
            // Address and 64-bit unsigned reinterpret freely.
            val.retag(ptyp)
        } else {
            cvt::convert(ptyp, &val)?
        };
        match reg {
            RegId::Retval0 => {
                if let ValueCell::Agg { addr, size } = out {
                    set_aggregate_retval(caller, addr, size)?;
                } else {
                    caller.retval0 = out;
                }
                Ok(())
            }
            RegId::Retval1 => Err(EngineError::RetvalOneAssign),
            RegId::Preg(i) => frame.set_preg(i, out),
            RegId::Fp | RegId::Gp => Err(EngineError::Unimplemented("assignment to fp/gp")),
        }
    }

    /// Direct call to an interpreted callee: stage scalars, aggregates and,
    /// for variadic callees, the emulated argument-save area, then recurse.
    fn call_interp_direct(
        &mut self,
        frame: &mut Frame,
        callee: PuIdx,
        args: &[Expr],
    ) -> EngResult<()> {
        let meta = self.func_meta(callee)?;
        let formals_num = meta.formals_num as usize;

        // Aggregate staging layout: declared aggregate formals first, then
        // aggregate variadic arguments.
        let mut agg_total = meta.formals_agg_size;
        let mut va_agg_offs: Vec<u32> = Vec::new();
        for a in args.iter().skip(formals_num) {
            if a.ptyp == PrimType::Agg {
                va_agg_offs.push(agg_total);
                agg_total += round_up(agg_arg_size(a), 8);
            }
        }
        frame.agg_args = Segment::new(agg_total);

        let mut vals = Vec::with_capacity(args.len());
        let mut va_agg_i = 0usize;
        for (i, a) in args.iter().enumerate() {
            let ctx = if i < formals_num {
                let parm: ParmInf = meta.parms[i];
                if parm.ptyp == PrimType::Agg {
                    AggCtx::CallArg {
                        offset: parm.store_idx,
                        size: parm.size,
                    }
                } else {
                    AggCtx::None
                }
            } else if a.ptyp == PrimType::Agg {
                let off = va_agg_offs[va_agg_i];
                va_agg_i += 1;
                AggCtx::CallArg {
                    offset: off,
                    size: agg_arg_size(a),
                }
            } else {
                AggCtx::None
            };
            vals.push(self.eval_expr(frame, a, ctx)?);
        }

        if meta.is_varargs {
            stage_va_args(frame, &vals[formals_num.min(vals.len())..])?;
        } else {
            frame.va_area = Segment::default();
        }
        frame.call_args = vals;
        self.invoke(callee, frame)
    }

    /// Direct call to a native callee.
    fn call_ext_direct(&mut self, frame: &mut Frame, callee: PuIdx, args: &[Expr]) -> EngResult<()> {
        let fa = self.get_func_addr(callee)?;
        let FuncTarget::Native(addr) = fa.target else {
            return Err(EngineError::NoCallTarget(callee));
        };
        let decl = self
            .module
            .func(callee)
            .ok_or(EngineError::FunctionNotFound(callee))?;
        let ret_ptyp = self.module.types.prim_of(decl.ret_ty);

        // Declared aggregate formals get fixed staging offsets; aggregate
        // variadic arguments to a native callee are unsupported.
        let mut agg_offs = Vec::with_capacity(decl.formals.len());
        let mut running = 0u32;
        for f in &decl.formals {
            if self.module.types.is_agg(f.ty) {
                let size = self.module.types.size_of(f.ty);
                agg_offs.push(Some((running, size)));
                running += round_up(size, 8);
            } else {
                agg_offs.push(None);
            }
        }
        let formals_num = agg_offs.len();
        frame.agg_args = Segment::new(running);

        let mut vals = Vec::with_capacity(args.len());
        for (i, a) in args.iter().enumerate() {
            if i >= formals_num && a.ptyp == PrimType::Agg {
                return Err(EngineError::AggVarArgNative(fa.name.clone()));
            }
            let ctx = match agg_offs.get(i).copied().flatten() {
                Some((offset, size)) => AggCtx::CallArg { offset, size },
                None => AggCtx::None,
            };
            vals.push(self.eval_expr(frame, a, ctx)?);
        }
        let ret = self.call_with_ffi(addr, &vals, ret_ptyp)?;
        frame.retval0 = ret;
        Ok(())
    }

    /// Indirect call through an evaluated target address.
    fn call_indirect(&mut self, frame: &mut Frame, ret_ty: u32, args: &[Expr]) -> EngResult<()> {
        let (target, rest) = args.split_first().ok_or(EngineError::BadCallTarget)?;
        let t = self.eval_expr(frame, target, AggCtx::None)?;
        match t.as_addr() {
            Some(MemRef::Func(pu)) => {
                let fa = self.get_func_addr(pu)?;
                match fa.target {
                    FuncTarget::Interp(pu) => self.call_interp_direct(frame, pu, rest),
                    FuncTarget::Native(_) => self.call_ext_direct(frame, pu, rest),
                }
            }
            Some(MemRef::Raw(addr)) if addr != 0 => {
                // Unknown prototype beyond the declared return type: every
                // aggregate argument is staged sequentially.
                let ret_ptyp = self.module.types.prim_of(ret_ty);
                let mut total = 0u32;
                let mut offs = Vec::with_capacity(rest.len());
                for a in rest {
                    if a.ptyp == PrimType::Agg {
                        let size = agg_arg_size(a);
                        offs.push(Some((total, size)));
                        total += round_up(size, 8);
                    } else {
                        offs.push(None);
                    }
                }
                frame.agg_args = Segment::new(total);
                let mut vals = Vec::with_capacity(rest.len());
                for (a, off) in rest.iter().zip(offs) {
                    let ctx = match off {
                        Some((offset, size)) => AggCtx::CallArg { offset, size },
                        None => AggCtx::None,
                    };
                    vals.push(self.eval_expr(frame, a, ctx)?);
                }
                let ret = self.call_with_ffi(addr, &vals, ret_ptyp)?;
                frame.retval0 = ret;
                Ok(())
            }
            _ => Err(EngineError::BadCallTarget),
        }
    }

    /// Install the caller's emulated argument-save area into a va_list.
    fn exec_va_start(&mut self, frame: &mut Frame, args: &[Expr]) -> EngResult<()> {
        let vl = args
            .first()
            .ok_or(EngineError::Unimplemented("va_start without a list operand"))?;
        let vl = self.eval_expr(frame, vl, AggCtx::None)?;
        let vl = vl.as_addr().ok_or(EngineError::TypeMismatch {
            context: "va_start list",
            found: vl.ptyp(),
        })?;
        mem::mstore(
            vl.offset(VA_LIST_STACK_OFF),
            PrimType::A64,
            &ValueCell::Addr(frame.caller_va),
        )?;
        // Zero saved-register offset: every variadic argument reads from the
        // emulated stack.
        mem::mstore(vl.offset(VA_LIST_GR_OFFS), PrimType::I32, &ValueCell::I32(0))?;
        Ok(())
    }
}

/// Materialize an aggregate result into the caller's return registers.
fn set_aggregate_retval(caller: &mut Frame, addr: MemRef, size: u32) -> EngResult<()> {
    if size > 16 {
        return Err(EngineError::AggRetvalTooLarge(size));
    }
    let mut data = [0u8; 16];
    mem::read_bytes(addr, &mut data[..size as usize])?;
    caller.retval0 = ValueCell::AggPair { data, size };
    caller.retval1 = ValueCell::U64(u64::from_le_bytes(data[8..].try_into().unwrap_or([0; 8])));
    Ok(())
}

/// Stage evaluated variadic arguments into the caller's emulated
/// argument-save area: scalars and small aggregates inline in 8-byte slots,
/// larger aggregates by reference into the already-staged buffer.
fn stage_va_args(frame: &mut Frame, extra: &[ValueCell]) -> EngResult<()> {
    let mut total = 0u32;
    for v in extra {
        total += match v {
            ValueCell::Agg { size, .. } if *size <= 16 => round_up(*size, 8),
            _ => 8,
        };
    }
    frame.va_area = Segment::new(total);
    let base = frame.va_area.base_ref();
    let mut off = 0u32;
    for v in extra {
        match *v {
            ValueCell::Agg { addr, size } if size <= 16 => {
                mem::mcopy(base.offset(off as i64), addr, size)?;
                off += round_up(size, 8);
            }
            ValueCell::Agg { addr, .. } => {
                mem::mstore(base.offset(off as i64), PrimType::A64, &ValueCell::Addr(addr))?;
                off += 8;
            }
            ref scalar => {
                mem::mstore(base.offset(off as i64), scalar.ptyp(), scalar)?;
                off += 8;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eng::frame::LmbcFunc;
    use crate::ir::{BinOp, CmpOp, Function, Module, Storage, Symbol, TypeKind};

    fn plain_func(pu: PuIdx, name: &str, ret: PrimType, body: Stmt) -> (PrimType, Function) {
        (
            ret,
            Function {
                pu,
                name: name.into(),
                formals: Vec::new(),
                locals: Vec::new(),
                ret_ty: 0,
                frame_size: 64,
                num_pregs: 8,
                is_varargs: false,
                is_extern: false,
                is_implicit: false,
                is_weak: false,
                body: Some(body),
            },
        )
    }

    /// Build a state around `functions`, fixing up return types.
    fn build(mut functions: Vec<(PrimType, Function)>) -> ModuleState {
        let mut module = Module::default();
        for (ret, f) in functions.iter_mut() {
            f.ret_ty = module.types.prim(*ret);
        }
        module.functions = functions.into_iter().map(|(_, f)| f).collect();
        ModuleState::new(module).unwrap()
    }

    /// Invoke `pu` from a synthetic top-level frame and return retval0.
    fn run(state: &mut ModuleState, pu: PuIdx, args: Vec<ValueCell>) -> EngResult<ValueCell> {
        let shim = Function {
            pu: 9999,
            name: "<shim>".into(),
            formals: Vec::new(),
            locals: Vec::new(),
            ret_ty: 0,
            frame_size: 0,
            num_pregs: 0,
            is_varargs: false,
            is_extern: false,
            is_implicit: false,
            is_weak: false,
            body: None,
        };
        let meta = Rc::new(LmbcFunc::new(&shim, &state.module.types));
        let mut caller = Frame::new(meta, MemRef::Null, MemRef::Null);
        caller.call_args = args;
        state.invoke(pu, &mut caller)?;
        Ok(caller.retval0)
    }

    fn i32c(state_ty: u32, v: i64) -> Expr {
        Expr::iconst(PrimType::I32, state_ty, v)
    }

    #[test]
    fn test_regassign_to_retval0() {
        let body = Stmt::Block(vec![
            Stmt::Regassign {
                ptyp: PrimType::I32,
                reg: RegId::Retval0,
                rhs: i32c(0, 42),
            },
            Stmt::Return,
        ]);
        let mut state = build(vec![plain_func(0, "f", PrimType::I32, body)]);
        assert_eq!(run(&mut state, 0, vec![]).unwrap(), ValueCell::I32(42));
    }

    #[test]
    fn test_branch_loop_sums() {
        // preg1 = 0; preg2 = 5; loop: preg1 += preg2; preg2 -= 1;
        // brtrue preg2 -> loop; retval0 = preg1  (sums 5..1 = 15)
        let preg = |n| Expr::regread(PrimType::I32, RegId::Preg(n));
        let body = Stmt::Block(vec![
            Stmt::Regassign {
                ptyp: PrimType::I32,
                reg: RegId::Preg(1),
                rhs: i32c(0, 0),
            },
            Stmt::Regassign {
                ptyp: PrimType::I32,
                reg: RegId::Preg(2),
                rhs: i32c(0, 5),
            },
            Stmt::Label(1),
            Stmt::Regassign {
                ptyp: PrimType::I32,
                reg: RegId::Preg(1),
                rhs: Expr::binary(PrimType::I32, BinOp::Add, preg(1), preg(2)),
            },
            Stmt::Regassign {
                ptyp: PrimType::I32,
                reg: RegId::Preg(2),
                rhs: Expr::binary(PrimType::I32, BinOp::Sub, preg(2), i32c(0, 1)),
            },
            Stmt::CondGoto {
                on_true: true,
                cond: preg(2),
                label: 1,
            },
            Stmt::Regassign {
                ptyp: PrimType::I32,
                reg: RegId::Retval0,
                rhs: preg(1),
            },
            Stmt::Return,
        ]);
        let mut state = build(vec![plain_func(0, "sum", PrimType::I32, body)]);
        assert_eq!(run(&mut state, 0, vec![]).unwrap(), ValueCell::I32(15));
    }

    #[test]
    fn test_rangegoto_bounds_checked() {
        let body = Stmt::Block(vec![
            Stmt::RangeGoto {
                opnd: i32c(0, 9),
                tag_offset: 0,
                table: vec![1],
            },
            Stmt::Label(1),
            Stmt::Return,
        ]);
        let mut state = build(vec![plain_func(0, "f", PrimType::I32, body)]);
        assert!(matches!(
            run(&mut state, 0, vec![]),
            Err(EngineError::JumpTableOutOfRange { index: 9, len: 1 })
        ));
    }

    #[test]
    fn test_rangegoto_dispatch() {
        let mk_arm = |label: u32, val: i64| {
            vec![
                Stmt::Label(label),
                Stmt::Regassign {
                    ptyp: PrimType::I32,
                    reg: RegId::Retval0,
                    rhs: i32c(0, val),
                },
                Stmt::Return,
            ]
        };
        let mut stmts = vec![Stmt::RangeGoto {
            opnd: i32c(0, 11),
            tag_offset: 10,
            table: vec![1, 2],
        }];
        stmts.extend(mk_arm(1, 100));
        stmts.extend(mk_arm(2, 200));
        let mut state = build(vec![plain_func(0, "f", PrimType::I32, Stmt::Block(stmts))]);
        assert_eq!(run(&mut state, 0, vec![]).unwrap(), ValueCell::I32(200));
    }

    #[test]
    fn test_interpreted_call_chain() {
        // callee returns 42; main calls it and adds 1.
        let callee_body = Stmt::Block(vec![
            Stmt::Regassign {
                ptyp: PrimType::I32,
                reg: RegId::Retval0,
                rhs: i32c(0, 42),
            },
            Stmt::Return,
        ]);
        let main_body = Stmt::Block(vec![
            Stmt::Call {
                callee: 1,
                args: vec![],
            },
            Stmt::Regassign {
                ptyp: PrimType::I32,
                reg: RegId::Retval0,
                rhs: Expr::binary(
                    PrimType::I32,
                    BinOp::Add,
                    Expr::regread(PrimType::I32, RegId::Retval0),
                    i32c(0, 1),
                ),
            },
            Stmt::Return,
        ]);
        let mut state = build(vec![
            plain_func(0, "main", PrimType::I32, main_body),
            plain_func(1, "f", PrimType::I32, callee_body),
        ]);
        assert_eq!(run(&mut state, 0, vec![]).unwrap(), ValueCell::I32(43));
    }

    #[test]
    fn test_aggregate_retval_convention() {
        // A 12-byte aggregate round-trips through the return registers; a
        // 24-byte one is rejected.
        let mut module = Module::default();
        module.types.prim(PrimType::I32);
        let small = module.types.push(TypeKind::Struct {
            kind: crate::ir::StructKind::Struct,
            fields: Vec::new(),
            size: 12,
            align: 4,
        });
        let big = module.types.push(TypeKind::Struct {
            kind: crate::ir::StructKind::Struct,
            fields: Vec::new(),
            size: 24,
            align: 8,
        });
        module.symbols = vec![Symbol {
            idx: 0,
            name: "g".into(),
            storage: Storage::Global,
            ty: big,
            init: Some(crate::ir::MirConst::Agg {
                ty: big,
                elems: vec![],
            }),
        }];
        let body = |agg_size: u32| {
            Stmt::Block(vec![
                Stmt::Regassign {
                    ptyp: PrimType::Agg,
                    reg: RegId::Retval0,
                    rhs: Expr::new(
                        PrimType::Agg,
                        ExprKind::IreadOff {
                            offset: 0,
                            agg_size,
                            base: Box::new(Expr::new(
                                PrimType::A64,
                                ExprKind::AddrOfOff {
                                    local: false,
                                    sym: 0,
                                    offset: 0,
                                },
                            )),
                        },
                    ),
                },
                Stmt::Return,
            ])
        };
        let mk = |pu, name: &str, ret_ty, agg_size| Function {
            pu,
            name: name.into(),
            formals: Vec::new(),
            locals: Vec::new(),
            ret_ty,
            frame_size: 0,
            num_pregs: 0,
            is_varargs: false,
            is_extern: false,
            is_implicit: false,
            is_weak: false,
            body: Some(body(agg_size)),
        };
        module.functions = vec![mk(0, "ok", small, 12), mk(1, "big", big, 24)];
        let mut state = ModuleState::new(module).unwrap();

        // Seed the global with recognizable bytes.
        let g = state.var_addr(None, 0).unwrap();
        for i in 0..12u32 {
            mem::mstore(g.offset(i as i64), PrimType::U8, &ValueCell::U8(i as u8)).unwrap();
        }

        let r = run(&mut state, 0, vec![]).unwrap();
        match r {
            ValueCell::AggPair { data, size } => {
                assert_eq!(size, 12);
                assert_eq!(&data[..12], &(0..12u8).collect::<Vec<_>>()[..]);
            }
            other => panic!("expected aggregate pair, got {other:?}"),
        }
        assert!(matches!(
            run(&mut state, 1, vec![]),
            Err(EngineError::AggRetvalTooLarge(24))
        ));
    }

    #[test]
    fn test_indirect_call_and_computed_goto() {
        // f returns 5 through a function-address call; the caller then jumps
        // over an unreachable statement through a label address.
        let f_body = Stmt::Block(vec![
            Stmt::Regassign {
                ptyp: PrimType::I32,
                reg: RegId::Retval0,
                rhs: i32c(0, 5),
            },
            Stmt::Return,
        ]);
        let main_body = Stmt::Block(vec![
            Stmt::IcallProto {
                ret_ty: 0,
                args: vec![Expr::new(PrimType::A64, ExprKind::AddrOfFunc(1))],
            },
            Stmt::Regassign {
                ptyp: PrimType::I32,
                reg: RegId::Preg(1),
                rhs: Expr::regread(PrimType::I32, RegId::Retval0),
            },
            Stmt::Igoto(Expr::new(PrimType::A64, ExprKind::AddrOfLabel(1))),
            Stmt::Nyi("unreachable"),
            Stmt::Label(1),
            Stmt::Regassign {
                ptyp: PrimType::I32,
                reg: RegId::Retval0,
                rhs: Expr::regread(PrimType::I32, RegId::Preg(1)),
            },
            Stmt::Return,
        ]);
        let mut state = build(vec![
            plain_func(0, "main", PrimType::I32, main_body),
            plain_func(1, "f", PrimType::I32, f_body),
        ]);
        assert_eq!(run(&mut state, 0, vec![]).unwrap(), ValueCell::I32(5));
    }

    #[test]
    fn test_unsupported_opcode_is_fatal() {
        let body = Stmt::Block(vec![Stmt::Nyi("decref"), Stmt::Return]);
        let mut state = build(vec![plain_func(0, "f", PrimType::I32, body)]);
        assert!(matches!(
            run(&mut state, 0, vec![]),
            Err(EngineError::Unimplemented("decref"))
        ));
    }

    #[test]
    fn test_select_and_compare_through_dispatch() {
        let sel = Expr::new(
            PrimType::I32,
            ExprKind::Select {
                cond: Box::new(Expr::compare(
                    PrimType::I32,
                    CmpOp::Gt,
                    PrimType::I32,
                    i32c(0, 3),
                    i32c(0, 2),
                )),
                then: Box::new(Expr::iconst(PrimType::I64, 0, 7)),
                other: Box::new(Expr::iconst(PrimType::I64, 0, 8)),
            },
        );
        let body = Stmt::Block(vec![
            Stmt::Regassign {
                ptyp: PrimType::I32,
                reg: RegId::Retval0,
                rhs: sel,
            },
            Stmt::Return,
        ]);
        let mut state = build(vec![plain_func(0, "f", PrimType::I32, body)]);
        assert_eq!(run(&mut state, 0, vec![]).unwrap(), ValueCell::I32(7));
    }
}
