// This module implements the native-call bridge. Arguments already evaluated
// by the interpreter are lowered to a flat word image plus a libffi type
// descriptor, a call interface is prepared for the resolved symbol address,
// and the foreign function is invoked through libffi. Scalars travel as their
// 64-bit payload words; addresses decay to their raw 64-bit form, so native
// code sees ordinary pointers; pass-by-value aggregates are described to
// libffi as a word-granular structure over the staged copy. The declared
// return primitive selects the typed call variant and the result is marshaled
// back into a value cell for the caller's return register.

//! Native function invocation through libffi.

use libffi::middle::{Arg, Cif, CodePtr, Type};
use smallvec::SmallVec;

use crate::error::{EngResult, EngineError};
use crate::eng::mem::MemRef;
use crate::eng::module::ModuleState;
use crate::eng::value::ValueCell;
use crate::ir::PrimType;

/// One lowered argument: the libffi type plus either an owned payload word or
/// a pointer to aggregate bytes staged elsewhere.
enum Lowered {
    Word(u64),
    AggBytes { ptr: u64 },
    AggInline([u8; 16]),
}

fn word_type(ptyp: PrimType) -> EngResult<Type> {
    Ok(match ptyp {
        PrimType::I8 => Type::i8(),
        PrimType::I16 => Type::i16(),
        PrimType::I32 => Type::i32(),
        PrimType::I64 => Type::i64(),
        PrimType::U8 => Type::u8(),
        PrimType::U16 => Type::u16(),
        PrimType::U32 => Type::u32(),
        PrimType::U64 => Type::u64(),
        PrimType::F32 => Type::f32(),
        PrimType::F64 => Type::f64(),
        PrimType::A64 | PrimType::Ptr => Type::pointer(),
        PrimType::Void | PrimType::Agg => {
            return Err(EngineError::FfiStaging(format!(
                "no scalar foreign type for {ptyp:?}"
            )))
        }
    })
}

/// Word-granular structure descriptor for a pass-by-value aggregate.
fn agg_type(size: u32) -> Type {
    let words = crate::ir::round_up(size, 8) / 8;
    Type::structure((0..words).map(|_| Type::u64()))
}

/// Lower one evaluated argument to its libffi type and payload.
fn lower_arg(v: &ValueCell) -> EngResult<(Type, Lowered)> {
    Ok(match *v {
        ValueCell::Addr(a) => (Type::pointer(), Lowered::Word(a.to_bits())),
        ValueCell::Agg { addr, size } => (
            agg_type(size),
            Lowered::AggBytes {
                ptr: addr.to_bits(),
            },
        ),
        ValueCell::AggPair { data, size } => (agg_type(size), Lowered::AggInline(data)),
        ref scalar => (word_type(scalar.ptyp())?, Lowered::Word(scalar.bits())),
    })
}

impl ModuleState {
    /// Invoke the native function at `addr` with already-evaluated arguments.
    /// `ret` is the declared return primitive; the result cell carries it.
    pub(crate) fn call_with_ffi(
        &mut self,
        addr: u64,
        args: &[ValueCell],
        ret: PrimType,
    ) -> EngResult<ValueCell> {
        if addr == 0 {
            return Err(EngineError::NullDeref);
        }
        let mut types: SmallVec<[Type; 8]> = SmallVec::new();
        let mut lowered: SmallVec<[Lowered; 8]> = SmallVec::new();
        for v in args {
            let (t, l) = lower_arg(v)?;
            types.push(t);
            lowered.push(l);
        }
        let ret_type = match ret {
            PrimType::Void => Type::void(),
            PrimType::Agg => {
                return Err(EngineError::FfiStaging(
                    "aggregate return through the native bridge".to_string(),
                ))
            }
            other => word_type(other)?,
        };
        let cif = Cif::new(types, ret_type);

        // The payload vectors stay alive and unmoved across the call, so the
        // pointers handed to libffi remain valid.
        let ffi_args: SmallVec<[Arg; 8]> = lowered
            .iter()
            .map(|l| match l {
                Lowered::Word(w) => Arg::new(w),
                Lowered::AggBytes { ptr } => {
                    Arg::new(unsafe { &*(*ptr as *const u8) })
                }
                Lowered::AggInline(bytes) => Arg::new(&bytes[0]),
            })
            .collect();

        let code = CodePtr(addr as *mut _);
        log::trace!("native call at {addr:#x}, {} args, ret {ret:?}", args.len());
        let out = unsafe {
            match ret {
                PrimType::Void => {
                    cif.call::<()>(code, &ffi_args);
                    ValueCell::U64(0)
                }
                PrimType::I8 => ValueCell::I8(cif.call::<i8>(code, &ffi_args)),
                PrimType::I16 => ValueCell::I16(cif.call::<i16>(code, &ffi_args)),
                PrimType::I32 => ValueCell::I32(cif.call::<i32>(code, &ffi_args)),
                PrimType::I64 => ValueCell::I64(cif.call::<i64>(code, &ffi_args)),
                PrimType::U8 => ValueCell::U8(cif.call::<u8>(code, &ffi_args)),
                PrimType::U16 => ValueCell::U16(cif.call::<u16>(code, &ffi_args)),
                PrimType::U32 => ValueCell::U32(cif.call::<u32>(code, &ffi_args)),
                PrimType::U64 => ValueCell::U64(cif.call::<u64>(code, &ffi_args)),
                PrimType::F32 => ValueCell::F32(cif.call::<f32>(code, &ffi_args)),
                PrimType::F64 => ValueCell::F64(cif.call::<f64>(code, &ffi_args)),
                PrimType::A64 | PrimType::Ptr => {
                    ValueCell::Addr(MemRef::from_bits(cif.call::<u64>(code, &ffi_args)))
                }
                PrimType::Agg => unreachable!(),
            }
        };
        Ok(out)
    }
}
