// Numeric and pointer conversions between primitive types, the narrow
// zero/sign-extension table used by regassign on tag mismatch, zero tests for
// branch conditions, and the approximate float equality the dialect defines
// for eq/ne (epsilon-based, same-signed infinities compare equal).

//! Type conversion and comparison helpers.

use crate::error::{EngResult, EngineError};
use crate::eng::mem::MemRef;
use crate::eng::value::ValueCell;
use crate::ir::PrimType;

pub const F32_EPSILON: f32 = 1e-8;
pub const F64_EPSILON: f64 = 1e-16;

enum Num {
    S(i64),
    U(u64),
    F32(f32),
    F64(f64),
    Addr(u64),
}

fn classify(v: &ValueCell) -> EngResult<Num> {
    Ok(match *v {
        ValueCell::I8(x) => Num::S(x as i64),
        ValueCell::I16(x) => Num::S(x as i64),
        ValueCell::I32(x) => Num::S(x as i64),
        ValueCell::I64(x) => Num::S(x),
        ValueCell::U8(x) => Num::U(x as u64),
        ValueCell::U16(x) => Num::U(x as u64),
        ValueCell::U32(x) => Num::U(x as u64),
        ValueCell::U64(x) => Num::U(x),
        ValueCell::F32(x) => Num::F32(x),
        ValueCell::F64(x) => Num::F64(x),
        ValueCell::Addr(a) => Num::Addr(a.to_bits()),
        _ => {
            return Err(EngineError::TypeMismatch {
                context: "conversion source",
                found: v.ptyp(),
            })
        }
    })
}

macro_rules! cvt_int {
    ($n:expr, $ty:ty, $wrap:path) => {
        match $n {
            Num::S(x) => $wrap(x as $ty),
            Num::U(x) | Num::Addr(x) => $wrap(x as $ty),
            Num::F32(x) => $wrap(x as $ty),
            Num::F64(x) => $wrap(x as $ty),
        }
    };
}

/// Full typed conversion into `to`. Pointer destinations accept only integer
/// and address sources.
pub fn convert(to: PrimType, v: &ValueCell) -> EngResult<ValueCell> {
    let n = classify(v)?;
    Ok(match to {
        PrimType::I8 => cvt_int!(n, i8, ValueCell::I8),
        PrimType::I16 => cvt_int!(n, i16, ValueCell::I16),
        PrimType::I32 => cvt_int!(n, i32, ValueCell::I32),
        PrimType::I64 => cvt_int!(n, i64, ValueCell::I64),
        PrimType::U8 => cvt_int!(n, u8, ValueCell::U8),
        PrimType::U16 => cvt_int!(n, u16, ValueCell::U16),
        PrimType::U32 => cvt_int!(n, u32, ValueCell::U32),
        PrimType::U64 => cvt_int!(n, u64, ValueCell::U64),
        PrimType::F32 => match n {
            Num::S(x) => ValueCell::F32(x as f32),
            Num::U(x) | Num::Addr(x) => ValueCell::F32(x as f32),
            Num::F32(x) => ValueCell::F32(x),
            Num::F64(x) => ValueCell::F32(x as f32),
        },
        PrimType::F64 => match n {
            Num::S(x) => ValueCell::F64(x as f64),
            Num::U(x) | Num::Addr(x) => ValueCell::F64(x as f64),
            Num::F32(x) => ValueCell::F64(x as f64),
            Num::F64(x) => ValueCell::F64(x),
        },
        PrimType::A64 | PrimType::Ptr => match n {
            Num::S(x) => ValueCell::Addr(MemRef::from_bits(x as u64)),
            Num::U(x) | Num::Addr(x) => ValueCell::Addr(MemRef::from_bits(x)),
            Num::F32(_) | Num::F64(_) => {
                return Err(EngineError::TypeMismatch {
                    context: "conversion to address",
                    found: v.ptyp(),
                })
            }
        },
        PrimType::Agg | PrimType::Void => {
            return Err(EngineError::TypeMismatch {
                context: "conversion target",
                found: to,
            })
        }
    })
}

/// The closed zero/sign-extension table regassign consults when the evaluated
/// value's tag differs from the statement's declared type. Returns None for
/// pairs outside the table.
pub fn zext_sext(to: PrimType, from: PrimType, v: &ValueCell) -> Option<ValueCell> {
    use PrimType::*;
    let allowed = matches!(
        (to, from),
        (U8, U32)
            | (U32, U8)
            | (U32, U16)
            | (U32, I32)
            | (I32, I8)
            | (I32, I16)
            | (I32, U32)
            | (U64, U8)
            | (U64, U16)
            | (U64, U32)
            | (U64, I64)
            | (I64, I8)
            | (I64, I16)
            | (I64, I32)
            | (I16, I32)
            | (I16, U16)
            | (U16, U32)
    );
    if !allowed {
        return None;
    }
    convert(to, v).ok()
}

/// Approximate 32-bit float equality.
pub fn float_eq(a: f32, b: f32) -> bool {
    if a.is_infinite() && b.is_infinite() {
        return a == b;
    }
    (a - b).abs() < F32_EPSILON
}

/// Approximate 64-bit float equality.
pub fn double_eq(a: f64, b: f64) -> bool {
    if a.is_infinite() && b.is_infinite() {
        return a == b;
    }
    (a - b).abs() < F64_EPSILON
}

/// Zero test for branch conditions. Defined for integer and address values
/// only; anything else is a fatal condition-type violation.
pub fn is_zero(v: &ValueCell) -> EngResult<bool> {
    Ok(match *v {
        ValueCell::I8(x) => x == 0,
        ValueCell::I16(x) => x == 0,
        ValueCell::I32(x) => x == 0,
        ValueCell::I64(x) => x == 0,
        ValueCell::U8(x) => x == 0,
        ValueCell::U16(x) => x == 0,
        ValueCell::U32(x) => x == 0,
        ValueCell::U64(x) => x == 0,
        ValueCell::Addr(a) => a.is_null(),
        _ => {
            return Err(EngineError::TypeMismatch {
                context: "branch condition",
                found: v.ptyp(),
            })
        }
    })
}
