// This module implements the engine's memory model. Every address the
// interpreter constructs itself is a bounds-carrying view (MemRef::Bytes)
// over one of the owned byte arenas: the global data segment, the
// uninitialized static segment, a frame's auto/alloca/staging regions, or an
// interned string literal. Typed loads and stores validate the access range
// against the view's bounds before touching memory. Code addresses (function
// and label values) are opaque variants, encodable to tagged 64-bit cookies
// so they can round-trip through stored pointers. Addresses that come back
// from memory or from native code lose their bounds and become Raw; accesses
// through Raw are unchecked by necessity, exactly like the pointers the
// native side hands us.
//
// Safety: Bytes views hold the base address of a live arena. Arenas are owned
// by the module state or by an execution frame that strictly outlives every
// access made through views derived from it; the single-threaded engine never
// frees an arena while a callee can still address it.

//! Bounded memory references and typed load/store.

use crate::error::{EngResult, EngineError};
use crate::eng::value::ValueCell;
use crate::ir::{PrimType, PuIdx};

const COOKIE_MASK: u64 = 0xFFFF_0000_0000_0000;
const FUNC_COOKIE: u64 = 0xFFFA_0000_0000_0000;
const LABEL_COOKIE: u64 = 0xFFFB_0000_0000_0000;

/// An interpreter address value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemRef {
    Null,
    /// Bounds-carrying view over a live arena.
    Bytes { base: u64, len: u32, off: i64 },
    /// Unbounded native address.
    Raw(u64),
    /// Address of a function.
    Func(PuIdx),
    /// Address of a statement within a function's flattened body.
    Label { func: PuIdx, pc: u32 },
}

impl MemRef {
    /// View over a whole byte slice.
    pub fn of_slice(buf: &[u8]) -> MemRef {
        MemRef::Bytes {
            base: buf.as_ptr() as u64,
            len: buf.len() as u32,
            off: 0,
        }
    }

    /// Same address displaced by `delta` bytes. Bounds travel with the view.
    pub fn offset(self, delta: i64) -> MemRef {
        match self {
            MemRef::Bytes { base, len, off } => MemRef::Bytes {
                base,
                len,
                off: off + delta,
            },
            MemRef::Raw(a) => MemRef::Raw(a.wrapping_add(delta as u64)),
            other if delta == 0 => other,
            MemRef::Null => MemRef::Raw(delta as u64),
            other => MemRef::Raw(other.to_bits().wrapping_add(delta as u64)),
        }
    }

    pub fn is_null(self) -> bool {
        matches!(self, MemRef::Null) || matches!(self, MemRef::Raw(0))
    }

    /// 64-bit representation used when an address is stored to memory or
    /// handed across the FFI boundary.
    pub fn to_bits(self) -> u64 {
        match self {
            MemRef::Null => 0,
            MemRef::Bytes { base, off, .. } => base.wrapping_add(off as u64),
            MemRef::Raw(a) => a,
            MemRef::Func(pu) => FUNC_COOKIE | pu as u64,
            MemRef::Label { func, pc } => {
                LABEL_COOKIE | ((func as u64) << 24) | pc as u64
            }
        }
    }

    /// Decode a pointer-typed word loaded from memory. Bounds are not
    /// recoverable; data addresses come back Raw.
    pub fn from_bits(bits: u64) -> MemRef {
        match bits & COOKIE_MASK {
            _ if bits == 0 => MemRef::Null,
            FUNC_COOKIE => MemRef::Func((bits & 0x00FF_FFFF) as PuIdx),
            LABEL_COOKIE => MemRef::Label {
                func: ((bits >> 24) & 0x00FF_FFFF) as PuIdx,
                pc: (bits & 0x00FF_FFFF) as u32,
            },
            _ => MemRef::Raw(bits),
        }
    }

    /// Resolve to a raw pointer for an access of `size` bytes.
    fn resolve(self, size: u32) -> EngResult<*mut u8> {
        match self {
            MemRef::Null => Err(EngineError::NullDeref),
            MemRef::Bytes { base, len, off } => {
                if off < 0 || off + size as i64 > len as i64 {
                    return Err(EngineError::OutOfBounds { off, size, len });
                }
                Ok(base.wrapping_add(off as u64) as *mut u8)
            }
            MemRef::Raw(0) => Err(EngineError::NullDeref),
            MemRef::Raw(a) => Ok(a as *mut u8),
            MemRef::Func(_) | MemRef::Label { .. } => Err(EngineError::InvalidAddress),
        }
    }
}

/// One owned, zero-filled byte arena.
#[derive(Debug, Default)]
pub struct Segment {
    buf: Box<[u8]>,
}

impl Segment {
    pub fn new(size: u32) -> Segment {
        Segment {
            buf: vec![0u8; size as usize].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> u32 {
        self.buf.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bounded view at the start of the arena.
    pub fn base_ref(&self) -> MemRef {
        MemRef::of_slice(&self.buf)
    }
}

macro_rules! load_prim {
    ($ptr:expr, $ty:ty) => {
        unsafe { ($ptr as *const $ty).read_unaligned() }
    };
}

macro_rules! store_prim {
    ($ptr:expr, $ty:ty, $val:expr) => {
        unsafe { ($ptr as *mut $ty).write_unaligned($val) }
    };
}

/// Typed load of a ValueCell. `agg_size` supplies the byte size for
/// aggregate-typed loads and is ignored otherwise.
pub fn mload(addr: MemRef, ptyp: PrimType, agg_size: u32) -> EngResult<ValueCell> {
    if ptyp == PrimType::Agg {
        // An aggregate load is a view, not a copy.
        addr.resolve(agg_size)?;
        return Ok(ValueCell::Agg {
            addr,
            size: agg_size,
        });
    }
    let p = addr.resolve(ptyp.size())?;
    Ok(match ptyp {
        PrimType::I8 => ValueCell::I8(load_prim!(p, i8)),
        PrimType::I16 => ValueCell::I16(load_prim!(p, i16)),
        PrimType::I32 => ValueCell::I32(load_prim!(p, i32)),
        PrimType::I64 => ValueCell::I64(load_prim!(p, i64)),
        PrimType::U8 => ValueCell::U8(load_prim!(p, u8)),
        PrimType::U16 => ValueCell::U16(load_prim!(p, u16)),
        PrimType::U32 => ValueCell::U32(load_prim!(p, u32)),
        PrimType::U64 => ValueCell::U64(load_prim!(p, u64)),
        PrimType::F32 => ValueCell::F32(load_prim!(p, f32)),
        PrimType::F64 => ValueCell::F64(load_prim!(p, f64)),
        PrimType::A64 | PrimType::Ptr => ValueCell::Addr(MemRef::from_bits(load_prim!(p, u64))),
        PrimType::Agg | PrimType::Void => unreachable!(),
    })
}

/// Typed store of a ValueCell at `ptyp` width. The payload is reinterpreted
/// at the destination width the way the source dialect's register file
/// behaves; aggregates copy their full byte image.
pub fn mstore(addr: MemRef, ptyp: PrimType, val: &ValueCell) -> EngResult<()> {
    match ptyp {
        PrimType::Agg => {
            return match *val {
                ValueCell::Agg { addr: src, size } => mcopy(addr, src, size),
                ValueCell::AggPair { data, size } => {
                    let p = addr.resolve(size)?;
                    unsafe {
                        std::ptr::copy_nonoverlapping(data.as_ptr(), p, size as usize);
                    }
                    Ok(())
                }
                _ => Err(EngineError::TypeMismatch {
                    context: "aggregate store",
                    found: val.ptyp(),
                }),
            };
        }
        PrimType::Void => {
            return Err(EngineError::TypeMismatch {
                context: "store",
                found: PrimType::Void,
            })
        }
        _ => {}
    }
    let p = addr.resolve(ptyp.size())?;
    let bits = val.bits();
    match ptyp {
        PrimType::I8 | PrimType::U8 => store_prim!(p, u8, bits as u8),
        PrimType::I16 | PrimType::U16 => store_prim!(p, u16, bits as u16),
        PrimType::I32 | PrimType::U32 => store_prim!(p, u32, bits as u32),
        PrimType::I64 | PrimType::U64 | PrimType::A64 | PrimType::Ptr => {
            store_prim!(p, u64, bits)
        }
        PrimType::F32 => store_prim!(p, f32, val.as_f32()),
        PrimType::F64 => store_prim!(p, f64, val.as_f64()),
        PrimType::Agg | PrimType::Void => unreachable!(),
    }
    Ok(())
}

/// Read `out.len()` bytes into a caller-owned buffer.
pub fn read_bytes(src: MemRef, out: &mut [u8]) -> EngResult<()> {
    let p = src.resolve(out.len() as u32)?;
    unsafe {
        std::ptr::copy_nonoverlapping(p, out.as_mut_ptr(), out.len());
    }
    Ok(())
}

/// Copy `len` bytes between two addresses. Ranges may overlap.
pub fn mcopy(dst: MemRef, src: MemRef, len: u32) -> EngResult<()> {
    if len == 0 {
        return Ok(());
    }
    let d = dst.resolve(len)?;
    let s = src.resolve(len)?;
    unsafe {
        std::ptr::copy(s, d, len as usize);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_are_enforced() {
        let seg = Segment::new(16);
        let base = seg.base_ref();
        assert!(mload(base.offset(8), PrimType::U64, 0).is_ok());
        assert!(matches!(
            mload(base.offset(9), PrimType::U64, 0),
            Err(EngineError::OutOfBounds { .. })
        ));
        assert!(matches!(
            mload(base.offset(-1), PrimType::U8, 0),
            Err(EngineError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_scalar_round_trip() {
        let seg = Segment::new(32);
        let base = seg.base_ref();
        mstore(base, PrimType::I32, &ValueCell::I32(-7)).unwrap();
        assert_eq!(mload(base, PrimType::I32, 0).unwrap(), ValueCell::I32(-7));
        mstore(base.offset(8), PrimType::F64, &ValueCell::F64(2.5)).unwrap();
        assert_eq!(
            mload(base.offset(8), PrimType::F64, 0).unwrap(),
            ValueCell::F64(2.5)
        );
    }

    #[test]
    fn test_code_address_cookies() {
        let f = MemRef::Func(42);
        assert_eq!(MemRef::from_bits(f.to_bits()), f);
        let l = MemRef::Label { func: 3, pc: 17 };
        assert_eq!(MemRef::from_bits(l.to_bits()), l);
        assert_eq!(MemRef::from_bits(0), MemRef::Null);
    }

    #[test]
    fn test_pointer_store_loses_bounds() {
        let seg = Segment::new(16);
        let tgt = Segment::new(8);
        let base = seg.base_ref();
        mstore(base, PrimType::A64, &ValueCell::Addr(tgt.base_ref())).unwrap();
        let back = mload(base, PrimType::A64, 0).unwrap();
        match back {
            ValueCell::Addr(MemRef::Raw(a)) => assert_eq!(a, tgt.base_ref().to_bits()),
            other => panic!("expected raw address, got {other:?}"),
        }
    }

    #[test]
    fn test_mcopy() {
        let a = Segment::new(8);
        let b = Segment::new(8);
        mstore(a.base_ref(), PrimType::U64, &ValueCell::U64(0xDEAD_BEEF)).unwrap();
        mcopy(b.base_ref(), a.base_ref(), 8).unwrap();
        assert_eq!(
            mload(b.base_ref(), PrimType::U64, 0).unwrap(),
            ValueCell::U64(0xDEAD_BEEF)
        );
    }
}
