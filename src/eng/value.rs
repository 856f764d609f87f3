// ValueCell is the engine's runtime value: a closed tagged variant replacing
// the raw union-plus-tag representation of the source dialect. The payload
// accessors deliberately mirror how a union behaves on a little-endian
// target: bits() is the zero-extended raw payload, retag() reinterprets the
// payload under a different tag without conversion. Proper numeric
// conversion lives in cvt, not here.

//! Tagged runtime values.

use crate::eng::mem::MemRef;
use crate::ir::PrimType;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueCell {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Addr(MemRef),
    /// View of aggregate bytes owned elsewhere.
    Agg { addr: MemRef, size: u32 },
    /// Aggregate return value materialized in the two return registers;
    /// at most 16 bytes.
    AggPair { data: [u8; 16], size: u32 },
}

impl ValueCell {
    pub fn ptyp(&self) -> PrimType {
        match self {
            ValueCell::I8(_) => PrimType::I8,
            ValueCell::I16(_) => PrimType::I16,
            ValueCell::I32(_) => PrimType::I32,
            ValueCell::I64(_) => PrimType::I64,
            ValueCell::U8(_) => PrimType::U8,
            ValueCell::U16(_) => PrimType::U16,
            ValueCell::U32(_) => PrimType::U32,
            ValueCell::U64(_) => PrimType::U64,
            ValueCell::F32(_) => PrimType::F32,
            ValueCell::F64(_) => PrimType::F64,
            ValueCell::Addr(_) => PrimType::A64,
            ValueCell::Agg { .. } | ValueCell::AggPair { .. } => PrimType::Agg,
        }
    }

    /// Zero value of a primitive type.
    pub fn zero(ptyp: PrimType) -> ValueCell {
        match ptyp {
            PrimType::I8 => ValueCell::I8(0),
            PrimType::I16 => ValueCell::I16(0),
            PrimType::I32 => ValueCell::I32(0),
            PrimType::I64 => ValueCell::I64(0),
            PrimType::U8 => ValueCell::U8(0),
            PrimType::U16 => ValueCell::U16(0),
            PrimType::U32 => ValueCell::U32(0),
            PrimType::U64 => ValueCell::U64(0),
            PrimType::F32 => ValueCell::F32(0.0),
            PrimType::F64 => ValueCell::F64(0.0),
            _ => ValueCell::Addr(MemRef::Null),
        }
    }

    /// Raw payload, zero-extended to 64 bits.
    pub fn bits(&self) -> u64 {
        match *self {
            ValueCell::I8(v) => v as u8 as u64,
            ValueCell::I16(v) => v as u16 as u64,
            ValueCell::I32(v) => v as u32 as u64,
            ValueCell::I64(v) => v as u64,
            ValueCell::U8(v) => v as u64,
            ValueCell::U16(v) => v as u64,
            ValueCell::U32(v) => v as u64,
            ValueCell::U64(v) => v,
            ValueCell::F32(v) => v.to_bits() as u64,
            ValueCell::F64(v) => v.to_bits(),
            ValueCell::Addr(a) => a.to_bits(),
            ValueCell::Agg { addr, .. } => addr.to_bits(),
            ValueCell::AggPair { data, .. } => {
                let mut w = [0u8; 8];
                w.copy_from_slice(&data[..8]);
                u64::from_le_bytes(w)
            }
        }
    }

    /// Reinterpret the payload under a different tag, union-style. Aggregate
    /// payloads keep their view.
    pub fn retag(&self, ptyp: PrimType) -> ValueCell {
        if self.ptyp() == ptyp {
            return *self;
        }
        if ptyp == PrimType::Agg {
            return *self;
        }
        let bits = self.bits();
        match ptyp {
            PrimType::I8 => ValueCell::I8(bits as i8),
            PrimType::I16 => ValueCell::I16(bits as i16),
            PrimType::I32 => ValueCell::I32(bits as i32),
            PrimType::I64 => ValueCell::I64(bits as i64),
            PrimType::U8 => ValueCell::U8(bits as u8),
            PrimType::U16 => ValueCell::U16(bits as u16),
            PrimType::U32 => ValueCell::U32(bits as u32),
            PrimType::U64 => ValueCell::U64(bits),
            PrimType::F32 => ValueCell::F32(f32::from_bits(bits as u32)),
            PrimType::F64 => ValueCell::F64(f64::from_bits(bits)),
            PrimType::A64 | PrimType::Ptr => ValueCell::Addr(MemRef::from_bits(bits)),
            PrimType::Agg | PrimType::Void => *self,
        }
    }

    /// Signed integer payload for the signed/unsigned-int tags.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            ValueCell::I8(v) => Some(v as i64),
            ValueCell::I16(v) => Some(v as i64),
            ValueCell::I32(v) => Some(v as i64),
            ValueCell::I64(v) => Some(v),
            ValueCell::U8(v) => Some(v as i64),
            ValueCell::U16(v) => Some(v as i64),
            ValueCell::U32(v) => Some(v as i64),
            ValueCell::U64(v) => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> f32 {
        match *self {
            ValueCell::F32(v) => v,
            ValueCell::F64(v) => v as f32,
            other => f32::from_bits(other.bits() as u32),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            ValueCell::F64(v) => v,
            ValueCell::F32(v) => v as f64,
            other => f64::from_bits(other.bits()),
        }
    }

    pub fn as_addr(&self) -> Option<MemRef> {
        match *self {
            ValueCell::Addr(a) => Some(a),
            ValueCell::Agg { addr, .. } => Some(addr),
            ValueCell::U64(b) => Some(MemRef::from_bits(b)),
            ValueCell::I64(b) => Some(MemRef::from_bits(b as u64)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_zero_extends() {
        assert_eq!(ValueCell::I8(-1).bits(), 0xFF);
        assert_eq!(ValueCell::I32(-1).bits(), 0xFFFF_FFFF);
        assert_eq!(ValueCell::U64(u64::MAX).bits(), u64::MAX);
    }

    #[test]
    fn test_retag_is_reinterpretation() {
        let v = ValueCell::U32(0x8000_0000);
        assert_eq!(v.retag(PrimType::I32), ValueCell::I32(i32::MIN));
        let f = ValueCell::F32(1.0);
        assert_eq!(
            f.retag(PrimType::U32),
            ValueCell::U32(1.0f32.to_bits())
        );
    }

    #[test]
    fn test_zero() {
        assert_eq!(ValueCell::zero(PrimType::F64), ValueCell::F64(0.0));
        assert_eq!(ValueCell::zero(PrimType::A64), ValueCell::Addr(MemRef::Null));
    }
}
