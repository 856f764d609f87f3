//! In-memory LMBC IR consumed by the execution engine.
//!
//! The IR is produced by an external importer: a global symbol table, a type
//! table, a function table with statement-tree bodies, and a string-literal
//! table. This module only defines the shapes the engine walks.

pub mod consts;
pub mod module;
pub mod types;

pub use consts::{AggElem, MirConst};
pub use module::{
    BinOp, CmpOp, Expr, ExprKind, FormalDef, Function, IntrinsicId, Module, RegId, Stmt, Storage,
    Symbol, UnOp,
};
pub use types::{Field, StructKind, TypeKind, TypeTable};

/// Program-unit (function) index into the module's function table.
pub type PuIdx = u32;
/// Symbol index, scoped either to the global table or a function's locals.
pub type StIdx = u32;
/// Type table index.
pub type TyIdx = u32;
/// Label number, function-local.
pub type LabelId = u32;
/// String-literal table index.
pub type StrIdx = u32;

/// Primitive value types of the LMBC dialect.
///
/// `A64` is a generic address, `Ptr` a typed pointer (same representation),
/// `Agg` a by-value struct/union/array view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    A64,
    Ptr,
    Agg,
    Void,
}

impl PrimType {
    /// Byte size of the type. Aggregates and void have no intrinsic size.
    pub fn size(self) -> u32 {
        match self {
            PrimType::I8 | PrimType::U8 => 1,
            PrimType::I16 | PrimType::U16 => 2,
            PrimType::I32 | PrimType::U32 | PrimType::F32 => 4,
            PrimType::I64 | PrimType::U64 | PrimType::F64 => 8,
            PrimType::A64 | PrimType::Ptr => 8,
            PrimType::Agg | PrimType::Void => 0,
        }
    }

    pub fn align(self) -> u32 {
        self.size().max(1)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            PrimType::I8 | PrimType::I16 | PrimType::I32 | PrimType::I64
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            PrimType::U8 | PrimType::U16 | PrimType::U32 | PrimType::U64
        )
    }

    pub fn is_int(self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub fn is_float(self) -> bool {
        matches!(self, PrimType::F32 | PrimType::F64)
    }

    pub fn is_address(self) -> bool {
        matches!(self, PrimType::A64 | PrimType::Ptr)
    }

    /// Bit width for the integer types.
    pub fn bits(self) -> u32 {
        self.size() * 8
    }
}

/// Round `n` up to the next multiple of `align` (a power of two).
pub fn round_up(n: u32, align: u32) -> u32 {
    (n + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prim_type_sizes() {
        assert_eq!(PrimType::I8.size(), 1);
        assert_eq!(PrimType::U16.size(), 2);
        assert_eq!(PrimType::F32.size(), 4);
        assert_eq!(PrimType::A64.size(), 8);
        assert_eq!(PrimType::Agg.size(), 0);
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, 8), 0);
        assert_eq!(round_up(1, 8), 8);
        assert_eq!(round_up(8, 8), 8);
        assert_eq!(round_up(13, 4), 16);
    }
}
