// This module defines the engine's view of the IR type table: primitive
// types, pointers, arrays with explicit dimension lists, structs and unions
// with importer-supplied size/alignment, bit-field member types, and function
// types. The table is index-addressed (TyIdx) and append-only; size and
// alignment queries derive scalar/array answers and trust the importer for
// aggregates, matching the division of labor in the producing compiler.

use crate::ir::{PrimType, TyIdx};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructKind {
    Struct,
    Union,
}

/// One struct/union member. Bit-field members point at a `BitField` type.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: TyIdx,
}

#[derive(Debug, Clone)]
pub enum TypeKind {
    Prim(PrimType),
    Ptr {
        pointee: TyIdx,
    },
    /// Multi-dimensional array. `dims` lists the extents outermost first.
    Array {
        elem: TyIdx,
        dims: Vec<u32>,
    },
    Struct {
        kind: StructKind,
        fields: Vec<Field>,
        size: u32,
        align: u32,
    },
    /// Bit-field member type: packed into cells of the base primitive type.
    /// A width of zero is the force-alignment sentinel.
    BitField {
        base: PrimType,
        width: u8,
    },
    Func {
        ret: TyIdx,
    },
}

/// Append-only type table.
#[derive(Debug, Default)]
pub struct TypeTable {
    kinds: Vec<TypeKind>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: TypeKind) -> TyIdx {
        self.kinds.push(kind);
        (self.kinds.len() - 1) as TyIdx
    }

    pub fn prim(&mut self, p: PrimType) -> TyIdx {
        // Small table, linear re-use is fine.
        for (i, k) in self.kinds.iter().enumerate() {
            if let TypeKind::Prim(q) = k {
                if *q == p {
                    return i as TyIdx;
                }
            }
        }
        self.push(TypeKind::Prim(p))
    }

    pub fn get(&self, idx: TyIdx) -> &TypeKind {
        &self.kinds[idx as usize]
    }

    /// Primitive tag used when loading/storing a value of this type.
    pub fn prim_of(&self, idx: TyIdx) -> PrimType {
        match self.get(idx) {
            TypeKind::Prim(p) => *p,
            TypeKind::Ptr { .. } | TypeKind::Func { .. } => PrimType::A64,
            TypeKind::BitField { base, .. } => *base,
            TypeKind::Array { .. } | TypeKind::Struct { .. } => PrimType::Agg,
        }
    }

    pub fn size_of(&self, idx: TyIdx) -> u32 {
        match self.get(idx) {
            TypeKind::Prim(p) => p.size(),
            TypeKind::Ptr { .. } | TypeKind::Func { .. } => 8,
            TypeKind::Array { elem, dims } => {
                dims.iter().product::<u32>() * self.size_of(*elem)
            }
            TypeKind::Struct { size, .. } => *size,
            TypeKind::BitField { base, .. } => base.size(),
        }
    }

    pub fn align_of(&self, idx: TyIdx) -> u32 {
        match self.get(idx) {
            TypeKind::Prim(p) => p.align(),
            TypeKind::Ptr { .. } | TypeKind::Func { .. } => 8,
            TypeKind::Array { elem, .. } => self.align_of(*elem),
            TypeKind::Struct { align, .. } => *align,
            TypeKind::BitField { base, .. } => base.align(),
        }
    }

    pub fn is_agg(&self, idx: TyIdx) -> bool {
        matches!(
            self.get(idx),
            TypeKind::Array { .. } | TypeKind::Struct { .. }
        )
    }
}
