// Constant-initializer trees attached to global and static symbols. The
// global initializer walks these at load time; scalar kinds write raw bytes,
// aggregate kinds recurse with a field-id-keyed element list so sparse
// initializers (skipped fields, unnamed bit-field gaps) can be detected.

use crate::ir::{LabelId, PuIdx, StIdx, StrIdx, TyIdx};

/// One element of an aggregate initializer. `field_id` is the 1-based field
/// number within the enclosing struct, or the element index + 1 for arrays.
#[derive(Debug, Clone)]
pub struct AggElem {
    pub field_id: u32,
    pub value: MirConst,
}

#[derive(Debug, Clone)]
pub enum MirConst {
    Int {
        ty: TyIdx,
        val: i64,
    },
    Float {
        ty: TyIdx,
        val: f32,
    },
    Double {
        ty: TyIdx,
        val: f64,
    },
    /// Interned string literal.
    Str {
        ty: TyIdx,
        idx: StrIdx,
    },
    /// Address of a label within a function.
    LabelAddr {
        ty: TyIdx,
        func: PuIdx,
        label: LabelId,
    },
    /// Address of a data symbol plus a byte offset. `pu` is set when the
    /// referenced symbol is a function-local static.
    AddrOf {
        ty: TyIdx,
        sym: StIdx,
        pu: Option<PuIdx>,
        offset: i64,
    },
    /// Address of a function. Not wired into global initialization.
    AddrOfFunc {
        ty: TyIdx,
        func: PuIdx,
    },
    Agg {
        ty: TyIdx,
        elems: Vec<AggElem>,
    },
}

impl MirConst {
    pub fn ty(&self) -> TyIdx {
        match self {
            MirConst::Int { ty, .. }
            | MirConst::Float { ty, .. }
            | MirConst::Double { ty, .. }
            | MirConst::Str { ty, .. }
            | MirConst::LabelAddr { ty, .. }
            | MirConst::AddrOf { ty, .. }
            | MirConst::AddrOfFunc { ty, .. }
            | MirConst::Agg { ty, .. } => *ty,
        }
    }
}
