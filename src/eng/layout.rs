// This module implements the static layout and initialization passes run
// once when a ModuleState is built. Layout walks the global symbol table,
// aligning a running offset per variable and recording a placement record,
// with the flexible-array-member special case adding trailing bytes when a
// struct's last unbounded array is initialized past its declared bound;
// initialized function-local statics are appended to the same segment.
// Initialization then allocates the zero-filled segments and evaluates every
// constant initializer into place: scalar kinds write raw bytes at the
// variable's address, aggregate kinds walk fields and elements with a
// relative cursor, packing consecutive bit-fields into base-type-sized cells
// (zero-width sentinel forces alignment, an overflowing field starts a fresh
// cell, a transition to a non-bit-field pads to a byte boundary) and
// accounting for unnamed bit-fields hidden in field-id gaps. Any unsupported
// constant shape is a load-time fatal error, since continuing would execute
// against an inconsistent data segment.

//! Global/static variable layout and initialization.

use crate::error::{EngResult, EngineError};
use crate::eng::mem::{mload, mstore, MemRef, Segment};
use crate::eng::module::{var_key, ModuleState, VarInf};
use crate::eng::value::ValueCell;
use crate::ir::{
    round_up, AggElem, Field, MirConst, PrimType, PuIdx, StIdx, Storage, StructKind, TypeKind,
};

/// Relative cursor within one top-level aggregate initializer.
#[derive(Debug, Default, Clone, Copy)]
struct Cursor {
    /// Byte offset from the variable's base.
    off: u32,
    /// Bits already packed into the current bit-field cell.
    bits: u32,
}

impl Cursor {
    fn byte_align(&mut self) {
        self.off += (self.bits + 7) / 8;
        self.bits = 0;
    }
}

impl ModuleState {
    /// Assign a fixed segment offset to every global/file-static variable and
    /// every initialized function-local static.
    pub(crate) fn compute_global_layout(&mut self) -> EngResult<()> {
        let mut offset = 0u32;
        for sym in &self.module.symbols {
            if !matches!(sym.storage, Storage::Global | Storage::FStatic) {
                continue;
            }
            let align = self.module.types.align_of(sym.ty);
            let size = self.module.types.size_of(sym.ty);
            offset = round_up(offset, align);
            self.vars.insert(
                var_key(None, sym.idx),
                VarInf {
                    ptyp: self.module.types.prim_of(sym.ty),
                    ty: sym.ty,
                    size,
                    offset,
                },
            );
            offset += size;
            offset += flex_array_extra(&self.module, sym.ty, sym.init.as_ref());
        }
        for f in &self.module.functions {
            if !f.has_body() {
                continue;
            }
            for local in &f.locals {
                if local.storage != Storage::PuStatic || !local.is_const() {
                    continue;
                }
                let align = self.module.types.align_of(local.ty);
                let size = self.module.types.size_of(local.ty);
                offset = round_up(offset, align);
                self.vars.insert(
                    var_key(Some(f.pu), local.idx),
                    VarInf {
                        ptyp: self.module.types.prim_of(local.ty),
                        ty: local.ty,
                        size,
                        offset,
                    },
                );
                offset += size;
            }
        }
        self.globals_size = offset;
        Ok(())
    }

    /// Allocate the segments and evaluate every constant initializer.
    pub(crate) fn init_global_vars(&mut self) -> EngResult<()> {
        self.globals = Segment::new(self.globals_size);
        self.pu_statics = Segment::new(self.module.global_mem_size);

        let mut work: Vec<(Option<PuIdx>, StIdx, MirConst)> = Vec::new();
        for sym in &self.module.symbols {
            if matches!(sym.storage, Storage::Global | Storage::FStatic) {
                if let Some(init) = &sym.init {
                    work.push((None, sym.idx, init.clone()));
                }
            }
        }
        for f in &self.module.functions {
            if !f.has_body() {
                continue;
            }
            for local in &f.locals {
                if local.storage == Storage::PuStatic {
                    if let Some(init) = &local.init {
                        work.push((Some(f.pu), local.idx, init.clone()));
                    }
                }
            }
        }

        for (pu, st, init) in work {
            let base = self.var_addr(pu, st)?;
            match &init {
                MirConst::Agg { ty, elems } => {
                    let mut cur = Cursor::default();
                    self.init_agg(base, *ty, elems, &mut cur)?;
                }
                scalar => self.init_scalar(base, scalar)?,
            }
        }
        Ok(())
    }

    /// Write one scalar constant at its own declared width.
    fn init_scalar(&mut self, addr: MemRef, c: &MirConst) -> EngResult<()> {
        match c {
            MirConst::Int { ty, val } => {
                let prim = self.module.types.prim_of(*ty);
                mstore(addr, prim, &ValueCell::I64(*val))
            }
            MirConst::Float { val, .. } => mstore(addr, PrimType::F32, &ValueCell::F32(*val)),
            MirConst::Double { val, .. } => mstore(addr, PrimType::F64, &ValueCell::F64(*val)),
            MirConst::Str { idx, .. } => {
                let s = self.intern_str(*idx)?;
                mstore(addr, PrimType::A64, &ValueCell::Addr(s))
            }
            MirConst::LabelAddr { func, label, .. } => {
                let meta = self.func_meta(*func)?;
                let pc = meta.label_pc(*label)?;
                mstore(
                    addr,
                    PrimType::A64,
                    &ValueCell::Addr(MemRef::Label { func: *func, pc }),
                )
            }
            MirConst::AddrOf {
                sym, pu, offset, ..
            } => {
                let target = self.var_addr(*pu, *sym)?.offset(*offset);
                mstore(addr, PrimType::A64, &ValueCell::Addr(target))
            }
            MirConst::AddrOfFunc { .. } => Err(EngineError::BadInitializer(
                "function-address initializer".to_string(),
            )),
            MirConst::Agg { .. } => Err(EngineError::BadInitializer(
                "aggregate constant in scalar position".to_string(),
            )),
        }
    }

    fn init_agg(
        &mut self,
        base: MemRef,
        ty: u32,
        elems: &[AggElem],
        cur: &mut Cursor,
    ) -> EngResult<()> {
        let (kind, fields, align) = match self.module.types.get(ty) {
            TypeKind::Struct {
                kind,
                fields,
                align,
                ..
            } => (*kind, fields.clone(), *align),
            _ => {
                return Err(EngineError::BadInitializer(
                    "aggregate initializer on non-aggregate type".to_string(),
                ))
            }
        };
        cur.off = round_up(cur.off, align);

        let mut prev_id = 0u32;
        for elem in elems {
            if kind == StructKind::Struct && elem.field_id > prev_id + 1 {
                self.account_unnamed_bitfields(&fields, prev_id + 1, elem.field_id, cur)?;
            }
            let field = fields
                .get(elem.field_id as usize - 1)
                .ok_or_else(|| EngineError::BadInitializer("field id out of range".to_string()))?;
            let fty = field.ty;
            match self.module.types.get(fty).clone() {
                TypeKind::BitField { base: bp, width } => {
                    let val = match &elem.value {
                        MirConst::Int { val, .. } => *val,
                        _ => {
                            return Err(EngineError::BadInitializer(
                                "non-integer bit-field initializer".to_string(),
                            ))
                        }
                    };
                    self.write_bitfield(base, bp, width as u32, val, cur)?;
                }
                TypeKind::Struct { .. } => {
                    if cur.bits > 0 {
                        cur.byte_align();
                    }
                    match &elem.value {
                        MirConst::Agg { elems, .. } => {
                            self.init_agg(base, fty, elems, cur)?;
                        }
                        _ => {
                            return Err(EngineError::BadInitializer(
                                "struct field without aggregate initializer".to_string(),
                            ))
                        }
                    }
                }
                TypeKind::Array { elem: ety, dims } => {
                    if cur.bits > 0 {
                        cur.byte_align();
                    }
                    match &elem.value {
                        MirConst::Agg { elems, .. } => {
                            self.init_array(base, ety, &dims, elems, cur)?;
                        }
                        MirConst::Str { .. } => {
                            // Char arrays initialized from a literal are
                            // imported as aggregate constants; a bare string
                            // here means a pointer-sized write.
                            let aligned = round_up(cur.off, 8);
                            cur.off = aligned;
                            self.init_scalar(base.offset(cur.off as i64), &elem.value)?;
                            cur.off += 8;
                        }
                        _ => {
                            return Err(EngineError::BadInitializer(
                                "array field without aggregate initializer".to_string(),
                            ))
                        }
                    }
                }
                _ => {
                    if cur.bits > 0 {
                        cur.byte_align();
                    }
                    let falign = self.module.types.align_of(fty);
                    let fsize = self.module.types.size_of(fty);
                    cur.off = round_up(cur.off, falign);
                    self.init_scalar(base.offset(cur.off as i64), &elem.value)?;
                    cur.off += fsize;
                }
            }
            prev_id = elem.field_id;
        }
        if cur.bits > 0 {
            cur.byte_align();
        }
        Ok(())
    }

    fn init_array(
        &mut self,
        base: MemRef,
        elem_ty: u32,
        dims: &[u32],
        elems: &[AggElem],
        cur: &mut Cursor,
    ) -> EngResult<()> {
        let ealign = self.module.types.align_of(elem_ty);
        cur.off = round_up(cur.off, ealign);
        let inner_dims = &dims[1..];
        // All but the outermost dimension fold into the element stride.
        let stride =
            self.module.types.size_of(elem_ty) * inner_dims.iter().product::<u32>().max(1);
        let start = cur.off;
        for (i, e) in elems.iter().enumerate() {
            cur.off = start + i as u32 * stride;
            cur.bits = 0;
            if !inner_dims.is_empty() {
                match &e.value {
                    MirConst::Agg { elems, .. } => {
                        self.init_array(base, elem_ty, inner_dims, elems, cur)?
                    }
                    _ => {
                        return Err(EngineError::BadInitializer(
                            "multi-dimensional array element must be an aggregate".to_string(),
                        ))
                    }
                }
            } else {
                match self.module.types.get(elem_ty).clone() {
                    TypeKind::Struct { .. } => match &e.value {
                        MirConst::Agg { elems, .. } => self.init_agg(base, elem_ty, elems, cur)?,
                        _ => {
                            return Err(EngineError::BadInitializer(
                                "struct array element must be an aggregate".to_string(),
                            ))
                        }
                    },
                    TypeKind::Array { elem, dims } => match &e.value {
                        MirConst::Agg { elems, .. } => {
                            self.init_array(base, elem, &dims, elems, cur)?
                        }
                        _ => {
                            return Err(EngineError::BadInitializer(
                                "nested array element must be an aggregate".to_string(),
                            ))
                        }
                    },
                    _ => self.init_scalar(base.offset(cur.off as i64), &e.value)?,
                }
            }
        }
        let declared = dims.first().copied().unwrap_or(elems.len() as u32);
        // Trailing elements past the initializer stay zero; flexible arrays
        // may legitimately run past the declared bound.
        cur.off = start + declared.max(elems.len() as u32) * stride;
        cur.bits = 0;
        Ok(())
    }

    /// Pack one bit-field constant into the current cell.
    fn write_bitfield(
        &mut self,
        base: MemRef,
        bprim: PrimType,
        width: u32,
        val: i64,
        cur: &mut Cursor,
    ) -> EngResult<()> {
        if width == 0 {
            // Zero-width sentinel: force alignment before the next field.
            cur.byte_align();
            return Ok(());
        }
        let cell_bits = bprim.bits();
        if cur.bits == 0 {
            cur.off = round_up(cur.off, bprim.size());
        }
        if cur.bits + width > cell_bits {
            cur.off += bprim.size();
            cur.bits = 0;
        }
        let addr = base.offset(cur.off as i64);
        let old = mload(addr, bprim, 0)?.bits();
        let mask = if width >= 64 {
            u64::MAX
        } else {
            (1u64 << width) - 1
        };
        let cell = old | ((val as u64 & mask) << cur.bits);
        mstore(addr, bprim, &ValueCell::U64(cell))?;
        cur.bits += width;
        Ok(())
    }

    /// Advance the cursor over unnamed bit-fields hidden in a field-id gap.
    /// Non-bit-field gap entries (anonymous empty structs and the like) take
    /// no space and are skipped.
    fn account_unnamed_bitfields(
        &mut self,
        fields: &[Field],
        from: u32,
        to: u32,
        cur: &mut Cursor,
    ) -> EngResult<()> {
        for id in from..to {
            let Some(field) = fields.get(id as usize - 1) else {
                break;
            };
            if let TypeKind::BitField { base, width } = self.module.types.get(field.ty) {
                let width = *width as u32;
                if width == 0 {
                    cur.byte_align();
                    continue;
                }
                let cell_bits = base.bits();
                if cur.bits == 0 {
                    cur.off = round_up(cur.off, base.size());
                }
                if cur.bits + width > cell_bits {
                    cur.off += base.size();
                    cur.bits = 0;
                }
                cur.bits += width;
            }
        }
        Ok(())
    }
}

/// Extra trailing bytes for a struct whose last field is a flexible array
/// member initialized past its declared single-element bound.
fn flex_array_extra(
    module: &crate::ir::Module,
    ty: u32,
    init: Option<&MirConst>,
) -> u32 {
    let TypeKind::Struct { fields, .. } = module.types.get(ty) else {
        return 0;
    };
    let Some(last) = fields.last() else {
        return 0;
    };
    let TypeKind::Array { elem, dims } = module.types.get(last.ty) else {
        return 0;
    };
    if dims.first() != Some(&1) {
        return 0;
    }
    let Some(MirConst::Agg { elems, .. }) = init else {
        return 0;
    };
    if elems.len() != fields.len() {
        return 0;
    }
    let Some(MirConst::Agg { elems: arr, .. }) = elems.last().map(|e| &e.value) else {
        return 0;
    };
    if arr.len() > 1 {
        (arr.len() as u32 - 1) * module.types.size_of(*elem)
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Module, Symbol};

    fn mk_module() -> Module {
        Module::default()
    }

    fn global(idx: u32, ty: u32, init: Option<MirConst>) -> Symbol {
        Symbol {
            idx,
            name: format!("g{idx}"),
            storage: Storage::Global,
            ty,
            init,
        }
    }

    #[test]
    fn test_layout_is_aligned_and_disjoint() {
        let mut m = mk_module();
        let i8t = m.types.prim(PrimType::I8);
        let i64t = m.types.prim(PrimType::I64);
        let i32t = m.types.prim(PrimType::I32);
        m.symbols = vec![
            global(0, i8t, None),
            global(1, i64t, None),
            global(2, i32t, None),
            global(3, i8t, None),
        ];
        let state = ModuleState::new(m).unwrap();
        let mut placed: Vec<(u32, u32)> = state
            .vars
            .values()
            .map(|v| (v.offset, v.size))
            .collect();
        placed.sort();
        let mut prev_end = 0;
        for (off, size) in placed {
            assert!(off >= prev_end, "overlap at {off}");
            prev_end = off + size;
        }
        let v1 = &state.vars[&var_key(None, 1)];
        assert_eq!(v1.offset % 8, 0);
        let v2 = &state.vars[&var_key(None, 2)];
        assert_eq!(v2.offset % 4, 0);
    }

    #[test]
    fn test_scalar_initializers() {
        let mut m = mk_module();
        let i32t = m.types.prim(PrimType::I32);
        let f64t = m.types.prim(PrimType::F64);
        m.symbols = vec![
            global(0, i32t, Some(MirConst::Int { ty: i32t, val: -9 })),
            global(
                1,
                f64t,
                Some(MirConst::Double {
                    ty: f64t,
                    val: 6.25,
                }),
            ),
        ];
        let state = ModuleState::new(m).unwrap();
        let a0 = state.var_addr(None, 0).unwrap();
        assert_eq!(mload(a0, PrimType::I32, 0).unwrap(), ValueCell::I32(-9));
        let a1 = state.var_addr(None, 1).unwrap();
        assert_eq!(mload(a1, PrimType::F64, 0).unwrap(), ValueCell::F64(6.25));
    }

    #[test]
    fn test_bitfield_packing_starts_new_cell_on_overflow() {
        let mut m = mk_module();
        let bf10 = m.types.push(TypeKind::BitField {
            base: PrimType::U32,
            width: 10,
        });
        let st = m.types.push(TypeKind::Struct {
            kind: StructKind::Struct,
            fields: vec![
                Field { name: "a".into(), ty: bf10 },
                Field { name: "b".into(), ty: bf10 },
                Field { name: "c".into(), ty: bf10 },
                Field { name: "d".into(), ty: bf10 },
            ],
            size: 8,
            align: 4,
        });
        let ity = m.types.prim(PrimType::I32);
        let elems = (1..=4)
            .map(|i| AggElem {
                field_id: i,
                value: MirConst::Int {
                    ty: ity,
                    val: 0x3FF,
                },
            })
            .collect();
        m.symbols = vec![global(0, st, Some(MirConst::Agg { ty: st, elems }))];
        let state = ModuleState::new(m).unwrap();
        let base = state.var_addr(None, 0).unwrap();
        let cell0 = mload(base, PrimType::U32, 0).unwrap().bits();
        let cell1 = mload(base.offset(4), PrimType::U32, 0).unwrap().bits();
        // Three 10-bit fields fit the first 32-bit cell, the fourth starts a
        // fresh cell and is never split.
        assert_eq!(cell0, 0x3FF | (0x3FF << 10) | (0x3FF << 20));
        assert_eq!(cell1, 0x3FF);
    }

    #[test]
    fn test_flex_array_member_grows_segment() {
        let mut m = mk_module();
        let i32t = m.types.prim(PrimType::I32);
        let arr1 = m.types.push(TypeKind::Array {
            elem: i32t,
            dims: vec![1],
        });
        let st = m.types.push(TypeKind::Struct {
            kind: StructKind::Struct,
            fields: vec![
                Field { name: "n".into(), ty: i32t },
                Field { name: "data".into(), ty: arr1 },
            ],
            size: 8,
            align: 4,
        });
        let mk_int = |v: i64| MirConst::Int { ty: i32t, val: v };
        let init = MirConst::Agg {
            ty: st,
            elems: vec![
                AggElem { field_id: 1, value: mk_int(3) },
                AggElem {
                    field_id: 2,
                    value: MirConst::Agg {
                        ty: arr1,
                        elems: (1..=3)
                            .map(|i| AggElem {
                                field_id: i,
                                value: mk_int(i as i64 * 10),
                            })
                            .collect(),
                    },
                },
            ],
        };
        m.symbols = vec![global(0, st, Some(init))];
        let state = ModuleState::new(m).unwrap();
        // 8 declared bytes plus 2 extra trailing elements.
        assert_eq!(state.globals_size, 16);
        let base = state.var_addr(None, 0).unwrap();
        assert_eq!(mload(base, PrimType::I32, 0).unwrap(), ValueCell::I32(3));
        for i in 0..3 {
            let v = mload(base.offset(4 + i * 4), PrimType::I32, 0).unwrap();
            assert_eq!(v, ValueCell::I32((i as i32 + 1) * 10));
        }
    }

    #[test]
    fn test_addrof_initializer_points_at_sibling_global() {
        let mut m = mk_module();
        let i64t = m.types.prim(PrimType::I64);
        let ptr = m.types.push(TypeKind::Ptr { pointee: i64t });
        m.symbols = vec![
            global(0, i64t, Some(MirConst::Int { ty: i64t, val: 77 })),
            global(
                1,
                ptr,
                Some(MirConst::AddrOf {
                    ty: ptr,
                    sym: 0,
                    pu: None,
                    offset: 0,
                }),
            ),
        ];
        let state = ModuleState::new(m).unwrap();
        let p = state.var_addr(None, 1).unwrap();
        let loaded = mload(p, PrimType::A64, 0).unwrap();
        let target = loaded.as_addr().unwrap();
        assert_eq!(
            mload(target, PrimType::I64, 0).unwrap(),
            ValueCell::I64(77)
        );
    }
}
