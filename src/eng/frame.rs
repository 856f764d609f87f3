// This module builds the per-function static metadata (LmbcFunc) and the
// per-activation state (Frame). LmbcFunc is derived once at load time: the
// formal-parameter layout split into pseudo-register-resident, named-variable
// and aggregate formals, the rounded frame and return sizes, and the
// flattened statement vector with its label map. The body tree's block nodes
// are inlined during flattening so the dispatcher can run as one flat loop
// and jump to arbitrary statement indices. Frame owns the auto-variable
// arena, the pseudo-register file, the named-formal slots, the two return
// registers, the outgoing-call staging areas (argument cells, aggregate
// bytes, variadic bytes) and the bump-allocated scratch region backing the
// stack-allocation opcode.

//! Function metadata and execution frames.

use hashbrown::HashMap;
use std::rc::Rc;

use crate::error::{EngResult, EngineError};
use crate::eng::mem::{mstore, MemRef, Segment};
use crate::eng::value::ValueCell;
use crate::ir::{round_up, Function, LabelId, PrimType, PuIdx, StIdx, Stmt, TypeTable};

/// Capacity of the per-frame stack-allocation scratch region.
pub const ALLOCA_MEM_MAX: u32 = 1 << 20;

/// Layout record for one formal parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParmInf {
    pub ptyp: PrimType,
    pub size: u32,
    /// Register-resident formals index the pseudo-register file; the rest
    /// index either the named-variable slots or, for aggregates, the
    /// caller's aggregate-argument buffer by byte offset.
    pub in_preg: bool,
    pub store_idx: u32,
}

/// Static per-function metadata, immutable after load.
#[derive(Debug)]
pub struct LmbcFunc {
    pub pu: PuIdx,
    pub name: String,
    pub frame_size: u32,
    pub is_varargs: bool,
    pub num_pregs: u32,
    pub ret_ptyp: PrimType,
    pub ret_size: u32,
    pub formals_num: u32,
    /// Total rounded byte size of the plain (non-aggregate) formals.
    pub formals_size: u32,
    /// Count of named-variable-resident formals.
    pub formals_num_vars: u32,
    /// Total rounded byte size of the aggregate formals.
    pub formals_agg_size: u32,
    pub parms: Vec<ParmInf>,
    pub parm_by_sym: HashMap<StIdx, u32>,
    /// Flattened body.
    pub code: Vec<Stmt>,
    pub labels: HashMap<LabelId, u32>,
}

impl LmbcFunc {
    pub fn new(f: &Function, types: &TypeTable) -> LmbcFunc {
        let ret_ptyp = types.prim_of(f.ret_ty);
        let ret_size = types.size_of(f.ret_ty);

        let mut parms = Vec::with_capacity(f.formals.len());
        let mut parm_by_sym = HashMap::new();
        let mut formals_size = 0u32;
        let mut formals_num_vars = 0u32;
        let mut formals_agg_size = 0u32;
        for (i, formal) in f.formals.iter().enumerate() {
            let ptyp = types.prim_of(formal.ty);
            let size = types.size_of(formal.ty);
            let parm = if ptyp == PrimType::Agg {
                let store_idx = formals_agg_size;
                formals_agg_size += round_up(size, 8);
                ParmInf {
                    ptyp,
                    size,
                    in_preg: false,
                    store_idx,
                }
            } else if let Some(preg) = formal.preg {
                formals_size += 8;
                ParmInf {
                    ptyp,
                    size,
                    in_preg: true,
                    store_idx: preg,
                }
            } else {
                let store_idx = formals_num_vars;
                formals_num_vars += 1;
                formals_size += 8;
                ParmInf {
                    ptyp,
                    size,
                    in_preg: false,
                    store_idx,
                }
            };
            parms.push(parm);
            parm_by_sym.insert(formal.sym, i as u32);
        }

        let mut code = Vec::new();
        let mut labels = HashMap::new();
        if let Some(body) = &f.body {
            flatten(body, &mut code, &mut labels);
        }

        LmbcFunc {
            pu: f.pu,
            name: f.name.clone(),
            frame_size: round_up(f.frame_size, 8),
            is_varargs: f.is_varargs,
            num_pregs: f.num_pregs,
            ret_ptyp,
            ret_size,
            formals_num: f.formals.len() as u32,
            formals_size,
            formals_num_vars,
            formals_agg_size,
            parms,
            parm_by_sym,
            code,
            labels,
        }
    }

    pub fn label_pc(&self, label: LabelId) -> EngResult<u32> {
        self.labels
            .get(&label)
            .copied()
            .ok_or(EngineError::LabelNotFound {
                func: self.pu,
                label,
            })
    }
}

fn flatten(stmt: &Stmt, code: &mut Vec<Stmt>, labels: &mut HashMap<LabelId, u32>) {
    match stmt {
        Stmt::Block(children) => {
            for c in children {
                flatten(c, code, labels);
            }
        }
        Stmt::Label(l) => {
            labels.insert(*l, code.len() as u32);
            code.push(stmt.clone());
        }
        other => code.push(other.clone()),
    }
}

/// Live state of one interpreted activation.
pub struct Frame {
    pub func: Rc<LmbcFunc>,
    auto_seg: Segment,
    alloca_seg: Segment,
    alloca_off: u32,
    pub pregs: Vec<ValueCell>,
    /// Named-formal slots, 8 bytes each, byte-addressable.
    vars: Segment,
    pub retval0: ValueCell,
    pub retval1: ValueCell,
    /// Staging for an in-flight outgoing call.
    pub call_args: Vec<ValueCell>,
    pub agg_args: Segment,
    pub va_area: Segment,
    /// Snapshots of the caller's staging areas, taken at entry.
    pub caller_agg: MemRef,
    pub caller_va: MemRef,
}

impl Frame {
    pub fn new(func: Rc<LmbcFunc>, caller_agg: MemRef, caller_va: MemRef) -> Frame {
        let num_pregs = func.num_pregs;
        let frame_size = func.frame_size;
        let num_vars = func.formals_num_vars;
        Frame {
            func,
            auto_seg: Segment::new(frame_size),
            alloca_seg: Segment::default(),
            alloca_off: 0,
            pregs: vec![ValueCell::U64(0); num_pregs as usize],
            vars: Segment::new(num_vars * 8),
            retval0: ValueCell::U64(0),
            retval1: ValueCell::U64(0),
            call_args: Vec::new(),
            agg_args: Segment::default(),
            va_area: Segment::default(),
            caller_agg,
            caller_va,
        }
    }

    /// Frame pointer: the auto area is addressed by negative offsets from its
    /// top.
    pub fn fp(&self) -> MemRef {
        self.auto_seg.base_ref().offset(self.func.frame_size as i64)
    }

    /// Address of a named-formal slot.
    pub fn var_slot(&self, store_idx: u32) -> MemRef {
        self.vars.base_ref().offset(store_idx as i64 * 8)
    }

    pub fn preg(&self, idx: u32) -> EngResult<ValueCell> {
        self.pregs
            .get(idx as usize)
            .copied()
            .ok_or(EngineError::PregOutOfRange {
                idx,
                count: self.func.num_pregs,
            })
    }

    pub fn set_preg(&mut self, idx: u32, val: ValueCell) -> EngResult<()> {
        let count = self.func.num_pregs;
        match self.pregs.get_mut(idx as usize) {
            Some(slot) => {
                *slot = val;
                Ok(())
            }
            None => Err(EngineError::PregOutOfRange { idx, count }),
        }
    }

    /// Bump allocation from the scratch region. Exhaustion is an explicit
    /// checked failure.
    pub fn alloca(&mut self, size: u64) -> EngResult<MemRef> {
        if self.alloca_seg.is_empty() {
            self.alloca_seg = Segment::new(ALLOCA_MEM_MAX);
        }
        let size = round_up(size.min(u32::MAX as u64) as u32, 8);
        if self.alloca_off.checked_add(size).map_or(true, |end| end > self.alloca_seg.len()) {
            return Err(EngineError::AllocaExhausted);
        }
        let r = self.alloca_seg.base_ref().offset(self.alloca_off as i64);
        self.alloca_off += size;
        Ok(r)
    }

    /// Install incoming arguments into pseudo-registers and named-formal
    /// slots. Aggregate formals stay in the caller's staging buffer and are
    /// addressed through `caller_agg`.
    pub fn load_args(&mut self, args: &[ValueCell]) -> EngResult<()> {
        let func = Rc::clone(&self.func);
        for (i, parm) in func.parms.iter().enumerate() {
            let Some(val) = args.get(i).copied() else {
                break;
            };
            if parm.ptyp == PrimType::Agg {
                continue;
            }
            if parm.in_preg {
                self.set_preg(parm.store_idx, val)?;
            } else {
                mstore(self.var_slot(parm.store_idx), parm.ptyp, &val)?;
            }
        }
        Ok(())
    }
}
