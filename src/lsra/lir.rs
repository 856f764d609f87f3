// This module defines the linearized instruction stream the allocator works
// on: register operands with definition/use/read-modify-write roles, call
// markers, and basic blocks carrying predecessor/successor edges with
// live-in/live-out sets computed by an iterative backward pass. Block
// processing order for interval construction is breadth-first from the entry
// block, so intervals start at the shallowest point a value is live.

//! Linearized instruction stream and liveness.

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;

/// Virtual register number.
pub type VReg = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegClass {
    Int,
    Fp,
}

/// How an instruction touches a register operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Def,
    Use,
    /// Read-modify-write.
    UseDef,
}

/// One register operand. `phys` starts empty and is filled by finalization;
/// pre-colored operands (parameter/return registers) carry it from the start.
#[derive(Debug, Clone, Copy)]
pub struct Opnd {
    pub vreg: VReg,
    pub class: RegClass,
    pub role: Role,
    pub phys: Option<u32>,
}

impl Opnd {
    pub fn def(vreg: VReg, class: RegClass) -> Opnd {
        Opnd {
            vreg,
            class,
            role: Role::Def,
            phys: None,
        }
    }

    pub fn use_(vreg: VReg, class: RegClass) -> Opnd {
        Opnd {
            vreg,
            class,
            role: Role::Use,
            phys: None,
        }
    }

    pub fn use_def(vreg: VReg, class: RegClass) -> Opnd {
        Opnd {
            vreg,
            class,
            role: Role::UseDef,
            phys: None,
        }
    }

    pub fn precolored(vreg: VReg, class: RegClass, role: Role, phys: u32) -> Opnd {
        Opnd {
            vreg,
            class,
            role,
            phys: Some(phys),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LirOp {
    Generic,
    /// Call site: caller-saved registers are clobbered here.
    Call,
    /// Spill-slot store inserted by the allocator.
    SpillStore { slot: u32 },
    /// Spill-slot reload inserted by the allocator.
    SpillLoad { slot: u32 },
}

#[derive(Debug, Clone)]
pub struct Insn {
    pub op: LirOp,
    pub opnds: SmallVec<[Opnd; 4]>,
}

impl Insn {
    pub fn new(op: LirOp, opnds: impl IntoIterator<Item = Opnd>) -> Insn {
        Insn {
            op,
            opnds: opnds.into_iter().collect(),
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self.op, LirOp::Call)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    /// Half-open instruction index range.
    pub start: u32,
    pub end: u32,
    pub preds: Vec<u32>,
    pub succs: Vec<u32>,
    pub live_in: HashSet<VReg>,
    pub live_out: HashSet<VReg>,
}

#[derive(Debug, Default)]
pub struct LirFunc {
    pub insns: Vec<Insn>,
    pub blocks: Vec<Block>,
}

impl LirFunc {
    /// Single-block stream, mostly for tests and straight-line input.
    pub fn straight_line(insns: Vec<Insn>) -> LirFunc {
        let end = insns.len() as u32;
        LirFunc {
            insns,
            blocks: vec![Block {
                start: 0,
                end,
                ..Block::default()
            }],
        }
    }

    /// Block visit order: breadth-first from the entry block. Unreachable
    /// blocks are appended in index order so every instruction is covered.
    pub fn bfs_order(&self) -> Vec<u32> {
        let n = self.blocks.len();
        let mut order = Vec::with_capacity(n);
        let mut seen = vec![false; n];
        let mut queue = std::collections::VecDeque::new();
        if n > 0 {
            queue.push_back(0u32);
            seen[0] = true;
        }
        while let Some(b) = queue.pop_front() {
            order.push(b);
            for &s in &self.blocks[b as usize].succs {
                if !seen[s as usize] {
                    seen[s as usize] = true;
                    queue.push_back(s);
                }
            }
        }
        for b in 0..n {
            if !seen[b] {
                order.push(b as u32);
            }
        }
        order
    }

    /// Per-block use/def summary for the liveness pass: `gen` is the set of
    /// registers read before any local write, `kill` the set written.
    fn gen_kill(&self, b: &Block) -> (HashSet<VReg>, HashSet<VReg>) {
        let mut gen = HashSet::new();
        let mut kill: HashSet<VReg> = HashSet::new();
        for insn in &self.insns[b.start as usize..b.end as usize] {
            for o in &insn.opnds {
                match o.role {
                    Role::Use | Role::UseDef => {
                        if !kill.contains(&o.vreg) {
                            gen.insert(o.vreg);
                        }
                    }
                    Role::Def => {}
                }
            }
            for o in &insn.opnds {
                if matches!(o.role, Role::Def | Role::UseDef) {
                    kill.insert(o.vreg);
                }
            }
        }
        (gen, kill)
    }

    /// Iterative backward liveness over the block graph; fills each block's
    /// live-in and live-out sets.
    pub fn compute_liveness(&mut self) {
        let summaries: Vec<_> = self.blocks.iter().map(|b| self.gen_kill(b)).collect();
        let mut changed = true;
        while changed {
            changed = false;
            for b in (0..self.blocks.len()).rev() {
                let mut out = HashSet::new();
                for &s in &self.blocks[b].succs {
                    out.extend(self.blocks[s as usize].live_in.iter().copied());
                }
                let (gen, kill) = &summaries[b];
                let mut inn = gen.clone();
                for v in &out {
                    if !kill.contains(v) {
                        inn.insert(*v);
                    }
                }
                if inn != self.blocks[b].live_in || out != self.blocks[b].live_out {
                    self.blocks[b].live_in = inn;
                    self.blocks[b].live_out = out;
                    changed = true;
                }
            }
        }
    }
}

/// Physical register description for one target, split per class into the
/// three allocation pools plus the always-reserved spill scratch registers.
#[derive(Debug, Clone)]
pub struct TargetRegs {
    pub caller_saved: HashMap<RegClass, Vec<u32>>,
    pub callee_saved: HashMap<RegClass, Vec<u32>>,
    pub params: HashMap<RegClass, Vec<u32>>,
    pub spill_scratch: HashMap<RegClass, Vec<u32>>,
}

impl TargetRegs {
    /// AArch64-shaped default set.
    pub fn aarch64() -> TargetRegs {
        let mut caller_saved = HashMap::new();
        let mut callee_saved = HashMap::new();
        let mut params = HashMap::new();
        let mut spill_scratch = HashMap::new();
        caller_saved.insert(RegClass::Int, (9..=15).collect());
        callee_saved.insert(RegClass::Int, (19..=28).collect());
        params.insert(RegClass::Int, (0..=7).collect());
        spill_scratch.insert(RegClass::Int, vec![16, 17]);
        caller_saved.insert(RegClass::Fp, (48..=55).collect());
        callee_saved.insert(RegClass::Fp, (40..=47).collect());
        params.insert(RegClass::Fp, (32..=39).collect());
        spill_scratch.insert(RegClass::Fp, vec![62, 63]);
        TargetRegs {
            caller_saved,
            callee_saved,
            params,
            spill_scratch,
        }
    }

    pub fn is_callee_saved(&self, class: RegClass, reg: u32) -> bool {
        self.callee_saved
            .get(&class)
            .is_some_and(|v| v.contains(&reg))
    }
}
