// Live-interval register allocation over a linearized instruction stream.
// Independent of the interpreter; shares only the value-lifetime model.

pub mod alloc;
pub mod lir;

pub use alloc::{AllocResult, Assignment, Interval, LiveIntervalAllocator};
pub use lir::{Block, Insn, LirFunc, LirOp, Opnd, RegClass, Role, TargetRegs, VReg};
