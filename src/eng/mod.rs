// Execution core: module-lifetime state, frames, expression evaluation,
// statement dispatch, the native bridge and the process shim.

pub mod cvt;
pub mod expr;
pub mod ffi;
pub mod frame;
pub mod interp;
pub mod layout;
pub mod mem;
pub mod module;
pub mod shim;
pub mod value;

pub use expr::AggCtx;
pub use frame::{Frame, LmbcFunc};
pub use mem::{MemRef, Segment};
pub use module::ModuleState;
pub use shim::{run, run_module};
pub use value::ValueCell;
