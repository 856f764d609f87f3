// This module defines the error types for the LMBC execution core using the
// thiserror crate. EngineError is the single error enum covering every fatal
// condition the engine can hit: unsupported opcodes reached during dispatch,
// type and constant-kind mismatches, unresolved symbols (interpreted and
// native), bad memory accesses against the bounded arenas, resource
// exhaustion in the per-frame allocation scratch region, aggregate
// return-register violations, jump-table range errors, FFI staging problems,
// and register-allocation failures. Each variant carries the context needed
// for a useful diagnostic. Errors are propagated with ? to a single top-level
// boundary (the process shim) which logs and maps them to an exit status.

//! Error types for the LMBC execution core.
//!
//! Using thiserror for idiomatic error handling.

use thiserror::Error;

use crate::ir::{LabelId, PrimType, PuIdx};

/// Main error type for module loading, interpretation, native bridging and
/// register allocation.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("unimplemented opcode: {0}")]
    Unimplemented(&'static str),

    #[error("type mismatch in {context}: {found:?}")]
    TypeMismatch {
        context: &'static str,
        found: PrimType,
    },

    #[error("constant kind does not match expression type {0:?}")]
    ConstKindMismatch(PrimType),

    #[error("unknown symbol index {0}")]
    UnknownSymbol(u32),

    #[error("unresolved native symbol: {0}")]
    UnresolvedNative(String),

    #[error("cannot load native library {name}: {reason}")]
    LibraryLoad { name: String, reason: String },

    #[error("label {label} not found in function {func}")]
    LabelNotFound { func: PuIdx, label: LabelId },

    #[error("function {0} not found")]
    FunctionNotFound(PuIdx),

    #[error("function {0} has no body and no native definition")]
    NoCallTarget(PuIdx),

    #[error("invalid indirect call target")]
    BadCallTarget,

    #[error("out of bounds access: offset {off}, size {size}, arena length {len}")]
    OutOfBounds { off: i64, size: u32, len: u32 },

    #[error("null dereference")]
    NullDeref,

    #[error("address value is not data-addressable")]
    InvalidAddress,

    #[error("stack allocation region exhausted")]
    AllocaExhausted,

    #[error("pseudo register {idx} out of range (function has {count})")]
    PregOutOfRange { idx: u32, count: u32 },

    #[error("aggregate of {0} bytes cannot be returned in registers")]
    AggRetvalTooLarge(u32),

    #[error("cannot assign to the second return register")]
    RetvalOneAssign,

    #[error("shift amount {0} exceeds operand width")]
    ShiftOutOfRange(u64),

    #[error("jump table index {index} out of range (table has {len} entries)")]
    JumpTableOutOfRange { index: i64, len: usize },

    #[error("intrinsic {name} does not support result type {found:?}")]
    IntrinsicTypeMismatch {
        name: &'static str,
        found: PrimType,
    },

    #[error("aggregate variadic argument to native function {0}")]
    AggVarArgNative(String),

    #[error("ffi staging failed: {0}")]
    FfiStaging(String),

    #[error("global initializer error: {0}")]
    BadInitializer(String),

    #[error("invalid main argument: {0}")]
    BadMainArg(String),

    #[error("register allocation failed: {reason}")]
    RegisterAllocation { reason: String },
}

/// Result type alias for engine operations.
pub type EngResult<T> = Result<T, EngineError>;
