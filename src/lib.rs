//! LMBC execution core.
//!
//! A tree-walking interpreter for the low-level Maple bytecode form of Maple
//! IR, together with its native-call bridge and the linear-scan register
//! allocator used by the downstream code generator.
//!
//! # Primary Usage
//!
//! ```ignore
//! use lmbc_eng::ir::Module;
//! use lmbc_eng::eng::run_module;
//!
//! // `module` comes from the importer.
//! let exit = run_module(module, &args)?;
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - The input interface: types, constants, symbols, statement and
//!   expression trees.
//! - [`eng`] - The execution core: module-lifetime state, frames, expression
//!   evaluation, statement dispatch, the libffi bridge and the entry shim.
//! - [`lsra`] - The live-interval allocator over a linearized instruction
//!   stream.

pub mod eng;
pub mod error;
pub mod ir;
pub mod lsra;

pub use error::{EngResult, EngineError};
