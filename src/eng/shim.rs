// This module is the process entry shim. It turns a loaded module plus a host
// argument list into one call of the module's `main`, converting each textual
// argument according to the corresponding declared formal type, and maps the
// first return register to a process exit code. A module without a `main`
// runs its static initialization and exits zero. This is the single boundary
// every interpreter error propagates to; `run` logs the failure and produces
// the conventional nonzero exit status.

//! Process entry: argument conversion and exit-code mapping.

use std::ffi::CString;
use std::rc::Rc;

use crate::error::{EngResult, EngineError};
use crate::eng::frame::{Frame, LmbcFunc};
use crate::eng::mem::MemRef;
use crate::eng::module::ModuleState;
use crate::eng::value::ValueCell;
use crate::ir::{Function, Module, PrimType};

/// Convert one textual argument to the value the formal type expects. Float
/// formals take the promoted double, the way a prototype-less C caller would
/// pass them.
fn convert_arg(ptyp: PrimType, text: &str, keep: &mut Vec<CString>) -> EngResult<ValueCell> {
    let bad = |what: &str| {
        EngineError::BadMainArg(format!("cannot read {text:?} as {what}"))
    };
    Ok(match ptyp {
        PrimType::I8 | PrimType::I16 | PrimType::I32 | PrimType::I64 => {
            let v: i64 = text.parse().map_err(|_| bad("an integer"))?;
            ValueCell::I64(v).retag(ptyp)
        }
        PrimType::U8 | PrimType::U16 | PrimType::U32 | PrimType::U64 => {
            let v: u64 = text.parse().map_err(|_| bad("an unsigned integer"))?;
            ValueCell::U64(v).retag(ptyp)
        }
        PrimType::F32 | PrimType::F64 => {
            let v: f64 = text.parse().map_err(|_| bad("a number"))?;
            ValueCell::F64(v)
        }
        PrimType::A64 | PrimType::Ptr => {
            let c = CString::new(text)
                .map_err(|_| EngineError::BadMainArg(format!("argument {text:?} contains NUL")))?;
            keep.push(c);
            let last = keep.len() - 1;
            ValueCell::Addr(MemRef::of_slice(keep[last].as_bytes_with_nul()))
        }
        other => {
            return Err(EngineError::BadMainArg(format!(
                "unsupported formal type {other:?} on main"
            )))
        }
    })
}

/// Load `module`, run its `main` with `args`, return the exit code. A module
/// without `main` yields 0 after static initialization.
pub fn run_module(module: Module, args: &[String]) -> EngResult<i32> {
    let mut state = ModuleState::new(module)?;
    let Some(main_pu) = state.main_fn else {
        log::debug!("module has no main, nothing to run");
        return Ok(0);
    };
    let meta = state.func_meta(main_pu)?;

    let mut keep = Vec::new();
    let mut call_args = Vec::with_capacity(meta.parms.len());
    for (i, parm) in meta.parms.iter().enumerate() {
        let text = args.get(i).ok_or_else(|| {
            EngineError::BadMainArg(format!(
                "main expects {} arguments, got {}",
                meta.parms.len(),
                args.len()
            ))
        })?;
        call_args.push(convert_arg(parm.ptyp, text, &mut keep)?);
    }

    // Synthetic caller activation holding the staged arguments and receiving
    // the return registers.
    let entry = Function {
        pu: u32::MAX,
        name: "<entry>".into(),
        formals: Vec::new(),
        locals: Vec::new(),
        ret_ty: state.module.types.prim(PrimType::I32),
        frame_size: 0,
        num_pregs: 0,
        is_varargs: false,
        is_extern: false,
        is_implicit: false,
        is_weak: false,
        body: None,
    };
    let entry_meta = Rc::new(LmbcFunc::new(&entry, &state.module.types));
    let mut caller = Frame::new(entry_meta, MemRef::Null, MemRef::Null);
    caller.call_args = call_args;

    log::debug!("entering main ({} args)", caller.call_args.len());
    state.invoke(main_pu, &mut caller)?;
    Ok(caller.retval0.bits() as i32)
}

/// Binary-style wrapper: initialize logging, run, log any failure and fold it
/// to the conventional failure status.
pub fn run(module: Module, args: &[String]) -> i32 {
    let _ = env_logger::Builder::from_default_env().try_init();
    match run_module(module, args) {
        Ok(code) => code,
        Err(e) => {
            log::error!("execution failed: {e}");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, FormalDef, RegId, Stmt};

    #[test]
    fn test_no_main_exits_zero() {
        assert_eq!(run_module(Module::default(), &[]).unwrap(), 0);
    }

    #[test]
    fn test_exit_code_comes_from_retval0() {
        let mut module = Module::default();
        let i32t = module.types.prim(PrimType::I32);
        module.functions = vec![Function {
            pu: 0,
            name: "main".into(),
            formals: Vec::new(),
            locals: Vec::new(),
            ret_ty: i32t,
            frame_size: 0,
            num_pregs: 0,
            is_varargs: false,
            is_extern: false,
            is_implicit: false,
            is_weak: false,
            body: Some(Stmt::Block(vec![
                Stmt::Regassign {
                    ptyp: PrimType::I32,
                    reg: RegId::Retval0,
                    rhs: Expr::iconst(PrimType::I32, i32t, 7),
                },
                Stmt::Return,
            ])),
        }];
        assert_eq!(run_module(module, &[]).unwrap(), 7);
    }

    #[test]
    fn test_typed_argument_conversion() {
        // main(x: i32) returns x + 1.
        let mut module = Module::default();
        let i32t = module.types.prim(PrimType::I32);
        module.functions = vec![Function {
            pu: 0,
            name: "main".into(),
            formals: vec![FormalDef {
                sym: 0,
                ty: i32t,
                preg: Some(1),
            }],
            locals: Vec::new(),
            ret_ty: i32t,
            frame_size: 0,
            num_pregs: 4,
            is_varargs: false,
            is_extern: false,
            is_implicit: false,
            is_weak: false,
            body: Some(Stmt::Block(vec![
                Stmt::Regassign {
                    ptyp: PrimType::I32,
                    reg: RegId::Retval0,
                    rhs: Expr::binary(
                        PrimType::I32,
                        crate::ir::BinOp::Add,
                        Expr::regread(PrimType::I32, RegId::Preg(1)),
                        Expr::iconst(PrimType::I32, i32t, 1),
                    ),
                },
                Stmt::Return,
            ])),
        }];
        assert_eq!(run_module(module, &["41".to_string()]).unwrap(), 42);
    }

    #[test]
    fn test_bad_argument_is_reported() {
        let mut keep = Vec::new();
        assert!(matches!(
            convert_arg(PrimType::I32, "not-a-number", &mut keep),
            Err(EngineError::BadMainArg(_))
        ));
        assert!(convert_arg(PrimType::F32, "2.5", &mut keep).is_ok());
        assert!(convert_arg(PrimType::Ptr, "hello", &mut keep).is_ok());
    }
}
