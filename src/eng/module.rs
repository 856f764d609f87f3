// This module implements ModuleState: the owner of everything with module
// lifetime. It holds the parsed IR, the per-function metadata map, the global
// and uninitialized-static data segments, the variable-offset table filled in
// by the layout pass, the string-literal interning table, the preloaded C
// runtime library handles, and the lazily populated native-symbol and
// function-address caches. The two runtime libraries are opened eagerly
// before any interpretation and stay open for the life of the state, which
// keeps every resolved symbol address valid.

//! Module-lifetime state: segments, metadata, symbol resolution.

use hashbrown::HashMap;
use libloading::Library;
use std::ffi::CString;
use std::rc::Rc;

use crate::error::{EngResult, EngineError};
use crate::eng::frame::LmbcFunc;
use crate::eng::mem::{MemRef, Segment};
use crate::ir::{round_up, Module, PrimType, PuIdx, StIdx, StrIdx, TyIdx};

/// Libraries opened before interpretation starts. Symbols are resolved
/// against these in order.
const PRELOAD_LIBS: [&str; 2] = ["libc.so.6", "libm.so.6"];

/// Placement record for one laid-out global or static variable.
#[derive(Debug, Clone, Copy)]
pub struct VarInf {
    pub ptyp: PrimType,
    pub ty: TyIdx,
    pub size: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncTarget {
    Interp(PuIdx),
    Native(u64),
}

/// Discriminated call-target record, cached per function.
#[derive(Debug)]
pub struct FuncAddr {
    pub name: String,
    pub target: FuncTarget,
    /// Combined rounded byte size of pass-by-value aggregate formals, used
    /// to size the staging buffer for native calls.
    pub agg_formals_size: u32,
}

pub struct ModuleState {
    pub module: Module,
    pub funcs: HashMap<PuIdx, Rc<LmbcFunc>>,
    pub main_fn: Option<PuIdx>,
    pub globals: Segment,
    pub pu_statics: Segment,
    pub globals_size: u32,
    /// Keyed by `var_key`; holds every laid-out global/static variable.
    pub vars: HashMap<u64, VarInf>,
    strings: HashMap<StrIdx, CString>,
    ext_syms: HashMap<String, u64>,
    func_addrs: HashMap<PuIdx, Rc<FuncAddr>>,
    libs: Vec<Library>,
}

/// Variable table key: global symbols use the bare index, function-local
/// statics qualify it with the owning function.
pub fn var_key(pu: Option<PuIdx>, st: StIdx) -> u64 {
    match pu {
        Some(pu) => ((pu as u64 + 1) << 32) | st as u64,
        None => st as u64,
    }
}

impl ModuleState {
    /// Build the full ready-to-execute state: library preload, function
    /// metadata, static layout and global initialization.
    pub fn new(module: Module) -> EngResult<ModuleState> {
        let mut libs = Vec::new();
        for name in PRELOAD_LIBS {
            let lib = unsafe { Library::new(name) }.map_err(|e| EngineError::LibraryLoad {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
            libs.push(lib);
        }

        let mut funcs = HashMap::new();
        let mut main_fn = None;
        for f in &module.functions {
            if !f.has_body() {
                continue;
            }
            if f.name == "main" {
                main_fn = Some(f.pu);
            }
            funcs.insert(f.pu, Rc::new(LmbcFunc::new(f, &module.types)));
        }

        let mut state = ModuleState {
            module,
            funcs,
            main_fn,
            globals: Segment::default(),
            pu_statics: Segment::default(),
            globals_size: 0,
            vars: HashMap::new(),
            strings: HashMap::new(),
            ext_syms: HashMap::new(),
            func_addrs: HashMap::new(),
            libs,
        };
        state.compute_global_layout()?;
        state.init_global_vars()?;
        Ok(state)
    }

    pub fn func_meta(&self, pu: PuIdx) -> EngResult<Rc<LmbcFunc>> {
        self.funcs
            .get(&pu)
            .cloned()
            .ok_or(EngineError::FunctionNotFound(pu))
    }

    /// Base of the uninitialized function-local-static segment (the GP
    /// register's value).
    pub fn gp_ref(&self) -> MemRef {
        self.pu_statics.base_ref()
    }

    /// Address of a laid-out global or function-local-static variable.
    pub fn var_addr(&self, pu: Option<PuIdx>, st: StIdx) -> EngResult<MemRef> {
        let inf = self
            .vars
            .get(&var_key(pu, st))
            .ok_or(EngineError::UnknownSymbol(st))?;
        Ok(self.globals.base_ref().offset(inf.offset as i64))
    }

    /// Interned address of a string literal, stable across evaluations.
    pub fn intern_str(&mut self, idx: StrIdx) -> EngResult<MemRef> {
        if !self.strings.contains_key(&idx) {
            let s = self
                .module
                .strings
                .get(idx as usize)
                .ok_or(EngineError::UnknownSymbol(idx))?;
            let c = CString::new(s.as_bytes()).map_err(|_| {
                EngineError::BadInitializer(format!("string literal {idx} contains NUL"))
            })?;
            self.strings.insert(idx, c);
        }
        let c = &self.strings[&idx];
        Ok(MemRef::of_slice(c.as_bytes_with_nul()))
    }

    /// Resolve a native symbol by name, caching the address.
    pub fn resolve_native(&mut self, name: &str) -> EngResult<u64> {
        if let Some(addr) = self.try_resolve_native(name) {
            return Ok(addr);
        }
        Err(EngineError::UnresolvedNative(name.to_string()))
    }

    pub fn try_resolve_native(&mut self, name: &str) -> Option<u64> {
        if let Some(addr) = self.ext_syms.get(name) {
            return Some(*addr);
        }
        for lib in &self.libs {
            let sym: Result<libloading::Symbol<*const ()>, _> =
                unsafe { lib.get(name.as_bytes()) };
            if let Ok(sym) = sym {
                let addr = (*sym) as u64;
                self.ext_syms.insert(name.to_string(), addr);
                return Some(addr);
            }
        }
        None
    }

    /// External-callee test: no body, declared extern, declared without a
    /// prototype, or weak with a native definition already resolvable.
    pub fn is_ext_func(&mut self, pu: PuIdx) -> EngResult<bool> {
        let f = self
            .module
            .func(pu)
            .ok_or(EngineError::FunctionNotFound(pu))?;
        if !f.has_body() || f.is_extern || f.is_implicit {
            return Ok(true);
        }
        if f.is_weak {
            let name = f.name.clone();
            return Ok(self.try_resolve_native(&name).is_some());
        }
        Ok(false)
    }

    /// Cached call-target record for a function.
    pub fn get_func_addr(&mut self, pu: PuIdx) -> EngResult<Rc<FuncAddr>> {
        if let Some(fa) = self.func_addrs.get(&pu) {
            return Ok(Rc::clone(fa));
        }
        let f = self
            .module
            .func(pu)
            .ok_or(EngineError::FunctionNotFound(pu))?;
        let name = f.name.clone();
        let agg_formals_size = f
            .formals
            .iter()
            .map(|fm| {
                if self.module.types.is_agg(fm.ty) {
                    round_up(self.module.types.size_of(fm.ty), 8)
                } else {
                    0
                }
            })
            .sum();
        let target = if self.is_ext_func(pu)? {
            FuncTarget::Native(self.resolve_native(&name)?)
        } else {
            FuncTarget::Interp(pu)
        };
        let fa = Rc::new(FuncAddr {
            name,
            target,
            agg_formals_size,
        });
        self.func_addrs.insert(pu, Rc::clone(&fa));
        Ok(fa)
    }
}
