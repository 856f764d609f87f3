// End-to-end scenarios over hand-built modules: interpreted call chains,
// aggregate argument staging, variadic argument reading through va_start,
// and the native bridge, all driven through the public entry shim.

use lmbc_eng::eng::run_module;
use lmbc_eng::ir::{
    AggElem, BinOp, Expr, ExprKind, Field, FormalDef, Function, IntrinsicId, MirConst, Module,
    PrimType, RegId, Stmt, StructKind, Symbol, Storage, TypeKind,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn func(pu: u32, name: &str, ret_ty: u32, body: Stmt) -> Function {
    Function {
        pu,
        name: name.into(),
        formals: Vec::new(),
        locals: Vec::new(),
        ret_ty,
        frame_size: 64,
        num_pregs: 8,
        is_varargs: false,
        is_extern: false,
        is_implicit: false,
        is_weak: false,
        body: Some(body),
    }
}

fn ret_i32(rhs: Expr) -> Vec<Stmt> {
    vec![
        Stmt::Regassign {
            ptyp: PrimType::I32,
            reg: RegId::Retval0,
            rhs,
        },
        Stmt::Return,
    ]
}

#[test]
fn interpreted_call_returns_42() {
    init_logging();
    let mut module = Module::default();
    let i32t = module.types.prim(PrimType::I32);

    let forty = func(
        1,
        "forty",
        i32t,
        Stmt::Block(ret_i32(Expr::iconst(PrimType::I32, i32t, 40))),
    );
    let main = func(
        0,
        "main",
        i32t,
        Stmt::Block(
            std::iter::once(Stmt::Call {
                callee: 1,
                args: vec![],
            })
            .chain(ret_i32(Expr::binary(
                PrimType::I32,
                BinOp::Add,
                Expr::regread(PrimType::I32, RegId::Retval0),
                Expr::iconst(PrimType::I32, i32t, 2),
            )))
            .collect(),
        ),
    );
    module.functions = vec![main, forty];
    assert_eq!(run_module(module, &[]).unwrap(), 42);
}

#[test]
fn aggregate_argument_staged_for_call() {
    init_logging();
    let mut module = Module::default();
    let i32t = module.types.prim(PrimType::I32);
    let i64t = module.types.prim(PrimType::I64);
    let agg24 = module.types.push(TypeKind::Struct {
        kind: StructKind::Struct,
        fields: vec![
            Field {
                name: "a".into(),
                ty: i64t,
            },
            Field {
                name: "b".into(),
                ty: i64t,
            },
            Field {
                name: "c".into(),
                ty: i64t,
            },
        ],
        size: 24,
        align: 8,
    });

    // Initialized 24-byte global; the third field is what the callee reads.
    module.symbols = vec![Symbol {
        idx: 0,
        name: "g".into(),
        storage: Storage::Global,
        ty: agg24,
        init: Some(MirConst::Agg {
            ty: agg24,
            elems: vec![
                AggElem {
                    field_id: 1,
                    value: MirConst::Int { ty: i64t, val: 11 },
                },
                AggElem {
                    field_id: 2,
                    value: MirConst::Int { ty: i64t, val: 22 },
                },
                AggElem {
                    field_id: 3,
                    value: MirConst::Int { ty: i64t, val: 33 },
                },
            ],
        }),
    }];

    // take(s) reads s.c through its aggregate formal.
    let mut take = func(
        1,
        "take",
        i32t,
        Stmt::Block(ret_i32(Expr::new(
            PrimType::I32,
            ExprKind::Cvt {
                from: PrimType::I64,
                opnd: Box::new(Expr::new(
                    PrimType::I64,
                    ExprKind::IreadOff {
                        offset: 16,
                        agg_size: 0,
                        base: Box::new(Expr::new(
                            PrimType::A64,
                            ExprKind::AddrOfOff {
                                local: true,
                                sym: 7,
                                offset: 0,
                            },
                        )),
                    },
                )),
            },
        ))),
    );
    take.formals = vec![FormalDef {
        sym: 7,
        ty: agg24,
        preg: None,
    }];

    let main = func(
        0,
        "main",
        i32t,
        Stmt::Block(
            std::iter::once(Stmt::Call {
                callee: 1,
                args: vec![Expr::new(
                    PrimType::Agg,
                    ExprKind::IreadOff {
                        offset: 0,
                        agg_size: 24,
                        base: Box::new(Expr::new(
                            PrimType::A64,
                            ExprKind::AddrOfOff {
                                local: false,
                                sym: 0,
                                offset: 0,
                            },
                        )),
                    },
                )],
            })
            .chain(ret_i32(Expr::regread(PrimType::I32, RegId::Retval0)))
            .collect(),
        ),
    );
    module.functions = vec![main, take];
    assert_eq!(run_module(module, &[]).unwrap(), 33);
}

#[test]
fn variadic_callee_reads_args_after_va_start() {
    init_logging();
    let mut module = Module::default();
    let i32t = module.types.prim(PrimType::I32);
    let va_list_ty = module.types.push(TypeKind::Struct {
        kind: StructKind::Struct,
        fields: Vec::new(),
        size: 32,
        align: 8,
    });

    // Zero-initialized global va_list the callee passes to va_start.
    module.symbols = vec![Symbol {
        idx: 0,
        name: "vl".into(),
        storage: Storage::Global,
        ty: va_list_ty,
        init: Some(MirConst::Agg {
            ty: va_list_ty,
            elems: vec![],
        }),
    }];

    let vl_addr = || {
        Expr::new(
            PrimType::A64,
            ExprKind::AddrOfOff {
                local: false,
                sym: 0,
                offset: 0,
            },
        )
    };
    // Variadic slot i, read as i32 through the emulated argument area.
    let vararg = |i: i64| {
        Expr::new(
            PrimType::I32,
            ExprKind::IreadOff {
                offset: i * 8,
                agg_size: 0,
                base: Box::new(Expr::new(
                    PrimType::A64,
                    ExprKind::IreadOff {
                        offset: 0,
                        agg_size: 0,
                        base: Box::new(vl_addr()),
                    },
                )),
            },
        )
    };
    let mut sum3 = func(
        1,
        "sum3",
        i32t,
        Stmt::Block(
            std::iter::once(Stmt::IntrinsicCall {
                id: IntrinsicId::VaStart,
                args: vec![vl_addr()],
            })
            .chain(ret_i32(Expr::binary(
                PrimType::I32,
                BinOp::Add,
                Expr::binary(PrimType::I32, BinOp::Add, vararg(0), vararg(1)),
                vararg(2),
            )))
            .collect(),
        ),
    );
    sum3.is_varargs = true;
    sum3.formals = vec![FormalDef {
        sym: 1,
        ty: i32t,
        preg: Some(1),
    }];

    let main = func(
        0,
        "main",
        i32t,
        Stmt::Block(
            std::iter::once(Stmt::Call {
                callee: 1,
                args: vec![
                    Expr::iconst(PrimType::I32, i32t, 3),
                    Expr::iconst(PrimType::I32, i32t, 10),
                    Expr::iconst(PrimType::I32, i32t, 20),
                    Expr::iconst(PrimType::I32, i32t, 12),
                ],
            })
            .chain(ret_i32(Expr::regread(PrimType::I32, RegId::Retval0)))
            .collect(),
        ),
    );
    module.functions = vec![main, sum3];
    assert_eq!(run_module(module, &[]).unwrap(), 42);
}

#[test]
fn native_call_through_bridge() {
    init_logging();
    let mut module = Module::default();
    let i32t = module.types.prim(PrimType::I32);
    let i64t = module.types.prim(PrimType::I64);

    let mut labs = func(1, "labs", i64t, Stmt::Return);
    labs.body = None;
    labs.formals = vec![FormalDef {
        sym: 0,
        ty: i64t,
        preg: None,
    }];

    let main = func(
        0,
        "main",
        i32t,
        Stmt::Block(
            std::iter::once(Stmt::Call {
                callee: 1,
                args: vec![Expr::iconst(PrimType::I64, i64t, -7)],
            })
            .chain(ret_i32(Expr::regread(PrimType::I32, RegId::Retval0)))
            .collect(),
        ),
    );
    module.functions = vec![main, labs];
    assert_eq!(run_module(module, &[]).unwrap(), 7);
}

#[test]
fn failure_propagates_to_the_boundary() {
    init_logging();
    let mut module = Module::default();
    let i32t = module.types.prim(PrimType::I32);
    module.functions = vec![func(
        0,
        "main",
        i32t,
        Stmt::Block(vec![Stmt::Nyi("asm"), Stmt::Return]),
    )];
    assert!(matches!(
        run_module(module, &[]),
        Err(lmbc_eng::EngineError::Unimplemented("asm"))
    ));
}
