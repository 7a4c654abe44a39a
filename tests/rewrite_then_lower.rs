//! Strategy-then-lower tests: restructure a program with rewrite strategies
//! and check that the lowered code computes the same result as the original.

use std::ops::ControlFlow;

use loft::interp::{self, Buffer};
use loft::pipeline;
use loft_ir::dialect::core::{self, Module};
use loft_ir::dialect::{array, func, mem};
use loft_ir::rewrite::PatternApplicator;
use loft_ir::transforms::strategies::{
    AddIdentityAfter, CreateTransposePair, RemoveTransposePair, SplitJoin,
};
use loft_ir::walk::{OperationWalk, WalkAction};
use loft_ir::{DialectOp, DialectType, Location, Symbol, Type, idvec, ir::BlockBuilder};
use salsa::Database;

fn buffer_ty<'db>(db: &'db dyn salsa::Database, dims: &[u64]) -> Type<'db> {
    mem::Ref::with_shape(db, core::F32::new(db).as_type(), dims).as_type()
}

fn only_func<'db>(db: &'db dyn salsa::Database, module: Module<'db>) -> func::Func<'db> {
    let ops = module.body(db).blocks(db)[0].operations(db).clone();
    ops.iter()
        .find_map(|op| func::Func::from_operation(db, *op).ok())
        .expect("module contains a function")
}

fn count_ops_named<'db>(db: &'db dyn salsa::Database, module: Module<'db>, name: &str) -> usize {
    let mut count = 0;
    let _ = module.as_operation().walk_all::<()>(db, |op| {
        if op.name(db) == name {
            count += 1;
        }
        ControlFlow::Continue(WalkAction::Advance)
    });
    count
}

/// map(λx. 10 + x, [1..6]) into a 6-element destination.
#[salsa::tracked]
fn build_map_program(db: &dyn salsa::Database) -> Module<'_> {
    let location = Location::synthetic(db);
    let s = array::Scalar::f32(db);
    Module::build(db, location, Symbol::new("tiling"), |top| {
        let f = func::Func::build(
            db,
            location,
            "mapped",
            idvec![buffer_ty(db, &[6])],
            core::Nil::new(db).as_type(),
            |entry| {
                let dst = entry.arg_value(0);
                let xs = entry.op(array::Literal::array_f32(
                    db,
                    location,
                    &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
                ));
                let add = entry.op(array::Add::create(db, location));
                let ten = entry.op(array::Literal::scalar_f32(db, location, 10.0));
                let inc = entry.op(array::Lambda::build(db, location, idvec![s], s, |body, params| {
                    let applied = body.op(array::Apply::create(
                        db,
                        location,
                        add.result_ty(db),
                        add.result(db),
                        vec![ten.result(db), params[0]],
                    ));
                    applied.result(db)
                }));

                let map = entry.op(array::MapSeq::create(db, location, 6, s, s));
                let mapped = entry.op(array::Apply::create(
                    db,
                    location,
                    map.result_ty(db),
                    map.result(db),
                    vec![inc.result(db), xs.result(db)],
                ));

                entry.op(array::out(db, location, dst, mapped.result(db)));
                entry.op(func::Return::empty(db, location));
            },
        );
        top.op(f);
    })
}

#[salsa::tracked]
fn compile_untiled(db: &dyn salsa::Database) -> Module<'_> {
    pipeline::compile(db, build_map_program(db))
}

#[salsa::tracked]
fn compile_tiled(db: &dyn salsa::Database) -> Module<'_> {
    let module = build_map_program(db);
    let tiled = PatternApplicator::apply_once(db, SplitJoin(3), module).expect("6 % 3 == 0");
    pipeline::compile(db, tiled)
}

#[test]
fn tiling_preserves_results() {
    salsa::DatabaseImpl::default().attach(|db| {
        let expected = vec![11.0, 12.0, 13.0, 14.0, 15.0, 16.0];

        let plain = compile_untiled(db);
        let plain_mem =
            interp::run_func(db, only_func(db, plain), vec![Buffer::zeroed(&[6])]).unwrap();
        assert_eq!(plain_mem[0].data, expected);

        let tiled = compile_tiled(db);
        let tiled_mem =
            interp::run_func(db, only_func(db, tiled), vec![Buffer::zeroed(&[6])]).unwrap();
        assert_eq!(tiled_mem[0].data, expected);
    });
}

#[test]
fn tiling_nests_the_loops() {
    salsa::DatabaseImpl::default().attach(|db| {
        let plain = compile_untiled(db);
        assert_eq!(count_ops_named(db, plain, "for"), 1);

        // Two chunks of three: an outer loop over chunks, an inner loop per
        // chunk, and the flat index recomposed as i*m + j.
        let tiled = compile_tiled(db);
        assert_eq!(count_ops_named(db, tiled, "for"), 2);
    });
}

/// map(λr. map(f, r), xss) over a 2x3 input with an identity anchor, so the
/// transpose-pair strategies have something to hold on to.
#[salsa::tracked]
fn build_anchored_2d(db: &dyn salsa::Database) -> Module<'_> {
    let location = Location::synthetic(db);
    let s = array::Scalar::f32(db);
    let row = array::Array::of(db, 3, s);
    Module::build(db, location, Symbol::new("anchored"), |top| {
        let f = func::Func::build(
            db,
            location,
            "rows",
            idvec![buffer_ty(db, &[2, 3]), buffer_ty(db, &[2, 3])],
            core::Nil::new(db).as_type(),
            |entry| {
                let src = entry.arg_value(0);
                let dst = entry.arg_value(1);
                let src_ty = array::Array::of(db, 2, row);
                let xss = entry.op(array::r#in(db, location, src, src_ty));

                let add = entry.op(array::Add::create(db, location));
                let one = entry.op(array::Literal::scalar_f32(db, location, 1.0));
                let inc = entry.op(array::Lambda::build(db, location, idvec![s], s, |body, params| {
                    let applied = body.op(array::Apply::create(
                        db,
                        location,
                        add.result_ty(db),
                        add.result(db),
                        vec![one.result(db), params[0]],
                    ));
                    applied.result(db)
                }));

                let row_f = entry.op(array::Lambda::build(
                    db,
                    location,
                    idvec![row],
                    row,
                    |body, params| {
                        let inner = body.op(array::MapSeq::create(db, location, 3, s, s));
                        let applied = body.op(array::Apply::create(
                            db,
                            location,
                            inner.result_ty(db),
                            inner.result(db),
                            vec![inc.result(db), params[0]],
                        ));
                        applied.result(db)
                    },
                ));

                let map = entry.op(array::MapSeq::create(db, location, 2, row, row));
                let mapped = entry.op(array::Apply::create(
                    db,
                    location,
                    map.result_ty(db),
                    map.result(db),
                    vec![row_f.result(db), xss.result(db)],
                ));

                entry.op(array::out(db, location, dst, mapped.result(db)));
                entry.op(func::Return::empty(db, location));
            },
        );
        top.op(f);
    })
}

#[salsa::tracked]
fn compile_baseline_2d(db: &dyn salsa::Database) -> Module<'_> {
    pipeline::compile(db, build_anchored_2d(db))
}

#[salsa::tracked]
fn compile_after_transpose_pair_roundtrip(db: &dyn salsa::Database) -> Option<Module<'_>> {
    let module = build_anchored_2d(db);

    // Anchor the outermost application (the 2D map), introduce a transpose
    // pair at the anchor, cancel it again, and lower the result.
    let anchored = PatternApplicator::apply_once(db, AddIdentityAfter, module)?;
    let paired = PatternApplicator::apply_once(db, CreateTransposePair, anchored)?;
    assert!(count_ops_named(db, paired, "transpose") >= 2);
    let removed = PatternApplicator::apply_once(db, RemoveTransposePair, paired)?;
    Some(pipeline::compile(db, removed))
}

#[test]
fn transpose_pair_introduction_and_elimination_is_identity() {
    salsa::DatabaseImpl::default().attach(|db| {
        let expected = vec![2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let src = Buffer::from_values(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let baseline = compile_baseline_2d(db);
        let base_mem = interp::run_func(
            db,
            only_func(db, baseline),
            vec![src.clone(), Buffer::zeroed(&[2, 3])],
        )
        .unwrap();
        assert_eq!(base_mem[1].data, expected);

        let roundtripped =
            compile_after_transpose_pair_roundtrip(db).expect("pair inserted and removed");
        // After elimination no transpose survives to the lowered code: the
        // access pattern is the identity again.
        assert_eq!(count_ops_named(db, roundtripped, "transpose"), 0);
        assert_eq!(count_ops_named(db, roundtripped, "transpose_view"), 0);

        let mem = interp::run_func(
            db,
            only_func(db, roundtripped),
            vec![src, Buffer::zeroed(&[2, 3])],
        )
        .unwrap();
        assert_eq!(mem[1].data, expected);
    });
}
