//! End-to-end lowering tests: build an array program, compile it, execute
//! the lowered loops with the interpreter, and check the memory contents.

use std::ops::ControlFlow;

use loft::interp::{self, Buffer};
use loft::pipeline;
use loft_ir::dialect::core::{self, Module};
use loft_ir::dialect::{array, func, mem};
use loft_ir::walk::{OperationWalk, WalkAction};
use loft_ir::{DialectOp, DialectType, Location, Symbol, Type, idvec, ir::BlockBuilder};
use salsa::Database;

/// A lambda `λx. c + x`; with `c = 0.0` this is an identity on scalars.
fn scalar_add_lambda<'db>(
    db: &'db dyn salsa::Database,
    top: &mut BlockBuilder<'db>,
    location: Location<'db>,
    constant: f32,
) -> array::Lambda<'db> {
    let s = array::Scalar::f32(db);
    let add = top.op(array::Add::create(db, location));
    let c = top.op(array::Literal::scalar_f32(db, location, constant));
    top.op(array::Lambda::build(db, location, idvec![s], s, |body, params| {
        let applied = body.op(array::Apply::create(
            db,
            location,
            add.result_ty(db),
            add.result(db),
            vec![c.result(db), params[0]],
        ));
        applied.result(db)
    }))
}

/// Find the single function of a module.
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

fn scalar_cell_ty<'db>(db: &'db dyn salsa::Database) -> Type<'db> {
    mem::Ref::with_shape(db, core::F32::new(db).as_type(), &[]).as_type()
}

fn buffer_ty<'db>(db: &'db dyn salsa::Database, dims: &[u64]) -> Type<'db> {
    mem::Ref::with_shape(db, core::F32::new(db).as_type(), dims).as_type()
}

// ============================================================================
// reduce(add, 0, map(mul2, [1,2,3,4])) == 20
// ============================================================================

#[salsa::tracked]
fn build_reduce_of_map(db: &dyn salsa::Database) -> Module<'_> {
    let location = Location::synthetic(db);
    let s = array::Scalar::f32(db);
    Module::build(db, location, Symbol::new("scenario"), |top| {
        let cell = scalar_cell_ty(db);
        let f = func::Func::build(
            db,
            location,
            "reduce_map",
            idvec![cell],
            core::Nil::new(db).as_type(),
            |entry| {
                let dst = entry.arg_value(0);
                let xs = entry.op(array::Literal::array_f32(db, location, &[1.0, 2.0, 3.0, 4.0]));
                let init = entry.op(array::Literal::scalar_f32(db, location, 0.0));

                // mul2 = λy. 2 * y
                let mul = entry.op(array::Mul::create(db, location));
                let two = entry.op(array::Literal::scalar_f32(db, location, 2.0));
                let mul2 = entry.op(array::Lambda::build(db, location, idvec![s], s, |body, params| {
                    let applied = body.op(array::Apply::create(
                        db,
                        location,
                        mul.result_ty(db),
                        mul.result(db),
                        vec![two.result(db), params[0]],
                    ));
                    applied.result(db)
                }));

                let map = entry.op(array::MapSeq::create(db, location, 4, s, s));
                let mapped = entry.op(array::Apply::create(
                    db,
                    location,
                    map.result_ty(db),
                    map.result(db),
                    vec![mul2.result(db), xs.result(db)],
                ));

                // step = λ(y, acc). y + acc
                let add = entry.op(array::Add::create(db, location));
                let step = entry.op(array::Lambda::build(
                    db,
                    location,
                    idvec![s, s],
                    s,
                    |body, params| {
                        let applied = body.op(array::Apply::create(
                            db,
                            location,
                            add.result_ty(db),
                            add.result(db),
                            vec![params[0], params[1]],
                        ));
                        applied.result(db)
                    },
                ));

                let reduce = entry.op(array::ReduceSeq::create(db, location, 4, s, s));
                let reduced = entry.op(array::Apply::create(
                    db,
                    location,
                    reduce.result_ty(db),
                    reduce.result(db),
                    vec![step.result(db), init.result(db), mapped.result(db)],
                ));

                entry.op(array::out(db, location, dst, reduced.result(db)));
                entry.op(func::Return::empty(db, location));
            },
        );
        top.op(f);
    })
}

#[salsa::tracked]
fn compiled_reduce_of_map(db: &dyn salsa::Database) -> Module<'_> {
    pipeline::compile(db, build_reduce_of_map(db))
}

#[test]
fn reduce_of_map_evaluates_to_twenty() {
    salsa::DatabaseImpl::default().attach(|db| {
        let compiled = compiled_reduce_of_map(db);
        let f = only_func(db, compiled);

        let memory = interp::run_func(db, f, vec![Buffer::zeroed(&[])]).unwrap();
        assert_eq!(memory[0].data, vec![20.0]);
    });
}

#[test]
fn reduce_of_map_lowers_to_loops() {
    salsa::DatabaseImpl::default().attach(|db| {
        let compiled = compiled_reduce_of_map(db);

        // One loop for the temporary map, one for the reduction.
        assert_eq!(count_ops_named(db, compiled, "for"), 2);
        // Nothing from the source dialect survives cleanup.
        assert_eq!(count_ops_named(db, compiled, "assign"), 0);
        assert_eq!(count_ops_named(db, compiled, "map_seq"), 0);
        assert_eq!(count_ops_named(db, compiled, "reduce_seq"), 0);
    });
}

#[salsa::tracked]
fn compiled_fused_reduce_of_map(db: &dyn salsa::Database) -> Module<'_> {
    use loft_ir::rewrite::PatternApplicator;
    use loft_ir::transforms::strategies::FuseReduceMap;

    let module = build_reduce_of_map(db);
    let fused = PatternApplicator::apply_once(db, FuseReduceMap, module).expect("fusible");
    pipeline::compile(db, fused)
}

#[test]
fn fused_reduce_of_map_evaluates_to_twenty_with_one_loop() {
    salsa::DatabaseImpl::default().attach(|db| {
        let compiled = compiled_fused_reduce_of_map(db);
        let f = only_func(db, compiled);

        let memory = interp::run_func(db, f, vec![Buffer::zeroed(&[])]).unwrap();
        assert_eq!(memory[0].data, vec![20.0]);

        // Fusion removed the intermediate array: a single loop remains and
        // the loop body folds 2*x[i] straight into the accumulator.
        assert_eq!(count_ops_named(db, compiled, "for"), 1);
    });
}

// ============================================================================
// join(split(2, map(f, xs))) is the identity copy of map(f, xs)
// ============================================================================

#[salsa::tracked]
fn build_join_of_split(db: &dyn salsa::Database) -> Module<'_> {
    let location = Location::synthetic(db);
    let s = array::Scalar::f32(db);
    Module::build(db, location, Symbol::new("roundtrip"), |top| {
        let f = func::Func::build(
            db,
            location,
            "join_split",
            idvec![buffer_ty(db, &[4])],
            core::Nil::new(db).as_type(),
            |entry| {
                let dst = entry.arg_value(0);
                let xs = entry.op(array::Literal::array_f32(db, location, &[1.0, 2.0, 3.0, 4.0]));
                let id_f = scalar_add_lambda(db, entry, location, 0.0);

                let map = entry.op(array::MapSeq::create(db, location, 4, s, s));
                let mapped = entry.op(array::Apply::create(
                    db,
                    location,
                    map.result_ty(db),
                    map.result(db),
                    vec![id_f.result(db), xs.result(db)],
                ));

                let split = entry.op(array::Split::create(db, location, 2, 2, s));
                let chunked = entry.op(array::Apply::create(
                    db,
                    location,
                    split.result_ty(db),
                    split.result(db),
                    vec![mapped.result(db)],
                ));

                let join = entry.op(array::Join::create(db, location, 2, 2, s));
                let flat = entry.op(array::Apply::create(
                    db,
                    location,
                    join.result_ty(db),
                    join.result(db),
                    vec![chunked.result(db)],
                ));

                entry.op(array::out(db, location, dst, flat.result(db)));
                entry.op(func::Return::empty(db, location));
            },
        );
        top.op(f);
    })
}

#[salsa::tracked]
fn compiled_join_of_split(db: &dyn salsa::Database) -> Module<'_> {
    pipeline::compile(db, build_join_of_split(db))
}

#[test]
fn join_of_split_is_identity_copy() {
    salsa::DatabaseImpl::default().attach(|db| {
        let compiled = compiled_join_of_split(db);
        let f = only_func(db, compiled);

        let memory = interp::run_func(db, f, vec![Buffer::zeroed(&[4])]).unwrap();
        assert_eq!(memory[0].data, vec![1.0, 2.0, 3.0, 4.0]);

        // One loop, one store per element into the destination, exactly as
        // a direct copy would emit.
        assert_eq!(count_ops_named(db, compiled, "for"), 1);
    });
}

// ============================================================================
// split(2, join(split(2, map(f, xs)))) is the identity too
// ============================================================================

#[salsa::tracked]
fn build_split_join_split(db: &dyn salsa::Database) -> Module<'_> {
    let location = Location::synthetic(db);
    let s = array::Scalar::f32(db);
    Module::build(db, location, Symbol::new("sandwich"), |top| {
        let f = func::Func::build(
            db,
            location,
            "split_join_split",
            idvec![buffer_ty(db, &[2, 2])],
            core::Nil::new(db).as_type(),
            |entry| {
                let dst = entry.arg_value(0);
                let xs = entry.op(array::Literal::array_f32(db, location, &[1.0, 2.0, 3.0, 4.0]));
                let id_f = scalar_add_lambda(db, entry, location, 0.0);

                let map = entry.op(array::MapSeq::create(db, location, 4, s, s));
                let mapped = entry.op(array::Apply::create(
                    db,
                    location,
                    map.result_ty(db),
                    map.result(db),
                    vec![id_f.result(db), xs.result(db)],
                ));

                let split_inner = entry.op(array::Split::create(db, location, 2, 2, s));
                let chunked = entry.op(array::Apply::create(
                    db,
                    location,
                    split_inner.result_ty(db),
                    split_inner.result(db),
                    vec![mapped.result(db)],
                ));

                let join = entry.op(array::Join::create(db, location, 2, 2, s));
                let flat = entry.op(array::Apply::create(
                    db,
                    location,
                    join.result_ty(db),
                    join.result(db),
                    vec![chunked.result(db)],
                ));

                let split_outer = entry.op(array::Split::create(db, location, 2, 2, s));
                let rechunked = entry.op(array::Apply::create(
                    db,
                    location,
                    split_outer.result_ty(db),
                    split_outer.result(db),
                    vec![flat.result(db)],
                ));

                entry.op(array::out(db, location, dst, rechunked.result(db)));
                entry.op(func::Return::empty(db, location));
            },
        );
        top.op(f);
    })
}

#[test]
fn split_join_split_is_identity() {
    salsa::DatabaseImpl::default().attach(|db| {
        let module = build_split_join_split(db);
        let compiled = pipeline::compile(db, module);
        let f = only_func(db, compiled);

        let memory = interp::run_func(db, f, vec![Buffer::zeroed(&[2, 2])]).unwrap();
        assert_eq!(memory[0].data, vec![1.0, 2.0, 3.0, 4.0]);
    });
}

// ============================================================================
// split(2, map(f, xs)) decomposes the flat index as (k/m, k%m)
// ============================================================================

#[salsa::tracked]
fn build_split_store(db: &dyn salsa::Database) -> Module<'_> {
    let location = Location::synthetic(db);
    let s = array::Scalar::f32(db);
    Module::build(db, location, Symbol::new("tiles"), |top| {
        let f = func::Func::build(
            db,
            location,
            "split_store",
            idvec![buffer_ty(db, &[2, 2])],
            core::Nil::new(db).as_type(),
            |entry| {
                let dst = entry.arg_value(0);
                let xs = entry.op(array::Literal::array_f32(db, location, &[1.0, 2.0, 3.0, 4.0]));
                let id_f = scalar_add_lambda(db, entry, location, 0.0);

                let map = entry.op(array::MapSeq::create(db, location, 4, s, s));
                let mapped = entry.op(array::Apply::create(
                    db,
                    location,
                    map.result_ty(db),
                    map.result(db),
                    vec![id_f.result(db), xs.result(db)],
                ));

                let split = entry.op(array::Split::create(db, location, 2, 2, s));
                let chunked = entry.op(array::Apply::create(
                    db,
                    location,
                    split.result_ty(db),
                    split.result(db),
                    vec![mapped.result(db)],
                ));

                entry.op(array::out(db, location, dst, chunked.result(db)));
                entry.op(func::Return::empty(db, location));
            },
        );
        top.op(f);
    })
}

#[test]
fn split_store_lands_row_major() {
    salsa::DatabaseImpl::default().attach(|db| {
        let module = build_split_store(db);
        let compiled = pipeline::compile(db, module);
        let f = only_func(db, compiled);

        // dst[k/2][k%2] = xs[k]: row-major contents equal the flat array.
        let memory = interp::run_func(db, f, vec![Buffer::zeroed(&[2, 2])]).unwrap();
        assert_eq!(memory[0].data, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(count_ops_named(db, compiled, "div"), 1);
        assert_eq!(count_ops_named(db, compiled, "rem"), 1);
    });
}

// ============================================================================
// pad clamps reads into [0, n-1]
// ============================================================================

#[salsa::tracked]
fn build_padded_copy(db: &dyn salsa::Database) -> Module<'_> {
    let location = Location::synthetic(db);
    let s = array::Scalar::f32(db);
    Module::build(db, location, Symbol::new("padded"), |top| {
        let f = func::Func::build(
            db,
            location,
            "padded_copy",
            idvec![buffer_ty(db, &[7])],
            core::Nil::new(db).as_type(),
            |entry| {
                let dst = entry.arg_value(0);
                let xs = entry.op(array::Literal::array_f32(db, location, &[1.0, 2.0, 3.0]));
                let fill = entry.op(array::Literal::scalar_f32(db, location, 0.0));
                let id_f = scalar_add_lambda(db, entry, location, 0.0);

                let pad = entry.op(array::Pad::create(db, location, 3, 2, 2, s));
                let padded = entry.op(array::Apply::create(
                    db,
                    location,
                    pad.result_ty(db),
                    pad.result(db),
                    vec![fill.result(db), xs.result(db)],
                ));

                let map = entry.op(array::MapSeq::create(db, location, 7, s, s));
                let mapped = entry.op(array::Apply::create(
                    db,
                    location,
                    map.result_ty(db),
                    map.result(db),
                    vec![id_f.result(db), padded.result(db)],
                ));

                entry.op(array::out(db, location, dst, mapped.result(db)));
                entry.op(func::Return::empty(db, location));
            },
        );
        top.op(f);
    })
}

#[test]
fn pad_clamps_the_border() {
    salsa::DatabaseImpl::default().attach(|db| {
        let module = build_padded_copy(db);
        let compiled = pipeline::compile(db, module);
        let f = only_func(db, compiled);

        let memory = interp::run_func(db, f, vec![Buffer::zeroed(&[7])]).unwrap();
        // i < l clamps to 0; i >= l+n clamps to n-1; the middle is shifted.
        assert_eq!(memory[0].data, vec![1.0, 1.0, 1.0, 2.0, 3.0, 3.0, 3.0]);

        // Branch-free: two selects, no control flow beyond the loop.
        assert_eq!(count_ops_named(db, compiled, "select"), 2);
        assert_eq!(count_ops_named(db, compiled, "for"), 1);
    });
}

// ============================================================================
// dot product through zip/fst/snd
// ============================================================================

#[salsa::tracked]
fn build_dot_product(db: &dyn salsa::Database) -> Module<'_> {
    let location = Location::synthetic(db);
    let s = array::Scalar::f32(db);
    let pair = array::Tuple::new(db, s, s).as_type();
    Module::build(db, location, Symbol::new("dot"), |top| {
        let f = func::Func::build(
            db,
            location,
            "dot",
            idvec![scalar_cell_ty(db)],
            core::Nil::new(db).as_type(),
            |entry| {
                let dst = entry.arg_value(0);
                let lhs = entry.op(array::Literal::array_f32(db, location, &[1.0, 2.0, 3.0]));
                let rhs = entry.op(array::Literal::array_f32(db, location, &[4.0, 5.0, 6.0]));
                let init = entry.op(array::Literal::scalar_f32(db, location, 0.0));

                let zip = entry.op(array::Zip::create(db, location, 3, s, s));
                let zipped = entry.op(array::Apply::create(
                    db,
                    location,
                    zip.result_ty(db),
                    zip.result(db),
                    vec![lhs.result(db), rhs.result(db)],
                ));

                let add = entry.op(array::Add::create(db, location));
                let mul = entry.op(array::Mul::create(db, location));
                let fst = entry.op(array::Fst::create(db, location, s, s));
                let snd = entry.op(array::Snd::create(db, location, s, s));

                // step = λ(y, acc). fst(y)*snd(y) + acc
                let step = entry.op(array::Lambda::build(
                    db,
                    location,
                    idvec![pair, s],
                    s,
                    |body, params| {
                        let first = body.op(array::Apply::create(
                            db,
                            location,
                            fst.result_ty(db),
                            fst.result(db),
                            vec![params[0]],
                        ));
                        let second = body.op(array::Apply::create(
                            db,
                            location,
                            snd.result_ty(db),
                            snd.result(db),
                            vec![params[0]],
                        ));
                        let product = body.op(array::Apply::create(
                            db,
                            location,
                            mul.result_ty(db),
                            mul.result(db),
                            vec![first.result(db), second.result(db)],
                        ));
                        let sum = body.op(array::Apply::create(
                            db,
                            location,
                            add.result_ty(db),
                            add.result(db),
                            vec![product.result(db), params[1]],
                        ));
                        sum.result(db)
                    },
                ));

                let reduce = entry.op(array::ReduceSeq::create(db, location, 3, pair, s));
                let reduced = entry.op(array::Apply::create(
                    db,
                    location,
                    reduce.result_ty(db),
                    reduce.result(db),
                    vec![step.result(db), init.result(db), zipped.result(db)],
                ));

                entry.op(array::out(db, location, dst, reduced.result(db)));
                entry.op(func::Return::empty(db, location));
            },
        );
        top.op(f);
    })
}

#[test]
fn dot_product_through_zip_projections() {
    salsa::DatabaseImpl::default().attach(|db| {
        let module = build_dot_product(db);
        let compiled = pipeline::compile(db, module);
        let f = only_func(db, compiled);

        let memory = interp::run_func(db, f, vec![Buffer::zeroed(&[])]).unwrap();
        assert_eq!(memory[0].data, vec![32.0]);

        // The zip never materialises: no temporary of pairs, only the two
        // literal buffers are allocated.
        assert_eq!(count_ops_named(db, compiled, "alloc"), 2);
    });
}

// ============================================================================
// transpose as a deferred view: dst[i][j] = src[j][i]
// ============================================================================

#[salsa::tracked]
fn build_transpose_copy(db: &dyn salsa::Database) -> Module<'_> {
    let location = Location::synthetic(db);
    let s = array::Scalar::f32(db);
    let row2 = array::Array::of(db, 2, s);
    Module::build(db, location, Symbol::new("transposed"), |top| {
        let f = func::Func::build(
            db,
            location,
            "transpose_copy",
            idvec![buffer_ty(db, &[2, 3]), buffer_ty(db, &[3, 2])],
            core::Nil::new(db).as_type(),
            |entry| {
                let src = entry.arg_value(0);
                let dst = entry.arg_value(1);
                let src_ty = array::Array::of(db, 2, array::Array::of(db, 3, s));
                let xss = entry.op(array::r#in(db, location, src, src_ty));

                let transpose = entry.op(array::Transpose::create(db, location, 2, 3, s));
                let transposed = entry.op(array::Apply::create(
                    db,
                    location,
                    transpose.result_ty(db),
                    transpose.result(db),
                    vec![xss.result(db)],
                ));

                let id_f = scalar_add_lambda(db, entry, location, 0.0);
                let row_f = entry.op(array::Lambda::build(
                    db,
                    location,
                    idvec![row2],
                    row2,
                    |body, params| {
                        let inner = body.op(array::MapSeq::create(db, location, 2, s, s));
                        let applied = body.op(array::Apply::create(
                            db,
                            location,
                            inner.result_ty(db),
                            inner.result(db),
                            vec![id_f.result(db), params[0]],
                        ));
                        applied.result(db)
                    },
                ));

                let map = entry.op(array::MapSeq::create(db, location, 3, row2, row2));
                let mapped = entry.op(array::Apply::create(
                    db,
                    location,
                    map.result_ty(db),
                    map.result(db),
                    vec![row_f.result(db), transposed.result(db)],
                ));

                entry.op(array::out(db, location, dst, mapped.result(db)));
                entry.op(func::Return::empty(db, location));
            },
        );
        top.op(f);
    })
}

#[test]
fn transpose_view_swaps_indices() {
    salsa::DatabaseImpl::default().attach(|db| {
        let module = build_transpose_copy(db);
        let compiled = pipeline::compile(db, module);
        let f = only_func(db, compiled);

        let src = Buffer::from_values(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let memory = interp::run_func(db, f, vec![src, Buffer::zeroed(&[3, 2])]).unwrap();
        assert_eq!(memory[1].data, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    });
}

// ============================================================================
// slide windows: dst[i][j] = xs[i*sp + j]
// ============================================================================

#[salsa::tracked]
fn build_sliding_windows(db: &dyn salsa::Database) -> Module<'_> {
    let location = Location::synthetic(db);
    let s = array::Scalar::f32(db);
    let window = array::Array::of(db, 2, s);
    Module::build(db, location, Symbol::new("windows"), |top| {
        let f = func::Func::build(
            db,
            location,
            "windows",
            idvec![buffer_ty(db, &[3, 2])],
            core::Nil::new(db).as_type(),
            |entry| {
                let dst = entry.arg_value(0);
                let xs = entry.op(array::Literal::array_f32(db, location, &[1.0, 2.0, 3.0, 4.0]));

                let slide = entry.op(array::Slide::create(db, location, 3, 2, 1, s));
                let slid = entry.op(array::Apply::create(
                    db,
                    location,
                    slide.result_ty(db),
                    slide.result(db),
                    vec![xs.result(db)],
                ));

                let id_f = scalar_add_lambda(db, entry, location, 0.0);
                let window_f = entry.op(array::Lambda::build(
                    db,
                    location,
                    idvec![window],
                    window,
                    |body, params| {
                        let inner = body.op(array::MapSeq::create(db, location, 2, s, s));
                        let applied = body.op(array::Apply::create(
                            db,
                            location,
                            inner.result_ty(db),
                            inner.result(db),
                            vec![id_f.result(db), params[0]],
                        ));
                        applied.result(db)
                    },
                ));

                let map = entry.op(array::MapSeq::create(db, location, 3, window, window));
                let mapped = entry.op(array::Apply::create(
                    db,
                    location,
                    map.result_ty(db),
                    map.result(db),
                    vec![window_f.result(db), slid.result(db)],
                ));

                entry.op(array::out(db, location, dst, mapped.result(db)));
                entry.op(func::Return::empty(db, location));
            },
        );
        top.op(f);
    })
}

#[test]
fn slide_reads_overlapping_windows() {
    salsa::DatabaseImpl::default().attach(|db| {
        let module = build_sliding_windows(db);
        let compiled = pipeline::compile(db, module);
        let f = only_func(db, compiled);

        let memory = interp::run_func(db, f, vec![Buffer::zeroed(&[3, 2])]).unwrap();
        assert_eq!(memory[0].data, vec![1.0, 2.0, 2.0, 3.0, 3.0, 4.0]);
    });
}

// ============================================================================
// map_par lowers to a parallel loop
// ============================================================================

#[salsa::tracked]
fn build_parallel_map(db: &dyn salsa::Database) -> Module<'_> {
    let location = Location::synthetic(db);
    let s = array::Scalar::f32(db);
    Module::build(db, location, Symbol::new("parallel"), |top| {
        let f = func::Func::build(
            db,
            location,
            "par_map",
            idvec![buffer_ty(db, &[4])],
            core::Nil::new(db).as_type(),
            |entry| {
                let dst = entry.arg_value(0);
                let xs = entry.op(array::Literal::array_f32(db, location, &[1.0, 2.0, 3.0, 4.0]));
                let inc = scalar_add_lambda(db, entry, location, 1.0);

                let map = entry.op(array::MapPar::create(db, location, 4, s, s));
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

#[test]
fn map_par_emits_a_parallel_loop() {
    salsa::DatabaseImpl::default().attach(|db| {
        let module = build_parallel_map(db);
        let compiled = pipeline::compile(db, module);
        let f = only_func(db, compiled);

        assert_eq!(count_ops_named(db, compiled, "par_for"), 1);
        assert_eq!(count_ops_named(db, compiled, "for"), 0);

        let memory = interp::run_func(db, f, vec![Buffer::zeroed(&[4])]).unwrap();
        assert_eq!(memory[0].data, vec![2.0, 3.0, 4.0, 5.0]);
    });
}

// ============================================================================
// failures abort one function, spare the rest, and are reported
// ============================================================================

#[salsa::tracked]
fn build_unsupported_store(db: &dyn salsa::Database) -> Module<'_> {
    let location = Location::synthetic(db);
    let s = array::Scalar::f32(db);
    Module::build(db, location, Symbol::new("unsupported"), |top| {
        let f = func::Func::build(
            db,
            location,
            "zip_store",
            idvec![buffer_ty(db, &[3])],
            core::Nil::new(db).as_type(),
            |entry| {
                let dst = entry.arg_value(0);
                let lhs = entry.op(array::Literal::array_f32(db, location, &[1.0, 2.0, 3.0]));
                let rhs = entry.op(array::Literal::array_f32(db, location, &[4.0, 5.0, 6.0]));

                // A zip in destination position has no acceptor case.
                let zip = entry.op(array::Zip::create(db, location, 3, s, s));
                let zipped = entry.op(array::Apply::create(
                    db,
                    location,
                    zip.result_ty(db),
                    zip.result(db),
                    vec![lhs.result(db), rhs.result(db)],
                ));

                entry.op(array::out(db, location, dst, zipped.result(db)));
                entry.op(func::Return::empty(db, location));
            },
        );
        top.op(f);

        let ok = func::Func::build(
            db,
            location,
            "fine",
            idvec![buffer_ty(db, &[2])],
            core::Nil::new(db).as_type(),
            |entry| {
                let dst = entry.arg_value(0);
                let xs = entry.op(array::Literal::array_f32(db, location, &[1.0, 2.0]));
                let inc = scalar_add_lambda(db, entry, location, 1.0);
                let map = entry.op(array::MapSeq::create(db, location, 2, s, s));
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
        top.op(ok);
    })
}

#[test]
fn unsupported_operator_fails_only_its_function() {
    salsa::DatabaseImpl::default().attach(|db| {
        let module = build_unsupported_store(db);
        let (compiled, diagnostics) = pipeline::compile_with_diagnostics(db, module);

        // The failing function is reported and left unlowered.
        assert!(
            diagnostics
                .iter()
                .any(|d| d.severity == loft_ir::diagnostic::Severity::Error
                    && d.message.contains("array.zip")),
            "expected an error naming the unsupported operator, got {diagnostics:?}"
        );
        assert_eq!(count_ops_named(db, compiled, "out"), 1, "bad function untouched");

        // The healthy sibling lowered and runs.
        let ops = compiled.body(db).blocks(db)[0].operations(db).clone();
        let good = ops
            .iter()
            .filter_map(|op| func::Func::from_operation(db, *op).ok())
            .find(|f| f.name(db) == "fine")
            .expect("healthy function present");
        let memory = interp::run_func(db, good, vec![Buffer::zeroed(&[2])]).unwrap();
        assert_eq!(memory[0].data, vec![2.0, 3.0]);
    });
}
