//! Rewrite strategies for the array dialect.
//!
//! Each strategy is a pure pattern over the expression DAG: it either fails
//! (`Unchanged`, the input node untouched) or succeeds with freshly built
//! replacement nodes spliced in at the same position. Strategies are applied
//! one position at a time via `PatternApplicator::apply_once`; sequencing
//! and branching combinators over strategies live outside this crate.

use std::ops::ControlFlow;

use crate::dialect::array;
use crate::rewrite::{OpAdaptor, RewritePattern, RewriteResult};
use crate::walk::{OperationWalk, WalkAction};
use crate::{DialectOp, DialectType, Operation, Region, Value, idvec};

/// Fuses `reduce(f, init, map(g, xs))` into
/// `reduce(λ(y, acc). f(g(y), acc), init, xs)`.
pub struct FuseReduceMap;

impl RewritePattern for FuseReduceMap {
    fn match_and_rewrite<'db>(
        &self,
        db: &'db dyn salsa::Database,
        op: &Operation<'db>,
        adaptor: &OpAdaptor<'db, '_>,
    ) -> RewriteResult<'db> {
        let Ok(outer) = array::Apply::from_operation(db, *op) else {
            return RewriteResult::Unchanged;
        };
        let Some(reduce_op) = outer.fun(db).defining_op(db) else {
            return RewriteResult::Unchanged;
        };
        let Ok(reduce) = array::ReduceSeq::from_operation(db, reduce_op) else {
            return RewriteResult::Unchanged;
        };
        let args = outer.args(db);
        if args.len() != 3 {
            return RewriteResult::Unchanged;
        }
        let (step, init, reduce_input) = (args[0], args[1], args[2]);

        let Some(inner_op) = reduce_input.defining_op(db) else {
            return RewriteResult::Unchanged;
        };
        let Ok(inner) = array::Apply::from_operation(db, inner_op) else {
            return RewriteResult::Unchanged;
        };
        let Some(map_op) = inner.fun(db).defining_op(db) else {
            return RewriteResult::Unchanged;
        };
        let Ok(map) = array::MapSeq::from_operation(db, map_op) else {
            return RewriteResult::Unchanged;
        };
        let inner_args = inner.args(db);
        if inner_args.len() != 2 {
            return RewriteResult::Unchanged;
        }
        let (mapped_fn, xs) = (inner_args[0], inner_args[1]);

        let Some(step_ty) = adaptor.get_value_type(db, step) else {
            return RewriteResult::Unchanged;
        };
        let Some(mapped_fn_ty) = adaptor.get_value_type(db, mapped_fn) else {
            return RewriteResult::Unchanged;
        };

        // Successful match.
        let location = op.location(db);
        let n = map.n(db);
        let element = map.s(db);
        let acc_ty = reduce.t(db);

        let fused_reduce = array::ReduceSeq::create(db, location, n, element, acc_ty);
        let fused_step = array::Lambda::build(
            db,
            location,
            idvec![element, acc_ty],
            acc_ty,
            |body, params| {
                let mapped = body.op(array::Apply::create(
                    db,
                    location,
                    mapped_fn_ty,
                    mapped_fn,
                    vec![params[0]],
                ));
                let stepped = body.op(array::Apply::create(
                    db,
                    location,
                    step_ty,
                    step,
                    vec![mapped.result(db), params[1]],
                ));
                stepped.result(db)
            },
        );
        let fused = array::Apply::create(
            db,
            location,
            fused_reduce.result_ty(db),
            fused_reduce.result(db),
            vec![fused_step.result(db), init, xs],
        );

        RewriteResult::expand(vec![
            fused_reduce.as_operation(),
            fused_step.as_operation(),
            fused.as_operation(),
        ])
    }

    fn name(&self) -> &'static str {
        "FuseReduceMap"
    }
}

/// Tiles `map(f, xs)` into `join(map(map(f), split(factor, xs)))` when the
/// array length is divisible by the factor.
pub struct SplitJoin(pub u64);

impl RewritePattern for SplitJoin {
    fn match_and_rewrite<'db>(
        &self,
        db: &'db dyn salsa::Database,
        op: &Operation<'db>,
        _adaptor: &OpAdaptor<'db, '_>,
    ) -> RewriteResult<'db> {
        let factor = self.0;
        let Ok(outer) = array::Apply::from_operation(db, *op) else {
            return RewriteResult::Unchanged;
        };
        let Some(map_op) = outer.fun(db).defining_op(db) else {
            return RewriteResult::Unchanged;
        };
        let Ok(map) = array::MapSeq::from_operation(db, map_op) else {
            return RewriteResult::Unchanged;
        };
        let args = outer.args(db);
        if args.len() != 2 {
            return RewriteResult::Unchanged;
        }
        let n = map.n(db);
        if factor == 0 || n % factor != 0 {
            return RewriteResult::Unchanged;
        }

        // Successful match.
        let (f, xs) = (args[0], args[1]);
        let location = op.location(db);
        let s = map.s(db);
        let t = map.t(db);
        let chunks = n / factor;
        let chunk_in = array::Array::of(db, factor, s);
        let chunk_out = array::Array::of(db, factor, t);

        let split = array::Split::create(db, location, chunks, factor, s);
        let split_apply = array::Apply::create(
            db,
            location,
            split.result_ty(db),
            split.result(db),
            vec![xs],
        );

        let per_chunk = array::Lambda::build(
            db,
            location,
            idvec![chunk_in],
            chunk_out,
            |body, params| {
                let inner_map = body.op(array::MapSeq::create(db, location, factor, s, t));
                let applied = body.op(array::Apply::create(
                    db,
                    location,
                    inner_map.result_ty(db),
                    inner_map.result(db),
                    vec![f, params[0]],
                ));
                applied.result(db)
            },
        );

        let outer_map = array::MapSeq::create(db, location, chunks, chunk_in, chunk_out);
        let tiled = array::Apply::create(
            db,
            location,
            outer_map.result_ty(db),
            outer_map.result(db),
            vec![per_chunk.result(db), split_apply.result(db)],
        );

        let join = array::Join::create(db, location, chunks, factor, t);
        let joined = array::Apply::create(
            db,
            location,
            join.result_ty(db),
            join.result(db),
            vec![tiled.result(db)],
        );

        RewriteResult::expand(vec![
            split.as_operation(),
            split_apply.as_operation(),
            per_chunk.as_operation(),
            outer_map.as_operation(),
            tiled.as_operation(),
            join.as_operation(),
            joined.as_operation(),
        ])
    }

    fn name(&self) -> &'static str {
        "SplitJoin"
    }
}

/// Wraps an application's result with a semantically transparent identity,
/// used as an anchor for later strategies. Only meaningful under
/// `apply_once`; under fixpoint application it would wrap forever.
pub struct AddIdentityAfter;

impl RewritePattern for AddIdentityAfter {
    fn match_and_rewrite<'db>(
        &self,
        db: &'db dyn salsa::Database,
        op: &Operation<'db>,
        _adaptor: &OpAdaptor<'db, '_>,
    ) -> RewriteResult<'db> {
        let Ok(applied) = array::Apply::from_operation(db, *op) else {
            return RewriteResult::Unchanged;
        };
        // Re-wrapping an identity application anchors nothing new.
        if let Some(fun_op) = applied.fun(db).defining_op(db)
            && array::Id::from_operation(db, fun_op).is_ok()
        {
            return RewriteResult::Unchanged;
        }

        let location = op.location(db);
        let result_ty = applied.result_ty(db);
        let id = array::Id::create(db, location, result_ty);
        let wrapped = array::Apply::create(
            db,
            location,
            id.result_ty(db),
            id.result(db),
            vec![applied.result(db)],
        );

        RewriteResult::expand(vec![*op, id.as_operation(), wrapped.as_operation()])
    }

    fn name(&self) -> &'static str {
        "AddIdentityAfter"
    }
}

/// Replaces an identity application over a 2D array with a pair of
/// transposes over its argument.
pub struct CreateTransposePair;

impl RewritePattern for CreateTransposePair {
    fn match_and_rewrite<'db>(
        &self,
        db: &'db dyn salsa::Database,
        op: &Operation<'db>,
        _adaptor: &OpAdaptor<'db, '_>,
    ) -> RewriteResult<'db> {
        let Ok(applied) = array::Apply::from_operation(db, *op) else {
            return RewriteResult::Unchanged;
        };
        let Some(fun_op) = applied.fun(db).defining_op(db) else {
            return RewriteResult::Unchanged;
        };
        if array::Id::from_operation(db, fun_op).is_err() {
            return RewriteResult::Unchanged;
        }
        if applied.args(db).len() != 1 {
            return RewriteResult::Unchanged;
        }
        // The result must be a 2D array.
        let Some(outer_arr) = array::Array::from_type(db, applied.result_ty(db)) else {
            return RewriteResult::Unchanged;
        };
        let Some(inner_arr) = array::Array::from_type(db, outer_arr.element(db)) else {
            return RewriteResult::Unchanged;
        };

        // Successful match.
        let location = op.location(db);
        let x = applied.args(db)[0];
        let n = outer_arr.size(db);
        let m = inner_arr.size(db);
        let element = inner_arr.element(db);

        let inner_t = array::Transpose::create(db, location, n, m, element);
        let inner_applied = array::Apply::create(
            db,
            location,
            inner_t.result_ty(db),
            inner_t.result(db),
            vec![x],
        );
        let outer_t = array::Transpose::create(db, location, m, n, element);
        let outer_applied = array::Apply::create(
            db,
            location,
            outer_t.result_ty(db),
            outer_t.result(db),
            vec![inner_applied.result(db)],
        );

        RewriteResult::expand(vec![
            inner_t.as_operation(),
            inner_applied.as_operation(),
            outer_t.as_operation(),
            outer_applied.as_operation(),
        ])
    }

    fn name(&self) -> &'static str {
        "CreateTransposePair"
    }
}

/// Cancels two adjacent transposes: `transpose(transpose(x))` becomes `x`.
pub struct RemoveTransposePair;

impl RewritePattern for RemoveTransposePair {
    fn match_and_rewrite<'db>(
        &self,
        db: &'db dyn salsa::Database,
        op: &Operation<'db>,
        _adaptor: &OpAdaptor<'db, '_>,
    ) -> RewriteResult<'db> {
        let Ok(outer) = array::Apply::from_operation(db, *op) else {
            return RewriteResult::Unchanged;
        };
        let Some(outer_fun) = outer.fun(db).defining_op(db) else {
            return RewriteResult::Unchanged;
        };
        if array::Transpose::from_operation(db, outer_fun).is_err() {
            return RewriteResult::Unchanged;
        }
        if outer.args(db).len() != 1 {
            return RewriteResult::Unchanged;
        }
        let Some(inner_op) = outer.args(db)[0].defining_op(db) else {
            return RewriteResult::Unchanged;
        };
        let Ok(inner) = array::Apply::from_operation(db, inner_op) else {
            return RewriteResult::Unchanged;
        };
        let Some(inner_fun) = inner.fun(db).defining_op(db) else {
            return RewriteResult::Unchanged;
        };
        if array::Transpose::from_operation(db, inner_fun).is_err() {
            return RewriteResult::Unchanged;
        }
        if inner.args(db).len() != 1 {
            return RewriteResult::Unchanged;
        }

        // Successful match: both transposes cancel.
        RewriteResult::erase(vec![inner.args(db)[0]])
    }

    fn name(&self) -> &'static str {
        "RemoveTransposePair"
    }
}

/// Moves a transpose across a map-of-map:
/// `transpose(map(λr. map(f, r), xs))` becomes
/// `map(λc. map(f, c), transpose(xs))`.
///
/// Legality requires both inner lambdas to be eta-reducible: otherwise
/// relocating the transpose would change which elements a closure captures.
pub struct MapMapFusionAcrossTranspose;

impl RewritePattern for MapMapFusionAcrossTranspose {
    fn match_and_rewrite<'db>(
        &self,
        db: &'db dyn salsa::Database,
        op: &Operation<'db>,
        _adaptor: &OpAdaptor<'db, '_>,
    ) -> RewriteResult<'db> {
        let Ok(outer) = array::Apply::from_operation(db, *op) else {
            return RewriteResult::Unchanged;
        };
        let Some(transpose_op) = outer.fun(db).defining_op(db) else {
            return RewriteResult::Unchanged;
        };
        if array::Transpose::from_operation(db, transpose_op).is_err() {
            return RewriteResult::Unchanged;
        }
        if outer.args(db).len() != 1 {
            return RewriteResult::Unchanged;
        }
        let Some(map_apply_op) = outer.args(db)[0].defining_op(db) else {
            return RewriteResult::Unchanged;
        };
        let Ok(map_apply) = array::Apply::from_operation(db, map_apply_op) else {
            return RewriteResult::Unchanged;
        };
        let Some(outer_map_op) = map_apply.fun(db).defining_op(db) else {
            return RewriteResult::Unchanged;
        };
        let Ok(outer_map) = array::MapSeq::from_operation(db, outer_map_op) else {
            return RewriteResult::Unchanged;
        };
        if map_apply.args(db).len() != 2 {
            return RewriteResult::Unchanged;
        }
        let Some(row_lambda_op) = map_apply.args(db)[0].defining_op(db) else {
            return RewriteResult::Unchanged;
        };
        let Ok(row_lambda) = array::Lambda::from_operation(db, row_lambda_op) else {
            return RewriteResult::Unchanged;
        };
        let Some(row_body) = row_lambda.yielded(db).and_then(|v| v.defining_op(db)) else {
            return RewriteResult::Unchanged;
        };
        let Ok(inner_apply) = array::Apply::from_operation(db, row_body) else {
            return RewriteResult::Unchanged;
        };
        let Some(inner_map_op) = inner_apply.fun(db).defining_op(db) else {
            return RewriteResult::Unchanged;
        };
        let Ok(inner_map) = array::MapSeq::from_operation(db, inner_map_op) else {
            return RewriteResult::Unchanged;
        };
        if inner_apply.args(db).len() != 2 {
            return RewriteResult::Unchanged;
        }
        let Some(elem_lambda_op) = inner_apply.args(db)[0].defining_op(db) else {
            return RewriteResult::Unchanged;
        };
        let Ok(elem_lambda) = array::Lambda::from_operation(db, elem_lambda_op) else {
            return RewriteResult::Unchanged;
        };

        // Legality precondition on both lambdas.
        if !eta_reducible(db, row_lambda) || !eta_reducible(db, elem_lambda) {
            return RewriteResult::Unchanged;
        }

        // Successful match.
        let location = op.location(db);
        let xs = map_apply.args(db)[1];
        let elem_fn = inner_apply.args(db)[0];
        let rows = outer_map.n(db);
        let cols = inner_map.n(db);
        let s_elem = inner_map.s(db);
        let t_elem = inner_map.t(db);

        let transpose_in = array::Transpose::create(db, location, rows, cols, s_elem);
        let transposed = array::Apply::create(
            db,
            location,
            transpose_in.result_ty(db),
            transpose_in.result(db),
            vec![xs],
        );

        let col_in = array::Array::of(db, rows, s_elem);
        let col_out = array::Array::of(db, rows, t_elem);
        let per_column = array::Lambda::build(db, location, idvec![col_in], col_out, |body, params| {
            let col_map = body.op(array::MapSeq::create(db, location, rows, s_elem, t_elem));
            let applied = body.op(array::Apply::create(
                db,
                location,
                col_map.result_ty(db),
                col_map.result(db),
                vec![elem_fn, params[0]],
            ));
            applied.result(db)
        });

        let column_map = array::MapSeq::create(db, location, cols, col_in, col_out);
        let fused = array::Apply::create(
            db,
            location,
            column_map.result_ty(db),
            column_map.result(db),
            vec![per_column.result(db), transposed.result(db)],
        );

        RewriteResult::expand(vec![
            transpose_in.as_operation(),
            transposed.as_operation(),
            per_column.as_operation(),
            column_map.as_operation(),
            fused.as_operation(),
        ])
    }

    fn name(&self) -> &'static str {
        "MapMapFusionAcrossTranspose"
    }
}

/// Structural eta-reducibility check.
///
/// A lambda is eta-reducible when its body is exactly one application whose
/// trailing argument is the lambda's own parameter, and that parameter is
/// used nowhere else.
pub fn eta_reducible<'db>(db: &'db dyn salsa::Database, lambda: array::Lambda<'db>) -> bool {
    let Some(block) = lambda.entry_block(db) else {
        return false;
    };
    if block.args(db).len() != 1 {
        return false;
    }
    let param = block.arg(db, 0);

    let Some(yielded) = lambda.yielded(db) else {
        return false;
    };
    let Some(yielded_op) = yielded.defining_op(db) else {
        return false;
    };
    let Ok(app) = array::Apply::from_operation(db, yielded_op) else {
        return false;
    };
    if app.args(db).last() != Some(&param) {
        return false;
    }

    count_uses_in_region(db, lambda.body(db), param) == 1
}

/// Number of operand edges in `region` (including nested regions) that point
/// at `value`.
fn count_uses_in_region<'db>(
    db: &'db dyn salsa::Database,
    region: Region<'db>,
    value: Value<'db>,
) -> usize {
    let mut count = 0;
    let _ = region.walk_all::<()>(db, |op| {
        count += op.operands(db).iter().filter(|&&v| v == value).count();
        ControlFlow::Continue(WalkAction::Advance)
    });
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::core::{self, Module};
    use crate::rewrite::PatternApplicator;
    use crate::{Location, Symbol, ir::BlockBuilder};

    fn wrap_in_module<'db>(
        db: &'db dyn salsa::Database,
        f: impl FnOnce(&mut BlockBuilder<'db>),
    ) -> Module<'db> {
        let location = Location::synthetic(db);
        Module::build(db, location, Symbol::new("test"), f)
    }

    /// reduce(add, 0, map(mul2, [1,2,3,4]))
    #[salsa::tracked]
    fn build_reduce_of_map(db: &dyn salsa::Database) -> Module<'_> {
        let location = Location::synthetic(db);
        let s = array::Scalar::f32(db);
        wrap_in_module(db, |top| {
            let xs = top.op(array::Literal::array_f32(db, location, &[1.0, 2.0, 3.0, 4.0]));
            let init = top.op(array::Literal::scalar_f32(db, location, 0.0));

            let mul = top.op(array::Mul::create(db, location));
            let two = top.op(array::Literal::scalar_f32(db, location, 2.0));
            let mul2 = top.op(array::Lambda::build(
                db,
                location,
                crate::idvec![s],
                s,
                |body, params| {
                    let applied = body.op(array::Apply::create(
                        db,
                        location,
                        mul.result_ty(db),
                        mul.result(db),
                        vec![two.result(db), params[0]],
                    ));
                    applied.result(db)
                },
            ));

            let map = top.op(array::MapSeq::create(db, location, 4, s, s));
            let mapped = top.op(array::Apply::create(
                db,
                location,
                map.result_ty(db),
                map.result(db),
                vec![mul2.result(db), xs.result(db)],
            ));

            let add = top.op(array::Add::create(db, location));
            let step = top.op(array::Lambda::build(
                db,
                location,
                crate::idvec![s, s],
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
            let reduce = top.op(array::ReduceSeq::create(db, location, 4, s, s));
            top.op(array::Apply::create(
                db,
                location,
                reduce.result_ty(db),
                reduce.result(db),
                vec![step.result(db), init.result(db), mapped.result(db)],
            ));
        })
    }

    fn count_ops<'db>(db: &'db dyn salsa::Database, module: Module<'db>, name: &str) -> usize {
        let mut count = 0;
        let _ = module.as_operation().walk_all::<()>(db, |op| {
            if op.name(db) == name {
                count += 1;
            }
            ControlFlow::Continue(WalkAction::Advance)
        });
        count
    }

    #[salsa::tracked]
    fn fuse(db: &dyn salsa::Database, module: Module<'_>) -> Option<Module<'_>> {
        PatternApplicator::apply_once(db, FuseReduceMap, module)
    }

    #[test]
    fn fuse_reduce_map_rewrites_structure() {
        salsa::DatabaseImpl::default().attach(|db| {
            let module = build_reduce_of_map(db);
            let fused = fuse(db, module).expect("strategy matches");

            // The reduction now consumes the literal array directly; the
            // map application survives only as an unused node.
            let top_block = fused.body(db).blocks(db)[0];
            let mut reduction_input = None;
            for op in top_block.operations(db).iter() {
                if let Ok(app) = array::Apply::from_operation(db, *op)
                    && let Some(fun_op) = app.fun(db).defining_op(db)
                    && array::ReduceSeq::from_operation(db, fun_op).is_ok()
                {
                    reduction_input = app.args(db)[2].defining_op(db);
                }
            }
            let input_op = reduction_input.expect("a reduce application remains");
            assert_eq!(
                input_op.name(db),
                "literal",
                "the fused reduction reads the array directly"
            );
            assert!(count_ops(db, fused, "reduce_seq") >= 1);
        });
    }

    #[salsa::tracked]
    fn fuse_twice(db: &dyn salsa::Database, module: Module<'_>) -> bool {
        let once = PatternApplicator::apply_once(db, FuseReduceMap, module).unwrap();
        PatternApplicator::apply_once(db, FuseReduceMap, once).is_none()
    }

    #[test]
    fn fuse_reduce_map_fails_after_fusing() {
        salsa::DatabaseImpl::default().attach(|db| {
            let module = build_reduce_of_map(db);
            assert!(fuse_twice(db, module), "no map left to fuse");
        });
    }

    /// map(id-ish lambda, [..4 elements..])
    #[salsa::tracked]
    fn build_simple_map(db: &dyn salsa::Database) -> Module<'_> {
        let location = Location::synthetic(db);
        let s = array::Scalar::f32(db);
        wrap_in_module(db, |top| {
            let xs = top.op(array::Literal::array_f32(db, location, &[1.0, 2.0, 3.0, 4.0]));
            let add = top.op(array::Add::create(db, location));
            let one = top.op(array::Literal::scalar_f32(db, location, 1.0));
            let f = top.op(array::Lambda::build(
                db,
                location,
                crate::idvec![s],
                s,
                |body, params| {
                    let applied = body.op(array::Apply::create(
                        db,
                        location,
                        add.result_ty(db),
                        add.result(db),
                        vec![one.result(db), params[0]],
                    ));
                    applied.result(db)
                },
            ));
            let map = top.op(array::MapSeq::create(db, location, 4, s, s));
            top.op(array::Apply::create(
                db,
                location,
                map.result_ty(db),
                map.result(db),
                vec![f.result(db), xs.result(db)],
            ));
        })
    }

    #[salsa::tracked]
    fn tile_by(db: &dyn salsa::Database, module: Module<'_>, factor: u64) -> Option<Module<'_>> {
        PatternApplicator::apply_once(db, SplitJoin(factor), module)
    }

    #[test]
    fn split_join_tiles_divisible_maps() {
        salsa::DatabaseImpl::default().attach(|db| {
            let module = build_simple_map(db);
            let tiled = tile_by(db, module, 2).expect("4 % 2 == 0");

            assert_eq!(count_ops(db, tiled, "split"), 1);
            assert_eq!(count_ops(db, tiled, "join"), 1);
            // outer map over chunks + inner map inside the lambda
            assert_eq!(count_ops(db, tiled, "map_seq"), 2);
        });
    }

    #[test]
    fn split_join_fails_on_indivisible_factor() {
        salsa::DatabaseImpl::default().attach(|db| {
            let module = build_simple_map(db);
            assert!(tile_by(db, module, 3).is_none(), "4 % 3 != 0");
        });
    }

    /// Failure must leave the DAG reference-identical.
    #[salsa::tracked]
    fn strategies_on_non_matching_input(db: &dyn salsa::Database, module: Module<'_>) -> bool {
        let block = module.body(db).blocks(db)[0];
        let original_ops: Vec<Operation<'_>> = block.operations(db).iter().copied().collect();

        let failed = tile_by(db, module, 3).is_none();

        let block_after = module.body(db).blocks(db)[0];
        let ops_after: Vec<Operation<'_>> = block_after.operations(db).iter().copied().collect();
        failed && original_ops == ops_after
    }

    #[test]
    fn strategy_failure_does_not_mutate() {
        salsa::DatabaseImpl::default().attach(|db| {
            let module = build_simple_map(db);
            assert!(strategies_on_non_matching_input(db, module));
        });
    }

    /// map(λrow. map(f, row), xss) for a 2x3 input, wrapped variants for the
    /// transpose strategies.
    #[salsa::tracked]
    fn build_map_map(db: &dyn salsa::Database) -> Module<'_> {
        let location = Location::synthetic(db);
        let s = array::Scalar::f32(db);
        let row_ty = array::Array::of(db, 3, s);
        wrap_in_module(db, |top| {
            let input_ty = array::Array::of(db, 2, row_ty);
            let buf_ty = crate::dialect::mem::Ref::with_shape(
                db,
                core::F32::new(db).as_type(),
                &[2, 3],
            )
            .as_type();
            let buf = top.op(crate::dialect::mem::alloc(db, location, buf_ty));
            let xss = top.op(array::r#in(db, location, buf.result(db), input_ty));

            let add = top.op(array::Add::create(db, location));
            let one = top.op(array::Literal::scalar_f32(db, location, 1.0));
            let elem_f = top.op(array::Lambda::build(
                db,
                location,
                crate::idvec![s],
                s,
                |body, params| {
                    let applied = body.op(array::Apply::create(
                        db,
                        location,
                        add.result_ty(db),
                        add.result(db),
                        vec![one.result(db), params[0]],
                    ));
                    applied.result(db)
                },
            ));

            let row_f = top.op(array::Lambda::build(
                db,
                location,
                crate::idvec![row_ty],
                row_ty,
                |body, params| {
                    let inner_map = body.op(array::MapSeq::create(db, location, 3, s, s));
                    let applied = body.op(array::Apply::create(
                        db,
                        location,
                        inner_map.result_ty(db),
                        inner_map.result(db),
                        vec![elem_f.result(db), params[0]],
                    ));
                    applied.result(db)
                },
            ));

            let map = top.op(array::MapSeq::create(db, location, 2, row_ty, row_ty));
            let mapped = top.op(array::Apply::create(
                db,
                location,
                map.result_ty(db),
                map.result(db),
                vec![row_f.result(db), xss.result(db)],
            ));

            let transpose = top.op(array::Transpose::create(db, location, 2, 3, s));
            top.op(array::Apply::create(
                db,
                location,
                transpose.result_ty(db),
                transpose.result(db),
                vec![mapped.result(db)],
            ));
        })
    }

    #[salsa::tracked]
    fn move_transpose(db: &dyn salsa::Database, module: Module<'_>) -> Option<Module<'_>> {
        PatternApplicator::apply_once(db, MapMapFusionAcrossTranspose, module)
    }

    #[test]
    fn map_map_fusion_relocates_transpose_inward() {
        salsa::DatabaseImpl::default().attach(|db| {
            let module = build_map_map(db);
            let moved = move_transpose(db, module).expect("both lambdas are eta-reducible");

            // After the rewrite the transpose is applied to the input, i.e.
            // the transpose application's argument is the `array.in` value.
            let block = moved.body(db).blocks(db)[0];
            let mut transpose_feeds_input = false;
            for op in block.operations(db).iter() {
                if let Ok(app) = array::Apply::from_operation(db, *op)
                    && let Some(fun_op) = app.fun(db).defining_op(db)
                    && array::Transpose::from_operation(db, fun_op).is_ok()
                    && let Some(arg_op) = app.args(db)[0].defining_op(db)
                    && arg_op.name(db) == "in"
                {
                    transpose_feeds_input = true;
                }
            }
            assert!(transpose_feeds_input, "transpose moved onto the input");
        });
    }

    /// transpose(xss) over a 2D input, with no lambdas that would attract
    /// the identity anchor first.
    #[salsa::tracked]
    fn build_transposed_input(db: &dyn salsa::Database) -> Module<'_> {
        let location = Location::synthetic(db);
        let s = array::Scalar::f32(db);
        wrap_in_module(db, |top| {
            let input_ty = array::Array::of(db, 2, array::Array::of(db, 3, s));
            let buf_ty = crate::dialect::mem::Ref::with_shape(
                db,
                core::F32::new(db).as_type(),
                &[2, 3],
            )
            .as_type();
            let buf = top.op(crate::dialect::mem::alloc(db, location, buf_ty));
            let xss = top.op(array::r#in(db, location, buf.result(db), input_ty));

            let transpose = top.op(array::Transpose::create(db, location, 2, 3, s));
            top.op(array::Apply::create(
                db,
                location,
                transpose.result_ty(db),
                transpose.result(db),
                vec![xss.result(db)],
            ));
        })
    }

    #[salsa::tracked]
    fn add_then_pair_then_remove(db: &dyn salsa::Database, module: Module<'_>) -> (bool, bool) {
        // Anchor the transpose application with an identity, introduce a
        // transpose pair at the anchor, and cancel adjacent transposes again.
        let anchored =
            PatternApplicator::apply_once(db, AddIdentityAfter, module).expect("anchors");
        let paired =
            PatternApplicator::apply_once(db, CreateTransposePair, anchored).expect("pairs");
        let pair_count = count_ops(db, paired, "transpose");
        let removed = PatternApplicator::apply_once(db, RemoveTransposePair, paired);
        (pair_count >= 3, removed.is_some())
    }

    #[test]
    fn transpose_pair_roundtrip() {
        salsa::DatabaseImpl::default().attach(|db| {
            let module = build_transposed_input(db);
            let (paired, removed) = add_then_pair_then_remove(db, module);
            assert!(paired, "a transpose pair was introduced");
            assert!(removed, "adjacent transposes cancel");
        });
    }

    #[salsa::tracked]
    fn check_eta(db: &dyn salsa::Database, module: Module<'_>) -> (bool, bool) {
        let location = Location::synthetic(db);
        let s = array::Scalar::f32(db);
        let _ = module;

        let add = array::Add::create(db, location);
        // eta-reducible: λx. add(1.0, x)
        let one = array::Literal::scalar_f32(db, location, 1.0);
        let reducible = array::Lambda::build(db, location, crate::idvec![s], s, |body, params| {
            let applied = body.op(array::Apply::create(
                db,
                location,
                add.result_ty(db),
                add.result(db),
                vec![one.result(db), params[0]],
            ));
            applied.result(db)
        });

        // not eta-reducible: λx. add(x, x) — the parameter is used twice
        let irreducible = array::Lambda::build(db, location, crate::idvec![s], s, |body, params| {
            let applied = body.op(array::Apply::create(
                db,
                location,
                add.result_ty(db),
                add.result(db),
                vec![params[0], params[0]],
            ));
            applied.result(db)
        });

        (eta_reducible(db, reducible), eta_reducible(db, irreducible))
    }

    #[test]
    fn eta_reducibility_predicate() {
        salsa::DatabaseImpl::default().attach(|db| {
            let module = build_simple_map(db);
            let (reducible, irreducible) = check_eta(db, module);
            assert!(reducible);
            assert!(!irreducible);
        });
    }
}
