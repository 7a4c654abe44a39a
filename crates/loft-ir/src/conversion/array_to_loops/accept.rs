//! Acceptor translation: lower an expression into a caller-supplied
//! destination.
//!
//! Dispatch is on the head operator of an application. Loop-emitting cases
//! (`map_seq`, `map_par`, `reduce_seq`) emit `scf` loops and recurse into
//! the loop body with an indexed destination; shape cases (`split`, `join`)
//! wrap the destination in an accumulator marker and recurse; leaf cases
//! (`add`, `mul`, `fst`, `snd`, embeds) emit an `array.assign` that code
//! generation later resolves into loads and stores.

use super::{Lowering, LowerError, substitute};
use crate::dialect::{arith, array, scf};
use crate::ir::BlockBuilder;
use crate::{DialectOp, Value};

/// Loop construct selected by the combinator.
#[derive(Clone, Copy, PartialEq, Eq)]
enum LoopKind {
    Sequential,
    Parallel,
}

impl<'db> Lowering<'db> {
    /// Lower a value known to be written to `out`.
    ///
    /// This is the entry for lambda-body results: applications recurse into
    /// `accept_apply`; embeds are copied over with produced operands and
    /// assigned; anything else is a structural violation.
    pub(crate) fn accept_value(
        &self,
        b: &mut BlockBuilder<'db>,
        value: Value<'db>,
        out: Value<'db>,
    ) -> Result<(), LowerError> {
        let db = self.db;
        let Some(op) = value.defining_op(db) else {
            // Directly storing an argument has no producer to lower.
            tracing::debug!("storing a block argument directly is not lowered");
            return Ok(());
        };

        if let Ok(apply) = array::Apply::from_operation(db, op) {
            return self.accept_apply(b, apply, out);
        }

        if let Ok(embed) = array::Embed::from_operation(db, op) {
            // Produce each captured operand, splice the region in place and
            // assign its result to the destination.
            let mut produced = Vec::with_capacity(embed.captured(db).len());
            for &operand in embed.captured(db) {
                produced.push(self.produce(b, operand)?);
            }
            let new_embed = op.modify(db).operands(produced.into_iter().collect()).build();
            b.push(new_embed);
            b.op(array::assign(
                db,
                op.location(db),
                new_embed.result(db, 0),
                out,
            ));
            return Ok(());
        }

        Err(LowerError::Malformed {
            op: op.full_name(db),
            message: "only applications and embeds can be written to a destination".to_owned(),
        })
    }

    /// Lower an application into `out`, dispatching on the applied function.
    pub(crate) fn accept_apply(
        &self,
        b: &mut BlockBuilder<'db>,
        apply: array::Apply<'db>,
        out: Value<'db>,
    ) -> Result<(), LowerError> {
        let db = self.db;
        let fun = apply.fun(db);
        let Some(fun_op) = fun.defining_op(db) else {
            return Err(LowerError::UnsupportedOperator {
                op: "block argument".to_owned(),
            });
        };

        if let Ok(reduce) = array::ReduceSeq::from_operation(db, fun_op) {
            return self.accept_reduce(b, apply, reduce, out);
        }
        if let Ok(map) = array::MapSeq::from_operation(db, fun_op) {
            let kind = self.loop_kind_for(fun_op, LoopKind::Sequential)?;
            return self.accept_map(b, apply, out, map.n(db), map.s(db), map.t(db), kind);
        }
        if let Ok(map) = array::MapPar::from_operation(db, fun_op) {
            let kind = self.loop_kind_for(fun_op, LoopKind::Parallel)?;
            return self.accept_map(b, apply, out, map.n(db), map.s(db), map.t(db), kind);
        }
        if let Ok(split) = array::Split::from_operation(db, fun_op) {
            return self.accept_split(b, apply, split, out);
        }
        if let Ok(join) = array::Join::from_operation(db, fun_op) {
            return self.accept_join(b, apply, join, out);
        }
        if let Ok(fst) = array::Fst::from_operation(db, fun_op) {
            return self.accept_projection(b, apply, out, fst.s(db), true);
        }
        if let Ok(snd) = array::Snd::from_operation(db, fun_op) {
            return self.accept_projection(b, apply, out, snd.t(db), false);
        }
        if let Ok(lambda) = array::Lambda::from_operation(db, fun_op) {
            let yielded = substitute(db, lambda, apply.args(db))?;
            return self.accept_value(b, yielded, out);
        }
        if array::Add::from_operation(db, fun_op).is_ok() {
            return self.accept_binary(b, apply, out, "add");
        }
        if array::Mul::from_operation(db, fun_op).is_ok() {
            return self.accept_binary(b, apply, out, "mul");
        }

        // Hard stop for the enclosing lowering.
        Err(LowerError::UnsupportedOperator {
            op: fun_op.full_name(db),
        })
    }

    /// reduce(f, init, xs): initialise the destination, loop, fold in place.
    fn accept_reduce(
        &self,
        b: &mut BlockBuilder<'db>,
        apply: array::Apply<'db>,
        reduce: array::ReduceSeq<'db>,
        out: Value<'db>,
    ) -> Result<(), LowerError> {
        let db = self.db;
        let location = apply.as_operation().location(db);
        let args = apply.args(db);
        if args.len() != 3 {
            return Err(LowerError::Malformed {
                op: "array.reduce_seq".to_owned(),
                message: format!("expected 3 arguments, got {}", args.len()),
            });
        }
        let (step_fn, init, xs) = (args[0], args[1], args[2]);
        let n = reduce.n(db);
        let s = reduce.s(db);
        // The accumulator carries a cross-iteration dependency; the target
        // annotation is validated but the loop is always sequential.
        let _ = self.loop_kind_for(reduce.as_operation(), LoopKind::Sequential)?;

        let cont_array = self.produce(b, xs)?;

        // The destination doubles as the accumulator; an array-typed
        // destination is addressed at its first cell.
        let accumulator = out;
        let zero = b.op(arith::Const::index(db, location, 0));
        let indexed_accumulator = match self
            .value_type(out)
            .and_then(|ty| array::element_of(db, ty))
        {
            Some(element) => b
                .op(array::idx(db, location, accumulator, zero.result(db), element))
                .result(db),
            None => accumulator,
        };

        let cont_init = self.produce(b, init)?;
        b.op(array::assign(db, location, cont_init, indexed_accumulator));

        let step_lambda = step_fn
            .defining_op(db)
            .and_then(|op| array::Lambda::from_operation(db, op).ok())
            .ok_or_else(|| LowerError::Malformed {
                op: "array.reduce_seq".to_owned(),
                message: "the step function must be a lambda".to_owned(),
            })?;

        let lower = b.op(arith::Const::index(db, location, 0));
        let upper = b.op(arith::Const::index(db, location, n));
        let step = b.op(arith::Const::index(db, location, 1));

        let mut body_result = Ok(());
        let for_op = scf::For::build(
            db,
            location,
            lower.result(db),
            upper.result(db),
            step.result(db),
            |body, i| {
                body_result = (|| {
                    let element = body.op(array::idx(db, location, cont_array, i, s));
                    // Substitute (element, accumulator) into a fresh copy of
                    // the step lambda and fold into the accumulator.
                    let folded = substitute(db, step_lambda, &[element.result(db), accumulator])?;
                    self.accept_value(body, folded, accumulator)
                })();
            },
        );
        b.op(for_op);
        body_result
    }

    /// map(f, xs): loop over `[0, n)` writing `f(xs[i])` to `out[i]`.
    #[allow(clippy::too_many_arguments)]
    fn accept_map(
        &self,
        b: &mut BlockBuilder<'db>,
        apply: array::Apply<'db>,
        out: Value<'db>,
        n: u64,
        s: crate::Type<'db>,
        t: crate::Type<'db>,
        kind: LoopKind,
    ) -> Result<(), LowerError> {
        let db = self.db;
        let location = apply.as_operation().location(db);
        let args = apply.args(db);
        if args.len() != 2 {
            return Err(LowerError::Malformed {
                op: "array.map".to_owned(),
                message: format!("expected 2 arguments, got {}", args.len()),
            });
        }
        let (f, xs) = (args[0], args[1]);

        let f_lambda = f
            .defining_op(db)
            .and_then(|op| array::Lambda::from_operation(db, op).ok())
            .ok_or_else(|| LowerError::Malformed {
                op: "array.map".to_owned(),
                message: "the mapped function must be a lambda".to_owned(),
            })?;

        let cont_array = self.produce(b, xs)?;

        let lower = b.op(arith::Const::index(db, location, 0));
        let upper = b.op(arith::Const::index(db, location, n));
        let step = b.op(arith::Const::index(db, location, 1));

        let mut body_result = Ok(());
        let build_body = |body: &mut BlockBuilder<'db>, i: Value<'db>| {
            body_result = (|| {
                let element = body.op(array::idx(db, location, cont_array, i, s));
                let mapped = substitute(db, f_lambda, &[element.result(db)])?;
                let slot = body.op(array::idx(db, location, out, i, t));
                self.accept_value(body, mapped, slot.result(db))
            })();
        };

        match kind {
            LoopKind::Sequential => {
                let for_op = scf::For::build(
                    db,
                    location,
                    lower.result(db),
                    upper.result(db),
                    step.result(db),
                    build_body,
                );
                b.op(for_op);
            }
            LoopKind::Parallel => {
                let for_op = scf::ParFor::build(
                    db,
                    location,
                    lower.result(db),
                    upper.result(db),
                    step.result(db),
                    build_body,
                );
                b.op(for_op);
            }
        }
        body_result
    }

    /// split(xs): wrap the destination so the inner writer sees a flat
    /// array; the operand must itself be an application.
    fn accept_split(
        &self,
        b: &mut BlockBuilder<'db>,
        apply: array::Apply<'db>,
        split: array::Split<'db>,
        out: Value<'db>,
    ) -> Result<(), LowerError> {
        let db = self.db;
        let location = apply.as_operation().location(db);
        let (n, m, t) = (split.n(db), split.m(db), split.t(db));
        let flat = array::Array::of(db, n * m, t);
        let marker = b.op(array::split_acc(db, location, out, flat, m));

        let inner = apply.args(db).first().copied().ok_or_else(|| {
            LowerError::Malformed {
                op: "array.split".to_owned(),
                message: "missing operand".to_owned(),
            }
        })?;
        let inner_apply = inner
            .defining_op(db)
            .and_then(|op| array::Apply::from_operation(db, op).ok())
            .ok_or_else(|| LowerError::ExpectsApplication {
                op: "array.split".to_owned(),
            })?;
        self.accept_apply(b, inner_apply, marker.result(db))
    }

    /// join(xs): wrap the destination so the inner writer sees the nested
    /// array; the operand must itself be an application.
    fn accept_join(
        &self,
        b: &mut BlockBuilder<'db>,
        apply: array::Apply<'db>,
        join: array::Join<'db>,
        out: Value<'db>,
    ) -> Result<(), LowerError> {
        let db = self.db;
        let location = apply.as_operation().location(db);
        let (n, m, t) = (join.n(db), join.m(db), join.t(db));
        let nested = array::Array::of(db, n, array::Array::of(db, m, t));
        let marker = b.op(array::join_acc(db, location, out, nested, m));

        let inner = apply.args(db).first().copied().ok_or_else(|| {
            LowerError::Malformed {
                op: "array.join".to_owned(),
                message: "missing operand".to_owned(),
            }
        })?;
        let inner_apply = inner
            .defining_op(db)
            .and_then(|op| array::Apply::from_operation(db, op).ok())
            .ok_or_else(|| LowerError::ExpectsApplication {
                op: "array.join".to_owned(),
            })?;
        self.accept_apply(b, inner_apply, marker.result(db))
    }

    /// fst/snd(tuple): project through a deferred marker and assign.
    fn accept_projection(
        &self,
        b: &mut BlockBuilder<'db>,
        apply: array::Apply<'db>,
        out: Value<'db>,
        component_ty: crate::Type<'db>,
        first: bool,
    ) -> Result<(), LowerError> {
        let db = self.db;
        let location = apply.as_operation().location(db);
        let tuple = apply.args(db).first().copied().ok_or_else(|| {
            LowerError::Malformed {
                op: if first { "array.fst" } else { "array.snd" }.to_owned(),
                message: "missing operand".to_owned(),
            }
        })?;
        let cont_tuple = self.produce(b, tuple)?;
        let projected = if first {
            b.op(array::fst_view(db, location, cont_tuple, component_ty))
                .result(db)
        } else {
            b.op(array::snd_view(db, location, cont_tuple, component_ty))
                .result(db)
        };
        b.op(array::assign(db, location, projected, out));
        Ok(())
    }

    /// add/mul: produce both operands, emit the pending binary, assign.
    fn accept_binary(
        &self,
        b: &mut BlockBuilder<'db>,
        apply: array::Apply<'db>,
        out: Value<'db>,
        kind: &'static str,
    ) -> Result<(), LowerError> {
        let db = self.db;
        let location = apply.as_operation().location(db);
        let args = apply.args(db);
        if args.len() != 2 {
            return Err(LowerError::Malformed {
                op: format!("array.{kind}"),
                message: format!("expected 2 arguments, got {}", args.len()),
            });
        }
        let lhs = self.produce(b, args[0])?;
        let rhs = self.produce(b, args[1])?;
        let bin = b.op(array::binary(
            db,
            location,
            lhs,
            rhs,
            apply.result_ty(db),
            crate::Symbol::new(kind),
        ));
        b.op(array::assign(db, location, bin.result(db), out));
        Ok(())
    }

    /// Honour the `to` annotation of a loop-emitting combinator. The
    /// recognised targets all lower to the same loop family here; the
    /// parallel variant comes from the combinator itself, not the target.
    fn loop_kind_for(
        &self,
        op: crate::Operation<'db>,
        default: LoopKind,
    ) -> Result<LoopKind, LowerError> {
        match array::lowering_target(self.db, op).as_deref() {
            None | Some("loop") | Some("affine") => Ok(default),
            Some(other) => Err(LowerError::UnknownTarget {
                target: other.to_owned(),
            }),
        }
    }
}
