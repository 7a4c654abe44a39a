//! Continuation translation: lower an expression whose value is needed by a
//! consumer, deferring shape transforms into marker operations instead of
//! materialising storage.
//!
//! The single combinator that must materialise eagerly is `map`: per-element
//! function application cannot be expressed as an index transform, so a
//! temporary buffer is allocated and the map is acceptor-translated into it.

use super::{Lowering, LowerError};
use crate::dialect::{arith, array, core, mem};
use crate::ir::BlockBuilder;
use crate::{Attribute, DialectOp, DialectType, IdVec, Type, Value, idvec};

impl<'db> Lowering<'db> {
    /// Produce a value (or a deferred view of it) for an unspecified
    /// consumer. Values that cannot be interpreted are returned unchanged
    /// with a remark; their actual consumer may still know what to do.
    pub(crate) fn produce(
        &self,
        b: &mut BlockBuilder<'db>,
        value: Value<'db>,
    ) -> Result<Value<'db>, LowerError> {
        let db = self.db;
        let Some(op) = value.defining_op(db) else {
            // Block arguments are already materialised.
            return Ok(value);
        };

        if let Ok(literal) = array::Literal::from_operation(db, op) {
            return self.produce_literal(b, literal);
        }
        if let Ok(apply) = array::Apply::from_operation(db, op) {
            return self.produce_apply(b, apply);
        }
        if let Ok(embed) = array::Embed::from_operation(db, op) {
            // Produce the captured operands; the region is inlined later.
            let mut new_operands: IdVec<Value<'db>> = IdVec::new();
            let mut changed = false;
            for &operand in embed.captured(db) {
                let produced = self.produce(b, operand)?;
                changed |= produced != operand;
                new_operands.push(produced);
            }
            if !changed {
                return Ok(value);
            }
            let new_embed = op.modify(db).operands(new_operands).build();
            b.push(new_embed);
            return Ok(new_embed.result(db, 0));
        }
        if array::In::from_operation(db, op).is_ok() {
            // Input imports are resolved during address computation.
            return Ok(value);
        }
        if is_marker(db, op) {
            // Already a deferred view; nothing to do.
            return Ok(value);
        }

        self.remark(
            format!(
                "cannot perform continuation translation for {}; leaving the value as is",
                op.full_name(db)
            ),
            op,
        );
        Ok(value)
    }

    /// Literal scalars become constant-producing embeds; literal arrays are
    /// materialised into a fresh buffer.
    fn produce_literal(
        &self,
        b: &mut BlockBuilder<'db>,
        literal: array::Literal<'db>,
    ) -> Result<Value<'db>, LowerError> {
        let db = self.db;
        let location = literal.as_operation().location(db);
        let ty = literal.result_ty(db);

        if array::Scalar::from_type(db, ty).is_some() {
            let constant = literal.value(db).as_f32().ok_or_else(|| {
                LowerError::Malformed {
                    op: "array.literal".to_owned(),
                    message: "scalar literal without a float value".to_owned(),
                }
            })?;
            let embed = b.op(array::Embed::build(
                db,
                location,
                vec![],
                idvec![],
                ty,
                |body, _| {
                    let c = body.op(arith::Const::f32(db, location, constant));
                    c.result(db)
                },
            ));
            return Ok(embed.result(db));
        }

        if array::Array::from_type(db, ty).is_some() {
            let dims = buffer_dims(db, ty);
            let leaves = literal_leaves(literal.value(db));
            let expected: u64 = dims.iter().product();
            if leaves.len() as u64 != expected {
                return Err(LowerError::Malformed {
                    op: "array.literal".to_owned(),
                    message: format!(
                        "literal has {} elements but its type wants {}",
                        leaves.len(),
                        expected
                    ),
                });
            }

            let buf_ty = mem::Ref::with_shape(db, core::F32::new(db).as_type(), &dims).as_type();
            let alloc = b.op(mem::alloc(db, location, buf_ty));

            if leaves.is_empty() {
                // Zero-length literal: nothing to initialise.
            } else if leaves.iter().all(|&v| v == leaves[0]) {
                // Uniform contents: a single fill suffices.
                let c = b.op(arith::Const::f32(db, location, leaves[0]));
                b.op(mem::fill(db, location, alloc.result(db), c.result(db)));
            } else {
                for (flat, &v) in leaves.iter().enumerate() {
                    let mut indices = Vec::with_capacity(dims.len());
                    let mut rest = flat as u64;
                    for &dim in dims.iter().rev() {
                        indices.push(rest % dim);
                        rest /= dim;
                    }
                    indices.reverse();
                    let index_values: Vec<Value<'db>> = indices
                        .into_iter()
                        .map(|i| b.op(arith::Const::index(db, location, i)).result(db))
                        .collect();
                    let c = b.op(arith::Const::f32(db, location, v));
                    b.op(mem::store(
                        db,
                        location,
                        alloc.result(db),
                        c.result(db),
                        index_values,
                    ));
                }
            }
            return Ok(alloc.result(db));
        }

        Err(LowerError::Malformed {
            op: "array.literal".to_owned(),
            message: "literals of this type are not lowered".to_owned(),
        })
    }

    /// Produce an application: shape combinators become views, projections
    /// and scalar arithmetic become markers, maps materialise, lambdas are
    /// substituted through.
    fn produce_apply(
        &self,
        b: &mut BlockBuilder<'db>,
        apply: array::Apply<'db>,
    ) -> Result<Value<'db>, LowerError> {
        let db = self.db;
        let location = apply.as_operation().location(db);
        let result_ty = apply.result_ty(db);
        let args = apply.args(db).to_vec();
        let Some(fun_op) = apply.fun(db).defining_op(db) else {
            self.remark(
                "cannot interpret an application of a block argument".to_owned(),
                apply.as_operation(),
            );
            return Ok(apply.result(db));
        };

        if array::Zip::from_operation(db, fun_op).is_ok() && args.len() == 2 {
            let lhs = self.produce(b, args[0])?;
            let rhs = self.produce(b, args[1])?;
            let view = b.op(array::zip_view(db, location, lhs, rhs, result_ty));
            return Ok(view.result(db));
        }
        if array::Fst::from_operation(db, fun_op).is_ok() && args.len() == 1 {
            let tuple = self.produce(b, args[0])?;
            let view = b.op(array::fst_view(db, location, tuple, result_ty));
            return Ok(view.result(db));
        }
        if array::Snd::from_operation(db, fun_op).is_ok() && args.len() == 1 {
            let tuple = self.produce(b, args[0])?;
            let view = b.op(array::snd_view(db, location, tuple, result_ty));
            return Ok(view.result(db));
        }
        if let Ok(split) = array::Split::from_operation(db, fun_op)
            && args.len() == 1
        {
            let source = self.produce(b, args[0])?;
            let view = b.op(array::split_view(db, location, source, result_ty, split.m(db)));
            return Ok(view.result(db));
        }
        if let Ok(join) = array::Join::from_operation(db, fun_op)
            && args.len() == 1
        {
            let source = self.produce(b, args[0])?;
            let view = b.op(array::join_view(db, location, source, result_ty, join.m(db)));
            return Ok(view.result(db));
        }
        if array::Transpose::from_operation(db, fun_op).is_ok() && args.len() == 1 {
            let source = self.produce(b, args[0])?;
            let view = b.op(array::transpose_view(db, location, source, result_ty));
            return Ok(view.result(db));
        }
        if let Ok(slide) = array::Slide::from_operation(db, fun_op)
            && args.len() == 1
        {
            let source = self.produce(b, args[0])?;
            let view = b.op(array::slide_view(db, location, source, result_ty, slide.sp(db)));
            return Ok(view.result(db));
        }
        if let Ok(pad) = array::Pad::from_operation(db, fun_op)
            && args.len() == 2
        {
            let fill = self.produce(b, args[0])?;
            let source = self.produce(b, args[1])?;
            let view = b.op(array::pad_view(
                db,
                location,
                fill,
                source,
                result_ty,
                pad.n(db),
                pad.l(db),
                pad.r(db),
            ));
            return Ok(view.result(db));
        }
        if array::MapSeq::from_operation(db, fun_op).is_ok()
            || array::MapPar::from_operation(db, fun_op).is_ok()
        {
            return self.produce_map(b, apply);
        }
        if let Ok(lambda) = array::Lambda::from_operation(db, fun_op) {
            // Beta-reduce at lowering time and produce the body's value.
            let yielded = super::substitute(db, lambda, &args)?;
            return self.produce(b, yielded);
        }
        if array::Add::from_operation(db, fun_op).is_ok() && args.len() == 2 {
            return self.produce_binary(b, apply, &args, "add");
        }
        if array::Mul::from_operation(db, fun_op).is_ok() && args.len() == 2 {
            return self.produce_binary(b, apply, &args, "mul");
        }
        if array::Id::from_operation(db, fun_op).is_ok() && args.len() == 1 {
            // Identity is transparent.
            return self.produce(b, args[0]);
        }

        self.remark(
            format!(
                "cannot perform continuation translation for an application of {}",
                fun_op.full_name(db)
            ),
            apply.as_operation(),
        );
        Ok(apply.result(db))
    }

    /// Maps must materialise: allocate a temporary sized to the output and
    /// acceptor-translate the application into it.
    fn produce_map(
        &self,
        b: &mut BlockBuilder<'db>,
        apply: array::Apply<'db>,
    ) -> Result<Value<'db>, LowerError> {
        let db = self.db;
        let location = apply.as_operation().location(db);
        let result_ty = apply.result_ty(db);
        let dims = buffer_dims(db, result_ty);
        let buf_ty = mem::Ref::with_shape(db, core::F32::new(db).as_type(), &dims).as_type();

        let temporary = b.op(array::Embed::build(
            db,
            location,
            vec![],
            idvec![],
            result_ty,
            |body, _| {
                let alloc = body.op(mem::alloc(db, location, buf_ty));
                alloc.result(db)
            },
        ));

        self.accept_apply(b, apply, temporary.result(db))?;
        Ok(temporary.result(db))
    }

    fn produce_binary(
        &self,
        b: &mut BlockBuilder<'db>,
        apply: array::Apply<'db>,
        args: &[Value<'db>],
        kind: &'static str,
    ) -> Result<Value<'db>, LowerError> {
        let db = self.db;
        let location = apply.as_operation().location(db);
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
        Ok(bin.result(db))
    }
}

/// Whether an operation is one of the lowering markers that address
/// resolution understands directly.
fn is_marker<'db>(db: &'db dyn salsa::Database, op: crate::Operation<'db>) -> bool {
    if op.dialect(db) != *array::_NAME {
        return false;
    }
    op.name(db).with_str(|name| {
        matches!(
            name,
            "idx"
                | "cast"
                | "binary"
                | "split_view"
                | "join_view"
                | "transpose_view"
                | "slide_view"
                | "pad_view"
                | "zip_view"
                | "fst_view"
                | "snd_view"
                | "split_acc"
                | "join_acc"
        )
    })
}

/// Row-major buffer shape of a (possibly nested) array type.
pub(crate) fn buffer_dims<'db>(db: &'db dyn salsa::Database, ty: Type<'db>) -> Vec<u64> {
    let mut dims = Vec::new();
    let mut current = ty;
    while let Some(arr) = array::Array::from_type(db, current) {
        dims.push(arr.size(db));
        current = arr.element(db);
    }
    dims
}

/// Flatten a (possibly nested) literal attribute into its scalar leaves.
fn literal_leaves(attr: &Attribute<'_>) -> Vec<f32> {
    fn collect(attr: &Attribute<'_>, out: &mut Vec<f32>) {
        match attr {
            Attribute::List(items) => {
                for item in items {
                    collect(item, out);
                }
            }
            other => {
                if let Some(v) = other.as_f32() {
                    out.push(v);
                }
            }
        }
    }
    let mut out = Vec::new();
    collect(attr, &mut out);
    out
}
