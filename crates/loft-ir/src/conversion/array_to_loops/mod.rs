//! Lowering of the functional array dialect to loops over flat buffers.
//!
//! The translation is destination-passing: `accept` lowers an expression
//! that is known to be written into a caller-supplied destination, `produce`
//! lowers an expression whose value is needed by an unspecified consumer and
//! defers shape transforms into marker operations, and the code generation
//! stage resolves the marker chains into index arithmetic, loads and stores.
//!
//! Per function, the pipeline is:
//! 1. rebuild the body starting from the trailing `array.out`, emitting
//!    loops, embeds and markers (`accept`/`produce`);
//! 2. resolve every `array.assign` into loads/stores (`codegen`);
//! 3. leave the dead markers and consumed combinators to DCE.
//!
//! A failure in steps 1–2 aborts the lowering of that function only; the
//! function is left untouched and an error diagnostic is accumulated.

mod accept;
mod codegen;
mod produce;

use salsa::Accumulator as _;

use crate::dialect::{array, core, func};
use crate::diagnostic::{Diagnostic, Phase};
use crate::ir::BlockBuilder;
use crate::rewrite::RewriteContext;
use crate::{Block, DialectOp, IdVec, Operation, Region, Type, Value, idvec};

pub use codegen::{PathToken, Transform, TupleBranch};

/// Errors that abort the lowering of a single function.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum LowerError {
    /// An operator with no acceptor-translation case.
    #[display("cannot lower the application of {op} into a destination")]
    UnsupportedOperator { op: String },

    /// A structural precondition did not hold.
    #[display("the operand of {op} must be the result of an application")]
    ExpectsApplication { op: String },

    /// The value stored by `array.out` is not an application result.
    #[display("the stored value must be the result of an application")]
    StoredValueNotApplication,

    /// A lambda was applied to more arguments than it binds.
    #[display("a lambda application supplies more arguments than parameters")]
    TooManyArguments,

    /// The requested lowering target is not recognised.
    #[display("unknown lowering target {target:?}")]
    UnknownTarget { target: String },

    /// Catch-all structural violation with context.
    #[display("malformed {op}: {message}")]
    Malformed { op: String, message: String },
}

/// Lower every array-language function in the module.
///
/// Functions that fail to lower are kept unchanged and reported through the
/// diagnostics accumulator; the rest of the module is unaffected.
pub fn lower_module<'db>(
    db: &'db dyn salsa::Database,
    module: core::Module<'db>,
) -> core::Module<'db> {
    let body = module.body(db);
    let mut new_blocks: IdVec<Block<'db>> = IdVec::new();

    for block in body.blocks(db).iter() {
        let mut builder = BlockBuilder::with_id(db, block.id(db), block.location(db))
            .args(block.args(db).clone());
        for op in block.operations(db).iter() {
            let lowered = match func::Func::from_operation(db, *op) {
                Ok(f) if contains_store_node(db, f) => match lower_func(db, f) {
                    Ok(new_func) => new_func.as_operation(),
                    Err(error) => {
                        tracing::debug!(%error, "lowering failed; function left unchanged");
                        Diagnostic::error(
                            error.to_string(),
                            op.location(db).span,
                            Phase::Lowering,
                        )
                        .accumulate(db);
                        *op
                    }
                },
                _ => *op,
            };
            builder.push(lowered);
        }
        new_blocks.push(builder.build());
    }

    let new_body = Region::new(db, body.location(db), new_blocks);
    core::Module::create(db, module.location(db), module.name(db), new_body)
}

/// Whether a function contains an `array.out` store node, i.e. is an
/// unlowered array-language program.
pub fn contains_store_node<'db>(db: &'db dyn salsa::Database, f: func::Func<'db>) -> bool {
    use crate::walk::OperationWalk;
    use std::ops::ControlFlow;
    f.as_operation()
        .walk::<array::Out, ()>(db, |_| ControlFlow::Break(()))
        .is_break()
}

/// Lower one function. On error the caller keeps the original function.
pub fn lower_func<'db>(
    db: &'db dyn salsa::Database,
    f: func::Func<'db>,
) -> Result<func::Func<'db>, LowerError> {
    let Some(block) = f.entry_block(db) else {
        return Ok(f);
    };
    let location = f.as_operation().location(db);

    // The store nodes are the `array.out` operations of the entry block.
    let outs: Vec<array::Out<'db>> = block
        .operations(db)
        .iter()
        .filter_map(|op| array::Out::from_operation(db, *op).ok())
        .collect();
    if outs.is_empty() {
        return Ok(f);
    }

    let mut builder =
        BlockBuilder::with_id(db, block.id(db), block.location(db)).args(block.args(db).clone());

    // Input imports stay; everything else is re-derived from the store nodes.
    for op in block.operations(db).iter() {
        if array::In::from_operation(db, *op).is_ok() {
            builder.push(*op);
        }
    }

    let lowering = Lowering { db };
    for out in outs {
        let target = out.target(db);
        let value = out.value(db);
        let value_ty = value
            .defining_op(db)
            .and_then(|op| op.results(db).first().copied())
            .ok_or(LowerError::StoredValueNotApplication)?;

        // Reinterpret the host buffer under the stored value's type; address
        // resolution passes through the cast.
        let cast = builder.op(array::cast(db, location, target, value_ty));

        let apply = value
            .defining_op(db)
            .and_then(|op| array::Apply::from_operation(db, op).ok())
            .ok_or(LowerError::StoredValueNotApplication)?;

        lowering.accept_apply(&mut builder, apply, cast.result(db))?;
    }
    tracing::debug!("acceptor translation finished; starting code generation");
    builder.op(func::Return::empty(db, location));

    let accepted = Region::new(db, location, idvec![builder.build()]);

    let mut codegen = codegen::AssignLowering::new(db, &accepted);
    let resolved = codegen.run(&accepted)?;
    tracing::debug!("code generation finished");

    Ok(f.with_body(db, resolved))
}

/// Shared state of the accept/produce translation of one function.
pub(crate) struct Lowering<'db> {
    pub(crate) db: &'db dyn salsa::Database,
}

impl<'db> Lowering<'db> {
    /// The declared type of a value produced by an operation.
    pub(crate) fn value_type(&self, value: Value<'db>) -> Option<Type<'db>> {
        value
            .defining_op(self.db)
            .and_then(|op| op.results(self.db).first().copied())
    }

    /// Emit a soft remark: lowering continues, the value stays as-is.
    pub(crate) fn remark(&self, message: String, op: Operation<'db>) {
        tracing::debug!("{message}");
        Diagnostic::remark(message, op.location(self.db).span, Phase::Lowering)
            .accumulate(self.db);
    }
}

/// Substitute actual arguments for a lambda's parameters.
///
/// The body is rebuilt with every use edge of parameter `i` redirected to
/// `args[i]`; the original lambda is left untouched, so shared definitions
/// are never corrupted. Returns the (substituted) value the body yields.
pub(crate) fn substitute<'db>(
    db: &'db dyn salsa::Database,
    lambda: array::Lambda<'db>,
    args: &[Value<'db>],
) -> Result<Value<'db>, LowerError> {
    let block = lambda.entry_block(db).ok_or_else(|| LowerError::Malformed {
        op: "array.lambda".to_owned(),
        message: "missing body block".to_owned(),
    })?;
    if args.len() > block.args(db).len() {
        return Err(LowerError::TooManyArguments);
    }

    let mut ctx = RewriteContext::new();
    for (i, &arg) in args.iter().enumerate() {
        ctx.map_value(block.arg(db, i), arg);
    }

    for op in block.operations(db).iter() {
        let remapped = ctx.remap_operation_deep(db, op);
        if remapped != *op {
            ctx.map_results(db, op, &remapped);
        }
    }

    let yielded = lambda.yielded(db).ok_or_else(|| LowerError::Malformed {
        op: "array.lambda".to_owned(),
        message: "body is not terminated by a yield".to_owned(),
    })?;
    Ok(ctx.lookup(yielded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Location;
    use crate::dialect::array;

    #[salsa::tracked]
    fn substitute_redirects_edges(db: &dyn salsa::Database) -> (bool, bool) {
        let location = Location::synthetic(db);
        let s = array::Scalar::f32(db);

        let add = array::Add::create(db, location);
        let shared = array::Lambda::build(db, location, idvec![s, s], s, |body, params| {
            let applied = body.op(array::Apply::create(
                db,
                location,
                add.result_ty(db),
                add.result(db),
                vec![params[0], params[1]],
            ));
            applied.result(db)
        });

        let lhs = array::Literal::scalar_f32(db, location, 1.0);
        let rhs = array::Literal::scalar_f32(db, location, 2.0);
        let yielded =
            substitute(db, shared, &[lhs.result(db), rhs.result(db)]).expect("arity matches");

        // The substituted body is a fresh application whose operands are the
        // actuals, with no parameter references left.
        let substituted = yielded.defining_op(db).unwrap();
        let operands_redirected = substituted.operands(db)[1] == lhs.result(db)
            && substituted.operands(db)[2] == rhs.result(db);

        // The shared definition is untouched: its body still references the
        // block arguments.
        let original_body = shared.yielded(db).unwrap().defining_op(db).unwrap();
        let original_intact =
            original_body.operands(db)[1] == shared.entry_block(db).unwrap().arg(db, 0);

        (operands_redirected, original_intact)
    }

    #[test]
    fn substitution_is_edge_redirection_on_a_fresh_copy() {
        salsa::DatabaseImpl::default().attach(|db| {
            let (redirected, intact) = substitute_redirects_edges(db);
            assert!(redirected, "parameters were replaced by the actuals");
            assert!(intact, "the shared lambda was not corrupted");
        });
    }

    #[salsa::tracked]
    fn too_many_arguments_is_rejected(db: &dyn salsa::Database) -> bool {
        let location = Location::synthetic(db);
        let s = array::Scalar::f32(db);

        let identity = array::Lambda::build(db, location, idvec![s], s, |_, params| params[0]);
        let a = array::Literal::scalar_f32(db, location, 1.0);
        let b = array::Literal::scalar_f32(db, location, 2.0);
        matches!(
            substitute(db, identity, &[a.result(db), b.result(db)]),
            Err(LowerError::TooManyArguments)
        )
    }

    #[test]
    fn over_application_of_a_lambda_fails() {
        salsa::DatabaseImpl::default().attach(|db| {
            assert!(too_many_arguments_is_rejected(db));
        });
    }
}
