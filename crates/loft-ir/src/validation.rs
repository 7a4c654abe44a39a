//! Structural validation of array-dialect programs.
//!
//! Builders derive result types at construction, so validation re-checks
//! the invariants rather than re-deriving types:
//! - arrays and tuples contain only data types, never functions
//! - a lambda's parameter count never exceeds the arity of its function type
//! - an application never supplies more arguments than its callee's arity
//! - lambda and embed bodies are terminated by `array.yield`

use std::ops::ControlFlow;

use crate::dialect::array;
use crate::walk::{OperationWalk, WalkAction};
use crate::{DialectOp, DialectType, Operation, Span, Type};

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation<'db> {
    pub operation: Operation<'db>,
    pub message: String,
}

/// Validate every operation under `root`, collecting violations.
pub fn validate<'db>(
    db: &'db dyn salsa::Database,
    root: Operation<'db>,
) -> Vec<Violation<'db>> {
    let mut violations = Vec::new();

    let _ = root.walk_all::<()>(db, |op| {
        // Result types must not smuggle functions into aggregates.
        for ty in op.results(db).iter() {
            check_type(db, op, *ty, &mut violations);
        }

        if let Ok(lambda) = array::Lambda::from_operation(db, op) {
            check_lambda(db, lambda, &mut violations);
        }
        if let Ok(embed) = array::Embed::from_operation(db, op) {
            check_embed(db, embed, &mut violations);
        }
        if let Ok(apply) = array::Apply::from_operation(db, op) {
            check_apply(db, apply, &mut violations);
        }

        ControlFlow::Continue(WalkAction::Advance)
    });

    violations
}

fn check_type<'db>(
    db: &'db dyn salsa::Database,
    op: Operation<'db>,
    ty: Type<'db>,
    violations: &mut Vec<Violation<'db>>,
) {
    if let Some(arr) = array::Array::from_type(db, ty) {
        let element = arr.element(db);
        if array::Fun::from_type(db, element).is_some() {
            violations.push(Violation {
                operation: op,
                message: "array element type is a function".to_owned(),
            });
        }
        check_type(db, op, element, violations);
    }
    if let Some(tuple) = array::Tuple::from_type(db, ty) {
        for component in [tuple.first(db), tuple.second(db)] {
            if array::Fun::from_type(db, component).is_some() {
                violations.push(Violation {
                    operation: op,
                    message: "tuple component type is a function".to_owned(),
                });
            }
            check_type(db, op, component, violations);
        }
    }
}

fn check_lambda<'db>(
    db: &'db dyn salsa::Database,
    lambda: array::Lambda<'db>,
    violations: &mut Vec<Violation<'db>>,
) {
    let arity = array::Fun::arity(db, lambda.result_ty(db));
    let Some(block) = lambda.entry_block(db) else {
        violations.push(Violation {
            operation: lambda.as_operation(),
            message: "lambda has no body block".to_owned(),
        });
        return;
    };
    if block.args(db).len() > arity {
        violations.push(Violation {
            operation: lambda.as_operation(),
            message: format!(
                "lambda binds {} parameters but its type has arity {}",
                block.args(db).len(),
                arity
            ),
        });
    }
    if lambda.yielded(db).is_none() {
        violations.push(Violation {
            operation: lambda.as_operation(),
            message: "lambda body is not terminated by a yield".to_owned(),
        });
    }
}

fn check_embed<'db>(
    db: &'db dyn salsa::Database,
    embed: array::Embed<'db>,
    violations: &mut Vec<Violation<'db>>,
) {
    let Some(block) = embed.body(db).entry(db) else {
        violations.push(Violation {
            operation: embed.as_operation(),
            message: "embed has no body block".to_owned(),
        });
        return;
    };
    if block.args(db).len() != embed.captured(db).len() {
        violations.push(Violation {
            operation: embed.as_operation(),
            message: format!(
                "embed captures {} operands but its block binds {} arguments",
                embed.captured(db).len(),
                block.args(db).len()
            ),
        });
    }
    if embed.yielded(db).is_none() {
        violations.push(Violation {
            operation: embed.as_operation(),
            message: "embed body is not terminated by a yield".to_owned(),
        });
    }
}

fn check_apply<'db>(
    db: &'db dyn salsa::Database,
    apply: array::Apply<'db>,
    violations: &mut Vec<Violation<'db>>,
) {
    // Applying a known combinator past its arity is a construction bug;
    // applying an unknown value is left to its consumer.
    let Some(fun_op) = apply.fun(db).defining_op(db) else {
        return;
    };
    let Some(fun_ty) = fun_op
        .results(db)
        .first()
        .copied()
        .filter(|ty| array::Fun::from_type(db, *ty).is_some())
    else {
        return;
    };
    let arity = array::Fun::arity(db, fun_ty);
    if apply.args(db).len() > arity {
        violations.push(Violation {
            operation: apply.as_operation(),
            message: format!(
                "application supplies {} arguments but the callee arity is {}",
                apply.args(db).len(),
                arity
            ),
        });
    }
}

/// The span of a violating operation, for diagnostics.
pub fn violation_span<'db>(db: &'db dyn salsa::Database, violation: &Violation<'db>) -> Span {
    violation.operation.location(db).span
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::core::Module;
    use crate::{Location, Symbol, idvec};

    #[salsa::tracked]
    fn well_formed_program(db: &dyn salsa::Database) -> Module<'_> {
        let location = Location::synthetic(db);
        let s = array::Scalar::f32(db);
        Module::build(db, location, Symbol::new("ok"), |top| {
            let add = top.op(array::Add::create(db, location));
            top.op(array::Lambda::build(db, location, idvec![s, s], s, |body, params| {
                let applied = body.op(array::Apply::create(
                    db,
                    location,
                    add.result_ty(db),
                    add.result(db),
                    vec![params[0], params[1]],
                ));
                applied.result(db)
            }));
        })
    }

    #[test]
    fn well_formed_program_validates() {
        salsa::DatabaseImpl::default().attach(|db| {
            let module = well_formed_program(db);
            assert!(validate(db, module.as_operation()).is_empty());
        });
    }

    #[salsa::tracked]
    fn array_of_functions(db: &dyn salsa::Database) -> Module<'_> {
        let location = Location::synthetic(db);
        let s = array::Scalar::f32(db);
        let bad = array::Array::of(db, 2, array::Fun::new(db, s, s).as_type());
        Module::build(db, location, Symbol::new("bad"), |top| {
            top.op(array::literal(db, location, bad, crate::Attribute::f32(0.0)));
        })
    }

    #[test]
    fn function_in_array_is_rejected() {
        salsa::DatabaseImpl::default().attach(|db| {
            let module = array_of_functions(db);
            let violations = validate(db, module.as_operation());
            assert_eq!(violations.len(), 1);
            assert!(violations[0].message.contains("function"));
        });
    }
}
