//! Arithmetic dialect operations.
//!
//! Used both for scalar data (`core.f32`) and for address arithmetic on
//! `core.index` values; the result type decides the interpretation.

use super::core;
use crate::{Attribute, DialectType, Location, dialect, register_pure_op};

dialect! {
    mod arith {
        // === Constants ===

        /// `arith.const` operation: produces a constant value.
        #[attr(value)]
        fn r#const() -> result;

        // === Arithmetic ===

        /// `arith.add` operation: addition.
        fn add(lhs, rhs) -> result;

        /// `arith.sub` operation: subtraction.
        fn sub(lhs, rhs) -> result;

        /// `arith.mul` operation: multiplication.
        fn mul(lhs, rhs) -> result;

        /// `arith.div` operation: division. Indices are never negative, so
        /// index division is plain unsigned division.
        fn div(lhs, rhs) -> result;

        /// `arith.rem` operation: remainder. Same non-negativity note as div.
        fn rem(lhs, rhs) -> result;

        // === Comparisons ===

        /// `arith.cmp_lt` operation: less-than comparison, yields `core.i1`.
        fn cmp_lt(lhs, rhs) -> result;

        // === Branch-free selection ===

        /// `arith.select` operation: picks `then` or `r#else` by `cond`.
        /// Both arms are always evaluated; there is no control flow here.
        fn select(cond, then, r#else) -> result;
    }
}

impl<'db> Const<'db> {
    /// Create a new index constant.
    pub fn index(db: &'db dyn salsa::Database, location: Location<'db>, value: u64) -> Self {
        r#const(
            db,
            location,
            core::Index::new(db).as_type(),
            Attribute::IntBits(value),
        )
    }

    /// Create a new f32 constant.
    pub fn f32(db: &'db dyn salsa::Database, location: Location<'db>, value: f32) -> Self {
        r#const(db, location, core::F32::new(db).as_type(), Attribute::f32(value))
    }
}

// === Pure trait implementations ===
// All arith operations are pure (no side effects).

impl crate::op_interface::Pure for Const<'_> {}
inventory::submit! { crate::op_interface::PureOps::register("arith", "const") }

register_pure_op!(arith.add);
register_pure_op!(arith.sub);
register_pure_op!(arith.mul);
register_pure_op!(arith.div);
register_pure_op!(arith.rem);
register_pure_op!(arith.cmp_lt);
register_pure_op!(arith.select);
