//! Operation interface system for querying operation properties.
//!
//! Uses the `inventory` crate to build a registry of operation properties at
//! compile time. The only interface needed here is purity, which drives dead
//! code elimination.

use std::collections::HashSet;
use std::sync::LazyLock;

use crate::{Operation, Symbol};

/// Marker trait for pure operations (no side effects, safe to remove if unused).
///
/// Operations implementing this trait can be safely eliminated by DCE if their
/// results are unused.
pub trait Pure {}

/// Registration entry for pure operations.
///
/// Use `register_pure_op!` to register pure operations at the dialect
/// definition site.
pub struct PureOpRegistration {
    /// Dialect name (e.g., "arith", "array")
    pub dialect: &'static str,
    /// Operation name within the dialect (e.g., "add", "split_view")
    pub op_name: &'static str,
}

inventory::collect!(PureOpRegistration);

/// Internal registry built from inventory at first access.
struct PureOpRegistry {
    pure_ops: HashSet<(Symbol, Symbol)>,
}

impl PureOpRegistry {
    fn lookup(&self, dialect: Symbol, op_name: Symbol) -> bool {
        self.pure_ops.contains(&(dialect, op_name))
    }
}

/// Global registry, lazily built from inventory on first access.
static REGISTRY: LazyLock<PureOpRegistry> = LazyLock::new(|| {
    let mut pure_ops = HashSet::new();

    for reg in inventory::iter::<PureOpRegistration> {
        let dialect = Symbol::from_dynamic(reg.dialect);
        let op_name = Symbol::from_dynamic(reg.op_name);
        pure_ops.insert((dialect, op_name));
    }

    PureOpRegistry { pure_ops }
});

/// Interface for querying operation purity.
pub struct PureOps;

impl PureOps {
    /// Register a pure operation (internal use by macro).
    #[doc(hidden)]
    pub const fn register(dialect: &'static str, op_name: &'static str) -> PureOpRegistration {
        PureOpRegistration { dialect, op_name }
    }

    /// Check if an operation is pure (no side effects, safe to remove if unused).
    ///
    /// Returns true only if the operation has been explicitly registered as pure.
    /// Returns false for all unregistered operations (conservative by default).
    pub fn is_pure<'db>(db: &'db dyn salsa::Database, op: &Operation<'db>) -> bool {
        let dialect = op.dialect(db);
        let op_name = op.name(db);
        REGISTRY.lookup(dialect, op_name)
    }
}

/// Register a pure operation with simplified syntax.
///
/// # Example
/// ```text
/// register_pure_op!(arith.add);
/// register_pure_op!(array.split_view);
/// ```
///
/// This expands to both the trait implementation and inventory registration.
/// Operations whose name is a raw identifier (`r#in`, `r#const`) register
/// with an explicit `inventory::submit!` instead: the registration value
/// must be a constant, and stringified raw identifiers keep their prefix.
#[macro_export]
macro_rules! register_pure_op {
    ($dialect:ident . $op_name:ident) => {
        $crate::paste::paste! {
            impl $crate::op_interface::Pure for $crate::dialect::$dialect::[<$op_name:camel>]<'_> {}

            ::inventory::submit! {
                $crate::op_interface::PureOps::register(
                    stringify!($dialect),
                    stringify!($op_name)
                )
            }
        }
    };
}
