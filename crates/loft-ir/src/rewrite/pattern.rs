//! Rewrite pattern trait.
//!
//! Defines the interface for IR transformation patterns. A pattern is a pure
//! function from an operation to either failure (`Unchanged`, input intact)
//! or success carrying replacement operations; patterns never mutate the
//! matched subgraph, they build fresh nodes.

use crate::Operation;

use super::op_adaptor::OpAdaptor;
use super::result::RewriteResult;

/// A pattern that can match and transform IR operations.
///
/// Each pattern implements `match_and_rewrite`, which both checks whether the
/// pattern applies and performs the transformation in one step. Since other
/// parts of the graph may hold references into the matched subgraph,
/// replacements are always freshly constructed operations; the originals are
/// detached by use-edge redirection in the applicator.
pub trait RewritePattern {
    /// Attempt to match and rewrite an operation.
    ///
    /// Returns `RewriteResult::Unchanged` if the pattern doesn't apply.
    /// Otherwise returns the transformation result.
    fn match_and_rewrite<'db>(
        &self,
        db: &'db dyn salsa::Database,
        op: &Operation<'db>,
        adaptor: &OpAdaptor<'db, '_>,
    ) -> RewriteResult<'db>;

    /// Optional: return a human-readable name for debugging.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Helper trait for dialect/operation name matching.
pub trait OperationMatcher {
    /// Check if an operation matches a specific dialect and name.
    fn matches(&self, db: &dyn salsa::Database, dialect: &str, name: &str) -> bool;

    /// Check if an operation is from a specific dialect.
    fn is_dialect(&self, db: &dyn salsa::Database, dialect: &str) -> bool;
}

impl<'db> OperationMatcher for Operation<'db> {
    fn matches(&self, db: &dyn salsa::Database, dialect: &str, name: &str) -> bool {
        self.dialect(db) == dialect && self.name(db) == name
    }

    fn is_dialect(&self, db: &dyn salsa::Database, dialect: &str) -> bool {
        self.dialect(db) == dialect
    }
}
