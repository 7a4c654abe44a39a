//! IR rewriting infrastructure.
//!
//! A pattern-based rewriting system over immutable Salsa-tracked IR. Since
//! tracked structures cannot be mutated, the rewriter rebuilds the IR tree
//! functionally; the `RewriteContext` maintains value mappings so that when
//! an operation is replaced, subsequent operations reference the new values.
//!
//! - [`RewritePattern`]: trait for defining transformation patterns
//! - [`RewriteContext`]: tracks value mappings during rewrites
//! - [`PatternApplicator`]: drives pattern application to fixpoint, or
//!   applies a single pattern once (strategy application)

mod applicator;
mod context;
mod op_adaptor;
mod pattern;
mod result;

pub use applicator::{ApplyResult, PatternApplicator, collect_block_arg_types};
pub use context::RewriteContext;
pub use op_adaptor::OpAdaptor;
pub use pattern::{OperationMatcher, RewritePattern};
pub use result::RewriteResult;
