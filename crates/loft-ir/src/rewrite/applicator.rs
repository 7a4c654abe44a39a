//! Pattern applicator for driving IR rewrites.
//!
//! The `PatternApplicator` manages a set of rewrite patterns and applies
//! them to a module until fixpoint. `apply_once` instead applies a single
//! pattern at the first matching position and stops, which is how rewrite
//! strategies are driven: a strategy either transforms one node or fails,
//! and composition ("try this, else that") is left to the caller.

use std::collections::HashMap;

use crate::dialect::core::Module;
use crate::{Block, BlockId, IdVec, Operation, Region, Type};

use super::context::RewriteContext;
use super::op_adaptor::OpAdaptor;
use super::pattern::RewritePattern;
use super::result::RewriteResult;

/// Result of applying patterns to a module.
pub struct ApplyResult<'db> {
    /// The transformed module.
    pub module: Module<'db>,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Total number of changes across all iterations.
    pub total_changes: usize,
    /// Whether fixpoint was reached (no more changes possible).
    pub reached_fixpoint: bool,
}

/// Applies a set of rewrite patterns to IR until fixpoint.
pub struct PatternApplicator {
    patterns: Vec<Box<dyn RewritePattern>>,
    max_iterations: usize,
    /// When set, stop after the first successful rewrite in an iteration
    /// and do not iterate to fixpoint.
    first_match_only: bool,
}

impl PatternApplicator {
    /// Create a new empty pattern applicator.
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
            max_iterations: 100,
            first_match_only: false,
        }
    }

    /// Set the maximum number of iterations before giving up.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    /// Add a pattern to the applicator.
    pub fn add_pattern<P>(mut self, pattern: P) -> Self
    where
        P: RewritePattern + 'static,
    {
        self.patterns.push(Box::new(pattern));
        self
    }

    /// Apply all patterns to a module until fixpoint.
    pub fn apply<'db>(
        &self,
        db: &'db dyn salsa::Database,
        module: Module<'db>,
    ) -> ApplyResult<'db> {
        let mut current = module;
        let mut total_changes = 0;

        for iteration in 0..self.max_iterations {
            let block_arg_types = collect_block_arg_types(db, &current);
            let mut ctx = RewriteContext::with_block_arg_types(block_arg_types);
            let new_module = self.rewrite_module(db, &current, &mut ctx);

            if ctx.changes_made() == 0 {
                return ApplyResult {
                    module: new_module,
                    iterations: iteration + 1,
                    total_changes,
                    reached_fixpoint: true,
                };
            }

            total_changes += ctx.changes_made();
            current = new_module;

            if self.first_match_only {
                return ApplyResult {
                    module: current,
                    iterations: iteration + 1,
                    total_changes,
                    reached_fixpoint: false,
                };
            }
        }

        ApplyResult {
            module: current,
            iterations: self.max_iterations,
            total_changes,
            reached_fixpoint: false,
        }
    }

    /// Apply a single pattern at its outermost matching position.
    ///
    /// Returns `None` if the pattern matched nowhere; the input module is
    /// untouched in that case. This is the strategy-application entry point:
    /// a strategy either succeeds at one position or fails without touching
    /// the graph. "Outermost" is the last match in walk order — programs
    /// are built producer-first, so the last matching application is the
    /// one consuming the others.
    pub fn apply_once<'db, P>(
        db: &'db dyn salsa::Database,
        pattern: P,
        module: Module<'db>,
    ) -> Option<Module<'db>>
    where
        P: RewritePattern + 'static,
    {
        let matches = count_matches(db, &pattern, module);
        if matches == 0 {
            return None;
        }
        let positioned = PositionedOnce {
            inner: pattern,
            fire_at: matches - 1,
            seen: std::cell::Cell::new(0),
        };
        let applicator = Self::new().add_pattern(positioned).once();
        let result = applicator.apply(db, module);
        if result.total_changes > 0 {
            Some(result.module)
        } else {
            None
        }
    }

    fn once(mut self) -> Self {
        self.first_match_only = true;
        self
    }

    /// Rewrite a module (single pass).
    fn rewrite_module<'db>(
        &self,
        db: &'db dyn salsa::Database,
        module: &Module<'db>,
        ctx: &mut RewriteContext<'db>,
    ) -> Module<'db> {
        let body = module.body(db);
        let new_body = self.rewrite_region(db, &body, ctx);

        Module::create(db, module.location(db), module.name(db), new_body)
    }

    /// Rewrite a region.
    fn rewrite_region<'db>(
        &self,
        db: &'db dyn salsa::Database,
        region: &Region<'db>,
        ctx: &mut RewriteContext<'db>,
    ) -> Region<'db> {
        let new_blocks: IdVec<Block<'db>> = region
            .blocks(db)
            .iter()
            .map(|block| self.rewrite_block(db, block, ctx))
            .collect();

        Region::new(db, region.location(db), new_blocks)
    }

    /// Rewrite a block.
    fn rewrite_block<'db>(
        &self,
        db: &'db dyn salsa::Database,
        block: &Block<'db>,
        ctx: &mut RewriteContext<'db>,
    ) -> Block<'db> {
        let new_ops: IdVec<Operation<'db>> = block
            .operations(db)
            .iter()
            .flat_map(|op| self.rewrite_operation(db, op, ctx))
            .collect();

        Block::new(
            db,
            block.id(db),
            block.location(db),
            block.args(db).clone(),
            new_ops,
        )
    }

    /// Rewrite a single operation.
    ///
    /// 1. Remap operands using the current value map
    /// 2. Create an OpAdaptor with remapped operands
    /// 3. Try each pattern in order
    /// 4. If a pattern matches, apply it and record mappings
    /// 5. Recursively rewrite any nested regions
    /// 6. Map original operation results to final operation results
    fn rewrite_operation<'db>(
        &self,
        db: &'db dyn salsa::Database,
        op: &Operation<'db>,
        ctx: &mut RewriteContext<'db>,
    ) -> Vec<Operation<'db>> {
        let remapped_op = ctx.remap_operands(db, op);
        let remapped_operands = remapped_op.operands(db).clone();

        let stop = self.first_match_only && ctx.changes_made() > 0;
        if !stop {
            let adaptor = OpAdaptor::new(remapped_op, remapped_operands, ctx);

            for pattern in &self.patterns {
                match pattern.match_and_rewrite(db, &remapped_op, &adaptor) {
                    RewriteResult::Unchanged => continue,

                    RewriteResult::Replace(new_op) => {
                        tracing::debug!(pattern = pattern.name(), "pattern replaced operation");
                        ctx.record_change();
                        let final_op = self.rewrite_op_regions(db, &new_op, ctx);
                        ctx.map_results(db, op, &final_op);
                        return vec![final_op];
                    }

                    RewriteResult::Expand(ops) => {
                        tracing::debug!(pattern = pattern.name(), "pattern expanded operation");
                        ctx.record_change();
                        let final_ops: Vec<_> = ops
                            .into_iter()
                            .map(|expanded_op| self.rewrite_op_regions(db, &expanded_op, ctx))
                            .collect();
                        // Earlier ops produce intermediate values; the last
                        // op produces the value replacing the original's.
                        if let Some(last) = final_ops.last() {
                            ctx.map_results(db, op, last);
                        }
                        return final_ops;
                    }

                    RewriteResult::Erase { replacement_values } => {
                        tracing::debug!(pattern = pattern.name(), "pattern erased operation");
                        ctx.record_change();
                        for (i, val) in replacement_values.into_iter().enumerate() {
                            let old_val = op.result(db, i);
                            ctx.map_value(old_val, val);
                        }
                        return vec![];
                    }
                }
            }
        }

        // No pattern matched - recursively process regions
        let final_op = self.rewrite_op_regions(db, &remapped_op, ctx);

        // Map original results to final results if they differ; this matters
        // when operands were remapped but no pattern matched.
        if final_op != *op {
            ctx.map_results(db, op, &final_op);
        }

        vec![final_op]
    }

    /// Rewrite nested regions within an operation.
    fn rewrite_op_regions<'db>(
        &self,
        db: &'db dyn salsa::Database,
        op: &Operation<'db>,
        ctx: &mut RewriteContext<'db>,
    ) -> Operation<'db> {
        let regions = op.regions(db);
        if regions.is_empty() {
            return *op;
        }

        let new_regions: IdVec<Region<'db>> = regions
            .iter()
            .map(|region| self.rewrite_region(db, region, ctx))
            .collect();

        op.modify(db).regions(new_regions).build()
    }
}

impl Default for PatternApplicator {
    fn default() -> Self {
        Self::new()
    }
}

/// Count the positions at which a pattern would fire, in the same pre-order
/// the applicator visits.
fn count_matches<'db>(
    db: &'db dyn salsa::Database,
    pattern: &impl RewritePattern,
    module: Module<'db>,
) -> usize {
    use crate::DialectOp;
    use crate::walk::{OperationWalk, WalkAction};
    use std::ops::ControlFlow;

    let ctx = RewriteContext::with_block_arg_types(collect_block_arg_types(db, &module));
    let mut count = 0;
    let _ = module.as_operation().walk_all::<()>(db, |op| {
        let adaptor = OpAdaptor::new(op, op.operands(db).clone(), &ctx);
        if pattern.match_and_rewrite(db, &op, &adaptor).is_changed() {
            count += 1;
        }
        ControlFlow::Continue(WalkAction::Advance)
    });
    count
}

/// Fires an inner pattern only at the n-th matching position; every other
/// match is discarded as `Unchanged`.
struct PositionedOnce<P> {
    inner: P,
    fire_at: usize,
    seen: std::cell::Cell<usize>,
}

impl<P: RewritePattern> RewritePattern for PositionedOnce<P> {
    fn match_and_rewrite<'db>(
        &self,
        db: &'db dyn salsa::Database,
        op: &Operation<'db>,
        adaptor: &OpAdaptor<'db, '_>,
    ) -> RewriteResult<'db> {
        let result = self.inner.match_and_rewrite(db, op, adaptor);
        if !result.is_changed() {
            return RewriteResult::Unchanged;
        }
        let seen = self.seen.get();
        self.seen.set(seen + 1);
        if seen == self.fire_at {
            result
        } else {
            RewriteResult::Unchanged
        }
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

/// Collect block argument types from a module.
///
/// Traverses all blocks in the module and collects the types of their
/// arguments. This is needed because `ValueDef::BlockArg` only stores the
/// `BlockId`, not the type information.
pub fn collect_block_arg_types<'db>(
    db: &'db dyn salsa::Database,
    module: &Module<'db>,
) -> HashMap<(BlockId, usize), Type<'db>> {
    let mut map = HashMap::new();
    collect_from_region(db, &module.body(db), &mut map);
    map
}

fn collect_from_region<'db>(
    db: &'db dyn salsa::Database,
    region: &Region<'db>,
    map: &mut HashMap<(BlockId, usize), Type<'db>>,
) {
    for block in region.blocks(db).iter() {
        let block_id = block.id(db);
        for (idx, ty) in block.args(db).iter().enumerate() {
            map.insert((block_id, idx), *ty);
        }
        for op in block.operations(db).iter() {
            for nested_region in op.regions(db).iter() {
                collect_from_region(db, nested_region, map);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{arith, core};
    use crate::types::DialectType;
    use crate::{Attribute, DialectOp, Location, Symbol, idvec};

    /// Rewrites `arith.const(42.0)` into `const(7.0) * const(6.0)`.
    struct ConstToMulPattern;

    impl RewritePattern for ConstToMulPattern {
        fn match_and_rewrite<'db>(
            &self,
            db: &'db dyn salsa::Database,
            op: &Operation<'db>,
            _adaptor: &OpAdaptor<'db, '_>,
        ) -> RewriteResult<'db> {
            let Ok(const_op) = arith::Const::from_operation(db, *op) else {
                return RewriteResult::Unchanged;
            };

            if const_op.value(db) != &Attribute::f32(42.0) {
                return RewriteResult::Unchanged;
            }

            let location = op.location(db);
            let lhs = arith::Const::f32(db, location, 7.0);
            let rhs = arith::Const::f32(db, location, 6.0);
            let mul_op = arith::mul(
                db,
                location,
                lhs.result(db),
                rhs.result(db),
                core::F32::new(db).as_type(),
            );

            RewriteResult::expand(vec![
                lhs.as_operation(),
                rhs.as_operation(),
                mul_op.as_operation(),
            ])
        }
    }

    #[salsa::tracked]
    fn make_const_module(db: &dyn salsa::Database) -> Module<'_> {
        let location = Location::synthetic(db);
        let op = arith::Const::f32(db, location, 42.0).as_operation();
        let block = Block::new(db, BlockId::fresh(), location, idvec![], idvec![op]);
        let region = Region::new(db, location, idvec![block]);
        Module::create(db, location, Symbol::new("test"), region)
    }

    #[salsa::tracked]
    fn apply_const_to_mul(db: &dyn salsa::Database, module: Module<'_>) -> (bool, usize, usize) {
        let applicator = PatternApplicator::new().add_pattern(ConstToMulPattern);
        let result = applicator.apply(db, module);
        let body = result.module.body(db);
        let op_count = body.blocks(db)[0].operations(db).len();
        (result.reached_fixpoint, result.total_changes, op_count)
    }

    #[test]
    fn applicator_expands_and_reaches_fixpoint() {
        salsa::DatabaseImpl::default().attach(|db| {
            let module = make_const_module(db);
            let (reached_fixpoint, total_changes, op_count) = apply_const_to_mul(db, module);

            assert!(reached_fixpoint);
            assert_eq!(total_changes, 1);
            assert_eq!(op_count, 3);
        });
    }

    #[salsa::tracked]
    fn make_other_module(db: &dyn salsa::Database) -> Module<'_> {
        let location = Location::synthetic(db);
        let op = arith::Const::f32(db, location, 5.0).as_operation();
        let block = Block::new(db, BlockId::fresh(), location, idvec![], idvec![op]);
        let region = Region::new(db, location, idvec![block]);
        Module::create(db, location, Symbol::new("test"), region)
    }

    #[salsa::tracked]
    fn apply_no_match(db: &dyn salsa::Database, module: Module<'_>) -> (bool, usize, usize) {
        let applicator = PatternApplicator::new().add_pattern(ConstToMulPattern);
        let result = applicator.apply(db, module);
        (
            result.reached_fixpoint,
            result.total_changes,
            result.iterations,
        )
    }

    #[test]
    fn applicator_no_match_is_identity() {
        salsa::DatabaseImpl::default().attach(|db| {
            let module = make_other_module(db);
            let (reached_fixpoint, total_changes, iterations) = apply_no_match(db, module);

            assert!(reached_fixpoint);
            assert_eq!(total_changes, 0);
            assert_eq!(iterations, 1);
        });
    }

    #[salsa::tracked]
    fn apply_once_no_match(db: &dyn salsa::Database, module: Module<'_>) -> bool {
        PatternApplicator::apply_once(db, ConstToMulPattern, module).is_none()
    }

    #[test]
    fn apply_once_fails_without_match() {
        salsa::DatabaseImpl::default().attach(|db| {
            let module = make_other_module(db);
            assert!(apply_once_no_match(db, module));
        });
    }
}
