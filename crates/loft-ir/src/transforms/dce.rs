//! Dead Code Elimination (DCE) pass.
//!
//! Removes operations whose results are never used and which have no side
//! effects, using backward liveness then a sweep, iterated to fixpoint: the
//! sweep visits each block back to front in spirit — removing a dead node
//! can only expose more dead nodes among its operands, which the next
//! iteration collects, so erasure is effectively in reverse dependency
//! order. Lambda and embed bodies survive as long as their owner does,
//! because their terminators are not pure.

use std::collections::HashSet;

use crate::op_interface::PureOps;
use crate::{Block, IdVec, Operation, Region, Value, ValueDef};

/// Configuration for dead code elimination.
#[derive(Debug, Clone)]
pub struct DceConfig {
    /// Maximum iterations before giving up. Default: 100
    pub max_iterations: usize,
    /// Whether to recursively process nested regions. Default: true
    pub recursive: bool,
}

impl Default for DceConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            recursive: true,
        }
    }
}

/// Result of running dead code elimination.
pub struct DceResult<'db> {
    /// The transformed module with dead code removed.
    pub module: crate::dialect::core::Module<'db>,
    /// Total number of operations removed.
    pub removed_count: usize,
    /// Number of fixpoint iterations performed.
    pub iterations: usize,
    /// Whether fixpoint was reached (no more changes possible).
    pub reached_fixpoint: bool,
}

/// Eliminate dead code from a module.
pub fn eliminate_dead_code<'db>(
    db: &'db dyn salsa::Database,
    module: crate::dialect::core::Module<'db>,
) -> DceResult<'db> {
    eliminate_dead_code_with_config(db, module, DceConfig::default())
}

/// Eliminate dead code with custom configuration.
pub fn eliminate_dead_code_with_config<'db>(
    db: &'db dyn salsa::Database,
    module: crate::dialect::core::Module<'db>,
    config: DceConfig,
) -> DceResult<'db> {
    DcePass::new(db, config).run(module)
}

/// Internal DCE pass implementation.
struct DcePass<'db> {
    db: &'db dyn salsa::Database,
    config: DceConfig,
    live_values: HashSet<Value<'db>>,
    removed_count: usize,
}

impl<'db> DcePass<'db> {
    fn new(db: &'db dyn salsa::Database, config: DceConfig) -> Self {
        Self {
            db,
            config,
            live_values: HashSet::new(),
            removed_count: 0,
        }
    }

    fn run(mut self, module: crate::dialect::core::Module<'db>) -> DceResult<'db> {
        let mut current = module;
        let max_iterations = self.config.max_iterations.max(1);

        for iteration in 0..max_iterations {
            self.live_values.clear();
            self.compute_live_values(&current);

            let (new_module, changed) = self.sweep_module(&current);

            if !changed {
                return DceResult {
                    module: new_module,
                    removed_count: self.removed_count,
                    iterations: iteration + 1,
                    reached_fixpoint: true,
                };
            }

            current = new_module;
        }

        DceResult {
            module: current,
            removed_count: self.removed_count,
            iterations: max_iterations,
            reached_fixpoint: false,
        }
    }

    fn compute_live_values(&mut self, module: &crate::dialect::core::Module<'db>) {
        let mut worklist: Vec<Value<'db>> = Vec::new();
        self.collect_root_values(module.body(self.db), &mut worklist);

        while let Some(value) = worklist.pop() {
            if !self.live_values.insert(value) {
                continue;
            }

            // Find the defining operation and mark its operands as live
            if let ValueDef::OpResult(op) = value.def(self.db) {
                for &operand in op.operands(self.db).iter() {
                    worklist.push(operand);
                }
                for &region in op.regions(self.db).iter() {
                    self.collect_root_values(region, &mut worklist);
                }
            }
        }
    }

    fn collect_root_values(&self, region: Region<'db>, worklist: &mut Vec<Value<'db>>) {
        for &block in region.blocks(self.db).iter() {
            for &op in block.operations(self.db).iter() {
                // Any operation that is not pure is a root (must be kept)
                if !PureOps::is_pure(self.db, &op) {
                    for &operand in op.operands(self.db).iter() {
                        worklist.push(operand);
                    }
                }
                for &nested in op.regions(self.db).iter() {
                    self.collect_root_values(nested, worklist);
                }
            }
        }
    }

    fn sweep_module(
        &mut self,
        module: &crate::dialect::core::Module<'db>,
    ) -> (crate::dialect::core::Module<'db>, bool) {
        let body = module.body(self.db);
        let (new_body, changed) = self.sweep_region(&body);
        let new_module = crate::dialect::core::Module::create(
            self.db,
            module.location(self.db),
            module.name(self.db),
            new_body,
        );
        (new_module, changed)
    }

    fn sweep_region(&mut self, region: &Region<'db>) -> (Region<'db>, bool) {
        let mut changed = false;
        let new_blocks: IdVec<Block<'db>> = region
            .blocks(self.db)
            .iter()
            .map(|block| {
                let (new_block, block_changed) = self.sweep_block(block);
                changed |= block_changed;
                new_block
            })
            .collect();

        let new_region = Region::new(self.db, region.location(self.db), new_blocks);
        (new_region, changed)
    }

    fn sweep_block(&mut self, block: &Block<'db>) -> (Block<'db>, bool) {
        let mut changed = false;
        let mut new_ops: IdVec<Operation<'db>> = IdVec::new();

        for &op in block.operations(self.db).iter() {
            // First, process nested regions
            let op_with_processed_regions =
                if self.config.recursive && !op.regions(self.db).is_empty() {
                    let mut region_changed = false;
                    let new_regions: IdVec<Region<'db>> = op
                        .regions(self.db)
                        .iter()
                        .map(|region| {
                            let (new_region, rc) = self.sweep_region(region);
                            region_changed |= rc;
                            new_region
                        })
                        .collect();

                    if region_changed {
                        changed = true;
                        op.modify(self.db).regions(new_regions).build()
                    } else {
                        op
                    }
                } else {
                    op
                };

            if self.is_dead(&op_with_processed_regions) {
                changed = true;
                self.removed_count += 1;
                continue;
            }

            new_ops.push(op_with_processed_regions);
        }

        let new_block = Block::new(
            self.db,
            block.id(self.db),
            block.location(self.db),
            block.args(self.db).clone(),
            new_ops,
        );
        (new_block, changed)
    }

    fn is_dead(&self, op: &Operation<'db>) -> bool {
        // Pure operations are removable only if all results are unused
        if !PureOps::is_pure(self.db, op) {
            return false;
        }

        if op.results(self.db).is_empty() {
            return false;
        }

        for i in 0..op.results(self.db).len() {
            let value = op.result(self.db, i);
            if self.live_values.contains(&value) {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{arith, core, mem};
    use crate::ir::BlockBuilder;
    use crate::types::DialectType;
    use crate::{Location, Symbol, idvec};

    #[salsa::tracked]
    fn build_module_with_dead_const(db: &dyn salsa::Database) -> core::Module<'_> {
        let location = Location::synthetic(db);
        let mut block = BlockBuilder::new(db, location);

        // dead: nothing uses it
        block.op(arith::Const::f32(db, location, 1.0));

        // live chain: const feeds a store
        let buf_ty = mem::Ref::with_shape(db, core::F32::new(db).as_type(), &[1]).as_type();
        let buf = block.op(mem::alloc(db, location, buf_ty));
        let zero = block.op(arith::Const::index(db, location, 0));
        let live = block.op(arith::Const::f32(db, location, 2.0));
        block.op(mem::store(
            db,
            location,
            buf.result(db),
            live.result(db),
            vec![zero.result(db)],
        ));

        let region = crate::Region::new(db, location, idvec![block.build()]);
        core::Module::create(db, location, Symbol::new("dce"), region)
    }

    #[salsa::tracked]
    fn run_dce(db: &dyn salsa::Database, module: core::Module<'_>) -> (usize, bool, usize) {
        let result = eliminate_dead_code(db, module);
        let ops = result.module.body(db).blocks(db)[0].operations(db).len();
        (result.removed_count, result.reached_fixpoint, ops)
    }

    #[test]
    fn removes_dead_pure_ops_and_keeps_store_roots() {
        salsa::DatabaseImpl::default().attach(|db| {
            let module = build_module_with_dead_const(db);
            let (removed, fixpoint, remaining) = run_dce(db, module);

            assert!(fixpoint);
            assert_eq!(removed, 1, "only the unused constant is removed");
            assert_eq!(remaining, 4, "alloc, index, value and store survive");
        });
    }
}
