//! Recursive operation traversal utilities.
//!
//! Provides a typed `walk` method for traversing nested operations.
//!
//! # Example
//!
//! ```ignore
//! use std::ops::ControlFlow;
//! use loft_ir::walk::{OperationWalk, WalkAction};
//!
//! // Collect all assigns
//! let mut assigns = Vec::new();
//! region.walk::<array::Assign, ()>(db, |assign| {
//!     assigns.push(assign);
//!     ControlFlow::Continue(WalkAction::Advance)
//! });
//! ```

use std::ops::ControlFlow;

use crate::{Block, DialectOp, Operation, Region};

/// Controls whether to descend into children during a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkAction {
    /// Continue walking and descend into nested regions.
    Advance,
    /// Skip the nested regions of the current operation.
    Skip,
}

/// Trait for recursive operation traversal.
pub trait OperationWalk<'db> {
    /// Walk all operations recursively, applying `f` to each.
    ///
    /// Returns `ControlFlow::Break(b)` if the callback returns `Break(b)`.
    /// The callback can return `Continue(Skip)` to skip nested regions.
    fn walk_all<B>(
        &self,
        db: &'db dyn salsa::Database,
        f: impl FnMut(Operation<'db>) -> ControlFlow<B, WalkAction>,
    ) -> ControlFlow<B, ()>;

    /// Walk operations of a specific dialect type recursively.
    ///
    /// Only calls `f` for operations that match type `T`.
    /// Non-matching operations are still traversed (their children are visited).
    fn walk<T, B>(
        &self,
        db: &'db dyn salsa::Database,
        f: impl FnMut(T) -> ControlFlow<B, WalkAction>,
    ) -> ControlFlow<B, ()>
    where
        T: DialectOp<'db>;
}

// Internal helpers take `&mut dyn FnMut` to avoid monomorphization blowup on
// deep recursion.
fn walk_op_internal<'db, B>(
    db: &'db dyn salsa::Database,
    op: Operation<'db>,
    f: &mut dyn FnMut(Operation<'db>) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()> {
    match f(op) {
        ControlFlow::Break(b) => return ControlFlow::Break(b),
        ControlFlow::Continue(WalkAction::Skip) => return ControlFlow::Continue(()),
        ControlFlow::Continue(WalkAction::Advance) => {}
    }
    for region in op.regions(db).iter() {
        walk_region_internal(db, *region, f)?;
    }
    ControlFlow::Continue(())
}

fn walk_region_internal<'db, B>(
    db: &'db dyn salsa::Database,
    region: Region<'db>,
    f: &mut dyn FnMut(Operation<'db>) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()> {
    for block in region.blocks(db).iter() {
        walk_block_internal(db, *block, f)?;
    }
    ControlFlow::Continue(())
}

fn walk_block_internal<'db, B>(
    db: &'db dyn salsa::Database,
    block: Block<'db>,
    f: &mut dyn FnMut(Operation<'db>) -> ControlFlow<B, WalkAction>,
) -> ControlFlow<B, ()> {
    for op in block.operations(db).iter() {
        walk_op_internal(db, *op, f)?;
    }
    ControlFlow::Continue(())
}

impl<'db> OperationWalk<'db> for Operation<'db> {
    fn walk_all<B>(
        &self,
        db: &'db dyn salsa::Database,
        mut f: impl FnMut(Operation<'db>) -> ControlFlow<B, WalkAction>,
    ) -> ControlFlow<B, ()> {
        walk_op_internal(db, *self, &mut f)
    }

    fn walk<T, B>(
        &self,
        db: &'db dyn salsa::Database,
        mut f: impl FnMut(T) -> ControlFlow<B, WalkAction>,
    ) -> ControlFlow<B, ()>
    where
        T: DialectOp<'db>,
    {
        self.walk_all(db, |op| {
            if let Ok(typed_op) = T::from_operation(db, op) {
                f(typed_op)
            } else {
                ControlFlow::Continue(WalkAction::Advance)
            }
        })
    }
}

impl<'db> OperationWalk<'db> for Region<'db> {
    fn walk_all<B>(
        &self,
        db: &'db dyn salsa::Database,
        mut f: impl FnMut(Operation<'db>) -> ControlFlow<B, WalkAction>,
    ) -> ControlFlow<B, ()> {
        walk_region_internal(db, *self, &mut f)
    }

    fn walk<T, B>(
        &self,
        db: &'db dyn salsa::Database,
        mut f: impl FnMut(T) -> ControlFlow<B, WalkAction>,
    ) -> ControlFlow<B, ()>
    where
        T: DialectOp<'db>,
    {
        self.walk_all(db, |op| {
            if let Ok(typed_op) = T::from_operation(db, op) {
                f(typed_op)
            } else {
                ControlFlow::Continue(WalkAction::Advance)
            }
        })
    }
}

impl<'db> OperationWalk<'db> for Block<'db> {
    fn walk_all<B>(
        &self,
        db: &'db dyn salsa::Database,
        mut f: impl FnMut(Operation<'db>) -> ControlFlow<B, WalkAction>,
    ) -> ControlFlow<B, ()> {
        walk_block_internal(db, *self, &mut f)
    }

    fn walk<T, B>(
        &self,
        db: &'db dyn salsa::Database,
        mut f: impl FnMut(T) -> ControlFlow<B, WalkAction>,
    ) -> ControlFlow<B, ()>
    where
        T: DialectOp<'db>,
    {
        self.walk_all(db, |op| {
            if let Ok(typed_op) = T::from_operation(db, op) {
                f(typed_op)
            } else {
                ControlFlow::Continue(WalkAction::Advance)
            }
        })
    }
}
