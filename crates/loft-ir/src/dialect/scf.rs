//! Structured control flow dialect operations.
//!
//! Loop constructs emitted by the lowering. The body region of a loop has a
//! single block with one `core.index` argument, the induction variable, and
//! is terminated by `scf.yield`.

use super::core;
use crate::{
    Block, DialectType, Location, Region, Value, dialect, idvec, ir::BlockBuilder,
};

dialect! {
    mod scf {
        /// `scf.for` operation: sequential loop over `[lower, upper)` with
        /// the given step.
        fn r#for(lower, upper, step) {
            #[region(body)] {}
        };

        /// `scf.par_for` operation: data-parallel loop over `[lower, upper)`.
        /// Iterations are independent by construction; the op is a codegen
        /// annotation for the host's parallel loop primitive.
        fn par_for(lower, upper, step) {
            #[region(body)] {}
        };

        /// `scf.yield` operation: terminates a loop body.
        fn r#yield(#[rest] values);
    }
}

/// Shared body-construction for both loop variants.
fn loop_body<'db>(
    db: &'db dyn salsa::Database,
    location: Location<'db>,
    f: impl FnOnce(&mut BlockBuilder<'db>, Value<'db>),
) -> Region<'db> {
    let mut body = BlockBuilder::new(db, location).arg(core::Index::new(db).as_type());
    let induction_var = body.arg_value(0);
    f(&mut body, induction_var);
    body.op(r#yield(db, location, vec![]));
    Region::new(db, location, idvec![body.build()])
}

impl<'db> For<'db> {
    /// Build a sequential loop; the closure receives the body builder and the
    /// induction variable.
    pub fn build(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        lower: Value<'db>,
        upper: Value<'db>,
        step: Value<'db>,
        f: impl FnOnce(&mut BlockBuilder<'db>, Value<'db>),
    ) -> Self {
        let body = loop_body(db, location, f);
        r#for(db, location, lower, upper, step, body)
    }

    /// The loop body block.
    pub fn body_block(&self, db: &'db dyn salsa::Database) -> Block<'db> {
        self.body(db).blocks(db)[0]
    }

    /// The induction variable of the loop body.
    pub fn induction_var(&self, db: &'db dyn salsa::Database) -> Value<'db> {
        self.body_block(db).arg(db, 0)
    }
}

impl<'db> ParFor<'db> {
    /// Build a parallel loop; the closure receives the body builder and the
    /// induction variable.
    pub fn build(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        lower: Value<'db>,
        upper: Value<'db>,
        step: Value<'db>,
        f: impl FnOnce(&mut BlockBuilder<'db>, Value<'db>),
    ) -> Self {
        let body = loop_body(db, location, f);
        par_for(db, location, lower, upper, step, body)
    }

    /// The loop body block.
    pub fn body_block(&self, db: &'db dyn salsa::Database) -> Block<'db> {
        self.body(db).blocks(db)[0]
    }

    /// The induction variable of the loop body.
    pub fn induction_var(&self, db: &'db dyn salsa::Database) -> Value<'db> {
        self.body_block(db).arg(db, 0)
    }
}
