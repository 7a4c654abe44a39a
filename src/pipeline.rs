//! Compilation pipeline for Loft.
//!
//! The stages are Salsa tracked functions, so repeated compilation of an
//! unchanged module is cached:
//!
//! ```text
//! Module (array.* programs)
//!     │  rewrite strategies (caller-driven, see loft_ir::transforms)
//!     ▼
//! stage_lower ─► Module (scf/arith/mem loops, leftover markers)
//!     │
//!     ▼
//! stage_cleanup ─► Module (dead markers and combinators removed)
//! ```
//!
//! Rewrite strategies run before lowering and are driven by the caller, one
//! `PatternApplicator::apply_once` at a time; which strategies to apply in
//! which order is a scheduling decision this pipeline does not make.
//!
//! Diagnostics are collected with Salsa accumulators: stages emit
//! `Diagnostic { .. }.accumulate(db)` and `compile_with_diagnostics`
//! gathers them at the end. A function that fails to lower is reported and
//! left unchanged; other functions are unaffected.

use loft_ir::conversion::array_to_loops;
use loft_ir::diagnostic::Diagnostic;
use loft_ir::dialect::core::Module;
use loft_ir::transforms::dce;

/// Lower every array-language function in the module to loops.
#[salsa::tracked]
pub fn stage_lower<'db>(db: &'db dyn salsa::Database, module: Module<'db>) -> Module<'db> {
    tracing::debug!("stage_lower");
    array_to_loops::lower_module(db, module)
}

/// Remove dead pure operations left behind by lowering.
#[salsa::tracked]
pub fn stage_cleanup<'db>(db: &'db dyn salsa::Database, module: Module<'db>) -> Module<'db> {
    tracing::debug!("stage_cleanup");
    let result = dce::eliminate_dead_code(db, module);
    tracing::debug!(
        removed = result.removed_count,
        iterations = result.iterations,
        "cleanup finished"
    );
    result.module
}

/// Full pipeline: lower, then clean up.
#[salsa::tracked]
pub fn compile<'db>(db: &'db dyn salsa::Database, module: Module<'db>) -> Module<'db> {
    stage_cleanup(db, stage_lower(db, module))
}

/// Full pipeline plus the diagnostics accumulated along the way.
pub fn compile_with_diagnostics<'db>(
    db: &'db dyn salsa::Database,
    module: Module<'db>,
) -> (Module<'db>, Vec<Diagnostic>) {
    let compiled = compile(db, module);
    let diagnostics = compile::accumulated::<Diagnostic>(db, module)
        .into_iter()
        .cloned()
        .collect();
    (compiled, diagnostics)
}
