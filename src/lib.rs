//! Loft: lowering for a typed, point-free functional array language.
//!
//! Programs are built as `array.*` combinator DAGs (see `loft_ir`),
//! optionally restructured by rewrite strategies (tiling, fusion, loop
//! interchange), and lowered by [`pipeline::compile`] into loops and
//! indexed memory accesses over flat buffers. [`interp`] executes the
//! lowered form for testing.

pub mod interp;
pub mod pipeline;

pub use loft_ir;
