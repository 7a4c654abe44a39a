//! Loft IR crate.
//!
//! A multi-level dialect IR for a small, strongly-typed, point-free
//! functional array language, together with the machinery that turns it
//! into imperative code:
//!
//! - `dialect::array` — the source language and its lowering markers
//! - `dialect::{scf, arith, mem}` — the imperative target dialects
//! - `rewrite` + `transforms::strategies` — composable rewrite strategies
//! - `conversion::array_to_loops` — destination-passing lowering
//! - `transforms::dce` — dead code elimination

#![recursion_limit = "512"]

// === Dialect modules ===
pub mod dialect;

// === IR infrastructure ===
pub mod conversion;
pub mod diagnostic;
pub mod ir;
pub mod location;
pub mod op_interface;
pub mod ops;
pub mod printer;
pub mod rewrite;
pub mod transforms;
pub mod types;
pub mod validation;
pub mod walk;

// Re-export paste for use in macros
#[doc(hidden)]
pub use paste;

// Re-export smallvec for use in macros and external crates
pub use smallvec;

pub use ir::{Block, BlockBuilder, BlockId, Operation, OperationBuilder, Region, Symbol, Value, ValueDef};
pub use location::{Location, PathId, Span};
pub use ops::{ConversionError, DialectOp, strip_raw_prefix};
pub use types::{Attribute, Attrs, DialectType, Type};
pub use walk::{OperationWalk, WalkAction};

/// Small vector for values tracked by the Salsa framework.
pub type IdVec<T> = smallvec::SmallVec<[T; 2]>;
pub use smallvec::smallvec as idvec;
