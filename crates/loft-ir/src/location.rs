//! Source location types for tracking positions in source files.

use serde::{Deserialize, Serialize};

/// A span of source code, represented as byte offsets.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Interned URI string for source file identification.
///
/// Programs handed to the lowering pipeline are usually built
/// programmatically, so the URI is often a synthetic scheme such as
/// `builder:///`.
#[salsa::interned(debug)]
pub struct PathId<'db> {
    #[returns(deref)]
    pub uri: String,
}

/// A location in source code, combining file and span information.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, salsa::Update)]
pub struct Location<'db> {
    pub path: PathId<'db>,
    pub span: Span,
}

impl<'db> Location<'db> {
    pub const fn new(path: PathId<'db>, span: Span) -> Self {
        Self { path, span }
    }

    /// A location for synthetically constructed IR.
    pub fn synthetic(db: &'db dyn salsa::Database) -> Self {
        let path = PathId::new(db, "builder:///".to_owned());
        Self::new(path, Span::new(0, 0))
    }
}
