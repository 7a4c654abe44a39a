//! IR type definitions.

use std::collections::BTreeMap;

use crate::{IdVec, Symbol};

/// Trait for dialect-specific type wrappers.
///
/// Similar to `DialectOp` for operations, this trait provides a common interface
/// for type wrappers that wrap the generic `Type` with dialect-specific semantics.
pub trait DialectType<'db>: Sized {
    /// Get the underlying `Type`.
    fn as_type(&self) -> Type<'db>;

    /// Try to convert a `Type` to this dialect type wrapper.
    /// Returns `None` if the type doesn't match this dialect type.
    fn from_type(db: &'db dyn salsa::Database, ty: Type<'db>) -> Option<Self>;
}

/// Attribute map type alias.
pub type Attrs<'db> = BTreeMap<Symbol, Attribute<'db>>;

/// IR type representation.
///
/// All types are dialect-defined with a `dialect.name` naming convention.
/// Types are interned: structurally equal types are pointer-equal, which also
/// gives array-length naturals by-value interning for free.
#[salsa::interned(debug)]
pub struct Type<'db> {
    pub dialect: Symbol,
    pub name: Symbol,
    #[returns(deref)]
    pub params: IdVec<Type<'db>>,
    #[returns(ref)]
    pub attrs: Attrs<'db>,
}

impl<'db> Type<'db> {
    /// Check if this type matches the given dialect and name.
    pub fn is_dialect(&self, db: &'db dyn salsa::Database, dialect: Symbol, name: Symbol) -> bool {
        self.dialect(db) == dialect && self.name(db) == name
    }

    /// Get an attribute by key.
    pub fn get_attr(&self, db: &'db dyn salsa::Database, key: Symbol) -> Option<&Attribute<'db>> {
        self.attrs(db).get(&key)
    }

    /// Get a natural-number attribute by key.
    pub fn get_nat(&self, db: &'db dyn salsa::Database, key: Symbol) -> Option<u64> {
        self.get_attr(db, key).and_then(Attribute::as_nat)
    }
}

/// IR attribute values.
#[derive(Clone, Debug, PartialEq, Eq, Hash, salsa::Update)]
pub enum Attribute<'db> {
    Bool(bool),
    /// Integer constant stored as raw bits. Also carries compile-time
    /// naturals (array lengths, strides, offsets).
    IntBits(u64),
    /// Float constant stored as raw bits.
    FloatBits(u64),
    String(String),
    Type(Type<'db>),
    /// Single interned symbol (e.g., "add").
    Symbol(Symbol),
    /// List of attributes (e.g., buffer shapes, literal array elements).
    List(Vec<Attribute<'db>>),
}

impl<'db> Attribute<'db> {
    /// Interpret this attribute as a compile-time natural number.
    pub fn as_nat(&self) -> Option<u64> {
        match self {
            Attribute::IntBits(v) => Some(*v),
            _ => None,
        }
    }

    /// Interpret this attribute as an `f32` constant.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Attribute::FloatBits(bits) => Some(f32::from_bits(*bits as u32)),
            _ => None,
        }
    }

    /// Interpret this attribute as a type.
    pub fn as_type(&self) -> Option<Type<'db>> {
        match self {
            Attribute::Type(ty) => Some(*ty),
            _ => None,
        }
    }

    /// Build a float attribute from an `f32` value.
    pub fn f32(value: f32) -> Self {
        Attribute::FloatBits(u64::from(value.to_bits()))
    }
}

impl From<i64> for Attribute<'_> {
    fn from(value: i64) -> Self {
        Attribute::IntBits(u64::from_ne_bytes(value.to_ne_bytes()))
    }
}

impl From<u64> for Attribute<'_> {
    fn from(value: u64) -> Self {
        Attribute::IntBits(value)
    }
}

impl From<bool> for Attribute<'_> {
    fn from(value: bool) -> Self {
        Attribute::Bool(value)
    }
}

impl<'db> From<Vec<Attribute<'db>>> for Attribute<'db> {
    fn from(value: Vec<Attribute<'db>>) -> Self {
        Attribute::List(value)
    }
}
