//! Core dialect operations and types.
//!
//! This dialect provides fundamental types shared by the others:
//! - `core.i{bits}` - integer type (e.g., `core.i1`, `core.i32`)
//! - `core.f{bits}` - floating-point type (e.g., `core.f32`, `core.f64`)
//! - `core.index` - loop index / address arithmetic type
//! - `core.nil` - unit type
//! - `core.func` - host function signature type
use std::collections::BTreeMap;
use std::ops::Deref;

use crate::{DialectType, IdVec, Location, Region, Symbol, Type, dialect, idvec, ir::BlockBuilder};

dialect! {
    mod core {
        // === Operations ===

        /// `core.module` operation: top-level module container.
        #[attr(sym_name: Symbol)]
        fn module() {
            #[region(body)] {}
        };

        // === Types ===

        /// `core.nil` type: unit type.
        type nil;

        /// `core.index` type: loop induction variables and address arithmetic.
        type index;

        /// `core.func` type: host function signature.
        /// `params[0]` is the result type, `params[1..]` are the parameters.
        type func(#[rest] sig_types);
    }
}

impl<'db> Module<'db> {
    /// Create a new module with explicit body region.
    pub fn create(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        name: Symbol,
        body: Region<'db>,
    ) -> Self {
        module(db, location, name, body)
    }

    /// Build a module with a closure that constructs the top-level block.
    pub fn build(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        name: Symbol,
        f: impl FnOnce(&mut BlockBuilder<'db>),
    ) -> Self {
        let mut top = BlockBuilder::new(db, location);
        f(&mut top);
        let region = Region::new(db, location, idvec![top.build()]);
        Self::create(db, location, name, region)
    }

    /// Get the module name.
    pub fn name(&self, db: &'db dyn salsa::Database) -> Symbol {
        self.sym_name(db)
    }
}

impl<'db> Func<'db> {
    /// Create a function signature from parameter types and a result type.
    pub fn signature(
        db: &'db dyn salsa::Database,
        params: IdVec<Type<'db>>,
        result: Type<'db>,
    ) -> Self {
        let mut sig = idvec![result];
        sig.extend(params);
        Self::new(db, sig)
    }

    /// The result type of the signature.
    pub fn result(&self, db: &'db dyn salsa::Database) -> Type<'db> {
        self.sig_types(db)[0]
    }

    /// The parameter types of the signature.
    pub fn params(&self, db: &'db dyn salsa::Database) -> &[Type<'db>] {
        &self.sig_types(db)[1..]
    }
}

// === Integer type wrapper ===

/// Integer type wrapper (`core.i{BITS}`).
///
/// Use `I::<32>::new(db)` or the type alias `I32::new(db)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, salsa::Update)]
pub struct I<'db, const BITS: u16>(Type<'db>);

impl<'db, const BITS: u16> I<'db, BITS> {
    /// Create a new integer type with the specified bit width.
    pub fn new(db: &'db dyn salsa::Database) -> Self {
        Self(numeric(db, "i", BITS))
    }
}

impl<'db, const BITS: u16> Deref for I<'db, BITS> {
    type Target = Type<'db>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'db, const BITS: u16> DialectType<'db> for I<'db, BITS> {
    fn as_type(&self) -> Type<'db> {
        self.0
    }

    fn from_type(db: &'db dyn salsa::Database, ty: Type<'db>) -> Option<Self> {
        if ty.dialect(db) == *_NAME && ty.name(db).with_str(|n| n == format!("i{BITS}").as_str()) {
            Some(Self(ty))
        } else {
            None
        }
    }
}

/// 1-bit integer type (boolean).
pub type I1<'db> = I<'db, 1>;
/// 32-bit integer type.
pub type I32<'db> = I<'db, 32>;
/// 64-bit integer type.
pub type I64<'db> = I<'db, 64>;

// === Floating-point type wrapper ===

/// Floating-point type wrapper (`core.f{BITS}`).
///
/// Use `F::<32>::new(db)` or the type alias `F32::new(db)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, salsa::Update)]
pub struct F<'db, const BITS: u16>(Type<'db>);

impl<'db, const BITS: u16> F<'db, BITS> {
    /// Create a new floating-point type with the specified bit width.
    pub fn new(db: &'db dyn salsa::Database) -> Self {
        Self(numeric(db, "f", BITS))
    }
}

impl<'db, const BITS: u16> Deref for F<'db, BITS> {
    type Target = Type<'db>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'db, const BITS: u16> DialectType<'db> for F<'db, BITS> {
    fn as_type(&self) -> Type<'db> {
        self.0
    }

    fn from_type(db: &'db dyn salsa::Database, ty: Type<'db>) -> Option<Self> {
        if ty.dialect(db) == *_NAME && ty.name(db).with_str(|n| n == format!("f{BITS}").as_str()) {
            Some(Self(ty))
        } else {
            None
        }
    }
}

/// 32-bit floating-point type.
pub type F32<'db> = F<'db, 32>;
/// 64-bit floating-point type.
pub type F64<'db> = F<'db, 64>;

/// Create a numeric type (`core.{prefix}{bits}`) with the given bit width.
fn numeric<'db>(db: &'db dyn salsa::Database, prefix: &str, bits: u16) -> Type<'db> {
    Type::new(
        db,
        *_NAME,
        Symbol::from_dynamic(&format!("{prefix}{bits}")),
        IdVec::new(),
        BTreeMap::new(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[salsa::tracked]
    fn build_types(db: &dyn salsa::Database) -> (Type<'_>, Type<'_>, Type<'_>) {
        (
            F32::new(db).as_type(),
            F32::new(db).as_type(),
            Index::new(db).as_type(),
        )
    }

    #[test]
    fn numeric_types_are_interned() {
        salsa::DatabaseImpl::default().attach(|db| {
            let (a, b, index) = build_types(db);
            assert_eq!(a, b);
            assert_ne!(a, index);
            assert!(F32::from_type(db, a).is_some());
            assert!(F64::from_type(db, a).is_none());
        });
    }

    #[salsa::tracked]
    fn build_signature(db: &dyn salsa::Database) -> Func<'_> {
        let f32_ty = F32::new(db).as_type();
        let index_ty = Index::new(db).as_type();
        Func::signature(db, idvec![f32_ty, index_ty], f32_ty)
    }

    #[test]
    fn func_signature_roundtrip() {
        salsa::DatabaseImpl::default().attach(|db| {
            let sig = build_signature(db);
            assert_eq!(sig.params(db).len(), 2);
            assert_eq!(sig.result(db), F32::new(db).as_type());
        });
    }
}
