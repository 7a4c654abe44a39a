//! Function dialect operations.
use super::core;
use crate::{
    Attribute, DialectOp, DialectType, IdVec, Location, Operation, Region, Symbol, Type, dialect,
    idvec, ir::BlockBuilder,
};

dialect! {
    mod func {
        /// `func.func` operation: defines a function.
        #[attr(sym_name: Symbol, r#type: Type)]
        fn func() {
            #[region(body)] {}
        };

        /// `func.return` operation: returns values from a function.
        fn r#return(#[rest] operands);
    }
}

impl<'db> Func<'db> {
    /// Build a function with a closure that constructs the entry block.
    pub fn build(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        name: impl Into<Symbol>,
        params: IdVec<Type<'db>>,
        result: Type<'db>,
        f: impl FnOnce(&mut BlockBuilder<'db>),
    ) -> Self {
        let mut entry = BlockBuilder::new(db, location).args(params.clone());
        f(&mut entry);
        let region = Region::new(db, location, idvec![entry.build()]);

        let builder = Operation::of_name(db, location, "func.func")
            .attr("sym_name", Attribute::Symbol(name.into()))
            .attr(
                "type",
                Attribute::Type(core::Func::signature(db, params, result).as_type()),
            )
            .region(region);

        Func::from_operation(db, builder.build()).expect("valid func.func operation")
    }

    /// Rebuild this function with a new body region, keeping name and type.
    pub fn with_body(&self, db: &'db dyn salsa::Database, body: Region<'db>) -> Self {
        let op = self.as_operation().modify(db).regions(idvec![body]).build();
        Func::wrap_unchecked(op)
    }

    /// Get the function's name.
    pub fn name(&self, db: &'db dyn salsa::Database) -> Symbol {
        self.sym_name(db)
    }

    /// Get the function type.
    pub fn ty(&self, db: &'db dyn salsa::Database) -> Type<'db> {
        self.r#type(db)
    }

    /// The entry block of the function body.
    pub fn entry_block(&self, db: &'db dyn salsa::Database) -> Option<crate::Block<'db>> {
        self.body(db).entry(db)
    }
}

impl<'db> Return<'db> {
    /// Create a new return with no values.
    pub fn empty(db: &'db dyn salsa::Database, location: Location<'db>) -> Self {
        r#return(db, location, vec![])
    }

    /// Create a new return with a single value.
    pub fn value(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        value: crate::Value<'db>,
    ) -> Self {
        r#return(db, location, vec![value])
    }
}
