//! Core IR structures.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU32, Ordering};

use lasso::{Rodeo, Spur};
use parking_lot::RwLock;

use crate::Location;
use crate::{Attribute, IdVec, Type};

// ============================================================================
// Interned Symbols
// ============================================================================

/// Global string interner for symbols.
static INTERNER: LazyLock<RwLock<Rodeo>> = LazyLock::new(|| RwLock::new(Rodeo::default()));

/// Interned symbol for efficient comparison of names (dialects, operations,
/// attribute keys).
///
/// Uses lasso for string interning with 4-byte Spur keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, salsa::Update)]
pub struct Symbol(Spur);

impl Symbol {
    /// Intern a static string and return its symbol. Prefer this over `from_dynamic` when possible.
    pub fn new(text: &'static str) -> Self {
        Self::get_or_else(text, |rodeo| rodeo.get_or_intern_static(text))
    }

    /// Intern a string and return its symbol. Prefer `new` if the text is static.
    pub fn from_dynamic(text: &str) -> Self {
        Self::get_or_else(text, |rodeo| rodeo.get_or_intern(text))
    }

    fn get_or_else(text: &str, f: impl for<'r> FnOnce(&'r mut Rodeo) -> Spur) -> Self {
        let mut lock = INTERNER.upgradable_read();
        Symbol(if let Some(spur) = lock.get(text) {
            spur
        } else {
            lock.with_upgraded(f)
        })
    }

    /// Access the symbol's text with zero-copy.
    ///
    /// Uses `read_recursive()` to allow nested Symbol operations (Display, ==,
    /// to_string) within the closure without risk of deadlock.
    pub fn with_str<R>(&self, f: impl FnOnce(&str) -> R) -> R {
        let interner = INTERNER.read_recursive();
        let text = interner.resolve(&self.0);
        f(text)
    }
}

impl From<&'static str> for Symbol {
    fn from(text: &'static str) -> Self {
        Symbol::new(text)
    }
}

impl From<Cow<'_, str>> for Symbol {
    fn from(text: Cow<'_, str>) -> Self {
        Symbol::from_dynamic(&text)
    }
}

/// Helper macro for declaring multiple symbol helpers at once.
///
/// # Example
/// ```
/// use loft_ir::symbols;
///
/// symbols! {
///     ATTR_NAME => "name",
///     ATTR_TYPE => "type",
/// }
/// ```
#[macro_export]
macro_rules! symbols {
    ($($(#[$attr:meta])* $name:ident => $text:literal),* $(,)?) => {
        $(
            $(#[$attr])*
            #[allow(non_snake_case)]
            #[inline]
            pub fn $name() -> $crate::Symbol {
                $crate::Symbol::new($text)
            }
        )*
    };
}

// Convenient comparison with &str
impl PartialEq<str> for Symbol {
    fn eq(&self, other: &str) -> bool {
        self.with_str(|s| s == other)
    }
}

impl PartialEq<&str> for Symbol {
    fn eq(&self, other: &&str) -> bool {
        self.with_str(|s| s == *other)
    }
}

impl PartialEq<Symbol> for str {
    fn eq(&self, other: &Symbol) -> bool {
        other.with_str(|s| s == self)
    }
}

impl PartialEq<Symbol> for &str {
    fn eq(&self, other: &Symbol) -> bool {
        other.with_str(|s| s == *self)
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.with_str(|s| write!(f, "{}", s))
    }
}

// ============================================================================
// SSA Values
// ============================================================================

/// Stable identity of a block.
///
/// Rewrites rebuild blocks as fresh tracked structs; block-argument values
/// refer to this id rather than the block itself so they survive rebuilds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, salsa::Update)]
pub struct BlockId(u32);

static NEXT_BLOCK_ID: AtomicU32 = AtomicU32::new(0);

impl BlockId {
    /// Allocate a fresh, process-unique block id.
    pub fn fresh() -> Self {
        BlockId(NEXT_BLOCK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Where a value is defined: either an operation result or a block argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, salsa::Update)]
pub enum ValueDef<'db> {
    OpResult(Operation<'db>),
    BlockArg(BlockId),
}

/// SSA value: a definition point plus an index.
/// Interned so that identical (def, index) pairs yield the same ID.
#[salsa::interned(debug)]
pub struct Value<'db> {
    pub def: ValueDef<'db>,
    pub index: usize,
}

impl<'db> Value<'db> {
    /// The operation defining this value, if it is an operation result.
    pub fn defining_op(self, db: &'db dyn salsa::Database) -> Option<Operation<'db>> {
        match self.def(db) {
            ValueDef::OpResult(op) => Some(op),
            ValueDef::BlockArg(_) => None,
        }
    }
}

// ============================================================================
// Core IR Structures
// ============================================================================

#[salsa::tracked(debug)]
pub struct Operation<'db> {
    pub location: Location<'db>,
    /// Dialect name (e.g., "arith", "scf").
    pub dialect: Symbol,
    /// Operation name within the dialect (e.g., "add", "for").
    pub name: Symbol,
    #[returns(ref)]
    pub operands: IdVec<Value<'db>>,
    #[returns(ref)]
    pub results: IdVec<Type<'db>>,
    #[returns(ref)]
    pub attributes: BTreeMap<Symbol, Attribute<'db>>,
    #[tracked]
    #[returns(ref)]
    pub regions: IdVec<Region<'db>>,
}

impl<'db> Operation<'db> {
    /// Create a builder for an operation with the given dialect and name.
    pub fn of(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        dialect: Symbol,
        name: Symbol,
    ) -> OperationBuilder<'db> {
        OperationBuilder::new(db, location, dialect, name)
    }

    /// Create a builder, parsing "dialect.operation" string.
    pub fn of_name(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        full_name: &'static str,
    ) -> OperationBuilder<'db> {
        let (dialect, name) = full_name
            .split_once('.')
            .expect("invalid operation name: expected 'dialect.operation'");
        let dialect = Symbol::new(dialect);
        let name = Symbol::new(name);
        Self::of(db, location, dialect, name)
    }

    /// Format as "dialect.operation".
    pub fn full_name(&self, db: &'db dyn salsa::Database) -> String {
        format!("{}.{}", self.dialect(db), self.name(db))
    }

    pub fn result(self, db: &'db dyn salsa::Database, index: usize) -> Value<'db> {
        Value::new(db, ValueDef::OpResult(self), index)
    }

    /// Get an attribute by key.
    pub fn get_attr(&self, db: &'db dyn salsa::Database, key: Symbol) -> Option<&Attribute<'db>> {
        self.attributes(db).get(&key)
    }

    /// Create a builder initialized from an existing operation.
    pub fn modify(&self, db: &'db dyn salsa::Database) -> OperationBuilder<'db> {
        OperationBuilder {
            db,
            location: self.location(db),
            dialect: self.dialect(db),
            name: self.name(db),
            operands: self.operands(db).clone(),
            results: self.results(db).clone(),
            attributes: self.attributes(db).clone(),
            regions: self.regions(db).clone(),
        }
    }
}

#[salsa::tracked(debug)]
pub struct Block<'db> {
    pub id: BlockId,
    pub location: Location<'db>,
    #[returns(ref)]
    pub args: IdVec<Type<'db>>,
    #[returns(ref)]
    pub operations: IdVec<Operation<'db>>,
}

impl<'db> Block<'db> {
    pub fn arg(self, db: &'db dyn salsa::Database, index: usize) -> Value<'db> {
        Value::new(db, ValueDef::BlockArg(self.id(db)), index)
    }
}

#[salsa::tracked(debug)]
pub struct Region<'db> {
    pub location: Location<'db>,
    #[returns(ref)]
    pub blocks: IdVec<Block<'db>>,
}

impl<'db> Region<'db> {
    /// The single entry block of this region, if any.
    pub fn entry(self, db: &'db dyn salsa::Database) -> Option<Block<'db>> {
        self.blocks(db).first().copied()
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Builder for constructing Operation instances.
pub struct OperationBuilder<'db> {
    db: &'db dyn salsa::Database,
    location: Location<'db>,
    dialect: Symbol,
    name: Symbol,
    operands: IdVec<Value<'db>>,
    results: IdVec<Type<'db>>,
    attributes: BTreeMap<Symbol, Attribute<'db>>,
    regions: IdVec<Region<'db>>,
}

impl<'db> OperationBuilder<'db> {
    pub fn new(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        dialect: Symbol,
        name: Symbol,
    ) -> Self {
        Self {
            db,
            location,
            dialect,
            name,
            operands: Default::default(),
            results: Default::default(),
            attributes: Default::default(),
            regions: Default::default(),
        }
    }

    pub fn operands(mut self, operands: IdVec<Value<'db>>) -> Self {
        self.operands = operands;
        self
    }

    pub fn operand(mut self, operand: Value<'db>) -> Self {
        self.operands.push(operand);
        self
    }

    pub fn results(mut self, results: IdVec<Type<'db>>) -> Self {
        self.results = results;
        self
    }

    pub fn result(mut self, ty: Type<'db>) -> Self {
        self.results.push(ty);
        self
    }

    pub fn attr(mut self, key: impl Into<Symbol>, value: Attribute<'db>) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn regions(mut self, regions: IdVec<Region<'db>>) -> Self {
        self.regions = regions;
        self
    }

    pub fn region(mut self, region: Region<'db>) -> Self {
        self.regions.push(region);
        self
    }

    pub fn build(self) -> Operation<'db> {
        Operation::new(
            self.db,
            self.location,
            self.dialect,
            self.name,
            self.operands,
            self.results,
            self.attributes,
            self.regions,
        )
    }
}

/// Builder for constructing Block instances.
pub struct BlockBuilder<'db> {
    db: &'db dyn salsa::Database,
    id: BlockId,
    location: Location<'db>,
    args: IdVec<Type<'db>>,
    operations: IdVec<Operation<'db>>,
}

impl<'db> BlockBuilder<'db> {
    pub fn new(db: &'db dyn salsa::Database, location: Location<'db>) -> Self {
        Self::with_id(db, BlockId::fresh(), location)
    }

    /// Build a block that reuses an existing block's identity, so that
    /// references to its arguments stay valid.
    pub fn with_id(db: &'db dyn salsa::Database, id: BlockId, location: Location<'db>) -> Self {
        Self {
            db,
            id,
            location,
            args: Default::default(),
            operations: Default::default(),
        }
    }

    pub fn args(mut self, args: IdVec<Type<'db>>) -> Self {
        self.args = args;
        self
    }

    pub fn arg(mut self, ty: Type<'db>) -> Self {
        self.args.push(ty);
        self
    }

    /// The value of the `index`-th argument of the block being built.
    pub fn arg_value(&self, index: usize) -> Value<'db> {
        Value::new(self.db, ValueDef::BlockArg(self.id), index)
    }

    /// Add an operation to the block and return it for capturing.
    pub fn op<Op: crate::DialectOp<'db>>(&mut self, operation: Op) -> Op {
        self.operations.push(operation.as_operation());
        operation
    }

    /// Add a raw operation to the block.
    pub fn push(&mut self, operation: Operation<'db>) {
        self.operations.push(operation);
    }

    /// Append a sequence of raw operations to the block.
    pub fn extend(&mut self, operations: impl IntoIterator<Item = Operation<'db>>) {
        self.operations.extend(operations);
    }

    pub fn build(self) -> Block<'db> {
        Block::new(self.db, self.id, self.location, self.args, self.operations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        DialectOp, DialectType, Location,
        dialect::{arith, core, func},
        idvec,
    };

    #[salsa::tracked]
    fn build_sample_module(db: &dyn salsa::Database) -> Operation<'_> {
        let location = Location::synthetic(db);

        let main_func = func::Func::build(
            db,
            location,
            "main",
            idvec![],
            core::F32::new(db).as_type(),
            |entry| {
                let c0 = entry.op(arith::Const::f32(db, location, 40.0));
                let c1 = entry.op(arith::Const::f32(db, location, 2.0));
                let add = entry.op(arith::add(
                    db,
                    location,
                    c0.result(db),
                    c1.result(db),
                    core::F32::new(db).as_type(),
                ));
                entry.op(func::Return::value(db, location, add.result(db)));
            },
        );

        core::Module::build(db, location, "main".into(), |top| {
            top.op(main_func);
        })
        .as_operation()
    }

    #[test]
    fn can_model_basic_structure() {
        salsa::DatabaseImpl::default().attach(|db| {
            let op = build_sample_module(db);
            let module = core::Module::from_operation(db, op).unwrap();
            assert_eq!(module.name(db), "main");
            let body = module.body(db);
            let ops = body.blocks(db)[0].operations(db);
            assert_eq!(ops.len(), 1);
            assert_eq!(ops[0].full_name(db), "func.func");
        });
    }

    #[salsa::tracked]
    fn rebuild_entry_block(db: &dyn salsa::Database) -> (Value<'_>, Value<'_>) {
        let location = Location::synthetic(db);
        let f32_ty = core::F32::new(db).as_type();
        let id = BlockId::fresh();

        let block = Block::new(db, id, location, idvec![f32_ty], idvec![]);
        // Rebuild with the same id but a different body.
        let constant = arith::Const::f32(db, location, 1.0);
        let rebuilt = Block::new(db, id, location, idvec![f32_ty], idvec![constant.as_operation()]);
        (block.arg(db, 0), rebuilt.arg(db, 0))
    }

    #[test]
    fn block_args_survive_rebuilds() {
        salsa::DatabaseImpl::default().attach(|db| {
            let (original, rebuilt) = rebuild_entry_block(db);
            assert_eq!(original, rebuilt);
        });
    }

    #[test]
    fn symbol_interning_is_by_value() {
        let a = Symbol::new("map_seq");
        let b = Symbol::from_dynamic("map_seq");
        assert_eq!(a, b);
        assert_eq!(a, "map_seq");
        assert_eq!(a.to_string(), "map_seq");
    }
}
