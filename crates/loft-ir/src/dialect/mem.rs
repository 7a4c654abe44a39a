//! Memory dialect operations.
//!
//! Flat row-major buffers plus the loads and stores the lowering emits
//! against them. Allocation requests carry the full shape in the result
//! type; physical layout decisions beyond row-major order belong to the
//! host memory model.

use crate::{Attribute, Location, Type, Value, dialect, register_pure_op};

dialect! {
    mod mem {
        /// `mem.alloc` operation: allocates a buffer; the result type is a
        /// `mem.ref` carrying element type and shape.
        fn alloc() -> result;

        /// `mem.load` operation: reads one element at the given indices.
        fn load(source, #[rest] indices) -> result;

        /// `mem.store` operation: writes one element at the given indices.
        fn store(target, value, #[rest] indices);

        /// `mem.fill` operation: writes `value` to every element of `target`.
        fn fill(target, value);

        /// `mem.ref` type: a flat row-major buffer of `element` values with
        /// compile-time shape.
        #[attr(shape: any)]
        type r#ref(element);
    }
}

impl<'db> Ref<'db> {
    /// Create a buffer type with the given element type and shape.
    /// An empty shape denotes a single scalar cell.
    pub fn with_shape(db: &'db dyn salsa::Database, element: Type<'db>, dims: &[u64]) -> Self {
        let shape = Attribute::List(dims.iter().map(|&d| Attribute::IntBits(d)).collect());
        Self::new(db, element, shape)
    }

    /// The buffer shape as a list of dimension sizes.
    pub fn dims(&self, db: &'db dyn salsa::Database) -> Vec<u64> {
        match self.shape(db) {
            Attribute::List(items) => items.iter().filter_map(Attribute::as_nat).collect(),
            _ => Vec::new(),
        }
    }

    /// The number of dimensions of the buffer.
    pub fn rank(&self, db: &'db dyn salsa::Database) -> usize {
        self.dims(db).len()
    }
}

/// Rank of a `mem.ref`-typed value's buffer, if the type is a buffer type.
pub fn ref_rank<'db>(db: &'db dyn salsa::Database, ty: Type<'db>) -> Option<usize> {
    use crate::DialectType;
    Ref::from_type(db, ty).map(|r| r.rank(db))
}

impl<'db> Store<'db> {
    /// Build a store with an explicit index list.
    pub fn with_indices(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        target: Value<'db>,
        value: Value<'db>,
        indices: Vec<Value<'db>>,
    ) -> Self {
        store(db, location, target, value, indices)
    }
}

// mem.alloc and mem.load have no observable side effect when their results
// are unused; mem.store and mem.fill mutate memory and are never removable.
register_pure_op!(mem.alloc);
register_pure_op!(mem.load);
