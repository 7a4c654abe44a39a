//! Functional array dialect.
//!
//! A small, strongly-typed, point-free array language: combinators are
//! nullary operations whose results carry curried function types, and
//! `array.apply` applies them to a prefix of their arguments. Lambdas own a
//! body region whose block arguments are the bound parameters; uses of a
//! parameter are direct references to the block argument, so substitution is
//! use-edge redirection rather than name lookup.
//!
//! The `*_view`, `*_acc`, `idx`, `binary` and `assign` operations are not
//! part of the source language: they are the deferred index-transform
//! markers produced during lowering and resolved during address
//! computation. All of them are pure and disappear under DCE once
//! assignments have been lowered to loads and stores.

use super::core;
use crate::{
    Attribute, DialectType, IdVec, Location, Region, Type, Value, dialect, idvec,
    ir::BlockBuilder, register_pure_op, symbols,
};

symbols! {
    TO => "to",
}

dialect! {
    mod array {
        // === Combinators (function-typed constants) ===

        /// `array.map_seq`: sequential map over an `n`-array, `s` to `t`.
        #[attr(n: u64, s: Type, t: Type)]
        fn map_seq() -> result;

        /// `array.map_par`: data-parallel map. Identical typing to
        /// `map_seq`; the tag only selects the emitted loop construct.
        #[attr(n: u64, s: Type, t: Type)]
        fn map_par() -> result;

        /// `array.reduce_seq`: sequential reduction of an `n`-array of `s`
        /// with an accumulator of type `t`.
        #[attr(n: u64, s: Type, t: Type)]
        fn reduce_seq() -> result;

        /// `array.split`: `n*m`-array into `n` chunks of length `m`.
        #[attr(n: u64, m: u64, t: Type)]
        fn split() -> result;

        /// `array.join`: `n` chunks of length `m` into an `n*m`-array.
        #[attr(n: u64, m: u64, t: Type)]
        fn join() -> result;

        /// `array.transpose`: `n` rows of `m` into `m` rows of `n`.
        #[attr(n: u64, m: u64, t: Type)]
        fn transpose() -> result;

        /// `array.slide`: `n` windows of size `sz` advancing by `sp`.
        #[attr(n: u64, sz: u64, sp: u64, t: Type)]
        fn slide() -> result;

        /// `array.pad`: pad an `n`-array with `l` leading and `r` trailing
        /// copies of the clamped border element.
        #[attr(n: u64, l: u64, r: u64, t: Type)]
        fn pad() -> result;

        /// `array.zip`: two `n`-arrays into one `n`-array of pairs.
        #[attr(n: u64, s: Type, t: Type)]
        fn zip() -> result;

        /// `array.fst`: first projection of a pair.
        #[attr(s: Type, t: Type)]
        fn fst() -> result;

        /// `array.snd`: second projection of a pair.
        #[attr(s: Type, t: Type)]
        fn snd() -> result;

        /// `array.add`: scalar addition.
        fn add() -> result;

        /// `array.mul`: scalar multiplication.
        fn mul() -> result;

        /// `array.id`: semantically transparent identity, used as an anchor
        /// for rewrite strategies.
        #[attr(t: Type)]
        fn id() -> result;

        // === Functions and application ===

        /// `array.lambda`: anonymous function; block arguments of the body
        /// region are the bound parameters.
        fn lambda() -> result {
            #[region(body)] {}
        };

        /// `array.apply`: applies a curried function value to a prefix of
        /// its arguments.
        fn apply(fun, #[rest] args) -> result;

        /// `array.yield`: returns a value from a lambda or embed region.
        fn r#yield(#[rest] values);

        // === Literals and the host boundary ===

        /// `array.literal`: compile-time scalar or array constant.
        #[attr(value)]
        fn literal() -> result;

        /// `array.embed`: escape hatch embedding host-level computation.
        /// Captured operands are wired to the region's block arguments; the
        /// region is inlined during code generation.
        fn embed(#[rest] captured) -> result {
            #[region(body)] {}
        };

        /// `array.in`: imports a host buffer as an array-language value.
        fn r#in(source) -> result;

        /// `array.out`: top-level store of an array-language value into a
        /// host buffer. Lowering starts here.
        fn out(target, value);

        /// `array.cast`: reinterprets a host buffer under an array-language
        /// type on the destination side; address resolution passes through.
        fn cast(source) -> result;

        // === Lowering markers (deferred index transforms) ===

        /// `array.idx`: element access marker.
        fn idx(source, index) -> result;

        /// `array.assign`: a pending write of `value` into `target`,
        /// resolved to loads and stores during code generation.
        fn assign(value, target);

        /// `array.binary`: pending scalar arithmetic over marker operands.
        #[attr(kind: Symbol)]
        fn binary(lhs, rhs) -> result;

        /// `array.split_view`: read an `n*m`-array as `n` chunks of `m`.
        #[attr(m: u64)]
        fn split_view(source) -> result;

        /// `array.join_view`: read `n` chunks of `m` as one flat array.
        #[attr(m: u64)]
        fn join_view(source) -> result;

        /// `array.transpose_view`: read with the two outer dimensions swapped.
        fn transpose_view(source) -> result;

        /// `array.slide_view`: read window `i`, element `j` at `i*sp + j`.
        #[attr(sp: u64)]
        fn slide_view(source) -> result;

        /// `array.pad_view`: read with the index clamped into `[0, n-1]`.
        #[attr(n: u64, l: u64, r: u64)]
        fn pad_view(fill, source) -> result;

        /// `array.zip_view`: paired view over two arrays; no storage.
        fn zip_view(lhs, rhs) -> result;

        /// `array.fst_view`: deferred first projection.
        fn fst_view(tuple) -> result;

        /// `array.snd_view`: deferred second projection.
        fn snd_view(tuple) -> result;

        /// `array.split_acc`: destination adapter decomposing a flat index
        /// into chunk and offset.
        #[attr(m: u64)]
        fn split_acc(target) -> result;

        /// `array.join_acc`: destination adapter combining chunk and offset
        /// into a flat index.
        #[attr(m: u64)]
        fn join_acc(target) -> result;

        // === Types ===

        /// `array.scalar` type: scalar data wrapping a host scalar type.
        type scalar(elem);

        /// `array.array` type: fixed-length array of a data type.
        #[attr(size: u64)]
        type array(element);

        /// `array.tuple` type: pair of data types.
        type tuple(first, second);

        /// `array.fun` type: curried function, one argument per level. The
        /// only carrier of function-typed values; arrays and tuples never
        /// contain it.
        type fun(input, output);
    }
}

// ============================================================================
// Type helpers
// ============================================================================

impl<'db> Scalar<'db> {
    /// The `array.scalar(core.f32)` type.
    pub fn f32(db: &'db dyn salsa::Database) -> Type<'db> {
        Scalar::new(db, core::F32::new(db).as_type()).as_type()
    }
}

impl<'db> Array<'db> {
    /// Create an array type of `size` elements.
    pub fn of(db: &'db dyn salsa::Database, size: u64, element: Type<'db>) -> Type<'db> {
        Array::new(db, element, size).as_type()
    }
}

impl<'db> Fun<'db> {
    /// A curried two-argument function type `a -> b -> c`.
    pub fn curried2(
        db: &'db dyn salsa::Database,
        a: Type<'db>,
        b: Type<'db>,
        c: Type<'db>,
    ) -> Type<'db> {
        Fun::new(db, a, Fun::new(db, b, c).as_type()).as_type()
    }

    /// Peel `count` argument levels off a curried function type.
    pub fn peel(db: &'db dyn salsa::Database, ty: Type<'db>, count: usize) -> Option<Type<'db>> {
        let mut current = ty;
        for _ in 0..count {
            current = Fun::from_type(db, current)?.output(db);
        }
        Some(current)
    }

    /// Number of argument levels of a curried function type.
    pub fn arity(db: &'db dyn salsa::Database, ty: Type<'db>) -> usize {
        let mut current = ty;
        let mut n = 0;
        while let Some(fun) = Fun::from_type(db, current) {
            current = fun.output(db);
            n += 1;
        }
        n
    }
}

/// Whether a type is a data type (scalar, array, or tuple).
pub fn is_data_type<'db>(db: &'db dyn salsa::Database, ty: Type<'db>) -> bool {
    Scalar::from_type(db, ty).is_some()
        || Array::from_type(db, ty).is_some()
        || Tuple::from_type(db, ty).is_some()
}

/// Element type of an array-typed value, if any.
pub fn element_of<'db>(db: &'db dyn salsa::Database, ty: Type<'db>) -> Option<Type<'db>> {
    Array::from_type(db, ty).map(|a| a.element(db))
}

// ============================================================================
// Combinator builders
// ============================================================================
//
// Each `create` computes the combinator's curried function type from its
// shape parameters, so construction is the single point where result types
// are derived.

impl<'db> MapSeq<'db> {
    /// `(s -> t) -> (n.s -> n.t)`
    pub fn create(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        n: u64,
        s: Type<'db>,
        t: Type<'db>,
    ) -> Self {
        let f = Fun::new(db, s, t).as_type();
        let ty = Fun::new(db, f, Fun::new(db, Array::of(db, n, s), Array::of(db, n, t)).as_type())
            .as_type();
        map_seq(db, location, ty, n, s, t)
    }
}

impl<'db> MapPar<'db> {
    /// `(s -> t) -> (n.s -> n.t)`
    pub fn create(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        n: u64,
        s: Type<'db>,
        t: Type<'db>,
    ) -> Self {
        let f = Fun::new(db, s, t).as_type();
        let ty = Fun::new(db, f, Fun::new(db, Array::of(db, n, s), Array::of(db, n, t)).as_type())
            .as_type();
        map_par(db, location, ty, n, s, t)
    }
}

impl<'db> ReduceSeq<'db> {
    /// `(s -> t -> t) -> t -> n.s -> t`
    pub fn create(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        n: u64,
        s: Type<'db>,
        t: Type<'db>,
    ) -> Self {
        let step = Fun::curried2(db, s, t, t);
        let ty = Fun::new(
            db,
            step,
            Fun::new(db, t, Fun::new(db, Array::of(db, n, s), t).as_type()).as_type(),
        )
        .as_type();
        reduce_seq(db, location, ty, n, s, t)
    }
}

impl<'db> Split<'db> {
    /// `n*m.t -> n.(m.t)`
    pub fn create(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        n: u64,
        m: u64,
        t: Type<'db>,
    ) -> Self {
        let ty = Fun::new(
            db,
            Array::of(db, n * m, t),
            Array::of(db, n, Array::of(db, m, t)),
        )
        .as_type();
        split(db, location, ty, n, m, t)
    }
}

impl<'db> Join<'db> {
    /// `n.(m.t) -> n*m.t`
    pub fn create(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        n: u64,
        m: u64,
        t: Type<'db>,
    ) -> Self {
        let ty = Fun::new(
            db,
            Array::of(db, n, Array::of(db, m, t)),
            Array::of(db, n * m, t),
        )
        .as_type();
        join(db, location, ty, n, m, t)
    }
}

impl<'db> Transpose<'db> {
    /// `n.(m.t) -> m.(n.t)`
    pub fn create(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        n: u64,
        m: u64,
        t: Type<'db>,
    ) -> Self {
        let ty = Fun::new(
            db,
            Array::of(db, n, Array::of(db, m, t)),
            Array::of(db, m, Array::of(db, n, t)),
        )
        .as_type();
        transpose(db, location, ty, n, m, t)
    }
}

impl<'db> Slide<'db> {
    /// `(sp*(n-1)+sz).t -> n.(sz.t)`
    pub fn create(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        n: u64,
        sz: u64,
        sp: u64,
        t: Type<'db>,
    ) -> Self {
        let input_len = sp * (n - 1) + sz;
        let ty = Fun::new(
            db,
            Array::of(db, input_len, t),
            Array::of(db, n, Array::of(db, sz, t)),
        )
        .as_type();
        slide(db, location, ty, n, sz, sp, t)
    }
}

impl<'db> Pad<'db> {
    /// `t -> n.t -> (l+n+r).t`
    pub fn create(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        n: u64,
        l: u64,
        r: u64,
        t: Type<'db>,
    ) -> Self {
        let ty = Fun::new(
            db,
            t,
            Fun::new(db, Array::of(db, n, t), Array::of(db, l + n + r, t)).as_type(),
        )
        .as_type();
        pad(db, location, ty, n, l, r, t)
    }
}

impl<'db> Zip<'db> {
    /// `n.s -> n.t -> n.(s, t)`
    pub fn create(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        n: u64,
        s: Type<'db>,
        t: Type<'db>,
    ) -> Self {
        let pair = Tuple::new(db, s, t).as_type();
        let ty = Fun::new(
            db,
            Array::of(db, n, s),
            Fun::new(db, Array::of(db, n, t), Array::of(db, n, pair)).as_type(),
        )
        .as_type();
        zip(db, location, ty, n, s, t)
    }
}

impl<'db> Fst<'db> {
    /// `(s, t) -> s`
    pub fn create(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        s: Type<'db>,
        t: Type<'db>,
    ) -> Self {
        let pair = Tuple::new(db, s, t).as_type();
        let ty = Fun::new(db, pair, s).as_type();
        fst(db, location, ty, s, t)
    }
}

impl<'db> Snd<'db> {
    /// `(s, t) -> t`
    pub fn create(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        s: Type<'db>,
        t: Type<'db>,
    ) -> Self {
        let pair = Tuple::new(db, s, t).as_type();
        let ty = Fun::new(db, pair, t).as_type();
        snd(db, location, ty, s, t)
    }
}

impl<'db> Add<'db> {
    /// `f32 -> f32 -> f32`
    pub fn create(db: &'db dyn salsa::Database, location: Location<'db>) -> Self {
        let s = Scalar::f32(db);
        add(db, location, Fun::curried2(db, s, s, s))
    }
}

impl<'db> Mul<'db> {
    /// `f32 -> f32 -> f32`
    pub fn create(db: &'db dyn salsa::Database, location: Location<'db>) -> Self {
        let s = Scalar::f32(db);
        mul(db, location, Fun::curried2(db, s, s, s))
    }
}

impl<'db> Id<'db> {
    /// `t -> t`
    pub fn create(db: &'db dyn salsa::Database, location: Location<'db>, t: Type<'db>) -> Self {
        id(db, location, Fun::new(db, t, t).as_type(), t)
    }
}

// ============================================================================
// Lambda / apply / embed builders
// ============================================================================

impl<'db> Lambda<'db> {
    /// Build a lambda; the closure receives the block builder and the
    /// parameter values and returns the value to yield. The lambda's type is
    /// the curried function over `params` ending in `result`.
    pub fn build(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        params: IdVec<Type<'db>>,
        result: Type<'db>,
        f: impl FnOnce(&mut BlockBuilder<'db>, &[Value<'db>]) -> Value<'db>,
    ) -> Self {
        let mut body = BlockBuilder::new(db, location).args(params.clone());
        let param_values: Vec<Value<'db>> = (0..params.len()).map(|i| body.arg_value(i)).collect();
        let yielded = f(&mut body, &param_values);
        body.op(r#yield(db, location, vec![yielded]));
        let region = Region::new(db, location, idvec![body.build()]);

        let ty = params
            .iter()
            .rev()
            .fold(result, |acc, &p| Fun::new(db, p, acc).as_type());
        lambda(db, location, ty, region)
    }

    /// The entry block of the lambda body.
    pub fn entry_block(&self, db: &'db dyn salsa::Database) -> Option<crate::Block<'db>> {
        self.body(db).entry(db)
    }

    /// The value yielded by the lambda body, if the body is well-formed.
    pub fn yielded(&self, db: &'db dyn salsa::Database) -> Option<Value<'db>> {
        use crate::DialectOp;
        let block = self.entry_block(db)?;
        let last = *block.operations(db).last()?;
        let y = Yield::from_operation(db, last).ok()?;
        y.values(db).first().copied()
    }
}

impl<'db> Apply<'db> {
    /// Apply a function value to arguments, deriving the result type from
    /// the function type by peeling one level per argument.
    pub fn create(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        fun_ty: Type<'db>,
        fun: Value<'db>,
        args: Vec<Value<'db>>,
    ) -> Self {
        let result = Fun::peel(db, fun_ty, args.len())
            .expect("applied more arguments than the function type allows");
        apply(db, location, fun, args, result)
    }
}

impl<'db> Literal<'db> {
    /// A scalar f32 literal.
    pub fn scalar_f32(db: &'db dyn salsa::Database, location: Location<'db>, value: f32) -> Self {
        literal(db, location, Scalar::f32(db), Attribute::f32(value))
    }

    /// A one-dimensional f32 array literal.
    pub fn array_f32(db: &'db dyn salsa::Database, location: Location<'db>, values: &[f32]) -> Self {
        let elems = values.iter().map(|&v| Attribute::f32(v)).collect();
        literal(
            db,
            location,
            Array::of(db, values.len() as u64, Scalar::f32(db)),
            Attribute::List(elems),
        )
    }
}

impl<'db> Embed<'db> {
    /// Build an embed region; the closure receives the block builder and the
    /// captured values (as block arguments) and returns the value to yield.
    pub fn build(
        db: &'db dyn salsa::Database,
        location: Location<'db>,
        captured: Vec<Value<'db>>,
        capture_tys: IdVec<Type<'db>>,
        result: Type<'db>,
        f: impl FnOnce(&mut BlockBuilder<'db>, &[Value<'db>]) -> Value<'db>,
    ) -> Self {
        let mut body = BlockBuilder::new(db, location).args(capture_tys);
        let capture_values: Vec<Value<'db>> =
            (0..captured.len()).map(|i| body.arg_value(i)).collect();
        let yielded = f(&mut body, &capture_values);
        body.op(r#yield(db, location, vec![yielded]));
        let region = Region::new(db, location, idvec![body.build()]);
        embed(db, location, captured, result, region)
    }

    /// The value yielded by the embed body, if the body is well-formed.
    pub fn yielded(&self, db: &'db dyn salsa::Database) -> Option<Value<'db>> {
        use crate::DialectOp;
        let block = self.body(db).entry(db)?;
        let last = *block.operations(db).last()?;
        let y = Yield::from_operation(db, last).ok()?;
        y.values(db).first().copied()
    }
}

/// The requested lowering target of a loop-emitting combinator, if any.
pub fn lowering_target<'db>(
    db: &'db dyn salsa::Database,
    op: crate::Operation<'db>,
) -> Option<String> {
    match op.get_attr(db, TO()) {
        Some(Attribute::String(s)) => Some(s.clone()),
        _ => None,
    }
}

// ============================================================================
// Purity
// ============================================================================
//
// Everything except `out`, `assign` and `yield` is removable when unused:
// `out` is the store node lowering starts from, `assign` is a pending store,
// and `yield` keeps lambda and embed bodies alive until their owner dies.

register_pure_op!(array.map_seq);
register_pure_op!(array.map_par);
register_pure_op!(array.reduce_seq);
register_pure_op!(array.split);
register_pure_op!(array.join);
register_pure_op!(array.transpose);
register_pure_op!(array.slide);
register_pure_op!(array.pad);
register_pure_op!(array.zip);
register_pure_op!(array.fst);
register_pure_op!(array.snd);
register_pure_op!(array.add);
register_pure_op!(array.mul);
register_pure_op!(array.id);
register_pure_op!(array.lambda);
register_pure_op!(array.apply);
register_pure_op!(array.literal);
register_pure_op!(array.embed);
register_pure_op!(array.cast);

impl crate::op_interface::Pure for In<'_> {}
inventory::submit! { crate::op_interface::PureOps::register("array", "in") }
register_pure_op!(array.idx);
register_pure_op!(array.binary);
register_pure_op!(array.split_view);
register_pure_op!(array.join_view);
register_pure_op!(array.transpose_view);
register_pure_op!(array.slide_view);
register_pure_op!(array.pad_view);
register_pure_op!(array.zip_view);
register_pure_op!(array.fst_view);
register_pure_op!(array.snd_view);
register_pure_op!(array.split_acc);
register_pure_op!(array.join_acc);
