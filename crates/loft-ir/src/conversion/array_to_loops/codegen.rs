//! Address resolution and code generation.
//!
//! Walks the marker chains built by the accept/produce translation and
//! emits the final index arithmetic, loads and stores. The write side
//! (`gen_write`) descends from a destination toward storage accumulating
//! index tokens before emitting a store; the read side (`gen_read`) descends
//! from a value toward its storage before emitting a load. Both share one
//! path representation and the same arithmetic identities.
//!
//! Every marker is first classified into the closed [`Transform`] variant
//! type; the table-driven resolution dispatches on that enum alone.

use std::collections::HashMap;

use super::LowerError;
use crate::dialect::{arith, array, core, mem};
use crate::{
    Block, BlockId, DialectOp, DialectType, IdVec, Location, Operation, Region, Symbol, Type,
    Value, ValueDef,
};

/// One element of an address path: either a resolved index value or a tuple
/// branch selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathToken<'db> {
    Index(Value<'db>),
    Branch(TupleBranch),
}

/// Which component of a pair a projection selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TupleBranch {
    First,
    Second,
}

/// Closed classification of a value during address resolution.
///
/// Deferred index transforms are a small, closed set; resolution matches on
/// this enum rather than dispatching openly over operations.
#[derive(Clone, Copy, Debug)]
pub enum Transform<'db> {
    /// Index application: push the index, continue on the base.
    Index { base: Value<'db>, index: Value<'db> },
    /// Cast/reinterpret (`array.cast`, `array.in`): pass through unchanged.
    Cast { base: Value<'db> },
    /// Read `i, j` of a split view as flat `i*m + j`.
    Split { base: Value<'db>, m: u64 },
    /// Read flat `k` of a join view as `(k/m, k%m)`.
    Join { base: Value<'db>, m: u64 },
    /// Swap the two most recent index tokens.
    Transpose { base: Value<'db> },
    /// Read window `i`, element `j` as `i*stride + j`.
    Slide { base: Value<'db>, stride: u64 },
    /// Clamp the index into `[0, len-1]` with branch-free selects.
    Pad {
        base: Value<'db>,
        len: u64,
        left: u64,
    },
    /// Paired view over two arrays; a branch selector picks the side.
    Paired {
        first: Value<'db>,
        second: Value<'db>,
    },
    /// Deferred tuple projection: push a branch selector.
    Projection {
        base: Value<'db>,
        branch: TupleBranch,
    },
    /// Pending scalar arithmetic over two resolved operands.
    Binary {
        kind: Symbol,
        lhs: Value<'db>,
        rhs: Value<'db>,
    },
    /// Destination adapter: decompose a flat index into `(k/m, k%m)`.
    SplitAcc { base: Value<'db>, m: u64 },
    /// Destination adapter: combine `i, j` into flat `i*m + j`.
    JoinAcc { base: Value<'db>, m: u64 },
    /// Foreign region to inline at this point.
    Foreign(array::Embed<'db>),
    /// Terminal storage: emit the multi-dimensional access.
    Storage,
    /// Already-computed host value; use as is.
    Ready,
}

/// Second stage of the lowering: resolve every `array.assign` into loads,
/// index arithmetic and stores, inlining embeds at their block positions.
pub(crate) struct AssignLowering<'db> {
    db: &'db dyn salsa::Database,
    /// Rewrites accumulated so far (inlined embeds, rebuilt ops).
    value_map: HashMap<Value<'db>, Value<'db>>,
    /// Types of block arguments (function parameters, loop indices).
    block_arg_types: HashMap<(BlockId, usize), Type<'db>>,
    /// Location used for emitted arithmetic; tracks the assign at hand.
    location: Location<'db>,
}

impl<'db> AssignLowering<'db> {
    pub(crate) fn new(db: &'db dyn salsa::Database, region: &Region<'db>) -> Self {
        let mut block_arg_types = HashMap::new();
        collect_block_arg_types(db, region, &mut block_arg_types);
        Self {
            db,
            value_map: HashMap::new(),
            block_arg_types,
            location: region.location(db),
        }
    }

    /// Rebuild a region, lowering assigns and inlining embeds.
    pub(crate) fn run(&mut self, region: &Region<'db>) -> Result<Region<'db>, LowerError> {
        let db = self.db;
        let mut new_blocks: IdVec<Block<'db>> = IdVec::new();
        for block in region.blocks(db).iter() {
            let mut new_ops: Vec<Operation<'db>> = Vec::new();
            for op in block.operations(db).iter() {
                self.rewrite_op(op, &mut new_ops)?;
            }
            new_blocks.push(Block::new(
                db,
                block.id(db),
                block.location(db),
                block.args(db).clone(),
                new_ops.into_iter().collect(),
            ));
        }
        Ok(Region::new(db, region.location(db), new_blocks))
    }

    fn rewrite_op(
        &mut self,
        op: &Operation<'db>,
        out_ops: &mut Vec<Operation<'db>>,
    ) -> Result<(), LowerError> {
        let db = self.db;
        let remapped = self.remap(op);

        if let Ok(embed) = array::Embed::from_operation(db, remapped) {
            self.location = remapped.location(db);
            let inlined = self.inline_embed(embed, out_ops)?;
            // Point both the original and the remapped result at the
            // inlined value.
            self.value_map.insert(op.result(db, 0), inlined);
            return Ok(());
        }

        if let Ok(assign) = array::Assign::from_operation(db, remapped) {
            self.location = remapped.location(db);
            tracing::trace!("resolving assign into loads and stores");
            return self.lower_assign(assign, out_ops);
        }

        let final_op = if remapped.regions(db).is_empty() {
            remapped
        } else {
            let mut new_regions: IdVec<Region<'db>> = IdVec::new();
            for region in remapped.regions(db).iter() {
                new_regions.push(self.run(region)?);
            }
            remapped.modify(db).regions(new_regions).build()
        };

        if final_op != *op {
            self.map_results(op, &final_op);
        }
        out_ops.push(final_op);
        Ok(())
    }

    fn lower_assign(
        &mut self,
        assign: array::Assign<'db>,
        out_ops: &mut Vec<Operation<'db>>,
    ) -> Result<(), LowerError> {
        let value = assign.value(self.db);
        let target = assign.target(self.db);

        let mut read_path: Vec<PathToken<'db>> = Vec::new();
        let loaded = self.gen_read(value, &mut read_path, out_ops)?;

        let mut write_path: Vec<PathToken<'db>> = Vec::new();
        self.gen_write(target, loaded, &mut write_path, out_ops)
    }

    /// Classify a value for address resolution.
    pub(crate) fn classify(&self, value: Value<'db>) -> Transform<'db> {
        let db = self.db;
        let Some(op) = value.defining_op(db) else {
            // Buffer parameters are storage; loop indices are plain values.
            let is_buffer = self
                .value_type(value)
                .is_some_and(|ty| mem::Ref::from_type(db, ty).is_some());
            return if is_buffer {
                Transform::Storage
            } else {
                Transform::Ready
            };
        };

        if let Ok(idx) = array::Idx::from_operation(db, op) {
            return Transform::Index {
                base: idx.source(db),
                index: idx.index(db),
            };
        }
        if let Ok(cast) = array::Cast::from_operation(db, op) {
            return Transform::Cast {
                base: cast.source(db),
            };
        }
        if let Ok(input) = array::In::from_operation(db, op) {
            return Transform::Cast {
                base: input.source(db),
            };
        }
        if let Ok(view) = array::SplitView::from_operation(db, op) {
            return Transform::Split {
                base: view.source(db),
                m: view.m(db),
            };
        }
        if let Ok(view) = array::JoinView::from_operation(db, op) {
            return Transform::Join {
                base: view.source(db),
                m: view.m(db),
            };
        }
        if let Ok(view) = array::TransposeView::from_operation(db, op) {
            return Transform::Transpose {
                base: view.source(db),
            };
        }
        if let Ok(view) = array::SlideView::from_operation(db, op) {
            return Transform::Slide {
                base: view.source(db),
                stride: view.sp(db),
            };
        }
        if let Ok(view) = array::PadView::from_operation(db, op) {
            return Transform::Pad {
                base: view.source(db),
                len: view.n(db),
                left: view.l(db),
            };
        }
        if let Ok(view) = array::ZipView::from_operation(db, op) {
            return Transform::Paired {
                first: view.lhs(db),
                second: view.rhs(db),
            };
        }
        if let Ok(view) = array::FstView::from_operation(db, op) {
            return Transform::Projection {
                base: view.tuple(db),
                branch: TupleBranch::First,
            };
        }
        if let Ok(view) = array::SndView::from_operation(db, op) {
            return Transform::Projection {
                base: view.tuple(db),
                branch: TupleBranch::Second,
            };
        }
        if let Ok(bin) = array::Binary::from_operation(db, op) {
            return Transform::Binary {
                kind: bin.kind(db),
                lhs: bin.lhs(db),
                rhs: bin.rhs(db),
            };
        }
        if let Ok(acc) = array::SplitAcc::from_operation(db, op) {
            return Transform::SplitAcc {
                base: acc.target(db),
                m: acc.m(db),
            };
        }
        if let Ok(acc) = array::JoinAcc::from_operation(db, op) {
            return Transform::JoinAcc {
                base: acc.target(db),
                m: acc.m(db),
            };
        }
        if let Ok(embed) = array::Embed::from_operation(db, op) {
            return Transform::Foreign(embed);
        }
        if mem::Alloc::from_operation(db, op).is_ok() {
            return Transform::Storage;
        }
        if self
            .value_type(value)
            .is_some_and(|ty| mem::Ref::from_type(db, ty).is_some())
        {
            return Transform::Storage;
        }
        Transform::Ready
    }

    /// Resolve the read side of an assign: descend from `value` toward its
    /// storage, then emit a load (or compute the scalar).
    fn gen_read(
        &mut self,
        value: Value<'db>,
        path: &mut Vec<PathToken<'db>>,
        out_ops: &mut Vec<Operation<'db>>,
    ) -> Result<Value<'db>, LowerError> {
        let value = self.lookup(value);

        match self.classify(value) {
            Transform::Index { base, index } => {
                path.push(PathToken::Index(self.lookup(index)));
                self.gen_read(base, path, out_ops)
            }
            Transform::Cast { base } => self.gen_read(base, path, out_ops),
            Transform::Split { base, m } => {
                let i = self.pop_index(path)?;
                let j = self.pop_index(path)?;
                let combined = self.emit_linear(i, m, j, out_ops);
                path.push(PathToken::Index(combined));
                self.gen_read(base, path, out_ops)
            }
            Transform::Join { base, m } => {
                let k = self.pop_index(path)?;
                let (quotient, remainder) = self.emit_decompose(k, m, out_ops);
                path.push(PathToken::Index(remainder));
                path.push(PathToken::Index(quotient));
                self.gen_read(base, path, out_ops)
            }
            Transform::Transpose { base } => {
                let a = self.pop_token(path)?;
                let b = self.pop_token(path)?;
                path.push(a);
                path.push(b);
                self.gen_read(base, path, out_ops)
            }
            Transform::Slide { base, stride } => {
                let i = self.pop_index(path)?;
                let j = self.pop_index(path)?;
                let combined = self.emit_linear(i, stride, j, out_ops);
                path.push(PathToken::Index(combined));
                self.gen_read(base, path, out_ops)
            }
            Transform::Pad { base, len, left } => {
                let i = self.pop_index(path)?;
                let clamped = self.emit_clamp(i, left, len, out_ops);
                path.push(PathToken::Index(clamped));
                self.gen_read(base, path, out_ops)
            }
            Transform::Paired { first, second } => {
                // The branch selector sits just below the innermost index.
                let top = self.pop_token(path)?;
                let branch = match self.pop_token(path)? {
                    PathToken::Branch(branch) => branch,
                    PathToken::Index(_) => {
                        return Err(LowerError::Malformed {
                            op: "array.zip_view".to_owned(),
                            message: "a paired view was read without a projection".to_owned(),
                        });
                    }
                };
                path.push(top);
                match branch {
                    TupleBranch::First => self.gen_read(first, path, out_ops),
                    TupleBranch::Second => self.gen_read(second, path, out_ops),
                }
            }
            Transform::Projection { base, branch } => {
                path.push(PathToken::Branch(branch));
                self.gen_read(base, path, out_ops)
            }
            Transform::Binary { kind, lhs, rhs } => {
                let mut lhs_path = Vec::new();
                let lhs_value = self.gen_read(lhs, &mut lhs_path, out_ops)?;
                let mut rhs_path = Vec::new();
                let rhs_value = self.gen_read(rhs, &mut rhs_path, out_ops)?;
                self.emit_binary(kind, lhs_value, rhs_value, out_ops)
            }
            Transform::Foreign(embed) => {
                let inlined = self.inline_embed(embed, out_ops)?;
                self.gen_read(inlined, path, out_ops)
            }
            Transform::Storage => Ok(self.emit_load(value, path, out_ops)),
            Transform::Ready => Ok(value),
            Transform::SplitAcc { .. } | Transform::JoinAcc { .. } => Err(LowerError::Malformed {
                op: "array.assign".to_owned(),
                message: "destination adapter found on the value side".to_owned(),
            }),
        }
    }

    /// Resolve the write side of an assign: descend from the destination
    /// toward storage, then emit the store.
    fn gen_write(
        &mut self,
        target: Value<'db>,
        value: Value<'db>,
        path: &mut Vec<PathToken<'db>>,
        out_ops: &mut Vec<Operation<'db>>,
    ) -> Result<(), LowerError> {
        let target = self.lookup(target);

        match self.classify(target) {
            Transform::Index { base, index } => {
                path.push(PathToken::Index(self.lookup(index)));
                self.gen_write(base, value, path, out_ops)
            }
            Transform::Cast { base } => self.gen_write(base, value, path, out_ops),
            Transform::JoinAcc { base, m } => {
                let i = self.pop_index(path)?;
                let j = self.pop_index(path)?;
                let combined = self.emit_linear(i, m, j, out_ops);
                path.push(PathToken::Index(combined));
                self.gen_write(base, value, path, out_ops)
            }
            Transform::SplitAcc { base, m } => {
                let k = self.pop_index(path)?;
                let (quotient, remainder) = self.emit_decompose(k, m, out_ops);
                path.push(PathToken::Index(remainder));
                path.push(PathToken::Index(quotient));
                self.gen_write(base, value, path, out_ops)
            }
            Transform::Transpose { base } => {
                let a = self.pop_token(path)?;
                let b = self.pop_token(path)?;
                path.push(a);
                path.push(b);
                self.gen_write(base, value, path, out_ops)
            }
            Transform::Foreign(embed) => {
                let inlined = self.inline_embed(embed, out_ops)?;
                self.gen_write(inlined, value, path, out_ops)
            }
            Transform::Storage => {
                self.emit_store(target, value, path, out_ops);
                Ok(())
            }
            _ => Err(LowerError::Malformed {
                op: "array.assign".to_owned(),
                message: "unresolvable store destination".to_owned(),
            }),
        }
    }

    /// Inline an embed region at the current position, wiring its block
    /// arguments to resolved operand values. Inlining is memoised so a
    /// region shared by several chains is spliced exactly once.
    fn inline_embed(
        &mut self,
        embed: array::Embed<'db>,
        out_ops: &mut Vec<Operation<'db>>,
    ) -> Result<Value<'db>, LowerError> {
        let db = self.db;
        let result = embed.result(db);
        if let Some(&inlined) = self.value_map.get(&result) {
            return Ok(inlined);
        }

        let mut resolved = Vec::with_capacity(embed.captured(db).len());
        for &captured in embed.captured(db) {
            let mut path = Vec::new();
            resolved.push(self.gen_read(captured, &mut path, out_ops)?);
        }

        let block = embed.body(db).entry(db).ok_or_else(|| LowerError::Malformed {
            op: "array.embed".to_owned(),
            message: "missing body block".to_owned(),
        })?;
        for (i, &operand) in resolved.iter().enumerate() {
            self.value_map.insert(block.arg(db, i), operand);
        }

        for op in block.operations(db).iter() {
            if array::Yield::from_operation(db, *op).is_ok() {
                continue;
            }
            let remapped = self.remap(op);
            if remapped != *op {
                self.map_results(op, &remapped);
            }
            out_ops.push(remapped);
        }

        let yielded = embed.yielded(db).ok_or_else(|| LowerError::Malformed {
            op: "array.embed".to_owned(),
            message: "body is not terminated by a yield".to_owned(),
        })?;
        let inlined = self.lookup(yielded);
        self.value_map.insert(result, inlined);
        Ok(inlined)
    }

    // === Emission helpers ===

    /// `i * factor + j` over indices.
    fn emit_linear(
        &self,
        i: Value<'db>,
        factor: u64,
        j: Value<'db>,
        out_ops: &mut Vec<Operation<'db>>,
    ) -> Value<'db> {
        let db = self.db;
        let index_ty = core::Index::new(db).as_type();
        let factor_const = arith::Const::index(db, self.location, factor);
        out_ops.push(factor_const.as_operation());
        let scaled = arith::mul(db, self.location, i, factor_const.result(db), index_ty);
        out_ops.push(scaled.as_operation());
        let combined = arith::add(db, self.location, scaled.result(db), j, index_ty);
        out_ops.push(combined.as_operation());
        combined.result(db)
    }

    /// `(k / m, k % m)` over indices. Indices are never negative, so plain
    /// unsigned division and remainder suffice.
    fn emit_decompose(
        &self,
        k: Value<'db>,
        m: u64,
        out_ops: &mut Vec<Operation<'db>>,
    ) -> (Value<'db>, Value<'db>) {
        let db = self.db;
        let index_ty = core::Index::new(db).as_type();
        let m_const = arith::Const::index(db, self.location, m);
        out_ops.push(m_const.as_operation());
        let quotient = arith::div(db, self.location, k, m_const.result(db), index_ty);
        out_ops.push(quotient.as_operation());
        let remainder = arith::rem(db, self.location, k, m_const.result(db), index_ty);
        out_ops.push(remainder.as_operation());
        (quotient.result(db), remainder.result(db))
    }

    /// `select(i < left, 0, select(i < left+len, i-left, len-1))`.
    ///
    /// Both arms are always computed; there is deliberately no control flow
    /// at this granularity.
    fn emit_clamp(
        &self,
        i: Value<'db>,
        left: u64,
        len: u64,
        out_ops: &mut Vec<Operation<'db>>,
    ) -> Value<'db> {
        let db = self.db;
        let index_ty = core::Index::new(db).as_type();
        let i1_ty = core::I1::new(db).as_type();

        let left_const = arith::Const::index(db, self.location, left);
        let bound_const = arith::Const::index(db, self.location, left + len);
        let last_const = arith::Const::index(db, self.location, len.saturating_sub(1));
        let zero_const = arith::Const::index(db, self.location, 0);
        out_ops.extend([
            left_const.as_operation(),
            bound_const.as_operation(),
            last_const.as_operation(),
            zero_const.as_operation(),
        ]);

        let shifted = arith::sub(db, self.location, i, left_const.result(db), index_ty);
        let below = arith::cmp_lt(db, self.location, i, left_const.result(db), i1_ty);
        let within = arith::cmp_lt(db, self.location, i, bound_const.result(db), i1_ty);
        out_ops.extend([
            shifted.as_operation(),
            below.as_operation(),
            within.as_operation(),
        ]);

        let upper = arith::select(
            db,
            self.location,
            within.result(db),
            shifted.result(db),
            last_const.result(db),
            index_ty,
        );
        out_ops.push(upper.as_operation());
        let clamped = arith::select(
            db,
            self.location,
            below.result(db),
            zero_const.result(db),
            upper.result(db),
            index_ty,
        );
        out_ops.push(clamped.as_operation());
        clamped.result(db)
    }

    fn emit_binary(
        &self,
        kind: Symbol,
        lhs: Value<'db>,
        rhs: Value<'db>,
        out_ops: &mut Vec<Operation<'db>>,
    ) -> Result<Value<'db>, LowerError> {
        let db = self.db;
        let f32_ty = core::F32::new(db).as_type();
        let op = if kind == "add" {
            arith::add(db, self.location, lhs, rhs, f32_ty).as_operation()
        } else if kind == "mul" {
            arith::mul(db, self.location, lhs, rhs, f32_ty).as_operation()
        } else {
            return Err(LowerError::Malformed {
                op: "array.binary".to_owned(),
                message: format!("unknown operator kind {kind}"),
            });
        };
        out_ops.push(op);
        Ok(op.result(db, 0))
    }

    /// Combine the collected index tokens into one load.
    fn emit_load(
        &self,
        storage: Value<'db>,
        path: &[PathToken<'db>],
        out_ops: &mut Vec<Operation<'db>>,
    ) -> Value<'db> {
        let db = self.db;
        let indices = collect_indices(path);
        let element_ty = self
            .value_type(storage)
            .and_then(|ty| mem::Ref::from_type(db, ty))
            .map(|r| r.element(db))
            .unwrap_or_else(|| core::F32::new(db).as_type());
        let load = mem::load(db, self.location, storage, indices, element_ty);
        out_ops.push(load.as_operation());
        load.result(db)
    }

    /// Combine the collected index tokens into one store. If the index count
    /// exceeds the storage's declared rank, the outermost index is dropped
    /// (the singleton-accumulator fallback).
    fn emit_store(
        &self,
        storage: Value<'db>,
        value: Value<'db>,
        path: &[PathToken<'db>],
        out_ops: &mut Vec<Operation<'db>>,
    ) {
        let db = self.db;
        let mut indices = collect_indices(path);
        if let Some(rank) = self
            .value_type(storage)
            .and_then(|ty| mem::ref_rank(db, ty))
            && indices.len() > rank
        {
            indices.remove(0);
        }
        let store = mem::store(db, self.location, storage, value, indices);
        out_ops.push(store.as_operation());
    }

    // === Bookkeeping ===

    fn lookup(&self, value: Value<'db>) -> Value<'db> {
        let mut current = value;
        let mut hops = 0;
        while let Some(&mapped) = self.value_map.get(&current) {
            current = mapped;
            hops += 1;
            debug_assert!(hops < 10_000, "value map cycle");
        }
        current
    }

    fn remap(&self, op: &Operation<'db>) -> Operation<'db> {
        let db = self.db;
        let operands = op.operands(db);
        let mut new_operands: IdVec<Value<'db>> = IdVec::new();
        let mut changed = false;
        for &operand in operands.iter() {
            let mapped = self.lookup(operand);
            new_operands.push(mapped);
            changed |= mapped != operand;
        }
        if !changed {
            return *op;
        }
        op.modify(db).operands(new_operands).build()
    }

    fn map_results(&mut self, old_op: &Operation<'db>, new_op: &Operation<'db>) {
        let db = self.db;
        let count = old_op.results(db).len().min(new_op.results(db).len());
        for i in 0..count {
            let old = old_op.result(db, i);
            let new = new_op.result(db, i);
            if old != new {
                self.value_map.insert(old, new);
            }
        }
    }

    fn value_type(&self, value: Value<'db>) -> Option<Type<'db>> {
        match value.def(self.db) {
            ValueDef::OpResult(op) => op.results(self.db).first().copied(),
            ValueDef::BlockArg(block_id) => self
                .block_arg_types
                .get(&(block_id, value.index(self.db)))
                .copied(),
        }
    }

    fn pop_index(&self, path: &mut Vec<PathToken<'db>>) -> Result<Value<'db>, LowerError> {
        match path.pop() {
            Some(PathToken::Index(value)) => Ok(value),
            other => Err(LowerError::Malformed {
                op: "address path".to_owned(),
                message: format!("expected an index token, found {other:?}"),
            }),
        }
    }

    fn pop_token(&self, path: &mut Vec<PathToken<'db>>) -> Result<PathToken<'db>, LowerError> {
        path.pop().ok_or_else(|| LowerError::Malformed {
            op: "address path".to_owned(),
            message: "expected a token, found an empty path".to_owned(),
        })
    }
}

/// The index values of a path, outermost dimension first. Pure branch
/// selectors are discarded.
fn collect_indices<'db>(path: &[PathToken<'db>]) -> Vec<Value<'db>> {
    path.iter()
        .rev()
        .filter_map(|token| match token {
            PathToken::Index(value) => Some(*value),
            PathToken::Branch(_) => None,
        })
        .collect()
}

fn collect_block_arg_types<'db>(
    db: &'db dyn salsa::Database,
    region: &Region<'db>,
    map: &mut HashMap<(BlockId, usize), Type<'db>>,
) {
    for block in region.blocks(db).iter() {
        let block_id = block.id(db);
        for (idx, ty) in block.args(db).iter().enumerate() {
            map.insert((block_id, idx), *ty);
        }
        for op in block.operations(db).iter() {
            for nested in op.regions(db).iter() {
                collect_block_arg_types(db, nested, map);
            }
        }
    }
}
