//! Interpreter for the lowered imperative subset.
//!
//! Executes `scf`/`arith`/`mem` operations inside a `func.func` against
//! concrete buffers, used by integration tests to check lowering results
//! end-to-end. `scf.par_for` runs sequentially: iterations are independent
//! by construction, so sequential execution observes the same final memory.

use std::collections::HashMap;

use loft_ir::dialect::{core, func, mem};
use loft_ir::{Attribute, Block, DialectOp, DialectType, Operation, Value};

/// A concrete row-major buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Buffer {
    pub shape: Vec<u64>,
    pub data: Vec<f32>,
}

impl Buffer {
    /// A zero-initialised buffer of the given shape. An empty shape is a
    /// single scalar cell.
    pub fn zeroed(shape: &[u64]) -> Self {
        let len = shape.iter().product::<u64>() as usize;
        Buffer {
            shape: shape.to_vec(),
            data: vec![0.0; len.max(1)],
        }
    }

    /// A buffer with explicit contents.
    pub fn from_values(shape: &[u64], values: &[f32]) -> Self {
        let len = shape.iter().product::<u64>().max(1) as usize;
        assert_eq!(len, values.len(), "shape and contents disagree");
        Buffer {
            shape: shape.to_vec(),
            data: values.to_vec(),
        }
    }

    fn offset(&self, indices: &[u64]) -> Result<usize, EvalError> {
        if indices.len() != self.shape.len() {
            return Err(EvalError::RankMismatch {
                expected: self.shape.len(),
                actual: indices.len(),
            });
        }
        let mut offset = 0u64;
        for (i, (&index, &dim)) in indices.iter().zip(self.shape.iter()).enumerate() {
            if index >= dim {
                return Err(EvalError::OutOfBounds {
                    dimension: i,
                    index,
                    size: dim,
                });
            }
            offset = offset * dim + index;
        }
        Ok(offset as usize)
    }
}

/// A runtime value.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Val {
    F32(f32),
    Index(u64),
    Bool(bool),
    Ref(usize),
}

/// Evaluation failures.
#[derive(Debug, Clone, PartialEq, derive_more::Display, derive_more::Error)]
pub enum EvalError {
    #[display("operation {op} was not lowered before evaluation")]
    UnloweredOperation { op: String },
    #[display("unsupported operation {op}")]
    UnsupportedOperation { op: String },
    #[display("value used before definition")]
    UndefinedValue,
    #[display("expected {expected} indices, got {actual}")]
    RankMismatch { expected: usize, actual: usize },
    #[display("index {index} out of bounds for dimension {dimension} of size {size}")]
    OutOfBounds {
        dimension: usize,
        index: u64,
        size: u64,
    },
    #[display("type mismatch in {context}")]
    TypeMismatch { context: &'static str },
}

/// Run a lowered function against the given input buffers; the buffers are
/// bound to the function parameters in order. Returns the final buffer
/// contents (inputs first, then any allocations, in allocation order).
pub fn run_func<'db>(
    db: &'db dyn salsa::Database,
    f: func::Func<'db>,
    inputs: Vec<Buffer>,
) -> Result<Vec<Buffer>, EvalError> {
    let Some(entry) = f.entry_block(db) else {
        return Ok(inputs);
    };

    let mut interp = Interpreter {
        db,
        env: HashMap::new(),
        memory: inputs,
    };
    for i in 0..entry.args(db).len() {
        interp.env.insert(entry.arg(db, i), Val::Ref(i));
    }
    interp.exec_block(entry)?;
    Ok(interp.memory)
}

struct Interpreter<'db> {
    db: &'db dyn salsa::Database,
    env: HashMap<Value<'db>, Val>,
    memory: Vec<Buffer>,
}

impl<'db> Interpreter<'db> {
    fn exec_block(&mut self, block: Block<'db>) -> Result<(), EvalError> {
        let db = self.db;
        for &op in block.operations(db).iter() {
            self.exec_op(op)?;
        }
        Ok(())
    }

    fn exec_op(&mut self, op: Operation<'db>) -> Result<(), EvalError> {
        let db = self.db;
        let dialect = op.dialect(db);

        if dialect == "arith" {
            return self.exec_arith(op);
        }
        if dialect == "mem" {
            return self.exec_mem(op);
        }
        if dialect == "scf" {
            return self.exec_scf(op);
        }
        if dialect == "func" {
            // func.return carries no values of interest: results live in the
            // output buffers.
            return Ok(());
        }
        if dialect == "array" {
            return Err(EvalError::UnloweredOperation {
                op: op.full_name(db),
            });
        }
        Err(EvalError::UnsupportedOperation {
            op: op.full_name(db),
        })
    }

    fn exec_arith(&mut self, op: Operation<'db>) -> Result<(), EvalError> {
        let db = self.db;
        let name = op.name(db);

        if name == "const" {
            let attr = op
                .get_attr(db, loft_ir::Symbol::new("value"))
                .ok_or(EvalError::TypeMismatch { context: "const" })?;
            let ty = op.results(db)[0];
            let value = if core::Index::from_type(db, ty).is_some() {
                match attr {
                    Attribute::IntBits(v) => Val::Index(*v),
                    _ => return Err(EvalError::TypeMismatch { context: "const" }),
                }
            } else {
                match attr.as_f32() {
                    Some(v) => Val::F32(v),
                    None => return Err(EvalError::TypeMismatch { context: "const" }),
                }
            };
            self.env.insert(op.result(db, 0), value);
            return Ok(());
        }

        if name == "select" {
            let cond = self.read(op.operands(db)[0])?;
            let then = self.read(op.operands(db)[1])?;
            let otherwise = self.read(op.operands(db)[2])?;
            let Val::Bool(cond) = cond else {
                return Err(EvalError::TypeMismatch { context: "select" });
            };
            self.env
                .insert(op.result(db, 0), if cond { then } else { otherwise });
            return Ok(());
        }

        let lhs = self.read(op.operands(db)[0])?;
        let rhs = self.read(op.operands(db)[1])?;
        let value = match (name, lhs, rhs) {
            (n, Val::Index(a), Val::Index(b)) if n == "add" => Val::Index(a + b),
            (n, Val::Index(a), Val::Index(b)) if n == "sub" => Val::Index(a.saturating_sub(b)),
            (n, Val::Index(a), Val::Index(b)) if n == "mul" => Val::Index(a * b),
            (n, Val::Index(a), Val::Index(b)) if n == "div" => Val::Index(a / b),
            (n, Val::Index(a), Val::Index(b)) if n == "rem" => Val::Index(a % b),
            (n, Val::Index(a), Val::Index(b)) if n == "cmp_lt" => Val::Bool(a < b),
            (n, Val::F32(a), Val::F32(b)) if n == "add" => Val::F32(a + b),
            (n, Val::F32(a), Val::F32(b)) if n == "sub" => Val::F32(a - b),
            (n, Val::F32(a), Val::F32(b)) if n == "mul" => Val::F32(a * b),
            (n, Val::F32(a), Val::F32(b)) if n == "div" => Val::F32(a / b),
            (n, Val::F32(a), Val::F32(b)) if n == "rem" => Val::F32(a % b),
            (n, Val::F32(a), Val::F32(b)) if n == "cmp_lt" => Val::Bool(a < b),
            _ => return Err(EvalError::TypeMismatch { context: "arith" }),
        };
        self.env.insert(op.result(db, 0), value);
        Ok(())
    }

    fn exec_mem(&mut self, op: Operation<'db>) -> Result<(), EvalError> {
        let db = self.db;
        let name = op.name(db);

        if let Ok(alloc) = mem::Alloc::from_operation(db, op) {
            let shape = mem::Ref::from_type(db, alloc.result_ty(db))
                .map(|r| r.dims(db))
                .unwrap_or_default();
            let handle = self.memory.len();
            self.memory.push(Buffer::zeroed(&shape));
            self.env.insert(alloc.result(db), Val::Ref(handle));
            return Ok(());
        }
        if let Ok(load) = mem::Load::from_operation(db, op) {
            let handle = self.buffer_of(load.source(db))?;
            let indices = self.indices_of(load.indices(db))?;
            let offset = self.memory[handle].offset(&indices)?;
            let value = self.memory[handle].data[offset];
            self.env.insert(load.result(db), Val::F32(value));
            return Ok(());
        }
        if let Ok(store) = mem::Store::from_operation(db, op) {
            let handle = self.buffer_of(store.target(db))?;
            let indices = self.indices_of(store.indices(db))?;
            let Val::F32(value) = self.read(store.value(db))? else {
                return Err(EvalError::TypeMismatch { context: "store" });
            };
            let offset = self.memory[handle].offset(&indices)?;
            self.memory[handle].data[offset] = value;
            return Ok(());
        }
        if let Ok(fill) = mem::Fill::from_operation(db, op) {
            let handle = self.buffer_of(fill.target(db))?;
            let Val::F32(value) = self.read(fill.value(db))? else {
                return Err(EvalError::TypeMismatch { context: "fill" });
            };
            for cell in &mut self.memory[handle].data {
                *cell = value;
            }
            return Ok(());
        }
        Err(EvalError::UnsupportedOperation {
            op: format!("mem.{name}"),
        })
    }

    fn exec_scf(&mut self, op: Operation<'db>) -> Result<(), EvalError> {
        let db = self.db;
        let name = op.name(db);

        if name == "yield" {
            return Ok(());
        }
        if name == "for" || name == "par_for" {
            let Val::Index(lower) = self.read(op.operands(db)[0])? else {
                return Err(EvalError::TypeMismatch { context: "for" });
            };
            let Val::Index(upper) = self.read(op.operands(db)[1])? else {
                return Err(EvalError::TypeMismatch { context: "for" });
            };
            let Val::Index(step) = self.read(op.operands(db)[2])? else {
                return Err(EvalError::TypeMismatch { context: "for" });
            };
            let body = op.regions(db)[0]
                .entry(db)
                .ok_or(EvalError::TypeMismatch { context: "for" })?;
            let induction = body.arg(db, 0);

            let mut i = lower;
            while i < upper {
                self.env.insert(induction, Val::Index(i));
                self.exec_block(body)?;
                i += step.max(1);
            }
            return Ok(());
        }
        Err(EvalError::UnsupportedOperation {
            op: format!("scf.{name}"),
        })
    }

    fn read(&self, value: Value<'db>) -> Result<Val, EvalError> {
        self.env.get(&value).copied().ok_or(EvalError::UndefinedValue)
    }

    fn buffer_of(&self, value: Value<'db>) -> Result<usize, EvalError> {
        match self.read(value)? {
            Val::Ref(handle) => Ok(handle),
            _ => Err(EvalError::TypeMismatch { context: "buffer" }),
        }
    }

    fn indices_of(&self, values: &[Value<'db>]) -> Result<Vec<u64>, EvalError> {
        values
            .iter()
            .map(|&v| match self.read(v)? {
                Val::Index(i) => Ok(i),
                _ => Err(EvalError::TypeMismatch { context: "index" }),
            })
            .collect()
    }
}
