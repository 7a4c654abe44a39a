//! Compact textual form of the IR, for tests and debugging.
//!
//! Values are numbered `%0, %1, ...` in definition order; block arguments
//! print as `%argN.M` keyed by block. The form is intentionally minimal:
//! there is no parser for it.

use std::collections::HashMap;
use std::fmt::Write;

use crate::{Attribute, Block, Operation, Region, Type, Value, ValueDef};

/// Print an operation tree (usually a module) as text.
pub fn print_operation<'db>(db: &'db dyn salsa::Database, op: Operation<'db>) -> String {
    let mut printer = Printer {
        db,
        out: String::new(),
        names: HashMap::new(),
        block_numbers: HashMap::new(),
        next_value: 0,
        next_block: 0,
    };
    printer.op(op, 0);
    printer.out
}

struct Printer<'db> {
    db: &'db dyn salsa::Database,
    out: String,
    names: HashMap<Value<'db>, usize>,
    block_numbers: HashMap<crate::BlockId, usize>,
    next_value: usize,
    next_block: usize,
}

impl<'db> Printer<'db> {
    fn op(&mut self, op: Operation<'db>, indent: usize) {
        let db = self.db;
        for _ in 0..indent {
            self.out.push_str("  ");
        }

        // Results
        let num_results = op.results(db).len();
        for i in 0..num_results {
            let value = op.result(db, i);
            let id = self.name(value);
            if i > 0 {
                self.out.push_str(", ");
            }
            let _ = write!(self.out, "%{id}");
        }
        if num_results > 0 {
            self.out.push_str(" = ");
        }

        let _ = write!(self.out, "{}.{}", op.dialect(db), op.name(db));

        // Operands
        if !op.operands(db).is_empty() {
            self.out.push('(');
            let operands: Vec<String> = op
                .operands(db)
                .iter()
                .map(|v| self.value_ref(*v))
                .collect();
            self.out.push_str(&operands.join(", "));
            self.out.push(')');
        }

        // Attributes
        if !op.attributes(db).is_empty() {
            self.out.push_str(" {");
            let mut first = true;
            let attrs: Vec<(String, String)> = op
                .attributes(db)
                .iter()
                .map(|(k, v)| (k.to_string(), format_attr(db, v)))
                .collect();
            for (key, value) in attrs {
                if !first {
                    self.out.push_str(", ");
                }
                first = false;
                let _ = write!(self.out, "{key} = {value}");
            }
            self.out.push('}');
        }

        // Result types
        if num_results > 0 {
            self.out.push_str(" : ");
            let types: Vec<String> = op
                .results(db)
                .iter()
                .map(|ty| format_type(db, *ty))
                .collect();
            self.out.push_str(&types.join(", "));
        }
        self.out.push('\n');

        // Regions
        for region in op.regions(db).iter() {
            self.region(*region, indent + 1);
        }
    }

    fn region(&mut self, region: Region<'db>, indent: usize) {
        let db = self.db;
        for block in region.blocks(db).iter() {
            self.block(*block, indent);
        }
    }

    fn block(&mut self, block: Block<'db>, indent: usize) {
        let db = self.db;
        let number = self.block_number(block);
        for _ in 0..indent {
            self.out.push_str("  ");
        }
        let _ = write!(self.out, "^{number}");
        if !block.args(db).is_empty() {
            self.out.push('(');
            let args: Vec<String> = block
                .args(db)
                .iter()
                .enumerate()
                .map(|(i, ty)| {
                    let value = block.arg(db, i);
                    let name = self.value_ref(value);
                    format!("{name}: {}", format_type(db, *ty))
                })
                .collect();
            self.out.push_str(&args.join(", "));
            self.out.push(')');
        }
        self.out.push_str(":\n");
        for op in block.operations(db).iter() {
            self.op(*op, indent + 1);
        }
    }

    fn name(&mut self, value: Value<'db>) -> usize {
        if let Some(&id) = self.names.get(&value) {
            return id;
        }
        let id = self.next_value;
        self.next_value += 1;
        self.names.insert(value, id);
        id
    }

    fn block_number(&mut self, block: Block<'db>) -> usize {
        let id = block.id(self.db);
        if let Some(&n) = self.block_numbers.get(&id) {
            return n;
        }
        let n = self.next_block;
        self.next_block += 1;
        self.block_numbers.insert(id, n);
        n
    }

    fn value_ref(&mut self, value: Value<'db>) -> String {
        match value.def(self.db) {
            ValueDef::OpResult(_) => format!("%{}", self.name(value)),
            ValueDef::BlockArg(block_id) => {
                let n = self
                    .block_numbers
                    .get(&block_id)
                    .copied()
                    .unwrap_or(usize::MAX);
                if n == usize::MAX {
                    format!("%arg?.{}", value.index(self.db))
                } else {
                    format!("%arg{n}.{}", value.index(self.db))
                }
            }
        }
    }
}

fn format_attr<'db>(db: &'db dyn salsa::Database, attr: &Attribute<'db>) -> String {
    match attr {
        Attribute::Bool(v) => v.to_string(),
        Attribute::IntBits(v) => v.to_string(),
        Attribute::FloatBits(bits) => format!("{:?}", f32::from_bits(*bits as u32)),
        Attribute::String(s) => format!("{s:?}"),
        Attribute::Symbol(s) => format!("@{s}"),
        Attribute::Type(ty) => format_type(db, *ty),
        Attribute::List(items) => {
            let inner: Vec<String> = items.iter().map(|a| format_attr(db, a)).collect();
            format!("[{}]", inner.join(", "))
        }
    }
}

/// Format a type as text.
pub fn format_type<'db>(db: &'db dyn salsa::Database, ty: Type<'db>) -> String {
    let mut s = format!("{}.{}", ty.dialect(db), ty.name(db));
    let params = ty.params(db);
    if !params.is_empty() {
        let inner: Vec<String> = params.iter().map(|p| format_type(db, *p)).collect();
        let _ = write!(s, "<{}>", inner.join(", "));
    }
    let attrs = ty.attrs(db);
    if !attrs.is_empty() {
        let inner: Vec<String> = attrs
            .iter()
            .map(|(k, v)| format!("{k} = {}", format_attr(db, v)))
            .collect();
        let _ = write!(s, "{{{}}}", inner.join(", "));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{arith, core};
    use crate::types::DialectType;
    use crate::{DialectOp, Location, Symbol};

    #[salsa::tracked]
    fn printable_module(db: &dyn salsa::Database) -> core::Module<'_> {
        let location = Location::synthetic(db);
        core::Module::build(db, location, Symbol::new("printed"), |top| {
            let a = top.op(arith::Const::f32(db, location, 1.5));
            let b = top.op(arith::Const::f32(db, location, 2.5));
            top.op(arith::add(
                db,
                location,
                a.result(db),
                b.result(db),
                core::F32::new(db).as_type(),
            ));
        })
    }

    #[test]
    fn prints_ops_with_numbered_values() {
        salsa::DatabaseImpl::default().attach(|db| {
            let module = printable_module(db);
            let text = print_operation(db, module.as_operation());
            assert!(text.contains("core.module"));
            assert!(text.contains("arith.const"));
            assert!(text.contains("arith.add(%0, %1)"));
            assert!(text.contains("core.f32"));
        });
    }
}
