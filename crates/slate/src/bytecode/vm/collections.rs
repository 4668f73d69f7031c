//! Container construction and FOREACH iteration.

use std::sync::Arc;

use indexmap::IndexMap;

use super::{LoopRecord, Vm};
use crate::{bytecode::op::Opcode, error::Fault, host, tracer::VmTracer, value::Value};

/// Inclusive integer range `lhs..rhs`; empty when `lhs > rhs`.
pub(super) fn range(lhs: &Value, rhs: &Value) -> Result<Value, Fault> {
    let Value::Int(lo) = *lhs else {
        return Err(Fault::type_error(format!(
            "Left side of range construction operator should be Integer, got {}",
            lhs.type_name()
        )));
    };
    let Value::Int(hi) = *rhs else {
        return Err(Fault::type_error(format!(
            "Right side of range construction operator should be Integer, got {}",
            rhs.type_name()
        )));
    };
    Ok((lo..=hi).map(Value::Int).collect())
}

/// Items a FOREACH walks over: array elements, map keys, or host items.
fn iteration_items(source: &Value) -> Result<Arc<Vec<Value>>, Fault> {
    match source {
        Value::Array(items) => Ok(Arc::clone(items)),
        Value::Map(map) => Ok(Arc::new(map.keys().map(|k| Value::from(k.as_str())).collect())),
        Value::Host(obj) => host::iterate(obj.as_ref()).map(Arc::new).ok_or_else(|| {
            Fault::type_error(format!("{} is not iterable", host::describe(obj.as_ref()).name()))
        }),
        Value::Null => Err(Fault::type_error("cannot iterate over null")),
        other => Err(Fault::type_error(format!("{} is not iterable", other.type_name()))),
    }
}

impl<Tr: VmTracer> Vm<'_, Tr> {
    pub(super) fn make_array(&mut self, a: u32, count: u32) -> Result<(), Fault> {
        let items = self.reg_run(a, count)?.to_vec();
        self.set(a, Value::from(items))
    }

    /// Keys are stringified; a later duplicate key overwrites the earlier value.
    pub(super) fn make_map(&mut self, a: u32, pairs: u32) -> Result<(), Fault> {
        let len = pairs
            .checked_mul(2)
            .ok_or_else(|| Fault::internal("map literal too large"))?;
        let mut map = IndexMap::with_capacity(pairs as usize);
        for pair in self.reg_run(a, len)?.chunks_exact(2) {
            if pair[0].is_null() {
                return Err(Fault::type_error("map key is null"));
            }
            map.insert(pair[0].to_text().into_owned(), pair[1].clone());
        }
        self.set(a, Value::from(map))
    }

    /// Pushes a loop over register `r` and stores the first item there.
    ///
    /// Returns `false`, pushing nothing, when the source is empty.
    pub(super) fn iter_start(&mut self, r: u32) -> Result<bool, Fault> {
        let items = iteration_items(self.reg(r)?)?;
        let Some(first) = items.first().cloned() else {
            return Ok(false);
        };
        self.set(r, first)?;
        self.loops.push(LoopRecord { items, index: 0 });
        self.tracer.on_loop_push(self.loops.len());
        Ok(true)
    }

    /// Advances the innermost loop, storing the next item in register `r`.
    ///
    /// Returns `false` when the loop is exhausted; the record stays on the
    /// stack for the following `LOOP_POP`.
    pub(super) fn iter_next(&mut self, r: u32) -> Result<bool, Fault> {
        let record = self
            .loops
            .last_mut()
            .ok_or_else(|| Fault::internal("ITER_NEXT with an empty loop stack"))?;
        record.index += 1;
        let Some(item) = record.items.get(record.index).cloned() else {
            return Ok(false);
        };
        self.set(r, item)?;
        Ok(true)
    }

    /// `loop.count`, `loop.index` and `loop.has_next` of the innermost FOREACH.
    pub(super) fn loop_info(&self, op: Opcode) -> Result<Value, Fault> {
        let name = match op {
            Opcode::LoopCount => "loop.count",
            Opcode::LoopIndex => "loop.index",
            _ => "loop.has_next",
        };
        let Some(record) = self.loops.last() else {
            return Err(Fault::type_error(format!("{name} used outside of FOREACH")));
        };
        let position = |n: usize| i64::try_from(n).map(Value::Int).map_err(|_| Fault::internal("loop too long"));
        match op {
            Opcode::LoopCount => position(record.index + 1),
            Opcode::LoopIndex => position(record.index),
            _ => Ok(Value::Bool(record.index + 1 < record.items.len())),
        }
    }
}
