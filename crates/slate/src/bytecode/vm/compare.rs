//! Ordering comparisons.
//!
//! Equality lives on [`Value`]'s `PartialEq`; only `< <= > >=` need a total
//! order, and the left operand decides which one applies.

use std::cmp::Ordering;

use crate::{bytecode::op::Opcode, error::Fault, value::Value};

/// Evaluates `lhs op rhs` for `Gt`, `Ge`, `Lt` and `Le`.
pub(super) fn ordering(op: Opcode, lhs: &Value, rhs: &Value) -> Result<bool, Fault> {
    let order = compare(lhs, rhs)?;
    Ok(match op {
        Opcode::Gt => order == Ordering::Greater,
        Opcode::Ge => order != Ordering::Less,
        Opcode::Lt => order == Ordering::Less,
        _ => order != Ordering::Greater,
    })
}

fn compare(lhs: &Value, rhs: &Value) -> Result<Ordering, Fault> {
    let order = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Str(a) | Value::Raw(a), Value::Str(b) | Value::Raw(b)) => Some(a.cmp(b)),
        (Value::Null, _) => return Err(Fault::type_error("cannot order null")),
        (Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::Str(_) | Value::Raw(_), _) => {
            return Err(Fault::type_error(format!(
                "cannot compare {} with {}",
                lhs.type_name(),
                rhs.type_name()
            )));
        }
        _ => {
            return Err(Fault::type_error(format!("{} is not orderable", lhs.type_name())));
        }
    };
    order.ok_or_else(|| Fault::type_error("cannot order NaN"))
}
