//! Arithmetic and string concatenation.

use super::Vm;
use crate::{bytecode::op::Opcode, error::Fault, tracer::VmTracer, value::Value};

/// Numeric view of an operand.
#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(Self::Int(*i)),
            Value::Float(f) => Some(Self::Float(*f)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

fn symbol(op: Opcode) -> &'static str {
    match op {
        Opcode::Add => "+",
        Opcode::Subtract => "-",
        Opcode::Multiply => "*",
        Opcode::Divide => "/",
        _ => "%",
    }
}

/// `lhs op rhs` for the five arithmetic opcodes.
///
/// Two integers give an integer (checked; `/` truncates). A double on either
/// side promotes the result to a double.
pub(super) fn arithmetic(op: Opcode, lhs: &Value, rhs: &Value) -> Result<Value, Fault> {
    let sym = symbol(op);
    let Some(l) = Number::of(lhs) else {
        return Err(Fault::type_error(format!(
            "lhs for '{sym}' must be Number, got {}",
            lhs.type_name()
        )));
    };
    let Some(r) = Number::of(rhs) else {
        return Err(Fault::type_error(format!(
            "rhs for '{sym}' must be Number, got {}",
            rhs.type_name()
        )));
    };
    match (l, r) {
        (Number::Int(x), Number::Int(y)) => integer(op, x, y).map(Value::Int),
        _ => Ok(Value::Float(float(op, l.as_f64(), r.as_f64()))),
    }
}

fn integer(op: Opcode, x: i64, y: i64) -> Result<i64, Fault> {
    if matches!(op, Opcode::Divide | Opcode::Modulo) && y == 0 {
        return Err(Fault::type_error(format!("integer division by zero in '{}'", symbol(op))));
    }
    let result = match op {
        Opcode::Add => x.checked_add(y),
        Opcode::Subtract => x.checked_sub(y),
        Opcode::Multiply => x.checked_mul(y),
        Opcode::Divide => x.checked_div(y),
        _ => x.checked_rem(y),
    };
    result.ok_or_else(|| Fault::type_error(format!("integer overflow in '{}'", symbol(op))))
}

fn float(op: Opcode, x: f64, y: f64) -> f64 {
    match op {
        Opcode::Add => x + y,
        Opcode::Subtract => x - y,
        Opcode::Multiply => x * y,
        Opcode::Divide => x / y,
        _ => x % y,
    }
}

impl<Tr: VmTracer> Vm<'_, Tr> {
    /// `a <- str(a) ~ str(b)`; each null side warns and contributes nothing.
    pub(super) fn concat(&mut self, a: u32, b: u32) -> Result<(), Fault> {
        let lhs = self.reg(a)?.clone();
        let rhs = self.reg(b)?.clone();
        let mut text = String::new();
        for side in [&lhs, &rhs] {
            if side.is_null() {
                self.warn("null in string concatenation.");
            } else {
                text.push_str(&side.to_text());
            }
        }
        self.set(a, Value::from(text))
    }
}
