//! Attribute access and method calls.
//!
//! Built-in containers answer indexing and a small set of intrinsic methods
//! directly; host objects go through their cached [`TypeDescriptor`](crate::TypeDescriptor).

use std::{borrow::Cow, sync::Arc};

use super::Vm;
use crate::{error::Fault, host, tracer::VmTracer, value::Value};

impl<Tr: VmTracer> Vm<'_, Tr> {
    /// `a <- a[b]`.
    ///
    /// Missing map keys and out-of-range array indices give null. A null
    /// container or a null map key warns and gives null.
    pub(super) fn get_attr(&mut self, a: u32, b: u32) -> Result<(), Fault> {
        let container = self.reg(a)?.clone();
        let key = self.reg(b)?.clone();
        let value = match &container {
            Value::Map(map) => {
                if key.is_null() {
                    self.warn("attr is null");
                    Value::Null
                } else {
                    map.get(&*key.to_text()).cloned().unwrap_or_default()
                }
            }
            Value::Array(items) => {
                let Value::Int(index) = key else {
                    return Err(Fault::type_error(format!(
                        "array index must be an integer, got {}",
                        key.type_name()
                    )));
                };
                resolve_index(index, items.len())
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_default()
            }
            Value::Host(obj) => {
                let Some(name) = key.as_str() else {
                    return Err(Fault::host(format!(
                        "attribute name must be a string, got {}",
                        key.type_name()
                    )));
                };
                host::get_field(obj.as_ref(), name).map_err(Fault::host)?
            }
            Value::Null => {
                self.warn("container is null");
                Value::Null
            }
            other => {
                return Err(Fault::type_error(format!("cannot index into {}", other.type_name())));
            }
        };
        self.set(a, value)
    }

    /// Calls method `a+1` on the object in `a` with `count` arguments from `a+2`.
    pub(super) fn method_call(&mut self, a: u32, count: u32) -> Result<(), Fault> {
        let target = self.reg(a)?.clone();
        let name = match self.reg(a + 1)? {
            Value::Str(s) => Arc::clone(s),
            other => return Err(Fault::internal(format!("method name is {}", other.type_name()))),
        };
        let args = self.reg_run(a + 2, count)?;
        let result = match &target {
            Value::Host(obj) => host::call_method(obj.as_ref(), &name, args).map_err(Fault::host)?,
            Value::Null => return Err(Fault::host(format!("cannot call method '{name}' on null"))),
            other => intrinsic(other, &name, args)?,
        };
        self.set(a, result)
    }
}

/// Array position for `index`, counting negative indices from the end.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    if index >= 0 {
        usize::try_from(index).ok()
    } else {
        len.checked_sub(usize::try_from(index.unsigned_abs()).ok()?)
    }
}

fn length(n: usize) -> Value {
    i64::try_from(n).map_or(Value::Null, Value::Int)
}

/// Methods every built-in value answers.
fn intrinsic(target: &Value, name: &str, args: &[Value]) -> Result<Value, Fault> {
    let type_name = target.type_name();
    let arity = |max: usize| {
        if args.len() > max {
            Err(Fault::host(format!(
                "{type_name}.{name} takes at most {max} argument(s) but {} were given",
                args.len()
            )))
        } else {
            Ok(())
        }
    };
    match (target, name) {
        (Value::Array(items), "size" | "length") => arity(0).map(|()| length(items.len())),
        (Value::Array(items), "first") => arity(0).map(|()| items.first().cloned().unwrap_or_default()),
        (Value::Array(items), "last") => arity(0).map(|()| items.last().cloned().unwrap_or_default()),
        (Value::Array(items), "reverse") => arity(0).map(|()| items.iter().rev().cloned().collect()),
        (Value::Array(items), "join") => {
            arity(1)?;
            let sep = args.first().map_or(Cow::Borrowed(" "), Value::to_text);
            let parts: Vec<_> = items.iter().map(Value::to_text).collect();
            Ok(Value::from(parts.join(sep.as_ref())))
        }
        (Value::Map(map), "size" | "length") => arity(0).map(|()| length(map.len())),
        (Value::Map(map), "keys") => arity(0).map(|()| map.keys().map(|k| Value::from(k.as_str())).collect()),
        (Value::Map(map), "values") => arity(0).map(|()| map.values().cloned().collect()),
        (Value::Map(map), "exists") => {
            arity(1)?;
            let key = args
                .first()
                .ok_or_else(|| Fault::host("map.exists takes 1 argument(s) but 0 were given"))?;
            Ok(Value::Bool(map.contains_key(&*key.to_text())))
        }
        (Value::Str(s) | Value::Raw(s), "size" | "length") => arity(0).map(|()| length(s.chars().count())),
        (Value::Str(s) | Value::Raw(s), "upper") => arity(0).map(|()| Value::from(s.to_uppercase())),
        (Value::Str(s) | Value::Raw(s), "lower") => arity(0).map(|()| Value::from(s.to_lowercase())),
        (Value::Str(s) | Value::Raw(s), "substr") => {
            arity(2)?;
            substr(s, args)
        }
        _ => Err(Fault::host(format!("{type_name} has no method '{name}'"))),
    }
}

/// `substr(start, len?)` in characters; a negative start counts from the end.
fn substr(s: &str, args: &[Value]) -> Result<Value, Fault> {
    let int_arg = |i: usize| match args.get(i) {
        Some(Value::Int(n)) => Ok(Some(*n)),
        None => Ok(None),
        Some(other) => Err(Fault::host(format!(
            "string.substr expects integer arguments, got {}",
            other.type_name()
        ))),
    };
    let Some(start) = int_arg(0)? else {
        return Err(Fault::host("string.substr takes 1 or 2 argument(s) but 0 were given"));
    };
    let chars = s.chars().count();
    let start = resolve_index(start, chars).unwrap_or(0).min(chars);
    let take = match int_arg(1)? {
        Some(n) => usize::try_from(n).unwrap_or(0),
        None => chars,
    };
    Ok(Value::from(s.chars().skip(start).take(take).collect::<String>()))
}
