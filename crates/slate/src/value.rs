//! Runtime value model.
//!
//! Values are cheap to clone: strings and containers are reference counted so
//! moving a value between registers never copies its payload.

use std::{borrow::Cow, fmt, sync::Arc};

use indexmap::IndexMap;

use crate::host::HostObject;

/// Variable environment of one render: a flat, insertion-ordered mapping.
pub type Vars = IndexMap<String, Value>;

/// A template runtime value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    /// Pre-escaped text, appended to the output verbatim.
    Raw(Arc<str>),
    Array(Arc<Vec<Value>>),
    Map(Arc<IndexMap<String, Value>>),
    /// An opaque host object, inspected through its [`TypeDescriptor`](crate::TypeDescriptor).
    Host(Arc<dyn HostObject>),
}

impl Value {
    /// Wraps text so the output stage skips escaping it.
    #[must_use]
    pub fn raw(text: impl Into<Arc<str>>) -> Self {
        Self::Raw(text.into())
    }

    /// Wraps a host object.
    #[must_use]
    pub fn host(object: impl HostObject) -> Self {
        Self::Host(Arc::new(object))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Only `null` and `false` are false; integer zero and empty strings are true.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Null | Self::Bool(false))
    }

    /// Short type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "integer",
            Self::Float(_) => "double",
            Self::Str(_) => "string",
            Self::Raw(_) => "raw string",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Host(obj) => crate::host::describe(obj.as_ref()).name(),
        }
    }

    /// Text form of the value; `null` becomes the empty string.
    ///
    /// Callers that must report a null do so before calling this.
    #[must_use]
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            Self::Null => Cow::Borrowed(""),
            Self::Str(s) | Self::Raw(s) => Cow::Borrowed(s),
            other => Cow::Owned(other.to_string()),
        }
    }

    /// Returns the string payload of `Str` and `Raw` values.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::Raw(s) => Some(s),
            _ => None,
        }
    }

    /// Converts JSON data into a template value. Objects keep their key order.
    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map_or(Self::Null, Self::Float),
            },
            serde_json::Value::String(s) => Self::Str(s.into()),
            serde_json::Value::Array(items) => Self::Array(Arc::new(items.into_iter().map(Self::from_json).collect())),
            serde_json::Value::Object(obj) => Self::Map(Arc::new(
                obj.into_iter().map(|(k, v)| (k, Self::from_json(v))).collect(),
            )),
        }
    }

    /// Builds a variable environment from a JSON object.
    ///
    /// Returns `None` when `json` is not an object.
    #[must_use]
    pub fn vars_from_json(json: serde_json::Value) -> Option<Vars> {
        match json {
            serde_json::Value::Object(obj) => Some(obj.into_iter().map(|(k, v)| (k, Self::from_json(v))).collect()),
            _ => None,
        }
    }

    /// Writes a value nested in a container, where null must stay visible.
    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            other => fmt::Display::fmt(other, f),
        }
    }
}

/// Template equality: `null` equals only `null`, integers and doubles compare
/// numerically, plain and raw strings compare by text, host objects by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Null, _) | (_, Self::Null) => false,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => *a as f64 == *b,
            (Self::Str(a) | Self::Raw(a), Self::Str(b) | Self::Raw(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Host(a), Self::Host(b)) => Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>(),
            _ => false,
        }
    }
}

/// Shortest round-trip text of a double, always in positional notation and
/// with a `.0` for integral values.
fn float_text(v: f64) -> String {
    let mut buffer = ryu::Buffer::new();
    let shortest = buffer.format(v);
    let Some((mantissa, exp)) = shortest.split_once('e') else {
        return shortest.to_owned();
    };
    let Ok(exp) = exp.parse::<i64>() else {
        return shortest.to_owned();
    };
    let (sign, mantissa) = mantissa.strip_prefix('-').map_or(("", mantissa), |m| ("-", m));
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits = format!("{int_part}{frac_part}");
    let point = i64::try_from(int_part.len()).unwrap_or(0) + exp;
    let len = i64::try_from(digits.len()).unwrap_or(0);
    if point <= 0 {
        let zeros = usize::try_from(-point).unwrap_or(0);
        format!("{sign}0.{}{digits}", "0".repeat(zeros))
    } else if point >= len {
        let zeros = usize::try_from(point - len).unwrap_or(0);
        format!("{sign}{digits}{}.0", "0".repeat(zeros))
    } else {
        let (whole, frac) = digits.split_at(usize::try_from(point).unwrap_or(0));
        format!("{sign}{whole}.{frac}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => f.write_str(&float_text(*v)),
            Self::Str(s) | Self::Raw(s) => f.write_str(s),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.fmt_nested(f)?;
                }
                f.write_str("]")
            }
            Self::Map(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}=")?;
                    value.fmt_nested(f)?;
                }
                f.write_str("}")
            }
            Self::Host(obj) => f.write_str(&obj.to_text()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s.into())
    }
}

impl From<Vec<Self>> for Value {
    fn from(items: Vec<Self>) -> Self {
        Self::Array(Arc::new(items))
    }
}

impl From<IndexMap<String, Self>> for Value {
    fn from(map: IndexMap<String, Self>) -> Self {
        Self::Map(Arc::new(map))
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl FromIterator<Self> for Value {
    fn from_iter<I: IntoIterator<Item = Self>>(iter: I) -> Self {
        Self::Array(Arc::new(iter.into_iter().collect()))
    }
}
