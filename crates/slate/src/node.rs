//! Syntax tree consumed by the compiler.
//!
//! The lexer and parser live outside this crate: a host parser produces a
//! [`Node`] tree and hands it to [`compile`](crate::compile). Trees can also
//! be built directly with the constructor helpers below, or deserialized from
//! JSON through [`JsonTreeParser`](crate::JsonTreeParser).
//!
//! Shapes the compiler expects (children in order):
//!
//! | Tag | Children | Text |
//! |-----|----------|------|
//! | `Template` | statements | |
//! | `RawString` | | literal text |
//! | `Expression` | value | |
//! | binary ops | lhs, rhs | |
//! | `Not` | operand | |
//! | `Integer`, `Double`, `String` | | literal |
//! | `Ident`, `DollarVar` | | name |
//! | `Attribute` | container, key | |
//! | `Range` | lhs, rhs | |
//! | `FunCall` | callee, args... | |
//! | `Set` | ident, value | |
//! | `If` | cond, then-block, else? | |
//! | `Switch` | subject, cases... | |
//! | `Case` | cond?, block | |
//! | `Foreach` | ident, source, block | |
//! | `While` | cond, block | |
//! | `Include` | path, (ident, value)... | |
//! | `Wrapper` | path, block | |
//!
//! A method call is a `FunCall` whose callee is an `Attribute` node. An ELSIF
//! chain is an `If` whose else slot holds another `If`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a syntax node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Tag {
    Template,
    RawString,
    Expression,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Concat,
    Equals,
    NotEquals,
    Gt,
    Ge,
    Lt,
    Le,
    AndAnd,
    OrOr,
    Not,
    Integer,
    Double,
    String,
    True,
    False,
    Null,
    Array,
    Map,
    Ident,
    DollarVar,
    Attribute,
    Range,
    FunCall,
    Set,
    If,
    Switch,
    Case,
    Foreach,
    While,
    Last,
    Next,
    Include,
    Wrapper,
    LoopCount,
    LoopIndex,
    LoopHasNext,
}

/// One node of the template syntax tree.
///
/// Nodes are immutable once built. `line` is the 1-based source line the
/// node was parsed from; the compiler records it for every instruction the
/// node emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub tag: Tag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
    #[serde(default)]
    pub line: u32,
}

impl Node {
    /// Creates a childless node without text.
    #[must_use]
    pub fn new(tag: Tag) -> Self {
        Self {
            tag,
            text: None,
            children: Vec::new(),
            line: 1,
        }
    }

    /// Creates a node carrying a text payload.
    #[must_use]
    pub fn leaf(tag: Tag, text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::new(tag)
        }
    }

    /// Creates a node with the given children.
    #[must_use]
    pub fn branch(tag: Tag, children: Vec<Self>) -> Self {
        Self {
            children,
            ..Self::new(tag)
        }
    }

    /// Sets the source line of this node only (children keep their own).
    #[must_use]
    pub fn at(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    /// Root node holding a statement list.
    #[must_use]
    pub fn template(children: Vec<Self>) -> Self {
        Self::branch(Tag::Template, children)
    }

    /// Literal template text, emitted verbatim.
    #[must_use]
    pub fn raw_text(text: impl Into<String>) -> Self {
        Self::leaf(Tag::RawString, text)
    }

    /// `[% value %]`: evaluates `value` and appends it to the output.
    #[must_use]
    pub fn expression(value: Self) -> Self {
        Self::branch(Tag::Expression, vec![value])
    }

    #[must_use]
    pub fn int(value: i64) -> Self {
        Self::leaf(Tag::Integer, value.to_string())
    }

    #[must_use]
    pub fn double(value: f64) -> Self {
        Self::leaf(Tag::Double, value.to_string())
    }

    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::leaf(Tag::String, value)
    }

    #[must_use]
    pub fn bool(value: bool) -> Self {
        Self::new(if value { Tag::True } else { Tag::False })
    }

    #[must_use]
    pub fn null() -> Self {
        Self::new(Tag::Null)
    }

    #[must_use]
    pub fn ident(name: impl Into<String>) -> Self {
        Self::leaf(Tag::Ident, name)
    }

    /// `$name`, resolved exactly like a bare identifier.
    #[must_use]
    pub fn dollar_var(name: impl Into<String>) -> Self {
        Self::leaf(Tag::DollarVar, name)
    }

    /// Any two-operand node (`Add`, `Equals`, `Range`, ...).
    #[must_use]
    pub fn binary(tag: Tag, lhs: Self, rhs: Self) -> Self {
        Self::branch(tag, vec![lhs, rhs])
    }

    #[must_use]
    pub fn not(operand: Self) -> Self {
        Self::branch(Tag::Not, vec![operand])
    }

    #[must_use]
    pub fn array(items: Vec<Self>) -> Self {
        Self::branch(Tag::Array, items)
    }

    /// Map literal; `pairs` are key/value expressions.
    #[must_use]
    pub fn map(pairs: Vec<(Self, Self)>) -> Self {
        Self::branch(Tag::Map, pairs.into_iter().flat_map(|(k, v)| [k, v]).collect())
    }

    /// `container.key` or `container[key]`.
    #[must_use]
    pub fn attribute(container: Self, key: Self) -> Self {
        Self::branch(Tag::Attribute, vec![container, key])
    }

    /// `name(args...)` or, when `callee` is an attribute node, `obj.method(args...)`.
    #[must_use]
    pub fn call(callee: Self, args: Vec<Self>) -> Self {
        let mut children = Vec::with_capacity(args.len() + 1);
        children.push(callee);
        children.extend(args);
        Self::branch(Tag::FunCall, children)
    }

    #[must_use]
    pub fn set(name: impl Into<String>, value: Self) -> Self {
        Self::branch(Tag::Set, vec![Self::ident(name), value])
    }

    #[must_use]
    pub fn if_else(cond: Self, then: Self, otherwise: Option<Self>) -> Self {
        let mut children = vec![cond, then];
        children.extend(otherwise);
        Self::branch(Tag::If, children)
    }

    #[must_use]
    pub fn switch(subject: Self, cases: Vec<Self>) -> Self {
        let mut children = Vec::with_capacity(cases.len() + 1);
        children.push(subject);
        children.extend(cases);
        Self::branch(Tag::Switch, children)
    }

    /// A CASE arm; `None` makes it the default arm.
    #[must_use]
    pub fn case(cond: Option<Self>, body: Self) -> Self {
        Self::branch(Tag::Case, cond.into_iter().chain([body]).collect())
    }

    #[must_use]
    pub fn foreach(var: impl Into<String>, source: Self, body: Self) -> Self {
        Self::branch(Tag::Foreach, vec![Self::ident(var), source, body])
    }

    #[must_use]
    pub fn while_loop(cond: Self, body: Self) -> Self {
        Self::branch(Tag::While, vec![cond, body])
    }

    #[must_use]
    pub fn include(path: Self) -> Self {
        Self::branch(Tag::Include, vec![path])
    }

    /// `INCLUDE path WITH name = value, ...`.
    #[must_use]
    pub fn include_with(path: Self, bindings: Vec<(String, Self)>) -> Self {
        let mut children = vec![path];
        for (name, value) in bindings {
            children.push(Self::ident(name));
            children.push(value);
        }
        Self::branch(Tag::Include, children)
    }

    #[must_use]
    pub fn wrapper(path: Self, body: Self) -> Self {
        Self::branch(Tag::Wrapper, vec![path, body])
    }

    /// Text payload, or the empty string for nodes without one.
    #[must_use]
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}

/// S-expression rendering, e.g. `(template (expression (add (integer 1) (integer 2))))`.
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.tag)?;
        if let Some(text) = &self.text {
            write!(f, " {text}")?;
        }
        for child in &self.children {
            write!(f, " {child}")?;
        }
        f.write_str(")")
    }
}
