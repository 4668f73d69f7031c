//! Output escaping policies.
//!
//! Every non-raw value appended to the output passes through the active
//! [`Escaper`]. A [`Value::Raw`](crate::Value::Raw) bypasses it regardless of
//! the policy in use.

use std::{borrow::Cow, fmt};

/// Transforms text before it is written to the output.
pub trait Escaper: fmt::Debug + Send + Sync {
    fn escape<'a>(&self, text: &'a str) -> Cow<'a, str>;
}

/// Escapes the five HTML-significant characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlEscaper;

impl Escaper for HtmlEscaper {
    fn escape<'a>(&self, text: &'a str) -> Cow<'a, str> {
        crate::format::html_escape(text)
    }
}

/// Leaves text unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEscaper;

impl Escaper for NullEscaper {
    fn escape<'a>(&self, text: &'a str) -> Cow<'a, str> {
        Cow::Borrowed(text)
    }
}
