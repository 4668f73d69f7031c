//! Text helpers behind the built-in functions and the HTML escaper.

use std::{borrow::Cow, fmt::Write as _, iter::Peekable, str::Chars};

use crate::value::Value;

/// Replaces `& < > " '` with HTML entities.
pub(crate) fn html_escape(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Escapes text as an `application/x-www-form-urlencoded` parameter.
///
/// Alphanumerics and `-_.*` pass through, space becomes `+`, every other
/// UTF-8 byte becomes `%XX`.
pub(crate) fn uri_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for &b in text.as_bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'*') {
            out.push(char::from(b));
        } else if b == b' ' {
            out.push('+');
        } else {
            // writing to a String cannot fail
            let _ = write!(out, "%{b:02X}");
        }
    }
    out
}

/// Flags and sizes parsed from one `%` conversion.
#[derive(Debug, Default)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    alternate: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

/// printf-style formatting.
///
/// Supports `%[flags][width][.precision]conv` with flags `- 0 + space #` and
/// conversions `d i s f e E x X o b c %` plus `n` for a newline.
pub(crate) fn sprintf(format: &str, args: &[Value]) -> Result<String, String> {
    let mut out = String::with_capacity(format.len() + 8 * args.len());
    let mut args = args.iter();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec = Spec::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.left = true,
                '0' => spec.zero = true,
                '+' => spec.plus = true,
                ' ' => spec.space = true,
                '#' => spec.alternate = true,
                _ => break,
            }
            chars.next();
        }
        spec.width = read_number(&mut chars, "width")?;
        if chars.next_if_eq(&'.').is_some() {
            spec.precision = Some(read_number(&mut chars, "precision")?.unwrap_or(0));
        }
        let conv = chars.next().ok_or("sprintf: incomplete format specifier at end of format")?;
        match conv {
            '%' => out.push('%'),
            'n' => out.push('\n'),
            _ => {
                let arg = args
                    .next()
                    .ok_or_else(|| format!("sprintf: missing argument for '%{conv}'"))?;
                convert(&mut out, conv, &spec, arg)?;
            }
        }
    }
    Ok(out)
}

/// Largest width or precision a conversion may ask for.
const MAX_FIELD_SIZE: usize = 65_535;

fn read_number(chars: &mut Peekable<Chars<'_>>, what: &str) -> Result<Option<usize>, String> {
    let mut n: Option<usize> = None;
    while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
        let next = n.unwrap_or(0) * 10 + d as usize;
        if next > MAX_FIELD_SIZE {
            return Err(format!("sprintf: {what} too large"));
        }
        n = Some(next);
        chars.next();
    }
    Ok(n)
}

fn convert(out: &mut String, conv: char, spec: &Spec, arg: &Value) -> Result<(), String> {
    match conv {
        'd' | 'i' => {
            let n = int_arg(conv, arg)?;
            let sign = sign_of(n < 0, spec);
            pad_numeric(out, spec, sign, &n.unsigned_abs().to_string());
        }
        'x' | 'X' | 'o' | 'b' => {
            let n = int_arg(conv, arg)?;
            let (digits, prefix) = match conv {
                'x' => (format!("{n:x}"), "0x"),
                'X' => (format!("{n:X}"), "0X"),
                'o' => (format!("{n:o}"), "0"),
                _ => (format!("{n:b}"), "0b"),
            };
            pad_numeric(out, spec, if spec.alternate { prefix } else { "" }, &digits);
        }
        'f' | 'e' | 'E' => {
            let v = float_arg(conv, arg)?;
            let precision = spec.precision.unwrap_or(6);
            let sign = sign_of(v.is_sign_negative() && v != 0.0, spec);
            let digits = match conv {
                'f' => format!("{:.*}", precision, v.abs()),
                _ => {
                    let raw = format!("{:.*e}", precision, v.abs());
                    let formatted = java_exponent(&raw);
                    if conv == 'E' { formatted.to_uppercase() } else { formatted }
                }
            };
            pad_numeric(out, spec, sign, &digits);
        }
        's' => {
            let text: Cow<'_, str> = match arg {
                Value::Null => Cow::Borrowed("null"),
                other => other.to_text(),
            };
            let text = match spec.precision {
                Some(p) => text.chars().take(p).collect::<String>().into(),
                None => text,
            };
            pad_text(out, spec, &text);
        }
        'c' => {
            let ch = match arg {
                Value::Int(n) => u32::try_from(*n)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| format!("sprintf: {n} is not a valid character"))?,
                Value::Str(s) | Value::Raw(s) if s.chars().count() == 1 => s.chars().next().unwrap_or_default(),
                other => return Err(format!("sprintf: '%c' expects a character, got {}", other.type_name())),
            };
            pad_text(out, spec, ch.encode_utf8(&mut [0; 4]));
        }
        other => return Err(format!("sprintf: unknown conversion '%{other}'")),
    }
    Ok(())
}

fn int_arg(conv: char, arg: &Value) -> Result<i64, String> {
    match arg {
        Value::Int(n) => Ok(*n),
        other => Err(format!("sprintf: '%{conv}' expects an integer, got {}", other.type_name())),
    }
}

fn float_arg(conv: char, arg: &Value) -> Result<f64, String> {
    match arg {
        Value::Float(v) => Ok(*v),
        Value::Int(n) => Ok(*n as f64),
        other => Err(format!("sprintf: '%{conv}' expects a number, got {}", other.type_name())),
    }
}

fn sign_of(negative: bool, spec: &Spec) -> &'static str {
    if negative {
        "-"
    } else if spec.plus {
        "+"
    } else if spec.space {
        " "
    } else {
        ""
    }
}

/// Rewrites Rust's `1.5e3` exponent form into `1.5e+03`.
fn java_exponent(raw: &str) -> String {
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = exp.strip_prefix('-').map_or(("+", exp), |d| ("-", d));
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => raw.to_owned(),
    }
}

fn pad_numeric(out: &mut String, spec: &Spec, prefix: &str, digits: &str) {
    let len = prefix.len() + digits.len();
    let fill = spec.width.map_or(0, |w| w.saturating_sub(len));
    if spec.left {
        out.push_str(prefix);
        out.push_str(digits);
        out.extend(std::iter::repeat_n(' ', fill));
    } else if spec.zero {
        out.push_str(prefix);
        out.extend(std::iter::repeat_n('0', fill));
        out.push_str(digits);
    } else {
        out.extend(std::iter::repeat_n(' ', fill));
        out.push_str(prefix);
        out.push_str(digits);
    }
}

fn pad_text(out: &mut String, spec: &Spec, text: &str) {
    let fill = spec.width.map_or(0, |w| w.saturating_sub(text.chars().count()));
    if spec.left {
        out.push_str(text);
        out.extend(std::iter::repeat_n(' ', fill));
    } else {
        out.extend(std::iter::repeat_n(' ', fill));
        out.push_str(text);
    }
}
