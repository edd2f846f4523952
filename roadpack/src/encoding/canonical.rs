//! Canonical JSON encoding for signed material.
//!
//! Two semantically equal values must always produce the same bytes, no
//! matter which implementation produced them or in which order their keys
//! were inserted. The rules are:
//!
//! 1. UTF-8 JSON text with no insignificant whitespace.
//! 2. Object members sorted by key, comparing UTF-16 code units (the order
//!    an ECMAScript `sort()` yields for string keys).
//! 3. Arrays keep their order.
//! 4. Strings use minimal escaping: `\"`, `\\`, `\b`, `\f`, `\n`, `\r`,
//!    `\t`, and `\u00xx` (lowercase hex) for the remaining C0 controls.
//! 5. Numbers follow ECMAScript `Number.prototype.toString`: shortest
//!    round-trip digits, integral values without a fraction, exponent form
//!    outside `[1e-6, 1e21)`, and `-0` rendered as `0`.
//!
//! ```
//! use roadpack::encoding::canonicalize_value;
//! use serde_json::json;
//!
//! let bytes = canonicalize_value(&json!({"z": 1.0, "a": [true, null]})).unwrap();
//! assert_eq!(bytes, br#"{"a":[true,null],"z":1}"#);
//! ```

use std::fmt;
use std::fmt::Write as _;

use serde::Serialize;
use serde_json::{Map, Number, Value};

/// Maximum nesting depth accepted by the encoder.
pub const MAX_DEPTH: usize = 64;

/// Errors produced while canonicalizing a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalError {
    /// The value could not be converted into a JSON tree.
    Serialize(String),
    /// The value is nested deeper than [`MAX_DEPTH`].
    MaxDepthExceeded(usize),
    /// A number has no finite `f64` representation.
    UnrepresentableNumber(String),
}

impl fmt::Display for CanonicalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalError::Serialize(msg) => write!(f, "cannot serialize value: {msg}"),
            CanonicalError::MaxDepthExceeded(max) => {
                write!(f, "value nested deeper than {max} levels")
            }
            CanonicalError::UnrepresentableNumber(n) => {
                write!(f, "number {n} has no finite representation")
            }
        }
    }
}

impl std::error::Error for CanonicalError {}

/// Canonicalizes any serializable value.
///
/// The value is first converted to a [`serde_json::Value`] and then emitted
/// with [`canonicalize_value`].
pub fn canonicalize<T>(value: &T) -> Result<Vec<u8>, CanonicalError>
where
    T: Serialize + ?Sized,
{
    let tree = serde_json::to_value(value).map_err(|e| CanonicalError::Serialize(e.to_string()))?;
    canonicalize_value(&tree)
}

/// Canonicalizes an already-parsed JSON tree.
pub fn canonicalize_value(value: &Value) -> Result<Vec<u8>, CanonicalError> {
    let mut out = String::new();
    emit_value(value, &mut out, 0)?;
    Ok(out.into_bytes())
}

fn emit_value(value: &Value, out: &mut String, depth: usize) -> Result<(), CanonicalError> {
    if depth > MAX_DEPTH {
        return Err(CanonicalError::MaxDepthExceeded(MAX_DEPTH));
    }

    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => emit_number(n, out)?,
        Value::String(s) => emit_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                emit_value(item, out, depth + 1)?;
            }
            out.push(']');
        }
        Value::Object(map) => emit_object(map, out, depth)?,
    }

    Ok(())
}

fn emit_object(
    map: &Map<String, Value>,
    out: &mut String,
    depth: usize,
) -> Result<(), CanonicalError> {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|(a, _), (b, _)| a.encode_utf16().cmp(b.encode_utf16()));

    out.push('{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        emit_string(key, out);
        out.push(':');
        emit_value(value, out, depth + 1)?;
    }
    out.push('}');

    Ok(())
}

fn emit_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn emit_number(n: &Number, out: &mut String) -> Result<(), CanonicalError> {
    let v = n
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| CanonicalError::UnrepresentableNumber(n.to_string()))?;
    out.push_str(&format_js_number(v));
    Ok(())
}

/// Formats a finite `f64` exactly like ECMAScript `Number.prototype.toString`.
pub(crate) fn format_js_number(v: f64) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    if v < 0.0 {
        return format!("-{}", format_js_number(-v));
    }

    // `{:e}` yields the shortest round-trip digits, e.g. "1.2345e-7".
    let sci = format!("{v:e}");
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let k = digits.len() as i32;
    let n = exp + 1;

    if k <= n && n <= 21 {
        let mut s = digits;
        s.extend(std::iter::repeat_n('0', (n - k) as usize));
        s
    } else if 0 < n && n <= 21 {
        let (int_part, frac_part) = digits.split_at(n as usize);
        format!("{int_part}.{frac_part}")
    } else if -6 < n && n <= 0 {
        let zeros: String = std::iter::repeat_n('0', (-n) as usize).collect();
        format!("0.{zeros}{digits}")
    } else {
        let e = n - 1;
        let sign = if e < 0 { '-' } else { '+' };
        let (first, rest) = digits.split_at(1);
        if rest.is_empty() {
            format!("{first}e{sign}{}", e.abs())
        } else {
            format!("{first}.{rest}e{sign}{}", e.abs())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn canon(v: Value) -> String {
        String::from_utf8(canonicalize_value(&v).expect("canonicalize")).expect("utf8")
    }

    #[test]
    fn key_order_does_not_affect_output() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"y":2,"x":3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"x":3,"y":2},"b":1}"#).unwrap();
        assert_eq!(canonicalize_value(&a).unwrap(), canonicalize_value(&b).unwrap());
        assert_eq!(canon(a), r#"{"a":{"x":3,"y":2},"b":1}"#);
    }

    #[test]
    fn keys_sort_by_utf16_code_units() {
        // U+1F600 starts with surrogate 0xD83D, so it sorts before U+FF61
        // even though its scalar value is larger.
        let v = json!({"\u{ff61}": 1, "\u{1f600}": 2, "a": 3});
        assert_eq!(canon(v), "{\"a\":3,\"\u{1f600}\":2,\"\u{ff61}\":1}");
    }

    #[test]
    fn arrays_preserve_order() {
        assert_eq!(canon(json!([3, 1, 2])), "[3,1,2]");
    }

    #[test]
    fn numbers_follow_ecmascript_rendering() {
        let cases: &[(f64, &str)] = &[
            (1.0, "1"),
            (100.0, "100"),
            (-0.0, "0"),
            (0.1, "0.1"),
            (-2.5, "-2.5"),
            (22.572646, "22.572646"),
            (123456.789, "123456.789"),
            (1e20, "100000000000000000000"),
            (1e21, "1e+21"),
            (1.5e22, "1.5e+22"),
            (0.000001, "0.000001"),
            (0.0000015, "0.0000015"),
            (1e-7, "1e-7"),
            (1.25e-9, "1.25e-9"),
            (1152921504606846976.0, "1152921504606847000"),
        ];
        for (value, expected) in cases {
            assert_eq!(format_js_number(*value), *expected, "formatting {value:e}");
        }
    }

    #[test]
    fn integer_and_float_inputs_render_identically() {
        assert_eq!(canon(json!({"score": 3})), canon(json!({"score": 3.0})));
    }

    #[test]
    fn strings_use_minimal_escaping() {
        let v = json!("quote\" back\\ nl\n tab\t bell\u{07} é ✓");
        assert_eq!(
            canon(v),
            "\"quote\\\" back\\\\ nl\\n tab\\t bell\\u0007 é ✓\""
        );
    }

    #[test]
    fn output_has_no_whitespace() {
        let out = canon(json!({"payload": {"lat": 1.5, "tags": ["a", "b"]}, "ok": false}));
        assert_eq!(out, r#"{"ok":false,"payload":{"lat":1.5,"tags":["a","b"]}}"#);
    }

    #[test]
    fn excessive_nesting_is_rejected() {
        let mut v = json!(0);
        for _ in 0..(MAX_DEPTH + 2) {
            v = json!([v]);
        }
        let err = canonicalize_value(&v).unwrap_err();
        assert_eq!(err, CanonicalError::MaxDepthExceeded(MAX_DEPTH));
    }

    #[test]
    fn canonicalize_accepts_serializable_structs() {
        #[derive(Serialize)]
        struct Sample {
            zeta: u32,
            alpha: Option<f64>,
        }

        let bytes = canonicalize(&Sample {
            zeta: 7,
            alpha: None,
        })
        .unwrap();
        assert_eq!(bytes, br#"{"alpha":null,"zeta":7}"#);
    }
}
