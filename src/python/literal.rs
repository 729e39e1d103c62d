#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Rendering of JSON values as Python literals, for embedding notebook
//! metadata into synthesized programs.

use itertools::Itertools;
use serde_json::Value;

/// Renders `value` as an equivalent Python literal expression.
pub fn python_literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => python_string(text),
        Value::Array(items) => format!("[{}]", items.iter().map(python_literal).join(", ")),
        Value::Object(map) => format!(
            "{{{}}}",
            map.iter()
                .map(|(key, value)| format!("{}: {}", python_string(key), python_literal(value)))
                .join(", ")
        ),
    }
}

/// Renders `text` as a double-quoted Python string literal.
pub fn python_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Renders a point value; whole numbers print without a fractional part, the
/// way nbgrader metadata usually spells them.
pub fn python_number(value: f64) -> String {
    if !value.is_finite() {
        "None".to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Renders a metadata value the way Python's `str()` would show it inside a
/// comment: strings bare, everything else as a literal.
pub fn python_display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => python_literal(other),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn renders_nested_metadata() {
        let value = json!({
            "id": "cell-1",
            "metadata": { "nbgrader": { "grade": true, "points": 1, "checksum": null } },
            "tags": ["a", "b"],
        });

        assert_eq!(
            python_literal(&value),
            r#"{"id": "cell-1", "metadata": {"nbgrader": {"checksum": None, "grade": True, "points": 1}}, "tags": ["a", "b"]}"#
        );
    }

    #[test]
    fn escapes_strings() {
        assert_eq!(python_string("say \"hi\"\n"), r#""say \"hi\"\n""#);
        assert_eq!(python_string("back\\slash\u{1}"), r#""back\\slash\x01""#);
    }

    #[test]
    fn formats_points() {
        assert_eq!(python_number(2.0), "2");
        assert_eq!(python_number(0.5), "0.5");
        assert_eq!(python_number(f64::NAN), "None");
    }
}
