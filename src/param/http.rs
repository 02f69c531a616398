use super::inline::{write_float, write_inline, write_quoted};
use crate::value::Value;

/// Render `value` as the text of a `param_<name>` URL argument.
///
/// Top-level scalars go out bare, in the escaped form the server reads
/// query parameters in. Elements of arrays, tuples and maps are quoted
/// literals, as they are inside any composite value.
pub fn format_http(value: &Value) -> String {
    let mut out = String::new();
    match value {
        Value::Null => out.push_str("\\N"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(n) => out.push_str(&n.to_string()),
        Value::UInt(n) => out.push_str(&n.to_string()),
        Value::Float(f) => write_float(&mut out, *f),
        Value::String(s) => write_escaped(&mut out, s),
        Value::Uuid(u) => out.push_str(&u.to_string()),
        Value::Date(d) => out.push_str(&d.format("%Y-%m-%d").to_string()),
        Value::DateTime(dt) => out.push_str(&dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        Value::Ipv4(ip) => out.push_str(&ip.to_string()),
        Value::Ipv6(ip) => out.push_str(&ip.to_string()),
        Value::Array(_) | Value::Tuple(_) | Value::Map(_) => write_element(&mut out, value),
    }
    out
}

fn write_escaped(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            _ => out.push(c),
        }
    }
}

fn write_elements<'a>(out: &mut String, items: impl Iterator<Item = &'a Value>) {
    for (i, item) in items.enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_element(out, item);
    }
}

/// Composite elements: scalars are plain quoted literals, no function calls.
fn write_element(out: &mut String, value: &Value) {
    match value {
        Value::Uuid(u) => write_quoted(out, &u.to_string()),
        Value::Date(d) => write_quoted(out, &d.format("%Y-%m-%d").to_string()),
        Value::DateTime(dt) => write_quoted(out, &dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        Value::Ipv4(ip) => write_quoted(out, &ip.to_string()),
        Value::Ipv6(ip) => write_quoted(out, &ip.to_string()),
        Value::Array(items) => {
            out.push('[');
            write_elements(out, items.iter());
            out.push(']');
        }
        Value::Tuple(t) => {
            out.push('(');
            write_elements(out, t.iter());
            out.push(')');
        }
        Value::Map(entries) => {
            out.push('{');
            for (i, (k, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_element(out, k);
                out.push(':');
                write_element(out, v);
            }
            out.push('}');
        }
        other => write_inline(out, other),
    }
}
