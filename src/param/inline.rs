use crate::value::Value;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render `value` as a SQL literal that can be pasted into query text.
pub fn format_inline(value: &Value) -> String {
    let mut out = String::new();
    write_inline(&mut out, value);
    out
}

pub(super) fn write_inline(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("NULL"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(n) => out.push_str(&n.to_string()),
        Value::UInt(n) => out.push_str(&n.to_string()),
        Value::Float(f) => write_float(out, *f),
        Value::String(s) => write_quoted(out, s),
        Value::Uuid(u) => write_call(out, "toUUID", &u.to_string()),
        Value::Date(d) => write_call(out, "toDate", &d.format(DATE_FORMAT).to_string()),
        Value::DateTime(dt) => {
            write_call(out, "toDateTime", &dt.format(DATETIME_FORMAT).to_string())
        }
        Value::Ipv4(ip) => write_call(out, "toIPv4", &ip.to_string()),
        Value::Ipv6(ip) => write_call(out, "toIPv6", &ip.to_string()),
        Value::Array(items) => write_list(out, '[', ']', items.iter()),
        Value::Tuple(t) => write_list(out, '(', ')', t.iter()),
        Value::Map(entries) => {
            out.push_str("map(");
            for (i, (k, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_inline(out, k);
                out.push_str(", ");
                write_inline(out, v);
            }
            out.push(')');
        }
    }
}

pub(super) fn write_float(out: &mut String, f: f64) {
    if f.is_nan() {
        out.push_str("nan");
    } else if f.is_infinite() {
        out.push_str(if f > 0.0 { "inf" } else { "-inf" });
    } else {
        out.push_str(&f.to_string());
    }
}

/// Single-quoted string literal with `\` and `'` escaped.
pub(super) fn write_quoted(out: &mut String, s: &str) {
    out.reserve(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            _ => out.push(c),
        }
    }
    out.push('\'');
}

fn write_call(out: &mut String, func: &str, arg: &str) {
    out.push_str(func);
    out.push('(');
    write_quoted(out, arg);
    out.push(')');
}

fn write_list<'a>(
    out: &mut String,
    open: char,
    close: char,
    items: impl Iterator<Item = &'a Value>,
) {
    out.push(open);
    for (i, item) in items.enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_inline(out, item);
    }
    out.push(close);
}
