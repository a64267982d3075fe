//! Human-readable rendering of parsed values.

use crate::value::{Container, ListContainer, Value};
use std::fmt::{self, Write};

#[derive(Debug, Clone)]
pub struct DumpOptions {
    /// Byte strings longer than this are cut; `None` prints everything.
    pub max_bytes: Option<usize>,
    /// Same for text strings, counted in characters.
    pub max_str: Option<usize>,
    /// Show `_`-prefixed entries.
    pub show_private: bool,
}

impl Default for DumpOptions {
    fn default() -> Self {
        DumpOptions {
            max_bytes: Some(32),
            max_str: Some(64),
            show_private: false,
        }
    }
}

fn hex_string(b: &[u8]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect::<Vec<_>>().join(" ")
}

fn format_bytes(b: &[u8], options: &DumpOptions) -> String {
    match options.max_bytes {
        Some(limit) if b.len() > limit => {
            format!("hex({} ...) (truncated, total {})", hex_string(&b[..limit]), b.len())
        }
        _ => format!("hex({})", hex_string(b)),
    }
}

fn format_str(s: &str, options: &DumpOptions) -> String {
    match options.max_str {
        Some(limit) if s.chars().count() > limit => {
            let head: String = s.chars().take(limit).collect();
            format!("{:?}... (truncated, total {})", head, s.chars().count())
        }
        _ => format!("{:?}", s),
    }
}

/// Scalar text; `None` for containers.
fn format_scalar(v: &Value, options: &DumpOptions) -> Option<String> {
    let text = match v {
        Value::None => "None".to_string(),
        Value::Bool(x) => x.to_string(),
        Value::U8(x) => x.to_string(),
        Value::U16(x) => x.to_string(),
        Value::U32(x) => x.to_string(),
        Value::U64(x) => x.to_string(),
        Value::I8(x) => x.to_string(),
        Value::I16(x) => x.to_string(),
        Value::I32(x) => x.to_string(),
        Value::I64(x) => x.to_string(),
        Value::Float(x) => x.to_string(),
        Value::Double(x) => x.to_string(),
        Value::Bytes(b) => format_bytes(b, options),
        Value::Str(s) => format_str(s, options),
        Value::Deferred(_) => "<deferred>".to_string(),
        Value::Lazy(lazy) => format!("<lazy, {} bytes at {}>", lazy.len(), lazy.offset()),
        Value::Struct(_) | Value::List(_) => return None,
    };
    Some(text)
}

fn write_value(out: &mut String, v: &Value, options: &DumpOptions, indent: usize) -> fmt::Result {
    match v {
        Value::Struct(c) => write_container(out, c, options, indent),
        Value::List(l) => write_list(out, l, options, indent),
        scalar => out.write_str(&format_scalar(scalar, options).unwrap_or_default()),
    }
}

fn write_container(out: &mut String, c: &Container, options: &DumpOptions, indent: usize) -> fmt::Result {
    out.write_str("Container:")?;
    let pad = "    ".repeat(indent + 1);
    for (key, value) in c.iter() {
        if key.starts_with('_') && !options.show_private {
            continue;
        }
        write!(out, "\n{}{} = ", pad, key)?;
        write_value(out, value, options, indent + 1)?;
    }
    Ok(())
}

fn write_list(out: &mut String, l: &ListContainer, options: &DumpOptions, indent: usize) -> fmt::Result {
    out.write_str("ListContainer:")?;
    let pad = "    ".repeat(indent + 1);
    for item in l.iter() {
        write!(out, "\n{}", pad)?;
        write_value(out, item, options, indent + 1)?;
    }
    Ok(())
}

/// Render `value` as an indented tree.
pub fn dump(value: &Value, options: &DumpOptions) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_value(&mut out, value, options, 0);
    out
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write_value(&mut out, self, &DumpOptions::default(), 0)?;
        f.write_str(&out)
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write_container(&mut out, self, &DumpOptions::default(), 0)?;
        f.write_str(&out)
    }
}

impl fmt::Display for ListContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write_list(&mut out, self, &DumpOptions::default(), 0)?;
        f.write_str(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_tree_hides_private_entries() {
        let value = Value::from(
            Container::new()
                .with("a", 1u8)
                .with("_io", 5u8)
                .with("items", vec![Value::U8(1), Value::from("x")]),
        );
        assert_eq!(
            value.to_string(),
            "Container:\n    a = 1\n    items = ListContainer:\n        1\n        \"x\""
        );
        let shown = dump(
            &value,
            &DumpOptions {
                show_private: true,
                ..DumpOptions::default()
            },
        );
        assert!(shown.contains("_io = 5"));
    }

    #[test]
    fn long_bytes_are_truncated() {
        let options = DumpOptions {
            max_bytes: Some(2),
            ..DumpOptions::default()
        };
        assert_eq!(
            dump(&Value::Bytes(vec![1, 2, 3]), &options),
            "hex(01 02 ...) (truncated, total 3)"
        );
        assert_eq!(dump(&Value::Bytes(vec![0xab]), &options), "hex(ab)");
    }
}
